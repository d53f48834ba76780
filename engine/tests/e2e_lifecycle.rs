//! End-to-end lifecycle scenarios with real children

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use visor_engine::domain::ProcessState;
use visor_engine::ports::NoopEmitter;
use visor_engine::Supervisor;

fn write_config(dir: &Path, text: &str) -> PathBuf {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let path = dir.join("supervisord.conf");
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(text.as_bytes()).unwrap();
    path
}

fn supervisor(path: &Path) -> Arc<Supervisor> {
    Arc::new(Supervisor::new(path, Arc::new(NoopEmitter)))
}

async fn wait_for_state(
    sup: &Supervisor,
    name: &str,
    state: ProcessState,
    timeout: Duration,
) -> bool {
    let process = sup.manager().find(name).expect("process not admitted");
    let mut rx = process.subscribe();
    let result = tokio::time::timeout(timeout, rx.wait_for(|s| *s == state))
        .await
        .is_ok();
    result
}

#[tokio::test(flavor = "multi_thread")]
async fn happy_path_reaches_running() {
    let dir = tempfile::tempdir().unwrap();
    let conf = write_config(
        dir.path(),
        "[program:sleep]\ncommand=/bin/sleep 60\nautostart=true\nstartsecs=1\n",
    );
    let sup = supervisor(&conf);
    sup.load().await.unwrap();

    assert!(wait_for_state(&sup, "sleep", ProcessState::Running, Duration::from_secs(5)).await);

    let info = sup.get_process_info("sleep").unwrap();
    assert_eq!(info.statename, "RUNNING");
    assert!(info.pid > 0);
    assert!(info.start > 0);

    sup.stop_all_processes(true).await.unwrap();
    let info = sup.get_process_info("sleep").unwrap();
    assert_eq!(info.statename, "STOPPED");
    // pid invariant: no pid outside Starting/Running/Stopping
    assert_eq!(info.pid, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn startsecs_zero_skips_the_gate() {
    let dir = tempfile::tempdir().unwrap();
    let conf = write_config(
        dir.path(),
        "[program:fast]\ncommand=/bin/sleep 60\nautostart=false\nstartsecs=0\n",
    );
    let sup = supervisor(&conf);
    sup.load().await.unwrap();

    sup.start_process("fast", true).await.unwrap();
    assert_eq!(
        sup.get_process_info("fast").unwrap().statename,
        "RUNNING"
    );
    sup.stop_process("fast", true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn crashing_program_backs_off_to_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let conf = write_config(
        dir.path(),
        "[program:false]\ncommand=/bin/false\nautostart=false\nstartsecs=1\nstartretries=3\nautorestart=true\n",
    );
    let sup = supervisor(&conf);
    sup.load().await.unwrap();

    sup.start_process("false", false).await.unwrap();
    // 4 attempts with 0+1+2+3 seconds of backoff between them
    assert!(wait_for_state(&sup, "false", ProcessState::Fatal, Duration::from_secs(25)).await);

    let info = sup.get_process_info("false").unwrap();
    assert_eq!(info.statename, "FATAL");
    assert_eq!(info.pid, 0);

    // a fatal process can be started again by the operator
    assert!(sup.start_process("false", false).await.is_ok());
    assert!(wait_for_state(&sup, "false", ProcessState::Fatal, Duration::from_secs(25)).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn graceful_stop_escalates_to_sigkill() {
    let dir = tempfile::tempdir().unwrap();
    let conf = write_config(
        dir.path(),
        "[program:stubborn]\ncommand=/bin/sh -c 'trap \"\" TERM; sleep 60'\nautostart=false\nstartsecs=0\nstopwaitsecs=2\n",
    );
    let sup = supervisor(&conf);
    sup.load().await.unwrap();

    sup.start_process("stubborn", true).await.unwrap();
    assert_eq!(
        sup.get_process_info("stubborn").unwrap().statename,
        "RUNNING"
    );

    let started = Instant::now();
    sup.stop_process("stubborn", true).await.unwrap();
    let elapsed = started.elapsed();

    let info = sup.get_process_info("stubborn").unwrap();
    assert_eq!(info.statename, "STOPPED");
    // the child ignored SIGTERM, so the stop took the whole stopwaitsecs
    // window before SIGKILL landed
    assert!(elapsed >= Duration::from_secs(2), "stopped too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(10), "stop took too long: {elapsed:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_is_idempotent_on_resting_processes() {
    let dir = tempfile::tempdir().unwrap();
    let conf = write_config(
        dir.path(),
        "[program:one]\ncommand=/bin/sleep 60\nautostart=false\nstartsecs=0\n",
    );
    let sup = supervisor(&conf);
    sup.load().await.unwrap();

    // stop on a never-started process is NotRunning
    assert!(sup.stop_process("one", true).await.is_err());

    sup.start_process("one", true).await.unwrap();
    sup.stop_process("one", true).await.unwrap();
    // a second stop is a typed no-op again
    assert!(sup.stop_process("one", true).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn expected_exit_code_rests_in_exited() {
    let dir = tempfile::tempdir().unwrap();
    let conf = write_config(
        dir.path(),
        "[program:oneshot]\ncommand=/bin/sh -c 'sleep 1.2; exit 7'\nautostart=false\nstartsecs=1\nautorestart=unexpected\nexitcodes=7\n",
    );
    let sup = supervisor(&conf);
    sup.load().await.unwrap();

    sup.start_process("oneshot", true).await.unwrap();
    assert!(wait_for_state(&sup, "oneshot", ProcessState::Exited, Duration::from_secs(10)).await);
    let info = sup.get_process_info("oneshot").unwrap();
    assert_eq!(info.exitstatus, 7);
}

#[tokio::test(flavor = "multi_thread")]
async fn stdout_is_captured_in_the_program_log() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("echo.log");
    let conf = write_config(
        dir.path(),
        &format!(
            "[program:echo]\ncommand=/bin/sh -c 'echo captured-line; sleep 60'\nautostart=false\nstartsecs=0\nstdout_logfile={}\n",
            log_path.display()
        ),
    );
    let sup = supervisor(&conf);
    sup.load().await.unwrap();

    sup.start_process("echo", true).await.unwrap();
    // give the pump a moment to flush the pipe into the logger
    tokio::time::sleep(Duration::from_millis(500)).await;

    let log = sup.read_process_stdout_log("echo", 0, 0).unwrap();
    assert!(log.contains("captured-line"), "log was: {log:?}");

    let (tail, offset, overflow) = sup.tail_process_stdout_log("echo", 0, 1024).unwrap();
    assert!(tail.contains("captured-line"));
    assert!(offset > 0);
    assert!(!overflow);

    sup.stop_process("echo", true).await.unwrap();
}
