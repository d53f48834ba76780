//! visord
//!
//! Single entry binary: runs the supervisor daemon by default, with
//! `version`, `service`, and `ctl` subcommands.

mod ctl;

use clap::{Parser, Subcommand};
use ctl::CtlClient;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use visor_engine::daemon::Daemon;
use visor_engine::ports::BroadcastEmitter;
use visor_engine::Supervisor;

#[derive(Parser)]
#[command(name = "visord", version, about = "process supervisor")]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "configuration", global = true)]
    configuration: Option<PathBuf>,

    /// Run in the background (daemonization is delegated to the init system;
    /// the flag is accepted for interface compatibility)
    #[arg(short = 'd', long = "daemon")]
    daemon: bool,

    /// Load KEY=VALUE pairs from a file into the supervisor environment
    /// before reading the configuration
    #[arg(long = "env-file")]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the version and exit
    Version,
    /// Manage the system service registration
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },
    /// Control a running supervisor
    Ctl {
        /// Server URL of the running daemon
        #[arg(
            short = 's',
            long = "serverurl",
            default_value = "http://localhost:9001"
        )]
        serverurl: String,

        /// Basic auth username
        #[arg(short = 'u', long = "user")]
        user: Option<String>,

        /// Basic auth password
        #[arg(short = 'p', long = "password")]
        password: Option<String>,

        #[command(subcommand)]
        action: CtlAction,
    },
}

#[derive(Subcommand)]
enum ServiceAction {
    Install,
    Uninstall,
    Start,
    Stop,
}

#[derive(Subcommand)]
enum CtlAction {
    /// List all processes and their states
    Status,
    /// Start a process (name, group:name, or wildcard)
    Start { name: String },
    /// Stop a process
    Stop { name: String },
    /// Stop then start a process
    Restart { name: String },
    /// Send a signal to a process
    Signal { signal: String, name: String },
    /// Print a process log (device: stdout or stderr)
    Tail {
        name: String,
        #[arg(default_value = "stdout")]
        device: String,
    },
    /// Reload the configuration
    Reload,
    /// Print the daemon pid
    Pid,
    /// Shut the daemon down
    Shutdown,
}

const SERVICE_UNIT: &str = "\
[Unit]
Description=visord process supervisor
After=network.target

[Service]
Type=simple
ExecStart=/usr/local/bin/visord -c /etc/supervisord.conf
ExecReload=/bin/kill -HUP $MAINPID
Restart=on-failure

[Install]
WantedBy=multi-user.target
";

#[tokio::main]
async fn main() -> ExitCode {
    let mut cli = Cli::parse();

    match cli.command.take() {
        Some(Commands::Version) => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        Some(Commands::Service { action }) => run_service(action),
        Some(Commands::Ctl {
            serverurl,
            user,
            password,
            action,
        }) => {
            let credentials = user.map(|u| (u, password.unwrap_or_default()));
            let client = CtlClient::new(serverurl, credentials);
            let result = match action {
                CtlAction::Status => client.status().await,
                CtlAction::Start { name } => client.start(&name).await,
                CtlAction::Stop { name } => client.stop(&name).await,
                CtlAction::Restart { name } => client.restart(&name).await,
                CtlAction::Signal { signal, name } => client.signal(&signal, &name).await,
                CtlAction::Tail { name, device } => client.tail(&name, &device).await,
                CtlAction::Reload => client.reload().await,
                CtlAction::Pid => client.pid().await,
                CtlAction::Shutdown => client.shutdown().await,
            };
            match result {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("error: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        None => run_daemon(cli).await,
    }
}

async fn run_daemon(cli: Cli) -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Some(env_file) = &cli.env_file {
        match visor_engine::process::command::load_env_file(env_file) {
            Ok(pairs) => {
                for (k, v) in pairs {
                    std::env::set_var(k, v);
                }
            }
            Err(e) => {
                error!(file = %env_file.display(), error = %e, "cannot load env file");
                return ExitCode::FAILURE;
            }
        }
    }

    if cli.daemon {
        info!("-d requested; running in the foreground, use the init system to detach");
    }

    let config_file = match cli
        .configuration
        .or_else(visor_engine::config::find_config_file)
    {
        Some(path) => path,
        None => {
            error!("no configuration file given and none found in the search path");
            return ExitCode::FAILURE;
        }
    };

    let events = Arc::new(BroadcastEmitter::default());
    let supervisor = Arc::new(Supervisor::new(&config_file, events));
    let daemon = Daemon::new(supervisor);

    info!(
        config = %config_file.display(),
        version = env!("CARGO_PKG_VERSION"),
        "visord starting"
    );
    match daemon.run().await {
        Ok(()) => {
            info!("clean shutdown");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "supervisor failed");
            ExitCode::FAILURE
        }
    }
}

fn run_service(action: ServiceAction) -> ExitCode {
    // thin systemd integration: print or install the unit, delegate the rest
    match action {
        ServiceAction::Install => {
            let path = "/etc/systemd/system/visord.service";
            match std::fs::write(path, SERVICE_UNIT) {
                Ok(()) => {
                    println!("wrote {path}; run: systemctl daemon-reload && systemctl enable visord");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("cannot write {path}: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        ServiceAction::Uninstall => {
            let path = "/etc/systemd/system/visord.service";
            match std::fs::remove_file(path) {
                Ok(()) => {
                    println!("removed {path}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("cannot remove {path}: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        ServiceAction::Start => delegate_systemctl("start"),
        ServiceAction::Stop => delegate_systemctl("stop"),
    }
}

fn delegate_systemctl(verb: &str) -> ExitCode {
    match std::process::Command::new("systemctl")
        .args([verb, "visord"])
        .status()
    {
        Ok(status) if status.success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("cannot run systemctl: {e}");
            ExitCode::FAILURE
        }
    }
}
