//! Control client
//! Speaks the daemon's HTTP API for the `ctl` subcommands

use serde::Deserialize;
use std::error::Error;

#[derive(Debug, Deserialize)]
struct ProcessInfoRow {
    name: String,
    group: String,
    statename: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct FaultBody {
    code: i32,
    message: String,
}

pub struct CtlClient {
    server_url: String,
    client: reqwest::Client,
    credentials: Option<(String, String)>,
}

impl CtlClient {
    pub fn new(server_url: String, credentials: Option<(String, String)>) -> Self {
        Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            credentials,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, format!("{}{}", self.server_url, path));
        if let Some((user, pass)) = &self.credentials {
            req = req.basic_auth(user, Some(pass));
        }
        req
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, Box<dyn Error>> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        match response.json::<FaultBody>().await {
            Ok(fault) => Err(format!("fault {}: {}", fault.code, fault.message).into()),
            Err(_) => Err(format!("request failed with HTTP {status}").into()),
        }
    }

    pub async fn status(&self) -> Result<(), Box<dyn Error>> {
        let response = self
            .request(reqwest::Method::GET, "/program/list")
            .send()
            .await?;
        let rows: Vec<ProcessInfoRow> = Self::check(response).await?.json().await?;
        for row in rows {
            let label = if row.group == row.name {
                row.name.clone()
            } else {
                format!("{}:{}", row.group, row.name)
            };
            println!("{:<32} {:<10} {}", label, row.statename, row.description);
        }
        Ok(())
    }

    pub async fn start(&self, name: &str) -> Result<(), Box<dyn Error>> {
        let response = self
            .request(reqwest::Method::POST, &format!("/program/start/{name}"))
            .send()
            .await?;
        Self::check(response).await?;
        println!("{name}: started");
        Ok(())
    }

    pub async fn stop(&self, name: &str) -> Result<(), Box<dyn Error>> {
        let response = self
            .request(reqwest::Method::POST, &format!("/program/stop/{name}"))
            .send()
            .await?;
        Self::check(response).await?;
        println!("{name}: stopped");
        Ok(())
    }

    pub async fn restart(&self, name: &str) -> Result<(), Box<dyn Error>> {
        // NotRunning on stop is fine, the point is the start that follows
        let _ = self
            .request(reqwest::Method::POST, &format!("/program/stop/{name}"))
            .send()
            .await?;
        self.start(name).await
    }

    pub async fn signal(&self, sig: &str, name: &str) -> Result<(), Box<dyn Error>> {
        let response = self
            .request(reqwest::Method::POST, &format!("/program/signal/{sig}/{name}"))
            .send()
            .await?;
        Self::check(response).await?;
        println!("{name}: signalled {sig}");
        Ok(())
    }

    pub async fn tail(&self, name: &str, device: &str) -> Result<(), Box<dyn Error>> {
        #[derive(Deserialize)]
        struct TailBody {
            log: String,
        }
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/program/log/{name}/{device}?offset=0&length=65536"),
            )
            .send()
            .await?;
        let body: TailBody = Self::check(response).await?.json().await?;
        print!("{}", body.log);
        Ok(())
    }

    pub async fn reload(&self) -> Result<(), Box<dyn Error>> {
        #[derive(Deserialize)]
        struct ReloadBody {
            added: Vec<String>,
            changed: Vec<String>,
            removed: Vec<String>,
        }
        let response = self
            .request(reqwest::Method::POST, "/supervisor/reload")
            .send()
            .await?;
        let body: ReloadBody = Self::check(response).await?.json().await?;
        println!(
            "reloaded: added={:?} changed={:?} removed={:?}",
            body.added, body.changed, body.removed
        );
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<(), Box<dyn Error>> {
        let response = self
            .request(reqwest::Method::POST, "/supervisor/shutdown")
            .send()
            .await?;
        Self::check(response).await?;
        println!("supervisor shut down");
        Ok(())
    }

    pub async fn pid(&self) -> Result<(), Box<dyn Error>> {
        #[derive(Deserialize)]
        struct InfoBody {
            pid: u32,
        }
        let response = self
            .request(reqwest::Method::GET, "/supervisor/info")
            .send()
            .await?;
        let body: InfoBody = Self::check(response).await?.json().await?;
        println!("{}", body.pid);
        Ok(())
    }
}
