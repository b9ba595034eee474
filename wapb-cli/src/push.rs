use std::process;

use tokio::io::AsyncReadExt;

use crate::server::config::RemoteConfig;

pub const DEFAULT_REMOTE: &str = "http://localhost:7473";

/// Flags shared by every command that creates records.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct RecordFlags {
    /// Delete the record after its first read
    #[arg(short = 'b', long = "burn")]
    pub burn: bool,

    /// Seconds until the record expires
    #[arg(short = 't', long = "ttl")]
    pub ttl: Option<i64>,

    /// Leave the record out of listings
    #[arg(long = "hidden")]
    pub hidden: bool,
}

impl RecordFlags {
    /// Query parameters carrying these flags.
    pub fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if self.burn {
            query.push(("burn", "true".to_string()));
        }
        if let Some(ttl) = self.ttl.filter(|t| *t > 0) {
            query.push(("ttl", ttl.to_string()));
        }
        if self.hidden {
            query.push(("hidden", "true".to_string()));
        }
        query
    }
}

/// Resolve the remote URL from: CLI arg > wapb.toml config > default
pub fn resolve_remote_url(remote_arg: Option<&str>, config: &RemoteConfig) -> String {
    remote_arg
        .map(String::from)
        .or_else(|| config.url.clone())
        .unwrap_or_else(|| DEFAULT_REMOTE.to_string())
        .trim_end_matches('/')
        .to_string()
}

async fn read_input(path: Option<&str>) -> std::io::Result<Vec<u8>> {
    match path {
        None | Some("-") => {
            let mut buf = Vec::new();
            tokio::io::stdin().read_to_end(&mut buf).await?;
            Ok(buf)
        }
        Some(path) => tokio::fs::read(path).await,
    }
}

pub async fn run_push(remote: &str, link: bool, flags: &RecordFlags, input: Option<&str>) {
    let content = match read_input(input).await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to read {}: {}", input.unwrap_or("stdin"), e);
            process::exit(1);
        }
    };

    let kind = if link { "link" } else { "text" };
    let url = format!("{}/{}", remote, kind);

    let client = reqwest::Client::new();
    let response = match client
        .post(&url)
        .query(&flags.query())
        .header("Content-Type", "text/plain")
        .header("Accept", "text/plain")
        .body(content)
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to push: {}", e);
            process::exit(1);
        }
    };

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        eprintln!("Push failed ({}): {}", status, body.trim());
        process::exit(1);
    }

    match response.text().await {
        Ok(created) => print!("{}", created),
        Err(e) => {
            eprintln!("Failed to read response body: {}", e);
            process::exit(1);
        }
    }
}
