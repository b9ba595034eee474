use std::process;

use tokio::io::AsyncWriteExt;

/// Fetch one record and write it to stdout. `text` and `link` come back as
/// raw text, a file group as JSON, and a single file as its raw bytes.
pub async fn run_pull(remote: &str, kind: &str, id: &str, file_id: Option<&str>) {
    let url = match file_id {
        Some(fid) => format!("{}/file/{}/{}", remote, id, fid),
        None => format!("{}/{}/{}", remote, kind, id),
    };

    let client = reqwest::Client::new();
    let response = match client
        .get(&url)
        .header("Accept", "text/plain")
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to pull: {}", e);
            process::exit(1);
        }
    };

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        eprintln!("Pull failed ({}): {}", status, body.trim());
        process::exit(1);
    }

    let body = match response.bytes().await {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Failed to read response body: {}", e);
            process::exit(1);
        }
    };

    let mut stdout = tokio::io::stdout();
    if let Err(e) = stdout.write_all(&body).await {
        eprintln!("Failed to write output: {}", e);
        process::exit(1);
    }
    let _ = stdout.flush().await;
}
