use std::path::Path;
use std::process;

use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::push::RecordFlags;

#[derive(Deserialize)]
struct CreatedGroup {
    id: String,
}

/// Create a file group with `flags`, upload `files` into it in one batch, and
/// print the group URL.
pub async fn run_upload(remote: &str, flags: &RecordFlags, files: &[String]) {
    let client = reqwest::Client::new();

    // 1. Create the group
    let response = match client
        .post(format!("{}/file", remote))
        .query(&flags.query())
        .header("Accept", "application/json")
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to create file group: {}", e);
            process::exit(1);
        }
    };
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        eprintln!("Creating file group failed ({}): {}", status, body.trim());
        process::exit(1);
    }
    let group = match response.json::<CreatedGroup>().await {
        Ok(g) => g,
        Err(e) => {
            eprintln!("Unexpected response when creating file group: {}", e);
            process::exit(1);
        }
    };

    // 2. Build one multipart batch
    let mut form = Form::new();
    for path in files {
        let contents = match tokio::fs::read(path).await {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to read {}: {}", path, e);
                process::exit(1);
            }
        };
        let filename = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.clone());
        form = form.part("file", Part::bytes(contents).file_name(filename));
    }

    // 3. Upload
    let response = match client
        .post(format!("{}/file/{}/upload", remote, group.id))
        .multipart(form)
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to upload: {}", e);
            process::exit(1);
        }
    };
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        eprintln!("Upload failed ({}): {}", status, body.trim());
        process::exit(1);
    }

    println!("{}/file/{}", remote, group.id);
}
