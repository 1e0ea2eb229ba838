//! Release download and unpacking.

use std::io::{Cursor, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use tracing::info;

use crate::error::{Error, Result};

static RELEASES_BASE_URL: &str = "https://releases.hashicorp.com";

/// Upper bound for establishing the download connection.
const DOWNLOAD_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound for a whole release download.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Release download URL of `name` at `version` for the host platform.
#[must_use]
pub fn release_url(name: &str, version: &str) -> String {
    format!(
        "{RELEASES_BASE_URL}/{name}/{version}/{name}_{version}_{}_{}.zip",
        release_os(std::env::consts::OS),
        release_arch(std::env::consts::ARCH),
    )
}

fn release_os(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        other => other,
    }
}

fn release_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    }
}

/// Fetches `url` and installs the `name` binary at `destination`.
///
/// Zip archives are unpacked and only the entry called `name` is kept. Any
/// other payload is written as-is. The result is made executable.
///
/// # Errors
///
/// Returns `Download` on any transfer, timeout, HTTP status, or unpacking
/// failure.
pub async fn fetch_binary(name: &str, url: &str, destination: &Path) -> Result<()> {
    let client = Client::builder()
        .connect_timeout(DOWNLOAD_CONNECT_TIMEOUT)
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|e| download_error(name, url, e.to_string()))?;

    fetch_with(&client, name, url, destination).await
}

async fn fetch_with(client: &Client, name: &str, url: &str, destination: &Path) -> Result<()> {
    let failed = |reason: String| download_error(name, url, reason);

    info!(service = name, %url, "downloading release");

    let bytes = client
        .get(url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| failed(e.to_string()))?
        .bytes()
        .await
        .map_err(|e| failed(e.to_string()))?;

    let binary = if url.ends_with(".zip") {
        let entry = name.to_string();
        tokio::task::spawn_blocking(move || extract_entry(&bytes, &entry))
            .await
            .map_err(|e| failed(e.to_string()))?
            .map_err(failed)?
    } else {
        bytes.to_vec()
    };

    tokio::fs::write(destination, &binary)
        .await
        .map_err(|e| failed(format!("failed to write {}: {e}", destination.display())))?;

    tokio::fs::set_permissions(destination, std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(|e| failed(format!("failed to chmod {}: {e}", destination.display())))?;

    info!(service = name, path = %destination.display(), "installed binary");

    Ok(())
}

fn download_error(name: &str, url: &str, reason: String) -> Error {
    Error::Download {
        service: name.to_string(),
        url: url.to_string(),
        reason,
    }
}

fn extract_entry(archive: &[u8], entry: &str) -> std::result::Result<Vec<u8>, String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(archive)).map_err(|e| e.to_string())?;
    let mut file = archive
        .by_name(entry)
        .map_err(|e| format!("archive has no {entry} entry: {e}"))?;

    let mut contents = Vec::new();
    file.read_to_end(&mut contents).map_err(|e| e.to_string())?;

    Ok(contents)
}
