// Verified artifact download
//
// Streams into `<dest>.part` while hashing, then either renames into place
// or deletes the partial file when the hash does not match.

use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::client::ApiClient;
use crate::errors::SyncError;
use crate::store::VersionInfo;

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Download `info.version` to `dest` and check it against `info.file_hash`.
pub async fn download_verified(
    api: &ApiClient,
    info: &VersionInfo,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<PathBuf, SyncError> {
    let part = part_path(dest);
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::io(parent, e))?;
        }
    }

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        res = fetch_to(api, &info.version, &part) => res,
    };

    let actual = match result {
        Ok(hash) => hash,
        Err(e) => {
            remove_partial(&part).await;
            return Err(e);
        }
    };

    if !actual.eq_ignore_ascii_case(&info.file_hash) {
        tracing::warn!(version = %info.version, expected = %info.file_hash, %actual, "Downloaded artifact failed verification");
        remove_partial(&part).await;
        return Err(SyncError::IntegrityMismatch {
            expected: info.file_hash.clone(),
            actual,
        });
    }

    tokio::fs::rename(&part, dest)
        .await
        .map_err(|e| SyncError::io(dest, e))?;
    tracing::info!(version = %info.version, dest = %dest.display(), "Download verified");
    Ok(dest.to_path_buf())
}

/// Stream the body into `part`, returning the hex sha256 of what was written.
async fn fetch_to(api: &ApiClient, version: &str, part: &Path) -> Result<String, SyncError> {
    let resp = api.open_download(version).await?;
    let url = resp.url().to_string();

    let mut file = tokio::fs::File::create(part)
        .await
        .map_err(|e| SyncError::io(part, e))?;
    let mut hasher = Sha256::new();
    let mut written: u64 = 0;

    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| SyncError::Unreachable {
            url: url.clone(),
            source,
        })?;
        hasher.update(&chunk);
        file.write_all(&chunk)
            .await
            .map_err(|e| SyncError::io(part, e))?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(|e| SyncError::io(part, e))?;
    file.sync_all().await.map_err(|e| SyncError::io(part, e))?;
    tracing::debug!(version, bytes = written, "Download finished");
    Ok(format!("{:x}", hasher.finalize()))
}

async fn remove_partial(part: &Path) {
    if let Err(e) = tokio::fs::remove_file(part).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %part.display(), error = %e, "Could not remove partial download");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::TempDir;

    // sha256("payload")
    const PAYLOAD_HASH: &str = "239f59ed55e737c77147cf55ad0c1b030b6d7ee748a7426952f9b852d5a935e5";

    fn info(hash: &str) -> VersionInfo {
        VersionInfo {
            version: "2.0".to_string(),
            filename: "app.bin".to_string(),
            file_hash: hash.to_string(),
            description: String::new(),
            publish_time: Utc::now(),
        }
    }

    async fn serve_payload() -> mockito::ServerGuard {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/download/2.0")
            .with_status(200)
            .with_header("content-type", "application/octet-stream")
            .with_body("payload")
            .create_async()
            .await;
        server
    }

    #[tokio::test]
    async fn test_verified_download_lands_in_place() {
        let server = serve_payload().await;
        let api = ApiClient::new(server.url(), Duration::from_secs(2)).unwrap();
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out/app.bin");

        let path = download_verified(&api, &info(PAYLOAD_HASH), &dest, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"payload");
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_hash_mismatch_removes_partial() {
        let server = serve_payload().await;
        let api = ApiClient::new(server.url(), Duration::from_secs(2)).unwrap();
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("app.bin");

        let err = download_verified(&api, &info(&"0".repeat(64)), &dest, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            SyncError::IntegrityMismatch { actual, .. } => assert_eq!(actual, PAYLOAD_HASH),
            other => panic!("expected mismatch, got {:?}", other),
        }
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_cancelled_download() {
        let server = serve_payload().await;
        let api = ApiClient::new(server.url(), Duration::from_secs(2)).unwrap();
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = download_verified(&api, &info(PAYLOAD_HASH), &dir.path().join("app.bin"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
    }
}
