//! Local persistence of downloaded artifacts and JSON exports.

use crate::error::ClientError;
use crate::gateway::Artifact;
use futures::StreamExt;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Platform download directory, falling back to the current directory.
pub fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Stream an artifact into `dir`, returning the path written.
///
/// The file is written under a temporary name and renamed once complete, so a failed
/// download never leaves a truncated file under the final name.
pub async fn save_artifact(dir: &Path, artifact: Artifact) -> Result<PathBuf, ClientError> {
    let Artifact {
        filename,
        mut stream,
    } = artifact;
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(&filename);
    let partial = dir.join(format!("{filename}.part"));

    let write = async {
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok::<u64, ClientError>(written)
    };

    match write.await {
        Ok(bytes) => {
            tokio::fs::rename(&partial, &path).await?;
            debug!(path = %path.display(), bytes, "artifact saved");
            Ok(path)
        }
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(&partial).await {
                warn!(path = %partial.display(), "could not remove partial download: {rm}");
            }
            Err(e)
        }
    }
}

/// Write a pretty-printed JSON document.
pub fn export_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ClientError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_vec_pretty(value)
        .map_err(|e| ClientError::Storage(format!("serialize {}: {e}", path.display())))?;
    std::fs::write(path, body)?;
    Ok(())
}
