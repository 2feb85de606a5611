//! Filesystem-backed blob channel.
//!
//! Payloads are written chunk by chunk to `<path>.part` and renamed into place
//! once the last byte is flushed, so a reader never finds a partial object at
//! the final path.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{BlobChannel, UploadEvent, UploadHandle};
use crate::error::BlobError;

/// Default write chunk size.
const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
/// Default event buffer per transfer.
const DEFAULT_EVENT_BUFFER: usize = 32;

/// Blob channel writing into a local directory and serving URLs under a base.
#[derive(Debug, Clone)]
pub struct LocalBlobChannel {
    root: PathBuf,
    public_base_url: String,
    chunk_size: usize,
    event_buffer: usize,
}

impl LocalBlobChannel {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a blob path onto the root, refusing anything that would escape it.
    fn local_path(&self, path: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(path);
        let safe = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(BlobError::Rejected {
                path: path.to_string(),
                reason: "path must be relative and must not contain '..'".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

/// Removes the partial file unless the transfer finished.
struct PartialFile {
    path: PathBuf,
    done: bool,
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.done {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

async fn write_chunks(
    part_path: &Path,
    final_path: &Path,
    bytes: &[u8],
    chunk_size: usize,
    tx: &mpsc::Sender<UploadEvent>,
) -> Result<(), BlobError> {
    if let Some(parent) = final_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let total_bytes = bytes.len() as u64;
    let mut file = tokio::fs::File::create(part_path).await?;
    let mut written: u64 = 0;

    for chunk in bytes.chunks(chunk_size) {
        file.write_all(chunk).await?;
        written += chunk.len() as u64;
        let event = UploadEvent::Progress {
            bytes_transferred: written,
            total_bytes,
        };
        if tx.send(event).await.is_err() {
            return Err(BlobError::Rejected {
                path: final_path.display().to_string(),
                reason: "receiver dropped".to_string(),
            });
        }
    }

    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(part_path, final_path).await?;
    Ok(())
}

#[async_trait]
impl BlobChannel for LocalBlobChannel {
    async fn start_upload(&self, path: &str, bytes: Vec<u8>) -> Result<UploadHandle, BlobError> {
        let final_path = self.local_path(path)?;
        let mut part_name = final_path.as_os_str().to_os_string();
        part_name.push(".part");
        let part_path = PathBuf::from(part_name);

        let (tx, rx) = mpsc::channel(self.event_buffer);
        let chunk_size = self.chunk_size;
        let blob_path = path.to_string();

        let task = tokio::spawn(async move {
            let mut partial = PartialFile {
                path: part_path.clone(),
                done: false,
            };
            match write_chunks(&part_path, &final_path, &bytes, chunk_size, &tx).await {
                Ok(()) => {
                    partial.done = true;
                    debug!(path = %blob_path, size = bytes.len(), "Blob written");
                    let _ = tx.send(UploadEvent::Completed).await;
                }
                Err(e) => {
                    warn!(path = %blob_path, error = %e, "Blob write failed");
                    let _ = tx
                        .send(UploadEvent::Failed {
                            cause: e.to_string(),
                        })
                        .await;
                }
            }
        });

        Ok(UploadHandle::new(path, rx).with_task(task.abort_handle()))
    }

    async fn resolve_url(&self, path: &str) -> Result<String, BlobError> {
        let local = self.local_path(path)?;
        if !tokio::fs::try_exists(&local).await? {
            return Err(BlobError::NotFound(path.to_string()));
        }
        Ok(format!("{}/{}", self.public_base_url, path))
    }
}
