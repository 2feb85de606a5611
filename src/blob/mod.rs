//! Blob upload channel — chunked binary transfers with progress reporting.
//!
//! `start_upload` returns immediately with an `UploadHandle`. The handle
//! yields a bounded stream of `Progress` events followed by exactly one
//! terminal `Failed` or `Completed`. A completed path is then resolved to a
//! durable retrieval URL.

pub mod local;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::error::BlobError;

pub use local::LocalBlobChannel;

/// A notification from an in-flight transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadEvent {
    Progress {
        bytes_transferred: u64,
        total_bytes: u64,
    },
    Failed {
        cause: String,
    },
    Completed,
}

impl UploadEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Completed)
    }
}

/// Handle to one in-flight transfer.
#[derive(Debug)]
pub struct UploadHandle {
    path: String,
    events: mpsc::Receiver<UploadEvent>,
    task: Option<AbortHandle>,
}

impl UploadHandle {
    pub fn new(path: impl Into<String>, events: mpsc::Receiver<UploadEvent>) -> Self {
        Self {
            path: path.into(),
            events,
            task: None,
        }
    }

    /// Attach the task driving the transfer so `abort` can stop it.
    pub fn with_task(mut self, task: AbortHandle) -> Self {
        self.task = Some(task);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Next event, or `None` once the channel has closed.
    pub async fn next_event(&mut self) -> Option<UploadEvent> {
        self.events.recv().await
    }

    /// Stop the transfer. No further events are delivered.
    pub fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.events.close();
    }
}

impl Drop for UploadHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Storage that accepts binary payloads under a path.
#[async_trait]
pub trait BlobChannel: Send + Sync {
    /// Begin transferring `bytes` to `path`. Returns without waiting for the
    /// transfer; errors here mean the transfer never started.
    async fn start_upload(&self, path: &str, bytes: Vec<u8>) -> Result<UploadHandle, BlobError>;

    /// Durable retrieval URL for a completed upload.
    async fn resolve_url(&self, path: &str) -> Result<String, BlobError>;
}

/// Integer percent of a transfer, rounded down and clamped to `[0, 100]`.
pub fn percent(bytes_transferred: u64, total_bytes: u64) -> u8 {
    if total_bytes == 0 {
        return 100;
    }
    let pct = (bytes_transferred.min(total_bytes) as u128 * 100) / total_bytes as u128;
    pct as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_rounds_down() {
        assert_eq!(percent(0, 3), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 66);
        assert_eq!(percent(3, 3), 100);
        assert_eq!(percent(999, 1000), 99);
    }

    #[test]
    fn percent_clamps_overshoot_and_empty() {
        assert_eq!(percent(12, 10), 100);
        assert_eq!(percent(0, 0), 100);
    }

    #[test]
    fn terminal_events() {
        assert!(UploadEvent::Completed.is_terminal());
        assert!(UploadEvent::Failed { cause: "x".into() }.is_terminal());
        assert!(
            !UploadEvent::Progress {
                bytes_transferred: 1,
                total_bytes: 2
            }
            .is_terminal()
        );
    }

    #[tokio::test]
    async fn abort_stops_delivery() {
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(async move {
            loop {
                if tx.send(UploadEvent::Completed).await.is_err() {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        });
        let mut handle = UploadHandle::new("p", rx).with_task(task.abort_handle());
        assert_eq!(handle.next_event().await, Some(UploadEvent::Completed));

        handle.abort();
        // Drain anything already buffered; the stream must end.
        while handle.next_event().await.is_some() {}
        assert!(task.await.unwrap_err().is_cancelled());
    }
}
