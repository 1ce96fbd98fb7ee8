// Audit observer appending JSON lines to a file

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::{AuditError, AuditEvent, Observer};

/// Appends one JSON document per line; writes are serialized.
pub struct FileObserver {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileObserver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileObserver {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl Observer for FileObserver {
    fn name(&self) -> &str {
        "file"
    }

    async fn notify(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        debug!(file = %self.path.display(), ts = event.ts, "Audit event written to file");
        Ok(())
    }
}
