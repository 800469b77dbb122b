//! Bug reports filed through `/report`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};

use crate::{
    domain::{ChatId, UserId},
    utils::iso_timestamp_utc,
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugReport {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub description: String,
    pub contact: String,
    /// RFC3339, UTC.
    pub reported_at: String,
}

impl BugReport {
    pub fn new(chat_id: ChatId, user_id: UserId, description: String, contact: String) -> Self {
        Self {
            chat_id,
            user_id,
            description,
            contact,
            reported_at: iso_timestamp_utc(),
        }
    }
}

/// Where finished reports go.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn file(&self, report: &BugReport) -> Result<()>;
}

/// Appends one JSON object per line.
pub struct FileReportSink {
    path: PathBuf,
    write: Mutex<()>,
}

impl FileReportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ReportSink for FileReportSink {
    async fn file(&self, report: &BugReport) -> Result<()> {
        let mut line = serde_json::to_string(report)?;
        line.push('\n');

        let _guard = self.write.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
