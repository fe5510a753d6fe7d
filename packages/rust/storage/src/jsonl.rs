//! Append-only JSON-lines publication ledger.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use moltdigest_shared::{CandidateId, DateKey, DigestError, PublicationRecord, Result};

use crate::PublicationLedger;

/// One line of the ledger: the ids published in one digest.
#[derive(Debug, Serialize, Deserialize)]
struct LedgerLine {
    date_key: String,
    at: DateTime<Utc>,
    ids: Vec<CandidateId>,
}

/// Ledger stored as one JSON object per line.
///
/// Each append is a single `write_all` on an append-mode handle followed by
/// `sync_all`. A trailing line cut short by a crash is skipped on load and
/// cut off before the next append.
#[derive(Debug, Clone)]
pub struct JsonlLedger {
    path: PathBuf,
}

impl JsonlLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop a trailing partial line left by an interrupted append.
    async fn repair_tail(&self) -> Result<()> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(DigestError::io(&self.path, e)),
        };
        if bytes.last().is_none_or(|b| *b == b'\n') {
            return Ok(());
        }
        let keep = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
        warn!(
            dropped_bytes = bytes.len() - keep,
            "truncating partial trailing ledger line"
        );
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&self.path)
            .await
            .map_err(|e| DigestError::io(&self.path, e))?;
        file.set_len(keep as u64)
            .await
            .map_err(|e| DigestError::io(&self.path, e))?;
        Ok(())
    }
}

/// File operations behind one ledger append.
trait AppendTarget: Send {
    fn write_line(&mut self, line: &[u8]) -> impl Future<Output = std::io::Result<()>> + Send;
    fn sync(&mut self) -> impl Future<Output = std::io::Result<()>> + Send;
    fn truncate(&mut self, len: u64) -> impl Future<Output = std::io::Result<()>> + Send;
}

impl AppendTarget for tokio::fs::File {
    async fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.write_all(line).await
    }

    async fn sync(&mut self) -> std::io::Result<()> {
        self.sync_all().await
    }

    async fn truncate(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len).await
    }
}

/// Write and sync `line`. On failure the file is cut back to `len_before`,
/// so a failed append never leaves ids behind.
async fn append_durably<T: AppendTarget>(
    target: &mut T,
    line: &[u8],
    len_before: u64,
) -> std::io::Result<()> {
    let written = match target.write_line(line).await {
        Ok(()) => target.sync().await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        if let Err(cut) = target.truncate(len_before).await {
            warn!(error = %cut, len_before, "could not cut back failed ledger append");
        }
        return Err(e);
    }
    Ok(())
}

impl PublicationLedger for JsonlLedger {
    #[instrument(skip_all, fields(path = %self.path.display()))]
    async fn load(&self) -> Result<PublicationRecord> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no ledger yet");
                return Ok(PublicationRecord::new());
            }
            Err(e) => return Err(DigestError::io(&self.path, e)),
        };

        let mut record = PublicationRecord::new();
        let complete = content.ends_with('\n');
        let lines: Vec<&str> = content.lines().collect();
        for (index, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LedgerLine>(line) {
                Ok(entry) => record.extend(entry.ids),
                Err(e) if !complete && index + 1 == lines.len() => {
                    warn!(line = index + 1, error = %e, "ignoring truncated trailing ledger line");
                }
                Err(e) => {
                    return Err(DigestError::Storage(format!(
                        "{}: line {}: {e}",
                        self.path.display(),
                        index + 1
                    )));
                }
            }
        }
        debug!(ids = record.len(), "loaded publication record");
        Ok(record)
    }

    #[instrument(skip_all, fields(path = %self.path.display(), date_key = %date_key, count = ids.len()))]
    async fn append(&self, date_key: &DateKey, ids: &[CandidateId]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DigestError::io(parent, e))?;
        }

        let entry = LedgerLine {
            date_key: date_key.to_string(),
            at: Utc::now(),
            ids: ids.to_vec(),
        };
        let json = serde_json::to_string(&entry)
            .map_err(|e| DigestError::Storage(format!("serialize ledger line: {e}")))?;

        let line = format!("{json}\n");
        self.repair_tail().await?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| DigestError::io(&self.path, e))?;
        let len_before = file
            .metadata()
            .await
            .map_err(|e| DigestError::io(&self.path, e))?
            .len();
        append_durably(&mut file, line.as_bytes(), len_before)
            .await
            .map_err(|e| DigestError::io(&self.path, e))?;
        debug!("ledger appended");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("jsonl:{}", self.path.display())
    }
}
