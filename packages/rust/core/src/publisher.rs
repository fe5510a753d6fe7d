//! Date-keyed, idempotent digest publishing.
//!
//! A digest lands at `reports_dir/YYYY-MM/YYYY-MM-DD.md`. Writers of the same
//! date are serialized through a lock file in the month directory. The file
//! is written to a temp path and renamed into place; the ledger append comes
//! last and a failed append rolls the file back.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest as _, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use moltdigest_shared::{DateKey, Digest, DigestError, Result};
use moltdigest_storage::{FileLock, PublicationLedger};

/// Whether an existing digest may be replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishMode {
    /// Refuse with `AlreadyPublished` when the file exists.
    Create,
    /// Replace an existing file. The reason is written to the audit log.
    Overwrite { reason: String },
}

#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub reports_dir: PathBuf,
    pub mode: PublishMode,
    pub lock_timeout: Duration,
}

impl PublishOptions {
    pub fn new(reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            reports_dir: reports_dir.into(),
            mode: PublishMode::Create,
            lock_timeout: Duration::from_secs(30),
        }
    }
}

/// What a successful publish wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub path: PathBuf,
    pub date_key: DateKey,
    pub entry_count: usize,
    /// Hex SHA-256 of the written file.
    pub sha256: String,
    pub bytes: usize,
    /// True when an existing digest was overwritten.
    pub replaced: bool,
}

/// One line of `.audit/overwrites.jsonl`.
#[derive(Debug, Serialize)]
struct OverwriteAudit<'a> {
    date_key: String,
    path: String,
    reason: &'a str,
    previous_sha256: String,
    new_sha256: &'a str,
    at: DateTime<Utc>,
}

/// Path of the digest for `date_key`.
pub fn digest_path(reports_dir: &Path, date_key: &DateKey) -> PathBuf {
    reports_dir.join(date_key.relative_path())
}

/// Whether a digest already exists for `date_key`.
pub fn is_published(reports_dir: &Path, date_key: &DateKey) -> bool {
    digest_path(reports_dir, date_key).is_file()
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Publish `markdown` as the digest for `digest.date_key`, then record its
/// candidate ids in `ledger`.
///
/// On any error the reports directory and the ledger are left as they were.
#[instrument(skip_all, fields(date_key = %digest.date_key, entries = digest.entries.len()))]
pub async fn publish<L: PublicationLedger>(
    markdown: &str,
    digest: &Digest,
    ledger: &L,
    options: &PublishOptions,
) -> Result<PublishReport> {
    if digest.entries.is_empty() {
        return Err(DigestError::validation("refusing to publish an empty digest"));
    }
    if let PublishMode::Overwrite { reason } = &options.mode {
        if reason.trim().is_empty() {
            return Err(DigestError::validation("overwrite requires a non-empty reason"));
        }
    }

    let month_dir = options.reports_dir.join(digest.date_key.month_dir());
    let mut created = Vec::new();
    for dir in [&month_dir, &options.reports_dir] {
        if !tokio::fs::try_exists(dir).await.unwrap_or(true) {
            created.push(dir.clone());
        }
    }

    let result = match tokio::fs::create_dir_all(&month_dir).await {
        Ok(()) => publish_locked(markdown, digest, ledger, options, &month_dir).await,
        Err(e) => Err(DigestError::publish_io(&month_dir, e)),
    };
    if result.is_err() {
        // Deepest first; a directory another writer has used is not empty and stays.
        for dir in &created {
            let _ = tokio::fs::remove_dir(dir).await;
        }
    }
    result
}

async fn publish_locked<L: PublicationLedger>(
    markdown: &str,
    digest: &Digest,
    ledger: &L,
    options: &PublishOptions,
    month_dir: &Path,
) -> Result<PublishReport> {
    let date_key = digest.date_key;
    let target = digest_path(&options.reports_dir, &date_key);

    let _lock = FileLock::acquire(
        &month_dir.join(format!(".{date_key}.lock")),
        options.lock_timeout,
    )
    .await?;

    let previous = match tokio::fs::read(&target).await {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(DigestError::publish_io(&target, e)),
    };
    if previous.is_some() && options.mode == PublishMode::Create {
        return Err(DigestError::AlreadyPublished {
            date_key: date_key.to_string(),
            path: target,
        });
    }

    let bytes = markdown.as_bytes();
    let sha256 = sha256_hex(bytes);
    let file_name = date_key.file_name();
    let temp = month_dir.join(format!(".{file_name}.{}.tmp", Uuid::now_v7()));

    if let Err(e) = write_synced(&temp, bytes).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(DigestError::publish_io(&temp, e));
    }

    let mut audit = None;
    if let (Some(previous), PublishMode::Overwrite { reason }) = (&previous, &options.mode) {
        let entry = OverwriteAudit {
            date_key: date_key.to_string(),
            path: target.display().to_string(),
            reason: reason.trim(),
            previous_sha256: sha256_hex(previous),
            new_sha256: &sha256,
            at: Utc::now(),
        };
        match append_audit(&options.reports_dir, &entry).await {
            Ok(mark) => audit = Some(mark),
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp).await;
                return Err(e);
            }
        }
        warn!(reason = reason.trim(), path = %target.display(), "overwriting published digest");
    }

    let backup = match &previous {
        Some(_) => {
            let backup = month_dir.join(format!(".{file_name}.{}.bak", Uuid::now_v7()));
            if let Err(e) = tokio::fs::rename(&target, &backup).await {
                let _ = tokio::fs::remove_file(&temp).await;
                undo_audit(audit.as_ref()).await;
                return Err(DigestError::publish_io(&target, e));
            }
            Some(backup)
        }
        None => None,
    };

    if let Err(e) = tokio::fs::rename(&temp, &target).await {
        let _ = tokio::fs::remove_file(&temp).await;
        restore(backup.as_deref(), &target).await;
        undo_audit(audit.as_ref()).await;
        return Err(DigestError::publish_io(&target, e));
    }
    debug!(path = %target.display(), "digest file in place");

    if let Err(e) = ledger.append(&date_key, &digest.candidate_ids()).await {
        warn!(error = %e, "ledger append failed, rolling back digest file");
        let _ = tokio::fs::remove_file(&target).await;
        restore(backup.as_deref(), &target).await;
        undo_audit(audit.as_ref()).await;
        return Err(DigestError::publish_io(
            &target,
            std::io::Error::other(format!("ledger append failed ({}): {e}", ledger.describe())),
        ));
    }

    if let Some(backup) = &backup {
        let _ = tokio::fs::remove_file(backup).await;
    }

    info!(
        path = %target.display(),
        bytes = bytes.len(),
        replaced = previous.is_some(),
        "digest published"
    );

    Ok(PublishReport {
        path: target,
        date_key,
        entry_count: digest.entries.len(),
        sha256,
        bytes: bytes.len(),
        replaced: previous.is_some(),
    })
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

async fn restore(backup: Option<&Path>, target: &Path) {
    if let Some(backup) = backup {
        if let Err(e) = tokio::fs::rename(backup, target).await {
            warn!(error = %e, backup = %backup.display(), "could not restore previous digest");
        }
    }
}

/// State of the audit log before this run's line was appended.
#[derive(Debug)]
struct AuditMark {
    path: PathBuf,
    /// `None` when the log did not exist yet.
    len_before: Option<u64>,
    /// Set when this run created the `.audit` directory.
    created_dir: Option<PathBuf>,
}

impl AuditMark {
    /// Put the audit log back as it was.
    async fn undo(&self) {
        let undone = match self.len_before {
            Some(len) => match tokio::fs::OpenOptions::new().write(true).open(&self.path).await {
                Ok(file) => file.set_len(len).await,
                Err(e) => Err(e),
            },
            None => tokio::fs::remove_file(&self.path).await,
        };
        match undone {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, path = %self.path.display(), "could not undo audit line"),
        }
        if let Some(dir) = &self.created_dir {
            let _ = tokio::fs::remove_dir(dir).await;
        }
    }
}

async fn undo_audit(mark: Option<&AuditMark>) {
    if let Some(mark) = mark {
        mark.undo().await;
    }
}

async fn append_audit(reports_dir: &Path, audit: &OverwriteAudit<'_>) -> Result<AuditMark> {
    let dir = reports_dir.join(".audit");
    let dir_existed = tokio::fs::try_exists(&dir).await.unwrap_or(true);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| DigestError::publish_io(&dir, e))?;
    let path = dir.join("overwrites.jsonl");

    let mut line = serde_json::to_string(audit)
        .map_err(|e| DigestError::publish_io(&path, std::io::Error::other(e)))?;
    line.push('\n');

    let len_before = match tokio::fs::metadata(&path).await {
        Ok(meta) => Some(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(DigestError::publish_io(&path, e)),
    };
    let mark = AuditMark {
        path,
        len_before,
        created_dir: (!dir_existed).then_some(dir),
    };

    let written: std::io::Result<()> = async {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&mark.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_all().await
    }
    .await;
    if let Err(e) = written {
        mark.undo().await;
        return Err(DigestError::publish_io(&mark.path, e));
    }
    Ok(mark)
}
