//! Persistence for the publication record.
//!
//! [`PublicationLedger`] is the seam the pipeline reads and appends the
//! publication record through. Two backends are provided:
//! - [`JsonlLedger`] — append-only JSON-lines file (default)
//! - [`SqliteLedger`] — Turso Embedded / libSQL database file
//!
//! [`FileLock`] serializes writers of the same digest date.

mod jsonl;
mod lock;
mod migrations;
mod sqlite;

use std::future::Future;

use moltdigest_shared::{
    CandidateId, DateKey, HistoryBackend, HistoryConfig, PublicationRecord, Result, expand_home,
};

pub use jsonl::JsonlLedger;
pub use lock::{FileLock, STALE_LOCK_AGE};
pub use sqlite::SqliteLedger;

/// Durable, append-only set of published candidate ids.
pub trait PublicationLedger: Send + Sync {
    /// Everything published so far. An absent store is an empty record.
    fn load(&self) -> impl Future<Output = Result<PublicationRecord>> + Send;

    /// Record `ids` as published under `date_key`. All or nothing.
    fn append(
        &self,
        date_key: &DateKey,
        ids: &[CandidateId],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// The ledger selected by `[publish.history]`.
pub enum Ledger {
    Jsonl(JsonlLedger),
    Sqlite(SqliteLedger),
}

impl Ledger {
    pub async fn open(config: &HistoryConfig) -> Result<Self> {
        let path = expand_home(&config.path);
        Ok(match config.backend {
            HistoryBackend::Jsonl => Self::Jsonl(JsonlLedger::new(path)),
            HistoryBackend::Sqlite => Self::Sqlite(SqliteLedger::open(&path).await?),
        })
    }
}

impl PublicationLedger for Ledger {
    async fn load(&self) -> Result<PublicationRecord> {
        match self {
            Self::Jsonl(l) => l.load().await,
            Self::Sqlite(l) => l.load().await,
        }
    }

    async fn append(&self, date_key: &DateKey, ids: &[CandidateId]) -> Result<()> {
        match self {
            Self::Jsonl(l) => l.append(date_key, ids).await,
            Self::Sqlite(l) => l.append(date_key, ids).await,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Jsonl(l) => l.describe(),
            Self::Sqlite(l) => l.describe(),
        }
    }
}
