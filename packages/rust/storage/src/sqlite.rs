//! libSQL-backed publication ledger (local file, offline mode).

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use tracing::{debug, info, instrument};

use moltdigest_shared::{CandidateId, DateKey, DigestError, PublicationRecord, Result};

use crate::PublicationLedger;
use crate::migrations;

fn storage_err(e: libsql::Error) -> DigestError {
    DigestError::Storage(e.to_string())
}

/// Publication ledger in a local libSQL database.
pub struct SqliteLedger {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    label: String,
}

impl SqliteLedger {
    /// Open or create the database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| DigestError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let ledger = Self {
            db,
            conn,
            label: format!("sqlite:{}", path.display()),
        };
        ledger.run_migrations().await?;
        Ok(ledger)
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    DigestError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, 0 before the first migration.
    async fn schema_version(&self) -> u32 {
        match self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await
        {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0,
        }
    }

    /// Ids first published under `date_key`.
    pub async fn ids_for(&self, date_key: &DateKey) -> Result<Vec<CandidateId>> {
        let mut rows = self
            .conn
            .query(
                "SELECT candidate_id FROM published_posts WHERE date_key = ?1 ORDER BY candidate_id",
                params![date_key.to_string()],
            )
            .await
            .map_err(storage_err)?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            ids.push(CandidateId::new(row.get::<String>(0).map_err(storage_err)?));
        }
        Ok(ids)
    }

    async fn insert_all(&self, date_key: &str, now: &str, ids: &[CandidateId]) -> Result<()> {
        for id in ids {
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO published_posts (candidate_id, date_key, published_at)
                     VALUES (?1, ?2, ?3)",
                    params![id.as_str(), date_key, now],
                )
                .await
                .map_err(storage_err)?;
        }
        Ok(())
    }
}

impl PublicationLedger for SqliteLedger {
    #[instrument(skip_all)]
    async fn load(&self) -> Result<PublicationRecord> {
        let mut rows = self
            .conn
            .query("SELECT candidate_id FROM published_posts", params![])
            .await
            .map_err(storage_err)?;

        let mut record = PublicationRecord::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            record.insert(CandidateId::new(row.get::<String>(0).map_err(storage_err)?));
        }
        debug!(ids = record.len(), "loaded publication record");
        Ok(record)
    }

    /// All ids land in one transaction, or none do.
    #[instrument(skip_all, fields(date_key = %date_key, count = ids.len()))]
    async fn append(&self, date_key: &DateKey, ids: &[CandidateId]) -> Result<()> {
        let date_key = date_key.to_string();
        let now = Utc::now().to_rfc3339();

        self.conn.execute("BEGIN IMMEDIATE", params![]).await.map_err(storage_err)?;
        if let Err(e) = self.insert_all(&date_key, &now, ids).await {
            let _ = self.conn.execute("ROLLBACK", params![]).await;
            return Err(e);
        }
        if let Err(e) = self.conn.execute("COMMIT", params![]).await {
            let _ = self.conn.execute("ROLLBACK", params![]).await;
            return Err(storage_err(e));
        }
        debug!("ledger appended");
        Ok(())
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_db() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("md_ledger_{}.db", Uuid::now_v7()))
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let ledger = SqliteLedger::open(&temp_db()).await.expect("open");
        assert_eq!(ledger.schema_version().await, 1);
        assert!(ledger.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let path = temp_db();
        let first = SqliteLedger::open(&path).await.expect("first open");
        drop(first);
        let second = SqliteLedger::open(&path).await.expect("second open");
        assert_eq!(second.schema_version().await, 1);
    }

    #[tokio::test]
    async fn append_and_reload() {
        let path = temp_db();
        let day: DateKey = "2026-10-17".parse().unwrap();
        {
            let ledger = SqliteLedger::open(&path).await.unwrap();
            ledger
                .append(&day, &[CandidateId::new("b"), CandidateId::new("a")])
                .await
                .unwrap();
        }
        let ledger = SqliteLedger::open(&path).await.unwrap();
        let record = ledger.load().await.unwrap();
        assert_eq!(record.len(), 2);
        assert_eq!(
            ledger.ids_for(&day).await.unwrap(),
            vec![CandidateId::new("a"), CandidateId::new("b")]
        );
    }

    #[tokio::test]
    async fn first_publication_date_is_kept() {
        let ledger = SqliteLedger::open(&temp_db()).await.unwrap();
        let day1: DateKey = "2026-10-16".parse().unwrap();
        let day2: DateKey = "2026-10-17".parse().unwrap();
        ledger.append(&day1, &[CandidateId::new("a")]).await.unwrap();
        ledger.append(&day2, &[CandidateId::new("a"), CandidateId::new("c")]).await.unwrap();

        assert_eq!(ledger.load().await.unwrap().len(), 2);
        assert_eq!(ledger.ids_for(&day1).await.unwrap(), vec![CandidateId::new("a")]);
        assert_eq!(ledger.ids_for(&day2).await.unwrap(), vec![CandidateId::new("c")]);
    }

    #[tokio::test]
    async fn failed_commit_rolls_back_and_connection_recovers() {
        let ledger = SqliteLedger::open(&temp_db()).await.unwrap();
        let day: DateKey = "2026-10-17".parse().unwrap();

        // A deferred foreign key only fails at COMMIT.
        ledger
            .conn
            .execute_batch(
                "PRAGMA foreign_keys = ON;
                 CREATE TABLE parents (id TEXT PRIMARY KEY);
                 CREATE TABLE children (
                     parent TEXT REFERENCES parents(id) DEFERRABLE INITIALLY DEFERRED
                 );
                 CREATE TRIGGER orphan AFTER INSERT ON published_posts
                 BEGIN
                     INSERT INTO children (parent) VALUES ('missing');
                 END;",
            )
            .await
            .unwrap();

        let err = ledger.append(&day, &[CandidateId::new("a")]).await.unwrap_err();
        assert!(matches!(err, DigestError::Storage(_)));
        assert!(ledger.load().await.unwrap().is_empty());

        ledger.conn.execute_batch("DROP TRIGGER orphan;").await.unwrap();
        ledger.append(&day, &[CandidateId::new("b")]).await.unwrap();
        let record = ledger.load().await.unwrap();
        assert_eq!(record.len(), 1);
        assert!(record.contains(&CandidateId::new("b")));
    }
}
