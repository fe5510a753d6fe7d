//! SQL migrations for the libSQL publication ledger.
//!
//! Applied in order on open. Each migration records its own version.

pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "published_posts ledger",
        sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per candidate ever published; the first publication wins.
CREATE TABLE IF NOT EXISTS published_posts (
    candidate_id TEXT PRIMARY KEY,
    date_key     TEXT NOT NULL,
    published_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_published_posts_date ON published_posts(date_key);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
