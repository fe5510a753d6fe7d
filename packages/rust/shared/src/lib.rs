//! Shared types, error model, and configuration for moltdigest.
//!
//! This crate is the foundation depended on by all other moltdigest crates.
//! It provides:
//! - [`DigestError`] — the unified error type
//! - Domain types ([`Candidate`], [`DateKey`], [`DigestEntry`], [`Digest`], [`PublicationRecord`])
//! - Configuration ([`AppConfig`] and its sections, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DigestConfig, ExclusionRuleConfig, FeedSpec, FetchConfig, HistoryBackend,
    HistoryConfig, MAX_PAGE_SIZE, PublishConfig, ScoringConfig, SelectionConfig, SourceConfig,
    api_key, config_dir, config_file_path, expand_home, init_config, load_config,
    load_config_from,
};
pub use error::{DigestError, ErrorKind, Result};
pub use types::{
    CANDIDATE_FILE_VERSION, Candidate, CandidateFile, CandidateId, DateKey, Digest, DigestEntry,
    FetchCounts, MAX_SUMMARY_POINTS, MIN_SUMMARY_POINTS, PublicationRecord,
};
