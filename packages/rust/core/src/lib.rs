//! Digest orchestration for moltdigest.
//!
//! Ties the fetcher, selector, renderer and ledger together:
//! - [`pipeline`] — one end-to-end run and its outcome
//! - [`publisher`] — idempotent, date-keyed digest writes
//! - [`archive`] — month-grouped listing of published digests

pub mod archive;
pub mod pipeline;
pub mod publisher;

pub use archive::{MonthGroup, list_published};
pub use pipeline::{
    ProgressReporter, RunConfig, RunOutcome, SilentProgress, SkipReason, run_digest,
};
pub use publisher::{
    PublishMode, PublishOptions, PublishReport, digest_path, is_published, publish,
};
