//! Candidate fetching from the external content source.
//!
//! This crate provides:
//! - [`FeedSource`] — the seam the pipeline fetches through
//! - [`HttpFeedSource`] — paginated posts API client
//! - [`FileFeedSource`] — reads a previously written candidate file
//!
//! Sources validate every record into a [`Candidate`] and merge repeated ids;
//! they never filter against publication history and never retry.

mod file;
mod http;
mod record;

use std::future::Future;

use moltdigest_shared::{Candidate, Result};

pub use file::FileFeedSource;
pub use http::{FetchBatch, HttpFeedSource};
pub use record::{NormalizeOptions, merge_duplicates, parse_records};

/// Something candidates can be fetched from.
pub trait FeedSource: Send + Sync {
    /// Fetch and normalize candidates. May return an empty list.
    ///
    /// Fails with `SourceUnavailable` when the source cannot be reached and
    /// `MalformedResponse` when its data does not have the candidate shape.
    fn fetch(&self) -> impl Future<Output = Result<Vec<Candidate>>> + Send;

    /// Short description for logs and reports.
    fn describe(&self) -> String;
}
