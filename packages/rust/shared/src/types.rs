//! Core domain types for the candidate-to-digest pipeline.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DigestError, Result};

/// Fewest summary points a rendered entry may carry.
pub const MIN_SUMMARY_POINTS: usize = 6;

/// Most summary points a rendered entry may carry.
pub const MAX_SUMMARY_POINTS: usize = 10;

/// Current schema version for the candidate file format.
pub const CANDIDATE_FILE_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// CandidateId
// ---------------------------------------------------------------------------

/// Opaque source identifier of a post. Never rendered into a digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(String);

impl CandidateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CandidateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Candidate
// ---------------------------------------------------------------------------

/// A raw post fetched from the external source, not yet filtered or rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Source identifier; identity across runs.
    pub id: CandidateId,
    /// Post title (single line, whitespace-collapsed).
    pub title: String,
    /// Public permalink of the post on the source.
    pub post_url: String,
    /// Link the post points to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
    /// Post body as returned by the source.
    #[serde(rename = "body")]
    pub raw_body: String,
    /// Post timestamp, normalized to the publication offset.
    pub fetched_at: DateTime<FixedOffset>,
    /// Sub-forum the post was made in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub community: Option<String>,
    /// Upvotes plus comments, when the source reports them.
    #[serde(default)]
    pub engagement: u64,
    /// Summary produced upstream (e.g. by an agent editing the candidate file).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub summary_points: Vec<String>,
}

// ---------------------------------------------------------------------------
// DateKey
// ---------------------------------------------------------------------------

/// Calendar date (in the publication offset) that names a digest file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DateKey(NaiveDate);

impl DateKey {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// The date of `at` as seen from `offset`.
    pub fn at(at: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self(at.with_timezone(&offset).date_naive())
    }

    /// Today's date in the publication offset.
    pub fn today(offset: FixedOffset) -> Self {
        Self::at(Utc::now(), offset)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// Month directory name, e.g. `2026-10`.
    pub fn month_dir(&self) -> String {
        self.0.format("%Y-%m").to_string()
    }

    /// Digest file name, e.g. `2026-10-17.md`.
    pub fn file_name(&self) -> String {
        format!("{self}.md")
    }

    /// Path of the digest relative to the reports directory.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(self.month_dir()).join(self.file_name())
    }
}

impl std::fmt::Display for DateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl std::str::FromStr for DateKey {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Self)
            .map_err(|e| DigestError::validation(format!("invalid date key '{s}': {e}")))
    }
}

// ---------------------------------------------------------------------------
// DigestEntry / Digest
// ---------------------------------------------------------------------------

/// One candidate rendered into the fixed per-entry template.
#[derive(Debug, Clone, PartialEq)]
pub struct DigestEntry {
    pub title: String,
    pub post_url: String,
    pub external_url: Option<String>,
    /// Between [`MIN_SUMMARY_POINTS`] and [`MAX_SUMMARY_POINTS`] statements.
    pub summary_points: Vec<String>,
    /// Actionable follow-up ideas (at most three).
    pub ideas: Vec<String>,
    /// Copyable instruction block; always embeds `post_url`.
    pub task_block: String,
    /// Id of the source candidate, kept for the publication ledger only.
    pub source_id: CandidateId,
}

impl DigestEntry {
    /// Check the per-entry template contract.
    pub fn validate(&self) -> Result<()> {
        let points = self.summary_points.len();
        if !(MIN_SUMMARY_POINTS..=MAX_SUMMARY_POINTS).contains(&points) {
            return Err(DigestError::template(
                &self.post_url,
                format!(
                    "{points} summary points (expected {MIN_SUMMARY_POINTS}-{MAX_SUMMARY_POINTS})"
                ),
            ));
        }
        if self.post_url.is_empty() || !self.task_block.contains(&self.post_url) {
            return Err(DigestError::template(
                &self.post_url,
                "task block does not embed the post URL",
            ));
        }
        Ok(())
    }
}

/// The rendered collection of entries for one calendar date.
#[derive(Debug, Clone, PartialEq)]
pub struct Digest {
    pub date_key: DateKey,
    /// Entries in selection order.
    pub entries: Vec<DigestEntry>,
}

impl Digest {
    /// Ids of every candidate in this digest, in entry order.
    pub fn candidate_ids(&self) -> Vec<CandidateId> {
        self.entries.iter().map(|e| e.source_id.clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// PublicationRecord
// ---------------------------------------------------------------------------

/// Every candidate id that has ever been published. Append-only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublicationRecord {
    ids: HashSet<CandidateId>,
}

impl PublicationRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &CandidateId) -> bool {
        self.ids.contains(id)
    }

    /// Record an id. Returns `false` if it was already present.
    pub fn insert(&mut self, id: CandidateId) -> bool {
        self.ids.insert(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<CandidateId> for PublicationRecord {
    fn from_iter<I: IntoIterator<Item = CandidateId>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

impl Extend<CandidateId> for PublicationRecord {
    fn extend<I: IntoIterator<Item = CandidateId>>(&mut self, iter: I) {
        self.ids.extend(iter);
    }
}

// ---------------------------------------------------------------------------
// CandidateFile
// ---------------------------------------------------------------------------

/// Fetch statistics stored alongside the candidates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchCounts {
    /// Records returned by the source (before id merging).
    pub fetched: usize,
    /// Distinct candidates kept.
    pub unique: usize,
}

/// Transient file written by `moltdigest fetch` and consumed by `moltdigest digest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateFile {
    pub schema_version: u32,
    pub generated_at: DateTime<Utc>,
    /// Human-readable description of where the candidates came from.
    pub source: String,
    #[serde(default)]
    pub counts: FetchCounts,
    pub candidates: Vec<Candidate>,
}
