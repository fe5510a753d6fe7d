//! Candidate selection: history dedup, exclusion, scoring, bounded top-N.
//!
//! [`select`] is a pure function of its inputs; it never touches the network
//! or the filesystem.

mod exclusion;
mod scoring;

use std::collections::HashSet;

use tracing::{debug, info, instrument};

use moltdigest_shared::{Candidate, DigestError, PublicationRecord, Result};

pub use exclusion::{ExclusionPolicy, ExclusionRule};
pub use scoring::{KeywordScorer, ScoringPolicy};

/// Bounds and filters for one run. Immutable once built.
#[derive(Debug, Clone)]
pub struct SelectionCriteria {
    min_count: usize,
    max_count: usize,
    exclusions: ExclusionPolicy,
    dedup_window: PublicationRecord,
}

impl SelectionCriteria {
    /// Fails with a config error unless `1 <= max_count` and `min_count <= max_count`.
    pub fn new(
        min_count: usize,
        max_count: usize,
        exclusions: ExclusionPolicy,
        dedup_window: PublicationRecord,
    ) -> Result<Self> {
        if max_count == 0 {
            return Err(DigestError::config("max_count must be at least 1"));
        }
        if min_count > max_count {
            return Err(DigestError::config(format!(
                "min_count ({min_count}) exceeds max_count ({max_count})"
            )));
        }
        Ok(Self {
            min_count,
            max_count,
            exclusions,
            dedup_window,
        })
    }

    pub fn min_count(&self) -> usize {
        self.min_count
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }
}

/// How many candidates each step removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionStats {
    pub input: usize,
    pub duplicates: usize,
    pub already_published: usize,
    pub excluded: usize,
    pub qualifying: usize,
    pub selected: usize,
}

/// Selected candidates, best first.
#[derive(Debug, Clone)]
pub struct Selection {
    pub selected: Vec<Candidate>,
    pub stats: SelectionStats,
}

/// Pick at most `max_count` candidates.
///
/// Drops already-published ids and anything an exclusion rule matches, then
/// orders by score (desc), fetch time (desc), id (asc). Fewer than `min_count`
/// qualifying candidates is not an error: the result is simply shorter.
#[instrument(skip_all, fields(input = candidates.len(), max = criteria.max_count))]
pub fn select(
    candidates: &[Candidate],
    criteria: &SelectionCriteria,
    scorer: &dyn ScoringPolicy,
) -> Selection {
    let mut stats = SelectionStats {
        input: candidates.len(),
        ..SelectionStats::default()
    };
    let mut seen = HashSet::new();
    let mut scored: Vec<(i64, &Candidate)> = Vec::new();

    for candidate in candidates {
        if !seen.insert(&candidate.id) {
            stats.duplicates += 1;
            continue;
        }
        if criteria.dedup_window.contains(&candidate.id) {
            stats.already_published += 1;
            continue;
        }
        if let Some(rule) = criteria.exclusions.matched_rule(candidate) {
            // The rule name only; never log the matched content.
            debug!(rule, post_url = %candidate.post_url, "excluded candidate");
            stats.excluded += 1;
            continue;
        }
        scored.push((scorer.score(candidate), candidate));
    }
    stats.qualifying = scored.len();

    scored.sort_by(|(score_a, a), (score_b, b)| {
        score_b
            .cmp(score_a)
            .then_with(|| b.fetched_at.cmp(&a.fetched_at))
            .then_with(|| a.id.cmp(&b.id))
    });

    let selected: Vec<Candidate> = scored
        .into_iter()
        .take(criteria.max_count)
        .map(|(_, c)| c.clone())
        .collect();
    stats.selected = selected.len();

    if stats.selected < criteria.min_count {
        info!(
            selected = stats.selected,
            min = criteria.min_count,
            "fewer qualifying candidates than the soft minimum"
        );
    }
    info!(?stats, "selection complete");

    Selection { selected, stats }
}
