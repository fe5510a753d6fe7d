//! End-to-end digest run: fetch → select → render → publish.

use std::time::Instant;

use tracing::{info, instrument, warn};

use moltdigest_fetcher::FeedSource;
use moltdigest_render::Renderer;
use moltdigest_selector::{ExclusionPolicy, ScoringPolicy, SelectionCriteria, select};
use moltdigest_shared::{DateKey, Digest, DigestError, Result, SelectionConfig};
use moltdigest_storage::PublicationLedger;

use crate::publisher::{self, PublishMode, PublishOptions, PublishReport};

/// Configuration for one [`run_digest`] call.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Date the digest is published under.
    pub date_key: DateKey,
    pub selection: SelectionConfig,
    pub publish: PublishOptions,
}

/// Why a run ended without writing anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Nothing survived dedup and exclusion.
    NoQualifyingCandidates,
    /// Every selected candidate failed the entry template.
    AllEntriesRejected { dropped: usize },
}

/// Terminal state of a run.
#[derive(Debug)]
pub enum RunOutcome {
    Published(PublishReport),
    SkippedEmpty(SkipReason),
    Failed(DigestError),
}

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after an entry renders cleanly.
    fn entry_rendered(&self, title: &str, current: usize, total: usize);
    /// Called when an entry is dropped for violating the template.
    fn entry_dropped(&self, post_url: &str, reason: &str);
    /// Called once with the final outcome.
    fn done(&self, outcome: &RunOutcome);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn entry_rendered(&self, _title: &str, _current: usize, _total: usize) {}
    fn entry_dropped(&self, _post_url: &str, _reason: &str) {}
    fn done(&self, _outcome: &RunOutcome) {}
}

/// Run the whole pipeline once.
///
/// Never panics and never returns early with a bare error: every failure is
/// folded into [`RunOutcome::Failed`]. When the date is already published and
/// the mode is not overwrite, the run fails before anything is fetched.
#[instrument(skip_all, fields(date_key = %config.date_key, source = %source.describe()))]
pub async fn run_digest<S, L>(
    source: &S,
    ledger: &L,
    scorer: &dyn ScoringPolicy,
    renderer: &Renderer,
    config: &RunConfig,
    progress: &dyn ProgressReporter,
) -> RunOutcome
where
    S: FeedSource,
    L: PublicationLedger,
{
    let start = Instant::now();
    let outcome = match run_inner(source, ledger, scorer, renderer, config, progress).await {
        Ok(outcome) => outcome,
        Err(e) => RunOutcome::Failed(e),
    };

    match &outcome {
        RunOutcome::Published(report) => info!(
            path = %report.path.display(),
            entries = report.entry_count,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "run published"
        ),
        RunOutcome::SkippedEmpty(reason) => info!(?reason, "run skipped, nothing written"),
        RunOutcome::Failed(e) => warn!(error = %e, kind = ?e.kind(), "run failed"),
    }
    progress.done(&outcome);
    outcome
}

async fn run_inner<S, L>(
    source: &S,
    ledger: &L,
    scorer: &dyn ScoringPolicy,
    renderer: &Renderer,
    config: &RunConfig,
    progress: &dyn ProgressReporter,
) -> Result<RunOutcome>
where
    S: FeedSource,
    L: PublicationLedger,
{
    let date_key = config.date_key;
    let reports_dir = &config.publish.reports_dir;

    // --- Phase 0: idempotence pre-check ---
    if config.publish.mode == PublishMode::Create
        && publisher::is_published(reports_dir, &date_key)
    {
        return Err(DigestError::AlreadyPublished {
            date_key: date_key.to_string(),
            path: publisher::digest_path(reports_dir, &date_key),
        });
    }
    let exclusions = ExclusionPolicy::from_config(&config.selection)?;

    // --- Phase 1: Fetch ---
    progress.phase("Fetching candidates");
    let candidates = source.fetch().await?;
    info!(count = candidates.len(), "candidates fetched");

    // --- Phase 2: Select ---
    progress.phase("Loading publication history");
    let history = ledger.load().await?;

    progress.phase("Selecting candidates");
    let criteria = SelectionCriteria::new(
        config.selection.min_count,
        config.selection.max_count,
        exclusions,
        history,
    )?;
    let selection = select(&candidates, &criteria, scorer);
    if selection.selected.is_empty() {
        return Ok(RunOutcome::SkippedEmpty(SkipReason::NoQualifyingCandidates));
    }

    // --- Phase 3: Render ---
    progress.phase("Rendering entries");
    let total = selection.selected.len();
    let mut entries = Vec::with_capacity(total);
    let mut dropped = 0;
    for candidate in &selection.selected {
        match renderer.render(candidate) {
            Ok(entry) => {
                progress.entry_rendered(&entry.title, entries.len() + 1, total);
                entries.push(entry);
            }
            Err(DigestError::TemplateViolation { post_url, reason }) => {
                warn!(%post_url, %reason, "entry dropped");
                progress.entry_dropped(&post_url, &reason);
                dropped += 1;
            }
            Err(e) => return Err(e),
        }
    }
    if entries.is_empty() {
        return Ok(RunOutcome::SkippedEmpty(SkipReason::AllEntriesRejected {
            dropped,
        }));
    }

    // --- Phase 4: Publish ---
    progress.phase("Publishing digest");
    let digest = Digest { date_key, entries };
    let markdown = renderer.render_digest(&digest);
    let report = publisher::publish(&markdown, &digest, ledger, &config.publish).await?;
    Ok(RunOutcome::Published(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::DateTime;
    use moltdigest_render::{ExtractiveSummarizer, Summarizer};
    use moltdigest_selector::KeywordScorer;
    use moltdigest_shared::{Candidate, CandidateId, DigestConfig, PublicationRecord};
    use uuid::Uuid;

    struct VecSource {
        candidates: Vec<Candidate>,
        calls: AtomicUsize,
    }

    impl VecSource {
        fn new(candidates: Vec<Candidate>) -> Self {
            Self {
                candidates,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl FeedSource for VecSource {
        async fn fetch(&self) -> Result<Vec<Candidate>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.candidates.clone())
        }

        fn describe(&self) -> String {
            "vec".into()
        }
    }

    struct DownSource;

    impl FeedSource for DownSource {
        async fn fetch(&self) -> Result<Vec<Candidate>> {
            Err(DigestError::SourceUnavailable("connection refused".into()))
        }

        fn describe(&self) -> String {
            "down".into()
        }
    }

    #[derive(Default)]
    struct MemoryLedger {
        ids: Mutex<Vec<CandidateId>>,
    }

    impl PublicationLedger for MemoryLedger {
        async fn load(&self) -> Result<PublicationRecord> {
            Ok(self.ids.lock().unwrap().iter().cloned().collect())
        }

        async fn append(&self, _date_key: &DateKey, ids: &[CandidateId]) -> Result<()> {
            self.ids.lock().unwrap().extend_from_slice(ids);
            Ok(())
        }

        fn describe(&self) -> String {
            "memory".into()
        }
    }

    /// Six points for every candidate except those titled "short".
    struct SixOrFour;

    impl Summarizer for SixOrFour {
        fn summarize(&self, c: &Candidate) -> Vec<String> {
            let n = if c.title == "short" { 4 } else { 6 };
            (0..n).map(|i| format!("statement {i} about {}", c.title)).collect()
        }
    }

    fn candidate(id: &str, title: &str) -> Candidate {
        Candidate {
            id: CandidateId::new(id),
            title: title.into(),
            post_url: format!("https://posts.example.com/p/{id}"),
            external_url: None,
            raw_body: "Agents on cron.".into(),
            fetched_at: DateTime::parse_from_rfc3339("2026-10-17T08:00:00+08:00").unwrap(),
            community: None,
            engagement: 0,
            summary_points: vec![],
        }
    }

    fn config(reports: PathBuf) -> RunConfig {
        RunConfig {
            date_key: "2026-10-17".parse().unwrap(),
            selection: SelectionConfig::default(),
            publish: PublishOptions::new(reports),
        }
    }

    fn renderer() -> Renderer {
        Renderer::new(Box::new(SixOrFour), DigestConfig::default())
    }

    fn scorer() -> KeywordScorer {
        KeywordScorer::new([("agent".to_string(), 1)], 0, 0)
    }

    fn temp_reports() -> PathBuf {
        std::env::temp_dir().join(format!("md_run_{}", Uuid::now_v7()))
    }

    #[tokio::test]
    async fn publishes_then_refuses_same_date() {
        let reports = temp_reports();
        let source = VecSource::new(vec![candidate("a", "one"), candidate("b", "two")]);
        let ledger = MemoryLedger::default();
        let cfg = config(reports.clone());

        let outcome = run_digest(&source, &ledger, &scorer(), &renderer(), &cfg, &SilentProgress).await;
        let RunOutcome::Published(report) = outcome else {
            panic!("expected publish");
        };
        assert_eq!(report.entry_count, 2);
        assert_eq!(ledger.load().await.unwrap().len(), 2);

        let outcome = run_digest(&source, &ledger, &scorer(), &renderer(), &cfg, &SilentProgress).await;
        assert!(matches!(
            outcome,
            RunOutcome::Failed(DigestError::AlreadyPublished { .. })
        ));
        // The pre-check runs before any fetch.
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        let _ = std::fs::remove_dir_all(&reports);
    }

    #[tokio::test]
    async fn only_bad_entry_skips_without_writing() {
        let reports = temp_reports();
        let source = VecSource::new(vec![candidate("a", "short")]);
        let ledger = MemoryLedger::default();

        let outcome = run_digest(&source, &ledger, &scorer(), &renderer(), &config(reports.clone()), &SilentProgress).await;
        assert!(matches!(
            outcome,
            RunOutcome::SkippedEmpty(SkipReason::AllEntriesRejected { dropped: 1 })
        ));
        assert!(!reports.exists());
        assert!(ledger.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bad_entry_is_dropped_and_rest_published() {
        let reports = temp_reports();
        let source = VecSource::new(vec![
            candidate("a", "one"),
            candidate("b", "short"),
            candidate("c", "three"),
        ]);
        let ledger = MemoryLedger::default();

        let outcome = run_digest(&source, &ledger, &scorer(), &renderer(), &config(reports.clone()), &SilentProgress).await;
        let RunOutcome::Published(report) = outcome else {
            panic!("expected publish");
        };
        assert_eq!(report.entry_count, 2);
        let record = ledger.load().await.unwrap();
        assert!(!record.contains(&CandidateId::new("b")));

        let _ = std::fs::remove_dir_all(&reports);
    }

    #[tokio::test]
    async fn empty_feed_is_skipped() {
        let reports = temp_reports();
        let outcome = run_digest(
            &VecSource::new(vec![]),
            &MemoryLedger::default(),
            &scorer(),
            &renderer(),
            &config(reports.clone()),
            &SilentProgress,
        )
        .await;
        assert!(matches!(
            outcome,
            RunOutcome::SkippedEmpty(SkipReason::NoQualifyingCandidates)
        ));
        assert!(!reports.exists());
    }

    #[tokio::test]
    async fn published_ids_are_not_selected_again() {
        let source = VecSource::new(vec![candidate("a", "one"), candidate("b", "two")]);
        let ledger = MemoryLedger::default();

        let day1 = temp_reports();
        let outcome = run_digest(&source, &ledger, &scorer(), &renderer(), &config(day1.clone()), &SilentProgress).await;
        assert!(matches!(outcome, RunOutcome::Published(_)));

        // Same ledger, next day, same feed: nothing new to publish.
        let day2 = temp_reports();
        let mut cfg = config(day2.clone());
        cfg.date_key = "2026-10-18".parse().unwrap();
        let outcome = run_digest(&source, &ledger, &scorer(), &renderer(), &cfg, &SilentProgress).await;
        assert!(matches!(
            outcome,
            RunOutcome::SkippedEmpty(SkipReason::NoQualifyingCandidates)
        ));

        let _ = std::fs::remove_dir_all(&day1);
    }

    #[tokio::test]
    async fn source_failure_is_reported() {
        let reports = temp_reports();
        let outcome = run_digest(
            &DownSource,
            &MemoryLedger::default(),
            &scorer(),
            &Renderer::new(Box::new(ExtractiveSummarizer::default()), DigestConfig::default()),
            &config(reports.clone()),
            &SilentProgress,
        )
        .await;
        assert!(matches!(
            outcome,
            RunOutcome::Failed(DigestError::SourceUnavailable(_))
        ));
        assert!(!reports.exists());
    }
}
