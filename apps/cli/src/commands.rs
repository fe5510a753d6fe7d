//! CLI command definitions, routing, and tracing setup.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use moltdigest_core::{
    ProgressReporter, PublishMode, PublishOptions, RunConfig, RunOutcome, SkipReason,
    list_published, run_digest,
};
use moltdigest_fetcher::{FeedSource, FileFeedSource, HttpFeedSource, NormalizeOptions};
use moltdigest_render::Renderer;
use moltdigest_selector::KeywordScorer;
use moltdigest_shared::{
    AppConfig, CANDIDATE_FILE_VERSION, Candidate, CandidateFile, DateKey, DigestError, ErrorKind,
    api_key, expand_home, init_config, load_config, load_config_from,
};
use moltdigest_storage::Ledger;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// moltdigest — daily bilingual digests of community posts.
#[derive(Parser)]
#[command(
    name = "moltdigest",
    version,
    about = "Fetch community posts and publish an idempotent, date-keyed markdown digest.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.moltdigest/moltdigest.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Fetch candidates from the source API into a candidate file.
    Fetch {
        /// Output path (defaults to `fetch.candidates_path`).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Build and publish a digest from a candidate file.
    Digest {
        /// Candidate file written by `fetch`.
        #[arg(long)]
        candidates: PathBuf,

        #[command(flatten)]
        publish: PublishArgs,
    },

    /// Fetch from the source API and publish in one go.
    Run {
        #[command(flatten)]
        publish: PublishArgs,
    },

    /// List published digests grouped by month, newest first.
    List {
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Options shared by the publishing commands.
#[derive(Args, Debug, Clone)]
pub(crate) struct PublishArgs {
    /// Digest date as YYYY-MM-DD (defaults to today in the publication offset).
    #[arg(long)]
    pub date: Option<String>,

    /// Replace an existing digest for the date. Requires --reason.
    #[arg(long, requires = "reason")]
    pub overwrite: bool,

    /// Why the digest is being replaced; written to the overwrite audit log.
    #[arg(long, requires = "overwrite")]
    pub reason: Option<String>,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Exit codes
// ---------------------------------------------------------------------------

/// Process exit codes. Scripts branch on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Exit {
    Success = 0,
    Internal = 1,
    SourceUnavailable = 3,
    MalformedResponse = 4,
    AlreadyPublished = 5,
    AllEntriesRejected = 6,
    PublishFailed = 7,
}

impl Exit {
    pub(crate) fn for_error(err: &DigestError) -> Self {
        match err.kind() {
            ErrorKind::SourceUnavailable => Self::SourceUnavailable,
            ErrorKind::MalformedResponse => Self::MalformedResponse,
            ErrorKind::AlreadyPublished => Self::AlreadyPublished,
            ErrorKind::TemplateViolation => Self::AllEntriesRejected,
            ErrorKind::Publish => Self::PublishFailed,
            ErrorKind::Config | ErrorKind::Validation => Self::Internal,
        }
    }

    pub(crate) fn for_outcome(outcome: &RunOutcome) -> Self {
        match outcome {
            RunOutcome::Published(_) => Self::Success,
            RunOutcome::SkippedEmpty(SkipReason::NoQualifyingCandidates) => Self::Success,
            RunOutcome::SkippedEmpty(SkipReason::AllEntriesRejected { .. }) => {
                Self::AllEntriesRejected
            }
            RunOutcome::Failed(e) => Self::for_error(e),
        }
    }
}

impl From<Exit> for ExitCode {
    fn from(exit: Exit) -> Self {
        ExitCode::from(exit as u8)
    }
}

/// Print `err` and pick its exit code.
fn fail(err: &DigestError) -> ExitCode {
    eprintln!("error: {err}");
    Exit::for_error(err).into()
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "moltdigest=info",
        1 => "moltdigest=debug",
        _ => "moltdigest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Fetch { out } => cmd_fetch(config_path, out).await,
        Command::Digest {
            candidates,
            publish,
        } => cmd_digest(config_path, &candidates, &publish).await,
        Command::Run { publish } => cmd_run(config_path, &publish).await,
        Command::List { json } => cmd_list(config_path, json),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn load(config_path: Option<&Path>) -> Result<AppConfig> {
    Ok(match config_path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Retry `op` on `SourceUnavailable` with exponential backoff.
///
/// Retries live here, at the edge; the pipeline itself never retries.
async fn with_retries<T, F, Fut>(
    retries: u32,
    backoff_ms: u64,
    mut op: F,
) -> moltdigest_shared::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = moltdigest_shared::Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(DigestError::SourceUnavailable(reason)) if attempt < retries => {
                let delay_ms = backoff_ms.saturating_mul(1u64 << attempt.min(16));
                attempt += 1;
                warn!(attempt, retries, delay_ms, %reason, "source unavailable, retrying");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            other => return other,
        }
    }
}

/// A feed source whose fetch is retried on `SourceUnavailable`.
struct RetryingSource<S> {
    inner: S,
    retries: u32,
    backoff_ms: u64,
}

impl<S: FeedSource> FeedSource for RetryingSource<S> {
    async fn fetch(&self) -> moltdigest_shared::Result<Vec<Candidate>> {
        with_retries(self.retries, self.backoff_ms, || self.inner.fetch()).await
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn http_source(config: &AppConfig) -> Result<HttpFeedSource> {
    let key = api_key(&config.source)?;
    Ok(HttpFeedSource::new(&config.source, key, config.publish.offset()?)?)
}

async fn cmd_fetch(config_path: Option<&Path>, out: Option<PathBuf>) -> Result<ExitCode> {
    let config = load(config_path)?;
    let source = http_source(&config)?;
    let out = out.unwrap_or_else(|| expand_home(&config.fetch.candidates_path));

    let progress = CliProgress::new();
    progress.phase("Fetching candidates");
    let batch = with_retries(config.fetch.retries, config.fetch.backoff_ms, || {
        source.fetch_batch()
    })
    .await;
    progress.spinner.finish_and_clear();

    let batch = match batch {
        Ok(batch) => batch,
        Err(e) => return Ok(fail(&e)),
    };

    let file = CandidateFile {
        schema_version: CANDIDATE_FILE_VERSION,
        generated_at: Utc::now(),
        source: source.describe(),
        counts: batch.counts,
        candidates: batch.candidates,
    };
    let json = serde_json::to_string_pretty(&file)?;
    write_atomic(&out, json.as_bytes())?;

    info!(
        path = %out.display(),
        fetched = file.counts.fetched,
        unique = file.counts.unique,
        "candidate file written"
    );
    println!("{}", out.display());
    Ok(Exit::Success.into())
}

/// Write `bytes` to a temp file next to `path`, then rename into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| DigestError::io(parent, e))?;
    }
    let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("output path has no file name: {}", path.display()))?;
    let temp = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

    std::fs::write(&temp, bytes).map_err(|e| DigestError::io(&temp, e))?;
    if let Err(e) = std::fs::rename(&temp, path) {
        let _ = std::fs::remove_file(&temp);
        return Err(DigestError::io(path, e).into());
    }
    Ok(())
}

async fn cmd_digest(
    config_path: Option<&Path>,
    candidates: &Path,
    args: &PublishArgs,
) -> Result<ExitCode> {
    let config = load(config_path)?;
    let source = FileFeedSource::new(
        candidates,
        NormalizeOptions {
            offset: config.publish.offset()?,
            permalink_template: Some(config.source.permalink_template.clone()),
        },
    );
    execute_run(&config, &source, args).await
}

async fn cmd_run(config_path: Option<&Path>, args: &PublishArgs) -> Result<ExitCode> {
    let config = load(config_path)?;
    let source = RetryingSource {
        inner: http_source(&config)?,
        retries: config.fetch.retries,
        backoff_ms: config.fetch.backoff_ms,
    };
    execute_run(&config, &source, args).await
}

/// Resolve run settings from config and flags, run once, and report.
async fn execute_run<S: FeedSource>(
    config: &AppConfig,
    source: &S,
    args: &PublishArgs,
) -> Result<ExitCode> {
    let date_key = match &args.date {
        Some(date) => date.parse::<DateKey>()?,
        None => DateKey::today(config.publish.offset()?),
    };
    let mode = if args.overwrite {
        PublishMode::Overwrite {
            reason: args.reason.clone().unwrap_or_default(),
        }
    } else {
        PublishMode::Create
    };

    let ledger = match Ledger::open(&config.publish.history).await {
        Ok(ledger) => ledger,
        Err(e) => return Ok(fail(&e)),
    };
    let scorer = KeywordScorer::from_config(&config.scoring);
    let renderer = Renderer::extractive(config.digest.clone());
    let run_config = RunConfig {
        date_key,
        selection: config.selection.clone(),
        publish: PublishOptions {
            reports_dir: expand_home(&config.publish.reports_dir),
            mode,
            lock_timeout: Duration::from_secs(config.publish.lock_timeout_secs),
        },
    };

    info!(%date_key, source = %source.describe(), "starting digest run");
    let progress = CliProgress::new();
    let outcome = run_digest(source, &ledger, &scorer, &renderer, &run_config, &progress).await;

    match &outcome {
        RunOutcome::Published(report) => {
            println!();
            println!("  Digest published!");
            println!("  Date:     {}", report.date_key);
            println!("  Entries:  {}", report.entry_count);
            println!("  Path:     {}", report.path.display());
            println!("  SHA-256:  {}", report.sha256);
            if report.replaced {
                println!("  Replaced the previous digest for this date.");
            }
            println!();
        }
        RunOutcome::SkippedEmpty(SkipReason::NoQualifyingCandidates) => {
            println!("No qualifying candidates for {date_key}; nothing written.");
        }
        RunOutcome::SkippedEmpty(SkipReason::AllEntriesRejected { dropped }) => {
            eprintln!("All {dropped} selected entries failed the template; nothing written.");
        }
        RunOutcome::Failed(e) => eprintln!("error: {e}"),
    }
    Ok(Exit::for_outcome(&outcome).into())
}

fn cmd_list(config_path: Option<&Path>, json: bool) -> Result<ExitCode> {
    let config = load(config_path)?;
    let reports_dir = expand_home(&config.publish.reports_dir);
    let months = list_published(&reports_dir)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&months)?);
        return Ok(Exit::Success.into());
    }
    if months.is_empty() {
        println!("No digests published under {}", reports_dir.display());
    }
    for month in &months {
        println!("{}", month.month);
        for day in &month.days {
            println!("  {day}");
        }
    }
    Ok(Exit::Success.into())
}

fn cmd_config_init() -> Result<ExitCode> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(Exit::Success.into())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<ExitCode> {
    let config = load(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(Exit::Success.into())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn entry_rendered(&self, title: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Rendering [{current}/{total}] {title}"));
    }

    fn entry_dropped(&self, post_url: &str, reason: &str) {
        self.spinner.println(format!("  dropped {post_url}: {reason}"));
    }

    fn done(&self, _outcome: &RunOutcome) {
        self.spinner.finish_and_clear();
    }
}
