//! Application configuration for moltdigest.
//!
//! User config lives at `~/.moltdigest/moltdigest.toml` unless `--config` is given.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::error::{DigestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "moltdigest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".moltdigest";

/// Largest page the posts API will serve.
pub const MAX_PAGE_SIZE: u32 = 50;

// ---------------------------------------------------------------------------
// Config structs (matching moltdigest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Content source connection.
    #[serde(default)]
    pub source: SourceConfig,

    /// Caller-side fetch behaviour (retries, candidate file).
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Selection bounds and exclusion rules.
    #[serde(default)]
    pub selection: SelectionConfig,

    /// Scoring weights.
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Output location, timezone, and history backend.
    #[serde(default)]
    pub publish: PublishConfig,

    /// Digest header text.
    #[serde(default)]
    pub digest: DigestConfig,
}

/// `[source]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// API base URL, e.g. `https://www.moltbook.com/api/v1`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Permalink used when a record carries no `post_url`; `{id}` is replaced.
    #[serde(default = "default_permalink_template")]
    pub permalink_template: String,

    /// Records requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Listings to pull, in order.
    #[serde(default = "default_feeds")]
    pub feeds: Vec<FeedSpec>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            permalink_template: default_permalink_template(),
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
            feeds: default_feeds(),
        }
    }
}

fn default_base_url() -> String {
    "https://www.moltbook.com/api/v1".into()
}
fn default_api_key_env() -> String {
    "MOLTBOOK_API_KEY".into()
}
fn default_permalink_template() -> String {
    "https://www.moltbook.com/post/{id}".into()
}
fn default_page_size() -> u32 {
    MAX_PAGE_SIZE
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_feeds() -> Vec<FeedSpec> {
    vec![
        FeedSpec {
            sort: "hot".into(),
            want: 200,
        },
        FeedSpec {
            sort: "new".into(),
            want: 400,
        },
    ]
}

/// `[[source.feeds]]` entry: one listing and how many posts to pull from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSpec {
    pub sort: String,
    pub want: u32,
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Extra attempts after a `SourceUnavailable` failure.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Initial backoff; doubles after every failed attempt.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Where `fetch` writes the candidate file when `--out` is not given.
    #[serde(default = "default_candidates_path")]
    pub candidates_path: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
            candidates_path: default_candidates_path(),
        }
    }
}

fn default_retries() -> u32 {
    2
}
fn default_backoff_ms() -> u64 {
    2_000
}
fn default_candidates_path() -> String {
    std::env::temp_dir()
        .join("moltdigest_candidates.json")
        .to_string_lossy()
        .into_owned()
}

/// `[selection]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Soft lower bound on digest size.
    #[serde(default = "default_min_count")]
    pub min_count: usize,

    /// Hard upper bound on digest size.
    #[serde(default = "default_max_count")]
    pub max_count: usize,

    /// Apply the built-in secret/privacy patterns.
    #[serde(default = "default_true")]
    pub builtin_exclusions: bool,

    /// Plain terms that exclude a post when present (case-insensitive).
    #[serde(default)]
    pub blocked_terms: Vec<String>,

    /// Additional named regex rules.
    #[serde(default)]
    pub exclusions: Vec<ExclusionRuleConfig>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            min_count: default_min_count(),
            max_count: default_max_count(),
            builtin_exclusions: true,
            blocked_terms: Vec::new(),
            exclusions: Vec::new(),
        }
    }
}

fn default_min_count() -> usize {
    8
}
fn default_max_count() -> usize {
    12
}
fn default_true() -> bool {
    true
}

/// `[[selection.exclusions]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusionRuleConfig {
    pub name: String,
    pub pattern: String,
}

/// `[scoring]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Bonus for posts that link somewhere.
    #[serde(default = "default_link_bonus")]
    pub link_bonus: i64,

    /// Multiplier on `floor(log2(1 + engagement))`.
    #[serde(default = "default_engagement_weight")]
    pub engagement_weight: i64,

    /// Keyword → weight; a keyword counts once per post.
    #[serde(default = "default_keywords")]
    pub keywords: BTreeMap<String, i64>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            link_bonus: default_link_bonus(),
            engagement_weight: default_engagement_weight(),
            keywords: default_keywords(),
        }
    }
}

fn default_link_bonus() -> i64 {
    1
}
fn default_engagement_weight() -> i64 {
    1
}
fn default_keywords() -> BTreeMap<String, i64> {
    [
        // agents and automation
        ("moltbot", 10),
        ("clawdbot", 10),
        ("openclaw", 8),
        ("ai agent", 5),
        ("agent", 4),
        ("automation", 4),
        ("workflow", 4),
        ("tool calling", 4),
        ("mcp", 4),
        ("cron", 3),
        ("webhook", 3),
        ("自動化", 5),
        ("工作流", 5),
        ("排程", 4),
        ("智能體", 4),
        // AI applications
        ("llm", 3),
        ("rag", 3),
        ("inference", 3),
        ("gpu", 3),
        ("embedding", 2),
        ("prompt", 2),
        ("提示詞", 3),
        ("推理", 2),
        // cloud native
        ("kubernetes", 6),
        ("k8s", 6),
        ("etcd", 3),
        ("helm", 3),
        ("cilium", 3),
        ("operator", 3),
        ("容器", 3),
        ("叢集", 3),
        // storage
        ("minio", 7),
        ("storage", 5),
        ("ceph", 4),
        ("erasure", 3),
        ("nvme", 3),
        ("zfs", 3),
        ("儲存", 5),
        // markets
        ("markets", 4),
        ("finance", 4),
        ("vix", 4),
        ("macro", 3),
        ("earnings", 3),
        ("bitcoin", 3),
        ("gold", 3),
        ("財經", 5),
        ("市場", 5),
    ]
    .into_iter()
    .map(|(k, w)| (k.to_string(), w))
    .collect()
}

/// `[publish]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Root of the date-keyed digest tree.
    #[serde(default = "default_reports_dir")]
    pub reports_dir: String,

    /// Publication timezone as minutes east of UTC (480 = Asia/Taipei).
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,

    /// How long to wait for another run holding the same date's lock.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,

    /// Publication history backend.
    #[serde(default)]
    pub history: HistoryConfig,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            reports_dir: default_reports_dir(),
            utc_offset_minutes: default_utc_offset_minutes(),
            lock_timeout_secs: default_lock_timeout_secs(),
            history: HistoryConfig::default(),
        }
    }
}

fn default_reports_dir() -> String {
    "reports".into()
}
fn default_utc_offset_minutes() -> i32 {
    8 * 60
}
fn default_lock_timeout_secs() -> u64 {
    30
}

impl PublishConfig {
    /// The publication timezone as a chrono offset.
    pub fn offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            DigestError::config(format!(
                "utc_offset_minutes {} is out of range",
                self.utc_offset_minutes
            ))
        })
    }
}

/// Which ledger implementation persists the publication record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackend {
    /// Append-only JSON-lines file.
    Jsonl,
    /// libSQL database file.
    Sqlite,
}

/// `[publish.history]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_backend")]
    pub backend: HistoryBackend,

    #[serde(default = "default_history_path")]
    pub path: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            backend: default_history_backend(),
            path: default_history_path(),
        }
    }
}

fn default_history_backend() -> HistoryBackend {
    HistoryBackend::Jsonl
}
fn default_history_path() -> String {
    ".moltdigest/published.jsonl".into()
}

/// `[digest]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestConfig {
    /// H1 title; the date is appended.
    #[serde(default = "default_digest_title")]
    pub title: String,

    /// Paragraph printed under the title.
    #[serde(default = "default_preface")]
    pub preface: String,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            title: default_digest_title(),
            preface: default_preface(),
        }
    }
}

fn default_digest_title() -> String {
    "Moltbook 精選摘要 Daily Digest".into()
}
fn default_preface() -> String {
    "偏好 Focus：agent 自動化、AI 應用、K8s、Storage、財經市場。".into()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let sel = &self.selection;
        if sel.max_count == 0 {
            return Err(DigestError::config("selection.max_count must be at least 1"));
        }
        if sel.min_count > sel.max_count {
            return Err(DigestError::config(format!(
                "selection.min_count ({}) exceeds selection.max_count ({})",
                sel.min_count, sel.max_count
            )));
        }
        if self.source.page_size == 0 || self.source.page_size > MAX_PAGE_SIZE {
            return Err(DigestError::config(format!(
                "source.page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        match url::Url::parse(&self.source.base_url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => {}
            Ok(u) => {
                return Err(DigestError::config(format!(
                    "source.base_url must be http(s), got scheme {:?}",
                    u.scheme()
                )));
            }
            Err(e) => {
                return Err(DigestError::config(format!(
                    "source.base_url {:?} is not a valid URL: {e}",
                    self.source.base_url
                )));
            }
        }
        if !self.source.permalink_template.contains("{id}") {
            return Err(DigestError::config(
                "source.permalink_template must contain {id}",
            ));
        }
        self.publish.offset()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.moltdigest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| DigestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.moltdigest/moltdigest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DigestError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| DigestError::config(format!("failed to parse {}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DigestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DigestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DigestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the source API key from the env var named in config.
pub fn api_key(source: &SourceConfig) -> Result<String> {
    let var_name = &source.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val.trim().to_string()),
        _ => Err(DigestError::config(format!(
            "source API key not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}
