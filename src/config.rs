//! Configuration types for sei-dl

use crate::error::{Error, Result};
use crate::types::{Category, FilterCriteria, UnitName};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Portal credentials: login identifier, secret, organization code.
///
/// Immutable for the process lifetime. The secret is redacted from `Debug`
/// output and is never logged by the library.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    /// Login identifier submitted to the portal's login form
    pub login: String,
    /// Account secret
    pub secret: String,
    /// Organization code selected at login (also sent as the org cookie)
    pub org_code: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("secret", &"<redacted>")
            .field("org_code", &self.org_code)
            .finish()
    }
}

/// Portal endpoints and session parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortalConfig {
    /// Portal origin (default: the SEI/MG instance)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Login page path, relative to the origin
    #[serde(default = "default_login_path")]
    pub login_path: String,

    /// Case-control page path, used as fallback when the post-login page
    /// carries no control link
    #[serde(default = "default_control_path")]
    pub control_path: String,

    /// Cookie name carrying the organization code
    #[serde(default = "default_org_cookie")]
    pub org_cookie: String,

    /// Organizational unit that must be active before any read is trusted
    pub unit_name: UnitName,

    /// Timeout for page fetches and form submissions
    #[serde(default = "default_request_timeout", with = "duration_secs")]
    pub request_timeout: Duration,

    /// Timeout for artifact (binary) fetches
    #[serde(default = "default_download_timeout", with = "duration_secs")]
    pub download_timeout: Duration,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            login_path: default_login_path(),
            control_path: default_control_path(),
            org_cookie: default_org_cookie(),
            unit_name: UnitName::new(""),
            request_timeout: default_request_timeout(),
            download_timeout: default_download_timeout(),
        }
    }
}

impl PortalConfig {
    /// Full login URL
    pub fn login_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.login_path)
    }
}

/// Per-category and global page caps for the collection phase
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct PaginationCaps {
    /// Cap on pages read from the Received listing
    #[serde(default)]
    pub max_pages_received: Option<u32>,
    /// Cap on pages read from the Generated listing
    #[serde(default)]
    pub max_pages_generated: Option<u32>,
    /// Cap applied to every category (binds together with the per-category cap)
    #[serde(default)]
    pub max_pages_total: Option<u32>,
}

impl PaginationCaps {
    /// Pages to actually read for a category: the portal's total clamped by
    /// whichever configured cap binds first. Caps below 1 read one page.
    pub fn cap_for(&self, category: Category, total_pages: u32) -> u32 {
        let per_category = match category {
            Category::Received => self.max_pages_received,
            Category::Generated => self.max_pages_generated,
        };
        let bound = [self.max_pages_total, per_category]
            .into_iter()
            .flatten()
            .min();
        match bound {
            Some(cap) => total_pages.min(cap.max(1)),
            None => total_pages,
        }
    }
}

/// Document enrichment behavior
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Whether to fetch document subtrees at all
    #[serde(default)]
    pub collect_documents: bool,
    /// Enrich at most this many cases, in input order (None = all)
    #[serde(default)]
    pub limit: Option<usize>,
    /// Persist raw subtree markup for inspection
    #[serde(default)]
    pub dump_trees: bool,
    /// Cap on persisted subtree dumps (default: 5 when dumping is on)
    #[serde(default)]
    pub dump_limit: Option<usize>,
    /// Directory for subtree dumps (default: `<debug dir>/trees`)
    #[serde(default)]
    pub dump_dir: Option<PathBuf>,
}

/// Batch artifact download behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Whether the download stage runs at all
    #[serde(default)]
    pub enabled: bool,

    /// Directory artifacts are written to (default: "./downloads")
    #[serde(default = "default_target_dir")]
    pub target_dir: PathBuf,

    /// Partition the case list across workers instead of a single pass
    #[serde(default)]
    pub parallel: bool,

    /// Worker count in parallel mode (default: 3)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Attempts per case before recording a failure (default: 3)
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Process at most this many cases from the filtered list
    #[serde(default)]
    pub process_cap: Option<usize>,

    /// Pause between cases in sequential mode (default: 1 second)
    #[serde(default = "default_sequential_delay", with = "duration_secs")]
    pub sequential_delay: Duration,

    /// Reject artifacts larger than this many bytes (default: 100 MiB)
    #[serde(default = "default_max_artifact_bytes")]
    pub max_artifact_bytes: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_dir: default_target_dir(),
            parallel: false,
            workers: default_workers(),
            retries: default_retries(),
            process_cap: None,
            sequential_delay: default_sequential_delay(),
            max_artifact_bytes: default_max_artifact_bytes(),
        }
    }
}

/// Retry behavior for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retry attempts after the first failure (default: 1; a failed
    /// listing page is retried once before its category is abandoned)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before the first retry (default: 2 seconds)
    #[serde(default = "default_initial_delay", with = "duration_secs")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 10 seconds)
    #[serde(default = "default_max_delay", with = "duration_secs")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Debug artifact behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DebugConfig {
    /// Verbose diagnostics
    #[serde(default)]
    pub enabled: bool,
    /// Persist fetched page markup under `html_dir`
    #[serde(default)]
    pub save_html: bool,
    /// Where debug markup is written (default: "./data/debug")
    #[serde(default = "default_html_dir")]
    pub html_dir: PathBuf,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            save_html: false,
            html_dir: default_html_dir(),
        }
    }
}

/// History snapshot persistence
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Save a JSON snapshot of the collected cases after enrichment
    #[serde(default)]
    pub enabled: bool,
    /// Snapshot path (default: "./data/case_history.json")
    #[serde(default = "default_history_path")]
    pub path: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_history_path(),
        }
    }
}

/// Main configuration for the pipeline
///
/// The library treats this as an already-validated object: parsing raw
/// environment or CLI input is the caller's job. [`Config::validate`] is the
/// gate raised before any network activity.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Portal credentials
    pub credentials: Credentials,
    /// Portal endpoints and session parameters
    #[serde(default)]
    pub portal: PortalConfig,
    /// Filters applied to the merged case set
    #[serde(default)]
    pub filter: FilterCriteria,
    /// Page caps for the collection phase
    #[serde(default)]
    pub pagination: PaginationCaps,
    /// Document enrichment behavior
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    /// Batch artifact download behavior
    #[serde(default)]
    pub download: DownloadConfig,
    /// Retry behavior for transient failures
    #[serde(default)]
    pub retry: RetryConfig,
    /// Debug artifact behavior
    #[serde(default)]
    pub debug: DebugConfig,
    /// History snapshot persistence
    #[serde(default)]
    pub history: HistoryConfig,
}

impl Config {
    /// Check required fields and numeric bounds, before any network activity
    pub fn validate(&self) -> Result<()> {
        if self.credentials.login.trim().is_empty() {
            return Err(Error::config("credentials.login", "login is required"));
        }
        if self.credentials.secret.trim().is_empty() {
            return Err(Error::config("credentials.secret", "secret is required"));
        }
        if self.credentials.org_code.trim().is_empty() {
            return Err(Error::config(
                "credentials.org_code",
                "organization code is required",
            ));
        }
        if self.portal.unit_name.as_str().trim().is_empty() {
            return Err(Error::config(
                "portal.unit_name",
                "target unit name is required",
            ));
        }
        if url::Url::parse(&self.portal.base_url).is_err() {
            return Err(Error::config(
                "portal.base_url",
                format!("not a valid URL: {}", self.portal.base_url),
            ));
        }
        if self.download.enabled {
            if self.download.workers == 0 {
                return Err(Error::config("download.workers", "must be at least 1"));
            }
            if self.download.retries == 0 {
                return Err(Error::config("download.retries", "must be at least 1"));
            }
        }
        Ok(())
    }
}

fn default_base_url() -> String {
    "https://www.sei.mg.gov.br".to_string()
}

fn default_login_path() -> String {
    "/sip/login.php?sigla_orgao_sistema=GOVMG&sigla_sistema=SEI&infra_url=L3NlaS8=".to_string()
}

fn default_control_path() -> String {
    "/sei/controlador.php?acao=procedimento_controlar".to_string()
}

fn default_org_cookie() -> String {
    "SIP_U_GOVMG_SEI".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_target_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_workers() -> usize {
    3
}

fn default_retries() -> u32 {
    3
}

fn default_sequential_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_artifact_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_max_attempts() -> u32 {
    1
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_html_dir() -> PathBuf {
    PathBuf::from("./data/debug")
}

fn default_history_path() -> PathBuf {
    PathBuf::from("./data/case_history.json")
}

/// Serialize `Duration` fields as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
