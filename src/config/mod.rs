use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub site: SiteConfig,
    pub engine: EngineConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
}

/// Remote site + fetch behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SiteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Account whose "following" listing defines the tracked member set.
    #[serde(default = "default_directory_account")]
    pub directory_account: String,

    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,

    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Attempts for listing/member pages.
    #[serde(default = "default_listing_attempts")]
    pub listing_attempts: usize,

    /// Attempts for the lighter film detail sub-pages and asset downloads.
    #[serde(default = "default_detail_attempts")]
    pub detail_attempts: usize,

    /// Bounded poll for listing attributes that render client-side.
    #[serde(default = "default_attribute_poll_attempts")]
    pub attribute_poll_attempts: usize,

    #[serde(default = "default_attribute_poll_delay_ms")]
    pub attribute_poll_delay_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Headless rendering engine launch parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Disable for containerized deployments that lack a usable sandbox.
    #[serde(default = "default_true")]
    pub sandbox: bool,

    /// Explicit Chromium executable path; autodetected when unset.
    #[serde(default)]
    pub executable: Option<PathBuf>,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Root for downloaded avatar and poster images.
    #[serde(default = "default_assets_dir")]
    pub assets_dir: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Members harvested concurrently; chunks run sequentially.
    #[serde(default = "default_member_chunk_size")]
    pub member_chunk_size: usize,

    /// Films enriched concurrently per batch.
    #[serde(default = "default_detail_batch_size")]
    pub detail_batch_size: usize,

    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// Films created within this window are re-enriched regardless of how
    /// complete their attributes already are.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://letterboxd.com".to_string()
}
fn default_directory_account() -> String {
    "mkdb".to_string()
}
fn default_navigation_timeout_secs() -> u64 {
    30
}
fn default_page_delay_ms() -> u64 {
    1000
}
fn default_jitter_ms() -> u64 {
    500
}
fn default_retry_base_delay_ms() -> u64 {
    500
}
fn default_listing_attempts() -> usize {
    10
}
fn default_detail_attempts() -> usize {
    4
}
fn default_attribute_poll_attempts() -> usize {
    5
}
fn default_attribute_poll_delay_ms() -> u64 {
    500
}
fn default_user_agent() -> String {
    "mkdb-harvester/0.1 (community ratings mirror)".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/mkdb.duckdb")
}
fn default_assets_dir() -> PathBuf {
    PathBuf::from("assets")
}
fn default_true() -> bool {
    true
}
fn default_member_chunk_size() -> usize {
    10
}
fn default_detail_batch_size() -> usize {
    30
}
fn default_batch_delay_ms() -> u64 {
    1000
}
fn default_lookback_days() -> i64 {
    7
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("MKDB").separator("__"))
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize().unwrap_or_else(|_| AppConfig::default());
        Ok(app_cfg)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            site: SiteConfig {
                base_url: default_base_url(),
                directory_account: default_directory_account(),
                navigation_timeout_secs: default_navigation_timeout_secs(),
                page_delay_ms: default_page_delay_ms(),
                jitter_ms: default_jitter_ms(),
                retry_base_delay_ms: default_retry_base_delay_ms(),
                listing_attempts: default_listing_attempts(),
                detail_attempts: default_detail_attempts(),
                attribute_poll_attempts: default_attribute_poll_attempts(),
                attribute_poll_delay_ms: default_attribute_poll_delay_ms(),
                user_agent: default_user_agent(),
            },
            engine: EngineConfig {
                sandbox: true,
                executable: None,
            },
            storage: StorageConfig {
                db_path: default_db_path(),
                assets_dir: default_assets_dir(),
                run_migrations: true,
            },
            pipeline: PipelineConfig {
                member_chunk_size: default_member_chunk_size(),
                detail_batch_size: default_detail_batch_size(),
                batch_delay_ms: default_batch_delay_ms(),
                lookback_days: default_lookback_days(),
            },
        }
    }
}
