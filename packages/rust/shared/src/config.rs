//! Application configuration for a11yscan.
//!
//! User config lives at `~/.a11yscan/a11yscan.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{A11yScanError, Result};
use crate::types::{ScanLimits, ScanType, Standard, WcagLevel};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "a11yscan.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".a11yscan";

/// Default database file name inside the config directory.
const DATABASE_FILE_NAME: &str = "scans.db";

// ---------------------------------------------------------------------------
// Config structs (matching a11yscan.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    /// Scan type → crawl limits table.
    #[serde(default)]
    pub scan_profiles: ScanProfilesConfig,

    #[serde(default)]
    pub crawl: CrawlPoliciesConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub confidence: ConfidenceConfig,

    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Conformance target used when a request does not name one.
    #[serde(default)]
    pub wcag_level: WcagLevel,

    #[serde(default)]
    pub scan_type: ScanType,

    /// Rule-tag groups evaluated when a request does not name any.
    #[serde(default = "default_standards")]
    pub standards: BTreeSet<Standard>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            wcag_level: WcagLevel::default(),
            scan_type: ScanType::default(),
            standards: default_standards(),
        }
    }
}

fn default_standards() -> BTreeSet<Standard> {
    [Standard::Wcag21, Standard::BestPractice].into_iter().collect()
}

/// `[queue]` section: worker pool, retries, rate limiting, retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Number of jobs processed in parallel.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Attempts before a job is failed permanently.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First retry delay; doubles with every further attempt.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Job starts allowed per rate-limit window.
    #[serde(default = "default_rate_limit_max_starts")]
    pub rate_limit_max_starts: usize,

    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,

    /// How long completed jobs stay inspectable.
    #[serde(default = "default_completed_retention_secs")]
    pub completed_retention_secs: u64,

    /// How long failed jobs stay inspectable.
    #[serde(default = "default_failed_retention_secs")]
    pub failed_retention_secs: u64,

    /// Interval of the retention sweeper.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            rate_limit_max_starts: default_rate_limit_max_starts(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            completed_retention_secs: default_completed_retention_secs(),
            failed_retention_secs: default_failed_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl QueueConfig {
    /// Delay before attempt `attempt + 1`, given `attempt` failed attempts so far.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(1u64 << exponent))
    }
}

fn default_pool_size() -> usize {
    4
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    2_000
}
fn default_rate_limit_max_starts() -> usize {
    10
}
fn default_rate_limit_window_secs() -> u64 {
    60
}
fn default_completed_retention_secs() -> u64 {
    60 * 60
}
fn default_failed_retention_secs() -> u64 {
    24 * 60 * 60
}
fn default_sweep_interval_secs() -> u64 {
    5 * 60
}

/// `[scan_profiles]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProfilesConfig {
    #[serde(default = "default_quick_limits")]
    pub quick: ScanLimits,
    #[serde(default = "default_full_limits")]
    pub full: ScanLimits,
    #[serde(default = "default_deep_limits")]
    pub deep: ScanLimits,
}

impl Default for ScanProfilesConfig {
    fn default() -> Self {
        Self {
            quick: default_quick_limits(),
            full: default_full_limits(),
            deep: default_deep_limits(),
        }
    }
}

impl ScanProfilesConfig {
    pub fn limits_for(&self, scan_type: ScanType) -> ScanLimits {
        match scan_type {
            ScanType::Quick => self.quick,
            ScanType::Full => self.full,
            ScanType::Deep => self.deep,
        }
    }
}

fn default_quick_limits() -> ScanLimits {
    ScanLimits {
        max_depth: 1,
        max_pages: 5,
    }
}
fn default_full_limits() -> ScanLimits {
    ScanLimits {
        max_depth: 3,
        max_pages: 50,
    }
}
fn default_deep_limits() -> ScanLimits {
    ScanLimits {
        max_depth: 5,
        max_pages: 200,
    }
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlPoliciesConfig {
    /// Hard timeout for a single page navigation.
    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_secs: u64,

    /// Minimum ms between page navigations within one job.
    #[serde(default)]
    pub rate_limit_ms: u64,

    /// URL path glob patterns that are never crawled.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Permit loopback/private hosts (local development servers).
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl Default for CrawlPoliciesConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_secs: default_navigation_timeout(),
            rate_limit_ms: 0,
            exclude_patterns: Vec::new(),
            allow_private_hosts: false,
        }
    }
}

fn default_navigation_timeout() -> u64 {
    30
}

/// `[scoring]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Violations per page at which the compliance score reaches 0.
    /// A tunable default, not a calibrated threshold.
    #[serde(default = "default_max_violations_per_page")]
    pub max_violations_per_page: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            max_violations_per_page: default_max_violations_per_page(),
        }
    }
}

fn default_max_violations_per_page() -> u32 {
    20
}

/// `[confidence]` section: factor weights and the reliable-criteria list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceConfig {
    #[serde(default = "default_specificity_weight")]
    pub specificity_weight: f64,
    #[serde(default = "default_dynamic_weight")]
    pub dynamic_content_weight: f64,
    #[serde(default = "default_reliability_weight")]
    pub rule_reliability_weight: f64,
    #[serde(default = "default_sample_weight")]
    pub sample_size_weight: f64,
    /// WCAG criteria with historically few false positives.
    #[serde(default = "default_reliable_criteria")]
    pub reliable_criteria: Vec<String>,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            specificity_weight: default_specificity_weight(),
            dynamic_content_weight: default_dynamic_weight(),
            rule_reliability_weight: default_reliability_weight(),
            sample_size_weight: default_sample_weight(),
            reliable_criteria: default_reliable_criteria(),
        }
    }
}

fn default_specificity_weight() -> f64 {
    0.30
}
fn default_dynamic_weight() -> f64 {
    0.25
}
fn default_reliability_weight() -> f64 {
    0.25
}
fn default_sample_weight() -> f64 {
    0.20
}
fn default_reliable_criteria() -> Vec<String> {
    ["1.1.1", "2.4.1", "3.1.1", "4.1.1"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// `[enrichment]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Whether to request an AI executive summary at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// OpenAI-compatible API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_enrichment_timeout")]
    pub timeout_secs: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key_env: default_api_key_env(),
            model: default_model(),
            base_url: default_base_url(),
            timeout_secs: default_enrichment_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_enrichment_timeout() -> u64 {
    30
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database path; defaults to `~/.a11yscan/scans.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Crawl config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime crawl configuration.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub navigation_timeout: Duration,
    pub rate_limit_ms: u64,
    pub exclude_patterns: Vec<String>,
    pub allow_private_hosts: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for CrawlConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            navigation_timeout: Duration::from_secs(config.crawl.navigation_timeout_secs),
            rate_limit_ms: config.crawl.rate_limit_ms,
            exclude_patterns: config.crawl.exclude_patterns.clone(),
            allow_private_hosts: config.crawl.allow_private_hosts,
        }
    }
}

impl AppConfig {
    /// Reject values that would break scheduling or scoring.
    pub fn validate(&self) -> Result<()> {
        if self.queue.pool_size == 0 {
            return Err(A11yScanError::config("queue.pool_size must be at least 1"));
        }
        if self.queue.max_attempts == 0 {
            return Err(A11yScanError::config("queue.max_attempts must be at least 1"));
        }
        if self.queue.rate_limit_max_starts == 0 {
            return Err(A11yScanError::config(
                "queue.rate_limit_max_starts must be at least 1",
            ));
        }
        if self.scoring.max_violations_per_page == 0 {
            return Err(A11yScanError::config(
                "scoring.max_violations_per_page must be at least 1",
            ));
        }
        let weights = [
            self.confidence.specificity_weight,
            self.confidence.dynamic_content_weight,
            self.confidence.rule_reliability_weight,
            self.confidence.sample_size_weight,
        ];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || weights.iter().sum::<f64>() <= 0.0
        {
            return Err(A11yScanError::config(
                "confidence weights must be non-negative with a positive sum",
            ));
        }
        for profile in [
            self.scan_profiles.quick,
            self.scan_profiles.full,
            self.scan_profiles.deep,
        ] {
            if profile.max_pages == 0 {
                return Err(A11yScanError::config("scan profile max_pages must be at least 1"));
            }
        }
        Ok(())
    }

    /// Resolved database path.
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.storage.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join(DATABASE_FILE_NAME)),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.a11yscan/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| A11yScanError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.a11yscan/a11yscan.toml`).
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

/// Load and validate the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| A11yScanError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        A11yScanError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| A11yScanError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| A11yScanError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| A11yScanError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the enrichment API key from the env var named in config.
pub fn resolve_api_key(config: &EnrichmentConfig) -> Result<String> {
    let var_name = &config.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(A11yScanError::config(format!(
            "enrichment API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("pool_size"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
        assert!(toml_str.contains("max_violations_per_page"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.queue.max_attempts, 3);
        assert_eq!(parsed.scoring.max_violations_per_page, 20);
        assert_eq!(parsed.confidence.reliable_criteria.len(), 4);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn partial_config_uses_defaults() {
        let toml_str = r#"
[queue]
pool_size = 8

[scan_profiles.quick]
maxDepth = 0
maxPages = 1
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.queue.pool_size, 8);
        assert_eq!(config.queue.backoff_base_ms, 2_000);
        assert_eq!(
            config.scan_profiles.limits_for(ScanType::Quick),
            ScanLimits {
                max_depth: 0,
                max_pages: 1
            }
        );
        assert_eq!(config.scan_profiles.limits_for(ScanType::Deep).max_pages, 200);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let queue = QueueConfig::default();
        assert_eq!(queue.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(queue.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(queue.backoff_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.queue.pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.confidence.sample_size_weight = -1.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.scoring.max_violations_per_page = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn crawl_config_from_app_config() {
        let app = AppConfig::default();
        let crawl = CrawlConfig::from(&app);
        assert_eq!(crawl.navigation_timeout, Duration::from_secs(30));
        assert!(!crawl.allow_private_hosts);
    }

    #[test]
    fn api_key_resolution() {
        let config = EnrichmentConfig {
            api_key_env: "A11YSCAN_TEST_NONEXISTENT_KEY_12345".into(),
            ..EnrichmentConfig::default()
        };
        let result = resolve_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
