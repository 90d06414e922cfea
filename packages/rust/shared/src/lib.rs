//! Shared types, error model, and configuration for a11yscan.
//!
//! This crate is the foundation depended on by all other a11yscan crates.
//! It provides:
//! - [`A11yScanError`]: the unified error type
//! - Domain types ([`Violation`], [`PageAuditResult`], [`ScanResult`], [`ScanJob`])
//! - Configuration ([`AppConfig`], [`CrawlConfig`], config loading)

pub mod config;
pub mod error;
pub mod job;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ConfidenceConfig, CrawlConfig, CrawlPoliciesConfig, DefaultsConfig,
    EnrichmentConfig, QueueConfig, ScanProfilesConfig, ScoringConfig, StorageConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from, resolve_api_key,
};
pub use error::{A11yScanError, Result};
pub use job::{JobState, JobStatusView, QueueStats, ScanJob, ScanRequest};
pub use types::{
    Impact, JobId, PageAuditResult, ScanLimits, ScanResult, ScanStatus, ScanType, SeverityCounts,
    Standard, Violation, ViolationNode, WcagLevel,
};
