//! Scan job lifecycle types shared by the queue, the CLI, and storage.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{JobId, ScanLimits, ScanResult, ScanType, Standard, WcagLevel};

// ---------------------------------------------------------------------------
// JobState
// ---------------------------------------------------------------------------

/// Lifecycle state of a scan job.
///
/// ```text
/// Queued ──► Active ──► Completed
///              │  ▲
///              │  └── Retrying (after backoff)
///              ▼
///            Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Active,
    Retrying,
    Completed,
    Failed,
}

impl JobState {
    /// Returns the set of valid target states from the current state.
    pub fn valid_transitions(&self) -> &[JobState] {
        match self {
            Self::Queued => &[Self::Active],
            Self::Active => &[Self::Completed, Self::Retrying, Self::Failed],
            Self::Retrying => &[Self::Active, Self::Failed],
            Self::Completed | Self::Failed => &[],
        }
    }

    /// Check whether transitioning to `target` is allowed from the current state.
    pub fn can_transition_to(&self, target: JobState) -> bool {
        self.valid_transitions().contains(&target)
    }

    /// Whether this state is final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// Scan submission body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub url: String,
    #[serde(default)]
    pub wcag_level: WcagLevel,
    #[serde(default)]
    pub scan_type: ScanType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Caller-supplied job id; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Overrides the scan profile's depth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,
    /// Overrides the scan profile's page cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<usize>,
    /// Overrides the configured default standards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standards: Option<BTreeSet<Standard>>,
}

impl ScanRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// ScanJob
// ---------------------------------------------------------------------------

/// A queued or processed scan job. Owned by the job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanJob {
    pub id: JobId,
    pub target_url: String,
    pub limits: ScanLimits,
    pub standards: BTreeSet<Standard>,
    pub wcag_level: WcagLevel,
    pub scan_type: ScanType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub state: JobState,
    /// Number of attempts started so far.
    pub attempts: u32,
    /// 0–100, never decreases within the job's lifetime.
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ScanResult>,
}

/// Job status query response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub id: JobId,
    pub state: JobState,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ScanResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_on: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_on: Option<DateTime<Utc>>,
}

impl From<&ScanJob> for JobStatusView {
    fn from(job: &ScanJob) -> Self {
        Self {
            id: job.id.clone(),
            state: job.state,
            progress: job.progress,
            result: job.result.clone(),
            failed_reason: job.failed_reason.clone(),
            created_at: job.created_at,
            processed_on: job.started_at,
            finished_on: job.finished_at,
        }
    }
}

/// Point-in-time queue snapshot for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_transitions() {
        assert!(JobState::Queued.can_transition_to(JobState::Active));
        assert!(JobState::Active.can_transition_to(JobState::Retrying));
        assert!(JobState::Retrying.can_transition_to(JobState::Active));
        assert!(!JobState::Queued.can_transition_to(JobState::Completed));
        assert!(!JobState::Completed.can_transition_to(JobState::Active));
        assert!(JobState::Failed.valid_transitions().is_empty());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Retrying.is_terminal());
    }

    #[test]
    fn request_deserializes_wire_shape() {
        let json = r#"{"url":"https://example.com","wcagLevel":"AAA","scanType":"DEEP","tenantId":"t-1"}"#;
        let req: ScanRequest = serde_json::from_str(json).expect("deserialize");
        assert_eq!(req.wcag_level, WcagLevel::AAA);
        assert_eq!(req.scan_type, ScanType::Deep);
        assert_eq!(req.tenant_id.as_deref(), Some("t-1"));
        assert!(req.max_pages.is_none());
    }

    #[test]
    fn request_defaults() {
        let req: ScanRequest = serde_json::from_str(r#"{"url":"https://example.com"}"#).unwrap();
        assert_eq!(req.wcag_level, WcagLevel::AA);
        assert_eq!(req.scan_type, ScanType::Quick);
    }
}
