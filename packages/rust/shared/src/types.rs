//! Core domain types for accessibility scans.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// Scan job identifier. Generated ids are UUID v7 (time-sortable); callers
/// may also supply their own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("job id must not be empty".into());
        }
        Ok(Self(trimmed.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Impact, levels, standards
// ---------------------------------------------------------------------------

/// Severity of a single violation, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Critical,
    Serious,
    Moderate,
    Minor,
}

impl Impact {
    pub const ALL: [Impact; 4] = [Self::Critical, Self::Serious, Self::Moderate, Self::Minor];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Serious => "serious",
            Self::Moderate => "moderate",
            Self::Minor => "minor",
        }
    }
}

impl std::fmt::Display for Impact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Impact {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "serious" => Ok(Self::Serious),
            "moderate" => Ok(Self::Moderate),
            "minor" => Ok(Self::Minor),
            other => Err(format!("unknown impact level: {other}")),
        }
    }
}

/// WCAG conformance level. Ordered `A < AA < AAA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WcagLevel {
    A,
    AA,
    AAA,
}

impl WcagLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::AA => "AA",
            Self::AAA => "AAA",
        }
    }
}

impl Default for WcagLevel {
    fn default() -> Self {
        Self::AA
    }
}

impl std::fmt::Display for WcagLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WcagLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(Self::A),
            "AA" => Ok(Self::AA),
            "AAA" => Ok(Self::AAA),
            other => Err(format!("unknown WCAG level: {other}")),
        }
    }
}

/// Requested scan depth profile. Mapped to [`ScanLimits`] by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScanType {
    Quick,
    Full,
    Deep,
}

impl Default for ScanType {
    fn default() -> Self {
        Self::Quick
    }
}

impl std::str::FromStr for ScanType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "quick" => Ok(Self::Quick),
            "full" => Ok(Self::Full),
            "deep" => Ok(Self::Deep),
            other => Err(format!("unknown scan type: {other}")),
        }
    }
}

/// A rule-tag group that can be requested for evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Standard {
    Wcag20,
    Wcag21,
    Wcag22,
    Section508,
    BestPractice,
}

impl std::str::FromStr for Standard {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['.', '_'], "").as_str() {
            "wcag20" | "wcag2" => Ok(Self::Wcag20),
            "wcag21" => Ok(Self::Wcag21),
            "wcag22" => Ok(Self::Wcag22),
            "section508" | "508" => Ok(Self::Section508),
            "best-practice" | "bestpractice" => Ok(Self::BestPractice),
            other => Err(format!("unknown standard: {other}")),
        }
    }
}

/// Crawl bounds for a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanLimits {
    /// Maximum link depth from the seed URL (seed is depth 0).
    pub max_depth: u32,
    /// Maximum number of pages to audit.
    pub max_pages: usize,
}

// ---------------------------------------------------------------------------
// Violation
// ---------------------------------------------------------------------------

/// One offending DOM node of a violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationNode {
    /// CSS selector locating the node, if one could be derived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Outer HTML of the node, truncated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_snippet: Option<String>,
    /// Human-readable description of what failed on this node.
    pub failure_summary: String,
}

/// A single detected accessibility rule failure on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub rule_id: String,
    pub impact: Impact,
    pub standard_tags: BTreeSet<String>,
    pub description: String,
    pub help: String,
    pub help_url: String,
    pub source_url: String,
    pub nodes: Vec<ViolationNode>,
    /// True-positive likelihood in `[0, 1]`, attached once by the confidence scorer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl Violation {
    /// WCAG success criteria referenced by this violation's tags
    /// (`wcag111` → `1.1.1`, `wcag1410` → `1.4.10`).
    pub fn wcag_criteria(&self) -> Vec<String> {
        self.standard_tags
            .iter()
            .filter_map(|tag| criterion_from_tag(tag))
            .collect()
    }

    /// Attach a confidence score. An already-scored violation keeps its score.
    pub fn with_confidence(mut self, score: f64) -> Self {
        if self.confidence.is_none() {
            self.confidence = Some(score.clamp(0.0, 1.0));
        }
        self
    }
}

/// Convert an axe-style criterion tag into a dotted criterion code.
///
/// Level tags (`wcag2a`, `wcag21aa`) are not criteria and yield `None`.
fn criterion_from_tag(tag: &str) -> Option<String> {
    let digits = tag.strip_prefix("wcag")?;
    if digits.len() < 3 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let mut chars = digits.chars();
    let principle = chars.next()?;
    let guideline = chars.next()?;
    let criterion: String = chars.collect();
    Some(format!("{principle}.{guideline}.{criterion}"))
}

// ---------------------------------------------------------------------------
// Page and scan results
// ---------------------------------------------------------------------------

/// Audit output for one crawled page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageAuditResult {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub audited_at: DateTime<Utc>,
    pub violations: Vec<Violation>,
    /// Opaque reference to captured visual evidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_ref: Option<String>,
}

/// Per-impact violation counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub serious: usize,
    pub moderate: usize,
    pub minor: usize,
}

impl SeverityCounts {
    pub fn record(&mut self, impact: Impact) {
        match impact {
            Impact::Critical => self.critical += 1,
            Impact::Serious => self.serious += 1,
            Impact::Moderate => self.moderate += 1,
            Impact::Minor => self.minor += 1,
        }
    }

    pub fn get(&self, impact: Impact) -> usize {
        match impact {
            Impact::Critical => self.critical,
            Impact::Serious => self.serious,
            Impact::Moderate => self.moderate,
            Impact::Minor => self.minor,
        }
    }

    pub fn total(&self) -> usize {
        self.critical + self.serious + self.moderate + self.minor
    }
}

/// Overall status carried on a [`ScanResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Scanning,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scanning => "scanning",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ScanStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scanning" => Ok(Self::Scanning),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown scan status: {other}")),
        }
    }
}

/// Aggregate result of a finished scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub job_id: JobId,
    pub base_url: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub pages: Vec<PageAuditResult>,
    pub total_violations: usize,
    pub severity: SeverityCounts,
    /// Heuristic 0–100 summary of violation density.
    pub compliance_score: u8,
    pub wcag_level_achieved: WcagLevel,
    pub status: ScanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// AI-generated summary, or a fixed fallback when enrichment is unavailable.
    pub executive_summary: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(tags: &[&str]) -> Violation {
        Violation {
            rule_id: "image-alt".into(),
            impact: Impact::Critical,
            standard_tags: tags.iter().map(|t| t.to_string()).collect(),
            description: "Images must have alternate text".into(),
            help: "Provide an alt attribute".into(),
            help_url: "https://dequeuniversity.com/rules/axe/4.8/image-alt".into(),
            source_url: "https://example.com/".into(),
            nodes: vec![],
            confidence: None,
        }
    }

    #[test]
    fn job_id_parse() {
        let id: JobId = " scan-42 ".parse().expect("parse JobId");
        assert_eq!(id.as_str(), "scan-42");
        assert!("   ".parse::<JobId>().is_err());
        assert_ne!(JobId::new(), JobId::new());
    }

    #[test]
    fn criteria_from_tags() {
        let v = violation(&["wcag2a", "wcag111", "wcag1410", "section508"]);
        let criteria = v.wcag_criteria();
        assert_eq!(criteria, vec!["1.1.1".to_string(), "1.4.10".to_string()]);
    }

    #[test]
    fn confidence_is_fixed_once_set() {
        let v = violation(&["wcag111"]).with_confidence(0.8).with_confidence(0.1);
        assert_eq!(v.confidence, Some(0.8));

        let clamped = violation(&[]).with_confidence(4.0);
        assert_eq!(clamped.confidence, Some(1.0));
    }

    #[test]
    fn enum_wire_formats() {
        assert_eq!(serde_json::to_string(&Impact::Serious).unwrap(), "\"serious\"");
        assert_eq!(serde_json::to_string(&WcagLevel::AAA).unwrap(), "\"AAA\"");
        assert_eq!(serde_json::to_string(&ScanType::Deep).unwrap(), "\"DEEP\"");
        assert_eq!(
            serde_json::to_string(&Standard::BestPractice).unwrap(),
            "\"best-practice\""
        );
        assert_eq!("wcag2.1".parse::<Standard>().unwrap(), Standard::Wcag21);
        assert!(WcagLevel::A < WcagLevel::AAA);
    }

    #[test]
    fn severity_counts_total() {
        let mut counts = SeverityCounts::default();
        counts.record(Impact::Critical);
        counts.record(Impact::Minor);
        counts.record(Impact::Minor);
        assert_eq!(counts.total(), 3);
        assert_eq!(counts.get(Impact::Minor), 2);
    }

    #[test]
    fn scan_result_serializes_camel_case() {
        let result = ScanResult {
            job_id: JobId("job-1".into()),
            base_url: "https://example.com".into(),
            started_at: Utc::now(),
            completed_at: Utc::now(),
            pages: vec![],
            total_violations: 0,
            severity: SeverityCounts::default(),
            compliance_score: 100,
            wcag_level_achieved: WcagLevel::AAA,
            status: ScanStatus::Completed,
            error: None,
            executive_summary: "ok".into(),
        };
        let json = serde_json::to_value(&result).expect("serialize");
        assert_eq!(json["complianceScore"], 100);
        assert_eq!(json["wcagLevelAchieved"], "AAA");
        assert!(json.get("error").is_none());
    }
}
