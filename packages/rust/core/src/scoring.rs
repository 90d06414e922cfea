//! Scan-level aggregation: severity histogram, compliance score, and the
//! achieved WCAG level.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use a11yscan_shared::{
    JobId, PageAuditResult, ScanResult, ScanStatus, ScoringConfig, SeverityCounts, WcagLevel,
};

use crate::enrichment::{Enricher, FALLBACK_SUMMARY};

/// Error recorded on a result with no audited pages.
pub const NO_PAGES_ERROR: &str = "no pages audited";

/// Folds per-page audits into a [`ScanResult`].
pub struct Aggregator {
    violations_per_page: u32,
    enricher: Option<Arc<dyn Enricher>>,
}

impl Aggregator {
    /// Score against `config`'s per-page violation allowance.
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            violations_per_page: config.max_violations_per_page,
            enricher: None,
        }
    }

    /// Ask `enricher` for the executive summary.
    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    /// Build the job's result. An empty `pages` yields a failed result.
    #[instrument(skip_all, fields(job_id = %job_id, pages = pages.len()))]
    pub async fn aggregate(
        &self,
        job_id: &JobId,
        base_url: &str,
        started_at: DateTime<Utc>,
        pages: Vec<PageAuditResult>,
    ) -> ScanResult {
        if pages.is_empty() {
            return ScanResult {
                job_id: job_id.clone(),
                base_url: base_url.to_string(),
                started_at,
                completed_at: Utc::now(),
                pages,
                total_violations: 0,
                severity: SeverityCounts::default(),
                compliance_score: 0,
                wcag_level_achieved: WcagLevel::A,
                status: ScanStatus::Failed,
                error: Some(NO_PAGES_ERROR.to_string()),
                executive_summary: FALLBACK_SUMMARY.to_string(),
            };
        }

        let mut severity = SeverityCounts::default();
        for violation in pages.iter().flat_map(|p| &p.violations) {
            severity.record(violation.impact);
        }
        let total = severity.total();

        let mut result = ScanResult {
            job_id: job_id.clone(),
            base_url: base_url.to_string(),
            started_at,
            completed_at: Utc::now(),
            compliance_score: compliance_score(total, pages.len(), self.violations_per_page),
            wcag_level_achieved: achieved_level(&severity),
            pages,
            total_violations: total,
            severity,
            status: ScanStatus::Completed,
            error: None,
            executive_summary: FALLBACK_SUMMARY.to_string(),
        };

        debug!(
            total_violations = total,
            compliance_score = result.compliance_score,
            level = %result.wcag_level_achieved,
            "scan aggregated"
        );

        if let Some(enricher) = &self.enricher {
            result.executive_summary = enricher.summarize_scan(&result).await.into_text();
        }
        result
    }
}

/// `max(0, round(100 × (1 − total / (pages × k))))`. Zero pages scores 0.
pub fn compliance_score(total_violations: usize, pages: usize, k: u32) -> u8 {
    let capacity = pages as f64 * f64::from(k.max(1));
    if capacity == 0.0 {
        return 0;
    }
    let score = (100.0 * (1.0 - total_violations as f64 / capacity)).round();
    score.clamp(0.0, 100.0) as u8
}

/// AAA with no critical or serious findings, AA with no critical, otherwise A.
pub fn achieved_level(severity: &SeverityCounts) -> WcagLevel {
    match (severity.critical, severity.serious) {
        (0, 0) => WcagLevel::AAA,
        (0, _) => WcagLevel::AA,
        _ => WcagLevel::A,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use a11yscan_shared::{Impact, Violation};
    use async_trait::async_trait;

    use crate::enrichment::EnrichmentOutcome;

    fn page(url: &str, impacts: &[Impact]) -> PageAuditResult {
        PageAuditResult {
            url: url.into(),
            title: None,
            audited_at: Utc::now(),
            violations: impacts
                .iter()
                .map(|&impact| Violation {
                    rule_id: "image-alt".into(),
                    impact,
                    standard_tags: Default::default(),
                    description: String::new(),
                    help: String::new(),
                    help_url: String::new(),
                    source_url: url.into(),
                    nodes: vec![],
                    confidence: Some(0.8),
                })
                .collect(),
            screenshot_ref: None,
        }
    }

    struct Canned;

    #[async_trait]
    impl Enricher for Canned {
        async fn summarize_scan(&self, result: &ScanResult) -> EnrichmentOutcome {
            EnrichmentOutcome::Summary(format!("{} issues", result.total_violations))
        }
    }

    struct Down;

    #[async_trait]
    impl Enricher for Down {
        async fn summarize_scan(&self, _result: &ScanResult) -> EnrichmentOutcome {
            EnrichmentOutcome::Unavailable("timeout".into())
        }
    }

    #[test]
    fn score_formula() {
        assert_eq!(compliance_score(40, 2, 20), 0);
        assert_eq!(compliance_score(0, 3, 20), 100);
        assert_eq!(compliance_score(10, 1, 20), 50);
        assert_eq!(compliance_score(3, 1, 20), 85);
        assert_eq!(compliance_score(500, 1, 20), 0);
        assert_eq!(compliance_score(5, 0, 20), 0);
    }

    #[test]
    fn level_classification() {
        let mut s = SeverityCounts::default();
        assert_eq!(achieved_level(&s), WcagLevel::AAA);
        s.record(Impact::Minor);
        s.record(Impact::Moderate);
        assert_eq!(achieved_level(&s), WcagLevel::AAA);
        s.record(Impact::Serious);
        assert_eq!(achieved_level(&s), WcagLevel::AA);
        s.record(Impact::Critical);
        assert_eq!(achieved_level(&s), WcagLevel::A);
    }

    #[tokio::test]
    async fn twenty_violations_per_page_scores_zero() {
        let impacts = vec![Impact::Moderate; 20];
        let pages = vec![page("https://a.test/", &impacts), page("https://a.test/b", &impacts)];

        let result = Aggregator::new(&ScoringConfig::default())
            .aggregate(&JobId("j".into()), "https://a.test/", Utc::now(), pages)
            .await;

        assert_eq!(result.total_violations, 40);
        assert_eq!(result.severity.moderate, 40);
        assert_eq!(result.compliance_score, 0);
        assert_eq!(result.wcag_level_achieved, WcagLevel::AAA);
        assert_eq!(result.status, ScanStatus::Completed);
        assert_eq!(result.executive_summary, FALLBACK_SUMMARY);
    }

    #[tokio::test]
    async fn clean_scan_scores_full_marks() {
        let pages = vec![page("https://a.test/", &[])];
        let result = Aggregator::new(&ScoringConfig::default())
            .with_enricher(Arc::new(Canned))
            .aggregate(&JobId("j".into()), "https://a.test/", Utc::now(), pages)
            .await;

        assert_eq!(result.compliance_score, 100);
        assert_eq!(result.wcag_level_achieved, WcagLevel::AAA);
        assert_eq!(result.executive_summary, "0 issues");
    }

    #[tokio::test]
    async fn unavailable_enrichment_uses_fallback() {
        let pages = vec![page("https://a.test/", &[Impact::Critical, Impact::Serious])];
        let result = Aggregator::new(&ScoringConfig::default())
            .with_enricher(Arc::new(Down))
            .aggregate(&JobId("j".into()), "https://a.test/", Utc::now(), pages)
            .await;

        assert_eq!(result.wcag_level_achieved, WcagLevel::A);
        assert_eq!(result.severity.critical, 1);
        assert_eq!(result.executive_summary, FALLBACK_SUMMARY);
    }

    #[tokio::test]
    async fn zero_pages_is_a_failed_result() {
        let result = Aggregator::new(&ScoringConfig::default())
            .with_enricher(Arc::new(Canned))
            .aggregate(&JobId("j".into()), "https://a.test/", Utc::now(), vec![])
            .await;

        assert_eq!(result.status, ScanStatus::Failed);
        assert_eq!(result.compliance_score, 0);
        assert_eq!(result.wcag_level_achieved, WcagLevel::A);
        assert_eq!(result.error.as_deref(), Some(NO_PAGES_ERROR));
        assert_eq!(result.executive_summary, FALLBACK_SUMMARY);
    }
}
