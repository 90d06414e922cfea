//! Per-page audit: rule evaluation, heuristics, normalization, confidence
//! and evidence capture.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument, warn};

use a11yscan_browser::{BrowserSession, RenderedPage};
use a11yscan_shared::{A11yScanError, Impact, PageAuditResult, Violation};

use crate::confidence::{ConfidenceScorer, CrawlStats};
use crate::evaluator::{RawFinding, RuleEvaluator};
use crate::heuristics::run_heuristics;
use crate::standards::RuleScope;

/// Rule id of the synthetic violation recorded when evaluation fails.
pub const SCAN_ERROR_RULE: &str = "scan-error";

/// Turns a rendered page into a scored [`PageAuditResult`].
pub struct PageAuditor {
    evaluator: Arc<dyn RuleEvaluator>,
    scorer: ConfidenceScorer,
}

impl PageAuditor {
    /// Audit with `evaluator`'s rules, scoring each finding with `scorer`.
    pub fn new(evaluator: Arc<dyn RuleEvaluator>, scorer: ConfidenceScorer) -> Self {
        Self { evaluator, scorer }
    }

    /// Audit one rendered page. Never fails: evaluator errors become a
    /// single critical `scan-error` violation.
    #[instrument(skip_all, fields(url = %page.final_url, evaluator = self.evaluator.name()))]
    pub async fn audit(
        &self,
        session: &mut dyn BrowserSession,
        page: &RenderedPage,
        scope: &RuleScope,
        stats: &CrawlStats,
    ) -> PageAuditResult {
        let source_url = page.final_url.to_string();

        let findings = match self.evaluator.evaluate(page, scope).await {
            Ok(mut findings) => {
                let extra = {
                    let reported: HashSet<&str> =
                        findings.iter().map(|f| f.rule_id.as_str()).collect();
                    run_heuristics(&page.html, &reported)
                };
                findings.extend(extra);
                findings
            }
            Err(e) => {
                warn!(error = %e, "rule evaluation failed");
                vec![scan_error(&e)]
            }
        };

        let violations: Vec<Violation> = findings
            .into_iter()
            .map(|f| {
                let violation = into_violation(f, &source_url);
                let metrics = self.scorer.score(&violation, stats);
                violation.with_confidence(metrics.score)
            })
            .collect();

        let screenshot_ref = match session.screenshot(page).await {
            Ok(reference) => Some(reference),
            Err(e) => {
                warn!(error = %e, "evidence capture failed");
                None
            }
        };

        debug!(violations = violations.len(), "page audited");

        PageAuditResult {
            url: source_url,
            title: page.title.clone(),
            audited_at: Utc::now(),
            violations,
            screenshot_ref,
        }
    }
}

fn into_violation(finding: RawFinding, source_url: &str) -> Violation {
    Violation {
        rule_id: finding.rule_id,
        impact: finding.impact,
        standard_tags: finding.tags.into_iter().collect(),
        description: finding.description,
        help: finding.help,
        help_url: finding.help_url,
        source_url: source_url.to_string(),
        nodes: finding.nodes,
        confidence: None,
    }
}

fn scan_error(err: &A11yScanError) -> RawFinding {
    RawFinding {
        rule_id: SCAN_ERROR_RULE.to_string(),
        impact: Impact::Critical,
        tags: Vec::new(),
        description: "Accessibility rules could not be evaluated on this page".into(),
        help: err.to_string(),
        help_url: String::new(),
        nodes: Vec::new(),
    }
}
