//! Per-violation confidence scoring.

use std::collections::HashSet;

use serde::Serialize;

use a11yscan_shared::{ConfidenceConfig, Violation};

const SPECIFICITY_FULL: f64 = 0.95;
const SPECIFICITY_SELECTOR_ONLY: f64 = 0.85;
const SPECIFICITY_NONE: f64 = 0.7;

const DYNAMIC_PAGE: f64 = 0.75;
const STATIC_PAGE: f64 = 0.9;

const RELIABLE_RULE: f64 = 0.95;
const OTHER_RULE: f64 = 0.85;

const SAMPLE_BASE: f64 = 0.6;
const SAMPLE_STEP: f64 = 0.05;
const SAMPLE_CAP: f64 = 0.95;

/// Crawl-level facts the scorer needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStats {
    /// Pages audited so far, including the current one.
    pub pages_scanned: usize,
    /// Whether the current page is script-rendered.
    pub dynamic_content: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceFactors {
    pub specificity: f64,
    pub dynamic_content: f64,
    pub rule_reliability: f64,
    pub sample_size: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceMetrics {
    pub score: f64,
    pub factors: ConfidenceFactors,
}

/// Weighted four-factor estimate of true-positive likelihood.
#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    weights: [f64; 4],
    reliable_criteria: HashSet<String>,
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self::new(&ConfidenceConfig::default())
    }
}

impl ConfidenceScorer {
    pub fn new(config: &ConfidenceConfig) -> Self {
        Self {
            weights: [
                config.specificity_weight,
                config.dynamic_content_weight,
                config.rule_reliability_weight,
                config.sample_size_weight,
            ],
            reliable_criteria: config.reliable_criteria.iter().cloned().collect(),
        }
    }

    /// Confidence that `violation` is a real, user-facing defect.
    pub fn score(&self, violation: &Violation, stats: &CrawlStats) -> ConfidenceMetrics {
        let factors = ConfidenceFactors {
            specificity: specificity(violation),
            dynamic_content: if stats.dynamic_content {
                DYNAMIC_PAGE
            } else {
                STATIC_PAGE
            },
            rule_reliability: self.rule_reliability(violation),
            sample_size: (SAMPLE_BASE + SAMPLE_STEP * stats.pages_scanned as f64).min(SAMPLE_CAP),
        };

        let values = [
            factors.specificity,
            factors.dynamic_content,
            factors.rule_reliability,
            factors.sample_size,
        ];
        let weight_sum: f64 = self.weights.iter().map(|w| w.max(0.0)).sum();
        let score = if weight_sum > 0.0 {
            values
                .iter()
                .zip(self.weights)
                .map(|(v, w)| v * w.max(0.0))
                .sum::<f64>()
                / weight_sum
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        };

        ConfidenceMetrics {
            score: score.clamp(0.0, 1.0),
            factors,
        }
    }

    fn rule_reliability(&self, violation: &Violation) -> f64 {
        let reliable = violation
            .wcag_criteria()
            .iter()
            .any(|c| self.reliable_criteria.contains(c));
        if reliable { RELIABLE_RULE } else { OTHER_RULE }
    }
}

/// How precisely the offending element is located.
fn specificity(violation: &Violation) -> f64 {
    if violation
        .nodes
        .iter()
        .any(|n| n.selector.is_some() && n.html_snippet.is_some())
    {
        SPECIFICITY_FULL
    } else if violation.nodes.iter().any(|n| n.selector.is_some()) {
        SPECIFICITY_SELECTOR_ONLY
    } else {
        SPECIFICITY_NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use a11yscan_shared::{Impact, ViolationNode};

    fn violation(tags: &[&str], nodes: Vec<ViolationNode>) -> Violation {
        Violation {
            rule_id: "image-alt".into(),
            impact: Impact::Critical,
            standard_tags: tags.iter().map(|t| t.to_string()).collect(),
            description: String::new(),
            help: String::new(),
            help_url: String::new(),
            source_url: "https://example.com/".into(),
            nodes,
            confidence: None,
        }
    }

    fn node(selector: Option<&str>, snippet: Option<&str>) -> ViolationNode {
        ViolationNode {
            selector: selector.map(String::from),
            html_snippet: snippet.map(String::from),
            failure_summary: String::new(),
        }
    }

    #[test]
    fn factors_for_a_precise_reliable_finding() {
        let v = violation(&["wcag2a", "wcag111"], vec![node(Some("img"), Some("<img>"))]);
        let metrics = ConfidenceScorer::default().score(
            &v,
            &CrawlStats {
                pages_scanned: 1,
                dynamic_content: false,
            },
        );
        assert_eq!(metrics.factors.specificity, 0.95);
        assert_eq!(metrics.factors.dynamic_content, 0.9);
        assert_eq!(metrics.factors.rule_reliability, 0.95);
        assert!((metrics.factors.sample_size - 0.65).abs() < 1e-9);

        let expected = 0.30 * 0.95 + 0.25 * 0.9 + 0.25 * 0.95 + 0.20 * 0.65;
        assert!((metrics.score - expected).abs() < 1e-9);
    }

    #[test]
    fn weaker_evidence_lowers_the_score() {
        let scorer = ConfidenceScorer::default();
        let stats = CrawlStats {
            pages_scanned: 1,
            dynamic_content: true,
        };
        let strong = scorer.score(
            &violation(&["wcag111"], vec![node(Some("img"), Some("<img>"))]),
            &stats,
        );
        let weak = scorer.score(&violation(&["wcag412"], vec![]), &stats);
        assert_eq!(weak.factors.specificity, 0.7);
        assert_eq!(weak.factors.rule_reliability, 0.85);
        assert!(weak.score < strong.score);

        let selector_only = scorer.score(&violation(&[], vec![node(Some("a"), None)]), &stats);
        assert_eq!(selector_only.factors.specificity, 0.85);
    }

    #[test]
    fn sample_size_is_capped() {
        let metrics = ConfidenceScorer::default().score(
            &violation(&[], vec![]),
            &CrawlStats {
                pages_scanned: 10_000,
                dynamic_content: false,
            },
        );
        assert_eq!(metrics.factors.sample_size, 0.95);
    }

    #[test]
    fn score_stays_in_range_for_odd_weights() {
        let config = ConfidenceConfig {
            specificity_weight: 5.0,
            dynamic_content_weight: 0.0,
            rule_reliability_weight: 3.0,
            sample_size_weight: 2.0,
            ..ConfidenceConfig::default()
        };
        let v = violation(&["wcag111"], vec![node(Some("img"), Some("<img>"))]);
        for pages in [0, 1, 1_000_000] {
            let m = ConfidenceScorer::new(&config).score(
                &v,
                &CrawlStats {
                    pages_scanned: pages,
                    dynamic_content: true,
                },
            );
            assert!((0.0..=1.0).contains(&m.score));
        }

        let zero = ConfidenceConfig {
            specificity_weight: 0.0,
            dynamic_content_weight: 0.0,
            rule_reliability_weight: 0.0,
            sample_size_weight: 0.0,
            ..ConfidenceConfig::default()
        };
        let m = ConfidenceScorer::new(&zero).score(&v, &CrawlStats::default());
        assert!((0.0..=1.0).contains(&m.score));
    }
}
