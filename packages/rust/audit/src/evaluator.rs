//! Accessibility rule evaluator interface.

use async_trait::async_trait;

use a11yscan_browser::RenderedPage;
use a11yscan_shared::{Impact, Result, ViolationNode};

use crate::standards::RuleScope;

/// A finding before normalization into a [`a11yscan_shared::Violation`].
#[derive(Debug, Clone)]
pub struct RawFinding {
    pub rule_id: String,
    pub impact: Impact,
    pub tags: Vec<String>,
    pub description: String,
    pub help: String,
    pub help_url: String,
    pub nodes: Vec<ViolationNode>,
}

/// Evaluates a rendered page against the rules selected by a [`RuleScope`].
#[async_trait]
pub trait RuleEvaluator: Send + Sync {
    /// Return raw rule violations. An `Err` means the page could not be evaluated.
    async fn evaluate(&self, page: &RenderedPage, scope: &RuleScope) -> Result<Vec<RawFinding>>;

    /// Human-readable evaluator name for tracing.
    fn name(&self) -> &str;
}
