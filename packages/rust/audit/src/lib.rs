//! Page-level accessibility auditing for a11yscan.
//!
//! Maps requested standards to rule tags, evaluates rules on a rendered
//! page, adds structural heuristics, and scores each finding's confidence.

pub mod auditor;
pub mod confidence;
mod dom;
pub mod evaluator;
mod heuristics;
pub mod rules;
pub mod standards;

pub use auditor::{PageAuditor, SCAN_ERROR_RULE};
pub use confidence::{ConfidenceFactors, ConfidenceMetrics, ConfidenceScorer, CrawlStats};
pub use evaluator::{RawFinding, RuleEvaluator};
pub use rules::StaticRuleEvaluator;
pub use standards::RuleScope;
