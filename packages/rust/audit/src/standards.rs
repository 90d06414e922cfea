//! Mapping from requested standards to the rule-tag vocabulary.

use std::collections::BTreeSet;

use a11yscan_shared::{Standard, WcagLevel};

/// The set of rule tags evaluated for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleScope {
    tags: BTreeSet<String>,
}

impl RuleScope {
    /// Derive tags for `standards` at conformance target `level`.
    ///
    /// Later WCAG versions include the tags of earlier ones, since 2.1 and
    /// 2.2 are supersets of 2.0.
    pub fn new(standards: &BTreeSet<Standard>, level: WcagLevel) -> Self {
        let mut tags = BTreeSet::new();

        for standard in standards {
            match standard {
                Standard::Wcag20 => push_wcag(&mut tags, "wcag2", level),
                Standard::Wcag21 => {
                    push_wcag(&mut tags, "wcag2", level);
                    push_wcag(&mut tags, "wcag21", level);
                }
                Standard::Wcag22 => {
                    push_wcag(&mut tags, "wcag2", level);
                    push_wcag(&mut tags, "wcag21", level);
                    push_wcag(&mut tags, "wcag22", level);
                }
                Standard::Section508 => {
                    tags.insert("section508".to_string());
                }
                Standard::BestPractice => {
                    tags.insert("best-practice".to_string());
                }
            }
        }

        Self { tags }
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Whether any of `rule_tags` is requested.
    pub fn includes_any(&self, rule_tags: &[&str]) -> bool {
        rule_tags.iter().any(|t| self.tags.contains(*t))
    }
}

fn push_wcag(tags: &mut BTreeSet<String>, prefix: &str, level: WcagLevel) {
    tags.insert(format!("{prefix}a"));
    if level >= WcagLevel::AA {
        tags.insert(format!("{prefix}aa"));
    }
    if level >= WcagLevel::AAA {
        tags.insert(format!("{prefix}aaa"));
    }
}
