//! Built-in rule evaluator.
//!
//! A tag-filtered subset of the common axe-core rules, evaluated on the
//! served DOM. Rule ids and tags follow the axe vocabulary so results are
//! interchangeable with an external evaluator.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use a11yscan_browser::RenderedPage;
use a11yscan_shared::{A11yScanError, Impact, Result, ViolationNode};

use crate::dom::{has_aria_name, is_hidden, node_for, text_of};
use crate::evaluator::{RawFinding, RuleEvaluator};
use crate::standards::RuleScope;

/// Base URL of the per-rule documentation.
const HELP_BASE: &str = "https://dequeuniversity.com/rules/axe/4.10";

/// Input types that never need a visible label.
const UNLABELLED_INPUT_TYPES: &[&str] = &["hidden", "submit", "button", "reset", "image"];

struct Rule {
    id: &'static str,
    impact: Impact,
    tags: &'static [&'static str],
    description: &'static str,
    help: &'static str,
    check: fn(&Html) -> Vec<ViolationNode>,
}

const RULES: &[Rule] = &[
    Rule {
        id: "image-alt",
        impact: Impact::Critical,
        tags: &["wcag2a", "wcag111", "section508"],
        description: "Ensures <img> elements have alternate text or a role of none or presentation",
        help: "Images must have alternate text",
        check: check_image_alt,
    },
    Rule {
        id: "button-name",
        impact: Impact::Critical,
        tags: &["wcag2a", "wcag412", "section508"],
        description: "Ensures buttons have discernible text",
        help: "Buttons must have discernible text",
        check: check_button_name,
    },
    Rule {
        id: "label",
        impact: Impact::Critical,
        tags: &["wcag2a", "wcag131", "wcag412", "section508"],
        description: "Ensures every form element has a label",
        help: "Form elements must have labels",
        check: check_label,
    },
    Rule {
        id: "link-name",
        impact: Impact::Serious,
        tags: &["wcag2a", "wcag244", "wcag412", "section508"],
        description: "Ensures links have discernible text",
        help: "Links must have discernible text",
        check: check_link_name,
    },
    Rule {
        id: "document-title",
        impact: Impact::Serious,
        tags: &["wcag2a", "wcag242"],
        description: "Ensures each HTML document contains a non-empty <title> element",
        help: "Documents must have <title> element to aid in navigation",
        check: check_document_title,
    },
    Rule {
        id: "meta-viewport",
        impact: Impact::Critical,
        tags: &["wcag2aa", "wcag144"],
        description: "Ensures <meta name=\"viewport\"> does not disable text scaling and zooming",
        help: "Zooming and scaling must not be disabled",
        check: check_meta_viewport,
    },
    Rule {
        id: "duplicate-id",
        impact: Impact::Minor,
        tags: &["wcag2a", "wcag411"],
        description: "Ensures every id attribute value is unique",
        help: "id attribute value must be unique",
        check: check_duplicate_id,
    },
    Rule {
        id: "empty-heading",
        impact: Impact::Minor,
        tags: &["best-practice"],
        description: "Ensures headings have discernible text",
        help: "Headings should not be empty",
        check: check_empty_heading,
    },
];

/// Evaluates the built-in rule set against the served DOM.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticRuleEvaluator;

impl StaticRuleEvaluator {
    /// Rule ids in evaluation order.
    pub fn rule_ids() -> impl Iterator<Item = &'static str> {
        RULES.iter().map(|r| r.id)
    }

    fn run(&self, html: &str, scope: &RuleScope) -> Vec<RawFinding> {
        let doc = Html::parse_document(html);
        let mut findings = Vec::new();

        for rule in RULES.iter().filter(|r| scope.includes_any(r.tags)) {
            let nodes = (rule.check)(&doc);
            if nodes.is_empty() {
                continue;
            }
            debug!(rule = rule.id, nodes = nodes.len(), "rule violated");
            findings.push(RawFinding {
                rule_id: rule.id.to_string(),
                impact: rule.impact,
                tags: rule.tags.iter().map(|t| t.to_string()).collect(),
                description: rule.description.to_string(),
                help: rule.help.to_string(),
                help_url: format!("{HELP_BASE}/{}", rule.id),
                nodes,
            });
        }

        findings
    }
}

#[async_trait]
impl RuleEvaluator for StaticRuleEvaluator {
    async fn evaluate(&self, page: &RenderedPage, scope: &RuleScope) -> Result<Vec<RawFinding>> {
        if page.html.trim().is_empty() {
            return Err(A11yScanError::RuleEvaluation(format!(
                "{} returned an empty document",
                page.final_url
            )));
        }
        Ok(self.run(&page.html, scope))
    }

    fn name(&self) -> &str {
        "static"
    }
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

fn selector(s: &str) -> Selector {
    Selector::parse(s).expect("static selector")
}

fn check_image_alt(doc: &Html) -> Vec<ViolationNode> {
    doc.select(&selector("img"))
        .filter(|el| el.value().attr("alt").is_none() && !is_hidden(*el))
        .map(|el| {
            node_for(
                el,
                "Element does not have an alt attribute and is not marked decorative",
            )
        })
        .collect()
}

/// Non-empty alt text on a descendant image counts as a name.
fn has_named_image(el: ElementRef<'_>) -> bool {
    el.select(&selector("img[alt]"))
        .any(|img| img.value().attr("alt").is_some_and(|a| !a.trim().is_empty()))
}

fn check_button_name(doc: &Html) -> Vec<ViolationNode> {
    let button_sel = selector(r#"button, [role="button"], input[type="button"]"#);
    doc.select(&button_sel)
        .filter(|el| !is_hidden(*el))
        .filter(|el| {
            let value_label = el
                .value()
                .attr("value")
                .is_some_and(|v| !v.trim().is_empty());
            text_of(*el).is_empty() && !has_aria_name(*el) && !has_named_image(*el) && !value_label
        })
        .map(|el| node_for(el, "Element does not have inner text that is visible to screen readers"))
        .collect()
}

fn check_label(doc: &Html) -> Vec<ViolationNode> {
    let labelled_ids: HashSet<&str> = doc
        .select(&selector("label[for]"))
        .filter_map(|l| l.value().attr("for"))
        .collect();

    doc.select(&selector("input, select, textarea"))
        .filter(|el| {
            let input_type = el.value().attr("type").unwrap_or("text");
            !UNLABELLED_INPUT_TYPES.contains(&input_type.to_ascii_lowercase().as_str())
        })
        .filter(|el| !is_hidden(*el))
        .filter(|el| {
            let by_for = el
                .value()
                .id()
                .is_some_and(|id| labelled_ids.contains(id));
            let wrapped = el.ancestors().any(|n| {
                n.value()
                    .as_element()
                    .is_some_and(|e| e.name() == "label")
            });
            !by_for && !wrapped && !has_aria_name(*el)
        })
        .map(|el| node_for(el, "Form element does not have an implicit (wrapped) or explicit <label>"))
        .collect()
}

fn check_link_name(doc: &Html) -> Vec<ViolationNode> {
    doc.select(&selector("a[href]"))
        .filter(|el| !is_hidden(*el))
        .filter(|el| text_of(*el).is_empty() && !has_aria_name(*el) && !has_named_image(*el))
        .map(|el| node_for(el, "Element is in tab order and does not have accessible text"))
        .collect()
}

fn check_document_title(doc: &Html) -> Vec<ViolationNode> {
    let has_title = doc
        .select(&selector("title"))
        .any(|t| !text_of(t).is_empty());
    if has_title {
        return Vec::new();
    }
    vec![ViolationNode {
        selector: Some("html".into()),
        html_snippet: None,
        failure_summary: "Document does not have a non-empty <title> element".into(),
    }]
}

fn check_meta_viewport(doc: &Html) -> Vec<ViolationNode> {
    doc.select(&selector(r#"meta[name="viewport"]"#))
        .filter_map(|el| {
            let content = el.value().attr("content")?;
            let blocks_zoom = content.split([',', ';']).any(|pair| {
                let mut kv = pair.splitn(2, '=');
                let key = kv.next().unwrap_or("").trim().to_ascii_lowercase();
                let value = kv.next().unwrap_or("").trim().to_ascii_lowercase();
                match key.as_str() {
                    "user-scalable" => value == "no" || value == "0",
                    "maximum-scale" => value.parse::<f64>().is_ok_and(|v| v < 2.0),
                    _ => false,
                }
            });
            blocks_zoom.then(|| node_for(el, "<meta> tag disables zooming on mobile devices"))
        })
        .collect()
}

fn check_duplicate_id(doc: &Html) -> Vec<ViolationNode> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut nodes = Vec::new();

    for el in doc.select(&selector("[id]")) {
        let Some(id) = el.value().id() else { continue };
        if id.trim().is_empty() {
            continue;
        }
        let count = seen.entry(id).or_insert(0);
        *count += 1;
        if *count > 1 {
            nodes.push(node_for(
                el,
                format!("Document has multiple elements with id=\"{id}\""),
            ));
        }
    }

    nodes
}

fn check_empty_heading(doc: &Html) -> Vec<ViolationNode> {
    doc.select(&selector("h1, h2, h3, h4, h5, h6"))
        .filter(|el| !is_hidden(*el))
        .filter(|el| text_of(*el).is_empty() && !has_aria_name(*el) && !has_named_image(*el))
        .map(|el| node_for(el, "Heading element is empty"))
        .collect()
}
