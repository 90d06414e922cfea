//! Structural checks run on every page in addition to rule evaluation.

use std::collections::HashSet;

use scraper::{Html, Selector};

use a11yscan_shared::{Impact, ViolationNode};

use crate::dom::{node_for, text_of};
use crate::evaluator::RawFinding;

const UNDERSTANDING_BASE: &str = "https://www.w3.org/WAI/WCAG21/Understanding";

/// Skip-link text fragments, matched case-insensitively.
const SKIP_LINK_PHRASES: &[&str] = &["skip", "jump to", "main content"];

struct Heuristic {
    id: &'static str,
    /// Evaluator rule that covers the same problem.
    equivalent_rule: &'static str,
    impact: Impact,
    tags: &'static [&'static str],
    description: &'static str,
    help: &'static str,
    help_url: &'static str,
    check: fn(&Html) -> Option<ViolationNode>,
}

const HEURISTICS: &[Heuristic] = &[
    Heuristic {
        id: "html-lang-missing",
        equivalent_rule: "html-has-lang",
        impact: Impact::Serious,
        tags: &["wcag2a", "wcag311"],
        description: "The <html> element has no lang attribute",
        help: "Declare the page language with <html lang=\"...\">",
        help_url: "language-of-page",
        check: missing_lang,
    },
    Heuristic {
        id: "meta-viewport-missing",
        equivalent_rule: "meta-viewport",
        impact: Impact::Moderate,
        tags: &["best-practice"],
        description: "The document has no <meta name=\"viewport\"> element",
        help: "Add a viewport meta tag so content reflows on small screens",
        help_url: "reflow",
        check: missing_viewport,
    },
    Heuristic {
        id: "skip-link-missing",
        equivalent_rule: "bypass",
        impact: Impact::Moderate,
        tags: &["wcag2a", "wcag241"],
        description: "No in-page link lets keyboard users bypass repeated content",
        help: "Provide a skip link to the main content",
        help_url: "bypass-blocks",
        check: missing_skip_link,
    },
];

/// Run all heuristics on `html`, dropping those whose equivalent rule the
/// evaluator already reported.
pub(crate) fn run_heuristics(html: &str, reported: &HashSet<&str>) -> Vec<RawFinding> {
    let doc = Html::parse_document(html);

    HEURISTICS
        .iter()
        .filter(|h| !reported.contains(h.equivalent_rule) && !reported.contains(h.id))
        .filter_map(|h| {
            let node = (h.check)(&doc)?;
            Some(RawFinding {
                rule_id: h.id.to_string(),
                impact: h.impact,
                tags: h.tags.iter().map(|t| t.to_string()).collect(),
                description: h.description.to_string(),
                help: h.help.to_string(),
                help_url: format!("{UNDERSTANDING_BASE}/{}", h.help_url),
                nodes: vec![node],
            })
        })
        .collect()
}

fn selector(s: &str) -> Selector {
    Selector::parse(s).expect("static selector")
}

fn missing_lang(doc: &Html) -> Option<ViolationNode> {
    let root = doc.root_element();
    let has_lang = root
        .value()
        .attr("lang")
        .or_else(|| root.value().attr("xml:lang"))
        .is_some_and(|l| !l.trim().is_empty());

    (!has_lang).then(|| ViolationNode {
        selector: Some("html".into()),
        html_snippet: None,
        failure_summary: "The <html> element does not have a lang attribute".into(),
    })
}

fn missing_viewport(doc: &Html) -> Option<ViolationNode> {
    if doc.select(&selector(r#"meta[name="viewport"]"#)).next().is_some() {
        return None;
    }
    Some(ViolationNode {
        selector: Some("head".into()),
        html_snippet: None,
        failure_summary: "No viewport meta tag found".into(),
    })
}

fn missing_skip_link(doc: &Html) -> Option<ViolationNode> {
    let has_skip = doc.select(&selector(r##"a[href^="#"]"##)).any(|a| {
        let href = a.value().attr("href").unwrap_or("#");
        if href.len() < 2 {
            return false;
        }
        let label = format!(
            "{} {}",
            text_of(a),
            a.value().attr("aria-label").unwrap_or_default()
        )
        .to_lowercase();
        SKIP_LINK_PHRASES.iter().any(|p| label.contains(p))
    });
    if has_skip {
        return None;
    }

    let first_link = doc.select(&selector("body a[href]")).next();
    Some(match first_link {
        Some(link) => node_for(link, "First link on the page is not a skip link"),
        None => ViolationNode {
            selector: Some("body".into()),
            html_snippet: None,
            failure_summary: "Page has no skip link to its main content".into(),
        },
    })
}
