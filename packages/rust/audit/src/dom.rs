//! DOM helpers shared by the built-in rules and heuristics.

use scraper::ElementRef;

use a11yscan_shared::ViolationNode;

/// Maximum length of an HTML snippet attached to a violation node.
const MAX_SNIPPET_CHARS: usize = 250;

/// Maximum number of ancestor segments in a derived selector.
const MAX_SELECTOR_DEPTH: usize = 4;

/// Build a [`ViolationNode`] for an offending element.
pub(crate) fn node_for(el: ElementRef<'_>, failure_summary: impl Into<String>) -> ViolationNode {
    ViolationNode {
        selector: Some(selector_for(el)),
        html_snippet: Some(snippet(&el.html())),
        failure_summary: failure_summary.into(),
    }
}

/// Derive a CSS selector for `el`, anchored at the nearest ancestor with an id.
pub(crate) fn selector_for(el: ElementRef<'_>) -> String {
    let mut segments = Vec::new();
    let mut current = Some(el);

    while let Some(node) = current {
        let value = node.value();
        if let Some(id) = value.id() {
            segments.push(format!("{}#{id}", value.name()));
            break;
        }
        segments.push(segment_for(node));
        if segments.len() >= MAX_SELECTOR_DEPTH {
            break;
        }
        current = node.parent().and_then(ElementRef::wrap);
    }

    segments.reverse();
    segments.join(" > ")
}

/// `tag` or `tag:nth-of-type(n)` when same-tag siblings exist.
fn segment_for(el: ElementRef<'_>) -> String {
    let name = el.value().name();
    let same_tag = |sibling: &ElementRef<'_>| sibling.value().name() == name;

    let before = el
        .prev_siblings()
        .filter_map(ElementRef::wrap)
        .filter(same_tag)
        .count();
    let after = el
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .filter(same_tag)
        .count();

    if before + after == 0 {
        name.to_string()
    } else {
        format!("{name}:nth-of-type({})", before + 1)
    }
}

/// Truncate `html` on a character boundary.
pub(crate) fn snippet(html: &str) -> String {
    let collapsed = html.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX_SNIPPET_CHARS {
        return collapsed;
    }
    let mut out: String = collapsed.chars().take(MAX_SNIPPET_CHARS).collect();
    out.push('…');
    out
}

/// Visible text content, whitespace-collapsed.
pub(crate) fn text_of(el: ElementRef<'_>) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether the element carries an explicit accessible name via ARIA or `title`.
pub(crate) fn has_aria_name(el: ElementRef<'_>) -> bool {
    let value = el.value();
    ["aria-label", "aria-labelledby", "title"]
        .iter()
        .any(|attr| value.attr(attr).is_some_and(|v| !v.trim().is_empty()))
}

/// Whether the element is hidden from assistive technology.
pub(crate) fn is_hidden(el: ElementRef<'_>) -> bool {
    let value = el.value();
    value.attr("aria-hidden") == Some("true")
        || value.attr("hidden").is_some()
        || matches!(value.attr("role"), Some("presentation") | Some("none"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::{Html, Selector};

    fn first<'a>(doc: &'a Html, sel: &str) -> ElementRef<'a> {
        doc.select(&Selector::parse(sel).unwrap()).next().unwrap()
    }

    #[test]
    fn selector_anchors_on_id() {
        let doc = Html::parse_document(
            r#"<html><body><main id="content"><p>a</p><p><img src="x.png"></p></main></body></html>"#,
        );
        let img = first(&doc, "img");
        assert_eq!(selector_for(img), "main#content > p:nth-of-type(2) > img");
    }

    #[test]
    fn selector_is_depth_bounded() {
        let doc = Html::parse_document(
            "<html><body><div><div><div><div><span>x</span></div></div></div></div></body></html>",
        );
        let span = first(&doc, "span");
        assert_eq!(selector_for(span).split(" > ").count(), MAX_SELECTOR_DEPTH);
    }

    #[test]
    fn snippet_truncates() {
        let long = format!("<p>{}</p>", "a".repeat(400));
        let s = snippet(&long);
        assert!(s.ends_with('…'));
        assert_eq!(s.chars().count(), MAX_SNIPPET_CHARS + 1);
    }
}
