//! Per-crawl traversal state: frontier, visited set and host scope.

use std::collections::{HashSet, VecDeque};

use regex::Regex;
use tracing::warn;
use url::Url;

use a11yscan_shared::{A11yScanError, Result, ScanLimits};

/// Frontier and visited set for one job's crawl.
///
/// Holds `|visited| <= max_pages`, and every visited URL is canonical and
/// on the seed's host.
#[derive(Debug)]
pub struct CrawlContext {
    base_host: String,
    limits: ScanLimits,
    frontier: VecDeque<(Url, u32)>,
    /// Canonical URLs currently in `frontier`.
    queued: HashSet<String>,
    visited: HashSet<String>,
    /// Requested URLs that redirected to a visited page.
    aliases: HashSet<String>,
    exclude_patterns: Vec<Regex>,
}

impl CrawlContext {
    /// Seed a context with `target` at depth 0.
    pub fn new(target: &Url, limits: ScanLimits, exclude_patterns: &[String]) -> Result<Self> {
        let base_host = target
            .host_str()
            .ok_or_else(|| A11yScanError::invalid_spec(format!("{target} has no host")))?
            .to_ascii_lowercase();

        let exclude_patterns = exclude_patterns
            .iter()
            .filter_map(|p| {
                let re = glob_to_regex(p);
                if re.is_none() {
                    warn!(pattern = %p, "ignoring invalid exclude pattern");
                }
                re
            })
            .collect();

        let seed = canonicalize(target);
        let queued = HashSet::from([seed.to_string()]);
        let frontier = VecDeque::from([(seed, 0)]);

        Ok(Self {
            base_host,
            limits,
            frontier,
            queued,
            visited: HashSet::new(),
            aliases: HashSet::new(),
            exclude_patterns,
        })
    }

    pub fn base_host(&self) -> &str {
        &self.base_host
    }

    pub fn limits(&self) -> ScanLimits {
        self.limits
    }

    /// Take the oldest frontier entry.
    pub fn pop(&mut self) -> Option<(Url, u32)> {
        let (url, depth) = self.frontier.pop_front()?;
        self.queued.remove(url.as_str());
        Some((url, depth))
    }

    /// Whether another page may still be visited.
    pub fn has_capacity(&self) -> bool {
        self.visited.len() < self.limits.max_pages
    }

    pub fn is_visited(&self, url: &Url) -> bool {
        self.is_known(canonicalize(url).as_str())
    }

    fn is_known(&self, canonical: &str) -> bool {
        self.visited.contains(canonical) || self.aliases.contains(canonical)
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    /// Same host as the seed and not excluded.
    pub fn in_scope(&self, url: &Url) -> bool {
        if !matches!(url.scheme(), "http" | "https") {
            return false;
        }
        let same_host = url
            .host_str()
            .is_some_and(|h| h.eq_ignore_ascii_case(&self.base_host));
        if !same_host {
            return false;
        }
        let path = url.path();
        !self.exclude_patterns.iter().any(|p| p.is_match(path))
    }

    /// Decide whether a popped entry gets visited, and mark it if so.
    pub fn admit(&mut self, url: &Url, depth: u32) -> bool {
        if depth > self.limits.max_depth || !self.has_capacity() || !self.in_scope(url) {
            return false;
        }
        let canonical = canonicalize(url).to_string();
        if self.aliases.contains(&canonical) {
            return false;
        }
        self.visited.insert(canonical)
    }

    /// Reconcile a navigation that ended on `landed` instead of `requested`.
    ///
    /// Returns `false` when the landing page is off-scope or already
    /// visited; the page must then not be audited. Otherwise `landed`
    /// replaces `requested` in the visited set.
    pub fn settle_redirect(&mut self, requested: &Url, landed: &Url) -> bool {
        let requested = canonicalize(requested);
        let landed = canonicalize(landed);
        if requested == landed {
            return true;
        }
        if !self.in_scope(&landed) || self.is_known(landed.as_str()) {
            return false;
        }
        self.visited.remove(requested.as_str());
        self.aliases.insert(requested.to_string());
        self.visited.insert(landed.to_string());
        true
    }

    /// Queue a discovered link at `depth` unless it is already known or off-scope.
    pub fn enqueue(&mut self, url: Url, depth: u32) {
        let url = canonicalize(&url);
        if depth > self.limits.max_depth
            || self.is_known(url.as_str())
            || self.queued.contains(url.as_str())
            || !self.in_scope(&url)
        {
            return;
        }
        self.queued.insert(url.to_string());
        self.frontier.push_back((url, depth));
    }
}

/// Canonical form used for deduplication: no fragment, no query, no
/// trailing slash except on the root path.
pub fn canonicalize(url: &Url) -> Url {
    let mut canonical = url.clone();
    canonical.set_fragment(None);
    canonical.set_query(None);

    let path = canonical.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/').to_string();
        let trimmed = if trimmed.is_empty() { "/".to_string() } else { trimmed };
        canonical.set_path(&trimmed);
    }
    canonical
}

/// Convert a glob-like path pattern to a regex.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let escaped = regex::escape(pattern)
        .replace(r"\*\*", ".*")
        .replace(r"\*", "[^/]*")
        .replace(r"\?", ".");
    Regex::new(&format!("^{escaped}$")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn limits(max_depth: u32, max_pages: usize) -> ScanLimits {
        ScanLimits {
            max_depth,
            max_pages,
        }
    }

    #[test]
    fn canonicalize_strips_fragment_query_and_slash() {
        let c = canonicalize(&url("https://Example.com/docs/?page=2#top"));
        assert_eq!(c.as_str(), "https://example.com/docs");

        let root = canonicalize(&url("https://example.com/?q=1"));
        assert_eq!(root.as_str(), "https://example.com/");
    }

    #[test]
    fn canonicalize_is_idempotent() {
        for raw in [
            "https://example.com/",
            "https://example.com/a/b/?x=1#y",
            "https://example.com//",
            "http://example.com:8080/path#frag",
        ] {
            let once = canonicalize(&url(raw));
            assert_eq!(canonicalize(&once), once, "{raw}");
        }
    }

    #[test]
    fn admit_enforces_limits_and_dedup() {
        let seed = url("https://example.com/");
        let mut ctx = CrawlContext::new(&seed, limits(1, 2), &[]).unwrap();

        let (popped, depth) = ctx.pop().unwrap();
        assert!(ctx.admit(&popped, depth));
        assert!(!ctx.admit(&url("https://example.com/#again"), 0));
        assert!(!ctx.admit(&url("https://example.com/deep"), 2));
        assert!(!ctx.admit(&url("https://other.com/"), 1));
        assert!(ctx.admit(&url("https://example.com/a"), 1));
        assert!(!ctx.admit(&url("https://example.com/b"), 1));
        assert_eq!(ctx.visited_count(), 2);
    }

    #[test]
    fn enqueue_skips_known_and_foreign_links() {
        let seed = url("https://example.com/");
        let mut ctx = CrawlContext::new(&seed, limits(2, 10), &["/private/**".into()]).unwrap();
        let (popped, depth) = ctx.pop().unwrap();
        ctx.admit(&popped, depth);

        ctx.enqueue(url("https://example.com/?ref=nav"), 1);
        ctx.enqueue(url("https://example.com/a"), 1);
        ctx.enqueue(url("https://example.com/a#section"), 1);
        ctx.enqueue(url("https://cdn.example.com/a"), 1);
        ctx.enqueue(url("https://example.com/private/keys"), 1);
        ctx.enqueue(url("https://example.com/b"), 3);

        assert_eq!(
            ctx.pop().map(|(u, d)| (u.to_string(), d)),
            Some(("https://example.com/a".to_string(), 1))
        );
        assert!(ctx.pop().is_none());
    }

    #[test]
    fn enqueue_keeps_one_entry_per_url() {
        let seed = url("https://example.com/");
        let mut ctx = CrawlContext::new(&seed, limits(2, 100), &[]).unwrap();
        ctx.enqueue(url("https://example.com/"), 1);
        for _ in 0..3 {
            ctx.enqueue(url("https://example.com/a?x=1"), 1);
            ctx.enqueue(url("https://example.com/b/"), 2);
        }

        let popped: Vec<String> = std::iter::from_fn(|| ctx.pop())
            .map(|(u, _)| u.to_string())
            .collect();
        assert_eq!(
            popped,
            vec![
                "https://example.com/",
                "https://example.com/a",
                "https://example.com/b",
            ]
        );

        // Popped but never admitted: a rediscovery may queue it again.
        ctx.enqueue(url("https://example.com/a"), 1);
        assert!(ctx.pop().is_some());
    }

    #[test]
    fn redirect_onto_visited_page_is_rejected() {
        let seed = url("https://example.com/");
        let mut ctx = CrawlContext::new(&seed, limits(2, 10), &[]).unwrap();
        let (root, depth) = ctx.pop().unwrap();
        assert!(ctx.admit(&root, depth));

        let home = url("https://example.com/home");
        assert!(ctx.admit(&home, 1));
        assert!(!ctx.settle_redirect(&home, &url("https://example.com/#top")));
        assert!(!ctx.settle_redirect(&home, &url("https://evil.example.net/")));
    }

    #[test]
    fn redirect_to_new_page_replaces_requested_url() {
        let seed = url("https://example.com/");
        let mut ctx = CrawlContext::new(&seed, limits(2, 10), &[]).unwrap();
        let (root, depth) = ctx.pop().unwrap();
        ctx.admit(&root, depth);

        let old = url("https://example.com/old");
        let new = url("https://example.com/new/");
        assert!(ctx.admit(&old, 1));
        assert!(ctx.settle_redirect(&old, &new));
        assert!(ctx.settle_redirect(&root, &url("https://example.com/?utm=x")));

        assert_eq!(ctx.visited_count(), 2);
        assert!(ctx.is_visited(&url("https://example.com/new")));
        assert!(ctx.is_visited(&old));
        assert!(!ctx.admit(&new, 1));
        assert!(!ctx.admit(&old, 1));

        ctx.enqueue(url("https://example.com/old"), 1);
        ctx.enqueue(url("https://example.com/new"), 1);
        assert!(ctx.pop().is_none());
    }

    #[test]
    fn exclude_globs() {
        let seed = url("https://example.com/");
        let ctx = CrawlContext::new(&seed, limits(1, 5), &["/blog/**".into()]).unwrap();
        assert!(!ctx.in_scope(&url("https://example.com/blog/post-1")));
        assert!(ctx.in_scope(&url("https://example.com/guide/intro")));
        assert!(!ctx.in_scope(&url("mailto:someone@example.com")));
    }

    #[test]
    fn seed_without_host_is_rejected() {
        let err = CrawlContext::new(&url("data:text/html,hi"), limits(0, 1), &[]).unwrap_err();
        assert!(matches!(err, A11yScanError::InvalidSpec { .. }));
    }
}
