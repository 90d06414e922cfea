//! Bounded, host-scoped crawl orchestrator.
//!
//! The crawler walks the seed's host breadth-first, auditing each page as it
//! is rendered. Traversal is sequential within a job; parallelism happens
//! across jobs in the queue.

use std::sync::Arc;
use std::time::Duration;

use scraper::{Html, Selector};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use a11yscan_audit::{CrawlStats, PageAuditor, RuleScope};
use a11yscan_browser::{Browser, BrowserSession};
use a11yscan_shared::{A11yScanError, CrawlConfig, PageAuditResult, Result, ScanLimits};

use crate::context::{CrawlContext, canonicalize};

/// Progress reported once the session is open.
pub const PROGRESS_CRAWL_START: u8 = 10;
/// Upper bound on progress reported by the crawl itself.
pub const PROGRESS_CRAWL_END: u8 = 90;

/// Link schemes that never lead to a page.
const IGNORED_LINK_PREFIXES: &[&str] = &["#", "javascript:", "mailto:", "tel:", "data:"];

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Receives crawl progress as a percentage.
pub trait ProgressSink: Send + Sync {
    fn report(&self, percent: u8);
}

/// A no-op progress sink.
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn report(&self, _percent: u8) {}
}

/// `10 + 80 × audited / max_pages`, capped at 90.
pub fn crawl_progress(audited: usize, max_pages: usize) -> u8 {
    let span = u64::from(PROGRESS_CRAWL_END - PROGRESS_CRAWL_START);
    let step = span * audited as u64 / max_pages.max(1) as u64;
    (u64::from(PROGRESS_CRAWL_START) + step).min(u64::from(PROGRESS_CRAWL_END)) as u8
}

// ---------------------------------------------------------------------------
// Crawler
// ---------------------------------------------------------------------------

/// Sequential, host-scoped crawler that audits every page it renders.
pub struct Crawler {
    browser: Arc<dyn Browser>,
    auditor: PageAuditor,
    config: CrawlConfig,
}

impl Crawler {
    /// Crawl through sessions opened on `browser`, auditing pages with `auditor`.
    pub fn new(browser: Arc<dyn Browser>, auditor: PageAuditor, config: CrawlConfig) -> Self {
        Self {
            browser,
            auditor,
            config,
        }
    }

    /// Crawl from `target` within `limits`, auditing each page against `scope`.
    ///
    /// Pages that fail to render are skipped. Returns `NoPagesAudited` when
    /// not a single page could be audited, and `Cancelled` if `cancel` fires.
    #[instrument(skip_all, fields(target = %target, max_depth = limits.max_depth, max_pages = limits.max_pages))]
    pub async fn crawl(
        &self,
        target: &Url,
        limits: ScanLimits,
        scope: &RuleScope,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<PageAuditResult>> {
        let mut ctx = CrawlContext::new(target, limits, &self.config.exclude_patterns)?;

        let mut session = self.browser.open_session().await?;
        let outcome = self
            .traverse(session.as_mut(), &mut ctx, scope, progress, cancel)
            .await;

        if let Err(e) = session.close().await {
            warn!(error = %e, "failed to close browser session");
        }

        let results = outcome?;
        if results.is_empty() {
            return Err(A11yScanError::NoPagesAudited(target.to_string()));
        }

        info!(
            pages = results.len(),
            visited = ctx.visited_count(),
            "crawl completed"
        );
        Ok(results)
    }

    async fn traverse(
        &self,
        session: &mut dyn BrowserSession,
        ctx: &mut CrawlContext,
        scope: &RuleScope,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<PageAuditResult>> {
        let limits = ctx.limits();
        let mut results = Vec::new();

        progress.report(PROGRESS_CRAWL_START);

        while let Some((url, depth)) = ctx.pop() {
            if cancel.is_cancelled() {
                info!(audited = results.len(), "crawl cancelled");
                return Err(A11yScanError::Cancelled);
            }
            if !ctx.admit(&url, depth) {
                debug!(%url, depth, "skipping");
                continue;
            }

            if self.config.rate_limit_ms > 0 && !results.is_empty() {
                tokio::time::sleep(Duration::from_millis(self.config.rate_limit_ms)).await;
            }

            let navigation =
                tokio::time::timeout(self.config.navigation_timeout, session.navigate(&url));
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                outcome = navigation => Some(outcome),
            };
            let Some(outcome) = outcome else {
                info!(audited = results.len(), "crawl cancelled");
                return Err(A11yScanError::Cancelled);
            };

            let page = match outcome {
                Ok(Ok(page)) => page,
                Ok(Err(e)) => {
                    warn!(%url, depth, error = %e, "page failed to render, skipping");
                    continue;
                }
                Err(_) => {
                    warn!(
                        %url,
                        depth,
                        timeout_secs = self.config.navigation_timeout.as_secs(),
                        "navigation timed out, skipping"
                    );
                    continue;
                }
            };

            if !ctx.settle_redirect(&url, &page.final_url) {
                debug!(
                    %url,
                    final_url = %page.final_url,
                    "redirected to a visited or off-scope page, skipping"
                );
                continue;
            }

            let stats = CrawlStats {
                pages_scanned: results.len() + 1,
                dynamic_content: page.dynamic_content,
            };
            let audit = self.auditor.audit(session, &page, scope, &stats).await;
            debug!(%url, depth, violations = audit.violations.len(), "page audited");

            if depth < limits.max_depth && ctx.has_capacity() {
                for link in extract_links(&page.html, &page.final_url) {
                    ctx.enqueue(link, depth + 1);
                }
            }

            results.push(audit);
            progress.report(crawl_progress(results.len(), limits.max_pages));
        }

        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Link extraction
// ---------------------------------------------------------------------------

/// Extract canonical http(s) links from `html`, resolved against `base_url`.
pub fn extract_links(html: &str, base_url: &Url) -> Vec<Url> {
    let doc = Html::parse_document(html);
    let link_sel = Selector::parse("a[href]").expect("static selector");

    doc.select(&link_sel)
        .filter_map(|el| el.value().attr("href"))
        .map(str::trim)
        .filter(|href| {
            !href.is_empty()
                && !IGNORED_LINK_PREFIXES
                    .iter()
                    .any(|p| href.to_ascii_lowercase().starts_with(p))
        })
        .filter_map(|href| base_url.join(href).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .map(|url| canonicalize(&url))
        .collect()
}
