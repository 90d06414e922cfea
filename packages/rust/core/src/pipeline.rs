//! End-to-end scan pipeline: URL → crawl + audit → aggregate → persist.
//!
//! [`ScanPipeline`] is the [`JobProcessor`] the queue runs for every attempt.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use url::Url;

use a11yscan_audit::{ConfidenceScorer, PageAuditor, RuleScope, StaticRuleEvaluator};
use a11yscan_browser::HttpBrowser;
use a11yscan_crawler::{Crawler, ProgressSink};
use a11yscan_shared::{A11yScanError, AppConfig, CrawlConfig, Result, ScanJob, ScanResult};
use a11yscan_storage::Storage;

use crate::enrichment::Enricher;
use crate::queue::JobProcessor;
use crate::scoring::Aggregator;

/// Progress once the result has been aggregated.
pub const PROGRESS_AGGREGATED: u8 = 95;

/// Crawls, audits, aggregates and optionally persists one scan job.
pub struct ScanPipeline {
    crawler: Crawler,
    aggregator: Aggregator,
    storage: Option<Arc<Storage>>,
}

impl ScanPipeline {
    pub fn new(crawler: Crawler, aggregator: Aggregator) -> Self {
        Self {
            crawler,
            aggregator,
            storage: None,
        }
    }

    /// Persist every completed result to `storage`.
    pub fn with_storage(mut self, storage: Arc<Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Wire the built-in HTTP browser and static rule set from configuration.
    pub fn from_config(config: &AppConfig, enricher: Option<Arc<dyn Enricher>>) -> Result<Self> {
        let crawl = CrawlConfig::from(config);
        let browser = HttpBrowser::new(crawl.navigation_timeout)?
            .allow_private_hosts(crawl.allow_private_hosts);
        let auditor = PageAuditor::new(
            Arc::new(StaticRuleEvaluator),
            ConfidenceScorer::new(&config.confidence),
        );
        let crawler = Crawler::new(Arc::new(browser), auditor, crawl);

        let mut aggregator = Aggregator::new(&config.scoring);
        if let Some(enricher) = enricher {
            aggregator = aggregator.with_enricher(enricher);
        }
        Ok(Self::new(crawler, aggregator))
    }
}

#[async_trait]
impl JobProcessor for ScanPipeline {
    #[instrument(skip_all, fields(job_id = %job.id, url = %job.target_url, attempt = job.attempts))]
    async fn process(
        &self,
        job: ScanJob,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<ScanResult> {
        let target = Url::parse(&job.target_url)
            .map_err(|e| A11yScanError::invalid_spec(format!("invalid url: {e}")))?;
        let scope = RuleScope::new(&job.standards, job.wcag_level);
        let started_at = job.started_at.unwrap_or_else(Utc::now);

        let pages = self
            .crawler
            .crawl(&target, job.limits, &scope, progress.as_ref(), &cancel)
            .await?;
        if cancel.is_cancelled() {
            return Err(A11yScanError::Cancelled);
        }

        let result = self
            .aggregator
            .aggregate(&job.id, target.as_str(), started_at, pages)
            .await;
        progress.report(PROGRESS_AGGREGATED);

        if let Some(storage) = &self.storage {
            if let Err(e) = storage.insert_scan_result(&result).await {
                warn!(error = %e, "failed to persist scan result");
            }
        }

        info!(
            pages = result.pages.len(),
            total_violations = result.total_violations,
            compliance_score = result.compliance_score,
            level = %result.wcag_level_achieved,
            "scan finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::Mutex;

    use a11yscan_browser::{Browser, BrowserSession, RenderedPage};
    use a11yscan_shared::{JobState, ScanRequest, ScanStatus, ScoringConfig};

    use crate::queue::JobQueue;

    /// Serves canned HTML by URL; anything else is a navigation error.
    struct MemoryBrowser {
        pages: HashMap<String, String>,
    }

    struct MemorySession {
        pages: HashMap<String, String>,
    }

    #[async_trait]
    impl Browser for MemoryBrowser {
        async fn open_session(&self) -> Result<Box<dyn BrowserSession>> {
            Ok(Box::new(MemorySession {
                pages: self.pages.clone(),
            }))
        }
    }

    #[async_trait]
    impl BrowserSession for MemorySession {
        async fn navigate(&mut self, url: &Url) -> Result<RenderedPage> {
            let html = self
                .pages
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| A11yScanError::navigation(url.as_str(), "connection refused"))?;
            Ok(RenderedPage {
                requested_url: url.clone(),
                final_url: url.clone(),
                status_code: 200,
                html,
                title: None,
                dynamic_content: false,
            })
        }

        async fn screenshot(&mut self, _page: &RenderedPage) -> Result<String> {
            Ok("memory".into())
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct Recording(Mutex<Vec<u8>>);

    impl ProgressSink for Recording {
        fn report(&self, percent: u8) {
            self.0.lock().unwrap().push(percent);
        }
    }

    const HOME: &str = r##"<!doctype html><html lang="en"><head><title>Home</title>
        <meta name="viewport" content="width=device-width, initial-scale=1"></head>
        <body><a href="#main">Skip to main content</a>
        <main id="main"><img src="hero.png"><a href="/about">About us</a></main></body></html>"##;

    const ABOUT: &str = r##"<!doctype html><html lang="en"><head><title>About</title>
        <meta name="viewport" content="width=device-width, initial-scale=1"></head>
        <body><a href="#main">Skip to main content</a>
        <main id="main"><h1>About</h1><p>We build things.</p></main></body></html>"##;

    fn pipeline() -> ScanPipeline {
        let pages = HashMap::from([
            ("https://site.test/".to_string(), HOME.to_string()),
            ("https://site.test/about".to_string(), ABOUT.to_string()),
        ]);
        let auditor = PageAuditor::new(
            Arc::new(StaticRuleEvaluator),
            ConfidenceScorer::default(),
        );
        let crawler = Crawler::new(
            Arc::new(MemoryBrowser { pages }),
            auditor,
            CrawlConfig::default(),
        );
        ScanPipeline::new(crawler, Aggregator::new(&ScoringConfig::default()))
    }

    fn job(url: &str, max_depth: u32) -> ScanJob {
        let queue = JobQueue::new(&AppConfig::default());
        let request = ScanRequest {
            max_depth: Some(max_depth),
            ..ScanRequest::new(url)
        };
        let id = queue.submit(request).unwrap();
        queue.get_job(&id).unwrap()
    }

    #[tokio::test]
    async fn process_crawls_audits_and_aggregates() {
        let progress = Arc::new(Recording(Mutex::new(Vec::new())));
        let result = pipeline()
            .process(job("https://site.test/", 1), progress.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, ScanStatus::Completed);
        assert_eq!(result.pages.len(), 2);
        let home = &result.pages[0];
        assert!(home.violations.iter().any(|v| v.rule_id == "image-alt"));
        assert!(home.violations.iter().all(|v| v.confidence.is_some()));
        assert_eq!(result.total_violations, result.severity.total());
        assert!(result.compliance_score < 100);

        let reported = progress.0.lock().unwrap().clone();
        assert_eq!(reported.last(), Some(&PROGRESS_AGGREGATED));
        assert!(reported.windows(2).all(|w| w[0] <= w[1]), "{reported:?}");
    }

    #[tokio::test]
    async fn cancelled_token_aborts_processing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = pipeline()
            .process(job("https://site.test/", 1), Arc::new(a11yscan_crawler::SilentProgress), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, A11yScanError::Cancelled));
    }

    #[tokio::test]
    async fn completed_results_are_persisted() {
        let dir = std::env::temp_dir().join(format!("a11yscan-pipeline-{}", uuid::Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&dir.join("scans.db")).await.unwrap());
        let pipeline = pipeline().with_storage(storage.clone());

        let job = job("https://site.test/", 0);
        let result = pipeline
            .process(job.clone(), Arc::new(a11yscan_crawler::SilentProgress), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.pages.len(), 1);

        let stored = storage.get_scan_result(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.total_violations, result.total_violations);
        assert_eq!(stored.compliance_score, result.compliance_score);

        let _ = std::fs::remove_dir_all(&dir);
    }

    // -----------------------------------------------------------------------
    // Through the queue
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn queued_scan_completes_at_full_progress() {
        let queue = JobQueue::new(&AppConfig::default());
        let handle = queue.start(Arc::new(pipeline())).unwrap();

        let id = queue.submit(ScanRequest::new("https://site.test/")).unwrap();
        let job = queue.wait_for(&id).await.unwrap();

        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.progress, 100);
        let result = job.result.unwrap();
        assert_eq!(result.pages.len(), 2);
        assert!(!result.executive_summary.is_empty());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_site_fails_after_three_attempts() {
        let queue = JobQueue::new(&AppConfig::default());
        let handle = queue.start(Arc::new(pipeline())).unwrap();

        let id = queue.submit(ScanRequest::new("https://down.test/")).unwrap();
        let job = queue.wait_for(&id).await.unwrap();

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 3);
        assert!(job.result.is_none());
        let reason = job.failed_reason.unwrap();
        assert!(reason.contains("no pages could be audited"), "{reason}");

        handle.shutdown().await;
    }
}
