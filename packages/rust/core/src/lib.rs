//! Scan orchestration for a11yscan.
//!
//! This crate ties the crawler, the page auditor, scoring and enrichment
//! into a job pipeline, and runs it on an in-process retrying job queue.

pub mod enrichment;
pub mod pipeline;
pub mod queue;
pub mod scoring;

pub use enrichment::{EnrichmentOutcome, Enricher, FALLBACK_SUMMARY, OpenRouterEnricher};
pub use pipeline::{PROGRESS_AGGREGATED, ScanPipeline};
pub use queue::{CANCELLED_REASON, JobProcessor, JobQueue, QueueHandle, StartRateLimiter};
pub use scoring::{Aggregator, NO_PAGES_ERROR, achieved_level, compliance_score};
