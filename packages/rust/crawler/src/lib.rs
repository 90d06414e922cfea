//! Crawl orchestration for a11yscan.
//!
//! This crate provides:
//! - [`CrawlContext`]: per-job frontier, visited set and host scope
//! - [`Crawler`]: the bounded, sequential crawl that audits every page
//! - [`ProgressSink`]: how crawl progress leaves the crate

pub mod context;
pub mod engine;

pub use context::{CrawlContext, canonicalize};
pub use engine::{
    Crawler, PROGRESS_CRAWL_END, PROGRESS_CRAWL_START, ProgressSink, SilentProgress,
    crawl_progress, extract_links,
};
