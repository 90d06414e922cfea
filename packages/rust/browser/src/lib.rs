//! Page rendering collaborators.
//!
//! This crate provides:
//! - [`Browser`] / [`BrowserSession`]: the rendering interface consumed by the crawler
//! - [`RenderedPage`]: a navigated page's DOM snapshot
//! - [`HttpBrowser`]: a built-in renderer that fetches HTML over HTTP

mod http;

use async_trait::async_trait;
use url::Url;

use a11yscan_shared::Result;

pub use http::{HttpBrowser, is_ssrf_target};

/// A page after navigation, ready for auditing.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// URL that was requested.
    pub requested_url: Url,
    /// URL after redirects.
    pub final_url: Url,
    pub status_code: u16,
    /// Serialized DOM.
    pub html: String,
    /// Document title (`<title>`, falling back to the first `<h1>`).
    pub title: Option<String>,
    /// Whether the page appears to build its content with client-side script.
    pub dynamic_content: bool,
}

/// Acquires rendering sessions. One session is held per crawl.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Open a new session. Failure here is a job-level error.
    async fn open_session(&self) -> Result<Box<dyn BrowserSession>>;
}

/// A single rendering session owned by one crawl.
#[async_trait]
pub trait BrowserSession: Send {
    /// Navigate to `url` and return the rendered page.
    async fn navigate(&mut self, url: &Url) -> Result<RenderedPage>;

    /// Capture visual evidence of `page`, returning an opaque reference.
    async fn screenshot(&mut self, page: &RenderedPage) -> Result<String>;

    /// Release the session's resources.
    async fn close(&mut self) -> Result<()>;
}
