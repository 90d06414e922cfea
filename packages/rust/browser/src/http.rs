//! HTTP-backed renderer.
//!
//! Fetches pages with `reqwest` and treats the served HTML as the rendered
//! DOM. Script-built pages are flagged via [`RenderedPage::dynamic_content`]
//! so confidence scoring can account for content the fetch could not see.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::redirect::Policy;
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use url::Url;

use a11yscan_shared::{A11yScanError, Result};

use crate::{Browser, BrowserSession, RenderedPage};

/// User-Agent string for page requests.
const USER_AGENT: &str = concat!("a11yscan/", env!("CARGO_PKG_VERSION"));

/// Redirect hops followed before a navigation fails.
const MAX_REDIRECTS: usize = 5;

/// Script count above which a page is considered script-rendered.
const DYNAMIC_SCRIPT_THRESHOLD: usize = 10;

/// Mount points used by common single-page-app frameworks.
const SPA_ROOT_SELECTORS: &str = "#root, #app, #__next, #__nuxt, [data-reactroot], [ng-app]";

// ---------------------------------------------------------------------------
// HttpBrowser
// ---------------------------------------------------------------------------

/// Renderer that fetches HTML over HTTP.
pub struct HttpBrowser {
    client: Client,
    /// Allow localhost/private IPs (local servers and integration tests).
    /// Shared with the client's redirect policy.
    allow_private_hosts: Arc<AtomicBool>,
}

impl HttpBrowser {
    /// Create a renderer whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let allow_private_hosts = Arc::new(AtomicBool::new(false));
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(guarded_redirects(allow_private_hosts.clone()))
            .timeout(timeout)
            .build()
            .map_err(|e| A11yScanError::Browser(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            allow_private_hosts,
        })
    }

    /// Allow navigating to localhost/private IPs.
    pub fn allow_private_hosts(self, allow: bool) -> Self {
        self.allow_private_hosts.store(allow, Ordering::Relaxed);
        self
    }
}

/// Follow up to [`MAX_REDIRECTS`] hops, refusing any hop that lands on a
/// private or non-HTTP target unless private hosts are allowed.
fn guarded_redirects(allow_private_hosts: Arc<AtomicBool>) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error(format!("more than {MAX_REDIRECTS} redirects"))
        } else if !allow_private_hosts.load(Ordering::Relaxed) && is_ssrf_target(attempt.url()) {
            let blocked = format!("blocked redirect to {}", attempt.url());
            attempt.error(blocked)
        } else {
            attempt.follow()
        }
    })
}

#[async_trait]
impl Browser for HttpBrowser {
    async fn open_session(&self) -> Result<Box<dyn BrowserSession>> {
        Ok(Box::new(HttpSession {
            client: self.client.clone(),
            allow_private_hosts: self.allow_private_hosts.load(Ordering::Relaxed),
            pages_loaded: 0,
            closed: false,
        }))
    }
}

/// One crawl's view of the HTTP renderer.
struct HttpSession {
    client: Client,
    allow_private_hosts: bool,
    pages_loaded: usize,
    closed: bool,
}

#[async_trait]
impl BrowserSession for HttpSession {
    #[instrument(skip_all, fields(url = %url))]
    async fn navigate(&mut self, url: &Url) -> Result<RenderedPage> {
        if self.closed {
            return Err(A11yScanError::Browser("session already closed".into()));
        }
        if !self.allow_private_hosts && is_ssrf_target(url) {
            return Err(A11yScanError::navigation(
                url.as_str(),
                "blocked: private or non-HTTP target",
            ));
        }

        debug!("fetching page");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| A11yScanError::navigation(url.as_str(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(A11yScanError::navigation(
                url.as_str(),
                format!("HTTP {status}"),
            ));
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("html"))
            .unwrap_or(true);
        if !is_html {
            return Err(A11yScanError::navigation(url.as_str(), "not an HTML document"));
        }

        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| A11yScanError::navigation(url.as_str(), format!("body read failed: {e}")))?;

        let (title, dynamic_content) = inspect_document(&body);
        self.pages_loaded += 1;

        Ok(RenderedPage {
            requested_url: url.clone(),
            final_url,
            status_code: status.as_u16(),
            html: body,
            title,
            dynamic_content,
        })
    }

    async fn screenshot(&mut self, page: &RenderedPage) -> Result<String> {
        // No pixels without a real browser: reference the exact DOM that was audited.
        Ok(format!("snapshot:sha256:{}", compute_hash(&page.html)))
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            debug!(pages_loaded = self.pages_loaded, "browser session closed");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Document inspection
// ---------------------------------------------------------------------------

/// Extract the title and the dynamic-content flag from raw HTML.
fn inspect_document(html: &str) -> (Option<String>, bool) {
    let doc = Html::parse_document(html);
    let title = extract_title(&doc);
    (title, looks_dynamic(&doc))
}

fn extract_title(doc: &Html) -> Option<String> {
    for sel in ["title", "h1"] {
        let selector = Selector::parse(sel).expect("static selector");
        if let Some(el) = doc.select(&selector).next() {
            let text = el.text().collect::<String>().trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

/// A page is "dynamic" when it mounts into an empty SPA root or ships many scripts.
fn looks_dynamic(doc: &Html) -> bool {
    let script_sel = Selector::parse("script").expect("static selector");
    if doc.select(&script_sel).count() > DYNAMIC_SCRIPT_THRESHOLD {
        return true;
    }

    let root_sel = Selector::parse(SPA_ROOT_SELECTORS).expect("static selector");
    doc.select(&root_sel)
        .any(|el| el.text().all(|t| t.trim().is_empty()))
}

/// Compute SHA-256 hash of content.
fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
pub fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    if let Some(host) = url.host_str() {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return is_private_ip(&ip);
        }
        if host == "localhost" || host.ends_with(".local") || host.ends_with(".internal") {
            return true;
        }
    }

    false
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_private_ip(&IpAddr::V4(v4));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 (unique local)
                || (first & 0xfe00) == 0xfc00
                // fe80::/10 (link-local)
                || (first & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn browser() -> HttpBrowser {
        HttpBrowser::new(Duration::from_secs(5))
            .unwrap()
            .allow_private_hosts(true)
    }

    #[test]
    fn ssrf_blocks_private_targets() {
        for blocked in [
            "file:///etc/passwd",
            "http://192.168.1.1/admin",
            "http://127.0.0.1:8080/",
            "http://localhost:3000/api",
            "http://[::1]/",
            "http://[::ffff:127.0.0.1]/",
            "http://[::ffff:169.254.169.254]/",
            "http://[fd00::1]/",
            "http://[fe80::1]/",
        ] {
            assert!(is_ssrf_target(&Url::parse(blocked).unwrap()), "{blocked}");
        }
        for allowed in [
            "https://example.com/page",
            "http://93.184.216.34/",
            "http://[2606:4700::1111]/",
        ] {
            assert!(!is_ssrf_target(&Url::parse(allowed).unwrap()), "{allowed}");
        }
    }

    #[test]
    fn dynamic_detection() {
        let spa = r#"<html><body><div id="root"></div><script src="/app.js"></script></body></html>"#;
        assert!(inspect_document(spa).1);

        let static_page = r#"<html><head><title>Home</title></head><body><main><p>Hi</p></main></body></html>"#;
        let (title, dynamic) = inspect_document(static_page);
        assert_eq!(title.as_deref(), Some("Home"));
        assert!(!dynamic);
    }

    #[test]
    fn title_falls_back_to_h1() {
        let (title, _) = inspect_document("<html><body><h1> Welcome </h1></body></html>");
        assert_eq!(title.as_deref(), Some("Welcome"));
    }

    #[tokio::test]
    async fn navigate_renders_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(
                        "<html><head><title>Mock</title></head><body></body></html>",
                        "text/html; charset=utf-8",
                    ),
            )
            .mount(&server)
            .await;

        let mut session = browser().open_session().await.unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        let page = session.navigate(&url).await.unwrap();
        assert_eq!(page.status_code, 200);
        assert_eq!(page.title.as_deref(), Some("Mock"));

        let evidence = session.screenshot(&page).await.unwrap();
        assert!(evidence.starts_with("snapshot:sha256:"));
        assert_eq!(evidence, session.screenshot(&page).await.unwrap());

        session.close().await.unwrap();
        assert!(session.navigate(&url).await.is_err());
    }

    #[tokio::test]
    async fn navigate_reports_http_errors() {
        let server = MockServer::start().await;
        Mock::given(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut session = browser().open_session().await.unwrap();
        let url = Url::parse(&format!("{}/missing", server.uri())).unwrap();
        let err = session.navigate(&url).await.unwrap_err();
        assert!(matches!(err, A11yScanError::Navigation { .. }));
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn navigate_rejects_non_html() {
        let server = MockServer::start().await;
        Mock::given(path("/report.pdf"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf")
                    .set_body_bytes(vec![0x25, 0x50, 0x44, 0x46]),
            )
            .mount(&server)
            .await;

        let mut session = browser().open_session().await.unwrap();
        let url = Url::parse(&format!("{}/report.pdf", server.uri())).unwrap();
        assert!(session.navigate(&url).await.is_err());
    }

    #[tokio::test]
    async fn redirect_to_private_target_is_refused() {
        let server = MockServer::start().await;
        Mock::given(path("/login"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", "http://169.254.169.254/latest/meta-data/"),
            )
            .mount(&server)
            .await;

        // The guard is on; the mock server itself is reached directly.
        let browser = HttpBrowser::new(Duration::from_secs(5)).unwrap();
        let err = browser
            .client
            .get(format!("{}/login", server.uri()))
            .send()
            .await
            .unwrap_err();
        assert!(err.is_redirect(), "{err}");
        assert!(err.to_string().contains("redirect"), "{err}");
    }

    #[tokio::test]
    async fn redirects_are_followed_when_allowed() {
        let server = MockServer::start().await;
        Mock::given(path("/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/new"))
            .mount(&server)
            .await;
        Mock::given(path("/new"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><head><title>New</title></head></html>", "text/html"),
            )
            .mount(&server)
            .await;

        let mut session = browser().open_session().await.unwrap();
        let url = Url::parse(&format!("{}/old", server.uri())).unwrap();
        let page = session.navigate(&url).await.unwrap();
        assert_eq!(page.requested_url, url);
        assert_eq!(page.final_url.path(), "/new");
        assert_eq!(page.title.as_deref(), Some("New"));
    }

    #[tokio::test]
    async fn private_hosts_blocked_by_default() {
        let browser = HttpBrowser::new(Duration::from_secs(5)).unwrap();
        let mut session = browser.open_session().await.unwrap();
        let url = Url::parse("http://127.0.0.1:9/").unwrap();
        let err = session.navigate(&url).await.unwrap_err();
        assert!(err.to_string().contains("blocked"));
    }
}
