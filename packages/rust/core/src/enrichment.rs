//! Executive-summary enrichment.
//!
//! Enrichment is optional: a missing key, a network failure, or a malformed
//! response all collapse into [`EnrichmentOutcome::Unavailable`] and the scan
//! falls back to [`FALLBACK_SUMMARY`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use a11yscan_shared::{
    A11yScanError, EnrichmentConfig, Impact, Result, ScanResult, resolve_api_key,
};

/// Summary used whenever enrichment is disabled or fails.
pub const FALLBACK_SUMMARY: &str = "AI summary unavailable. Review the violation list for details.";

/// How many distinct rules are listed in the prompt.
const PROMPT_TOP_RULES: usize = 5;

/// Result of asking for an executive summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrichmentOutcome {
    Summary(String),
    Unavailable(String),
}

impl EnrichmentOutcome {
    /// The summary text, or [`FALLBACK_SUMMARY`].
    pub fn into_text(self) -> String {
        match self {
            Self::Summary(text) => text,
            Self::Unavailable(_) => FALLBACK_SUMMARY.to_string(),
        }
    }
}

/// Produces a short natural-language summary of a finished scan.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn summarize_scan(&self, result: &ScanResult) -> EnrichmentOutcome;
}

/// Build the configured enricher, or `None` when enrichment is disabled or
/// no API key is available.
pub fn from_config(config: &EnrichmentConfig) -> Option<Arc<dyn Enricher>> {
    if !config.enabled {
        return None;
    }
    let api_key = match resolve_api_key(config) {
        Ok(key) => key,
        Err(e) => {
            info!(reason = %e, "enrichment disabled");
            return None;
        }
    };
    match OpenRouterEnricher::new(config, api_key) {
        Ok(enricher) => Some(Arc::new(enricher)),
        Err(e) => {
            warn!(error = %e, "enrichment disabled");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// OpenRouter
// ---------------------------------------------------------------------------

/// OpenAI-compatible chat-completions client (OpenRouter by default).
pub struct OpenRouterEnricher {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenRouterEnricher {
    /// Client for `config.base_url`, authenticated with `api_key`.
    pub fn new(config: &EnrichmentConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("a11yscan/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| A11yScanError::Enrichment(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn complete(&self, prompt: String) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: Some(SYSTEM_PROMPT.into()),
                },
                ChatMessage {
                    role: "user".into(),
                    content: Some(prompt),
                },
            ],
            max_tokens: 400,
            temperature: 0.3,
        };

        debug!(model = %self.model, "requesting executive summary");

        let response = self
            .client
            .post(self.chat_url())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| A11yScanError::Enrichment(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(A11yScanError::Enrichment(format!("API error {status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| A11yScanError::Enrichment(format!("malformed response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| A11yScanError::Enrichment("empty completion".into()))
    }
}

#[async_trait]
impl Enricher for OpenRouterEnricher {
    #[instrument(skip_all, fields(job_id = %result.job_id))]
    async fn summarize_scan(&self, result: &ScanResult) -> EnrichmentOutcome {
        match self.complete(build_prompt(result)).await {
            Ok(summary) => EnrichmentOutcome::Summary(summary),
            Err(e) => {
                warn!(error = %e, "executive summary unavailable");
                EnrichmentOutcome::Unavailable(e.to_string())
            }
        }
    }
}

const SYSTEM_PROMPT: &str = "You are an accessibility consultant. Write a concise executive \
summary (at most 120 words) of a WCAG scan for a non-technical audience. Name the most \
important problems and what fixing them would achieve. Do not invent findings.";

/// Render scan statistics and the most frequent rules as the user prompt.
fn build_prompt(result: &ScanResult) -> String {
    let mut counts: HashMap<&str, (Impact, usize)> = HashMap::new();
    for violation in result.pages.iter().flat_map(|p| &p.violations) {
        counts
            .entry(violation.rule_id.as_str())
            .or_insert((violation.impact, 0))
            .1 += 1;
    }
    let mut rules: Vec<_> = counts.into_iter().collect();
    rules.sort_by(|a, b| b.1.1.cmp(&a.1.1).then(a.1.0.cmp(&b.1.0)).then(a.0.cmp(b.0)));

    let mut prompt = format!(
        "Site: {}\nPages audited: {}\nTotal violations: {}\n\
         Critical: {}, serious: {}, moderate: {}, minor: {}\n\
         Compliance score: {}/100\nWCAG level achieved: {}\n",
        result.base_url,
        result.pages.len(),
        result.total_violations,
        result.severity.critical,
        result.severity.serious,
        result.severity.moderate,
        result.severity.minor,
        result.compliance_score,
        result.wcag_level_achieved,
    );
    if !rules.is_empty() {
        prompt.push_str("Most frequent rules:\n");
        for (rule_id, (impact, occurrences)) in rules.into_iter().take(PROMPT_TOP_RULES) {
            prompt.push_str(&format!("- {rule_id} ({impact}): {occurrences}\n"));
        }
    }
    prompt
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}
