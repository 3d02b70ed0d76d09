//! Web-search knowledge source over a chat-completions API
//!
//! Speaks the OpenAI-compatible `/chat/completions` protocol. The default
//! target is Perplexity's `sonar` model, which answers from live web search.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use reqwest::header::RETRY_AFTER;
use tracing::debug;

use crate::config::EnrichmentConfig;
use crate::error::{Error, Result};
use crate::gaps::DataGap;

use super::KnowledgeSource;
use super::prompt;
use super::types::{ChatRequest, ChatResponse, SourceAnswer};

/// Perplexity API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.perplexity.ai";

/// Wait applied when a 429 carries no hint
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Chat-completions client used as the external knowledge source
#[derive(Clone)]
pub struct WebSearchClient {
    http_client: HttpClient,
    config: EnrichmentConfig,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for WebSearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSearchClient")
            .field("base_url", &self.base_url)
            .field("model", &self.config.model)
            .finish()
    }
}

/// Builder for creating a WebSearchClient
#[derive(Default)]
pub struct WebSearchClientBuilder {
    config: Option<EnrichmentConfig>,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

impl WebSearchClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EnrichmentConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Override the configured base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn build(self) -> Result<WebSearchClient> {
        let config = self.config.unwrap_or_default();
        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::ConfigError("knowledge source API key is required".to_string()))?;

        let timeout_secs = self.timeout_secs.unwrap_or(config.timeout_secs);

        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(Error::NetworkError)?;

        let base_url = self
            .base_url
            .unwrap_or_else(|| config.base_url.clone())
            .trim_end_matches('/')
            .to_string();

        Ok(WebSearchClient {
            http_client,
            config,
            api_key,
            base_url,
        })
    }
}

impl WebSearchClient {
    pub fn new(config: EnrichmentConfig, api_key: impl Into<String>) -> Result<Self> {
        WebSearchClientBuilder::new()
            .config(config)
            .api_key(api_key)
            .build()
    }

    pub fn builder() -> WebSearchClientBuilder {
        WebSearchClientBuilder::new()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send one chat request and return the first choice's text
    async fn send_request(&self, facility_id: i64, request: &ChatRequest) -> Result<SourceAnswer> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!(
            facility_id,
            model = %request.model,
            "Sending knowledge source request"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(Error::NetworkError)?;

        let status = response.status();
        if !status.is_success() {
            return handle_error_response(status, response).await;
        }

        let chat_response: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| Error::MalformedEnrichmentResponse {
                    facility_id,
                    reason: format!("unreadable response body: {}", e),
                })?;

        SourceAnswer::from_chat_response(chat_response).ok_or_else(|| {
            Error::MalformedEnrichmentResponse {
                facility_id,
                reason: "response carried no content".to_string(),
            }
        })
    }
}

#[async_trait]
impl KnowledgeSource for WebSearchClient {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn ask(&self, gap: &DataGap) -> Result<SourceAnswer> {
        let request = ChatRequest::new(&self.config.model, prompt::build_messages(gap))
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens)
            .without_citations();

        self.send_request(gap.facility_id, &request).await
    }
}

/// Map a non-2xx response onto the enrichment error taxonomy
async fn handle_error_response<T>(
    status: reqwest::StatusCode,
    response: reqwest::Response,
) -> Result<T> {
    let header_wait = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();

    match status.as_u16() {
        401 => Err(Error::EnrichmentAuthFailed(
            "unauthorized: invalid API key".to_string(),
        )),
        403 => Err(Error::EnrichmentAuthFailed(format!("forbidden: {}", body))),
        429 => {
            let wait_secs = header_wait
                .or_else(|| extract_retry_after(&body))
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            Err(Error::RateLimited(wait_secs))
        }
        500..=599 => Err(Error::EnrichmentUnavailable(format!(
            "server error ({}): {}",
            status, body
        ))),
        _ => Err(Error::EnrichmentUnavailable(format!(
            "HTTP error {}: {}",
            status, body
        ))),
    }
}

/// Extract retry-after seconds from an error body
fn extract_retry_after(body: &str) -> Option<u64> {
    let json = serde_json::from_str::<serde_json::Value>(body).ok()?;
    json.get("retry_after")
        .and_then(|v| v.as_u64())
        .or_else(|| {
            json.get("error")
                .and_then(|e| e.get("retry_after"))
                .and_then(|v| v.as_u64())
        })
}
