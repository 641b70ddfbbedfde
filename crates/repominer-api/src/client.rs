use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, RETRY_AFTER, USER_AGENT};
use reqwest::{Response, StatusCode};
use serde_json::Value;
use tracing::error;

use crate::error::{ApiError, Result};
use crate::outcome::ApiOutcome;
use crate::retry::{is_retryable_status, with_retry, Attempt, RetryConfig};

pub const GITHUB_API_BASE: &str = "https://api.github.com";

/// GitHub personal access token
///
/// Loaded once at startup and never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Returns `None` for an empty or whitespace-only token
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into().trim().to_string();
        if token.is_empty() {
            None
        } else {
            Some(Self(token))
        }
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// A GET against the API. Built fresh for every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Value of a query parameter, if set
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Anything that can turn a request into an outcome
///
/// Extractors hold one of these instead of talking to reqwest directly,
/// which keeps them testable without a network.
#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> ApiOutcome;
}

/// Resilient GitHub REST client
pub struct GitHubClient {
    client: reqwest::Client,
    base_url: String,
    retry_config: RetryConfig,
}

impl GitHubClient {
    pub fn new(credential: &Credential) -> Result<Self> {
        Self::with_base_url(credential, GITHUB_API_BASE.to_string())
    }

    /// For GitHub Enterprise or testing with a custom API URL
    pub fn with_base_url(credential: &Credential, base_url: String) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("repominer/0.1.0"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );

        let mut auth = HeaderValue::from_str(&format!("token {}", credential.expose()))
            .map_err(|_| ApiError::InvalidCredential)?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry_config: RetryConfig::default(),
        })
    }

    /// Replace the default retry policy
    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// One round trip. Transient failures ask `with_retry` for another go.
    async fn attempt(&self, request: &ApiRequest) -> Attempt<ApiOutcome> {
        let response = match self
            .client
            .get(&request.url)
            .query(&request.query)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                return Attempt::Retry {
                    fallback: ApiOutcome::OtherError(None),
                    reason: format!("network error: {}", err),
                    retry_after: None,
                }
            }
        };

        let status = response.status();
        if is_retryable_status(status) {
            return Attempt::Retry {
                fallback: ApiOutcome::OtherError(Some(status.as_u16())),
                reason: format!("status {}", status),
                retry_after: retry_after_hint(response.headers()),
            };
        }

        Attempt::Done(classify(response).await)
    }
}

#[async_trait]
impl Fetch for GitHubClient {
    async fn execute(&self, request: &ApiRequest) -> ApiOutcome {
        let outcome = with_retry(&self.retry_config, || self.attempt(request)).await;
        outcome.record(&request.url);
        outcome
    }
}

/// Map a final response onto exactly one outcome
async fn classify(response: Response) -> ApiOutcome {
    match response.status() {
        StatusCode::OK => match response.json::<Value>().await {
            Ok(payload) => ApiOutcome::Success(payload),
            Err(err) => {
                error!("Failed to decode response body: {}", err);
                ApiOutcome::OtherError(Some(200))
            }
        },
        StatusCode::NO_CONTENT => ApiOutcome::NoContent,
        StatusCode::UNAUTHORIZED => ApiOutcome::Unauthorized,
        StatusCode::FORBIDDEN => ApiOutcome::RateLimited {
            reset_at: header_i64(response.headers(), "x-ratelimit-reset"),
        },
        StatusCode::NOT_FOUND => ApiOutcome::NotFound,
        StatusCode::CONFLICT => ApiOutcome::Conflict,
        StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS => ApiOutcome::LegallyUnavailable,
        other => ApiOutcome::OtherError(Some(other.as_u16())),
    }
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

/// `Retry-After` in seconds. HTTP-date hints are ignored.
fn retry_after_hint(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
