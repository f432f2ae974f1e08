//! HTTP transport for the deSEC API.
//!
//! [`DesecClient`] is a thin REST wrapper: it applies the rate limiter,
//! attaches the `Authorization: Token` header, and classifies every response
//! into an [`ApiOutcome`]. All scheduling decisions (retry, cooldown) belong
//! to the queue, not here.

use std::sync::{OnceLock, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::error::{ApiError, RateLimit, DEFAULT_RETRY_AFTER};
use crate::rate_limiter::RateLimiter;
use crate::request::{ApiOutcome, ApiRequest, HttpMethod};

/// Default API base URL.
pub const DEFAULT_API_URL: &str = "https://desec.io/api/v1";

/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection timeout in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Executes [`ApiRequest`]s.
///
/// The queue worker only ever sees this trait, so tests substitute a
/// deterministic double that scripts outcomes and records call order. The
/// rate-related hooks are no-ops by default; [`DesecClient`] wires them to
/// its limiter.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Executes one request and classifies the response.
    async fn execute(&self, request: &ApiRequest) -> ApiOutcome;

    /// Called by the queue after a rate-limit event; halves the dispatch
    /// rate on the real client.
    async fn adapt_rate_limit(&self, _retry_after: f64) {}

    /// Replaces the dispatch rate (requests per second; 0 disables).
    async fn set_rate(&self, _rate: f64) {}

    /// Replaces the in-memory API token. `None` drops it (e.g. after a 401).
    async fn set_token(&self, _token: Option<String>) {}
}

/// reqwest-backed [`Transport`] for the deSEC REST API.
pub struct DesecClient {
    http: reqwest::Client,
    base_url: String,
    token: RwLock<Option<String>>,
    limiter: RateLimiter,
}

impl DesecClient {
    /// Creates a client against `base_url` with the default 30 s timeout.
    #[must_use]
    pub fn new(base_url: &str, rate: f64, token: Option<String>) -> Self {
        Self::with_timeout(base_url, rate, token, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with an explicit per-request timeout.
    #[must_use]
    pub fn with_timeout(
        base_url: &str,
        rate: f64,
        token: Option<String>,
        timeout_secs: u64,
    ) -> Self {
        // Client::builder() only fails if the TLS backend cannot initialize,
        // which is a fatal configuration error.
        #[allow(clippy::expect_used)]
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client: TLS backend unavailable");

        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: RwLock::new(token),
            limiter: RateLimiter::new(rate),
        }
    }

    /// Current dispatch rate in requests per second.
    #[must_use]
    pub fn rate(&self) -> f64 {
        self.limiter.rate()
    }

    fn auth_header(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map(|t| format!("Token {t}"))
    }

    async fn send(&self, request: &ApiRequest) -> ApiOutcome {
        self.limiter.acquire().await;

        let url = format!("{}{}", self.base_url, request.path);
        log::debug!("{} {url}", request.method);

        let mut builder = match request.method {
            HttpMethod::Get => self.http.get(&url),
            HttpMethod::Post => self.http.post(&url),
            HttpMethod::Put => self.http.put(&url),
            HttpMethod::Patch => self.http.patch(&url),
            HttpMethod::Delete => self.http.delete(&url),
        };
        if let Some(auth) = self.auth_header() {
            builder = builder.header("Authorization", auth);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return ApiOutcome::Failed(ApiError::Timeout {
                    detail: e.to_string(),
                });
            }
            Err(e) => {
                return ApiOutcome::Failed(ApiError::NetworkError {
                    detail: e.to_string(),
                });
            }
        };

        let status = response.status().as_u16();
        log::debug!("Response Status: {status}");

        let retry_after_header = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok());

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                return ApiOutcome::Failed(ApiError::NetworkError {
                    detail: format!("failed to read response body: {e}"),
                });
            }
        };
        log::debug!("Response Body: {text}");

        classify(status, retry_after_header, &text)
    }
}

#[async_trait]
impl Transport for DesecClient {
    async fn execute(&self, request: &ApiRequest) -> ApiOutcome {
        self.send(request).await
    }

    async fn adapt_rate_limit(&self, retry_after: f64) {
        self.limiter.adapt(retry_after);
    }

    async fn set_rate(&self, rate: f64) {
        self.limiter.set_rate(rate);
    }

    async fn set_token(&self, token: Option<String>) {
        let mut guard = self
            .token
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = token;
    }
}

/// Regex that extracts the wait from deSEC throttle messages, e.g.
/// `"Request was throttled. Expected available in 2 seconds."`.
fn throttle_wait_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::expect_used)]
        let re = Regex::new(r"available in (\d+(?:\.\d+)?) second").expect("static regex is valid");
        re
    })
}

/// Classifies an HTTP response into an [`ApiOutcome`].
pub(crate) fn classify(status: u16, retry_after_header: Option<f64>, body: &str) -> ApiOutcome {
    let parsed: Option<Value> = if body.trim().is_empty() {
        None
    } else {
        serde_json::from_str(body).ok()
    };

    match status {
        200..=299 => {
            if !body.trim().is_empty() && parsed.is_none() {
                return ApiOutcome::Failed(ApiError::ParseError {
                    detail: "response is not valid JSON".to_string(),
                });
            }
            ApiOutcome::Success { status, body: parsed }
        }
        429 => {
            let message = parsed
                .as_ref()
                .and_then(error_message)
                .unwrap_or_else(|| "Rate limited".to_string());
            let retry_after = retry_after_header
                .or_else(|| {
                    parsed
                        .as_ref()
                        .and_then(|v| v.get("retry_after"))
                        .and_then(Value::as_f64)
                })
                .or_else(|| {
                    throttle_wait_re()
                        .captures(&message)
                        .and_then(|c| c.get(1))
                        .and_then(|m| m.as_str().parse().ok())
                })
                .unwrap_or(DEFAULT_RETRY_AFTER);
            ApiOutcome::RateLimited(RateLimit {
                retry_after,
                message,
                raw: parsed,
            })
        }
        401 => ApiOutcome::Failed(ApiError::Unauthenticated),
        403 => {
            let message = parsed
                .as_ref()
                .and_then(error_message)
                .unwrap_or_else(|| body.to_string());
            ApiOutcome::Failed(ApiError::Forbidden { message })
        }
        400..=499 => {
            let message = parsed
                .as_ref()
                .and_then(error_message)
                .unwrap_or_else(|| body.to_string());
            ApiOutcome::Failed(ApiError::ClientError {
                status,
                message,
                raw: parsed,
            })
        }
        _ => {
            let message = parsed
                .as_ref()
                .and_then(error_message)
                .unwrap_or_else(|| body.to_string());
            ApiOutcome::Failed(ApiError::ServerError { status, message })
        }
    }
}

/// Extracts a human-readable message from a deSEC error body.
///
/// Precedence: `non_field_errors`, then `detail`, then per-field error
/// lists, then a bare list of strings.
fn error_message(body: &Value) -> Option<String> {
    match body {
        Value::Object(map) => {
            if let Some(Value::Array(errors)) = map.get("non_field_errors") {
                let joined: Vec<&str> = errors.iter().filter_map(Value::as_str).collect();
                if !joined.is_empty() {
                    return Some(joined.join("; "));
                }
            }
            if let Some(Value::String(detail)) = map.get("detail") {
                return Some(detail.clone());
            }
            let mut field_errors = Vec::new();
            for (field, value) in map {
                match value {
                    Value::Array(msgs) => {
                        let joined: Vec<&str> = msgs.iter().filter_map(Value::as_str).collect();
                        if !joined.is_empty() {
                            field_errors.push(format!("{field}: {}", joined.join("; ")));
                        }
                    }
                    Value::String(msg) => field_errors.push(format!("{field}: {msg}")),
                    _ => {}
                }
            }
            if field_errors.is_empty() {
                None
            } else {
                Some(field_errors.join(" | "))
            }
        }
        Value::Array(errors) => {
            let joined: Vec<&str> = errors.iter().filter_map(Value::as_str).collect();
            if joined.is_empty() {
                None
            } else {
                Some(joined.join("; "))
            }
        }
        _ => None,
    }
}
