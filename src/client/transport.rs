//! Rate-limited JSON request helper shared by the provider clients.

use std::sync::Arc;

use reqwest::RequestBuilder;
use reqwest::header::RETRY_AFTER;
use serde_json::Value;
use tracing::{debug, warn};

use super::ClientError;
use crate::download::{HttpClient, RateLimiter, parse_retry_after};
use crate::media::Provider;

/// One provider's HTTP client plus the run's rate limiter.
///
/// Every API call goes through [`ApiTransport::send`], which takes a rate
/// limiter slot first. Byte downloads use [`ApiTransport::http`] directly
/// and are not limited.
#[derive(Debug, Clone)]
pub struct ApiTransport {
    provider: Provider,
    http: HttpClient,
    limiter: Arc<RateLimiter>,
}

impl ApiTransport {
    #[must_use]
    pub fn new(provider: Provider, http: HttpClient, limiter: Arc<RateLimiter>) -> Self {
        Self {
            provider,
            http,
            limiter,
        }
    }

    #[must_use]
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    #[must_use]
    pub fn client(&self) -> &reqwest::Client {
        self.http.inner()
    }

    /// Sends an API request and returns its status and JSON body.
    ///
    /// Error statuses are returned, not raised, so callers can map them to
    /// provider-specific meanings. A 429 with `Retry-After` pauses the
    /// provider in the rate limiter.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Network`] when no response arrives and
    /// [`ClientError::InvalidResponse`] when a success body is not JSON.
    pub async fn send(&self, request: RequestBuilder, url: &str) -> Result<(u16, Value), ClientError> {
        self.limiter.acquire(self.provider).await;

        let response = request
            .send()
            .await
            .map_err(|e| ClientError::network(url, e))?;
        let status = response.status();

        if status.as_u16() == 429
            && let Some(delay) = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after)
        {
            warn!(provider = %self.provider, delay_secs = delay.as_secs(), "provider asked us to slow down");
            self.limiter.record_rate_limit(self.provider, delay).await;
        }

        let text = response
            .text()
            .await
            .map_err(|e| ClientError::network(url, e))?;
        debug!(provider = %self.provider, url, status = status.as_u16(), "api response");

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(&text) {
                Ok(json) => json,
                Err(e) if status.is_success() => {
                    return Err(ClientError::invalid_response(url, e.to_string()));
                }
                Err(_) => Value::String(text),
            }
        };
        Ok((status.as_u16(), body))
    }

    /// Same as [`ApiTransport::send`], but any non-2xx status is an error.
    ///
    /// # Errors
    ///
    /// As [`ApiTransport::send`], plus [`ClientError::Api`] carrying the
    /// response's message for error statuses.
    pub async fn send_ok(&self, request: RequestBuilder, url: &str) -> Result<Value, ClientError> {
        let (status, body) = self.send(request, url).await?;
        if !(200..300).contains(&status) {
            return Err(ClientError::api(self.provider, status, error_message(&body)));
        }
        Ok(body)
    }
}

/// Best human-readable message in an error body.
#[must_use]
pub fn error_message(body: &Value) -> String {
    ["message", "userMessage", "error_description"]
        .iter()
        .find_map(|key| body.get(key).and_then(Value::as_str))
        .or_else(|| body.pointer("/error/message").and_then(Value::as_str))
        .or_else(|| body.as_str())
        .map_or_else(
            || {
                if body.is_null() {
                    "no message".to_string()
                } else {
                    body.to_string()
                }
            },
            str::to_string,
        )
}

/// Turns a CamelCase restriction code into a sentence:
/// `TrackRestrictedByRightHolders` → `Track restricted by right holders.`
#[must_use]
pub fn restriction_sentence(code: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    for c in code.chars() {
        if c.is_uppercase() || words.is_empty() {
            words.push(String::new());
        }
        if let Some(word) = words.last_mut() {
            word.push(c);
        }
    }
    let mut sentence = words
        .iter()
        .enumerate()
        .map(|(i, word)| if i == 0 { word.clone() } else { word.to_lowercase() })
        .collect::<Vec<_>>()
        .join(" ");
    sentence.push('.');
    sentence
}
