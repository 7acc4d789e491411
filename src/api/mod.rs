//! Remote API client with rate limiting and retry.
//!
//! The remote service exposes exactly two logical operations, both reached
//! over HTTP POST with a JSON envelope:
//!
//! - listing invoice records (paginated)
//! - fetching the XML document of one record
//!
//! [`ApiClient::invoke`] wraps one call behind the shared [`RateLimiter`]
//! and the [`RetryPolicy`]; callers see either a well-formed JSON object or
//! a typed [`ApiError`].

mod error;
mod rate_limit;
mod retry;

pub use error::ApiError;
pub use rate_limit::RateLimiter;
pub use retry::{
    DEFAULT_MAX_ATTEMPTS, FailureType, RetryDecision, RetryPolicy, classify_error,
};

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

/// Default connect timeout in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// The two logical operations the remote API exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMethod {
    /// Paginated listing of invoice records.
    ListRecords,
    /// Fetch the XML document for one record.
    FetchDocument,
}

impl ApiMethod {
    /// Returns the wire name of the method.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ListRecords => "ListarNF",
            Self::FetchDocument => "ObterNfe",
        }
    }
}

impl std::fmt::Display for ApiMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Endpoint URLs for the two API destinations.
#[derive(Debug, Clone)]
pub struct ApiEndpoints {
    /// URL serving the record-listing method.
    pub listing_url: String,
    /// URL serving the document-fetch method.
    pub document_url: String,
}

/// API credentials sent in every request envelope.
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    /// Application key.
    pub app_key: String,
    /// Application secret.
    pub app_secret: String,
}

/// Client for the remote invoice API.
///
/// Create once and share via `Arc`; the underlying `reqwest::Client` pools
/// connections and the rate limiter is global to the process.
#[derive(Debug)]
pub struct ApiClient {
    http: Client,
    credentials: ApiCredentials,
    endpoints: ApiEndpoints,
    rate_limiter: Arc<RateLimiter>,
    retry_policy: RetryPolicy,
}

impl ApiClient {
    /// Creates a new API client.
    ///
    /// `timeout` bounds every remote call end to end; a call that exceeds it
    /// is treated as a transient failure for retry purposes.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    #[instrument(skip(credentials, rate_limiter, retry_policy))]
    pub fn new(
        credentials: ApiCredentials,
        endpoints: ApiEndpoints,
        rate_limiter: Arc<RateLimiter>,
        retry_policy: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS).min(timeout))
            .timeout(timeout)
            .build()
            .expect("failed to build HTTP client with static configuration");

        Self {
            http,
            credentials,
            endpoints,
            rate_limiter,
            retry_policy,
        }
    }

    /// Returns the shared rate limiter.
    ///
    /// The downloader sizes its worker pool to the same ceiling so it never
    /// holds more tasks in flight than the limiter would admit.
    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Invokes one API method with the given parameters.
    ///
    /// Blocks on the rate limiter before each attempt and re-issues the call
    /// per the retry policy. Business-level empty results are ordinary
    /// responses, never errors; only transport and envelope problems fail.
    ///
    /// # Errors
    ///
    /// Returns the permanent [`ApiError`] directly, or
    /// [`ApiError::RetriesExhausted`] carrying the method name and attempt
    /// count once the retry ceiling is reached.
    #[instrument(skip(self, params), fields(method = %method))]
    pub async fn invoke(&self, method: ApiMethod, params: Value) -> Result<Value, ApiError> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(attempt, "issuing API call");

            let permit = self.rate_limiter.acquire().await;
            let result = self.call_once(method, &params).await;
            drop(permit);

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let failure_type = classify_error(&error);
            match self.retry_policy.should_retry(failure_type, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    warn!(
                        attempt = next_attempt,
                        max_attempts = self.retry_policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "retrying API call"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(%reason, "not retrying API call");
                    if failure_type == FailureType::Permanent {
                        return Err(error);
                    }
                    return Err(ApiError::exhausted(method.as_str(), attempt, error));
                }
            }
        }
    }

    /// Performs a single request/response cycle without retry.
    async fn call_once(&self, method: ApiMethod, params: &Value) -> Result<Value, ApiError> {
        let envelope = self.build_envelope(method, params);
        let url = self.endpoint_for(method);

        let response = self
            .http
            .post(url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiError::timeout(method.as_str())
                } else {
                    ApiError::network(method.as_str(), e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::http_status(method.as_str(), status.as_u16()));
        }

        let body: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::timeout(method.as_str())
            } else {
                ApiError::malformed(method.as_str(), format!("invalid JSON body: {e}"))
            }
        })?;

        if !body.is_object() {
            return Err(ApiError::malformed(
                method.as_str(),
                "response body is not a JSON object",
            ));
        }

        Ok(body)
    }

    /// Builds the request envelope for one call.
    fn build_envelope(&self, method: ApiMethod, params: &Value) -> Value {
        json!({
            "app_key": self.credentials.app_key,
            "app_secret": self.credentials.app_secret,
            "call": method.as_str(),
            "param": [params],
        })
    }

    /// Selects the endpoint URL for a method.
    fn endpoint_for(&self, method: ApiMethod) -> &str {
        match method {
            ApiMethod::ListRecords => &self.endpoints.listing_url,
            ApiMethod::FetchDocument => &self.endpoints.document_url,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn test_client(listing: &str, document: &str) -> ApiClient {
        ApiClient::new(
            ApiCredentials {
                app_key: "key".to_string(),
                app_secret: "secret".to_string(),
            },
            ApiEndpoints {
                listing_url: listing.to_string(),
                document_url: document.to_string(),
            },
            Arc::new(RateLimiter::new(4)),
            RetryPolicy::default(),
            Duration::from_secs(30),
        )
    }

    #[test]
    fn test_method_wire_names() {
        assert_eq!(ApiMethod::ListRecords.as_str(), "ListarNF");
        assert_eq!(ApiMethod::FetchDocument.as_str(), "ObterNfe");
    }

    #[test]
    fn test_endpoint_selected_by_method() {
        let client = test_client("http://a.invalid/list", "http://a.invalid/doc");
        assert_eq!(
            client.endpoint_for(ApiMethod::ListRecords),
            "http://a.invalid/list"
        );
        assert_eq!(
            client.endpoint_for(ApiMethod::FetchDocument),
            "http://a.invalid/doc"
        );
    }

    #[test]
    fn test_envelope_combines_credentials_method_and_params() {
        let client = test_client("http://a.invalid/list", "http://a.invalid/doc");
        let envelope =
            client.build_envelope(ApiMethod::FetchDocument, &json!({"nIdNfe": 42}));

        assert_eq!(envelope["app_key"], "key");
        assert_eq!(envelope["app_secret"], "secret");
        assert_eq!(envelope["call"], "ObterNfe");
        assert_eq!(envelope["param"][0]["nIdNfe"], 42);
        assert_eq!(envelope["param"].as_array().unwrap().len(), 1);
    }
}
