//! Remote document store access.
//!
//! Three layers, leaf first:
//!
//! - [`Transport`] sends one HTTP request and reports the raw status. The
//!   production implementation is [`http::UreqTransport`].
//! - [`retry::RetryingClient`] classifies statuses into [`RemoteError`] and
//!   retries the transient ones with backoff.
//! - [`document::DocumentClient`] speaks the gist-style document payloads and
//!   implements [`RemoteStore`] for the repository.

pub mod document;
pub mod http;
pub mod retry;

use std::time::Duration;

use serde_json::Value;

use crate::config::RemoteConfig;
use crate::error::RemoteError;

pub use document::{CreatedDocument, DocumentClient, MemoryStore, RemoteStore, create_document};
pub use http::UreqTransport;
pub use retry::{RetryPolicy, RetryingClient, Sleeper, ThreadSleeper};

/// HTTP verbs used against the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
}

impl Method {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
        }
    }
}

/// A fully-addressed request.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
}

/// What came back, whatever the status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResponse {
    pub status: u16,
    /// Parsed `Retry-After` header (seconds form only).
    pub retry_after: Option<Duration>,
    pub body: String,
}

impl RemoteResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Api`] carrying this response's status when the
    /// body is not valid JSON.
    pub fn json(&self) -> Result<Value, RemoteError> {
        serde_json::from_str(&self.body)
            .map_err(|e| RemoteError::api(self.status, format!("invalid JSON response: {e}")))
    }
}

/// Sends a single request.
///
/// Implementations return `Ok` for every HTTP status the server answered
/// with and reserve `Err` for connection failures and timeouts.
pub trait Transport {
    /// # Errors
    ///
    /// [`RemoteError::Network`] or [`RemoteError::Timeout`] when no HTTP
    /// response was received.
    fn send(&self, request: &RemoteRequest) -> Result<RemoteResponse, RemoteError>;
}

/// Production client for `remote`, or `None` without a token.
#[must_use]
pub fn client_from_config(remote: &RemoteConfig) -> Option<RetryingClient> {
    let token = remote.token.as_deref().filter(|t| !t.is_empty())?;
    Some(RetryingClient::new(
        Box::new(UreqTransport::new(token, remote.timeout())),
        Box::new(ThreadSleeper),
        RetryPolicy::from_config(remote),
        remote.api_url.clone(),
    ))
}

/// Parse a `Retry-After` header in its delta-seconds form.
#[must_use]
pub fn parse_retry_after(raw: &str) -> Option<Duration> {
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_requires_token() {
        let mut remote = RemoteConfig::default();
        assert!(client_from_config(&remote).is_none());
        remote.token = Some("t".into());
        let client = client_from_config(&remote).expect("client");
        assert_eq!(client.policy().max_retries, 3);
    }

    #[test]
    fn retry_after_seconds_only() {
        assert_eq!(parse_retry_after(" 12 "), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn invalid_json_body_is_api_error() {
        let resp = RemoteResponse::new(200, "<html>");
        let err = resp.json().expect_err("not json");
        assert!(matches!(err, RemoteError::Api { status: 200, .. }));
    }
}
