//! Bounded retry with exponential backoff.
//!
//! Schedule for `max_retries = 3`, `initial_delay = 1s`, `backoff_factor = 2`:
//!
//! | attempt | outcome       | wait before next |
//! |---------|---------------|------------------|
//! | 1       | 503           | 1s               |
//! | 2       | 503           | 2s               |
//! | 3       | 503           | (raise `Server`) |
//!
//! A 429 waits for the server's `Retry-After` when given, else the current
//! delay, and does not advance the backoff. Auth, not-found and unclassified
//! statuses are raised on the first attempt.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use super::{Method, RemoteRequest, RemoteResponse, Transport};
use crate::config::RemoteConfig;
use crate::error::RemoteError;

/// Blocks the current thread between attempts.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Real sleeping via [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RemoteConfig::default())
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn from_config(config: &RemoteConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: config.retry_delay(),
            backoff_factor: config.backoff_factor,
        }
    }
}

/// Wraps a [`Transport`] with status classification and retries.
pub struct RetryingClient {
    transport: Box<dyn Transport>,
    sleeper: Box<dyn Sleeper>,
    policy: RetryPolicy,
    base_url: String,
}

impl std::fmt::Debug for RetryingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingClient")
            .field("policy", &self.policy)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RetryingClient {
    pub fn new(
        transport: Box<dyn Transport>,
        sleeper: Box<dyn Sleeper>,
        policy: RetryPolicy,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            sleeper,
            policy,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Issue `method resource` with an optional JSON payload.
    ///
    /// `resource` is appended to the base URL (`/gists/abc`). Only 200 and
    /// 201 count as success.
    ///
    /// # Errors
    ///
    /// The classified [`RemoteError`] of the last attempt once retries are
    /// exhausted, or immediately for non-retryable kinds.
    pub fn call(
        &self,
        method: Method,
        resource: &str,
        payload: Option<&Value>,
    ) -> Result<RemoteResponse, RemoteError> {
        let request = RemoteRequest {
            method,
            url: format!("{}{resource}", self.base_url),
            body: payload.cloned(),
        };

        let attempts = self.policy.max_retries.max(1);
        let mut delay = self.policy.initial_delay;

        for attempt in 1..=attempts {
            debug!(method = method.as_str(), url = %request.url, attempt, "remote call");

            let err = match self.transport.send(&request) {
                Ok(response) if matches!(response.status, 200 | 201) => return Ok(response),
                Ok(response) => {
                    RemoteError::from_status(response.status, response.retry_after, &response.body)
                }
                Err(err) => err,
            };

            if !err.is_retryable() || attempt == attempts {
                return Err(err);
            }

            let wait = match &err {
                RemoteError::RateLimited { retry_after } => retry_after.unwrap_or(delay),
                _ => {
                    let current = delay;
                    delay = delay.saturating_mul(self.policy.backoff_factor);
                    current
                }
            };

            warn!(
                attempt,
                max_attempts = attempts,
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "remote call failed, retrying"
            );
            self.sleeper.sleep(wait);
        }

        // The loop always returns on its last attempt.
        Err(RemoteError::network("retry loop exited without a result"))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport and recording sleeper shared by the remote tests.

    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    pub struct ScriptedTransport {
        pub script: Rc<RefCell<VecDeque<Result<RemoteResponse, RemoteError>>>>,
        pub requests: Rc<RefCell<Vec<RemoteRequest>>>,
    }

    impl ScriptedTransport {
        pub fn new(script: Vec<Result<RemoteResponse, RemoteError>>) -> Self {
            Self {
                script: Rc::new(RefCell::new(script.into())),
                requests: Rc::default(),
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn send(&self, request: &RemoteRequest) -> Result<RemoteResponse, RemoteError> {
            self.requests.borrow_mut().push(request.clone());
            self.script
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(RemoteError::network("script exhausted")))
        }
    }

    #[derive(Clone, Default)]
    pub struct RecordingSleeper {
        pub slept: Rc<RefCell<Vec<Duration>>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.slept.borrow_mut().push(duration);
        }
    }

    pub fn client(
        script: Vec<Result<RemoteResponse, RemoteError>>,
    ) -> (RetryingClient, ScriptedTransport, RecordingSleeper) {
        let transport = ScriptedTransport::new(script);
        let sleeper = RecordingSleeper::default();
        let policy = RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2,
        };
        let client = RetryingClient::new(
            Box::new(transport.clone()),
            Box::new(sleeper.clone()),
            policy,
            "https://api.example.test/",
        );
        (client, transport, sleeper)
    }
}
