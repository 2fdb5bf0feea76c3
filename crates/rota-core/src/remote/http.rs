use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use super::{RemoteRequest, RemoteResponse, Transport, parse_retry_after};
use crate::error::RemoteError;

const USER_AGENT: &str = concat!("rota/", env!("CARGO_PKG_VERSION"));

/// Blocking HTTP transport backed by a `ureq` agent.
pub struct UreqTransport {
    agent: ureq::Agent,
    token: String,
}

impl UreqTransport {
    /// Build a transport that authenticates with `token` and gives every
    /// call at most `timeout`.
    pub fn new(token: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build();
        Self {
            agent,
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for UreqTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UreqTransport").finish_non_exhaustive()
    }
}

impl Transport for UreqTransport {
    fn send(&self, request: &RemoteRequest) -> Result<RemoteResponse, RemoteError> {
        let req = self
            .agent
            .request(request.method.as_str(), &request.url)
            .set("Accept", "application/vnd.github+json")
            .set("Authorization", &format!("Bearer {}", self.token));

        let result = match &request.body {
            Some(body) => req.send_json(body),
            None => req.call(),
        };

        match result {
            Ok(response) => into_remote_response(response),
            Err(ureq::Error::Status(_, response)) => into_remote_response(response),
            Err(ureq::Error::Transport(transport)) => Err(classify_transport(&transport)),
        }
    }
}

fn into_remote_response(response: ureq::Response) -> Result<RemoteResponse, RemoteError> {
    let status = response.status();
    let retry_after = response.header("Retry-After").and_then(parse_retry_after);
    let body = response
        .into_string()
        .map_err(|e| classify(&e))?;
    Ok(RemoteResponse {
        status,
        retry_after,
        body,
    })
}

fn classify_transport(transport: &ureq::Transport) -> RemoteError {
    classify(transport)
}

/// Timeout when any `io::Error` in the source chain timed out, otherwise a
/// network failure.
fn classify(err: &(dyn StdError + 'static)) -> RemoteError {
    let timed_out = std::iter::successors(Some(err), |e: &&(dyn StdError + 'static)| (*e).source())
        .filter_map(|e| e.downcast_ref::<io::Error>())
        .any(|e| matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock));
    if timed_out {
        RemoteError::timeout(err.to_string())
    } else {
        RemoteError::network(err.to_string())
    }
}
