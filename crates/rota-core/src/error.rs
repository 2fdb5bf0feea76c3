use std::fmt;
use std::time::Duration;

/// Machine-readable error codes for script-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    CatalogUnreadable,
    SchemaMismatch,
    RemoteAuth,
    RemoteNotFound,
    RemoteRateLimited,
    RemoteServer,
    RemoteNetwork,
    RemoteTimeout,
    RemoteApi,
    RemoteNotConfigured,
    LocalStateWriteFailed,
    SnapshotMissing,
    StaleOverwrite,
    SyncConflict,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::CatalogUnreadable => "E1002",
            Self::SchemaMismatch => "E1003",
            Self::RemoteAuth => "E2001",
            Self::RemoteNotFound => "E2002",
            Self::RemoteRateLimited => "E2003",
            Self::RemoteServer => "E2004",
            Self::RemoteNetwork => "E2005",
            Self::RemoteTimeout => "E2006",
            Self::RemoteApi => "E2007",
            Self::RemoteNotConfigured => "E2008",
            Self::LocalStateWriteFailed => "E3001",
            Self::SnapshotMissing => "E4001",
            Self::StaleOverwrite => "E4002",
            Self::SyncConflict => "E4003",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::CatalogUnreadable => "Catalog file unreadable",
            Self::SchemaMismatch => "State document has an unexpected shape",
            Self::RemoteAuth => "Remote store rejected the credentials",
            Self::RemoteNotFound => "Remote document not found",
            Self::RemoteRateLimited => "Remote store rate limit exceeded",
            Self::RemoteServer => "Remote store server error",
            Self::RemoteNetwork => "Network error talking to the remote store",
            Self::RemoteTimeout => "Remote store request timed out",
            Self::RemoteApi => "Remote store API error",
            Self::RemoteNotConfigured => "Remote store not configured",
            Self::LocalStateWriteFailed => "Local state file write failed",
            Self::SnapshotMissing => "State snapshot missing",
            Self::StaleOverwrite => "Destination is newer than source",
            Self::SyncConflict => "Local and remote state diverged",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and scripts.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in .rota/config.toml and retry."),
            Self::CatalogUnreadable => {
                Some("Check that the catalog file exists and holds an array or a {\"data\": [...]} object.")
            }
            Self::SchemaMismatch => Some("Restore the state file from its .backup.json sibling."),
            Self::RemoteAuth => Some("Check the token in ROTA_TOKEN and its gist permission."),
            Self::RemoteNotFound => {
                Some("Run `rota create-remote-document` and set ROTA_DOCUMENT_ID.")
            }
            Self::RemoteRateLimited => Some("Wait for the rate limit window to reset and retry."),
            Self::RemoteServer | Self::RemoteNetwork | Self::RemoteTimeout => {
                Some("Retry later; the local state file is still authoritative.")
            }
            Self::RemoteApi => None,
            Self::RemoteNotConfigured => Some("Set ROTA_DOCUMENT_ID and ROTA_TOKEN."),
            Self::LocalStateWriteFailed => Some("Check disk space and write permissions."),
            Self::SnapshotMissing => Some("Run `rota sync --status` to see which side exists."),
            Self::StaleOverwrite => Some("Pass --force to overwrite anyway, or use `rota sync --auto`."),
            Self::SyncConflict => Some("Use `rota sync --auto` to merge both sides."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Failure talking to the remote document store.
///
/// Every remote call site matches on this to decide between retrying,
/// falling back to the local file, or treating the document as absent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Invalid credential or missing permission (401/403).
    #[error("authentication failed (status {status})")]
    Auth { status: u16 },

    /// The remote document does not exist (404).
    #[error("remote document not found")]
    NotFound,

    /// Rate limited (429), optionally with the server's `Retry-After`.
    #[error("rate limited{}", retry_after_suffix(.retry_after.as_ref()))]
    RateLimited { retry_after: Option<Duration> },

    /// Server-side failure (5xx).
    #[error("server error (status {status})")]
    Server { status: u16 },

    /// Connection could not be established or was dropped.
    #[error("network error: {message}")]
    Network { message: String },

    /// The per-call timeout elapsed.
    #[error("request timed out: {message}")]
    Timeout { message: String },

    /// Anything else the store answered with.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
}

fn retry_after_suffix(retry_after: Option<&Duration>) -> String {
    retry_after.map_or_else(String::new, |d| format!(", retry after {}s", d.as_secs()))
}

impl RemoteError {
    /// Create a network error.
    #[inline]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    #[inline]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a catch-all API error.
    #[inline]
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Classify a non-success HTTP status.
    #[must_use]
    pub fn from_status(status: u16, retry_after: Option<Duration>, body: &str) -> Self {
        match status {
            401 | 403 => Self::Auth { status },
            404 => Self::NotFound,
            429 => Self::RateLimited { retry_after },
            500..=599 => Self::Server { status },
            _ => Self::api(status, body.trim()),
        }
    }

    /// Whether the retrying client may attempt the call again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Server { .. } | Self::Network { .. } | Self::Timeout { .. }
        )
    }

    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Auth { .. } => ErrorCode::RemoteAuth,
            Self::NotFound => ErrorCode::RemoteNotFound,
            Self::RateLimited { .. } => ErrorCode::RemoteRateLimited,
            Self::Server { .. } => ErrorCode::RemoteServer,
            Self::Network { .. } => ErrorCode::RemoteNetwork,
            Self::Timeout { .. } => ErrorCode::RemoteTimeout,
            Self::Api { .. } => ErrorCode::RemoteApi,
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}
