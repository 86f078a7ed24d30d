use std::fmt;
use std::time::Duration;

use http::StatusCode;
use session_http::HttpError;
use thiserror::Error;

/// Why a refresh cycle ended the session.
///
/// One value is cloned to every request that waited on the failed cycle and
/// handed to the [`SessionTerminator`](crate::SessionTerminator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionExpiry {
    reason: String,
}

impl SessionExpiry {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Diagnostic text; never contains token or credential values.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for SessionExpiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Errors surfaced by [`AuthenticatedClient::send`](crate::AuthenticatedClient::send).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// The request was rejected again after it had already been replayed
    /// with a refreshed token. A per-request failure; the session is intact.
    #[error("request unauthorized after token refresh: HTTP {status}")]
    Authorization { status: StatusCode },

    /// The refresh cycle this request waited on failed. The session has
    /// been terminated.
    #[error("session expired: {0}")]
    SessionExpired(SessionExpiry),

    /// Transport failure, passed through unaltered.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// The token store did not answer within the lookup timeout.
    #[error("token store did not answer within {0:?}")]
    TokenLookupTimeout(Duration),

    /// The refresh task ended without settling (it panicked or the runtime
    /// shut down).
    #[error("token refresh aborted before it settled")]
    RefreshAborted,

    /// The session client could not be built from its configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SessionError {
    #[must_use]
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired(_))
    }

    #[must_use]
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization { .. })
    }
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to load session config: {0}")]
    Load(Box<figment::Error>),

    #[error("invalid session config: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn authorization_renders_status() {
        let e = SessionError::Authorization {
            status: StatusCode::UNAUTHORIZED,
        };
        assert_eq!(
            e.to_string(),
            "request unauthorized after token refresh: HTTP 401 Unauthorized"
        );
        assert!(e.is_authorization());
        assert!(!e.is_session_expired());
    }

    #[test]
    fn session_expired_renders_reason() {
        let e = SessionError::SessionExpired(SessionExpiry::new("refresh rejected: HTTP 403"));
        assert_eq!(e.to_string(), "session expired: refresh rejected: HTTP 403");
        assert!(e.is_session_expired());
    }

    #[test]
    fn http_error_is_transparent() {
        let e = SessionError::from(HttpError::Timeout(Duration::from_secs(5)));
        assert_eq!(e.to_string(), "Request timed out after 5s");
        assert!(matches!(e, SessionError::Http(HttpError::Timeout(_))));
    }

    #[test]
    fn config_error_renders() {
        let e = ConfigError::Invalid("unauthorized_statuses must not be empty".into());
        assert_eq!(
            e.to_string(),
            "invalid session config: unauthorized_statuses must not be empty"
        );
    }
}
