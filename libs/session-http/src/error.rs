use thiserror::Error;

/// Why a request URL was rejected before any I/O happened.
///
/// Match on this instead of the `reason` text, which is for logs only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// The URL is empty
    Empty,
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL has no host/authority component
    MissingAuthority,
    /// URL has no scheme (http/https)
    MissingScheme,
}

/// Transport-level error taxonomy.
///
/// A non-2xx status is *not* an error at this level: [`HttpClient::execute`]
/// returns `Ok` for every status and callers opt into status checks via
/// [`HttpResponse::error_for_status`].
///
/// [`HttpClient::execute`]: crate::HttpClient::execute
/// [`HttpResponse::error_for_status`]: crate::HttpResponse::error_for_status
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Single request attempt timed out
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Transport error (network, connection, etc)
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Response body exceeded size limit
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// HTTP non-2xx status, produced only by explicit status checks
    #[error("HTTP {status}: {body_preview}")]
    HttpStatus {
        status: http::StatusCode,
        body_preview: String,
        content_type: Option<String>,
    },

    /// JSON (de)serialization error
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Form URL encoding error
    #[error("Form encoding failed: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),

    /// Request buffer is full (fail-fast)
    #[error("Service overloaded: request buffer is full")]
    Overloaded,

    /// Internal service failure (buffer worker died, channel closed)
    #[error("Service unavailable: internal failure")]
    ServiceClosed,

    /// Invalid URL
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        /// The URL that failed validation
        url: String,
        /// Structured failure classification for programmatic matching
        kind: InvalidUriKind,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// URL scheme not allowed by the transport security mode
    #[error("URL scheme '{scheme}' not allowed: {reason}")]
    InvalidScheme { scheme: String, reason: String },
}

impl HttpError {
    /// Status code carried by an [`HttpError::HttpStatus`], if any.
    #[must_use]
    pub fn status(&self) -> Option<http::StatusCode> {
        match self {
            HttpError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::error::Error;
    use std::fmt;

    #[derive(Debug)]
    struct TestError(&'static str);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl Error for TestError {}

    #[test]
    fn transport_error_keeps_source_for_downcast() {
        let err = HttpError::Transport(Box::new(TestError("connection refused")));

        let source = err.source().expect("transport error should expose a source");
        let inner = source.downcast_ref::<TestError>().unwrap();
        assert_eq!(inner.0, "connection refused");
    }

    #[test]
    fn status_accessor_only_for_http_status() {
        let err = HttpError::HttpStatus {
            status: http::StatusCode::SERVICE_UNAVAILABLE,
            body_preview: String::new(),
            content_type: None,
        };
        assert_eq!(err.status(), Some(http::StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(HttpError::Overloaded.status(), None);
    }

    #[test]
    fn invalid_uri_renders_url_and_reason() {
        let err = HttpError::InvalidUri {
            url: "/children".into(),
            kind: InvalidUriKind::MissingAuthority,
            reason: "missing host/authority".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid URL '/children': missing host/authority"
        );
    }
}
