use std::sync::Arc;

use async_trait::async_trait;
use http::header::{ACCEPT, COOKIE, HeaderName};
use http::{HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use session_http::{HttpClient, HttpClientBuilder, HttpClientConfig, HttpError, RequestDescriptor};
use thiserror::Error;
use url::Url;
use zeroize::Zeroizing;

use crate::credential::RefreshCredentialSource;
use crate::token::AccessToken;

/// Default cookie carrying the refresh credential.
pub const DEFAULT_REFRESH_COOKIE: &str = "refreshToken";

/// Why a refresh attempt did not produce a token.
///
/// Messages never contain the credential or token values.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RefreshError {
    /// No refresh credential is available (the user never signed in, or
    /// the credential was removed).
    #[error("no refresh credential available")]
    MissingCredential,

    /// The credential cannot be carried in the configured header or cookie.
    #[error("refresh credential is not a valid header value")]
    InvalidCredential,

    /// The endpoint answered with a non-2xx status.
    #[error("refresh endpoint rejected the credential: HTTP {status}")]
    Rejected { status: StatusCode },

    /// 2xx response without a usable token.
    #[error("invalid refresh response: {0}")]
    InvalidResponse(String),

    /// Network, TLS or timeout failure reaching the endpoint.
    #[error("{0}")]
    Transport(String),
}

/// Exchanges the refresh credential for a new access token.
///
/// Calls made by an implementation must never go through the recovery
/// logic of an [`AuthenticatedClient`](crate::AuthenticatedClient).
#[async_trait]
pub trait RefreshEndpoint: Send + Sync {
    async fn refresh(&self) -> Result<AccessToken, RefreshError>;

    /// Requests to this URL bypass recovery.
    fn url(&self) -> &Url;
}

/// How the refresh credential travels to the endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum CredentialPlacement {
    /// `Cookie: <name>=<credential>`
    Cookie {
        #[serde(default = "default_cookie_name")]
        name: String,
    },
    /// `<name>: <credential>`
    Header { name: String },
}

fn default_cookie_name() -> String {
    DEFAULT_REFRESH_COOKIE.to_owned()
}

impl Default for CredentialPlacement {
    fn default() -> Self {
        Self::Cookie {
            name: default_cookie_name(),
        }
    }
}

impl CredentialPlacement {
    fn header(&self, credential: &str) -> Result<(HeaderName, HeaderValue), RefreshError> {
        let (name, raw) = match self {
            Self::Cookie { name } => (COOKIE, Zeroizing::new(format!("{name}={credential}"))),
            Self::Header { name } => (
                HeaderName::try_from(name.as_str()).map_err(|_| RefreshError::InvalidCredential)?,
                Zeroizing::new(credential.to_owned()),
            ),
        };
        let mut value =
            HeaderValue::from_str(&raw).map_err(|_| RefreshError::InvalidCredential)?;
        value.set_sensitive(true);
        Ok((name, value))
    }
}

#[derive(Deserialize)]
struct RefreshResponse {
    #[serde(alias = "accessToken", alias = "access_token")]
    token: String,
}

/// [`RefreshEndpoint`] that POSTs to a URL with a plain [`HttpClient`].
pub struct HttpRefreshEndpoint {
    client: HttpClient,
    url: Url,
    placement: CredentialPlacement,
    credentials: Arc<dyn RefreshCredentialSource>,
}

impl std::fmt::Debug for HttpRefreshEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRefreshEndpoint")
            .field("url", &self.url.as_str())
            .field("placement", &self.placement)
            .finish_non_exhaustive()
    }
}

impl HttpRefreshEndpoint {
    /// Build an endpoint with its own client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        url: Url,
        placement: CredentialPlacement,
        credentials: Arc<dyn RefreshCredentialSource>,
        http_config: HttpClientConfig,
    ) -> Result<Self, HttpError> {
        let client = HttpClientBuilder::with_config(http_config).build()?;
        Ok(Self::with_client(client, url, placement, credentials))
    }

    /// Use an existing client. It must not be session-aware.
    #[must_use]
    pub fn with_client(
        client: HttpClient,
        url: Url,
        placement: CredentialPlacement,
        credentials: Arc<dyn RefreshCredentialSource>,
    ) -> Self {
        Self {
            client,
            url,
            placement,
            credentials,
        }
    }
}

#[async_trait]
impl RefreshEndpoint for HttpRefreshEndpoint {
    async fn refresh(&self) -> Result<AccessToken, RefreshError> {
        let credential = self
            .credentials
            .refresh_credential()
            .ok_or(RefreshError::MissingCredential)?;
        let (name, value) = self.placement.header(credential.expose())?;

        let descriptor = RequestDescriptor::post(self.url.as_str())
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .header(name, value);

        let response = self
            .client
            .execute(&descriptor)
            .await
            .map_err(|e| RefreshError::Transport(describe_http_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "refresh endpoint rejected credential");
            return Err(RefreshError::Rejected { status });
        }

        let body: RefreshResponse = response.json().await.map_err(|e| match e {
            HttpError::Json(err) => RefreshError::InvalidResponse(err.to_string()),
            other => RefreshError::Transport(describe_http_error(&other)),
        })?;

        if body.token.is_empty() {
            return Err(RefreshError::InvalidResponse("token is empty".to_owned()));
        }

        tracing::debug!("access token refreshed");
        Ok(AccessToken::new(body.token))
    }

    fn url(&self) -> &Url {
        &self.url
    }
}

/// Render an [`HttpError`] for a [`RefreshError::Transport`] message.
///
/// Response bodies are left out so server diagnostics cannot leak into logs.
fn describe_http_error(e: &HttpError) -> String {
    const PREFIX: &str = "refresh endpoint";

    match e {
        HttpError::HttpStatus { status, .. } => format!("{PREFIX} HTTP {status}"),
        HttpError::Timeout(duration) => format!("{PREFIX} request timed out after {duration:?}"),
        HttpError::Transport(err) => format!("{PREFIX} transport error: {err}"),
        HttpError::Tls(err) => format!("{PREFIX} TLS error: {err}"),
        HttpError::BodyTooLarge { limit, actual } => {
            format!("{PREFIX} response too large: limit {limit} bytes, got {actual} bytes")
        }
        HttpError::Overloaded => format!("{PREFIX} request rejected: client overloaded"),
        HttpError::ServiceClosed => format!("{PREFIX} client unavailable"),
        HttpError::InvalidUri { url, reason, .. } => {
            format!("{PREFIX} invalid URL '{url}': {reason}")
        }
        HttpError::InvalidScheme { scheme, reason } => {
            format!("{PREFIX} invalid scheme '{scheme}': {reason}")
        }
        _ => format!("{PREFIX} request failed"),
    }
}
