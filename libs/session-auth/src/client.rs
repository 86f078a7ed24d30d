use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use session_http::{
    HttpClient, HttpClientBuilder, HttpError, HttpResponse, RequestDescriptor, ResponseBody,
    TransportSecurity,
};
use tower::{Service, ServiceExt};
use url::Url;

use crate::config::SessionClientConfig;
use crate::coordinator::RefreshCoordinator;
use crate::credential::RefreshCredentialSource;
use crate::endpoint::{HttpRefreshEndpoint, RefreshEndpoint};
use crate::error::SessionError;
use crate::metrics::{NoOpMetrics, SessionEvent, SessionMetrics};
use crate::store::{InMemoryTokenStore, TokenStore};
use crate::terminator::{LoggingTerminator, SessionTerminator};
use crate::token::AccessToken;

/// Default body limit for transports other than [`HttpClient`].
const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// HTTP client that attaches the session's bearer token and recovers from
/// token expiry.
///
/// [`send`](Self::send) is the only entry point. When a request is answered
/// with an unauthorized status (401 by default):
///
/// - the first such request starts one shared refresh; requests rejected
///   while it is in flight wait for the same refresh instead of starting
///   their own
/// - on success every waiting request is replayed once with the new token
/// - on failure every waiting request gets [`SessionError::SessionExpired`]
///   and the [`SessionTerminator`] runs once
///
/// A replayed request that is rejected again fails with
/// [`SessionError::Authorization`]. Requests to the refresh endpoint itself
/// are sent as-is. Every other status, and every transport error, reaches
/// the caller unchanged.
///
/// Generic over the transport so any `tower::Service` with the
/// [`HttpClient`] signature can be used; cloning is cheap and clones share
/// one session.
pub struct AuthenticatedClient<S = HttpClient> {
    transport: S,
    coordinator: Arc<RefreshCoordinator>,
    base_url: Option<Url>,
    unauthorized: Arc<[StatusCode]>,
    transport_security: TransportSecurity,
    max_body_size: usize,
}

impl<S: Clone> Clone for AuthenticatedClient<S> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            coordinator: Arc::clone(&self.coordinator),
            base_url: self.base_url.clone(),
            unauthorized: Arc::clone(&self.unauthorized),
            transport_security: self.transport_security,
            max_body_size: self.max_body_size,
        }
    }
}

impl<S> std::fmt::Debug for AuthenticatedClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedClient")
            .field("coordinator", &self.coordinator)
            .field("base_url", &self.base_url.as_ref().map(Url::as_str))
            .field("unauthorized", &self.unauthorized)
            .field("transport_security", &self.transport_security)
            .finish_non_exhaustive()
    }
}

impl AuthenticatedClient<HttpClient> {
    /// Builder with real HTTP clients for requests and for the refresh
    /// endpoint, configured from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid or a client cannot be built.
    pub fn from_config(
        config: &SessionClientConfig,
        credentials: Arc<dyn RefreshCredentialSource>,
    ) -> Result<AuthenticatedClientBuilder<HttpClient>, SessionError> {
        config.validate()?;

        let transport = HttpClientBuilder::with_config(config.http_config()).build()?;
        let endpoint = HttpRefreshEndpoint::new(
            config.refresh_url.clone(),
            config.credential.clone(),
            credentials,
            config.refresh_http_config(),
        )?;

        let max_body_size = transport.max_body_size();
        let security = transport.transport_security();
        let mut builder = AuthenticatedClient::builder(transport, Arc::new(endpoint))
            .unauthorized_statuses(config.unauthorized_status_codes())
            .token_lookup_timeout(config.token_lookup_timeout)
            .transport_security(security)
            .max_body_size(max_body_size);
        if let Some(base) = &config.base_url {
            builder = builder.base_url(base.clone());
        }
        Ok(builder)
    }
}

impl<S> AuthenticatedClient<S> {
    /// Start building a client over `transport`.
    #[must_use]
    pub fn builder(
        transport: S,
        endpoint: Arc<dyn RefreshEndpoint>,
    ) -> AuthenticatedClientBuilder<S> {
        AuthenticatedClientBuilder::new(transport, endpoint)
    }

    /// Seed the session with a token obtained at login.
    pub async fn sign_in(&self, token: AccessToken) {
        self.coordinator.sign_in(token).await;
    }

    /// Clear the token from the client and the store. The terminator is not
    /// invoked.
    pub async fn sign_out(&self) {
        self.coordinator.sign_out().await;
    }

    /// Whether a refresh cycle is in flight.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.coordinator.is_refreshing()
    }

    /// The coordinator shared by this client and its clones.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    /// Make relative URLs absolute against `base_url`. Returns the parsed
    /// URL when there is one.
    fn resolve(&self, descriptor: RequestDescriptor) -> (RequestDescriptor, Option<Url>) {
        if descriptor.url().trim().is_empty() {
            return (descriptor, None);
        }
        match Url::parse(descriptor.url()) {
            Ok(url) => (descriptor, Some(url)),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                match self.base_url.as_ref().map(|base| base.join(descriptor.url())) {
                    Some(Ok(url)) => (descriptor.with_url(url.as_str()), Some(url)),
                    _ => (descriptor, None),
                }
            }
            Err(_) => (descriptor, None),
        }
    }

    fn targets_refresh_endpoint(&self, url: &Url) -> bool {
        let refresh = self.coordinator.endpoint().url();
        url.scheme() == refresh.scheme()
            && url.host_str() == refresh.host_str()
            && url.port_or_known_default() == refresh.port_or_known_default()
            && url.path() == refresh.path()
    }
}

impl<S> AuthenticatedClient<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResponseBody>, Error = HttpError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    /// Send `descriptor` with the session's bearer token.
    ///
    /// The descriptor's own `Authorization` header is replaced. Relative
    /// URLs are resolved against `base_url`.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Authorization`] if the request was still rejected
    ///   after being replayed with a refreshed token
    /// - [`SessionError::SessionExpired`] if the refresh it waited on failed
    /// - [`SessionError::Http`] for invalid requests and transport failures
    /// - [`SessionError::TokenLookupTimeout`] if the token store hung
    /// - [`SessionError::RefreshAborted`] if the refresh task died
    pub async fn send(&self, descriptor: RequestDescriptor) -> Result<HttpResponse, SessionError> {
        let (mut descriptor, url) = self.resolve(descriptor);
        // Reject malformed requests before any token work
        descriptor.to_request(self.transport_security)?;

        if url.as_ref().is_some_and(|url| self.targets_refresh_endpoint(url)) {
            tracing::trace!("refresh endpoint request; recovery bypassed");
            return Ok(self.dispatch(&descriptor).await?);
        }

        let mut grant = self.coordinator.acquire().await?;
        loop {
            descriptor.set_authorization(
                grant
                    .token
                    .bearer_header()
                    .map_err(|e| SessionError::Http(HttpError::InvalidHeaderValue(e)))?,
            );

            let response = self.dispatch(&descriptor).await?;
            let status = response.status();
            if !self.unauthorized.contains(&status) {
                return Ok(response);
            }

            if grant.recovered {
                self.coordinator.record(SessionEvent::ReplayRejected);
                tracing::warn!(
                    status = status.as_u16(),
                    method = %descriptor.method(),
                    epoch = grant.epoch,
                    "request rejected with a refreshed token"
                );
                return Err(SessionError::Authorization { status });
            }

            tracing::debug!(
                status = status.as_u16(),
                method = %descriptor.method(),
                epoch = grant.epoch,
                "request unauthorized; recovering token"
            );
            grant = self.coordinator.recover(grant.epoch).await?;
            self.coordinator.record(SessionEvent::RequestReplayed);
        }
    }

    async fn dispatch(&self, descriptor: &RequestDescriptor) -> Result<HttpResponse, HttpError> {
        let request = descriptor.to_request(self.transport_security)?;
        let response = self.transport.clone().oneshot(request).await?;
        Ok(HttpResponse::new(response, self.max_body_size))
    }
}

/// Builder for [`AuthenticatedClient`].
pub struct AuthenticatedClientBuilder<S> {
    transport: S,
    endpoint: Arc<dyn RefreshEndpoint>,
    store: Option<Arc<dyn TokenStore>>,
    terminator: Option<Arc<dyn SessionTerminator>>,
    metrics: Option<Arc<dyn SessionMetrics>>,
    base_url: Option<Url>,
    unauthorized: Vec<StatusCode>,
    token_lookup_timeout: Duration,
    transport_security: TransportSecurity,
    max_body_size: usize,
}

impl<S> std::fmt::Debug for AuthenticatedClientBuilder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedClientBuilder")
            .field("refresh_url", &self.endpoint.url().as_str())
            .field("base_url", &self.base_url.as_ref().map(Url::as_str))
            .field("unauthorized", &self.unauthorized)
            .field("token_lookup_timeout", &self.token_lookup_timeout)
            .field("transport_security", &self.transport_security)
            .finish_non_exhaustive()
    }
}

impl<S> AuthenticatedClientBuilder<S> {
    fn new(transport: S, endpoint: Arc<dyn RefreshEndpoint>) -> Self {
        Self {
            transport,
            endpoint,
            store: None,
            terminator: None,
            metrics: None,
            base_url: None,
            unauthorized: vec![StatusCode::UNAUTHORIZED],
            token_lookup_timeout: Duration::from_secs(2),
            transport_security: TransportSecurity::TlsOnly,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Token store (default: a fresh [`InMemoryTokenStore`])
    #[must_use]
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Session terminator (default: [`LoggingTerminator`])
    #[must_use]
    pub fn terminator(mut self, terminator: Arc<dyn SessionTerminator>) -> Self {
        self.terminator = Some(terminator);
        self
    }

    /// Metrics sink (default: [`NoOpMetrics`])
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<dyn SessionMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Statuses that trigger recovery (default: `[401]`); an empty list
    /// keeps the default.
    #[must_use]
    pub fn unauthorized_statuses(mut self, statuses: Vec<StatusCode>) -> Self {
        if !statuses.is_empty() {
            self.unauthorized = statuses;
        }
        self
    }

    #[must_use]
    pub fn token_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.token_lookup_timeout = timeout;
        self
    }

    /// Scheme policy for request URLs (default: `TlsOnly`)
    #[must_use]
    pub fn transport_security(mut self, security: TransportSecurity) -> Self {
        self.transport_security = security;
        self
    }

    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    #[must_use]
    pub fn build(self) -> AuthenticatedClient<S> {
        let coordinator = RefreshCoordinator::new(
            self.store
                .unwrap_or_else(|| Arc::new(InMemoryTokenStore::new())),
            self.endpoint,
            self.terminator.unwrap_or_else(|| Arc::new(LoggingTerminator)),
            self.metrics.unwrap_or_else(|| Arc::new(NoOpMetrics)),
            self.token_lookup_timeout,
        );

        AuthenticatedClient {
            transport: self.transport,
            coordinator: Arc::new(coordinator),
            base_url: self.base_url,
            unauthorized: self.unauthorized.into(),
            transport_security: self.transport_security,
            max_body_size: self.max_body_size,
        }
    }
}
