//! Scripted backend and collaborators shared by the integration suites.

#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use parking_lot::Mutex;
use session_auth::{
    AccessToken, AuthenticatedClient, FnTerminator, InMemoryTokenStore, RefreshEndpoint,
    RefreshError, SessionEvent, SessionExpiry, SessionMetrics, TokenStore, async_trait,
};
use session_http::{HttpError, ResponseBody, TransportSecurity, full_body};
use tokio::sync::Notify;
use url::Url;

pub const API: &str = "https://api.example.com";
pub const REFRESH_URL: &str = "https://api.example.com/auth/refresh";

pub type BackendFuture =
    Pin<Box<dyn Future<Output = Result<Response<ResponseBody>, HttpError>> + Send>>;

/// In-process stand-in for the portal backend.
///
/// - `/auth/refresh` always answers 401
/// - `/always-401` always answers 401
/// - `/down` answers 503
/// - `/offline` fails at the transport level
/// - `/slow/*` waits for `release_slow` before answering
/// - anything else answers 200 for the accepted token and 401 otherwise
pub struct Backend {
    accepted: Mutex<String>,
    hits: Mutex<Vec<Hit>>,
    unauthorized: AtomicUsize,
    slow_gate: Notify,
}

#[derive(Debug, Clone)]
pub struct Hit {
    pub path: String,
    pub authorization: Option<String>,
}

impl Backend {
    pub fn new(accepted: &str) -> Arc<Self> {
        Arc::new(Self {
            accepted: Mutex::new(accepted.to_owned()),
            hits: Mutex::new(Vec::new()),
            unauthorized: AtomicUsize::new(0),
            slow_gate: Notify::new(),
        })
    }

    pub fn hits(&self) -> Vec<Hit> {
        self.hits.lock().clone()
    }

    pub fn hits_with(&self, authorization: &str) -> usize {
        self.hits
            .lock()
            .iter()
            .filter(|hit| hit.authorization.as_deref() == Some(authorization))
            .count()
    }

    pub fn unauthorized_count(&self) -> usize {
        self.unauthorized.load(Ordering::SeqCst)
    }

    pub fn release_slow(&self) {
        self.slow_gate.notify_waiters();
    }

    async fn handle(
        self: Arc<Self>,
        req: Request<Full<Bytes>>,
    ) -> Result<Response<ResponseBody>, HttpError> {
        let path = req.uri().path().to_owned();
        let authorization = req
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        self.hits.lock().push(Hit {
            path: path.clone(),
            authorization: authorization.clone(),
        });

        if path == "/offline" {
            return Err(HttpError::Timeout(Duration::from_secs(30)));
        }
        if path == "/down" {
            return Ok(status(StatusCode::SERVICE_UNAVAILABLE, "maintenance"));
        }

        let accepted = format!("Bearer {}", self.accepted.lock());
        let authorized = authorization.as_deref() == Some(accepted.as_str());

        if path.starts_with("/slow") && !authorized {
            self.slow_gate.notified().await;
        }

        if path == "/auth/refresh" || path == "/always-401" || !authorized {
            self.unauthorized.fetch_add(1, Ordering::SeqCst);
            return Ok(status(StatusCode::UNAUTHORIZED, "token expired"));
        }
        Ok(status(StatusCode::OK, &path))
    }
}

fn status(code: StatusCode, body: &str) -> Response<ResponseBody> {
    let mut response = Response::new(full_body(body.to_owned()));
    *response.status_mut() = code;
    response
}

/// Tower transport routed to a [`Backend`].
#[derive(Clone)]
pub struct BackendService(pub Arc<Backend>);

impl tower::Service<Request<Full<Bytes>>> for BackendService {
    type Response = Response<ResponseBody>;
    type Error = HttpError;
    type Future = BackendFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        Box::pin(Arc::clone(&self.0).handle(req))
    }
}

/// Refresh endpoint that answers with a scripted result once released.
pub struct ScriptedEndpoint {
    url: Url,
    calls: AtomicUsize,
    gate: Notify,
    gated: bool,
    outcome: Mutex<Option<Result<String, StatusCode>>>,
}

impl ScriptedEndpoint {
    /// Answers immediately.
    pub fn ok(token: &str) -> Arc<Self> {
        Self::build(Ok(token.to_owned()), false)
    }

    /// Answers after [`release`](Self::release).
    pub fn gated_ok(token: &str) -> Arc<Self> {
        Self::build(Ok(token.to_owned()), true)
    }

    pub fn gated_rejecting(status: StatusCode) -> Arc<Self> {
        Self::build(Err(status), true)
    }

    fn build(outcome: Result<String, StatusCode>, gated: bool) -> Arc<Self> {
        Arc::new(Self {
            url: Url::parse(REFRESH_URL).unwrap(),
            calls: AtomicUsize::new(0),
            gate: Notify::new(),
            gated,
            outcome: Mutex::new(Some(outcome)),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }

    /// Answer the next call with `token` as well.
    pub fn rearm(&self, token: &str) {
        *self.outcome.lock() = Some(Ok(token.to_owned()));
    }
}

#[async_trait]
impl RefreshEndpoint for ScriptedEndpoint {
    async fn refresh(&self) -> Result<AccessToken, RefreshError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.gated {
            self.gate.notified().await;
        }
        match self.outcome.lock().take() {
            Some(Ok(token)) => Ok(AccessToken::new(token)),
            Some(Err(status)) => Err(RefreshError::Rejected { status }),
            None => Err(RefreshError::MissingCredential),
        }
    }

    fn url(&self) -> &Url {
        &self.url
    }
}

/// Metrics sink that keeps every event.
#[derive(Default)]
pub struct RecordingMetrics {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingMetrics {
    pub fn count(&self, event: SessionEvent) -> usize {
        self.events.lock().iter().filter(|e| **e == event).count()
    }
}

impl SessionMetrics for RecordingMetrics {
    fn record_event(&self, event: SessionEvent) {
        self.events.lock().push(event);
    }

    fn record_refresh_duration(&self, _duration: Duration) {}
}

/// Everything a scenario needs to make assertions.
pub struct Harness {
    pub client: AuthenticatedClient<BackendService>,
    pub backend: Arc<Backend>,
    pub endpoint: Arc<ScriptedEndpoint>,
    pub store: Arc<InMemoryTokenStore>,
    pub metrics: Arc<RecordingMetrics>,
    pub terminated: Arc<AtomicUsize>,
}

/// Backend accepting `accepted`, store seeded with `initial`.
pub fn harness(accepted: &str, initial: Option<&str>, endpoint: Arc<ScriptedEndpoint>) -> Harness {
    harness_with_store(accepted, initial, endpoint, None)
}

/// Like [`harness`], but the client talks to `store_override` when given.
pub fn harness_with_store(
    accepted: &str,
    initial: Option<&str>,
    endpoint: Arc<ScriptedEndpoint>,
    store_override: Option<Arc<dyn TokenStore>>,
) -> Harness {
    let backend = Backend::new(accepted);
    let store = Arc::new(match initial {
        Some(token) => InMemoryTokenStore::with_token(AccessToken::new(token)),
        None => InMemoryTokenStore::new(),
    });
    let metrics = Arc::new(RecordingMetrics::default());
    let terminated = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&terminated);

    let client_store: Arc<dyn TokenStore> =
        store_override.unwrap_or_else(|| Arc::clone(&store) as Arc<dyn TokenStore>);
    let client = AuthenticatedClient::builder(
        BackendService(Arc::clone(&backend)),
        Arc::clone(&endpoint) as Arc<dyn RefreshEndpoint>,
    )
    .base_url(Url::parse(API).unwrap())
    .token_store(client_store)
    .metrics(Arc::clone(&metrics) as Arc<dyn SessionMetrics>)
    .terminator(Arc::new(FnTerminator::new(move |_: &SessionExpiry| {
        counter.fetch_add(1, Ordering::SeqCst);
    })))
    .transport_security(TransportSecurity::TlsOnly)
    .build();

    Harness {
        client,
        backend,
        endpoint,
        store,
        metrics,
        terminated,
    }
}

/// Yield until `condition` holds; panics after a generous bound.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
