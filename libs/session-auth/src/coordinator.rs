//! Single-flight refresh of the access token.
//!
//! The coordinator owns the session's token state:
//!
//! - `phase`: `Idle`, or `Refreshing` with the waiters of the cycle in flight
//! - `token`: the in-memory mirror of the current access token
//! - `epoch`: bumped on every token change, so a request can tell whether
//!   the token it was rejected with has already been replaced
//!
//! All transitions happen under a `parking_lot::Mutex` that is never held
//! across an `.await`. Checking the phase and joining or starting a cycle is
//! one critical section, so two concurrent 401s can never both become
//! leader.
//!
//! A cycle runs on its own task. Every participant, the request that
//! started it included, waits on a `oneshot` receiver; dropping a caller's
//! future therefore never strands the others. If the task dies before it
//! settles, a drop guard returns the phase to `Idle` and the waiters see
//! [`SessionError::RefreshAborted`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::endpoint::RefreshEndpoint;
use crate::error::{SessionError, SessionExpiry};
use crate::metrics::{SessionEvent, SessionMetrics};
use crate::store::TokenStore;
use crate::terminator::SessionTerminator;
use crate::token::AccessToken;

/// A token handed to one request attempt.
#[derive(Debug, Clone)]
pub(crate) struct TokenGrant {
    pub(crate) token: AccessToken,
    pub(crate) epoch: u64,
    /// The token came out of recovery; another unauthorized answer is final.
    pub(crate) recovered: bool,
}

/// Result of one cycle, sent to each waiter.
enum CycleOutcome {
    Refreshed { token: AccessToken, epoch: u64 },
    Expired(SessionExpiry),
}

enum Phase {
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<CycleOutcome>>,
    },
}

struct State {
    phase: Phase,
    token: Option<AccessToken>,
    epoch: u64,
}

impl State {
    fn replace_token(&mut self, token: Option<AccessToken>) -> u64 {
        self.token = token;
        self.epoch += 1;
        self.epoch
    }

    /// Back to `Idle`, returning whoever waited on the cycle.
    fn settle(&mut self) -> Vec<oneshot::Sender<CycleOutcome>> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Refreshing { waiters } => waiters,
            Phase::Idle => Vec::new(),
        }
    }
}

/// Owns the refresh state machine and the collaborators it drives.
///
/// One coordinator per signed-in session; share it through `Arc`.
pub struct RefreshCoordinator {
    state: Mutex<State>,
    store: Arc<dyn TokenStore>,
    endpoint: Arc<dyn RefreshEndpoint>,
    terminator: Arc<dyn SessionTerminator>,
    metrics: Arc<dyn SessionMetrics>,
    token_lookup_timeout: Duration,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RefreshCoordinator")
            .field("refreshing", &matches!(state.phase, Phase::Refreshing { .. }))
            .field("has_token", &state.token.is_some())
            .field("epoch", &state.epoch)
            .field("refresh_url", &self.endpoint.url().as_str())
            .field("token_lookup_timeout", &self.token_lookup_timeout)
            .finish_non_exhaustive()
    }
}

impl RefreshCoordinator {
    #[must_use]
    pub fn new(
        store: Arc<dyn TokenStore>,
        endpoint: Arc<dyn RefreshEndpoint>,
        terminator: Arc<dyn SessionTerminator>,
        metrics: Arc<dyn SessionMetrics>,
        token_lookup_timeout: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(State {
                phase: Phase::Idle,
                token: None,
                epoch: 0,
            }),
            store,
            endpoint,
            terminator,
            metrics,
            token_lookup_timeout,
        }
    }

    /// Whether a refresh cycle is in flight.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        matches!(self.state.lock().phase, Phase::Refreshing { .. })
    }

    /// Token generation; increases whenever the token changes.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    pub(crate) fn endpoint(&self) -> &dyn RefreshEndpoint {
        self.endpoint.as_ref()
    }

    pub(crate) fn record(&self, event: SessionEvent) {
        self.metrics.record_event(event);
    }

    /// Adopt a token obtained out of band (after a login).
    pub async fn sign_in(&self, token: AccessToken) {
        self.store_token(Some(token.clone())).await;
        let epoch = self.state.lock().replace_token(Some(token));
        tracing::debug!(epoch, "session signed in");
    }

    /// Drop the token everywhere without invoking the terminator.
    pub async fn sign_out(&self) {
        self.store_token(None).await;
        let epoch = self.state.lock().replace_token(None);
        tracing::debug!(epoch, "session signed out");
    }

    /// Token for a first attempt.
    ///
    /// Uses the mirror when idle, otherwise asks the store. With no token
    /// anywhere, or a cycle already in flight, the request waits for a
    /// refresh and the grant is marked `recovered`.
    pub(crate) async fn acquire(self: &Arc<Self>) -> Result<TokenGrant, SessionError> {
        let refreshing = {
            let state = self.state.lock();
            match (&state.phase, &state.token) {
                (Phase::Idle, Some(token)) => {
                    return Ok(TokenGrant {
                        token: token.clone(),
                        epoch: state.epoch,
                        recovered: false,
                    });
                }
                (phase, _) => matches!(phase, Phase::Refreshing { .. }),
            }
        };

        if !refreshing {
            let looked_up =
                tokio::time::timeout(self.token_lookup_timeout, self.store.current_token())
                    .await
                    .map_err(|_| {
                        tracing::warn!(
                            timeout = ?self.token_lookup_timeout,
                            "token store lookup timed out"
                        );
                        SessionError::TokenLookupTimeout(self.token_lookup_timeout)
                    })?;

            if let Some(token) = looked_up {
                return Ok(self.adopt(token));
            }
        }

        self.await_refresh(None).await
    }

    /// Token for a replay after an unauthorized answer to a request that
    /// carried the token of `failed_epoch`.
    ///
    /// If that token was already replaced the current one is returned at
    /// once; otherwise the request joins the cycle in flight or starts one.
    pub(crate) async fn recover(self: &Arc<Self>, failed_epoch: u64) -> Result<TokenGrant, SessionError> {
        self.await_refresh(Some(failed_epoch)).await
    }

    fn adopt(&self, token: AccessToken) -> TokenGrant {
        let mut state = self.state.lock();
        if let Some(current) = &state.token {
            return TokenGrant {
                token: current.clone(),
                epoch: state.epoch,
                recovered: false,
            };
        }
        let epoch = state.replace_token(Some(token.clone()));
        TokenGrant {
            token,
            epoch,
            recovered: false,
        }
    }

    async fn await_refresh(
        self: &Arc<Self>,
        failed_epoch: Option<u64>,
    ) -> Result<TokenGrant, SessionError> {
        let (tx, rx) = oneshot::channel();

        let leader = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            if let Some(token) = &state.token
                && matches!(state.phase, Phase::Idle)
                && failed_epoch.is_none_or(|failed| state.epoch > failed)
            {
                tracing::debug!(epoch = state.epoch, "token already replaced; replaying");
                return Ok(TokenGrant {
                    token: token.clone(),
                    epoch: state.epoch,
                    recovered: true,
                });
            }

            if let Phase::Refreshing { waiters } = &mut state.phase {
                waiters.push(tx);
                tracing::debug!(followers = waiters.len() - 1, "joined refresh in flight");
                false
            } else {
                state.phase = Phase::Refreshing { waiters: vec![tx] };
                true
            }
        };

        if leader {
            self.record(SessionEvent::RefreshStarted);
            tracing::debug!("starting token refresh");
            tokio::spawn(Arc::clone(self).run_cycle());
        } else {
            self.record(SessionEvent::FollowerQueued);
        }

        match rx.await {
            Ok(CycleOutcome::Refreshed { token, epoch }) => Ok(TokenGrant {
                token,
                epoch,
                recovered: true,
            }),
            Ok(CycleOutcome::Expired(expiry)) => Err(SessionError::SessionExpired(expiry)),
            Err(_) => Err(SessionError::RefreshAborted),
        }
    }

    async fn run_cycle(self: Arc<Self>) {
        let mut guard = CycleGuard {
            coordinator: Arc::clone(&self),
            settled: false,
        };

        let started = Instant::now();
        let result = self.endpoint.refresh().await;
        self.metrics.record_refresh_duration(started.elapsed());

        match result {
            Ok(token) => {
                self.store_token(Some(token.clone())).await;
                let (epoch, waiters) = {
                    let mut state = self.state.lock();
                    let epoch = state.replace_token(Some(token.clone()));
                    (epoch, state.settle())
                };
                guard.settled = true;

                self.record(SessionEvent::RefreshSucceeded);
                tracing::info!(epoch, waiters = waiters.len(), "access token refreshed");

                for waiter in waiters {
                    let outcome = CycleOutcome::Refreshed {
                        token: token.clone(),
                        epoch,
                    };
                    if waiter.send(outcome).is_err() {
                        tracing::trace!("refresh waiter went away");
                    }
                }
            }
            Err(err) => {
                self.store_token(None).await;
                let waiters = {
                    let mut state = self.state.lock();
                    state.replace_token(None);
                    state.settle()
                };
                guard.settled = true;

                self.record(SessionEvent::RefreshFailed);
                tracing::warn!(error = %err, waiters = waiters.len(), "token refresh failed; ending session");

                let expiry = SessionExpiry::new(err.to_string());
                self.terminator.on_session_expired(&expiry);
                self.record(SessionEvent::SessionTerminated);

                for waiter in waiters {
                    if waiter.send(CycleOutcome::Expired(expiry.clone())).is_err() {
                        tracing::trace!("refresh waiter went away");
                    }
                }
            }
        }
    }

    /// Write to the store, bounded by the lookup timeout.
    async fn store_token(&self, token: Option<AccessToken>) {
        let clearing = token.is_none();
        if tokio::time::timeout(self.token_lookup_timeout, self.store.set_token(token))
            .await
            .is_err()
        {
            tracing::warn!(clearing, "token store write timed out");
        }
    }
}

/// Returns the phase to `Idle` if a cycle task ends without settling.
/// Dropping the waiters' senders wakes them with `RefreshAborted`.
struct CycleGuard {
    coordinator: Arc<RefreshCoordinator>,
    settled: bool,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let waiters = self.coordinator.state.lock().settle();
        tracing::error!(waiters = waiters.len(), "token refresh aborted before settling");
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::endpoint::RefreshError;
    use crate::metrics::NoOpMetrics;
    use crate::store::InMemoryTokenStore;
    use crate::terminator::FnTerminator;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;
    use url::Url;

    /// Endpoint that waits for `release` and then answers with `next`.
    struct GatedEndpoint {
        url: Url,
        calls: AtomicUsize,
        release: Notify,
        next: Mutex<Option<Result<AccessToken, RefreshError>>>,
        panic_instead: bool,
    }

    impl GatedEndpoint {
        fn new(next: Result<AccessToken, RefreshError>) -> Arc<Self> {
            Arc::new(Self {
                url: Url::parse("https://api.example.com/auth/refresh").unwrap(),
                calls: AtomicUsize::new(0),
                release: Notify::new(),
                next: Mutex::new(Some(next)),
                panic_instead: false,
            })
        }
    }

    #[async_trait]
    impl RefreshEndpoint for GatedEndpoint {
        async fn refresh(&self) -> Result<AccessToken, RefreshError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            assert!(!self.panic_instead, "refresh endpoint blew up");
            self.next
                .lock()
                .take()
                .unwrap_or(Err(RefreshError::MissingCredential))
        }

        fn url(&self) -> &Url {
            &self.url
        }
    }

    fn coordinator(
        store: Arc<InMemoryTokenStore>,
        endpoint: Arc<GatedEndpoint>,
        terminated: Arc<AtomicUsize>,
    ) -> Arc<RefreshCoordinator> {
        Arc::new(RefreshCoordinator::new(
            store,
            endpoint,
            Arc::new(FnTerminator::new(move |_: &SessionExpiry| {
                terminated.fetch_add(1, Ordering::SeqCst);
            })),
            Arc::new(NoOpMetrics),
            Duration::from_secs(1),
        ))
    }

    async fn wait_until_refreshing(c: &RefreshCoordinator) {
        while !c.is_refreshing() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn acquire_reads_store_once_then_mirror() {
        let store = Arc::new(InMemoryTokenStore::with_token(AccessToken::new("T1")));
        let c = coordinator(
            Arc::clone(&store),
            GatedEndpoint::new(Ok(AccessToken::new("unused"))),
            Arc::new(AtomicUsize::new(0)),
        );

        let grant = c.acquire().await.unwrap();
        assert_eq!(grant.token.expose(), "T1");
        assert!(!grant.recovered);

        // The mirror wins over later store writes made by others
        store.set_token(Some(AccessToken::new("other"))).await;
        assert_eq!(c.acquire().await.unwrap().token.expose(), "T1");
    }

    #[tokio::test]
    async fn concurrent_recoveries_share_one_refresh() {
        let store = Arc::new(InMemoryTokenStore::with_token(AccessToken::new("T1")));
        let endpoint = GatedEndpoint::new(Ok(AccessToken::new("T2")));
        let c = coordinator(
            Arc::clone(&store),
            Arc::clone(&endpoint),
            Arc::new(AtomicUsize::new(0)),
        );
        let epoch = c.acquire().await.unwrap().epoch;

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let c = Arc::clone(&c);
                tokio::spawn(async move { c.recover(epoch).await })
            })
            .collect();

        wait_until_refreshing(&c).await;
        // Let every task reach the queue before the refresh settles
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        endpoint.release.notify_one();

        for task in tasks {
            let grant = task.await.unwrap().unwrap();
            assert_eq!(grant.token.expose(), "T2");
            assert!(grant.recovered);
        }
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.snapshot().unwrap().expose(), "T2");
        assert!(!c.is_refreshing());
    }

    #[tokio::test]
    async fn stale_epoch_replays_without_refresh() {
        let store = Arc::new(InMemoryTokenStore::with_token(AccessToken::new("T1")));
        let endpoint = GatedEndpoint::new(Ok(AccessToken::new("unused")));
        let c = coordinator(store, Arc::clone(&endpoint), Arc::new(AtomicUsize::new(0)));

        let old_epoch = c.acquire().await.unwrap().epoch;
        c.sign_in(AccessToken::new("T5")).await;

        let grant = c.recover(old_epoch).await.unwrap();
        assert_eq!(grant.token.expose(), "T5");
        assert!(grant.recovered);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failure_expires_all_waiters_and_terminates_once() {
        let store = Arc::new(InMemoryTokenStore::with_token(AccessToken::new("T1")));
        let endpoint = GatedEndpoint::new(Err(RefreshError::Rejected {
            status: http::StatusCode::FORBIDDEN,
        }));
        let terminated = Arc::new(AtomicUsize::new(0));
        let c = coordinator(Arc::clone(&store), Arc::clone(&endpoint), Arc::clone(&terminated));
        let epoch = c.acquire().await.unwrap().epoch;

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let c = Arc::clone(&c);
                tokio::spawn(async move { c.recover(epoch).await })
            })
            .collect();
        wait_until_refreshing(&c).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        endpoint.release.notify_one();

        for task in tasks {
            let err = task.await.unwrap().unwrap_err();
            assert!(err.is_session_expired(), "got {err:?}");
        }
        assert_eq!(terminated.load(Ordering::SeqCst), 1);
        assert!(store.snapshot().is_none());
        assert!(!c.is_refreshing());
    }

    #[tokio::test]
    async fn panicking_refresh_aborts_waiters() {
        let endpoint = Arc::new(GatedEndpoint {
            panic_instead: true,
            ..Arc::into_inner(GatedEndpoint::new(Ok(AccessToken::new("never")))).unwrap()
        });
        let c = coordinator(
            Arc::new(InMemoryTokenStore::new()),
            Arc::clone(&endpoint),
            Arc::new(AtomicUsize::new(0)),
        );

        let waiter = {
            let c = Arc::clone(&c);
            tokio::spawn(async move { c.acquire().await })
        };
        wait_until_refreshing(&c).await;
        endpoint.release.notify_one();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::RefreshAborted), "got {err:?}");
        assert!(!c.is_refreshing());
    }

    #[tokio::test]
    async fn sign_out_clears_without_terminating() {
        let store = Arc::new(InMemoryTokenStore::with_token(AccessToken::new("T1")));
        let terminated = Arc::new(AtomicUsize::new(0));
        let c = coordinator(
            Arc::clone(&store),
            GatedEndpoint::new(Ok(AccessToken::new("unused"))),
            Arc::clone(&terminated),
        );
        let before = c.epoch();

        c.sign_out().await;

        assert!(store.snapshot().is_none());
        assert!(c.epoch() > before);
        assert_eq!(terminated.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn debug_shows_state_but_no_token() {
        let c = coordinator(
            Arc::new(InMemoryTokenStore::new()),
            GatedEndpoint::new(Ok(AccessToken::new("unused"))),
            Arc::new(AtomicUsize::new(0)),
        );
        c.sign_in(AccessToken::new("secret-T1")).await;

        let dbg = format!("{c:?}");
        assert!(dbg.contains("has_token: true"));
        assert!(!dbg.contains("secret-T1"));
    }
}
