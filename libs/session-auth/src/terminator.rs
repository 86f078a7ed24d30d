use tokio_util::sync::CancellationToken;

use crate::error::SessionExpiry;

/// Side effect run when a refresh cycle fails: clear client-side session
/// state and send the user back to an unauthenticated entry point.
///
/// Invoked at most once per failed cycle, however many requests waited on
/// it. Runs on the refresh task and must not block.
pub trait SessionTerminator: Send + Sync {
    fn on_session_expired(&self, expiry: &SessionExpiry);
}

/// Terminator that only logs. Used when nothing else is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingTerminator;

impl SessionTerminator for LoggingTerminator {
    fn on_session_expired(&self, expiry: &SessionExpiry) {
        tracing::warn!(reason = %expiry, "session expired; sign-in required");
    }
}

/// Adapter for closures.
pub struct FnTerminator<F>(F);

impl<F> FnTerminator<F>
where
    F: Fn(&SessionExpiry) + Send + Sync,
{
    #[must_use]
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> std::fmt::Debug for FnTerminator<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTerminator").finish_non_exhaustive()
    }
}

impl<F> SessionTerminator for FnTerminator<F>
where
    F: Fn(&SessionExpiry) + Send + Sync,
{
    fn on_session_expired(&self, expiry: &SessionExpiry) {
        (self.0)(expiry);
    }
}

/// Cancels a session-scoped token; tasks selecting on
/// `cancelled()` treat it as the sign-out signal.
impl SessionTerminator for CancellationToken {
    fn on_session_expired(&self, expiry: &SessionExpiry) {
        tracing::info!(reason = %expiry, "cancelling session scope");
        self.cancel();
    }
}
