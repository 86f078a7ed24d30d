//! Metrics hooks for the refresh cycle.
//!
//! Trait-based so that any backend (Prometheus, StatsD, ...) can be plugged
//! in without the session client depending on it.

use std::time::Duration;

/// Refresh cycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A request became the leader and started a refresh
    RefreshStarted,

    /// The refresh endpoint returned a new token
    RefreshSucceeded,

    /// The refresh endpoint call failed
    RefreshFailed,

    /// A request joined a refresh already in flight
    FollowerQueued,

    /// A request was sent again with a newer token
    RequestReplayed,

    /// A replayed request was still unauthorized
    ReplayRejected,

    /// The session terminator was invoked
    SessionTerminated,
}

impl SessionEvent {
    /// Get the metric name for this event
    #[must_use]
    pub fn metric_name(&self) -> &'static str {
        match self {
            SessionEvent::RefreshStarted => "session.refresh.start",
            SessionEvent::RefreshSucceeded => "session.refresh.ok",
            SessionEvent::RefreshFailed => "session.refresh.fail",
            SessionEvent::FollowerQueued => "session.refresh.follower",
            SessionEvent::RequestReplayed => "session.request.replay",
            SessionEvent::ReplayRejected => "session.request.replay_rejected",
            SessionEvent::SessionTerminated => "session.terminated",
        }
    }
}

/// Trait for metrics backends
pub trait SessionMetrics: Send + Sync {
    fn record_event(&self, event: SessionEvent);

    /// Wall time of one refresh endpoint call
    fn record_refresh_duration(&self, duration: Duration);
}

/// No-op metrics implementation (default)
#[derive(Debug, Clone, Copy)]
pub struct NoOpMetrics;

impl SessionMetrics for NoOpMetrics {
    fn record_event(&self, _event: SessionEvent) {}

    fn record_refresh_duration(&self, _duration: Duration) {}
}

/// Logging-based metrics implementation (for debugging)
#[derive(Debug, Clone, Copy)]
pub struct LoggingMetrics;

impl SessionMetrics for LoggingMetrics {
    fn record_event(&self, event: SessionEvent) {
        tracing::debug!(metric = event.metric_name(), "Session event recorded");
    }

    fn record_refresh_duration(&self, duration: Duration) {
        tracing::debug!(
            metric = "session.refresh.duration_ms",
            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "Refresh duration recorded"
        );
    }
}
