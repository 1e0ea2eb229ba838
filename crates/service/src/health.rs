//! Bounded readiness polling.
//!
//! A health check runs two tasks: the polling loop below, and a watchdog
//! that cancels a shared token once the timeout elapses. Whichever of
//! {ready, terminal, expired} happens first ends the check. An in-flight
//! probe is never preempted, so probes must carry their own transport
//! timeout.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Interval between readiness probes.
pub const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Health of a supervised service. Derived on every check, never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HealthState {
    /// No check has resolved yet.
    Unknown,

    /// The service is alive and ready to serve traffic.
    Healthy,

    /// The service reported a terminal bad state.
    Unhealthy(String),

    /// No healthy or terminal result arrived within the timeout.
    TimedOut,

    /// The check itself could not be carried out (e.g. the process is gone).
    Error(String),
}

impl HealthState {
    /// Whether this is `Healthy`.
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy(reason) => write!(f, "unhealthy ({reason})"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Error(reason) => write!(f, "error ({reason})"),
        }
    }
}

/// What a single readiness probe observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    /// The service is ready.
    Ready,

    /// Not ready yet; keep polling.
    Pending(String),

    /// The service is in a state it will not leave on its own.
    Terminal(String),
}

/// Polls `probe` every `interval` until it reports ready or terminal, or
/// until `timeout` elapses.
///
/// Probe errors are transport-level failures and are treated like
/// `Pending`: the service may simply not be listening yet.
pub async fn poll_until_ready<F, Fut, E>(
    service: &str,
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> HealthState
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Readiness, E>>,
    E: fmt::Display,
{
    let expired = CancellationToken::new();

    let watchdog = {
        let expired = expired.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            expired.cancel();
        })
    };

    let mut state = HealthState::Unknown;
    let mut attempts = 0u32;

    while state == HealthState::Unknown {
        if expired.is_cancelled() {
            state = HealthState::TimedOut;
            break;
        }

        attempts += 1;
        match probe().await {
            Ok(Readiness::Ready) => {
                state = HealthState::Healthy;
                break;
            }
            Ok(Readiness::Terminal(reason)) => {
                state = HealthState::Unhealthy(reason);
                break;
            }
            Ok(Readiness::Pending(reason)) => {
                debug!(service, attempts, %reason, "not ready yet");
            }
            Err(e) => {
                debug!(service, attempts, error = %e, "readiness probe failed");
            }
        }

        tokio::select! {
            () = expired.cancelled() => state = HealthState::TimedOut,
            () = tokio::time::sleep(interval) => {}
        }
    }

    watchdog.abort();

    match &state {
        HealthState::Healthy => info!(service, attempts, "service is healthy"),
        HealthState::TimedOut => warn!(
            service,
            attempts,
            timeout_secs = timeout.as_secs(),
            "timed out waiting for service"
        ),
        other => warn!(service, attempts, state = %other, "service is not healthy"),
    }

    state
}
