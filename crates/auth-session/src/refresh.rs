//! Single-flight refresh bookkeeping.
//!
//! At most one refresh runs per session. What happens to a caller that
//! arrives while one is running depends on [`RefreshPolicy`].

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;
use tracing::debug;

/// Why a refresh was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshReason {
    /// Ahead of expiry, before a request.
    Proactive,
    /// A resource server answered 401.
    Reactive401,
}

impl fmt::Display for RefreshReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshReason::Proactive => write!(f, "proactive"),
            RefreshReason::Reactive401 => write!(f, "reactive-401"),
        }
    }
}

/// Behaviour for callers that arrive while a refresh is in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    /// Return immediately with no result and no network I/O.
    #[default]
    Skip,
    /// Wait for the running refresh and share its result.
    Join,
}

/// How a refresh ended.
#[derive(Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Session renewed. Native refreshes carry the new access token.
    Refreshed { access_token: Option<String> },
    /// Session could not be renewed and has been signed out.
    Failed,
    /// Another refresh was already running.
    Skipped,
}

impl fmt::Debug for RefreshOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshOutcome::Refreshed { access_token } => f
                .debug_struct("Refreshed")
                .field("access_token", &access_token.as_ref().map(|_| "[REDACTED]"))
                .finish(),
            RefreshOutcome::Failed => write!(f, "Failed"),
            RefreshOutcome::Skipped => write!(f, "Skipped"),
        }
    }
}

impl RefreshOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, RefreshOutcome::Refreshed { .. })
    }

    pub fn access_token(self) -> Option<String> {
        match self {
            RefreshOutcome::Refreshed { access_token } => access_token,
            _ => None,
        }
    }
}

type OutcomeSlot = Option<RefreshOutcome>;

/// The lock guarding a session's refreshes.
pub struct RefreshCoordinator {
    policy: RefreshPolicy,
    in_flight: Mutex<Option<watch::Receiver<OutcomeSlot>>>,
}

/// What [`RefreshCoordinator::begin`] granted the caller.
pub enum RefreshTicket<'a> {
    /// Run the refresh, then call [`RefreshGuard::finish`].
    Leader(RefreshGuard<'a>),
    /// Wait for the running refresh.
    Follower(watch::Receiver<OutcomeSlot>),
    /// A refresh is running and the policy is [`RefreshPolicy::Skip`].
    Busy,
}

impl RefreshCoordinator {
    pub fn new(policy: RefreshPolicy) -> Self {
        Self {
            policy,
            in_flight: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Take the lock, or learn who holds it. Never waits.
    pub fn begin(&self) -> RefreshTicket<'_> {
        let mut slot = self.in_flight.lock();
        if let Some(rx) = slot.as_ref() {
            debug!(policy = ?self.policy, "Refresh already in flight");
            return match self.policy {
                RefreshPolicy::Skip => RefreshTicket::Busy,
                RefreshPolicy::Join => RefreshTicket::Follower(rx.clone()),
            };
        }

        let (tx, rx) = watch::channel(None);
        *slot = Some(rx);
        RefreshTicket::Leader(RefreshGuard {
            coordinator: self,
            tx: Some(tx),
        })
    }

    fn release(&self) {
        *self.in_flight.lock() = None;
    }
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new(RefreshPolicy::default())
    }
}

/// Held by the caller running the refresh. Dropping it without
/// [`finish`](RefreshGuard::finish) releases the lock and reports failure,
/// so an early return or a cancelled future never leaves the lock held.
pub struct RefreshGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    tx: Option<watch::Sender<OutcomeSlot>>,
}

impl RefreshGuard<'_> {
    pub fn finish(mut self, outcome: RefreshOutcome) {
        self.publish(outcome);
    }

    fn publish(&mut self, outcome: RefreshOutcome) {
        if let Some(tx) = self.tx.take() {
            // Release first so a woken follower may start the next refresh.
            self.coordinator.release();
            let _ = tx.send(Some(outcome));
        }
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.publish(RefreshOutcome::Failed);
    }
}

/// Wait for the leader's outcome.
pub async fn wait_for_outcome(mut rx: watch::Receiver<OutcomeSlot>) -> RefreshOutcome {
    match rx.wait_for(Option::is_some).await {
        Ok(slot) => slot.clone().unwrap_or(RefreshOutcome::Failed),
        Err(_) => RefreshOutcome::Failed,
    }
}
