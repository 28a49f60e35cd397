//! Waiters for sessions that have not reached signaling yet
//!
//! A host-UI action can target a provisional identifier before the INVITE has
//! arrived. Instead of parking a continuation inside a callback, the caller
//! gets a [`SessionWait`] backed by a oneshot channel keyed by the provisional
//! identifier. Timeout and cancellation are explicit [`WaitOutcome`] values.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::call::SessionId;

/// How a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The session appeared under this identifier
    Arrived(SessionId),
    /// A different incoming call arrived with no token match
    Mismatch,
    /// The provisional record expired
    Expired,
    TimedOut,
    /// The registry dropped the waiter (reset or shutdown)
    Cancelled,
}

impl WaitOutcome {
    pub fn session(&self) -> Option<SessionId> {
        match self {
            WaitOutcome::Arrived(id) => Some(*id),
            _ => None,
        }
    }
}

/// Pending wait handed out by [`SessionWaiters::register`]
#[derive(Debug)]
pub struct SessionWait {
    provisional_id: SessionId,
    rx: oneshot::Receiver<WaitOutcome>,
}

impl SessionWait {
    pub fn provisional_id(&self) -> SessionId {
        self.provisional_id
    }

    /// Suspend until resolved or `timeout` elapses
    pub async fn wait(self, timeout: Duration) -> WaitOutcome {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => WaitOutcome::Cancelled,
            Err(_) => {
                debug!(provisional_id = %self.provisional_id, "Session wait timed out");
                WaitOutcome::TimedOut
            }
        }
    }

    /// A wait that is already resolved
    pub(crate) fn ready(provisional_id: SessionId, outcome: WaitOutcome) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(outcome);
        Self { provisional_id, rx }
    }
}

#[derive(Debug, Default)]
pub struct SessionWaiters {
    waiters: HashMap<SessionId, Vec<oneshot::Sender<WaitOutcome>>>,
}

impl SessionWaiters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provisional_id: SessionId) -> SessionWait {
        self.prune();
        let (tx, rx) = oneshot::channel();
        self.waiters.entry(provisional_id).or_default().push(tx);
        SessionWait { provisional_id, rx }
    }

    /// Resolve every waiter for `provisional_id`; returns how many were woken
    pub fn resolve(&mut self, provisional_id: &SessionId, outcome: WaitOutcome) -> usize {
        let Some(senders) = self.waiters.remove(provisional_id) else {
            return 0;
        };
        let mut woken = 0;
        for tx in senders {
            if tx.send(outcome).is_ok() {
                woken += 1;
            }
        }
        woken
    }

    /// Resolve all waiters with the same outcome
    pub fn resolve_all(&mut self, outcome: WaitOutcome) -> usize {
        let keys: Vec<SessionId> = self.waiters.keys().copied().collect();
        keys.iter().map(|k| self.resolve(k, outcome)).sum()
    }

    /// Whether anyone is still listening
    pub fn has_waiters(&mut self) -> bool {
        self.prune();
        !self.waiters.is_empty()
    }

    /// Drop senders whose wait timed out or was abandoned
    fn prune(&mut self) {
        self.waiters.retain(|_, senders| {
            senders.retain(|tx| !tx.is_closed());
            !senders.is_empty()
        });
    }
}
