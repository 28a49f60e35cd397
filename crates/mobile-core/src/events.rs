//! Application-facing events
//!
//! Everything the core decides is published as a [`MobileEvent`] on a
//! `tokio::sync::broadcast` channel. Subscribers that fall behind lose the
//! oldest events (`RecvError::Lagged`); the registry remains the source of
//! truth and can always be queried through [`MobileClient`](crate::MobileClient).
//!
//! ```rust,no_run
//! # use rvoip_mobile_core::{MobileClient, MobileEvent};
//! # async fn example(client: MobileClient) {
//! let mut events = client.subscribe();
//! while let Ok(event) = events.recv().await {
//!     if let MobileEvent::SessionChanged { session, .. } = &event {
//!         println!("{} is now {}", session.session_id, session.state);
//!     }
//! }
//! # }
//! ```

use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::audio::AudioState;
use crate::call::{CallSession, CallState, CorrelationToken, SessionId};
use crate::error::MobileError;
use crate::provider::EndReason;
use crate::registration::RegistrationStatus;

/// Why a session left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Signaling ended the call; the reason was (or would be) reported to the host UI
    Ended(EndReason),
    /// Hung up from this device
    HungUpLocally,
    /// The host call UI reset and everything was torn down
    ProviderReset,
    Shutdown,
}

/// Priority levels for events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone)]
pub enum MobileEvent {
    /// A session was created or one of its fields changed
    SessionChanged {
        session: CallSession,
        /// Set when the normalized state moved
        previous_state: Option<CallState>,
    },
    SessionRemoved {
        session_id: SessionId,
        reason: RemovalReason,
    },
    /// A push woke us and a provisional incoming call was reported
    IncomingPush {
        provisional_id: SessionId,
        token: Option<CorrelationToken>,
    },
    /// A push-reported call never reached signaling within its TTL
    PushExpired { provisional_id: SessionId },
    RegistrationChanged { status: RegistrationStatus },
    AudioStateChanged { state: AudioState },
    /// An intent or host-UI action was declined
    ActionFailed {
        action: String,
        session_id: Option<SessionId>,
        error: MobileError,
    },
}

impl MobileEvent {
    pub fn priority(&self) -> EventPriority {
        match self {
            MobileEvent::IncomingPush { .. } | MobileEvent::ActionFailed { .. } => {
                EventPriority::High
            }
            MobileEvent::SessionChanged { session, .. } if session.state == CallState::Incoming => {
                EventPriority::High
            }
            MobileEvent::AudioStateChanged { .. } => EventPriority::Low,
            _ => EventPriority::Normal,
        }
    }

    /// The session this event is about, if any
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            MobileEvent::SessionChanged { session, .. } => Some(session.session_id),
            MobileEvent::SessionRemoved { session_id, .. } => Some(*session_id),
            MobileEvent::IncomingPush { provisional_id, .. }
            | MobileEvent::PushExpired { provisional_id } => Some(*provisional_id),
            MobileEvent::ActionFailed { session_id, .. } => *session_id,
            _ => None,
        }
    }
}

/// Thin wrapper over the broadcast sender
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<MobileEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: MobileEvent) {
        let priority = event.priority();
        // no subscribers is fine
        match self.tx.send(event) {
            Ok(receivers) => trace!(priority = ?priority, receivers, "Event emitted"),
            Err(_) if priority == EventPriority::High => {
                debug!("High priority event dropped, nobody is subscribed")
            }
            Err(_) => trace!("Dropped event with no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MobileEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn sender(&self) -> broadcast::Sender<MobileEvent> {
        self.tx.clone()
    }
}
