//! Call session data model
//!
//! A [`CallSession`] is one physical call tracked from first observation to
//! termination. Sessions live exclusively in the
//! [`SessionRegistry`](crate::registry::SessionRegistry); every other component
//! refers to them by [`SessionId`] only.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Process-unique, stable identifier of a call session
///
/// Push-originated calls adopt the provisional identifier that was reported
/// to the native call UI, so the host sees one identifier end to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SessionId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// Identifier the native call UI uses for a call
///
/// Usually equal to a [`SessionId`], but the host can mint its own (for
/// example when the user dials from the system contacts app).
pub type ProviderCallId = Uuid;

/// Opaque value carried by both the push payload and the SIP INVITE
///
/// Lets a provisional push record be matched exactly to the call that
/// signaling later delivers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationToken(pub String);

impl CorrelationToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Direction of a call from this device's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallDirection {
    Incoming,
    Outgoing,
}

/// Normalized call state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    Idle,
    /// INVITE is being built and sent
    OutgoingInit,
    /// Provisional response received (100 Trying)
    OutgoingProgress,
    /// 180 Ringing / early media
    OutgoingRinging,
    /// Incoming call waiting for a user decision
    Incoming,
    Connected,
    /// Held by us
    Paused,
    /// Held by the remote party
    PausedByRemote,
    Error,
    Ended,
}

impl CallState {
    /// Whether the call has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended | CallState::Error)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, CallState::Paused | CallState::PausedByRemote)
    }

    /// Still ringing, either way round
    pub fn is_pre_answer(&self) -> bool {
        matches!(
            self,
            CallState::OutgoingInit
                | CallState::OutgoingProgress
                | CallState::OutgoingRinging
                | CallState::Incoming
        )
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One physical call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSession {
    pub session_id: SessionId,
    /// The other party (SIP URI or dialable string)
    pub remote_address: String,
    pub direction: CallDirection,
    pub state: CallState,
    /// Local mute flag; may lead signaling while a request is in flight
    pub is_muted: bool,
    /// Local hold flag; may lead signaling while a request is in flight
    pub is_on_hold: bool,
    pub correlation_token: Option<CorrelationToken>,
    pub start_time: Option<DateTime<Utc>>,
    /// Set exactly once, on the first transition into `Connected`
    pub connect_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl CallSession {
    pub fn new(
        session_id: SessionId,
        remote_address: impl Into<String>,
        direction: CallDirection,
        state: CallState,
    ) -> Self {
        Self {
            session_id,
            remote_address: remote_address.into(),
            direction,
            state,
            is_muted: false,
            is_on_hold: false,
            correlation_token: None,
            start_time: Some(Utc::now()),
            connect_time: None,
            end_time: None,
        }
    }

    pub fn outgoing(session_id: SessionId, remote_address: impl Into<String>) -> Self {
        Self::new(session_id, remote_address, CallDirection::Outgoing, CallState::OutgoingInit)
    }

    pub fn incoming(session_id: SessionId, remote_address: impl Into<String>) -> Self {
        Self::new(session_id, remote_address, CallDirection::Incoming, CallState::Incoming)
    }

    pub fn with_token(mut self, token: Option<CorrelationToken>) -> Self {
        self.correlation_token = token;
        self
    }

    /// Apply a normalized state reported by signaling
    ///
    /// Returns the previous state when the state actually changed.
    pub fn apply_state(&mut self, state: CallState) -> Option<CallState> {
        if self.state == state {
            return None;
        }
        let previous = self.state;
        self.state = state;

        match state {
            CallState::Connected => {
                if self.connect_time.is_none() {
                    self.connect_time = Some(Utc::now());
                }
                // signaling confirmed the resume
                self.is_on_hold = false;
            }
            CallState::Paused => self.is_on_hold = true,
            CallState::Ended | CallState::Error => {
                if self.end_time.is_none() {
                    self.end_time = Some(Utc::now());
                }
            }
            _ => {}
        }
        Some(previous)
    }

    /// Paused in either direction, or locally flagged as held
    pub fn is_held(&self) -> bool {
        self.is_on_hold || self.state.is_paused()
    }

    /// Counts towards "a call is still in progress" for audio teardown
    pub fn is_live(&self) -> bool {
        !self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_time_set_once() {
        let mut session = CallSession::outgoing(SessionId::new(), "sip:bob@example.com");
        assert_eq!(session.apply_state(CallState::Connected), Some(CallState::OutgoingInit));
        let first = session.connect_time;
        assert!(first.is_some());

        session.apply_state(CallState::Paused);
        assert!(session.is_on_hold);
        session.apply_state(CallState::Connected);
        assert!(!session.is_on_hold);
        assert_eq!(session.connect_time, first);
    }

    #[test]
    fn test_same_state_is_not_a_change() {
        let mut session = CallSession::incoming(SessionId::new(), "sip:alice@example.com");
        assert_eq!(session.apply_state(CallState::Incoming), None);
    }

    #[test]
    fn test_end_marks_end_time() {
        let mut session = CallSession::incoming(SessionId::new(), "sip:alice@example.com");
        session.apply_state(CallState::Ended);
        assert!(session.end_time.is_some());
        assert!(!session.is_live());
    }
}
