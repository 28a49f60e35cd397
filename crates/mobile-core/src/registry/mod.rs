//! Session Registry
//!
//! The authoritative in-memory table of call sessions. It is owned by the
//! core actor and mutated only from that single task, so it carries no
//! locks. Besides the session table it keeps:
//!
//! - identifier bindings (host-UI identifier → [`SessionId`])
//! - push-created [`PendingIncoming`] records with their TTL
//! - waiters blocked on a provisional identifier
//! - a read-only mirror of the registration state, used to gate dialing
//!
//! # Resolving a newly observed signaling call
//!
//! 1. A live session carrying the same correlation token is reused.
//! 2. For incoming calls, a live pending record with the same token is
//!    adopted (its provisional identifier becomes the session identifier).
//!    Failing that, a single pending record where either side lacks a token
//!    is adopted on timing alone. Tokens present on both sides that differ
//!    mean a distinct call: the pending record is left untouched.
//! 3. Otherwise a fresh identifier is generated.
//!
//! Timing matches are a heuristic: two token-less pushes inside one TTL
//! window are ambiguous, and the registry refuses to guess between them.

pub mod pending;
pub mod waiters;

use std::collections::HashMap;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::call::{CallDirection, CallSession, CallState, CorrelationToken, ProviderCallId, SessionId};
use crate::error::{MobileError, MobileResult};
use crate::registration::RegistrationState;

pub use pending::{PendingIncoming, PendingIncomingStore};
pub use waiters::{SessionWait, SessionWaiters, WaitOutcome};

/// How a signaling call was mapped onto a session identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Same correlation token as a session already in the table
    TokenMatch(SessionId),
    /// Adopted a push-created provisional identifier
    AdoptedPending {
        session_id: SessionId,
        by_token: bool,
        declined: bool,
        caller_handle: String,
    },
    Fresh(SessionId),
}

impl Resolution {
    pub fn session_id(&self) -> SessionId {
        match self {
            Resolution::TokenMatch(id) | Resolution::Fresh(id) => *id,
            Resolution::AdoptedPending { session_id, .. } => *session_id,
        }
    }
}

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: IndexMap<SessionId, CallSession>,
    bindings: HashMap<ProviderCallId, SessionId>,
    pending: PendingIncomingStore,
    waiters: SessionWaiters,
    /// Expired pending records not yet reported to the host UI
    expired: Vec<PendingIncoming>,
    registration: RegistrationState,
}

impl SessionRegistry {
    pub fn new(pending_ttl: Duration) -> Self {
        Self {
            sessions: IndexMap::new(),
            bindings: HashMap::new(),
            pending: PendingIncomingStore::new(pending_ttl),
            waiters: SessionWaiters::new(),
            expired: Vec::new(),
            registration: RegistrationState::None,
        }
    }

    // ===== SESSION TABLE =====

    /// Insert or replace a session
    ///
    /// Rejects a session whose correlation token already belongs to another
    /// live session; duplicates must be collapsed through
    /// [`resolve_signaling_call`](Self::resolve_signaling_call) first.
    pub fn upsert(&mut self, session: CallSession) -> MobileResult<Option<CallSession>> {
        if let Some(token) = &session.correlation_token {
            if let Some(other) = self.find_by_token(token) {
                if other.session_id != session.session_id {
                    return Err(MobileError::internal(format!(
                        "correlation token {} already owned by session {}",
                        token, other.session_id
                    )));
                }
            }
        }

        let session_id = session.session_id;
        let previous = self.sessions.insert(session_id, session);
        if previous.is_none() {
            debug!(session_id = %session_id, "Session inserted");
            self.drop_shadowed_binding(&session_id);
            let woken = self.waiters.resolve(&session_id, WaitOutcome::Arrived(session_id));
            if woken > 0 {
                debug!(session_id = %session_id, woken, "Woke session waiters");
            }
        }
        Ok(previous)
    }

    pub fn get(&self, session_id: &SessionId) -> Option<&CallSession> {
        self.sessions.get(session_id)
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Mutate a session in place
    pub fn update<R>(
        &mut self,
        session_id: &SessionId,
        f: impl FnOnce(&mut CallSession) -> R,
    ) -> MobileResult<R> {
        self.sessions
            .get_mut(session_id)
            .map(f)
            .ok_or_else(|| MobileError::session_not_found(session_id))
    }

    /// Remove a session and garbage-collect its bindings
    pub fn remove(&mut self, session_id: &SessionId) -> Option<CallSession> {
        let removed = self.sessions.shift_remove(session_id)?;
        self.bindings.retain(|_, target| target != session_id);
        debug!(session_id = %session_id, "Session removed");
        Some(removed)
    }

    pub fn all(&self) -> Vec<CallSession> {
        self.sessions.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_live()).count()
    }

    pub fn find_by_token(&self, token: &CorrelationToken) -> Option<&CallSession> {
        self.sessions
            .values()
            .find(|s| s.is_live() && s.correlation_token.as_ref() == Some(token))
    }

    // ===== DERIVED QUERIES =====

    /// The call the user is talking on
    ///
    /// Prefers a connected call that is not being held, then the first call
    /// that is neither paused nor ended, then simply the first call.
    pub fn current_session(&self) -> Option<&CallSession> {
        self.sessions
            .values()
            .find(|s| s.state == CallState::Connected && !s.is_on_hold)
            .or_else(|| {
                self.sessions
                    .values()
                    .find(|s| s.is_live() && !s.is_held())
            })
            .or_else(|| self.sessions.values().next())
    }

    /// The call waiting on hold
    ///
    /// With two or more calls this never returns the current session.
    pub fn held_session(&self) -> Option<&CallSession> {
        let current = if self.sessions.len() >= 2 {
            self.current_session().map(|s| s.session_id)
        } else {
            None
        };
        self.sessions.values().find(|s| {
            (s.is_on_hold || s.state == CallState::Paused) && Some(s.session_id) != current
        })
    }

    /// First ringing incoming call other than `excluding`
    pub fn incoming_waiting(&self, excluding: Option<SessionId>) -> Option<&CallSession> {
        self.sessions
            .values()
            .find(|s| s.state == CallState::Incoming && Some(s.session_id) != excluding)
    }

    pub fn sessions_where(&self, predicate: impl Fn(&CallSession) -> bool) -> Vec<&CallSession> {
        self.sessions.values().filter(|s| predicate(s)).collect()
    }

    // ===== IDENTIFIER BINDINGS =====

    /// Bind a host-UI identifier to an existing session
    pub fn bind(&mut self, provider_id: ProviderCallId, session_id: SessionId) -> MobileResult<()> {
        if !self.sessions.contains_key(&session_id) {
            return Err(MobileError::session_not_found(session_id));
        }
        if session_id.as_uuid() == provider_id {
            return Ok(());
        }
        info!(provider_id = %provider_id, session_id = %session_id, "Bound host UI identifier");
        self.bindings.insert(provider_id, session_id);
        Ok(())
    }

    pub fn binding(&self, provider_id: &ProviderCallId) -> Option<SessionId> {
        self.bindings.get(provider_id).copied()
    }

    /// Identifier the host UI knows this session by
    pub fn provider_id_for(&self, session_id: &SessionId) -> ProviderCallId {
        self.bindings
            .iter()
            .find(|(_, target)| *target == session_id)
            .map(|(provider_id, _)| *provider_id)
            .unwrap_or_else(|| session_id.as_uuid())
    }

    /// Forget a binding keyed by an identifier that now names a session itself
    ///
    /// A fallback can bind a provisional identifier to another caller's call
    /// while its pending record is still live. Once that record is adopted
    /// the identifier and the session agree, and the exact match must win.
    fn drop_shadowed_binding(&mut self, session_id: &SessionId) {
        if let Some(stale) = self.bindings.remove(&session_id.as_uuid()) {
            info!(
                provider_id = %session_id,
                previous_target = %stale,
                "Dropped binding shadowed by a session with the same identifier"
            );
        }
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    // ===== PENDING INCOMING =====

    /// Record a push-announced call; returns the provisional identifier
    pub fn add_pending(&mut self, token: Option<CorrelationToken>, caller_handle: impl Into<String>) -> SessionId {
        self.purge_expired();
        let record = PendingIncoming::new(token, caller_handle);
        let provisional_id = record.provisional_id;
        info!(
            provisional_id = %provisional_id,
            token = ?record.correlation_token,
            "Registered pending incoming call"
        );
        self.pending.insert(record);
        provisional_id
    }

    pub fn pending(&mut self, provisional_id: &SessionId) -> Option<&PendingIncoming> {
        self.purge_expired();
        self.pending.get(provisional_id)
    }

    pub fn pending_by_token(&mut self, token: &CorrelationToken) -> Option<&PendingIncoming> {
        self.purge_expired();
        self.pending.find_by_token(token)
    }

    pub fn has_pending(&mut self) -> bool {
        self.purge_expired();
        !self.pending.is_empty()
    }

    /// Drop a pending record that could not be reported
    pub fn discard_pending(&mut self, provisional_id: &SessionId) -> Option<PendingIncoming> {
        let record = self.pending.take(provisional_id)?;
        self.waiters.resolve(provisional_id, WaitOutcome::Cancelled);
        Some(record)
    }

    /// Mark a pending call as declined from the host UI
    pub fn decline_pending(&mut self, provisional_id: &SessionId) -> bool {
        self.purge_expired();
        match self.pending.get_mut(provisional_id) {
            Some(record) => {
                record.declined = true;
                info!(provisional_id = %provisional_id, "Pending incoming call declined before arrival");
                true
            }
            None => false,
        }
    }

    /// Lazily drop expired pending records
    ///
    /// Waiters on an expired record resolve as [`WaitOutcome::Expired`]; the
    /// records are kept until [`take_expired`](Self::take_expired) so the host
    /// UI can be told.
    pub fn purge_expired(&mut self) {
        let expired = self.pending.purge_expired(Instant::now());
        for record in &expired {
            warn!(provisional_id = %record.provisional_id, "Pending incoming call expired");
            self.waiters.resolve(&record.provisional_id, WaitOutcome::Expired);
        }
        self.expired.extend(expired);
    }

    pub fn take_expired(&mut self) -> Vec<PendingIncoming> {
        std::mem::take(&mut self.expired)
    }

    // ===== WAITERS =====

    /// Wait for a session to appear under `provisional_id`
    pub fn wait_for_session(&mut self, provisional_id: SessionId) -> SessionWait {
        if self.sessions.contains_key(&provisional_id) {
            return SessionWait::ready(provisional_id, WaitOutcome::Arrived(provisional_id));
        }
        self.waiters.register(provisional_id)
    }

    // ===== RESOLUTION =====

    /// Map a newly observed signaling call onto a session identifier
    ///
    /// Consumes the pending record when one is adopted. When an incoming call
    /// ends up with a fresh identifier while waiters exist, every waiter is
    /// resolved with [`WaitOutcome::Mismatch`] so callers can fall back to
    /// heuristics instead of blocking until their timeout.
    pub fn resolve_signaling_call(
        &mut self,
        token: Option<&CorrelationToken>,
        direction: CallDirection,
    ) -> Resolution {
        self.purge_expired();

        if let Some(token) = token {
            if let Some(existing) = self.find_by_token(token) {
                debug!(session_id = %existing.session_id, token = %token, "Correlation token matched existing session");
                return Resolution::TokenMatch(existing.session_id);
            }
        }

        if direction == CallDirection::Incoming && !self.pending.is_empty() {
            if let Some(token) = token {
                if let Some(provisional_id) = self.pending.find_by_token(token).map(|p| p.provisional_id) {
                    return self.adopt(provisional_id, true);
                }
            }

            let candidates = self.pending.timing_candidates(token);
            match candidates.as_slice() {
                [only] => return self.adopt(*only, false),
                [] => {
                    debug!(token = ?token, "Incoming call does not match any pending record");
                }
                many => {
                    warn!(
                        candidates = many.len(),
                        "Ambiguous timing match between pending incoming calls, generating fresh identifier"
                    );
                }
            }
        }

        let session_id = SessionId::new();
        if direction == CallDirection::Incoming && self.waiters.has_waiters() {
            let failed = self.waiters.resolve_all(WaitOutcome::Mismatch);
            info!(failed, session_id = %session_id, "Mismatched incoming call, released session waiters");
        }
        Resolution::Fresh(session_id)
    }

    fn adopt(&mut self, provisional_id: SessionId, by_token: bool) -> Resolution {
        // the record is known to exist: callers looked it up first
        let record = self.pending.take(&provisional_id);
        self.drop_shadowed_binding(&provisional_id);
        let (declined, caller_handle) = record
            .map(|r| (r.declined, r.caller_handle))
            .unwrap_or((false, String::new()));
        info!(
            session_id = %provisional_id,
            by_token,
            declined,
            "Adopted pending incoming identifier"
        );
        Resolution::AdoptedPending {
            session_id: provisional_id,
            by_token,
            declined,
            caller_handle,
        }
    }

    // ===== REGISTRATION MIRROR =====

    pub fn set_registration_state(&mut self, state: RegistrationState) {
        self.registration = state;
    }

    pub fn registration_state(&self) -> RegistrationState {
        self.registration
    }

    // ===== TEARDOWN =====

    /// Remove everything: sessions, bindings, pending records and waiters
    pub fn clear(&mut self) -> Vec<CallSession> {
        self.bindings.clear();
        self.pending.clear();
        self.expired.clear();
        self.waiters.resolve_all(WaitOutcome::Cancelled);
        self.sessions.drain(..).map(|(_, s)| s).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const TTL: Duration = Duration::from_secs(30);

    fn token(value: &str) -> CorrelationToken {
        CorrelationToken::new(value)
    }

    fn registry() -> SessionRegistry {
        SessionRegistry::new(TTL)
    }

    fn insert(registry: &mut SessionRegistry, state: CallState) -> SessionId {
        let id = SessionId::new();
        let mut session = CallSession::incoming(id, "sip:peer@example.com");
        session.apply_state(state);
        registry.upsert(session).unwrap();
        id
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_then_invite_with_same_token_keeps_provisional_id() {
        let mut reg = registry();
        let p1 = reg.add_pending(Some(token("T1")), "+15550100");

        tokio::time::advance(Duration::from_secs(2)).await;
        let resolution = reg.resolve_signaling_call(Some(&token("T1")), CallDirection::Incoming);

        assert_eq!(resolution.session_id(), p1);
        assert!(matches!(resolution, Resolution::AdoptedPending { by_token: true, .. }));
        assert!(reg.pending(&p1).is_none(), "pending record must be consumed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_mismatch_generates_fresh_id_and_keeps_pending() {
        let mut reg = registry();
        let p1 = reg.add_pending(Some(token("T1")), "+15550100");

        tokio::time::advance(Duration::from_secs(5)).await;
        let resolution = reg.resolve_signaling_call(Some(&token("T2")), CallDirection::Incoming);

        assert!(matches!(resolution, Resolution::Fresh(_)));
        assert_ne!(resolution.session_id(), p1);
        assert!(reg.pending(&p1).is_some());

        // still pending until the TTL runs out at t=30
        tokio::time::advance(Duration::from_secs(24)).await;
        assert!(reg.pending(&p1).is_some());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(reg.pending(&p1).is_none());
        assert_eq!(reg.take_expired().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_pending_never_matches_even_with_same_token() {
        let mut reg = registry();
        let p1 = reg.add_pending(Some(token("T1")), "+15550100");

        tokio::time::advance(Duration::from_secs(31)).await;
        let resolution = reg.resolve_signaling_call(Some(&token("T1")), CallDirection::Incoming);

        assert!(matches!(resolution, Resolution::Fresh(_)));
        assert_ne!(resolution.session_id(), p1);
    }

    #[tokio::test]
    async fn test_same_token_never_duplicates_sessions() {
        let mut reg = registry();
        let first = reg.resolve_signaling_call(Some(&token("T9")), CallDirection::Incoming);
        reg.upsert(CallSession::incoming(first.session_id(), "sip:a@x").with_token(Some(token("T9"))))
            .unwrap();

        for _ in 0..5 {
            let again = reg.resolve_signaling_call(Some(&token("T9")), CallDirection::Incoming);
            assert_eq!(again, Resolution::TokenMatch(first.session_id()));
        }
        assert_eq!(reg.sessions_where(|s| s.correlation_token == Some(token("T9"))).len(), 1);

        // a second session claiming the same token is refused
        let dup = CallSession::incoming(SessionId::new(), "sip:a@x").with_token(Some(token("T9")));
        assert!(reg.upsert(dup).is_err());
    }

    #[tokio::test]
    async fn test_timing_match_when_push_lacks_token() {
        let mut reg = registry();
        let p1 = reg.add_pending(None, "+15550100");
        let resolution = reg.resolve_signaling_call(Some(&token("T1")), CallDirection::Incoming);
        assert_eq!(
            resolution,
            Resolution::AdoptedPending {
                session_id: p1,
                by_token: false,
                declined: false,
                caller_handle: "+15550100".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_token_match_beats_timing_match() {
        let mut reg = registry();
        let _bare = reg.add_pending(None, "first");
        let tokened = reg.add_pending(Some(token("T1")), "second");

        let resolution = reg.resolve_signaling_call(Some(&token("T1")), CallDirection::Incoming);
        assert_eq!(resolution.session_id(), tokened);
    }

    #[tokio::test]
    async fn test_ambiguous_timing_match_refuses_to_guess() {
        let mut reg = registry();
        let a = reg.add_pending(None, "a");
        let b = reg.add_pending(None, "b");

        let resolution = reg.resolve_signaling_call(None, CallDirection::Incoming);
        assert!(matches!(resolution, Resolution::Fresh(_)));
        assert!(reg.pending(&a).is_some());
        assert!(reg.pending(&b).is_some());
    }

    #[tokio::test]
    async fn test_outgoing_calls_never_adopt_pending() {
        let mut reg = registry();
        let p1 = reg.add_pending(None, "+15550100");
        let resolution = reg.resolve_signaling_call(None, CallDirection::Outgoing);
        assert!(matches!(resolution, Resolution::Fresh(_)));
        assert!(reg.pending(&p1).is_some());
    }

    #[tokio::test]
    async fn test_mismatch_releases_waiters_immediately() {
        let mut reg = registry();
        let p1 = reg.add_pending(Some(token("T1")), "+15550100");
        let wait = reg.wait_for_session(p1);

        let _ = reg.resolve_signaling_call(Some(&token("T2")), CallDirection::Incoming);
        assert_eq!(wait.wait(Duration::from_secs(15)).await, WaitOutcome::Mismatch);
    }

    #[tokio::test]
    async fn test_waiter_resolved_on_insert() {
        let mut reg = registry();
        let p1 = reg.add_pending(Some(token("T1")), "+15550100");
        let wait = reg.wait_for_session(p1);

        let resolution = reg.resolve_signaling_call(Some(&token("T1")), CallDirection::Incoming);
        reg.upsert(CallSession::incoming(resolution.session_id(), "sip:a@x")).unwrap();
        assert_eq!(wait.wait(Duration::from_secs(15)).await, WaitOutcome::Arrived(p1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_resolves_expired_with_pending() {
        let mut reg = registry();
        let p1 = reg.add_pending(None, "+15550100");
        let wait = reg.wait_for_session(p1);

        tokio::time::advance(TTL).await;
        reg.purge_expired();
        assert_eq!(wait.wait(Duration::from_secs(1)).await, WaitOutcome::Expired);
    }

    #[tokio::test]
    async fn test_current_and_held_differ_with_two_calls() {
        let mut reg = registry();
        let held = insert(&mut reg, CallState::Paused);
        let active = insert(&mut reg, CallState::Connected);

        assert_eq!(reg.current_session().map(|s| s.session_id), Some(active));
        assert_eq!(reg.held_session().map(|s| s.session_id), Some(held));
    }

    #[tokio::test]
    async fn test_current_and_held_differ_when_everything_is_held() {
        let mut reg = registry();
        let _a = insert(&mut reg, CallState::Paused);
        let _b = insert(&mut reg, CallState::Paused);

        let current = reg.current_session().map(|s| s.session_id);
        let held = reg.held_session().map(|s| s.session_id);
        assert!(current.is_some());
        assert_ne!(current, held);
    }

    #[tokio::test]
    async fn test_in_flight_hold_flag_excludes_from_current() {
        let mut reg = registry();
        let a = insert(&mut reg, CallState::Connected);
        let b = insert(&mut reg, CallState::Connected);
        reg.update(&a, |s| s.is_on_hold = true).unwrap();

        assert_eq!(reg.current_session().map(|s| s.session_id), Some(b));
        assert_eq!(reg.held_session().map(|s| s.session_id), Some(a));
    }

    #[tokio::test]
    async fn test_single_held_call_is_both_current_and_held() {
        let mut reg = registry();
        let a = insert(&mut reg, CallState::Paused);
        assert_eq!(reg.current_session().map(|s| s.session_id), Some(a));
        assert_eq!(reg.held_session().map(|s| s.session_id), Some(a));
    }

    #[tokio::test]
    async fn test_incoming_waiting_excludes() {
        let mut reg = registry();
        let first = insert(&mut reg, CallState::Incoming);
        let second = insert(&mut reg, CallState::Incoming);

        assert_eq!(reg.incoming_waiting(None).map(|s| s.session_id), Some(first));
        assert_eq!(reg.incoming_waiting(Some(first)).map(|s| s.session_id), Some(second));
    }

    #[tokio::test]
    async fn test_bindings_are_collected_with_session() {
        let mut reg = registry();
        let session = insert(&mut reg, CallState::Incoming);
        let provider_id = Uuid::new_v4();

        reg.bind(provider_id, session).unwrap();
        assert_eq!(reg.binding(&provider_id), Some(session));
        assert_eq!(reg.provider_id_for(&session), provider_id);

        reg.remove(&session);
        assert_eq!(reg.binding(&provider_id), None);
        assert_eq!(reg.binding_count(), 0);
    }

    #[tokio::test]
    async fn test_bind_requires_existing_session() {
        let mut reg = registry();
        assert!(matches!(
            reg.bind(Uuid::new_v4(), SessionId::new()),
            Err(MobileError::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_adopting_pending_drops_fallback_binding() {
        let mut reg = registry();
        let p1 = reg.add_pending(Some(token("T1")), "+15550100");
        let other = insert(&mut reg, CallState::Connected);
        reg.bind(p1.as_uuid(), other).unwrap();

        let resolution = reg.resolve_signaling_call(Some(&token("T1")), CallDirection::Incoming);
        assert_eq!(resolution.session_id(), p1);
        assert_eq!(reg.binding(&p1.as_uuid()), None);

        reg.upsert(CallSession::incoming(p1, "sip:carol@x").with_token(Some(token("T1"))))
            .unwrap();
        assert_eq!(reg.provider_id_for(&other), other.as_uuid());
        assert_eq!(reg.provider_id_for(&p1), p1.as_uuid());
    }

    #[tokio::test]
    async fn test_insert_drops_binding_keyed_by_new_session_id() {
        let mut reg = registry();
        let other = insert(&mut reg, CallState::Connected);
        let late = SessionId::new();
        reg.bind(late.as_uuid(), other).unwrap();

        reg.upsert(CallSession::incoming(late, "sip:late@x")).unwrap();
        assert_eq!(reg.binding_count(), 0);
    }

    #[tokio::test]
    async fn test_clear_cancels_everything() {
        let mut reg = registry();
        let p1 = reg.add_pending(None, "x");
        let wait = reg.wait_for_session(p1);
        let session = insert(&mut reg, CallState::Connected);
        reg.bind(Uuid::new_v4(), session).unwrap();

        let cleared = reg.clear();
        assert_eq!(cleared.len(), 1);
        assert!(reg.is_empty());
        assert_eq!(reg.binding_count(), 0);
        assert!(!reg.has_pending());
        assert_eq!(wait.wait(Duration::from_secs(1)).await, WaitOutcome::Cancelled);
    }
}
