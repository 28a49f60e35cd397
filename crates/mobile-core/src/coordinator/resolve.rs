//! Target resolution for identifier-carrying actions
//!
//! The host call UI and the app address calls by identifiers that may not be
//! known to the registry yet, or ever. Resolution walks a fixed chain and
//! stops at the first hit:
//!
//! 1. an existing identifier binding
//! 2. an exact session match
//! 3. the session a previous wait reported for this action
//! 4. a live pending push record (hang-up declines it, anything else waits)
//! 5. a per-action heuristic over the current sessions
//!
//! A hit in steps 3 or 5 creates a binding, so every later action under the
//! same identifier reuses it until the session ends.

use tracing::{debug, info};

use crate::call::{CallState, ProviderCallId, SessionId};
use crate::error::{MobileError, MobileResult};
use crate::registry::{SessionRegistry, SessionWait, WaitOutcome};

/// What the action is trying to do, which picks the heuristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Answer,
    End,
    Hold,
    Resume,
    Mute,
    Digits,
    Transfer,
}

/// Progress of an action through the actor
#[derive(Debug)]
pub enum Step<T> {
    Done(T),
    /// Dialing while registration is still in progress
    AwaitRegistration,
    /// The target is a push-announced call that has not reached signaling
    AwaitSession(SessionWait),
}

/// Context carried when an action is re-dispatched after a wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveHint {
    Fresh,
    SessionWaited(WaitOutcome),
    RegistrationWaited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Session(SessionId),
    /// Only a pending push record exists (hang-up before the INVITE)
    PendingOnly(SessionId),
}

pub fn resolve_target(
    registry: &mut SessionRegistry,
    id: ProviderCallId,
    kind: ActionKind,
    hint: ResolveHint,
) -> MobileResult<Step<Target>> {
    if let Some(bound) = registry.binding(&id) {
        debug!(provider_id = %id, session_id = %bound, "Resolved through binding");
        return Ok(Step::Done(Target::Session(bound)));
    }

    let exact = SessionId::from(id);
    if registry.contains(&exact) {
        return Ok(Step::Done(Target::Session(exact)));
    }

    match hint {
        ResolveHint::SessionWaited(WaitOutcome::Arrived(session_id)) if registry.contains(&session_id) => {
            registry.bind(id, session_id)?;
            return Ok(Step::Done(Target::Session(session_id)));
        }
        ResolveHint::SessionWaited(outcome) => {
            debug!(provider_id = %id, outcome = ?outcome, "Session wait came back empty, trying heuristics");
        }
        ResolveHint::Fresh | ResolveHint::RegistrationWaited => {
            if registry.pending(&exact).is_some() {
                if kind == ActionKind::End {
                    return Ok(Step::Done(Target::PendingOnly(exact)));
                }
                debug!(provider_id = %id, action = ?kind, "Target not in signaling yet, waiting");
                return Ok(Step::AwaitSession(registry.wait_for_session(exact)));
            }
        }
    }

    match heuristic(registry, kind) {
        Some(session_id) => {
            info!(provider_id = %id, session_id = %session_id, action = ?kind, "Resolved unknown identifier by heuristic");
            registry.bind(id, session_id)?;
            Ok(Step::Done(Target::Session(session_id)))
        }
        None => Err(MobileError::session_not_found(id)),
    }
}

/// Pick a session for an action whose identifier could not be resolved
pub fn heuristic(registry: &SessionRegistry, kind: ActionKind) -> Option<SessionId> {
    let single = |sessions: Vec<&crate::call::CallSession>| match sessions.as_slice() {
        [only] => Some(only.session_id),
        _ => None,
    };

    match kind {
        ActionKind::Answer => single(registry.sessions_where(|s| s.state == CallState::Incoming)),
        ActionKind::End => single(registry.sessions_where(|s| s.state == CallState::Incoming))
            .or_else(|| single(registry.sessions_where(|s| s.is_live()))),
        ActionKind::Hold => registry
            .current_session()
            .filter(|s| s.state == CallState::Connected && !s.is_on_hold)
            .map(|s| s.session_id),
        ActionKind::Resume => single(
            registry.sessions_where(|s| s.is_live() && (s.state == CallState::Paused || s.is_on_hold)),
        ),
        ActionKind::Mute | ActionKind::Digits | ActionKind::Transfer => registry
            .current_session()
            .filter(|s| s.is_live())
            .map(|s| s.session_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallSession;
    use std::time::Duration;
    use uuid::Uuid;

    fn registry_with(states: &[CallState]) -> (SessionRegistry, Vec<SessionId>) {
        let mut registry = SessionRegistry::new(Duration::from_secs(30));
        let ids = states
            .iter()
            .map(|state| {
                let id = SessionId::new();
                let mut session = CallSession::incoming(id, "sip:peer@example.com");
                session.apply_state(*state);
                registry.upsert(session).unwrap();
                id
            })
            .collect();
        (registry, ids)
    }

    fn done(step: MobileResult<Step<Target>>) -> Target {
        match step {
            Ok(Step::Done(target)) => target,
            other => panic!("expected a resolved target, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resume_unknown_id_targets_single_paused_session() {
        let (mut registry, ids) = registry_with(&[CallState::Connected, CallState::Paused]);
        let unknown = Uuid::new_v4();

        let target = done(resolve_target(&mut registry, unknown, ActionKind::Resume, ResolveHint::Fresh));
        assert_eq!(target, Target::Session(ids[1]));
        // the identifier is now bound
        assert_eq!(registry.binding(&unknown), Some(ids[1]));
    }

    #[tokio::test]
    async fn test_resume_with_two_paused_sessions_is_not_found() {
        let (mut registry, _) = registry_with(&[CallState::Paused, CallState::Paused]);
        assert!(matches!(
            resolve_target(&mut registry, Uuid::new_v4(), ActionKind::Resume, ResolveHint::Fresh),
            Err(MobileError::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_binding_beats_heuristic_on_later_actions() {
        let (mut registry, ids) = registry_with(&[CallState::Incoming]);
        let unknown = Uuid::new_v4();
        done(resolve_target(&mut registry, unknown, ActionKind::Answer, ResolveHint::Fresh));

        // a second incoming call would make the heuristic ambiguous
        let other = SessionId::new();
        registry.upsert(CallSession::incoming(other, "sip:b@x")).unwrap();
        let target = done(resolve_target(&mut registry, unknown, ActionKind::End, ResolveHint::Fresh));
        assert_eq!(target, Target::Session(ids[0]));
    }

    #[tokio::test]
    async fn test_exact_match_creates_no_binding() {
        let (mut registry, ids) = registry_with(&[CallState::Connected]);
        let target = done(resolve_target(&mut registry, ids[0].as_uuid(), ActionKind::Hold, ResolveHint::Fresh));
        assert_eq!(target, Target::Session(ids[0]));
        assert_eq!(registry.binding_count(), 0);
    }

    #[tokio::test]
    async fn test_pending_target_waits_or_declines() {
        let mut registry = SessionRegistry::new(Duration::from_secs(30));
        let provisional = registry.add_pending(None, "+15550100");

        assert!(matches!(
            resolve_target(&mut registry, provisional.as_uuid(), ActionKind::Answer, ResolveHint::Fresh),
            Ok(Step::AwaitSession(_))
        ));
        assert_eq!(
            done(resolve_target(&mut registry, provisional.as_uuid(), ActionKind::End, ResolveHint::Fresh)),
            Target::PendingOnly(provisional)
        );
    }

    #[tokio::test]
    async fn test_mismatched_wait_falls_back_to_single_incoming() {
        let mut registry = SessionRegistry::new(Duration::from_secs(30));
        let provisional = registry.add_pending(Some(crate::call::CorrelationToken::new("T1")), "+15550100");
        let other = SessionId::new();
        registry.upsert(CallSession::incoming(other, "sip:b@x")).unwrap();

        let target = done(resolve_target(
            &mut registry,
            provisional.as_uuid(),
            ActionKind::Answer,
            ResolveHint::SessionWaited(WaitOutcome::Mismatch),
        ));
        assert_eq!(target, Target::Session(other));
    }

    #[tokio::test]
    async fn test_hold_heuristic_ignores_in_flight_hold() {
        let (mut registry, ids) = registry_with(&[CallState::Connected]);
        registry.update(&ids[0], |s| s.is_on_hold = true).unwrap();
        assert_eq!(heuristic(&registry, ActionKind::Hold), None);
        assert_eq!(heuristic(&registry, ActionKind::Resume), Some(ids[0]));
    }
}
