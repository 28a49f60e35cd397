//! Intents, host-UI actions and multi-call handling

mod common;

use common::{eventually, Harness};
use rvoip_mobile_core::mock::{EngineCommand, ProviderReport};
use rvoip_mobile_core::{
    AudioState, CallHandle, CallState, EndReason, MobileConfig, MobileError, ProviderAction, ProviderRequest,
    SessionId,
};
use uuid::Uuid;

#[tokio::test]
async fn test_dial_without_call_ui_places_call_and_activates_audio() {
    let h = Harness::without_call_ui(MobileConfig::default()).await;
    h.login().await;

    let session_id = h.connected_outgoing("sip:bob@example.com").await;
    assert!(h
        .engine
        .commands()
        .contains(&EngineCommand::Invite("sip:bob@example.com".to_string())));

    // no host UI hands over an audio session, so the core activates it
    eventually(|| async { h.client.audio_state().await.unwrap() == AudioState::Active }).await;
    assert_eq!(h.audio.active_calls(), vec![true]);
    assert!(h.engine.commands().contains(&EngineCommand::SetAudioActive(true)));

    let session = h.session(session_id).await.unwrap();
    assert!(session.connect_time.is_some());
}

#[tokio::test]
async fn test_dial_through_call_ui() {
    let h = Harness::with_call_ui(MobileConfig::default()).await;
    h.login().await;

    let session_id = h.client.dial("sip:bob@example.com").await.unwrap();
    assert_eq!(
        h.provider.requests(),
        vec![ProviderRequest::StartCall {
            id: session_id.as_uuid(),
            handle: "sip:bob@example.com".to_string(),
        }]
    );

    // the echoed start-call action places it under the same identifier
    eventually(|| async { h.session(session_id).await.is_some() }).await;
    eventually(|| async { h.client.audio_state().await.unwrap() == AudioState::Active }).await;
    assert!(h
        .provider
        .reports()
        .contains(&ProviderReport::OutgoingStarted(session_id.as_uuid())));

    let handle = h.engine.last_outgoing().unwrap();
    h.engine.remote_answer(handle);
    h.wait_state(session_id, CallState::Connected).await;
    assert!(h
        .provider
        .reports()
        .contains(&ProviderReport::OutgoingConnected(session_id.as_uuid())));
}

#[tokio::test]
async fn test_refused_start_call_falls_back_to_signaling() {
    let h = Harness::with_call_ui(MobileConfig::default()).await;
    h.login().await;
    h.provider.fail_requests(true);

    let session_id = h.client.dial("sip:bob@example.com").await.unwrap();
    // placed directly, before the dial returned
    assert!(h.session(session_id).await.is_some());
    assert!(h
        .engine
        .commands()
        .contains(&EngineCommand::Invite("sip:bob@example.com".to_string())));
}

#[tokio::test]
async fn test_dial_preconditions() {
    let h = Harness::without_call_ui(MobileConfig::default()).await;

    // microphone permission is checked first
    assert!(matches!(
        h.client.dial("sip:bob@example.com").await,
        Err(MobileError::PermissionDenied { .. })
    ));

    h.client.set_audio_permission(true).await.unwrap();
    assert_eq!(
        h.client.dial("sip:bob@example.com").await,
        Err(MobileError::NotRegistered)
    );

    h.login().await;
    assert!(matches!(
        h.client.dial("   ").await,
        Err(MobileError::InvalidAddress { .. })
    ));
    assert!(h.client.sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_answer_requires_permission() {
    let h = Harness::without_call_ui(MobileConfig::default()).await;
    h.login().await;
    h.client.set_audio_permission(false).await.unwrap();

    let session_id = h.incoming("sip:carol@example.com", None).await;
    assert!(matches!(
        h.client.answer(session_id).await,
        Err(MobileError::PermissionDenied { .. })
    ));
    assert_eq!(h.state_of(session_id).await, Some(CallState::Incoming));
}

#[tokio::test]
async fn test_answering_second_call_holds_the_first() {
    let h = Harness::without_call_ui(MobileConfig::default()).await;
    h.login().await;

    let first = h.connected_outgoing("sip:bob@example.com").await;
    let second = h.incoming("sip:carol@example.com", None).await;

    h.client.answer(second).await.unwrap();
    h.wait_state(second, CallState::Connected).await;
    h.wait_state(first, CallState::Paused).await;

    let current = h.client.current_session().await.unwrap().unwrap();
    assert_eq!(current.session_id, second);
    let held = h.client.held_session().await.unwrap().unwrap();
    assert_eq!(held.session_id, first);
}

#[tokio::test]
async fn test_swap_exchanges_active_and_held() {
    let h = Harness::without_call_ui(MobileConfig::default()).await;
    h.login().await;

    let a = h.connected_outgoing("sip:bob@example.com").await;
    h.client.set_hold(a, true).await.unwrap();
    h.wait_state(a, CallState::Paused).await;
    let b = h.connected_outgoing("sip:carol@example.com").await;

    assert_eq!(h.client.swap().await, Ok(a));
    h.wait_state(a, CallState::Connected).await;
    h.wait_state(b, CallState::Paused).await;

    // and back again
    assert_eq!(h.client.swap().await, Ok(b));
    h.wait_state(b, CallState::Connected).await;
    h.wait_state(a, CallState::Paused).await;
    assert!(!h.session(b).await.unwrap().is_on_hold);
    assert!(h.session(a).await.unwrap().is_on_hold);
}

/// One call on hold, a second one active; returns (held, active)
async fn held_and_active(h: &Harness) -> ((SessionId, CallHandle), (SessionId, CallHandle)) {
    let held = h.connected_outgoing("sip:bob@example.com").await;
    let held_handle = h.engine.last_outgoing().unwrap();
    h.client.set_hold(held, true).await.unwrap();
    h.wait_state(held, CallState::Paused).await;
    let active = h.connected_outgoing("sip:carol@example.com").await;
    let active_handle = h.engine.last_outgoing().unwrap();
    ((held, held_handle), (active, active_handle))
}

/// (state, on-hold flag) of the formerly held call, then the formerly active one
async fn swapped_snapshot(h: &Harness, held: SessionId, active: SessionId) -> [(CallState, bool); 2] {
    h.wait_state(held, CallState::Connected).await;
    h.wait_state(active, CallState::Paused).await;
    let held = h.session(held).await.unwrap();
    let active = h.session(active).await.unwrap();
    [(held.state, held.is_on_hold), (active.state, active.is_on_hold)]
}

#[tokio::test]
async fn test_swap_sub_steps_commute() {
    let swapped = {
        let h = Harness::without_call_ui(MobileConfig::default()).await;
        h.login().await;
        let ((held, _), (active, _)) = held_and_active(&h).await;
        assert_eq!(h.client.swap().await, Ok(held));
        swapped_snapshot(&h, held, active).await
    };

    let resume_first = {
        let h = Harness::without_call_ui(MobileConfig::default()).await;
        h.login().await;
        let ((held, _), (active, _)) = held_and_active(&h).await;
        h.client.set_hold(held, false).await.unwrap();
        h.client.set_hold(active, true).await.unwrap();
        swapped_snapshot(&h, held, active).await
    };

    let hold_first = {
        let h = Harness::without_call_ui(MobileConfig::default()).await;
        h.login().await;
        let ((held, _), (active, _)) = held_and_active(&h).await;
        h.client.set_hold(active, true).await.unwrap();
        h.client.set_hold(held, false).await.unwrap();
        swapped_snapshot(&h, held, active).await
    };

    assert_eq!(swapped, [(CallState::Connected, false), (CallState::Paused, true)]);
    assert_eq!(resume_first, swapped);
    assert_eq!(hold_first, swapped);
}

#[tokio::test]
async fn test_swap_with_failed_hold_still_resumes() {
    let h = Harness::without_call_ui(MobileConfig::default()).await;
    h.login().await;
    let ((held, held_handle), (active, active_handle)) = held_and_active(&h).await;

    h.engine.fail_operation("pause");
    assert!(h.client.swap().await.is_err());

    // the resume half went out and is not undone
    assert!(h.engine.commands().contains(&EngineCommand::Resume(held_handle)));
    h.wait_state(held, CallState::Connected).await;
    assert!(!h.session(held).await.unwrap().is_on_hold);
    assert!(!h.engine.commands().contains(&EngineCommand::Pause(active_handle)));

    // the refused hold left the active call as it was
    let active = h.session(active).await.unwrap();
    assert_eq!(active.state, CallState::Connected);
    assert!(!active.is_on_hold);

    // and the hold can simply be retried
    h.engine.recover("pause");
    h.client.set_hold(active.session_id, true).await.unwrap();
    h.wait_state(active.session_id, CallState::Paused).await;
}

#[tokio::test]
async fn test_answer_proceeds_when_holding_the_active_call_fails() {
    let h = Harness::without_call_ui(MobileConfig::default()).await;
    h.login().await;

    let first = h.connected_outgoing("sip:bob@example.com").await;
    let first_handle = h.engine.last_outgoing().unwrap();
    let second = h.incoming("sip:carol@example.com", None).await;

    h.engine.fail_operation("pause");
    assert_eq!(h.client.answer(second).await, Ok(second));
    h.wait_state(second, CallState::Connected).await;
    assert!(h
        .engine
        .commands()
        .iter()
        .any(|c| matches!(c, EngineCommand::Accept(_))));

    // the first call was never paused and its hold flag was restored
    assert!(!h.engine.commands().contains(&EngineCommand::Pause(first_handle)));
    let first = h.session(first).await.unwrap();
    assert_eq!(first.state, CallState::Connected);
    assert!(!first.is_on_hold);
}

#[tokio::test]
async fn test_refused_hold_restores_flag() {
    let h = Harness::without_call_ui(MobileConfig::default()).await;
    h.login().await;
    let session_id = h.connected_outgoing("sip:bob@example.com").await;

    h.engine.fail_operation("pause");
    assert!(h.client.set_hold(session_id, true).await.is_err());
    let session = h.session(session_id).await.unwrap();
    assert_eq!(session.state, CallState::Connected);
    assert!(!session.is_on_hold);
}

#[tokio::test]
async fn test_swap_needs_two_calls() {
    let h = Harness::without_call_ui(MobileConfig::default()).await;
    h.login().await;
    h.connected_outgoing("sip:bob@example.com").await;

    assert!(matches!(h.client.swap().await, Err(MobileError::SessionNotFound { .. })));
}

#[tokio::test]
async fn test_unknown_resume_targets_the_only_held_call() {
    let h = Harness::without_call_ui(MobileConfig::default()).await;
    h.login().await;

    let a = h.connected_outgoing("sip:bob@example.com").await;
    h.client.set_hold(a, true).await.unwrap();
    h.wait_state(a, CallState::Paused).await;
    let b = h.connected_outgoing("sip:carol@example.com").await;

    let unknown = Uuid::new_v4();
    h.client
        .provider_action(ProviderAction::SetHeld {
            id: unknown,
            on_hold: false,
        })
        .await
        .unwrap();
    h.wait_state(a, CallState::Connected).await;
    assert_eq!(h.state_of(b).await, Some(CallState::Connected));

    // the identifier stays bound to that call
    h.client
        .provider_action(ProviderAction::SetHeld {
            id: unknown,
            on_hold: true,
        })
        .await
        .unwrap();
    h.wait_state(a, CallState::Paused).await;
}

#[tokio::test]
async fn test_unknown_identifier_without_candidate_is_not_found() {
    let h = Harness::without_call_ui(MobileConfig::default()).await;
    h.login().await;

    let result = h
        .client
        .provider_action(ProviderAction::Answer { id: Uuid::new_v4() })
        .await;
    assert!(matches!(result, Err(MobileError::SessionNotFound { .. })));
}

#[tokio::test]
async fn test_mute_dtmf_and_transfer() {
    let h = Harness::without_call_ui(MobileConfig::default()).await;
    h.login().await;
    let session_id = h.connected_outgoing("sip:bob@example.com").await;

    h.client.set_mute(session_id, true).await.unwrap();
    assert!(h.session(session_id).await.unwrap().is_muted);

    h.client.send_dtmf(session_id, "12#").await.unwrap();
    assert_eq!(h.engine.dtmf_sent(), "12#");
    assert_eq!(
        h.client.send_dtmf(session_id, "1x").await,
        Err(MobileError::InvalidDigit { digit: 'x' })
    );

    h.client.transfer(session_id, "sip:dave@example.com").await.unwrap();
    eventually(|| async { h.session(session_id).await.is_none() }).await;
}

#[tokio::test]
async fn test_hold_is_idempotent() {
    let h = Harness::without_call_ui(MobileConfig::default()).await;
    h.login().await;
    let session_id = h.connected_outgoing("sip:bob@example.com").await;

    h.client.set_hold(session_id, true).await.unwrap();
    h.client.set_hold(session_id, true).await.unwrap();
    h.wait_state(session_id, CallState::Paused).await;

    let pauses = h
        .engine
        .commands()
        .iter()
        .filter(|c| matches!(c, EngineCommand::Pause(_)))
        .count();
    assert_eq!(pauses, 1);
}

#[tokio::test]
async fn test_end_reasons_reported_to_call_ui() {
    let h = Harness::with_call_ui(MobileConfig::default()).await;
    h.login().await;

    // incoming, never answered
    let ringing = h.engine.incoming_call("sip:carol@example.com", None);
    eventually(|| async { h.client.sessions().await.unwrap().len() == 1 }).await;
    let missed = h.client.sessions().await.unwrap()[0].session_id;
    h.engine.remote_hangup(ringing);
    eventually(|| async { h.session(missed).await.is_none() }).await;

    // outgoing, answered, then hung up by the far end
    let dialed = h.client.dial("sip:bob@example.com").await.unwrap();
    eventually(|| async { h.session(dialed).await.is_some() }).await;
    let outgoing = h.engine.last_outgoing().unwrap();
    h.engine.remote_answer(outgoing);
    h.wait_state(dialed, CallState::Connected).await;
    h.engine.remote_hangup(outgoing);
    eventually(|| async { h.session(dialed).await.is_none() }).await;

    // engine error
    let failing = h.engine.incoming_call("sip:dave@example.com", None);
    eventually(|| async { h.client.sessions().await.unwrap().len() == 1 }).await;
    let failed = h.client.sessions().await.unwrap()[0].session_id;
    h.engine.fail_call(failing);
    eventually(|| async { h.session(failed).await.is_none() }).await;

    // cancelled because another device picked it up
    let forked = h.engine.incoming_call("sip:erin@example.com", None);
    eventually(|| async { h.client.sessions().await.unwrap().len() == 1 }).await;
    let elsewhere = h.client.sessions().await.unwrap()[0].session_id;
    h.engine.answered_elsewhere(forked);
    eventually(|| async { h.session(elsewhere).await.is_none() }).await;

    let ended = h.provider.ended();
    assert!(ended.contains(&(elsewhere.as_uuid(), EndReason::AnsweredElsewhere)));
    assert!(ended.contains(&(missed.as_uuid(), EndReason::Unanswered)));
    assert!(ended.contains(&(dialed.as_uuid(), EndReason::RemoteEnded)));
    assert!(ended.contains(&(failed.as_uuid(), EndReason::Failed)));
}

#[tokio::test]
async fn test_call_ui_hangup_is_not_reported_back() {
    let h = Harness::with_call_ui(MobileConfig::default()).await;
    h.login().await;

    let session_id = h.incoming("sip:carol@example.com", None).await;
    h.client.hangup(session_id).await.unwrap();
    eventually(|| async { h.session(session_id).await.is_none() }).await;

    assert_eq!(
        h.provider.requests(),
        vec![ProviderRequest::End {
            id: session_id.as_uuid()
        }]
    );
    assert!(h.provider.ended().is_empty());
}

#[tokio::test]
async fn test_refused_incoming_report_rejects_the_call() {
    let h = Harness::with_call_ui(MobileConfig::default()).await;
    h.login().await;
    h.provider.reject_incoming(true);

    let handle = h.engine.incoming_call("sip:spam@example.com", None);
    eventually(|| async { h.engine.commands().contains(&EngineCommand::Terminate(handle)) }).await;
    eventually(|| async { h.client.sessions().await.unwrap().is_empty() }).await;
    assert!(h.provider.ended().is_empty());
}
