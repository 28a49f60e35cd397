//! Push wake-ups racing the INVITE

mod common;

use std::time::Duration;

use common::{eventually, Harness};
use rvoip_mobile_core::mock::{EngineCommand, ProviderReport};
use rvoip_mobile_core::{CallState, EndReason, IncomingPush, MobileConfig, MobileEvent, ProviderAction};

#[tokio::test]
async fn test_push_then_invite_adopts_provisional_id() {
    let h = Harness::with_call_ui(MobileConfig::default()).await;
    h.login().await;

    let provisional = h
        .client
        .on_incoming_push(IncomingPush::new("sip:carol@example.com").with_token("T1"))
        .await
        .unwrap();
    // reported before the push handler returned
    assert_eq!(
        h.provider.reports(),
        vec![ProviderReport::Incoming {
            id: provisional.as_uuid(),
            handle: "sip:carol@example.com".to_string(),
        }]
    );

    let session_id = h.incoming("sip:carol@example.com", Some("T1")).await;
    assert_eq!(session_id, provisional);
    assert_eq!(h.state_of(provisional).await, Some(CallState::Incoming));
    // the adopted call is not reported a second time
    assert_eq!(h.provider.incoming_reports(), 1);
}

#[tokio::test]
async fn test_push_refreshes_registration() {
    let h = Harness::with_call_ui(MobileConfig::default()).await;
    h.login().await;

    h.client
        .on_incoming_push(IncomingPush::new("sip:carol@example.com"))
        .await
        .unwrap();
    eventually(|| async { h.engine.commands().contains(&EngineCommand::RefreshRegistration) }).await;
}

#[tokio::test]
async fn test_answer_before_invite_waits_for_the_call() {
    let h = Harness::with_call_ui(MobileConfig::default()).await;
    h.login().await;

    let provisional = h
        .client
        .on_incoming_push(IncomingPush::new("sip:carol@example.com").with_token("T1"))
        .await
        .unwrap();

    let client = h.client.clone();
    let answer = tokio::spawn(async move {
        client
            .provider_action(ProviderAction::Answer {
                id: provisional.as_uuid(),
            })
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!answer.is_finished());

    h.engine.incoming_call("sip:carol@example.com", Some("T1"));
    answer.await.unwrap().unwrap();

    h.wait_state(provisional, CallState::Connected).await;
}

#[tokio::test]
async fn test_mismatched_invite_releases_waiting_answer() {
    let h = Harness::with_call_ui(MobileConfig::default()).await;
    h.login().await;

    let provisional = h
        .client
        .on_incoming_push(IncomingPush::new("sip:carol@example.com").with_token("T1"))
        .await
        .unwrap();

    let client = h.client.clone();
    let answer = tokio::spawn(async move {
        client
            .provider_action(ProviderAction::Answer {
                id: provisional.as_uuid(),
            })
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // a different call: carries another token, so no adoption
    h.engine.incoming_call("sip:dave@example.com", Some("T2"));
    answer.await.unwrap().unwrap();

    let sessions = h.client.sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    let other = &sessions[0];
    assert_ne!(other.session_id, provisional);
    assert_eq!(other.remote_address, "sip:dave@example.com");
    h.wait_state(other.session_id, CallState::Connected).await;
}

#[tokio::test]
async fn test_late_invite_reclaims_identifier_from_fallback() {
    let h = Harness::with_call_ui(MobileConfig::default()).await;
    h.login().await;

    let provisional = h
        .client
        .on_incoming_push(IncomingPush::new("sip:carol@example.com").with_token("T1"))
        .await
        .unwrap();

    let client = h.client.clone();
    let answer = tokio::spawn(async move {
        client
            .provider_action(ProviderAction::Answer {
                id: provisional.as_uuid(),
            })
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // dave's call takes the answer through the single-incoming fallback
    let dave_handle = h.engine.incoming_call("sip:dave@example.com", Some("T2"));
    answer.await.unwrap().unwrap();
    let dave = h.client.sessions().await.unwrap()[0].session_id;
    h.wait_state(dave, CallState::Connected).await;

    // carol's INVITE still adopts the pushed identifier
    let carol_handle = h.engine.incoming_call("sip:carol@example.com", Some("T1"));
    h.wait_state(provisional, CallState::Incoming).await;

    h.client
        .provider_action(ProviderAction::End {
            id: provisional.as_uuid(),
        })
        .await
        .unwrap();
    eventually(|| async { h.engine.commands().contains(&EngineCommand::Terminate(carol_handle)) }).await;
    eventually(|| async { h.session(provisional).await.is_none() }).await;

    assert!(!h.engine.commands().contains(&EngineCommand::Terminate(dave_handle)));
    assert_eq!(h.state_of(dave).await, Some(CallState::Connected));
}

#[tokio::test]
async fn test_token_mismatch_gets_fresh_identifier() {
    let h = Harness::with_silent_call_ui(MobileConfig::default()).await;
    h.login().await;

    let provisional = h
        .client
        .on_incoming_push(IncomingPush::new("sip:carol@example.com").with_token("T1"))
        .await
        .unwrap();
    let session_id = h.incoming("sip:dave@example.com", Some("T2")).await;

    assert_ne!(session_id, provisional);
    // the fresh call is reported on its own
    assert_eq!(h.provider.incoming_reports(), 2);
}

#[tokio::test]
async fn test_tokenless_push_matches_by_timing() {
    let h = Harness::with_silent_call_ui(MobileConfig::default()).await;
    h.login().await;

    let provisional = h
        .client
        .on_incoming_push(IncomingPush::new("sip:carol@example.com"))
        .await
        .unwrap();
    let session_id = h.incoming("sip:carol@example.com", Some("T9")).await;
    assert_eq!(session_id, provisional);
}

#[tokio::test]
async fn test_duplicate_push_reports_once() {
    let h = Harness::with_silent_call_ui(MobileConfig::default()).await;
    h.login().await;

    let push = IncomingPush::new("sip:carol@example.com").with_token("T1");
    let first = h.client.on_incoming_push(push.clone()).await.unwrap();
    let second = h.client.on_incoming_push(push).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.provider.incoming_reports(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_push_is_cleared_and_not_adopted() {
    let h = Harness::with_silent_call_ui(MobileConfig::default()).await;
    h.login().await;
    let mut events = h.client.subscribe();

    let provisional = h
        .client
        .on_incoming_push(IncomingPush::new("sip:carol@example.com").with_token("T1"))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(h.provider.ended().contains(&(provisional.as_uuid(), EndReason::Unanswered)));

    let mut expired = false;
    while let Ok(event) = events.try_recv() {
        if let MobileEvent::PushExpired { provisional_id } = event {
            expired |= provisional_id == provisional;
        }
    }
    assert!(expired);

    let session_id = h.incoming("sip:carol@example.com", Some("T1")).await;
    assert_ne!(session_id, provisional);
}

#[tokio::test]
async fn test_end_before_invite_declines_the_call() {
    let h = Harness::with_silent_call_ui(MobileConfig::default()).await;
    h.login().await;

    let provisional = h
        .client
        .on_incoming_push(IncomingPush::new("sip:carol@example.com").with_token("T1"))
        .await
        .unwrap();
    h.client
        .provider_action(ProviderAction::End {
            id: provisional.as_uuid(),
        })
        .await
        .unwrap();

    let handle = h.engine.incoming_call("sip:carol@example.com", Some("T1"));
    eventually(|| async { h.engine.commands().contains(&EngineCommand::Terminate(handle)) }).await;
    eventually(|| async { h.client.sessions().await.unwrap().is_empty() }).await;

    // the host ended it, so nothing is reported back
    assert!(h.provider.ended().is_empty());
}

#[tokio::test]
async fn test_app_hangup_of_pending_call_falls_back_when_ui_refuses() {
    let h = Harness::with_silent_call_ui(MobileConfig::default()).await;
    h.login().await;

    let provisional = h
        .client
        .on_incoming_push(IncomingPush::new("sip:carol@example.com").with_token("T1"))
        .await
        .unwrap();
    h.provider.fail_requests(true);

    assert_eq!(h.client.hangup(provisional).await, Ok(provisional));
    assert_eq!(
        h.provider.ended(),
        vec![(provisional.as_uuid(), EndReason::DeclinedElsewhere)]
    );

    let handle = h.engine.incoming_call("sip:carol@example.com", Some("T1"));
    eventually(|| async { h.engine.commands().contains(&EngineCommand::Terminate(handle)) }).await;
}

#[tokio::test]
async fn test_refused_push_report_returns_error() {
    let h = Harness::with_silent_call_ui(MobileConfig::default()).await;
    h.login().await;
    h.provider.reject_incoming(true);

    let result = h
        .client
        .on_incoming_push(IncomingPush::new("sip:carol@example.com").with_token("T1"))
        .await;
    assert!(matches!(result, Err(rvoip_mobile_core::MobileError::ProviderFailed { .. })));
}
