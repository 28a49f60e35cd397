//! The core actor
//!
//! One task owns the registry, the signaling adapter, the audio sequencer and
//! the coordinator. It serves three inputs, in priority order:
//!
//! 1. engine callbacks, so a query issued after an engine event sees it
//! 2. internal continuations (resumed actions, retry timers, purge timers)
//! 3. commands from [`MobileClient`](super::MobileClient) handles
//!
//! Anything that has to wait runs in a spawned task that reports back
//! through the internal channel; the actor itself never blocks on a timer.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::audio::{AudioSequencer, AudioState};
use crate::call::{CallSession, SessionId};
use crate::config::MobileConfig;
use crate::coordinator::{CallActionCoordinator, CallContext, Intent, ResolveHint, Step};
use crate::error::{MobileError, MobileResult};
use crate::events::{EventEmitter, MobileEvent, RemovalReason};
use crate::provider::{EndReason, ProviderAction};
use crate::push::{on_incoming_push, IncomingPush, PushOutcome};
use crate::recovery::RetryDecision;
use crate::registration::{Credentials, RegistrationHandle, RegistrationState, RegistrationStatus};
use crate::registry::{SessionRegistry, SessionWait};
use crate::signaling::{AppState, EngineEvent, EngineRegistrationState, IterateMode, SignalingAdapter};

/// Borrow the actor's state as a coordinator context
macro_rules! call_context {
    ($actor:ident) => {
        CallContext {
            registry: &mut $actor.registry,
            signaling: &mut $actor.signaling,
            audio: &mut $actor.audio,
            events: &$actor.events,
        }
    };
}

type Reply<T> = oneshot::Sender<T>;

/// Requests from client handles
#[derive(Debug)]
pub(crate) enum Command {
    Register {
        credentials: Credentials,
        reply: Reply<MobileResult<RegistrationHandle>>,
    },
    Unregister {
        reply: Reply<MobileResult<()>>,
    },
    Intent {
        intent: Intent,
        reply: Reply<MobileResult<SessionId>>,
    },
    /// Host-UI actions that carry no call identifier
    ProviderSignal {
        action: ProviderAction,
        reply: Reply<MobileResult<()>>,
    },
    IncomingPush {
        push: IncomingPush,
        reply: Reply<MobileResult<PushOutcome>>,
    },
    WaitForSession {
        provisional_id: SessionId,
        reply: Reply<SessionWait>,
    },
    Sessions {
        reply: Reply<Vec<CallSession>>,
    },
    Session {
        session_id: SessionId,
        reply: Reply<Option<CallSession>>,
    },
    CurrentSession {
        reply: Reply<Option<CallSession>>,
    },
    HeldSession {
        reply: Reply<Option<CallSession>>,
    },
    SetAudioPermission {
        granted: bool,
        reply: Reply<()>,
    },
    SetAppState {
        state: AppState,
        reply: Reply<()>,
    },
    AudioState {
        reply: Reply<AudioState>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// Continuations the actor sends itself
#[derive(Debug)]
pub(crate) enum Internal {
    Resume {
        intent: Intent,
        reply: Reply<MobileResult<SessionId>>,
        hint: ResolveHint,
    },
    RetryRegistration {
        handle: RegistrationHandle,
    },
    PurgePending,
}

pub(crate) struct CoreActor {
    config: MobileConfig,
    registry: SessionRegistry,
    signaling: SignalingAdapter,
    audio: AudioSequencer,
    coordinator: CallActionCoordinator,
    events: EventEmitter,
    app_state: AppState,
    registration_tx: watch::Sender<RegistrationStatus>,
    iterate_tx: watch::Sender<IterateMode>,
    commands: mpsc::Receiver<Command>,
    engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
}

impl CoreActor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: MobileConfig,
        signaling: SignalingAdapter,
        audio: AudioSequencer,
        coordinator: CallActionCoordinator,
        events: EventEmitter,
        registration_tx: watch::Sender<RegistrationStatus>,
        iterate_tx: watch::Sender<IterateMode>,
        commands: mpsc::Receiver<Command>,
        engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            registry: SessionRegistry::new(config.pending_incoming_ttl),
            config,
            signaling,
            audio,
            coordinator,
            events,
            app_state: AppState::Foreground,
            registration_tx,
            iterate_tx,
            commands,
            engine_events,
            internal_tx,
            internal_rx,
        }
    }

    pub(crate) async fn run(mut self) {
        info!("Mobile core actor started");
        loop {
            tokio::select! {
                biased;

                Some(event) = self.engine_events.recv() => self.on_engine_event(event).await,
                Some(internal) = self.internal_rx.recv() => self.on_internal(internal).await,
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.on_command(command).await,
                    None => {
                        debug!("All client handles dropped");
                        self.shutdown().await;
                        break;
                    }
                },
            }

            self.flush_expired().await;
            self.update_iterate_mode();
        }
        info!("Mobile core actor stopped");
    }

    // ===== INPUTS =====

    async fn on_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Registration { state, code, reason } => {
                self.on_registration_event(state, code, reason);
            }
            EngineEvent::CallState(update) => {
                let handle = update.handle;
                let mut ctx = call_context!(self);
                if let Err(e) = self.coordinator.on_call_event(&mut ctx, update).await {
                    warn!(handle = %handle, error = %e, "Engine call event not applied");
                }
            }
        }
    }

    async fn on_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Resume { intent, reply, hint } => {
                debug!(intent = intent.name(), hint = ?hint, "Resuming suspended action");
                self.dispatch(intent, reply, hint).await;
            }
            Internal::RetryRegistration { handle } => self.retry_registration(handle).await,
            // the purge itself runs after every message
            Internal::PurgePending => {}
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Register { credentials, reply } => {
                let result = self.signaling.register(credentials).await;
                if result.is_ok() {
                    let status = self.signaling.registration_status();
                    self.publish_registration(status);
                }
                let _ = reply.send(result);
            }
            Command::Unregister { reply } => {
                let result = self.signaling.unregister().await.map(|status| {
                    self.publish_registration(status);
                });
                let _ = reply.send(result);
            }
            Command::Intent { intent, reply } => {
                self.dispatch(intent, reply, ResolveHint::Fresh).await;
            }
            Command::ProviderSignal { action, reply } => {
                let mut ctx = call_context!(self);
                let result = self.coordinator.handle_provider_signal(&mut ctx, &action).await;
                if let Err(e) = &result {
                    self.report_failure(action.name(), None, e);
                }
                let _ = reply.send(result);
            }
            Command::IncomingPush { push, reply } => self.on_push(push, reply).await,
            Command::WaitForSession { provisional_id, reply } => {
                let _ = reply.send(self.registry.wait_for_session(provisional_id));
            }
            Command::Sessions { reply } => {
                let _ = reply.send(self.registry.all());
            }
            Command::Session { session_id, reply } => {
                let _ = reply.send(self.registry.get(&session_id).cloned());
            }
            Command::CurrentSession { reply } => {
                let _ = reply.send(self.registry.current_session().cloned());
            }
            Command::HeldSession { reply } => {
                let _ = reply.send(self.registry.held_session().cloned());
            }
            Command::SetAudioPermission { granted, reply } => {
                self.coordinator.set_audio_permission(granted);
                let _ = reply.send(());
            }
            Command::SetAppState { state, reply } => {
                if self.app_state != state {
                    info!(state = ?state, "App state changed");
                    self.app_state = state;
                }
                let _ = reply.send(());
            }
            Command::AudioState { reply } => {
                let _ = reply.send(self.audio.state());
            }
            Command::Shutdown { reply } => {
                // handled by the run loop
                let _ = reply.send(());
            }
        }
    }

    // ===== ACTIONS =====

    /// Run an intent, suspending it if it has to wait
    ///
    /// A resumed intent carries a non-`Fresh` hint, and the coordinator never
    /// asks to wait twice for the same thing.
    async fn dispatch(&mut self, intent: Intent, reply: Reply<MobileResult<SessionId>>, hint: ResolveHint) {
        let mut ctx = call_context!(self);
        let result = self.coordinator.handle_intent(&mut ctx, &intent, hint).await;

        match result {
            Ok(Step::Done(session_id)) => {
                let _ = reply.send(Ok(session_id));
            }
            Ok(Step::AwaitRegistration) => {
                let mut status = self.registration_tx.subscribe();
                let timeout = self.config.registration_timeout;
                let internal = self.internal_tx.clone();
                tokio::spawn(async move {
                    let settled = tokio::time::timeout(
                        timeout,
                        status.wait_for(|s| s.state != RegistrationState::Progress),
                    )
                    .await
                    .map(|r| r.is_ok())
                    .unwrap_or(false);
                    debug!(settled, "Registration wait finished");
                    let _ = internal.send(Internal::Resume {
                        intent,
                        reply,
                        hint: ResolveHint::RegistrationWaited,
                    });
                });
            }
            Ok(Step::AwaitSession(wait)) => {
                let timeout = self.config.session_wait_timeout;
                let internal = self.internal_tx.clone();
                tokio::spawn(async move {
                    let outcome = wait.wait(timeout).await;
                    let _ = internal.send(Internal::Resume {
                        intent,
                        reply,
                        hint: ResolveHint::SessionWaited(outcome),
                    });
                });
            }
            Err(e) => {
                self.report_failure(intent.name(), intent.target_id().map(SessionId::from), &e);
                let _ = reply.send(Err(e));
            }
        }
    }

    fn report_failure(&self, action: &str, session_id: Option<SessionId>, error: &MobileError) {
        warn!(action, session_id = ?session_id, error = %error, category = error.category(), "Action failed");
        self.events.emit(MobileEvent::ActionFailed {
            action: action.to_string(),
            session_id,
            error: error.clone(),
        });
    }

    // ===== REGISTRATION =====

    fn on_registration_event(&mut self, state: EngineRegistrationState, code: Option<u16>, reason: Option<String>) {
        let Some(status) = self.signaling.on_registration_event(state, code, reason) else {
            debug!(state = ?state, "Registration event without an account ignored");
            return;
        };
        if status.state != RegistrationState::Failed {
            self.publish_registration(status);
            return;
        }

        let Some((handle, retries)) = self.signaling.account().map(|a| (a.handle, a.retries)) else {
            return;
        };
        match self.config.registration_retry.decide(code, retries) {
            RetryDecision::RetryAfter(delay) => {
                info!(code = ?code, retry = retries + 1, delay_ms = delay.as_millis() as u64, "Registration failed, retrying");
                if let Some(progress) = self.signaling.set_account_state(RegistrationState::Progress) {
                    self.publish_registration(progress);
                }
                self.schedule(delay, Internal::RetryRegistration { handle });
            }
            RetryDecision::GiveUp { reason } => {
                warn!(code = ?code, reason = %reason, "Registration failed");
                self.publish_registration(status);
            }
        }
    }

    async fn retry_registration(&mut self, handle: RegistrationHandle) {
        let current = self.signaling.account().map(|a| (a.handle, a.state));
        if current != Some((handle, RegistrationState::Progress)) {
            debug!(handle = %handle, "Stale registration retry dropped");
            return;
        }
        if let Err(e) = self.signaling.retry_registration().await {
            error!(error = %e, "Registration retry could not be sent");
            let status = RegistrationStatus {
                state: RegistrationState::Failed,
                code: None,
                reason: Some(e.to_string()),
            };
            self.signaling.set_account_state(RegistrationState::Failed);
            self.publish_registration(status);
        }
    }

    fn publish_registration(&mut self, status: RegistrationStatus) {
        self.registry.set_registration_state(status.state);
        self.registration_tx.send_replace(status.clone());
        self.events.emit(MobileEvent::RegistrationChanged { status });
    }

    // ===== PUSH =====

    async fn on_push(&mut self, push: IncomingPush, reply: Reply<MobileResult<PushOutcome>>) {
        let provider = self.coordinator.call_ui();
        let result = on_incoming_push(&mut self.registry, provider.as_ref(), &self.events, &push).await;
        let reported = matches!(result, Ok(PushOutcome::Reported(_)));
        if let Err(e) = &result {
            self.report_failure("incoming_push", None, e);
        }
        // the host UI has the call; now get signaling moving
        let _ = reply.send(result);

        if reported {
            self.schedule(self.config.pending_incoming_ttl, Internal::PurgePending);
            self.signaling.wake().await;
        }
    }

    /// Purge expired pending records and clear them from the host UI
    async fn flush_expired(&mut self) {
        self.registry.purge_expired();
        let expired = self.registry.take_expired();
        if expired.is_empty() {
            return;
        }

        let provider = self.coordinator.call_ui();
        for record in expired {
            if let (Some(provider), false) = (&provider, record.declined) {
                provider
                    .report_ended(record.provisional_id.as_uuid(), EndReason::Unanswered)
                    .await;
            }
            self.events.emit(MobileEvent::PushExpired {
                provisional_id: record.provisional_id,
            });
        }
    }

    // ===== LIFECYCLE =====

    fn update_iterate_mode(&mut self) {
        let mode = IterateMode::select(
            self.app_state,
            self.registry.live_count(),
            self.registry.has_pending(),
            self.config.pause_iterate_in_background,
        );
        self.iterate_tx.send_if_modified(|current| {
            if *current == IterateMode::Stopped || *current == mode {
                return false;
            }
            debug!(from = ?current, to = ?mode, "Iterate mode changed");
            *current = mode;
            true
        });
    }

    fn schedule(&self, delay: Duration, message: Internal) {
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal.send(message);
        });
    }

    async fn shutdown(&mut self) {
        info!(sessions = self.registry.len(), "Shutting down mobile core");
        self.commands.close();
        let mut ctx = call_context!(self);
        self.coordinator.teardown(&mut ctx, RemovalReason::Shutdown).await;
        self.signaling.shutdown().await;
        self.iterate_tx.send_replace(IterateMode::Stopped);
        self.publish_registration(RegistrationStatus::new(RegistrationState::Cleared));
    }
}
