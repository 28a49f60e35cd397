//! Call Action Coordinator
//!
//! Turns intents from the app and actions from the host call UI into
//! validated signaling commands, and reconciles signaling callbacks back
//! into the registry.
//!
//! Every entry point runs on the core actor with exclusive access to a
//! [`CallContext`]. Anything that would block (waiting for registration,
//! waiting for a push-announced call to reach signaling) is returned as a
//! [`Step`] so the actor can suspend the action without holding up other
//! work.
//!
//! # Native call UI routing
//!
//! With a [`CallUiProvider`] attached and `use_native_call_ui` enabled, app
//! intents become provider transaction requests; the host echoes them back as
//! [`ProviderAction`]s, which perform the work. A refused request falls back
//! to issuing the same operation directly against signaling.

pub mod resolve;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::audio::{AudioSequencer, AudioTransition};
use crate::call::{CallDirection, CallSession, CallState, ProviderCallId, SessionId};
use crate::error::{MobileError, MobileResult};
use crate::events::{EventEmitter, MobileEvent, RemovalReason};
use crate::provider::{CallUiProvider, EndReason, ProviderAction, ProviderRequest};
use crate::recovery::log_step;
use crate::registration::RegistrationState;
use crate::registry::{Resolution, SessionRegistry};
use crate::signaling::{completed_elsewhere, is_dtmf_digit, validate_address, CallStateUpdate, SignalingAdapter};

pub use resolve::{resolve_target, ActionKind, ResolveHint, Step, Target};

/// Unwrap a resolved step or hand the suspension back to the actor
macro_rules! settle {
    ($step:expr) => {
        match $step {
            Step::Done(value) => value,
            Step::AwaitRegistration => return Ok(Step::AwaitRegistration),
            Step::AwaitSession(wait) => return Ok(Step::AwaitSession(wait)),
        }
    };
}

/// Something the app or the host UI wants done to a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Dial { address: String },
    Answer { id: ProviderCallId },
    Hangup { id: ProviderCallId },
    SetHold { id: ProviderCallId, on_hold: bool },
    Swap,
    SetMute { id: ProviderCallId, muted: bool },
    SendDtmf { id: ProviderCallId, digits: String },
    Transfer { id: ProviderCallId, address: String },
    /// A call-targeted action forwarded by the host UI
    Provider(ProviderAction),
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Intent::Dial { .. } => "dial",
            Intent::Answer { .. } => "answer",
            Intent::Hangup { .. } => "hangup",
            Intent::SetHold { .. } => "set_hold",
            Intent::Swap => "swap",
            Intent::SetMute { .. } => "set_mute",
            Intent::SendDtmf { .. } => "send_dtmf",
            Intent::Transfer { .. } => "transfer",
            Intent::Provider(action) => action.name(),
        }
    }

    pub fn target_id(&self) -> Option<ProviderCallId> {
        match self {
            Intent::Answer { id }
            | Intent::Hangup { id }
            | Intent::SetHold { id, .. }
            | Intent::SetMute { id, .. }
            | Intent::SendDtmf { id, .. }
            | Intent::Transfer { id, .. } => Some(*id),
            Intent::Provider(action) => action.call_id(),
            Intent::Dial { .. } | Intent::Swap => None,
        }
    }
}

/// Exclusive view of the core state for one coordinator call
pub struct CallContext<'a> {
    pub registry: &'a mut SessionRegistry,
    pub signaling: &'a mut SignalingAdapter,
    pub audio: &'a mut AudioSequencer,
    pub events: &'a EventEmitter,
}

pub struct CallActionCoordinator {
    provider: Option<Arc<dyn CallUiProvider>>,
    use_native_ui: bool,
    audio_permission: bool,
    /// Sessions the host UI ended itself; no end report goes back
    ended_by_provider: HashSet<SessionId>,
    /// Sessions hung up from the app while bypassing the host UI
    ended_locally: HashSet<SessionId>,
}

impl std::fmt::Debug for CallActionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallActionCoordinator")
            .field("has_provider", &self.provider.is_some())
            .field("use_native_ui", &self.use_native_ui)
            .field("audio_permission", &self.audio_permission)
            .finish()
    }
}

impl CallActionCoordinator {
    pub fn new(provider: Option<Arc<dyn CallUiProvider>>, use_native_ui: bool) -> Self {
        Self {
            provider,
            use_native_ui,
            audio_permission: false,
            ended_by_provider: HashSet::new(),
            ended_locally: HashSet::new(),
        }
    }

    pub fn set_audio_permission(&mut self, granted: bool) {
        info!(granted, "Microphone permission updated");
        self.audio_permission = granted;
    }

    pub fn audio_permission(&self) -> bool {
        self.audio_permission
    }

    /// The host call UI, when intents should be routed through it
    pub fn call_ui(&self) -> Option<Arc<dyn CallUiProvider>> {
        if self.use_native_ui {
            self.provider.clone()
        } else {
            None
        }
    }

    fn require_permission(&self, operation: &str) -> MobileResult<()> {
        if self.audio_permission {
            Ok(())
        } else {
            Err(MobileError::permission_denied(operation))
        }
    }

    fn registration_gate<T>(ctx: &CallContext<'_>, hint: ResolveHint) -> MobileResult<Option<Step<T>>> {
        match ctx.registry.registration_state() {
            RegistrationState::Registered => Ok(None),
            RegistrationState::Progress if hint != ResolveHint::RegistrationWaited => {
                debug!("Registration in progress, deferring dial");
                Ok(Some(Step::AwaitRegistration))
            }
            _ => Err(MobileError::NotRegistered),
        }
    }

    fn session_target(target: Target) -> MobileResult<SessionId> {
        match target {
            Target::Session(session_id) => Ok(session_id),
            Target::PendingOnly(provisional_id) => Err(MobileError::session_not_found(provisional_id)),
        }
    }

    // ===== INTENTS =====

    pub async fn handle_intent(
        &mut self,
        ctx: &mut CallContext<'_>,
        intent: &Intent,
        hint: ResolveHint,
    ) -> MobileResult<Step<SessionId>> {
        match intent {
            Intent::Dial { address } => self.dial(ctx, address, hint).await,
            Intent::Answer { id } => self.answer(ctx, *id, hint).await,
            Intent::Hangup { id } => self.hangup(ctx, *id, hint).await,
            Intent::SetHold { id, on_hold } => self.set_hold(ctx, *id, *on_hold, hint).await,
            Intent::Swap => self.swap(ctx).await.map(Step::Done),
            Intent::SetMute { id, muted } => self.set_mute(ctx, *id, *muted, hint).await,
            Intent::SendDtmf { id, digits } => {
                let target = settle!(resolve_target(ctx.registry, *id, ActionKind::Digits, hint)?);
                let session_id = Self::session_target(target)?;
                self.play_digits(ctx, session_id, digits).await?;
                Ok(Step::Done(session_id))
            }
            Intent::Transfer { id, address } => {
                let target = settle!(resolve_target(ctx.registry, *id, ActionKind::Transfer, hint)?);
                let session_id = Self::session_target(target)?;
                self.transfer_session(ctx, session_id, address).await?;
                Ok(Step::Done(session_id))
            }
            Intent::Provider(action) => self.handle_provider_action(ctx, action, hint).await,
        }
    }

    async fn dial(&mut self, ctx: &mut CallContext<'_>, address: &str, hint: ResolveHint) -> MobileResult<Step<SessionId>> {
        self.require_permission("dial")?;
        if let Some(step) = Self::registration_gate(ctx, hint)? {
            return Ok(step);
        }
        let address = validate_address(address)?.to_string();
        let session_id = SessionId::new();

        if let Some(provider) = self.call_ui() {
            let request = ProviderRequest::StartCall {
                id: session_id.as_uuid(),
                handle: address.clone(),
            };
            match provider.request(request).await {
                Ok(()) => {
                    info!(session_id = %session_id, "Start call handed to call UI");
                    return Ok(Step::Done(session_id));
                }
                Err(e) => warn!(error = %e, "Call UI refused start call, dialing directly"),
            }
        }

        self.place_outgoing(ctx, session_id, &address).await.map(Step::Done)
    }

    async fn place_outgoing(
        &mut self,
        ctx: &mut CallContext<'_>,
        session_id: SessionId,
        address: &str,
    ) -> MobileResult<SessionId> {
        ctx.audio.configure()?;
        let session_id = ctx.signaling.place_call(address, Some(session_id)).await?;

        let session = CallSession::outgoing(session_id, address);
        if let Err(e) = ctx.registry.upsert(session.clone()) {
            ctx.signaling.release(&session_id);
            return Err(e);
        }
        ctx.events.emit(MobileEvent::SessionChanged {
            session,
            previous_state: None,
        });

        if let Some(provider) = self.call_ui() {
            provider
                .report_outgoing_started(ctx.registry.provider_id_for(&session_id))
                .await;
        }
        Ok(session_id)
    }

    async fn answer(&mut self, ctx: &mut CallContext<'_>, id: ProviderCallId, hint: ResolveHint) -> MobileResult<Step<SessionId>> {
        self.require_permission("answer")?;
        let target = settle!(resolve_target(ctx.registry, id, ActionKind::Answer, hint)?);
        let session_id = Self::session_target(target)?;

        if let Some(provider) = self.call_ui() {
            let provider_id = ctx.registry.provider_id_for(&session_id);
            match provider.request(ProviderRequest::Answer { id: provider_id }).await {
                Ok(()) => return Ok(Step::Done(session_id)),
                Err(e) => warn!(session_id = %session_id, error = %e, "Call UI refused answer, answering directly"),
            }
        }

        self.answer_session(ctx, session_id).await?;
        Ok(Step::Done(session_id))
    }

    /// Answer, holding whatever call is currently active first
    async fn answer_session(&mut self, ctx: &mut CallContext<'_>, session_id: SessionId) -> MobileResult<()> {
        let session = ctx
            .registry
            .get(&session_id)
            .ok_or_else(|| MobileError::session_not_found(session_id))?;
        match session.state {
            CallState::Incoming => {}
            CallState::Connected => {
                debug!(session_id = %session_id, "Call already answered");
                return Ok(());
            }
            state => {
                return Err(MobileError::InvalidCallState {
                    session_id: session_id.to_string(),
                    state: state.to_string(),
                })
            }
        }

        let active: Vec<SessionId> = ctx
            .registry
            .sessions_where(|s| s.session_id != session_id && s.state == CallState::Connected && !s.is_on_hold)
            .iter()
            .map(|s| s.session_id)
            .collect();
        for other in active {
            let result = self.hold_session(ctx, other, true).await;
            log_step("answer_while_holding", "hold_active", &result);
        }

        ctx.audio.configure()?;
        ctx.signaling.accept(&session_id).await?;
        info!(session_id = %session_id, "Call answered");
        Ok(())
    }

    async fn hangup(&mut self, ctx: &mut CallContext<'_>, id: ProviderCallId, hint: ResolveHint) -> MobileResult<Step<SessionId>> {
        let target = settle!(resolve_target(ctx.registry, id, ActionKind::End, hint)?);
        let (session_id, provider_id) = match target {
            Target::Session(session_id) => (session_id, ctx.registry.provider_id_for(&session_id)),
            Target::PendingOnly(provisional_id) => (provisional_id, provisional_id.as_uuid()),
        };

        if let Some(provider) = self.call_ui() {
            match provider.request(ProviderRequest::End { id: provider_id }).await {
                Ok(()) => return Ok(Step::Done(session_id)),
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Call UI refused end, hanging up directly");
                    if let Target::PendingOnly(_) = target {
                        // nothing in signaling will ever clear this call from the host
                        provider.report_ended(provider_id, EndReason::DeclinedElsewhere).await;
                    }
                }
            }
        }

        self.end_target(ctx, target, false).await.map(Step::Done)
    }

    async fn end_target(&mut self, ctx: &mut CallContext<'_>, target: Target, by_provider: bool) -> MobileResult<SessionId> {
        match target {
            Target::PendingOnly(provisional_id) => {
                ctx.registry.decline_pending(&provisional_id);
                Ok(provisional_id)
            }
            Target::Session(session_id) => {
                if by_provider {
                    self.ended_by_provider.insert(session_id);
                } else {
                    self.ended_locally.insert(session_id);
                }
                if let Err(e) = ctx.signaling.terminate(&session_id).await {
                    self.ended_by_provider.remove(&session_id);
                    self.ended_locally.remove(&session_id);
                    return Err(e);
                }
                Ok(session_id)
            }
        }
    }

    async fn set_hold(
        &mut self,
        ctx: &mut CallContext<'_>,
        id: ProviderCallId,
        on_hold: bool,
        hint: ResolveHint,
    ) -> MobileResult<Step<SessionId>> {
        let kind = if on_hold { ActionKind::Hold } else { ActionKind::Resume };
        let target = settle!(resolve_target(ctx.registry, id, kind, hint)?);
        let session_id = Self::session_target(target)?;

        if let Some(provider) = self.call_ui() {
            let provider_id = ctx.registry.provider_id_for(&session_id);
            match provider.request(ProviderRequest::SetHeld { id: provider_id, on_hold }).await {
                Ok(()) => return Ok(Step::Done(session_id)),
                Err(e) => warn!(session_id = %session_id, error = %e, "Call UI refused hold change, applying directly"),
            }
        }

        self.hold_session(ctx, session_id, on_hold).await?;
        Ok(Step::Done(session_id))
    }

    /// Hold or resume one session
    ///
    /// The local flag moves first so derived queries see the request in
    /// flight; it is reverted if signaling refuses.
    async fn hold_session(&mut self, ctx: &mut CallContext<'_>, session_id: SessionId, on_hold: bool) -> MobileResult<()> {
        let session = ctx
            .registry
            .get(&session_id)
            .ok_or_else(|| MobileError::session_not_found(session_id))?;
        if !matches!(
            session.state,
            CallState::Connected | CallState::Paused | CallState::PausedByRemote
        ) {
            return Err(MobileError::InvalidCallState {
                session_id: session_id.to_string(),
                state: session.state.to_string(),
            });
        }

        let held_by_us = session.is_on_hold || session.state == CallState::Paused;
        if held_by_us == on_hold {
            debug!(session_id = %session_id, on_hold, "Hold state already requested");
            return Ok(());
        }

        Self::set_hold_flag(ctx, session_id, on_hold);
        if let Err(e) = ctx.signaling.set_hold(&session_id, on_hold).await {
            Self::set_hold_flag(ctx, session_id, !on_hold);
            return Err(e);
        }
        Ok(())
    }

    fn set_hold_flag(ctx: &mut CallContext<'_>, session_id: SessionId, on_hold: bool) {
        if let Ok(session) = ctx.registry.update(&session_id, |s| {
            s.is_on_hold = on_hold;
            s.clone()
        }) {
            ctx.events.emit(MobileEvent::SessionChanged {
                session,
                previous_state: None,
            });
        }
    }

    /// Hold the active call and resume the held one
    ///
    /// Returns the session that ends up active.
    async fn swap(&mut self, ctx: &mut CallContext<'_>) -> MobileResult<SessionId> {
        let active = ctx
            .registry
            .current_session()
            .filter(|s| s.state == CallState::Connected && !s.is_on_hold)
            .map(|s| s.session_id)
            .ok_or_else(|| MobileError::session_not_found("active call"))?;
        let held = ctx
            .registry
            .held_session()
            .map(|s| s.session_id)
            .filter(|held| *held != active)
            .ok_or_else(|| MobileError::session_not_found("held call"))?;

        if let Some(provider) = self.call_ui() {
            let request = ProviderRequest::Swap {
                hold: ctx.registry.provider_id_for(&active),
                resume: ctx.registry.provider_id_for(&held),
            };
            match provider.request(request).await {
                Ok(()) => return Ok(held),
                Err(e) => warn!(error = %e, "Call UI refused swap, swapping directly"),
            }
        }

        let hold = self.hold_session(ctx, active, true).await;
        log_step("swap", "hold_active", &hold);
        let resume = self.hold_session(ctx, held, false).await;
        log_step("swap", "resume_held", &resume);
        hold.and(resume)?;

        info!(active = %held, held = %active, "Calls swapped");
        Ok(held)
    }

    async fn set_mute(
        &mut self,
        ctx: &mut CallContext<'_>,
        id: ProviderCallId,
        muted: bool,
        hint: ResolveHint,
    ) -> MobileResult<Step<SessionId>> {
        let target = settle!(resolve_target(ctx.registry, id, ActionKind::Mute, hint)?);
        let session_id = Self::session_target(target)?;

        if let Some(provider) = self.call_ui() {
            let provider_id = ctx.registry.provider_id_for(&session_id);
            match provider.request(ProviderRequest::SetMuted { id: provider_id, muted }).await {
                Ok(()) => return Ok(Step::Done(session_id)),
                Err(e) => warn!(session_id = %session_id, error = %e, "Call UI refused mute change, applying directly"),
            }
        }

        self.mute_session(ctx, session_id, muted).await?;
        Ok(Step::Done(session_id))
    }

    async fn mute_session(&mut self, ctx: &mut CallContext<'_>, session_id: SessionId, muted: bool) -> MobileResult<()> {
        let session = ctx
            .registry
            .get(&session_id)
            .ok_or_else(|| MobileError::session_not_found(session_id))?;
        if session.is_muted == muted {
            return Ok(());
        }

        ctx.signaling.set_mute(&session_id, muted).await?;
        let session = ctx.registry.update(&session_id, |s| {
            s.is_muted = muted;
            s.clone()
        })?;
        ctx.events.emit(MobileEvent::SessionChanged {
            session,
            previous_state: None,
        });
        Ok(())
    }

    async fn play_digits(&mut self, ctx: &mut CallContext<'_>, session_id: SessionId, digits: &str) -> MobileResult<()> {
        if let Some(digit) = digits.chars().find(|c| !is_dtmf_digit(*c)) {
            return Err(MobileError::InvalidDigit { digit });
        }
        let state = ctx
            .registry
            .get(&session_id)
            .map(|s| s.state)
            .ok_or_else(|| MobileError::session_not_found(session_id))?;
        if state != CallState::Connected {
            return Err(MobileError::InvalidCallState {
                session_id: session_id.to_string(),
                state: state.to_string(),
            });
        }

        for digit in digits.chars() {
            ctx.signaling.send_digit(&session_id, digit).await?;
        }
        debug!(session_id = %session_id, count = digits.len(), "DTMF sent");
        Ok(())
    }

    async fn transfer_session(&mut self, ctx: &mut CallContext<'_>, session_id: SessionId, address: &str) -> MobileResult<()> {
        let state = ctx
            .registry
            .get(&session_id)
            .map(|s| s.state)
            .ok_or_else(|| MobileError::session_not_found(session_id))?;
        if !matches!(state, CallState::Connected | CallState::Paused) {
            return Err(MobileError::InvalidCallState {
                session_id: session_id.to_string(),
                state: state.to_string(),
            });
        }
        ctx.signaling.transfer(&session_id, address).await
    }

    // ===== HOST CALL UI =====

    /// Perform a call-targeted action the host UI asked for
    pub async fn handle_provider_action(
        &mut self,
        ctx: &mut CallContext<'_>,
        action: &ProviderAction,
        hint: ResolveHint,
    ) -> MobileResult<Step<SessionId>> {
        debug!(action = action.name(), call_id = ?action.call_id(), "Call UI action");
        match action {
            ProviderAction::StartCall { id, handle } => {
                let session_id = SessionId::from(*id);
                if ctx.registry.contains(&session_id) {
                    return Ok(Step::Done(session_id));
                }
                self.require_permission("start_call")?;
                if let Some(step) = Self::registration_gate(ctx, hint)? {
                    return Ok(step);
                }
                self.place_outgoing(ctx, session_id, handle).await.map(Step::Done)
            }
            ProviderAction::Answer { id } => {
                self.require_permission("answer")?;
                let target = settle!(resolve_target(ctx.registry, *id, ActionKind::Answer, hint)?);
                let session_id = Self::session_target(target)?;
                self.answer_session(ctx, session_id).await?;
                Ok(Step::Done(session_id))
            }
            ProviderAction::End { id } => {
                let target = settle!(resolve_target(ctx.registry, *id, ActionKind::End, hint)?);
                self.end_target(ctx, target, true).await.map(Step::Done)
            }
            ProviderAction::SetHeld { id, on_hold } => {
                let kind = if *on_hold { ActionKind::Hold } else { ActionKind::Resume };
                let target = settle!(resolve_target(ctx.registry, *id, kind, hint)?);
                let session_id = Self::session_target(target)?;
                self.hold_session(ctx, session_id, *on_hold).await?;
                Ok(Step::Done(session_id))
            }
            ProviderAction::SetMuted { id, muted } => {
                let target = settle!(resolve_target(ctx.registry, *id, ActionKind::Mute, hint)?);
                let session_id = Self::session_target(target)?;
                self.mute_session(ctx, session_id, *muted).await?;
                Ok(Step::Done(session_id))
            }
            ProviderAction::PlayDigits { id, digits } => {
                let target = settle!(resolve_target(ctx.registry, *id, ActionKind::Digits, hint)?);
                let session_id = Self::session_target(target)?;
                self.play_digits(ctx, session_id, digits).await?;
                Ok(Step::Done(session_id))
            }
            ProviderAction::AudioActivated | ProviderAction::AudioDeactivated | ProviderAction::Reset => {
                Err(MobileError::internal(format!("{} carries no call identifier", action.name())))
            }
        }
    }

    /// Audio callbacks and reset from the host UI
    pub async fn handle_provider_signal(&mut self, ctx: &mut CallContext<'_>, action: &ProviderAction) -> MobileResult<()> {
        match action {
            ProviderAction::AudioActivated => {
                let transition = ctx.audio.on_provider_activated();
                Self::forward_audio(ctx, transition)
            }
            ProviderAction::AudioDeactivated => {
                let live = ctx.registry.live_count();
                let transition = ctx.audio.on_provider_deactivated(live);
                Self::forward_audio(ctx, transition)
            }
            ProviderAction::Reset => {
                warn!("Call UI reset, tearing down every call");
                self.teardown(ctx, RemovalReason::ProviderReset).await;
                Ok(())
            }
            other => Err(MobileError::internal(format!(
                "{} must be dispatched as a call action",
                other.name()
            ))),
        }
    }

    /// Push an audio edge to the engine and the app
    fn forward_audio(ctx: &CallContext<'_>, transition: MobileResult<Option<AudioTransition>>) -> MobileResult<()> {
        match transition? {
            Some(AudioTransition::Activated) => ctx.signaling.set_audio_active(true),
            Some(AudioTransition::Deactivated) => ctx.signaling.set_audio_active(false),
            None => return Ok(()),
        }
        ctx.events.emit(MobileEvent::AudioStateChanged {
            state: ctx.audio.state(),
        });
        Ok(())
    }

    /// Terminate and forget every session
    ///
    /// On shutdown the host UI is told about each call; on a host reset it
    /// already knows.
    pub async fn teardown(&mut self, ctx: &mut CallContext<'_>, reason: RemovalReason) {
        let provider = match reason {
            RemovalReason::Shutdown => self.call_ui(),
            _ => None,
        };

        for session in ctx.registry.all() {
            if !session.is_live() {
                continue;
            }
            if let Err(e) = ctx.signaling.terminate(&session.session_id).await {
                warn!(session_id = %session.session_id, error = %e, "Terminate during teardown failed");
            }
            if let Some(provider) = &provider {
                let provider_id = ctx.registry.provider_id_for(&session.session_id);
                provider.report_ended(provider_id, EndReason::Failed).await;
            }
        }

        ctx.signaling.clear_calls();
        for session in ctx.registry.clear() {
            ctx.events.emit(MobileEvent::SessionRemoved {
                session_id: session.session_id,
                reason,
            });
        }
        self.ended_by_provider.clear();
        self.ended_locally.clear();

        let transition = ctx.audio.reset();
        if let Err(e) = Self::forward_audio(ctx, Ok(transition)) {
            warn!(error = %e, "Audio teardown failed");
        }
    }

    // ===== SIGNALING RECONCILIATION =====

    /// Fold one engine call-state callback into the registry
    pub async fn on_call_event(&mut self, ctx: &mut CallContext<'_>, update: CallStateUpdate) -> MobileResult<()> {
        let normalized = update.state.normalize();

        let session_id = match ctx.signaling.session_for_handle(&update.handle) {
            Some(session_id) => session_id,
            None => {
                let Some(state) = normalized else {
                    debug!(handle = %update.handle, state = ?update.state, "Transitional state for unknown call ignored");
                    return Ok(());
                };
                if state.is_terminal() {
                    debug!(handle = %update.handle, state = ?update.state, "Terminal state for unknown call ignored");
                    return Ok(());
                }

                let resolution = ctx.signaling.map_new_call(
                    update.handle,
                    update.correlation_token.as_ref(),
                    update.direction,
                    ctx.registry,
                )?;
                match resolution {
                    Resolution::TokenMatch(session_id) => session_id,
                    Resolution::Fresh(session_id) => {
                        return self.on_new_call(ctx, session_id, state, &update).await;
                    }
                    Resolution::AdoptedPending {
                        session_id, declined, ..
                    } => {
                        return self.on_adopted_call(ctx, session_id, state, &update, declined).await;
                    }
                }
            }
        };

        let Some(state) = normalized else {
            debug!(session_id = %session_id, state = ?update.state, "Transitional engine state");
            return Ok(());
        };
        self.apply_call_state(ctx, session_id, state, update.message.as_deref()).await
    }

    fn insert_session(
        ctx: &mut CallContext<'_>,
        session_id: SessionId,
        state: CallState,
        update: &CallStateUpdate,
    ) -> MobileResult<()> {
        let mut session = CallSession::new(session_id, update.remote_address.clone(), update.direction, CallState::Idle)
            .with_token(update.correlation_token.clone());
        session.apply_state(state);

        if let Err(e) = ctx.registry.upsert(session.clone()) {
            ctx.signaling.release(&session_id);
            return Err(e);
        }
        ctx.events.emit(MobileEvent::SessionChanged {
            session,
            previous_state: None,
        });
        Ok(())
    }

    async fn on_new_call(
        &mut self,
        ctx: &mut CallContext<'_>,
        session_id: SessionId,
        state: CallState,
        update: &CallStateUpdate,
    ) -> MobileResult<()> {
        Self::insert_session(ctx, session_id, state, update)?;
        info!(session_id = %session_id, direction = ?update.direction, remote = %update.remote_address, "New call");

        if update.direction != CallDirection::Incoming {
            return Ok(());
        }
        let Some(provider) = self.call_ui() else {
            return Ok(());
        };

        if let Err(e) = provider
            .report_incoming_call(session_id.as_uuid(), &update.remote_address, None)
            .await
        {
            warn!(session_id = %session_id, error = %e, "Call UI refused incoming call, rejecting it");
            // the host never showed it, so it is not told it ended either
            self.ended_by_provider.insert(session_id);
            if let Err(e) = ctx.signaling.terminate(&session_id).await {
                warn!(session_id = %session_id, error = %e, "Reject failed, dropping call locally");
                self.finish_session(ctx, session_id, CallState::Error, None).await;
            }
        }
        Ok(())
    }

    async fn on_adopted_call(
        &mut self,
        ctx: &mut CallContext<'_>,
        session_id: SessionId,
        state: CallState,
        update: &CallStateUpdate,
        declined: bool,
    ) -> MobileResult<()> {
        Self::insert_session(ctx, session_id, state, update)?;
        if !declined {
            return Ok(());
        }

        info!(session_id = %session_id, "Call was declined before it arrived, rejecting");
        self.ended_by_provider.insert(session_id);
        if let Err(e) = ctx.signaling.terminate(&session_id).await {
            warn!(session_id = %session_id, error = %e, "Reject failed, dropping call locally");
            self.finish_session(ctx, session_id, CallState::Ended, None).await;
        }
        Ok(())
    }

    async fn apply_call_state(
        &mut self,
        ctx: &mut CallContext<'_>,
        session_id: SessionId,
        state: CallState,
        message: Option<&str>,
    ) -> MobileResult<()> {
        let (previous, session) = match ctx.registry.update(&session_id, |s| (s.apply_state(state), s.clone())) {
            Ok(updated) => updated,
            Err(e) => {
                warn!(session_id = %session_id, "Engine reported state for a session that no longer exists");
                ctx.signaling.release(&session_id);
                return Err(e);
            }
        };
        let Some(previous) = previous else {
            return Ok(());
        };

        debug!(session_id = %session_id, from = %previous, to = %state, detail = ?message, "Call state changed");
        let direction = session.direction;
        ctx.events.emit(MobileEvent::SessionChanged {
            session,
            previous_state: Some(previous),
        });

        if state == CallState::Connected && previous.is_pre_answer() {
            match self.call_ui() {
                Some(provider) => {
                    if direction == CallDirection::Outgoing {
                        provider
                            .report_outgoing_connected(ctx.registry.provider_id_for(&session_id))
                            .await;
                    }
                }
                None => {
                    // no host UI will hand us an activated audio session
                    let transition = ctx.audio.activate();
                    if let Err(e) = Self::forward_audio(ctx, transition) {
                        error!(session_id = %session_id, error = %e, "Audio activation failed");
                    }
                }
            }
        }

        if state.is_terminal() {
            if state == CallState::Error {
                warn!(session_id = %session_id, detail = ?message, "Call failed");
            }
            self.finish_session(ctx, session_id, state, message).await;
        }
        Ok(())
    }

    /// Remove a finished session and release everything tied to it
    async fn finish_session(
        &mut self,
        ctx: &mut CallContext<'_>,
        session_id: SessionId,
        final_state: CallState,
        detail: Option<&str>,
    ) {
        let provider_id = ctx.registry.provider_id_for(&session_id);
        let Some(session) = ctx.registry.remove(&session_id) else {
            return;
        };
        ctx.signaling.release(&session_id);

        let by_provider = self.ended_by_provider.remove(&session_id);
        let by_app = self.ended_locally.remove(&session_id);
        let end_reason = if final_state == CallState::Error {
            EndReason::Failed
        } else if session.connect_time.is_none() && session.direction == CallDirection::Incoming {
            if detail.is_some_and(completed_elsewhere) {
                EndReason::AnsweredElsewhere
            } else {
                EndReason::Unanswered
            }
        } else {
            EndReason::RemoteEnded
        };

        if !by_provider {
            if let Some(provider) = self.call_ui() {
                provider.report_ended(provider_id, end_reason).await;
            }
        }

        let live = ctx.registry.live_count();
        let transition = ctx.audio.release_if_idle(live);
        if let Err(e) = Self::forward_audio(ctx, transition) {
            warn!(error = %e, "Audio release failed");
        }

        let reason = if by_provider || by_app {
            RemovalReason::HungUpLocally
        } else {
            RemovalReason::Ended(end_reason)
        };
        info!(session_id = %session_id, reason = ?reason, "Call removed");
        ctx.events.emit(MobileEvent::SessionRemoved { session_id, reason });
    }
}
