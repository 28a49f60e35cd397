//! In-memory collaborators
//!
//! Scripted stand-ins for the SIP engine, the host call UI and the platform
//! audio session. They record every command they receive and emit the
//! callbacks a real implementation would, which makes them usable both in
//! tests and for host-side demos without a network.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rvoip_mobile_core::mock::{MockAudio, MockEngine, MockProvider};
//! use rvoip_mobile_core::{MobileClientBuilder, MobileConfig};
//!
//! # async fn example() -> rvoip_mobile_core::MobileResult<()> {
//! let engine = Arc::new(MockEngine::new());
//! let provider = Arc::new(MockProvider::new());
//! let client = MobileClientBuilder::new()
//!     .config(MobileConfig::default())
//!     .engine(engine.clone())
//!     .call_ui(provider.clone())
//!     .audio(Arc::new(MockAudio::new()))
//!     .build()
//!     .await?;
//! provider.attach(client.clone());
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::audio::{AudioError, AudioSession};
use crate::call::{CallDirection, CorrelationToken, ProviderCallId};
use crate::client::MobileClient;
use crate::error::MobileError;
use crate::provider::{CallUiProvider, EndReason, ProviderAction, ProviderError, ProviderRequest};
use crate::registration::Credentials;
use crate::signaling::{
    CallHandle, CallStateUpdate, EngineCallState, EngineError, EngineEvent, EngineEventSink,
    EngineRegistrationState, SignalingEngine,
};

// ===== ENGINE =====

/// How the mock registrar answers the next REGISTER
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationReply {
    Accept,
    Reject(u16),
    /// Transport timeout: failure without a response code
    NoResponse,
    /// Only report progress; the test completes it by hand
    Silent,
}

/// Commands the mock engine received, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    Register(String),
    Unregister,
    RefreshRegistration,
    Invite(String),
    Accept(CallHandle),
    Terminate(CallHandle),
    Pause(CallHandle),
    Resume(CallHandle),
    SetMuted(CallHandle, bool),
    Dtmf(CallHandle, char),
    Transfer(CallHandle, String),
    SetAudioActive(bool),
}

#[derive(Debug, Clone)]
struct MockCall {
    remote_address: String,
    direction: CallDirection,
    token: Option<CorrelationToken>,
    state: EngineCallState,
}

#[derive(Debug, Default)]
struct EngineState {
    sink: Option<EngineEventSink>,
    started: bool,
    registered: bool,
    next_handle: u64,
    calls: HashMap<CallHandle, MockCall>,
    replies: VecDeque<RegistrationReply>,
    commands: Vec<EngineCommand>,
    last_outgoing: Option<CallHandle>,
    failing: HashSet<&'static str>,
    register_count: usize,
}

impl EngineState {
    fn check(&self, operation: &'static str) -> Result<(), EngineError> {
        if !self.started && operation != "start" {
            return Err(EngineError::NotStarted);
        }
        if self.failing.contains(operation) {
            return Err(EngineError::Failed {
                operation: operation.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        Ok(())
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(sink) = &self.sink {
            sink.send(event);
        }
    }

    fn emit_call(&mut self, handle: CallHandle, state: EngineCallState) {
        self.emit_call_with(handle, state, None);
    }

    fn emit_call_with(&mut self, handle: CallHandle, state: EngineCallState, message: Option<&str>) {
        let Some(call) = self.calls.get_mut(&handle) else {
            return;
        };
        call.state = state;
        let update = CallStateUpdate {
            handle,
            state,
            remote_address: call.remote_address.clone(),
            direction: call.direction,
            correlation_token: call.token.clone(),
            message: message.map(str::to_string),
        };
        if matches!(state, EngineCallState::Released | EngineCallState::Error) {
            self.calls.remove(&handle);
        }
        self.emit(EngineEvent::CallState(update));
    }

    fn emit_registration(&self, state: EngineRegistrationState, code: Option<u16>, reason: &str) {
        self.emit(EngineEvent::Registration {
            state,
            code,
            reason: Some(reason.to_string()),
        });
    }

    fn new_call(&mut self, remote_address: &str, direction: CallDirection, token: Option<CorrelationToken>) -> CallHandle {
        self.next_handle += 1;
        let handle = CallHandle(self.next_handle);
        self.calls.insert(
            handle,
            MockCall {
                remote_address: remote_address.to_string(),
                direction,
                token,
                state: EngineCallState::Idle,
            },
        );
        handle
    }

    fn known(&self, handle: CallHandle) -> Result<(), EngineError> {
        if self.calls.contains_key(&handle) {
            Ok(())
        } else {
            Err(EngineError::UnknownCall(handle))
        }
    }
}

/// Scripted SIP engine
#[derive(Debug, Default)]
pub struct MockEngine {
    state: Mutex<EngineState>,
    iterations: AtomicUsize,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue registrar answers; unscripted REGISTERs are accepted
    pub fn script_registration(&self, replies: impl IntoIterator<Item = RegistrationReply>) {
        self.state.lock().replies.extend(replies);
    }

    /// Make every call of `operation` fail until [`recover`](Self::recover)
    pub fn fail_operation(&self, operation: &'static str) {
        self.state.lock().failing.insert(operation);
    }

    pub fn recover(&self, operation: &'static str) {
        self.state.lock().failing.remove(operation);
    }

    /// Deliver a raw event as if the engine produced it
    pub fn emit(&self, event: EngineEvent) {
        self.state.lock().emit(event);
    }

    /// An INVITE arrives from `remote_address`
    pub fn incoming_call(&self, remote_address: &str, token: Option<&str>) -> CallHandle {
        let mut state = self.state.lock();
        let handle = state.new_call(remote_address, CallDirection::Incoming, token.map(CorrelationToken::new));
        state.emit_call(handle, EngineCallState::IncomingReceived);
        handle
    }

    /// The far end answers an outgoing call
    pub fn remote_answer(&self, handle: CallHandle) {
        let mut state = self.state.lock();
        state.emit_call(handle, EngineCallState::Connected);
        state.emit_call(handle, EngineCallState::StreamsRunning);
    }

    pub fn remote_hold(&self, handle: CallHandle) {
        self.state.lock().emit_call(handle, EngineCallState::PausedByRemote);
    }

    pub fn remote_hangup(&self, handle: CallHandle) {
        let mut state = self.state.lock();
        state.emit_call(handle, EngineCallState::End);
        state.emit_call(handle, EngineCallState::Released);
    }

    /// The caller cancels because another device answered the fork
    pub fn answered_elsewhere(&self, handle: CallHandle) {
        let mut state = self.state.lock();
        state.emit_call_with(handle, EngineCallState::End, Some("Call completed elsewhere"));
        state.emit_call(handle, EngineCallState::Released);
    }

    /// The call fails with an engine error
    pub fn fail_call(&self, handle: CallHandle) {
        self.state.lock().emit_call(handle, EngineCallState::Error);
    }

    pub fn commands(&self) -> Vec<EngineCommand> {
        self.state.lock().commands.clone()
    }

    pub fn register_count(&self) -> usize {
        self.state.lock().register_count
    }

    pub fn iterate_count(&self) -> usize {
        self.iterations.load(Ordering::SeqCst)
    }

    /// Handle of the most recent outgoing call
    pub fn last_outgoing(&self) -> Option<CallHandle> {
        self.state.lock().last_outgoing
    }

    pub fn call_state(&self, handle: CallHandle) -> Option<EngineCallState> {
        self.state.lock().calls.get(&handle).map(|c| c.state)
    }

    /// Digits sent so far, across all calls
    pub fn dtmf_sent(&self) -> String {
        self.state
            .lock()
            .commands
            .iter()
            .filter_map(|c| match c {
                EngineCommand::Dtmf(_, digit) => Some(*digit),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl SignalingEngine for MockEngine {
    fn attach(&self, sink: EngineEventSink) {
        self.state.lock().sink = Some(sink);
    }

    async fn start(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.check("start")?;
        state.started = true;
        Ok(())
    }

    async fn stop(&self) {
        let mut state = self.state.lock();
        state.started = false;
        state.registered = false;
        state.calls.clear();
    }

    async fn register(&self, credentials: &Credentials) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.check("register")?;
        state.register_count += 1;
        state.commands.push(EngineCommand::Register(credentials.identity()));

        let reply = state.replies.pop_front().unwrap_or(RegistrationReply::Accept);
        debug!(reply = ?reply, "Mock registrar answering");
        state.emit_registration(EngineRegistrationState::Progress, None, "Registration in progress");
        match reply {
            RegistrationReply::Accept => {
                state.registered = true;
                state.emit_registration(EngineRegistrationState::Ok, Some(200), "OK");
            }
            RegistrationReply::Reject(code) => {
                state.registered = false;
                let reason = match code {
                    401 => "Unauthorized",
                    403 => "Forbidden",
                    407 => "Proxy Authentication Required",
                    408 => "Request Timeout",
                    503 => "Service Unavailable",
                    _ => "Rejected",
                };
                state.emit_registration(EngineRegistrationState::Failed, Some(code), reason);
            }
            RegistrationReply::NoResponse => {
                state.registered = false;
                state.emit_registration(EngineRegistrationState::Failed, None, "No response");
            }
            RegistrationReply::Silent => {}
        }
        Ok(())
    }

    async fn unregister(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.check("unregister")?;
        state.commands.push(EngineCommand::Unregister);
        state.registered = false;
        state.emit_registration(EngineRegistrationState::Cleared, None, "Unregistered");
        Ok(())
    }

    async fn refresh_registration(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.check("refresh_registration")?;
        state.commands.push(EngineCommand::RefreshRegistration);
        if state.registered {
            state.emit_registration(EngineRegistrationState::Ok, Some(200), "OK");
        }
        Ok(())
    }

    async fn invite(&self, address: &str) -> Result<CallHandle, EngineError> {
        let mut state = self.state.lock();
        state.check("invite")?;
        state.commands.push(EngineCommand::Invite(address.to_string()));
        let handle = state.new_call(address, CallDirection::Outgoing, None);
        state.last_outgoing = Some(handle);
        state.emit_call(handle, EngineCallState::OutgoingInit);
        state.emit_call(handle, EngineCallState::OutgoingProgress);
        state.emit_call(handle, EngineCallState::OutgoingRinging);
        Ok(handle)
    }

    async fn accept(&self, handle: CallHandle) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.check("accept")?;
        state.known(handle)?;
        state.commands.push(EngineCommand::Accept(handle));
        state.emit_call(handle, EngineCallState::Connected);
        state.emit_call(handle, EngineCallState::StreamsRunning);
        Ok(())
    }

    async fn terminate(&self, handle: CallHandle) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.check("terminate")?;
        state.known(handle)?;
        state.commands.push(EngineCommand::Terminate(handle));
        state.emit_call(handle, EngineCallState::End);
        state.emit_call(handle, EngineCallState::Released);
        Ok(())
    }

    async fn pause(&self, handle: CallHandle) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.check("pause")?;
        state.known(handle)?;
        state.commands.push(EngineCommand::Pause(handle));
        state.emit_call(handle, EngineCallState::Pausing);
        state.emit_call(handle, EngineCallState::Paused);
        Ok(())
    }

    async fn resume(&self, handle: CallHandle) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.check("resume")?;
        state.known(handle)?;
        state.commands.push(EngineCommand::Resume(handle));
        state.emit_call(handle, EngineCallState::Resuming);
        state.emit_call(handle, EngineCallState::StreamsRunning);
        Ok(())
    }

    async fn set_microphone_muted(&self, handle: CallHandle, muted: bool) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.check("set_microphone_muted")?;
        state.known(handle)?;
        state.commands.push(EngineCommand::SetMuted(handle, muted));
        Ok(())
    }

    async fn send_dtmf(&self, handle: CallHandle, digit: char) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.check("send_dtmf")?;
        state.known(handle)?;
        state.commands.push(EngineCommand::Dtmf(handle, digit));
        Ok(())
    }

    async fn transfer(&self, handle: CallHandle, address: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.check("transfer")?;
        state.known(handle)?;
        state.commands.push(EngineCommand::Transfer(handle, address.to_string()));
        state.emit_call(handle, EngineCallState::Referred);
        state.emit_call(handle, EngineCallState::End);
        state.emit_call(handle, EngineCallState::Released);
        Ok(())
    }

    fn set_audio_active(&self, active: bool) {
        self.state.lock().commands.push(EngineCommand::SetAudioActive(active));
    }

    fn iterate(&self) {
        self.iterations.fetch_add(1, Ordering::SeqCst);
    }
}

// ===== CALL UI PROVIDER =====

/// What the core reported to the host UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderReport {
    Incoming { id: ProviderCallId, handle: String },
    OutgoingStarted(ProviderCallId),
    OutgoingConnected(ProviderCallId),
    Ended { id: ProviderCallId, reason: EndReason },
}

/// Host call UI double
///
/// Once [`attach`](Self::attach)ed to a client it plays the host's part of
/// each transaction: every accepted request comes back as the matching
/// [`ProviderAction`], followed by an audio activation where a real host
/// would hand one over.
#[derive(Debug, Default)]
pub struct MockProvider {
    reports: Mutex<Vec<ProviderReport>>,
    requests: Mutex<Vec<ProviderRequest>>,
    failed_actions: Mutex<Vec<(ProviderAction, MobileError)>>,
    fail_requests: AtomicBool,
    reject_incoming: AtomicBool,
    echo: Mutex<Option<mpsc::UnboundedSender<ProviderRequest>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every transaction request
    pub fn fail_requests(&self, fail: bool) {
        self.fail_requests.store(fail, Ordering::SeqCst);
    }

    /// Refuse to show incoming calls (blocked / do-not-disturb)
    pub fn reject_incoming(&self, reject: bool) {
        self.reject_incoming.store(reject, Ordering::SeqCst);
    }

    pub fn reports(&self) -> Vec<ProviderReport> {
        self.reports.lock().clone()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().clone()
    }

    pub fn ended(&self) -> Vec<(ProviderCallId, EndReason)> {
        self.reports
            .lock()
            .iter()
            .filter_map(|r| match r {
                ProviderReport::Ended { id, reason } => Some((*id, *reason)),
                _ => None,
            })
            .collect()
    }

    pub fn incoming_reports(&self) -> usize {
        self.reports
            .lock()
            .iter()
            .filter(|r| matches!(r, ProviderReport::Incoming { .. }))
            .count()
    }

    /// Actions the core declined
    pub fn failed_actions(&self) -> Vec<(ProviderAction, MobileError)> {
        self.failed_actions.lock().clone()
    }

    /// Start echoing accepted requests back into `client`
    pub fn attach(self: &Arc<Self>, client: MobileClient) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        *self.echo.lock() = Some(tx);
        let provider = Arc::clone(self);

        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                for action in Self::actions_for(request) {
                    if let Err(e) = client.provider_action(action.clone()).await {
                        debug!(action = action.name(), error = %e, "Mock call UI action failed");
                        provider.failed_actions.lock().push((action, e));
                    }
                }
            }
        });
    }

    fn actions_for(request: ProviderRequest) -> Vec<ProviderAction> {
        match request {
            ProviderRequest::StartCall { id, handle } => {
                vec![ProviderAction::StartCall { id, handle }, ProviderAction::AudioActivated]
            }
            ProviderRequest::Answer { id } => vec![ProviderAction::Answer { id }, ProviderAction::AudioActivated],
            ProviderRequest::End { id } => vec![ProviderAction::End { id }],
            ProviderRequest::SetHeld { id, on_hold } => vec![ProviderAction::SetHeld { id, on_hold }],
            ProviderRequest::SetMuted { id, muted } => vec![ProviderAction::SetMuted { id, muted }],
            ProviderRequest::PlayDigits { id, digits } => vec![ProviderAction::PlayDigits { id, digits }],
            ProviderRequest::Swap { hold, resume } => vec![
                ProviderAction::SetHeld { id: hold, on_hold: true },
                ProviderAction::SetHeld { id: resume, on_hold: false },
            ],
        }
    }
}

#[async_trait]
impl CallUiProvider for MockProvider {
    async fn report_incoming_call(
        &self,
        session_hint: ProviderCallId,
        handle: &str,
        _caller_name: Option<&str>,
    ) -> Result<(), ProviderError> {
        if self.reject_incoming.load(Ordering::SeqCst) {
            return Err(ProviderError::Blocked);
        }
        self.reports.lock().push(ProviderReport::Incoming {
            id: session_hint,
            handle: handle.to_string(),
        });
        Ok(())
    }

    async fn report_outgoing_started(&self, id: ProviderCallId) {
        self.reports.lock().push(ProviderReport::OutgoingStarted(id));
    }

    async fn report_outgoing_connected(&self, id: ProviderCallId) {
        self.reports.lock().push(ProviderReport::OutgoingConnected(id));
    }

    async fn report_ended(&self, id: ProviderCallId, reason: EndReason) {
        self.reports.lock().push(ProviderReport::Ended { id, reason });
    }

    async fn request(&self, request: ProviderRequest) -> Result<(), ProviderError> {
        self.requests.lock().push(request.clone());
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable);
        }
        if let Some(echo) = self.echo.lock().as_ref() {
            let _ = echo.send(request);
        }
        Ok(())
    }
}

// ===== AUDIO =====

/// Platform audio session double
#[derive(Debug, Default)]
pub struct MockAudio {
    configure_count: AtomicUsize,
    activations: Mutex<Vec<bool>>,
    fail_configuration: AtomicBool,
}

impl MockAudio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_configuration(&self, fail: bool) {
        self.fail_configuration.store(fail, Ordering::SeqCst);
    }

    pub fn configure_count(&self) -> usize {
        self.configure_count.load(Ordering::SeqCst)
    }

    /// Every `set_active` argument, in order
    pub fn active_calls(&self) -> Vec<bool> {
        self.activations.lock().clone()
    }
}

impl AudioSession for MockAudio {
    fn configure(&self) -> Result<(), AudioError> {
        if self.fail_configuration.load(Ordering::SeqCst) {
            return Err(AudioError::Configuration("category rejected".to_string()));
        }
        self.configure_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_active(&self, active: bool) -> Result<(), AudioError> {
        self.activations.lock().push(active);
        Ok(())
    }
}
