//! Signaling Adapter
//!
//! Wraps an external SIP engine behind [`SignalingEngine`] and exposes
//! registration and call control in terms of [`SessionId`]s. The adapter
//! owns the [`RegistrationAccount`] and the engine-handle mapping; call state
//! itself lives in the [`SessionRegistry`].
//!
//! Engine callbacks may fire on any thread. They are pushed through an
//! [`EngineEventSink`] (an unbounded channel) and consumed by the core actor,
//! so nothing here is touched from more than one task.

pub mod handles;
pub mod iterate;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::call::{CallDirection, CallState, CorrelationToken, SessionId};
use crate::error::{MobileError, MobileResult};
use crate::registration::{
    Credentials, RegistrationAccount, RegistrationHandle, RegistrationState, RegistrationStatus,
};
use crate::registry::{Resolution, SessionRegistry};

pub use handles::HandleMap;
pub use iterate::{spawn_iterate_loop, AppState, IterateMode};

/// Engine-internal call handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallHandle(pub u64);

impl fmt::Display for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Call states as the engine reports them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineCallState {
    Idle,
    IncomingReceived,
    PushIncomingReceived,
    OutgoingInit,
    OutgoingProgress,
    OutgoingRinging,
    OutgoingEarlyMedia,
    IncomingEarlyMedia,
    Connected,
    StreamsRunning,
    Pausing,
    Paused,
    Resuming,
    PausedByRemote,
    UpdatedByRemote,
    Updating,
    Referred,
    Error,
    End,
    Released,
}

impl EngineCallState {
    /// Map onto the session state model
    ///
    /// Transitional states return `None`: the session keeps its current state.
    pub fn normalize(self) -> Option<CallState> {
        use EngineCallState::*;
        let state = match self {
            Idle => CallState::Idle,
            IncomingReceived | PushIncomingReceived | IncomingEarlyMedia => CallState::Incoming,
            OutgoingInit => CallState::OutgoingInit,
            OutgoingProgress => CallState::OutgoingProgress,
            OutgoingRinging | OutgoingEarlyMedia => CallState::OutgoingRinging,
            Connected | StreamsRunning => CallState::Connected,
            Paused => CallState::Paused,
            PausedByRemote => CallState::PausedByRemote,
            Error => CallState::Error,
            End | Released => CallState::Ended,
            Pausing | Resuming | Updating | UpdatedByRemote | Referred => return None,
        };
        Some(state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineRegistrationState {
    None,
    Progress,
    Ok,
    Cleared,
    Failed,
}

impl From<EngineRegistrationState> for RegistrationState {
    fn from(state: EngineRegistrationState) -> Self {
        match state {
            EngineRegistrationState::None => RegistrationState::None,
            EngineRegistrationState::Progress => RegistrationState::Progress,
            EngineRegistrationState::Ok => RegistrationState::Registered,
            EngineRegistrationState::Cleared => RegistrationState::Cleared,
            EngineRegistrationState::Failed => RegistrationState::Failed,
        }
    }
}

/// One engine call-state callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStateUpdate {
    pub handle: CallHandle,
    pub state: EngineCallState,
    pub remote_address: String,
    pub direction: CallDirection,
    pub correlation_token: Option<CorrelationToken>,
    /// Engine-provided detail (reason phrase, error text)
    pub message: Option<String>,
}

/// Callback payloads emitted by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    CallState(CallStateUpdate),
    Registration {
        state: EngineRegistrationState,
        /// Final SIP response code, `None` when no response was received
        code: Option<u16>,
        reason: Option<String>,
    },
}

/// Thread-safe handle the engine uses to report events
#[derive(Debug, Clone)]
pub struct EngineEventSink {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineEventSink {
    pub fn new(tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { tx }
    }

    /// Returns false once the core has shut down
    pub fn send(&self, event: EngineEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine not started")]
    NotStarted,

    #[error("unknown call handle {0}")]
    UnknownCall(CallHandle),

    #[error("{operation} failed: {reason}")]
    Failed { operation: String, reason: String },
}

impl EngineError {
    fn into_mobile(self, operation: &str) -> MobileError {
        match self {
            EngineError::NotStarted => MobileError::NotInitialized,
            other => MobileError::signaling_failed(operation, other.to_string()),
        }
    }
}

/// External SIP engine
///
/// Commands return once the engine accepted them; outcomes arrive later as
/// [`EngineEvent`]s on the attached sink.
#[async_trait]
pub trait SignalingEngine: Send + Sync {
    fn attach(&self, sink: EngineEventSink);

    async fn start(&self) -> Result<(), EngineError>;

    async fn stop(&self);

    async fn register(&self, credentials: &Credentials) -> Result<(), EngineError>;

    async fn unregister(&self) -> Result<(), EngineError>;

    /// Re-send REGISTER so a freshly woken process can receive the INVITE
    async fn refresh_registration(&self) -> Result<(), EngineError>;

    async fn invite(&self, address: &str) -> Result<CallHandle, EngineError>;

    async fn accept(&self, handle: CallHandle) -> Result<(), EngineError>;

    async fn terminate(&self, handle: CallHandle) -> Result<(), EngineError>;

    async fn pause(&self, handle: CallHandle) -> Result<(), EngineError>;

    async fn resume(&self, handle: CallHandle) -> Result<(), EngineError>;

    async fn set_microphone_muted(&self, handle: CallHandle, muted: bool) -> Result<(), EngineError>;

    async fn send_dtmf(&self, handle: CallHandle, digit: char) -> Result<(), EngineError>;

    async fn transfer(&self, handle: CallHandle, address: &str) -> Result<(), EngineError>;

    /// Tell the engine the platform audio session is (in)active
    fn set_audio_active(&self, active: bool);

    /// Process pending engine work; called by the iterate loop
    fn iterate(&self);
}

/// Check a dial target before handing it to the engine
///
/// Number formatting is left to the host; this only rejects what the engine
/// could never dial.
pub fn validate_address(address: &str) -> MobileResult<&str> {
    let trimmed = address.trim();
    if trimmed.is_empty() || trimmed.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(MobileError::invalid_address(address));
    }

    let lower = trimmed.to_ascii_lowercase();
    for scheme in ["sips:", "sip:", "tel:"] {
        if let Some(rest) = lower.strip_prefix(scheme) {
            let user_host_ok = match rest.split_once('@') {
                Some((user, host)) => !user.is_empty() && !host.is_empty(),
                None => !rest.is_empty(),
            };
            if !user_host_ok {
                return Err(MobileError::invalid_address(address));
            }
            return Ok(trimmed);
        }
    }

    if trimmed.starts_with('@') || trimmed.ends_with('@') {
        return Err(MobileError::invalid_address(address));
    }
    Ok(trimmed)
}

/// Whether `digit` is a DTMF event
pub fn is_dtmf_digit(digit: char) -> bool {
    matches!(digit, '0'..='9' | '*' | '#' | 'A'..='D')
}

/// Whether an end detail says another device picked the call up
///
/// Matches the SIP `Reason: SIP;cause=200;text="Call completed elsewhere"`
/// carried on a forked CANCEL.
pub fn completed_elsewhere(detail: &str) -> bool {
    let detail = detail.to_ascii_lowercase();
    detail.contains("completed elsewhere") || detail.contains("cause=200")
}

pub struct SignalingAdapter {
    engine: Arc<dyn SignalingEngine>,
    handles: HandleMap,
    account: Option<RegistrationAccount>,
    initialized: bool,
}

impl fmt::Debug for SignalingAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalingAdapter")
            .field("handles", &self.handles)
            .field("account", &self.account)
            .field("initialized", &self.initialized)
            .finish()
    }
}

impl SignalingAdapter {
    pub fn new(engine: Arc<dyn SignalingEngine>) -> Self {
        Self {
            engine,
            handles: HandleMap::new(),
            account: None,
            initialized: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub async fn initialize(&mut self, sink: EngineEventSink) -> MobileResult<()> {
        if self.initialized {
            return Ok(());
        }
        self.engine.attach(sink);
        self.engine.start().await.map_err(|e| e.into_mobile("start"))?;
        self.initialized = true;
        info!("Signaling engine started");
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        if !self.initialized {
            return;
        }
        self.engine.stop().await;
        self.handles.clear();
        self.account = None;
        self.initialized = false;
        info!("Signaling engine stopped");
    }

    fn ensure_initialized(&self) -> MobileResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(MobileError::NotInitialized)
        }
    }

    // ===== REGISTRATION =====

    /// Create the account and submit it to the registrar
    ///
    /// Replaces any existing account. The outcome arrives as a registration
    /// event.
    pub async fn register(&mut self, credentials: Credentials) -> MobileResult<RegistrationHandle> {
        self.ensure_initialized()?;
        if credentials.username.trim().is_empty() {
            return Err(MobileError::InvalidConfiguration {
                field: "username".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if credentials.domain.trim().is_empty() {
            return Err(MobileError::invalid_address(credentials.identity()));
        }

        let mut account = RegistrationAccount::new(credentials);
        account.state = RegistrationState::Progress;
        let handle = account.handle;

        info!(identity = %account.credentials.identity(), handle = %handle, "Registering account");
        self.engine
            .register(&account.credentials)
            .await
            .map_err(|e| e.into_mobile("register"))?;
        self.account = Some(account);
        Ok(handle)
    }

    /// Re-submit the current account after a transient failure
    pub async fn retry_registration(&mut self) -> MobileResult<u32> {
        self.ensure_initialized()?;
        let account = self.account.as_mut().ok_or(MobileError::NotRegistered)?;
        account.retries += 1;
        account.state = RegistrationState::Progress;
        let attempt = account.retries;

        info!(identity = %account.credentials.identity(), attempt, "Retrying registration");
        self.engine
            .register(&account.credentials)
            .await
            .map_err(|e| e.into_mobile("register"))?;
        Ok(attempt)
    }

    /// Unregister and destroy the account
    pub async fn unregister(&mut self) -> MobileResult<RegistrationStatus> {
        self.ensure_initialized()?;
        let account = self.account.take().ok_or(MobileError::NotRegistered)?;
        info!(identity = %account.credentials.identity(), "Unregistering account");
        if let Err(e) = self.engine.unregister().await {
            warn!(error = %e, "Engine unregister failed, account dropped anyway");
        }
        Ok(RegistrationStatus::new(RegistrationState::Cleared))
    }

    pub fn account(&self) -> Option<&RegistrationAccount> {
        self.account.as_ref()
    }

    pub fn registration_status(&self) -> RegistrationStatus {
        match &self.account {
            Some(account) => RegistrationStatus {
                state: account.state,
                code: account.last_code,
                reason: account.last_reason.clone(),
            },
            None => RegistrationStatus::new(RegistrationState::None),
        }
    }

    /// Fold an engine registration event into the account
    ///
    /// Returns `None` when there is no account to update (late events after
    /// logout).
    pub fn on_registration_event(
        &mut self,
        state: EngineRegistrationState,
        code: Option<u16>,
        reason: Option<String>,
    ) -> Option<RegistrationStatus> {
        let account = self.account.as_mut()?;
        account.state = state.into();
        account.last_code = code;
        account.last_reason = reason;
        if account.state == RegistrationState::Registered {
            account.retries = 0;
        }
        debug!(state = %account.state, code = ?code, "Registration state updated");
        Some(self.registration_status())
    }

    /// Overwrite the account state (retry bookkeeping)
    pub fn set_account_state(&mut self, state: RegistrationState) -> Option<RegistrationStatus> {
        let account = self.account.as_mut()?;
        account.state = state;
        Some(self.registration_status())
    }

    /// Nudge the engine after a push wake-up
    pub async fn wake(&self) {
        if !self.initialized || self.account.is_none() {
            debug!("Wake requested without an account, nothing to refresh");
            return;
        }
        if let Err(e) = self.engine.refresh_registration().await {
            warn!(error = %e, "Registration refresh after wake-up failed");
        }
    }

    // ===== CALL CONTROL =====

    /// Send an INVITE and bind the new handle to `session_id` (or a fresh one)
    pub async fn place_call(&mut self, address: &str, session_id: Option<SessionId>) -> MobileResult<SessionId> {
        self.ensure_initialized()?;
        let registered = self
            .account
            .as_ref()
            .map(|a| a.state.is_registered())
            .unwrap_or(false);
        if !registered {
            return Err(MobileError::NotRegistered);
        }
        let address = validate_address(address)?;
        let session_id = session_id.unwrap_or_default();

        let handle = self
            .engine
            .invite(address)
            .await
            .map_err(|e| e.into_mobile("invite"))?;
        self.handles.bind(handle, session_id)?;
        info!(session_id = %session_id, handle = %handle, "Outgoing call placed");
        Ok(session_id)
    }

    fn handle_for(&self, session_id: &SessionId) -> MobileResult<CallHandle> {
        self.ensure_initialized()?;
        self.handles
            .handle_for(session_id)
            .ok_or_else(|| MobileError::session_not_found(session_id))
    }

    pub async fn accept(&self, session_id: &SessionId) -> MobileResult<()> {
        let handle = self.handle_for(session_id)?;
        debug!(session_id = %session_id, handle = %handle, "Accepting call");
        self.engine.accept(handle).await.map_err(|e| e.into_mobile("accept"))
    }

    pub async fn terminate(&self, session_id: &SessionId) -> MobileResult<()> {
        let handle = self.handle_for(session_id)?;
        debug!(session_id = %session_id, handle = %handle, "Terminating call");
        self.engine
            .terminate(handle)
            .await
            .map_err(|e| e.into_mobile("terminate"))
    }

    pub async fn set_hold(&self, session_id: &SessionId, on_hold: bool) -> MobileResult<()> {
        let handle = self.handle_for(session_id)?;
        debug!(session_id = %session_id, on_hold, "Changing hold state");
        if on_hold {
            self.engine.pause(handle).await.map_err(|e| e.into_mobile("pause"))
        } else {
            self.engine.resume(handle).await.map_err(|e| e.into_mobile("resume"))
        }
    }

    pub async fn set_mute(&self, session_id: &SessionId, muted: bool) -> MobileResult<()> {
        let handle = self.handle_for(session_id)?;
        self.engine
            .set_microphone_muted(handle, muted)
            .await
            .map_err(|e| e.into_mobile("set_mute"))
    }

    pub async fn send_digit(&self, session_id: &SessionId, digit: char) -> MobileResult<()> {
        if !is_dtmf_digit(digit) {
            return Err(MobileError::InvalidDigit { digit });
        }
        let handle = self.handle_for(session_id)?;
        self.engine
            .send_dtmf(handle, digit)
            .await
            .map_err(|e| e.into_mobile("send_dtmf"))
    }

    pub async fn transfer(&self, session_id: &SessionId, address: &str) -> MobileResult<()> {
        let address = validate_address(address)?;
        let handle = self.handle_for(session_id)?;
        info!(session_id = %session_id, target = address, "Transferring call");
        self.engine
            .transfer(handle, address)
            .await
            .map_err(|e| e.into_mobile("transfer"))
    }

    pub fn set_audio_active(&self, active: bool) {
        if self.initialized {
            self.engine.set_audio_active(active);
        }
    }

    // ===== EVENT MAPPING =====

    pub fn session_for_handle(&self, handle: &CallHandle) -> Option<SessionId> {
        self.handles.session_for(handle)
    }

    /// Resolve the session for a handle the adapter has not seen before
    ///
    /// Runs the registry's resolution algorithm and binds the handle to the
    /// result. A token match may move an existing session onto this handle;
    /// without a token the handle always gets its own session.
    pub fn map_new_call(
        &mut self,
        handle: CallHandle,
        token: Option<&CorrelationToken>,
        direction: CallDirection,
        registry: &mut SessionRegistry,
    ) -> MobileResult<Resolution> {
        let resolution = registry.resolve_signaling_call(token, direction);
        self.handles.bind(handle, resolution.session_id())?;
        debug!(handle = %handle, resolution = ?resolution, "Mapped engine call");
        Ok(resolution)
    }

    /// Forget the handle of a finished session
    pub fn release(&mut self, session_id: &SessionId) -> Option<CallHandle> {
        self.handles.remove_session(session_id)
    }

    pub fn clear_calls(&mut self) {
        self.handles.clear();
    }
}
