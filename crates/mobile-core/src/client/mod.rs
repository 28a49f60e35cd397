//! Mobile client handle
//!
//! [`MobileClient`] is a cheap, cloneable handle to the core actor. Every
//! method sends one command and awaits its reply, so calls from the app, the
//! host call UI delegate and the push handler are serialized against each
//! other and against engine callbacks.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rvoip_mobile_core::mock::{MockAudio, MockEngine};
//! use rvoip_mobile_core::{Credentials, MobileClientBuilder, MobileConfig};
//!
//! # async fn example() -> rvoip_mobile_core::MobileResult<()> {
//! let client = MobileClientBuilder::new()
//!     .config(MobileConfig::new().with_native_call_ui(false))
//!     .engine(Arc::new(MockEngine::new()))
//!     .audio(Arc::new(MockAudio::new()))
//!     .build()
//!     .await?;
//!
//! client.register(Credentials::new("alice", "secret", "example.com")).await?;
//! client.wait_registered(Duration::from_secs(5)).await?;
//!
//! client.set_audio_permission(true).await?;
//! let session_id = client.dial("sip:bob@example.com").await?;
//! client.hangup(session_id).await?;
//! # Ok(())
//! # }
//! ```

pub(crate) mod actor;
pub mod builder;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::debug;

use crate::audio::AudioState;
use crate::call::{CallSession, SessionId};
use crate::config::MobileConfig;
use crate::coordinator::Intent;
use crate::error::{MobileError, MobileResult};
use crate::events::MobileEvent;
use crate::provider::ProviderAction;
use crate::push::IncomingPush;
use crate::recovery::with_timeout;
use crate::registration::{Credentials, RegistrationHandle, RegistrationState, RegistrationStatus};
use crate::registry::WaitOutcome;
use crate::signaling::AppState;

use actor::Command;

pub use builder::MobileClientBuilder;

/// Cloneable handle to a running mobile core
#[derive(Debug, Clone)]
pub struct MobileClient {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<MobileEvent>,
    registration: watch::Receiver<RegistrationStatus>,
    config: Arc<MobileConfig>,
}

impl MobileClient {
    pub(crate) fn new(
        commands: mpsc::Sender<Command>,
        events: broadcast::Sender<MobileEvent>,
        registration: watch::Receiver<RegistrationStatus>,
        config: MobileConfig,
    ) -> Self {
        Self {
            commands,
            events,
            registration,
            config: Arc::new(config),
        }
    }

    /// Send a command and wait for its reply
    ///
    /// A closed channel on either side means the actor is gone.
    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> MobileResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| MobileError::NotInitialized)?;
        rx.await.map_err(|_| MobileError::NotInitialized)
    }

    async fn intent(&self, intent: Intent) -> MobileResult<SessionId> {
        self.request(|reply| Command::Intent { intent, reply }).await?
    }

    pub fn config(&self) -> &MobileConfig {
        &self.config
    }

    // ===== REGISTRATION =====

    /// Create the account and start registering
    ///
    /// Returns once the REGISTER was submitted; use
    /// [`wait_registered`](Self::wait_registered) or the event stream for the
    /// outcome. Transient failures are retried automatically.
    pub async fn register(&self, credentials: Credentials) -> MobileResult<RegistrationHandle> {
        self.request(|reply| Command::Register { credentials, reply }).await?
    }

    /// Log out and destroy the account
    pub async fn unregister(&self) -> MobileResult<()> {
        self.request(|reply| Command::Unregister { reply }).await?
    }

    /// Wait until registration settles
    ///
    /// Resolves with the status once registered, or with the failure once
    /// the retry policy gave up.
    pub async fn wait_registered(&self, timeout: Duration) -> MobileResult<RegistrationStatus> {
        let mut registration = self.registration.clone();
        let settled = with_timeout("wait_registered", timeout, async move {
            registration
                .wait_for(|s| {
                    matches!(
                        s.state,
                        RegistrationState::Registered | RegistrationState::Failed | RegistrationState::Cleared
                    )
                })
                .await
                .map(|status| (*status).clone())
                .map_err(|_| MobileError::NotInitialized)
        })
        .await?;

        match settled.state {
            RegistrationState::Registered => Ok(settled),
            RegistrationState::Failed => Err(MobileError::RegistrationFailed {
                code: settled.code,
                reason: settled.reason.unwrap_or_else(|| "registration failed".to_string()),
            }),
            _ => Err(MobileError::NotRegistered),
        }
    }

    pub fn registration_state(&self) -> RegistrationStatus {
        self.registration.borrow().clone()
    }

    // ===== CALL CONTROL =====

    /// Place an outgoing call
    ///
    /// With the native call UI enabled this starts a call transaction; the
    /// returned identifier is the one the host UI will use.
    pub async fn dial(&self, address: &str) -> MobileResult<SessionId> {
        self.intent(Intent::Dial {
            address: address.to_string(),
        })
        .await
    }

    pub async fn answer(&self, session_id: SessionId) -> MobileResult<SessionId> {
        self.intent(Intent::Answer {
            id: session_id.as_uuid(),
        })
        .await
    }

    pub async fn hangup(&self, session_id: SessionId) -> MobileResult<SessionId> {
        self.intent(Intent::Hangup {
            id: session_id.as_uuid(),
        })
        .await
    }

    pub async fn set_hold(&self, session_id: SessionId, on_hold: bool) -> MobileResult<SessionId> {
        self.intent(Intent::SetHold {
            id: session_id.as_uuid(),
            on_hold,
        })
        .await
    }

    /// Hold the active call and resume the held one
    ///
    /// Returns the session that is active afterwards.
    pub async fn swap(&self) -> MobileResult<SessionId> {
        self.intent(Intent::Swap).await
    }

    pub async fn set_mute(&self, session_id: SessionId, muted: bool) -> MobileResult<SessionId> {
        self.intent(Intent::SetMute {
            id: session_id.as_uuid(),
            muted,
        })
        .await
    }

    pub async fn send_dtmf(&self, session_id: SessionId, digits: &str) -> MobileResult<SessionId> {
        self.intent(Intent::SendDtmf {
            id: session_id.as_uuid(),
            digits: digits.to_string(),
        })
        .await
    }

    /// Blind transfer to `address`
    pub async fn transfer(&self, session_id: SessionId, address: &str) -> MobileResult<SessionId> {
        self.intent(Intent::Transfer {
            id: session_id.as_uuid(),
            address: address.to_string(),
        })
        .await
    }

    // ===== HOST CALL UI =====

    /// Deliver an action from the host call UI
    ///
    /// Call actions are resolved against the registry (waiting for a
    /// push-announced call if needed); audio callbacks and resets go straight
    /// to the coordinator.
    pub async fn provider_action(&self, action: ProviderAction) -> MobileResult<()> {
        debug!(action = action.name(), "Call UI action received");
        if action.call_id().is_some() {
            self.intent(Intent::Provider(action)).await.map(|_| ())
        } else {
            self.request(|reply| Command::ProviderSignal { action, reply }).await?
        }
    }

    /// Handle an incoming-call push
    ///
    /// Returns the provisional identifier once the host UI has the call,
    /// which is what the platform requires before the push handler returns.
    pub async fn on_incoming_push(&self, push: IncomingPush) -> MobileResult<SessionId> {
        self.request(|reply| Command::IncomingPush { push, reply })
            .await?
            .map(|outcome| outcome.session_id())
    }

    /// Wait for a push-announced call to reach signaling
    ///
    /// `Ok(None)` when the record expired, a different call arrived, or the
    /// wait was cancelled.
    pub async fn wait_for_session(&self, provisional_id: SessionId, timeout: Duration) -> MobileResult<Option<SessionId>> {
        let wait = self
            .request(|reply| Command::WaitForSession { provisional_id, reply })
            .await?;
        match wait.wait(timeout).await {
            WaitOutcome::Arrived(session_id) => Ok(Some(session_id)),
            WaitOutcome::TimedOut => Err(MobileError::timed_out("wait_for_session", timeout)),
            outcome => {
                debug!(provisional_id = %provisional_id, outcome = ?outcome, "Session did not arrive");
                Ok(None)
            }
        }
    }

    // ===== QUERIES =====

    pub async fn sessions(&self) -> MobileResult<Vec<CallSession>> {
        self.request(|reply| Command::Sessions { reply }).await
    }

    pub async fn session(&self, session_id: SessionId) -> MobileResult<Option<CallSession>> {
        self.request(|reply| Command::Session { session_id, reply }).await
    }

    /// The connected call not on hold, falling back to any live call
    pub async fn current_session(&self) -> MobileResult<Option<CallSession>> {
        self.request(|reply| Command::CurrentSession { reply }).await
    }

    pub async fn held_session(&self) -> MobileResult<Option<CallSession>> {
        self.request(|reply| Command::HeldSession { reply }).await
    }

    pub async fn audio_state(&self) -> MobileResult<AudioState> {
        self.request(|reply| Command::AudioState { reply }).await
    }

    // ===== SETTINGS & LIFECYCLE =====

    /// Record whether the user granted microphone access
    pub async fn set_audio_permission(&self, granted: bool) -> MobileResult<()> {
        self.request(|reply| Command::SetAudioPermission { granted, reply }).await
    }

    pub async fn set_app_state(&self, state: AppState) -> MobileResult<()> {
        self.request(|reply| Command::SetAppState { state, reply }).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MobileEvent> {
        self.events.subscribe()
    }

    /// Terminate every call and stop the core
    ///
    /// Every handle returns [`MobileError::NotInitialized`] afterwards.
    pub async fn shutdown(&self) -> MobileResult<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}
