//! Boundary with the native call UI (CallKit / ConnectionService style hosts)
//!
//! Outbound, the core *reports* call lifecycle to the host through
//! [`CallUiProvider`] and *requests* transactions for user intents. Inbound,
//! the host forwards user actions as [`ProviderAction`] values through
//! [`MobileClient::provider_action`](crate::MobileClient::provider_action);
//! the returned result tells the host whether to fulfil or fail the action.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::call::ProviderCallId;

/// Why a call ended, as the host UI understands it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndReason {
    RemoteEnded,
    Failed,
    Unanswered,
    AnsweredElsewhere,
    DeclinedElsewhere,
}

/// Transaction requests for user intents originating in the app UI
///
/// A successful request is later echoed back as the matching
/// [`ProviderAction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderRequest {
    StartCall { id: ProviderCallId, handle: String },
    Answer { id: ProviderCallId },
    End { id: ProviderCallId },
    SetHeld { id: ProviderCallId, on_hold: bool },
    SetMuted { id: ProviderCallId, muted: bool },
    PlayDigits { id: ProviderCallId, digits: String },
    /// Hold one call and resume the other in a single transaction
    Swap { hold: ProviderCallId, resume: ProviderCallId },
}

/// User actions forwarded by the host call UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderAction {
    StartCall { id: ProviderCallId, handle: String },
    Answer { id: ProviderCallId },
    End { id: ProviderCallId },
    SetHeld { id: ProviderCallId, on_hold: bool },
    SetMuted { id: ProviderCallId, muted: bool },
    PlayDigits { id: ProviderCallId, digits: String },
    AudioActivated,
    AudioDeactivated,
    /// The host dropped all of its calls; tear everything down locally
    Reset,
}

impl ProviderAction {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderAction::StartCall { .. } => "start_call",
            ProviderAction::Answer { .. } => "answer",
            ProviderAction::End { .. } => "end",
            ProviderAction::SetHeld { .. } => "set_held",
            ProviderAction::SetMuted { .. } => "set_muted",
            ProviderAction::PlayDigits { .. } => "play_digits",
            ProviderAction::AudioActivated => "audio_activated",
            ProviderAction::AudioDeactivated => "audio_deactivated",
            ProviderAction::Reset => "reset",
        }
    }

    /// The host identifier this action targets
    pub fn call_id(&self) -> Option<ProviderCallId> {
        match self {
            ProviderAction::StartCall { id, .. }
            | ProviderAction::Answer { id }
            | ProviderAction::End { id }
            | ProviderAction::SetHeld { id, .. }
            | ProviderAction::SetMuted { id, .. }
            | ProviderAction::PlayDigits { id, .. } => Some(*id),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// No host integration (unsupported region, simulator, disabled by user)
    #[error("call UI provider unavailable")]
    Unavailable,

    /// Caller blocked or do-not-disturb
    #[error("call blocked by host")]
    Blocked,

    #[error("request rejected: {reason}")]
    Rejected { reason: String },
}

/// Outbound interface to the host call UI
#[async_trait]
pub trait CallUiProvider: Send + Sync {
    /// Show the system incoming-call screen
    async fn report_incoming_call(
        &self,
        session_hint: ProviderCallId,
        handle: &str,
        caller_name: Option<&str>,
    ) -> Result<(), ProviderError>;

    async fn report_outgoing_started(&self, id: ProviderCallId);

    async fn report_outgoing_connected(&self, id: ProviderCallId);

    async fn report_ended(&self, id: ProviderCallId, reason: EndReason);

    /// Ask the host to run a transaction for an app-originated intent
    async fn request(&self, request: ProviderRequest) -> Result<(), ProviderError>;
}
