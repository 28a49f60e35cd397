//! Push Wake boundary
//!
//! A VoIP push wakes the process before signaling has necessarily seen the
//! INVITE. The push must be turned into a [`PendingIncoming`] record and
//! reported to the host call UI before the handler returns; the signaling
//! wake-up happens afterwards.
//!
//! [`PendingIncoming`]: crate::registry::PendingIncoming

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::call::{CorrelationToken, SessionId};
use crate::error::{MobileError, MobileResult};
use crate::events::{EventEmitter, MobileEvent};
use crate::provider::CallUiProvider;
use crate::registry::SessionRegistry;

/// Payload of an incoming-call push
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingPush {
    pub correlation_token: Option<CorrelationToken>,
    /// Dialable handle of the caller
    pub caller_handle: String,
    pub caller_name: Option<String>,
}

impl IncomingPush {
    pub fn new(caller_handle: impl Into<String>) -> Self {
        Self {
            correlation_token: None,
            caller_handle: caller_handle.into(),
            caller_name: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.correlation_token = Some(CorrelationToken::new(token));
        self
    }

    pub fn with_caller_name(mut self, name: impl Into<String>) -> Self {
        self.caller_name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// A new provisional call was reported
    Reported(SessionId),
    /// The push repeats a call we already know
    Duplicate(SessionId),
}

impl PushOutcome {
    pub fn session_id(&self) -> SessionId {
        match self {
            PushOutcome::Reported(id) | PushOutcome::Duplicate(id) => *id,
        }
    }
}

/// Register the pending record and report it to the host UI
///
/// If the host refuses the report the record is discarded again, so a call
/// the user never saw cannot be adopted later.
pub async fn on_incoming_push(
    registry: &mut SessionRegistry,
    provider: Option<&Arc<dyn CallUiProvider>>,
    events: &EventEmitter,
    push: &IncomingPush,
) -> MobileResult<PushOutcome> {
    if let Some(token) = &push.correlation_token {
        if let Some(existing) = registry.find_by_token(token) {
            debug!(session_id = %existing.session_id, token = %token, "Push for a call already in signaling");
            return Ok(PushOutcome::Duplicate(existing.session_id));
        }
        if let Some(pending) = registry.pending_by_token(token) {
            debug!(provisional_id = %pending.provisional_id, token = %token, "Duplicate push suppressed");
            return Ok(PushOutcome::Duplicate(pending.provisional_id));
        }
    }

    let provisional_id = registry.add_pending(push.correlation_token.clone(), push.caller_handle.clone());

    if let Some(provider) = provider {
        if let Err(e) = provider
            .report_incoming_call(
                provisional_id.as_uuid(),
                &push.caller_handle,
                push.caller_name.as_deref(),
            )
            .await
        {
            warn!(provisional_id = %provisional_id, error = %e, "Call UI refused pushed call");
            registry.discard_pending(&provisional_id);
            return Err(MobileError::provider_failed(e.to_string()));
        }
    }

    info!(provisional_id = %provisional_id, caller = %push.caller_handle, "Incoming push reported");
    events.emit(MobileEvent::IncomingPush {
        provisional_id,
        token: push.correlation_token.clone(),
    });
    Ok(PushOutcome::Reported(provisional_id))
}
