//! Audio activation sequencing
//!
//! Audio hardware is driven by two independent triggers:
//!
//! - signaling-originated configuration when the user answers or dials in the
//!   foreground ([`AudioSequencer::configure`], [`AudioSequencer::activate`])
//! - host-UI activation callbacks on backgrounded / push paths
//!   ([`AudioSequencer::on_provider_activated`], [`AudioSequencer::on_provider_deactivated`])
//!
//! ```text
//!  Inactive ──configure──▶ Configuring ──activate──▶ Active
//!      ▲                                              │
//!      └──────────── release (no live sessions) ◀─────┘
//! ```
//!
//! Configuration is idempotent. Teardown only happens once no live session
//! remains, so ending one call while another is held never silences the call
//! still in progress.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{MobileError, MobileResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioState {
    Inactive,
    Configuring,
    Active,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("audio configuration failed: {0}")]
    Configuration(String),

    #[error("audio activation failed: {0}")]
    Activation(String),
}

impl From<AudioError> for MobileError {
    fn from(e: AudioError) -> Self {
        MobileError::AudioFailed {
            reason: e.to_string(),
        }
    }
}

/// Platform audio session (category, routing, activation)
pub trait AudioSession: Send + Sync {
    fn configure(&self) -> Result<(), AudioError>;

    fn set_active(&self, active: bool) -> Result<(), AudioError>;
}

/// Edge the caller must forward to the signaling engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioTransition {
    Activated,
    Deactivated,
}

pub struct AudioSequencer {
    session: Arc<dyn AudioSession>,
    state: AudioState,
}

impl std::fmt::Debug for AudioSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSequencer")
            .field("state", &self.state)
            .finish()
    }
}

impl AudioSequencer {
    pub fn new(session: Arc<dyn AudioSession>) -> Self {
        Self {
            session,
            state: AudioState::Inactive,
        }
    }

    pub fn state(&self) -> AudioState {
        self.state
    }

    /// Prepare the audio session; safe to call any number of times
    pub fn configure(&mut self) -> MobileResult<()> {
        if self.state != AudioState::Inactive {
            debug!(state = ?self.state, "Audio already configured");
            return Ok(());
        }
        self.session.configure()?;
        self.state = AudioState::Configuring;
        debug!("Audio session configured");
        Ok(())
    }

    /// Configure and activate in one go (foreground path, no host UI)
    pub fn activate(&mut self) -> MobileResult<Option<AudioTransition>> {
        self.configure()?;
        if self.state == AudioState::Active {
            return Ok(None);
        }
        self.session.set_active(true)?;
        self.state = AudioState::Active;
        info!("Audio session activated");
        Ok(Some(AudioTransition::Activated))
    }

    /// The host UI handed us an activated audio session
    pub fn on_provider_activated(&mut self) -> MobileResult<Option<AudioTransition>> {
        debug!("Host UI activated audio");
        self.activate()
    }

    /// The host UI took the audio session away
    pub fn on_provider_deactivated(&mut self, live_sessions: usize) -> MobileResult<Option<AudioTransition>> {
        if live_sessions > 0 {
            warn!(live_sessions, "Host UI deactivated audio while calls remain, keeping audio state");
            return Ok(None);
        }
        self.teardown()
    }

    /// Tear audio down once no live session remains
    pub fn release_if_idle(&mut self, live_sessions: usize) -> MobileResult<Option<AudioTransition>> {
        if live_sessions > 0 {
            debug!(live_sessions, "Calls remain, audio stays up");
            return Ok(None);
        }
        self.teardown()
    }

    /// Unconditional teardown, used on host-UI reset and shutdown
    pub fn reset(&mut self) -> Option<AudioTransition> {
        match self.teardown() {
            Ok(transition) => transition,
            Err(e) => {
                warn!(error = %e, "Audio teardown failed during reset");
                self.state = AudioState::Inactive;
                Some(AudioTransition::Deactivated)
            }
        }
    }

    fn teardown(&mut self) -> MobileResult<Option<AudioTransition>> {
        match self.state {
            AudioState::Inactive => Ok(None),
            AudioState::Configuring => {
                self.state = AudioState::Inactive;
                debug!("Audio configuration discarded");
                Ok(None)
            }
            AudioState::Active => {
                self.session.set_active(false)?;
                self.state = AudioState::Inactive;
                info!("Audio session deactivated");
                Ok(Some(AudioTransition::Deactivated))
            }
        }
    }
}
