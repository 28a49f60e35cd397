//! Background pump for the signaling engine
//!
//! The engine does its work when `iterate()` is called. The pump is the only
//! task besides the core actor that touches the engine, and it never touches
//! call state: everything the engine decides comes back through the event
//! sink. Cadence follows [`IterateMode`], which the actor recomputes after
//! every message it handles.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::SignalingEngine;

/// Foreground / background lifecycle reported by the host app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppState {
    Foreground,
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterateMode {
    /// A call exists or a push is waiting for its INVITE
    Active,
    Idle,
    /// Backgrounded with nothing to do
    Paused,
    Stopped,
}

impl IterateMode {
    pub fn select(
        app_state: AppState,
        live_calls: usize,
        pending_pushes: bool,
        pause_in_background: bool,
    ) -> Self {
        if live_calls > 0 || pending_pushes {
            IterateMode::Active
        } else if app_state == AppState::Background && pause_in_background {
            IterateMode::Paused
        } else {
            IterateMode::Idle
        }
    }
}

/// Spawn the pump; it exits when the mode becomes `Stopped` or the sender is dropped
pub fn spawn_iterate_loop(
    engine: Arc<dyn SignalingEngine>,
    mut mode: watch::Receiver<IterateMode>,
    active_interval: Duration,
    idle_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("Signaling iterate loop started");
        loop {
            let current = *mode.borrow_and_update();
            let interval = match current {
                IterateMode::Stopped => break,
                IterateMode::Paused => {
                    trace!("Iterate loop paused");
                    if mode.changed().await.is_err() {
                        break;
                    }
                    continue;
                }
                IterateMode::Active => active_interval,
                IterateMode::Idle => idle_interval,
            };

            tokio::select! {
                _ = tokio::time::sleep(interval) => engine.iterate(),
                changed = mode.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("Signaling iterate loop stopped");
    })
}
