//! Builder for [`MobileClient`]
//!
//! The builder wires the collaborators together, starts the signaling
//! engine, and spawns the core actor and the engine pump.
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rvoip_mobile_core::mock::{MockAudio, MockEngine, MockProvider};
//! use rvoip_mobile_core::{MobileClientBuilder, MobileConfig};
//!
//! # tokio_test::block_on(async {
//! let provider = Arc::new(MockProvider::new());
//! let client = MobileClientBuilder::new()
//!     .config(MobileConfig::new().with_pending_incoming_ttl(Duration::from_secs(20)))
//!     .engine(Arc::new(MockEngine::new()))
//!     .call_ui(provider.clone())
//!     .audio(Arc::new(MockAudio::new()))
//!     .build()
//!     .await?;
//!
//! assert!(client.sessions().await?.is_empty());
//! client.shutdown().await?;
//! # Ok::<(), rvoip_mobile_core::MobileError>(())
//! # }).unwrap();
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::info;

use super::actor::CoreActor;
use super::MobileClient;
use crate::audio::{AudioSequencer, AudioSession};
use crate::config::MobileConfig;
use crate::coordinator::CallActionCoordinator;
use crate::error::{MobileError, MobileResult};
use crate::events::EventEmitter;
use crate::provider::CallUiProvider;
use crate::registration::RegistrationStatus;
use crate::signaling::{spawn_iterate_loop, AppState, EngineEventSink, IterateMode, SignalingAdapter, SignalingEngine};

/// Depth of the command queue in front of the actor
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Fluent builder for a [`MobileClient`]
///
/// An engine and an audio session are required. Without a call UI provider
/// every intent goes straight to signaling, as with `use_native_call_ui`
/// disabled.
#[derive(Default)]
pub struct MobileClientBuilder {
    config: MobileConfig,
    engine: Option<Arc<dyn SignalingEngine>>,
    call_ui: Option<Arc<dyn CallUiProvider>>,
    audio: Option<Arc<dyn AudioSession>>,
}

impl MobileClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: MobileConfig) -> Self {
        self.config = config;
        self
    }

    pub fn engine(mut self, engine: Arc<dyn SignalingEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Attach the host call UI (CallKit / ConnectionService bridge)
    pub fn call_ui(mut self, provider: Arc<dyn CallUiProvider>) -> Self {
        self.call_ui = Some(provider);
        self
    }

    pub fn audio(mut self, audio: Arc<dyn AudioSession>) -> Self {
        self.audio = Some(audio);
        self
    }

    /// Validate, start the engine and spawn the core
    pub async fn build(self) -> MobileResult<MobileClient> {
        self.config.validate()?;
        let engine = self.engine.ok_or_else(|| MobileError::InvalidConfiguration {
            field: "engine".to_string(),
            reason: "a signaling engine is required".to_string(),
        })?;
        let audio = self.audio.ok_or_else(|| MobileError::InvalidConfiguration {
            field: "audio".to_string(),
            reason: "an audio session is required".to_string(),
        })?;
        let config = self.config;

        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let mut signaling = SignalingAdapter::new(engine.clone());
        signaling.initialize(EngineEventSink::new(engine_tx)).await?;

        let events = EventEmitter::new(config.event_channel_capacity);
        let (registration_tx, registration_rx) = watch::channel(RegistrationStatus::default());
        let (iterate_tx, iterate_rx) = watch::channel(IterateMode::select(
            AppState::Foreground,
            0,
            false,
            config.pause_iterate_in_background,
        ));
        spawn_iterate_loop(
            engine,
            iterate_rx,
            config.active_iterate_interval,
            config.idle_iterate_interval,
        );

        let coordinator = CallActionCoordinator::new(self.call_ui, config.use_native_call_ui);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let client = MobileClient::new(command_tx, events.sender(), registration_rx, config.clone());

        let actor = CoreActor::new(
            config,
            signaling,
            AudioSequencer::new(audio),
            coordinator,
            events,
            registration_tx,
            iterate_tx,
            command_rx,
            engine_rx,
        );
        tokio::spawn(actor.run());

        info!("Mobile core started");
        Ok(client)
    }
}
