//! # Mobile Core - Call Session Reconciliation for Mobile VoIP
//!
//! A mobile VoIP app hears about the same call from three places at once:
//!
//! - the **SIP engine** (INVITEs, state callbacks, registration)
//! - the **host call UI** (CallKit / ConnectionService answer, end, hold)
//! - **VoIP pushes** that wake the process before the INVITE arrives
//!
//! This crate folds all three into one authoritative session table with
//! stable [`SessionId`]s, resolves actions that address calls by identifiers
//! the registry has not seen yet, and sequences audio activation so it only
//! happens once the platform allows it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rvoip_mobile_core::mock::{MockAudio, MockEngine, MockProvider};
//! use rvoip_mobile_core::{Credentials, IncomingPush, MobileClientBuilder, MobileConfig, MobileEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = Arc::new(MockProvider::new());
//!     let client = MobileClientBuilder::new()
//!         .config(MobileConfig::default())
//!         .engine(Arc::new(MockEngine::new()))
//!         .call_ui(provider.clone())
//!         .audio(Arc::new(MockAudio::new()))
//!         .build()
//!         .await?;
//!     provider.attach(client.clone());
//!
//!     client.register(Credentials::new("alice", "secret", "example.com")).await?;
//!     client.wait_registered(Duration::from_secs(10)).await?;
//!
//!     // a push arrives before the INVITE
//!     let provisional = client
//!         .on_incoming_push(IncomingPush::new("+15550100").with_token("call-42"))
//!         .await?;
//!
//!     let mut events = client.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         if let MobileEvent::SessionChanged { session, .. } = event {
//!             println!("{} is now {}", session.session_id, session.state);
//!         }
//!     }
//!     # let _ = provisional;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!   MobileClient ──commands──▶ ┌──────────── core actor ────────────┐
//!   (app, call UI, push)       │ CallActionCoordinator               │
//!                              │   ├─ SessionRegistry                │
//!   SIP engine ───events────▶  │   ├─ SignalingAdapter ──▶ engine    │
//!                              │   └─ AudioSequencer ───▶ platform   │
//!                              └──────────────┬──────────────────────┘
//!                                             ▼ broadcast
//!                                        MobileEvent
//! ```
//!
//! All state is owned by a single tokio task. Waits (registration in
//! progress, a push-announced call that has not reached signaling) are
//! suspended in side tasks and resumed through the actor, so nothing blocks
//! the engine callbacks.

pub mod audio;
pub mod call;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod mock;
pub mod provider;
pub mod push;
pub mod recovery;
pub mod registration;
pub mod registry;
pub mod signaling;

pub use audio::{AudioError, AudioSession, AudioState};
pub use call::{CallDirection, CallSession, CallState, CorrelationToken, ProviderCallId, SessionId};
pub use client::{MobileClient, MobileClientBuilder};
pub use config::MobileConfig;
pub use error::{MobileError, MobileResult};
pub use events::{MobileEvent, RemovalReason};
pub use provider::{CallUiProvider, EndReason, ProviderAction, ProviderError, ProviderRequest};
pub use push::IncomingPush;
pub use recovery::RegistrationRetryPolicy;
pub use registration::{Credentials, RegistrationHandle, RegistrationState, RegistrationStatus};
pub use signaling::{
    AppState, CallHandle, CallStateUpdate, EngineCallState, EngineError, EngineEvent, EngineEventSink,
    EngineRegistrationState, SignalingEngine,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
