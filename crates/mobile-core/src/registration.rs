//! Registration account data for the signaling adapter
//!
//! A [`RegistrationAccount`] is created on login, walks through
//! [`RegistrationState`] as the engine reports progress, and is destroyed on
//! logout. It is owned by the [`SignalingAdapter`](crate::signaling::SignalingAdapter);
//! the session registry only mirrors its state to gate outgoing calls.
//!
//! # Examples
//!
//! ```rust
//! use rvoip_mobile_core::registration::{Credentials, RegistrationState};
//!
//! let creds = Credentials::new("alice", "secret123", "example.com")
//!     .with_display_name("Alice");
//! assert_eq!(creds.identity(), "sip:alice@example.com");
//! assert!(!format!("{:?}", creds).contains("secret123"));
//!
//! assert!(RegistrationState::Registered.is_registered());
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account credentials handed to the signaling engine
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// SIP domain / registrar host
    pub domain: String,
    pub display_name: Option<String>,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            domain: domain.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// Address of record for this account
    pub fn identity(&self) -> String {
        format!("sip:{}@{}", self.username, self.domain)
    }
}

// Never log the password.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("domain", &self.domain)
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// Registration lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationState {
    /// No account, or account not yet submitted
    None,
    /// REGISTER sent, waiting for the registrar
    Progress,
    Registered,
    /// Terminal until the user re-authenticates
    Failed,
    /// Unregistered on logout
    Cleared,
}

impl RegistrationState {
    pub fn is_registered(&self) -> bool {
        matches!(self, RegistrationState::Registered)
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Opaque handle returned by `register`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationHandle(pub Uuid);

impl fmt::Display for RegistrationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The single account the signaling adapter manages
#[derive(Debug, Clone)]
pub struct RegistrationAccount {
    pub handle: RegistrationHandle,
    pub credentials: Credentials,
    pub state: RegistrationState,
    /// Retries issued since the last successful registration
    pub retries: u32,
    pub last_code: Option<u16>,
    pub last_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RegistrationAccount {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            handle: RegistrationHandle(Uuid::new_v4()),
            credentials,
            state: RegistrationState::None,
            retries: 0,
            last_code: None,
            last_reason: None,
            created_at: Utc::now(),
        }
    }
}

/// Snapshot published whenever the account state moves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationStatus {
    pub state: RegistrationState,
    pub code: Option<u16>,
    pub reason: Option<String>,
}

impl RegistrationStatus {
    pub fn new(state: RegistrationState) -> Self {
        Self {
            state,
            code: None,
            reason: None,
        }
    }
}

impl Default for RegistrationStatus {
    fn default() -> Self {
        Self::new(RegistrationState::None)
    }
}
