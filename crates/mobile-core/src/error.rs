//! Error types for the mobile-core library
//!
//! Every operation exposed by [`MobileClient`](crate::MobileClient) resolves to
//! a [`MobileResult`]. Failures are always terminal error values handed back to
//! the caller; nothing in this crate panics on a failed call operation.
//!
//! # Error Categories
//!
//! - **Precondition errors** - `NotInitialized`, `NotRegistered`, `PermissionDenied`
//! - **Resolution errors** - `SessionNotFound` once every fallback heuristic is exhausted
//! - **Input errors** - `InvalidAddress`, `InvalidConfiguration`
//! - **Timing errors** - `OperationTimedOut` for bounded waits
//! - **Collaborator errors** - signaling engine, host call UI, audio hardware
//!
//! # Handling Pattern
//!
//! ```rust,no_run
//! # use rvoip_mobile_core::{MobileClient, MobileError};
//! # async fn example(client: MobileClient) {
//! match client.dial("sip:bob@example.com").await {
//!     Ok(session_id) => println!("dialing {}", session_id),
//!     Err(MobileError::NotRegistered) => println!("log in first"),
//!     Err(e) if e.is_auth_error() => println!("credentials rejected"),
//!     Err(e) => eprintln!("dial failed ({}): {}", e.category(), e),
//! }
//! # }
//! ```

use thiserror::Error;

/// Result type alias for mobile-core operations
pub type MobileResult<T> = Result<T, MobileError>;

/// Error taxonomy for call reconciliation and call control
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MobileError {
    /// The signaling engine has not been started (or was shut down)
    #[error("Signaling engine not initialized")]
    NotInitialized,

    /// No registered account is available for the requested operation
    #[error("Not registered with server")]
    NotRegistered,

    /// No session could be resolved for the given identifier
    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("Invalid address: {address}")]
    InvalidAddress { address: String },

    /// Not a DTMF event (0-9, *, #, A-D)
    #[error("Invalid DTMF digit: {digit:?}")]
    InvalidDigit { digit: char },

    #[error("Permission denied: {operation}")]
    PermissionDenied { operation: String },

    #[error("Operation {operation} timed out after {duration_ms}ms")]
    OperationTimedOut { operation: String, duration_ms: u64 },

    /// Registration was rejected by the server or gave up after retrying
    #[error("Registration failed (code {code:?}): {reason}")]
    RegistrationFailed { code: Option<u16>, reason: String },

    #[error("Invalid call state for session {session_id}: {state}")]
    InvalidCallState { session_id: String, state: String },

    #[error("Signaling operation {operation} failed: {reason}")]
    SignalingFailed { operation: String, reason: String },

    #[error("Native call UI failure: {reason}")]
    ProviderFailed { reason: String },

    #[error("Audio session failure: {reason}")]
    AudioFailed { reason: String },

    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl MobileError {
    /// Create a session-not-found error for any displayable identifier
    pub fn session_not_found(id: impl std::fmt::Display) -> Self {
        Self::SessionNotFound { id: id.to_string() }
    }

    pub fn invalid_address(address: impl Into<String>) -> Self {
        Self::InvalidAddress { address: address.into() }
    }

    pub fn permission_denied(operation: impl Into<String>) -> Self {
        Self::PermissionDenied { operation: operation.into() }
    }

    pub fn timed_out(operation: impl Into<String>, duration: std::time::Duration) -> Self {
        Self::OperationTimedOut {
            operation: operation.into(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn signaling_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SignalingFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn provider_failed(reason: impl Into<String>) -> Self {
        Self::ProviderFailed { reason: reason.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Check if this error is worth retrying without user involvement
    pub fn is_recoverable(&self) -> bool {
        match self {
            MobileError::OperationTimedOut { .. } | MobileError::SignalingFailed { .. } => true,
            MobileError::RegistrationFailed { code, .. } => {
                !crate::recovery::is_auth_failure(*code)
            }
            _ => false,
        }
    }

    /// Check if error indicates an authentication or account problem
    pub fn is_auth_error(&self) -> bool {
        match self {
            MobileError::NotRegistered => true,
            MobileError::RegistrationFailed { code, .. } => crate::recovery::is_auth_failure(*code),
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            MobileError::NotRegistered | MobileError::RegistrationFailed { .. } => "registration",

            MobileError::SessionNotFound { .. } | MobileError::InvalidCallState { .. } => "call",

            MobileError::NotInitialized | MobileError::SignalingFailed { .. } => "signaling",

            MobileError::ProviderFailed { .. } => "call_ui",

            MobileError::AudioFailed { .. } | MobileError::PermissionDenied { .. } => "audio",

            MobileError::InvalidAddress { .. }
            | MobileError::InvalidDigit { .. }
            | MobileError::InvalidConfiguration { .. } => "input",

            MobileError::OperationTimedOut { .. } | MobileError::Internal { .. } => "system",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failures_are_not_recoverable() {
        let unauthorized = MobileError::RegistrationFailed {
            code: Some(401),
            reason: "Unauthorized".to_string(),
        };
        assert!(unauthorized.is_auth_error());
        assert!(!unauthorized.is_recoverable());

        let unavailable = MobileError::RegistrationFailed {
            code: Some(503),
            reason: "Service Unavailable".to_string(),
        };
        assert!(!unavailable.is_auth_error());
        assert!(unavailable.is_recoverable());
    }

    #[test]
    fn test_categories() {
        assert_eq!(MobileError::NotRegistered.category(), "registration");
        assert_eq!(MobileError::session_not_found("abc").category(), "call");
        assert_eq!(MobileError::invalid_address("").category(), "input");
        assert_eq!(
            MobileError::timed_out("wait", std::time::Duration::from_secs(15)).category(),
            "system"
        );
    }

    #[test]
    fn test_timeout_message() {
        let err = MobileError::timed_out("wait_for_session", std::time::Duration::from_secs(15));
        assert_eq!(
            err.to_string(),
            "Operation wait_for_session timed out after 15000ms"
        );
    }
}
