//! Configuration for the mobile call core
//!
//! # Examples
//!
//! ```rust
//! use rvoip_mobile_core::MobileConfig;
//! use std::time::Duration;
//!
//! let config = MobileConfig::new()
//!     .with_native_call_ui(false)
//!     .with_pending_incoming_ttl(Duration::from_secs(20));
//!
//! assert!(!config.use_native_call_ui);
//! assert_eq!(config.session_wait_timeout, Duration::from_secs(15));
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MobileError, MobileResult};
use crate::recovery::RegistrationRetryPolicy;

/// Tunables for reconciliation, waits and the engine pump
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MobileConfig {
    /// How long a push-created pending record may be matched
    pub pending_incoming_ttl: Duration,
    /// How long a host-UI action waits for its call to reach signaling
    pub session_wait_timeout: Duration,
    /// How long dialing waits for an in-progress registration
    pub registration_timeout: Duration,
    pub registration_retry: RegistrationRetryPolicy,
    /// Engine pump interval while a call exists
    pub active_iterate_interval: Duration,
    /// Engine pump interval with no calls in the foreground
    pub idle_iterate_interval: Duration,
    /// Stop pumping entirely when backgrounded with nothing to do
    pub pause_iterate_in_background: bool,
    /// Route intents through the native call UI when one is attached
    pub use_native_call_ui: bool,
    pub event_channel_capacity: usize,
}

impl Default for MobileConfig {
    fn default() -> Self {
        Self {
            pending_incoming_ttl: Duration::from_secs(30),
            session_wait_timeout: Duration::from_secs(15),
            registration_timeout: Duration::from_secs(10),
            registration_retry: RegistrationRetryPolicy::default(),
            active_iterate_interval: Duration::from_millis(20),
            idle_iterate_interval: Duration::from_millis(100),
            pause_iterate_in_background: true,
            use_native_call_ui: true,
            event_channel_capacity: 256,
        }
    }
}

impl MobileConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pending_incoming_ttl(mut self, ttl: Duration) -> Self {
        self.pending_incoming_ttl = ttl;
        self
    }

    pub fn with_session_wait_timeout(mut self, timeout: Duration) -> Self {
        self.session_wait_timeout = timeout;
        self
    }

    pub fn with_registration_timeout(mut self, timeout: Duration) -> Self {
        self.registration_timeout = timeout;
        self
    }

    pub fn with_registration_retry(mut self, policy: RegistrationRetryPolicy) -> Self {
        self.registration_retry = policy;
        self
    }

    pub fn with_iterate_intervals(mut self, active: Duration, idle: Duration) -> Self {
        self.active_iterate_interval = active;
        self.idle_iterate_interval = idle;
        self
    }

    pub fn with_native_call_ui(mut self, enabled: bool) -> Self {
        self.use_native_call_ui = enabled;
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// Reject settings the core cannot run with
    pub fn validate(&self) -> MobileResult<()> {
        let durations = [
            ("pending_incoming_ttl", self.pending_incoming_ttl),
            ("session_wait_timeout", self.session_wait_timeout),
            ("registration_timeout", self.registration_timeout),
            ("active_iterate_interval", self.active_iterate_interval),
            ("idle_iterate_interval", self.idle_iterate_interval),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(MobileError::InvalidConfiguration {
                    field: field.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.active_iterate_interval > self.idle_iterate_interval {
            return Err(MobileError::InvalidConfiguration {
                field: "active_iterate_interval".to_string(),
                reason: "must not exceed idle_iterate_interval".to_string(),
            });
        }
        if self.event_channel_capacity == 0 {
            return Err(MobileError::InvalidConfiguration {
                field: "event_channel_capacity".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
