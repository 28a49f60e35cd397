//! Engine call handle ↔ session identifier mapping
//!
//! The mapping is one-to-one. A session may move to a new handle (a call
//! re-established after a network change carries the same correlation token
//! on a fresh engine dialog), but a handle is never pointed at a second
//! session: that would silently merge two physical calls.

use std::collections::HashMap;

use tracing::debug;

use super::CallHandle;
use crate::call::SessionId;
use crate::error::{MobileError, MobileResult};

#[derive(Debug, Default)]
pub struct HandleMap {
    by_handle: HashMap<CallHandle, SessionId>,
    by_session: HashMap<SessionId, CallHandle>,
}

impl HandleMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handle` to `session_id`
    ///
    /// Returns the handle the session previously used, if it was rebound.
    pub fn bind(&mut self, handle: CallHandle, session_id: SessionId) -> MobileResult<Option<CallHandle>> {
        if let Some(owner) = self.by_handle.get(&handle) {
            if *owner == session_id {
                return Ok(None);
            }
            return Err(MobileError::internal(format!(
                "engine handle {} already belongs to session {}",
                handle, owner
            )));
        }

        let previous = self.by_session.insert(session_id, handle);
        if let Some(old) = previous {
            self.by_handle.remove(&old);
            debug!(session_id = %session_id, old_handle = %old, new_handle = %handle, "Session moved to a new engine handle");
        }
        self.by_handle.insert(handle, session_id);
        Ok(previous)
    }

    pub fn session_for(&self, handle: &CallHandle) -> Option<SessionId> {
        self.by_handle.get(handle).copied()
    }

    pub fn handle_for(&self, session_id: &SessionId) -> Option<CallHandle> {
        self.by_session.get(session_id).copied()
    }

    pub fn remove_session(&mut self, session_id: &SessionId) -> Option<CallHandle> {
        let handle = self.by_session.remove(session_id)?;
        self.by_handle.remove(&handle);
        Some(handle)
    }

    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_handle.clear();
        self.by_session.clear();
    }
}
