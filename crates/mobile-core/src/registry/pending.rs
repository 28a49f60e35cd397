//! Provisional incoming calls created by push wake-ups
//!
//! A push arrives before signaling has delivered the INVITE. The record kept
//! here carries the identifier already shown to the host UI so the real call
//! can adopt it. Records live for a fixed TTL; expired ones are never matched
//! and are dropped on the next access.

use std::time::Duration;

use tokio::time::Instant;

use crate::call::{CorrelationToken, SessionId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingIncoming {
    pub provisional_id: SessionId,
    pub correlation_token: Option<CorrelationToken>,
    pub caller_handle: String,
    pub created_at: Instant,
    /// The user declined from the host UI before the INVITE arrived
    pub declined: bool,
}

impl PendingIncoming {
    pub fn new(token: Option<CorrelationToken>, caller_handle: impl Into<String>) -> Self {
        Self {
            provisional_id: SessionId::new(),
            correlation_token: token,
            caller_handle: caller_handle.into(),
            created_at: Instant::now(),
            declined: false,
        }
    }

    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.created_at) >= ttl
    }
}

/// Insertion-ordered pending records with lazy expiry
#[derive(Debug)]
pub struct PendingIncomingStore {
    records: Vec<PendingIncoming>,
    ttl: Duration,
}

impl PendingIncomingStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: Vec::new(),
            ttl,
        }
    }

    pub fn insert(&mut self, record: PendingIncoming) {
        self.records.push(record);
    }

    /// Drop every record older than the TTL, returning what was dropped
    pub fn purge_expired(&mut self, now: Instant) -> Vec<PendingIncoming> {
        let ttl = self.ttl;
        let (expired, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.records)
            .into_iter()
            .partition(|p| p.is_expired(now, ttl));
        self.records = live;
        expired
    }

    pub fn get(&self, provisional_id: &SessionId) -> Option<&PendingIncoming> {
        self.records.iter().find(|p| &p.provisional_id == provisional_id)
    }

    pub fn get_mut(&mut self, provisional_id: &SessionId) -> Option<&mut PendingIncoming> {
        self.records.iter_mut().find(|p| &p.provisional_id == provisional_id)
    }

    pub fn find_by_token(&self, token: &CorrelationToken) -> Option<&PendingIncoming> {
        self.records
            .iter()
            .find(|p| p.correlation_token.as_ref() == Some(token))
    }

    /// Remove and return a record (consumption on adoption)
    pub fn take(&mut self, provisional_id: &SessionId) -> Option<PendingIncoming> {
        let index = self
            .records
            .iter()
            .position(|p| &p.provisional_id == provisional_id)?;
        Some(self.records.remove(index))
    }

    /// Records eligible for a timing match against a call carrying `token`
    ///
    /// Timing matches are only allowed when one side lacks a token.
    pub fn timing_candidates(&self, token: Option<&CorrelationToken>) -> Vec<SessionId> {
        self.records
            .iter()
            .filter(|p| token.is_none() || p.correlation_token.is_none())
            .map(|p| p.provisional_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) -> Vec<PendingIncoming> {
        std::mem::take(&mut self.records)
    }
}
