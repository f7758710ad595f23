//! Per-connection bookkeeping.

use std::time::{Duration, Instant};

/// Metadata the pool tracks for each physical connection.
#[derive(Debug, Clone)]
pub struct ConnMeta {
    /// Unique identifier, assigned at open time.
    pub id: u64,
    /// Pool generation the connection was created under. A connection whose
    /// generation no longer matches the pool's is closed on release instead
    /// of being returned to idle.
    pub generation: u64,
    /// When the connection was opened.
    pub created_at: Instant,
    /// When the connection was last checked out or returned.
    pub last_used_at: Instant,
    /// Number of times the connection has been checked out.
    pub checkout_count: u64,
}

impl ConnMeta {
    /// Create metadata for a freshly opened connection.
    #[must_use]
    pub fn new(id: u64, generation: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            generation,
            created_at: now,
            last_used_at: now,
            checkout_count: 0,
        }
    }

    /// Check if the connection has exceeded its maximum lifetime.
    #[must_use]
    pub fn is_expired(&self, max_lifetime: Duration) -> bool {
        self.created_at.elapsed() > max_lifetime
    }

    /// Check if the connection has sat idle past the idle timeout.
    #[must_use]
    pub fn is_idle_expired(&self, idle_timeout: Duration) -> bool {
        self.last_used_at.elapsed() > idle_timeout
    }

    /// Mark the connection as checked out.
    pub fn mark_checkout(&mut self) {
        self.last_used_at = Instant::now();
        self.checkout_count += 1;
    }

    /// Mark the connection as returned to idle.
    pub fn mark_checkin(&mut self) {
        self.last_used_at = Instant::now();
    }
}

/// A physical connection together with its pool metadata.
pub(crate) struct Pooled<C> {
    pub(crate) raw: C,
    pub(crate) meta: ConnMeta,
}

impl<C> Pooled<C> {
    pub(crate) fn new(id: u64, generation: u64, raw: C) -> Self {
        Self {
            raw,
            meta: ConnMeta::new(id, generation),
        }
    }
}
