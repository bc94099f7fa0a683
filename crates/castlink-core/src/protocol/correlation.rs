//! Correlation-identifier generation for request/response matching.
//!
//! Every outbound `register`/`request` frame carries a correlation id that
//! the device echoes back on the matching reply. Ids must satisfy two
//! properties:
//!
//! - **Unique within a session** – two in-flight requests must never share
//!   an id, or their replies would be indistinguishable.
//! - **Unguessable across sessions** – an id from a previous session must
//!   not collide with one from the current session, so a late frame from
//!   a torn-down connection can never settle a fresh request.
//!
//! A random per-generator prefix (from a UUID v4) covers the second
//! property; an atomic counter covers the first.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Generates correlation identifiers of the form `"<prefix>-<n>"`, where
/// the prefix is random per generator and `n` increments atomically.
///
/// # Examples
///
/// ```rust
/// use castlink_core::CorrelationIdGenerator;
///
/// let ids = CorrelationIdGenerator::new();
/// let a = ids.next();
/// let b = ids.next();
/// assert_ne!(a, b);
/// assert_eq!(a.split('-').next(), b.split('-').next());
/// ```
pub struct CorrelationIdGenerator {
    /// Random prefix shared by every id from this generator.
    prefix: String,
    /// Monotonic per-generator counter; `Relaxed` is sufficient because
    /// ids are only compared for equality, never used for ordering.
    counter: AtomicU64,
}

impl CorrelationIdGenerator {
    /// Creates a generator with a fresh random prefix.
    pub fn new() -> Self {
        let mut prefix = Uuid::new_v4().simple().to_string();
        prefix.truncate(8);
        Self { prefix, counter: AtomicU64::new(1) }
    }

    /// Returns the next correlation id.
    pub fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{n}", self.prefix)
    }
}

impl Default for CorrelationIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
