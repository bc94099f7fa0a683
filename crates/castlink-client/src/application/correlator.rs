//! The pending-request table: correlation ids mapped to waiting callers.
//!
//! Every `send` on a ready session creates one [`PendingRequest`]: a
//! single-use completion slot plus an armed timeout. The entry is settled
//! exactly once — by the matching `response` frame, the matching `error`
//! frame, its own timer, or transport closure — and settlement removes the
//! entry and cancels the timer as a single operation, so the map and the
//! timers can never drift apart.
//!
//! # Why settlement is fused with removal (for beginners)
//!
//! The classic bug in hand-rolled correlation tables is a timer that fires
//! after its entry was already answered: the map says the request is gone,
//! but the stale timer still runs and reports a timeout to nobody — or
//! worse, to the next request that reused the slot. Here the only way to
//! complete an entry is [`PendingTable::settle`], which removes the entry
//! and aborts its timer while holding the table lock; whichever path gets
//! there second finds nothing and does nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::application::ClientError;

/// The outcome delivered to a waiting caller.
pub(crate) type Settlement = Result<Value, ClientError>;

/// One in-flight request awaiting settlement.
struct PendingRequest {
    /// Single-use completion slot; consumed by settlement.
    complete: oneshot::Sender<Settlement>,
    /// Handle of the timeout task; aborted on settlement.
    timer: AbortHandle,
    /// When the request was sent (diagnostics only).
    created_at: Instant,
}

/// Table of in-flight requests keyed by correlation id.
///
/// Cheaply clonable; all clones share one table, so the session's dispatch
/// task and the senders operate on the same entries.
#[derive(Clone)]
pub(crate) struct PendingTable {
    inner: Arc<Mutex<HashMap<String, PendingRequest>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Registers a new pending request under `id` with an armed timeout,
    /// returning the receiver the caller awaits.
    ///
    /// When the timer fires first, the entry settles with
    /// [`ClientError::Timeout`] and is removed; there is no retry.
    pub fn insert(&self, id: String, timeout: Duration) -> oneshot::Receiver<Settlement> {
        let (complete, receiver) = oneshot::channel();

        let timer = {
            let table = self.clone();
            let id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if table.settle(&id, Err(ClientError::Timeout { operation: "request", after: timeout }))
                {
                    debug!(%id, "request timed out");
                }
            })
            .abort_handle()
        };

        let mut inner = self.inner.lock().expect("pending table mutex poisoned");
        inner.insert(id, PendingRequest { complete, timer, created_at: Instant::now() });
        receiver
    }

    /// Settles the entry under `id`, if it is still pending.
    ///
    /// Removes the entry, aborts its timer, and delivers `result` to the
    /// waiting caller. Returns `false` when the id is unknown — already
    /// settled, or never ours — in which case nothing happens.
    pub fn settle(&self, id: &str, result: Settlement) -> bool {
        let entry = {
            let mut inner = self.inner.lock().expect("pending table mutex poisoned");
            inner.remove(id)
        };
        let Some(entry) = entry else { return false };
        entry.timer.abort();
        debug!(%id, elapsed = ?entry.created_at.elapsed(), "request settled");
        // The caller may have dropped its receiver; that is their choice.
        let _ = entry.complete.send(result);
        true
    }

    /// Force-settles every outstanding entry with `make_error`.
    ///
    /// Used on transport closure and session teardown so no caller is ever
    /// left waiting on a request the device can no longer answer. Returns
    /// the number of entries settled.
    pub fn fail_all(&self, make_error: impl Fn() -> ClientError) -> usize {
        let drained: Vec<(String, PendingRequest)> = {
            let mut inner = self.inner.lock().expect("pending table mutex poisoned");
            inner.drain().collect()
        };
        let count = drained.len();
        for (id, entry) in drained {
            entry.timer.abort();
            debug!(%id, "request force-settled");
            let _ = entry.complete.send(Err(make_error()));
        }
        count
    }

    /// Number of requests currently awaiting settlement.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("pending table mutex poisoned").len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_settle_delivers_result_and_empties_table() {
        // Arrange
        let table = PendingTable::new();
        let rx = table.insert("a-1".to_string(), Duration::from_secs(5));

        // Act
        let settled = table.settle("a-1", Ok(json!({"volume": 7})));

        // Assert
        assert!(settled);
        assert_eq!(table.len(), 0);
        let result = rx.await.expect("completion delivered");
        assert_eq!(result.expect("payload")["volume"], 7);
    }

    #[tokio::test]
    async fn test_second_settle_is_a_no_op() {
        // Arrange
        let table = PendingTable::new();
        let rx = table.insert("a-1".to_string(), Duration::from_secs(5));

        // Act – response and error race; only the first settlement counts
        let first = table.settle("a-1", Ok(json!(1)));
        let second = table.settle("a-1", Err(ClientError::Rejected("late".into())));

        // Assert
        assert!(first);
        assert!(!second, "an already-settled id must not settle again");
        assert!(rx.await.expect("completion").is_ok());
    }

    #[tokio::test]
    async fn test_timeout_settles_and_removes_the_entry() {
        // Arrange – a timer short enough to actually fire
        let table = PendingTable::new();
        let rx = table.insert("a-1".to_string(), Duration::from_millis(20));

        // Act
        let result = rx.await.expect("completion delivered");

        // Assert
        assert!(matches!(result, Err(ClientError::Timeout { operation: "request", .. })));
        assert_eq!(table.len(), 0, "timed-out entries must not linger");
    }

    #[tokio::test]
    async fn test_settlement_cancels_the_timer() {
        // Arrange
        let table = PendingTable::new();
        let rx = table.insert("a-1".to_string(), Duration::from_millis(20));

        // Act – settle before the timer fires, then outlive the deadline
        table.settle("a-1", Ok(json!(null)));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Assert – the caller saw the response, not a late timeout
        assert!(rx.await.expect("completion").is_ok());
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn test_fail_all_settles_every_entry_with_the_error() {
        // Arrange
        let table = PendingTable::new();
        let receivers: Vec<_> = (0..8)
            .map(|n| table.insert(format!("a-{n}"), Duration::from_secs(5)))
            .collect();

        // Act
        let count = table.fail_all(|| ClientError::TransportClosed);

        // Assert
        assert_eq!(count, 8);
        assert_eq!(table.len(), 0);
        for rx in receivers {
            let result = rx.await.expect("completion delivered");
            assert!(matches!(result, Err(ClientError::TransportClosed)));
        }
    }

    #[tokio::test]
    async fn test_concurrent_settlers_each_id_settles_exactly_once() {
        // Arrange – many entries, two contending settlers per entry
        let table = PendingTable::new();
        let receivers: Vec<_> = (0..64)
            .map(|n| table.insert(format!("a-{n}"), Duration::from_secs(5)))
            .collect();

        // Act – response and error race for every id on separate tasks
        let mut tasks = Vec::new();
        for n in 0..64 {
            let t = table.clone();
            tasks.push(tokio::spawn(async move { t.settle(&format!("a-{n}"), Ok(json!(n))) }));
            let t = table.clone();
            tasks.push(tokio::spawn(async move {
                t.settle(&format!("a-{n}"), Err(ClientError::Rejected("race".into())))
            }));
        }
        let mut wins = 0;
        for task in tasks {
            if task.await.expect("task") {
                wins += 1;
            }
        }

        // Assert – exactly one winner per id, every receiver completed
        assert_eq!(wins, 64);
        assert_eq!(table.len(), 0);
        for rx in receivers {
            rx.await.expect("every entry must deliver exactly one outcome");
        }
    }
}
