//! Mock audit sink for testing.

use super::lock;
use crate::audit::{AuditEntry, AuditQuery, Page};
use crate::error::{AuthError, Result};
use crate::providers::{AuditQueryStore, AuditSink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory audit log.
///
/// Can simulate a slow sink (`with_delay`) or an unavailable one
/// (`failing`).
#[derive(Debug, Clone, Default)]
pub struct MockAuditSink {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
    delay: Option<Duration>,
    failing: Arc<AtomicBool>,
}

impl MockAuditSink {
    /// Create a new empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before each write.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Reject every write.
    #[must_use]
    pub fn failing(self) -> Self {
        self.failing.store(true, Ordering::SeqCst);
        self
    }

    /// Snapshot of persisted entries, in write order.
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        lock(&self.entries).map(|e| e.clone()).unwrap_or_default()
    }

    /// Persisted entries with the given operation name.
    #[must_use]
    pub fn entries_for(&self, operation: &str) -> Vec<AuditEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.operation == operation)
            .collect()
    }
}

impl AuditSink for MockAuditSink {
    async fn write(&self, entry: &AuditEntry) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuthError::DatabaseError("audit sink unavailable".into()));
        }
        lock(&self.entries)?.push(entry.clone());
        Ok(())
    }
}

impl AuditQueryStore for MockAuditSink {
    async fn query(&self, query: &AuditQuery) -> Result<Page<AuditEntry>> {
        Ok(query.apply(self.entries()))
    }
}
