//! Audit sink writing to a primary and a secondary sink.
//!
//! Typical wiring is `PostgreSQL` (durable, queryable) as the primary and
//! the Redis daily lists as the secondary. The write succeeds if the
//! primary accepts it; a secondary failure is only logged.

use crate::audit::{AuditEntry, AuditQuery, Page};
use crate::error::Result;
use crate::providers::{AuditQueryStore, AuditSink};

/// Writes every entry to two sinks; queries go to the primary.
#[derive(Debug, Clone)]
pub struct FanoutAuditSink<P, S> {
    primary: P,
    secondary: S,
}

impl<P: AuditSink, S: AuditSink> FanoutAuditSink<P, S> {
    /// Combine two sinks.
    #[must_use]
    pub const fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }
}

impl<P: AuditSink, S: AuditSink> AuditSink for FanoutAuditSink<P, S> {
    async fn write(&self, entry: &AuditEntry) -> Result<()> {
        let (primary, secondary) =
            tokio::join!(self.primary.write(entry), self.secondary.write(entry));

        if let Err(e) = secondary {
            tracing::warn!(entry_id = %entry.id, error = %e, "Secondary audit sink rejected entry");
        }
        primary
    }
}

impl<P: AuditSink + AuditQueryStore, S: AuditSink> AuditQueryStore for FanoutAuditSink<P, S> {
    async fn query(&self, query: &AuditQuery) -> Result<Page<AuditEntry>> {
        self.primary.query(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{Actor, SecurityEvent};
    use crate::mocks::MockAuditSink;

    fn entry() -> AuditEntry {
        AuditEntry::security(SecurityEvent::Logout, &Actor::Anonymous, None, "")
    }

    #[tokio::test]
    async fn test_writes_both() {
        let (a, b) = (MockAuditSink::new(), MockAuditSink::new());
        let sink = FanoutAuditSink::new(a.clone(), b.clone());

        assert!(sink.write(&entry()).await.is_ok());
        assert_eq!(a.entries().len(), 1);
        assert_eq!(b.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_secondary_failure_is_tolerated() {
        let (a, b) = (MockAuditSink::new(), MockAuditSink::new().failing());
        let sink = FanoutAuditSink::new(a.clone(), b);

        assert!(sink.write(&entry()).await.is_ok());
        assert_eq!(a.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_primary_failure_is_reported() {
        let sink = FanoutAuditSink::new(MockAuditSink::new().failing(), MockAuditSink::new());
        assert!(sink.write(&entry()).await.is_err());
    }
}
