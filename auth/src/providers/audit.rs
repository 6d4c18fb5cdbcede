//! Audit persistence traits.

use crate::audit::{AuditEntry, AuditQuery, Page};
use crate::error::Result;

/// Durable, append-only audit destination.
///
/// Sinks are shared with the background writers of
/// [`SecurityAuditTrail`](crate::audit::SecurityAuditTrail), hence the
/// `Clone + 'static` bound.
pub trait AuditSink: Send + Sync + Clone + 'static {
    /// Persist one entry.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails. The trail logs and absorbs it.
    fn write(&self, entry: &AuditEntry) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Read side of the audit log, for reporting collaborators.
pub trait AuditQueryStore: Send + Sync {
    /// Matching entries, newest first, paginated.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn query(
        &self,
        query: &AuditQuery,
    ) -> impl std::future::Future<Output = Result<Page<AuditEntry>>> + Send;
}
