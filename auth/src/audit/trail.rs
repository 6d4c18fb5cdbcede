//! Mixed-durability audit writer.
//!
//! ```text
//! record(event)
//!   ├─ critical ──────────────────────────────▶ sink.write (awaited)
//!   └─ normal ── try_send ─┬─ queued ─▶ worker ─▶ sink.write
//!                          └─ full/closed ────▶ sink.write on caller
//! ```

use super::{Actor, AuditEntry, SecurityEvent};
use crate::config::AuditConfig;
use crate::providers::AuditSink;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

/// Security audit trail with synchronous critical writes and a bounded
/// asynchronous pool for everything else.
///
/// Cloning is cheap; all clones share the queue and workers.
///
/// # Panics
///
/// [`new`](Self::new) spawns its workers and must be called inside a
/// Tokio runtime.
#[derive(Clone)]
pub struct SecurityAuditTrail<S: AuditSink> {
    sink: S,
    queue: Arc<Mutex<Option<mpsc::Sender<AuditEntry>>>>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    write_timeout: Duration,
}

impl<S: AuditSink> SecurityAuditTrail<S> {
    /// Start the worker pool.
    #[must_use]
    pub fn new(sink: S, config: &AuditConfig) -> Self {
        let (tx, rx) = mpsc::channel::<AuditEntry>(config.queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let sink = sink.clone();
                let write_timeout = config.write_timeout;
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(entry) = next else { break };
                        persist(&sink, &entry, write_timeout).await;
                    }
                    tracing::debug!(worker = worker, "Audit worker stopped");
                })
            })
            .collect();

        Self {
            sink,
            queue: Arc::new(Mutex::new(Some(tx))),
            workers: Arc::new(Mutex::new(workers)),
            write_timeout: config.write_timeout,
        }
    }

    /// Record a security event.
    ///
    /// Critical events are durable when this returns. Never fails.
    pub async fn record(
        &self,
        event: SecurityEvent,
        actor: impl Into<Actor>,
        client_ip: Option<&str>,
        detail: impl Into<String>,
    ) {
        let entry = AuditEntry::security(event, &actor.into(), client_ip, detail);
        emit_log_line(&entry);

        if event.is_critical() {
            tracing::error!(
                target: "security_audit",
                event = %event,
                actor_id = ?entry.actor_id,
                external_actor_id = ?entry.external_actor_id,
                client_ip = ?entry.client_ip,
                "CRITICAL SECURITY EVENT"
            );
            persist(&self.sink, &entry, self.write_timeout).await;
        } else {
            self.dispatch(entry).await;
        }
    }

    /// Record a prepared entry through the normal (asynchronous) path.
    pub async fn record_entry(&self, entry: AuditEntry) {
        emit_log_line(&entry);
        self.dispatch(entry).await;
    }

    /// Stop accepting queued writes, drain the queue and wait for workers.
    ///
    /// Entries recorded afterwards are written on the caller.
    pub async fn shutdown(&self) {
        let sender = self.queue.lock().ok().and_then(|mut q| q.take());
        drop(sender);

        let handles: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .map(|mut w| w.drain(..).collect())
            .unwrap_or_default();

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Audit worker ended abnormally");
            }
        }

        tracing::info!("Security audit trail drained");
    }

    async fn dispatch(&self, entry: AuditEntry) {
        let rejected = {
            let guard = self.queue.lock();
            match guard.as_deref() {
                Ok(Some(tx)) => match tx.try_send(entry) {
                    Ok(()) => None,
                    Err(TrySendError::Full(entry) | TrySendError::Closed(entry)) => Some(entry),
                },
                Ok(None) | Err(_) => Some(entry),
            }
        };

        if let Some(entry) = rejected {
            // Backpressure: the caller pays for the write instead of losing it.
            metrics::counter!("auth_audit_fallback_inline_total").increment(1);
            tracing::debug!(operation = %entry.operation, "Audit queue unavailable, writing inline");
            persist(&self.sink, &entry, self.write_timeout).await;
        }
    }
}

impl<S: AuditSink> std::fmt::Debug for SecurityAuditTrail<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityAuditTrail")
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

fn emit_log_line(entry: &AuditEntry) {
    match serde_json::to_string(entry) {
        Ok(json) => tracing::info!(target: "security_audit", entry = %json, "[SECURITY_AUDIT]"),
        Err(_) => tracing::warn!(
            target: "security_audit",
            operation = %entry.operation,
            actor_id = ?entry.actor_id,
            client_ip = ?entry.client_ip,
            "[SECURITY_AUDIT]"
        ),
    }
}

async fn persist<S: AuditSink>(sink: &S, entry: &AuditEntry, write_timeout: Duration) {
    let failure = match tokio::time::timeout(write_timeout, sink.write(entry)).await {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e.to_string(),
        Err(_) => "write timed out".to_string(),
    };

    metrics::counter!("auth_audit_write_failures_total").increment(1);
    tracing::error!(
        operation = %entry.operation,
        entry_id = %entry.id,
        error = %failure,
        "Failed to persist audit entry"
    );
}
