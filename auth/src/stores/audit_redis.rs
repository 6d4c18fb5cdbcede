//! Redis audit log.
//!
//! Entries are appended as JSON to one list per UTC day,
//! `security:audit:log:{yyyy-mm-dd}`, and each list expires
//! [`AUDIT_RETENTION_DAYS`] after its last write. Queries read the daily
//! lists inside the retention window and filter in memory; use the
//! `PostgreSQL` log for anything longer-lived.

use super::redis_error;
use crate::audit::{AuditEntry, AuditQuery, Page};
use crate::constants::{keys, AUDIT_RETENTION_DAYS};
use crate::error::{AuthError, Result};
use crate::providers::{AuditQueryStore, AuditSink};
use chrono::{DateTime, Days, NaiveDate, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

/// Daily audit lists in Redis.
#[derive(Clone)]
pub struct RedisAuditLog {
    conn_manager: ConnectionManager,
}

impl RedisAuditLog {
    /// Connect to `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns error if the connection cannot be established.
    pub async fn new(redis_url: &str) -> Result<Self> {
        Ok(Self::from_manager(super::connect(redis_url).await?))
    }

    /// Share an existing connection.
    #[must_use]
    pub const fn from_manager(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }

    fn day_key(day: NaiveDate) -> String {
        format!("{}{}", keys::AUDIT_LOG, day.format("%Y-%m-%d"))
    }

    /// Days whose lists may hold entries matching `[start, end]`.
    fn days_in_window(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Vec<NaiveDate> {
        let today = now.date_naive();
        let retained_from = today
            .checked_sub_days(Days::new(u64::try_from(AUDIT_RETENTION_DAYS - 1).unwrap_or(0)))
            .unwrap_or(today);

        let first = start.map_or(retained_from, |s| s.date_naive().max(retained_from));
        let last = end.map_or(today, |e| e.date_naive().min(today));

        first.iter_days().take_while(|day| *day <= last).collect()
    }
}

impl AuditSink for RedisAuditLog {
    async fn write(&self, entry: &AuditEntry) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let key = Self::day_key(entry.created_at.date_naive());
        let json =
            serde_json::to_string(entry).map_err(|e| AuthError::SerializationError(e.to_string()))?;

        let _: () = redis::pipe()
            .atomic()
            .rpush(&key, json)
            .ignore()
            .expire(&key, AUDIT_RETENTION_DAYS * 86_400)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(redis_error("Failed to append audit entry"))?;
        Ok(())
    }
}

impl AuditQueryStore for RedisAuditLog {
    async fn query(&self, query: &AuditQuery) -> Result<Page<AuditEntry>> {
        let mut conn = self.conn_manager.clone();
        let mut entries = Vec::new();

        for day in Self::days_in_window(query.start, query.end, Utc::now()) {
            let raw: Vec<String> = conn
                .lrange(Self::day_key(day), 0, -1)
                .await
                .map_err(redis_error("Failed to read audit log"))?;

            entries.extend(raw.iter().filter_map(|json| {
                serde_json::from_str::<AuditEntry>(json)
                    .inspect_err(|e| tracing::warn!(error = %e, "Skipping malformed audit entry"))
                    .ok()
            }));
        }

        Ok(query.apply(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{Actor, SecurityEvent};
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0)
            .single()
            .unwrap_or_else(|| panic!("valid date"))
    }

    #[test]
    fn test_window_defaults_to_retention() {
        let days = RedisAuditLog::days_in_window(None, None, at(2026, 3, 10));
        assert_eq!(days.len(), 7);
        assert_eq!(days.first().map(ToString::to_string).as_deref(), Some("2026-03-04"));
        assert_eq!(days.last().map(ToString::to_string).as_deref(), Some("2026-03-10"));
    }

    #[test]
    fn test_window_is_clamped_to_range() {
        let days = RedisAuditLog::days_in_window(
            Some(at(2026, 3, 8)),
            Some(at(2026, 3, 9)),
            at(2026, 3, 10),
        );
        assert_eq!(days.len(), 2);

        let none = RedisAuditLog::days_in_window(Some(at(2026, 3, 11)), None, at(2026, 3, 10));
        assert!(none.is_empty());
    }

    #[test]
    fn test_day_key() {
        let day = at(2026, 1, 5).date_naive();
        assert_eq!(RedisAuditLog::day_key(day), "security:audit:log:2026-01-05");
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    #[allow(clippy::unwrap_used)]
    async fn test_write_then_query() {
        let log = RedisAuditLog::new("redis://127.0.0.1:6379").await.unwrap();
        let user = crate::state::UserId(424_242);
        let entry = AuditEntry::security(
            SecurityEvent::LoginSuccess,
            &Actor::User(user),
            Some("10.0.0.1"),
            "method=password",
        );
        log.write(&entry).await.unwrap();

        let page = log
            .query(&AuditQuery::default().with_actor(user))
            .await
            .unwrap();
        assert!(page.items.iter().any(|e| e.id == entry.id));
    }
}
