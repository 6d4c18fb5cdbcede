//! `PostgreSQL` audit log.
//!
//! Append-only: entries are inserted and never updated. Queries build
//! their `WHERE` clause from the set filters with [`sqlx::QueryBuilder`]
//! and page with `LIMIT`/`OFFSET`, newest first.

use super::map_db_error;
use crate::audit::{AuditEntry, AuditQuery, AuditType, Page};
use crate::error::Result;
use crate::providers::{AuditQueryStore, AuditSink};
use crate::state::UserId;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

const COLUMNS: &str = "id, trace_id, actor_id, external_actor_id, client_ip, user_agent, module, \
     operation, audit_type, target_type, target_id, request_body, result_code, result_msg, \
     duration_ms, created_at";

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: uuid::Uuid,
    trace_id: Option<String>,
    actor_id: Option<i64>,
    external_actor_id: Option<String>,
    client_ip: Option<String>,
    user_agent: Option<String>,
    module: String,
    operation: String,
    audit_type: i16,
    target_type: Option<String>,
    target_id: Option<String>,
    request_body: Option<String>,
    result_code: i32,
    result_msg: Option<String>,
    duration_ms: Option<i64>,
    created_at: DateTime<Utc>,
}

impl From<AuditRow> for AuditEntry {
    fn from(row: AuditRow) -> Self {
        Self {
            id: row.id,
            trace_id: row.trace_id,
            actor_id: row.actor_id.map(UserId),
            external_actor_id: row.external_actor_id,
            client_ip: row.client_ip,
            user_agent: row.user_agent,
            module: row.module,
            operation: row.operation,
            audit_type: AuditType::from_code(row.audit_type).unwrap_or(AuditType::ApiAccess),
            target_type: row.target_type,
            target_id: row.target_id,
            request_body: row.request_body,
            result_code: row.result_code,
            result_msg: row.result_msg,
            duration_ms: row.duration_ms.and_then(|ms| u64::try_from(ms).ok()),
            created_at: row.created_at,
        }
    }
}

/// Audit entries in `PostgreSQL`.
#[derive(Clone)]
pub struct PostgresAuditLog {
    pool: PgPool,
}

impl PostgresAuditLog {
    /// Wrap a connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &AuditQuery) {
        builder.push(" WHERE TRUE");
        if let Some(actor_id) = query.actor_id {
            builder.push(" AND actor_id = ").push_bind(actor_id.0);
        }
        if let Some(module) = &query.module {
            builder.push(" AND module = ").push_bind(module.clone());
        }
        if let Some(audit_type) = query.audit_type {
            builder.push(" AND audit_type = ").push_bind(audit_type.code());
        }
        if let Some(operation) = &query.operation {
            builder
                .push(" AND operation LIKE ")
                .push_bind(format!("%{}%", escape_like(operation)));
        }
        if let Some(target_type) = &query.target_type {
            builder.push(" AND target_type = ").push_bind(target_type.clone());
        }
        if let Some(start) = query.start {
            builder.push(" AND created_at >= ").push_bind(start);
        }
        if let Some(end) = query.end {
            builder.push(" AND created_at <= ").push_bind(end);
        }
    }
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

impl AuditSink for PostgresAuditLog {
    async fn write(&self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO audit_log ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
        ))
        .bind(entry.id)
        .bind(&entry.trace_id)
        .bind(entry.actor_id.map(|id| id.0))
        .bind(&entry.external_actor_id)
        .bind(&entry.client_ip)
        .bind(&entry.user_agent)
        .bind(&entry.module)
        .bind(&entry.operation)
        .bind(entry.audit_type.code())
        .bind(&entry.target_type)
        .bind(&entry.target_id)
        .bind(&entry.request_body)
        .bind(entry.result_code)
        .bind(&entry.result_msg)
        .bind(entry.duration_ms.and_then(|ms| i64::try_from(ms).ok()))
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_db_error("Failed to insert audit entry"))?;
        Ok(())
    }
}

impl AuditQueryStore for PostgresAuditLog {
    async fn query(&self, query: &AuditQuery) -> Result<Page<AuditEntry>> {
        let (page_no, page_size) = query.normalized_page();

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM audit_log");
        Self::push_filters(&mut count, query);
        let (total,): (i64,) = count
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error("Failed to count audit entries"))?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM audit_log"));
        Self::push_filters(&mut select, query);
        select
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(i64::from(page_size))
            .push(" OFFSET ")
            .push_bind(i64::try_from(query.offset()).unwrap_or(i64::MAX));
        let rows: Vec<AuditRow> = select
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error("Failed to query audit entries"))?;

        Ok(Page {
            items: rows.into_iter().map(AuditEntry::from).collect(),
            total: u64::try_from(total).unwrap_or(0),
            page_no,
            page_size,
        })
    }
}
