//! `PostgreSQL` storage.
//!
//! - [`PostgresCredentialRepository`]: `tenants` and `users`
//! - [`PostgresAuditLog`]: append-only `audit_log`
//!
//! Schema lives in `auth/migrations`; run [`migrate`] once at startup.

use crate::error::{AuthError, Result};
use sqlx::PgPool;

pub mod audit;
pub mod credential;

pub use audit::PostgresAuditLog;
pub use credential::PostgresCredentialRepository;

/// Apply the bundled migrations.
///
/// # Errors
///
/// Returns error if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| AuthError::DatabaseError(format!("Migration failed: {e}")))
}

/// Map a sqlx error, reporting unique violations as link conflicts.
pub(crate) fn map_db_error(step: &'static str) -> impl Fn(sqlx::Error) -> AuthError {
    move |e| {
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.is_unique_violation() {
                return AuthError::AccountLinkConflict;
            }
        }
        AuthError::DatabaseError(format!("{step}: {e}"))
    }
}
