//! `PostgreSQL` credential repository.
//!
//! Tenant scoping is a SQL predicate: `CrossTenant` binds `NULL` and
//! matches every row, `Tenant(id)` restricts to that tenant.
//!
//! # Example
//!
//! ```no_run
//! use chronoflow_auth::stores::postgres::{migrate, PostgresCredentialRepository};
//! use sqlx::PgPool;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = PgPool::connect("postgresql://localhost/chronoflow").await?;
//! migrate(&pool).await?;
//! let repo = PostgresCredentialRepository::new(pool);
//! # Ok(())
//! # }
//! ```

use super::map_db_error;
use crate::context::TenantScope;
use crate::error::{AuthError, Result};
use crate::providers::CredentialRepository;
use crate::state::{AccountStatus, Credential, NewFederatedAccount, TenantId, UserId};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

const COLUMNS: &str = "id, tenant_id, username, email, name, password_hash, status, \
     external_id, mfa_secret, mfa_enabled, roles, last_login_at";

const STATUS_ENABLED: i16 = 0;
const STATUS_DISABLED: i16 = 1;

#[derive(sqlx::FromRow)]
struct CredentialRow {
    id: i64,
    tenant_id: i64,
    username: String,
    email: Option<String>,
    name: Option<String>,
    password_hash: Option<String>,
    status: i16,
    external_id: Option<String>,
    mfa_secret: Option<String>,
    mfa_enabled: bool,
    roles: Vec<String>,
    last_login_at: Option<DateTime<Utc>>,
}

impl From<CredentialRow> for Credential {
    fn from(row: CredentialRow) -> Self {
        Self {
            user_id: UserId(row.id),
            tenant_id: TenantId(row.tenant_id),
            username: row.username,
            email: row.email,
            name: row.name,
            password_hash: row.password_hash,
            status: if row.status == STATUS_ENABLED {
                AccountStatus::Enabled
            } else {
                AccountStatus::Disabled
            },
            external_id: row.external_id,
            mfa_secret: row.mfa_secret,
            mfa_enabled: row.mfa_enabled,
            roles: row.roles,
            last_login_at: row.last_login_at,
        }
    }
}

#[derive(Clone, Copy)]
enum Lookup<'a> {
    Username(&'a str),
    Id(UserId),
    Email(&'a str),
    ExternalId(&'a str),
}

impl Lookup<'_> {
    const fn predicate(self) -> &'static str {
        match self {
            Self::Username(_) => "username = $2",
            Self::Id(_) => "id = $2",
            Self::Email(_) => "LOWER(email) = LOWER($2)",
            Self::ExternalId(_) => "external_id = $2",
        }
    }
}

const fn tenant_filter(scope: TenantScope) -> Option<i64> {
    match scope {
        TenantScope::Tenant(tenant_id) => Some(tenant_id.0),
        TenantScope::CrossTenant => None,
    }
}

/// Credentials in `PostgreSQL`.
#[derive(Clone)]
pub struct PostgresCredentialRepository {
    pool: PgPool,
}

impl PostgresCredentialRepository {
    /// Wrap a connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Disable or re-enable an account.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn set_status(&self, user_id: UserId, status: AccountStatus) -> Result<()> {
        let code = match status {
            AccountStatus::Enabled => STATUS_ENABLED,
            AccountStatus::Disabled => STATUS_DISABLED,
        };
        sqlx::query("UPDATE users SET status = $2 WHERE id = $1")
            .bind(user_id.0)
            .bind(code)
            .execute(&self.pool)
            .await
            .map_err(map_db_error("Failed to update account status"))?;
        Ok(())
    }

    async fn find_one(&self, scope: TenantScope, lookup: Lookup<'_>) -> Result<Option<Credential>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM users WHERE {} AND ($1::BIGINT IS NULL OR tenant_id = $1)",
            lookup.predicate()
        );
        let query = sqlx::query_as::<_, CredentialRow>(&sql).bind(tenant_filter(scope));
        let query = match lookup {
            Lookup::Id(user_id) => query.bind(user_id.0),
            Lookup::Username(value) | Lookup::Email(value) | Lookup::ExternalId(value) => {
                query.bind(value)
            }
        };

        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error("Failed to load credential"))?;
        Ok(row.map(Credential::from))
    }
}

impl CredentialRepository for PostgresCredentialRepository {
    async fn find_by_username(&self, scope: TenantScope, username: &str) -> Result<Option<Credential>> {
        self.find_one(scope, Lookup::Username(username)).await
    }

    async fn find_by_id(&self, scope: TenantScope, user_id: UserId) -> Result<Option<Credential>> {
        self.find_one(scope, Lookup::Id(user_id)).await
    }

    async fn find_by_email(&self, scope: TenantScope, email: &str) -> Result<Option<Credential>> {
        self.find_one(scope, Lookup::Email(email)).await
    }

    async fn find_by_external_id(
        &self,
        scope: TenantScope,
        external_id: &str,
    ) -> Result<Option<Credential>> {
        self.find_one(scope, Lookup::ExternalId(external_id)).await
    }

    async fn create_federated(&self, account: NewFederatedAccount) -> Result<Credential> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(map_db_error("Failed to begin transaction"))?;

        let (tenant_id,): (i64,) =
            sqlx::query_as("INSERT INTO tenants (name) VALUES ($1) RETURNING id")
                .bind(&account.organization_name)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_db_error("Failed to create tenant"))?;

        let sql = format!(
            "INSERT INTO users (tenant_id, username, email, name, external_id, roles) \
             VALUES ($1, $2, $2, $3, $4, ARRAY[$5]) \
             RETURNING {COLUMNS}"
        );
        let row: CredentialRow = sqlx::query_as(&sql)
            .bind(tenant_id)
            .bind(&account.email)
            .bind(&account.name)
            .bind(&account.external_id)
            .bind(&account.role)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_db_error("Failed to create user"))?;

        tx.commit()
            .await
            .map_err(map_db_error("Failed to commit account creation"))?;
        Ok(row.into())
    }

    async fn link_external_id(&self, scope: TenantScope, user_id: UserId, external_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET external_id = $3 \
             WHERE id = $1 AND ($2::BIGINT IS NULL OR tenant_id = $2) \
               AND (external_id IS NULL OR external_id = $3)",
        )
        .bind(user_id.0)
        .bind(tenant_filter(scope))
        .bind(external_id)
        .execute(&self.pool)
        .await
        .map_err(map_db_error("Failed to link external id"))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.find_by_id(scope, user_id).await? {
            Some(_) => Err(AuthError::AccountLinkConflict),
            None => Err(AuthError::DatabaseError(format!("user {user_id} not found"))),
        }
    }

    async fn set_mfa(
        &self,
        scope: TenantScope,
        user_id: UserId,
        encrypted_secret: Option<String>,
        enabled: bool,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET mfa_secret = $3, mfa_enabled = $4 \
             WHERE id = $1 AND ($2::BIGINT IS NULL OR tenant_id = $2)",
        )
        .bind(user_id.0)
        .bind(tenant_filter(scope))
        .bind(encrypted_secret)
        .bind(enabled)
        .execute(&self.pool)
        .await
        .map_err(map_db_error("Failed to update MFA settings"))?;

        if result.rows_affected() == 0 {
            return Err(AuthError::DatabaseError(format!("user {user_id} not found")));
        }
        Ok(())
    }

    async fn record_login(&self, user_id: UserId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE users SET last_login_at = $2 WHERE id = $1")
            .bind(user_id.0)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(map_db_error("Failed to record login"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_filter() {
        assert_eq!(tenant_filter(TenantScope::CrossTenant), None);
        assert_eq!(tenant_filter(TenantScope::Tenant(TenantId(4))), Some(4));
    }

    #[tokio::test]
    #[ignore] // Requires PostgreSQL: DATABASE_URL=postgresql://localhost/chronoflow_test
    #[allow(clippy::unwrap_used)]
    async fn test_federated_account_lifecycle() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = PgPool::connect(&url).await.unwrap();
        super::super::migrate(&pool).await.unwrap();
        let repo = PostgresCredentialRepository::new(pool);

        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let email = format!("carol+{suffix}@acme.io");
        let created = repo
            .create_federated(NewFederatedAccount {
                external_id: format!("uid-{suffix}"),
                email: email.clone(),
                name: Some("Carol".into()),
                organization_name: "carol".into(),
                role: "organizer".into(),
            })
            .await
            .unwrap();
        assert!(created.is_enabled());

        let by_email = repo
            .find_by_email(TenantScope::CrossTenant, &email.to_uppercase())
            .await
            .unwrap();
        assert_eq!(by_email.map(|c| c.user_id), Some(created.user_id));

        let other_tenant = TenantScope::Tenant(TenantId(created.tenant_id.0 + 1));
        assert_eq!(repo.find_by_id(other_tenant, created.user_id).await.unwrap(), None);

        assert_eq!(
            repo.link_external_id(TenantScope::CrossTenant, created.user_id, "someone-else")
                .await,
            Err(AuthError::AccountLinkConflict)
        );

        repo.set_mfa(TenantScope::Tenant(created.tenant_id), created.user_id, Some("sealed".into()), true)
            .await
            .unwrap();
        let reloaded = repo
            .find_by_id(TenantScope::CrossTenant, created.user_id)
            .await
            .unwrap()
            .unwrap();
        assert!(reloaded.mfa_enabled);
    }
}
