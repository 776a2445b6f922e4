/// PostgreSQL storage
///
/// Backs the storage traits with sqlx. Each [`PgTx`] wraps one database
/// transaction; lookups used by the protocols take `FOR UPDATE` row locks so
/// that two concurrent activations or token refreshes of the same row are
/// serialized by the database.
///
/// Uniqueness is enforced by the indexes created in `migrations/`. A unique
/// violation is reported as [`StoreError::Validation`] on the validated write
/// path and as [`StoreError::Persistence`] on the unchecked one. PostgreSQL
/// aborts the transaction after a failed statement, so the caller has to
/// roll back either way.
///
/// # Example
///
/// ```no_run
/// use tokenward_core::db::pool::{create_pool, DatabaseConfig};
/// use tokenward_core::store::postgres::PgStorage;
/// use tokenward_core::store::{Storage, Transaction};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::default()).await?;
/// let storage = PgStorage::new(pool);
///
/// let tx = storage.begin().await?;
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```

use super::{ResourceStore, Storage, StoreError, TokenIssuer, TokenScope, TokenStore, Transaction};
use crate::auth::policy::{normalize_name, TokenKind};
use crate::error::ValidationErrors;
use crate::models::account::Account;
use crate::models::token::TokenRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use tracing::debug;
use uuid::Uuid;

const ACCOUNT_COLUMNS: &str = "id, email, password_hash, auth_token, auth_token_expires_at, \
     activation_token, activation_token_expires_at, activated_at, created_at, updated_at";

const TOKEN_COLUMNS: &str =
    "id, kind, resource_id, realm, token, expires_at, confirmed_at, created_at, updated_at";

/// Field a named constraint protects
fn constraint_field(constraint: &str) -> &'static str {
    match constraint {
        "accounts_email_lower_idx" => "email",
        "accounts_activation_token_idx" => "activation_token",
        "accounts_auth_token_idx" => "auth_token",
        "accounts_activation_state" => "activated_at",
        "tokens_kind_token_key" => "token",
        "tokens_resource_kind_realm_key" => "realm",
        "tokens_resource_id_fkey" => "resource",
        _ => "base",
    }
}

/// Translates constraint violations raised by a validated write
fn validation_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        let field = constraint_field(db_err.constraint().unwrap_or_default());

        if db_err.is_unique_violation() {
            return ValidationErrors::single(field, "has already been taken").into();
        }
        if db_err.is_foreign_key_violation() {
            return ValidationErrors::single(field, "must exist").into();
        }
        if db_err.is_check_violation() {
            return ValidationErrors::single(field, "is invalid").into();
        }
    }
    StoreError::Database(err)
}

/// Translates constraint violations raised by an unchecked write
fn persistence_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation()
            || db_err.is_foreign_key_violation()
            || db_err.is_check_violation()
        {
            return StoreError::Persistence(format!(
                "constraint {} violated",
                db_err.constraint().unwrap_or("unknown")
            ));
        }
    }
    StoreError::Database(err)
}

/// PostgreSQL-backed [`Storage`]
#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Transaction over [`PgStorage`]
///
/// Dropping it without calling `commit` rolls the database transaction back.
pub struct PgTx {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl PgTx {
    async fn write_account(&mut self, account: &Account) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, email, password_hash, auth_token, auth_token_expires_at,
                                  activation_token, activation_token_expires_at, activated_at,
                                  created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                email = EXCLUDED.email,
                password_hash = EXCLUDED.password_hash,
                auth_token = EXCLUDED.auth_token,
                auth_token_expires_at = EXCLUDED.auth_token_expires_at,
                activation_token = EXCLUDED.activation_token,
                activation_token_expires_at = EXCLUDED.activation_token_expires_at,
                activated_at = EXCLUDED.activated_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(account.id)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(&account.auth_token)
        .bind(account.auth_token_expires_at)
        .bind(&account.activation_token)
        .bind(account.activation_token_expires_at)
        .bind(account.activated_at)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn write_token(&mut self, record: &TokenRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO tokens (id, kind, resource_id, realm, token, expires_at, confirmed_at,
                                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                realm = EXCLUDED.realm,
                token = EXCLUDED.token,
                expires_at = EXCLUDED.expires_at,
                confirmed_at = EXCLUDED.confirmed_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(record.id)
        .bind(record.kind)
        .bind(record.resource_id)
        .bind(&record.realm)
        .bind(&record.token)
        .bind(record.expires_at)
        .bind(record.confirmed_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Storage for PgStorage {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(PgTx { tx })
    }
}

#[async_trait]
impl Transaction for PgTx {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl TokenIssuer for PgTx {
    async fn token_in_use(&mut self, scope: TokenScope, token: &str) -> Result<bool, StoreError> {
        let exists: bool = match scope {
            TokenScope::Record(kind) => {
                sqlx::query_scalar(
                    "SELECT EXISTS(SELECT 1 FROM tokens WHERE kind = $1 AND token = $2)",
                )
                .bind(kind)
                .bind(token)
                .fetch_one(&mut *self.tx)
                .await?
            }
            TokenScope::Activation => {
                sqlx::query_scalar(
                    "SELECT EXISTS(SELECT 1 FROM accounts WHERE activation_token = $1)",
                )
                .bind(token)
                .fetch_one(&mut *self.tx)
                .await?
            }
            TokenScope::Authentication => {
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM accounts WHERE auth_token = $1)")
                    .bind(token)
                    .fetch_one(&mut *self.tx)
                    .await?
            }
        };

        Ok(exists)
    }
}

#[async_trait]
impl ResourceStore<Account> for PgTx {
    async fn find_by_identifier(&mut self, identifier: &str) -> Result<Option<Account>, StoreError> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM accounts WHERE LOWER(email) = LOWER($1) FOR UPDATE",
            ACCOUNT_COLUMNS
        ))
        .bind(identifier)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(account)
    }

    async fn persist_validated(&mut self, account: &Account) -> Result<(), StoreError> {
        account.validate()?;
        self.write_account(account).await.map_err(validation_error)
    }

    async fn persist_unchecked(&mut self, account: &Account) -> Result<(), StoreError> {
        self.write_account(account).await.map_err(persistence_error)
    }

    async fn activate_atomically(
        &mut self,
        resource_id: Uuid,
        activated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET activated_at = $2, activation_token_expires_at = NULL, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(resource_id)
        .bind(activated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(persistence_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Persistence(format!(
                "account {} not found",
                resource_id
            )));
        }

        debug!(resource_id = %resource_id, "Activation written");
        Ok(())
    }
}

#[async_trait]
impl TokenStore for PgTx {
    async fn find_token(
        &mut self,
        kind: TokenKind,
        token: &str,
    ) -> Result<Option<TokenRecord>, StoreError> {
        let record = sqlx::query_as::<_, TokenRecord>(&format!(
            "SELECT {} FROM tokens WHERE kind = $1 AND token = $2 FOR UPDATE",
            TOKEN_COLUMNS
        ))
        .bind(kind)
        .bind(token)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(record)
    }

    async fn find_token_for_realm(
        &mut self,
        resource_id: Uuid,
        kind: TokenKind,
        realm: &str,
    ) -> Result<Option<TokenRecord>, StoreError> {
        let record = sqlx::query_as::<_, TokenRecord>(&format!(
            "SELECT {} FROM tokens WHERE resource_id = $1 AND kind = $2 AND realm = $3 FOR UPDATE",
            TOKEN_COLUMNS
        ))
        .bind(resource_id)
        .bind(kind)
        .bind(normalize_name(realm))
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(record)
    }

    async fn persist_token_validated(&mut self, record: &TokenRecord) -> Result<(), StoreError> {
        let record = record.normalized();
        record.validate()?;
        self.write_token(&record).await.map_err(validation_error)
    }

    async fn persist_token_unchecked(&mut self, record: &TokenRecord) -> Result<(), StoreError> {
        let record = record.normalized();
        self.write_token(&record).await.map_err(persistence_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_field_mapping() {
        assert_eq!(constraint_field("accounts_email_lower_idx"), "email");
        assert_eq!(constraint_field("tokens_kind_token_key"), "token");
        assert_eq!(constraint_field("tokens_resource_kind_realm_key"), "realm");
        assert_eq!(constraint_field("tokens_resource_id_fkey"), "resource");
        assert_eq!(constraint_field("something_else"), "base");
    }

    #[test]
    fn test_non_database_errors_pass_through() {
        assert!(matches!(
            validation_error(sqlx::Error::RowNotFound),
            StoreError::Database(_)
        ));
        assert!(matches!(
            persistence_error(sqlx::Error::PoolTimedOut),
            StoreError::Database(_)
        ));
    }
}
