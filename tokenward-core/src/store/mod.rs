/// Storage collaborator
///
/// The protocols never talk to a database directly. They open a transaction
/// through [`Storage::begin`] and use the capability traits implemented by
/// the transaction type:
///
/// - [`TokenIssuer`]: "is this freshly generated token already taken?"
/// - [`ResourceStore`]: resource lookup, the two write paths and the atomic
///   activation write
/// - [`TokenStore`]: token record lookup and the two write paths
/// - [`Transaction`]: commit or roll back; dropping an uncommitted
///   transaction rolls it back
///
/// # Write paths
///
/// Every entity has two write methods instead of a `validate: bool` flag:
///
/// - `persist_validated`: field validation plus uniqueness checks, failures
///   reported as [`StoreError::Validation`]
/// - `persist_unchecked`: writes as-is; used by lifecycle transitions, which
///   are system-triggered and must not be blocked by unrelated invalid state
///
/// # Implementations
///
/// - [`memory::MemoryStorage`]: in-process, fully serialized transactions
/// - [`postgres::PgStorage`]: sqlx over PostgreSQL with row locks

pub mod memory;
pub mod postgres;

use crate::auth::policy::TokenKind;
use crate::auth::token::TokenGenerator;
use crate::error::ValidationErrors;
use crate::models::token::TokenRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A validated write was rejected
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// A write could not be applied (e.g. the target row is gone, or an
    /// unchecked write hit a unique constraint)
    #[error("Persistence failed: {0}")]
    Persistence(String),

    /// Database driver error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Uniqueness scope for a generated token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenScope {
    /// Token records of one kind
    Record(TokenKind),

    /// Activation tokens stored on resources
    Activation,

    /// Auth tokens stored on resources
    Authentication,
}

/// Answers whether a token value is already in use within a scope
#[async_trait]
pub trait TokenIssuer: Send {
    async fn token_in_use(&mut self, scope: TokenScope, token: &str) -> Result<bool, StoreError>;
}

/// Resource persistence
#[async_trait]
pub trait ResourceStore<R: Send + Sync + 'static>: TokenIssuer {
    /// Finds the resource whose identifier matches case-insensitively
    ///
    /// Implementations lock the row for the rest of the transaction.
    async fn find_by_identifier(&mut self, identifier: &str) -> Result<Option<R>, StoreError>;

    /// Inserts or updates after field validation and uniqueness checks
    async fn persist_validated(&mut self, resource: &R) -> Result<(), StoreError>;

    /// Inserts or updates without validation
    async fn persist_unchecked(&mut self, resource: &R) -> Result<(), StoreError>;

    /// Sets `activated_at` and clears the activation expiry in one write
    ///
    /// # Errors
    ///
    /// `StoreError::Persistence` if the resource does not exist.
    async fn activate_atomically(
        &mut self,
        resource_id: Uuid,
        activated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Token record persistence
#[async_trait]
pub trait TokenStore: TokenIssuer {
    async fn find_token(
        &mut self,
        kind: TokenKind,
        token: &str,
    ) -> Result<Option<TokenRecord>, StoreError>;

    /// `realm` is normalized before the lookup
    async fn find_token_for_realm(
        &mut self,
        resource_id: Uuid,
        kind: TokenKind,
        realm: &str,
    ) -> Result<Option<TokenRecord>, StoreError>;

    /// Inserts or updates after field validation and uniqueness checks
    async fn persist_token_validated(&mut self, record: &TokenRecord) -> Result<(), StoreError>;

    /// Inserts or updates without validation
    async fn persist_token_unchecked(&mut self, record: &TokenRecord) -> Result<(), StoreError>;
}

/// Unit of work opened by [`Storage::begin`]
#[async_trait]
pub trait Transaction: Send + Sized {
    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Entry point of the storage collaborator
#[async_trait]
pub trait Storage: Send + Sync {
    type Tx: Transaction + TokenIssuer;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

/// Generates tokens until one is unused within `scope`
///
/// Collisions are astronomically unlikely with 256-bit tokens, so this
/// retries instead of locking. A collision is still logged.
pub async fn issue_unique_token<I>(
    issuer: &mut I,
    scope: TokenScope,
    generator: &TokenGenerator,
) -> Result<String, StoreError>
where
    I: TokenIssuer + ?Sized,
{
    let mut collisions: u32 = 0;

    loop {
        let token = generator.generate();
        if !issuer.token_in_use(scope, &token).await? {
            if collisions > 0 {
                debug!(?scope, collisions, "Unique token found after collisions");
            }
            return Ok(token);
        }

        collisions += 1;
        warn!(?scope, collisions, "Generated token already in use, retrying");
    }
}
