/// In-memory storage
///
/// Keeps accounts and token records in hash maps behind an async mutex.
/// A transaction holds the mutex for its whole lifetime and works on a
/// copy of the state; `commit` swaps the copy in, dropping the transaction
/// throws it away. Transactions are therefore fully serialized, which is
/// the strongest isolation a real database could offer.
///
/// Unique indexes are enforced on both write paths, as a database would:
/// the validated path reports them as [`StoreError::Validation`], the
/// unchecked path as [`StoreError::Persistence`].
///
/// # Example
///
/// ```
/// use tokenward_core::store::memory::MemoryStorage;
/// use tokenward_core::store::{Storage, Transaction};
///
/// # async fn example() -> Result<(), tokenward_core::store::StoreError> {
/// let storage = MemoryStorage::new();
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
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    accounts: HashMap<Uuid, Account>,
    tokens: HashMap<Uuid, TokenRecord>,
}

impl MemoryState {
    fn account_conflicts(&self, account: &Account) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        let email = account.email.to_lowercase();

        for other in self.accounts.values().filter(|a| a.id != account.id) {
            if other.email.to_lowercase() == email {
                errors.add("email", "has already been taken");
            }
            if account.activation_token.is_some() && other.activation_token == account.activation_token {
                errors.add("activation_token", "has already been taken");
            }
            if account.auth_token.is_some() && other.auth_token == account.auth_token {
                errors.add("auth_token", "has already been taken");
            }
        }

        errors
    }

    fn token_conflicts(&self, record: &TokenRecord) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        for other in self.tokens.values().filter(|t| t.id != record.id) {
            if other.kind == record.kind && other.token == record.token {
                errors.add("token", "has already been taken");
            }
            if other.resource_id == record.resource_id
                && other.kind == record.kind
                && other.realm == record.realm
            {
                errors.add("realm", "has already been taken");
            }
        }

        errors
    }
}

/// In-memory [`Storage`]
///
/// Cheap to clone; clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an account directly, bypassing every check
    ///
    /// Meant for seeding fixtures, including deliberately invalid ones.
    pub async fn insert_account(&self, account: Account) {
        self.state.lock().await.accounts.insert(account.id, account);
    }

    /// Inserts a token record directly, bypassing every check
    pub async fn insert_token(&self, record: TokenRecord) {
        self.state.lock().await.tokens.insert(record.id, record);
    }

    /// Committed snapshot of an account
    pub async fn account(&self, id: Uuid) -> Option<Account> {
        self.state.lock().await.accounts.get(&id).cloned()
    }

    /// Committed snapshot of a token record
    pub async fn token(&self, id: Uuid) -> Option<TokenRecord> {
        self.state.lock().await.tokens.get(&id).cloned()
    }

    /// Committed snapshot of every token record owned by `resource_id`
    pub async fn tokens_for(&self, resource_id: Uuid) -> Vec<TokenRecord> {
        self.state
            .lock()
            .await
            .tokens
            .values()
            .filter(|t| t.resource_id == resource_id)
            .cloned()
            .collect()
    }
}

/// Transaction over [`MemoryStorage`]
pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl Storage for MemoryStorage {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(MemoryTx { guard, working })
    }
}

#[async_trait]
impl Transaction for MemoryTx {
    async fn commit(self) -> Result<(), StoreError> {
        let MemoryTx { mut guard, working } = self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl TokenIssuer for MemoryTx {
    async fn token_in_use(&mut self, scope: TokenScope, token: &str) -> Result<bool, StoreError> {
        let in_use = match scope {
            TokenScope::Record(kind) => self
                .working
                .tokens
                .values()
                .any(|t| t.kind == kind && t.token == token),
            TokenScope::Activation => self
                .working
                .accounts
                .values()
                .any(|a| a.activation_token.as_deref() == Some(token)),
            TokenScope::Authentication => self
                .working
                .accounts
                .values()
                .any(|a| a.auth_token.as_deref() == Some(token)),
        };
        Ok(in_use)
    }
}

#[async_trait]
impl ResourceStore<Account> for MemoryTx {
    async fn find_by_identifier(&mut self, identifier: &str) -> Result<Option<Account>, StoreError> {
        let wanted = identifier.to_lowercase();
        Ok(self
            .working
            .accounts
            .values()
            .find(|a| a.email.to_lowercase() == wanted)
            .cloned())
    }

    async fn persist_validated(&mut self, account: &Account) -> Result<(), StoreError> {
        let mut errors = match account.validate() {
            Ok(()) => ValidationErrors::new(),
            Err(errors) => errors,
        };
        errors.details.extend(self.working.account_conflicts(account).details);
        errors.into_result()?;

        self.working.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn persist_unchecked(&mut self, account: &Account) -> Result<(), StoreError> {
        let conflicts = self.working.account_conflicts(account);
        if !conflicts.is_empty() {
            return Err(StoreError::Persistence(format!(
                "unique constraint violated: {}",
                conflicts
            )));
        }

        self.working.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn activate_atomically(
        &mut self,
        resource_id: Uuid,
        activated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let account = self
            .working
            .accounts
            .get_mut(&resource_id)
            .ok_or_else(|| StoreError::Persistence(format!("account {} not found", resource_id)))?;

        account.activated_at = Some(activated_at);
        account.activation_token_expires_at = None;
        account.updated_at = activated_at;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for MemoryTx {
    async fn find_token(
        &mut self,
        kind: TokenKind,
        token: &str,
    ) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self
            .working
            .tokens
            .values()
            .find(|t| t.kind == kind && t.token == token)
            .cloned())
    }

    async fn find_token_for_realm(
        &mut self,
        resource_id: Uuid,
        kind: TokenKind,
        realm: &str,
    ) -> Result<Option<TokenRecord>, StoreError> {
        let realm = normalize_name(realm);
        Ok(self
            .working
            .tokens
            .values()
            .find(|t| t.resource_id == resource_id && t.kind == kind && t.realm == realm)
            .cloned())
    }

    async fn persist_token_validated(&mut self, record: &TokenRecord) -> Result<(), StoreError> {
        let record = record.normalized();

        let mut errors = match record.validate() {
            Ok(()) => ValidationErrors::new(),
            Err(errors) => errors,
        };
        if !record.resource_id.is_nil() && !self.working.accounts.contains_key(&record.resource_id) {
            errors.add("resource", "must exist");
        }
        errors.details.extend(self.working.token_conflicts(&record).details);
        errors.into_result()?;

        debug!(token_id = %record.id, kind = %record.kind, "Token record stored");
        self.working.tokens.insert(record.id, record);
        Ok(())
    }

    async fn persist_token_unchecked(&mut self, record: &TokenRecord) -> Result<(), StoreError> {
        let record = record.normalized();

        let conflicts = self.working.token_conflicts(&record);
        if !conflicts.is_empty() {
            return Err(StoreError::Persistence(format!(
                "unique constraint violated: {}",
                conflicts
            )));
        }

        self.working.tokens.insert(record.id, record);
        Ok(())
    }
}
