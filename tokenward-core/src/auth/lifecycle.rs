/// Token record lifecycle
///
/// A record moves through three observable states:
///
/// ```text
///            issue
///              │
///              ▼
///        ┌───────────┐   expire / time passes   ┌─────────────┐
///        │  issued   │ ───────────────────────▶ │   expired   │
///        │  (valid)  │ ◀─────────────────────── │             │
///        └───────────┘     refresh / reset      └─────────────┘
///              │
///              │ confirm
///              ▼
///        ┌───────────┐
///        │ confirmed │
///        └───────────┘
/// ```
///
/// `refresh`, `reset`, `confirm` and `expire` come in two flavours: the
/// plain one changes the record in memory, the `_persisted` one also writes
/// it through the unchecked path. Transitions are system-triggered, so they
/// are never blocked by validation.

use crate::auth::policy::{normalize_name, TokenKind, TokenPolicy};
use crate::auth::token::TokenGenerator;
use crate::clock::{Clock, SystemClock};
use crate::error::AuthError;
use crate::models::token::{NewToken, TokenRecord};
use crate::store::{
    issue_unique_token, Storage, StoreError, TokenScope, TokenStore, Transaction,
};
use chrono::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const MAX_ISSUE_ATTEMPTS: u32 = 3;

/// True when a validated write failed only because the token value is taken
fn is_token_taken(err: &StoreError) -> bool {
    match err {
        StoreError::Validation(errors) => {
            !errors.details.is_empty() && errors.details.iter().all(|e| e.field == "token")
        }
        _ => false,
    }
}

/// Issues token records and drives their state transitions
pub struct TokenLifecycle<S, C = SystemClock> {
    storage: S,
    policy: TokenPolicy,
    generator: TokenGenerator,
    clock: C,
}

impl<S> TokenLifecycle<S, SystemClock>
where
    S: Storage,
    S::Tx: TokenStore,
{
    pub fn new(storage: S, policy: TokenPolicy) -> Self {
        Self::with_clock(storage, policy, SystemClock)
    }
}

impl<S, C> TokenLifecycle<S, C>
where
    S: Storage,
    S::Tx: TokenStore,
    C: Clock,
{
    pub fn with_clock(storage: S, policy: TokenPolicy, clock: C) -> Self {
        Self {
            storage,
            policy,
            generator: TokenGenerator::new(),
            clock,
        }
    }

    pub fn policy(&self) -> &TokenPolicy {
        &self.policy
    }

    /// Issues a new token record
    ///
    /// The token is unique within its kind and expires after the kind's TTL.
    /// The record goes through the validated write path, so an unknown
    /// resource or a realm already holding a token of this kind is rejected.
    ///
    /// # Errors
    ///
    /// `AuthError::Store(StoreError::Validation(_))` when the record is rejected.
    pub async fn issue(&self, request: NewToken) -> Result<TokenRecord, AuthError> {
        let realm = normalize_name(&request.realm);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let mut tx = self.storage.begin().await?;

            let token =
                issue_unique_token(&mut tx, TokenScope::Record(request.kind), &self.generator)
                    .await?;
            let now = self.clock.now();

            let record = TokenRecord {
                id: Uuid::new_v4(),
                kind: request.kind,
                resource_id: request.resource_id,
                realm: realm.clone(),
                token,
                expires_at: now + self.policy.ttl_for(request.kind),
                confirmed_at: None,
                created_at: now,
                updated_at: now,
            };

            match tx.persist_token_validated(&record).await {
                Ok(()) => {
                    tx.commit().await?;

                    info!(
                        token_id = %record.id,
                        resource_id = %record.resource_id,
                        kind = %record.kind,
                        realm = %record.realm,
                        "Token issued"
                    );

                    return Ok(record);
                }
                // Another writer took the token between the check and the insert
                Err(err) if attempt < MAX_ISSUE_ATTEMPTS && is_token_taken(&err) => {
                    tx.rollback().await?;
                    warn!(kind = %record.kind, attempt, "Issued token taken concurrently, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Finds a record by kind and token value
    pub async fn find(&self, kind: TokenKind, token: &str) -> Result<Option<TokenRecord>, AuthError> {
        let mut tx = self.storage.begin().await?;
        let record = tx.find_token(kind, token).await?;
        tx.commit().await?;
        Ok(record)
    }

    /// Finds the record a resource holds for `kind` in `realm`
    pub async fn find_for_realm(
        &self,
        resource_id: Uuid,
        kind: TokenKind,
        realm: &str,
    ) -> Result<Option<TokenRecord>, AuthError> {
        let mut tx = self.storage.begin().await?;
        let record = tx.find_token_for_realm(resource_id, kind, realm).await?;
        tx.commit().await?;
        Ok(record)
    }

    /// Pushes the expiry out by the kind's TTL, keeping the token
    pub fn refresh(&self, record: &mut TokenRecord) {
        let now = self.clock.now();
        record.expires_at = now + self.policy.ttl_for(record.kind);
        record.updated_at = now;
    }

    pub async fn refresh_persisted(&self, record: &mut TokenRecord) -> Result<(), AuthError> {
        self.refresh(record);
        self.write_unchecked(record).await?;
        debug!(token_id = %record.id, kind = %record.kind, "Token refreshed");
        Ok(())
    }

    /// Replaces the token with a fresh unique one and refreshes the expiry
    ///
    /// Storage is only consulted for uniqueness; nothing is written.
    pub async fn reset(&self, record: &mut TokenRecord) -> Result<(), AuthError> {
        let mut tx = self.storage.begin().await?;
        self.assign_fresh_token(&mut tx, record).await?;
        tx.rollback().await?;
        Ok(())
    }

    pub async fn reset_persisted(&self, record: &mut TokenRecord) -> Result<(), AuthError> {
        let mut tx = self.storage.begin().await?;
        self.assign_fresh_token(&mut tx, record).await?;
        tx.persist_token_unchecked(record).await?;
        tx.commit().await?;

        info!(token_id = %record.id, kind = %record.kind, "Token reset");
        Ok(())
    }

    /// Marks the record confirmed; a second call leaves `confirmed_at` alone
    ///
    /// Returns whether the record changed.
    pub fn confirm(&self, record: &mut TokenRecord) -> bool {
        if self.is_confirmed(record) {
            return false;
        }
        let now = self.clock.now();
        record.confirmed_at = Some(now);
        record.updated_at = now;
        true
    }

    pub async fn confirm_persisted(&self, record: &mut TokenRecord) -> Result<bool, AuthError> {
        let changed = self.confirm(record);
        if changed {
            self.write_unchecked(record).await?;
            info!(token_id = %record.id, kind = %record.kind, "Token confirmed");
        }
        Ok(changed)
    }

    /// Moves the expiry one second into the past; an expired record is left alone
    ///
    /// Returns whether the record changed.
    pub fn expire(&self, record: &mut TokenRecord) -> bool {
        if self.is_expired(record) {
            return false;
        }
        let now = self.clock.now();
        record.expires_at = now - Duration::seconds(1);
        record.updated_at = now;
        true
    }

    pub async fn expire_persisted(&self, record: &mut TokenRecord) -> Result<bool, AuthError> {
        let changed = self.expire(record);
        if changed {
            self.write_unchecked(record).await?;
            info!(token_id = %record.id, kind = %record.kind, "Token expired");
        }
        Ok(changed)
    }

    /// Expired strictly after `expires_at`
    pub fn is_expired(&self, record: &TokenRecord) -> bool {
        self.clock.now() > record.expires_at
    }

    pub fn is_confirmed(&self, record: &TokenRecord) -> bool {
        record.confirmed_at.is_some()
    }

    async fn assign_fresh_token(
        &self,
        tx: &mut S::Tx,
        record: &mut TokenRecord,
    ) -> Result<(), AuthError> {
        let token = issue_unique_token(tx, TokenScope::Record(record.kind), &self.generator).await?;
        record.token = token;
        self.refresh(record);
        Ok(())
    }

    async fn write_unchecked(&self, record: &TokenRecord) -> Result<(), AuthError> {
        let mut tx = self.storage.begin().await?;
        tx.persist_token_unchecked(record).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use crate::models::account::Account;
    use crate::error::ValidationErrors;
    use crate::store::memory::{MemoryStorage, MemoryTx};
    use crate::store::TokenIssuer;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn account() -> Account {
        let now = Utc::now();
        Account {
            id: Uuid::new_v4(),
            email: "foobar@baz.com".to_string(),
            password_hash: "$argon2id$placeholder".to_string(),
            auth_token: None,
            auth_token_expires_at: None,
            activation_token: None,
            activation_token_expires_at: None,
            activated_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    async fn setup() -> (TokenLifecycle<MemoryStorage, SimulatedClock>, MemoryStorage, SimulatedClock, Uuid) {
        let storage = MemoryStorage::new();
        let clock = SimulatedClock::from_recent();
        let owner = account();
        storage.insert_account(owner.clone()).await;

        let lifecycle = TokenLifecycle::with_clock(storage.clone(), TokenPolicy::default(), clock.clone());
        (lifecycle, storage, clock, owner.id)
    }

    fn request(resource_id: Uuid, kind: TokenKind, realm: &str) -> NewToken {
        NewToken {
            resource_id,
            kind,
            realm: realm.to_string(),
        }
    }

    #[tokio::test]
    async fn test_issue_sets_expiry_from_policy() {
        let (lifecycle, storage, clock, owner) = setup().await;

        let record = lifecycle
            .issue(request(owner, TokenKind::PasswordReset, "Web"))
            .await
            .unwrap();

        assert_eq!(record.realm, "web");
        assert_eq!(record.expires_at, clock.now() + Duration::hours(1));
        assert!(record.confirmed_at.is_none());
        assert_eq!(storage.token(record.id).await, Some(record));
    }

    #[tokio::test]
    async fn test_issue_rejects_second_token_in_same_realm() {
        let (lifecycle, _storage, _clock, owner) = setup().await;

        lifecycle
            .issue(request(owner, TokenKind::Session, "mobile_app"))
            .await
            .unwrap();
        let err = lifecycle
            .issue(request(owner, TokenKind::Session, "MobileApp"))
            .await
            .unwrap_err();

        let errors = err.validation_errors().expect("validation failure");
        assert_eq!(errors.messages_for("realm"), vec!["has already been taken"]);
    }

    #[tokio::test]
    async fn test_issue_rejects_unknown_resource() {
        let (lifecycle, _storage, _clock, _owner) = setup().await;

        let err = lifecycle
            .issue(request(Uuid::new_v4(), TokenKind::Session, "web"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Store(StoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_same_realm_different_kind_allowed() {
        let (lifecycle, _storage, _clock, owner) = setup().await;

        lifecycle.issue(request(owner, TokenKind::Session, "web")).await.unwrap();
        lifecycle
            .issue(request(owner, TokenKind::PasswordReset, "web"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_expiry_boundary() {
        let (lifecycle, _storage, clock, owner) = setup().await;
        let record = lifecycle.issue(request(owner, TokenKind::Session, "web")).await.unwrap();

        assert!(!lifecycle.is_expired(&record));
        clock.advance(Duration::days(1));
        // exactly at expires_at is still valid
        assert!(!lifecycle.is_expired(&record));
        clock.advance(Duration::seconds(1));
        assert!(lifecycle.is_expired(&record));
    }

    #[tokio::test]
    async fn test_refresh_keeps_token() {
        let (lifecycle, storage, clock, owner) = setup().await;
        let mut record = lifecycle.issue(request(owner, TokenKind::Session, "web")).await.unwrap();
        let token = record.token.clone();

        clock.advance(Duration::hours(30));
        assert!(lifecycle.is_expired(&record));

        lifecycle.refresh_persisted(&mut record).await.unwrap();
        assert_eq!(record.token, token);
        assert_eq!(record.expires_at, clock.now() + Duration::days(1));
        assert!(!lifecycle.is_expired(&record));

        assert_eq!(storage.token(record.id).await.unwrap().expires_at, record.expires_at);
    }

    #[tokio::test]
    async fn test_reset_changes_token_and_expiry() {
        let (lifecycle, storage, clock, owner) = setup().await;
        let mut record = lifecycle.issue(request(owner, TokenKind::Session, "web")).await.unwrap();
        let before = record.clone();

        clock.advance(Duration::minutes(5));
        lifecycle.reset(&mut record).await.unwrap();

        assert_ne!(record.token, before.token);
        assert_ne!(record.expires_at, before.expires_at);
        // in-memory only
        assert_eq!(storage.token(record.id).await, Some(before));
    }

    #[tokio::test]
    async fn test_reset_persisted_writes() {
        let (lifecycle, storage, clock, owner) = setup().await;
        let mut record = lifecycle.issue(request(owner, TokenKind::Session, "web")).await.unwrap();

        clock.advance(Duration::minutes(5));
        lifecycle.reset_persisted(&mut record).await.unwrap();

        let stored = storage.token(record.id).await.unwrap();
        assert_eq!(stored.token, record.token);
        assert_eq!(stored.expires_at, record.expires_at);
    }

    #[tokio::test]
    async fn test_confirm_is_idempotent() {
        let (lifecycle, storage, clock, owner) = setup().await;
        let mut record = lifecycle.issue(request(owner, TokenKind::Activation, "web")).await.unwrap();

        assert!(lifecycle.confirm_persisted(&mut record).await.unwrap());
        let confirmed_at = record.confirmed_at;
        assert!(lifecycle.is_confirmed(&record));

        clock.advance(Duration::minutes(1));
        assert!(!lifecycle.confirm_persisted(&mut record).await.unwrap());
        assert_eq!(record.confirmed_at, confirmed_at);
        assert_eq!(storage.token(record.id).await.unwrap().confirmed_at, confirmed_at);
    }

    #[tokio::test]
    async fn test_expire_is_idempotent() {
        let (lifecycle, storage, clock, owner) = setup().await;
        let mut record = lifecycle.issue(request(owner, TokenKind::Session, "web")).await.unwrap();

        assert!(lifecycle.expire_persisted(&mut record).await.unwrap());
        assert!(lifecycle.is_expired(&record));
        let expires_at = record.expires_at;
        assert_eq!(expires_at, clock.now() - Duration::seconds(1));

        clock.advance(Duration::minutes(1));
        assert!(!lifecycle.expire(&mut record));
        assert_eq!(record.expires_at, expires_at);
        assert_eq!(storage.token(record.id).await.unwrap().expires_at, expires_at);
    }

    #[tokio::test]
    async fn test_find_and_find_for_realm() {
        let (lifecycle, _storage, _clock, owner) = setup().await;
        let record = lifecycle
            .issue(request(owner, TokenKind::PasswordReset, "mobile-app"))
            .await
            .unwrap();

        let by_token = lifecycle.find(TokenKind::PasswordReset, &record.token).await.unwrap();
        assert_eq!(by_token.as_ref().map(|r| r.id), Some(record.id));

        let wrong_kind = lifecycle.find(TokenKind::Session, &record.token).await.unwrap();
        assert!(wrong_kind.is_none());

        let by_realm = lifecycle
            .find_for_realm(owner, TokenKind::PasswordReset, "MobileApp")
            .await
            .unwrap();
        assert_eq!(by_realm.map(|r| r.id), Some(record.id));
    }

    /// Memory storage whose first `races` token writes lose to another writer
    #[derive(Clone)]
    struct RacingStorage {
        inner: MemoryStorage,
        races: Arc<AtomicUsize>,
    }

    struct RacingTx {
        inner: MemoryTx,
        races: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Storage for RacingStorage {
        type Tx = RacingTx;

        async fn begin(&self) -> Result<RacingTx, StoreError> {
            Ok(RacingTx {
                inner: self.inner.begin().await?,
                races: Arc::clone(&self.races),
            })
        }
    }

    #[async_trait]
    impl Transaction for RacingTx {
        async fn commit(self) -> Result<(), StoreError> {
            self.inner.commit().await
        }

        async fn rollback(self) -> Result<(), StoreError> {
            self.inner.rollback().await
        }
    }

    #[async_trait]
    impl TokenIssuer for RacingTx {
        async fn token_in_use(&mut self, scope: TokenScope, token: &str) -> Result<bool, StoreError> {
            self.inner.token_in_use(scope, token).await
        }
    }

    #[async_trait]
    impl TokenStore for RacingTx {
        async fn find_token(
            &mut self,
            kind: TokenKind,
            token: &str,
        ) -> Result<Option<TokenRecord>, StoreError> {
            self.inner.find_token(kind, token).await
        }

        async fn find_token_for_realm(
            &mut self,
            resource_id: Uuid,
            kind: TokenKind,
            realm: &str,
        ) -> Result<Option<TokenRecord>, StoreError> {
            self.inner.find_token_for_realm(resource_id, kind, realm).await
        }

        async fn persist_token_validated(&mut self, record: &TokenRecord) -> Result<(), StoreError> {
            let lost = self
                .races
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if lost {
                return Err(ValidationErrors::single("token", "has already been taken").into());
            }
            self.inner.persist_token_validated(record).await
        }

        async fn persist_token_unchecked(&mut self, record: &TokenRecord) -> Result<(), StoreError> {
            self.inner.persist_token_unchecked(record).await
        }
    }

    async fn racing_setup(races: usize) -> (TokenLifecycle<RacingStorage, SimulatedClock>, MemoryStorage, Arc<AtomicUsize>, Uuid) {
        let storage = MemoryStorage::new();
        let owner = account();
        storage.insert_account(owner.clone()).await;

        let races = Arc::new(AtomicUsize::new(races));
        let racing = RacingStorage {
            inner: storage.clone(),
            races: Arc::clone(&races),
        };
        let lifecycle = TokenLifecycle::with_clock(racing, TokenPolicy::default(), SimulatedClock::from_recent());
        (lifecycle, storage, races, owner.id)
    }

    #[tokio::test]
    async fn test_issue_retries_when_token_taken_concurrently() {
        let (lifecycle, storage, races, owner) = racing_setup(2).await;

        let record = lifecycle
            .issue(request(owner, TokenKind::Session, "web"))
            .await
            .unwrap();

        assert_eq!(races.load(Ordering::SeqCst), 0);
        assert_eq!(storage.tokens_for(owner).await, vec![record]);
    }

    #[tokio::test]
    async fn test_issue_gives_up_after_repeated_token_races() {
        let (lifecycle, storage, races, owner) = racing_setup(10).await;

        let err = lifecycle
            .issue(request(owner, TokenKind::Session, "web"))
            .await
            .unwrap_err();

        let details = err.validation_errors().expect("validation errors");
        assert_eq!(details.messages_for("token"), vec!["has already been taken"]);
        assert_eq!(races.load(Ordering::SeqCst), 10 - MAX_ISSUE_ATTEMPTS as usize);
        assert!(storage.tokens_for(owner).await.is_empty());
    }

    #[test]
    fn test_only_token_conflicts_are_retried() {
        let taken: StoreError = ValidationErrors::single("token", "has already been taken").into();
        assert!(is_token_taken(&taken));

        let mut mixed = ValidationErrors::single("token", "has already been taken");
        mixed.add("realm", "has already been taken");
        assert!(!is_token_taken(&StoreError::Validation(mixed)));

        let missing: StoreError = ValidationErrors::single("resource_id", "must exist").into();
        assert!(!is_token_taken(&missing));
        assert!(!is_token_taken(&StoreError::Persistence("boom".to_string())));
    }
}
