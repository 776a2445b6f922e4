/// Resource activation
///
/// A resource starts *pending* (activation token plus expiry) and becomes
/// *activated* exactly once. Activation is terminal: afterwards the expiry
/// is gone, so every later attempt reports the token as expired.
///
/// ```text
///   enroll / create_activation_token        find_and_activate
///   ───────────────────────────────▶ pending ─────────────────▶ activated
/// ```
///
/// `find_and_activate` returns `Ok(false)` for an unknown identifier, an
/// expired token and a wrong token alike; only infrastructure and callback
/// failures are errors.

use crate::auth::policy::TokenPolicy;
use crate::auth::token::{secure_compare, TokenGenerator};
use crate::clock::{Clock, SystemClock};
use crate::error::AuthError;
use crate::models::resource::Activatable;
use crate::store::{issue_unique_token, ResourceStore, Storage, TokenScope, Transaction};
use chrono::{DateTime, Utc};
use std::marker::PhantomData;
use tracing::{debug, info};

/// Activation flow for resources of type `R`
pub struct ActivationProtocol<R, S, C = SystemClock> {
    storage: S,
    policy: TokenPolicy,
    generator: TokenGenerator,
    clock: C,
    _resource: PhantomData<fn() -> R>,
}

impl<R, S> ActivationProtocol<R, S, SystemClock>
where
    R: Activatable,
    S: Storage,
    S::Tx: ResourceStore<R>,
{
    pub fn new(storage: S, policy: TokenPolicy) -> Self {
        Self::with_clock(storage, policy, SystemClock)
    }
}

impl<R, S, C> ActivationProtocol<R, S, C>
where
    R: Activatable,
    S: Storage,
    S::Tx: ResourceStore<R>,
    C: Clock,
{
    pub fn with_clock(storage: S, policy: TokenPolicy, clock: C) -> Self {
        Self {
            storage,
            policy,
            generator: TokenGenerator::new(),
            clock,
            _resource: PhantomData,
        }
    }

    /// Gives the resource a fresh activation token without saving it
    ///
    /// The token is unique across every resource's activation token. The
    /// expiry defaults to now plus the policy's activation TTL.
    pub async fn create_activation_token(
        &self,
        resource: &mut R,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), AuthError> {
        let mut tx = self.storage.begin().await?;
        self.assign_token(&mut tx, resource, expires_at).await?;
        tx.rollback().await?;
        Ok(())
    }

    /// Same as [`create_activation_token`](Self::create_activation_token),
    /// then writes the resource without validation
    pub async fn create_activation_token_persisted(
        &self,
        resource: &mut R,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), AuthError> {
        let mut tx = self.storage.begin().await?;
        self.assign_token(&mut tx, resource, expires_at).await?;
        tx.persist_unchecked(resource).await?;
        tx.commit().await?;

        info!(resource_id = %resource.resource_id(), "Activation token created");
        Ok(())
    }

    /// Registers a new resource in the pending state
    ///
    /// Assigns an activation token and saves through the validated write
    /// path, so a taken identifier or a malformed resource is rejected and
    /// nothing is written.
    ///
    /// # Errors
    ///
    /// `AuthError::Store(StoreError::Validation(_))` when the resource is rejected.
    pub async fn enroll(
        &self,
        resource: &mut R,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), AuthError> {
        let mut tx = self.storage.begin().await?;
        self.assign_token(&mut tx, resource, expires_at).await?;
        tx.persist_validated(resource).await?;
        tx.commit().await?;

        info!(resource_id = %resource.resource_id(), "Resource enrolled");
        Ok(())
    }

    /// True when the expiry is absent or not in the future
    pub fn is_activation_expired(&self, resource: &R) -> bool {
        resource.is_activation_expired_at(self.clock.now())
    }

    pub fn is_activated(&self, resource: &R) -> bool {
        resource.is_activated()
    }

    /// Activates the resource in one storage write
    ///
    /// Sets `activated_at` and clears the activation expiry together,
    /// bypassing validation. The in-memory resource is updated after the
    /// write commits.
    pub async fn activate(&self, resource: &mut R) -> Result<(), AuthError> {
        let now = self.clock.now();

        let mut tx = self.storage.begin().await?;
        tx.activate_atomically(resource.resource_id(), now).await?;
        tx.commit().await?;

        resource.apply_activation(now);
        info!(resource_id = %resource.resource_id(), "Resource activated");
        Ok(())
    }

    /// Activates the resource identified by `identifier` if `token` matches
    pub async fn find_and_activate(&self, identifier: &str, token: &str) -> Result<bool, AuthError> {
        self.find_and_activate_with(identifier, token, |_| Ok(())).await
    }

    /// Like [`find_and_activate`](Self::find_and_activate), running
    /// `on_success` with the activated resource before committing
    ///
    /// Lookup, expiry check, comparison, activation and the callback share
    /// one transaction. If the callback fails the activation is rolled back.
    ///
    /// # Errors
    ///
    /// - `AuthError::Store` on storage failure
    /// - `AuthError::Callback` when `on_success` fails
    pub async fn find_and_activate_with<F>(
        &self,
        identifier: &str,
        token: &str,
        on_success: F,
    ) -> Result<bool, AuthError>
    where
        F: FnOnce(&R) -> anyhow::Result<()> + Send,
    {
        if identifier.trim().is_empty() || token.trim().is_empty() {
            return Ok(false);
        }

        let mut tx = self.storage.begin().await?;

        let Some(mut resource) = tx.find_by_identifier(identifier).await? else {
            debug!("Activation rejected");
            return Ok(false);
        };

        let now = self.clock.now();
        if resource.is_activation_expired_at(now) {
            debug!(resource_id = %resource.resource_id(), "Activation rejected");
            return Ok(false);
        }

        let stored = resource.activation_token().unwrap_or_default();
        if !secure_compare(stored, token) {
            debug!(resource_id = %resource.resource_id(), "Activation rejected");
            return Ok(false);
        }

        tx.activate_atomically(resource.resource_id(), now).await?;
        resource.apply_activation(now);

        if let Err(err) = on_success(&resource) {
            tx.rollback().await?;
            return Err(AuthError::Callback(err));
        }

        tx.commit().await?;

        info!(resource_id = %resource.resource_id(), "Resource activated");
        Ok(true)
    }

    async fn assign_token(
        &self,
        tx: &mut S::Tx,
        resource: &mut R,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), AuthError> {
        let token = issue_unique_token(tx, TokenScope::Activation, &self.generator).await?;
        let expires_at =
            expires_at.unwrap_or_else(|| self.clock.now() + self.policy.activation_token_ttl);
        resource.assign_activation_token(token, expires_at);
        Ok(())
    }
}
