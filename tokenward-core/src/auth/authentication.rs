/// Resource authentication
///
/// Two ways in:
///
/// - **Bearer token** ([`AuthenticationProtocol::authenticate_securely`]):
///   the presented token is compared in constant time with the resource's
///   auth token. An expired auth token is rotated on sight, so a leaked
///   expired token can never be replayed.
/// - **Credential** ([`AuthenticationProtocol::find_and_authenticate`]):
///   the plaintext secret is checked by a [`CredentialVerifier`].
///
/// Both report every kind of failure the same way (`false` / `None`).

use crate::auth::password::{Argon2Verifier, CredentialVerifier, PasswordError};
use crate::auth::policy::TokenPolicy;
use crate::auth::token::{secure_compare, TokenGenerator};
use crate::clock::{Clock, SystemClock};
use crate::error::AuthError;
use crate::models::resource::Authenticatable;
use crate::store::{issue_unique_token, ResourceStore, Storage, TokenScope, Transaction};
use std::marker::PhantomData;
use tracing::{debug, info, warn};

/// Authentication flow for resources of type `R`
pub struct AuthenticationProtocol<R, S, V = Argon2Verifier, C = SystemClock> {
    storage: S,
    policy: TokenPolicy,
    generator: TokenGenerator,
    verifier: V,
    clock: C,
    _resource: PhantomData<fn() -> R>,
}

impl<R, S> AuthenticationProtocol<R, S, Argon2Verifier, SystemClock>
where
    R: Authenticatable,
    S: Storage,
    S::Tx: ResourceStore<R>,
{
    pub fn new(storage: S, policy: TokenPolicy) -> Self {
        Self::with_parts(storage, policy, Argon2Verifier, SystemClock)
    }
}

impl<R, S, V, C> AuthenticationProtocol<R, S, V, C>
where
    R: Authenticatable,
    S: Storage,
    S::Tx: ResourceStore<R>,
    V: CredentialVerifier,
    C: Clock,
{
    pub fn with_parts(storage: S, policy: TokenPolicy, verifier: V, clock: C) -> Self {
        Self {
            storage,
            policy,
            generator: TokenGenerator::new(),
            verifier,
            clock,
            _resource: PhantomData,
        }
    }

    /// Checks a bearer token for the resource identified by `identifier`
    pub async fn authenticate_securely(&self, identifier: &str, token: &str) -> Result<bool, AuthError> {
        self.authenticate_securely_with(identifier, token, |_| Ok(())).await
    }

    /// Like [`authenticate_securely`](Self::authenticate_securely), running
    /// `on_success` with the resource before committing
    ///
    /// Blank input and a resource without an auth token return `false`
    /// without touching storage. If the stored auth token has expired it is
    /// replaced by a fresh one (session TTL) and the call returns `false`,
    /// even when the presented token matched the expired one.
    ///
    /// # Errors
    ///
    /// - `AuthError::Store` on storage failure
    /// - `AuthError::Callback` when `on_success` fails; nothing is committed
    pub async fn authenticate_securely_with<F>(
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
            debug!("Authentication rejected");
            return Ok(false);
        };

        if resource.auth_token().is_none() {
            debug!(resource_id = %resource.resource_id(), "Authentication rejected, no auth token");
            return Ok(false);
        }

        if resource.is_token_expired_at(self.clock.now()) {
            self.assign_auth_token(&mut tx, &mut resource).await?;
            tx.persist_unchecked(&resource).await?;
            tx.commit().await?;

            info!(resource_id = %resource.resource_id(), "Expired auth token rotated");
            return Ok(false);
        }

        let stored = resource.auth_token().unwrap_or_default();
        if !secure_compare(stored, token) {
            debug!(resource_id = %resource.resource_id(), "Authentication rejected");
            return Ok(false);
        }

        if let Err(err) = on_success(&resource) {
            tx.rollback().await?;
            return Err(AuthError::Callback(err));
        }

        tx.commit().await?;

        debug!(resource_id = %resource.resource_id(), "Authenticated");
        Ok(true)
    }

    /// Returns the resource when both the identifier and the secret match
    ///
    /// An unknown identifier, a wrong secret and a stored credential the
    /// verifier cannot read all return `Ok(None)`.
    pub async fn find_and_authenticate(
        &self,
        identifier: &str,
        plaintext: &str,
    ) -> Result<Option<R>, AuthError> {
        if identifier.trim().is_empty() || plaintext.is_empty() {
            return Ok(None);
        }

        let mut tx = self.storage.begin().await?;
        let found = tx.find_by_identifier(identifier).await?;
        tx.commit().await?;

        let Some(resource) = found else {
            debug!("Credential check rejected");
            return Ok(None);
        };

        match self.verifier.verify(plaintext, resource.credential()) {
            Ok(true) => Ok(Some(resource)),
            Ok(false) => {
                debug!(resource_id = %resource.resource_id(), "Credential check rejected");
                Ok(None)
            }
            Err(PasswordError::InvalidHash(reason)) => {
                warn!(
                    resource_id = %resource.resource_id(),
                    reason = %reason,
                    "Stored credential is unreadable"
                );
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Assigns an auth token only if the resource has none; nothing is saved
    ///
    /// Returns whether a token was assigned.
    pub async fn ensure_auth_token(&self, resource: &mut R) -> Result<bool, AuthError> {
        if resource.auth_token().is_some() {
            return Ok(false);
        }
        self.reset_auth_token(resource).await?;
        Ok(true)
    }

    pub async fn ensure_auth_token_persisted(&self, resource: &mut R) -> Result<bool, AuthError> {
        if resource.auth_token().is_some() {
            return Ok(false);
        }
        self.reset_auth_token_persisted(resource).await?;
        Ok(true)
    }

    /// Replaces the auth token with a fresh unique one expiring after the
    /// session TTL; nothing is saved
    pub async fn reset_auth_token(&self, resource: &mut R) -> Result<(), AuthError> {
        let mut tx = self.storage.begin().await?;
        self.assign_auth_token(&mut tx, resource).await?;
        tx.rollback().await?;
        Ok(())
    }

    pub async fn reset_auth_token_persisted(&self, resource: &mut R) -> Result<(), AuthError> {
        let mut tx = self.storage.begin().await?;
        self.assign_auth_token(&mut tx, resource).await?;
        tx.persist_unchecked(resource).await?;
        tx.commit().await?;

        info!(resource_id = %resource.resource_id(), "Auth token reset");
        Ok(())
    }

    /// True when the expiry is absent or already passed
    pub fn is_token_expired(&self, resource: &R) -> bool {
        resource.is_token_expired_at(self.clock.now())
    }

    async fn assign_auth_token(&self, tx: &mut S::Tx, resource: &mut R) -> Result<(), AuthError> {
        let token = issue_unique_token(tx, TokenScope::Authentication, &self.generator).await?;
        let expires_at = self.clock.now() + self.policy.session_token_ttl;
        resource.assign_auth_token(token, expires_at);
        Ok(())
    }
}
