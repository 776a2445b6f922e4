/// Capabilities a resource exposes to the token protocols
///
/// The protocols are generic over the resource type: anything that
/// implements [`Activatable`] can go through the activation flow and
/// anything that implements [`Authenticatable`] can go through the
/// authentication flow. [`Account`](crate::models::account::Account) is the
/// stock implementation of both.

use crate::error::ValidationErrors;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A record tokens can be bound to
pub trait Resource: Clone + Send + Sync + 'static {
    /// Primary key
    fn resource_id(&self) -> Uuid;

    /// Lookup identifier (matched case-insensitively), e.g. an email address
    fn identifier(&self) -> &str;
}

/// Resource with a pending → activated lifecycle
pub trait Activatable: Resource {
    fn activation_token(&self) -> Option<&str>;

    fn activation_token_expires_at(&self) -> Option<DateTime<Utc>>;

    fn activated_at(&self) -> Option<DateTime<Utc>>;

    /// Puts the resource in the pending state with the given token
    fn assign_activation_token(&mut self, token: String, expires_at: DateTime<Utc>);

    /// Applies the activated state in memory: `activated_at` set, activation
    /// expiry cleared
    fn apply_activation(&mut self, activated_at: DateTime<Utc>);

    fn is_activated(&self) -> bool {
        self.activated_at().is_some()
    }

    /// Expired when the expiry is absent or not in the future
    fn is_activation_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.activation_token_expires_at() {
            Some(expires_at) => expires_at <= now,
            None => true,
        }
    }
}

/// Resource that authenticates with a bearer token and a stored credential
pub trait Authenticatable: Resource {
    fn auth_token(&self) -> Option<&str>;

    fn auth_token_expires_at(&self) -> Option<DateTime<Utc>>;

    /// Stored credential handed to the credential verifier (e.g. a password hash)
    fn credential(&self) -> &str;

    fn assign_auth_token(&mut self, token: String, expires_at: DateTime<Utc>);

    /// Expired when the expiry is absent or already passed
    fn is_token_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.auth_token_expires_at() {
            Some(expires_at) => expires_at < now,
            None => true,
        }
    }
}

/// Checks the pending/activated exclusive-or on any [`Activatable`]
///
/// - pending: token and expiry present, `activated_at` absent
/// - activated: `activated_at` present, expiry absent
pub fn activation_state_errors<R: Activatable>(resource: &R) -> ValidationErrors {
    let mut errors = ValidationErrors::new();

    match (resource.activation_token_expires_at(), resource.activated_at()) {
        (Some(_), Some(_)) => {
            errors.add("activated_at", "must be blank");
            errors.add("activation_token_expires_at", "must be blank");
        }
        (None, None) => {
            errors.add("activation_token_expires_at", "can't be blank");
            errors.add("activated_at", "can't be blank");
        }
        (Some(_), None) => {
            if resource.activation_token().map_or(true, |t| t.trim().is_empty()) {
                errors.add("activation_token", "can't be blank");
            }
        }
        (None, Some(_)) => {}
    }

    errors
}
