/// Account model
///
/// The account is the resource that activation and auth tokens are bound
/// to. It carries its own activation token (pending → activated) and its
/// current auth token inline; longer-lived or multi-realm tokens live in
/// the `tokens` table (see [`TokenRecord`](crate::models::token::TokenRecord)).
///
/// # Schema
///
/// ```sql
/// CREATE TABLE accounts (
///     id UUID PRIMARY KEY,
///     email VARCHAR(255) NOT NULL,              -- unique on LOWER(email)
///     password_hash VARCHAR(255) NOT NULL,
///     auth_token VARCHAR(64),                   -- unique
///     auth_token_expires_at TIMESTAMPTZ,
///     activation_token VARCHAR(64),             -- unique
///     activation_token_expires_at TIMESTAMPTZ,
///     activated_at TIMESTAMPTZ,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use chrono::Utc;
/// use tokenward_core::models::account::{Account, NewAccount};
///
/// # fn example() -> Result<(), tokenward_core::AuthError> {
/// let account = Account::build(
///     NewAccount {
///         email: "foobar@baz.com".to_string(),
///         password: "admin4lolz".to_string(),
///     },
///     Utc::now(),
/// )?;
/// assert!(!account.password_hash.is_empty());
/// # Ok(())
/// # }
/// ```

use crate::auth::activation::ActivationProtocol;
use crate::auth::authentication::AuthenticationProtocol;
use crate::auth::password::{hash_password, Argon2Verifier, PasswordError};
use crate::clock::SystemClock;
use crate::error::{AuthError, ValidationErrors};
use crate::models::resource::{activation_state_errors, Activatable, Authenticatable, Resource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidateEmail};

/// Account record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: Uuid,

    /// Login identifier, matched case-insensitively
    pub email: String,

    /// Argon2id PHC hash
    #[serde(skip_serializing)]
    pub password_hash: String,

    #[serde(skip_serializing)]
    pub auth_token: Option<String>,

    pub auth_token_expires_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing)]
    pub activation_token: Option<String>,

    pub activation_token_expires_at: Option<DateTime<Utc>>,

    pub activated_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Input for creating a new account
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewAccount {
    #[validate(email(message = "is invalid"))]
    pub email: String,

    /// Plaintext password; hashed by [`Account::build`]
    #[validate(length(min = 6, max = 72, message = "must be between 6 and 72 characters"))]
    pub password: String,
}

impl Account {
    /// Builds an unsaved account from validated input
    ///
    /// The account has no activation or auth token yet; enroll it through
    /// the activation protocol to make it pending and persist it.
    ///
    /// # Errors
    ///
    /// - `AuthError::Validation` if the email or password is rejected
    /// - `AuthError::Credential` if hashing fails
    pub fn build(input: NewAccount, now: DateTime<Utc>) -> Result<Self, AuthError> {
        let input = NewAccount {
            email: input.email.trim().to_string(),
            ..input
        };
        input.validate().map_err(ValidationErrors::from)?;

        Ok(Self {
            id: Uuid::new_v4(),
            email: input.email,
            password_hash: hash_password(&input.password)?,
            auth_token: None,
            auth_token_expires_at: None,
            activation_token: None,
            activation_token_expires_at: None,
            activated_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replaces the stored password hash
    pub fn set_password(&mut self, plaintext: &str) -> Result<(), PasswordError> {
        self.password_hash = hash_password(plaintext)?;
        Ok(())
    }

    /// Field-level validation run by the validated write path
    ///
    /// Uniqueness (email, activation token, auth token) is checked by the
    /// store, which can see the other rows.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.email.trim().is_empty() {
            errors.add("email", "can't be blank");
        } else if !self.email.validate_email() {
            errors.add("email", "is invalid");
        }

        if self.password_hash.is_empty() {
            errors.add("password", "can't be blank");
        }

        errors.details.extend(activation_state_errors(self).details);

        errors.into_result()
    }
}

impl Resource for Account {
    fn resource_id(&self) -> Uuid {
        self.id
    }

    fn identifier(&self) -> &str {
        &self.email
    }
}

impl Activatable for Account {
    fn activation_token(&self) -> Option<&str> {
        self.activation_token.as_deref()
    }

    fn activation_token_expires_at(&self) -> Option<DateTime<Utc>> {
        self.activation_token_expires_at
    }

    fn activated_at(&self) -> Option<DateTime<Utc>> {
        self.activated_at
    }

    fn assign_activation_token(&mut self, token: String, expires_at: DateTime<Utc>) {
        self.activation_token = Some(token);
        self.activation_token_expires_at = Some(expires_at);
    }

    fn apply_activation(&mut self, activated_at: DateTime<Utc>) {
        self.activated_at = Some(activated_at);
        self.activation_token_expires_at = None;
    }
}

impl Authenticatable for Account {
    fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    fn auth_token_expires_at(&self) -> Option<DateTime<Utc>> {
        self.auth_token_expires_at
    }

    fn credential(&self) -> &str {
        &self.password_hash
    }

    fn assign_auth_token(&mut self, token: String, expires_at: DateTime<Utc>) {
        self.auth_token = Some(token);
        self.auth_token_expires_at = Some(expires_at);
    }
}

/// Activation flow over accounts
pub type AccountActivation<S, C = SystemClock> = ActivationProtocol<Account, S, C>;

/// Authentication flow over accounts
pub type AccountAuthentication<S, V = Argon2Verifier, C = SystemClock> =
    AuthenticationProtocol<Account, S, V, C>;
