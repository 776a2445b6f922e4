/// Token record model
///
/// A token record is one issued token of a given kind, bound to a resource
/// and scoped by a realm (e.g. `"web"`, `"mobile_app"`). Records are only
/// created by issuance ([`NewToken`] → [`TokenRecord`]) and are never
/// physically deleted here: they retire by expiring or being confirmed.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE token_kind AS ENUM ('activation', 'password_reset', 'session');
///
/// CREATE TABLE tokens (
///     id UUID PRIMARY KEY,
///     kind token_kind NOT NULL,
///     resource_id UUID NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
///     realm VARCHAR(255) NOT NULL,
///     token VARCHAR(64) NOT NULL,
///     expires_at TIMESTAMPTZ NOT NULL,
///     confirmed_at TIMESTAMPTZ,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     UNIQUE (kind, token),
///     UNIQUE (resource_id, kind, realm)
/// );
/// ```

use crate::auth::policy::{normalize_name, TokenKind};
use crate::error::ValidationErrors;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Input for issuing a token
///
/// Has no token and no expiry: both are assigned by
/// [`TokenLifecycle::issue`](crate::auth::lifecycle::TokenLifecycle::issue).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewToken {
    pub resource_id: Uuid,
    pub kind: TokenKind,
    pub realm: String,
}

/// Issued token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TokenRecord {
    pub id: Uuid,

    pub kind: TokenKind,

    /// Owning resource
    pub resource_id: Uuid,

    /// Normalized scope; unique per `(resource_id, kind)`
    pub realm: String,

    /// Opaque token value; unique per `kind`
    #[serde(skip_serializing)]
    pub token: String,

    pub expires_at: DateTime<Utc>,

    pub confirmed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl TokenRecord {
    /// Copy with the realm normalized for storage and lookup
    pub fn normalized(&self) -> Self {
        let mut record = self.clone();
        record.realm = normalize_name(&record.realm);
        record
    }

    /// Field-level validation run by the validated write path
    ///
    /// The kind needs no check here: `TokenKind` is a closed enum.
    /// Uniqueness of `token` and `realm` is checked by the store.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.resource_id.is_nil() {
            errors.add("resource", "can't be blank");
        }
        if self.realm.trim().is_empty() {
            errors.add("realm", "can't be blank");
        }
        if self.token.trim().is_empty() {
            errors.add("token", "can't be blank");
        }

        errors.into_result()
    }
}
