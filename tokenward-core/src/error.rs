/// Error types shared by the token protocols
///
/// Failed lookups, expired tokens and mismatched tokens are *not* errors:
/// the protocols fold all of them into `Ok(false)` (or `Ok(None)`) so that a
/// caller cannot tell them apart. The types here cover what is left:
///
/// - [`ValidationErrors`]: a record violates its field invariants or a
///   uniqueness scope
/// - [`AuthError`]: storage failures, credential backend failures and
///   failures raised by a caller-supplied success callback

use crate::auth::password::PasswordError;
use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single field-level validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Field that failed validation
    pub field: String,

    /// Error message
    pub message: String,
}

/// Collection of field-level validation failures
///
/// Returned by the validated write path of every store and by
/// `validate()` on the models.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors {
    pub details: Vec<FieldError>,
}

impl ValidationErrors {
    /// Creates an empty error set
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an error set holding a single failure
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    /// Records a failure for `field`
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.details.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.details.is_empty()
    }

    /// Returns true if any failure was recorded for `field`
    pub fn has_field(&self, field: &str) -> bool {
        self.details.iter().any(|d| d.field == field)
    }

    /// Messages recorded for `field`, in insertion order
    pub fn messages_for(&self, field: &str) -> Vec<&str> {
        self.details
            .iter()
            .filter(|d| d.field == field)
            .map(|d| d.message.as_str())
            .collect()
    }

    /// `Ok(())` when nothing was recorded, `Err(self)` otherwise
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validation failed: ")?;
        for (i, detail) in self.details.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", detail.field, detail.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

impl From<validator::ValidationErrors> for ValidationErrors {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut out = ValidationErrors::new();
        for (field, field_errors) in errors.field_errors() {
            for error in field_errors {
                let message = error
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| error.code.to_string());
                out.add(field.to_string(), message);
            }
        }
        out
    }
}

/// Errors surfaced by the activation, authentication and lifecycle protocols
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The storage collaborator failed or rejected a validated write
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The credential backend could not hash or verify a secret
    #[error(transparent)]
    Credential(#[from] PasswordError),

    /// Input rejected before reaching storage
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// The caller's success callback failed; the transaction was rolled back
    #[error("Success callback failed: {0}")]
    Callback(#[source] anyhow::Error),
}

impl AuthError {
    /// Returns the validation failures carried by this error, if any
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            AuthError::Validation(errors) => Some(errors),
            AuthError::Store(StoreError::Validation(errors)) => Some(errors),
            _ => None,
        }
    }
}
