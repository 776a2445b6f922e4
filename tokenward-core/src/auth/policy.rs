/// Token kinds and their time-to-live policy
///
/// # Kinds
///
/// - **activation**: proves ownership of the account's email address
/// - **password_reset**: one-shot password change authorization
/// - **session**: bearer credential for an authenticated client
///
/// # Environment Variables
///
/// - `TOKENWARD_ACTIVATION_TOKEN_TTL_SECS` (default: 3600)
/// - `TOKENWARD_PASSWORD_RESET_TTL_SECS` (default: 3600)
/// - `TOKENWARD_SESSION_TOKEN_TTL_SECS` (default: 86400)
///
/// # Example
///
/// ```
/// use chrono::Duration;
/// use tokenward_core::auth::policy::{TokenKind, TokenPolicy};
///
/// let policy = TokenPolicy::default();
/// assert_eq!(policy.ttl_for(TokenKind::Session), Duration::days(1));
///
/// let kind: TokenKind = " Password_Reset ".parse().unwrap();
/// assert_eq!(kind, TokenKind::PasswordReset);
/// ```

use crate::config::ConfigError;
use crate::error::ValidationErrors;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;

const DEFAULT_ACTIVATION_TTL_SECS: i64 = 60 * 60;
const DEFAULT_PASSWORD_RESET_TTL_SECS: i64 = 60 * 60;
const DEFAULT_SESSION_TTL_SECS: i64 = 24 * 60 * 60;

/// Purpose of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "token_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Activation,
    PasswordReset,
    Session,
}

impl TokenKind {
    /// Every valid kind
    pub const ALL: [TokenKind; 3] = [
        TokenKind::Activation,
        TokenKind::PasswordReset,
        TokenKind::Session,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Activation => "activation",
            TokenKind::PasswordReset => "password_reset",
            TokenKind::Session => "session",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenKind {
    type Err = ValidationErrors;

    /// Parses a kind name after normalizing it
    ///
    /// `"Activation"`, `" activation "` and `"PasswordReset"` are accepted;
    /// anything outside the closed set is rejected on field `kind`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize_name(s);
        if normalized.is_empty() {
            return Err(ValidationErrors::single("kind", "can't be blank"));
        }

        TokenKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| ValidationErrors::single("kind", "is not included in the list"))
    }
}

/// Normalizes a kind or realm name for storage and lookup
///
/// Trims, snake-cases camel-case words, maps `-` and spaces to `_` and
/// lower-cases the result: `" MobileApp "` becomes `"mobile_app"`.
pub fn normalize_name(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut out = String::with_capacity(trimmed.len() + 4);
    let mut prev: Option<char> = None;

    for c in trimmed.chars() {
        if c.is_uppercase() {
            if matches!(prev, Some(p) if p.is_lowercase() || p.is_ascii_digit()) {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else if c == '-' || c.is_whitespace() {
            out.push('_');
        } else {
            out.push(c);
        }
        prev = Some(c);
    }

    out
}

/// Time-to-live for each token kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPolicy {
    pub activation_token_ttl: Duration,
    pub password_reset_ttl: Duration,
    pub session_token_ttl: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            activation_token_ttl: Duration::seconds(DEFAULT_ACTIVATION_TTL_SECS),
            password_reset_ttl: Duration::seconds(DEFAULT_PASSWORD_RESET_TTL_SECS),
            session_token_ttl: Duration::seconds(DEFAULT_SESSION_TTL_SECS),
        }
    }
}

impl TokenPolicy {
    /// TTL applied when a token of `kind` is issued or refreshed
    pub fn ttl_for(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Activation => self.activation_token_ttl,
            TokenKind::PasswordReset => self.password_reset_ttl,
            TokenKind::Session => self.session_token_ttl,
        }
    }

    /// TTL for a raw kind name; names outside the closed set get the session TTL
    pub fn ttl_for_name(&self, name: &str) -> Duration {
        match name.parse::<TokenKind>() {
            Ok(kind) => self.ttl_for(kind),
            Err(_) => self.session_token_ttl,
        }
    }

    /// Loads TTLs from the environment, falling back to the defaults
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when a variable is set but is not
    /// a positive number of seconds.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Self {
            activation_token_ttl: ttl_from_env(
                "TOKENWARD_ACTIVATION_TOKEN_TTL_SECS",
                DEFAULT_ACTIVATION_TTL_SECS,
            )?,
            password_reset_ttl: ttl_from_env(
                "TOKENWARD_PASSWORD_RESET_TTL_SECS",
                DEFAULT_PASSWORD_RESET_TTL_SECS,
            )?,
            session_token_ttl: ttl_from_env(
                "TOKENWARD_SESSION_TOKEN_TTL_SECS",
                DEFAULT_SESSION_TTL_SECS,
            )?,
        })
    }
}

fn ttl_from_env(var: &'static str, default_secs: i64) -> Result<Duration, ConfigError> {
    match env::var(var) {
        Ok(raw) => parse_ttl_secs(var, &raw),
        Err(_) => Ok(Duration::seconds(default_secs)),
    }
}

fn parse_ttl_secs(var: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let secs: i64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        var,
        reason: format!("'{}' is not a whole number of seconds", raw),
    })?;

    if secs <= 0 {
        return Err(ConfigError::InvalidValue {
            var,
            reason: "must be greater than zero".to_string(),
        });
    }

    Ok(Duration::seconds(secs))
}
