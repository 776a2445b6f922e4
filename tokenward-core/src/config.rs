/// Configuration management
///
/// Loads configuration from environment variables (and a `.env` file when
/// present) into a type-safe struct.
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: 10)
/// - `TOKENWARD_ACTIVATION_TOKEN_TTL_SECS`: activation token TTL (default: 3600)
/// - `TOKENWARD_PASSWORD_RESET_TTL_SECS`: password reset TTL (default: 3600)
/// - `TOKENWARD_SESSION_TOKEN_TTL_SECS`: session token TTL (default: 86400)
///
/// # Example
///
/// ```no_run
/// use tokenward_core::config::Config;
///
/// # fn example() -> Result<(), tokenward_core::config::ConfigError> {
/// let config = Config::from_env()?;
/// println!("Session tokens live {}s", config.policy.session_token_ttl.num_seconds());
/// # Ok(())
/// # }
/// ```

use crate::auth::policy::TokenPolicy;
use crate::db::pool::DatabaseConfig;
use std::env;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is not set
    #[error("{0} environment variable is required")]
    MissingVar(&'static str),

    /// A variable is set but cannot be used
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: &'static str, reason: String },
}

/// Complete configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection pool settings
    pub database: DatabaseConfig,

    /// Token TTL policy
    pub policy: TokenPolicy,
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if `DATABASE_URL` is missing or any numeric variable
    /// has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingVar("DATABASE_URL"))?;

        let max_connections = match env::var("DATABASE_MAX_CONNECTIONS") {
            Ok(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: "DATABASE_MAX_CONNECTIONS",
                        reason: format!("'{}' is not a positive integer", raw),
                    })
                }
            },
            Err(_) => DatabaseConfig::default().max_connections,
        };

        Ok(Self {
            database: DatabaseConfig {
                url,
                max_connections,
                ..Default::default()
            },
            policy: TokenPolicy::from_env()?,
        })
    }
}
