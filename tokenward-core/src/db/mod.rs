/// Postgres plumbing for the sqlx-backed store
///
/// # Modules
///
/// - `pool`: connection pool creation with a health check
/// - `migrations`: schema migrations for `accounts` and `tokens`
///
/// The store itself lives in [`crate::store::postgres`].

pub mod migrations;
pub mod pool;
