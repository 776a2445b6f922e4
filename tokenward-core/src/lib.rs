//! # Tokenward Core Library
//!
//! Issues, validates, expires and rotates opaque bearer tokens bound to an
//! account record: activation tokens, password-reset tokens and session
//! tokens.
//!
//! ## Module Organization
//!
//! - `auth`: token generation, constant-time comparison, TTL policy, the token
//!   lifecycle and the activation/authentication protocols
//! - `models`: accounts, token records and the resource capability traits
//! - `store`: the storage collaborator traits plus in-memory and Postgres stores
//! - `db`: Postgres connection pool and migrations
//! - `clock`: injectable time source
//! - `config`: configuration loaded from the environment
//! - `error`: protocol-level error types

pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod store;

pub use error::{AuthError, FieldError, ValidationErrors};

/// Current version of the tokenward core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
