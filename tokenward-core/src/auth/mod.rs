/// Token primitives and protocols
///
/// # Modules
///
/// - [`token`]: opaque token generation and constant-time comparison
/// - [`password`]: Argon2id hashing and the credential verifier seam
/// - [`policy`]: token kinds and their lifetimes
/// - [`lifecycle`]: issue, refresh, reset, confirm and expire token records
/// - [`activation`]: pending → activated flow for a resource
/// - [`authentication`]: bearer-token and credential authentication
///
/// # Security Features
///
/// - **Token entropy**: 256 bits from the OS CSPRNG
/// - **Constant-time comparison**: every presented token is checked with
///   [`token::secure_compare`]
/// - **Indistinguishable failures**: unknown identifier, expired token and
///   wrong token all return the same `false` / `None`
/// - **Atomicity**: every check-then-mutate sequence runs in one storage
///   transaction
///
/// # Example
///
/// ```
/// use tokenward_core::auth::activation::ActivationProtocol;
/// use tokenward_core::auth::policy::TokenPolicy;
/// use tokenward_core::models::account::{Account, NewAccount};
/// use tokenward_core::store::memory::MemoryStorage;
///
/// # async fn example() -> Result<(), tokenward_core::AuthError> {
/// let storage = MemoryStorage::new();
/// let activation = ActivationProtocol::<Account, _>::new(storage, TokenPolicy::default());
///
/// let mut account = Account::build(
///     NewAccount {
///         email: "user@example.com".to_string(),
///         password: "secret-password".to_string(),
///     },
///     chrono::Utc::now(),
/// )?;
/// activation.enroll(&mut account, None).await?;
///
/// let token = account.activation_token.clone().unwrap_or_default();
/// assert!(activation.find_and_activate("USER@example.com", &token).await?);
/// # Ok(())
/// # }
/// ```

pub mod activation;
pub mod authentication;
pub mod lifecycle;
pub mod password;
pub mod policy;
pub mod token;
