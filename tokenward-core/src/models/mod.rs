/// Data models
///
/// # Models
///
/// - `resource`: capability traits a resource implements to take part in the
///   activation and authentication flows
/// - `account`: the stock resource (email + password + inline tokens)
/// - `token`: issued token records
///
/// # Example
///
/// ```
/// use tokenward_core::auth::policy::TokenKind;
/// use tokenward_core::models::token::NewToken;
/// use uuid::Uuid;
///
/// let request = NewToken {
///     resource_id: Uuid::new_v4(),
///     kind: TokenKind::PasswordReset,
///     realm: "web".to_string(),
/// };
/// assert_eq!(request.kind.as_str(), "password_reset");
/// ```

pub mod account;
pub mod resource;
pub mod token;
