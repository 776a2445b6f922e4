/// Opaque token generation and constant-time comparison
///
/// # Security
///
/// - **Entropy**: 32 bytes (256 bits) from the operating system CSPRNG
/// - **Encoding**: standard base64 (44 chars), then the visually ambiguous
///   characters `+ / = l I O 0` are translated to `p q r s x y z`
/// - **Uniqueness**: not guaranteed here; callers retry against storage
///   (see [`issue_unique_token`](crate::store::issue_unique_token))
/// - **Comparison**: [`secure_compare`] runs in time that depends only on
///   the input length
///
/// # Example
///
/// ```
/// use tokenward_core::auth::token::{secure_compare, TokenGenerator, TOKEN_LENGTH};
///
/// let generator = TokenGenerator::new();
/// let token = generator.generate();
/// assert_eq!(token.len(), TOKEN_LENGTH);
///
/// assert!(secure_compare(&token, &token.clone()));
/// assert!(!secure_compare(&token, "guess"));
/// ```

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::{rngs::OsRng, RngCore};

/// Random bytes drawn per token (256 bits of entropy)
pub const TOKEN_ENTROPY_BYTES: usize = 32;

/// Length of an encoded token (padded base64 of 32 bytes)
pub const TOKEN_LENGTH: usize = 44;

/// Characters removed from the base64 alphabet
const AMBIGUOUS: [char; 7] = ['+', '/', '=', 'l', 'I', 'O', '0'];

/// Their replacements, position for position
const REPLACEMENTS: [char; 7] = ['p', 'q', 'r', 's', 'x', 'y', 'z'];

/// Produces URL/path-safe opaque tokens
///
/// Stateless; each call draws fresh bytes from `OsRng`, so it is safe to
/// call repeatedly inside a uniqueness retry loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenGenerator;

impl TokenGenerator {
    pub fn new() -> Self {
        TokenGenerator
    }

    /// Generates a new token
    ///
    /// # Example
    ///
    /// ```
    /// use tokenward_core::auth::token::TokenGenerator;
    ///
    /// let token = TokenGenerator::new().generate();
    /// assert!(!token.contains(|c| "+/=lIO0".contains(c)));
    /// ```
    pub fn generate(&self) -> String {
        let mut buffer = [0u8; TOKEN_ENTROPY_BYTES];
        OsRng.fill_bytes(&mut buffer);
        friendly(&STANDARD.encode(buffer))
    }
}

/// Translates ambiguous base64 characters to their friendly replacements
fn friendly(encoded: &str) -> String {
    encoded
        .chars()
        .map(|c| match AMBIGUOUS.iter().position(|&a| a == c) {
            Some(i) => REPLACEMENTS[i],
            None => c,
        })
        .collect()
}

/// Constant-time string comparison
///
/// Returns `false` straight away when either side is empty or the lengths
/// differ. Otherwise every byte pair is XOR-ed into one accumulator and the
/// result is only inspected after the last byte, so the running time does
/// not reveal where the first difference sits.
///
/// # Example
///
/// ```
/// use tokenward_core::auth::token::secure_compare;
///
/// assert!(secure_compare("deadbeef", "deadbeef"));
/// assert!(!secure_compare("deadbeef", "deadbeee"));
/// assert!(!secure_compare("", ""));
/// ```
pub fn secure_compare(a: &str, b: &str) -> bool {
    secure_compare_bytes(a.as_bytes(), b.as_bytes())
}

/// Byte-slice form of [`secure_compare`]
pub fn secure_compare_bytes(a: &[u8], b: &[u8]) -> bool {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }

    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_length_and_alphabet() {
        let generator = TokenGenerator::new();
        for _ in 0..200 {
            let token = generator.generate();
            assert_eq!(token.len(), TOKEN_LENGTH);
            for c in AMBIGUOUS {
                assert!(!token.contains(c), "token {} contains {}", token, c);
            }
            assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_generate_is_random() {
        let generator = TokenGenerator::new();
        let tokens: HashSet<String> = (0..1000).map(|_| generator.generate()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn test_friendly_translation() {
        assert_eq!(friendly("+/=lIO0"), "pqrsxyz");
        assert_eq!(friendly("abcXYZ19"), "abcXYZ19");
    }

    #[test]
    fn test_secure_compare_equal() {
        assert!(secure_compare("hello", "hello"));
        assert!(secure_compare_bytes(&[0, 1, 2, 255], &[0, 1, 2, 255]));
    }

    #[test]
    fn test_secure_compare_single_byte_difference() {
        let base = "a".repeat(64);
        for i in 0..base.len() {
            let mut other = base.clone().into_bytes();
            other[i] = b'b';
            assert!(
                !secure_compare_bytes(base.as_bytes(), &other),
                "difference at {} not detected",
                i
            );
        }
    }

    #[test]
    fn test_secure_compare_empty_and_length_mismatch() {
        assert!(!secure_compare("", ""));
        assert!(!secure_compare("", "x"));
        assert!(!secure_compare("x", ""));
        assert!(!secure_compare("short", "longer string"));
        assert!(!secure_compare("hello", "hello2"));
    }

    #[test]
    fn test_secure_compare_high_bits() {
        // 0x80 ^ 0x00 only sets the top bit of the accumulator
        assert!(!secure_compare_bytes(&[0x80, 0x00], &[0x00, 0x00]));
    }
}
