// src/common/id_generator.rs
//! Random identifier generation
//!
//! Two flavours:
//! - URL-safe opaque tokens (OAuth state, PKCE verifiers, handoff codes),
//!   base64url without padding over OS randomness
//! - short Crockford Base32 suffixes used to de-duplicate generated usernames

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, Rng, RngCore};

/// Crockford Base32 alphabet (excludes I, L, O, U to avoid confusion)
const CROCKFORD_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Bytes of entropy behind every opaque token
pub const TOKEN_BYTES: usize = 32;

/// Generate an opaque URL-safe token from `bytes` random bytes
pub fn generate_url_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Generate a raw Crockford Base32 string without prefix
///
/// # Example
/// ```ignore
/// let suffix = generate_raw_id(4);
/// // Returns something like "K7NP"
/// ```
pub fn generate_raw_id(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..32);
            CROCKFORD_ALPHABET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_url_token_length_and_alphabet() {
        let token = generate_url_token(TOKEN_BYTES);
        // 32 bytes -> 43 base64url characters, no padding
        assert_eq!(token.len(), 43);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_url_tokens_are_unique() {
        let tokens: HashSet<String> = (0..200).map(|_| generate_url_token(TOKEN_BYTES)).collect();
        assert_eq!(tokens.len(), 200);
    }

    #[test]
    fn test_raw_id_uses_crockford_alphabet() {
        let id = generate_raw_id(12);
        assert_eq!(id.len(), 12);
        for c in id.chars() {
            assert!(CROCKFORD_ALPHABET.contains(&(c as u8)));
            assert!(!matches!(c, 'I' | 'L' | 'O' | 'U'));
        }
    }
}
