//! PKCE (RFC 7636) verifier, challenge and state generation

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};

use crate::common::id_generator::{generate_url_token, TOKEN_BYTES};

/// The only challenge method this service advertises
pub const METHOD: &str = "S256";

/// 32 random bytes, base64url without padding (43 characters)
pub fn generate_verifier() -> String {
    generate_url_token(TOKEN_BYTES)
}

/// Opaque single-use correlation value, unrelated to any user id
pub fn generate_state() -> String {
    generate_url_token(TOKEN_BYTES)
}

/// BASE64URL(SHA256(verifier))
pub fn challenge_s256(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
