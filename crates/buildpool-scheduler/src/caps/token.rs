//! Sturdy-reference token generation and hashing.
//!
//! Tokens are 256 random bits, URL-safe base64 encoded. The scheduler
//! never stores the plaintext token, only its SHA-256 hash.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Generate a new token.
///
/// Returns a tuple of (plaintext_token, token_hash). The plaintext goes
/// into the capability file; the hash is what the registry keeps.
pub fn generate_token() -> (String, String) {
    let mut token_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut token_bytes);

    let plaintext = URL_SAFE_NO_PAD.encode(token_bytes);
    let token_hash = hash_token(&plaintext);

    (plaintext, token_hash)
}

/// Hash a token using SHA-256.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
