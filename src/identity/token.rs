//! Verification token generation and hashing.

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

pub const VERIFICATION_TOKEN_BYTES: usize = 32;

/// Create a new 256-bit verification token, URL-safe base64 without padding.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn generate_verification_token() -> Result<String> {
    let mut bytes = [0u8; VERIFICATION_TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate verification token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Hash a verification token so raw values never touch storage.
#[must_use]
pub fn hash_verification_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}
