//! Signing key custody and bearer token minting.
//!
//! Key material enters the process once, at startup, and is immediately sealed
//! into an [`Enclave`]. Every signature opens the enclave into a buffer that is
//! zeroed when the signing call returns, whichever way it returns.

mod enclave;
mod signer;

pub use self::enclave::Enclave;
pub use self::signer::{KeyVault, SignedToken, TokenClaims, TokenKind, TokenSigner};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("unknown key id: {0}")]
    UnknownKid(String),
    #[error("failed to parse RSA key")]
    KeyParse,
    #[error("public key does not match private key")]
    KeyMismatch,
    #[error("signing failed")]
    Signing,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("failed to seal key material")]
    Seal,
    #[error("failed to open key material")]
    Unseal,
    #[error("failed to read key file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
