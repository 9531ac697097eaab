use base64ct::{Base64UrlUnpadded, Encoding};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::{path::Path, sync::Arc, time::Duration};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;
use zeroize::Zeroizing;

use super::{Enclave, KeyError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct TokenHeader {
    alg: String,
    typ: String,
    kid: String,
}

impl TokenHeader {
    fn rs256(kid: impl Into<String>) -> Self {
        Self {
            alg: "RS256".to_string(),
            typ: "JWT".to_string(),
            kid: kid.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    /// Session id.
    pub jti: String,
    /// User id.
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub typ: TokenKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, KeyError> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, KeyError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| KeyError::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn decode_private_key(pem_or_der: &[u8]) -> Result<RsaPrivateKey, KeyError> {
    if pem_or_der.starts_with(b"-----BEGIN") {
        let s = std::str::from_utf8(pem_or_der).map_err(|_| KeyError::KeyParse)?;
        return RsaPrivateKey::from_pkcs8_pem(s)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(s))
            .map_err(|_| KeyError::KeyParse);
    }
    RsaPrivateKey::from_pkcs8_der(pem_or_der)
        .or_else(|_| RsaPrivateKey::from_pkcs1_der(pem_or_der))
        .map_err(|_| KeyError::KeyParse)
}

fn decode_public_key(pem_or_der: &[u8]) -> Result<RsaPublicKey, KeyError> {
    if pem_or_der.starts_with(b"-----BEGIN") {
        let s = std::str::from_utf8(pem_or_der).map_err(|_| KeyError::KeyParse)?;
        return RsaPublicKey::from_public_key_pem(s)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(s))
            .map_err(|_| KeyError::KeyParse);
    }
    RsaPublicKey::from_public_key_der(pem_or_der)
        .or_else(|_| RsaPublicKey::from_pkcs1_der(pem_or_der))
        .map_err(|_| KeyError::KeyParse)
}

fn read_key_file(path: &Path) -> Result<Zeroizing<Vec<u8>>, KeyError> {
    std::fs::read(path)
        .map(Zeroizing::new)
        .map_err(|source| KeyError::Io {
            path: path.display().to_string(),
            source,
        })
}

/// The RS256 key pair behind every bearer token, both halves sealed.
#[derive(Debug)]
pub struct KeyVault {
    kid: String,
    private_key: Enclave,
    public_key: Enclave,
}

impl KeyVault {
    /// Seal a key pair. Both halves are parsed once and checked against each
    /// other with a test signature, so a bad pair fails at startup.
    ///
    /// # Errors
    /// Returns an error if either key cannot be parsed or they do not match.
    pub fn new(
        kid: impl Into<String>,
        private_key: Zeroizing<Vec<u8>>,
        public_key: Zeroizing<Vec<u8>>,
    ) -> Result<Self, KeyError> {
        let vault = Self {
            kid: kid.into(),
            private_key: Enclave::seal(private_key)?,
            public_key: Enclave::seal(public_key)?,
        };

        let sample = b"warden-key-check";
        let signature = vault.sign(sample)?;
        vault
            .verify(sample, &signature)
            .map_err(|_| KeyError::KeyMismatch)?;

        debug!(kid = %vault.kid, "signing key sealed");
        Ok(vault)
    }

    /// Load PEM or DER key files.
    ///
    /// # Errors
    /// Returns an error if a file cannot be read or the keys are invalid.
    pub fn from_files(
        kid: impl Into<String>,
        private_key_path: &Path,
        public_key_path: &Path,
    ) -> Result<Self, KeyError> {
        Self::new(
            kid,
            read_key_file(private_key_path)?,
            read_key_file(public_key_path)?,
        )
    }

    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// RSASSA-PKCS1-v1_5 / SHA-256 over `message`.
    ///
    /// The decrypted key bytes and the parsed key both drop (and zero) before
    /// this returns.
    ///
    /// # Errors
    /// Returns an error if the enclave cannot be opened or signing fails.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, KeyError> {
        self.private_key.with_plaintext(|der_or_pem| {
            let signing_key = SigningKey::<Sha256>::new(decode_private_key(der_or_pem)?);
            let signature: Signature = signing_key
                .try_sign(message)
                .map_err(|_| KeyError::Signing)?;
            Ok(signature.to_vec())
        })
    }

    /// # Errors
    /// Returns [`KeyError::InvalidSignature`] if `signature` does not verify.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), KeyError> {
        self.public_key.with_plaintext(|der_or_pem| {
            let verifying_key = VerifyingKey::<Sha256>::new(decode_public_key(der_or_pem)?);
            let signature =
                Signature::try_from(signature).map_err(|_| KeyError::InvalidSignature)?;
            verifying_key
                .verify(message, &signature)
                .map_err(|_| KeyError::InvalidSignature)
        })
    }
}

/// Mints and checks the RS256 JWTs handed out at login.
#[derive(Clone, Debug)]
pub struct TokenSigner {
    vault: Arc<KeyVault>,
}

impl TokenSigner {
    #[must_use]
    pub fn new(vault: Arc<KeyVault>) -> Self {
        Self { vault }
    }

    #[must_use]
    pub fn kid(&self) -> &str {
        self.vault.kid()
    }

    /// Sign a token bound to `session_id`, valid for `ttl` from `issued_at`.
    ///
    /// # Errors
    /// Returns an error if encoding or signing fails.
    pub fn sign(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        kind: TokenKind,
        issued_at: OffsetDateTime,
        ttl: Duration,
    ) -> Result<SignedToken, KeyError> {
        let expires_at = issued_at + ttl;
        let claims = TokenClaims {
            jti: session_id.to_string(),
            sub: user_id.to_string(),
            iat: issued_at.unix_timestamp(),
            exp: expires_at.unix_timestamp(),
            typ: kind,
        };

        let header_b64 = b64e_json(&TokenHeader::rs256(self.vault.kid()))?;
        let claims_b64 = b64e_json(&claims)?;
        let signing_input = format!("{header_b64}.{claims_b64}");

        let signature = self.vault.sign(signing_input.as_bytes())?;
        let signature_b64 = Base64UrlUnpadded::encode_string(&signature);

        Ok(SignedToken {
            token: format!("{signing_input}.{signature_b64}"),
            expires_at,
        })
    }

    /// Verify signature, `kid` and expiry, returning the claims.
    ///
    /// # Errors
    /// Returns an error if the token is malformed, signed by another key or
    /// expired at `now`.
    pub fn verify(&self, token: &str, now: OffsetDateTime) -> Result<TokenClaims, KeyError> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(KeyError::TokenFormat)?;
        let claims_b64 = parts.next().ok_or(KeyError::TokenFormat)?;
        let sig_b64 = parts.next().ok_or(KeyError::TokenFormat)?;
        if parts.next().is_some() {
            return Err(KeyError::TokenFormat);
        }

        let header: TokenHeader = b64d_json(header_b64)?;
        if header.alg != "RS256" {
            return Err(KeyError::UnsupportedAlg(header.alg));
        }
        if header.kid != self.vault.kid() {
            return Err(KeyError::UnknownKid(header.kid));
        }

        let signature = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| KeyError::Base64)?;
        let signing_input = format!("{header_b64}.{claims_b64}");
        self.vault.verify(signing_input.as_bytes(), &signature)?;

        let claims: TokenClaims = b64d_json(claims_b64)?;
        if claims.exp <= now.unix_timestamp() {
            return Err(KeyError::Expired);
        }
        Ok(claims)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::keys::fixtures;

    const NOW: i64 = 1_700_000_000;

    fn vault(kid: &str) -> KeyVault {
        KeyVault::new(
            kid,
            Zeroizing::new(fixtures::PRIVATE_KEY_PEM.as_bytes().to_vec()),
            Zeroizing::new(fixtures::public_key_pem().into_bytes()),
        )
        .unwrap()
    }

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(NOW).unwrap()
    }

    #[test]
    fn sign_and_verify() {
        let signer = TokenSigner::new(Arc::new(vault("k1")));
        let session_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let signed = signer
            .sign(
                session_id,
                user_id,
                TokenKind::Access,
                now(),
                Duration::from_secs(900),
            )
            .unwrap();

        assert_eq!(signed.expires_at.unix_timestamp(), NOW + 900);
        assert_eq!(signed.token.split('.').count(), 3);

        let claims = signer.verify(&signed.token, now()).unwrap();
        assert_eq!(claims.jti, session_id.to_string());
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.iat, NOW);
        assert_eq!(claims.typ, TokenKind::Access);
    }

    #[test]
    fn header_carries_kid() {
        let signer = TokenSigner::new(Arc::new(vault("rotation-2")));
        let signed = signer
            .sign(
                Uuid::new_v4(),
                Uuid::new_v4(),
                TokenKind::Refresh,
                now(),
                Duration::from_secs(60),
            )
            .unwrap();
        let header_b64 = signed.token.split('.').next().unwrap();
        let header: TokenHeader = b64d_json(header_b64).unwrap();
        assert_eq!(header, TokenHeader::rs256("rotation-2"));
    }

    #[test]
    fn expired_token_rejected() {
        let signer = TokenSigner::new(Arc::new(vault("k1")));
        let signed = signer
            .sign(
                Uuid::new_v4(),
                Uuid::new_v4(),
                TokenKind::Access,
                now(),
                Duration::from_secs(60),
            )
            .unwrap();
        let later = now() + Duration::from_secs(60);
        assert!(matches!(
            signer.verify(&signed.token, later),
            Err(KeyError::Expired)
        ));
    }

    #[test]
    fn unknown_kid_rejected() {
        let issuer = TokenSigner::new(Arc::new(vault("k1")));
        let other = TokenSigner::new(Arc::new(vault("k2")));
        let signed = issuer
            .sign(
                Uuid::new_v4(),
                Uuid::new_v4(),
                TokenKind::Access,
                now(),
                Duration::from_secs(60),
            )
            .unwrap();
        assert!(matches!(
            other.verify(&signed.token, now()),
            Err(KeyError::UnknownKid(kid)) if kid == "k1"
        ));
    }

    #[test]
    fn tampered_claims_rejected() {
        let signer = TokenSigner::new(Arc::new(vault("k1")));
        let signed = signer
            .sign(
                Uuid::new_v4(),
                Uuid::new_v4(),
                TokenKind::Access,
                now(),
                Duration::from_secs(60),
            )
            .unwrap();
        let mut parts: Vec<&str> = signed.token.split('.').collect();
        let forged = b64e_json(&TokenClaims {
            jti: Uuid::new_v4().to_string(),
            sub: Uuid::new_v4().to_string(),
            iat: NOW,
            exp: NOW + 60,
            typ: TokenKind::Access,
        })
        .unwrap();
        parts[1] = &forged;
        assert!(matches!(
            signer.verify(&parts.join("."), now()),
            Err(KeyError::InvalidSignature)
        ));
    }

    #[test]
    fn malformed_tokens_rejected() {
        let signer = TokenSigner::new(Arc::new(vault("k1")));
        assert!(matches!(
            signer.verify("only.two", now()),
            Err(KeyError::TokenFormat)
        ));
        assert!(matches!(
            signer.verify("a.b.c.d", now()),
            Err(KeyError::TokenFormat)
        ));
        assert!(matches!(
            signer.verify("!!.b.c", now()),
            Err(KeyError::Base64)
        ));
    }

    #[test]
    fn garbage_key_material_fails_at_construction() {
        let result = KeyVault::new(
            "k1",
            Zeroizing::new(b"not a key".to_vec()),
            Zeroizing::new(fixtures::public_key_pem().into_bytes()),
        );
        assert!(matches!(result, Err(KeyError::KeyParse)));
    }

    #[test]
    fn missing_key_file() {
        let result = KeyVault::from_files(
            "k1",
            Path::new("/nonexistent/warden/private.pem"),
            Path::new("/nonexistent/warden/public.pem"),
        );
        assert!(matches!(result, Err(KeyError::Io { .. })));
    }
}
