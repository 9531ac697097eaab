//! Argon2id password hashing.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::SaltString, Algorithm, Argon2, Params, PasswordHash, PasswordHasher,
    PasswordVerifier, Version,
};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 62;

/// Length bounds applied at the edge, counted in characters.
#[must_use]
pub fn valid_password_length(password: &str) -> bool {
    (MIN_PASSWORD_LENGTH..=MAX_PASSWORD_LENGTH).contains(&password.chars().count())
}

/// Argon2id hasher with fixed cost parameters.
#[derive(Clone, Debug)]
pub struct Passwords {
    params: Params,
}

impl Default for Passwords {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}

impl Passwords {
    /// Custom cost: memory in KiB, iterations, lanes.
    ///
    /// # Errors
    /// Returns an error if argon2 rejects the parameters.
    pub fn with_params(m_cost: u32, t_cost: u32, p_cost: u32) -> Result<Self> {
        let params = Params::new(m_cost, t_cost, p_cost, None)
            .map_err(|err| anyhow!("invalid argon2 params: {err}"))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// PHC-encoded hash with a fresh random salt.
    ///
    /// # Errors
    /// Returns an error if the hashing primitive fails.
    pub fn hash(&self, password: &SecretString) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.expose_secret().as_bytes(), &salt)
            .map_err(|_| anyhow!("failed to hash password"))?
            .to_string();
        Ok(hash)
    }

    /// Constant-time comparison against a stored PHC string. The parameters
    /// encoded in the hash win over our own.
    #[must_use]
    pub fn verify(&self, password: &SecretString, stored_hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(stored_hash) else {
            return false;
        };
        self.argon2()
            .verify_password(password.expose_secret().as_bytes(), &parsed)
            .is_ok()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn cheap() -> Passwords {
        Passwords::with_params(64, 1, 1).unwrap()
    }

    #[test]
    fn hash_and_verify() {
        let passwords = cheap();
        let secret = SecretString::from("pw12345678");
        let hash = passwords.hash(&secret).unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(!hash.contains("pw12345678"));
        assert!(passwords.verify(&secret, &hash));
        assert!(!passwords.verify(&SecretString::from("pw12345679"), &hash));
    }

    #[test]
    fn salts_differ() {
        let passwords = cheap();
        let secret = SecretString::from("pw12345678");
        assert_ne!(
            passwords.hash(&secret).unwrap(),
            passwords.hash(&secret).unwrap()
        );
    }

    #[test]
    fn verify_rejects_garbage_hash() {
        assert!(!cheap().verify(&SecretString::from("pw12345678"), "not-a-phc-string"));
    }

    #[test]
    fn invalid_params() {
        assert!(Passwords::with_params(0, 0, 0).is_err());
    }

    #[test]
    fn length_bounds() {
        assert!(!valid_password_length("short"));
        assert!(valid_password_length("pw12345678"));
        assert!(valid_password_length(&"x".repeat(MAX_PASSWORD_LENGTH)));
        assert!(!valid_password_length(&"x".repeat(MAX_PASSWORD_LENGTH + 1)));
    }
}
