//! Password hashing and verification using Argon2id.

use std::borrow::Cow;
use std::sync::Arc;

use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};

use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};

/// Salted Argon2id hasher with an optional pepper.
///
/// Hashing is deliberately slow; the `*_blocking` helpers move the work
/// onto tokio's blocking pool so no runtime worker is held.
#[derive(Clone)]
pub struct SecretHasher {
    argon2: Argon2<'static>,
    pepper: Option<Arc<str>>,
    /// Hash of a throwaway secret, verified against when there is no real
    /// account so both paths cost the same.
    dummy_hash: Arc<str>,
}

impl core::fmt::Debug for SecretHasher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SecretHasher")
            .field("params", self.argon2.params())
            .finish_non_exhaustive()
    }
}

impl SecretHasher {
    pub fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        let params = Params::new(
            config.argon2_memory_kib,
            config.argon2_iterations,
            config.argon2_parallelism,
            None,
        )
        .map_err(|e| AuthError::Internal(format!("argon2 params: {e}")))?;

        let mut hasher = Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            pepper: config.pepper.as_deref().map(Arc::from),
            dummy_hash: Arc::from(""),
        };
        hasher.dummy_hash = Arc::from(hasher.hash("keyhold-timing-equalizer")?);
        Ok(hasher)
    }

    fn peppered<'a>(&self, plaintext: &'a str) -> Cow<'a, str> {
        match &self.pepper {
            Some(p) => Cow::Owned(format!("{p}{plaintext}")),
            None => Cow::Borrowed(plaintext),
        }
    }

    /// Hash a plaintext into a PHC-format string.
    pub fn hash(&self, plaintext: &str) -> AuthResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(self.peppered(plaintext).as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| AuthError::Internal(format!("hash error: {e}")))
    }

    /// Verify a plaintext against a PHC-format hash.
    ///
    /// Returns `Ok(false)` on mismatch; a malformed stored hash is an
    /// internal error.
    pub fn verify(&self, plaintext: &str, digest: &str) -> AuthResult<bool> {
        let parsed = PasswordHash::new(digest)
            .map_err(|e| AuthError::Internal(format!("invalid hash format: {e}")))?;
        match self
            .argon2
            .verify_password(self.peppered(plaintext).as_bytes(), &parsed)
        {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AuthError::Internal(format!("verify error: {e}"))),
        }
    }

    /// Spend the same work as a real verification and discard the result.
    pub fn burn(&self, plaintext: &str) {
        let _ = self.verify(plaintext, &self.dummy_hash);
    }

    pub async fn hash_blocking(&self, plaintext: String) -> AuthResult<String> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&plaintext))
            .await
            .map_err(|e| AuthError::Internal(format!("hash task: {e}")))?
    }

    pub async fn verify_blocking(&self, plaintext: String, digest: String) -> AuthResult<bool> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&plaintext, &digest))
            .await
            .map_err(|e| AuthError::Internal(format!("verify task: {e}")))?
    }

    pub async fn burn_blocking(&self, plaintext: String) {
        let hasher = self.clone();
        let _ = tokio::task::spawn_blocking(move || hasher.burn(&plaintext)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher(pepper: Option<&str>) -> SecretHasher {
        SecretHasher::from_config(&AuthConfig {
            pepper: pepper.map(Into::into),
            argon2_memory_kib: 1024,
            argon2_iterations: 1,
            ..AuthConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn correct_password_matches() {
        let h = hasher(None);
        let hash = h.hash("hunter22").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(h.verify("hunter22", &hash).unwrap());
    }

    #[test]
    fn wrong_password_does_not_match() {
        let h = hasher(None);
        let hash = h.hash("hunter22").unwrap();
        assert!(!h.verify("wrong", &hash).unwrap());
    }

    #[test]
    fn pepper_is_applied() {
        let peppered = hasher(Some("pepper!"));
        let hash = peppered.hash("hunter22").unwrap();
        assert!(peppered.verify("hunter22", &hash).unwrap());
        // Without pepper should fail.
        assert!(!hasher(None).verify("hunter22", &hash).unwrap());
    }

    #[test]
    fn salts_differ() {
        let h = hasher(None);
        assert_ne!(h.hash("same").unwrap(), h.hash("same").unwrap());
    }

    #[test]
    fn malformed_hash_returns_error() {
        assert!(hasher(None).verify("pw", "not-a-hash").is_err());
    }

    #[tokio::test]
    async fn blocking_helpers_roundtrip() {
        let h = hasher(None);
        let hash = h.hash_blocking("hunter22".into()).await.unwrap();
        assert!(h.verify_blocking("hunter22".into(), hash).await.unwrap());
        h.burn_blocking("anything".into()).await;
    }
}
