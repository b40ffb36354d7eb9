//! One-time challenge lifecycle: issue, verify, consume.
//!
//! Codes are never stored in the clear; a challenge keeps a per-challenge
//! salt and the SHA-256 of `salt || code`. Delivery is somebody else's
//! job and goes through [`OtpDelivery`].

use async_trait::async_trait;
use chrono::{Duration, Utc};
use keyhold_core::events::{AuthEvent, EventBus, OtpDispatch};
use keyhold_core::models::otp::{
    AttemptOutcome, ConsumeOutcome, CreateOtpChallenge, OtpChallenge, OtpPurpose,
};
use keyhold_core::repository::OtpRepository;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};

/// Outcome of checking a code against the current challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpVerdict {
    Success,
    Expired,
    Mismatch,
    AttemptsExceeded,
}

impl OtpVerdict {
    pub fn into_result(self) -> AuthResult<()> {
        match self {
            OtpVerdict::Success => Ok(()),
            OtpVerdict::Expired => Err(AuthError::Expired),
            OtpVerdict::Mismatch => Err(AuthError::Mismatch),
            OtpVerdict::AttemptsExceeded => Err(AuthError::AttemptsExceeded),
        }
    }
}

/// A stored challenge together with the plaintext code, which exists only
/// long enough to be handed to delivery.
pub struct IssuedChallenge {
    pub challenge: OtpChallenge,
    pub code: String,
}

impl core::fmt::Debug for IssuedChallenge {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IssuedChallenge")
            .field("challenge", &self.challenge)
            .field("code", &"<redacted>")
            .finish()
    }
}

/// Sends a code to the user over email, SMS or similar.
#[async_trait]
pub trait OtpDelivery: Send + Sync {
    async fn deliver(&self, dispatch: OtpDispatch) -> AuthResult<()>;
}

/// Hands codes to the notification collaborator as `otp:dispatch` events.
pub struct EventBusDelivery<B> {
    bus: B,
}

impl<B: EventBus> EventBusDelivery<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl<B: EventBus> OtpDelivery for EventBusDelivery<B> {
    async fn deliver(&self, dispatch: OtpDispatch) -> AuthResult<()> {
        self.bus
            .publish(AuthEvent::OtpDispatch(dispatch))
            .map_err(AuthError::from)
    }
}

pub(crate) fn generate_code(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect()
}

pub(crate) fn hash_code(salt: &str, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Clone)]
pub struct OtpManager<R> {
    store: R,
    code_length: usize,
    lifetime: Duration,
    max_attempts: u32,
}

impl<R: OtpRepository> OtpManager<R> {
    pub fn new(store: R, config: &AuthConfig) -> Self {
        Self {
            store,
            code_length: config.otp_length,
            lifetime: Duration::seconds(config.otp_lifetime_secs as i64),
            max_attempts: config.otp_max_attempts,
        }
    }

    /// Generate and store a new code, superseding any active challenge for
    /// the same `(user_id, purpose)`. A challenge issued to a device can
    /// only be answered from that device.
    pub async fn issue(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
        delivery_hint: Option<String>,
        device_fingerprint: Option<String>,
    ) -> AuthResult<IssuedChallenge> {
        let code = generate_code(self.code_length);
        let salt: [u8; 16] = rand::rng().random();
        let salt = hex::encode(salt);

        let challenge = self
            .store
            .create_challenge(CreateOtpChallenge {
                user_id,
                purpose,
                code_hash: hash_code(&salt, &code),
                code_salt: salt,
                delivery_hint,
                device_fingerprint,
                expires_at: Utc::now() + self.lifetime,
            })
            .await?;

        debug!(%user_id, %purpose, challenge_id = %challenge.id, "otp challenge issued");
        Ok(IssuedChallenge { challenge, code })
    }

    /// Check `code` against the latest challenge for `(user_id, purpose)`.
    ///
    /// A match consumes the challenge. A mismatch counts against the
    /// attempt ceiling; once the ceiling is passed the challenge stays
    /// dead even for the right code. Answering a device-bound challenge
    /// from any other device is a mismatch.
    pub async fn verify(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
        code: &str,
        device_fingerprint: Option<&str>,
    ) -> AuthResult<OtpVerdict> {
        let now = Utc::now();
        let Some(challenge) = self.store.latest_challenge(user_id, purpose).await? else {
            return Ok(OtpVerdict::Expired);
        };

        if challenge.consumed_at.is_some() {
            return Ok(OtpVerdict::Expired);
        }
        if challenge.attempt_count > self.max_attempts {
            return Ok(OtpVerdict::AttemptsExceeded);
        }
        if challenge.invalidated_at.is_some() || challenge.expires_at <= now {
            return Ok(OtpVerdict::Expired);
        }

        let presented = hash_code(&challenge.code_salt, code.trim());
        let code_matches: bool = presented
            .as_bytes()
            .ct_eq(challenge.code_hash.as_bytes())
            .into();
        let same_device = match challenge.device_fingerprint.as_deref() {
            Some(bound) => device_fingerprint == Some(bound),
            None => true,
        };
        if code_matches && !same_device {
            debug!(%user_id, %purpose, "otp answered from another device");
        }
        let matches = code_matches && same_device;

        if matches {
            return match self
                .store
                .consume_challenge(challenge.id, self.max_attempts, now)
                .await?
            {
                ConsumeOutcome::Consumed => Ok(OtpVerdict::Success),
                ConsumeOutcome::NotActive => Ok(OtpVerdict::Expired),
            };
        }

        match self
            .store
            .record_failed_attempt(challenge.id, self.max_attempts, now)
            .await?
        {
            AttemptOutcome::Recorded { attempt_count } => {
                debug!(%user_id, %purpose, attempt_count, "otp mismatch");
                Ok(OtpVerdict::Mismatch)
            }
            AttemptOutcome::Exhausted => {
                warn!(%user_id, %purpose, "otp challenge exhausted");
                Ok(OtpVerdict::AttemptsExceeded)
            }
            AttemptOutcome::NotActive => Ok(OtpVerdict::Expired),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_has_requested_length_and_digits_only() {
        for length in [4, 6, 8] {
            let code = generate_code(length);
            assert_eq!(code.len(), length);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn code_hash_depends_on_salt() {
        assert_eq!(hash_code("a", "123456"), hash_code("a", "123456"));
        assert_ne!(hash_code("a", "123456"), hash_code("b", "123456"));
        assert_ne!(hash_code("a", "123456"), hash_code("a", "123457"));
    }

    #[test]
    fn verdicts_map_to_errors() {
        assert!(OtpVerdict::Success.into_result().is_ok());
        assert!(matches!(
            OtpVerdict::Expired.into_result(),
            Err(AuthError::Expired)
        ));
        assert!(matches!(
            OtpVerdict::Mismatch.into_result(),
            Err(AuthError::Mismatch)
        ));
        assert!(matches!(
            OtpVerdict::AttemptsExceeded.into_result(),
            Err(AuthError::AttemptsExceeded)
        ));
    }
}
