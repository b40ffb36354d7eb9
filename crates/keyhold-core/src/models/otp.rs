//! One-time challenge model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a one-time code authorizes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    Login,
    PasswordReset,
    EmailVerification,
    PhoneVerification,
    DeviceTrust,
    TransactionApproval,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::Login => "login",
            OtpPurpose::PasswordReset => "password_reset",
            OtpPurpose::EmailVerification => "email_verification",
            OtpPurpose::PhoneVerification => "phone_verification",
            OtpPurpose::DeviceTrust => "device_trust",
            OtpPurpose::TransactionApproval => "transaction_approval",
        }
    }
}

impl core::fmt::Display for OtpPurpose {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpChallenge {
    pub id: Uuid,
    pub user_id: Uuid,
    pub purpose: OtpPurpose,
    /// Hex SHA-256 of `salt || code`.
    pub code_hash: String,
    /// Hex-encoded per-challenge salt.
    pub code_salt: String,
    pub delivery_hint: Option<String>,
    /// Device a `login` challenge was issued to; only that device may
    /// answer it.
    pub device_fingerprint: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    /// Set when the challenge was superseded or exhausted.
    pub invalidated_at: Option<DateTime<Utc>>,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
}

impl OtpChallenge {
    /// Unconsumed, not invalidated and not yet expired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.consumed_at.is_none() && self.invalidated_at.is_none() && self.expires_at > now
    }
}

#[derive(Debug, Clone)]
pub struct CreateOtpChallenge {
    pub user_id: Uuid,
    pub purpose: OtpPurpose,
    pub code_hash: String,
    pub code_salt: String,
    pub delivery_hint: Option<String>,
    pub device_fingerprint: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Result of consuming a challenge with a matching code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Consumed,
    /// Already consumed, superseded, exhausted or expired.
    NotActive,
}

/// Result of recording a failed attempt against a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Attempt recorded; the challenge is still usable.
    Recorded { attempt_count: u32 },
    /// The attempt pushed the count past the ceiling; the challenge is
    /// now invalidated.
    Exhausted,
    /// The challenge was no longer active when the attempt landed.
    NotActive,
}
