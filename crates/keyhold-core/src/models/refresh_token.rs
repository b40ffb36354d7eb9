//! Refresh token rotation records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One link of a rotation chain. Keyed by the token's `jti`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub token_id: Uuid,
    pub user_id: Uuid,
    /// Shared by every token descended from one login.
    pub family_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by_token_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct CreateRefreshToken {
    pub token_id: Uuid,
    pub user_id: Uuid,
    pub family_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Result of an atomic check-and-mark rotation.
#[derive(Debug, Clone)]
pub enum RotationOutcome {
    /// The presented token was live; it is now revoked and the successor
    /// has been stored.
    Rotated(RefreshTokenRecord),
    /// The presented token had already been rotated: someone is reusing
    /// a superseded link of the chain.
    Replayed { user_id: Uuid, family_id: Uuid },
    /// The presented token was revoked without being rotated (logout,
    /// credential change).
    Revoked,
    Expired,
    NotFound,
}
