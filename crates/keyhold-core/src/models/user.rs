//! User domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserStatus {
    Active,
    Suspended,
    PendingVerification,
}

/// A local account.
///
/// Users are never hard-deleted; deactivation goes through `status`.
/// The credential (`password_hash`) is absent for accounts created by a
/// social login until a password is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// Lower-cased email address (unique).
    pub email: String,
    /// Phone number (unique when present).
    pub phone: Option<String>,
    /// Argon2id PHC-format hash.
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub display_name: String,
    pub status: UserStatus,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateUser {
    pub email: String,
    pub phone: Option<String>,
    pub display_name: String,
    /// Already-hashed credential; the store never sees plaintext.
    pub password_hash: Option<String>,
    pub status: UserStatus,
    pub email_verified: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateUser {
    pub display_name: Option<String>,
    /// `Some(Some(val))` = set, `Some(None)` = clear, `None` = no change.
    pub phone: Option<Option<String>>,
    /// Replaces the credential wholesale.
    pub password_hash: Option<String>,
    pub status: Option<UserStatus>,
    pub email_verified: Option<bool>,
    pub phone_verified: Option<bool>,
}
