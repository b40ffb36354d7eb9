//! Social identity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SocialProvider {
    Google,
    Facebook,
    Apple,
}

impl SocialProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            SocialProvider::Google => "google",
            SocialProvider::Facebook => "facebook",
            SocialProvider::Apple => "apple",
        }
    }
}

impl core::fmt::Display for SocialProvider {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for SocialProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "google" => Ok(SocialProvider::Google),
            "facebook" => Ok(SocialProvider::Facebook),
            "apple" => Ok(SocialProvider::Apple),
            other => Err(format!("unsupported social provider: {other}")),
        }
    }
}

/// Link between a provider account and a local user. Immutable once
/// created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialIdentity {
    pub id: Uuid,
    pub provider: SocialProvider,
    pub provider_id: String,
    pub user_id: Uuid,
    /// Email reported by the provider at link time.
    pub email: String,
    pub linked_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LinkSocialIdentity {
    pub provider: SocialProvider,
    pub provider_id: String,
    pub user_id: Uuid,
    pub email: String,
}
