//! Social sign-in: provider token verification and local account
//! resolution.
//!
//! Each provider sits behind [`SocialProviderVerifier`]; the linker only
//! ever sees the verified [`SocialProfile`].

mod apple;
mod facebook;
mod google;

pub use apple::AppleVerifier;
pub use facebook::FacebookVerifier;
pub use google::GoogleVerifier;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keyhold_core::models::social::{LinkSocialIdentity, SocialProvider};
use keyhold_core::models::user::{CreateUser, User, UserStatus};
use keyhold_core::repository::{SocialIdentityRepository, UserRepository};
use tracing::{debug, info};

use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};

/// Identity facts a provider vouched for.
#[derive(Debug, Clone)]
pub struct SocialProfile {
    pub provider: SocialProvider,
    pub provider_id: String,
    pub email: String,
    pub email_verified: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl SocialProfile {
    fn display_name(&self) -> String {
        let full = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if full.is_empty() {
            self.email
                .split('@')
                .next()
                .unwrap_or_default()
                .to_string()
        } else {
            full
        }
    }
}

#[async_trait]
pub trait SocialProviderVerifier: Send + Sync {
    fn provider(&self) -> SocialProvider;

    /// Check the token with the provider and return who it belongs to.
    async fn verify(&self, token: &str) -> AuthResult<SocialProfile>;
}

/// Shared HTTP client for provider calls.
pub fn http_client(timeout: Duration) -> AuthResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AuthError::Internal(format!("http client: {e}")))
}

/// Maps a provider status to our taxonomy: rejected tokens are the
/// caller's problem, anything else is ours.
pub(crate) fn check_status(provider: SocialProvider, status: reqwest::StatusCode) -> AuthResult<()> {
    if status.is_success() {
        Ok(())
    } else if status.is_client_error() {
        debug!(%provider, %status, "provider rejected token");
        Err(AuthError::Unauthorized)
    } else {
        Err(AuthError::Internal(format!("{provider} returned HTTP {status}")))
    }
}

/// Result of resolving a verified profile to a local account.
#[derive(Debug, Clone)]
pub struct SocialResolution {
    pub user: User,
    pub is_new_user: bool,
}

#[derive(Clone)]
pub struct SocialIdentityLinker<S> {
    store: S,
    verifiers: HashMap<SocialProvider, Arc<dyn SocialProviderVerifier>>,
    link_by_email: bool,
}

impl<S: UserRepository + SocialIdentityRepository> SocialIdentityLinker<S> {
    pub fn new(store: S, link_by_email: bool) -> Self {
        Self {
            store,
            verifiers: HashMap::new(),
            link_by_email,
        }
    }

    /// Linker with a verifier for every provider that has its client
    /// credentials configured.
    pub fn with_default_providers(store: S, config: &AuthConfig) -> AuthResult<Self> {
        let client = http_client(Duration::from_secs(config.social_http_timeout_secs))?;
        let mut linker = Self::new(store, config.social_link_by_email);
        if let Some(client_id) = &config.google_client_id {
            linker = linker.with_verifier(Arc::new(GoogleVerifier::new(
                client.clone(),
                client_id.clone(),
            )));
        }
        if let (Some(app_id), Some(secret)) = (&config.facebook_app_id, &config.facebook_app_secret)
        {
            linker = linker.with_verifier(Arc::new(FacebookVerifier::new(
                client.clone(),
                app_id.clone(),
                secret.clone(),
            )));
        }
        if let Some(client_id) = &config.apple_client_id {
            linker = linker.with_verifier(Arc::new(AppleVerifier::new(client, client_id.clone())));
        }
        Ok(linker)
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn SocialProviderVerifier>) -> Self {
        self.verifiers.insert(verifier.provider(), verifier);
        self
    }

    pub async fn verify_provider_token(
        &self,
        provider: SocialProvider,
        token: &str,
    ) -> AuthResult<SocialProfile> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::InvalidRequest("provider token is required".into()));
        }
        let verifier = self.verifiers.get(&provider).ok_or_else(|| {
            AuthError::InvalidRequest(format!("provider {provider} is not enabled"))
        })?;

        let profile = verifier.verify(token).await?;
        if profile.provider_id.is_empty() {
            return Err(AuthError::Unauthorized);
        }
        if profile.email.trim().is_empty() {
            return Err(AuthError::InvalidRequest(
                "provider did not share an email address".into(),
            ));
        }
        Ok(profile)
    }

    /// Existing link, else link by email (when enabled), else a new
    /// account. Lost races against a concurrent first login are retried.
    pub async fn resolve(&self, profile: &SocialProfile) -> AuthResult<SocialResolution> {
        for _ in 0..2 {
            match self.try_resolve(profile).await {
                Err(AuthError::AlreadyExists(entity)) => {
                    debug!(
                        provider = %profile.provider,
                        entity = %entity,
                        "social resolution raced, retrying"
                    );
                }
                other => return other,
            }
        }
        self.try_resolve(profile).await
    }

    async fn try_resolve(&self, profile: &SocialProfile) -> AuthResult<SocialResolution> {
        if let Some(identity) = self
            .store
            .find_social_identity(profile.provider, &profile.provider_id)
            .await?
        {
            let user = self.store.get_user(identity.user_id).await?;
            return Ok(SocialResolution {
                user,
                is_new_user: false,
            });
        }

        if self.link_by_email {
            if let Some(user) = self.store.find_user_by_email(&profile.email).await? {
                self.link(profile, &user).await?;
                info!(
                    user_id = %user.id,
                    provider = %profile.provider,
                    "social identity linked by email"
                );
                return Ok(SocialResolution {
                    user,
                    is_new_user: false,
                });
            }
        }

        let user = self
            .store
            .create_user(CreateUser {
                email: profile.email.clone(),
                phone: None,
                display_name: profile.display_name(),
                password_hash: None,
                status: UserStatus::Active,
                email_verified: profile.email_verified,
            })
            .await?;
        self.link(profile, &user).await?;
        info!(
            user_id = %user.id,
            provider = %profile.provider,
            "user created from social login"
        );
        Ok(SocialResolution {
            user,
            is_new_user: true,
        })
    }

    async fn link(&self, profile: &SocialProfile, user: &User) -> AuthResult<()> {
        self.store
            .link_social_identity(LinkSocialIdentity {
                provider: profile.provider,
                provider_id: profile.provider_id.clone(),
                user_id: user.id,
                email: profile.email.clone(),
            })
            .await?;
        Ok(())
    }
}
