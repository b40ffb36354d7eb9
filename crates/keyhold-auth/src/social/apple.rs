//! Sign in with Apple: identity tokens (RS256 JWTs) checked against
//! Apple's published key set.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use keyhold_core::models::social::SocialProvider;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use super::{SocialProfile, SocialProviderVerifier};
use crate::error::{AuthError, AuthResult};

const APPLE_ISSUER: &str = "https://appleid.apple.com";
const APPLE_KEYS_URL: &str = "https://appleid.apple.com/auth/keys";
const KEY_CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Deserialize)]
struct IdentityClaims {
    sub: String,
    email: Option<String>,
    /// Apple sends this as either a boolean or the string `"true"`.
    #[serde(default)]
    email_verified: Option<serde_json::Value>,
}

fn flag(value: Option<&serde_json::Value>) -> bool {
    match value {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

struct CachedKeys {
    keys: JwkSet,
    fetched_at: Instant,
}

#[derive(Clone)]
pub struct AppleVerifier {
    client: reqwest::Client,
    client_id: String,
    keys_url: String,
    cache: Arc<RwLock<Option<CachedKeys>>>,
}

impl AppleVerifier {
    /// `client_id` is the audience Apple stamps into identity tokens.
    pub fn new(client: reqwest::Client, client_id: String) -> Self {
        Self {
            client,
            client_id,
            keys_url: APPLE_KEYS_URL.into(),
            cache: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.keys_url = url.into();
        self
    }

    async fn fetch_keys(&self) -> AuthResult<JwkSet> {
        let response = self
            .client
            .get(&self.keys_url)
            .send()
            .await
            .map_err(|e| AuthError::Internal(format!("apple keys: {e}")))?;
        if !response.status().is_success() {
            return Err(AuthError::Internal(format!(
                "apple keys returned HTTP {}",
                response.status()
            )));
        }
        let keys: JwkSet = response
            .json()
            .await
            .map_err(|e| AuthError::Internal(format!("apple keys body: {e}")))?;

        *self.cache.write().await = Some(CachedKeys {
            keys: keys.clone(),
            fetched_at: Instant::now(),
        });
        Ok(keys)
    }

    /// Key for `kid`, refetching once when the cache is stale or does not
    /// know the id (Apple rotates keys).
    async fn key_for(&self, kid: &str) -> AuthResult<Jwk> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.as_ref() {
                if entry.fetched_at.elapsed() < KEY_CACHE_TTL {
                    if let Some(jwk) = entry.keys.find(kid) {
                        return Ok(jwk.clone());
                    }
                }
            }
        }

        debug!(kid, "refreshing apple signing keys");
        self.fetch_keys()
            .await?
            .find(kid)
            .cloned()
            .ok_or(AuthError::Unauthorized)
    }
}

#[async_trait]
impl SocialProviderVerifier for AppleVerifier {
    fn provider(&self) -> SocialProvider {
        SocialProvider::Apple
    }

    async fn verify(&self, token: &str) -> AuthResult<SocialProfile> {
        let header = jsonwebtoken::decode_header(token).map_err(|_| AuthError::Unauthorized)?;
        let kid = header.kid.ok_or(AuthError::Unauthorized)?;
        let jwk = self.key_for(&kid).await?;
        let key = DecodingKey::from_jwk(&jwk).map_err(|_| AuthError::Unauthorized)?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[APPLE_ISSUER]);
        validation.set_audience(&[&self.client_id]);

        let claims = jsonwebtoken::decode::<IdentityClaims>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "apple identity token rejected");
                AuthError::Unauthorized
            })?;

        Ok(SocialProfile {
            provider: SocialProvider::Apple,
            provider_id: claims.sub,
            email_verified: flag(claims.email_verified.as_ref()),
            email: claims.email.unwrap_or_default(),
            first_name: None,
            last_name: None,
        })
    }
}
