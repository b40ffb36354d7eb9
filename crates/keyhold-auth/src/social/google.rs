//! Google: OAuth access tokens. The tokeninfo endpoint proves the token
//! was issued to our client; userinfo supplies the profile.

use async_trait::async_trait;
use keyhold_core::models::social::SocialProvider;
use serde::Deserialize;
use tracing::debug;

use super::{SocialProfile, SocialProviderVerifier, check_status};
use crate::error::{AuthError, AuthResult};

const TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";
const USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: Option<String>,
    azp: Option<String>,
    sub: Option<String>,
}

impl TokenInfo {
    fn issued_to(&self, client_id: &str) -> bool {
        self.aud.as_deref() == Some(client_id) || self.azp.as_deref() == Some(client_id)
    }
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    given_name: Option<String>,
    family_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GoogleVerifier {
    client: reqwest::Client,
    client_id: String,
    tokeninfo_url: String,
    userinfo_url: String,
}

impl GoogleVerifier {
    /// `client_id` is our OAuth client; tokens minted for any other
    /// client are rejected.
    pub fn new(client: reqwest::Client, client_id: String) -> Self {
        Self {
            client,
            client_id,
            tokeninfo_url: TOKENINFO_URL.into(),
            userinfo_url: USERINFO_URL.into(),
        }
    }

    pub fn with_endpoints(
        mut self,
        tokeninfo_url: impl Into<String>,
        userinfo_url: impl Into<String>,
    ) -> Self {
        self.tokeninfo_url = tokeninfo_url.into();
        self.userinfo_url = userinfo_url.into();
        self
    }

    async fn token_info(&self, token: &str) -> AuthResult<TokenInfo> {
        let response = self
            .client
            .get(&self.tokeninfo_url)
            .query(&[("access_token", token)])
            .send()
            .await
            .map_err(|e| AuthError::Internal(format!("google tokeninfo: {e}")))?;
        check_status(SocialProvider::Google, response.status())?;

        response
            .json()
            .await
            .map_err(|e| AuthError::Internal(format!("google tokeninfo body: {e}")))
    }
}

#[async_trait]
impl SocialProviderVerifier for GoogleVerifier {
    fn provider(&self) -> SocialProvider {
        SocialProvider::Google
    }

    async fn verify(&self, token: &str) -> AuthResult<SocialProfile> {
        let token_info = self.token_info(token).await?;
        if !token_info.issued_to(&self.client_id) {
            debug!(aud = ?token_info.aud, azp = ?token_info.azp, "google token issued to another client");
            return Err(AuthError::Unauthorized);
        }

        let response = self
            .client
            .get(&self.userinfo_url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthError::Internal(format!("google userinfo: {e}")))?;
        check_status(SocialProvider::Google, response.status())?;

        let info: UserInfo = response
            .json()
            .await
            .map_err(|e| AuthError::Internal(format!("google userinfo body: {e}")))?;
        if token_info.sub.as_deref().is_some_and(|sub| sub != info.sub) {
            return Err(AuthError::Unauthorized);
        }

        Ok(SocialProfile {
            provider: SocialProvider::Google,
            provider_id: info.sub,
            email: info.email.unwrap_or_default(),
            email_verified: info.email_verified,
            first_name: info.given_name,
            last_name: info.family_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(aud: Option<&str>, azp: Option<&str>) -> TokenInfo {
        TokenInfo {
            aud: aud.map(Into::into),
            azp: azp.map(Into::into),
            sub: Some("1".into()),
        }
    }

    #[test]
    fn audience_must_name_our_client() {
        assert!(info(Some("ours"), None).issued_to("ours"));
        assert!(info(Some("other"), Some("ours")).issued_to("ours"));
        assert!(!info(Some("other"), Some("other")).issued_to("ours"));
        assert!(!info(None, None).issued_to("ours"));
    }
}
