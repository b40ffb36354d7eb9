//! Facebook: user access tokens. `debug_token` proves the token belongs
//! to our app; Graph `/me` supplies the profile.

use async_trait::async_trait;
use keyhold_core::models::social::SocialProvider;
use serde::Deserialize;
use tracing::debug;

use super::{SocialProfile, SocialProviderVerifier, check_status};
use crate::error::{AuthError, AuthResult};

const GRAPH_URL: &str = "https://graph.facebook.com";

#[derive(Debug, Deserialize)]
struct DebugToken {
    data: TokenData,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    app_id: Option<String>,
    #[serde(default)]
    is_valid: bool,
    user_id: Option<String>,
}

impl TokenData {
    fn issued_to(&self, app_id: &str) -> bool {
        self.is_valid && self.app_id.as_deref() == Some(app_id)
    }
}

#[derive(Debug, Deserialize)]
struct GraphUser {
    id: String,
    email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FacebookVerifier {
    client: reqwest::Client,
    app_id: String,
    app_secret: String,
    graph_url: String,
}

impl FacebookVerifier {
    pub fn new(client: reqwest::Client, app_id: String, app_secret: String) -> Self {
        Self {
            client,
            app_id,
            app_secret,
            graph_url: GRAPH_URL.into(),
        }
    }

    /// Point at another Graph host (no trailing slash).
    pub fn with_endpoint(mut self, graph_url: impl Into<String>) -> Self {
        self.graph_url = graph_url.into();
        self
    }

    async fn inspect(&self, token: &str) -> AuthResult<TokenData> {
        let app_token = format!("{}|{}", self.app_id, self.app_secret);
        let response = self
            .client
            .get(format!("{}/debug_token", self.graph_url))
            .query(&[("input_token", token), ("access_token", app_token.as_str())])
            .send()
            .await
            .map_err(|e| AuthError::Internal(format!("facebook debug_token: {e}")))?;
        check_status(SocialProvider::Facebook, response.status())?;

        let body: DebugToken = response
            .json()
            .await
            .map_err(|e| AuthError::Internal(format!("facebook debug_token body: {e}")))?;
        Ok(body.data)
    }
}

#[async_trait]
impl SocialProviderVerifier for FacebookVerifier {
    fn provider(&self) -> SocialProvider {
        SocialProvider::Facebook
    }

    async fn verify(&self, token: &str) -> AuthResult<SocialProfile> {
        let data = self.inspect(token).await?;
        if !data.issued_to(&self.app_id) {
            debug!(app_id = ?data.app_id, is_valid = data.is_valid, "facebook token rejected");
            return Err(AuthError::Unauthorized);
        }

        let response = self
            .client
            .get(format!("{}/me", self.graph_url))
            .query(&[
                ("fields", "id,email,first_name,last_name"),
                ("access_token", token),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Internal(format!("facebook graph: {e}")))?;
        check_status(SocialProvider::Facebook, response.status())?;

        let user: GraphUser = response
            .json()
            .await
            .map_err(|e| AuthError::Internal(format!("facebook graph body: {e}")))?;
        if data.user_id.as_deref().is_some_and(|id| id != user.id) {
            return Err(AuthError::Unauthorized);
        }

        // Graph only exposes confirmed addresses.
        let email_verified = user.email.is_some();
        Ok(SocialProfile {
            provider: SocialProvider::Facebook,
            provider_id: user.id,
            email: user.email.unwrap_or_default(),
            email_verified,
            first_name: user.first_name,
            last_name: user.last_name,
        })
    }
}
