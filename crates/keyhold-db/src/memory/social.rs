//! [`SocialIdentityRepository`] over [`MemoryStore`].

use chrono::Utc;
use keyhold_core::error::{KeyholdError, KeyholdResult};
use keyhold_core::models::social::{LinkSocialIdentity, SocialIdentity, SocialProvider};
use keyhold_core::repository::SocialIdentityRepository;
use uuid::Uuid;

use super::MemoryStore;

impl SocialIdentityRepository for MemoryStore {
    async fn find_social_identity(
        &self,
        provider: SocialProvider,
        provider_id: &str,
    ) -> KeyholdResult<Option<SocialIdentity>> {
        let tables = self.tables.read().await;
        Ok(tables
            .social_identities
            .get(&(provider, provider_id.to_string()))
            .cloned())
    }

    async fn link_social_identity(
        &self,
        input: LinkSocialIdentity,
    ) -> KeyholdResult<SocialIdentity> {
        let key = (input.provider, input.provider_id.clone());
        let mut tables = self.tables.write().await;
        if tables.social_identities.contains_key(&key) {
            return Err(KeyholdError::already_exists("social_identity"));
        }
        if !tables.users.contains_key(&input.user_id) {
            return Err(KeyholdError::not_found("user", input.user_id));
        }

        let identity = SocialIdentity {
            id: Uuid::new_v4(),
            provider: input.provider,
            provider_id: input.provider_id,
            user_id: input.user_id,
            email: input.email,
            linked_at: Utc::now(),
        };
        tables.social_identities.insert(key, identity.clone());
        Ok(identity)
    }
}
