//! [`RefreshTokenRepository`] over [`MemoryStore`].

use chrono::{DateTime, Utc};
use keyhold_core::error::{KeyholdError, KeyholdResult};
use keyhold_core::models::refresh_token::{
    CreateRefreshToken, RefreshTokenRecord, RotationOutcome,
};
use keyhold_core::repository::RefreshTokenRepository;
use tracing::debug;
use uuid::Uuid;

use super::MemoryStore;

pub(super) fn new_record(input: CreateRefreshToken) -> RefreshTokenRecord {
    RefreshTokenRecord {
        token_id: input.token_id,
        user_id: input.user_id,
        family_id: input.family_id,
        issued_at: input.issued_at,
        expires_at: input.expires_at,
        revoked_at: None,
        replaced_by_token_id: None,
    }
}

impl RefreshTokenRepository for MemoryStore {
    async fn create_refresh_token(
        &self,
        input: CreateRefreshToken,
    ) -> KeyholdResult<RefreshTokenRecord> {
        let mut tables = self.tables.write().await;
        if tables.refresh_tokens.contains_key(&input.token_id) {
            return Err(KeyholdError::already_exists("refresh_token"));
        }
        let record = new_record(input);
        tables.refresh_tokens.insert(record.token_id, record.clone());
        Ok(record)
    }

    async fn get_refresh_token(&self, token_id: Uuid) -> KeyholdResult<Option<RefreshTokenRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.refresh_tokens.get(&token_id).cloned())
    }

    async fn rotate_refresh_token(
        &self,
        token_id: Uuid,
        successor: CreateRefreshToken,
        now: DateTime<Utc>,
    ) -> KeyholdResult<RotationOutcome> {
        let mut tables = self.tables.write().await;
        if tables.refresh_tokens.contains_key(&successor.token_id) {
            return Err(KeyholdError::already_exists("refresh_token"));
        }

        let Some(current) = tables.refresh_tokens.get_mut(&token_id) else {
            return Ok(RotationOutcome::NotFound);
        };
        if current.replaced_by_token_id.is_some() {
            return Ok(RotationOutcome::Replayed {
                user_id: current.user_id,
                family_id: current.family_id,
            });
        }
        if current.revoked_at.is_some() {
            return Ok(RotationOutcome::Revoked);
        }
        if current.expires_at <= now {
            return Ok(RotationOutcome::Expired);
        }

        current.revoked_at = Some(now);
        current.replaced_by_token_id = Some(successor.token_id);

        let record = new_record(successor);
        tables.refresh_tokens.insert(record.token_id, record.clone());
        Ok(RotationOutcome::Rotated(record))
    }

    async fn revoke_token_family(&self, family_id: Uuid, now: DateTime<Utc>) -> KeyholdResult<u64> {
        let mut tables = self.tables.write().await;
        let mut revoked = 0;
        for record in tables
            .refresh_tokens
            .values_mut()
            .filter(|r| r.family_id == family_id && r.revoked_at.is_none())
        {
            record.revoked_at = Some(now);
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn revoke_user_tokens(&self, user_id: Uuid, now: DateTime<Utc>) -> KeyholdResult<u64> {
        let mut tables = self.tables.write().await;
        let mut revoked = 0;
        for record in tables
            .refresh_tokens
            .values_mut()
            .filter(|r| r.user_id == user_id && r.revoked_at.is_none())
        {
            record.revoked_at = Some(now);
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn purge_expired_refresh_tokens(&self, now: DateTime<Utc>) -> KeyholdResult<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.refresh_tokens.len();
        tables.refresh_tokens.retain(|_, r| r.expires_at > now);
        let removed = before - tables.refresh_tokens.len();
        debug!(count = removed, "purged expired refresh tokens");
        Ok(removed as u64)
    }
}
