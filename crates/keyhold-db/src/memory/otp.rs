//! [`OtpRepository`] over [`MemoryStore`].

use chrono::{DateTime, Utc};
use keyhold_core::error::{KeyholdError, KeyholdResult};
use keyhold_core::models::otp::{
    AttemptOutcome, ConsumeOutcome, CreateOtpChallenge, OtpChallenge, OtpPurpose,
};
use keyhold_core::repository::OtpRepository;
use tracing::debug;
use uuid::Uuid;

use super::{MemoryStore, Tables};

fn challenge_mut(tables: &mut Tables, id: Uuid) -> KeyholdResult<&mut OtpChallenge> {
    let key = *tables
        .challenge_keys
        .get(&id)
        .ok_or_else(|| KeyholdError::not_found("otp_challenge", id))?;
    tables
        .challenges
        .get_mut(&key)
        .and_then(|list| list.iter_mut().find(|c| c.id == id))
        .ok_or_else(|| KeyholdError::not_found("otp_challenge", id))
}

impl OtpRepository for MemoryStore {
    async fn create_challenge(&self, input: CreateOtpChallenge) -> KeyholdResult<OtpChallenge> {
        let now = Utc::now();
        let challenge = OtpChallenge {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            purpose: input.purpose,
            code_hash: input.code_hash,
            code_salt: input.code_salt,
            delivery_hint: input.delivery_hint,
            device_fingerprint: input.device_fingerprint,
            expires_at: input.expires_at,
            consumed_at: None,
            invalidated_at: None,
            attempt_count: 0,
            created_at: now,
        };

        let key = (input.user_id, input.purpose);
        let mut tables = self.tables.write().await;
        let list = tables.challenges.entry(key).or_default();
        for prior in list.iter_mut().filter(|c| c.is_active(now)) {
            prior.invalidated_at = Some(now);
        }
        list.push(challenge.clone());
        tables.challenge_keys.insert(challenge.id, key);

        Ok(challenge)
    }

    async fn latest_challenge(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
    ) -> KeyholdResult<Option<OtpChallenge>> {
        let tables = self.tables.read().await;
        Ok(tables
            .challenges
            .get(&(user_id, purpose))
            .and_then(|list| list.last())
            .cloned())
    }

    async fn consume_challenge(
        &self,
        id: Uuid,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> KeyholdResult<ConsumeOutcome> {
        let mut tables = self.tables.write().await;
        let challenge = challenge_mut(&mut tables, id)?;

        if !challenge.is_active(now) || challenge.attempt_count > max_attempts {
            return Ok(ConsumeOutcome::NotActive);
        }
        challenge.consumed_at = Some(now);
        Ok(ConsumeOutcome::Consumed)
    }

    async fn record_failed_attempt(
        &self,
        id: Uuid,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> KeyholdResult<AttemptOutcome> {
        let mut tables = self.tables.write().await;
        let challenge = challenge_mut(&mut tables, id)?;

        if !challenge.is_active(now) {
            return Ok(AttemptOutcome::NotActive);
        }
        challenge.attempt_count += 1;
        if challenge.attempt_count > max_attempts {
            challenge.invalidated_at = Some(now);
            return Ok(AttemptOutcome::Exhausted);
        }
        Ok(AttemptOutcome::Recorded {
            attempt_count: challenge.attempt_count,
        })
    }

    async fn purge_expired_challenges(&self, now: DateTime<Utc>) -> KeyholdResult<u64> {
        let mut tables = self.tables.write().await;
        let mut removed = Vec::new();
        for list in tables.challenges.values_mut() {
            list.retain(|c| {
                let keep = c.expires_at > now;
                if !keep {
                    removed.push(c.id);
                }
                keep
            });
        }
        tables.challenges.retain(|_, list| !list.is_empty());
        for id in &removed {
            tables.challenge_keys.remove(id);
        }
        debug!(count = removed.len(), "purged expired challenges");
        Ok(removed.len() as u64)
    }
}
