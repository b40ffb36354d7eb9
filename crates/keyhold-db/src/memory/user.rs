//! [`UserRepository`] over [`MemoryStore`].

use chrono::Utc;
use keyhold_core::error::{KeyholdError, KeyholdResult};
use keyhold_core::models::refresh_token::CreateRefreshToken;
use keyhold_core::models::user::{CreateUser, UpdateUser, User};
use keyhold_core::repository::UserRepository;
use uuid::Uuid;

use super::refresh_token::new_record;
use super::{MemoryStore, Tables};

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Checks uniqueness, then inserts. Nothing is written on error.
fn insert_user(tables: &mut Tables, id: Uuid, input: CreateUser) -> KeyholdResult<User> {
    let email = normalize_email(&input.email);
    if tables.users.contains_key(&id) {
        return Err(KeyholdError::already_exists("user"));
    }
    if tables.users_by_email.contains_key(&email) {
        return Err(KeyholdError::already_exists("user.email"));
    }
    if let Some(phone) = &input.phone {
        if tables.users_by_phone.contains_key(phone) {
            return Err(KeyholdError::already_exists("user.phone"));
        }
    }

    let now = Utc::now();
    let user = User {
        id,
        email: email.clone(),
        phone: input.phone,
        password_hash: input.password_hash,
        display_name: input.display_name,
        status: input.status,
        email_verified: input.email_verified,
        phone_verified: false,
        created_at: now,
        updated_at: now,
    };

    tables.users_by_email.insert(email, user.id);
    if let Some(phone) = &user.phone {
        tables.users_by_phone.insert(phone.clone(), user.id);
    }
    tables.users.insert(user.id, user.clone());
    Ok(user)
}

impl UserRepository for MemoryStore {
    async fn create_user(&self, input: CreateUser) -> KeyholdResult<User> {
        let mut tables = self.tables.write().await;
        insert_user(&mut tables, Uuid::new_v4(), input)
    }

    async fn create_user_with_session(
        &self,
        id: Uuid,
        input: CreateUser,
        refresh: CreateRefreshToken,
    ) -> KeyholdResult<User> {
        if refresh.user_id != id {
            return Err(KeyholdError::Validation {
                message: "refresh token belongs to another user".into(),
            });
        }
        let mut tables = self.tables.write().await;
        if tables.refresh_tokens.contains_key(&refresh.token_id) {
            return Err(KeyholdError::already_exists("refresh_token"));
        }
        let user = insert_user(&mut tables, id, input)?;
        let record = new_record(refresh);
        tables.refresh_tokens.insert(record.token_id, record);
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> KeyholdResult<User> {
        let tables = self.tables.read().await;
        tables
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| KeyholdError::not_found("user", id))
    }

    async fn find_user_by_email(&self, email: &str) -> KeyholdResult<Option<User>> {
        let email = normalize_email(email);
        let tables = self.tables.read().await;
        Ok(tables
            .users_by_email
            .get(&email)
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn find_user_by_phone(&self, phone: &str) -> KeyholdResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users_by_phone
            .get(phone.trim())
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn update_user(&self, id: Uuid, input: UpdateUser) -> KeyholdResult<User> {
        let mut tables = self.tables.write().await;

        if let Some(Some(phone)) = &input.phone {
            if let Some(owner) = tables.users_by_phone.get(phone) {
                if *owner != id {
                    return Err(KeyholdError::already_exists("user.phone"));
                }
            }
        }

        let user = tables
            .users
            .get_mut(&id)
            .ok_or_else(|| KeyholdError::not_found("user", id))?;

        let mut phone_change = None;
        if let Some(display_name) = input.display_name {
            user.display_name = display_name;
        }
        if let Some(phone) = input.phone {
            if phone != user.phone {
                phone_change = Some((user.phone.take(), phone.clone()));
                user.phone = phone;
                user.phone_verified = false;
            }
        }
        if let Some(hash) = input.password_hash {
            user.password_hash = Some(hash);
        }
        if let Some(status) = input.status {
            user.status = status;
        }
        if let Some(verified) = input.email_verified {
            user.email_verified = verified;
        }
        if let Some(verified) = input.phone_verified {
            user.phone_verified = verified;
        }
        user.updated_at = Utc::now();
        let updated = user.clone();

        if let Some((old, new)) = phone_change {
            if let Some(old) = old {
                tables.users_by_phone.remove(&old);
            }
            if let Some(new) = new {
                tables.users_by_phone.insert(new, id);
            }
        }

        Ok(updated)
    }
}
