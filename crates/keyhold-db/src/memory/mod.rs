//! Repository implementations over [`MemoryStore`].

mod access;
mod device;
mod otp;
mod refresh_token;
mod role;
mod social;
mod user;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use keyhold_core::models::{
    access::{OrganizationAccess, WarehouseAccess},
    device::TrustedDevice,
    otp::{OtpChallenge, OtpPurpose},
    permission::{Permission, RolePermission},
    refresh_token::RefreshTokenRecord,
    role::{Role, UserRole},
    social::{SocialIdentity, SocialProvider},
    user::User,
};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub(crate) struct Tables {
    pub(crate) users: HashMap<Uuid, User>,
    pub(crate) users_by_email: HashMap<String, Uuid>,
    pub(crate) users_by_phone: HashMap<String, Uuid>,

    /// Challenges per `(user_id, purpose)`, oldest first.
    pub(crate) challenges: HashMap<(Uuid, OtpPurpose), Vec<OtpChallenge>>,
    pub(crate) challenge_keys: HashMap<Uuid, (Uuid, OtpPurpose)>,

    pub(crate) devices: HashMap<Uuid, TrustedDevice>,
    pub(crate) devices_by_fingerprint: HashMap<(Uuid, String), Uuid>,

    pub(crate) social_identities: HashMap<(SocialProvider, String), SocialIdentity>,

    pub(crate) refresh_tokens: HashMap<Uuid, RefreshTokenRecord>,

    pub(crate) roles: HashMap<Uuid, Role>,
    pub(crate) permissions: HashMap<Uuid, Permission>,
    pub(crate) permissions_by_code: HashMap<String, Uuid>,
    pub(crate) role_permissions: HashSet<RolePermission>,
    pub(crate) user_roles: HashMap<Uuid, UserRole>,

    pub(crate) organization_access: HashMap<Uuid, OrganizationAccess>,
    pub(crate) warehouse_access: HashMap<Uuid, WarehouseAccess>,
}

/// In-process store. Cloning shares the underlying tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl core::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}
