//! Repository trait definitions for data access abstraction.
//!
//! All repository operations are async. Operations documented as atomic
//! must be a single conditional update in the backing store, never a
//! read followed by a separate write.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::KeyholdResult;
use crate::models::{
    access::{GrantOrganizationAccess, GrantWarehouseAccess, OrganizationAccess, WarehouseAccess},
    device::{RegisterDevice, TrustedDevice},
    otp::{AttemptOutcome, ConsumeOutcome, CreateOtpChallenge, OtpChallenge, OtpPurpose},
    permission::{CreatePermission, Permission},
    refresh_token::{CreateRefreshToken, RefreshTokenRecord, RotationOutcome},
    role::{CreateRole, Role, UserRole},
    social::{LinkSocialIdentity, SocialIdentity, SocialProvider},
    user::{CreateUser, UpdateUser, User},
};

// ---------------------------------------------------------------------------
// Users & credentials
// ---------------------------------------------------------------------------

pub trait UserRepository: Send + Sync {
    /// Fails with `AlreadyExists` when the email or phone is taken.
    fn create_user(&self, input: CreateUser) -> impl Future<Output = KeyholdResult<User>> + Send;
    /// Create user `id` together with its first refresh token. Atomic:
    /// when either insert fails nothing is stored.
    fn create_user_with_session(
        &self,
        id: Uuid,
        input: CreateUser,
        refresh: CreateRefreshToken,
    ) -> impl Future<Output = KeyholdResult<User>> + Send;
    fn get_user(&self, id: Uuid) -> impl Future<Output = KeyholdResult<User>> + Send;
    fn find_user_by_email(
        &self,
        email: &str,
    ) -> impl Future<Output = KeyholdResult<Option<User>>> + Send;
    fn find_user_by_phone(
        &self,
        phone: &str,
    ) -> impl Future<Output = KeyholdResult<Option<User>>> + Send;
    fn update_user(
        &self,
        id: Uuid,
        input: UpdateUser,
    ) -> impl Future<Output = KeyholdResult<User>> + Send;
}

// ---------------------------------------------------------------------------
// One-time challenges
// ---------------------------------------------------------------------------

pub trait OtpRepository: Send + Sync {
    /// Store a new challenge and invalidate every active challenge for the
    /// same `(user_id, purpose)` in one step.
    fn create_challenge(
        &self,
        input: CreateOtpChallenge,
    ) -> impl Future<Output = KeyholdResult<OtpChallenge>> + Send;

    /// Most recently created challenge for `(user_id, purpose)`, whatever
    /// its state.
    fn latest_challenge(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
    ) -> impl Future<Output = KeyholdResult<Option<OtpChallenge>>> + Send;

    /// Atomically mark the challenge consumed if it is still active and
    /// its attempt count is within `max_attempts`.
    fn consume_challenge(
        &self,
        id: Uuid,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> impl Future<Output = KeyholdResult<ConsumeOutcome>> + Send;

    /// Atomically increment the attempt count; invalidates the challenge
    /// once the count exceeds `max_attempts`.
    fn record_failed_attempt(
        &self,
        id: Uuid,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> impl Future<Output = KeyholdResult<AttemptOutcome>> + Send;

    /// Drop challenges that expired before `now`. Returns the count removed.
    fn purge_expired_challenges(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = KeyholdResult<u64>> + Send;
}

// ---------------------------------------------------------------------------
// Trusted devices
// ---------------------------------------------------------------------------

pub trait DeviceRepository: Send + Sync {
    /// Atomic upsert keyed on `(user_id, device_fingerprint)`. An existing
    /// record is reactivated and its metadata and `last_used_at`
    /// refreshed. Returns the record and whether it was newly created.
    fn upsert_device(
        &self,
        input: RegisterDevice,
        now: DateTime<Utc>,
    ) -> impl Future<Output = KeyholdResult<(TrustedDevice, bool)>> + Send;

    fn find_device(
        &self,
        user_id: Uuid,
        fingerprint: &str,
    ) -> impl Future<Output = KeyholdResult<Option<TrustedDevice>>> + Send;

    fn list_devices(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = KeyholdResult<Vec<TrustedDevice>>> + Send;

    /// Soft-revoke one device. `NotFound` unless it belongs to `user_id`.
    fn deactivate_device(
        &self,
        user_id: Uuid,
        device_id: Uuid,
    ) -> impl Future<Output = KeyholdResult<TrustedDevice>> + Send;

    /// Soft-revoke every active device of the user; returns their ids.
    fn deactivate_all_devices(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = KeyholdResult<Vec<Uuid>>> + Send;
}

// ---------------------------------------------------------------------------
// Social identities
// ---------------------------------------------------------------------------

pub trait SocialIdentityRepository: Send + Sync {
    fn find_social_identity(
        &self,
        provider: SocialProvider,
        provider_id: &str,
    ) -> impl Future<Output = KeyholdResult<Option<SocialIdentity>>> + Send;

    /// Fails with `AlreadyExists` if `(provider, provider_id)` is linked.
    fn link_social_identity(
        &self,
        input: LinkSocialIdentity,
    ) -> impl Future<Output = KeyholdResult<SocialIdentity>> + Send;
}

// ---------------------------------------------------------------------------
// Refresh token rotation
// ---------------------------------------------------------------------------

pub trait RefreshTokenRepository: Send + Sync {
    fn create_refresh_token(
        &self,
        input: CreateRefreshToken,
    ) -> impl Future<Output = KeyholdResult<RefreshTokenRecord>> + Send;

    fn get_refresh_token(
        &self,
        token_id: Uuid,
    ) -> impl Future<Output = KeyholdResult<Option<RefreshTokenRecord>>> + Send;

    /// Atomic check-and-mark: if `token_id` is live, revoke it, link it to
    /// `successor` and store the successor. Of two concurrent calls for
    /// the same token exactly one sees `Rotated`.
    fn rotate_refresh_token(
        &self,
        token_id: Uuid,
        successor: CreateRefreshToken,
        now: DateTime<Utc>,
    ) -> impl Future<Output = KeyholdResult<RotationOutcome>> + Send;

    /// Revoke every live token of one rotation chain.
    fn revoke_token_family(
        &self,
        family_id: Uuid,
        now: DateTime<Utc>,
    ) -> impl Future<Output = KeyholdResult<u64>> + Send;

    /// Revoke every live token of the user.
    fn revoke_user_tokens(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> impl Future<Output = KeyholdResult<u64>> + Send;

    fn purge_expired_refresh_tokens(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = KeyholdResult<u64>> + Send;
}

// ---------------------------------------------------------------------------
// Roles & permissions
// ---------------------------------------------------------------------------

pub trait RoleRepository: Send + Sync {
    fn create_role(&self, input: CreateRole) -> impl Future<Output = KeyholdResult<Role>> + Send;
    fn get_role(&self, id: Uuid) -> impl Future<Output = KeyholdResult<Role>> + Send;

    /// Fails with `AlreadyExists` when the code is taken.
    fn create_permission(
        &self,
        input: CreatePermission,
    ) -> impl Future<Output = KeyholdResult<Permission>> + Send;
    fn find_permission_by_code(
        &self,
        code: &str,
    ) -> impl Future<Output = KeyholdResult<Option<Permission>>> + Send;

    /// Grant a permission to a role. Granting twice is a no-op.
    fn grant_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> impl Future<Output = KeyholdResult<()>> + Send;
    fn find_role_permissions(
        &self,
        role_id: Uuid,
    ) -> impl Future<Output = KeyholdResult<Vec<Permission>>> + Send;

    fn assign_role(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        organization_id: Option<Uuid>,
    ) -> impl Future<Output = KeyholdResult<UserRole>> + Send;
    fn deactivate_role_assignment(
        &self,
        assignment_id: Uuid,
    ) -> impl Future<Output = KeyholdResult<()>> + Send;

    /// Roles of the user's active assignments: the global ones plus, when
    /// `organization_id` is given, those scoped to that organization.
    fn find_roles_for_user(
        &self,
        user_id: Uuid,
        organization_id: Option<Uuid>,
    ) -> impl Future<Output = KeyholdResult<Vec<Role>>> + Send;
}

// ---------------------------------------------------------------------------
// Organization & warehouse access
// ---------------------------------------------------------------------------

pub trait AccessRepository: Send + Sync {
    /// Atomic: a default grant clears the user's other organization
    /// defaults in the same step.
    fn grant_organization_access(
        &self,
        input: GrantOrganizationAccess,
    ) -> impl Future<Output = KeyholdResult<OrganizationAccess>> + Send;

    /// Atomic: a default grant clears the user's other warehouse defaults
    /// in the same step.
    fn grant_warehouse_access(
        &self,
        input: GrantWarehouseAccess,
    ) -> impl Future<Output = KeyholdResult<WarehouseAccess>> + Send;

    fn deactivate_organization_access(
        &self,
        access_id: Uuid,
    ) -> impl Future<Output = KeyholdResult<()>> + Send;

    fn deactivate_warehouse_access(
        &self,
        access_id: Uuid,
    ) -> impl Future<Output = KeyholdResult<()>> + Send;

    /// All of the user's organization grants, or only those for
    /// `organization_id` when given. Inactive records included.
    fn find_organization_access(
        &self,
        user_id: Uuid,
        organization_id: Option<Uuid>,
    ) -> impl Future<Output = KeyholdResult<Vec<OrganizationAccess>>> + Send;

    /// All of the user's warehouse grants, or only those for
    /// `warehouse_id` when given. Inactive records included.
    fn find_warehouse_access(
        &self,
        user_id: Uuid,
        warehouse_id: Option<Uuid>,
    ) -> impl Future<Output = KeyholdResult<Vec<WarehouseAccess>>> + Send;
}

/// Everything the auth layer needs from persistence.
pub trait AuthStore:
    UserRepository
    + OtpRepository
    + DeviceRepository
    + SocialIdentityRepository
    + RefreshTokenRepository
    + RoleRepository
    + AccessRepository
    + Clone
    + 'static
{
}

impl<T> AuthStore for T where
    T: UserRepository
        + OtpRepository
        + DeviceRepository
        + SocialIdentityRepository
        + RefreshTokenRepository
        + RoleRepository
        + AccessRepository
        + Clone
        + 'static
{
}
