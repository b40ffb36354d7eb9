//! Organization and warehouse access grants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ordered from least to most permissive, so `max()` picks the winner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessLevel {
    None,
    Limited,
    ReadOnly,
    Full,
}

impl AccessLevel {
    pub fn grants_access(&self) -> bool {
        *self != AccessLevel::None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationAccess {
    pub id: Uuid,
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub access_level: AccessLevel,
    pub is_active: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarehouseAccess {
    pub id: Uuid,
    pub user_id: Uuid,
    pub warehouse_id: Uuid,
    /// Organization the warehouse belongs to, if known.
    pub organization_id: Option<Uuid>,
    pub access_level: AccessLevel,
    pub is_active: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct GrantOrganizationAccess {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub access_level: AccessLevel,
    /// Setting this clears the flag on the user's other organization grants.
    pub is_default: bool,
}

#[derive(Debug, Clone)]
pub struct GrantWarehouseAccess {
    pub user_id: Uuid,
    pub warehouse_id: Uuid,
    pub organization_id: Option<Uuid>,
    pub access_level: AccessLevel,
    /// Setting this clears the flag on the user's other warehouse grants.
    pub is_default: bool,
}
