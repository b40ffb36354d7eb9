//! Role domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    /// System roles bypass organization and warehouse scope checks.
    pub is_system_role: bool,
    /// Role this one was cloned from. A back-reference only; the template
    /// owns nothing here.
    pub template_role_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateRole {
    pub name: String,
    pub description: String,
    pub is_system_role: bool,
    pub template_role_id: Option<Uuid>,
}

/// Assignment of a role to a user, optionally limited to one organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRole {
    pub id: Uuid,
    pub user_id: Uuid,
    pub role_id: Uuid,
    /// `None` = global assignment.
    pub organization_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}
