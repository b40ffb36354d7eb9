//! Permission domain model.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Grant code that matches every permission.
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub id: Uuid,
    /// Unique dotted code, e.g. `package.read`.
    pub code: String,
    /// Owning module, e.g. `package`.
    pub module: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct CreatePermission {
    pub code: String,
    pub module: String,
    pub description: String,
}

/// Join record granting a permission to a role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RolePermission {
    pub role_id: Uuid,
    pub permission_id: Uuid,
}
