//! Role and scope based permission resolution.
//!
//! A check passes when some active role of the user grants the
//! permission and the user holds usable access to every organization and
//! warehouse named in the check. Holding any system role lifts the scope
//! requirement; it never grants a permission on its own.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use keyhold_core::models::access::{AccessLevel, OrganizationAccess, WarehouseAccess};
use keyhold_core::models::permission::WILDCARD;
use keyhold_core::models::role::{CreateRole, Role};
use keyhold_core::repository::{AccessRepository, RoleRepository};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};

/// Common view over organization and warehouse grants.
trait ScopedGrant {
    fn id(&self) -> Uuid;
    fn level(&self) -> AccessLevel;
    fn is_active(&self) -> bool;
    fn is_default(&self) -> bool;
    fn created_at(&self) -> DateTime<Utc>;

    fn usable(&self) -> bool {
        self.is_active() && self.level().grants_access()
    }
}

impl ScopedGrant for OrganizationAccess {
    fn id(&self) -> Uuid {
        self.id
    }
    fn level(&self) -> AccessLevel {
        self.access_level
    }
    fn is_active(&self) -> bool {
        self.is_active
    }
    fn is_default(&self) -> bool {
        self.is_default
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl ScopedGrant for WarehouseAccess {
    fn id(&self) -> Uuid {
        self.id
    }
    fn level(&self) -> AccessLevel {
        self.access_level
    }
    fn is_active(&self) -> bool {
        self.is_active
    }
    fn is_default(&self) -> bool {
        self.is_default
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Most permissive usable grant. Ties go to the oldest record, then the
/// smallest id.
fn strongest<G: ScopedGrant>(grants: impl IntoIterator<Item = G>) -> Option<G> {
    grants.into_iter().filter(|g| g.usable()).min_by(|a, b| {
        b.level()
            .cmp(&a.level())
            .then(a.created_at().cmp(&b.created_at()))
            .then(a.id().cmp(&b.id()))
    })
}

/// The flagged default if there is one, else the strongest grant.
fn select_default<G: ScopedGrant>(grants: Vec<G>) -> Option<G> {
    let (defaults, others): (Vec<G>, Vec<G>) = grants
        .into_iter()
        .filter(|g| g.usable())
        .partition(|g| g.is_default());
    strongest(defaults).or_else(|| strongest(others))
}

#[derive(Clone)]
pub struct PermissionResolver<R> {
    store: R,
}

impl<R: RoleRepository + AccessRepository> PermissionResolver<R> {
    pub fn new(store: R) -> Self {
        Self { store }
    }

    /// Whether the user may exercise `permission_code` in the given scope.
    ///
    /// Never fails: unknown permissions and store errors both deny.
    pub async fn can(
        &self,
        user_id: Uuid,
        permission_code: &str,
        organization_id: Option<Uuid>,
        warehouse_id: Option<Uuid>,
    ) -> bool {
        match self
            .evaluate(user_id, permission_code, organization_id, warehouse_id)
            .await
        {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(
                    %user_id,
                    permission = permission_code,
                    error = %e,
                    "permission check failed, denying"
                );
                false
            }
        }
    }

    async fn evaluate(
        &self,
        user_id: Uuid,
        permission_code: &str,
        organization_id: Option<Uuid>,
        warehouse_id: Option<Uuid>,
    ) -> AuthResult<bool> {
        let Some(permission) = self.store.find_permission_by_code(permission_code).await? else {
            debug!(permission = permission_code, "unknown permission");
            return Ok(false);
        };

        // The warehouse decides the organization when the caller named none.
        let warehouse_grant = match warehouse_id {
            Some(wh) => strongest(self.store.find_warehouse_access(user_id, Some(wh)).await?),
            None => None,
        };
        let warehouse_org = warehouse_grant.as_ref().and_then(|g| g.organization_id);
        let scope_org = organization_id.or(warehouse_org);

        let roles = self.store.find_roles_for_user(user_id, scope_org).await?;
        let mut granted = false;
        for role in &roles {
            let permissions = self.store.find_role_permissions(role.id).await?;
            if permissions
                .iter()
                .any(|p| p.code == permission.code || p.code == WILDCARD)
            {
                granted = true;
                break;
            }
        }
        if !granted {
            return Ok(false);
        }
        if roles.iter().any(|r| r.is_system_role) {
            return Ok(true);
        }

        if let Some(org) = scope_org {
            let grants = self.store.find_organization_access(user_id, Some(org)).await?;
            if strongest(grants).is_none() {
                return Ok(false);
            }
        }

        if warehouse_id.is_some() {
            if warehouse_grant.is_none() {
                return Ok(false);
            }
            if let (Some(requested), Some(owner)) = (organization_id, warehouse_org) {
                if requested != owner {
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }

    /// Sorted permission codes granted by the user's active roles in the
    /// given organization (global roles always count).
    pub async fn effective_permissions(
        &self,
        user_id: Uuid,
        organization_id: Option<Uuid>,
    ) -> AuthResult<Vec<String>> {
        let mut codes = BTreeSet::new();
        for role in self.store.find_roles_for_user(user_id, organization_id).await? {
            for permission in self.store.find_role_permissions(role.id).await? {
                codes.insert(permission.code);
            }
        }
        Ok(codes.into_iter().collect())
    }

    pub async fn default_organization(
        &self,
        user_id: Uuid,
    ) -> AuthResult<Option<OrganizationAccess>> {
        let grants = self.store.find_organization_access(user_id, None).await?;
        Ok(select_default(grants))
    }

    /// Default warehouse, limited to one organization when given.
    pub async fn default_warehouse(
        &self,
        user_id: Uuid,
        organization_id: Option<Uuid>,
    ) -> AuthResult<Option<WarehouseAccess>> {
        let grants: Vec<WarehouseAccess> = self
            .store
            .find_warehouse_access(user_id, None)
            .await?
            .into_iter()
            .filter(|g| organization_id.is_none() || g.organization_id == organization_id)
            .collect();
        Ok(select_default(grants))
    }

    /// New non-system role carrying a copy of the template's grants.
    pub async fn create_role_from_template(
        &self,
        template_role_id: Uuid,
        name: &str,
        description: Option<String>,
    ) -> AuthResult<Role> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AuthError::InvalidRequest("role name is required".into()));
        }

        let template = self.store.get_role(template_role_id).await?;
        let permissions = self.store.find_role_permissions(template.id).await?;

        let role = self
            .store
            .create_role(CreateRole {
                name: name.to_string(),
                description: description.unwrap_or_else(|| template.description.clone()),
                is_system_role: false,
                template_role_id: Some(template.id),
            })
            .await?;
        for permission in &permissions {
            self.store.grant_permission(role.id, permission.id).await?;
        }

        info!(
            role_id = %role.id,
            template_id = %template.id,
            grants = permissions.len(),
            "role created from template"
        );
        Ok(role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn org_grant(level: AccessLevel, is_default: bool, age_secs: i64) -> OrganizationAccess {
        OrganizationAccess {
            id: Uuid::new_v4(),
            user_id: Uuid::nil(),
            organization_id: Uuid::new_v4(),
            access_level: level,
            is_active: true,
            is_default,
            created_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[test]
    fn strongest_prefers_level_then_age() {
        let limited = org_grant(AccessLevel::Limited, false, 100);
        let full_new = org_grant(AccessLevel::Full, false, 10);
        let full_old = org_grant(AccessLevel::Full, false, 50);
        let expected = full_old.id;

        let picked = strongest(vec![limited, full_new, full_old]).unwrap();
        assert_eq!(picked.id, expected);
    }

    #[test]
    fn level_none_and_inactive_are_unusable() {
        let none = org_grant(AccessLevel::None, false, 0);
        let mut inactive = org_grant(AccessLevel::Full, false, 0);
        inactive.is_active = false;
        assert!(strongest(vec![none, inactive]).is_none());
    }

    #[test]
    fn flagged_default_wins_over_stronger_grant() {
        let full = org_grant(AccessLevel::Full, false, 100);
        let readonly_default = org_grant(AccessLevel::ReadOnly, true, 10);
        let expected = readonly_default.id;

        let picked = select_default(vec![full, readonly_default]).unwrap();
        assert_eq!(picked.id, expected);
    }

    #[test]
    fn inactive_default_is_ignored() {
        let full = org_grant(AccessLevel::Full, false, 100);
        let mut stale_default = org_grant(AccessLevel::ReadOnly, true, 10);
        stale_default.is_active = false;
        let expected = full.id;

        let picked = select_default(vec![full, stale_default]).unwrap();
        assert_eq!(picked.id, expected);
    }
}
