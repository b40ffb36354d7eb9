//! [`RoleRepository`] over [`MemoryStore`].

use chrono::Utc;
use keyhold_core::error::{KeyholdError, KeyholdResult};
use keyhold_core::models::permission::{CreatePermission, Permission, RolePermission};
use keyhold_core::models::role::{CreateRole, Role, UserRole};
use keyhold_core::repository::RoleRepository;
use uuid::Uuid;

use super::MemoryStore;

impl RoleRepository for MemoryStore {
    async fn create_role(&self, input: CreateRole) -> KeyholdResult<Role> {
        let mut tables = self.tables.write().await;
        if let Some(template_id) = input.template_role_id {
            if !tables.roles.contains_key(&template_id) {
                return Err(KeyholdError::not_found("role", template_id));
            }
        }
        let role = Role {
            id: Uuid::new_v4(),
            name: input.name,
            description: input.description,
            is_system_role: input.is_system_role,
            template_role_id: input.template_role_id,
            created_at: Utc::now(),
        };
        tables.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn get_role(&self, id: Uuid) -> KeyholdResult<Role> {
        let tables = self.tables.read().await;
        tables
            .roles
            .get(&id)
            .cloned()
            .ok_or_else(|| KeyholdError::not_found("role", id))
    }

    async fn create_permission(&self, input: CreatePermission) -> KeyholdResult<Permission> {
        let mut tables = self.tables.write().await;
        if tables.permissions_by_code.contains_key(&input.code) {
            return Err(KeyholdError::already_exists("permission.code"));
        }
        let permission = Permission {
            id: Uuid::new_v4(),
            code: input.code,
            module: input.module,
            description: input.description,
        };
        tables
            .permissions_by_code
            .insert(permission.code.clone(), permission.id);
        tables.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    async fn find_permission_by_code(&self, code: &str) -> KeyholdResult<Option<Permission>> {
        let tables = self.tables.read().await;
        Ok(tables
            .permissions_by_code
            .get(code)
            .and_then(|id| tables.permissions.get(id))
            .cloned())
    }

    async fn grant_permission(&self, role_id: Uuid, permission_id: Uuid) -> KeyholdResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.roles.contains_key(&role_id) {
            return Err(KeyholdError::not_found("role", role_id));
        }
        if !tables.permissions.contains_key(&permission_id) {
            return Err(KeyholdError::not_found("permission", permission_id));
        }
        tables.role_permissions.insert(RolePermission {
            role_id,
            permission_id,
        });
        Ok(())
    }

    async fn find_role_permissions(&self, role_id: Uuid) -> KeyholdResult<Vec<Permission>> {
        let tables = self.tables.read().await;
        let mut permissions: Vec<Permission> = tables
            .role_permissions
            .iter()
            .filter(|rp| rp.role_id == role_id)
            .filter_map(|rp| tables.permissions.get(&rp.permission_id))
            .cloned()
            .collect();
        permissions.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(permissions)
    }

    async fn assign_role(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        organization_id: Option<Uuid>,
    ) -> KeyholdResult<UserRole> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&user_id) {
            return Err(KeyholdError::not_found("user", user_id));
        }
        if !tables.roles.contains_key(&role_id) {
            return Err(KeyholdError::not_found("role", role_id));
        }

        // Re-assigning reactivates the existing record.
        if let Some(existing) = tables.user_roles.values_mut().find(|ur| {
            ur.user_id == user_id && ur.role_id == role_id && ur.organization_id == organization_id
        }) {
            existing.is_active = true;
            return Ok(existing.clone());
        }

        let assignment = UserRole {
            id: Uuid::new_v4(),
            user_id,
            role_id,
            organization_id,
            is_active: true,
            created_at: Utc::now(),
        };
        tables.user_roles.insert(assignment.id, assignment.clone());
        Ok(assignment)
    }

    async fn deactivate_role_assignment(&self, assignment_id: Uuid) -> KeyholdResult<()> {
        let mut tables = self.tables.write().await;
        let assignment = tables
            .user_roles
            .get_mut(&assignment_id)
            .ok_or_else(|| KeyholdError::not_found("user_role", assignment_id))?;
        assignment.is_active = false;
        Ok(())
    }

    async fn find_roles_for_user(
        &self,
        user_id: Uuid,
        organization_id: Option<Uuid>,
    ) -> KeyholdResult<Vec<Role>> {
        let tables = self.tables.read().await;
        let mut role_ids: Vec<Uuid> = tables
            .user_roles
            .values()
            .filter(|ur| ur.user_id == user_id && ur.is_active)
            .filter(|ur| ur.organization_id.is_none() || ur.organization_id == organization_id)
            .map(|ur| ur.role_id)
            .collect();
        role_ids.sort();
        role_ids.dedup();
        Ok(role_ids
            .iter()
            .filter_map(|id| tables.roles.get(id))
            .cloned()
            .collect())
    }
}
