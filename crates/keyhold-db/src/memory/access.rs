//! [`AccessRepository`] over [`MemoryStore`].

use chrono::Utc;
use keyhold_core::error::{KeyholdError, KeyholdResult};
use keyhold_core::models::access::{
    GrantOrganizationAccess, GrantWarehouseAccess, OrganizationAccess, WarehouseAccess,
};
use keyhold_core::repository::AccessRepository;
use uuid::Uuid;

use super::MemoryStore;

impl AccessRepository for MemoryStore {
    async fn grant_organization_access(
        &self,
        input: GrantOrganizationAccess,
    ) -> KeyholdResult<OrganizationAccess> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&input.user_id) {
            return Err(KeyholdError::not_found("user", input.user_id));
        }

        if input.is_default {
            for grant in tables
                .organization_access
                .values_mut()
                .filter(|g| g.user_id == input.user_id)
            {
                grant.is_default = false;
            }
        }

        // One record per (user, organization): a repeated grant updates it.
        if let Some(existing) = tables.organization_access.values_mut().find(|g| {
            g.user_id == input.user_id && g.organization_id == input.organization_id
        }) {
            existing.access_level = input.access_level;
            existing.is_active = true;
            existing.is_default = input.is_default;
            return Ok(existing.clone());
        }

        let grant = OrganizationAccess {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            organization_id: input.organization_id,
            access_level: input.access_level,
            is_active: true,
            is_default: input.is_default,
            created_at: Utc::now(),
        };
        tables.organization_access.insert(grant.id, grant.clone());
        Ok(grant)
    }

    async fn grant_warehouse_access(
        &self,
        input: GrantWarehouseAccess,
    ) -> KeyholdResult<WarehouseAccess> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&input.user_id) {
            return Err(KeyholdError::not_found("user", input.user_id));
        }

        if input.is_default {
            for grant in tables
                .warehouse_access
                .values_mut()
                .filter(|g| g.user_id == input.user_id)
            {
                grant.is_default = false;
            }
        }

        if let Some(existing) = tables
            .warehouse_access
            .values_mut()
            .find(|g| g.user_id == input.user_id && g.warehouse_id == input.warehouse_id)
        {
            existing.organization_id = input.organization_id;
            existing.access_level = input.access_level;
            existing.is_active = true;
            existing.is_default = input.is_default;
            return Ok(existing.clone());
        }

        let grant = WarehouseAccess {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            warehouse_id: input.warehouse_id,
            organization_id: input.organization_id,
            access_level: input.access_level,
            is_active: true,
            is_default: input.is_default,
            created_at: Utc::now(),
        };
        tables.warehouse_access.insert(grant.id, grant.clone());
        Ok(grant)
    }

    async fn deactivate_organization_access(&self, access_id: Uuid) -> KeyholdResult<()> {
        let mut tables = self.tables.write().await;
        let grant = tables
            .organization_access
            .get_mut(&access_id)
            .ok_or_else(|| KeyholdError::not_found("organization_access", access_id))?;
        grant.is_active = false;
        grant.is_default = false;
        Ok(())
    }

    async fn deactivate_warehouse_access(&self, access_id: Uuid) -> KeyholdResult<()> {
        let mut tables = self.tables.write().await;
        let grant = tables
            .warehouse_access
            .get_mut(&access_id)
            .ok_or_else(|| KeyholdError::not_found("warehouse_access", access_id))?;
        grant.is_active = false;
        grant.is_default = false;
        Ok(())
    }

    async fn find_organization_access(
        &self,
        user_id: Uuid,
        organization_id: Option<Uuid>,
    ) -> KeyholdResult<Vec<OrganizationAccess>> {
        let tables = self.tables.read().await;
        let mut grants: Vec<OrganizationAccess> = tables
            .organization_access
            .values()
            .filter(|g| g.user_id == user_id)
            .filter(|g| organization_id.is_none_or(|org| g.organization_id == org))
            .cloned()
            .collect();
        grants.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(grants)
    }

    async fn find_warehouse_access(
        &self,
        user_id: Uuid,
        warehouse_id: Option<Uuid>,
    ) -> KeyholdResult<Vec<WarehouseAccess>> {
        let tables = self.tables.read().await;
        let mut grants: Vec<WarehouseAccess> = tables
            .warehouse_access
            .values()
            .filter(|g| g.user_id == user_id)
            .filter(|g| warehouse_id.is_none_or(|wh| g.warehouse_id == wh))
            .cloned()
            .collect();
        grants.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(grants)
    }
}
