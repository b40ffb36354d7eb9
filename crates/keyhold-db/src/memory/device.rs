//! [`DeviceRepository`] over [`MemoryStore`].

use chrono::{DateTime, Utc};
use keyhold_core::error::{KeyholdError, KeyholdResult};
use keyhold_core::models::device::{RegisterDevice, TrustedDevice};
use keyhold_core::repository::DeviceRepository;
use uuid::Uuid;

use super::MemoryStore;

impl DeviceRepository for MemoryStore {
    async fn upsert_device(
        &self,
        input: RegisterDevice,
        now: DateTime<Utc>,
    ) -> KeyholdResult<(TrustedDevice, bool)> {
        let key = (input.user_id, input.device_fingerprint.clone());
        let mut tables = self.tables.write().await;

        if let Some(id) = tables.devices_by_fingerprint.get(&key).copied() {
            let device = tables
                .devices
                .get_mut(&id)
                .ok_or_else(|| KeyholdError::not_found("trusted_device", id))?;
            if input.device_name.is_some() {
                device.device_name = input.device_name;
            }
            if input.user_agent.is_some() {
                device.user_agent = input.user_agent;
            }
            if input.ip_address.is_some() {
                device.ip_address = input.ip_address;
            }
            device.is_active = true;
            device.last_used_at = now;
            return Ok((device.clone(), false));
        }

        let device = TrustedDevice {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            device_fingerprint: input.device_fingerprint,
            device_name: input.device_name,
            user_agent: input.user_agent,
            ip_address: input.ip_address,
            is_active: true,
            last_used_at: now,
            created_at: now,
        };
        tables.devices_by_fingerprint.insert(key, device.id);
        tables.devices.insert(device.id, device.clone());
        Ok((device, true))
    }

    async fn find_device(
        &self,
        user_id: Uuid,
        fingerprint: &str,
    ) -> KeyholdResult<Option<TrustedDevice>> {
        let tables = self.tables.read().await;
        Ok(tables
            .devices_by_fingerprint
            .get(&(user_id, fingerprint.to_string()))
            .and_then(|id| tables.devices.get(id))
            .cloned())
    }

    async fn list_devices(&self, user_id: Uuid) -> KeyholdResult<Vec<TrustedDevice>> {
        let tables = self.tables.read().await;
        let mut devices: Vec<TrustedDevice> = tables
            .devices
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        devices.sort_by(|a, b| b.last_used_at.cmp(&a.last_used_at));
        Ok(devices)
    }

    async fn deactivate_device(
        &self,
        user_id: Uuid,
        device_id: Uuid,
    ) -> KeyholdResult<TrustedDevice> {
        let mut tables = self.tables.write().await;
        let device = tables
            .devices
            .get_mut(&device_id)
            .filter(|d| d.user_id == user_id)
            .ok_or_else(|| KeyholdError::not_found("trusted_device", device_id))?;
        device.is_active = false;
        Ok(device.clone())
    }

    async fn deactivate_all_devices(&self, user_id: Uuid) -> KeyholdResult<Vec<Uuid>> {
        let mut tables = self.tables.write().await;
        let mut revoked = Vec::new();
        for device in tables
            .devices
            .values_mut()
            .filter(|d| d.user_id == user_id && d.is_active)
        {
            device.is_active = false;
            revoked.push(device.id);
        }
        Ok(revoked)
    }
}
