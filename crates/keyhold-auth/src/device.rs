//! Trusted device registry.

use std::sync::Arc;

use chrono::Utc;
use keyhold_core::events::{AuthEvent, EventBus};
use keyhold_core::models::device::{RegisterDevice, TrustedDevice};
use keyhold_core::repository::DeviceRepository;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};

/// Longest fingerprint accepted from a client.
pub(crate) const MAX_FINGERPRINT_LEN: usize = 256;

#[derive(Clone)]
pub struct DeviceRegistry<R> {
    store: R,
    events: Arc<dyn EventBus>,
}

impl<R: DeviceRepository> DeviceRegistry<R> {
    pub fn new(store: R, events: Arc<dyn EventBus>) -> Self {
        Self { store, events }
    }

    fn publish(&self, event: AuthEvent) {
        let topic = event.topic();
        if let Err(e) = self.events.publish(event) {
            warn!(topic, error = %e, "event publish failed");
        }
    }

    /// Register or refresh a device. Re-registering a known fingerprint
    /// returns the existing record with updated metadata.
    pub async fn register(&self, input: RegisterDevice) -> AuthResult<TrustedDevice> {
        let fingerprint = input.device_fingerprint.trim().to_string();
        if fingerprint.is_empty() || fingerprint.len() > MAX_FINGERPRINT_LEN {
            return Err(AuthError::InvalidRequest(
                "device fingerprint must be 1-256 characters".into(),
            ));
        }
        let input = RegisterDevice {
            device_fingerprint: fingerprint,
            ..input
        };

        let (device, created) = self.store.upsert_device(input, Utc::now()).await?;
        if created {
            info!(user_id = %device.user_id, device_id = %device.id, "device registered");
        }
        self.publish(AuthEvent::DeviceRegistered {
            user_id: device.user_id,
            device_id: device.id,
            created,
        });
        Ok(device)
    }

    /// Active record for the fingerprint, if the user trusts it.
    pub async fn find_trusted(
        &self,
        user_id: Uuid,
        fingerprint: &str,
    ) -> AuthResult<Option<TrustedDevice>> {
        Ok(self
            .store
            .find_device(user_id, fingerprint.trim())
            .await?
            .filter(|d| d.is_active))
    }

    /// All of the user's devices, most recently used first.
    pub async fn list(&self, user_id: Uuid) -> AuthResult<Vec<TrustedDevice>> {
        Ok(self.store.list_devices(user_id).await?)
    }

    pub async fn revoke(&self, user_id: Uuid, device_id: Uuid) -> AuthResult<TrustedDevice> {
        let device = self.store.deactivate_device(user_id, device_id).await?;
        info!(%user_id, %device_id, "device revoked");
        self.publish(AuthEvent::DeviceRevoked {
            user_id,
            device_ids: vec![device_id],
        });
        Ok(device)
    }

    pub async fn revoke_all(&self, user_id: Uuid) -> AuthResult<u64> {
        let device_ids = self.store.deactivate_all_devices(user_id).await?;
        let count = device_ids.len() as u64;
        if !device_ids.is_empty() {
            info!(%user_id, count, "all devices revoked");
            self.publish(AuthEvent::DeviceRevoked {
                user_id,
                device_ids,
            });
        }
        Ok(count)
    }
}
