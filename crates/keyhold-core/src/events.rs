//! Audit and notification events fanned out by the auth layer.
//!
//! The bus is for distribution only. Publishing must never block a
//! request; subscribers that fall behind lose events rather than
//! slowing down authentication.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::KeyholdResult;
use crate::models::otp::OtpPurpose;

/// Payload of an `auth:prompt` event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptData {
    pub purpose: OtpPurpose,
    pub challenge_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub delivery_hint: Option<String>,
    pub device_fingerprint: Option<String>,
}

/// A code handed to the notification collaborator for email/SMS delivery.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpDispatch {
    pub user_id: Uuid,
    pub purpose: OtpPurpose,
    pub code: String,
    pub destination: Option<String>,
}

impl core::fmt::Debug for OtpDispatch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OtpDispatch")
            .field("user_id", &self.user_id)
            .field("purpose", &self.purpose)
            .field("code", &"<redacted>")
            .field("destination", &self.destination)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum AuthEvent {
    /// Step-up required before the user may continue.
    #[serde(rename = "auth:prompt")]
    AuthPrompt { user_id: Uuid, prompt: PromptData },

    #[serde(rename = "device:registered")]
    DeviceRegistered {
        user_id: Uuid,
        device_id: Uuid,
        created: bool,
    },

    #[serde(rename = "device:revoked")]
    DeviceRevoked { user_id: Uuid, device_ids: Vec<Uuid> },

    /// A rotated refresh token was presented again; every refresh token
    /// of the user has been revoked.
    #[serde(rename = "token:replay")]
    TokenReplay {
        user_id: Uuid,
        family_id: Uuid,
        revoked: u64,
    },

    #[serde(rename = "otp:dispatch")]
    OtpDispatch(OtpDispatch),
}

impl AuthEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            AuthEvent::AuthPrompt { .. } => "auth:prompt",
            AuthEvent::DeviceRegistered { .. } => "device:registered",
            AuthEvent::DeviceRevoked { .. } => "device:revoked",
            AuthEvent::TokenReplay { .. } => "token:replay",
            AuthEvent::OtpDispatch(_) => "otp:dispatch",
        }
    }

    pub fn user_id(&self) -> Uuid {
        match self {
            AuthEvent::AuthPrompt { user_id, .. }
            | AuthEvent::DeviceRegistered { user_id, .. }
            | AuthEvent::DeviceRevoked { user_id, .. }
            | AuthEvent::TokenReplay { user_id, .. } => *user_id,
            AuthEvent::OtpDispatch(dispatch) => dispatch.user_id,
        }
    }
}

/// Pub/sub sink for [`AuthEvent`]s.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: AuthEvent) -> KeyholdResult<()>;
}

impl<B> EventBus for std::sync::Arc<B>
where
    B: EventBus + ?Sized,
{
    fn publish(&self, event: AuthEvent) -> KeyholdResult<()> {
        (**self).publish(event)
    }
}

/// Discards every event.
#[derive(Debug, Clone, Default)]
pub struct NoopEventBus;

impl EventBus for NoopEventBus {
    fn publish(&self, _event: AuthEvent) -> KeyholdResult<()> {
        Ok(())
    }
}

/// In-process fan-out over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastEventBus {
    sender: broadcast::Sender<AuthEvent>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus for BroadcastEventBus {
    fn publish(&self, event: AuthEvent) -> KeyholdResult<()> {
        let topic = event.topic();
        // No subscribers is not an error: nobody is listening yet.
        if self.sender.send(event).is_err() {
            tracing::trace!(topic, "event dropped, no subscribers");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let bus = BroadcastEventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        let user_id = Uuid::new_v4();

        bus.publish(AuthEvent::DeviceRevoked {
            user_id,
            device_ids: vec![],
        })
        .unwrap();

        assert_eq!(a.recv().await.unwrap().topic(), "device:revoked");
        assert_eq!(b.recv().await.unwrap().user_id(), user_id);
    }

    #[test]
    fn publish_without_subscribers_is_ok() {
        let bus = BroadcastEventBus::default();
        let result = bus.publish(AuthEvent::TokenReplay {
            user_id: Uuid::new_v4(),
            family_id: Uuid::new_v4(),
            revoked: 2,
        });
        assert!(result.is_ok());
    }

    #[test]
    fn dispatch_debug_redacts_code() {
        let dispatch = OtpDispatch {
            user_id: Uuid::new_v4(),
            purpose: OtpPurpose::Login,
            code: "123456".into(),
            destination: None,
        };
        let rendered = format!("{dispatch:?}");
        assert!(!rendered.contains("123456"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn prompt_serializes_with_topic_tag() {
        let event = AuthEvent::AuthPrompt {
            user_id: Uuid::nil(),
            prompt: PromptData {
                purpose: OtpPurpose::Login,
                challenge_id: Uuid::nil(),
                expires_at: Utc::now(),
                delivery_hint: None,
                device_fingerprint: Some("fp-1".into()),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "auth:prompt");
        assert_eq!(json["data"]["prompt"]["purpose"], "login");
        assert_eq!(json["data"]["prompt"]["deviceFingerprint"], "fp-1");
    }
}
