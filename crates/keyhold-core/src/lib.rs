//! keyhold core — domain models, store contracts and audit events shared
//! by the auth and storage crates.

pub mod error;
pub mod events;
pub mod models;
pub mod repository;

pub use error::{KeyholdError, KeyholdResult};
pub use events::{AuthEvent, BroadcastEventBus, EventBus, NoopEventBus};
