//! Domain models for keyhold.
//!
//! Records are owned by the store; the auth crate only ever sees them
//! through the repository traits in [`crate::repository`].

pub mod access;
pub mod device;
pub mod otp;
pub mod permission;
pub mod refresh_token;
pub mod role;
pub mod social;
pub mod user;
