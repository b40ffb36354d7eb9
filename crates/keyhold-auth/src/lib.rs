//! keyhold auth — credential verification, one-time challenges, device
//! trust, social sign-in, token issuance and scoped permission checks.

pub mod config;
pub mod device;
pub mod error;
pub mod otp;
pub mod password;
pub mod permission;
pub mod service;
pub mod social;
pub mod token;

pub use config::AuthConfig;
pub use error::{AuthError, AuthResult};
pub use service::{AuthOutput, AuthService, LoginInput, LoginOutcome, RegisterInput};
pub use token::{TokenClaims, TokenClass};
