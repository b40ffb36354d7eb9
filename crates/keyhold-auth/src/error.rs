//! Authentication error types.

use keyhold_core::error::KeyholdError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Bad credentials or an unusable token. Deliberately carries no
    /// detail.
    #[error("unauthorized")]
    Unauthorized,

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("code has expired")]
    Expired,

    #[error("too many attempts")]
    AttemptsExceeded,

    #[error("code does not match")]
    Mismatch,

    #[error("refresh token replay detected")]
    ReplayDetected,

    #[error("account is disabled")]
    AccountDisabled,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

impl AuthError {
    /// HTTP-style status for an outer transport.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::InvalidRequest(_) | AuthError::Mismatch => 400,
            AuthError::Unauthorized | AuthError::ReplayDetected => 401,
            AuthError::AccountDisabled => 403,
            AuthError::NotFound(_) => 404,
            AuthError::AlreadyExists(_) => 409,
            AuthError::Expired => 410,
            AuthError::AttemptsExceeded => 429,
            AuthError::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code. A replay is reported to the caller
    /// as a plain `unauthorized`.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::InvalidRequest(_) => "invalid_request",
            AuthError::Unauthorized | AuthError::ReplayDetected => "unauthorized",
            AuthError::AlreadyExists(_) => "already_exists",
            AuthError::NotFound(_) => "not_found",
            AuthError::Expired => "expired",
            AuthError::AttemptsExceeded => "attempts_exceeded",
            AuthError::Mismatch => "mismatch",
            AuthError::AccountDisabled => "account_disabled",
            AuthError::Internal(_) => "internal_error",
        }
    }

    /// Message safe to show a client.
    pub fn public_message(&self) -> String {
        match self {
            AuthError::Unauthorized | AuthError::ReplayDetected => "unauthorized".into(),
            AuthError::Internal(_) => "internal error".into(),
            other => other.to_string(),
        }
    }
}

impl From<KeyholdError> for AuthError {
    fn from(err: KeyholdError) -> Self {
        match err {
            KeyholdError::AlreadyExists { entity } => AuthError::AlreadyExists(entity),
            KeyholdError::NotFound { entity, .. } => AuthError::NotFound(entity),
            KeyholdError::Validation { message } => AuthError::InvalidRequest(message),
            other => AuthError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_looks_like_unauthorized_to_callers() {
        let replay = AuthError::ReplayDetected;
        let bad = AuthError::Unauthorized;
        assert_eq!(replay.status_code(), bad.status_code());
        assert_eq!(replay.error_code(), bad.error_code());
        assert_eq!(replay.public_message(), bad.public_message());
    }

    #[test]
    fn internal_message_is_not_leaked() {
        let err = AuthError::from(KeyholdError::Database("connection reset by 10.0.0.5".into()));
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.public_message(), "internal error");
    }

    #[test]
    fn store_errors_map_to_taxonomy() {
        assert!(matches!(
            AuthError::from(KeyholdError::already_exists("user.email")),
            AuthError::AlreadyExists(_)
        ));
        assert!(matches!(
            AuthError::from(KeyholdError::not_found("trusted_device", "x")),
            AuthError::NotFound(_)
        ));
        assert!(matches!(
            AuthError::from(KeyholdError::Validation {
                message: "bad".into()
            }),
            AuthError::InvalidRequest(_)
        ));
    }
}
