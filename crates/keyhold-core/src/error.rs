//! Store-level error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyholdError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Entity already exists: {entity}")]
    AlreadyExists { entity: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Event delivery failed: {0}")]
    EventDelivery(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl KeyholdError {
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn already_exists(entity: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity: entity.into(),
        }
    }
}

pub type KeyholdResult<T> = Result<T, KeyholdError>;
