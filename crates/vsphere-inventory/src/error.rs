//! Error types for inventory access.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for inventory operations.
pub type InventoryResult<T> = Result<T, InventoryError>;

/// Errors that can occur while talking to the inventory.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("{kind} name is ambiguous, {count} candidates")]
    Ambiguous { kind: &'static str, count: usize },

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}
