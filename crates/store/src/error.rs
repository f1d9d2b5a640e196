//! Error types for store and provider operations.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the durable queue store and the fact store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The one-active-entry invariant would be violated. Raised by the
    /// uniqueness constraint when a guarded write loses a race.
    #[error("active entry already exists for ({action}, {mac}, {port})")]
    DuplicateActive {
        action: String,
        mac: String,
        port: u16,
    },

    #[error("queue entry not found: {0}")]
    NotFound(Uuid),

    /// Backend-specific failure (connection, I/O, constraint other than
    /// the active-entry invariant).
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by host and action-definition providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("malformed definition: {0}")]
    Malformed(String),
}
