//! Shared domain types for the huginn action scheduler.
//!
//! This crate holds the data model everything else agrees on: the action
//! catalog ([`ActionDefinition`]), the read-only per-tick host view
//! ([`HostSnapshot`]), the durable queue entry ([`QueueEntry`]) with its
//! status lifecycle, and the runtime flags an operator can flip while the
//! scheduler is running ([`RuntimeConfig`]).

pub mod action;
pub mod config;
pub mod host;
pub mod queue;

pub use action::{ActionDefinition, ActionKind, RateLimit};
pub use config::RuntimeConfig;
pub use host::HostSnapshot;
pub use queue::{
    retry_backoff, EntryMetadata, NewQueueEntry, PresenceMarker, QueueEntry, QueueStatus,
    ERROR_EXPIRED, ERROR_TIMEOUT, PRESENCE_JOIN, PRESENCE_LEAVE,
};
