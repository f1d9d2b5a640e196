//! External-interface traits for the huginn scheduler, plus an in-memory
//! reference implementation.
//!
//! The scheduler consumes four collaborators, all defined here as
//! object-safe async traits:
//! - [`QueueStore`] — the durable action queue (guarded atomic insert,
//!   query, update, promotion),
//! - [`HostProvider`] — host snapshots from the scanner (dead hosts
//!   included, for leave detection),
//! - [`ActionProvider`] — the two interchangeable definition sources,
//! - [`FactStore`] — credential/vulnerability/software facts.
//!
//! [`memory`] provides implementations backed by in-process maps. They
//! enforce the same one-active-entry invariant a durable backend would
//! enforce with a partial unique index, so scheduler tests exercise the
//! real admission races.

pub mod error;
pub mod filter;
pub mod memory;
pub mod traits;

pub use error::{ProviderError, StoreError};
pub use filter::{QueueFilter, QueueUpdate};
pub use memory::{MemoryFactStore, MemoryQueueStore, StaticActionProvider, StaticHostProvider};
pub use traits::{ActionProvider, DefinitionSource, FactStore, HostProvider, QueueStore};
