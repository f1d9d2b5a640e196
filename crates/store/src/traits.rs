//! Trait contracts for the scheduler's external collaborators.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use huginn_core::{ActionDefinition, HostSnapshot, NewQueueEntry, QueueEntry};

use crate::error::{ProviderError, StoreError};
use crate::filter::{QueueFilter, QueueUpdate};

/// Which definition source the cache should load from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionSource {
    /// The plain action catalog.
    Catalog,
    /// The studio (user-authored) action set.
    Studio,
}

impl DefinitionSource {
    /// The source to fall back to when this one fails.
    pub fn alternate(self) -> Self {
        match self {
            DefinitionSource::Catalog => DefinitionSource::Studio,
            DefinitionSource::Studio => DefinitionSource::Catalog,
        }
    }
}

impl fmt::Display for DefinitionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefinitionSource::Catalog => f.write_str("catalog"),
            DefinitionSource::Studio => f.write_str("studio"),
        }
    }
}

/// The durable action queue.
///
/// Correctness-critical mutations are atomic on the backend: the guarded
/// insert and the uniqueness constraint together enforce that at most one
/// entry per (action, mac, normalized port) is in an active status, even
/// with concurrent scheduler/executor processes. The constraint is the
/// source of truth; the guard exists to reduce constraint churn.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert `entry` unless an active entry already exists for its
    /// (action, mac, normalized port) key. Returns the new id, or `None`
    /// when the guard (or the constraint) rejected the insert.
    async fn insert_if_no_active(&self, entry: NewQueueEntry)
        -> Result<Option<Uuid>, StoreError>;

    async fn query(&self, filter: &QueueFilter) -> Result<Vec<QueueEntry>, StoreError>;

    /// Apply a field patch to one entry. Fails with
    /// [`StoreError::DuplicateActive`] if the patch would activate a
    /// second entry for the same key.
    async fn update(&self, id: Uuid, update: QueueUpdate) -> Result<(), StoreError>;

    /// Remove one entry (retention purge). Returns whether it existed.
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Promote `scheduled` entries whose time has arrived to `pending`.
    /// Returns the promoted count.
    async fn promote_due_scheduled(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Host snapshots from the external scanner.
#[async_trait]
pub trait HostProvider: Send + Sync {
    /// All known hosts, dead ones included (leave detection needs them).
    async fn all_hosts(&self) -> Result<Vec<HostSnapshot>, ProviderError>;
}

/// The two interchangeable definition sources.
#[async_trait]
pub trait ActionProvider: Send + Sync {
    async fn list_actions(&self) -> Result<Vec<ActionDefinition>, ProviderError>;

    async fn list_studio_actions(&self) -> Result<Vec<ActionDefinition>, ProviderError>;

    /// Dispatch on a [`DefinitionSource`].
    async fn list_from(
        &self,
        source: DefinitionSource,
    ) -> Result<Vec<ActionDefinition>, ProviderError> {
        match source {
            DefinitionSource::Catalog => self.list_actions().await,
            DefinitionSource::Studio => self.list_studio_actions().await,
        }
    }
}

/// Host facts gathered by other components (credential hits,
/// vulnerability and software detections).
#[async_trait]
pub trait FactStore: Send + Sync {
    /// A credential record exists for (host, service).
    async fn has_credential(&self, mac: &str, service: &str) -> Result<bool, StoreError>;

    /// An active vulnerability record exists, optionally filtered by id.
    async fn has_vulnerability(&self, mac: &str, vuln_id: Option<&str>)
        -> Result<bool, StoreError>;

    /// An active software detection exists, optionally filtered by CPE.
    async fn has_software(&self, mac: &str, cpe: Option<&str>) -> Result<bool, StoreError>;
}
