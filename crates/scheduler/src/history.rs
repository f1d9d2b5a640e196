//! Read-side queue lookups shared by the evaluators, admission control,
//! and the maintainer.
//!
//! Centralizes the "most recent" ordering rules (completion, then start,
//! then schedule, then creation) so no caller re-implements them.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use huginn_core::{PresenceMarker, QueueEntry, QueueStatus, PRESENCE_JOIN, PRESENCE_LEAVE};
use huginn_store::{QueueFilter, QueueStore, StoreError};

/// Cheap-to-clone handle over the queue store's query surface.
#[derive(Clone)]
pub struct QueueHistory {
    store: Arc<dyn QueueStore>,
}

impl QueueHistory {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    fn most_recent(mut entries: Vec<QueueEntry>) -> Option<QueueEntry> {
        entries.sort_by_key(QueueEntry::history_timestamp);
        entries.pop()
    }

    /// An active entry exists for the exact (action, mac, normalized
    /// port) uniqueness key.
    pub async fn has_active_target(
        &self,
        action: &str,
        mac: &str,
        port: Option<u16>,
    ) -> Result<bool, StoreError> {
        let filter = QueueFilter::new()
            .action(action)
            .mac(mac)
            .normalized_port(port.unwrap_or(0))
            .active_only();
        Ok(!self.store.query(&filter).await?.is_empty())
    }

    /// An active entry exists for the action on any port, optionally
    /// restricted to one host. `mac = None` is the system-wide check used
    /// by global actions.
    pub async fn has_active_for(
        &self,
        action: &str,
        mac: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut filter = QueueFilter::new().action(action).active_only();
        if let Some(mac) = mac {
            filter = filter.mac(mac);
        }
        Ok(!self.store.query(&filter).await?.is_empty())
    }

    /// Most recent status of any entry for the uniqueness key.
    pub async fn last_status(
        &self,
        mac: &str,
        action: &str,
        port: Option<u16>,
    ) -> Result<Option<QueueStatus>, StoreError> {
        let filter = QueueFilter::new()
            .action(action)
            .mac(mac)
            .normalized_port(port.unwrap_or(0));
        let entries = self.store.query(&filter).await?;
        Ok(Self::most_recent(entries).map(|e| e.status))
    }

    /// Most recent terminal (`success`/`failed`) status for (host, action).
    pub async fn last_terminal_status(
        &self,
        mac: &str,
        action: &str,
    ) -> Result<Option<QueueStatus>, StoreError> {
        let filter = QueueFilter::new()
            .action(action)
            .mac(mac)
            .statuses(&[QueueStatus::Success, QueueStatus::Failed]);
        let entries = self.store.query(&filter).await?;
        Ok(Self::most_recent(entries).map(|e| e.status))
    }

    /// Any executed (`success`/`failed`) entry exists for (host, action).
    pub async fn has_terminal(&self, mac: &str, action: &str) -> Result<bool, StoreError> {
        Ok(self.last_terminal_status(mac, action).await?.is_some())
    }

    /// An entry with exactly this status exists, host-scoped or
    /// system-wide.
    pub async fn has_entry_with_status(
        &self,
        mac: Option<&str>,
        action: &str,
        status: QueueStatus,
    ) -> Result<bool, StoreError> {
        let mut filter = QueueFilter::new().action(action).statuses(&[status]);
        if let Some(mac) = mac {
            filter = filter.mac(mac);
        }
        Ok(!self.store.query(&filter).await?.is_empty())
    }

    /// Completion time of the most recent executed entry, host-scoped or
    /// system-wide. Drives cooldowns and interval cadence.
    pub async fn last_execution_time(
        &self,
        mac: Option<&str>,
        action: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let mut filter = QueueFilter::new()
            .action(action)
            .statuses(&[QueueStatus::Success, QueueStatus::Failed]);
        if let Some(mac) = mac {
            filter = filter.mac(mac);
        }
        let entries = self.store.query(&filter).await?;
        Ok(entries.iter().filter_map(|e| e.completed_at).max())
    }

    /// A failed entry the maintainer will re-queue exists for the key.
    pub async fn has_retryable_failed(
        &self,
        mac: &str,
        action: &str,
        port: Option<u16>,
    ) -> Result<bool, StoreError> {
        let filter = QueueFilter::new()
            .action(action)
            .mac(mac)
            .normalized_port(port.unwrap_or(0))
            .statuses(&[QueueStatus::Failed]);
        let entries = self.store.query(&filter).await?;
        Ok(entries.iter().any(QueueEntry::is_retryable))
    }

    /// Entries created for (host, action) within the trailing window.
    pub async fn created_count_since(
        &self,
        mac: &str,
        action: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let filter = QueueFilter::new().action(action).mac(mac).created_since(since);
        Ok(self.store.query(&filter).await?.len() as u64)
    }

    /// Most recent presence marker for the host, from the reserved
    /// join/leave action history.
    pub async fn last_presence_marker(
        &self,
        mac: &str,
    ) -> Result<Option<PresenceMarker>, StoreError> {
        let filter = QueueFilter::new()
            .mac(mac)
            .actions(&[PRESENCE_JOIN, PRESENCE_LEAVE]);
        let entries = self.store.query(&filter).await?;
        Ok(Self::most_recent(entries)
            .and_then(|e| PresenceMarker::from_action_name(&e.action_name)))
    }
}
