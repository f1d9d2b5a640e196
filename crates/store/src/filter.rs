//! Query and update vocabulary for the durable queue store.
//!
//! A backend translates [`QueueFilter`] into its native predicate (SQL
//! `WHERE`, KV scan, in-memory match); [`QueueUpdate`] is the field-patch
//! shape of the store's `UpdateStatus` operation.

use chrono::{DateTime, Utc};
use huginn_core::{QueueEntry, QueueStatus};

/// Conjunctive predicate over queue entries. Unset fields match anything.
#[derive(Debug, Clone, Default)]
pub struct QueueFilter {
    pub action: Option<String>,
    /// Match any of these action names (presence-marker lookups).
    pub actions: Option<Vec<String>>,
    pub mac: Option<String>,
    /// Compared against the entry's normalized port (`COALESCE(port, 0)`).
    pub port: Option<u16>,
    pub statuses: Option<Vec<QueueStatus>>,
    pub created_since: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    /// Matches only entries with a completion time before the bound.
    pub completed_before: Option<DateTime<Utc>>,
    /// Matches only entries with an expiry time before the bound.
    pub expires_before: Option<DateTime<Utc>>,
}

impl QueueFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn actions(mut self, actions: &[&str]) -> Self {
        self.actions = Some(actions.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn mac(mut self, mac: impl Into<String>) -> Self {
        self.mac = Some(mac.into());
        self
    }

    /// Filter on the normalized uniqueness-key port; pass the entry port
    /// with `unwrap_or(0)`.
    pub fn normalized_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn statuses(mut self, statuses: &[QueueStatus]) -> Self {
        self.statuses = Some(statuses.to_vec());
        self
    }

    pub fn active_only(self) -> Self {
        self.statuses(&QueueStatus::ACTIVE)
    }

    pub fn terminal_only(self) -> Self {
        self.statuses(&QueueStatus::TERMINAL)
    }

    pub fn created_since(mut self, t: DateTime<Utc>) -> Self {
        self.created_since = Some(t);
        self
    }

    pub fn created_before(mut self, t: DateTime<Utc>) -> Self {
        self.created_before = Some(t);
        self
    }

    pub fn completed_before(mut self, t: DateTime<Utc>) -> Self {
        self.completed_before = Some(t);
        self
    }

    pub fn expires_before(mut self, t: DateTime<Utc>) -> Self {
        self.expires_before = Some(t);
        self
    }

    /// Evaluate the predicate against one entry. Backends without native
    /// predicates (and tests) use this directly.
    pub fn matches(&self, entry: &QueueEntry) -> bool {
        if let Some(action) = &self.action {
            if &entry.action_name != action {
                return false;
            }
        }
        if let Some(actions) = &self.actions {
            if !actions.iter().any(|a| a == &entry.action_name) {
                return false;
            }
        }
        if let Some(mac) = &self.mac {
            if !entry.mac_address.eq_ignore_ascii_case(mac) {
                return false;
            }
        }
        if let Some(port) = self.port {
            if entry.normalized_port() != port {
                return false;
            }
        }
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&entry.status) {
                return false;
            }
        }
        if let Some(since) = self.created_since {
            if entry.created_at < since {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if entry.created_at >= before {
                return false;
            }
        }
        if let Some(before) = self.completed_before {
            match entry.completed_at {
                Some(t) if t < before => {}
                _ => return false,
            }
        }
        if let Some(before) = self.expires_before {
            match entry.expires_at {
                Some(t) if t < before => {}
                _ => return false,
            }
        }
        true
    }
}

/// Field patch applied by `QueueStore::update`.
///
/// The named constructors cover every transition the scheduler itself
/// performs; executors build their own patches for claim/complete.
#[derive(Debug, Clone, Default)]
pub struct QueueUpdate {
    pub status: Option<QueueStatus>,
    pub retry_count: Option<u32>,
    pub priority: Option<u8>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Set `error_message` only when none is present yet
    /// (`COALESCE(error_message, tag)` semantics for expiry/timeout tags).
    pub error_if_unset: Option<String>,
    pub result_summary: Option<String>,
    /// Clear error/started/completed before applying the rest (retry path).
    pub reset_run_state: bool,
}

impl QueueUpdate {
    /// Maintainer transition: active entry fails with an error tag,
    /// keeping any error message the executor already recorded.
    pub fn fail_with_tag(at: DateTime<Utc>, tag: &str) -> Self {
        Self {
            status: Some(QueueStatus::Failed),
            completed_at: Some(at),
            error_if_unset: Some(tag.to_string()),
            ..Default::default()
        }
    }

    /// Maintainer transition: failed entry goes back to `pending` with a
    /// bumped retry count and a backoff-delayed schedule.
    pub fn retry(retry_count: u32, scheduled_for: DateTime<Utc>) -> Self {
        Self {
            status: Some(QueueStatus::Pending),
            retry_count: Some(retry_count),
            scheduled_for: Some(scheduled_for),
            reset_run_state: true,
            ..Default::default()
        }
    }

    /// Anti-starvation priority bump.
    pub fn priority(priority: u8) -> Self {
        Self {
            priority: Some(priority),
            ..Default::default()
        }
    }

    /// Executor-side claim: `pending` → `running`.
    pub fn claim(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(QueueStatus::Running),
            started_at: Some(at),
            ..Default::default()
        }
    }

    /// Executor-side completion into a terminal status.
    pub fn complete(status: QueueStatus, at: DateTime<Utc>) -> Self {
        Self {
            status: Some(status),
            completed_at: Some(at),
            ..Default::default()
        }
    }

    /// Apply the patch in-place. Shared by backends without native
    /// field-update support.
    pub fn apply(&self, entry: &mut QueueEntry) {
        if self.reset_run_state {
            entry.error_message = None;
            entry.started_at = None;
            entry.completed_at = None;
        }
        if let Some(status) = self.status {
            entry.status = status;
        }
        if let Some(retry_count) = self.retry_count {
            entry.retry_count = retry_count;
        }
        if let Some(priority) = self.priority {
            entry.priority = priority;
        }
        if let Some(t) = self.scheduled_for {
            entry.scheduled_for = Some(t);
        }
        if let Some(t) = self.started_at {
            entry.started_at = Some(t);
        }
        if let Some(t) = self.completed_at {
            entry.completed_at = Some(t);
        }
        if let Some(msg) = &self.error_message {
            entry.error_message = Some(msg.clone());
        }
        if let Some(tag) = &self.error_if_unset {
            if entry.error_message.is_none() {
                entry.error_message = Some(tag.clone());
            }
        }
        if let Some(summary) = &self.result_summary {
            entry.result_summary = Some(summary.clone());
        }
    }
}
