//! Durable queue entry model and status lifecycle.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reserved action name recording a host joining the network.
pub const PRESENCE_JOIN: &str = "PresenceJoin";
/// Reserved action name recording a host leaving the network.
pub const PRESENCE_LEAVE: &str = "PresenceLeave";

/// Error tag set by the maintainer when a `pending` entry expires.
/// Entries carrying this tag are never retried.
pub const ERROR_EXPIRED: &str = "expired";
/// Error tag set by the maintainer when a `running` entry exceeds its
/// timeout budget.
pub const ERROR_TIMEOUT: &str = "timeout";

/// Fallback run-timeout when the entry metadata carries none.
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 900;

/// Lifecycle state of a queue entry.
///
/// `scheduled → pending → running → {success|failed}`; the maintainer may
/// move `failed` back to `pending` (retry), and an external actor may move
/// any active state to `cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Scheduled,
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl QueueStatus {
    /// The states counted by the one-active-entry invariant.
    pub const ACTIVE: [QueueStatus; 3] =
        [QueueStatus::Scheduled, QueueStatus::Pending, QueueStatus::Running];

    /// The states eligible for retention purge.
    pub const TERMINAL: [QueueStatus; 3] =
        [QueueStatus::Success, QueueStatus::Failed, QueueStatus::Cancelled];

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Scheduled => "scheduled",
            QueueStatus::Pending => "pending",
            QueueStatus::Running => "running",
            QueueStatus::Success => "success",
            QueueStatus::Failed => "failed",
            QueueStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Ok(QueueStatus::Scheduled),
            "pending" => Ok(QueueStatus::Pending),
            "running" => Ok(QueueStatus::Running),
            "success" => Ok(QueueStatus::Success),
            "failed" => Ok(QueueStatus::Failed),
            "cancelled" => Ok(QueueStatus::Cancelled),
            other => Err(format!("unknown queue status `{other}`")),
        }
    }
}

/// The most recent join/leave event recorded for a host, derived from the
/// queue history of the reserved presence actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceMarker {
    Join,
    Leave,
}

impl PresenceMarker {
    pub fn from_action_name(name: &str) -> Option<Self> {
        match name {
            PRESENCE_JOIN => Some(PresenceMarker::Join),
            PRESENCE_LEAVE => Some(PresenceMarker::Leave),
            _ => None,
        }
    }
}

/// Typed entry metadata, serialized once at the store boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// The raw trigger expression that produced this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    /// Echo of the definition's requirements at enqueue time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<serde_json::Value>,
    /// Run-timeout budget in seconds for this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub is_global: bool,
    /// Cadence for interval-published occurrences.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    /// Host open ports observed at enqueue time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports_snapshot: Option<Vec<u16>>,
}

/// One (possibly historical) invocation of an action against a target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub action_name: String,
    pub mac_address: String,
    pub ip: Option<IpAddr>,
    /// `None` means host-level/global work; normalized to 0 in the
    /// uniqueness key.
    pub port: Option<u16>,
    pub hostname: Option<String>,
    pub service: Option<String>,
    pub priority: u8,
    pub status: QueueStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub result_summary: Option<String>,
    pub trigger_source: Option<String>,
    pub tags: Vec<String>,
    pub metadata: EntryMetadata,
}

impl QueueEntry {
    /// Port component of the uniqueness key: `COALESCE(port, 0)`.
    pub fn normalized_port(&self) -> u16 {
        self.port.unwrap_or(0)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Chronological ordering key for "most recent" lookups:
    /// completion, then start, then schedule, then creation time.
    pub fn history_timestamp(&self) -> DateTime<Utc> {
        self.completed_at
            .or(self.started_at)
            .or(self.scheduled_for)
            .unwrap_or(self.created_at)
    }

    /// Run-timeout budget for this entry.
    pub fn effective_timeout(&self) -> Duration {
        let secs = self.metadata.timeout_secs.unwrap_or(DEFAULT_RUN_TIMEOUT_SECS);
        Duration::seconds(secs as i64)
    }

    /// Whether the entry carries the expiry tag, which exempts it from
    /// retry forever.
    pub fn is_expiry_tagged(&self) -> bool {
        self.error_message.as_deref() == Some(ERROR_EXPIRED)
    }

    /// Whether the maintainer may move this entry back to `pending`.
    pub fn is_retryable(&self) -> bool {
        self.status == QueueStatus::Failed
            && self.retry_count < self.max_retries
            && !self.is_expiry_tagged()
    }
}

/// Insert payload handed to the store's guarded insert.
///
/// The store assigns the id; everything else is decided by the publisher
/// (including `created_at`, so ticks stay deterministic under test).
#[derive(Debug, Clone)]
pub struct NewQueueEntry {
    pub action_name: String,
    pub mac_address: String,
    pub ip: Option<IpAddr>,
    pub port: Option<u16>,
    pub hostname: Option<String>,
    pub service: Option<String>,
    pub priority: u8,
    /// `Scheduled` for interval occurrences, `Pending` for everything else.
    pub status: QueueStatus,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub trigger_source: Option<String>,
    pub tags: Vec<String>,
    pub metadata: EntryMetadata,
}

impl NewQueueEntry {
    pub fn normalized_port(&self) -> u16 {
        self.port.unwrap_or(0)
    }

    /// Materialize the stored entry under a freshly assigned id.
    pub fn into_entry(self, id: Uuid) -> QueueEntry {
        QueueEntry {
            id,
            action_name: self.action_name,
            mac_address: self.mac_address,
            ip: self.ip,
            port: self.port,
            hostname: self.hostname,
            service: self.service,
            priority: self.priority,
            status: self.status,
            retry_count: 0,
            max_retries: self.max_retries,
            created_at: self.created_at,
            scheduled_for: self.scheduled_for,
            started_at: None,
            completed_at: None,
            expires_at: self.expires_at,
            error_message: None,
            result_summary: None,
            trigger_source: self.trigger_source,
            tags: self.tags,
            metadata: self.metadata,
        }
    }
}

/// Delay before the k-th retry of a failed entry: `min(900, 60 · 2^k)`
/// seconds, where `k` is the retry count *before* the increment.
pub fn retry_backoff(retry_count: u32) -> Duration {
    let factor = 1u64 << retry_count.min(16);
    Duration::seconds(60u64.saturating_mul(factor).min(900) as i64)
}
