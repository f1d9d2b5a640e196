//! Queue maintenance: the janitorial phases run once per tick.
//!
//! Expiry, run-timeout, backoff retry, retention purge, anti-starvation
//! priority aging. Each phase is independent; one failing does not stop
//! the rest.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info};

use huginn_core::{
    retry_backoff, QueueEntry, QueueStatus, RuntimeConfig, ERROR_EXPIRED, ERROR_TIMEOUT,
};
use huginn_store::{QueueFilter, QueueStore, QueueUpdate, StoreError};

use crate::config::{SchedulerConfig, MAX_PRIORITY};
use crate::history::QueueHistory;

/// Per-phase counters for one maintenance run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Pending entries failed with the expiry tag.
    pub expired: u64,
    /// Running entries failed with the timeout tag.
    pub timed_out: u64,
    /// Failed entries re-queued with backoff.
    pub retried: u64,
    /// Terminal entries deleted past retention.
    pub purged: u64,
    /// Pending entries given a priority bump.
    pub boosted: u64,
}

pub struct QueueMaintainer {
    store: Arc<dyn QueueStore>,
    history: QueueHistory,
    runtime: Arc<RuntimeConfig>,
    retention: Duration,
    starvation_threshold: Duration,
}

impl QueueMaintainer {
    pub fn new(
        store: Arc<dyn QueueStore>,
        history: QueueHistory,
        runtime: Arc<RuntimeConfig>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            store,
            history,
            runtime,
            retention: Duration::from_std(config.retention).unwrap_or(Duration::days(7)),
            starvation_threshold: Duration::from_std(config.starvation_threshold)
                .unwrap_or(Duration::hours(1)),
        }
    }

    /// Run all phases once. Phase-level failures are logged and counted
    /// as zero; entry-level failures skip that entry.
    pub async fn run(&self, now: DateTime<Utc>) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        report.expired = self.expire_pending(now).await;
        report.timed_out = self.timeout_running(now).await;
        report.retried = self.retry_failed(now).await;
        report.purged = self.purge_terminal(now).await;
        report.boosted = self.boost_starved(now).await;
        if report != MaintenanceReport::default() {
            info!(
                expired = report.expired,
                timed_out = report.timed_out,
                retried = report.retried,
                purged = report.purged,
                boosted = report.boosted,
                "queue maintenance"
            );
        }
        report
    }

    async fn collect(&self, filter: &QueueFilter, phase: &str) -> Vec<QueueEntry> {
        match self.store.query(filter).await {
            Ok(entries) => entries,
            Err(err) => {
                error!(phase, %err, "maintenance query failed");
                Vec::new()
            }
        }
    }

    /// `pending` entries past their expiry deadline fail with the expiry
    /// tag; that tag permanently exempts them from retry.
    async fn expire_pending(&self, now: DateTime<Utc>) -> u64 {
        let filter = QueueFilter::new()
            .statuses(&[QueueStatus::Pending])
            .expires_before(now);
        let mut count = 0;
        for entry in self.collect(&filter, "expire").await {
            match self
                .store
                .update(entry.id, QueueUpdate::fail_with_tag(now, ERROR_EXPIRED))
                .await
            {
                Ok(()) => {
                    debug!(action = %entry.action_name, mac = %entry.mac_address, id = %entry.id, "expired pending entry");
                    count += 1;
                }
                Err(err) => error!(id = %entry.id, %err, "expiry update failed"),
            }
        }
        count
    }

    /// `running` entries whose executor exceeded the run-timeout budget
    /// fail with the timeout tag (still retryable).
    async fn timeout_running(&self, now: DateTime<Utc>) -> u64 {
        let filter = QueueFilter::new().statuses(&[QueueStatus::Running]);
        let mut count = 0;
        for entry in self.collect(&filter, "timeout").await {
            let Some(started) = entry.started_at else {
                continue;
            };
            if started + entry.effective_timeout() > now {
                continue;
            }
            match self
                .store
                .update(entry.id, QueueUpdate::fail_with_tag(now, ERROR_TIMEOUT))
                .await
            {
                Ok(()) => {
                    debug!(action = %entry.action_name, mac = %entry.mac_address, id = %entry.id, "timed out running entry");
                    count += 1;
                }
                Err(err) => error!(id = %entry.id, %err, "timeout update failed"),
            }
        }
        count
    }

    /// Failed entries with retry budget left go back to `pending`,
    /// scheduled after exponential backoff. Skipped entirely when the
    /// retry_failed flag is off.
    async fn retry_failed(&self, now: DateTime<Utc>) -> u64 {
        if !self.runtime.retry_failed() {
            return 0;
        }
        let filter = QueueFilter::new().statuses(&[QueueStatus::Failed]);
        let mut count = 0;
        for entry in self.collect(&filter, "retry").await {
            if !entry.is_retryable() {
                continue;
            }
            // A fresh active entry for the key supersedes the retry.
            match self
                .history
                .has_active_target(&entry.action_name, &entry.mac_address, entry.port)
                .await
            {
                Ok(true) => continue,
                Ok(false) => {}
                Err(err) => {
                    error!(id = %entry.id, %err, "retry lookup failed");
                    continue;
                }
            }

            let delay = retry_backoff(entry.retry_count);
            let update = QueueUpdate::retry(entry.retry_count + 1, now + delay);
            match self.store.update(entry.id, update).await {
                Ok(()) => {
                    info!(
                        action = %entry.action_name,
                        mac = %entry.mac_address,
                        id = %entry.id,
                        retry = entry.retry_count + 1,
                        delay_secs = delay.num_seconds(),
                        "re-queued failed entry"
                    );
                    count += 1;
                }
                // Lost a race against an insert since the lookup.
                Err(StoreError::DuplicateActive { .. }) => {
                    debug!(id = %entry.id, "retry lost race to a fresh entry");
                }
                Err(err) => error!(id = %entry.id, %err, "retry update failed"),
            }
        }
        count
    }

    /// Terminal entries completed longer than the retention window ago
    /// are deleted.
    async fn purge_terminal(&self, now: DateTime<Utc>) -> u64 {
        let filter = QueueFilter::new()
            .terminal_only()
            .completed_before(now - self.retention);
        let mut count = 0;
        for entry in self.collect(&filter, "purge").await {
            match self.store.delete(entry.id).await {
                Ok(true) => count += 1,
                Ok(false) => {}
                Err(err) => error!(id = %entry.id, %err, "purge delete failed"),
            }
        }
        count
    }

    /// `pending` entries waiting past the starvation threshold get one
    /// priority point per run, capped.
    async fn boost_starved(&self, now: DateTime<Utc>) -> u64 {
        let filter = QueueFilter::new()
            .statuses(&[QueueStatus::Pending])
            .created_before(now - self.starvation_threshold);
        let mut count = 0;
        for entry in self.collect(&filter, "boost").await {
            if entry.priority >= MAX_PRIORITY {
                continue;
            }
            match self
                .store
                .update(entry.id, QueueUpdate::priority(entry.priority + 1))
                .await
            {
                Ok(()) => count += 1,
                Err(err) => error!(id = %entry.id, %err, "priority bump failed"),
            }
        }
        count
    }
}
