//! Admission control: the final gate before a trigger-path entry is
//! handed to the store's guarded insert.
//!
//! Checks run in a fixed order, cheapest first, each able to veto:
//! duplicate active entry, runtime re-run flags, deferral to the retry
//! path, cooldown, rate limit. Admission is advisory; the store's
//! uniqueness constraint remains the source of truth under races.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use huginn_core::{ActionDefinition, QueueStatus, RuntimeConfig};
use huginn_store::StoreError;

use crate::history::QueueHistory;

#[derive(Clone)]
pub struct AdmissionController {
    history: QueueHistory,
    runtime: Arc<RuntimeConfig>,
}

impl AdmissionController {
    pub fn new(history: QueueHistory, runtime: Arc<RuntimeConfig>) -> Self {
        Self { history, runtime }
    }

    /// Decide whether a new entry for (def, mac, target_port) may be
    /// queued at `now`.
    pub async fn should_queue(
        &self,
        mac: &str,
        def: &ActionDefinition,
        target_port: Option<u16>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let action = def.name.as_str();

        // 1. One active entry per target, full stop.
        if self.history.has_active_target(action, mac, target_port).await? {
            debug!(action, mac, ?target_port, "skip: active entry exists");
            return Ok(false);
        }

        // 2. Re-run flags against the most recent outcome for the target.
        match self.history.last_status(mac, action, target_port).await? {
            Some(QueueStatus::Success) if !self.runtime.retry_success() => {
                debug!(action, mac, ?target_port, "skip: already succeeded and retry_success is off");
                return Ok(false);
            }
            Some(QueueStatus::Failed) if !self.runtime.retry_failed() => {
                debug!(action, mac, ?target_port, "skip: already failed and retry_failed is off");
                return Ok(false);
            }
            _ => {}
        }

        // 3. Failures with retry budget left belong to the maintainer's
        //    backoff path; a fresh entry would race it.
        if self.runtime.retry_failed()
            && self.history.has_retryable_failed(mac, action, target_port).await?
        {
            debug!(action, mac, ?target_port, "skip: deferring to retry path");
            return Ok(false);
        }

        // 4. Cooldown since the last terminal execution on this host.
        if def.cooldown_secs > 0 {
            if let Some(last) = self.history.last_execution_time(Some(mac), action).await? {
                let elapsed = now.signed_duration_since(last);
                if elapsed < Duration::seconds(def.cooldown_secs as i64) {
                    debug!(
                        action,
                        mac,
                        elapsed_secs = elapsed.num_seconds(),
                        cooldown_secs = def.cooldown_secs,
                        "skip: cooldown active"
                    );
                    return Ok(false);
                }
            }
        }

        // 5. Enqueue budget over the trailing window.
        if let Some(limit) = def.rate_limit {
            let since = now - Duration::seconds(limit.period_secs as i64);
            let created = self.history.created_count_since(mac, action, since).await?;
            if created >= u64::from(limit.count) {
                debug!(action, mac, created, limit = %limit, "skip: rate limit reached");
                return Ok(false);
            }
        }

        Ok(true)
    }
}
