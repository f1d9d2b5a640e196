//! The scheduling loop: wiring and tick sequencing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, error, info};

use huginn_core::RuntimeConfig;
use huginn_store::{
    ActionProvider, DefinitionSource, FactStore, HostProvider, QueueStore,
};

use crate::admission::AdmissionController;
use crate::cache::DefinitionCache;
use crate::config::SchedulerConfig;
use crate::history::QueueHistory;
use crate::maintainer::QueueMaintainer;
use crate::publisher::QueuePublisher;
use crate::requirements::RequirementsEvaluator;
use crate::trigger::TriggerEvaluator;

/// Cooperative stop handle for a running [`ActionScheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl SchedulerHandle {
    fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Request a stop. The loop finishes its current phase and exits;
    /// in-flight queue entries are untouched.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// The admission-controlled scheduler: refreshes definitions, publishes
/// queue entries, and maintains the queue, once per tick.
pub struct ActionScheduler {
    config: SchedulerConfig,
    runtime: Arc<RuntimeConfig>,
    store: Arc<dyn QueueStore>,
    hosts: Arc<dyn HostProvider>,
    cache: DefinitionCache,
    publisher: QueuePublisher,
    maintainer: QueueMaintainer,
    handle: SchedulerHandle,
}

impl ActionScheduler {
    pub fn new(
        config: SchedulerConfig,
        runtime: Arc<RuntimeConfig>,
        store: Arc<dyn QueueStore>,
        facts: Arc<dyn FactStore>,
        hosts: Arc<dyn HostProvider>,
        actions: Arc<dyn ActionProvider>,
    ) -> Self {
        let config = config.normalized();
        let history = QueueHistory::new(store.clone());
        let triggers = TriggerEvaluator::new(history.clone(), facts.clone());
        let requirements = RequirementsEvaluator::new(history.clone(), facts);
        let admission = AdmissionController::new(history.clone(), runtime.clone());
        let publisher = QueuePublisher::new(
            store.clone(),
            history.clone(),
            triggers,
            requirements,
            admission,
            config.controller_mac.clone(),
        );
        let maintainer = QueueMaintainer::new(store.clone(), history, runtime.clone(), &config);
        let cache = DefinitionCache::new(actions, config.cache_ttl);

        Self {
            config,
            runtime,
            store,
            hosts,
            cache,
            publisher,
            maintainer,
            handle: SchedulerHandle::new(),
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Run until [`SchedulerHandle::stop`] is called.
    pub async fn run(&mut self) {
        info!(
            tick_secs = self.config.tick_interval.as_secs(),
            controller = %self.config.controller_mac,
            "scheduler started"
        );
        while self.handle.is_running() {
            self.tick(Utc::now()).await;

            let shutdown = self.handle.shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(self.config.tick_interval) => {}
                _ = shutdown.notified() => break,
            }
        }
        info!("scheduler stopped");
    }

    /// One scheduling pass at `now`. Public so tests (and embedders) can
    /// drive the loop with a deterministic clock.
    pub async fn tick(&mut self, now: DateTime<Utc>) {
        let source = if self.runtime.use_studio_actions() {
            DefinitionSource::Studio
        } else {
            DefinitionSource::Catalog
        };
        self.cache.refresh_if_needed(source, now).await;
        if !self.handle.is_running() {
            return;
        }

        // Scheduled occurrences whose time arrived become claimable first,
        // so this tick's duplicate checks see them as pending.
        match self.store.promote_due_scheduled(now).await {
            Ok(0) => {}
            Ok(promoted) => debug!(promoted, "promoted due scheduled entries"),
            Err(err) => error!(%err, "promotion failed"),
        }

        let hosts = match self.hosts.all_hosts().await {
            Ok(hosts) => hosts,
            Err(err) => {
                error!(%err, "host provider failed, skipping host-driven phases");
                Vec::new()
            }
        };

        let defs = self.cache.definitions().to_vec();
        self.publisher
            .publish_interval_occurrences(&defs, &hosts, now)
            .await;
        if !self.handle.is_running() {
            return;
        }
        self.publisher.evaluate_global_actions(&defs, now).await;
        if !self.handle.is_running() {
            return;
        }
        self.publisher.evaluate_host_triggers(&defs, &hosts, now).await;
        if !self.handle.is_running() {
            return;
        }

        self.maintainer.run(now).await;
    }
}
