//! Queue publication: the three paths that create entries.
//!
//! 1. Interval occurrences — cadence-driven, inserted as `scheduled`.
//! 2. Global on-start actions — once per system, targeted at the
//!    controller identity.
//! 3. Per-host trigger evaluation — trigger, then requirements, then
//!    admission, then the store's guarded insert.
//!
//! Every path funnels through `insert_if_no_active`, so the
//! one-active-entry invariant holds even when an evaluation raced an
//! executor.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use huginn_core::{
    ActionDefinition, EntryMetadata, HostSnapshot, NewQueueEntry, QueueStatus,
};
use huginn_store::{QueueStore, StoreError};

use crate::admission::AdmissionController;
use crate::history::QueueHistory;
use crate::requirements::RequirementsEvaluator;
use crate::trigger::{interval_of, TriggerEvaluator};

/// Source label recorded on cadence-published entries.
const INTERVAL_SOURCE: &str = "scheduler";

pub struct QueuePublisher {
    store: Arc<dyn QueueStore>,
    history: QueueHistory,
    triggers: TriggerEvaluator,
    requirements: RequirementsEvaluator,
    admission: AdmissionController,
    controller_mac: String,
    /// Serializes global publication; concurrent maintenance wakeups must
    /// not double-publish a system-wide action.
    globals_gate: Mutex<()>,
}

impl QueuePublisher {
    pub fn new(
        store: Arc<dyn QueueStore>,
        history: QueueHistory,
        triggers: TriggerEvaluator,
        requirements: RequirementsEvaluator,
        admission: AdmissionController,
        controller_mac: String,
    ) -> Self {
        Self {
            store,
            history,
            triggers,
            requirements,
            admission,
            controller_mac,
            globals_gate: Mutex::new(()),
        }
    }

    // ── Interval occurrences ────────────────────────────────────────

    /// Publish the next occurrence of every interval-triggered definition
    /// that has none in flight. Occurrences enter as `scheduled` and are
    /// promoted to `pending` when their time arrives.
    pub async fn publish_interval_occurrences(
        &self,
        defs: &[ActionDefinition],
        hosts: &[HostSnapshot],
        now: DateTime<Utc>,
    ) -> u64 {
        let mut published = 0;
        for def in defs.iter().filter(|d| d.enabled) {
            let Some(interval) = interval_of(&def.trigger) else {
                continue;
            };
            if def.is_global() {
                let controller_ip = Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
                published += self
                    .interval_occurrence_for(def, &self.controller_mac, controller_ip, interval, now)
                    .await;
            } else {
                for host in hosts.iter().filter(|h| h.alive) {
                    published += self
                        .interval_occurrence_for(
                            def,
                            &host.mac_address,
                            host.first_ip(),
                            interval,
                            now,
                        )
                        .await;
                }
            }
        }
        published
    }

    async fn interval_occurrence_for(
        &self,
        def: &ActionDefinition,
        mac: &str,
        ip: Option<IpAddr>,
        interval: u64,
        now: DateTime<Utc>,
    ) -> u64 {
        let outcome: Result<bool, StoreError> = async {
            if self.history.has_active_for(&def.name, Some(mac)).await? {
                return Ok(false);
            }
            // Next occurrence is anchored to the last completion; a never-run
            // action is due immediately.
            let scheduled_for = match self.history.last_execution_time(Some(mac), &def.name).await? {
                Some(last) => last + Duration::seconds(interval as i64),
                None => now,
            };
            let inserted = self
                .store
                .insert_if_no_active(NewQueueEntry {
                    action_name: def.name.clone(),
                    mac_address: mac.to_string(),
                    ip,
                    port: None,
                    hostname: None,
                    service: None,
                    priority: def.priority,
                    status: QueueStatus::Scheduled,
                    max_retries: def.max_retries,
                    created_at: now,
                    scheduled_for: Some(scheduled_for),
                    expires_at: None,
                    trigger_source: Some(INTERVAL_SOURCE.to_string()),
                    tags: def.tags.clone(),
                    metadata: EntryMetadata {
                        timeout_secs: Some(def.timeout_secs),
                        is_global: def.is_global(),
                        interval_secs: Some(interval),
                        ..Default::default()
                    },
                })
                .await?;
            if inserted.is_some() {
                info!(action = %def.name, mac, %scheduled_for, "scheduled interval occurrence");
            }
            Ok(inserted.is_some())
        }
        .await;

        match outcome {
            Ok(true) => 1,
            Ok(false) => 0,
            Err(err) => {
                error!(action = %def.name, mac, %err, "interval publication failed");
                0
            }
        }
    }

    // ── Global on-start actions ─────────────────────────────────────

    /// Publish system-wide on-start actions that have never executed and
    /// have nothing in flight. Targets the controller identity.
    pub async fn evaluate_global_actions(
        &self,
        defs: &[ActionDefinition],
        now: DateTime<Utc>,
    ) -> u64 {
        let _gate = self.globals_gate.lock().await;

        let mut published = 0;
        for def in defs
            .iter()
            .filter(|d| d.is_global() && d.enabled && d.trigger == "on_start")
        {
            match self.publish_global(def, now).await {
                Ok(true) => published += 1,
                Ok(false) => {}
                Err(err) => {
                    error!(action = %def.name, %err, "global publication failed");
                }
            }
        }
        published
    }

    async fn publish_global(
        &self,
        def: &ActionDefinition,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        // Once per system: any prior execution or in-flight entry,
        // regardless of target, is disqualifying.
        if self.history.last_execution_time(None, &def.name).await?.is_some() {
            return Ok(false);
        }
        if self.history.has_active_for(&def.name, None).await? {
            return Ok(false);
        }

        let inserted = self
            .store
            .insert_if_no_active(NewQueueEntry {
                action_name: def.name.clone(),
                mac_address: self.controller_mac.clone(),
                ip: Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
                port: None,
                hostname: None,
                service: None,
                priority: def.priority,
                status: QueueStatus::Pending,
                max_retries: def.max_retries,
                created_at: now,
                scheduled_for: None,
                expires_at: Some(now + Duration::seconds(def.timeout_secs as i64)),
                trigger_source: Some(def.trigger.clone()),
                tags: def.tags.clone(),
                metadata: EntryMetadata {
                    trigger: Some(def.trigger.clone()),
                    requirements: def.requires.clone(),
                    timeout_secs: Some(def.timeout_secs),
                    is_global: true,
                    ..Default::default()
                },
            })
            .await?;

        if inserted.is_some() {
            info!(action = %def.name, mac = %self.controller_mac, "queued global action");
        }
        Ok(inserted.is_some())
    }

    // ── Per-host trigger evaluation ─────────────────────────────────

    /// Evaluate every non-global definition against every host (dead ones
    /// included, for leave detection) and queue the admitted matches.
    pub async fn evaluate_host_triggers(
        &self,
        defs: &[ActionDefinition],
        hosts: &[HostSnapshot],
        now: DateTime<Utc>,
    ) -> u64 {
        let mut published = 0;
        for host in hosts {
            for def in defs {
                if def.is_global()
                    || !def.enabled
                    || def.trigger.trim().is_empty()
                    || interval_of(&def.trigger).is_some()
                {
                    continue;
                }
                match self.evaluate_one(def, host, now).await {
                    Ok(true) => published += 1,
                    Ok(false) => {}
                    Err(err) => {
                        error!(
                            action = %def.name,
                            mac = %host.mac_address,
                            %err,
                            "host trigger publication failed"
                        );
                    }
                }
            }
        }
        published
    }

    async fn evaluate_one(
        &self,
        def: &ActionDefinition,
        host: &HostSnapshot,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if !self.triggers.evaluate(&def.trigger, host, def).await {
            return Ok(false);
        }
        if !self.requirements.check(host, def).await {
            debug!(action = %def.name, mac = %host.mac_address, "trigger fired but requirements unmet");
            return Ok(false);
        }

        let (port, service) = resolve_target(host, def);
        if !self
            .admission
            .should_queue(&host.mac_address, def, port, now)
            .await?
        {
            return Ok(false);
        }

        let inserted = self
            .store
            .insert_if_no_active(NewQueueEntry {
                action_name: def.name.clone(),
                mac_address: host.mac_address.clone(),
                ip: host.first_ip(),
                port,
                hostname: host.first_hostname().map(str::to_string),
                service,
                priority: def.priority,
                status: QueueStatus::Pending,
                max_retries: def.max_retries,
                created_at: now,
                scheduled_for: None,
                expires_at: Some(now + Duration::seconds(def.timeout_secs as i64)),
                trigger_source: Some(def.trigger.clone()),
                tags: def.tags.clone(),
                metadata: EntryMetadata {
                    trigger: Some(def.trigger.clone()),
                    requirements: def.requires.clone(),
                    timeout_secs: Some(def.timeout_secs),
                    is_global: false,
                    ports_snapshot: Some(host.ports.iter().copied().collect()),
                    ..Default::default()
                },
            })
            .await?;

        if let Some(id) = inserted {
            info!(
                action = %def.name,
                mac = %host.mac_address,
                ?port,
                %id,
                trigger = %def.trigger,
                "queued action"
            );
        } else {
            // Lost an insert race since the admission check; harmless.
            debug!(action = %def.name, mac = %host.mac_address, "guarded insert declined");
        }
        Ok(inserted.is_some())
    }
}

/// Pick the port (and service label) the entry should target: the first
/// declared service with an open-port binding wins, then the definition's
/// fixed port if the host actually has it open.
fn resolve_target(host: &HostSnapshot, def: &ActionDefinition) -> (Option<u16>, Option<String>) {
    for service in &def.services {
        if let Some(&port) = host.service_ports.get(service) {
            return (Some(port), Some(service.clone()));
        }
    }
    if let Some(port) = def.port {
        if host.ports.contains(&port) {
            return (Some(port), None);
        }
    }
    (None, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn def(services: &[&str], port: Option<u16>) -> ActionDefinition {
        serde_json::from_value(json!({
            "name": "X",
            "services": services,
            "port": port,
        }))
        .unwrap()
    }

    fn host(ports: &[u16], bindings: &[(&str, u16)]) -> HostSnapshot {
        HostSnapshot {
            mac_address: "aa:bb".into(),
            ports: ports.iter().copied().collect(),
            service_ports: bindings
                .iter()
                .map(|(s, p)| (s.to_string(), *p))
                .collect(),
            alive: true,
            ..Default::default()
        }
    }

    #[test]
    fn service_binding_wins_in_declaration_order() {
        let d = def(&["https", "http"], None);
        let h = host(&[80, 443], &[("http", 80), ("https", 443)]);
        assert_eq!(resolve_target(&h, &d), (Some(443), Some("https".into())));
    }

    #[test]
    fn fixed_port_requires_open_port() {
        let d = def(&[], Some(445));
        assert_eq!(resolve_target(&host(&[445], &[]), &d), (Some(445), None));
        assert_eq!(resolve_target(&host(&[80], &[]), &d), (None, None));
    }

    #[test]
    fn no_match_targets_the_host() {
        let d = def(&["ssh"], None);
        assert_eq!(resolve_target(&host(&[80], &[]), &d), (None, None));
    }
}
