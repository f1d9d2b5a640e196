//! In-memory implementations of the store traits.
//!
//! Backed by plain maps behind `RwLock`s. [`MemoryQueueStore`] enforces
//! the one-active-entry invariant on both inserts and updates, the same
//! way a durable backend's partial unique index would, so admission races
//! behave identically under test and in the local worker.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use huginn_core::{ActionDefinition, HostSnapshot, NewQueueEntry, QueueEntry, QueueStatus};

use crate::error::{ProviderError, StoreError};
use crate::filter::{QueueFilter, QueueUpdate};
use crate::traits::{ActionProvider, FactStore, HostProvider, QueueStore};

// ── Queue store ─────────────────────────────────────────────────────

/// In-process queue store with invariant enforcement.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    entries: RwLock<HashMap<Uuid, QueueEntry>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn has_other_active(
        entries: &HashMap<Uuid, QueueEntry>,
        action: &str,
        mac: &str,
        port: u16,
        except: Option<Uuid>,
    ) -> bool {
        entries.values().any(|e| {
            Some(e.id) != except
                && e.is_active()
                && e.action_name == action
                && e.mac_address.eq_ignore_ascii_case(mac)
                && e.normalized_port() == port
        })
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn insert_if_no_active(
        &self,
        entry: NewQueueEntry,
    ) -> Result<Option<Uuid>, StoreError> {
        let mut entries = self.entries.write().expect("queue lock poisoned");
        if Self::has_other_active(
            &entries,
            &entry.action_name,
            &entry.mac_address,
            entry.normalized_port(),
            None,
        ) {
            debug!(
                action = %entry.action_name,
                mac = %entry.mac_address,
                port = entry.normalized_port(),
                "guarded insert rejected, active entry exists"
            );
            return Ok(None);
        }
        let id = Uuid::new_v4();
        entries.insert(id, entry.into_entry(id));
        Ok(Some(id))
    }

    async fn query(&self, filter: &QueueFilter) -> Result<Vec<QueueEntry>, StoreError> {
        let entries = self.entries.read().expect("queue lock poisoned");
        let mut found: Vec<QueueEntry> = entries
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        found.sort_by_key(|e| (e.created_at, e.id));
        Ok(found)
    }

    async fn update(&self, id: Uuid, update: QueueUpdate) -> Result<(), StoreError> {
        let mut entries = self.entries.write().expect("queue lock poisoned");
        let current = entries.get(&id).ok_or(StoreError::NotFound(id))?;

        let mut patched = current.clone();
        update.apply(&mut patched);

        // The partial unique index constrains updates too: activating an
        // entry must not create a second active row for the same key.
        let port = patched.normalized_port();
        if patched.is_active()
            && Self::has_other_active(
                &entries,
                &patched.action_name,
                &patched.mac_address,
                port,
                Some(id),
            )
        {
            return Err(StoreError::DuplicateActive {
                action: patched.action_name,
                mac: patched.mac_address,
                port,
            });
        }

        entries.insert(id, patched);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().expect("queue lock poisoned");
        Ok(entries.remove(&id).is_some())
    }

    async fn promote_due_scheduled(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut entries = self.entries.write().expect("queue lock poisoned");
        let mut promoted = 0;
        for entry in entries.values_mut() {
            if entry.status == QueueStatus::Scheduled
                && entry.scheduled_for.is_some_and(|t| t <= now)
            {
                entry.status = QueueStatus::Pending;
                promoted += 1;
            }
        }
        Ok(promoted)
    }
}

// ── Fact store ──────────────────────────────────────────────────────

/// In-process credential/vulnerability/software facts, keyed by MAC.
#[derive(Debug, Default)]
pub struct MemoryFactStore {
    credentials: RwLock<HashSet<(String, String)>>,
    vulnerabilities: RwLock<HashMap<String, HashSet<String>>>,
    software: RwLock<HashMap<String, HashSet<String>>>,
}

impl MemoryFactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_credential(&self, mac: &str, service: &str) {
        self.credentials
            .write()
            .expect("facts lock poisoned")
            .insert((mac.to_lowercase(), service.to_lowercase()));
    }

    pub fn add_vulnerability(&self, mac: &str, vuln_id: &str) {
        self.vulnerabilities
            .write()
            .expect("facts lock poisoned")
            .entry(mac.to_lowercase())
            .or_default()
            .insert(vuln_id.to_string());
    }

    pub fn add_software(&self, mac: &str, cpe: &str) {
        self.software
            .write()
            .expect("facts lock poisoned")
            .entry(mac.to_lowercase())
            .or_default()
            .insert(cpe.to_string());
    }
}

fn lookup(map: &HashMap<String, HashSet<String>>, mac: &str, id: Option<&str>) -> bool {
    match map.get(&mac.to_lowercase()) {
        Some(ids) => match id {
            Some(id) => ids.contains(id),
            None => !ids.is_empty(),
        },
        None => false,
    }
}

#[async_trait]
impl FactStore for MemoryFactStore {
    async fn has_credential(&self, mac: &str, service: &str) -> Result<bool, StoreError> {
        let creds = self.credentials.read().expect("facts lock poisoned");
        Ok(creds.contains(&(mac.to_lowercase(), service.to_lowercase())))
    }

    async fn has_vulnerability(
        &self,
        mac: &str,
        vuln_id: Option<&str>,
    ) -> Result<bool, StoreError> {
        let vulns = self.vulnerabilities.read().expect("facts lock poisoned");
        Ok(lookup(&vulns, mac, vuln_id))
    }

    async fn has_software(&self, mac: &str, cpe: Option<&str>) -> Result<bool, StoreError> {
        let software = self.software.read().expect("facts lock poisoned");
        Ok(lookup(&software, mac, cpe))
    }
}

// ── Static providers ────────────────────────────────────────────────

/// Host provider backed by a replaceable snapshot list.
#[derive(Debug, Default)]
pub struct StaticHostProvider {
    hosts: RwLock<Vec<HostSnapshot>>,
}

impl StaticHostProvider {
    pub fn new(hosts: Vec<HostSnapshot>) -> Self {
        Self {
            hosts: RwLock::new(hosts),
        }
    }

    /// Replace the snapshot list (simulates a new scan).
    pub fn set_hosts(&self, hosts: Vec<HostSnapshot>) {
        *self.hosts.write().expect("hosts lock poisoned") = hosts;
    }
}

#[async_trait]
impl HostProvider for StaticHostProvider {
    async fn all_hosts(&self) -> Result<Vec<HostSnapshot>, ProviderError> {
        Ok(self.hosts.read().expect("hosts lock poisoned").clone())
    }
}

/// Action provider with independently failable catalog and studio sources.
#[derive(Debug, Default)]
pub struct StaticActionProvider {
    /// `None` simulates an unavailable source.
    catalog: RwLock<Option<Vec<ActionDefinition>>>,
    studio: RwLock<Option<Vec<ActionDefinition>>>,
}

impl StaticActionProvider {
    pub fn new(catalog: Vec<ActionDefinition>) -> Self {
        Self {
            catalog: RwLock::new(Some(catalog)),
            studio: RwLock::new(Some(Vec::new())),
        }
    }

    pub fn set_catalog(&self, actions: Option<Vec<ActionDefinition>>) {
        *self.catalog.write().expect("actions lock poisoned") = actions;
    }

    pub fn set_studio(&self, actions: Option<Vec<ActionDefinition>>) {
        *self.studio.write().expect("actions lock poisoned") = actions;
    }
}

fn list_or_unavailable(
    source: &RwLock<Option<Vec<ActionDefinition>>>,
    name: &str,
) -> Result<Vec<ActionDefinition>, ProviderError> {
    source
        .read()
        .expect("actions lock poisoned")
        .clone()
        .ok_or_else(|| ProviderError::Unavailable(format!("{name} source offline")))
}

#[async_trait]
impl ActionProvider for StaticActionProvider {
    async fn list_actions(&self) -> Result<Vec<ActionDefinition>, ProviderError> {
        list_or_unavailable(&self.catalog, "catalog")
    }

    async fn list_studio_actions(&self) -> Result<Vec<ActionDefinition>, ProviderError> {
        list_or_unavailable(&self.studio, "studio")
    }
}

// ── Tests ───────────────────────────────────────────────────────────
