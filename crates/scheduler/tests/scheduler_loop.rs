//! End-to-end scheduling passes over the in-memory store: definitions
//! in, queue entries out, driven tick by tick with a deterministic clock.

use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use serde_json::json;

use huginn_core::{
    ActionDefinition, HostSnapshot, QueueStatus, RuntimeConfig, PRESENCE_LEAVE,
};
use huginn_scheduler::{ActionScheduler, SchedulerConfig};
use huginn_store::{
    MemoryFactStore, MemoryQueueStore, QueueFilter, QueueStore, QueueUpdate, StaticActionProvider,
    StaticHostProvider,
};

const MAC: &str = "aa:bb:cc:dd:ee:ff";

struct World {
    scheduler: ActionScheduler,
    store: Arc<MemoryQueueStore>,
    runtime: Arc<RuntimeConfig>,
    hosts: Arc<StaticHostProvider>,
    actions: Arc<StaticActionProvider>,
}

fn world(defs: Vec<ActionDefinition>, hosts: Vec<HostSnapshot>) -> World {
    let store = Arc::new(MemoryQueueStore::new());
    let runtime = Arc::new(RuntimeConfig::new());
    let host_provider = Arc::new(StaticHostProvider::new(hosts));
    let action_provider = Arc::new(StaticActionProvider::new(defs));
    let scheduler = ActionScheduler::new(
        SchedulerConfig {
            // Short TTL so catalog swaps inside a test are picked up.
            cache_ttl: StdDuration::from_secs(1),
            ..Default::default()
        },
        runtime.clone(),
        store.clone(),
        Arc::new(MemoryFactStore::new()),
        host_provider.clone(),
        action_provider.clone(),
    );
    World {
        scheduler,
        store,
        runtime,
        hosts: host_provider,
        actions: action_provider,
    }
}

fn def(value: serde_json::Value) -> ActionDefinition {
    serde_json::from_value(value).expect("definition json")
}

fn ssh_host() -> HostSnapshot {
    HostSnapshot {
        mac_address: MAC.into(),
        ips: vec!["192.168.1.23".parse().unwrap()],
        hostnames: vec!["target-01".into()],
        ports: [22, 80].into_iter().collect(),
        service_ports: [("ssh".to_string(), 22u16)].into_iter().collect(),
        alive: true,
        ..Default::default()
    }
}

async fn all_entries(store: &MemoryQueueStore) -> Vec<huginn_core::QueueEntry> {
    store.query(&QueueFilter::new()).await.unwrap()
}

#[tokio::test]
async fn service_trigger_queues_one_targeted_entry() {
    let mut w = world(
        vec![def(json!({
            "name": "SshBruteforce",
            "trigger": "on_service:ssh",
            "services": ["ssh"],
            "timeout_secs": 600,
        }))],
        vec![ssh_host()],
    );
    let t0 = Utc::now();

    w.scheduler.tick(t0).await;

    let entries = all_entries(&w.store).await;
    assert_eq!(entries.len(), 1);
    let e = &entries[0];
    assert_eq!(e.action_name, "SshBruteforce");
    assert_eq!(e.status, QueueStatus::Pending);
    assert_eq!(e.mac_address, MAC);
    assert_eq!(e.port, Some(22));
    assert_eq!(e.service.as_deref(), Some("ssh"));
    assert_eq!(e.ip, Some("192.168.1.23".parse::<IpAddr>().unwrap()));
    assert_eq!(e.hostname.as_deref(), Some("target-01"));
    assert_eq!(e.expires_at, Some(t0 + Duration::seconds(600)));
    assert_eq!(e.metadata.timeout_secs, Some(600));
    assert_eq!(e.metadata.ports_snapshot.as_deref(), Some(&[22u16, 80][..]));

    // Re-running the same tick sequence must not duplicate the entry.
    w.scheduler.tick(t0 + Duration::seconds(5)).await;
    w.scheduler.tick(t0 + Duration::seconds(10)).await;
    assert_eq!(all_entries(&w.store).await.len(), 1);
}

#[tokio::test]
async fn success_history_blocks_requeue_until_flag_flips() {
    let mut w = world(
        vec![def(json!({
            "name": "SshBruteforce",
            "trigger": "on_service:ssh",
            "services": ["ssh"],
        }))],
        vec![ssh_host()],
    );
    let t0 = Utc::now();

    w.scheduler.tick(t0).await;
    let id = all_entries(&w.store).await[0].id;
    w.store
        .update(id, QueueUpdate::complete(QueueStatus::Success, t0 + Duration::seconds(30)))
        .await
        .unwrap();

    w.scheduler.tick(t0 + Duration::seconds(60)).await;
    assert_eq!(all_entries(&w.store).await.len(), 1, "success blocks re-queue");

    w.runtime.set_retry_success(true);
    w.scheduler.tick(t0 + Duration::seconds(65)).await;
    let entries = all_entries(&w.store).await;
    assert_eq!(entries.len(), 2, "retry_success admits a fresh entry");
    assert!(entries.iter().any(|e| e.status == QueueStatus::Pending));
}

#[tokio::test]
async fn leave_is_edge_triggered_through_the_presence_marker() {
    let mut dead = ssh_host();
    dead.alive = false;
    let mut w = world(
        vec![def(json!({
            "name": PRESENCE_LEAVE,
            "trigger": "on_leave",
        }))],
        vec![dead],
    );
    // Keep admission out of the picture; the marker alone must gate.
    w.runtime.set_retry_success(true);
    let t0 = Utc::now();

    w.scheduler.tick(t0).await;
    let entries = all_entries(&w.store).await;
    assert_eq!(entries.len(), 1);
    let id = entries[0].id;

    // The queued entry itself is the new presence marker, so the very
    // next tick already sees the edge as consumed.
    w.scheduler.tick(t0 + Duration::seconds(5)).await;
    assert_eq!(all_entries(&w.store).await.len(), 1);

    // Executor records the departure.
    w.store
        .update(id, QueueUpdate::complete(QueueStatus::Success, t0 + Duration::seconds(10)))
        .await
        .unwrap();

    // Host is still dead, but the marker says we already reacted.
    w.scheduler.tick(t0 + Duration::seconds(60)).await;
    assert_eq!(all_entries(&w.store).await.len(), 1, "leave must fire once per departure");
}

#[tokio::test]
async fn failed_entry_is_requeued_with_backoff() {
    let mut w = world(
        vec![def(json!({
            "name": "SshBruteforce",
            "trigger": "on_service:ssh",
            "services": ["ssh"],
        }))],
        vec![ssh_host()],
    );
    let t0 = Utc::now();

    w.scheduler.tick(t0).await;
    let id = all_entries(&w.store).await[0].id;

    // Two earlier attempts failed; the third failure lands now.
    w.store
        .update(id, QueueUpdate::complete(QueueStatus::Failed, t0 + Duration::seconds(30)))
        .await
        .unwrap();
    w.store
        .update(
            id,
            QueueUpdate {
                retry_count: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let t1 = t0 + Duration::seconds(60);
    w.scheduler.tick(t1).await;

    let entries = all_entries(&w.store).await;
    assert_eq!(entries.len(), 1, "retry reuses the entry, no fresh insert");
    let e = &entries[0];
    assert_eq!(e.status, QueueStatus::Pending);
    assert_eq!(e.retry_count, 3);
    assert_eq!(e.scheduled_for, Some(t1 + Duration::seconds(240)));
}

#[tokio::test]
async fn global_interval_schedules_and_promotes() {
    let mut w = world(
        vec![def(json!({
            "name": "OdinScan",
            "kind": "global",
            "trigger": "on_interval:3600",
        }))],
        Vec::new(),
    );
    let t0 = Utc::now();

    w.scheduler.tick(t0).await;
    let entries = all_entries(&w.store).await;
    assert_eq!(entries.len(), 1);
    let e = &entries[0];
    assert_eq!(e.mac_address, "__global__");
    assert_eq!(e.ip, Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED)));
    assert_eq!(e.status, QueueStatus::Scheduled);
    assert_eq!(e.scheduled_for, Some(t0), "never-run occurrence is due immediately");
    assert_eq!(e.trigger_source.as_deref(), Some("scheduler"));
    assert_eq!(e.metadata.interval_secs, Some(3600));
    assert!(e.metadata.is_global);

    // The next tick promotes the due occurrence; no duplicate appears.
    w.scheduler.tick(t0 + Duration::seconds(5)).await;
    let entries = all_entries(&w.store).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, QueueStatus::Pending);

    // Completed occurrence anchors the next one an hour later.
    w.store
        .update(e.id, QueueUpdate::complete(QueueStatus::Success, t0 + Duration::seconds(40)))
        .await
        .unwrap();
    let t1 = t0 + Duration::seconds(120);
    w.scheduler.tick(t1).await;

    let entries = all_entries(&w.store).await;
    assert_eq!(entries.len(), 2);
    let next = entries.iter().find(|e| e.status == QueueStatus::Scheduled).unwrap();
    assert_eq!(
        next.scheduled_for,
        Some(t0 + Duration::seconds(40) + Duration::seconds(3600))
    );

    // It stays scheduled until due, then a later tick promotes it.
    w.scheduler.tick(t1 + Duration::seconds(60)).await;
    assert_eq!(
        all_entries(&w.store).await.iter().filter(|e| e.status == QueueStatus::Pending).count(),
        0
    );
    w.scheduler.tick(t0 + Duration::seconds(3700)).await;
    assert_eq!(
        all_entries(&w.store).await.iter().filter(|e| e.status == QueueStatus::Pending).count(),
        1
    );
}

#[tokio::test]
async fn per_host_interval_targets_alive_hosts_only() {
    let mut dead = ssh_host();
    dead.mac_address = "11:22:33:44:55:66".into();
    dead.alive = false;
    let mut w = world(
        vec![def(json!({
            "name": "PingSweep",
            "trigger": "on_interval:600",
        }))],
        vec![ssh_host(), dead],
    );
    let t0 = Utc::now();

    w.scheduler.tick(t0).await;
    let entries = all_entries(&w.store).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].mac_address, MAC);
    assert_eq!(entries[0].ip, Some("192.168.1.23".parse::<IpAddr>().unwrap()));
    assert!(!entries[0].metadata.is_global);
}

#[tokio::test]
async fn global_on_start_runs_once_per_system() {
    let mut w = world(
        vec![def(json!({
            "name": "NetworkBaseline",
            "kind": "global",
            "trigger": "on_start",
            "timeout_secs": 120,
        }))],
        Vec::new(),
    );
    let t0 = Utc::now();

    w.scheduler.tick(t0).await;
    let entries = all_entries(&w.store).await;
    assert_eq!(entries.len(), 1);
    let e = &entries[0];
    assert_eq!(e.mac_address, "__global__");
    assert_eq!(e.ip, Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED)));
    assert_eq!(e.status, QueueStatus::Pending);
    assert_eq!(e.expires_at, Some(t0 + Duration::seconds(120)));

    // In flight: no duplicate.
    w.scheduler.tick(t0 + Duration::seconds(5)).await;
    assert_eq!(all_entries(&w.store).await.len(), 1);

    // Executed: never again.
    w.store
        .update(e.id, QueueUpdate::complete(QueueStatus::Success, t0 + Duration::seconds(60)))
        .await
        .unwrap();
    w.scheduler.tick(t0 + Duration::seconds(120)).await;
    assert_eq!(all_entries(&w.store).await.len(), 1);
}

#[tokio::test]
async fn requirements_gate_the_trigger_path() {
    let mut w = world(
        vec![
            def(json!({
                "name": "NmapScan",
                "trigger": "on_host_alive",
            })),
            def(json!({
                "name": "SshBruteforce",
                "trigger": "on_service:ssh",
                "services": ["ssh"],
                "requires": "NmapScan:success",
            })),
        ],
        vec![ssh_host()],
    );
    let t0 = Utc::now();

    w.scheduler.tick(t0).await;
    let entries = all_entries(&w.store).await;
    assert_eq!(entries.len(), 1, "bruteforce waits for the scan");
    assert_eq!(entries[0].action_name, "NmapScan");

    w.store
        .update(
            entries[0].id,
            QueueUpdate::complete(QueueStatus::Success, t0 + Duration::seconds(30)),
        )
        .await
        .unwrap();

    w.scheduler.tick(t0 + Duration::seconds(60)).await;
    let actions: Vec<_> = all_entries(&w.store)
        .await
        .into_iter()
        .map(|e| e.action_name)
        .collect();
    assert!(actions.contains(&"SshBruteforce".to_string()));
}

#[tokio::test]
async fn dead_definition_source_keeps_last_catalog() {
    let mut w = world(
        vec![def(json!({
            "name": "NmapScan",
            "trigger": "on_host_alive",
        }))],
        vec![ssh_host()],
    );
    let t0 = Utc::now();

    w.scheduler.tick(t0).await;
    assert_eq!(all_entries(&w.store).await.len(), 1);

    // Both sources go dark; the cached catalog keeps scheduling.
    w.actions.set_catalog(None);
    w.actions.set_studio(None);
    w.hosts.set_hosts(vec![{
        let mut h = ssh_host();
        h.mac_address = "11:22:33:44:55:66".into();
        h
    }]);

    w.scheduler.tick(t0 + Duration::seconds(5)).await;
    let macs: Vec<_> = all_entries(&w.store)
        .await
        .into_iter()
        .map(|e| e.mac_address)
        .collect();
    assert!(macs.contains(&"11:22:33:44:55:66".to_string()));
}

#[tokio::test]
async fn studio_flag_swaps_the_definition_source() {
    let mut w = world(
        vec![def(json!({
            "name": "CatalogScan",
            "trigger": "on_host_alive",
        }))],
        vec![ssh_host()],
    );
    w.actions.set_studio(Some(vec![def(json!({
        "name": "StudioScan",
        "trigger": "on_host_alive",
    }))]));
    let t0 = Utc::now();

    w.scheduler.tick(t0).await;
    w.runtime.set_use_studio_actions(true);
    w.scheduler.tick(t0 + Duration::seconds(5)).await;

    let actions: Vec<_> = all_entries(&w.store)
        .await
        .into_iter()
        .map(|e| e.action_name)
        .collect();
    assert!(actions.contains(&"CatalogScan".to_string()));
    assert!(actions.contains(&"StudioScan".to_string()));
}

#[tokio::test]
async fn catalog_file_round_trips_through_the_worker_input_format() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"[
            {{"name": "SshBruteforce", "trigger": "on_service:ssh", "services": ["ssh"],
              "rate_limit": "3/86400", "cooldown_secs": 300}},
            {{"name": "OdinScan", "kind": "global", "trigger": "on_interval:3600"}}
        ]"#
    )
    .unwrap();

    let raw = std::fs::read_to_string(file.path()).unwrap();
    let defs: Vec<ActionDefinition> = serde_json::from_str(&raw).unwrap();
    assert_eq!(defs.len(), 2);
    assert_eq!(defs[0].rate_limit.unwrap().to_string(), "3/86400");
    assert!(defs[1].is_global());

    let mut w = world(defs, vec![ssh_host()]);
    let t0 = Utc::now();
    w.scheduler.tick(t0).await;

    let entries = all_entries(&w.store).await;
    let actions: Vec<_> = entries.iter().map(|e| e.action_name.as_str()).collect();
    assert!(actions.contains(&"SshBruteforce"));
    assert!(actions.contains(&"OdinScan"));
}
