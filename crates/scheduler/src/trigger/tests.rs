use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;

use huginn_core::{
    ActionDefinition, EntryMetadata, HostSnapshot, NewQueueEntry, QueueStatus, PRESENCE_JOIN,
    PRESENCE_LEAVE,
};
use huginn_store::{MemoryFactStore, MemoryQueueStore, QueueStore, QueueUpdate};

use super::{conventional_ports, Trigger, TriggerEvaluator, TriggerParseError};
use crate::history::QueueHistory;

// ── Parsing ─────────────────────────────────────────────────────────

#[test]
fn simple_triggers_parse() {
    assert_eq!(Trigger::parse("on_start").unwrap(), Trigger::Start);
    assert_eq!(Trigger::parse("on_new_host").unwrap(), Trigger::Start);
    assert_eq!(Trigger::parse("on_alive").unwrap(), Trigger::HostAlive);
    assert_eq!(Trigger::parse("on_host_dead").unwrap(), Trigger::HostDead);
    assert_eq!(Trigger::parse("on_new_port:8443").unwrap(), Trigger::NewPort(8443));
    assert_eq!(
        Trigger::parse("on_service:SSH").unwrap(),
        Trigger::Service("ssh".into())
    );
    assert_eq!(
        Trigger::parse("on_success:NmapScan").unwrap(),
        Trigger::Success("NmapScan".into())
    );
    assert_eq!(Trigger::parse("on_has_cve").unwrap(), Trigger::HasCve(None));
    assert_eq!(
        Trigger::parse("on_has_cve:CVE-2024-1234").unwrap(),
        Trigger::HasCve(Some("CVE-2024-1234".into()))
    );
    assert_eq!(
        Trigger::parse("on_ip_is:192.168.1.10").unwrap(),
        Trigger::IpIs("192.168.1.10".parse::<IpAddr>().unwrap())
    );
    assert_eq!(Trigger::parse("on_interval:3600").unwrap(), Trigger::Interval(3600));
}

#[test]
fn combinators_parse_recursively() {
    let t = Trigger::parse(r#"on_all:["on_host_alive", "on_any:[\"on_service:ssh\", \"on_service:telnet\"]"]"#)
        .unwrap();
    assert_eq!(
        t,
        Trigger::All(vec![
            Trigger::HostAlive,
            Trigger::Any(vec![
                Trigger::Service("ssh".into()),
                Trigger::Service("telnet".into()),
            ]),
        ])
    );
}

#[test]
fn bad_triggers_are_errors() {
    assert!(matches!(Trigger::parse(""), Err(TriggerParseError::Empty)));
    assert!(matches!(
        Trigger::parse("on_service:"),
        Err(TriggerParseError::MissingParam { .. })
    ));
    assert!(matches!(
        Trigger::parse("on_new_port:notaport"),
        Err(TriggerParseError::InvalidParam { .. })
    ));
    assert!(matches!(
        Trigger::parse("on_all:[not json"),
        Err(TriggerParseError::Payload(_))
    ));
}

#[test]
fn unrecognized_names_parse_to_unknown_leaves() {
    assert_eq!(
        Trigger::parse("on_blorp").unwrap(),
        Trigger::Unknown("on_blorp".into())
    );
    // A bad leaf inside a combinator stays a leaf; siblings survive.
    assert_eq!(
        Trigger::parse(r#"on_any:["on_host_alive", "on_blorp"]"#).unwrap(),
        Trigger::Any(vec![Trigger::HostAlive, Trigger::Unknown("on_blorp".into())])
    );
}

#[test]
fn interval_extraction() {
    assert_eq!(super::interval_of("on_interval:3600"), Some(3600));
    assert_eq!(super::interval_of("on_interval:0"), None);
    assert_eq!(super::interval_of("on_host_alive"), None);
    assert_eq!(super::interval_of("garbage"), None);
}

#[test]
fn conventional_port_table() {
    assert_eq!(conventional_ports("ssh"), &[22]);
    assert_eq!(conventional_ports("http"), &[80, 8080]);
    assert_eq!(conventional_ports("postgres"), &[5432]);
    assert!(conventional_ports("gopher").is_empty());
}

// ── Evaluation ──────────────────────────────────────────────────────

const MAC: &str = "aa:bb:cc:dd:ee:ff";

fn host(alive: bool, ports: &[u16], previous: &[u16]) -> HostSnapshot {
    HostSnapshot {
        mac_address: MAC.into(),
        ports: ports.iter().copied().collect::<BTreeSet<u16>>(),
        previous_ports: previous.iter().copied().collect::<BTreeSet<u16>>(),
        alive,
        ..Default::default()
    }
}

fn def(name: &str, trigger: &str) -> ActionDefinition {
    serde_json::from_value(serde_json::json!({ "name": name, "trigger": trigger }))
        .expect("definition json")
}

struct Fixture {
    store: Arc<MemoryQueueStore>,
    facts: Arc<MemoryFactStore>,
    evaluator: TriggerEvaluator,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryQueueStore::new());
    let facts = Arc::new(MemoryFactStore::new());
    let history = QueueHistory::new(store.clone());
    let evaluator = TriggerEvaluator::new(history, facts.clone());
    Fixture {
        store,
        facts,
        evaluator,
    }
}

async fn record_terminal(store: &MemoryQueueStore, action: &str, status: QueueStatus) {
    let id = store
        .insert_if_no_active(NewQueueEntry {
            action_name: action.into(),
            mac_address: MAC.into(),
            ip: None,
            port: None,
            hostname: None,
            service: None,
            priority: 50,
            status: QueueStatus::Pending,
            max_retries: 3,
            created_at: Utc::now(),
            scheduled_for: None,
            expires_at: None,
            trigger_source: None,
            tags: Vec::new(),
            metadata: EntryMetadata::default(),
        })
        .await
        .unwrap()
        .unwrap();
    store
        .update(id, QueueUpdate::complete(status, Utc::now()))
        .await
        .unwrap();
}

#[tokio::test]
async fn start_fires_only_before_first_execution() {
    let fx = fixture();
    let d = def("NmapScan", "on_start");
    let h = host(true, &[], &[]);

    assert!(fx.evaluator.evaluate("on_start", &h, &d).await);

    record_terminal(&fx.store, "NmapScan", QueueStatus::Success).await;
    assert!(!fx.evaluator.evaluate("on_start", &h, &d).await);
}

#[tokio::test]
async fn liveness_triggers() {
    let fx = fixture();
    let d = def("X", "on_host_alive");
    assert!(fx.evaluator.evaluate("on_host_alive", &host(true, &[], &[]), &d).await);
    assert!(!fx.evaluator.evaluate("on_host_alive", &host(false, &[], &[]), &d).await);
    assert!(fx.evaluator.evaluate("on_host_dead", &host(false, &[], &[]), &d).await);
}

#[tokio::test]
async fn port_triggers_require_live_host() {
    let fx = fixture();
    let d = def("X", "on_port_change");

    let changed = host(true, &[22, 80], &[22]);
    assert!(fx.evaluator.evaluate("on_port_change", &changed, &d).await);
    assert!(fx.evaluator.evaluate("on_new_port:80", &changed, &d).await);
    assert!(!fx.evaluator.evaluate("on_new_port:22", &changed, &d).await);

    // Same facts on a dead host never fire.
    let dead = host(false, &[22, 80], &[22]);
    assert!(!fx.evaluator.evaluate("on_port_change", &dead, &d).await);
    assert!(!fx.evaluator.evaluate("on_new_port:80", &dead, &d).await);
    assert!(!fx.evaluator.evaluate("on_service:ssh", &dead, &d).await);
    assert!(!fx.evaluator.evaluate("on_web_service", &dead, &d).await);
}

#[tokio::test]
async fn service_uses_binding_or_conventional_ports() {
    let fx = fixture();
    let d = def("X", "on_service:ssh");

    // Conventional port open.
    assert!(fx.evaluator.evaluate("on_service:ssh", &host(true, &[22], &[]), &d).await);
    // Nothing relevant open.
    assert!(!fx.evaluator.evaluate("on_service:ssh", &host(true, &[80], &[]), &d).await);

    // Binding on a non-standard port wins without any port match.
    let mut bound = host(true, &[2222], &[]);
    bound.service_ports.insert("ssh".into(), 2222);
    assert!(fx.evaluator.evaluate("on_service:ssh", &bound, &d).await);

    // Web service is http-or-https.
    assert!(fx.evaluator.evaluate("on_web_service", &host(true, &[8080], &[]), &d).await);
    assert!(fx.evaluator.evaluate("on_web_service", &host(true, &[443], &[]), &d).await);
    assert!(!fx.evaluator.evaluate("on_web_service", &host(true, &[22], &[]), &d).await);
}

#[tokio::test]
async fn presence_triggers_are_edge_triggered() {
    let fx = fixture();
    let d = def("X", "on_join");

    // No marker history: any live host counts as newly joined.
    assert!(fx.evaluator.evaluate("on_join", &host(true, &[], &[]), &d).await);
    assert!(!fx.evaluator.evaluate("on_join", &host(false, &[], &[]), &d).await);

    record_terminal(&fx.store, PRESENCE_JOIN, QueueStatus::Success).await;
    assert!(!fx.evaluator.evaluate("on_join", &host(true, &[], &[]), &d).await);
    assert!(fx.evaluator.evaluate("on_leave", &host(false, &[], &[]), &d).await);

    record_terminal(&fx.store, PRESENCE_LEAVE, QueueStatus::Success).await;
    assert!(!fx.evaluator.evaluate("on_leave", &host(false, &[], &[]), &d).await);
    assert!(fx.evaluator.evaluate("on_join", &host(true, &[], &[]), &d).await);
}

#[tokio::test]
async fn outcome_triggers_use_most_recent_terminal() {
    let fx = fixture();
    let d = def("Exploit", "on_success:NmapScan");
    let h = host(true, &[], &[]);

    assert!(!fx.evaluator.evaluate("on_success:NmapScan", &h, &d).await);

    record_terminal(&fx.store, "NmapScan", QueueStatus::Failed).await;
    assert!(!fx.evaluator.evaluate("on_success:NmapScan", &h, &d).await);
    assert!(fx.evaluator.evaluate("on_failure:NmapScan", &h, &d).await);

    record_terminal(&fx.store, "NmapScan", QueueStatus::Success).await;
    assert!(fx.evaluator.evaluate("on_success:NmapScan", &h, &d).await);
    assert!(!fx.evaluator.evaluate("on_failure:NmapScan", &h, &d).await);
}

#[tokio::test]
async fn fact_triggers_query_the_fact_store() {
    let fx = fixture();
    let d = def("X", "on_has_cve");
    let h = host(true, &[], &[]);

    assert!(!fx.evaluator.evaluate("on_has_cve", &h, &d).await);
    fx.facts.add_vulnerability(MAC, "CVE-2024-1234");
    assert!(fx.evaluator.evaluate("on_has_cve", &h, &d).await);
    assert!(fx.evaluator.evaluate("on_has_cve:CVE-2024-1234", &h, &d).await);
    assert!(!fx.evaluator.evaluate("on_has_cve:CVE-2020-0001", &h, &d).await);

    assert!(!fx.evaluator.evaluate("on_cred_found:ssh", &h, &d).await);
    fx.facts.add_credential(MAC, "ssh");
    assert!(fx.evaluator.evaluate("on_cred_found:SSH", &h, &d).await);
}

#[tokio::test]
async fn identity_triggers() {
    let fx = fixture();
    let d = def("X", "on_mac_is");
    let mut h = host(true, &[], &[]);
    h.ips.push("10.0.0.5".parse().unwrap());
    h.essid = Some("CorpNet".into());

    assert!(fx.evaluator.evaluate(&format!("on_mac_is:{}", MAC.to_uppercase()), &h, &d).await);
    assert!(!fx.evaluator.evaluate("on_mac_is:11:22:33:44:55:66", &h, &d).await);
    assert!(fx.evaluator.evaluate("on_ip_is:10.0.0.5", &h, &d).await);
    assert!(!fx.evaluator.evaluate("on_ip_is:10.0.0.6", &h, &d).await);
    assert!(fx.evaluator.evaluate("on_essid_is:CorpNet", &h, &d).await);
    assert!(!fx.evaluator.evaluate("on_essid_is:corpnet", &h, &d).await);
}

#[tokio::test]
async fn combinators_short_circuit_and_empty_lists_fail() {
    let fx = fixture();
    let d = def("X", "on_all");
    let h = host(true, &[22], &[]);

    assert!(
        fx.evaluator
            .evaluate(r#"on_all:["on_host_alive", "on_service:ssh"]"#, &h, &d)
            .await
    );
    assert!(
        !fx.evaluator
            .evaluate(r#"on_all:["on_host_alive", "on_service:telnet"]"#, &h, &d)
            .await
    );
    assert!(
        fx.evaluator
            .evaluate(r#"on_any:["on_service:telnet", "on_service:ssh"]"#, &h, &d)
            .await
    );

    // Empty combinators never fire.
    assert!(!fx.evaluator.evaluate("on_all:[]", &h, &d).await);
    assert!(!fx.evaluator.evaluate("on_any:[]", &h, &d).await);
}

#[tokio::test]
async fn unknown_child_is_false_without_sinking_siblings() {
    let fx = fixture();
    let d = def("X", "on_any");
    let h = host(true, &[], &[]);

    // Disjunction: one satisfied sibling carries the expression.
    assert!(
        fx.evaluator
            .evaluate(r#"on_any:["on_blorp", "on_host_alive"]"#, &h, &d)
            .await
    );
    // Conjunction: the unknown leaf is false, so the whole AND is.
    assert!(
        !fx.evaluator
            .evaluate(r#"on_all:["on_host_alive", "on_blorp"]"#, &h, &d)
            .await
    );
}

#[tokio::test]
async fn garbage_and_interval_never_fire() {
    let fx = fixture();
    let d = def("X", "whatever");
    let h = host(true, &[], &[]);

    assert!(!fx.evaluator.evaluate("on_blorp", &h, &d).await);
    assert!(!fx.evaluator.evaluate("", &h, &d).await);
    // Interval cadence is the publisher's job.
    assert!(!fx.evaluator.evaluate("on_interval:3600", &h, &d).await);
}
