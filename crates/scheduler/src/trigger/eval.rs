//! Trigger AST evaluation against one host snapshot.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::warn;

use huginn_core::{ActionDefinition, HostSnapshot, PresenceMarker, QueueStatus};
use huginn_store::{FactStore, StoreError};

use super::{service_is_open, Trigger};
use crate::history::QueueHistory;

/// Walks a parsed [`Trigger`] tree against host state and queue history.
///
/// `evaluate` is the fail-closed entry point: any parse error, unknown
/// construct, or store failure is logged and treated as "condition not
/// met" for this tick.
#[derive(Clone)]
pub struct TriggerEvaluator {
    history: QueueHistory,
    facts: Arc<dyn FactStore>,
}

impl TriggerEvaluator {
    pub fn new(history: QueueHistory, facts: Arc<dyn FactStore>) -> Self {
        Self { history, facts }
    }

    /// Parse and evaluate a raw trigger string. Never errors: failures
    /// mean the trigger does not fire.
    pub async fn evaluate(&self, raw: &str, host: &HostSnapshot, def: &ActionDefinition) -> bool {
        let trigger = match Trigger::parse(raw) {
            Ok(t) => t,
            Err(err) => {
                warn!(action = %def.name, trigger = raw, %err, "unparseable trigger, treating as false");
                return false;
            }
        };
        match self.eval(&trigger, host, def).await {
            Ok(fired) => fired,
            Err(err) => {
                warn!(action = %def.name, trigger = raw, %err, "trigger evaluation failed, treating as false");
                false
            }
        }
    }

    fn eval<'a>(
        &'a self,
        trigger: &'a Trigger,
        host: &'a HostSnapshot,
        def: &'a ActionDefinition,
    ) -> Pin<Box<dyn Future<Output = Result<bool, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            // Port-derived facts are stale the moment a host stops
            // responding; those triggers require a live host.
            let needs_alive = matches!(
                trigger,
                Trigger::PortChange
                    | Trigger::NewPort(_)
                    | Trigger::Service(_)
                    | Trigger::WebService
            );
            if needs_alive && !host.alive {
                return Ok(false);
            }

            match trigger {
                Trigger::Start => {
                    Ok(!self.history.has_terminal(&host.mac_address, &def.name).await?)
                }
                Trigger::HostAlive => Ok(host.alive),
                Trigger::HostDead => Ok(!host.alive),
                Trigger::Join => {
                    if !host.alive {
                        return Ok(false);
                    }
                    let last = self.history.last_presence_marker(&host.mac_address).await?;
                    Ok(last != Some(PresenceMarker::Join))
                }
                Trigger::Leave => {
                    if host.alive {
                        return Ok(false);
                    }
                    let last = self.history.last_presence_marker(&host.mac_address).await?;
                    Ok(last != Some(PresenceMarker::Leave))
                }
                Trigger::PortChange => Ok(host.ports != host.previous_ports),
                Trigger::NewPort(port) => {
                    Ok(host.ports.contains(port) && !host.previous_ports.contains(port))
                }
                Trigger::Success(action) => {
                    let last = self.history.last_terminal_status(&host.mac_address, action).await?;
                    Ok(last == Some(QueueStatus::Success))
                }
                Trigger::Failure(action) => {
                    let last = self.history.last_terminal_status(&host.mac_address, action).await?;
                    Ok(last == Some(QueueStatus::Failed))
                }
                Trigger::CredFound(service) => {
                    self.facts.has_credential(&host.mac_address, service).await
                }
                Trigger::Service(service) => Ok(service_is_open(host, service)),
                Trigger::WebService => {
                    Ok(service_is_open(host, "http") || service_is_open(host, "https"))
                }
                Trigger::MacIs(mac) => Ok(host.mac_matches(mac)),
                Trigger::EssidIs(essid) => Ok(host.essid.as_deref() == Some(essid.as_str())),
                Trigger::IpIs(ip) => Ok(host.ips.contains(ip)),
                Trigger::HasCve(id) => {
                    self.facts.has_vulnerability(&host.mac_address, id.as_deref()).await
                }
                Trigger::HasCpe(cpe) => {
                    self.facts.has_software(&host.mac_address, cpe.as_deref()).await
                }
                // Cadence-driven publication is owned by the publisher;
                // interval triggers never fire through evaluation.
                Trigger::Interval(_) => Ok(false),
                Trigger::Unknown(name) => {
                    warn!(action = %def.name, trigger = %name, "unknown trigger name, treating as false");
                    Ok(false)
                }
                Trigger::All(children) => {
                    if children.is_empty() {
                        return Ok(false);
                    }
                    for child in children {
                        if !self.eval(child, host, def).await? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                Trigger::Any(children) => {
                    for child in children {
                        if self.eval(child, host, def).await? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
            }
        })
    }
}
