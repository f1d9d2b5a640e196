//! Requirements precondition evaluator.
//!
//! Requirements are the second gate after triggers: a definition's
//! `requires` field must hold before the action is considered for
//! admission. The field accepts structured JSON, a string containing
//! JSON, or the legacy `"Action:status"` shorthand.
//!
//! Like triggers, evaluation is fail-closed: unknown shapes and store
//! failures gate the action off for this tick.


use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use huginn_core::{ActionDefinition, HostSnapshot, QueueStatus};
use huginn_store::{FactStore, StoreError};

use crate::history::QueueHistory;
use crate::trigger::service_is_open;

/// Whether an action-status requirement looks at this host's history or
/// at the whole queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    #[default]
    Host,
    Global,
}

/// Parsed requirement expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Requirement {
    All(Vec<Requirement>),
    Any(Vec<Requirement>),
    Not(Box<Requirement>),
    /// An entry for `action` with exactly `status` exists in scope.
    ActionStatus {
        action: String,
        status: QueueStatus,
        scope: Scope,
    },
    HasPort(u16),
    HasCred(String),
    HasCve(Option<String>),
    HasCpe(Option<String>),
    MacIs(String),
    EssidIs(String),
    ServiceIsOpen(String),
}

#[derive(Debug, Error)]
pub enum RequirementParseError {
    #[error("unrecognized requirement shape: {0}")]
    UnknownShape(String),

    #[error("unknown requirement key `{0}`")]
    UnknownKey(String),

    #[error("invalid value for `{key}`: {detail}")]
    InvalidValue { key: &'static str, detail: String },

    #[error("requirement string is not valid JSON: {0}")]
    BadJson(#[from] serde_json::Error),
}

impl Requirement {
    /// Parse the `requires` field. `None`/null means "no requirement".
    pub fn parse(raw: Option<&Value>) -> Result<Option<Self>, RequirementParseError> {
        match raw {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Self::parse_value(value).map(Some),
        }
    }

    fn parse_value(value: &Value) -> Result<Self, RequirementParseError> {
        match value {
            Value::String(s) => Self::parse_str(s),
            // A bare array is an implicit conjunction.
            Value::Array(items) => Ok(Requirement::All(
                items.iter().map(Self::parse_value).collect::<Result<_, _>>()?,
            )),
            Value::Object(map) => Self::parse_object(map),
            other => Err(RequirementParseError::UnknownShape(other.to_string())),
        }
    }

    fn parse_str(s: &str) -> Result<Self, RequirementParseError> {
        let s = s.trim();
        if s.starts_with('{') || s.starts_with('[') {
            let value: Value = serde_json::from_str(s)?;
            return Self::parse_value(&value);
        }
        // Legacy shorthand: "Action:status" (host scope).
        match s.split_once(':') {
            Some((action, status)) => Ok(Requirement::ActionStatus {
                action: action.trim().to_string(),
                status: status.parse().map_err(|detail| {
                    RequirementParseError::InvalidValue { key: "status", detail }
                })?,
                scope: Scope::Host,
            }),
            None => Err(RequirementParseError::UnknownShape(s.to_string())),
        }
    }

    fn parse_object(
        map: &serde_json::Map<String, Value>,
    ) -> Result<Self, RequirementParseError> {
        if let Some(action) = map.get("action") {
            return Self::parse_action_shape(action, map);
        }

        let mut parts = Vec::new();
        for (key, value) in map {
            parts.push(match key.as_str() {
                "all" => Requirement::All(Self::parse_children(key, value)?),
                "any" => Requirement::Any(Self::parse_children(key, value)?),
                "not" => Requirement::Not(Box::new(Self::parse_value(value)?)),
                "has_port" => Requirement::HasPort(expect_port(value)?),
                "has_cred" => Requirement::HasCred(expect_string("has_cred", value)?),
                "has_cve" => Requirement::HasCve(optional_id("has_cve", value)?),
                "has_cpe" => Requirement::HasCpe(optional_id("has_cpe", value)?),
                "mac_is" => Requirement::MacIs(expect_string("mac_is", value)?),
                "essid_is" => Requirement::EssidIs(expect_string("essid_is", value)?),
                "service_is_open" => {
                    Requirement::ServiceIsOpen(expect_string("service_is_open", value)?.to_lowercase())
                }
                other => return Err(RequirementParseError::UnknownKey(other.to_string())),
            });
        }
        // Several keys in one object conjoin; a single key stands alone.
        Ok(match parts.len() {
            1 => parts.remove(0),
            _ => Requirement::All(parts),
        })
    }

    fn parse_action_shape(
        action: &Value,
        map: &serde_json::Map<String, Value>,
    ) -> Result<Self, RequirementParseError> {
        let action = expect_string("action", action)?;
        let status = match map.get("status") {
            None | Some(Value::Null) => QueueStatus::Success,
            Some(v) => expect_string("status", v)?.parse().map_err(|detail| {
                RequirementParseError::InvalidValue { key: "status", detail }
            })?,
        };
        let scope = match map.get("scope").and_then(Value::as_str) {
            None | Some("host") => Scope::Host,
            Some("global") => Scope::Global,
            Some(other) => {
                return Err(RequirementParseError::InvalidValue {
                    key: "scope",
                    detail: format!("expected host|global, got `{other}`"),
                })
            }
        };
        Ok(Requirement::ActionStatus {
            action,
            status,
            scope,
        })
    }

    fn parse_children(
        key: &str,
        value: &Value,
    ) -> Result<Vec<Requirement>, RequirementParseError> {
        match value {
            Value::Array(items) => items.iter().map(Self::parse_value).collect(),
            other => Err(RequirementParseError::InvalidValue {
                key: if key == "all" { "all" } else { "any" },
                detail: format!("expected array, got {other}"),
            }),
        }
    }
}

fn expect_string(key: &'static str, value: &Value) -> Result<String, RequirementParseError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| RequirementParseError::InvalidValue {
            key,
            detail: format!("expected string, got {value}"),
        })
}

fn expect_port(value: &Value) -> Result<u16, RequirementParseError> {
    value
        .as_u64()
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| RequirementParseError::InvalidValue {
            key: "has_port",
            detail: format!("expected port number, got {value}"),
        })
}

fn optional_id(
    key: &'static str,
    value: &Value,
) -> Result<Option<String>, RequirementParseError> {
    match value {
        Value::Bool(true) | Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        other => Err(RequirementParseError::InvalidValue {
            key,
            detail: format!("expected true or identifier string, got {other}"),
        }),
    }
}

/// Walks parsed [`Requirement`] trees against host state and queue
/// history. `check` is the fail-closed entry point.
#[derive(Clone)]
pub struct RequirementsEvaluator {
    history: QueueHistory,
    facts: Arc<dyn FactStore>,
}

impl RequirementsEvaluator {
    pub fn new(history: QueueHistory, facts: Arc<dyn FactStore>) -> Self {
        Self { history, facts }
    }

    /// Parse and evaluate the definition's `requires` field. Absent
    /// requirements hold trivially; anything unparseable or failing gates
    /// the action off.
    pub async fn check(&self, host: &HostSnapshot, def: &ActionDefinition) -> bool {
        let requirement = match Requirement::parse(def.requires.as_ref()) {
            Ok(None) => return true,
            Ok(Some(req)) => req,
            Err(err) => {
                warn!(action = %def.name, %err, "unparseable requirements, gating action off");
                return false;
            }
        };
        match self.eval(&requirement, host).await {
            Ok(met) => met,
            Err(err) => {
                warn!(action = %def.name, %err, "requirements evaluation failed, gating action off");
                false
            }
        }
    }

    fn eval<'a>(
        &'a self,
        req: &'a Requirement,
        host: &'a HostSnapshot,
    ) -> Pin<Box<dyn Future<Output = Result<bool, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            match req {
                Requirement::All(children) => {
                    for child in children {
                        if !self.eval(child, host).await? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                Requirement::Any(children) => {
                    for child in children {
                        if self.eval(child, host).await? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                Requirement::Not(inner) => Ok(!self.eval(inner, host).await?),
                Requirement::ActionStatus {
                    action,
                    status,
                    scope,
                } => {
                    let mac = match scope {
                        Scope::Host => Some(host.mac_address.as_str()),
                        Scope::Global => None,
                    };
                    self.history.has_entry_with_status(mac, action, *status).await
                }
                Requirement::HasPort(port) => Ok(host.ports.contains(port)),
                Requirement::HasCred(service) => {
                    self.facts.has_credential(&host.mac_address, service).await
                }
                Requirement::HasCve(id) => {
                    self.facts.has_vulnerability(&host.mac_address, id.as_deref()).await
                }
                Requirement::HasCpe(cpe) => {
                    self.facts.has_software(&host.mac_address, cpe.as_deref()).await
                }
                Requirement::MacIs(mac) => Ok(host.mac_matches(mac)),
                Requirement::EssidIs(essid) => {
                    Ok(host.essid.as_deref() == Some(essid.as_str()))
                }
                Requirement::ServiceIsOpen(service) => Ok(service_is_open(host, service)),
            }
        })
    }
}
