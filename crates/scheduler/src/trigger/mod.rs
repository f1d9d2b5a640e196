//! Trigger condition DSL: parsing and evaluation.
//!
//! Triggers are short strings of the form `name` or `name:param`, with
//! JSON-array combinators `on_all:[...]` / `on_any:[...]` nesting
//! arbitrarily. [`Trigger::parse`] turns the string into an AST once;
//! [`TriggerEvaluator::evaluate`] walks it against a host snapshot.
//!
//! Evaluation is fail-closed: parse errors, unknown names, and store
//! failures all yield `false` for this tick (logged, never propagated).

mod eval;

#[cfg(test)]
mod tests;

use std::net::IpAddr;

use thiserror::Error;

pub use eval::TriggerEvaluator;

/// Parsed trigger expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// `on_start` / `on_new_host`: never executed for this host yet.
    Start,
    /// `on_host_alive` (alias `on_alive`).
    HostAlive,
    /// `on_host_dead` (alias `on_dead`).
    HostDead,
    /// `on_join`: edge-triggered liveness transition to alive.
    Join,
    /// `on_leave`: edge-triggered liveness transition to dead.
    Leave,
    /// `on_port_change`: current port set differs from the previous scan.
    PortChange,
    /// `on_new_port:P`: port open now and not before.
    NewPort(u16),
    /// `on_success:ACTION`: most recent terminal status is success.
    Success(String),
    /// `on_failure:ACTION`: most recent terminal status is failed.
    Failure(String),
    /// `on_cred_found:SERVICE`.
    CredFound(String),
    /// `on_service:SERVICE`: binding or conventional-port match.
    Service(String),
    /// `on_web_service`: http or https.
    WebService,
    /// `on_mac_is:MAC` (case-insensitive).
    MacIs(String),
    /// `on_essid_is:ESSID` (exact).
    EssidIs(String),
    /// `on_ip_is:IP`.
    IpIs(IpAddr),
    /// `on_has_cve[:ID]`.
    HasCve(Option<String>),
    /// `on_has_cpe[:ID]`.
    HasCpe(Option<String>),
    /// `on_interval:N` — publisher-owned cadence; always false here.
    Interval(u64),
    /// `on_all:[...]` — conjunction; empty list evaluates false.
    All(Vec<Trigger>),
    /// `on_any:[...]` — disjunction; empty list evaluates false.
    Any(Vec<Trigger>),
    /// Unrecognized name. Evaluates false (logged) so one bad leaf
    /// inside a combinator does not sink its siblings.
    Unknown(String),
}

#[derive(Debug, Error)]
pub enum TriggerParseError {
    #[error("empty trigger")]
    Empty,

    #[error("trigger `{name}` requires a parameter")]
    MissingParam { name: &'static str },

    #[error("invalid parameter for `{name}`: `{value}`")]
    InvalidParam { name: &'static str, value: String },

    #[error("invalid combinator payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl Trigger {
    /// Parse one trigger expression. Combinator payloads are JSON arrays
    /// of nested trigger strings, parsed recursively.
    pub fn parse(raw: &str) -> Result<Self, TriggerParseError> {
        let s = raw.trim();
        if s.is_empty() {
            return Err(TriggerParseError::Empty);
        }

        if let Some(payload) = s.strip_prefix("on_all:") {
            return Ok(Trigger::All(Self::parse_list(payload)?));
        }
        if let Some(payload) = s.strip_prefix("on_any:") {
            return Ok(Trigger::Any(Self::parse_list(payload)?));
        }

        let (name, param) = match s.split_once(':') {
            Some((name, param)) => (name.trim(), param.trim()),
            None => (s, ""),
        };

        match name {
            "on_start" | "on_new_host" => Ok(Trigger::Start),
            "on_host_alive" | "on_alive" => Ok(Trigger::HostAlive),
            "on_host_dead" | "on_dead" => Ok(Trigger::HostDead),
            "on_join" => Ok(Trigger::Join),
            "on_leave" => Ok(Trigger::Leave),
            "on_port_change" => Ok(Trigger::PortChange),
            "on_new_port" => {
                let port = param.parse::<u16>().map_err(|_| {
                    TriggerParseError::InvalidParam {
                        name: "on_new_port",
                        value: param.to_string(),
                    }
                })?;
                Ok(Trigger::NewPort(port))
            }
            "on_success" => Ok(Trigger::Success(required(param, "on_success")?)),
            "on_failure" => Ok(Trigger::Failure(required(param, "on_failure")?)),
            "on_cred_found" => {
                Ok(Trigger::CredFound(required(param, "on_cred_found")?.to_lowercase()))
            }
            "on_service" => Ok(Trigger::Service(required(param, "on_service")?.to_lowercase())),
            "on_web_service" => Ok(Trigger::WebService),
            "on_mac_is" => Ok(Trigger::MacIs(required(param, "on_mac_is")?.to_lowercase())),
            "on_essid_is" => Ok(Trigger::EssidIs(required(param, "on_essid_is")?)),
            "on_ip_is" => {
                let ip = param.parse::<IpAddr>().map_err(|_| {
                    TriggerParseError::InvalidParam {
                        name: "on_ip_is",
                        value: param.to_string(),
                    }
                })?;
                Ok(Trigger::IpIs(ip))
            }
            "on_has_cve" => Ok(Trigger::HasCve(optional(param))),
            "on_has_cpe" => Ok(Trigger::HasCpe(optional(param))),
            "on_interval" => {
                let secs = param.parse::<u64>().map_err(|_| {
                    TriggerParseError::InvalidParam {
                        name: "on_interval",
                        value: param.to_string(),
                    }
                })?;
                Ok(Trigger::Interval(secs))
            }
            other => Ok(Trigger::Unknown(other.to_string())),
        }
    }

    fn parse_list(payload: &str) -> Result<Vec<Trigger>, TriggerParseError> {
        let items: Vec<String> = serde_json::from_str(payload)?;
        items.iter().map(|s| Self::parse(s)).collect()
    }

    /// The publication cadence, if this is an interval trigger with a
    /// positive period. Used by the queue publisher; interval triggers
    /// never fire through the evaluator.
    pub fn interval_secs(&self) -> Option<u64> {
        match self {
            Trigger::Interval(secs) if *secs > 0 => Some(*secs),
            _ => None,
        }
    }
}

/// Parse the definition's trigger field into an interval, if it is one.
pub fn interval_of(trigger: &str) -> Option<u64> {
    Trigger::parse(trigger).ok().and_then(|t| t.interval_secs())
}

fn required(param: &str, name: &'static str) -> Result<String, TriggerParseError> {
    if param.is_empty() {
        Err(TriggerParseError::MissingParam { name })
    } else {
        Ok(param.to_string())
    }
}

fn optional(param: &str) -> Option<String> {
    if param.is_empty() {
        None
    } else {
        Some(param.to_string())
    }
}

/// Conventional port numbers per service, used when the scanner recorded
/// no explicit binding for a host.
pub(crate) fn conventional_ports(service: &str) -> &'static [u16] {
    match service {
        "ssh" => &[22],
        "http" => &[80, 8080],
        "https" => &[443],
        "smb" => &[445],
        "ftp" => &[21],
        "telnet" => &[23],
        "mysql" => &[3306],
        "mssql" => &[1433],
        "postgres" => &[5432],
        "rdp" => &[3389],
        "vnc" => &[5900],
        _ => &[],
    }
}

/// A service counts as open when the scanner bound it to an open port, or
/// when any of its conventional ports is open on the host.
pub(crate) fn service_is_open(host: &huginn_core::HostSnapshot, service: &str) -> bool {
    if host.service_ports.contains_key(service) {
        return true;
    }
    conventional_ports(service)
        .iter()
        .any(|p| host.ports.contains(p))
}
