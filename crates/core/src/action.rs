//! Action catalog types: definitions, kinds, and rate-limit specs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// How an action is targeted: once per discovered host, or once for the
/// whole system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Evaluated per host against the trigger expression.
    #[default]
    Normal,
    /// Targets the controller identity; published by the interval/on_start
    /// paths only.
    Global,
}

/// A `"N/period-seconds"` enqueue budget for one (action, target) pair.
///
/// At most `count` entries may be created within any trailing window of
/// `period_secs` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub count: u32,
    pub period_secs: u64,
}

impl FromStr for RateLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (count, period) = s
            .split_once('/')
            .ok_or_else(|| format!("expected N/SECONDS, got `{s}`"))?;
        let count = count
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("bad count in `{s}`: {e}"))?;
        let period_secs = period
            .trim()
            .parse::<u64>()
            .map_err(|e| format!("bad period in `{s}`: {e}"))?;
        if count == 0 || period_secs == 0 {
            return Err(format!("rate limit `{s}` must be positive"));
        }
        Ok(RateLimit { count, period_secs })
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.count, self.period_secs)
    }
}

impl Serialize for RateLimit {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Deserialize an optional rate-limit spec, mapping malformed text to
/// `None`. A broken spec must never block admission (it only disables
/// the rate-limit check) and must never fail catalog loading.
fn lenient_rate_limit<'de, D>(deserializer: D) -> Result<Option<RateLimit>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| {
        let s = s.trim().to_string();
        if s.is_empty() {
            return None;
        }
        match s.parse::<RateLimit>() {
            Ok(rl) => Some(rl),
            Err(e) => {
                warn!(spec = %s, error = %e, "ignoring malformed rate limit");
                None
            }
        }
    }))
}

/// A catalog entry describing a runnable action and its scheduling policy.
///
/// Definitions are immutable during one scheduling tick; the definition
/// cache swaps the whole map on refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDefinition {
    /// Unique action name; also the queue-entry key.
    pub name: String,
    #[serde(default)]
    pub kind: ActionKind,
    /// Trigger expression in the condition DSL (e.g. `on_service:ssh`,
    /// `on_interval:3600`, `on_all:[...]`).
    #[serde(default)]
    pub trigger: String,
    /// Precondition expression: structured JSON, JSON text, or the legacy
    /// `"Action:status"` shorthand. Parsed once by the requirements
    /// evaluator.
    #[serde(default)]
    pub requires: Option<serde_json::Value>,
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// Minimum seconds since the last terminal execution before the action
    /// may re-run for the same target. Zero disables the check.
    #[serde(default)]
    pub cooldown_secs: u64,
    #[serde(default, deserialize_with = "lenient_rate_limit")]
    pub rate_limit: Option<RateLimit>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-run budget in seconds; also sets `expires_at` for trigger-path
    /// entries waiting in `pending`.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Target services in preference order; the first one with an open-port
    /// binding on the host wins.
    #[serde(default)]
    pub services: Vec<String>,
    /// Fixed target port, used only when no service binding matches and the
    /// port is actually open on the host.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ActionDefinition {
    pub fn is_global(&self) -> bool {
        self.kind == ActionKind::Global
    }
}

fn default_priority() -> u8 {
    50
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout() -> u64 {
    300
}

fn default_enabled() -> bool {
    true
}
