//! Read-only host view produced by the external scanner.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// One discovered host as seen at the start of a scheduling tick.
///
/// The scheduler never writes host facts; this struct is a snapshot and
/// stays valid for the duration of one tick. `previous_ports` carries the
/// port set from the previous scan so port-diff triggers need no state of
/// their own.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostSnapshot {
    /// Primary identity; lowercase by convention.
    pub mac_address: String,
    #[serde(default)]
    pub ips: Vec<IpAddr>,
    #[serde(default)]
    pub hostnames: Vec<String>,
    /// Currently open ports.
    #[serde(default)]
    pub ports: BTreeSet<u16>,
    /// Open ports as of the previous scan.
    #[serde(default)]
    pub previous_ports: BTreeSet<u16>,
    /// Open-port-to-service bindings discovered by the scanner, keyed by
    /// lowercase service name.
    #[serde(default)]
    pub service_ports: BTreeMap<String, u16>,
    #[serde(default)]
    pub alive: bool,
    #[serde(default)]
    pub essid: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
}

impl HostSnapshot {
    pub fn first_ip(&self) -> Option<IpAddr> {
        self.ips.first().copied()
    }

    pub fn first_hostname(&self) -> Option<&str> {
        self.hostnames.first().map(String::as_str)
    }

    /// Case-insensitive MAC comparison.
    pub fn mac_matches(&self, other: &str) -> bool {
        self.mac_address.eq_ignore_ascii_case(other)
    }
}
