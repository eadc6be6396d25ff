//! Description of a simulated network, loaded from a TOML file.
//!
//! ```toml
//! duration = 600
//! config = """
//! ROUTER 1 IGRP 10
//! NETWORK 192.168.1.0
//! """
//!
//! [settings]
//! broadcast = 30
//!
//! [[router]]
//! id = 1
//!
//! [[router.interface]]
//! address = "192.168.1.1/24"
//! bandwidth = 10000000
//! delay = 1000
//! ```

use std::{collections::HashSet, error::Error, fs, net::Ipv4Addr, path::Path, time::Duration};

use igrp::Settings;
use ipnet::Ipv4Net;
use serde::Deserialize;

/// Simulated duration if the topology does not set one, in seconds.
const DEFAULT_DURATION: u64 = 600;
/// Bandwidth of an interface if not set, in bits per second.
const DEFAULT_BANDWIDTH: u64 = 10_000_000;
/// Propagation delay of an interface if not set, in microseconds.
const DEFAULT_DELAY: u64 = 1_000;

/// A full simulation scenario.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Topology {
    /// Simulated time to run, in seconds.
    #[serde(default = "default_duration")]
    pub duration: u64,
    /// Seed for the random jitter of all routers.
    #[serde(default)]
    pub seed: u64,
    /// Routing protocol configuration text, shared by all routers.
    #[serde(default)]
    pub config: String,
    /// Overrides of the default engine settings.
    #[serde(default)]
    pub settings: SettingsOverrides,
    /// The simulated routers.
    #[serde(rename = "router")]
    pub routers: Vec<RouterSpec>,
    /// Interface state changes.
    #[serde(default, rename = "event")]
    pub events: Vec<InterfaceEvent>,
    /// Routes injected from outside the protocol.
    #[serde(default, rename = "redistribute")]
    pub redistributions: Vec<Redistribution>,
    /// Paths to trace once the simulation finished.
    #[serde(default, rename = "probe")]
    pub probes: Vec<Probe>,
}

/// A single router.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterSpec {
    /// Id of the router, used to find its block in the configuration text.
    pub id: u32,
    /// Interfaces of the router, numbered from 0 in the order listed.
    #[serde(default, rename = "interface")]
    pub interfaces: Vec<InterfaceSpec>,
}

/// A single router interface. Interfaces with the same subnet share a link.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterfaceSpec {
    /// Address and prefix length of the interface, e.g. `192.168.1.1/24`.
    pub address: Ipv4Net,
    /// Bandwidth in bits per second.
    #[serde(default = "default_bandwidth")]
    pub bandwidth: u64,
    /// Propagation delay in microseconds.
    #[serde(default = "default_delay")]
    pub delay: u64,
    /// The interface starts up.
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// The interface runs the routing protocol.
    #[serde(default = "enabled")]
    pub igrp: bool,
}

/// Engine settings which differ from the defaults. Timers are in seconds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsOverrides {
    pub broadcast: Option<u64>,
    pub invalid: Option<u64>,
    pub hold: Option<u64>,
    pub flush: Option<u64>,
    pub periodic: Option<u64>,
    pub sleep: Option<u64>,
    pub max_hops: Option<u8>,
    pub collect_stats: Option<bool>,
}

impl SettingsOverrides {
    /// Apply the overrides on top of `settings`.
    pub fn apply(&self, settings: Settings) -> Settings {
        let secs = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_secs).unwrap_or(default)
        };
        Settings {
            broadcast_time: secs(self.broadcast, settings.broadcast_time),
            invalid_time: secs(self.invalid, settings.invalid_time),
            hold_time: secs(self.hold, settings.hold_time),
            flush_time: secs(self.flush, settings.flush_time),
            periodic_time: secs(self.periodic, settings.periodic_time),
            sleep_time: secs(self.sleep, settings.sleep_time),
            max_hops: self.max_hops.unwrap_or(settings.max_hops),
            collect_stats: self.collect_stats.unwrap_or(settings.collect_stats),
        }
    }
}

/// Bring an interface up or down.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterfaceEvent {
    /// Time of the change, in seconds.
    pub at: u64,
    pub router: u32,
    pub interface: usize,
    pub enabled: bool,
}

/// Hand a route learned from another routing source to a router.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Redistribution {
    /// Time of the injection, in seconds.
    pub at: u64,
    pub router: u32,
    pub destination: Ipv4Net,
    /// Next hop of the route. Without one, the route is withdrawn.
    pub next_hop: Option<Ipv4Addr>,
    pub interface: usize,
}

/// Trace the path a packet from `router` to `destination` would take.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Probe {
    pub router: u32,
    pub destination: Ipv4Addr,
    /// Amount of packets to send, to observe load sharing.
    #[serde(default = "default_probe_count")]
    pub count: usize,
}

impl Topology {
    /// Load and check a topology file.
    pub fn load(path: &Path) -> Result<Self, Box<dyn Error>> {
        let text = fs::read_to_string(path)?;
        let topology: Topology = toml::from_str(&text)?;
        topology.check()?;
        Ok(topology)
    }

    /// Verify all references to routers and interfaces resolve.
    pub fn check(&self) -> Result<(), String> {
        let mut ids = HashSet::new();
        for router in &self.routers {
            if !ids.insert(router.id) {
                return Err(format!("router {} is defined more than once", router.id));
            }
        }

        let references = self
            .events
            .iter()
            .map(|e| (e.router, Some(e.interface)))
            .chain(self.redistributions.iter().map(|r| (r.router, Some(r.interface))))
            .chain(self.probes.iter().map(|p| (p.router, None)));
        for (id, interface) in references {
            let Some(router) = self.router(id) else {
                return Err(format!("unknown router {id}"));
            };
            if let Some(interface) = interface {
                if interface >= router.interfaces.len() {
                    return Err(format!("router {id} has no interface {interface}"));
                }
            }
        }

        Ok(())
    }

    /// Find a router by id.
    pub fn router(&self, id: u32) -> Option<&RouterSpec> {
        self.routers.iter().find(|r| r.id == id)
    }
}

fn default_duration() -> u64 {
    DEFAULT_DURATION
}

fn default_bandwidth() -> u64 {
    DEFAULT_BANDWIDTH
}

fn default_delay() -> u64 {
    DEFAULT_DELAY
}

fn default_probe_count() -> usize {
    1
}

fn enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use igrp::Settings;

    use super::Topology;

    const TOPOLOGY: &str = r#"
duration = 120
config = """
ROUTER 1 IGRP 10
NETWORK 192.168.1.0
"""

[settings]
broadcast = 30
collect_stats = true

[[router]]
id = 1

[[router.interface]]
address = "192.168.1.1/24"

[[router.interface]]
address = "192.168.2.1/24"
bandwidth = 56000
delay = 20000
igrp = false

[[event]]
at = 60
router = 1
interface = 1
enabled = false
"#;

    #[test]
    fn parse_topology() {
        let topology: Topology = toml::from_str(TOPOLOGY).expect("valid topology");
        assert!(topology.check().is_ok());
        assert_eq!(topology.duration, 120);
        assert_eq!(topology.routers.len(), 1);

        let interfaces = &topology.routers[0].interfaces;
        assert_eq!(interfaces.len(), 2);
        assert_eq!(interfaces[0].bandwidth, 10_000_000);
        assert_eq!(interfaces[0].delay, 1_000);
        assert!(interfaces[0].igrp);
        assert_eq!(interfaces[1].bandwidth, 56_000);
        assert!(!interfaces[1].igrp);
        assert_eq!(topology.events.len(), 1);

        let settings = topology.settings.apply(Settings::default());
        assert_eq!(settings.broadcast_time, Duration::from_secs(30));
        assert_eq!(settings.invalid_time, Duration::from_secs(270));
        assert!(settings.collect_stats);
    }

    #[test]
    fn unknown_references_are_rejected() {
        let mut topology: Topology = toml::from_str(TOPOLOGY).expect("valid topology");
        topology.events[0].interface = 2;
        assert!(topology.check().is_err());

        topology.events[0].interface = 0;
        topology.events[0].router = 2;
        assert!(topology.check().is_err());
    }
}
