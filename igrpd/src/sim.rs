//! Discrete event simulation of a set of routers running the protocol.
//!
//! Every router gets its own engine and a [`NodeHost`] providing its interfaces, forwarding table
//! and timers. Packets sent by an engine are delivered to all other router interfaces on the same
//! subnet after the propagation delay of the sending interface.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BinaryHeap},
    error::Error,
    mem,
    net::Ipv4Addr,
    time::Duration,
};

use bytes::Bytes;
use igrp::{
    routing_table::NextHop, ForwardingEntry, ForwardingTable, Igrp, LinkLayer, Scheduler,
    Settings, Timer,
};
use ipnet::Ipv4Net;
use serde::Serialize;
use tracing::{info, info_span, trace};

use crate::{
    metrics::SimulationMetrics,
    topology::{InterfaceSpec, Topology},
};

/// Give up tracing a path after this many routers.
const MAX_TRACE_HOPS: usize = 32;

struct Interface {
    /// Address and prefix of the interface.
    net: Ipv4Net,
    bandwidth: u64,
    delay: Duration,
    enabled: bool,
    igrp: bool,
}

impl From<&InterfaceSpec> for Interface {
    fn from(spec: &InterfaceSpec) -> Self {
        Self {
            net: spec.address,
            bandwidth: spec.bandwidth,
            delay: Duration::from_micros(spec.delay),
            enabled: spec.enabled,
            igrp: spec.igrp,
        }
    }
}

/// A packet handed to the link layer by an engine.
struct Transmission {
    interface: usize,
    destination: Ipv4Addr,
    ttl: u8,
    packet: Bytes,
}

/// The environment of a single simulated router.
#[derive(Default)]
pub struct NodeHost {
    now: Duration,
    interfaces: Vec<Interface>,
    outbox: Vec<Transmission>,
    /// Timers requested by the engine, with their absolute expiry time.
    timers: Vec<(Duration, Timer)>,
    forwarding: BTreeMap<Ipv4Net, ForwardingEntry>,
}

impl NodeHost {
    fn new(interfaces: &[InterfaceSpec]) -> Self {
        Self {
            interfaces: interfaces.iter().map(Interface::from).collect(),
            ..Self::default()
        }
    }

    /// The routes currently in the forwarding table.
    pub fn forwarding(&self) -> impl Iterator<Item = &ForwardingEntry> {
        self.forwarding.values()
    }

    /// Checks if one of the interfaces has the given address.
    fn owns(&self, address: Ipv4Addr) -> bool {
        self.interfaces.iter().any(|i| i.net.addr() == address)
    }
}

impl LinkLayer for NodeHost {
    fn interface_count(&self) -> usize {
        self.interfaces.len()
    }

    fn bandwidth(&self, interface: usize) -> u64 {
        self.interfaces.get(interface).map_or(0, |i| i.bandwidth)
    }

    fn propagation_delay(&self, interface: usize) -> Duration {
        self.interfaces
            .get(interface)
            .map_or(Duration::ZERO, |i| i.delay)
    }

    fn is_enabled(&self, interface: usize) -> bool {
        self.interfaces.get(interface).is_some_and(|i| i.enabled)
    }

    fn runs_igrp(&self, interface: usize) -> bool {
        self.interfaces.get(interface).is_some_and(|i| i.igrp)
    }

    fn address(&self, interface: usize) -> Option<Ipv4Addr> {
        self.interfaces.get(interface).map(|i| i.net.addr())
    }

    fn broadcast_address(&self, interface: usize) -> Option<Ipv4Addr> {
        self.interfaces.get(interface).map(|i| i.net.broadcast())
    }

    fn interface_for_network(&self, network: Ipv4Net) -> Option<usize> {
        self.interfaces
            .iter()
            .position(|i| network.contains(&i.net.network()))
    }

    fn send(&mut self, interface: usize, destination: Ipv4Addr, ttl: u8, packet: Bytes) {
        self.outbox.push(Transmission {
            interface,
            destination,
            ttl,
            packet,
        });
    }
}

impl ForwardingTable for NodeHost {
    fn install(&mut self, entry: ForwardingEntry) {
        self.forwarding.insert(entry.destination, entry);
    }

    fn withdraw(&mut self, destination: Ipv4Net) {
        self.forwarding.remove(&destination);
    }
}

impl Scheduler for NodeHost {
    fn now(&self) -> Duration {
        self.now
    }

    fn schedule(&mut self, delay: Duration, timer: Timer) {
        self.timers.push((self.now.saturating_add(delay), timer));
    }
}

/// A simulated router.
pub struct Node {
    id: u32,
    /// Absent if the router does not run the protocol.
    engine: Option<Igrp<SimulationMetrics>>,
    host: NodeHost,
}

impl Node {
    /// Id of the router.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The protocol engine of the router, if it runs one.
    pub fn engine(&self) -> Option<&Igrp<SimulationMetrics>> {
        self.engine.as_ref()
    }

    /// The environment of the router.
    pub fn host(&self) -> &NodeHost {
        &self.host
    }
}

enum Action {
    Timer(Timer),
    Deliver {
        interface: usize,
        source: Ipv4Addr,
        packet: Bytes,
    },
    SetInterface {
        interface: usize,
        enabled: bool,
    },
    Redistribute {
        destination: Ipv4Net,
        next_hop: NextHop,
        interface: usize,
    },
}

struct Event {
    at: Duration,
    /// Insertion order, so events at the same time run first in first out.
    sequence: u64,
    node: usize,
    action: Action,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.sequence == other.sequence
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse the ordering for min-heap
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// One router on a traced path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hop {
    pub router: u32,
    pub interface: usize,
    pub next_hop: Ipv4Addr,
}

/// Result of [`Simulation::trace_route`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteTrace {
    pub hops: Vec<Hop>,
    /// The destination was reached.
    pub reached: bool,
}

/// The full simulated network.
pub struct Simulation {
    now: Duration,
    sequence: u64,
    queue: BinaryHeap<Event>,
    nodes: Vec<Node>,
    metrics: SimulationMetrics,
}

impl Simulation {
    /// Build the network described by `topology`.
    ///
    /// Fails if the configuration of any router is invalid.
    pub fn new(topology: &Topology, seed: u64) -> Result<Self, Box<dyn Error>> {
        let settings = topology.settings.apply(Settings::default());
        let metrics = SimulationMetrics::default();

        let mut nodes = Vec::with_capacity(topology.routers.len());
        for spec in &topology.routers {
            let host = NodeHost::new(&spec.interfaces);
            let engine = match igrp::parse(&topology.config, spec.id)? {
                Some(config) => Some(Igrp::new(
                    config,
                    settings,
                    &host,
                    seed.wrapping_add(spec.id as u64),
                    metrics.clone(),
                )?),
                None => {
                    info!("Router {} does not run IGRP", spec.id);
                    None
                }
            };
            nodes.push(Node {
                id: spec.id,
                engine,
                host,
            });
        }

        let mut simulation = Self {
            now: Duration::ZERO,
            sequence: 0,
            queue: BinaryHeap::new(),
            nodes,
            metrics,
        };

        for event in &topology.events {
            let node = simulation.require(event.router)?;
            simulation.push(
                Duration::from_secs(event.at),
                node,
                Action::SetInterface {
                    interface: event.interface,
                    enabled: event.enabled,
                },
            );
        }
        for redistribution in &topology.redistributions {
            let node = simulation.require(redistribution.router)?;
            simulation.push(
                Duration::from_secs(redistribution.at),
                node,
                Action::Redistribute {
                    destination: redistribution.destination,
                    next_hop: redistribution
                        .next_hop
                        .map_or(NextHop::Unreachable, NextHop::Via),
                    interface: redistribution.interface,
                },
            );
        }

        Ok(simulation)
    }

    /// The current simulated time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// All simulated routers.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Find a router by id.
    pub fn node(&self, id: u32) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The protocol event counters of all routers.
    pub fn metrics(&self) -> &SimulationMetrics {
        &self.metrics
    }

    /// Start the engine of every router.
    pub fn start(&mut self) {
        for index in 0..self.nodes.len() {
            let node = &mut self.nodes[index];
            node.host.now = self.now;
            if let Some(engine) = node.engine.as_mut() {
                let _span = info_span!("router", id = node.id).entered();
                engine.start(&mut node.host);
            }
            self.collect(index);
        }
    }

    /// Process all events up to and including `until`.
    pub fn run(&mut self, until: Duration) {
        while self.queue.peek().is_some_and(|e| e.at <= until) {
            let Some(event) = self.queue.pop() else {
                break;
            };
            self.now = event.at;
            self.dispatch(event);
        }
        self.now = self.now.max(until);
    }

    /// Let every engine report its statistics.
    pub fn finish(&mut self) {
        for node in &mut self.nodes {
            if let Some(engine) = node.engine.as_mut() {
                let _span = info_span!("router", id = node.id).entered();
                engine.finalize();
            }
        }
    }

    /// Follow the forwarding decisions of the routers for a packet from `router` to
    /// `destination`. Every decision counts as a forwarded packet.
    ///
    /// Returns [`None`] if the router is unknown.
    pub fn trace_route(&mut self, router: u32, destination: Ipv4Addr) -> Option<RouteTrace> {
        let mut index = self.nodes.iter().position(|n| n.id == router)?;
        let mut previous = Ipv4Addr::UNSPECIFIED;
        let mut trace = RouteTrace {
            hops: Vec::new(),
            reached: false,
        };

        for _ in 0..MAX_TRACE_HOPS {
            let node = self.nodes.get_mut(index)?;
            if node.host.owns(destination) {
                trace.reached = true;
                break;
            }
            let Some(engine) = node.engine.as_mut() else {
                break;
            };
            let Some((next_hop, interface)) = engine.route(&node.host, destination, previous)
            else {
                break;
            };
            trace.hops.push(Hop {
                router: node.id,
                interface,
                next_hop,
            });
            previous = node.host.address(interface).unwrap_or(Ipv4Addr::UNSPECIFIED);

            match self.nodes.iter().position(|n| n.host.owns(next_hop)) {
                Some(next) => index = next,
                None => {
                    // Delivered on an attached network.
                    trace.reached = next_hop == destination;
                    break;
                }
            }
        }

        Some(trace)
    }

    fn require(&self, router: u32) -> Result<usize, String> {
        self.nodes
            .iter()
            .position(|n| n.id == router)
            .ok_or_else(|| format!("unknown router {router}"))
    }

    fn push(&mut self, at: Duration, node: usize, action: Action) {
        self.sequence += 1;
        self.queue.push(Event {
            at,
            sequence: self.sequence,
            node,
            action,
        });
    }

    fn dispatch(&mut self, event: Event) {
        let now = self.now;
        let Some(node) = self.nodes.get_mut(event.node) else {
            return;
        };
        node.host.now = now;
        let _span = info_span!("router", id = node.id).entered();

        match event.action {
            Action::Timer(timer) => {
                if let Some(engine) = node.engine.as_mut() {
                    engine.handle_timer(&mut node.host, timer);
                }
            }
            Action::Deliver {
                interface,
                source,
                packet,
            } => {
                let listening = node
                    .host
                    .interfaces
                    .get(interface)
                    .is_some_and(|i| i.enabled && i.igrp);
                match node.engine.as_mut() {
                    Some(engine) if listening => {
                        engine.handle_packet(&mut node.host, &packet, source, interface)
                    }
                    _ => trace!("Dropping packet from {source} on interface {interface}"),
                }
            }
            Action::SetInterface { interface, enabled } => {
                if let Some(iface) = node.host.interfaces.get_mut(interface) {
                    let state = if enabled { "up" } else { "down" };
                    info!("Interface {interface} ({}) goes {state}", iface.net);
                    iface.enabled = enabled;
                }
            }
            Action::Redistribute {
                destination,
                next_hop,
                interface,
            } => {
                if let Some(engine) = node.engine.as_mut() {
                    engine.redistribute(&mut node.host, destination, next_hop, interface, None);
                }
            }
        }

        self.collect(event.node);
    }

    /// Turn the timers and packets an engine produced into events.
    fn collect(&mut self, index: usize) {
        let Some(node) = self.nodes.get_mut(index) else {
            return;
        };
        let timers = mem::take(&mut node.host.timers);
        let outbox = mem::take(&mut node.host.outbox);

        for (at, timer) in timers {
            self.push(at, index, Action::Timer(timer));
        }
        for transmission in outbox {
            self.transmit(index, transmission);
        }
    }

    fn transmit(&mut self, sender: usize, transmission: Transmission) {
        if transmission.ttl == 0 {
            return;
        }
        let Some(iface) = self
            .nodes
            .get(sender)
            .and_then(|n| n.host.interfaces.get(transmission.interface))
        else {
            return;
        };
        let source = iface.net.addr();
        let subnet = iface.net.trunc();
        let at = self.now + iface.delay;

        let mut receivers = Vec::new();
        for (index, node) in self.nodes.iter().enumerate() {
            if index == sender {
                continue;
            }
            for (interface, candidate) in node.host.interfaces.iter().enumerate() {
                if candidate.net.trunc() != subnet {
                    continue;
                }
                if transmission.destination == subnet.broadcast()
                    || transmission.destination == candidate.net.addr()
                {
                    receivers.push((index, interface));
                }
            }
        }

        trace!(
            "Delivering {} bytes from {source} to {} receivers",
            transmission.packet.len(),
            receivers.len()
        );
        for (node, interface) in receivers {
            self.push(
                at,
                node,
                Action::Deliver {
                    interface,
                    source,
                    packet: transmission.packet.clone(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{net::Ipv4Addr, time::Duration};

    use igrp::routing_table::NextHop;
    use ipnet::Ipv4Net;

    use super::{Hop, Simulation};
    use crate::topology::Topology;

    /// Three routers in a line, each end with a stub network.
    const LINE: &str = r#"
config = """
ROUTER 1 IGRP 10
NETWORK 192.168.1.0
NETWORK 192.168.12.0

ROUTER 2 IGRP 10
NETWORK 192.168.12.0
NETWORK 192.168.23.0

ROUTER 3 IGRP 10
NETWORK 192.168.23.0
NETWORK 192.168.3.0
"""

[[router]]
id = 1
[[router.interface]]
address = "192.168.1.1/24"
[[router.interface]]
address = "192.168.12.1/24"

[[router]]
id = 2
[[router.interface]]
address = "192.168.12.2/24"
[[router.interface]]
address = "192.168.23.2/24"

[[router]]
id = 3
[[router.interface]]
address = "192.168.23.3/24"
[[router.interface]]
address = "192.168.3.1/24"

[[event]]
at = 30
router = 3
interface = 1
enabled = false
"#;

    fn net(value: &str) -> Ipv4Net {
        value.parse().expect("valid network")
    }

    fn simulation() -> Simulation {
        let topology: Topology = toml::from_str(LINE).expect("valid topology");
        let mut simulation = Simulation::new(&topology, 1).expect("valid simulation");
        simulation.start();
        simulation
    }

    #[test]
    fn line_converges() {
        let mut simulation = simulation();
        simulation.run(Duration::from_secs(25));

        let first = simulation.node(1).expect("router 1");
        let forwarding: Vec<_> = first.host().forwarding().cloned().collect();
        assert_eq!(forwarding.len(), 2);
        let far = forwarding
            .iter()
            .find(|fe| fe.destination == net("192.168.3.0/24"))
            .expect("route to far stub network");
        assert_eq!(far.next_hop, NextHop::Via(Ipv4Addr::new(192, 168, 12, 2)));
        assert_eq!(far.interface, 1);
        assert_eq!(far.cost, 2);

        let last = simulation.node(3).expect("router 3");
        assert!(last
            .host()
            .forwarding()
            .any(|fe| fe.destination == net("192.168.1.0/24")
                && fe.next_hop == NextHop::Via(Ipv4Addr::new(192, 168, 23, 2))));

        let trace = simulation
            .trace_route(1, Ipv4Addr::new(192, 168, 3, 7))
            .expect("known router");
        assert!(trace.reached);
        assert_eq!(
            trace.hops,
            vec![
                Hop {
                    router: 1,
                    interface: 1,
                    next_hop: Ipv4Addr::new(192, 168, 12, 2)
                },
                Hop {
                    router: 2,
                    interface: 1,
                    next_hop: Ipv4Addr::new(192, 168, 23, 3)
                },
                Hop {
                    router: 3,
                    interface: 1,
                    next_hop: Ipv4Addr::new(192, 168, 3, 7)
                },
            ]
        );
        assert_eq!(simulation.metrics().snapshot().packets_forwarded, 3);
    }

    #[test]
    fn lost_network_is_withdrawn() {
        let mut simulation = simulation();
        simulation.run(Duration::from_secs(60));

        let first = simulation.node(1).expect("router 1");
        assert!(!first
            .host()
            .forwarding()
            .any(|fe| fe.destination == net("192.168.3.0/24")));
        assert!(simulation.metrics().snapshot().hold_downs_started >= 2);

        let trace = simulation
            .trace_route(1, Ipv4Addr::new(192, 168, 3, 7))
            .expect("known router");
        assert!(!trace.reached);
        assert!(trace.hops.is_empty());
    }

    #[test]
    fn router_without_block_does_not_run() {
        let mut topology: Topology = toml::from_str(LINE).expect("valid topology");
        topology.config = topology.config.replace("ROUTER 2 IGRP 10", "ROUTER 4 IGRP 10");
        let simulation = Simulation::new(&topology, 1).expect("valid simulation");
        assert!(simulation.node(2).and_then(|n| n.engine()).is_none());
        assert!(simulation.node(1).and_then(|n| n.engine()).is_some());
    }

    #[test]
    fn oversized_broadcast_timer_is_rejected() {
        let mut topology: Topology = toml::from_str(LINE).expect("valid topology");
        topology.settings.broadcast = Some(u64::MAX / 2);
        assert!(Simulation::new(&topology, 1).is_err());
    }
}
