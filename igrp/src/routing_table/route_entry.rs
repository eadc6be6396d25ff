use core::fmt;
use std::{net::Ipv4Addr, time::Duration};

use serde::Serialize;

use crate::{metric::Metric, network::Network, vector::MetricVector};

/// Classification of a route, based on where the destination lives relative to our autonomous
/// system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteClass {
    /// A subnet of a network directly attached to this router.
    Interior,
    /// A network inside our autonomous system.
    System,
    /// A network outside of our autonomous system.
    Exterior,
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            RouteClass::Interior => "interior",
            RouteClass::System => "system",
            RouteClass::Exterior => "exterior",
        })
    }
}

/// Where packets for a route are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NextHop {
    /// The destination is attached to the outgoing interface.
    Direct,
    /// Packets are forwarded to the neighbour with this address.
    Via(Ipv4Addr),
    /// No next hop exists, the outgoing interface is down.
    Unreachable,
}

impl NextHop {
    /// Returns the neighbour address if this is a [`NextHop::Via`].
    pub fn address(&self) -> Option<Ipv4Addr> {
        match self {
            NextHop::Via(addr) => Some(*addr),
            _ => None,
        }
    }
}

impl fmt::Display for NextHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NextHop::Direct => f.pad("direct"),
            NextHop::Via(addr) => f.pad(&addr.to_string()),
            NextHop::Unreachable => f.pad("unreachable"),
        }
    }
}

/// RouteEntry holds all relevant information about a single path to a destination. A destination
/// can have multiple entries, one per neighbour and interface it is learned from.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteEntry {
    vector: MetricVector,
    metric: Metric,
    remote_metric: Option<Metric>,
    autonomous_system: u16,
    class: RouteClass,
    next_hop: NextHop,
    interface: usize,
    last_update: Duration,
    hold_down: bool,
    forward_count: u64,
    permanent: bool,
}

impl RouteEntry {
    /// Create a new `RouteEntry` with the provided values. The entry starts outside of holddown
    /// and without forwarded packets.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vector: MetricVector,
        metric: Metric,
        remote_metric: Option<Metric>,
        autonomous_system: u16,
        class: RouteClass,
        next_hop: NextHop,
        interface: usize,
        last_update: Duration,
        permanent: bool,
    ) -> Self {
        Self {
            vector,
            metric,
            remote_metric,
            autonomous_system,
            class,
            next_hop,
            interface,
            last_update,
            hold_down: false,
            forward_count: 0,
            permanent,
        }
    }

    /// Return the [`MetricVector`] of this path.
    pub fn vector(&self) -> &MetricVector {
        &self.vector
    }

    /// Return the destination [`Network`] of this `RouteEntry`.
    pub fn destination(&self) -> Network {
        self.vector.destination()
    }

    /// Return the composite [`Metric`] of this `RouteEntry`.
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Return the [`Metric`] as computed by the neighbour who advertised the route, if known.
    pub fn remote_metric(&self) -> Option<Metric> {
        self.remote_metric
    }

    /// Return the autonomous system the route was learned from.
    pub fn autonomous_system(&self) -> u16 {
        self.autonomous_system
    }

    /// Return the [`RouteClass`] of this `RouteEntry`.
    pub fn class(&self) -> RouteClass {
        self.class
    }

    /// Return the [`NextHop`] of this `RouteEntry`.
    pub fn next_hop(&self) -> NextHop {
        self.next_hop
    }

    /// Return the outgoing interface of this `RouteEntry`.
    pub fn interface(&self) -> usize {
        self.interface
    }

    /// Return the time of the last update to this `RouteEntry`.
    pub fn last_update(&self) -> Duration {
        self.last_update
    }

    /// Return if this `RouteEntry` is in holddown.
    pub fn hold_down(&self) -> bool {
        self.hold_down
    }

    /// Return the amount of packets forwarded over this `RouteEntry`.
    pub fn forward_count(&self) -> u64 {
        self.forward_count
    }

    /// Return if this `RouteEntry` was injected locally rather than learned.
    pub fn permanent(&self) -> bool {
        self.permanent
    }

    /// Checks if the destination can currently be reached over this `RouteEntry`.
    pub fn is_reachable(&self) -> bool {
        !self.vector.is_unreachable()
    }

    /// Checks if this `RouteEntry` is for a network attached to a local interface.
    pub fn is_directly_connected(&self) -> bool {
        self.vector.hop_count() == 0
    }

    /// Replace the path information of this `RouteEntry` with freshly learned values.
    pub fn refresh(
        &mut self,
        vector: MetricVector,
        metric: Metric,
        remote_metric: Option<Metric>,
        now: Duration,
    ) {
        self.vector = vector;
        self.metric = metric;
        self.remote_metric = remote_metric;
        self.last_update = now;
    }

    /// Sets the [`MetricVector`] and the matching composite [`Metric`].
    pub fn set_vector(&mut self, vector: MetricVector, metric: Metric) {
        self.vector = vector;
        self.metric = metric;
    }

    /// Sets the [`NextHop`] for this `RouteEntry`.
    pub fn set_next_hop(&mut self, next_hop: NextHop) {
        self.next_hop = next_hop;
    }

    /// Sets if this `RouteEntry` is in holddown.
    pub fn set_hold_down(&mut self, hold_down: bool) {
        self.hold_down = hold_down;
    }

    /// Record that a packet was forwarded over this `RouteEntry`.
    pub fn record_forward(&mut self) {
        self.forward_count = self.forward_count.saturating_add(1);
    }
}
