//! Everything the engine needs from the node it runs on.
//!
//! The engine itself holds no sockets, clocks or forwarding state. The surrounding node provides
//! those through the traits in this module, and every engine operation borrows them for the
//! duration of the call.

use std::{net::Ipv4Addr, time::Duration};

use bytes::Bytes;
use ipnet::Ipv4Net;

use crate::{routing_table::NextHop, timer::Timer, vector::LinkMetrics};

/// Access to the local interfaces: their characteristics, their state, and packet transmission.
pub trait LinkLayer {
    /// Amount of interfaces on the node. Interfaces are numbered from 0.
    fn interface_count(&self) -> usize;

    /// Bandwidth of the interface in bits per second.
    fn bandwidth(&self, interface: usize) -> u64;

    /// Propagation delay of the link attached to the interface.
    fn propagation_delay(&self, interface: usize) -> Duration;

    /// Checks if the interface is currently up.
    fn is_enabled(&self, interface: usize) -> bool;

    /// Checks if the interface uses IGRP as its unicast routing protocol.
    fn runs_igrp(&self, interface: usize) -> bool;

    /// Address of the interface, if it has acquired one.
    fn address(&self, interface: usize) -> Option<Ipv4Addr>;

    /// Broadcast address of the subnet the interface is attached to.
    fn broadcast_address(&self, interface: usize) -> Option<Ipv4Addr>;

    /// The interface attached to the given network, if any.
    fn interface_for_network(&self, network: Ipv4Net) -> Option<usize>;

    /// Transmit a protocol packet out of the interface.
    fn send(&mut self, interface: usize, destination: Ipv4Addr, ttl: u8, packet: Bytes);

    /// Delay and inverse bandwidth of the interface, as used in metric vectors.
    fn link_metrics(&self, interface: usize) -> LinkMetrics {
        LinkMetrics::from_link(self.bandwidth(interface), self.propagation_delay(interface))
    }
}

/// A route as handed to the node forwarding table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardingEntry {
    /// The destination, with its classful mask.
    pub destination: Ipv4Net,
    /// Where to send packets for the destination.
    pub next_hop: NextHop,
    /// Outgoing interface.
    pub interface: usize,
    /// Hop count of the route.
    pub cost: u8,
}

/// The forwarding table of the node, shared by all routing protocols it runs.
pub trait ForwardingTable {
    /// Install or replace the route for a destination.
    fn install(&mut self, entry: ForwardingEntry);

    /// Mark a destination as unreachable.
    fn withdraw(&mut self, destination: Ipv4Net);
}

/// Simulated time and timer delivery.
pub trait Scheduler {
    /// The current time, as elapsed since the start of the simulation.
    fn now(&self) -> Duration;

    /// Deliver `timer` to the engine after `delay`. Timers can't be cancelled.
    fn schedule(&mut self, delay: Duration, timer: Timer);
}

/// The full set of services the engine needs from its node.
pub trait Host: LinkLayer + ForwardingTable + Scheduler {}

impl<T> Host for T where T: LinkLayer + ForwardingTable + Scheduler {}
