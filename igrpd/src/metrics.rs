//! A [`Metrics`] implementation which counts protocol events over all simulated routers.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use igrp::Metrics;
use serde::Serialize;

#[derive(Debug, Default)]
struct Counters {
    updates_processed: AtomicU64,
    routes_processed: AtomicU64,
    requests_processed: AtomicU64,
    packets_dropped: AtomicU64,
    updates_sent: AtomicU64,
    triggered_updates: AtomicU64,
    route_timeouts: AtomicU64,
    routes_flushed: AtomicU64,
    hold_downs_started: AtomicU64,
    hold_downs_released: AtomicU64,
    packets_forwarded: AtomicU64,
}

/// Shared event counters. Clones count into the same totals.
#[derive(Debug, Clone, Default)]
pub struct SimulationMetrics {
    counters: Arc<Counters>,
}

/// Point in time copy of [`SimulationMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub updates_processed: u64,
    pub routes_processed: u64,
    pub requests_processed: u64,
    pub packets_dropped: u64,
    pub updates_sent: u64,
    pub triggered_updates: u64,
    pub route_timeouts: u64,
    pub routes_flushed: u64,
    pub hold_downs_started: u64,
    pub hold_downs_released: u64,
    pub packets_forwarded: u64,
}

impl SimulationMetrics {
    /// Read the current value of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.counters;
        MetricsSnapshot {
            updates_processed: c.updates_processed.load(Ordering::Relaxed),
            routes_processed: c.routes_processed.load(Ordering::Relaxed),
            requests_processed: c.requests_processed.load(Ordering::Relaxed),
            packets_dropped: c.packets_dropped.load(Ordering::Relaxed),
            updates_sent: c.updates_sent.load(Ordering::Relaxed),
            triggered_updates: c.triggered_updates.load(Ordering::Relaxed),
            route_timeouts: c.route_timeouts.load(Ordering::Relaxed),
            routes_flushed: c.routes_flushed.load(Ordering::Relaxed),
            hold_downs_started: c.hold_downs_started.load(Ordering::Relaxed),
            hold_downs_released: c.hold_downs_released.load(Ordering::Relaxed),
            packets_forwarded: c.packets_forwarded.load(Ordering::Relaxed),
        }
    }
}

impl Metrics for SimulationMetrics {
    fn router_process_update(&self, routes: usize) {
        self.counters
            .updates_processed
            .fetch_add(1, Ordering::Relaxed);
        self.counters
            .routes_processed
            .fetch_add(routes as u64, Ordering::Relaxed);
    }

    fn router_process_request(&self) {
        self.counters
            .requests_processed
            .fetch_add(1, Ordering::Relaxed);
    }

    fn router_packet_dropped(&self) {
        self.counters.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn router_update_sent(&self, _: usize) {
        self.counters.updates_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn router_triggered_update(&self) {
        self.counters
            .triggered_updates
            .fetch_add(1, Ordering::Relaxed);
    }

    fn router_route_timeout(&self) {
        self.counters.route_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    fn router_route_flushed(&self) {
        self.counters.routes_flushed.fetch_add(1, Ordering::Relaxed);
    }

    fn router_hold_down_started(&self) {
        self.counters
            .hold_downs_started
            .fetch_add(1, Ordering::Relaxed);
    }

    fn router_hold_down_released(&self) {
        self.counters
            .hold_downs_released
            .fetch_add(1, Ordering::Relaxed);
    }

    fn router_packet_forwarded(&self, _: usize) {
        self.counters
            .packets_forwarded
            .fetch_add(1, Ordering::Relaxed);
    }
}
