//! Output of the simulation results, either as tables or as json.

use std::net::Ipv4Addr;

use igrp::{metric::Metric, routing_table::RouteClass, Statistics};
use ipnet::Ipv4Net;
use prettytable::{row, Table};
use serde::Serialize;

use crate::{
    metrics::MetricsSnapshot,
    sim::{RouteTrace, Simulation},
    topology::Probe,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    /// Simulated time at the end of the run, in seconds.
    pub time: f64,
    pub routers: Vec<RouterReport>,
    pub metrics: MetricsSnapshot,
    pub probes: Vec<ProbeReport>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterReport {
    pub id: u32,
    /// Absent if the router does not run the protocol.
    pub autonomous_system: Option<u16>,
    pub routes: Vec<RouteReport>,
    pub forwarding: Vec<ForwardingReport>,
    pub statistics: Option<Statistics>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteReport {
    pub tos: u8,
    pub destination: Ipv4Net,
    pub next_hop: String,
    pub interface: usize,
    pub metric: Metric,
    pub hops: u8,
    pub class: RouteClass,
    pub reachable: bool,
    pub hold_down: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardingReport {
    pub destination: Ipv4Net,
    pub next_hop: String,
    pub interface: usize,
    pub cost: u8,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    pub router: u32,
    pub destination: Ipv4Addr,
    pub traces: Vec<RouteTrace>,
}

impl Report {
    /// Collect the state of all routers, running the probes first.
    pub fn collect(simulation: &mut Simulation, probes: &[Probe]) -> Self {
        let probes = probes
            .iter()
            .map(|probe| ProbeReport {
                router: probe.router,
                destination: probe.destination,
                traces: (0..probe.count)
                    .filter_map(|_| simulation.trace_route(probe.router, probe.destination))
                    .collect(),
            })
            .collect();

        let routers = simulation
            .nodes()
            .iter()
            .map(|node| {
                let engine = node.engine();
                let routes: Vec<RouteReport> = engine
                    .map(|engine| {
                        engine
                            .routing_table()
                            .iter()
                            .flat_map(|bucket| {
                                bucket.iter().map(move |re| RouteReport {
                                    tos: bucket.tos(),
                                    destination: re.destination().subnet(),
                                    next_hop: re.next_hop().to_string(),
                                    interface: re.interface(),
                                    metric: re.metric(),
                                    hops: re.vector().hop_count(),
                                    class: re.class(),
                                    reachable: re.is_reachable(),
                                    hold_down: re.hold_down(),
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                let forwarding = node
                    .host()
                    .forwarding()
                    .map(|fe| ForwardingReport {
                        destination: fe.destination,
                        next_hop: fe.next_hop.to_string(),
                        interface: fe.interface,
                        cost: fe.cost,
                    })
                    .collect();

                RouterReport {
                    id: node.id(),
                    autonomous_system: engine.map(|e| e.autonomous_system()),
                    routes,
                    forwarding,
                    statistics: engine.map(|e| e.statistics().clone()),
                }
            })
            .collect();

        Report {
            time: simulation.now().as_secs_f64(),
            routers,
            metrics: simulation.metrics().snapshot(),
            probes,
        }
    }

    /// Print the report as a set of tables on stdout.
    pub fn print_tables(&self) {
        println!("Simulation ended at {:.3}s", self.time);

        for router in &self.routers {
            let Some(autonomous_system) = router.autonomous_system else {
                println!("\nRouter {} (not running IGRP)", router.id);
                continue;
            };
            println!("\nRouter {} (AS {autonomous_system})", router.id);

            let mut table = Table::new();
            table.add_row(row![
                "TOS",
                "Destination",
                "Next hop",
                "Interface",
                "Metric",
                "Hops",
                "Class",
                "State",
            ]);
            for route in &router.routes {
                let state = match (route.reachable, route.hold_down) {
                    (_, true) => "holddown",
                    (true, false) => "up",
                    (false, false) => "unreachable",
                };
                table.add_row(row![
                    route.tos,
                    route.destination,
                    route.next_hop,
                    route.interface,
                    route.metric,
                    route.hops,
                    route.class,
                    state,
                ]);
            }
            table.printstd();

            println!("Forwarding table:");
            let mut table = Table::new();
            table.add_row(row!["Destination", "Next hop", "Interface", "Cost"]);
            for entry in &router.forwarding {
                table.add_row(row![
                    entry.destination,
                    entry.next_hop,
                    entry.interface,
                    entry.cost,
                ]);
            }
            table.printstd();

            if let Some(stats) = &router.statistics {
                println!("Statistics:");
                let mut table = Table::new();
                table.add_row(row!["Regular updates", stats.regular_updates]);
                table.add_row(row!["Triggered updates", stats.triggered_updates]);
                table.add_row(row!["Route timeouts", stats.route_timeouts]);
                for (interface, count) in stats.packets_sent.iter().enumerate() {
                    table.add_row(row![format!("Packets sent on {interface}"), count]);
                }
                table.printstd();
            }
        }

        println!("\nProtocol events:");
        let m = &self.metrics;
        let mut table = Table::new();
        table.add_row(row!["Updates processed", m.updates_processed]);
        table.add_row(row!["Routes processed", m.routes_processed]);
        table.add_row(row!["Requests processed", m.requests_processed]);
        table.add_row(row!["Packets dropped", m.packets_dropped]);
        table.add_row(row!["Updates sent", m.updates_sent]);
        table.add_row(row!["Triggered updates", m.triggered_updates]);
        table.add_row(row!["Route timeouts", m.route_timeouts]);
        table.add_row(row!["Routes flushed", m.routes_flushed]);
        table.add_row(row!["Holddowns started", m.hold_downs_started]);
        table.add_row(row!["Holddowns released", m.hold_downs_released]);
        table.add_row(row!["Packets forwarded", m.packets_forwarded]);
        table.printstd();

        for probe in &self.probes {
            println!("\nPath from router {} to {}:", probe.router, probe.destination);
            let mut table = Table::new();
            table.add_row(row!["Packet", "Router", "Interface", "Next hop", "Reached"]);
            for (packet, trace) in probe.traces.iter().enumerate() {
                for hop in &trace.hops {
                    table.add_row(row![
                        packet,
                        hop.router,
                        hop.interface,
                        hop.next_hop,
                        trace.reached
                    ]);
                }
                if trace.hops.is_empty() {
                    table.add_row(row![packet, probe.router, "-", "-", trace.reached]);
                }
            }
            table.printstd();
        }
    }
}
