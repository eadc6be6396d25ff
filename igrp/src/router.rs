use std::{net::Ipv4Addr, time::Duration};

use ipnet::Ipv4Net;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, trace};

use crate::{
    config::{ConfigError, RouterConfig, Settings, DEFAULT_AUTONOMOUS_SYSTEM},
    host::{ForwardingEntry, Host, LinkLayer},
    metrics::{Metrics, NoMetrics},
    network::Network,
    packet::{Header, Opcode, Packet, MAX_ROUTES_PER_UPDATE},
    routing_table::{
        effective_variance, Bucket, HoldKey, NextHop, NextHopFilter, RouteClass, RouteEntry,
        RoutingTable,
    },
    timer::Timer,
    vector::{LinkMetrics, MetricVector, U24},
};

/// TTL of protocol packets. Updates never leave the attached subnet.
const UPDATE_TTL: u8 = 1;

/// Minimum delay before the first regular update after start.
const STARTUP_DELAY: Duration = Duration::from_secs(1);
/// Maximum random delay added to [`STARTUP_DELAY`].
const STARTUP_JITTER: Duration = Duration::from_secs(1);

/// Maximum random delay added to the broadcast interval.
const BROADCAST_JITTER: Duration = Duration::from_secs(2);

/// Fraction of the sleep time which is randomly subtracted from a triggered update delay.
const TRIGGER_JITTER: f64 = 0.2;

/// Counters kept by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    /// Regular updates which resulted in at least one packet.
    pub regular_updates: u64,
    /// Triggered updates which resulted in at least one packet.
    pub triggered_updates: u64,
    /// Learned routes which were not refreshed in time.
    pub route_timeouts: u64,
    /// Data packets forwarded, per interface.
    pub packets_sent: Vec<u64>,
}

/// Follow up work after merging a single route record.
#[derive(Debug, Default)]
struct MergeEffects {
    trigger_update: bool,
    hold_down: Option<HoldKey>,
    forwarding: Option<ForwardingChange>,
}

#[derive(Debug)]
enum ForwardingChange {
    /// Install the given route.
    Install(ForwardingEntry),
    /// Install the best remaining path for the network, or withdraw it if there is none.
    Reselect(Network),
}

/// The protocol engine of a single router.
///
/// All state is owned by the engine. Operations which need to send packets, look at the local
/// interfaces, touch the forwarding table or schedule timers borrow a [`Host`] for the duration of
/// the call.
pub struct Igrp<M = NoMetrics> {
    router_id: u32,
    autonomous_system: u16,
    table: RoutingTable,
    variance: f64,
    hold_down_enabled: bool,
    split_horizon: bool,
    settings: Settings,
    /// Time the last regular update went out.
    last_regular_update: Duration,
    triggered_update_pending: bool,
    edition: u8,
    stats: Statistics,
    stats_reported: bool,
    rng: SmallRng,
    metrics: M,
}

impl<M> Igrp<M>
where
    M: Metrics,
{
    /// Create a new engine from a parsed configuration block.
    ///
    /// Every configured network must be attached to an interface of the node. Its directly
    /// connected route is added to every bucket.
    pub fn new(
        config: RouterConfig,
        settings: Settings,
        link: &impl LinkLayer,
        seed: u64,
        metrics: M,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;

        let mut connected = Vec::with_capacity(config.networks.len());
        for net in &config.networks {
            let interface = link
                .interface_for_network(*net)
                .ok_or(ConfigError::UnresolvedNetwork(*net))?;
            let link_metrics = link.link_metrics(interface);
            debug!(
                "Router {} attached to {net} on interface {interface}, inverse bandwidth {} delay {}",
                config.router_id,
                link_metrics.inverse_bandwidth(),
                link_metrics.delay()
            );
            connected.push((
                MetricVector::directly_connected(Network::from(*net), link_metrics),
                interface,
            ));
        }

        let buckets = config
            .buckets
            .iter()
            .map(|bc| {
                let mut bucket = Bucket::new(bc.tos, bc.weights);
                for (vector, interface) in &connected {
                    let metric = bucket.metric(vector);
                    bucket.insert(RouteEntry::new(
                        *vector,
                        metric,
                        None,
                        config.autonomous_system,
                        RouteClass::System,
                        NextHop::Direct,
                        *interface,
                        Duration::ZERO,
                        false,
                    ));
                }
                bucket
            })
            .collect();

        Ok(Self {
            router_id: config.router_id,
            autonomous_system: config.autonomous_system,
            table: RoutingTable::new(buckets),
            variance: config.variance,
            hold_down_enabled: config.hold_down,
            split_horizon: config.split_horizon,
            settings,
            last_regular_update: Duration::ZERO,
            triggered_update_pending: false,
            edition: 0,
            stats: Statistics {
                packets_sent: vec![0; link.interface_count()],
                ..Statistics::default()
            },
            stats_reported: false,
            rng: SmallRng::seed_from_u64(seed),
            metrics,
        })
    }

    /// Id of the router running this engine.
    pub fn router_id(&self) -> u32 {
        self.router_id
    }

    /// The autonomous system this router is part of.
    pub fn autonomous_system(&self) -> u16 {
        self.autonomous_system
    }

    /// The [`RoutingTable`] of the engine.
    pub fn routing_table(&self) -> &RoutingTable {
        &self.table
    }

    /// The [`Settings`] the engine runs with.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Current [`Statistics`].
    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    /// Schedule the initial timers: the first regular update after a short random delay, and the
    /// periodic table scan right away.
    pub fn start(&mut self, host: &mut impl Host) {
        let delay = STARTUP_DELAY + self.jitter(STARTUP_JITTER);
        debug!("Router {} sends first update in {delay:?}", self.router_id);
        host.schedule(delay, Timer::Broadcast);
        host.schedule(Duration::ZERO, Timer::Periodic);
    }

    /// Handle a protocol packet received from `source` on `interface`.
    ///
    /// Packets which can't be decoded, or which fail the checksum, are dropped.
    pub fn handle_packet(
        &mut self,
        host: &mut impl Host,
        raw: &[u8],
        source: Ipv4Addr,
        interface: usize,
    ) {
        let mut buf = raw;
        let packet = match Packet::from_bytes(&mut buf) {
            Ok(packet) => packet,
            Err(err) => {
                trace!("Dropping packet from {source}: {err}");
                self.metrics.router_packet_dropped();
                return;
            }
        };

        if !packet.checksum_valid(raw) {
            trace!("Dropping packet from {source} with invalid checksum");
            self.metrics.router_packet_dropped();
            return;
        }

        match packet.header().opcode() {
            Opcode::Request => {
                debug!("Received route request from {source} on interface {interface}");
                self.metrics.router_process_request();
                self.send_updates(host);
            }
            Opcode::Update => self.process_update(host, &packet, source, interface, false),
        }
    }

    /// Merge the routes of an update received from `source` on `interface` into the routing
    /// table.
    ///
    /// Paths in holddown are left alone, unless `hook` is set: routes injected through
    /// redistribution always take effect.
    pub fn process_update(
        &mut self,
        host: &mut impl Host,
        packet: &Packet,
        source: Ipv4Addr,
        interface: usize,
        hook: bool,
    ) {
        self.merge_update(host, packet, NextHop::Via(source), interface, hook);
    }

    fn merge_update(
        &mut self,
        host: &mut impl Host,
        packet: &Packet,
        source: NextHop,
        interface: usize,
        hook: bool,
    ) {
        self.metrics.router_process_update(packet.routes().len());

        let now = host.now();
        let link = host.link_metrics(interface);
        let sender_as = packet.header().autonomous_system();
        let class = if !hook && sender_as == self.autonomous_system {
            RouteClass::System
        } else {
            RouteClass::Exterior
        };

        for tos_index in 0..self.table.len() {
            for vector in packet.routes() {
                let effects = self.merge_vector(
                    tos_index, vector, source, interface, link, sender_as, class, hook, now,
                );
                self.apply(host, effects);
            }
        }
    }

    /// Merge a single advertised vector into one bucket.
    #[allow(clippy::too_many_arguments)]
    fn merge_vector(
        &mut self,
        tos_index: usize,
        advertised: &MetricVector,
        source: NextHop,
        interface: usize,
        link: LinkMetrics,
        sender_as: u16,
        class: RouteClass,
        hook: bool,
        now: Duration,
    ) -> MergeEffects {
        let variance = self.variance;
        let hold_down_enabled = self.hold_down_enabled;
        let max_hops = self.settings.max_hops;
        let Some(bucket) = self.table.bucket_mut(tos_index) else {
            return MergeEffects::default();
        };

        let network = advertised.destination();
        let filter = match source {
            NextHop::Via(addr) => NextHopFilter::Neighbour(addr),
            _ => NextHopFilter::Any,
        };
        let path = bucket.find_matching(network, interface, filter, None);

        if path.in_hold_down && !hook {
            debug!("Ignoring update for {network} from {source}, route is in holddown");
            return MergeEffects::default();
        }

        let mut derived = advertised.derive_via(link);
        if derived.hop_count() > max_hops {
            derived = derived.unreachable();
        }
        let unreachable = derived.is_unreachable();
        let new_metric = bucket.metric(&derived);
        let remote_metric = bucket.metric(advertised);

        let Some(best_index) = bucket.best_index(network) else {
            if unreachable {
                trace!("Discarding unreachable route to unknown network {network}");
                return MergeEffects::default();
            }

            let index = match path.index {
                Some(index) => {
                    let Some(entry) = bucket.get_mut(index) else {
                        return MergeEffects::default();
                    };
                    entry.refresh(derived, new_metric, Some(remote_metric), now);
                    if hook {
                        entry.set_hold_down(false);
                    }
                    index
                }
                None => bucket.insert(RouteEntry::new(
                    derived,
                    new_metric,
                    Some(remote_metric),
                    sender_as,
                    class,
                    source,
                    interface,
                    now,
                    hook,
                )),
            };

            info!("Acquired route to {network} via {source} with metric {new_metric}");
            return MergeEffects {
                trigger_update: true,
                hold_down: None,
                forwarding: bucket
                    .get(index)
                    .filter(|re| !re.permanent())
                    .map(forwarding_entry)
                    .map(ForwardingChange::Install),
            };
        };

        let (best_metric, best_hops) = match bucket.get(best_index) {
            Some(best) => (best.metric(), best.vector().hop_count()),
            None => return MergeEffects::default(),
        };

        if unreachable || new_metric > best_metric {
            let hop_count_exceeded =
                path.index.is_some() && best_hops < advertised.hop_count();
            let threshold = best_metric * effective_variance(variance);

            if unreachable
                || (hold_down_enabled && new_metric > threshold)
                || (!hold_down_enabled && hop_count_exceeded)
            {
                let Some(index) = path.index else {
                    debug!("Ignoring infeasible path to {network} via {source}");
                    return MergeEffects::default();
                };

                let mut effects = MergeEffects {
                    trigger_update: true,
                    hold_down: None,
                    forwarding: Some(ForwardingChange::Reselect(network)),
                };

                if (path.is_last_entry && hold_down_enabled) || hook {
                    let Some(current) = bucket.get(index) else {
                        return MergeEffects::default();
                    };
                    let poisoned = current.vector().unreachable();
                    let metric = bucket.metric(&poisoned);
                    if let Some(entry) = bucket.get_mut(index) {
                        entry.set_vector(poisoned, metric);
                        entry.set_hold_down(true);
                        effects.hold_down =
                            Some(HoldKey::new(tos_index, network, entry.interface()));
                    }
                    info!("Lost route to {network} via {source}, entering holddown");
                } else {
                    bucket.remove(index);
                    info!("Lost route to {network} via {source}");
                }

                return effects;
            }

            match path.index {
                Some(index) => {
                    if let Some(entry) = bucket.get_mut(index) {
                        entry.refresh(derived, new_metric, Some(remote_metric), now);
                    }
                    debug!("Path to {network} via {source} got worse, metric {new_metric}");
                    // The best path itself got worse, another one might be better now.
                    if index == best_index {
                        return MergeEffects {
                            forwarding: Some(ForwardingChange::Reselect(network)),
                            ..MergeEffects::default()
                        };
                    }
                }
                None => {
                    bucket.insert(RouteEntry::new(
                        derived,
                        new_metric,
                        Some(remote_metric),
                        sender_as,
                        class,
                        source,
                        interface,
                        now,
                        hook,
                    ));
                    debug!("Added feasible path to {network} via {source} with metric {new_metric}");
                }
            }
            return MergeEffects::default();
        }

        let improved = new_metric < best_metric;
        let index = match path.index {
            Some(index) => {
                if let Some(entry) = bucket.get_mut(index) {
                    entry.refresh(derived, new_metric, Some(remote_metric), now);
                }
                index
            }
            None => bucket.insert(RouteEntry::new(
                derived,
                new_metric,
                Some(remote_metric),
                sender_as,
                class,
                source,
                interface,
                now,
                hook,
            )),
        };

        let mut effects = MergeEffects::default();
        if improved {
            info!("Selected route to {network} via {source} with metric {new_metric}");
            effects.forwarding = bucket
                .get(index)
                .filter(|re| !re.permanent())
                .map(forwarding_entry)
                .map(ForwardingChange::Install);
        }

        let pruned = bucket.prune_infeasible(network, new_metric, variance);
        if pruned > 0 {
            debug!("Removed {pruned} infeasible paths to {network}");
        }

        effects
    }

    fn apply(&mut self, host: &mut impl Host, effects: MergeEffects) {
        if let Some(key) = effects.hold_down {
            host.schedule(self.settings.hold_time, Timer::HoldDown(key));
            self.metrics.router_hold_down_started();
        }
        match effects.forwarding {
            Some(ForwardingChange::Install(entry)) => host.install(entry),
            Some(ForwardingChange::Reselect(network)) => self.reselect_forwarding(host, network),
            None => {}
        }
        if effects.trigger_update {
            self.schedule_triggered_update(host);
        }
    }

    /// Point the forwarding table at the best remaining path to `network` over all buckets, or
    /// withdraw the network if no reachable path is left.
    fn reselect_forwarding(&self, host: &mut impl Host, network: Network) {
        match self.table.alternate_path(network) {
            // The node already knows how to reach attached networks.
            Some(entry) if entry.is_directly_connected() => {}
            Some(entry) => {
                debug!("Using alternate path to {network} via {}", entry.next_hop());
                host.install(forwarding_entry(entry));
            }
            None => {
                debug!("No path left to {network}, withdrawing");
                host.withdraw(network.subnet());
            }
        }
    }

    /// Schedule a triggered update, unless one is already pending or the next regular update
    /// goes out before it would.
    pub fn schedule_triggered_update(&mut self, host: &mut impl Host) {
        let sleep = self.settings.sleep_time;
        let delay = sleep.saturating_sub(self.jitter(sleep.mul_f64(TRIGGER_JITTER)));
        let next_regular_update = self.last_regular_update + self.settings.broadcast_time;

        if !self.triggered_update_pending && next_regular_update > host.now() + delay {
            debug!("Scheduling triggered update in {delay:?}");
            self.triggered_update_pending = true;
            host.schedule(delay, Timer::TriggeredUpdate);
        }
    }

    /// Build the update packets for every interface which is up and runs the protocol.
    ///
    /// Every bucket contributes its routes. A network is advertised at most once per interface,
    /// with the lowest metric vector of all its paths. With split horizon, networks are not
    /// advertised on the interface their best path uses. Each packet carries at most
    /// [`MAX_ROUTES_PER_UPDATE`] routes and consumes one edition.
    pub fn build_updates(&mut self, link: &impl LinkLayer) -> Vec<(usize, Packet)> {
        let mut packets = Vec::new();

        for interface in 0..link.interface_count() {
            if !link.is_enabled(interface) || !link.runs_igrp(interface) {
                continue;
            }

            let mut routes: Vec<(MetricVector, RouteClass)> = Vec::new();
            for bucket in self.table.iter() {
                for entry in bucket.iter() {
                    let network = entry.destination();
                    if self.split_horizon && suppressed_by_split_horizon(bucket, network, interface)
                    {
                        continue;
                    }

                    match routes.iter_mut().find(|(v, _)| v.destination() == network) {
                        Some((present, class)) => {
                            if bucket.metric(present) > entry.metric() {
                                *present = *entry.vector();
                                *class = entry.class();
                            }
                        }
                        None => routes.push((*entry.vector(), entry.class())),
                    }
                }
            }

            for chunk in routes.chunks(MAX_ROUTES_PER_UPDATE) {
                let mut batch = UpdateBatch::default();
                for (vector, class) in chunk {
                    batch.push(*vector, *class);
                }
                packets.push((
                    interface,
                    batch.into_packet(&mut self.edition, self.autonomous_system),
                ));
            }
        }

        packets
    }

    /// Build and transmit updates on all eligible interfaces. Returns if any update was built.
    pub fn send_updates(&mut self, host: &mut impl Host) -> bool {
        let packets = self.build_updates(&*host);
        let built = !packets.is_empty();

        for (interface, packet) in packets {
            // Interfaces without an address can't send.
            let (Some(_), Some(broadcast)) =
                (host.address(interface), host.broadcast_address(interface))
            else {
                trace!("Interface {interface} has no address, not sending update");
                continue;
            };
            trace!(
                "Sending update with {} routes on interface {interface}",
                packet.routes().len()
            );
            host.send(interface, broadcast, UPDATE_TTL, packet.to_bytes());
            self.metrics.router_update_sent(interface);
        }

        built
    }

    /// Handle an expired [`Timer`].
    pub fn handle_timer(&mut self, host: &mut impl Host, timer: Timer) {
        match timer {
            Timer::Broadcast => {
                let sent = self.send_updates(host);
                let delay = self.settings.broadcast_time + self.jitter(BROADCAST_JITTER);
                host.schedule(delay, Timer::Broadcast);
                if sent {
                    self.stats.regular_updates += 1;
                    self.last_regular_update = host.now();
                }
            }
            Timer::Periodic => {
                self.process_invalid_timeouts(host);
                self.process_flush_timeouts(&*host);
                host.schedule(self.settings.periodic_time, Timer::Periodic);
            }
            Timer::HoldDown(key) => self.release_hold_down(key),
            Timer::TriggeredUpdate => {
                if self.send_updates(host) {
                    self.stats.triggered_updates += 1;
                    self.metrics.router_triggered_update();
                }
                self.triggered_update_pending = false;
            }
        }
    }

    fn release_hold_down(&mut self, key: HoldKey) {
        let Some(bucket) = self.table.bucket_mut(key.tos_index()) else {
            return;
        };
        let path = bucket.find_matching(key.network(), key.interface(), NextHopFilter::Any, None);
        match path.index.and_then(|index| bucket.get_mut(index)) {
            Some(entry) => {
                entry.set_hold_down(false);
                info!("Holddown expired for {key}");
                self.metrics.router_hold_down_released();
            }
            None => trace!("Holddown expired for {key}, route is already gone"),
        }
    }

    /// Declare learned routes which were not refreshed within the invalid time unreachable, and
    /// refresh directly connected routes from the current interface state.
    fn process_invalid_timeouts(&mut self, host: &mut impl Host) {
        let now = host.now();
        let invalid_time = self.settings.invalid_time;

        for tos_index in 0..self.table.len() {
            let expired: Vec<(Network, usize, NextHop)> = match self.table.bucket(tos_index) {
                Some(bucket) => bucket
                    .iter()
                    .filter(|re| {
                        !re.permanent()
                            && !re.is_directly_connected()
                            && re.is_reachable()
                            && now.saturating_sub(re.last_update()) > invalid_time
                    })
                    .map(|re| (re.destination(), re.interface(), re.next_hop()))
                    .collect(),
                None => continue,
            };

            for (network, interface, next_hop) in expired {
                self.expire_route(host, tos_index, network, interface, next_hop);
            }

            self.refresh_connected(host, tos_index);
        }
    }

    fn expire_route(
        &mut self,
        host: &mut impl Host,
        tos_index: usize,
        network: Network,
        interface: usize,
        next_hop: NextHop,
    ) {
        let Some(bucket) = self.table.bucket_mut(tos_index) else {
            return;
        };
        let Some(index) = bucket.iter().position(|re| {
            re.destination() == network && re.interface() == interface && re.next_hop() == next_hop
        }) else {
            return;
        };

        if bucket.count(network) == 1 && self.hold_down_enabled {
            let poisoned = bucket.get(index).map(|re| re.vector().unreachable());
            if let Some(poisoned) = poisoned {
                let metric = bucket.metric(&poisoned);
                if let Some(entry) = bucket.get_mut(index) {
                    entry.set_vector(poisoned, metric);
                    entry.set_hold_down(true);
                }
            }
            info!("Route to {network} via {next_hop} timed out, entering holddown");
            host.schedule(
                self.settings.hold_time,
                Timer::HoldDown(HoldKey::new(tos_index, network, interface)),
            );
            self.metrics.router_hold_down_started();
        } else {
            bucket.remove(index);
            info!("Route to {network} via {next_hop} timed out, removed");
        }

        self.stats.route_timeouts += 1;
        self.metrics.router_route_timeout();
        self.reselect_forwarding(host, network);
        self.schedule_triggered_update(host);
    }

    /// Re-derive the directly connected routes of a bucket from the interface state.
    fn refresh_connected(&mut self, host: &mut impl Host, tos_index: usize) {
        let Some(bucket) = self.table.bucket_mut(tos_index) else {
            return;
        };
        let weights = bucket.weights();
        let mut changed = false;

        for entry in bucket
            .iter_mut()
            .filter(|re| !re.permanent() && re.is_directly_connected())
        {
            let interface = entry.interface();
            let (vector, next_hop) = if host.is_enabled(interface) {
                let delay = host.link_metrics(interface).delay();
                (entry.vector().with_delay(delay), NextHop::Direct)
            } else {
                (entry.vector().unreachable(), NextHop::Unreachable)
            };
            entry.set_vector(vector, weights.metric(&vector));

            if entry.next_hop() != next_hop {
                let state = if next_hop == NextHop::Direct { "up" } else { "down" };
                info!(
                    "Interface {interface} for {} is {state}",
                    entry.destination()
                );
                entry.set_next_hop(next_hop);
                changed = true;
            }
        }

        if changed {
            self.schedule_triggered_update(host);
        }
    }

    /// Remove unreachable learned routes which were not refreshed within the flush time.
    fn process_flush_timeouts(&mut self, host: &impl Host) {
        let now = host.now();
        let flush_time = self.settings.flush_time;

        for bucket in self.table.iter_mut() {
            loop {
                let Some(index) = bucket.iter().position(|re| {
                    !re.is_directly_connected()
                        && !re.is_reachable()
                        && now.saturating_sub(re.last_update()) >= flush_time
                }) else {
                    break;
                };
                let entry = bucket.remove(index);
                debug!(
                    "Flushed route to {} via {}",
                    entry.destination(),
                    entry.next_hop()
                );
                self.metrics.router_route_flushed();
            }
        }
    }

    /// Select the entry used to forward a packet to `destination`, and account the forwarded
    /// packet on it.
    ///
    /// Only the first bucket is used. A directly reachable candidate wins outright. Otherwise the
    /// candidate with the lowest product of metric and forwarded packets is taken, which spreads
    /// traffic over the feasible paths in inverse proportion to their metric.
    pub fn select_next_hop(&mut self, destination: Ipv4Addr) -> Option<&RouteEntry> {
        let bucket = self.table.bucket_mut(0)?;

        let mut selected: Option<(usize, f64)> = None;
        for (index, re) in bucket.iter().enumerate() {
            if !re.is_reachable() || !re.destination().contains(destination) {
                continue;
            }
            if re.next_hop() == NextHop::Direct || re.next_hop() == NextHop::Via(destination) {
                selected = Some((index, 0.0));
                break;
            }
            let load = re.metric().value() * re.forward_count() as f64;
            if selected.map_or(true, |(_, lowest)| load < lowest) {
                selected = Some((index, load));
            }
        }

        let (index, _) = selected?;
        let entry = bucket.get_mut(index)?;
        entry.record_forward();
        Some(&*entry)
    }

    /// Route a data packet for `destination`, returning the address to send it to and the
    /// outgoing interface.
    ///
    /// Returns [`None`] for packets addressed to the node itself, and when there is no reachable
    /// path.
    pub fn route(
        &mut self,
        link: &impl LinkLayer,
        destination: Ipv4Addr,
        _previous_hop: Ipv4Addr,
    ) -> Option<(Ipv4Addr, usize)> {
        let local = (0..link.interface_count()).any(|interface| {
            link.address(interface) == Some(destination)
                || link.broadcast_address(interface) == Some(destination)
        });
        if local {
            return None;
        }

        let (next_hop, interface) = {
            let entry = self.select_next_hop(destination)?;
            let next_hop = match entry.next_hop() {
                NextHop::Via(addr) => addr,
                _ => destination,
            };
            (next_hop, entry.interface())
        };

        if let Some(count) = self.stats.packets_sent.get_mut(interface) {
            *count += 1;
        }
        self.metrics.router_packet_forwarded(interface);

        Some((next_hop, interface))
    }

    /// Inject a route learned from another routing source.
    ///
    /// The route is processed like an update from `next_hop`, but bypasses holddown and is kept
    /// as a permanent exterior route. Without a vector, all metric fields are zero. A
    /// [`NextHop::Unreachable`] next hop withdraws the route.
    pub fn redistribute(
        &mut self,
        host: &mut impl Host,
        destination: Ipv4Net,
        next_hop: NextHop,
        interface: usize,
        vector: Option<MetricVector>,
    ) {
        let network = Network::from(destination);
        let vector = match vector {
            Some(v) => MetricVector::new(
                network,
                v.delay(),
                v.inverse_bandwidth(),
                v.mtu(),
                v.reliability(),
                v.load(),
                v.hop_count(),
            ),
            None => MetricVector::new(network, U24::default(), U24::default(), 0, 0, 0, 0),
        };
        let vector = if next_hop == NextHop::Unreachable {
            vector.unreachable()
        } else {
            vector
        };

        debug!("Redistributing {network} via {next_hop} on interface {interface}");
        let packet = Packet::new(
            Header::new(Opcode::Update, 0, DEFAULT_AUTONOMOUS_SYSTEM, 0, 0, 0),
            vec![vector],
        );
        self.merge_update(host, &packet, next_hop, interface, true);
    }

    /// Report the statistics, if collection is enabled. Only the first call reports.
    pub fn finalize(&mut self) {
        if !self.settings.collect_stats || self.stats_reported {
            return;
        }

        info!(
            router = self.router_id,
            "Number of regular updates: {}", self.stats.regular_updates
        );
        info!(
            router = self.router_id,
            "Number of triggered updates: {}", self.stats.triggered_updates
        );
        info!(
            router = self.router_id,
            "Number of route timeouts: {}", self.stats.route_timeouts
        );
        for (interface, count) in self.stats.packets_sent.iter().enumerate() {
            info!(
                router = self.router_id,
                "Number of packets sent through interface {interface}: {count}"
            );
        }

        self.stats_reported = true;
    }

    fn jitter(&mut self, max: Duration) -> Duration {
        let max = max.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.rng.random_range(0..max))
    }
}

/// Routes collected for one update packet.
#[derive(Debug, Default)]
struct UpdateBatch {
    routes: Vec<MetricVector>,
    interior: u16,
    system: u16,
    exterior: u16,
}

impl UpdateBatch {
    fn push(&mut self, vector: MetricVector, class: RouteClass) {
        match class {
            RouteClass::Interior => self.interior += 1,
            RouteClass::System => self.system += 1,
            RouteClass::Exterior => self.exterior += 1,
        }
        self.routes.push(vector);
    }

    /// Turn the batch into an update packet, consuming one edition.
    fn into_packet(self, edition: &mut u8, autonomous_system: u16) -> Packet {
        let header = Header::new(
            Opcode::Update,
            *edition,
            autonomous_system,
            self.interior,
            self.system,
            self.exterior,
        );
        *edition = edition.wrapping_add(1);
        Packet::new(header, self.routes)
    }
}

/// A network is not advertised on the interface its best path leaves through. If it has no
/// reachable path, it is not advertised on any interface one of its paths uses.
fn suppressed_by_split_horizon(bucket: &Bucket, network: Network, interface: usize) -> bool {
    match bucket.find_best(network) {
        Some(best) => best.interface() == interface,
        None => bucket.has_path_via(network, interface),
    }
}

fn forwarding_entry(entry: &RouteEntry) -> ForwardingEntry {
    ForwardingEntry {
        destination: entry.destination().subnet(),
        next_hop: entry.next_hop(),
        interface: entry.interface(),
        cost: entry.vector().hop_count(),
    }
}
