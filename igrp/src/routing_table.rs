//! Route storage.
//!
//! The [`RoutingTable`] holds one [`Bucket`] per configured type of service. Every bucket keeps
//! its own [`MetricWeights`] and an unordered list of [`RouteEntry`]s. Lookups are always by
//! destination [`Network`], and a destination can have several entries: one per path.

use std::net::Ipv4Addr;

use tracing::trace;

use crate::{
    metric::{Metric, MetricWeights},
    network::Network,
    vector::MetricVector,
};

pub use hold_key::HoldKey;
pub use route_entry::{NextHop, RouteClass, RouteEntry};

mod hold_key;
mod route_entry;

/// Variance used instead of a configured variance of exactly 1, so the best path still admits
/// alternates with an equal metric.
const MINIMUM_EFFECTIVE_VARIANCE: f64 = 1.1;

/// Computes the variance actually applied for feasibility decisions.
pub fn effective_variance(configured: f64) -> f64 {
    if configured <= 1.0 {
        MINIMUM_EFFECTIVE_VARIANCE
    } else {
        configured
    }
}

/// Selects which next hop an entry must have to be considered a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextHopFilter {
    /// Any next hop matches.
    Any,
    /// Only entries using this neighbour match.
    Neighbour(Ipv4Addr),
}

impl NextHopFilter {
    fn matches(&self, next_hop: NextHop) -> bool {
        match self {
            NextHopFilter::Any => true,
            NextHopFilter::Neighbour(addr) => next_hop == NextHop::Via(*addr),
        }
    }
}

/// Result of [`Bucket::find_matching`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PathMatch {
    /// Index of the matching entry in the bucket, if any.
    pub index: Option<usize>,
    /// The destination has exactly one entry in the bucket.
    pub is_last_entry: bool,
    /// One of the entries for the destination is in holddown.
    pub in_hold_down: bool,
}

/// All routes for a single type of service.
#[derive(Debug, Clone)]
pub struct Bucket {
    tos: u8,
    weights: MetricWeights,
    entries: Vec<RouteEntry>,
}

impl Bucket {
    /// Create a new, empty `Bucket`.
    pub fn new(tos: u8, weights: MetricWeights) -> Self {
        Self {
            tos,
            weights,
            entries: Vec::new(),
        }
    }

    /// The type of service this `Bucket` is for.
    pub fn tos(&self) -> u8 {
        self.tos
    }

    /// The [`MetricWeights`] of this `Bucket`.
    pub fn weights(&self) -> MetricWeights {
        self.weights
    }

    /// Computes the composite [`Metric`] of a vector with the weights of this `Bucket`.
    pub fn metric(&self, vector: &MetricVector) -> Metric {
        self.weights.metric(vector)
    }

    /// Amount of entries in the `Bucket`.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks if the `Bucket` holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> std::slice::Iter<'_, RouteEntry> {
        self.entries.iter()
    }

    /// Iterate mutably over all entries.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, RouteEntry> {
        self.entries.iter_mut()
    }

    /// Get the entry at the given index.
    pub fn get(&self, index: usize) -> Option<&RouteEntry> {
        self.entries.get(index)
    }

    /// Get mutable access to the entry at the given index.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut RouteEntry> {
        self.entries.get_mut(index)
    }

    /// Amount of entries for a destination.
    pub fn count(&self, network: Network) -> usize {
        self.entries
            .iter()
            .filter(|re| re.destination() == network)
            .count()
    }

    /// Index of the reachable entry with the lowest metric for the destination. On equal metrics
    /// the entry found first wins.
    pub fn best_index(&self, network: Network) -> Option<usize> {
        let mut best: Option<(usize, Metric)> = None;
        for (index, re) in self.entries.iter().enumerate() {
            if re.destination() != network || !re.is_reachable() {
                continue;
            }
            match best {
                Some((_, metric)) if metric <= re.metric() => {}
                _ => best = Some((index, re.metric())),
            }
        }
        best.map(|(index, _)| index)
    }

    /// Returns the reachable entry with the lowest metric for the destination, if any.
    pub fn find_best(&self, network: Network) -> Option<&RouteEntry> {
        self.best_index(network).and_then(|index| self.entries.get(index))
    }

    /// Locates a specific path to `network` leaving through `interface`.
    ///
    /// If `fields` is set, the delay and inverse bandwidth of the entry must also equal those of
    /// the given vector. The returned [`PathMatch`] additionally describes the destination as a
    /// whole: whether this is its only entry and whether it is held down.
    pub fn find_matching(
        &self,
        network: Network,
        interface: usize,
        next_hop: NextHopFilter,
        fields: Option<&MetricVector>,
    ) -> PathMatch {
        let mut path = PathMatch::default();
        let mut count = 0;

        for (index, re) in self.entries.iter().enumerate() {
            if re.destination() != network {
                continue;
            }
            count += 1;
            path.in_hold_down |= re.hold_down();

            let fields_match = fields.map_or(true, |v| {
                v.delay() == re.vector().delay()
                    && v.inverse_bandwidth() == re.vector().inverse_bandwidth()
            });
            if re.interface() == interface && fields_match && next_hop.matches(re.next_hop()) {
                path.index = Some(index);
            }
        }

        path.is_last_entry = count == 1;
        path
    }

    /// Checks if any path to the destination leaves through the given interface.
    pub fn has_path_via(&self, network: Network, interface: usize) -> bool {
        self.entries
            .iter()
            .any(|re| re.destination() == network && re.interface() == interface)
    }

    /// Adds a new entry, returning its index.
    pub fn insert(&mut self, entry: RouteEntry) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    /// Removes the entry at the given index.
    ///
    /// # Panics
    ///
    /// Panics if the index is out of bounds.
    pub fn remove(&mut self, index: usize) -> RouteEntry {
        self.entries.remove(index)
    }

    /// Removes all learned paths to `network` whose metric is outside of `variance` times the new
    /// minimum metric. Directly connected and permanent entries are kept. Returns the amount of
    /// removed entries.
    pub fn prune_infeasible(&mut self, network: Network, new_minimum: Metric, variance: f64) -> usize {
        let limit = new_minimum * effective_variance(variance);
        let before = self.entries.len();

        self.entries.retain(|re| {
            let infeasible = re.destination() == network
                && !re.permanent()
                && re.vector().hop_count() > 0
                && re.metric() > limit;
            if infeasible {
                trace!(
                    "Removing path to {network} via {} with metric {} exceeding {limit}",
                    re.next_hop(),
                    re.metric()
                );
            }
            !infeasible
        });

        before - self.entries.len()
    }
}

/// The full routing table: one [`Bucket`] per type of service.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    buckets: Vec<Bucket>,
}

impl RoutingTable {
    /// Create a new `RoutingTable` from a set of buckets.
    pub fn new(buckets: Vec<Bucket>) -> Self {
        Self { buckets }
    }

    /// Amount of buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Checks if there are no buckets.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Get the bucket at the given index.
    pub fn bucket(&self, index: usize) -> Option<&Bucket> {
        self.buckets.get(index)
    }

    /// Get mutable access to the bucket at the given index.
    pub fn bucket_mut(&mut self, index: usize) -> Option<&mut Bucket> {
        self.buckets.get_mut(index)
    }

    /// Iterate over all buckets.
    pub fn iter(&self) -> std::slice::Iter<'_, Bucket> {
        self.buckets.iter()
    }

    /// Iterate mutably over all buckets.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Bucket> {
        self.buckets.iter_mut()
    }

    /// Find the path which should be in the forwarding table for a destination: the best
    /// reachable entry of the first bucket which has one.
    pub fn alternate_path(&self, network: Network) -> Option<&RouteEntry> {
        self.buckets.iter().find_map(|b| b.find_best(network))
    }
}

#[cfg(test)]
mod tests {
    use std::{net::Ipv4Addr, time::Duration};

    use super::{Bucket, NextHop, NextHopFilter, RouteClass, RouteEntry, RoutingTable};
    use crate::{
        metric::{Metric, MetricWeights},
        network::Network,
        vector::{MetricVector, U24},
    };

    fn network() -> Network {
        Network::from_address(Ipv4Addr::new(192, 168, 10, 0))
    }

    fn entry(metric: f64, hops: u8, via: u8, interface: usize) -> RouteEntry {
        let vector = MetricVector::new(
            network(),
            U24::new(metric as u32).unwrap(),
            U24::new(0).unwrap(),
            0,
            1,
            1,
            hops,
        );
        RouteEntry::new(
            vector,
            Metric::new(metric),
            None,
            1,
            RouteClass::System,
            NextHop::Via(Ipv4Addr::new(10, 0, 0, via)),
            interface,
            Duration::ZERO,
            false,
        )
    }

    #[test]
    fn best_skips_unreachable_and_keeps_first_on_tie() {
        let mut bucket = Bucket::new(0, MetricWeights::default());
        let mut unreachable = entry(10.0, 1, 1, 0);
        let vector = unreachable.vector().unreachable();
        unreachable.set_vector(vector, Metric::new(1.0));
        bucket.insert(unreachable);
        bucket.insert(entry(200.0, 1, 2, 1));
        bucket.insert(entry(200.0, 2, 3, 2));

        assert_eq!(bucket.best_index(network()), Some(1));
        assert_eq!(
            bucket.find_best(network()).map(|re| re.next_hop()),
            Some(NextHop::Via(Ipv4Addr::new(10, 0, 0, 2)))
        );
        assert!(bucket
            .find_best(Network::from_address(Ipv4Addr::new(1, 2, 3, 0)))
            .is_none());
    }

    #[test]
    fn matching_reports_last_entry_and_hold_down() {
        let mut bucket = Bucket::new(0, MetricWeights::default());
        let mut held = entry(100.0, 1, 1, 3);
        held.set_hold_down(true);
        bucket.insert(held);

        let path = bucket.find_matching(
            network(),
            3,
            NextHopFilter::Neighbour(Ipv4Addr::new(10, 0, 0, 1)),
            None,
        );
        assert_eq!(path.index, Some(0));
        assert!(path.is_last_entry);
        assert!(path.in_hold_down);

        // Wrong neighbour still reports the destination state.
        let path = bucket.find_matching(
            network(),
            3,
            NextHopFilter::Neighbour(Ipv4Addr::new(10, 0, 0, 9)),
            None,
        );
        assert_eq!(path.index, None);
        assert!(path.is_last_entry);
        assert!(path.in_hold_down);

        bucket.insert(entry(120.0, 1, 2, 4));
        let path = bucket.find_matching(network(), 4, NextHopFilter::Any, None);
        assert_eq!(path.index, Some(1));
        assert!(!path.is_last_entry);
    }

    #[test]
    fn matching_on_metric_fields() {
        let mut bucket = Bucket::new(0, MetricWeights::default());
        bucket.insert(entry(100.0, 1, 1, 0));
        let same = *entry(100.0, 1, 1, 0).vector();
        let other = *entry(150.0, 1, 1, 0).vector();

        assert_eq!(
            bucket
                .find_matching(network(), 0, NextHopFilter::Any, Some(&same))
                .index,
            Some(0)
        );
        assert_eq!(
            bucket
                .find_matching(network(), 0, NextHopFilter::Any, Some(&other))
                .index,
            None
        );
    }

    #[test]
    fn prune_removes_paths_outside_variance() {
        let mut bucket = Bucket::new(0, MetricWeights::default());
        bucket.insert(entry(100.0, 1, 1, 0));
        bucket.insert(entry(105.0, 1, 2, 1));
        bucket.insert(entry(180.0, 2, 3, 2));
        bucket.insert(entry(500.0, 0, 4, 3));
        let permanent = RouteEntry::new(
            *entry(900.0, 1, 5, 4).vector(),
            Metric::new(900.0),
            None,
            1,
            RouteClass::Exterior,
            NextHop::Via(Ipv4Addr::new(10, 0, 0, 5)),
            4,
            Duration::ZERO,
            true,
        );
        bucket.insert(permanent);

        // Variance 1 behaves as 1.1: limit is 110.
        assert_eq!(bucket.prune_infeasible(network(), Metric::new(100.0), 1.0), 1);
        assert_eq!(bucket.len(), 4);
        // Running it again with the same minimum removes nothing more.
        assert_eq!(bucket.prune_infeasible(network(), Metric::new(100.0), 1.0), 0);
        assert_eq!(bucket.len(), 4);

        assert_eq!(bucket.prune_infeasible(network(), Metric::new(50.0), 2.0), 1);
        assert_eq!(bucket.count(network()), 3);
    }

    #[test]
    fn alternate_path_searches_buckets_in_order() {
        let mut first = Bucket::new(0, MetricWeights::default());
        let mut second = Bucket::new(0, MetricWeights::new(1, 0, 0, 0, 0));
        second.insert(entry(10.0, 1, 7, 2));
        let mut unreachable = entry(5.0, 1, 8, 1);
        let vector = unreachable.vector().unreachable();
        unreachable.set_vector(vector, Metric::new(5.0));
        first.insert(unreachable);

        let table = RoutingTable::new(vec![first, second]);
        assert_eq!(
            table.alternate_path(network()).map(|re| re.interface()),
            Some(2)
        );
    }
}
