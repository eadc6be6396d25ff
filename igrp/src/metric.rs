//! Composite metric computation.
//!
//! A [`MetricVector`] carries raw link characteristics. The router turns these into a single
//! scalar cost using the [`MetricWeights`] of the routing table bucket the route lives in.

use core::fmt;
use std::ops::Mul;

use serde::Serialize;

use crate::vector::MetricVector;

/// A `Metric` is the composite cost of a route. A lower `Metric` means a route is more favorable.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize)]
pub struct Metric(f64);

impl Metric {
    /// Create a new `Metric` with the given value.
    pub const fn new(value: f64) -> Self {
        Metric(value)
    }

    /// Returns the raw value of this `Metric`.
    pub const fn value(&self) -> f64 {
        self.0
    }
}

impl Mul<f64> for Metric {
    type Output = Metric;

    fn mul(self, rhs: f64) -> Self::Output {
        Metric(self.0 * rhs)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.0)
    }
}

impl From<Metric> for f64 {
    fn from(value: Metric) -> Self {
        value.0
    }
}

/// The five weights which parametrize the composite metric of a type of service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricWeights {
    /// Weight of the inverse bandwidth.
    pub k1: u32,
    /// Weight of the load adjusted inverse bandwidth.
    pub k2: u32,
    /// Weight of the delay.
    pub k3: u32,
    /// Offset added to the reliability.
    pub k4: u32,
    /// Reliability weight. A value of 0 disables the reliability factor.
    pub k5: u32,
}

impl MetricWeights {
    /// Create a new set of `MetricWeights`.
    pub const fn new(k1: u32, k2: u32, k3: u32, k4: u32, k5: u32) -> Self {
        Self { k1, k2, k3, k4, k5 }
    }

    /// Computes the composite metric of a vector.
    ///
    /// The unreachable sentinel is not interpreted here, callers need to check for it before
    /// relying on the result.
    ///
    /// # Examples
    ///
    /// ```
    /// use igrp::metric::MetricWeights;
    /// use igrp::network::Network;
    /// use igrp::vector::{MetricVector, U24};
    /// use std::net::Ipv4Addr;
    ///
    /// let vector = MetricVector::new(
    ///     Network::from_address(Ipv4Addr::new(10, 0, 0, 0)),
    ///     U24::new(1000).unwrap(),
    ///     U24::new(2500).unwrap(),
    ///     0,
    ///     1,
    ///     0,
    ///     0,
    /// );
    /// assert_eq!(MetricWeights::default().metric(&vector).value(), 3500.0);
    /// ```
    pub fn metric(&self, vector: &MetricVector) -> Metric {
        let inverse_bandwidth = vector.inverse_bandwidth().get() as f64;
        let delay = vector.delay().get() as f64;
        // load is a u8, so this is never zero.
        let load_divisor = 256.0 - vector.load() as f64;

        Metric(
            (self.k1 as f64 * inverse_bandwidth
                + self.k2 as f64 * inverse_bandwidth / load_divisor
                + self.k3 as f64 * delay)
                * self.reliability_factor(vector.reliability()),
        )
    }

    fn reliability_factor(&self, reliability: u8) -> f64 {
        if self.k5 == 0 {
            return 1.0;
        }
        let divisor = reliability as u64 + self.k4 as u64;
        self.k5 as f64 / divisor.max(1) as f64
    }
}

impl Default for MetricWeights {
    fn default() -> Self {
        MetricWeights::new(1, 0, 1, 0, 0)
    }
}

impl fmt::Display for MetricWeights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "k1={} k2={} k3={} k4={} k5={}",
            self.k1, self.k2, self.k3, self.k4, self.k5
        )
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::{Metric, MetricWeights};
    use crate::{
        network::Network,
        vector::{MetricVector, U24},
    };

    fn vector(delay: u32, inverse_bandwidth: u32, reliability: u8, load: u8) -> MetricVector {
        MetricVector::new(
            Network::from_address(Ipv4Addr::new(10, 0, 0, 0)),
            U24::new(delay).unwrap(),
            U24::new(inverse_bandwidth).unwrap(),
            0,
            reliability,
            load,
            0,
        )
    }

    #[test]
    fn default_weights_add_bandwidth_and_delay() {
        let weights = MetricWeights::default();
        assert_eq!(weights.metric(&vector(1000, 2500, 1, 0)), Metric::new(3500.0));
    }

    #[test]
    fn load_term() {
        let weights = MetricWeights::new(0, 1, 0, 0, 0);
        assert_eq!(weights.metric(&vector(0, 2560, 1, 0)).value(), 10.0);
        assert_eq!(weights.metric(&vector(0, 2560, 1, 255)).value(), 2560.0);
    }

    #[test]
    fn reliability_factor() {
        let weights = MetricWeights::new(1, 0, 1, 2, 8);
        // 8 / (2 + 2) = 2
        assert_eq!(weights.metric(&vector(10, 20, 2, 0)).value(), 60.0);

        // A zero divisor is treated as 1.
        let weights = MetricWeights::new(1, 0, 0, 0, 3);
        assert_eq!(weights.metric(&vector(0, 20, 0, 0)).value(), 60.0);
    }

    #[test]
    fn monotonic_in_delay_and_bandwidth() {
        let weight_sets = [
            MetricWeights::default(),
            MetricWeights::new(1, 1, 1, 0, 0),
            MetricWeights::new(3, 2, 7, 1, 4),
            MetricWeights::new(0, 0, 1, 0, 0),
        ];
        let steps = [0u32, 1, 10, 1000, 50_000, 0xFF_FFFE];

        for weights in weight_sets {
            for load in [0u8, 128, 255] {
                for pair in steps.windows(2) {
                    let (lo, hi) = (pair[0], pair[1]);
                    assert!(
                        weights.metric(&vector(lo, 500, 1, load))
                            <= weights.metric(&vector(hi, 500, 1, load))
                    );
                    assert!(
                        weights.metric(&vector(500, lo, 1, load))
                            <= weights.metric(&vector(500, hi, 1, load))
                    );
                }
            }
        }
    }
}
