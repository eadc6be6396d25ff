//! This module is used for collection of runtime metrics of an IGRP engine. The main item of
//! interest is the [`Metrics`] trait. Users can provide their own implementation of this, or use
//! [`NoMetrics`] to disable gathering metrics.

/// The collection of all metrics exported by an [`Igrp`](crate::router::Igrp) engine. All methods
/// have a default implementation, so if the user is not interested in any metrics, a NOOP handler
/// can be implemented as follows:
///
/// ```rust
/// use igrp::metrics::Metrics;
///
/// #[derive(Clone)]
/// struct Quiet;
/// impl Metrics for Quiet {}
/// ```
pub trait Metrics {
    /// The engine processed an update packet, either received from a neighbour or synthesized
    /// for a redistributed route. `routes` is the amount of route records it carried.
    #[inline]
    fn router_process_update(&self, _routes: usize) {}

    /// The engine received a request packet.
    #[inline]
    fn router_process_request(&self) {}

    /// The engine dropped a received packet which could not be decoded.
    #[inline]
    fn router_packet_dropped(&self) {}

    /// The engine sent an update packet out of an interface.
    #[inline]
    fn router_update_sent(&self, _interface: usize) {}

    /// A triggered update was sent.
    #[inline]
    fn router_triggered_update(&self) {}

    /// A learned route was not refreshed in time and was declared unreachable.
    #[inline]
    fn router_route_timeout(&self) {}

    /// An unreachable route was removed from the routing table after the flush time.
    #[inline]
    fn router_route_flushed(&self) {}

    /// A route entered holddown.
    #[inline]
    fn router_hold_down_started(&self) {}

    /// The hold timer of a route expired.
    #[inline]
    fn router_hold_down_released(&self) {}

    /// A data packet was forwarded out of the given interface.
    #[inline]
    fn router_packet_forwarded(&self, _interface: usize) {}
}

/// A [`Metrics`] implementation which does not record anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMetrics;

impl Metrics for NoMetrics {}
