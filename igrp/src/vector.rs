//! Per destination link characteristics as they travel in update messages.
//!
//! All numeric fields of a route record on the wire are either 8, 16 or 24 bits wide. The 24 bit
//! fields are modeled by [`U24`], which also knows about the "destination unreachable" sentinel
//! carried in the delay field.

use core::fmt;
use std::time::Duration;

use bytes::{Buf, BufMut};
use tracing::trace;

use crate::network::Network;

/// Largest value which fits in a 24 bit field.
const U24_MAX: u32 = 0x00FF_FFFF;

/// Size of a single encoded [`MetricVector`] on the wire.
pub const RECORD_WIRE_SIZE: usize = 14;

/// Scaling constant for inverse bandwidth, expressed against a bandwidth in kbps.
const INVERSE_BANDWIDTH_SCALE: u64 = 10_000_000;

/// An unsigned integer restricted to 24 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct U24(u32);

/// Error returned when trying to fit a value larger than 24 bits in a [`U24`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("value {0:#x} does not fit in 24 bits")]
pub struct OutOfRange(pub u32);

impl U24 {
    /// The largest value a `U24` can hold. In a delay field this marks an unreachable
    /// destination.
    pub const MAX: U24 = U24(U24_MAX);

    /// The value used in the delay field of a [`MetricVector`] to indicate the destination can't
    /// be reached.
    pub const UNREACHABLE: U24 = U24::MAX;

    /// Create a new `U24`, returning [`None`] if the value does not fit in 24 bits.
    pub const fn new(value: u32) -> Option<Self> {
        if value > U24_MAX {
            None
        } else {
            Some(U24(value))
        }
    }

    /// Create a new `U24`, clamping values which don't fit to [`U24::MAX`].
    pub const fn saturating(value: u64) -> Self {
        if value > U24_MAX as u64 {
            U24::MAX
        } else {
            U24(value as u32)
        }
    }

    /// Returns the value as a plain `u32`.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Checks if this is the unreachable sentinel.
    pub const fn is_unreachable(self) -> bool {
        self.0 == U24_MAX
    }

    /// Adds two values, saturating one below the sentinel so a sum of reachable values never
    /// turns into the unreachable marker by accident.
    pub const fn saturating_add_reachable(self, rhs: U24) -> U24 {
        let sum = self.0 as u64 + rhs.0 as u64;
        if sum >= U24_MAX as u64 {
            U24(U24_MAX - 1)
        } else {
            U24(sum as u32)
        }
    }

    fn read(src: &mut impl Buf) -> Self {
        let mut raw = [0; 4];
        src.copy_to_slice(&mut raw[1..]);
        U24(u32::from_be_bytes(raw))
    }

    fn write(self, dst: &mut impl BufMut) {
        dst.put_slice(&self.0.to_be_bytes()[1..]);
    }
}

impl TryFrom<u32> for U24 {
    type Error = OutOfRange;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        U24::new(value).ok_or(OutOfRange(value))
    }
}

impl From<U24> for u32 {
    fn from(value: U24) -> Self {
        value.0
    }
}

impl fmt::Display for U24 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Delay and inverse bandwidth of a local interface, in the units used by [`MetricVector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkMetrics {
    delay: U24,
    inverse_bandwidth: U24,
}

impl LinkMetrics {
    /// Create `LinkMetrics` from already scaled values.
    pub const fn new(delay: U24, inverse_bandwidth: U24) -> Self {
        Self {
            delay,
            inverse_bandwidth,
        }
    }

    /// Derive `LinkMetrics` from the raw bandwidth (in bits per second) and propagation delay of
    /// an interface.
    ///
    /// Delay is expressed in units of 10 microseconds, inverse bandwidth as
    /// `10_000_000 / bandwidth_kbps`.
    ///
    /// # Examples
    ///
    /// ```
    /// use igrp::vector::LinkMetrics;
    /// use std::time::Duration;
    ///
    /// let link = LinkMetrics::from_link(10_000_000, Duration::from_millis(1));
    /// assert_eq!(link.inverse_bandwidth().get(), 1000);
    /// assert_eq!(link.delay().get(), 100);
    /// ```
    pub fn from_link(bandwidth_bps: u64, propagation_delay: Duration) -> Self {
        let kbps = bandwidth_bps / 1000;
        let inverse_bandwidth = if kbps == 0 {
            U24::MAX
        } else {
            U24::saturating(INVERSE_BANDWIDTH_SCALE / kbps)
        };
        let tens_of_micros = propagation_delay.as_nanos() / 10_000;
        // Never let a configured link delay masquerade as the unreachable marker.
        let delay = U24::saturating(tens_of_micros.min((U24_MAX - 1) as u128) as u64);
        Self {
            delay,
            inverse_bandwidth,
        }
    }

    /// Delay of the link in tens of microseconds.
    pub fn delay(&self) -> U24 {
        self.delay
    }

    /// Inverse bandwidth of the link.
    pub fn inverse_bandwidth(&self) -> U24 {
        self.inverse_bandwidth
    }
}

/// Metric information for a single destination, exactly as it is advertised in an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricVector {
    /// The network this vector describes.
    destination: Network,
    /// Total delay to the destination, in tens of microseconds.
    delay: U24,
    /// Inverse of the bottleneck bandwidth on the path.
    inverse_bandwidth: U24,
    /// Path MTU. Carried on the wire but otherwise unused.
    mtu: u16,
    reliability: u8,
    load: u8,
    hop_count: u8,
}

impl MetricVector {
    /// Create a new `MetricVector`.
    pub const fn new(
        destination: Network,
        delay: U24,
        inverse_bandwidth: U24,
        mtu: u16,
        reliability: u8,
        load: u8,
        hop_count: u8,
    ) -> Self {
        Self {
            destination,
            delay,
            inverse_bandwidth,
            mtu,
            reliability,
            load,
            hop_count,
        }
    }

    /// Create the vector for a network attached to a local interface with the given
    /// [`LinkMetrics`].
    pub const fn directly_connected(destination: Network, link: LinkMetrics) -> Self {
        Self {
            destination,
            delay: link.delay,
            inverse_bandwidth: link.inverse_bandwidth,
            mtu: 0,
            reliability: 1,
            load: 0,
            hop_count: 0,
        }
    }

    /// Return the destination [`Network`].
    pub fn destination(&self) -> Network {
        self.destination
    }

    /// Return the delay, in tens of microseconds.
    pub fn delay(&self) -> U24 {
        self.delay
    }

    /// Return the inverse bandwidth.
    pub fn inverse_bandwidth(&self) -> U24 {
        self.inverse_bandwidth
    }

    /// Return the MTU.
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// Return the reliability.
    pub fn reliability(&self) -> u8 {
        self.reliability
    }

    /// Return the load.
    pub fn load(&self) -> u8 {
        self.load
    }

    /// Return the amount of hops to the destination.
    pub fn hop_count(&self) -> u8 {
        self.hop_count
    }

    /// Checks if this vector marks the destination as unreachable.
    pub fn is_unreachable(&self) -> bool {
        self.delay.is_unreachable()
    }

    /// Returns a copy of this vector with the delay replaced by the unreachable sentinel.
    pub fn unreachable(mut self) -> Self {
        self.delay = U24::UNREACHABLE;
        self
    }

    /// Returns a copy of this vector with a new delay.
    pub fn with_delay(mut self, delay: U24) -> Self {
        self.delay = delay;
        self
    }

    /// Compute the vector for the path to the destination through the neighbour which
    /// advertised `self`, reached over a local link with the given [`LinkMetrics`].
    ///
    /// The bandwidth of the path is the bottleneck (largest inverse bandwidth), delays add up and
    /// the hop count grows by one. An unreachable input stays unreachable.
    pub fn derive_via(&self, link: LinkMetrics) -> Self {
        let delay = if self.is_unreachable() {
            U24::UNREACHABLE
        } else {
            self.delay.saturating_add_reachable(link.delay)
        };

        Self {
            destination: self.destination,
            delay,
            inverse_bandwidth: self.inverse_bandwidth.max(link.inverse_bandwidth),
            mtu: 0,
            reliability: self.reliability.min(1),
            load: self.load.max(1),
            hop_count: self.hop_count.saturating_add(1),
        }
    }

    /// Construct a `MetricVector` from wire bytes.
    ///
    /// # Panics
    ///
    /// This function will panic if there are less than [`RECORD_WIRE_SIZE`] bytes present in the
    /// provided buffer.
    pub fn from_bytes(src: &mut impl Buf) -> Self {
        let destination = Network::from_number(U24::read(src));
        let delay = U24::read(src);
        let inverse_bandwidth = U24::read(src);
        let mtu = src.get_u16();
        let reliability = src.get_u8();
        let load = src.get_u8();
        let hop_count = src.get_u8();

        trace!("Read route record for {destination}");

        Self {
            destination,
            delay,
            inverse_bandwidth,
            mtu,
            reliability,
            load,
            hop_count,
        }
    }

    /// Encode this `MetricVector` as part of a packet.
    pub fn write_bytes(&self, dst: &mut impl BufMut) {
        self.destination.number().write(dst);
        self.delay.write(dst);
        self.inverse_bandwidth.write(dst);
        dst.put_u16(self.mtu);
        dst.put_u8(self.reliability);
        dst.put_u8(self.load);
        dst.put_u8(self.hop_count);
    }
}

#[cfg(test)]
mod tests {
    use std::{net::Ipv4Addr, time::Duration};

    use bytes::Buf;

    use super::{LinkMetrics, MetricVector, U24};
    use crate::network::Network;

    #[test]
    fn u24_bounds() {
        assert_eq!(U24::new(0xFF_FFFF), Some(U24::MAX));
        assert_eq!(U24::new(0x100_0000), None);
        assert_eq!(
            U24::try_from(0x100_0000).map_err(|e| e.to_string()),
            Err("value 0x1000000 does not fit in 24 bits".to_string())
        );
        assert_eq!(U24::saturating(u64::MAX), U24::MAX);
        assert!(U24::MAX.is_unreachable());
        assert_eq!(
            U24::new(0xFF_FFF0)
                .unwrap()
                .saturating_add_reachable(U24::new(0x20).unwrap()),
            U24::new(0xFF_FFFE).unwrap()
        );
    }

    #[test]
    fn link_metrics_from_interface() {
        let link = LinkMetrics::from_link(1_544_000, Duration::from_micros(20_000));
        // 10_000_000 / 1544
        assert_eq!(link.inverse_bandwidth().get(), 6476);
        assert_eq!(link.delay().get(), 2000);

        let link = LinkMetrics::from_link(500, Duration::ZERO);
        assert_eq!(link.inverse_bandwidth(), U24::MAX);
        assert_eq!(link.delay().get(), 0);

        // Huge delays are clamped below the sentinel.
        let link = LinkMetrics::from_link(10_000_000, Duration::from_secs(3600));
        assert!(!link.delay().is_unreachable());
    }

    #[test]
    fn derive_via_neighbour() {
        let dest = Network::containing(Ipv4Addr::new(192, 168, 7, 0));
        let advertised = MetricVector::new(
            dest,
            U24::new(1000).unwrap(),
            U24::new(2500).unwrap(),
            1500,
            255,
            0,
            2,
        );
        let link = LinkMetrics::new(U24::new(100).unwrap(), U24::new(1000).unwrap());

        let derived = advertised.derive_via(link);
        assert_eq!(derived.destination(), dest);
        assert_eq!(derived.delay().get(), 1100);
        assert_eq!(derived.inverse_bandwidth().get(), 2500);
        assert_eq!(derived.hop_count(), 3);
        assert_eq!(derived.reliability(), 1);
        assert_eq!(derived.load(), 1);
        assert_eq!(derived.mtu(), 0);

        // Slower local link becomes the bottleneck.
        let link = LinkMetrics::new(U24::new(100).unwrap(), U24::new(9000).unwrap());
        assert_eq!(advertised.derive_via(link).inverse_bandwidth().get(), 9000);
    }

    #[test]
    fn derive_keeps_unreachable() {
        let dest = Network::containing(Ipv4Addr::new(10, 0, 0, 0));
        let advertised = MetricVector::new(dest, U24::UNREACHABLE, U24::new(10).unwrap(), 0, 1, 0, 4);
        let link = LinkMetrics::new(U24::new(100).unwrap(), U24::new(1000).unwrap());

        let derived = advertised.derive_via(link);
        assert!(derived.is_unreachable());
        assert_eq!(derived.hop_count(), 5);
    }

    #[test]
    fn encoding() {
        let mut buf = bytes::BytesMut::new();

        let vector = MetricVector::new(
            Network::containing(Ipv4Addr::new(172, 16, 0, 0)),
            U24::new(0x0003E8).unwrap(),
            U24::new(0x0009C4).unwrap(),
            1500,
            1,
            0,
            3,
        );

        vector.write_bytes(&mut buf);

        assert_eq!(buf.len(), super::RECORD_WIRE_SIZE);
        assert_eq!(
            buf[..],
            [0xAC, 0x10, 0x00, 0x00, 0x03, 0xE8, 0x00, 0x09, 0xC4, 0x05, 0xDC, 1, 0, 3]
        );
    }

    #[test]
    fn decoding() {
        let mut buf = bytes::BytesMut::from(
            &[10, 1, 0, 0xFF, 0xFF, 0xFF, 0x01, 0x00, 0x00, 0, 0, 1, 255, 7][..],
        );

        let vector = MetricVector::from_bytes(&mut buf);

        assert_eq!(
            vector.destination(),
            Network::from_address(Ipv4Addr::new(10, 1, 0, 0))
        );
        assert!(vector.is_unreachable());
        assert_eq!(vector.inverse_bandwidth().get(), 0x010000);
        assert_eq!(vector.mtu(), 0);
        assert_eq!(vector.reliability(), 1);
        assert_eq!(vector.load(), 255);
        assert_eq!(vector.hop_count(), 7);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn decode_returns_encoded_vector() {
        let vectors = [
            MetricVector::new(
                Network::from_number(U24::MAX),
                U24::UNREACHABLE,
                U24::MAX,
                u16::MAX,
                u8::MAX,
                u8::MAX,
                u8::MAX,
            ),
            MetricVector::new(
                Network::from_number(U24::new(0x0A0000).unwrap()),
                U24::new(0xFF_FFFE).unwrap(),
                U24::default(),
                0,
                0,
                0,
                0,
            ),
        ];

        for vector in vectors {
            let mut buf = bytes::BytesMut::new();
            vector.write_bytes(&mut buf);
            assert_eq!(buf.len(), super::RECORD_WIRE_SIZE);

            let decoded = MetricVector::from_bytes(&mut buf);
            assert_eq!(decoded, vector);
            assert_eq!(buf.remaining(), 0);
        }
    }
}
