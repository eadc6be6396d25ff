//! Destination networks as carried in route records.
//!
//! A route record only has room for the upper 24 bits of an IPv4 address, so a destination is a
//! 24 bit network number. The prefix length is not transmitted either; it is the natural prefix
//! length of the address class.

use core::fmt;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::vector::U24;

/// Classful address class of an IPv4 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressClass {
    /// `0.0.0.0` - `127.255.255.255`
    A,
    /// `128.0.0.0` - `191.255.255.255`
    B,
    /// `192.0.0.0` - `223.255.255.255`
    C,
    /// Multicast, `224.0.0.0` - `239.255.255.255`
    D,
    /// Reserved, `240.0.0.0` and up.
    E,
}

impl AddressClass {
    /// Determine the class of an address from its leading bits.
    pub fn of(address: Ipv4Addr) -> Self {
        match address.octets()[0] {
            0..=127 => AddressClass::A,
            128..=191 => AddressClass::B,
            192..=223 => AddressClass::C,
            224..=239 => AddressClass::D,
            _ => AddressClass::E,
        }
    }

    /// The prefix length of the natural mask for this class.
    pub fn prefix_len(self) -> u8 {
        match self {
            AddressClass::A => 8,
            AddressClass::B => 16,
            AddressClass::C => 24,
            AddressClass::D | AddressClass::E => 32,
        }
    }

    /// The natural mask for this class.
    pub fn mask(self) -> Ipv4Addr {
        prefix_to_mask(self.prefix_len())
    }
}

/// A destination network, identified by the upper 24 bits of its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Network {
    number: U24,
}

impl Network {
    /// Create a `Network` from a 24 bit network number.
    pub const fn from_number(number: U24) -> Self {
        Self { number }
    }

    /// Create a `Network` from an address. The lowest 8 bits of the address are discarded.
    ///
    /// # Examples
    ///
    /// ```
    /// use igrp::network::Network;
    /// use std::net::Ipv4Addr;
    ///
    /// let network = Network::from_address(Ipv4Addr::new(10, 1, 0, 0));
    /// assert_eq!(network.number().get(), 0x0A0100);
    /// assert_eq!(network.to_string(), "10.1.0.0/8");
    /// ```
    pub fn from_address(address: Ipv4Addr) -> Self {
        Self {
            number: U24::saturating((u32::from(address) >> 8) as u64),
        }
    }

    /// Returns the classful `Network` which contains the given address.
    ///
    /// # Examples
    ///
    /// ```
    /// use igrp::network::Network;
    /// use std::net::Ipv4Addr;
    ///
    /// let network = Network::containing(Ipv4Addr::new(172, 16, 45, 3));
    /// assert_eq!(network.number().get(), 0xAC1000);
    /// ```
    pub fn containing(address: Ipv4Addr) -> Self {
        let mask = u32::from(AddressClass::of(address).mask());
        Self::from_address(Ipv4Addr::from(u32::from(address) & mask))
    }

    /// Returns the 24 bit network number.
    pub fn number(&self) -> U24 {
        self.number
    }

    fn address(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.number.get() << 8)
    }

    /// Returns the address class of the network.
    pub fn class(&self) -> AddressClass {
        AddressClass::of(self.address())
    }

    /// Returns the prefix length of the network, which is the natural prefix length of its
    /// address class.
    pub fn prefix_len(&self) -> u8 {
        self.class().prefix_len()
    }

    /// Returns the mask of the network.
    pub fn mask(&self) -> Ipv4Addr {
        prefix_to_mask(self.prefix_len())
    }

    /// Returns the network as an [`Ipv4Net`].
    pub fn subnet(&self) -> Ipv4Net {
        // The prefix length is at most 32.
        Ipv4Net::new(self.address(), self.prefix_len())
            .unwrap_or_else(|_| Ipv4Net::from(self.address()))
    }

    /// Checks if the given address is part of this `Network`, that is if the classful network of
    /// the address is this network.
    ///
    /// # Examples
    ///
    /// ```
    /// use igrp::network::Network;
    /// use std::net::Ipv4Addr;
    ///
    /// let network = Network::from_address(Ipv4Addr::new(192, 168, 4, 0));
    /// assert!(network.contains(Ipv4Addr::new(192, 168, 4, 77)));
    /// assert!(!network.contains(Ipv4Addr::new(192, 168, 5, 77)));
    /// ```
    pub fn contains(&self, address: Ipv4Addr) -> bool {
        Network::containing(address) == *self
    }
}

impl From<Ipv4Net> for Network {
    fn from(value: Ipv4Net) -> Self {
        Network::from_address(value.network())
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address(), self.prefix_len())
    }
}

fn prefix_to_mask(prefix_len: u8) -> Ipv4Addr {
    match prefix_len {
        0 => Ipv4Addr::UNSPECIFIED,
        len if len >= 32 => Ipv4Addr::BROADCAST,
        len => Ipv4Addr::from(u32::MAX << (32 - len)),
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::{AddressClass, Network};

    #[test]
    fn class_masks() {
        assert_eq!(AddressClass::of(Ipv4Addr::new(10, 0, 0, 1)), AddressClass::A);
        assert_eq!(AddressClass::of(Ipv4Addr::new(150, 0, 0, 1)), AddressClass::B);
        assert_eq!(AddressClass::of(Ipv4Addr::new(200, 0, 0, 1)), AddressClass::C);
        assert_eq!(AddressClass::of(Ipv4Addr::new(230, 0, 0, 1)), AddressClass::D);
        assert_eq!(AddressClass::A.mask(), Ipv4Addr::new(255, 0, 0, 0));
        assert_eq!(AddressClass::B.mask(), Ipv4Addr::new(255, 255, 0, 0));
        assert_eq!(AddressClass::C.mask(), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(AddressClass::D.mask(), Ipv4Addr::new(255, 255, 255, 255));
    }

    #[test]
    fn prefix_len_follows_class() {
        let net = Network::from_address(Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(net.prefix_len(), 8);
        let net = Network::from_address(Ipv4Addr::new(10, 1, 0, 0));
        assert_eq!(net.prefix_len(), 8);
        let net = Network::from_address(Ipv4Addr::new(172, 16, 128, 0));
        assert_eq!(net.prefix_len(), 16);
        let net = Network::from_address(Ipv4Addr::new(192, 168, 1, 0));
        assert_eq!(net.prefix_len(), 24);
        assert_eq!(net.mask(), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(net.to_string(), "192.168.1.0/24");
    }

    #[test]
    fn low_byte_is_dropped() {
        let net = Network::from_address(Ipv4Addr::new(192, 168, 1, 77));
        assert_eq!(net.address(), Ipv4Addr::new(192, 168, 1, 0));
        assert_eq!(net.number().get(), 0xC0A801);
    }

    #[test]
    fn containment() {
        let net = Network::containing(Ipv4Addr::new(10, 200, 3, 4));
        assert_eq!(net.address(), Ipv4Addr::new(10, 0, 0, 0));
        assert!(net.contains(Ipv4Addr::new(10, 99, 99, 99)));
        assert!(!net.contains(Ipv4Addr::new(11, 0, 0, 1)));
    }

    #[test]
    fn networks_inside_one_class_a_do_not_overlap() {
        let four = Network::from_address(Ipv4Addr::new(10, 4, 0, 0));
        let six = Network::from_address(Ipv4Addr::new(10, 6, 0, 0));
        let destination = Ipv4Addr::new(10, 6, 0, 1);

        assert_eq!(four.prefix_len(), 8);
        assert_eq!(six.prefix_len(), 8);
        assert!(!four.contains(destination));
        assert!(!six.contains(destination));
        assert!(Network::containing(destination).contains(destination));
        assert_ne!(four.subnet(), six.subnet());
    }
}
