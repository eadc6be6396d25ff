use crate::network::Network;

/// HoldKey identifies the path a holddown timer belongs to. It is resolved against the routing
/// table again when the timer fires, so a path which disappeared in the meantime is simply not
/// found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HoldKey {
    tos_index: usize,
    network: Network,
    interface: usize,
}

impl HoldKey {
    /// Creates a new `HoldKey` for the given bucket index, [`Network`] and interface.
    #[inline]
    pub fn new(tos_index: usize, network: Network, interface: usize) -> Self {
        Self {
            tos_index,
            network,
            interface,
        }
    }

    /// Gets the index of the routing table bucket identified by this `HoldKey`.
    #[inline]
    pub fn tos_index(&self) -> usize {
        self.tos_index
    }

    /// Gets the [`Network`] identified by this `HoldKey`.
    #[inline]
    pub fn network(&self) -> Network {
        self.network
    }

    /// Gets the outgoing interface identified by this `HoldKey`.
    #[inline]
    pub fn interface(&self) -> usize {
        self.interface
    }
}

impl std::fmt::Display for HoldKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "{} on interface {} (tos index {})",
            self.network, self.interface, self.tos_index
        ))
    }
}
