//! Timers the engine asks its [`Scheduler`](crate::host::Scheduler) for.

use crate::routing_table::HoldKey;

/// A timer event, delivered back to [`Igrp::handle_timer`](crate::router::Igrp::handle_timer)
/// once its delay has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    /// Send the regular full update on all interfaces.
    Broadcast,
    /// Scan the routing table for expired and flushable routes.
    Periodic,
    /// Release the holddown of the identified path.
    HoldDown(HoldKey),
    /// Send a triggered update.
    TriggeredUpdate,
}
