//! A distance vector routing engine speaking an IGRP style protocol.
//!
//! Every router keeps a multipath [`RoutingTable`](routing_table::RoutingTable) with one bucket
//! per configured type of service, exchanges periodic and triggered updates with its neighbours,
//! and protects itself against routing loops with split horizon, holddown and route poisoning.
//!
//! The engine does not own any I/O. The node it runs on implements the traits in [`host`], and
//! drives the engine by handing it received packets and expired [`Timer`]s.

pub use config::{parse, ConfigError, RouterConfig, Settings};
pub use host::{ForwardingEntry, ForwardingTable, Host, LinkLayer, Scheduler};
pub use metrics::{Metrics, NoMetrics};
pub use router::{Igrp, Statistics};
pub use timer::Timer;

pub mod config;
pub mod host;
pub mod metric;
pub mod metrics;
pub mod network;
pub mod packet;
pub mod router;
pub mod routing_table;
pub mod timer;
pub mod vector;
