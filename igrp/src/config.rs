//! Router configuration and engine settings.
//!
//! The per router configuration is a small line based language:
//!
//! ```text
//! ROUTER 3 IGRP 100
//! NETWORK 10.0.0.0/8
//! NETWORK 192.168.4.0/24
//! VARIANCE 2.0
//! METRIC-WEIGHTS DEFAULT-TOS 1 0 1 0 0
//! METRIC-HOLDDOWN YES
//! IP-SPLIT-HORIZON NO
//! ```
//!
//! A block starts at a `ROUTER` line and runs until the next one. Blocks for other routers are
//! skipped. Blank lines and lines starting with `#` are ignored everywhere.

use std::{net::Ipv4Addr, str::FromStr, time::Duration};

use ipnet::Ipv4Net;
use tracing::{debug, warn};

use crate::{metric::MetricWeights, network::Network};

/// The type of service used for `DEFAULT-TOS` weights, and for the implicit bucket when no
/// weights are configured.
pub const DEFAULT_TOS: u8 = 0;

/// Autonomous system used when a `ROUTER` line does not carry one.
pub const DEFAULT_AUTONOMOUS_SYSTEM: u16 = 1;

/// The smallest maximum hop count which can be configured.
pub const MINIMUM_MAX_HOPS: u8 = 1;

/// Distance between a configured timer and its suggested value before a warning is logged.
const TIMER_TOLERANCE: Duration = Duration::from_secs(10);

const PROTOCOL_NAME: &str = "IGRP";

/// Errors which make a router configuration unusable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A `ROUTER` line names a different routing protocol.
    #[error("router {router_id} is not an IGRP router (found protocol {protocol})")]
    NotIgrp { router_id: u32, protocol: String },
    /// The block for this router appears more than once.
    #[error("line {line}: router {router_id} is configured more than once")]
    DuplicateRouter { line: usize, router_id: u32 },
    /// A `NETWORK` statement follows a `METRIC-WEIGHTS` statement.
    #[error("line {line}: all NETWORK statements must be given before any METRIC-WEIGHTS statement")]
    NetworkAfterWeights { line: usize },
    /// A `NETWORK` statement holds something which is not a network.
    #[error("line {line}: invalid network {value:?}")]
    InvalidNetwork { line: usize, value: String },
    /// No local interface is attached to a configured network.
    #[error("no interface is attached to configured network {0}")]
    UnresolvedNetwork(Ipv4Net),
    /// `METRIC-WEIGHTS` names an unsupported type of service.
    #[error("line {line}: unsupported type of service {tos:?}")]
    UnknownTos { line: usize, tos: String },
    /// A numeric field could not be parsed.
    #[error("line {line}: invalid value {value:?} for {keyword}")]
    InvalidNumber {
        line: usize,
        keyword: &'static str,
        value: String,
    },
    /// A `YES`/`NO` field holds something else.
    #[error("line {line}: {keyword} expects YES or NO, got {value:?}")]
    InvalidToggle {
        line: usize,
        keyword: &'static str,
        value: String,
    },
    /// The line starts with a keyword we don't know.
    #[error("line {line}: unknown keyword {keyword:?}")]
    UnknownKeyword { line: usize, keyword: String },
    /// The block for this router has no `NETWORK` statement.
    #[error("no NETWORK statement for router {0}")]
    MissingNetwork(u32),
    /// A timer is set to zero.
    #[error("timer {0} must be larger than zero")]
    ZeroTimer(&'static str),
    /// A timer is so large the timers derived from it can't be represented.
    #[error("timer {0} is too large")]
    TimerOutOfRange(&'static str),
    /// The maximum hop count is below [`MINIMUM_MAX_HOPS`].
    #[error("maximum hop count {0} is less than {min}", min = MINIMUM_MAX_HOPS)]
    MaxHopsTooLow(u8),
}

/// Configuration of one routing table bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketConfig {
    /// Type of service of the bucket.
    pub tos: u8,
    /// Weights of the composite metric in this bucket.
    pub weights: MetricWeights,
}

/// The parsed configuration block of a single router.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    /// Id of the router the block belongs to.
    pub router_id: u32,
    /// Autonomous system the router is part of.
    pub autonomous_system: u16,
    /// Directly attached networks the protocol runs on, in configuration order.
    pub networks: Vec<Ipv4Net>,
    /// Configured variance. Values at or below 1 are raised when used.
    pub variance: f64,
    /// One entry per routing table bucket, never empty.
    pub buckets: Vec<BucketConfig>,
    /// Holddown is enabled.
    pub hold_down: bool,
    /// Split horizon is enabled.
    pub split_horizon: bool,
}

impl RouterConfig {
    fn new(router_id: u32, autonomous_system: u16) -> Self {
        Self {
            router_id,
            autonomous_system,
            networks: Vec::new(),
            variance: 1.0,
            buckets: Vec::new(),
            hold_down: true,
            split_horizon: true,
        }
    }
}

/// Parse the configuration text, returning the block for `router_id`.
///
/// `Ok(None)` means the router does not run the protocol.
pub fn parse(text: &str, router_id: u32) -> Result<Option<RouterConfig>, ConfigError> {
    let mut config: Option<RouterConfig> = None;
    // Set while we are inside the block of router_id.
    let mut in_block = false;

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let mut tokens = raw.split_whitespace();
        let Some(keyword) = tokens.next() else {
            continue;
        };
        if keyword.starts_with('#') {
            continue;
        }

        if keyword == "ROUTER" {
            let id = parse_number::<u32>(tokens.next(), line, "ROUTER")?;
            let protocol = tokens.next().unwrap_or_default();
            if protocol != PROTOCOL_NAME {
                return Err(ConfigError::NotIgrp {
                    router_id: id,
                    protocol: protocol.to_string(),
                });
            }
            let autonomous_system = match tokens.next() {
                Some(value) => parse_number::<u16>(Some(value), line, "ROUTER")?,
                None => DEFAULT_AUTONOMOUS_SYSTEM,
            };

            in_block = id == router_id;
            if in_block {
                if config.is_some() {
                    return Err(ConfigError::DuplicateRouter { line, router_id });
                }
                config = Some(RouterConfig::new(id, autonomous_system));
            }
            continue;
        }

        // Statements outside of our block are none of our business.
        let Some(config) = config.as_mut().filter(|_| in_block) else {
            continue;
        };

        match keyword {
            "NETWORK" => {
                if !config.buckets.is_empty() {
                    return Err(ConfigError::NetworkAfterWeights { line });
                }
                let value = tokens.next().unwrap_or_default();
                let network =
                    parse_network(value).ok_or_else(|| ConfigError::InvalidNetwork {
                        line,
                        value: value.to_string(),
                    })?;
                config.networks.push(network);
            }
            "VARIANCE" => {
                let variance = parse_number::<f64>(tokens.next(), line, "VARIANCE")?;
                if variance < 1.0 {
                    warn!("Invalid variance value {variance} for router {router_id}");
                }
                config.variance = variance;
            }
            "METRIC-WEIGHTS" => {
                let tos = tokens.next().unwrap_or_default();
                if tos != "DEFAULT-TOS" {
                    return Err(ConfigError::UnknownTos {
                        line,
                        tos: tos.to_string(),
                    });
                }
                let defaults = MetricWeights::default();
                let mut k = [defaults.k1, defaults.k2, defaults.k3, defaults.k4, defaults.k5];
                for slot in k.iter_mut() {
                    match tokens.next() {
                        Some(value) => {
                            *slot = parse_number::<u32>(Some(value), line, "METRIC-WEIGHTS")?
                        }
                        None => break,
                    }
                }
                let weights = MetricWeights::new(k[0], k[1], k[2], k[3], k[4]);
                debug!("Router {router_id} tos {DEFAULT_TOS} uses weights {weights}");
                config.buckets.push(BucketConfig {
                    tos: DEFAULT_TOS,
                    weights,
                });
            }
            "METRIC-HOLDDOWN" => {
                config.hold_down = parse_toggle(tokens.next(), line, "METRIC-HOLDDOWN")?;
            }
            "IP-SPLIT-HORIZON" => {
                config.split_horizon = parse_toggle(tokens.next(), line, "IP-SPLIT-HORIZON")?;
            }
            other => {
                return Err(ConfigError::UnknownKeyword {
                    line,
                    keyword: other.to_string(),
                })
            }
        }
    }

    let Some(mut config) = config else {
        return Ok(None);
    };

    if config.networks.is_empty() {
        return Err(ConfigError::MissingNetwork(router_id));
    }
    if config.buckets.is_empty() {
        config.buckets.push(BucketConfig {
            tos: DEFAULT_TOS,
            weights: MetricWeights::default(),
        });
    }

    Ok(Some(config))
}

/// Parses `a.b.c.d/len`, or a bare address which is taken to be a classful network.
fn parse_network(value: &str) -> Option<Ipv4Net> {
    if let Ok(net) = Ipv4Net::from_str(value) {
        return Some(net.trunc());
    }
    Ipv4Addr::from_str(value)
        .ok()
        .map(|addr| Network::containing(addr).subnet())
}

fn parse_number<T: FromStr>(
    value: Option<&str>,
    line: usize,
    keyword: &'static str,
) -> Result<T, ConfigError> {
    let value = value.unwrap_or_default();
    value.parse().map_err(|_| ConfigError::InvalidNumber {
        line,
        keyword,
        value: value.to_string(),
    })
}

fn parse_toggle(
    value: Option<&str>,
    line: usize,
    keyword: &'static str,
) -> Result<bool, ConfigError> {
    match value {
        Some("YES") => Ok(true),
        Some("NO") => Ok(false),
        other => Err(ConfigError::InvalidToggle {
            line,
            keyword,
            value: other.unwrap_or_default().to_string(),
        }),
    }
}

/// Timers and limits of the protocol engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Interval between regular updates.
    pub broadcast_time: Duration,
    /// A learned route not refreshed for this long is declared unreachable.
    pub invalid_time: Duration,
    /// Duration of holddown.
    pub hold_time: Duration,
    /// An unreachable route not refreshed for this long is removed.
    pub flush_time: Duration,
    /// Interval of the periodic table scan.
    pub periodic_time: Duration,
    /// Base delay of a triggered update.
    pub sleep_time: Duration,
    /// Routes with more hops than this are unreachable.
    pub max_hops: u8,
    /// Collect and report statistics.
    pub collect_stats: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broadcast_time: Duration::from_secs(90),
            invalid_time: Duration::from_secs(270),
            hold_time: Duration::from_secs(280),
            flush_time: Duration::from_secs(630),
            periodic_time: Duration::from_secs(1),
            sleep_time: Duration::from_secs(5),
            max_hops: 100,
            collect_stats: false,
        }
    }
}

impl Settings {
    /// Checks the settings. Zero timers, a broadcast time too large to derive the suggested
    /// timers from and a too small maximum hop count are errors. Timers far from their suggested
    /// value are logged, and their names returned.
    pub fn validate(&self) -> Result<Vec<&'static str>, ConfigError> {
        if self.broadcast_time.is_zero() {
            return Err(ConfigError::ZeroTimer("broadcast"));
        }
        if self.max_hops < MINIMUM_MAX_HOPS {
            return Err(ConfigError::MaxHopsTooLow(self.max_hops));
        }

        let broadcast_multiple = |factor: u32, extra: Duration| {
            self.broadcast_time
                .checked_mul(factor)
                .and_then(|d| d.checked_add(extra))
                .ok_or(ConfigError::TimerOutOfRange("broadcast"))
        };
        let checks = [
            ("invalid", self.invalid_time, broadcast_multiple(3, Duration::ZERO)?),
            (
                "hold",
                self.hold_time,
                broadcast_multiple(3, Duration::from_secs(10))?,
            ),
            ("flush", self.flush_time, broadcast_multiple(7, Duration::ZERO)?),
            ("periodic", self.periodic_time, Duration::from_secs(1)),
            ("sleep", self.sleep_time, Duration::from_secs(5)),
        ];

        let mut unusual = Vec::new();
        for (name, value, suggested) in checks {
            if value.is_zero() {
                return Err(ConfigError::ZeroTimer(name));
            }
            let distance = value.saturating_sub(suggested).max(suggested.saturating_sub(value));
            if distance > TIMER_TOLERANCE {
                warn!(
                    "Timer {name} is set to {}s, suggested value is {}s",
                    value.as_secs_f64(),
                    suggested.as_secs_f64()
                );
                unusual.push(name);
            }
        }

        Ok(unusual)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{parse, ConfigError, Settings, DEFAULT_TOS};
    use crate::metric::MetricWeights;

    const TWO_ROUTERS: &str = "
# core routers
ROUTER 1 IGRP 10
NETWORK 10.0.0.0/8
NETWORK 192.168.1.0/24
VARIANCE 2.5
METRIC-WEIGHTS DEFAULT-TOS 1 1 1 0 0
METRIC-HOLDDOWN NO
IP-SPLIT-HORIZON NO

ROUTER 2 IGRP 10
NETWORK 172.16.0.0
";

    #[test]
    fn parses_own_block() {
        let config = parse(TWO_ROUTERS, 1)
            .expect("Valid configuration")
            .expect("Router 1 is configured");

        assert_eq!(config.autonomous_system, 10);
        assert_eq!(config.networks.len(), 2);
        assert_eq!(config.networks[1].to_string(), "192.168.1.0/24");
        assert_eq!(config.variance, 2.5);
        assert_eq!(config.buckets.len(), 1);
        assert_eq!(config.buckets[0].weights, MetricWeights::new(1, 1, 1, 0, 0));
        assert!(!config.hold_down);
        assert!(!config.split_horizon);
    }

    #[test]
    fn defaults_apply_without_statements() {
        let config = parse(TWO_ROUTERS, 2)
            .expect("Valid configuration")
            .expect("Router 2 is configured");

        // Bare address resolves to its classful network.
        assert_eq!(config.networks[0].to_string(), "172.16.0.0/16");
        assert_eq!(config.variance, 1.0);
        assert_eq!(config.buckets.len(), 1);
        assert_eq!(config.buckets[0].tos, DEFAULT_TOS);
        assert_eq!(config.buckets[0].weights, MetricWeights::default());
        assert!(config.hold_down);
        assert!(config.split_horizon);
    }

    #[test]
    fn unknown_router_does_not_run_protocol() {
        assert_eq!(parse(TWO_ROUTERS, 3), Ok(None));
    }

    #[test]
    fn every_weights_line_adds_a_bucket() {
        let text = "ROUTER 1 IGRP 1\nNETWORK 10.0.0.0/8\nMETRIC-WEIGHTS DEFAULT-TOS 1 0 1 0 0\nMETRIC-WEIGHTS DEFAULT-TOS 0 0 1\n";
        let config = parse(text, 1).expect("Valid").expect("Configured");
        assert_eq!(config.buckets.len(), 2);
        // Missing trailing weights keep their default.
        assert_eq!(config.buckets[1].weights, MetricWeights::new(0, 0, 1, 0, 0));
    }

    #[test]
    fn low_variance_is_kept() {
        let text = "ROUTER 1 IGRP 1\nNETWORK 10.0.0.0/8\nVARIANCE 0.5\n";
        let config = parse(text, 1).expect("Valid").expect("Configured");
        assert_eq!(config.variance, 0.5);
    }

    #[test]
    fn configuration_errors() {
        assert_eq!(
            parse("ROUTER 1 IGRP 1\n", 1),
            Err(ConfigError::MissingNetwork(1))
        );
        assert!(matches!(
            parse("ROUTER 4 RIP 1\n", 1),
            Err(ConfigError::NotIgrp { router_id: 4, .. })
        ));
        assert_eq!(
            parse(
                "ROUTER 1 IGRP 1\nNETWORK 10.0.0.0/8\nMETRIC-WEIGHTS DEFAULT-TOS 1 0 1 0 0\nNETWORK 11.0.0.0/8\n",
                1
            ),
            Err(ConfigError::NetworkAfterWeights { line: 4 })
        );
        assert!(matches!(
            parse("ROUTER 1 IGRP 1\nNETWORK 10.0.0.0/8\nMETRIC-WEIGHTS LOW-DELAY 1\n", 1),
            Err(ConfigError::UnknownTos { line: 3, .. })
        ));
        assert!(matches!(
            parse("ROUTER 1 IGRP 1\nNETWORK 10.0.0.0/8\nMETRIC-HOLDDOWN MAYBE\n", 1),
            Err(ConfigError::InvalidToggle { line: 3, .. })
        ));
        assert!(matches!(
            parse("ROUTER 1 IGRP 1\nNETWORK 10.0.0.0/8\nREDISTRIBUTE OSPF\n", 1),
            Err(ConfigError::UnknownKeyword { line: 3, .. })
        ));
        assert!(matches!(
            parse("ROUTER 1 IGRP 1\nNETWORK ten\n", 1),
            Err(ConfigError::InvalidNetwork { line: 2, .. })
        ));
        assert!(matches!(
            parse("ROUTER 1 IGRP 1\nNETWORK 10.0.0.0/8\nVARIANCE high\n", 1),
            Err(ConfigError::InvalidNumber { line: 3, .. })
        ));
        assert!(matches!(
            parse("ROUTER 1 IGRP 1\nNETWORK 10.0.0.0/8\nROUTER 1 IGRP 1\n", 1),
            Err(ConfigError::DuplicateRouter { line: 3, .. })
        ));
    }

    #[test]
    fn default_settings_are_valid() {
        assert_eq!(Settings::default().validate(), Ok(Vec::new()));
    }

    #[test]
    fn settings_validation() {
        let settings = Settings {
            periodic_time: Duration::ZERO,
            ..Settings::default()
        };
        assert_eq!(settings.validate(), Err(ConfigError::ZeroTimer("periodic")));

        let settings = Settings {
            max_hops: 0,
            ..Settings::default()
        };
        assert_eq!(settings.validate(), Err(ConfigError::MaxHopsTooLow(0)));

        // Exactly at the tolerance is fine, beyond it warns.
        let settings = Settings {
            invalid_time: Duration::from_secs(280),
            flush_time: Duration::from_secs(641),
            ..Settings::default()
        };
        assert_eq!(settings.validate(), Ok(vec!["flush"]));
    }

    #[test]
    fn huge_timers_are_rejected_or_reported() {
        let settings = Settings {
            broadcast_time: Duration::from_secs(u64::MAX / 2),
            ..Settings::default()
        };
        assert_eq!(
            settings.validate(),
            Err(ConfigError::TimerOutOfRange("broadcast"))
        );

        let settings = Settings {
            flush_time: Duration::MAX,
            ..Settings::default()
        };
        assert_eq!(settings.validate(), Ok(vec!["flush"]));
    }
}
