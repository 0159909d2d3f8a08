// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay configuration.
//!
//! Every field has a default, so a configuration file only needs to name
//! what it changes:
//!
//! ```toml
//! control_port = 64923
//! max_subscriptions = 256
//! stall_timeout_ms = 500
//! ```

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

/// Well-known UDP port subscribers send registration requests to.
pub const DEFAULT_CONTROL_PORT: u16 = 64923;

/// Longest valid request is `65535;65535;65535`.
const MIN_REQUEST_SIZE: usize = 17;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    /// Address the control socket binds to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Control port for registration requests (0 = ephemeral)
    #[serde(default = "default_control_port")]
    pub control_port: u16,

    /// Local address for the outbound pose socket (default: unspecified
    /// address of the control socket's family)
    #[serde(default)]
    pub send_bind_address: Option<IpAddr>,

    /// Pose table capacity, fixed for the process lifetime
    #[serde(default = "default_max_rigid_bodies")]
    pub max_rigid_bodies: usize,

    /// Subscription registry capacity, fixed for the process lifetime
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions: usize,

    /// Fraction of `max_subscriptions` at which a capacity warning is logged
    #[serde(default = "default_high_water_ratio")]
    pub high_water_ratio: f64,

    /// Time without a new frame before the frame clock is reported stalled
    #[serde(default = "default_stall_timeout_ms")]
    pub stall_timeout_ms: u64,

    /// Read timeout on the control socket, bounds shutdown latency
    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: u64,

    /// Receive buffer size for one registration datagram (bytes)
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,

    /// Interval between status log lines in seconds (0 = disabled)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_control_port() -> u16 {
    DEFAULT_CONTROL_PORT
}

fn default_max_rigid_bodies() -> usize {
    1024
}

fn default_max_subscriptions() -> usize {
    1024
}

fn default_high_water_ratio() -> f64 {
    0.9
}

fn default_stall_timeout_ms() -> u64 {
    1000
}

fn default_recv_timeout_ms() -> u64 {
    250
}

fn default_max_request_size() -> usize {
    512
}

fn default_stats_interval() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            control_port: default_control_port(),
            send_bind_address: None,
            max_rigid_bodies: default_max_rigid_bodies(),
            max_subscriptions: default_max_subscriptions(),
            high_water_ratio: default_high_water_ratio(),
            stall_timeout_ms: default_stall_timeout_ms(),
            recv_timeout_ms: default_recv_timeout_ms(),
            max_request_size: default_max_request_size(),
            stats_interval_secs: default_stats_interval(),
            log_level: default_log_level(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration bound to loopback on an ephemeral port.
    pub fn loopback() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            control_port: 0,
            ..Default::default()
        }
    }

    /// Control socket address.
    pub fn control_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.control_port)
    }

    /// Local address for the outbound socket (always an ephemeral port).
    pub fn send_addr(&self) -> SocketAddr {
        let ip = self.send_bind_address.unwrap_or(match self.bind_address {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        });
        SocketAddr::new(ip, 0)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    /// Status log interval, `None` when disabled.
    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rigid_bodies == 0 || self.max_rigid_bodies > usize::from(u16::MAX) {
            return Err(ConfigError::Invalid(format!(
                "max_rigid_bodies must be within 1..={}",
                u16::MAX
            )));
        }
        if self.max_subscriptions == 0 {
            return Err(ConfigError::Invalid(
                "max_subscriptions cannot be 0".into(),
            ));
        }
        if !(self.high_water_ratio > 0.0 && self.high_water_ratio <= 1.0) {
            return Err(ConfigError::Invalid(
                "high_water_ratio must be within (0, 1]".into(),
            ));
        }
        if self.stall_timeout_ms == 0 {
            return Err(ConfigError::Invalid("stall_timeout_ms cannot be 0".into()));
        }
        // A zero read timeout means "block forever" to the socket layer.
        if self.recv_timeout_ms == 0 {
            return Err(ConfigError::Invalid("recv_timeout_ms cannot be 0".into()));
        }
        if self.max_request_size < MIN_REQUEST_SIZE {
            return Err(ConfigError::Invalid(format!(
                "max_request_size must be at least {} bytes",
                MIN_REQUEST_SIZE
            )));
        }
        if self.log_level.parse::<LevelFilter>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "log_level must be one of off, error, warn, info, debug, trace (got {:?})",
                self.log_level
            )));
        }
        if let Some(send_ip) = self.send_bind_address {
            if send_ip.is_ipv4() != self.bind_address.is_ipv4() {
                return Err(ConfigError::Invalid(
                    "send_bind_address must use the same IP family as bind_address".into(),
                ));
            }
        }
        Ok(())
    }
}
