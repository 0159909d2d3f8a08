// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Motion-capture pose relay
//!
//! Keeps the latest tracking frame in a bounded pose table and streams
//! selected rigid bodies to UDP subscribers, each at its own decimated rate.
//!
//! # Features
//!
//! - **Self-service subscriptions**: clients register with a single
//!   `<rigid_body_id>;<port>;<decimation>` datagram on the control port
//! - **Per-subscriber rate**: every Nth frame, or suppressed with `0`
//! - **Frame-driven fan-out**: one pass per new frame, no polling
//! - **Stall detection**: a silent producer is reported, not waited on forever
//!
//! # Quick Start
//!
//! ```bash
//! # Relay three synthetic rigid bodies at 120 Hz on the default port
//! mocap-relay
//!
//! # Subscribe to rigid body 2 on local port 6548, every 10th frame
//! echo -n "2;6548;10" | nc -u -w0 127.0.0.1 64923
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! bind_address = "0.0.0.0"
//! control_port = 64923
//! max_rigid_bodies = 1024
//! max_subscriptions = 1024
//! stall_timeout_ms = 1000
//! ```

pub mod config;
pub mod frame;
pub mod producer;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod table;

pub use config::{ConfigError, RelayConfig};
pub use frame::{FrameSnapshot, FrameStore, FrameWait};
pub use producer::{FrameSink, ProducerHandle, SyntheticProducer};
pub use protocol::{decode_pose, encode_pose, ProtocolError, RegistrationRequest};
pub use registry::{
    Registration, RegistrationKind, RegistryError, Subscription, SubscriptionKey,
    SubscriptionRegistry, SubscriptionState,
};
pub use server::{FrameIngest, Relay, RelayError, RelayStats, RelayStatsSnapshot, RequestError};
pub use table::{IngestReport, Pose, PoseTable};
