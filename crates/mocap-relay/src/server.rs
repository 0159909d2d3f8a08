// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay core: lifecycle of the control listener and fan-out sender.

use crate::config::{ConfigError, RelayConfig};
use crate::frame::FrameStore;
use crate::producer::FrameSink;
use crate::registry::{Subscription, SubscriptionRegistry};
use crate::table::{IngestReport, Pose};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io;
use std::net::{Shutdown, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod listener;
pub mod sender;
pub mod stats;

pub use listener::RequestError;
pub use sender::{fan_out, DatagramTransport, DispatchReport};
pub use stats::{RelayStats, RelayStatsSnapshot};

use listener::ControlListener;
use sender::FanoutSender;

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0} thread panicked")]
    WorkerPanicked(&'static str),
}

/// State shared by the producer path and both worker threads.
pub(crate) struct Shared {
    pub(crate) frames: FrameStore,
    pub(crate) registry: Mutex<SubscriptionRegistry>,
    pub(crate) stats: RelayStats,
    running: AtomicBool,
    topology_pending: AtomicBool,
    truncation_reported: AtomicBool,
}

impl Shared {
    pub(crate) fn new(config: &RelayConfig) -> Self {
        Self {
            frames: FrameStore::new(config.max_rigid_bodies),
            registry: Mutex::new(SubscriptionRegistry::new(
                config.max_subscriptions,
                config.high_water_ratio,
            )),
            stats: RelayStats::new(),
            running: AtomicBool::new(true),
            topology_pending: AtomicBool::new(false),
            truncation_reported: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// A running relay.
///
/// Dropping the relay shuts it down; call [`Relay::shutdown`] to observe
/// worker failures.
pub struct Relay {
    config: RelayConfig,
    shared: Arc<Shared>,
    control_socket: Arc<UdpSocket>,
    control_addr: SocketAddr,
    listener: Option<JoinHandle<()>>,
    sender: Option<JoinHandle<()>>,
}

impl Relay {
    /// Bind the sockets and start the listener and sender threads.
    pub fn start(config: RelayConfig) -> Result<Self, RelayError> {
        config.validate()?;

        let control_socket = bind_control_socket(&config)?;
        let control_addr = control_socket.local_addr()?;
        let send_socket = bind_send_socket(config.send_addr())?;
        let control_socket = Arc::new(control_socket);

        let shared = Arc::new(Shared::new(&config));

        let listener = {
            let worker =
                ControlListener::new(control_socket.clone(), shared.clone(), config.max_request_size);
            thread::Builder::new()
                .name("mocap-relay-listener".into())
                .spawn(move || worker.run())?
        };

        let mut relay = Self {
            config,
            shared,
            control_socket,
            control_addr,
            listener: Some(listener),
            sender: None,
        };

        let worker = FanoutSender::new(send_socket, relay.shared.clone(), relay.config.stall_timeout());
        // On failure, dropping `relay` stops the listener.
        relay.sender = Some(
            thread::Builder::new()
                .name("mocap-relay-sender".into())
                .spawn(move || worker.run())?,
        );

        info!(
            control = %control_addr,
            max_rigid_bodies = relay.config.max_rigid_bodies,
            max_subscriptions = relay.config.max_subscriptions,
            "Relay started"
        );
        Ok(relay)
    }

    /// Producer-facing handle for delivering frames.
    pub fn ingest(&self) -> FrameIngest {
        FrameIngest {
            shared: self.shared.clone(),
        }
    }

    /// Bound control address (resolves an ephemeral port).
    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Copy of every subscription slot.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.shared.registry.lock().snapshot()
    }

    /// Counters plus table and registry gauges.
    pub fn stats(&self) -> RelayStatsSnapshot {
        let mut snapshot = self.shared.stats.snapshot();

        let frame = self.shared.frames.snapshot();
        snapshot.frame_index = frame.frame_index;
        snapshot.tracked_rigid_bodies = frame.poses.len();

        let registry = self.shared.registry.lock();
        snapshot.subscriptions = registry.len();
        snapshot.active_subscriptions = registry.active_count();
        snapshot
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Stop both threads and wait for them.
    pub fn shutdown(mut self) -> Result<(), RelayError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), RelayError> {
        if self.listener.is_none() && self.sender.is_none() {
            return Ok(());
        }

        info!("Shutting down relay");
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.frames.close();

        // Unblocks the pending receive on Linux; elsewhere the read timeout
        // bounds the wait.
        if let Err(e) = SockRef::from(&*self.control_socket).shutdown(Shutdown::Both) {
            if e.kind() != io::ErrorKind::NotConnected {
                debug!(error = %e, "Control socket shutdown failed");
            }
        }

        let mut result = Ok(());
        if let Some(handle) = self.sender.take() {
            if handle.join().is_err() {
                warn!("Fan-out sender panicked");
                result = Err(RelayError::WorkerPanicked("sender"));
            }
        }
        if let Some(handle) = self.listener.take() {
            if handle.join().is_err() {
                warn!("Control listener panicked");
                result = Err(RelayError::WorkerPanicked("listener"));
            }
        }

        let stats = self.shared.stats.snapshot();
        info!(
            frames = stats.frames_ingested,
            datagrams = stats.datagrams_sent,
            subscriptions = self.shared.registry.lock().len(),
            "Relay stopped"
        );
        result
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn bind_control_socket(config: &RelayConfig) -> Result<UdpSocket, RelayError> {
    let addr = config.control_addr();
    let bind = |addr: SocketAddr| -> io::Result<UdpSocket> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.bind(&addr.into())?;
        socket.set_read_timeout(Some(config.recv_timeout()))?;
        Ok(socket.into())
    };
    bind(addr).map_err(|source| RelayError::Bind { addr, source })
}

fn bind_send_socket(addr: SocketAddr) -> Result<UdpSocket, RelayError> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket
        .bind(&addr.into())
        .map_err(|source| RelayError::Bind { addr, source })?;
    Ok(socket.into())
}

/// Producer-facing handle of a running relay.
#[derive(Clone)]
pub struct FrameIngest {
    shared: Arc<Shared>,
}

impl FrameIngest {
    /// Whether the relay still accepts frames.
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }
}

impl FrameSink for FrameIngest {
    fn ingest_frame(&self, frame_index: u64, poses: &[Pose]) -> IngestReport {
        let shared = &self.shared;
        let report = shared.frames.ingest_frame(frame_index, poses);
        RelayStats::bump(&shared.stats.frames_ingested);
        if report.repeated {
            RelayStats::bump(&shared.stats.frames_repeated);
            debug!(frame_index, "Frame index repeated; poses refreshed, nothing dispatched");
        }

        if report.truncated > 0 {
            shared
                .stats
                .poses_truncated
                .fetch_add(report.truncated as u64, Ordering::Relaxed);
            if !shared.truncation_reported.swap(true, Ordering::Relaxed) {
                warn!(
                    frame_index,
                    dropped = report.truncated,
                    capacity = report.accepted,
                    "Frame has more rigid bodies than the pose table holds; extra entries dropped"
                );
            }
        }

        if shared.topology_pending.swap(false, Ordering::Relaxed) {
            info!(
                frame_index,
                rigid_bodies = report.accepted,
                "Rigid body descriptions refreshed"
            );
        }

        report
    }

    fn topology_changed(&self) {
        RelayStats::bump(&self.shared.stats.topology_changes);
        self.shared.topology_pending.store(true, Ordering::Relaxed);
        info!("Producer reported a rigid body topology change");
    }
}
