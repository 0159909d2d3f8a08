// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control listener.
//!
//! Receives registration requests on the control port and applies them to
//! the subscription registry. The protocol is unacknowledged: every outcome
//! is logged, nothing is sent back.

use super::{RelayStats, Shared};
use crate::protocol::{ProtocolError, RegistrationRequest};
use crate::registry::{Registration, RegistrationKind, RegistryError, SubscriptionKey};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Reasons a registration request is dropped.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("malformed request: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("request exceeds {limit} bytes")]
    Oversized { limit: usize },

    #[error("rigid body {0} is not currently tracked")]
    UnknownRigidBody(u16),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Apply one request datagram from `peer`.
///
/// The pose table and the registry are locked one after the other, never
/// together, and only for in-memory work.
pub(crate) fn apply_request(
    shared: &Shared,
    payload: &[u8],
    peer: SocketAddr,
) -> Result<(RegistrationRequest, Registration), RequestError> {
    let request = RegistrationRequest::parse(payload)?;

    if !shared.frames.contains(request.rigid_body_id) {
        return Err(RequestError::UnknownRigidBody(request.rigid_body_id));
    }

    let key = SubscriptionKey {
        rigid_body_id: request.rigid_body_id,
        destination_ip: peer.ip(),
        destination_port: request.destination_port,
    };
    let registration = shared.registry.lock().register(key, request.decimation)?;

    Ok((request, registration))
}

pub(crate) struct ControlListener {
    socket: Arc<UdpSocket>,
    shared: Arc<Shared>,
    max_request_size: usize,
    buf: Vec<u8>,
}

impl ControlListener {
    pub(crate) fn new(socket: Arc<UdpSocket>, shared: Arc<Shared>, max_request_size: usize) -> Self {
        Self {
            socket,
            shared,
            max_request_size,
            // One spare byte: a datagram that fills the buffer was truncated.
            buf: vec![0u8; max_request_size + 1],
        }
    }

    /// Receive loop; returns once the relay stops running.
    pub(crate) fn run(mut self) {
        debug!("Control listener started");

        while self.shared.is_running() {
            match self.socket.recv_from(&mut self.buf) {
                Ok((len, peer)) => {
                    if !self.shared.is_running() {
                        break;
                    }
                    self.handle(&self.buf[..len], peer);
                }
                Err(e) if is_timeout(&e) => continue,
                Err(e) => {
                    if !self.shared.is_running() {
                        break;
                    }
                    // ICMP port-unreachable from an earlier send surfaces here
                    // on some platforms; it says nothing about this socket.
                    warn!(error = %e, "Control socket receive error");
                }
            }
        }

        debug!("Control listener shutting down");
    }

    fn handle(&self, payload: &[u8], peer: SocketAddr) {
        let stats = &self.shared.stats;
        let outcome = if payload.len() > self.max_request_size {
            Err(RequestError::Oversized {
                limit: self.max_request_size,
            })
        } else {
            apply_request(&self.shared, payload, peer)
        };

        match outcome {
            Ok((request, registration)) => {
                log_registration(&request, &registration, peer);
                match registration.kind {
                    RegistrationKind::Created => RelayStats::bump(&stats.subscriptions_created),
                    RegistrationKind::Updated { .. } => {
                        RelayStats::bump(&stats.subscriptions_updated)
                    }
                }
                if registration.high_water_crossed {
                    let registry = self.shared.registry.lock();
                    let (len, capacity) = (registry.len(), registry.capacity());
                    drop(registry);
                    warn!(
                        subscriptions = len,
                        capacity, "Subscription registry is approaching capacity"
                    );
                }
            }
            Err(e) => {
                RelayStats::bump(&stats.requests_rejected);
                match &e {
                    RequestError::Protocol(_) => warn!(
                        peer = %peer,
                        payload = %String::from_utf8_lossy(payload).trim_end(),
                        error = %e,
                        "Ignoring malformed registration request (expected <rigid_body_id>;<port>;<decimation>)"
                    ),
                    RequestError::Oversized { .. } => warn!(
                        peer = %peer,
                        error = %e,
                        "Ignoring oversized registration request"
                    ),
                    RequestError::UnknownRigidBody(id) => warn!(
                        peer = %peer,
                        rigid_body_id = id,
                        "Ignoring registration for rigid body not in current frame"
                    ),
                    RequestError::Registry(_) => {
                        RelayStats::bump(&stats.capacity_rejections);
                        warn!(peer = %peer, error = %e, "Refusing new subscription");
                    }
                }
            }
        }

        // Counted last so that observers of this counter see the full outcome.
        RelayStats::bump(&stats.requests_received);
    }
}

fn log_registration(request: &RegistrationRequest, registration: &Registration, peer: SocketAddr) {
    let destination = SocketAddr::new(peer.ip(), request.destination_port);
    match registration.kind {
        RegistrationKind::Created => info!(
            rigid_body_id = request.rigid_body_id,
            destination = %destination,
            decimation = request.decimation,
            slot = registration.index,
            "Subscription created"
        ),
        RegistrationKind::Updated { previous } if previous != 0 && request.decimation == 0 => info!(
            rigid_body_id = request.rigid_body_id,
            destination = %destination,
            slot = registration.index,
            "Subscription suppressed"
        ),
        RegistrationKind::Updated { previous } => info!(
            rigid_body_id = request.rigid_body_id,
            destination = %destination,
            previous,
            decimation = request.decimation,
            slot = registration.index,
            "Subscription updated"
        ),
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
