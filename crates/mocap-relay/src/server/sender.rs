// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fan-out sender.
//!
//! Waits for the frame clock, snapshots the registry, releases every lock,
//! then sends one datagram per due subscription. A failed send is logged and
//! counted; it never stops the remaining destinations or the loop.

use super::{RelayStats, Shared};
use crate::frame::{FrameSnapshot, FrameWait};
use crate::protocol::write_pose;
use crate::registry::Subscription;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Outbound datagram channel.
pub trait DatagramTransport: Send {
    fn send_datagram(&self, payload: &[u8], destination: SocketAddr) -> io::Result<usize>;
}

impl DatagramTransport for UdpSocket {
    fn send_datagram(&self, payload: &[u8], destination: SocketAddr) -> io::Result<usize> {
        self.send_to(payload, destination)
    }
}

/// Result of fanning one frame out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Datagrams handed to the transport.
    pub sent: usize,
    /// Sends that failed.
    pub failed: usize,
    /// Subscriptions not due this frame (suppressed, port 0, or decimated).
    pub skipped: usize,
    /// Due subscriptions whose rigid body is absent from the frame.
    pub missing: usize,
}

/// Send `frame` to every due subscription.
///
/// Must be called without holding any relay lock.
pub fn fan_out<T: DatagramTransport + ?Sized>(
    transport: &T,
    frame: &FrameSnapshot,
    subscriptions: &[Subscription],
    buf: &mut String,
    stats: &RelayStats,
) -> DispatchReport {
    let mut report = DispatchReport::default();

    for sub in subscriptions {
        if !sub.is_due(frame.frame_index) {
            report.skipped += 1;
            continue;
        }

        let Some(pose) = frame.find(sub.rigid_body_id) else {
            report.missing += 1;
            continue;
        };

        write_pose(buf, pose);
        let destination = sub.destination();
        match transport.send_datagram(buf.as_bytes(), destination) {
            Ok(n) => {
                report.sent += 1;
                stats.record_sent(n);
            }
            Err(e) => {
                report.failed += 1;
                RelayStats::bump(&stats.send_errors);
                warn!(
                    destination = %destination,
                    rigid_body_id = sub.rigid_body_id,
                    error = %e,
                    "Failed to send pose datagram"
                );
            }
        }
    }

    report
}

pub(crate) struct FanoutSender<T: DatagramTransport> {
    transport: T,
    shared: Arc<Shared>,
    stall_timeout: Duration,
}

impl<T: DatagramTransport> FanoutSender<T> {
    pub(crate) fn new(transport: T, shared: Arc<Shared>, stall_timeout: Duration) -> Self {
        Self {
            transport,
            shared,
            stall_timeout,
        }
    }

    /// Frame loop; returns once the frame store is closed.
    pub(crate) fn run(self) {
        debug!("Fan-out sender started");

        let stats = &self.shared.stats;
        let mut buf = String::with_capacity(128);
        let mut last_sequence = 0u64;
        let mut stalled = false;

        loop {
            match self
                .shared
                .frames
                .wait_for_advance(last_sequence, self.stall_timeout)
            {
                FrameWait::Advanced(frame) => {
                    if stalled {
                        stalled = false;
                        stats.set_stalled(false);
                        info!(frame_index = frame.frame_index, "Frame clock resumed");
                    }

                    let coalesced = frame.sequence.saturating_sub(last_sequence + 1);
                    if coalesced > 0 {
                        stats.frames_coalesced.fetch_add(coalesced, Ordering::Relaxed);
                    }
                    last_sequence = frame.sequence;

                    let subscriptions = self.shared.registry.lock().snapshot();
                    let report = fan_out(&self.transport, &frame, &subscriptions, &mut buf, stats);
                    RelayStats::bump(&stats.frames_dispatched);

                    if report.missing > 0 {
                        debug!(
                            frame_index = frame.frame_index,
                            missing = report.missing,
                            "Subscribed rigid bodies absent from frame"
                        );
                    }
                    trace!(
                        frame_index = frame.frame_index,
                        sent = report.sent,
                        failed = report.failed,
                        "Frame dispatched"
                    );
                }
                FrameWait::TimedOut => {
                    if !self.shared.is_running() {
                        break;
                    }
                    if !stalled {
                        stalled = true;
                        // Counter first: readers of the flag expect the event counted.
                        RelayStats::bump(&stats.stall_events);
                        stats.set_stalled(true);
                        if last_sequence == 0 {
                            warn!(
                                timeout = ?self.stall_timeout,
                                "No frame received from the producer yet"
                            );
                        } else {
                            warn!(
                                timeout = ?self.stall_timeout,
                                last_sequence,
                                "Frame clock stalled; fan-out paused until the producer resumes"
                            );
                        }
                    }
                }
                FrameWait::Closed => break,
            }
        }

        debug!("Fan-out sender shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode_pose;
    use crate::registry::SubscriptionKey;
    use crate::table::Pose;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::net::{IpAddr, Ipv4Addr};

    /// Records every datagram; fails sends to `fail_port`.
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(SocketAddr, String)>>,
        fail_port: Option<u16>,
    }

    impl DatagramTransport for RecordingTransport {
        fn send_datagram(&self, payload: &[u8], destination: SocketAddr) -> io::Result<usize> {
            if Some(destination.port()) == self.fail_port {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "unreachable"));
            }
            self.sent
                .lock()
                .push((destination, String::from_utf8_lossy(payload).into_owned()));
            Ok(payload.len())
        }
    }

    fn sub(id: u16, port: u16, decimation: u16) -> Subscription {
        Subscription::new(
            SubscriptionKey {
                rigid_body_id: id,
                destination_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
                destination_port: port,
            },
            decimation,
        )
    }

    fn frame(frame_index: u64, ids: &[u16]) -> FrameSnapshot {
        FrameSnapshot {
            sequence: frame_index,
            frame_index,
            poses: ids
                .iter()
                .map(|&id| Pose::new(id, format!("Body{}", id), [id as f32, 0.5, -1.0], [0.0, 0.0, 0.0, 1.0]))
                .collect(),
        }
    }

    #[test]
    fn test_due_set_matches_decimation() {
        let subs = vec![
            sub(1, 5001, 1),
            sub(1, 5002, 2),
            sub(2, 5003, 3),
            sub(2, 5004, 0),
            sub(2, 0, 1),
        ];
        let stats = RelayStats::new();
        let mut buf = String::new();

        for f in 0..12u64 {
            let transport = RecordingTransport::default();
            fan_out(&transport, &frame(f, &[1, 2]), &subs, &mut buf, &stats);

            let got: HashSet<u16> = transport.sent.lock().iter().map(|(a, _)| a.port()).collect();
            let expected: HashSet<u16> = subs
                .iter()
                .filter(|s| {
                    s.decimation != 0
                        && s.destination_port != 0
                        && f % u64::from(s.decimation) == 0
                })
                .map(|s| s.destination_port)
                .collect();
            assert_eq!(got, expected, "frame {}", f);
            assert_eq!(transport.sent.lock().len(), expected.len(), "one datagram each");
        }
    }

    #[test]
    fn test_payload_is_encoded_pose() {
        let transport = RecordingTransport::default();
        let stats = RelayStats::new();
        let mut buf = String::new();

        fan_out(&transport, &frame(4, &[9]), &[sub(9, 7000, 2)], &mut buf, &stats);

        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 1);
        let pose = decode_pose(&sent[0].1).unwrap();
        assert_eq!(pose.id, 9);
        assert_eq!(pose.position, [9.0, 0.5, -1.0]);
        assert_eq!(stats.snapshot().bytes_sent, sent[0].1.len() as u64);
    }

    #[test]
    fn test_send_failure_is_isolated() {
        let transport = RecordingTransport {
            fail_port: Some(6002),
            ..Default::default()
        };
        let stats = RelayStats::new();
        let mut buf = String::new();
        let subs = vec![sub(1, 6001, 1), sub(1, 6002, 1), sub(1, 6003, 1)];

        let report = fan_out(&transport, &frame(1, &[1]), &subs, &mut buf, &stats);

        assert_eq!(report.sent, 2);
        assert_eq!(report.failed, 1);
        let ports: Vec<u16> = transport.sent.lock().iter().map(|(a, _)| a.port()).collect();
        assert_eq!(ports, vec![6001, 6003]);
        assert_eq!(stats.snapshot().send_errors, 1);
    }

    #[test]
    fn test_missing_rigid_body_not_sent() {
        let transport = RecordingTransport::default();
        let stats = RelayStats::new();
        let mut buf = String::new();

        let report = fan_out(&transport, &frame(1, &[1]), &[sub(5, 6000, 1)], &mut buf, &stats);

        assert_eq!(report.missing, 1);
        assert!(transport.sent.lock().is_empty());
    }

    #[test]
    fn test_skipped_counts_undue() {
        let transport = RecordingTransport::default();
        let stats = RelayStats::new();
        let mut buf = String::new();
        let subs = vec![sub(1, 6000, 0), sub(1, 0, 1), sub(1, 6001, 2)];

        let report = fan_out(&transport, &frame(3, &[1]), &subs, &mut buf, &stats);

        assert_eq!(report.skipped, 3);
        assert_eq!(report.sent, 0);
    }
}
