// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end relay tests over loopback UDP.

use mocap_relay::{
    decode_pose, FrameSink, Pose, Relay, RelayConfig, RelayStatsSnapshot, SubscriptionState,
};
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

fn wait_for(relay: &Relay, cond: impl Fn(&RelayStatsSnapshot) -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond(&relay.stats()) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

/// Pose whose x coordinate carries the frame index.
fn body(id: u16, frame_index: u64) -> Pose {
    Pose::new(
        id,
        format!("Body{}", id),
        [frame_index as f32, 0.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    )
}

/// Ingest one frame and wait until the sender has fanned it out.
fn push_frame(relay: &Relay, frame_index: u64, ids: &[u16]) {
    let before = relay.stats().frames_dispatched;
    let poses: Vec<Pose> = ids.iter().map(|&id| body(id, frame_index)).collect();
    relay.ingest().ingest_frame(frame_index, &poses);
    assert!(
        wait_for(relay, |s| s.frames_dispatched > before),
        "frame {} not dispatched",
        frame_index
    );
}

struct Subscriber {
    socket: UdpSocket,
}

impl Subscriber {
    fn new() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        Self { socket }
    }

    fn port(&self) -> u16 {
        self.socket.local_addr().unwrap().port()
    }

    /// Send a request and wait until the relay has processed it.
    fn request(&self, relay: &Relay, payload: &str) {
        let before = relay.stats().requests_received;
        self.socket
            .send_to(payload.as_bytes(), relay.control_addr())
            .unwrap();
        assert!(
            wait_for(relay, |s| s.requests_received > before),
            "request {:?} not processed",
            payload
        );
    }

    /// Frame indices of every pose datagram queued on the socket.
    fn drain(&self) -> Vec<(u16, u64)> {
        let mut buf = [0u8; 512];
        let mut out = Vec::new();
        while let Ok((len, _)) = self.socket.recv_from(&mut buf) {
            let text = std::str::from_utf8(&buf[..len]).unwrap();
            let pose = decode_pose(text).unwrap();
            out.push((pose.id, pose.position[0] as u64));
        }
        out
    }
}

fn loopback(max_subscriptions: usize) -> RelayConfig {
    RelayConfig {
        max_subscriptions,
        ..RelayConfig::loopback()
    }
}

#[test]
fn decimated_stream_reaches_subscriber() {
    let relay = Relay::start(loopback(8)).unwrap();
    push_frame(&relay, 1, &[1, 2]);

    let sub = Subscriber::new();
    sub.request(&relay, &format!("2;{};2", sub.port()));
    assert_eq!(relay.stats().subscriptions_created, 1);

    for frame in 2..=7 {
        push_frame(&relay, frame, &[1, 2]);
    }

    assert_eq!(sub.drain(), vec![(2, 2), (2, 4), (2, 6)]);
    relay.shutdown().unwrap();
}

#[test]
fn datagram_has_pose_wire_format() {
    let relay = Relay::start(loopback(8)).unwrap();
    let pose = Pose::new(7, "Rigid1", [1.5, -2.25, 0.0], [0.0, 0.0, 0.0, 1.0]);
    relay.ingest().ingest_frame(1, &[pose.clone()]);

    let sub = Subscriber::new();
    sub.request(&relay, &format!("7;{};1", sub.port()));

    let before = relay.stats().frames_dispatched;
    relay.ingest().ingest_frame(2, &[pose]);
    assert!(wait_for(&relay, |s| s.frames_dispatched > before));

    let mut buf = [0u8; 512];
    let (len, _) = sub.socket.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..len], b"7;1.5,-2.25,0;0,0,0,1;Rigid1\n");
}

#[test]
fn repeated_frame_index_is_sent_once() {
    let relay = Relay::start(loopback(8)).unwrap();
    push_frame(&relay, 1, &[1]);

    let sub = Subscriber::new();
    sub.request(&relay, &format!("1;{};2", sub.port()));

    push_frame(&relay, 4, &[1]);
    let poses = [body(1, 4)];
    relay.ingest().ingest_frame(4, &poses);
    relay.ingest().ingest_frame(4, &poses);
    assert!(wait_for(&relay, |s| s.frames_repeated == 2));

    // A later frame flushes anything the repeats might have queued.
    push_frame(&relay, 6, &[1]);
    assert_eq!(sub.drain(), vec![(1, 4), (1, 6)]);
}

#[test]
fn repeated_frame_index_does_not_hide_a_stall() {
    let config = RelayConfig {
        stall_timeout_ms: 50,
        ..RelayConfig::loopback()
    };
    let relay = Relay::start(config).unwrap();
    push_frame(&relay, 9, &[1]);

    let poses = [body(1, 9)];
    let deadline = Instant::now() + WAIT;
    while !relay.stats().frame_clock_stalled && Instant::now() < deadline {
        relay.ingest().ingest_frame(9, &poses);
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(relay.stats().frame_clock_stalled);
}

#[test]
fn suppress_and_resume_keep_one_slot() {
    let relay = Relay::start(loopback(8)).unwrap();
    push_frame(&relay, 1, &[3]);

    let sub = Subscriber::new();
    let port = sub.port();
    sub.request(&relay, &format!("3;{};1", port));
    push_frame(&relay, 2, &[3]);
    assert_eq!(sub.drain(), vec![(3, 2)]);

    sub.request(&relay, &format!("3;{};0", port));
    let subs = relay.subscriptions();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].state(), SubscriptionState::Suppressed);
    for frame in 3..=5 {
        push_frame(&relay, frame, &[3]);
    }
    assert!(sub.drain().is_empty());

    sub.request(&relay, &format!("3;{};1", port));
    push_frame(&relay, 6, &[3]);
    assert_eq!(sub.drain(), vec![(3, 6)]);

    let stats = relay.stats();
    assert_eq!(stats.subscriptions, 1);
    assert_eq!(stats.subscriptions_created, 1);
    assert_eq!(stats.subscriptions_updated, 2);
}

#[test]
fn each_subscriber_gets_only_its_rigid_body() {
    let relay = Relay::start(loopback(8)).unwrap();
    push_frame(&relay, 1, &[1, 2, 3]);

    let a = Subscriber::new();
    let b = Subscriber::new();
    a.request(&relay, &format!("1;{};1", a.port()));
    b.request(&relay, &format!("3;{};3", b.port()));

    for frame in 2..=6 {
        push_frame(&relay, frame, &[1, 2, 3]);
    }

    assert_eq!(a.drain(), vec![(1, 2), (1, 3), (1, 4), (1, 5), (1, 6)]);
    assert_eq!(b.drain(), vec![(3, 3), (3, 6)]);
}

#[test]
fn full_registry_rejects_new_keys_only() {
    let relay = Relay::start(loopback(2)).unwrap();
    push_frame(&relay, 1, &[1]);

    let subs: Vec<Subscriber> = (0..3).map(|_| Subscriber::new()).collect();
    for sub in &subs {
        sub.request(&relay, &format!("1;{};1", sub.port()));
    }

    let stats = relay.stats();
    assert_eq!(stats.subscriptions, 2);
    assert_eq!(stats.capacity_rejections, 1);

    // Updating an existing key still works when full.
    subs[0].request(&relay, &format!("1;{};2", subs[0].port()));
    assert_eq!(relay.stats().subscriptions_updated, 1);

    push_frame(&relay, 2, &[1]);
    assert_eq!(subs[0].drain(), vec![(1, 2)]);
    assert_eq!(subs[1].drain(), vec![(1, 2)]);
    assert!(subs[2].drain().is_empty());
}

#[test]
fn unknown_rigid_body_is_not_registered() {
    let relay = Relay::start(loopback(8)).unwrap();
    push_frame(&relay, 1, &[1, 2]);

    let sub = Subscriber::new();
    sub.request(&relay, &format!("99;{};1", sub.port()));

    let stats = relay.stats();
    assert_eq!(stats.requests_rejected, 1);
    assert_eq!(stats.subscriptions, 0);
}

#[test]
fn malformed_requests_do_not_stop_the_listener() {
    let relay = Relay::start(loopback(8)).unwrap();
    push_frame(&relay, 1, &[1]);

    let sub = Subscriber::new();
    sub.request(&relay, "garbage");
    sub.request(&relay, "1;2");
    sub.request(&relay, "1;70000;1");
    sub.request(&relay, &format!("1;{};1\n", sub.port()));

    let stats = relay.stats();
    assert_eq!(stats.requests_received, 4);
    assert_eq!(stats.requests_rejected, 3);
    assert_eq!(stats.subscriptions_created, 1);
}

#[test]
fn oversized_request_is_not_truncated_into_a_valid_one() {
    let config = RelayConfig {
        max_request_size: 32,
        ..RelayConfig::loopback()
    };
    let relay = Relay::start(config).unwrap();
    push_frame(&relay, 1, &[1]);

    let sub = Subscriber::new();
    sub.request(&relay, &format!("1;{};1{}", sub.port(), " ".repeat(64)));

    let stats = relay.stats();
    assert_eq!(stats.requests_rejected, 1);
    assert_eq!(stats.subscriptions, 0);
}

#[test]
fn stall_is_reported_and_cleared() {
    let config = RelayConfig {
        stall_timeout_ms: 50,
        ..RelayConfig::loopback()
    };
    let relay = Relay::start(config).unwrap();

    assert!(wait_for(&relay, |s| s.frame_clock_stalled));
    assert_eq!(relay.stats().stall_events, 1);

    push_frame(&relay, 1, &[1]);
    assert!(!relay.stats().frame_clock_stalled);
}

#[test]
fn shutdown_is_prompt() {
    let relay = Relay::start(RelayConfig::loopback()).unwrap();
    let control: SocketAddr = relay.control_addr();

    let started = Instant::now();
    relay.shutdown().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    // The port is released once the relay is gone.
    let rebound = Relay::start(RelayConfig {
        control_port: control.port(),
        ..RelayConfig::loopback()
    });
    assert!(rebound.is_ok());
}
