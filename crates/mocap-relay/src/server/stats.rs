// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay statistics.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters shared by the producer path, listener and sender.
#[derive(Debug)]
pub struct RelayStats {
    /// Frames written to the pose table.
    pub frames_ingested: AtomicU64,
    /// Frames scanned by the fan-out sender.
    pub frames_dispatched: AtomicU64,
    /// Frames overwritten before the sender saw them.
    pub frames_coalesced: AtomicU64,
    /// Frames re-delivered with an unchanged frame index.
    pub frames_repeated: AtomicU64,
    /// Poses dropped because the table was full.
    pub poses_truncated: AtomicU64,
    /// Topology change notifications from the producer.
    pub topology_changes: AtomicU64,
    /// Registration datagrams processed.
    pub requests_received: AtomicU64,
    /// Registration datagrams rejected (any reason).
    pub requests_rejected: AtomicU64,
    /// Subscriptions appended.
    pub subscriptions_created: AtomicU64,
    /// Subscriptions whose decimation was replaced.
    pub subscriptions_updated: AtomicU64,
    /// New subscriptions refused because the registry was full.
    pub capacity_rejections: AtomicU64,
    /// Pose datagrams sent.
    pub datagrams_sent: AtomicU64,
    /// Pose bytes sent.
    pub bytes_sent: AtomicU64,
    /// Failed sends.
    pub send_errors: AtomicU64,
    /// Times the frame clock was reported stalled.
    pub stall_events: AtomicU64,
    /// Frame clock currently stalled.
    pub stalled: AtomicBool,
    /// Relay start time.
    pub started: Instant,
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            frames_ingested: AtomicU64::new(0),
            frames_dispatched: AtomicU64::new(0),
            frames_coalesced: AtomicU64::new(0),
            frames_repeated: AtomicU64::new(0),
            poses_truncated: AtomicU64::new(0),
            topology_changes: AtomicU64::new(0),
            requests_received: AtomicU64::new(0),
            requests_rejected: AtomicU64::new(0),
            subscriptions_created: AtomicU64::new(0),
            subscriptions_updated: AtomicU64::new(0),
            capacity_rejections: AtomicU64::new(0),
            datagrams_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
            stall_events: AtomicU64::new(0),
            stalled: AtomicBool::new(false),
            started: Instant::now(),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sent(&self, bytes: usize) {
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::Relaxed);
    }

    /// Copy the counters.
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            frames_ingested: self.frames_ingested.load(Ordering::Relaxed),
            frames_dispatched: self.frames_dispatched.load(Ordering::Relaxed),
            frames_coalesced: self.frames_coalesced.load(Ordering::Relaxed),
            frames_repeated: self.frames_repeated.load(Ordering::Relaxed),
            poses_truncated: self.poses_truncated.load(Ordering::Relaxed),
            topology_changes: self.topology_changes.load(Ordering::Relaxed),
            requests_received: self.requests_received.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            subscriptions_created: self.subscriptions_created.load(Ordering::Relaxed),
            subscriptions_updated: self.subscriptions_updated.load(Ordering::Relaxed),
            capacity_rejections: self.capacity_rejections.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            stall_events: self.stall_events.load(Ordering::Relaxed),
            frame_clock_stalled: self.stalled.load(Ordering::Relaxed),
            uptime: self.started.elapsed(),
            ..Default::default()
        }
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the relay.
///
/// The table and registry gauges are filled in by [`crate::Relay::stats`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayStatsSnapshot {
    pub frames_ingested: u64,
    pub frames_dispatched: u64,
    pub frames_coalesced: u64,
    pub frames_repeated: u64,
    pub poses_truncated: u64,
    pub topology_changes: u64,
    pub requests_received: u64,
    pub requests_rejected: u64,
    pub subscriptions_created: u64,
    pub subscriptions_updated: u64,
    pub capacity_rejections: u64,
    pub datagrams_sent: u64,
    pub bytes_sent: u64,
    pub send_errors: u64,
    pub stall_events: u64,
    pub frame_clock_stalled: bool,
    pub uptime: Duration,
    /// Producer frame number of the current table contents.
    pub frame_index: u64,
    /// Valid poses in the table.
    pub tracked_rigid_bodies: usize,
    /// Allocated subscription slots.
    pub subscriptions: usize,
    /// Slots with a nonzero decimation.
    pub active_subscriptions: usize,
}
