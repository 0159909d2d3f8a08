// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared pose table with frame-arrival notification.
//!
//! # Architecture
//! - One mutex guards the whole table (entries, count, frame index, clock),
//!   so readers only ever see complete frames
//! - A condvar is signalled after each ingest; the fan-out sender blocks on
//!   it instead of polling the clock
//! - `close()` releases every waiter for shutdown

use crate::table::{IngestReport, Pose, PoseTable};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Copy of one complete frame, taken under the table lock.
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    /// Frame clock value of this frame.
    pub sequence: u64,
    /// Producer frame number, used for decimation.
    pub frame_index: u64,
    /// Valid poses of this frame.
    pub poses: Vec<Pose>,
}

impl FrameSnapshot {
    /// Linear search by rigid body ID.
    pub fn find(&self, id: u16) -> Option<&Pose> {
        self.poses.iter().find(|p| p.id == id)
    }
}

/// Result of waiting for the frame clock.
#[derive(Debug)]
pub enum FrameWait {
    /// A newer frame is available.
    Advanced(FrameSnapshot),
    /// No new frame before the timeout.
    TimedOut,
    /// The store was closed.
    Closed,
}

#[derive(Debug)]
struct State {
    table: PoseTable,
    closed: bool,
}

/// Pose table shared between the producer, listener and sender.
#[derive(Debug)]
pub struct FrameStore {
    state: Mutex<State>,
    advanced: Condvar,
}

impl FrameStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                table: PoseTable::with_capacity(capacity),
                closed: false,
            }),
            advanced: Condvar::new(),
        }
    }

    /// Overwrite the table with a frame and, if the clock ticked, wake the
    /// waiters.
    pub fn ingest_frame(&self, frame_index: u64, entries: &[Pose]) -> IngestReport {
        let report = self.state.lock().table.overwrite(frame_index, entries);
        if !report.repeated {
            self.advanced.notify_all();
        }
        report
    }

    /// Copy the current frame.
    pub fn snapshot(&self) -> FrameSnapshot {
        snapshot_of(&self.state.lock().table)
    }

    /// Whether the current frame tracks `id`.
    pub fn contains(&self, id: u16) -> bool {
        self.state.lock().table.contains(id)
    }

    /// Current frame clock value.
    pub fn sequence(&self) -> u64 {
        self.state.lock().table.sequence()
    }

    /// Block until the clock moves past `last_sequence`, the store is closed,
    /// or `timeout` elapses.
    pub fn wait_for_advance(&self, last_sequence: u64, timeout: Duration) -> FrameWait {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        loop {
            if state.closed {
                return FrameWait::Closed;
            }
            if state.table.sequence() != last_sequence {
                return FrameWait::Advanced(snapshot_of(&state.table));
            }
            if self
                .advanced
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                // Last look: an ingest may have raced the timeout.
                if state.closed {
                    return FrameWait::Closed;
                }
                if state.table.sequence() != last_sequence {
                    return FrameWait::Advanced(snapshot_of(&state.table));
                }
                return FrameWait::TimedOut;
            }
        }
    }

    /// Release all current and future waiters.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.advanced.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

fn snapshot_of(table: &PoseTable) -> FrameSnapshot {
    FrameSnapshot {
        sequence: table.sequence(),
        frame_index: table.frame_index(),
        poses: table.poses().to_vec(),
    }
}
