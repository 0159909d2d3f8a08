// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Latest pose of every tracked rigid body.
//!
//! The table is overwritten wholesale by each frame. It never grows past the
//! capacity chosen at startup; entries the producer reports beyond that bound
//! are dropped and counted in the [`IngestReport`].

use std::sync::Arc;

/// Position and orientation of one rigid body.
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    /// Rigid body ID (1..=65535, 0 is a placeholder)
    pub id: u16,
    /// Rigid body name as reported by the tracking system
    pub name: Arc<str>,
    /// Position (x, y, z)
    pub position: [f32; 3],
    /// Orientation quaternion (qx, qy, qz, qw), not normalized
    pub orientation: [f32; 4],
}

impl Pose {
    pub fn new(
        id: u16,
        name: impl Into<Arc<str>>,
        position: [f32; 3],
        orientation: [f32; 4],
    ) -> Self {
        Self {
            id,
            name: name.into(),
            position,
            orientation,
        }
    }

    /// A pose at the origin with the identity orientation.
    pub fn identity(id: u16, name: impl Into<Arc<str>>) -> Self {
        Self::new(id, name, [0.0; 3], [0.0, 0.0, 0.0, 1.0])
    }
}

/// Outcome of overwriting the table with one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Entries stored in the table.
    pub accepted: usize,
    /// Placeholder entries (id 0) skipped.
    pub discarded: usize,
    /// Entries dropped because the table was full.
    pub truncated: usize,
    /// Same frame index as the previous frame; the clock did not tick.
    pub repeated: bool,
}

/// Fixed-capacity pose table plus the frame clock.
#[derive(Debug)]
pub struct PoseTable {
    poses: Vec<Pose>,
    capacity: usize,
    frame_index: u64,
    sequence: u64,
}

impl PoseTable {
    /// Allocate a table holding at most `capacity` poses.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            poses: Vec::with_capacity(capacity),
            capacity,
            frame_index: 0,
            sequence: 0,
        }
    }

    /// Replace every entry with the poses of a frame.
    ///
    /// The clock ticks only when `frame_index` differs from the current one
    /// (or on the very first frame); a re-delivered index refreshes the
    /// entries without counting as a new frame.
    pub fn overwrite(&mut self, frame_index: u64, entries: &[Pose]) -> IngestReport {
        let mut report = IngestReport::default();
        self.poses.clear();

        for pose in entries {
            if pose.id == 0 {
                report.discarded += 1;
            } else if self.poses.len() < self.capacity {
                self.poses.push(pose.clone());
            } else {
                report.truncated += 1;
            }
        }

        report.accepted = self.poses.len();
        report.repeated = self.sequence != 0 && frame_index == self.frame_index;
        if !report.repeated {
            self.sequence += 1;
        }
        self.frame_index = frame_index;
        report
    }

    /// Valid entries of the current frame.
    pub fn poses(&self) -> &[Pose] {
        &self.poses
    }

    pub fn find(&self, id: u16) -> Option<&Pose> {
        self.poses.iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: u16) -> bool {
        self.find(id).is_some()
    }

    /// Number of valid entries.
    pub fn count(&self) -> usize {
        self.poses.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Producer frame number of the current contents.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Frame clock: number of distinct frames ingested so far.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}
