// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame producers.
//!
//! A producer owns the tracking source and pushes one complete frame at a
//! time into a [`FrameSink`]. [`SyntheticProducer`] generates orbiting rigid
//! bodies so the relay can run without tracking hardware.

use crate::table::{IngestReport, Pose};
use std::f32::consts::TAU;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Receiver of tracking frames.
pub trait FrameSink: Send + Sync {
    /// Replace the current frame with `poses`.
    fn ingest_frame(&self, frame_index: u64, poses: &[Pose]) -> IngestReport;

    /// The set of tracked rigid bodies or their names changed; the next
    /// frame carries the refreshed list.
    fn topology_changed(&self);
}

impl<S: FrameSink + ?Sized> FrameSink for Arc<S> {
    fn ingest_frame(&self, frame_index: u64, poses: &[Pose]) -> IngestReport {
        (**self).ingest_frame(frame_index, poses)
    }

    fn topology_changed(&self) {
        (**self).topology_changed()
    }
}

/// Rigid bodies orbiting the origin at a fixed frame rate.
///
/// Body `n` (ids `1..=bodies`, named `RigidBody<n>`) circles at radius
/// `0.5 * n` metres, 1 m above the floor (y-up), completing one orbit every
/// `4 + n` seconds and always facing along its direction of travel.
#[derive(Debug, Clone)]
pub struct SyntheticProducer {
    names: Vec<Arc<str>>,
    rate_hz: u32,
}

impl SyntheticProducer {
    pub fn new(bodies: u16, rate_hz: u32) -> Self {
        Self {
            names: (1..=bodies)
                .map(|id| Arc::from(format!("RigidBody{}", id)))
                .collect(),
            rate_hz: rate_hz.max(1),
        }
    }

    pub fn bodies(&self) -> usize {
        self.names.len()
    }

    pub fn rate_hz(&self) -> u32 {
        self.rate_hz
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.rate_hz
    }

    /// Fill `out` with the poses of `frame_index`.
    pub fn frame(&self, frame_index: u64, out: &mut Vec<Pose>) {
        out.clear();
        let t = frame_index as f64 / f64::from(self.rate_hz);

        for (i, name) in self.names.iter().enumerate() {
            let n = (i + 1) as f32;
            let period = 4.0 + f64::from(n);
            let angle = (t / period).fract() as f32 * TAU;
            let radius = 0.5 * n;

            let position = [radius * angle.cos(), 1.0, radius * angle.sin()];
            // Heading is tangent to the circle: rotate about +Y by -angle.
            let half = -angle / 2.0;
            let orientation = [0.0, half.sin(), 0.0, half.cos()];

            out.push(Pose::new((i + 1) as u16, name.clone(), position, orientation));
        }
    }

    /// Run on a dedicated thread until the handle is stopped.
    pub fn spawn<S: FrameSink + 'static>(self, sink: S) -> io::Result<ProducerHandle> {
        let running = Arc::new(AtomicBool::new(true));
        let frames = Arc::new(AtomicU64::new(0));

        let handle = {
            let running = running.clone();
            let frames = frames.clone();
            thread::Builder::new()
                .name("mocap-relay-producer".into())
                .spawn(move || self.run(&sink, &running, &frames))?
        };

        Ok(ProducerHandle {
            running,
            frames,
            handle: Some(handle),
        })
    }

    fn run<S: FrameSink>(&self, sink: &S, running: &AtomicBool, frames: &AtomicU64) {
        info!(
            bodies = self.bodies(),
            rate_hz = self.rate_hz,
            "Synthetic producer started"
        );
        sink.topology_changed();

        let interval = self.frame_interval();
        let mut poses = Vec::with_capacity(self.bodies());
        let mut frame_index = 1u64;
        let mut next = Instant::now();

        while running.load(Ordering::SeqCst) {
            self.frame(frame_index, &mut poses);
            sink.ingest_frame(frame_index, &poses);
            frames.fetch_add(1, Ordering::Relaxed);
            frame_index += 1;

            next += interval;
            let now = Instant::now();
            if next > now {
                thread::sleep(next - now);
            } else {
                // Behind schedule: don't try to catch up with a burst.
                next = now;
            }
        }

        debug!(frames = frame_index - 1, "Synthetic producer stopped");
    }
}

/// Handle of a spawned producer thread.
pub struct ProducerHandle {
    running: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl ProducerHandle {
    /// Frames delivered so far.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Stop the thread and return the number of frames delivered.
    pub fn stop(mut self) -> u64 {
        self.halt();
        self.frames()
    }

    fn halt(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ProducerHandle {
    fn drop(&mut self) {
        self.halt();
    }
}
