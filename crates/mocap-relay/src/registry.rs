// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscription registry.
//!
//! Append-only and bounded: a slot, once allocated, lives until shutdown.
//! Setting `decimation = 0` suppresses a stream without freeing its slot.

use std::net::{IpAddr, SocketAddr};
use thiserror::Error;

/// Identity of a subscription: what to send and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub rigid_body_id: u16,
    pub destination_ip: IpAddr,
    pub destination_port: u16,
}

/// Externally visible state of a subscription slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Streaming every `decimation`-th frame.
    Active,
    /// Slot kept, nothing sent (`decimation == 0`).
    Suppressed,
}

/// A registered (rigid body, destination, rate) record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub rigid_body_id: u16,
    pub destination_ip: IpAddr,
    pub destination_port: u16,
    /// Send when `frame_index % decimation == 0`; 0 suppresses.
    pub decimation: u16,
}

impl Subscription {
    pub fn new(key: SubscriptionKey, decimation: u16) -> Self {
        Self {
            rigid_body_id: key.rigid_body_id,
            destination_ip: key.destination_ip,
            destination_port: key.destination_port,
            decimation,
        }
    }

    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey {
            rigid_body_id: self.rigid_body_id,
            destination_ip: self.destination_ip,
            destination_port: self.destination_port,
        }
    }

    pub fn destination(&self) -> SocketAddr {
        SocketAddr::new(self.destination_ip, self.destination_port)
    }

    pub fn state(&self) -> SubscriptionState {
        if self.decimation == 0 {
            SubscriptionState::Suppressed
        } else {
            SubscriptionState::Active
        }
    }

    /// Whether this subscription gets a datagram for `frame_index`.
    pub fn is_due(&self, frame_index: u64) -> bool {
        self.decimation != 0
            && self.destination_port != 0
            && frame_index % u64::from(self.decimation) == 0
    }
}

/// What a successful registration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationKind {
    /// A new slot was appended.
    Created,
    /// An existing slot's decimation was replaced.
    Updated { previous: u16 },
}

/// Result of [`SubscriptionRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// Slot index of the subscription.
    pub index: usize,
    pub kind: RegistrationKind,
    /// Set once, on the append that first reached the high-water mark.
    pub high_water_crossed: bool,
}

/// Registry errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("subscription registry full ({capacity} slots)")]
    CapacityExceeded { capacity: usize },
}

/// Bounded, append-only set of subscriptions.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    entries: Vec<Subscription>,
    capacity: usize,
    high_water: usize,
    high_water_reported: bool,
}

impl SubscriptionRegistry {
    /// Create an empty registry with `capacity` slots.
    ///
    /// The high-water mark is `ceil(capacity * high_water_ratio)`, at least 1.
    pub fn new(capacity: usize, high_water_ratio: f64) -> Self {
        let high_water = ((capacity as f64) * high_water_ratio).ceil() as usize;
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            high_water: high_water.clamp(1, capacity.max(1)),
            high_water_reported: false,
        }
    }

    /// Register a subscription or update the decimation of an existing one.
    ///
    /// A key that is already present is always updated in place, even when
    /// the registry is full. A new key is refused once every slot is taken;
    /// existing entries are left untouched.
    pub fn register(
        &mut self,
        key: SubscriptionKey,
        decimation: u16,
    ) -> Result<Registration, RegistryError> {
        if let Some(index) = self.position(&key) {
            let entry = &mut self.entries[index];
            let previous = entry.decimation;
            entry.decimation = decimation;
            return Ok(Registration {
                index,
                kind: RegistrationKind::Updated { previous },
                high_water_crossed: false,
            });
        }

        if self.entries.len() >= self.capacity {
            return Err(RegistryError::CapacityExceeded {
                capacity: self.capacity,
            });
        }

        let index = self.entries.len();
        self.entries.push(Subscription::new(key, decimation));

        let high_water_crossed = !self.high_water_reported && self.entries.len() >= self.high_water;
        if high_water_crossed {
            self.high_water_reported = true;
        }

        Ok(Registration {
            index,
            kind: RegistrationKind::Created,
            high_water_crossed,
        })
    }

    fn position(&self, key: &SubscriptionKey) -> Option<usize> {
        self.entries.iter().position(|s| s.key() == *key)
    }

    pub fn get(&self, key: &SubscriptionKey) -> Option<&Subscription> {
        self.position(key).map(|i| &self.entries[i])
    }

    /// All slots in allocation order.
    pub fn entries(&self) -> &[Subscription] {
        &self.entries
    }

    /// Copy of all slots, for use outside the registry lock.
    pub fn snapshot(&self) -> Vec<Subscription> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Number of slots currently streaming.
    pub fn active_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|s| s.state() == SubscriptionState::Active)
            .count()
    }
}
