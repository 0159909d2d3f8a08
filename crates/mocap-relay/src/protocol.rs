// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay wire formats.
//!
//! Both directions are plain ASCII so that traffic can be read off the wire.
//!
//! Registration request (subscriber -> relay, control port):
//! ```text
//! <rigid_body_id>;<destination_port>;<decimation>
//! ```
//!
//! Pose datagram (relay -> subscriber, one rigid body per datagram):
//! ```text
//! <rigid_body_id>;<x>,<y>,<z>;<qx>,<qy>,<qz>,<qw>;<name>\n
//! ```
//!
//! Numbers always use `.` as the decimal separator, independent of locale.

use crate::table::Pose;
use std::fmt::{self, Write as _};
use std::str::FromStr;
use thiserror::Error;

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("payload is not ASCII/UTF-8 text")]
    NotText,

    #[error("expected {expected} fields separated by ';', found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("field {field} is not an unsigned 16-bit integer: {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("field {field} has {found} components, expected {expected}")]
    VectorLength {
        field: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("field {field} contains an invalid number: {value:?}")]
    InvalidFloat { field: &'static str, value: String },
}

/// A subscriber's request to stream one rigid body to itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub rigid_body_id: u16,
    /// UDP port on the sender's host that should receive the stream
    pub destination_port: u16,
    /// Send every Nth frame, 0 suppresses
    pub decimation: u16,
}

impl RegistrationRequest {
    pub fn new(rigid_body_id: u16, destination_port: u16, decimation: u16) -> Self {
        Self {
            rigid_body_id,
            destination_port,
            decimation,
        }
    }

    /// Parse a raw request datagram.
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        std::str::from_utf8(payload)
            .map_err(|_| ProtocolError::NotText)?
            .parse()
    }
}

impl FromStr for RegistrationRequest {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(';').collect();
        if fields.len() != 3 {
            return Err(ProtocolError::FieldCount {
                expected: 3,
                found: fields.len(),
            });
        }

        Ok(Self {
            rigid_body_id: parse_u16("rigid_body_id", fields[0])?,
            destination_port: parse_u16("destination_port", fields[1])?,
            decimation: parse_u16("decimation", fields[2])?,
        })
    }
}

impl fmt::Display for RegistrationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{};{};{}",
            self.rigid_body_id, self.destination_port, self.decimation
        )
    }
}

fn parse_u16(field: &'static str, raw: &str) -> Result<u16, ProtocolError> {
    // Tools like `nc` append a newline; surrounding whitespace is not data.
    let trimmed = raw.trim_matches(|c: char| c.is_ascii_whitespace());
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::InvalidField {
            field,
            value: raw.to_string(),
        });
    }
    trimmed.parse().map_err(|_| ProtocolError::InvalidField {
        field,
        value: raw.to_string(),
    })
}

/// Encode one pose datagram.
pub fn encode_pose(pose: &Pose) -> String {
    let mut buf = String::with_capacity(64 + pose.name.len());
    write_pose(&mut buf, pose);
    buf
}

/// Encode one pose datagram into `buf`, replacing its contents.
pub fn write_pose(buf: &mut String, pose: &Pose) {
    let [x, y, z] = pose.position;
    let [qx, qy, qz, qw] = pose.orientation;
    buf.clear();
    // Writing into a String cannot fail.
    let _ = writeln!(
        buf,
        "{};{},{},{};{},{},{},{};{}",
        pose.id, x, y, z, qx, qy, qz, qw, pose.name
    );
}

/// Decode one pose datagram.
///
/// The name is everything after the third `;`, so names containing `;`
/// survive; the trailing newline is optional.
pub fn decode_pose(datagram: &str) -> Result<Pose, ProtocolError> {
    let line = datagram.strip_suffix('\n').unwrap_or(datagram);
    let fields: Vec<&str> = line.splitn(4, ';').collect();
    if fields.len() != 4 {
        return Err(ProtocolError::FieldCount {
            expected: 4,
            found: fields.len(),
        });
    }

    let id = parse_u16("rigid_body_id", fields[0])?;
    let position = parse_floats::<3>("position", fields[1])?;
    let orientation = parse_floats::<4>("orientation", fields[2])?;

    Ok(Pose::new(id, fields[3], position, orientation))
}

fn parse_floats<const N: usize>(
    field: &'static str,
    raw: &str,
) -> Result<[f32; N], ProtocolError> {
    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() != N {
        return Err(ProtocolError::VectorLength {
            field,
            expected: N,
            found: parts.len(),
        });
    }

    let mut out = [0.0f32; N];
    for (slot, part) in out.iter_mut().zip(parts) {
        *slot = part.trim().parse().map_err(|_| ProtocolError::InvalidFloat {
            field,
            value: part.to_string(),
        })?;
    }
    Ok(out)
}
