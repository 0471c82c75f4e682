// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Log-record headers and the `⟨size⟩⟨type⟩⟨body⟩` message envelopes that
//! travel inside them.
//!
//! The writers here take the caller's buffer and a cursor, check capacity
//! before every write, and return the advanced cursor. The readers borrow
//! out of a fully-read record payload and never copy.

use log::*;

use std::io::{self, Read, Write};

use crate::varint;
use crate::{MessageType, ProtocolError};

/// Fixed size of the header that prefixes every inbound log record.
pub const LOG_HEADER_SIZE: usize = 24;

/// The fixed-width, little-endian header of one log record.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    /// Coordinator's commit sequence.
    pub commit_id: i32,

    /// Bytes of the whole record, header included.
    pub total_size: i32,

    /// Additive per-byte checksum over the record payload.
    pub checksum: i64,

    /// Monotonic record sequence.
    pub seq_id: i64,
}

impl LogHeader {
    pub fn from_bytes(bytes: &[u8; LOG_HEADER_SIZE]) -> Self {
        Self {
            commit_id: i32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            total_size: i32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            checksum: i64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            seq_id: i64::from_le_bytes(bytes[16..24].try_into().unwrap()),
        }
    }

    pub fn to_bytes(&self) -> [u8; LOG_HEADER_SIZE] {
        let mut bytes = [0u8; LOG_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.commit_id.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.total_size.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.checksum.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.seq_id.to_le_bytes());
        bytes
    }

    /// Read exactly one header from the stream. A short read surfaces as
    /// `io::ErrorKind::UnexpectedEof`.
    pub fn read_from<R: Read>(stream: &mut R) -> io::Result<Self> {
        let mut bytes = [0u8; LOG_HEADER_SIZE];
        stream.read_exact(&mut bytes)?;
        Ok(Self::from_bytes(&bytes))
    }

    pub fn write_to<W: Write>(&self, stream: &mut W) -> io::Result<()> {
        stream.write_all(&self.to_bytes())
    }

    /// Bytes of payload that follow this header on the stream. A record
    /// shorter than its own header is unparseable.
    pub fn payload_size(&self) -> Result<usize, ProtocolError> {
        if (self.total_size as i64) < LOG_HEADER_SIZE as i64 {
            return Err(ProtocolError::SizeMismatch {
                expected: LOG_HEADER_SIZE,
                actual: self.total_size.max(0) as usize,
            });
        }
        Ok(self.total_size as usize - LOG_HEADER_SIZE)
    }
}

/// The additive checksum carried in log-record headers: every payload byte
/// zero-extended and summed with wraparound.
pub fn additive_checksum(bytes: &[u8]) -> i64 {
    bytes.iter().fold(0i64, |sum, &b| sum.wrapping_add(b as i64))
}

/// One `⟨size⟩⟨type⟩⟨body⟩` envelope, borrowed out of a record payload.
///
/// `size` counts the type byte plus body, never the size varint itself.
#[derive(Debug, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub msg_type: u8,
    pub body: &'a [u8],
}

/// Split one envelope off the front of `buf`. Returns the envelope and the
/// total bytes it occupied, size varint included.
pub fn read_envelope(buf: &[u8]) -> Result<(Envelope<'_>, usize), ProtocolError> {
    let (size, varint_len) = varint::decode(buf)?;
    if size < 1 {
        return Err(ProtocolError::SizeMismatch {
            expected: 1,
            actual: size.max(0) as usize,
        });
    }

    let total = varint_len + size as usize;
    if buf.len() < total {
        return Err(ProtocolError::SizeMismatch {
            expected: total,
            actual: buf.len(),
        });
    }

    Ok((
        Envelope {
            msg_type: buf[varint_len],
            body: &buf[varint_len + 1..total],
        },
        total,
    ))
}

fn put_u8(buf: &mut [u8], at: usize, value: u8) -> Result<usize, ProtocolError> {
    if at >= buf.len() {
        return Err(ProtocolError::BufferOverflow {
            needed: at + 1,
            capacity: buf.len(),
        });
    }
    buf[at] = value;
    Ok(at + 1)
}

fn put_bytes(buf: &mut [u8], at: usize, bytes: &[u8]) -> Result<usize, ProtocolError> {
    let end = at + bytes.len();
    if end > buf.len() {
        return Err(ProtocolError::BufferOverflow {
            needed: end,
            capacity: buf.len(),
        });
    }
    buf[at..end].copy_from_slice(bytes);
    Ok(end)
}

/// Total bytes `write_envelope` emits for a body of `body_len` bytes.
pub fn envelope_size(body_len: usize) -> usize {
    varint::size((1 + body_len) as i32) + 1 + body_len
}

/// Emit one envelope at `at`. Returns the cursor just past the last byte
/// written.
pub fn write_envelope(
    buf: &mut [u8],
    at: usize,
    msg_type: MessageType,
    body: &[u8],
) -> Result<usize, ProtocolError> {
    let at = varint::encode(buf, at, (1 + body.len()) as i32)?;
    let at = put_u8(buf, at, msg_type as u8)?;
    put_bytes(buf, at, body)
}

/// Total bytes `write_incoming_rpc` emits.
pub fn incoming_rpc_size(method_id: i32, args_len: usize) -> usize {
    let size = 2 + varint::size(method_id) + 1 + args_len;
    varint::size(size as i32) + size
}

/// Frame a self-directed RPC: reserved zero byte, method, fire-and-forget
/// flag, then the raw args.
pub fn write_incoming_rpc(
    buf: &mut [u8],
    at: usize,
    method_id: i32,
    fire_forget: bool,
    args: &[u8],
) -> Result<usize, ProtocolError> {
    let size = 2 + varint::size(method_id) + 1 + args.len();
    let at = varint::encode(buf, at, size as i32)?;
    let at = put_u8(buf, at, MessageType::Rpc as u8)?;
    let at = put_u8(buf, at, 0)?;
    let at = varint::encode(buf, at, method_id)?;
    let at = put_u8(buf, at, fire_forget as u8)?;
    put_bytes(buf, at, args)
}

fn outgoing_body_size(dest_len: usize, method_id: i32, args_len: usize) -> usize {
    1 + varint::size(dest_len as i32) + dest_len + 1 + varint::size(method_id) + 1 + args_len
}

/// Total bytes of a destination-addressed RPC frame, args included.
pub fn outgoing_rpc_size(dest_len: usize, method_id: i32, args_len: usize) -> usize {
    let size = outgoing_body_size(dest_len, method_id, args_len);
    varint::size(size as i32) + size
}

/// Frame the header of a destination-addressed RPC. The outer size field
/// counts the full body including `args_len` arg bytes, but the caller
/// appends the args itself, which keeps large payloads out of an extra copy.
pub fn write_outgoing_rpc_header(
    buf: &mut [u8],
    at: usize,
    dest: &[u8],
    rpc_or_ret: u8,
    method_id: i32,
    fire_forget: bool,
    args_len: usize,
) -> Result<usize, ProtocolError> {
    let size = outgoing_body_size(dest.len(), method_id, args_len);
    let at = varint::encode(buf, at, size as i32)?;
    let at = put_u8(buf, at, MessageType::Rpc as u8)?;
    let at = varint::encode(buf, at, dest.len() as i32)?;
    let at = put_bytes(buf, at, dest)?;
    let at = put_u8(buf, at, rpc_or_ret)?;
    let at = varint::encode(buf, at, method_id)?;
    put_u8(buf, at, fire_forget as u8)
}

/// A self-directed RPC parsed out of an envelope body.
#[derive(Debug, PartialEq, Eq)]
pub struct IncomingRpc<'a> {
    pub method_id: i32,
    pub fire_forget: bool,
    pub args: &'a [u8],
}

/// Parse the body of a self-directed RPC envelope. Everything after the
/// fire-and-forget flag belongs to the args, verbatim.
pub fn parse_incoming_rpc(body: &[u8]) -> Result<IncomingRpc<'_>, ProtocolError> {
    let Some(&reserved) = body.first() else {
        return Err(ProtocolError::SizeMismatch {
            expected: 1,
            actual: 0,
        });
    };
    if reserved != 0 {
        debug!("incoming rpc with nonzero reserved byte {reserved}");
    }

    let (method_id, varint_len) = varint::decode(&body[1..])?;

    let flag_at = 1 + varint_len;
    let Some(&fire_forget) = body.get(flag_at) else {
        return Err(ProtocolError::SizeMismatch {
            expected: flag_at + 1,
            actual: body.len(),
        });
    };

    Ok(IncomingRpc {
        method_id,
        fire_forget: fire_forget != 0,
        args: &body[flag_at + 1..],
    })
}
