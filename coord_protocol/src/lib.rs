// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

pub mod frame;
pub mod varint;

use std::fmt;

pub use frame::{
    additive_checksum, Envelope, IncomingRpc, LogHeader, LOG_HEADER_SIZE,
};

/// Byte tags of the coordinator's message envelopes.
///
/// The numeric values are fixed by the coordinator and must match it
/// bit-for-bit. The gaps are tags the coordinator defines for its own
/// traffic; none of them is legal on this client's sockets.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Rpc = 0,
    AttachTo = 1,
    TakeCheckpoint = 2,
    RpcBatch = 5,
    Checkpoint = 8,
    InitialMessage = 9,
    TakeBecomingPrimaryCheckpoint = 11,
}

impl MessageType {
    /// Try to convert a raw tag byte into a `MessageType`.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Rpc),
            1 => Some(Self::AttachTo),
            2 => Some(Self::TakeCheckpoint),
            5 => Some(Self::RpcBatch),
            8 => Some(Self::Checkpoint),
            9 => Some(Self::InitialMessage),
            11 => Some(Self::TakeBecomingPrimaryCheckpoint),
            _ => None,
        }
    }
}

/// The possible errors that can arise from encoding or decoding wire frames.
///
/// Every variant is fatal to the stream it was observed on: after a parse
/// failure the byte position of the next frame is unknowable.
#[derive(Debug, PartialEq, Eq)]
pub enum ProtocolError {
    /// A varint carried a continuation bit past the 5-byte limit for a
    /// 32-bit value.
    MalformedVarint,

    /// A tag byte outside the closed message-type set, or a type that is
    /// not legal in its position on the wire.
    UnexpectedMessageType(u8),

    /// A length field disagrees with the bytes actually present.
    SizeMismatch { expected: usize, actual: usize },

    /// A frame writer would have run past the end of the caller's buffer.
    BufferOverflow { needed: usize, capacity: usize },
}

impl std::error::Error for ProtocolError {}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::MalformedVarint => write!(f, "varint exceeds 5 bytes"),
            Self::UnexpectedMessageType(tag) => write!(f, "unexpected message type {tag}"),
            Self::SizeMismatch { expected, actual } => {
                write!(f, "size mismatch: expected {expected} bytes, have {actual}")
            }
            Self::BufferOverflow { needed, capacity } => {
                write!(f, "frame needs {needed} bytes but the buffer holds {capacity}")
            }
        }
    }
}

/// A "pipe", constructed using socketpair(2), that can be used for driving
/// both ends of a coordinator connection in tests.
pub mod pipe {
    use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};

    pub struct Endpoint {
        fd: std::os::fd::OwnedFd,
    }

    pub fn pipe() -> std::io::Result<(Endpoint, Endpoint)> {
        let (a, b) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::empty(),
        )?;

        Ok((Endpoint { fd: a }, Endpoint { fd: b }))
    }

    impl std::io::Read for Endpoint {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(nix::unistd::read(&self.fd, buf)?)
        }
    }

    impl std::io::Write for Endpoint {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(nix::unistd::write(&self.fd, buf)?)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
