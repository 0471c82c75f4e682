// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::io::{Read, Write};

use coord_protocol::frame::{self, read_envelope, LogHeader};
use coord_protocol::{additive_checksum, pipe, MessageType, LOG_HEADER_SIZE};

/// A full log record travels over a socketpair and comes back out as the
/// same header plus the same sequence of envelopes.
#[test]
fn record_over_a_pipe() {
    let (mut coordinator, mut client) = pipe::pipe().unwrap();

    let mut payload = vec![0u8; frame::incoming_rpc_size(7, 3)];
    let at = frame::write_incoming_rpc(&mut payload, 0, 7, true, &[5, 4, 3]).unwrap();
    assert_eq!(at, payload.len());

    let header = LogHeader {
        commit_id: 1,
        total_size: (LOG_HEADER_SIZE + payload.len()) as i32,
        checksum: additive_checksum(&payload),
        seq_id: 42,
    };

    header.write_to(&mut coordinator).unwrap();
    coordinator.write_all(&payload).unwrap();

    let got = LogHeader::read_from(&mut client).unwrap();
    assert_eq!(got, header);

    let mut got_payload = vec![0u8; got.payload_size().unwrap()];
    client.read_exact(&mut got_payload).unwrap();
    assert_eq!(got_payload, payload);
    assert_eq!(additive_checksum(&got_payload), got.checksum);
}

/// A payload holding several envelopes walks cleanly: each read consumes
/// exactly one envelope and the cursors tile the payload.
#[test]
fn envelope_walk() {
    let mut payload = Vec::new();

    let mut rpc = vec![0u8; frame::incoming_rpc_size(1, 2)];
    frame::write_incoming_rpc(&mut rpc, 0, 1, false, &[0xaa, 0xbb]).unwrap();
    payload.extend_from_slice(&rpc);

    let mut attach = vec![0u8; frame::envelope_size(4)];
    frame::write_envelope(&mut attach, 0, MessageType::AttachTo, b"peer").unwrap();
    payload.extend_from_slice(&attach);

    let mut checkpoint = vec![0u8; frame::envelope_size(1)];
    frame::write_envelope(&mut checkpoint, 0, MessageType::Checkpoint, &[0]).unwrap();
    payload.extend_from_slice(&checkpoint);

    let mut rest = payload.as_slice();
    let mut types = Vec::new();
    while !rest.is_empty() {
        let (env, consumed) = read_envelope(rest).unwrap();
        types.push(env.msg_type);
        rest = &rest[consumed..];
    }

    assert_eq!(
        types,
        [
            MessageType::Rpc as u8,
            MessageType::AttachTo as u8,
            MessageType::Checkpoint as u8,
        ]
    );
}

/// The envelope reader never reads past a declared size, so garbage after a
/// well-formed envelope is left untouched for the caller to reject.
#[test]
fn envelope_walk_stops_on_boundary() {
    let mut buf = vec![0u8; frame::envelope_size(2)];
    frame::write_envelope(&mut buf, 0, MessageType::Rpc, &[0, 1]).unwrap();
    buf.push(0xfe);

    let (env, consumed) = read_envelope(&buf).unwrap();
    assert_eq!(env.body, [0, 1]);
    assert_eq!(consumed, buf.len() - 1);
}
