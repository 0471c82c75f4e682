// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use log::*;

use std::io::Read;

use coord_protocol::{additive_checksum, frame, varint, LogHeader, MessageType, ProtocolError};

use crate::{Error, ImmortalApp, Shared};

/// Pump inbound log records, dispatching their messages to `app`, until the
/// terminating flag is observed between records. A record already being
/// read or parsed always finishes first.
pub(crate) fn run<D: Read>(
    down: &mut D,
    shared: &Shared,
    app: &mut impl ImmortalApp,
) -> Result<(), Error> {
    while !shared.terminating() {
        let header = LogHeader::read_from(down).map_err(Error::Io)?;
        let mut payload = vec![0u8; header.payload_size()?];
        down.read_exact(&mut payload).map_err(Error::Io)?;

        trace!(
            "log record: commit {} seq {} payload {} bytes",
            header.commit_id,
            header.seq_id,
            payload.len(),
        );
        let checksum = additive_checksum(&payload);
        if checksum != header.checksum {
            debug!(
                "record {} checksum disagrees with header: computed {checksum}, header {}",
                header.seq_id, header.checksum,
            );
        }

        process_record(&payload, shared, app)?;
    }

    debug!("ingress loop observed the terminating flag");
    Ok(())
}

/// Walk one record payload as a sequence of envelopes. Envelope boundaries
/// must tile the payload exactly; the walk itself enforces that because
/// each read consumes a declared size.
fn process_record(
    payload: &[u8],
    shared: &Shared,
    app: &mut impl ImmortalApp,
) -> Result<(), Error> {
    let mut rest = payload;
    while !rest.is_empty() {
        let (envelope, consumed) = frame::read_envelope(rest)?;

        match MessageType::from_u8(envelope.msg_type) {
            Some(MessageType::Rpc) => {
                let rpc = frame::parse_incoming_rpc(envelope.body)?;
                app.dispatch_method(rpc.method_id, rpc.args);
            }
            Some(MessageType::RpcBatch) => process_batch(envelope.body, app)?,
            Some(MessageType::InitialMessage) => {
                // The coordinator echoes our own startup message back at the
                // head of the log; there is nothing to do with it.
                trace!("initial message echoed back");
            }
            Some(MessageType::TakeCheckpoint) => stage_checkpoint(shared, app)?,
            _ => {
                return Err(Error::Protocol(ProtocolError::UnexpectedMessageType(
                    envelope.msg_type,
                )))
            }
        }

        rest = &rest[consumed..];
    }
    Ok(())
}

/// Walk a batch body: a message count, then that many envelopes, every one
/// parsed as an RPC whatever its inner tag says. The count and the body
/// length must agree exactly.
fn process_batch(body: &[u8], app: &mut impl ImmortalApp) -> Result<(), Error> {
    let (count, consumed) = varint::decode(body)?;
    let Ok(count) = usize::try_from(count) else {
        return Err(Error::Protocol(ProtocolError::SizeMismatch {
            expected: 0,
            actual: body.len(),
        }));
    };

    let mut rest = &body[consumed..];
    for _ in 0..count {
        let (envelope, consumed) = frame::read_envelope(rest)?;
        if envelope.msg_type != MessageType::Rpc as u8 {
            debug!("batch entry tagged {} parsed as an rpc", envelope.msg_type);
        }

        let rpc = frame::parse_incoming_rpc(envelope.body)?;
        app.dispatch_method(rpc.method_id, rpc.args);

        rest = &rest[consumed..];
    }

    if !rest.is_empty() {
        return Err(Error::Protocol(ProtocolError::SizeMismatch {
            expected: 0,
            actual: rest.len(),
        }));
    }
    Ok(())
}

/// Render the application's checkpoint and stage it through the egress
/// ring. The progress thread stays the up socket's only writer; ordering
/// against concurrent application RPCs is whatever the ring says.
fn stage_checkpoint(shared: &Shared, app: &mut impl ImmortalApp) -> Result<(), Error> {
    let mut staged = Vec::new();
    app.write_checkpoint(&mut staged).map_err(Error::Io)?;
    debug!("staging {} checkpoint bytes for the coordinator", staged.len());
    shared.push_frame(&staged)
}
