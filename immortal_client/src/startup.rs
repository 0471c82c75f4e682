// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use log::*;

use std::io::{Read, Write};

use coord_protocol::{additive_checksum, frame, LogHeader, MessageType, ProtocolError};

use crate::{Error, ImmortalApp};

/// Drive the boot handshake on freshly-connected streams.
///
/// The coordinator speaks first with one log record. Its leading envelope
/// decides the branch: a becoming-primary checkpoint request means first
/// boot, a checkpoint means the coordinator wants to replay state into us.
/// On first boot we answer with the initial message wrapping the startup
/// RPC, then the application's checkpoint, both written synchronously; the
/// egress ring is not running yet.
pub(crate) fn run<D, U>(down: &mut D, up: &mut U, app: &mut impl ImmortalApp) -> Result<(), Error>
where
    D: Read,
    U: Write,
{
    let header = LogHeader::read_from(down).map_err(Error::Io)?;
    let mut payload = vec![0u8; header.payload_size()?];
    down.read_exact(&mut payload).map_err(Error::Io)?;

    let checksum = additive_checksum(&payload);
    debug!(
        "first log record: commit {} seq {} payload {} bytes checksum {checksum}",
        header.commit_id,
        header.seq_id,
        payload.len(),
    );
    if checksum != header.checksum {
        debug!(
            "first record checksum disagrees with header: computed {checksum}, header {}",
            header.checksum
        );
    }

    let (envelope, consumed) = frame::read_envelope(&payload)?;
    if consumed < payload.len() {
        debug!(
            "ignoring {} bytes after the first record's leading envelope",
            payload.len() - consumed
        );
    }

    match MessageType::from_u8(envelope.msg_type) {
        Some(MessageType::TakeBecomingPrimaryCheckpoint) => {
            debug!("first boot: coordinator asked for the becoming-primary checkpoint");
        }
        Some(MessageType::Checkpoint) => return Err(Error::RecoveryNotImplemented),
        _ => {
            return Err(Error::Protocol(ProtocolError::UnexpectedMessageType(
                envelope.msg_type,
            )))
        }
    }

    // The initial message wraps the startup call the coordinator will hand
    // back to us at the head of the log.
    let startup_args = app.startup_args();
    let mut inner = vec![0u8; frame::incoming_rpc_size(app.startup_method(), startup_args.len())];
    frame::write_incoming_rpc(&mut inner, 0, app.startup_method(), true, &startup_args)?;

    let mut initial = vec![0u8; frame::envelope_size(inner.len())];
    frame::write_envelope(&mut initial, 0, MessageType::InitialMessage, &inner)?;
    up.write_all(&initial).map_err(Error::Io)?;

    app.write_checkpoint(up).map_err(Error::Io)?;
    debug!("startup complete: initial message and checkpoint sent");

    Ok(())
}
