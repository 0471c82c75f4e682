// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use log::*;

use std::io::Write;
use std::sync::Arc;
use std::thread;

use crate::ring::Consumer;
use crate::Shared;

/// Body of the network-progress thread: drain the egress ring into the up
/// socket, spinning briefly on an empty ring before yielding the core.
///
/// Exits when the terminating flag is set and the ring is drained, or when
/// the socket fails; either way the ring's producer side starts reporting
/// full once the consumer stops.
pub(crate) fn run<U: Write>(mut consumer: Consumer, mut up: U, shared: Arc<Shared>, hot_spin: u32) {
    let mut spin = hot_spin;
    loop {
        let chunk = consumer.peek();
        if !chunk.is_empty() {
            if log_enabled!(Level::Trace) {
                trace!("egress {} bytes: {}", chunk.len(), hex::encode(chunk));
            }
            if let Err(e) = up.write_all(chunk) {
                error!("write to coordinator failed, stopping network progress: {e}");
                return;
            }

            let n = chunk.len();
            consumer.pop(n);
            spin = hot_spin;
        } else if shared.terminating() {
            debug!("ring drained and terminating, network progress exiting");
            return;
        } else if spin == 0 {
            spin = hot_spin;
            thread::yield_now();
        } else {
            spin -= 1;
        }
    }
}
