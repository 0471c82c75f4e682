// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Minimal immortal for poking at a local coordinator: logs every method
//! the coordinator dispatches and can forward the payloads to another
//! immortal.

use clap::Parser;
use log::*;

use std::io::{self, Write};

use coord_protocol::{frame, MessageType};
use immortal_client::{ClientHandle, ClientRuntime, Config, ImmortalApp};

#[derive(Parser)]
struct Cli {
    /// Port the local coordinator listens on for this immortal's outbound
    /// stream.
    #[arg(long, default_value_t = 1000)]
    up_port: u16,

    /// Port this immortal listens on for the coordinator's connection.
    #[arg(long, default_value_t = 1001)]
    down_port: u16,

    /// Egress ring capacity in bytes; 0 selects the default.
    #[arg(long, default_value_t = 0)]
    ring_capacity: usize,

    /// Forward every dispatched payload to this destination immortal.
    #[arg(long)]
    forward_to: Option<String>,

    /// Method invoked on the forwarding destination.
    #[arg(long, default_value_t = 1)]
    forward_method: i32,
}

struct EchoApp {
    handle: Option<ClientHandle>,
    forward_to: Option<String>,
    forward_method: i32,
    dispatched: u64,
}

impl ImmortalApp for EchoApp {
    fn dispatch_method(&mut self, method_id: i32, args: &[u8]) {
        self.dispatched += 1;
        info!(
            "dispatch #{}: method {method_id} with {} arg bytes",
            self.dispatched,
            args.len()
        );

        if let (Some(handle), Some(dest)) = (&self.handle, &self.forward_to) {
            if let Err(e) =
                handle.send_outgoing_rpc(dest.as_bytes(), 0, self.forward_method, true, args)
            {
                warn!("forwarding to {dest} failed: {e}");
            }
        }
    }

    fn write_checkpoint(&mut self, sink: &mut dyn Write) -> io::Result<()> {
        // One byte of state, so the coordinator has something to persist.
        let mut buf = vec![0u8; frame::envelope_size(1)];
        frame::write_envelope(&mut buf, 0, MessageType::Checkpoint, &[0])
            .map_err(io::Error::other)?;
        sink.write_all(&buf)
    }

    fn startup_method(&self) -> i32 {
        32
    }

    fn startup_args(&self) -> Vec<u8> {
        vec![5, 4, 3]
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Cli::parse();
    let config = Config {
        ring_capacity: args.ring_capacity,
        ..Config::new(args.up_port, args.down_port)
    };

    let mut app = EchoApp {
        handle: None,
        forward_to: args.forward_to,
        forward_method: args.forward_method,
        dispatched: 0,
    };

    let mut runtime = ClientRuntime::initialize(&config, &mut app)?;
    app.handle = Some(runtime.handle());

    runtime.run_normal_processing(&mut app)?;
    Ok(())
}
