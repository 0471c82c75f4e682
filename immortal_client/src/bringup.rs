// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use log::*;

use std::net::{SocketAddr, TcpListener, TcpStream};

use crate::{Config, Error};

/// Establish the two coordinator sockets: connect the outbound stream
/// first, then accept the coordinator's single inbound connection and drop
/// the listener. Both peers are loopback; no portable fast-loopback socket
/// hint exists, so `TCP_NODELAY` is as close as the standard socket layer
/// gets.
pub(crate) fn bring_up(config: &Config) -> Result<(TcpStream, TcpStream), Error> {
    let up_addr = SocketAddr::new(config.family.loopback(), config.up_port);
    let up = TcpStream::connect(up_addr).map_err(Error::Connect)?;
    up.set_nodelay(true).map_err(Error::Connect)?;
    debug!("connected outbound stream to coordinator at {up_addr}");

    let listen_addr = SocketAddr::new(config.family.unspecified(), config.down_port);
    let listener = TcpListener::bind(listen_addr).map_err(Error::Bind)?;
    let (down, peer) = listener.accept().map_err(Error::Accept)?;
    down.set_nodelay(true).map_err(Error::Accept)?;
    debug!("accepted coordinator connection from {peer}");

    Ok((up, down))
}
