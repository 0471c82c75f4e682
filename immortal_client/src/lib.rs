// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Client runtime for an immortal process.
//!
//! The runtime speaks the reliability coordinator's framed binary protocol
//! over two loopback TCP sockets: an outbound stream the coordinator logs
//! before anything becomes observable, and an inbound stream on which it
//! delivers originals and replays. Outbound RPCs are framed and staged in a
//! byte ring drained by a dedicated network-progress thread; inbound log
//! records are decoded by [`ClientRuntime::run_normal_processing`] and
//! dispatched to the application through [`ImmortalApp`].

pub mod ring;

mod bringup;
mod ingress;
mod progress;
mod startup;

use log::*;

use std::collections::HashSet;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use coord_protocol::{frame, MessageType, ProtocolError};

/// Egress ring capacity used when the configuration leaves it at zero.
pub const DEFAULT_RING_CAPACITY: usize = 20 * 1024 * 1024;

/// Iterations the progress thread spins on an empty ring before yielding
/// the core.
pub const DEFAULT_HOT_SPIN: u32 = 256;

/// Address family shared by both coordinator sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrFamily {
    Ipv4,
    Ipv6,
}

impl AddrFamily {
    fn loopback(self) -> IpAddr {
        match self {
            Self::Ipv4 => IpAddr::V4(Ipv4Addr::LOCALHOST),
            Self::Ipv6 => IpAddr::V6(Ipv6Addr::LOCALHOST),
        }
    }

    fn unspecified(self) -> IpAddr {
        match self {
            Self::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Self::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }
}

/// Connection and tuning knobs for one coordinator attachment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the coordinator listens on for this immortal's outbound stream.
    pub up_port: u16,

    /// Port this immortal listens on for the coordinator's connection.
    pub down_port: u16,

    /// Egress ring capacity in bytes; 0 selects the 20 MiB default.
    pub ring_capacity: usize,

    pub family: AddrFamily,

    /// Spin budget of the progress thread between yields.
    pub hot_spin: u32,
}

impl Config {
    pub fn new(up_port: u16, down_port: u16) -> Self {
        Self {
            up_port,
            down_port,
            ring_capacity: 0,
            family: AddrFamily::Ipv4,
            hot_spin: DEFAULT_HOT_SPIN,
        }
    }
}

/// What the host application plugs into the runtime.
pub trait ImmortalApp {
    /// Invoked by the ingress loop, in delivery order, for every RPC the
    /// coordinator hands down.
    fn dispatch_method(&mut self, method_id: i32, args: &[u8]);

    /// Write one checkpoint envelope covering the current application
    /// state. The runtime calls this during startup and again whenever the
    /// coordinator asks for a checkpoint.
    fn write_checkpoint(&mut self, sink: &mut dyn Write) -> io::Result<()>;

    /// Method the coordinator replays first on every boot.
    fn startup_method(&self) -> i32;

    /// Argument blob for the startup method.
    fn startup_args(&self) -> Vec<u8>;
}

/// Errors surfaced by the runtime API.
///
/// Everything except `RingFull` ends the session: after a failure
/// mid-stream the position of the next frame is unknowable.
#[derive(Debug)]
pub enum Error {
    /// A frame on either stream did not parse.
    Protocol(ProtocolError),

    /// A read or write on an established socket failed; a short read
    /// arrives here as `UnexpectedEof`.
    Io(io::Error),

    /// Connecting the outbound stream failed.
    Connect(io::Error),

    /// Binding the inbound listener failed.
    Bind(io::Error),

    /// Accepting the coordinator's connection failed.
    Accept(io::Error),

    /// The frame can never fit in the egress ring.
    RingFull,

    /// The coordinator opened with a recovery checkpoint. Replay is not
    /// built; refusing to start is the only state-preserving answer.
    RecoveryNotImplemented,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Connect(e) => write!(f, "connect to coordinator failed: {e}"),
            Self::Bind(e) => write!(f, "bind for coordinator failed: {e}"),
            Self::Accept(e) => write!(f, "accept from coordinator failed: {e}"),
            Self::RingFull => write!(f, "frame exceeds the egress ring capacity"),
            Self::RecoveryNotImplemented => {
                write!(f, "coordinator requested recovery, which is not implemented")
            }
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

/// State shared between the API handles, the ingress loop, and the
/// progress thread.
pub(crate) struct Shared {
    /// Producer half of the egress ring. The ring is strictly SPSC; this
    /// mutex serializes however many application threads are sending.
    producer: Mutex<ring::Producer>,

    /// Destinations an `AttachTo` has already been emitted for.
    attached: Mutex<HashSet<Vec<u8>>>,

    terminating: AtomicBool,
}

impl Shared {
    pub(crate) fn terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }

    pub(crate) fn set_terminating(&self) {
        self.terminating.store(true, Ordering::Release);
    }

    /// Stage one whole frame into the egress ring, yielding while the
    /// progress thread makes room. Frames go in whole or not at all, which
    /// keeps the ring on message boundaries.
    pub(crate) fn push_frame(&self, frame: &[u8]) -> Result<(), Error> {
        let mut producer = self.producer.lock().expect("egress producer lock poisoned");
        if frame.len() > producer.max_frame_len() {
            return Err(Error::RingFull);
        }

        loop {
            match producer.push(frame) {
                Ok(()) => return Ok(()),
                Err(ring::RingFull) => {
                    if self.terminating() {
                        return Err(Error::RingFull);
                    }
                    thread::yield_now();
                }
            }
        }
    }
}

fn send_outgoing_rpc(
    shared: &Shared,
    dest: &[u8],
    rpc_or_ret: u8,
    method_id: i32,
    fire_forget: bool,
    args: &[u8],
) -> Result<(), Error> {
    // An empty destination means self; the coordinator needs no attach for
    // that.
    if !dest.is_empty() {
        attach_if_needed(shared, dest)?;
    }

    let mut buf = vec![0u8; frame::outgoing_rpc_size(dest.len(), method_id, args.len())];
    let at = frame::write_outgoing_rpc_header(
        &mut buf,
        0,
        dest,
        rpc_or_ret,
        method_id,
        fire_forget,
        args.len(),
    )?;
    buf[at..].copy_from_slice(args);

    shared.push_frame(&buf)
}

/// Emit `AttachTo` the first time a destination is seen. The set lock is
/// held across the push so the attach lands ahead of every RPC to the same
/// destination in wire order.
fn attach_if_needed(shared: &Shared, dest: &[u8]) -> Result<(), Error> {
    let mut attached = shared.attached.lock().expect("attach set lock poisoned");
    if attached.contains(dest) {
        return Ok(());
    }

    debug!("attaching to destination {}", String::from_utf8_lossy(dest));
    let mut buf = vec![0u8; frame::envelope_size(dest.len())];
    frame::write_envelope(&mut buf, 0, MessageType::AttachTo, dest)?;
    shared.push_frame(&buf)?;

    attached.insert(dest.to_vec());
    Ok(())
}

/// A live attachment to the reliability coordinator.
///
/// Owns the inbound socket and the progress thread. Sending threads get a
/// [`ClientHandle`] via [`ClientRuntime::handle`]. Dropping the runtime
/// signals termination and joins the progress thread after it drains the
/// ring.
pub struct ClientRuntime<D = TcpStream> {
    down: D,
    shared: Arc<Shared>,
    progress: Option<JoinHandle<()>>,
}

impl ClientRuntime<TcpStream> {
    /// Bring up both coordinator sockets, run the startup handshake, and
    /// launch the network-progress thread.
    pub fn initialize(config: &Config, app: &mut impl ImmortalApp) -> Result<Self, Error> {
        let (up, down) = bringup::bring_up(config)?;
        Self::over_streams(up, down, config, app)
    }
}

impl<D: Read> ClientRuntime<D> {
    /// Like [`ClientRuntime::initialize`], but over streams the caller
    /// already connected; the ports in `config` are not consulted. This is
    /// how the tests drive the runtime through socketpairs.
    pub fn over_streams<U>(
        mut up: U,
        mut down: D,
        config: &Config,
        app: &mut impl ImmortalApp,
    ) -> Result<Self, Error>
    where
        U: Write + Send + 'static,
    {
        startup::run(&mut down, &mut up, app)?;

        let capacity = if config.ring_capacity == 0 {
            DEFAULT_RING_CAPACITY
        } else {
            config.ring_capacity
        };
        let (producer, consumer) = ring::channel(capacity);

        let shared = Arc::new(Shared {
            producer: Mutex::new(producer),
            attached: Mutex::new(HashSet::new()),
            terminating: AtomicBool::new(false),
        });

        let thread_shared = Arc::clone(&shared);
        let hot_spin = config.hot_spin;
        let progress = thread::Builder::new()
            .name("net-progress".into())
            .spawn(move || progress::run(consumer, up, thread_shared, hot_spin))?;

        Ok(Self {
            down,
            shared,
            progress: Some(progress),
        })
    }

    /// Block on the inbound socket, dispatching RPCs to `app`, until
    /// [`shutdown`](ClientRuntime::shutdown) or a wire failure. The
    /// terminating flag is observed between records; a record already being
    /// parsed finishes first.
    pub fn run_normal_processing(&mut self, app: &mut impl ImmortalApp) -> Result<(), Error> {
        ingress::run(&mut self.down, &self.shared, app)
    }

    /// A cloneable sender for the application's threads.
    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Frame a destination-addressed RPC and stage it for the progress
    /// thread, attaching to `dest` first if this is its first RPC.
    pub fn send_outgoing_rpc(
        &self,
        dest: &[u8],
        rpc_or_ret: u8,
        method_id: i32,
        fire_forget: bool,
        args: &[u8],
    ) -> Result<(), Error> {
        send_outgoing_rpc(&self.shared, dest, rpc_or_ret, method_id, fire_forget, args)
    }

    /// Ask both long-lived loops to wind down cooperatively.
    pub fn shutdown(&self) {
        self.shared.set_terminating();
    }
}

impl<D> Drop for ClientRuntime<D> {
    fn drop(&mut self) {
        self.shared.set_terminating();
        if let Some(progress) = self.progress.take() {
            if progress.join().is_err() {
                error!("network progress thread panicked");
            }
        }
    }
}

/// Cheap, cloneable sending handle detached from the runtime's lifetime
/// borrows. Safe to use from any thread, including inside dispatch
/// handlers.
#[derive(Clone)]
pub struct ClientHandle {
    shared: Arc<Shared>,
}

impl ClientHandle {
    pub fn send_outgoing_rpc(
        &self,
        dest: &[u8],
        rpc_or_ret: u8,
        method_id: i32,
        fire_forget: bool,
        args: &[u8],
    ) -> Result<(), Error> {
        send_outgoing_rpc(&self.shared, dest, rpc_or_ret, method_id, fire_forget, args)
    }

    /// Set the terminating flag. The ingress loop observes it between
    /// records, the progress thread once the ring is drained.
    pub fn shutdown(&self) {
        self.shared.set_terminating();
    }
}
