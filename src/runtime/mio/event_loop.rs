//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! Everything runs on one thread. Readiness is edge-triggered, so accepts and
//! reads continue until the kernel reports `WouldBlock`. Each chunk read is
//! processed and its output flushed before the next read. A connection whose
//! queued output passes the high-water mark stops reading until write
//! readiness drains it.

use crate::config::Limits;
use crate::error::{ConnError, ServerError};
use crate::runtime::buffer::{Drain, OutboundQueue};
use crate::runtime::connection::{ConnectionId, ConnectionState, ConnectionTable};
use crate::runtime::protocol::{self, CloseReason, Progress};
use crate::runtime::signal::TerminationSignals;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Token};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const SIGNAL_TOKEN: Token = Token(usize::MAX - 1);

/// Per-connection entry in the connection table.
pub struct MioConnection {
    stream: TcpStream,
    peer: SocketAddr,
    state: ConnectionState,
    outbound: OutboundQueue,
    /// Reading pauses while more than this many bytes are queued.
    high_water: usize,
    /// Set once the protocol has finished; no more input is read.
    closing: Option<CloseReason>,
    interest: Interest,
}

impl MioConnection {
    #[cfg(test)]
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    #[cfg(test)]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn wants_read(&self) -> bool {
        self.closing.is_none() && self.outbound.len() <= self.high_water
    }

    /// Interest matching the current outbound and closing state.
    fn wanted_interest(&self) -> Interest {
        match (self.wants_read(), self.outbound.is_empty()) {
            (true, true) => Interest::READABLE,
            (true, false) => Interest::READABLE | Interest::WRITABLE,
            (false, _) => Interest::WRITABLE,
        }
    }

    fn update_interest(&mut self, registry: &Registry, token: Token) -> Result<(), ConnError> {
        let wanted = self.wanted_interest();
        if wanted != self.interest {
            registry
                .reregister(&mut self.stream, token, wanted)
                .map_err(ConnError::Register)?;
            self.interest = wanted;
        }
        Ok(())
    }

    /// Write queued output until it is gone or the socket stops taking it.
    fn flush(&mut self, token: Token) -> Result<(), ConnError> {
        if self.outbound.is_empty() {
            return Ok(());
        }
        match self
            .outbound
            .drain_into(&mut self.stream)
            .map_err(ConnError::Write)?
        {
            Drain::Complete => {}
            Drain::Blocked => {
                trace!(
                    token = token.0,
                    pending = self.outbound.len(),
                    "Write would block"
                );
            }
        }
        Ok(())
    }
}

/// What happened to a connection after servicing an event.
enum Lifecycle {
    Open,
    Finished(CloseReason),
}

/// Whether the dispatch loop should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Single-threaded accept/read/write loop over one listening socket.
pub struct EventLoop {
    poll: Poll,
    listener: TcpListener,
    connections: ConnectionTable<MioConnection>,
    limits: Limits,
    events_capacity: usize,
    read_buf: Vec<u8>,
    signals: Option<TerminationSignals>,
    /// Connections torn down during the current turn. kqueue reports read and
    /// write readiness as separate events, so a later event in the same batch
    /// may name a connection that is already gone.
    closed_this_turn: Vec<ConnectionId>,
}

impl EventLoop {
    /// Build a loop around an already-listening socket.
    pub fn new(
        listener: std::net::TcpListener,
        connections: ConnectionTable<MioConnection>,
        limits: Limits,
        events_capacity: usize,
    ) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        let mut listener = TcpListener::from_std(listener);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            listener,
            connections,
            limits,
            events_capacity: events_capacity.max(1),
            read_buf: vec![0u8; limits.read_buffer_size.max(1)],
            signals: None,
            closed_this_turn: Vec::new(),
        })
    }

    /// Stop the loop cleanly when SIGINT or SIGTERM arrives.
    pub fn watch_signals(&mut self, mut signals: TerminationSignals) -> io::Result<()> {
        self.poll
            .registry()
            .register(&mut signals, SIGNAL_TOKEN, Interest::READABLE)?;
        self.signals = Some(signals);
        Ok(())
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    #[cfg(test)]
    pub fn connections(&self) -> &ConnectionTable<MioConnection> {
        &self.connections
    }

    /// Run until a termination signal or a server-fatal error.
    pub fn run(&mut self) -> Result<(), ServerError> {
        let mut events = Events::with_capacity(self.events_capacity);
        loop {
            if self.turn(&mut events, None)? == Flow::Stop {
                if !self.connections.is_empty() {
                    debug!(
                        open_connections = self.connections.len(),
                        "Dropping open connections"
                    );
                }
                info!("Event loop stopped");
                return Ok(());
            }
        }
    }

    /// Wait for readiness once and dispatch every event received.
    pub fn turn(
        &mut self,
        events: &mut Events,
        timeout: Option<Duration>,
    ) -> Result<Flow, ServerError> {
        match self.poll.poll(events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Flow::Continue),
            Err(e) => return Err(ServerError::Poll(e)),
        }

        self.closed_this_turn.clear();
        let mut flow = Flow::Continue;
        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => self.accept_connections()?,
                SIGNAL_TOKEN => {
                    if self.signals.as_mut().is_some_and(|s| s.drain()) {
                        info!("Received termination signal");
                        flow = Flow::Stop;
                    }
                }
                Token(conn_id) => {
                    trace!(
                        conn_id,
                        readable = event.is_readable(),
                        writable = event.is_writable(),
                        "Connection event"
                    );
                    self.connection_event(conn_id)?;
                }
            }
        }
        Ok(flow)
    }

    fn accept_connections(&mut self) -> Result<(), ServerError> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if self.connections.is_full() {
                        warn!(peer = %peer, "Connection limit reached");
                        continue;
                    }

                    let entry = MioConnection {
                        stream,
                        peer,
                        state: ConnectionState::new(self.limits),
                        outbound: OutboundQueue::new(self.limits.max_outbound_size),
                        high_water: self.limits.outbound_high_water(),
                        closing: None,
                        interest: Interest::READABLE,
                    };
                    let Some(conn_id) = self.connections.insert(entry) else {
                        continue;
                    };

                    // Re-borrow after insert
                    let registered = match self.connections.get_mut(conn_id) {
                        Some(conn) => self.poll.registry().register(
                            &mut conn.stream,
                            Token(conn_id),
                            Interest::READABLE,
                        ),
                        None => return Err(ServerError::MissingConnection(conn_id)),
                    };
                    if let Err(e) = registered {
                        self.connections.remove(conn_id);
                        return Err(ServerError::Register(e));
                    }

                    debug!(conn_id, peer = %peer, "Accepted connection");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Accept error");
                    return Err(ServerError::Accept(e));
                }
            }
        }
    }

    fn connection_event(&mut self, conn_id: ConnectionId) -> Result<(), ServerError> {
        let Some(conn) = self.connections.get_mut(conn_id) else {
            if self.closed_this_turn.contains(&conn_id) {
                return Ok(());
            }
            return Err(ServerError::MissingConnection(conn_id));
        };

        match service(
            conn,
            Token(conn_id),
            &mut self.read_buf,
            self.poll.registry(),
        ) {
            Ok(Lifecycle::Open) => {}
            Ok(Lifecycle::Finished(reason)) => {
                debug!(conn_id, peer = %conn.peer, reason = ?reason, "Connection finished");
                self.close_connection(conn_id);
            }
            Err(e) => {
                debug!(conn_id, peer = %conn.peer, error = %e, "Connection error");
                // Best effort; the socket is dropped right after.
                let _ = conn.outbound.drain_into(&mut conn.stream);
                if let Some(response) = e.http_response() {
                    if conn.outbound.is_empty() {
                        let _ = conn.stream.write(response);
                    }
                }
                self.close_connection(conn_id);
            }
        }
        Ok(())
    }

    fn close_connection(&mut self, conn_id: ConnectionId) {
        if let Some(mut conn) = self.connections.remove(conn_id) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            self.closed_this_turn.push(conn_id);
            trace!(conn_id, open_connections = self.connections.len(), "Connection closed");
        }
    }
}

/// Handle one readiness event for a connection.
///
/// Alternates between flushing queued output and reading one chunk. Reading
/// stops at `WouldBlock`, once the protocol is closing, or while queued output
/// is above the high-water mark. End of stream is a close that still flushes
/// what earlier chunks queued.
fn service(
    conn: &mut MioConnection,
    token: Token,
    read_buf: &mut [u8],
    registry: &Registry,
) -> Result<Lifecycle, ConnError> {
    loop {
        conn.flush(token)?;
        if conn.outbound.is_empty() {
            if let Some(reason) = conn.closing {
                return Ok(Lifecycle::Finished(reason));
            }
        }
        if !conn.wants_read() {
            break;
        }

        let n = match conn.stream.read(read_buf) {
            Ok(0) => {
                conn.closing = Some(CloseReason::EndOfStream);
                continue;
            }
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ConnError::Read(e)),
        };
        trace!(token = token.0, bytes = n, "Read");

        if let Progress::Closing(reason) =
            protocol::process(&mut conn.state, &read_buf[..n], &mut conn.outbound)?
        {
            conn.closing = Some(reason);
        }
    }

    if !conn.wants_read() && conn.closing.is_none() {
        trace!(
            token = token.0,
            pending = conn.outbound.len(),
            "Reading paused"
        );
    }
    conn.update_interest(registry, token)?;
    Ok(Lifecycle::Open)
}
