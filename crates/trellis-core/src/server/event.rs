//! Event-driven mode
//!
//! A fixed set of workers share one `mio::Poll` and one connection table.
//! `Poll::poll` needs exclusive access, so workers take turns waiting on it
//! (bounded by the poll timeout) and service the returned events after
//! releasing it. Any worker may service any connection.
//!
//! The table lock is held only to insert, fetch or remove an entry. Each
//! connection sits behind its own mutex, so exactly one worker touches it at
//! a time; every non-blocking read and write happens under that lock, never
//! under the table lock.
//!
//! Registrations are edge-triggered: a connection is always drained until
//! `WouldBlock`, and switching interest re-arms readiness.

use super::{ConnectionTracker, ServerConfig};
use crate::connection::{Framer, Limits};
use crate::{App, Result};
use bumpalo::Bump;
use mio::event::Event;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Token};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const LISTENER: Token = Token(0);

const READ_CHUNK: usize = 8 * 1024;

/// Which readiness the connection is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Reading,
    Writing,
}

/// Whether a connection survives the current event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Open,
    Close,
}

struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    token: Token,
    framer: Framer,
    write_buf: Vec<u8>,
    keep_alive: bool,
    mode: Mode,
    arena: Bump,
    closed: bool,
}

impl Connection {
    fn new(stream: TcpStream, peer: SocketAddr, token: Token, limits: Limits) -> Self {
        Self {
            stream,
            peer,
            token,
            framer: Framer::new(limits),
            write_buf: Vec::with_capacity(1024),
            keep_alive: false,
            mode: Mode::Reading,
            arena: Bump::new(),
            closed: false,
        }
    }

    /// Drain the socket into the framer
    fn on_readable<C>(&mut self, app: &App<C>, registry: &Registry) -> Result<Step>
    where
        C: Send + Sync + 'static,
    {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(Step::Close),
                Ok(n) => {
                    if self.framer.feed(&chunk[..n])? {
                        // Anything still in the socket re-arms on the next
                        // switch back to read interest
                        return self.process(app, registry);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Step::Open),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Answer the framed request and wait for the socket to take it
    fn process<C>(&mut self, app: &App<C>, registry: &Registry) -> Result<Step>
    where
        C: Send + Sync + 'static,
    {
        self.write_buf.clear();
        self.keep_alive = app.respond(&self.framer, self.peer, &self.arena, &mut self.write_buf)?;
        self.arena.reset();

        self.mode = Mode::Writing;
        registry.reregister(&mut self.stream, self.token, Interest::WRITABLE)?;
        Ok(Step::Open)
    }

    /// Flush the write buffer, then start the next exchange or close
    fn on_writable<C>(&mut self, app: &App<C>, registry: &Registry) -> Result<Step>
    where
        C: Send + Sync + 'static,
    {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => {
                    self.write_buf.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Step::Open),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if !self.keep_alive {
            return Ok(Step::Close);
        }

        self.mode = Mode::Reading;
        if self.framer.reset()? {
            // A pipelined request was already buffered
            return self.process(app, registry);
        }
        registry.reregister(&mut self.stream, self.token, Interest::READABLE)?;
        Ok(Step::Open)
    }
}

struct EventLoop<C> {
    app: Arc<App<C>>,
    poll: Mutex<Poll>,
    registry: Registry,
    listener: TcpListener,
    connections: Mutex<HashMap<Token, Arc<Mutex<Connection>>>>,
    next_token: AtomicUsize,
    tracker: Arc<ConnectionTracker>,
    limits: Limits,
    poll_timeout: Duration,
    events_capacity: usize,
}

impl<C: Send + Sync + 'static> EventLoop<C> {
    fn worker(&self) {
        let mut events = Events::with_capacity(self.events_capacity);

        while !self.tracker.is_shutting_down() {
            {
                let mut poll = self.poll.lock();
                if let Err(e) = poll.poll(&mut events, Some(self.poll_timeout)) {
                    if e.kind() == io::ErrorKind::Interrupted {
                        continue;
                    }
                    tracing::error!(error = %e, "poll failed");
                    self.tracker.start_shutdown();
                    return;
                }
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept(),
                    token => self.service(token, event),
                }
            }
        }
    }

    fn accept(&self) {
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!(error = %e, "accept failed");
                    return;
                }
            };
            if self.tracker.is_shutting_down() {
                continue;
            }
            let _ = stream.set_nodelay(true);

            let token = Token(self.next_token.fetch_add(1, Ordering::Relaxed));
            let conn = Arc::new(Mutex::new(Connection::new(stream, peer, token, self.limits)));

            // Registered while locked: the first event waits for the entry
            let mut guard = conn.lock();
            self.connections.lock().insert(token, Arc::clone(&conn));
            self.tracker.opened();

            if let Err(e) = self
                .registry
                .register(&mut guard.stream, token, Interest::READABLE)
            {
                tracing::debug!(%peer, error = %e, "register failed");
                self.close(&mut guard);
                continue;
            }
            tracing::debug!(%peer, "connection accepted");
        }
    }

    fn service(&self, token: Token, event: &Event) {
        let Some(conn) = self.connections.lock().get(&token).cloned() else {
            return;
        };
        let mut conn = conn.lock();
        if conn.closed {
            return;
        }

        let step = match conn.mode {
            Mode::Reading => conn.on_readable(&self.app, &self.registry),
            Mode::Writing => conn.on_writable(&self.app, &self.registry),
        };

        match step {
            Ok(Step::Open) => {}
            Ok(Step::Close) => {
                tracing::debug!(peer = %conn.peer, "connection closed");
                self.close(&mut conn);
            }
            Err(e) => {
                tracing::debug!(
                    peer = %conn.peer,
                    error = %e,
                    readable = event.is_readable(),
                    writable = event.is_writable(),
                    "connection aborted"
                );
                self.close(&mut conn);
            }
        }
    }

    fn close(&self, conn: &mut Connection) {
        if conn.closed {
            return;
        }
        conn.closed = true;
        let _ = self.registry.deregister(&mut conn.stream);
        self.connections.lock().remove(&conn.token);
        self.tracker.closed();
    }

    fn close_all(&self) {
        let remaining: Vec<_> = self.connections.lock().values().cloned().collect();
        for conn in remaining {
            self.close(&mut conn.lock());
        }
    }
}

/// Serve with `config.workers` threads until shutdown
pub(crate) fn run<C: Send + Sync + 'static>(
    listener: std::net::TcpListener,
    app: Arc<App<C>>,
    config: &ServerConfig,
    tracker: Arc<ConnectionTracker>,
) -> Result<()> {
    listener.set_nonblocking(true)?;
    let mut listener = TcpListener::from_std(listener);

    let poll = Poll::new()?;
    let registry = poll.registry().try_clone()?;
    registry.register(&mut listener, LISTENER, Interest::READABLE)?;

    let event_loop = Arc::new(EventLoop {
        app,
        poll: Mutex::new(poll),
        registry,
        listener,
        connections: Mutex::new(HashMap::new()),
        next_token: AtomicUsize::new(LISTENER.0 + 1),
        tracker,
        limits: config.limits(),
        poll_timeout: config.poll_timeout,
        events_capacity: config.events_capacity,
    });

    let workers = (0..config.workers.max(1))
        .map(|id| {
            let event_loop = Arc::clone(&event_loop);
            thread::Builder::new()
                .name(format!("trellis-event-{}", id))
                .spawn(move || event_loop.worker())
        })
        .collect::<io::Result<Vec<_>>>()?;

    for worker in workers {
        let _ = worker.join();
    }

    event_loop.close_all();
    Ok(())
}
