//! Native HTTP server
//!
//! Two scheduling models share one [`App`] behind a configuration switch:
//! - [`ServerMode::ThreadPool`]: each accepted connection is owned by one
//!   pooled thread doing blocking I/O for its whole lifetime
//! - [`ServerMode::EventDriven`]: a few workers share one readiness poller
//!   and one connection table, doing non-blocking I/O
//!
//! Both frame requests with [`Framer`](crate::connection::Framer) and answer
//! them with [`App::respond`].

pub mod event;
pub mod pool;

use crate::connection::{Limits, DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_HEADER_SIZE};
use crate::{App, Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Scheduling model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerMode {
    ThreadPool,
    #[default]
    EventDriven,
}

impl ServerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerMode::ThreadPool => "pool",
            ServerMode::EventDriven => "event",
        }
    }
}

impl FromStr for ServerMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pool" | "thread-pool" | "threadpool" => Ok(ServerMode::ThreadPool),
            "event" | "event-driven" | "evented" => Ok(ServerMode::EventDriven),
            _ => Err(Error::InvalidMode(s.to_string())),
        }
    }
}

impl fmt::Display for ServerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub mode: ServerMode,
    /// Event-loop workers sharing the poller
    pub workers: usize,
    /// Threads in the blocking pool
    pub pool_size: usize,
    pub max_header_size: usize,
    pub max_body_size: usize,
    /// Upper bound on one poller wait
    pub poll_timeout: Duration,
    /// Readiness events drained per wait
    pub events_capacity: usize,
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            mode: ServerMode::default(),
            workers: 4,
            pool_size: num_cpus::get() * 2,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            poll_timeout: Duration::from_millis(100),
            events_capacity: 1024,
            backlog: 1024,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn mode(mut self, mode: ServerMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }

    pub fn max_header_size(mut self, size: usize) -> Self {
        self.max_header_size = size;
        self
    }

    pub fn max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = capacity.max(1);
        self
    }

    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Framing ceilings for each connection
    pub fn limits(&self) -> Limits {
        Limits {
            max_header_size: self.max_header_size,
            max_body_size: self.max_body_size,
        }
    }

    fn socket_addr(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("cannot resolve {}:{}", self.host, self.port),
                ))
            })
    }
}

/// Tracks active connections and the stop signal
#[derive(Debug, Default)]
pub(crate) struct ConnectionTracker {
    active: AtomicUsize,
    shutting_down: AtomicBool,
}

impl ConnectionTracker {
    #[inline]
    pub(crate) fn opened(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn closed(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn start_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

/// Remote control for a running server
#[derive(Debug, Clone)]
pub struct ServerHandle {
    tracker: Arc<ConnectionTracker>,
    addr: SocketAddr,
}

impl ServerHandle {
    /// Stop accepting and let `run` return
    ///
    /// Connections already being served finish their current exchange.
    pub fn shutdown(&self) {
        if self.tracker.is_shutting_down() {
            return;
        }
        self.tracker.start_shutdown();
        // Wake an accept blocked in the thread-pool loop
        let _ = TcpStream::connect_timeout(&wake_addr(self.addr), Duration::from_secs(1));
    }

    pub fn is_shutting_down(&self) -> bool {
        self.tracker.is_shutting_down()
    }

    /// Connections currently open
    pub fn active_connections(&self) -> usize {
        self.tracker.count()
    }
}

fn wake_addr(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => (Ipv4Addr::LOCALHOST, addr.port()).into(),
        IpAddr::V6(ip) if ip.is_unspecified() => (Ipv6Addr::LOCALHOST, addr.port()).into(),
        _ => addr,
    }
}

/// Create the listening socket
pub fn create_listener(addr: &SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // Allow binding to an address in TIME_WAIT
    socket.set_reuse_address(true)?;
    socket.set_nodelay(true)?;

    socket.bind(&(*addr).into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

/// HTTP server bound to a listening socket
pub struct Server<C> {
    app: Arc<App<C>>,
    config: ServerConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    tracker: Arc<ConnectionTracker>,
}

impl<C: Send + Sync + 'static> Server<C> {
    /// Bind the listener; serving starts with [`Server::run`]
    pub fn bind(app: App<C>, config: ServerConfig) -> Result<Self> {
        let addr = config.socket_addr()?;
        let listener = create_listener(&addr, config.backlog)?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            app: Arc::new(app),
            config,
            listener,
            local_addr,
            tracker: Arc::new(ConnectionTracker::default()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            tracker: Arc::clone(&self.tracker),
            addr: self.local_addr,
        }
    }

    /// Serve until [`ServerHandle::shutdown`] is called
    pub fn run(self) -> Result<()> {
        tracing::info!(
            addr = %self.local_addr,
            mode = %self.config.mode,
            "listening"
        );

        let result = match self.config.mode {
            ServerMode::ThreadPool => {
                pool::run(self.listener, self.app, &self.config, Arc::clone(&self.tracker))
            }
            ServerMode::EventDriven => {
                event::run(self.listener, self.app, &self.config, Arc::clone(&self.tracker))
            }
        };

        tracing::info!(addr = %self.local_addr, "stopped");
        result
    }
}
