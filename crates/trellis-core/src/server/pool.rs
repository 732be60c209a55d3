//! Thread-pool mode
//!
//! The accept loop hands each connection to a bounded pool. A pooled thread
//! owns its connection for every keep-alive exchange and blocks on each read
//! and write. Once every thread is busy, new connections wait in the accept
//! backlog.

use super::{ConnectionTracker, ServerConfig};
use crate::connection::{Framer, Limits};
use crate::{App, Result};
use bumpalo::Bump;
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

const READ_CHUNK: usize = 8 * 1024;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of threads pulling jobs from one queue
pub struct ThreadPool {
    sender: Option<SyncSender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(size: usize) -> io::Result<Self> {
        // Rendezvous: a job is only handed over to an idle thread
        let (sender, receiver) = mpsc::sync_channel::<Job>(0);
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..size.max(1))
            .map(|id| {
                let receiver = Arc::clone(&receiver);
                thread::Builder::new()
                    .name(format!("trellis-pool-{}", id))
                    .spawn(move || worker_loop(&receiver))
            })
            .collect::<io::Result<Vec<_>>>()?;

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Hand a job to an idle thread, blocking until one is free
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(sender) = &self.sender {
            // Workers only hang up after the sender is dropped
            let _ = sender.send(Box::new(job));
        }
    }
}

fn worker_loop(receiver: &Mutex<Receiver<Job>>) {
    loop {
        // The guard is a temporary, released before the job runs
        let job = receiver.lock().recv();
        match job {
            Ok(job) => job(),
            Err(_) => return,
        }
    }
}

impl Drop for ThreadPool {
    /// Let running jobs finish, then join every thread
    fn drop(&mut self) {
        drop(self.sender.take());
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Accept until shutdown, serving each connection on the pool
pub(crate) fn run<C: Send + Sync + 'static>(
    listener: TcpListener,
    app: Arc<App<C>>,
    config: &ServerConfig,
    tracker: Arc<ConnectionTracker>,
) -> Result<()> {
    let pool = ThreadPool::new(config.pool_size)?;
    let limits = config.limits();

    for stream in listener.incoming() {
        if tracker.is_shutting_down() {
            break;
        }
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                tracing::debug!(error = %e, "accept failed");
                continue;
            }
        };

        let app = Arc::clone(&app);
        let tracker = Arc::clone(&tracker);
        tracker.opened();
        pool.execute(move || {
            serve_connection(stream, &app, limits);
            tracker.closed();
        });
    }

    // Dropping the pool waits for in-flight connections
    drop(pool);
    Ok(())
}

/// Serve one connection until it closes or is no longer keep-alive
pub fn serve_connection<C: Send + Sync + 'static>(
    mut stream: TcpStream,
    app: &App<C>,
    limits: Limits,
) {
    let peer = match stream.peer_addr() {
        Ok(peer) => peer,
        Err(_) => return,
    };
    let _ = stream.set_nodelay(true);
    tracing::debug!(%peer, "connection accepted");

    match exchange_loop(&mut stream, peer, app, limits) {
        Ok(()) => tracing::debug!(%peer, "connection closed"),
        Err(e) => tracing::debug!(%peer, error = %e, "connection aborted"),
    }
}

fn exchange_loop<C: Send + Sync + 'static>(
    stream: &mut TcpStream,
    peer: SocketAddr,
    app: &App<C>,
    limits: Limits,
) -> Result<()> {
    let mut framer = Framer::new(limits);
    let mut arena = Bump::new();
    let mut chunk = [0u8; READ_CHUNK];
    let mut out = Vec::with_capacity(1024);

    loop {
        // Pipelined bytes may already hold a full request
        if !framer.is_ready() {
            loop {
                let n = stream.read(&mut chunk)?;
                if n == 0 {
                    return Ok(());
                }
                if framer.feed(&chunk[..n])? {
                    break;
                }
            }
        }

        out.clear();
        let keep_alive = app.respond(&framer, peer, &arena, &mut out)?;
        stream.write_all(&out)?;
        arena.reset();

        if !keep_alive {
            return Ok(());
        }
        framer.reset()?;
    }
}
