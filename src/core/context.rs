use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::core::poller::{Poller, Waker};
use crate::server::config::ServerConfig;

/// State shared by the reactor, the worker pool and every connection.
///
/// Registration changes and live-count updates only happen on the reactor
/// thread; workers touch nothing here but the waker.
#[derive(Debug)]
pub struct ServerContext {
    pub poller: Poller,
    pub waker: Waker,
    pub config: ServerConfig,
    live_connections: AtomicUsize,
    shutdown: AtomicBool,
}

impl ServerContext {
    pub fn new(config: ServerConfig) -> io::Result<Self> {
        Ok(Self {
            poller: Poller::new()?,
            waker: Waker::new()?,
            config,
            live_connections: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn live_connections(&self) -> usize {
        self.live_connections.load(Ordering::Acquire)
    }

    /// Advisory admission check against `max_connections`.
    pub fn at_capacity(&self) -> bool {
        self.live_connections() >= self.config.max_connections
    }

    pub(crate) fn connection_opened(&self) {
        self.live_connections.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn connection_closed(&self) {
        let prev = self.live_connections.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "live connection count underflow");
    }

    /// Ask the reactor to stop after its current iteration.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.waker.wake();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}
