use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::{Receiver, unbounded};
use tracing::{debug, info, trace, warn};

use crate::core::context::ServerContext;
use crate::core::poller::{Event, Events};
use crate::core::user_data::Token;

use super::connection::{Connection, NextStep};
use super::connection_table::ConnectionTable;
use super::thread_pool::{Rejected, ThreadPool};

/// A connection coming back from a worker, with what to arm next.
struct Completion {
    conn: Box<Connection>,
    step: NextStep,
}

/// The single-threaded event loop
///
/// Owns the listener, the connection table and the worker pool. Every socket
/// operation (accept, recv, send, epoll re-arm, close) happens on the thread
/// running [`Reactor::run`]; workers only parse and build responses, then hand
/// the connection back over the completion channel and poke the waker.
pub struct Reactor {
    ctx: Arc<ServerContext>,
    listener: TcpListener,
    table: ConnectionTable,
    pool: ThreadPool<Box<Connection>>,
    completions: Receiver<Completion>,
    events: Events,
}

impl Reactor {
    pub fn new(listener: TcpListener, ctx: Arc<ServerContext>) -> anyhow::Result<Self> {
        listener
            .set_nonblocking(true)
            .context("setting listener non-blocking")?;
        ctx.poller
            .add_level(listener.as_raw_fd(), Token::Listener)
            .context("registering listener")?;
        ctx.poller
            .add_level(ctx.waker.as_raw_fd(), Token::Waker)
            .context("registering waker")?;

        let (done_tx, done_rx) = unbounded::<Completion>();
        let worker_ctx = Arc::clone(&ctx);
        let config = &ctx.config;
        let pool = ThreadPool::new(
            config.worker_count,
            config.max_queue_depth,
            config.pin_workers,
            move |mut conn: Box<Connection>| {
                let step = conn.process();
                // send before waking so the reactor finds it when it drains
                if done_tx.send(Completion { conn, step }).is_ok() {
                    worker_ctx.waker.wake();
                }
            },
        )
        .context("starting worker pool")?;

        if !config.doc_root.is_dir() {
            warn!(doc_root = %config.doc_root.display(), "document root is not a directory");
        }

        Ok(Self {
            table: ConnectionTable::new(config.max_connections),
            events: Events::with_capacity(config.max_events),
            listener,
            pool,
            completions: done_rx,
            ctx,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run until [`ServerContext::shutdown`] is called.
    pub fn run(&mut self) -> anyhow::Result<()> {
        info!(
            addr = ?self.local_addr().ok(),
            workers = self.pool.worker_count(),
            max_connections = self.table.capacity(),
            doc_root = %self.ctx.config.doc_root.display(),
            "reactor running"
        );
        while !self.ctx.is_shutting_down() {
            self.poll_once(None).context("epoll wait failed")?;
        }
        self.close_idle();
        info!("reactor stopped");
        Ok(())
    }

    /// Wait for one batch of readiness events and dispatch it.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        let n = self.ctx.poller.wait(&mut self.events, timeout)?;
        for i in 0..n {
            let Some(event) = self.events.get(i) else {
                break;
            };
            match event.token {
                Token::Listener => self.accept_all(),
                Token::Waker => {
                    self.ctx.waker.drain();
                    self.drain_completions();
                }
                Token::Conn(id) => self.handle_client(id, event),
            }
        }
        Ok(n)
    }

    fn accept_all(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        // dropping `stream` closes it without sending anything
        if self.ctx.at_capacity() {
            warn!(%peer, live = self.ctx.live_connections(), "connection limit reached, refusing");
            return;
        }
        let Some(id) = self.table.alloc() else {
            warn!(%peer, "connection table full, refusing");
            return;
        };
        match Connection::init(stream, peer, id, &self.ctx) {
            Ok(conn) => {
                debug!(%peer, token = id, open = self.table.len(), "accepted");
                self.table.restore(id, conn);
            }
            Err(e) => {
                warn!(%peer, error = %e, "failed to register connection");
                self.table.release(id);
            }
        }
    }

    fn handle_client(&mut self, id: usize, event: Event) {
        let Some(mut conn) = self.table.take(id) else {
            trace!(token = id, "event for a slot that is not parked");
            return;
        };

        if event.is_hangup() {
            self.close(id, conn);
        } else if event.is_readable() {
            if !conn.read() {
                self.close(id, conn);
                return;
            }
            if let Err(rejected) = self.pool.append(conn) {
                if let Rejected::Full(_) = rejected {
                    warn!(token = id, "worker queue full, shedding connection");
                }
                self.close(id, rejected.into_inner());
            }
        } else if event.is_writable() {
            let step = conn.write();
            self.apply(id, conn, step);
        } else {
            self.apply(id, conn, NextStep::AwaitRead);
        }
    }

    fn drain_completions(&mut self) {
        while let Ok(Completion { conn, step }) = self.completions.try_recv() {
            let id = conn.token();
            self.apply(id, conn, step);
        }
    }

    /// Re-arm or close; no connection leaves here unarmed.
    fn apply(&mut self, id: usize, conn: Box<Connection>, step: NextStep) {
        let Some(interest) = step.interest() else {
            self.close(id, conn);
            return;
        };
        match self
            .ctx
            .poller
            .rearm(conn.raw_fd(), Token::Conn(id), interest)
        {
            Ok(()) => self.table.restore(id, conn),
            Err(e) => {
                warn!(token = id, error = %e, "re-arm failed");
                self.close(id, conn);
            }
        }
    }

    fn close(&mut self, id: usize, conn: Box<Connection>) {
        conn.close();
        self.table.release(id);
    }

    fn close_idle(&mut self) {
        for (id, conn) in self.table.drain_idle() {
            self.close(id, conn);
        }
    }
}
