//! Serving pipeline
//!
//! This module wires the pieces that move a request through the server:
//! - Reactor: the epoll event loop owning every socket operation
//! - Connection: per-socket parse state, file mapping and staged response
//! - ThreadPool: bounded worker queue running request processing
//! - ConnectionTable: fixed slot arena indexed by epoll token

pub mod config;
pub mod connection;
pub mod connection_table;
pub mod reactor;
pub mod thread_pool;

pub use config::ServerConfig;
pub use connection::{Connection, NextStep};
pub use connection_table::ConnectionTable;
pub use reactor::Reactor;
pub use thread_pool::{Rejected, ThreadPool};
