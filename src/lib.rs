//! flint - a static file server on a one-shot epoll reactor
//!
//! One reactor thread owns every socket; a bounded worker pool parses
//! requests and stages responses; files are served from read-only memory maps
//! with a single vectored write per attempt.

pub mod core;
pub mod protocol;
pub mod server;

pub use crate::core::ServerContext;
pub use server::{Reactor, ServerConfig};
