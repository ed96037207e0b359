//! Process-level plumbing shared by every other module
//!
//! - constants: buffer sizes and default limits
//! - context: the shared reactor/worker state
//! - poller: epoll registration and the eventfd waker
//! - socket: listener and client socket setup

pub mod constants;
pub mod context;
pub mod error;
pub mod poller;
pub mod socket;
pub mod user_data;

pub use context::ServerContext;
pub use error::{Error, Result};
