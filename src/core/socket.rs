//! Socket utility functions for the file server
//!
//! This module provides the low-level socket setup the reactor relies on:
//! - a non-blocking SO_REUSEADDR listener
//! - per-connection socket options
//! - SIGPIPE suppression so a peer reset surfaces as EPIPE instead of killing us

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};

use crate::core::constants::LISTEN_BACKLOG;

/// Create a non-blocking listening socket with SO_REUSEADDR
pub fn make_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let sock = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    sock.set_reuse_address(true)?;
    sock.bind(&addr.into())?;
    sock.listen(LISTEN_BACKLOG)?;
    sock.set_nonblocking(true)?;
    Ok(sock.into())
}

/// Prepare a freshly accepted client socket for the reactor.
pub fn prepare_client(stream: &TcpStream) -> io::Result<()> {
    stream.set_nonblocking(true)?;
    SockRef::from(stream).set_reuse_address(true)?;
    Ok(())
}

pub fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_is_nonblocking() {
        let listener = make_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let err = listener.accept().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn client_gets_reuse_address() {
        let listener = make_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let stream = loop {
            match listener.accept() {
                Ok((s, _)) => break s,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => std::thread::yield_now(),
                Err(e) => panic!("accept failed: {e}"),
            }
        };
        prepare_client(&stream).unwrap();
        assert!(SockRef::from(&stream).reuse_address().unwrap());
    }
}
