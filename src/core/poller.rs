use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

use libc::{c_int, c_void, epoll_event};

use crate::core::user_data::{Token, pack_token, unpack_token};

/// What a one-shot registration should fire on next.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Interest {
    Read,
    Write,
}

impl Interest {
    fn bits(self) -> u32 {
        let base = match self {
            Interest::Read => libc::EPOLLIN,
            Interest::Write => libc::EPOLLOUT,
        };
        (base | libc::EPOLLET | libc::EPOLLONESHOT | libc::EPOLLRDHUP) as u32
    }
}

/// Thin wrapper over an epoll instance.
///
/// Client sockets are always registered edge-triggered and one-shot: after an
/// event fires the registration stays disarmed until [`Poller::rearm`] is
/// called for it. The listener and the waker are level-triggered.
#[derive(Debug)]
pub struct Poller {
    epoll: OwnedFd,
}

impl Poller {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: epoll_create1 just returned this descriptor and nothing else owns it.
        Ok(Self {
            epoll: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Register a level-triggered read source (listener, waker).
    pub fn add_level(&self, fd: RawFd, token: Token) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, libc::EPOLLIN as u32)
    }

    /// Register a client socket, armed once for `interest`.
    pub fn add(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, interest.bits())
    }

    /// Re-arm a one-shot registration after its event was consumed.
    pub fn rearm(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, interest.bits())
    }

    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        let res = unsafe {
            libc::epoll_ctl(
                self.epoll.as_raw_fd(),
                libc::EPOLL_CTL_DEL,
                fd,
                ptr::null_mut(),
            )
        };
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Block until at least one registration is ready or `timeout` elapses.
    ///
    /// `None` waits forever. An interrupted wait reports zero events.
    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = timeout
            .map(|t| t.as_millis().min(c_int::MAX as u128) as c_int)
            .unwrap_or(-1);
        let res = unsafe {
            libc::epoll_wait(
                self.epoll.as_raw_fd(),
                events.buf.as_mut_ptr(),
                events.buf.len() as c_int,
                timeout_ms,
            )
        };
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                events.len = 0;
                return Ok(0);
            }
            return Err(err);
        }
        events.len = res as usize;
        Ok(events.len)
    }

    fn ctl(&self, op: c_int, fd: RawFd, token: Token, bits: u32) -> io::Result<()> {
        let mut event = epoll_event {
            events: bits,
            u64: pack_token(token),
        };
        if unsafe { libc::epoll_ctl(self.epoll.as_raw_fd(), op, fd, &mut event) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Reusable buffer of readiness events filled by [`Poller::wait`].
pub struct Events {
    buf: Vec<epoll_event>,
    len: usize,
}

impl Events {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: vec![epoll_event { events: 0, u64: 0 }; cap.max(1)],
            len: 0,
        }
    }

    pub fn get(&self, i: usize) -> Option<Event> {
        self.buf[..self.len].get(i).map(|ev| {
            // copy out of the (possibly packed) struct before inspecting
            let bits = ev.events;
            let tag = ev.u64;
            Event {
                token: unpack_token(tag),
                bits,
            }
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        (0..self.len).filter_map(move |i| self.get(i))
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Event {
    pub token: Token,
    bits: u32,
}

impl Event {
    pub fn is_readable(&self) -> bool {
        self.bits & libc::EPOLLIN as u32 != 0
    }

    pub fn is_writable(&self) -> bool {
        self.bits & libc::EPOLLOUT as u32 != 0
    }

    /// Peer hung up or the socket is in error.
    pub fn is_hangup(&self) -> bool {
        self.bits & (libc::EPOLLRDHUP | libc::EPOLLHUP | libc::EPOLLERR) as u32 != 0
    }
}

/// eventfd used by worker threads to pull the reactor out of `epoll_wait`.
#[derive(Debug)]
pub struct Waker {
    fd: OwnedFd,
}

impl Waker {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: eventfd just returned this descriptor and nothing else owns it.
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    pub fn wake(&self) {
        let kick: u64 = 1;
        let res = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &kick as *const u64 as *const c_void,
                size_of::<u64>(),
            )
        };
        // EAGAIN means the counter is saturated, which still wakes the reader
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock {
                tracing::warn!(error = %err, "waker write failed");
            }
        }
    }

    /// Reset the counter so the level-triggered registration goes quiet.
    pub fn drain(&self) {
        let mut buf = [0u8; 8];
        let res = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
            )
        };
        // EAGAIN only means another drain already reset the counter
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock {
                tracing::warn!(error = %err, "waker drain failed");
            }
        }
    }
}

impl AsRawFd for Waker {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
