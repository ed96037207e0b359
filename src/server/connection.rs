use std::fs::{self, File};
use std::io::{self, IoSlice, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::fd::AsRawFd;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use tracing::{debug, warn};

use crate::core::constants::{READ_BUFFER_SIZE, WRITE_BUFFER_SIZE};
use crate::core::context::ServerContext;
use crate::core::error::Result;
use crate::core::poller::Interest;
use crate::core::socket::prepare_client;
use crate::core::user_data::Token;
use crate::protocol::http1::{ParseStatus, RequestParser};
use crate::protocol::response::{HttpCode, WriteBuf};

/// What the reactor must do with a connection after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Re-arm for read readiness.
    AwaitRead,
    /// Re-arm for write readiness.
    AwaitWrite,
    Close,
}

impl NextStep {
    pub fn interest(self) -> Option<Interest> {
        match self {
            NextStep::AwaitRead => Some(Interest::Read),
            NextStep::AwaitWrite => Some(Interest::Write),
            NextStep::Close => None,
        }
    }
}

/// One accepted client socket and everything needed to serve it.
///
/// A connection is only ever held by one thread: the reactor while it waits
/// for readiness or writes, or a single worker while it runs [`process`].
/// Dropping it deregisters the socket, closes it and releases its live-count.
///
/// [`process`]: Connection::process
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    token: usize,
    ctx: Arc<ServerContext>,

    request: RequestParser,

    real_file: PathBuf,
    file_len: usize,
    file: Option<Mmap>,

    write_buf: WriteBuf,
    bytes_sent: usize,
    // 0 when nothing is pending, 2 once header + file segments are staged
    iv_count: usize,
}

impl Connection {
    /// Bind a freshly accepted socket and arm it for its first read.
    pub fn init(
        stream: TcpStream,
        peer: SocketAddr,
        token: usize,
        ctx: &Arc<ServerContext>,
    ) -> io::Result<Box<Self>> {
        prepare_client(&stream)?;
        ctx.poller
            .add(stream.as_raw_fd(), Token::Conn(token), Interest::Read)?;
        ctx.connection_opened();

        Ok(Box::new(Self {
            stream,
            peer,
            token,
            ctx: Arc::clone(ctx),
            request: RequestParser::with_capacity(READ_BUFFER_SIZE),
            real_file: PathBuf::new(),
            file_len: 0,
            file: None,
            write_buf: WriteBuf::with_capacity(WRITE_BUFFER_SIZE),
            bytes_sent: 0,
            iv_count: 0,
        }))
    }

    /// Clear parse and response state for the next request on this socket.
    pub fn reset(&mut self) {
        self.unmap();
        self.request.reset();
        self.real_file.clear();
        self.file_len = 0;
        self.write_buf.clear();
        self.bytes_sent = 0;
        self.iv_count = 0;
    }

    pub fn close(self) {
        debug!(peer = %self.peer, token = self.token, "closing connection");
    }

    pub fn token(&self) -> usize {
        self.token
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn raw_fd(&self) -> i32 {
        self.stream.as_raw_fd()
    }

    pub fn request(&self) -> &RequestParser {
        &self.request
    }

    pub fn real_file(&self) -> &Path {
        &self.real_file
    }

    pub fn is_mapped(&self) -> bool {
        self.file.is_some()
    }

    /// Drain the socket into the read buffer until it would block.
    ///
    /// Returns `false` when the peer has gone away, the socket failed, or the
    /// buffer was already full.
    pub fn read(&mut self) -> bool {
        if self.request.is_full() {
            return false;
        }
        loop {
            let spare = self.request.spare_mut();
            if spare.is_empty() {
                // full; process() answers with 400 if the request is still open
                return true;
            }
            match self.stream.read(spare) {
                Ok(0) => return false,
                Ok(n) => self.request.wrote(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return true,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(peer = %self.peer, error = %e, "recv failed");
                    return false;
                }
            }
        }
    }

    /// Parse what has been read and, once a request is complete, stage its response.
    pub fn process(&mut self) -> NextStep {
        let code = match self.request.parse() {
            ParseStatus::Incomplete if self.request.is_full() => {
                debug!(peer = %self.peer, "request does not fit the read buffer");
                HttpCode::BadRequest
            }
            ParseStatus::Incomplete => return NextStep::AwaitRead,
            ParseStatus::Complete => self.do_request(),
            ParseStatus::Bad => HttpCode::BadRequest,
        };

        match self.process_write(code) {
            Ok(()) => NextStep::AwaitWrite,
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "failed to build response");
                self.unmap();
                NextStep::Close
            }
        }
    }

    /// Send the staged segments with one vectored write per attempt.
    pub fn write(&mut self) -> NextStep {
        if self.iv_count == 0 {
            self.reset();
            return NextStep::AwaitRead;
        }

        loop {
            let head = self.write_buf.as_bytes();
            let body: &[u8] = self.file.as_deref().unwrap_or_default();
            if self.bytes_sent >= head.len() + body.len() {
                break;
            }
            let (head, body) = if self.bytes_sent < head.len() {
                (&head[self.bytes_sent..], body)
            } else {
                (&[][..], &body[self.bytes_sent - head.len()..])
            };

            let res = self
                .stream
                .write_vectored(&[IoSlice::new(head), IoSlice::new(body)]);
            match res {
                Ok(0) => {
                    self.unmap();
                    return NextStep::Close;
                }
                Ok(n) => self.bytes_sent += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return NextStep::AwaitWrite,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(peer = %self.peer, error = %e, "send failed");
                    self.unmap();
                    return NextStep::Close;
                }
            }
        }

        self.unmap();
        self.iv_count = 0;
        if self.request.keep_alive() {
            self.reset();
            NextStep::AwaitRead
        } else {
            NextStep::Close
        }
    }

    fn do_request(&mut self) -> HttpCode {
        let url = self.request.url();
        let path = url.split(['?', '#']).next().unwrap_or(url);
        if path.split('/').any(|segment| segment == "..") {
            debug!(peer = %self.peer, url, "refusing path traversal");
            return HttpCode::ForbiddenRequest;
        }

        let mut real = self.ctx.config.doc_root.clone().into_os_string();
        real.push(path);
        self.real_file = PathBuf::from(real);
        debug!(peer = %self.peer, host = ?self.request.host(), file = %self.real_file.display(), "resolving");

        let meta = match fs::metadata(&self.real_file) {
            Ok(meta) => meta,
            Err(_) => return HttpCode::NoResource,
        };
        if meta.permissions().mode() & 0o004 == 0 {
            return HttpCode::ForbiddenRequest;
        }
        if meta.is_dir() {
            return HttpCode::BadRequest;
        }

        let file = match File::open(&self.real_file) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                return HttpCode::ForbiddenRequest;
            }
            Err(_) => return HttpCode::NoResource,
        };
        if meta.len() == 0 {
            self.file_len = 0;
            return HttpCode::FileRequest;
        }

        // SAFETY: the mapping is read-only and private to this connection. A
        // concurrent truncation of the file by another process could still fault
        // on access; serving from a document root assumes files are not
        // rewritten in place while being served.
        match unsafe { Mmap::map(&file) } {
            Ok(map) => {
                self.file_len = map.len();
                self.file = Some(map);
                HttpCode::FileRequest
            }
            Err(e) => {
                warn!(file = %self.real_file.display(), error = %e, "mmap failed");
                HttpCode::InternalError
            }
        }
    }

    fn process_write(&mut self, code: HttpCode) -> Result<()> {
        self.write_buf.clear();
        self.write_buf
            .render(code, self.file_len, self.request.keep_alive())?;
        self.bytes_sent = 0;
        self.iv_count = 2;
        Ok(())
    }

    fn unmap(&mut self) {
        self.file = None;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.unmap();
        if let Err(e) = self.ctx.poller.delete(self.stream.as_raw_fd()) {
            debug!(peer = %self.peer, error = %e, "epoll delete failed");
        }
        self.ctx.connection_closed();
    }
}
