use std::fmt::{self, Write as _};

use crate::core::error::{Error, Result};

/// Result of handling one request, before it is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpCode {
    /// The target was mapped and is ready to stream.
    FileRequest,
    BadRequest,
    NoResource,
    ForbiddenRequest,
    InternalError,
}

impl HttpCode {
    pub fn status(self) -> u16 {
        match self {
            HttpCode::FileRequest => 200,
            HttpCode::BadRequest => 400,
            HttpCode::ForbiddenRequest => 403,
            HttpCode::NoResource => 404,
            HttpCode::InternalError => 500,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            HttpCode::FileRequest => "OK",
            HttpCode::BadRequest => "Bad Request",
            HttpCode::ForbiddenRequest => "Forbidden",
            HttpCode::NoResource => "Not Found",
            HttpCode::InternalError => "Internal Error",
        }
    }

    /// Fixed body sent with error statuses.
    pub fn form(self) -> &'static str {
        match self {
            HttpCode::FileRequest => "",
            HttpCode::BadRequest => "error_400_form: BAD_REQUEST\n",
            HttpCode::ForbiddenRequest => "error_403_form: FORBIDDED_REQUEST\n",
            HttpCode::NoResource => "The requested file was not found on this server. \n",
            HttpCode::InternalError => "error_500_form: INTERNAL_ERROR\n",
        }
    }
}

/// Fixed-capacity buffer for the status line, headers and error bodies.
///
/// Every append either lands whole or fails with
/// [`Error::WriteBufferFull`], leaving the previously written bytes intact.
pub struct WriteBuf {
    buf: Box<[u8]>,
    write_idx: usize,
}

impl WriteBuf {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: vec![0; cap].into_boxed_slice(),
            write_idx: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.write_idx]
    }

    pub fn len(&self) -> usize {
        self.write_idx
    }

    pub fn is_empty(&self) -> bool {
        self.write_idx == 0
    }

    pub fn clear(&mut self) {
        self.write_idx = 0;
    }

    pub fn add_response(&mut self, args: fmt::Arguments<'_>) -> Result<()> {
        let mut cursor = SliceCursor {
            buf: &mut self.buf[self.write_idx..],
            pos: 0,
            needed: 0,
        };
        if cursor.write_fmt(args).is_err() {
            return Err(Error::WriteBufferFull {
                needed: cursor.needed,
                remaining: cursor.buf.len(),
            });
        }
        self.write_idx += cursor.pos;
        Ok(())
    }

    pub fn add_status_line(&mut self, status: u16, title: &str) -> Result<()> {
        self.add_response(format_args!("HTTP/1.1 {status} {title}\r\n"))
    }

    pub fn add_headers(&mut self, content_len: usize, keep_alive: bool) -> Result<()> {
        self.add_content_length(content_len)?;
        self.add_content_type()?;
        self.add_linger(keep_alive)?;
        self.add_blank_line()
    }

    pub fn add_content_length(&mut self, content_len: usize) -> Result<()> {
        self.add_response(format_args!("Content-Length: {content_len}\r\n"))
    }

    pub fn add_content_type(&mut self) -> Result<()> {
        self.add_response(format_args!("Content-Type: text/html\r\n"))
    }

    pub fn add_linger(&mut self, keep_alive: bool) -> Result<()> {
        let value = if keep_alive { "keep-alive" } else { "close" };
        self.add_response(format_args!("Connection: {value}\r\n"))
    }

    pub fn add_blank_line(&mut self) -> Result<()> {
        self.add_response(format_args!("\r\n"))
    }

    pub fn add_content(&mut self, content: &str) -> Result<()> {
        self.add_response(format_args!("{content}"))
    }

    /// Render the complete head for `code`; error statuses include their body.
    pub fn render(&mut self, code: HttpCode, file_len: usize, keep_alive: bool) -> Result<()> {
        self.add_status_line(code.status(), code.title())?;
        if code == HttpCode::FileRequest {
            return self.add_headers(file_len, keep_alive);
        }
        let form = code.form();
        self.add_headers(form.len(), keep_alive)?;
        self.add_content(form)
    }
}

struct SliceCursor<'a> {
    buf: &'a mut [u8],
    pos: usize,
    needed: usize,
}

impl fmt::Write for SliceCursor<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let end = self.pos + s.len();
        if end > self.buf.len() {
            self.needed = end;
            return Err(fmt::Error);
        }
        self.buf[self.pos..end].copy_from_slice(s.as_bytes());
        self.pos = end;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_not_found() {
        let mut buf = WriteBuf::with_capacity(1024);
        buf.render(HttpCode::NoResource, 0, false).unwrap();
        let text = std::str::from_utf8(buf.as_bytes()).unwrap();
        let form = HttpCode::NoResource.form();
        assert_eq!(
            text,
            format!(
                "HTTP/1.1 404 Not Found\r\nContent-Length: {}\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n{form}",
                form.len()
            )
        );
    }

    #[test]
    fn file_head_advertises_file_length() {
        let mut buf = WriteBuf::with_capacity(1024);
        buf.render(HttpCode::FileRequest, 12345, true).unwrap();
        let text = std::str::from_utf8(buf.as_bytes()).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 12345\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn overflowing_append_fails_without_partial_write() {
        let mut buf = WriteBuf::with_capacity(24);
        buf.add_status_line(200, "OK").unwrap();
        let before = buf.len();
        let err = buf.add_content_type().unwrap_err();
        assert!(matches!(err, Error::WriteBufferFull { .. }));
        assert_eq!(buf.len(), before);
    }

    #[test]
    fn tiny_buffer_cannot_render_error_page() {
        let mut buf = WriteBuf::with_capacity(64);
        assert!(buf.render(HttpCode::InternalError, 0, false).is_err());
    }

    #[test]
    fn every_code_has_its_status() {
        let codes = [
            (HttpCode::FileRequest, 200, "OK"),
            (HttpCode::BadRequest, 400, "Bad Request"),
            (HttpCode::ForbiddenRequest, 403, "Forbidden"),
            (HttpCode::NoResource, 404, "Not Found"),
            (HttpCode::InternalError, 500, "Internal Error"),
        ];
        for (code, status, title) in codes {
            assert_eq!(code.status(), status);
            assert_eq!(code.title(), title);
        }
    }
}
