use std::ops::Range;

use memchr::memchr2;

/// HTTP/1.1 request parsing
///
/// This module provides the incremental request parser driven by each
/// connection. It includes:
/// - ReadBuf: fixed-capacity receive buffer with the line-scanner cursors
/// - RequestParser: the request-line / headers / body state machine
/// - Small byte helpers shared by the header parsing

// ============================================================================
// Receive Buffer
// ============================================================================

/// Outcome of scanning for the next line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineStatus {
    /// A full `\r\n`-terminated line; the range excludes the terminator.
    Complete(Range<usize>),
    /// Ran out of buffered bytes before a terminator.
    Open,
    /// A `\r` not followed by `\n`, or a `\n` without its `\r`.
    Bad,
}

/// Fixed-capacity receive buffer
///
/// `read_idx` is the next free byte, `checked_idx` the first byte the line
/// scanner has not classified yet, and `start_line` the start of the line
/// currently being assembled. `start_line <= checked_idx <= read_idx <= cap`
/// holds at all times.
pub struct ReadBuf {
    buf: Box<[u8]>,
    read_idx: usize,
    checked_idx: usize,
    start_line: usize,
}

impl ReadBuf {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: vec![0; cap].into_boxed_slice(),
            read_idx: 0,
            checked_idx: 0,
            start_line: 0,
        }
    }

    /// Free space for the next recv
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.read_idx..]
    }

    /// Mark that n bytes were written into the spare space
    pub fn wrote(&mut self, n: usize) {
        assert!(n <= self.buf.len() - self.read_idx, "recv overran buffer");
        self.read_idx += n;
    }

    pub fn is_full(&self) -> bool {
        self.read_idx == self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.read_idx
    }

    pub fn is_empty(&self) -> bool {
        self.read_idx == 0
    }

    pub fn checked(&self) -> usize {
        self.checked_idx
    }

    pub fn clear(&mut self) {
        self.buf.fill(0);
        self.read_idx = 0;
        self.checked_idx = 0;
        self.start_line = 0;
    }

    /// Scan forward from the checked cursor for the next line terminator.
    pub fn scan_line(&mut self) -> LineStatus {
        let window = &self.buf[self.checked_idx..self.read_idx];
        let Some(offset) = memchr2(b'\r', b'\n', window) else {
            self.checked_idx = self.read_idx;
            return LineStatus::Open;
        };
        let at = self.checked_idx + offset;

        if self.buf[at] == b'\n' {
            self.checked_idx = at;
            return LineStatus::Bad;
        }
        if at + 1 == self.read_idx {
            // park on the \r so the next scan sees it together with its \n
            self.checked_idx = at;
            return LineStatus::Open;
        }
        if self.buf[at + 1] != b'\n' {
            self.checked_idx = at;
            return LineStatus::Bad;
        }

        let line = self.start_line..at;
        self.checked_idx = at + 2;
        self.start_line = self.checked_idx;
        LineStatus::Complete(line)
    }

    /// Consume up to `max` raw bytes past the checked cursor.
    pub fn take_raw(&mut self, max: usize) -> Range<usize> {
        let n = max.min(self.read_idx - self.checked_idx);
        let range = self.checked_idx..self.checked_idx + n;
        self.checked_idx += n;
        self.start_line = self.checked_idx;
        range
    }

    pub fn bytes(&self, range: Range<usize>) -> &[u8] {
        &self.buf[range]
    }
}

// ============================================================================
// Request State Machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    RequestLine,
    Headers,
    Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// Need more bytes from the socket.
    Incomplete,
    /// A full request has been parsed.
    Complete,
    /// The request is malformed or unsupported.
    Bad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
}

/// Incremental HTTP/1.1 request parser
///
/// Feed it with [`RequestParser::spare_mut`] / [`RequestParser::wrote`] and
/// call [`RequestParser::parse`] after every read. Splitting the input at any
/// byte boundary yields the same result as delivering it in one piece.
pub struct RequestParser {
    buf: ReadBuf,
    state: CheckState,
    method: Option<Method>,
    url: String,
    version: String,
    host: Option<String>,
    keep_alive: bool,
    content_length: usize,
    content: Vec<u8>,
}

impl RequestParser {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: ReadBuf::with_capacity(cap),
            state: CheckState::RequestLine,
            method: None,
            url: String::new(),
            version: String::new(),
            host: None,
            keep_alive: false,
            content_length: 0,
            content: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = CheckState::RequestLine;
        self.method = None;
        self.url.clear();
        self.version.clear();
        self.host = None;
        self.keep_alive = false;
        self.content_length = 0;
        self.content.clear();
    }

    pub fn spare_mut(&mut self) -> &mut [u8] {
        self.buf.spare_mut()
    }

    pub fn wrote(&mut self, n: usize) {
        self.buf.wrote(n);
    }

    pub fn is_full(&self) -> bool {
        self.buf.is_full()
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn state(&self) -> CheckState {
        self.state
    }

    pub fn method(&self) -> Option<Method> {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn content_length(&self) -> usize {
        self.content_length
    }

    pub fn body(&self) -> &[u8] {
        &self.content
    }

    /// Advance the state machine over everything buffered so far.
    pub fn parse(&mut self) -> ParseStatus {
        loop {
            if self.state == CheckState::Body {
                let needed = self.content_length - self.content.len();
                let range = self.buf.take_raw(needed);
                self.content.extend_from_slice(self.buf.bytes(range));
                if self.content.len() < self.content_length {
                    return ParseStatus::Incomplete;
                }
                self.state = CheckState::RequestLine;
                return ParseStatus::Complete;
            }

            let range = match self.buf.scan_line() {
                LineStatus::Complete(range) => range,
                LineStatus::Open => return ParseStatus::Incomplete,
                LineStatus::Bad => return ParseStatus::Bad,
            };

            match self.state {
                CheckState::RequestLine => {
                    let Some(line) = parse_request_line(self.buf.bytes(range)) else {
                        return ParseStatus::Bad;
                    };
                    self.method = Some(line.method);
                    self.url = line.url;
                    self.version = line.version;
                    self.state = CheckState::Headers;
                }
                CheckState::Headers => match parse_header(self.buf.bytes(range)) {
                    HeaderLine::End if self.content_length == 0 => return ParseStatus::Complete,
                    HeaderLine::End => self.state = CheckState::Body,
                    HeaderLine::Host(value) => {
                        self.host = Some(String::from_utf8_lossy(value).into_owned());
                    }
                    HeaderLine::Connection(value) => {
                        if ascii_equals_ignore_case(value, b"keep-alive") {
                            self.keep_alive = true;
                        }
                    }
                    HeaderLine::ContentLength(Some(n)) => self.content_length = n,
                    HeaderLine::ContentLength(None) => return ParseStatus::Bad,
                    HeaderLine::Other(line) => {
                        tracing::trace!(header = %String::from_utf8_lossy(line), "ignoring header");
                    }
                },
                CheckState::Body => unreachable!("body is consumed above"),
            }
        }
    }
}

// ============================================================================
// Line Parsers
// ============================================================================

#[derive(Debug, PartialEq, Eq)]
struct RequestLine {
    method: Method,
    url: String,
    version: String,
}

/// `GET /index.html HTTP/1.1`
fn parse_request_line(line: &[u8]) -> Option<RequestLine> {
    let mut fields = line
        .split(|&b| b == b' ' || b == b'\t')
        .filter(|f| !f.is_empty());
    let method = fields.next()?;
    let target = fields.next()?;
    let version = fields.next()?;
    if fields.next().is_some() {
        return None;
    }

    if !ascii_equals_ignore_case(method, b"GET") {
        return None;
    }
    if !ascii_equals_ignore_case(version, b"HTTP/1.1") {
        return None;
    }

    let path = strip_scheme_and_authority(target)?;
    if path.first() != Some(&b'/') {
        return None;
    }

    Some(RequestLine {
        method: Method::Get,
        url: std::str::from_utf8(path).ok()?.to_owned(),
        version: "HTTP/1.1".to_owned(),
    })
}

/// Reduce `http://host/path` to `/path`; origin-form targets pass through.
fn strip_scheme_and_authority(target: &[u8]) -> Option<&[u8]> {
    for scheme in [&b"http://"[..], &b"https://"[..]] {
        if target.len() >= scheme.len() && ascii_equals_ignore_case(&target[..scheme.len()], scheme)
        {
            let rest = &target[scheme.len()..];
            let slash = rest.iter().position(|&b| b == b'/')?;
            return Some(&rest[slash..]);
        }
    }
    Some(target)
}

#[derive(Debug, PartialEq, Eq)]
enum HeaderLine<'a> {
    End,
    Host(&'a [u8]),
    Connection(&'a [u8]),
    ContentLength(Option<usize>),
    Other(&'a [u8]),
}

fn parse_header(line: &[u8]) -> HeaderLine<'_> {
    if line.is_empty() {
        return HeaderLine::End;
    }
    let Some(colon_index) = line.iter().position(|&b| b == b':') else {
        return HeaderLine::Other(line);
    };
    let (raw_name, raw_value) = line.split_at(colon_index);
    let value = trim_ascii_whitespace(&raw_value[1..]);

    if ascii_equals_ignore_case(raw_name, b"Host") {
        HeaderLine::Host(value)
    } else if ascii_equals_ignore_case(raw_name, b"Connection") {
        HeaderLine::Connection(value)
    } else if ascii_equals_ignore_case(raw_name, b"Content-Length") {
        HeaderLine::ContentLength(parse_usize_decimal_strict(value))
    } else {
        HeaderLine::Other(line)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

#[inline]
fn ascii_equals_ignore_case(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(&x, &y)| x.eq_ignore_ascii_case(&y))
}

#[inline]
fn trim_ascii_whitespace(mut bytes: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = bytes {
        bytes = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = bytes {
        bytes = rest;
    }
    bytes
}

#[inline]
fn parse_usize_decimal_strict(input: &[u8]) -> Option<usize> {
    let digits = trim_ascii_whitespace(input);
    if digits.is_empty() {
        return None;
    }
    let mut value: usize = 0;
    for &ch in digits {
        if !ch.is_ascii_digit() {
            return None;
        }
        let digit = (ch - b'0') as usize;
        value = value.checked_mul(10)?.checked_add(digit)?;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut RequestParser, bytes: &[u8]) -> ParseStatus {
        let spare = parser.spare_mut();
        spare[..bytes.len()].copy_from_slice(bytes);
        parser.wrote(bytes.len());
        parser.parse()
    }

    fn parser() -> RequestParser {
        RequestParser::with_capacity(2048)
    }

    const KEEP_ALIVE_REQ: &[u8] =
        b"GET /index.html HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n";

    #[test]
    fn parses_simple_get() {
        let mut p = parser();
        assert_eq!(feed(&mut p, KEEP_ALIVE_REQ), ParseStatus::Complete);
        assert_eq!(p.method(), Some(Method::Get));
        assert_eq!(p.url(), "/index.html");
        assert_eq!(p.version(), "HTTP/1.1");
        assert_eq!(p.host(), Some("x"));
        assert!(p.keep_alive());
        assert_eq!(p.content_length(), 0);
    }

    #[test]
    fn byte_by_byte_matches_single_shot() {
        let req = b"GET /a/b.html HTTP/1.1\r\nHost: example.org\r\nUser-Agent: t\r\nContent-Length: 5\r\nConnection: keep-alive\r\n\r\nhello";

        let mut whole = parser();
        assert_eq!(feed(&mut whole, req), ParseStatus::Complete);

        let mut split = parser();
        for (i, byte) in req.iter().enumerate() {
            let status = feed(&mut split, std::slice::from_ref(byte));
            if i + 1 < req.len() {
                assert_eq!(status, ParseStatus::Incomplete, "early finish at byte {i}");
            } else {
                assert_eq!(status, ParseStatus::Complete);
            }
        }

        assert_eq!(split.url(), whole.url());
        assert_eq!(split.host(), whole.host());
        assert_eq!(split.keep_alive(), whole.keep_alive());
        assert_eq!(split.body(), whole.body());
        assert_eq!(split.body(), b"hello");
        assert_eq!(split.state(), CheckState::RequestLine);
    }

    #[test]
    fn split_between_cr_and_lf() {
        let mut p = parser();
        assert_eq!(feed(&mut p, b"GET / HTTP/1.1\r"), ParseStatus::Incomplete);
        assert_eq!(p.state(), CheckState::RequestLine);
        assert_eq!(feed(&mut p, b"\n\r"), ParseStatus::Incomplete);
        assert_eq!(p.state(), CheckState::Headers);
        assert_eq!(feed(&mut p, b"\n"), ParseStatus::Complete);
    }

    #[test]
    fn line_scanner_reports_malformed_terminators() {
        let mut buf = ReadBuf::with_capacity(64);
        buf.spare_mut()[..6].copy_from_slice(b"ab\rcd\n");
        buf.wrote(6);
        assert_eq!(buf.scan_line(), LineStatus::Bad);

        let mut buf = ReadBuf::with_capacity(64);
        buf.spare_mut()[..4].copy_from_slice(b"ab\nc");
        buf.wrote(4);
        assert_eq!(buf.scan_line(), LineStatus::Bad);
    }

    #[test]
    fn checked_cursor_never_moves_backwards() {
        let mut buf = ReadBuf::with_capacity(64);
        let mut last = 0;
        for chunk in [&b"GE"[..], b"T / HT", b"TP/1.1\r", b"\nHost: a\r\n"] {
            buf.spare_mut()[..chunk.len()].copy_from_slice(chunk);
            buf.wrote(chunk.len());
            while let LineStatus::Complete(_) = buf.scan_line() {}
            assert!(buf.checked() >= last);
            last = buf.checked();
        }
        assert_eq!(last, buf.len());
    }

    #[test]
    fn rejects_other_methods_and_versions() {
        assert_eq!(
            feed(&mut parser(), b"POST / HTTP/1.1\r\n\r\n"),
            ParseStatus::Bad
        );
        assert_eq!(
            feed(&mut parser(), b"GET / HTTP/1.0\r\n\r\n"),
            ParseStatus::Bad
        );
        assert_eq!(feed(&mut parser(), b"GET /\r\n\r\n"), ParseStatus::Bad);
        assert_eq!(
            feed(&mut parser(), b"GET / HTTP/1.1 extra\r\n\r\n"),
            ParseStatus::Bad
        );
    }

    #[test]
    fn method_and_version_are_case_insensitive() {
        let mut p = parser();
        assert_eq!(feed(&mut p, b"get / http/1.1\r\n\r\n"), ParseStatus::Complete);
        assert_eq!(p.url(), "/");
    }

    #[test]
    fn absolute_uri_is_reduced_to_path() {
        let mut p = parser();
        assert_eq!(
            feed(&mut p, b"GET http://example.com:8080/docs/a.html HTTP/1.1\r\n\r\n"),
            ParseStatus::Complete
        );
        assert_eq!(p.url(), "/docs/a.html");

        let mut p = parser();
        assert_eq!(
            feed(&mut p, b"GET HTTPS://host/a.html HTTP/1.1\r\n\r\n"),
            ParseStatus::Complete
        );
        assert_eq!(p.url(), "/a.html");

        assert_eq!(
            feed(&mut parser(), b"GET https://host HTTP/1.1\r\n\r\n"),
            ParseStatus::Bad
        );
        assert_eq!(
            feed(&mut parser(), b"GET http://example.com HTTP/1.1\r\n\r\n"),
            ParseStatus::Bad
        );
    }

    #[test]
    fn path_must_start_with_slash() {
        assert_eq!(
            feed(&mut parser(), b"GET index.html HTTP/1.1\r\n\r\n"),
            ParseStatus::Bad
        );
    }

    #[test]
    fn connection_close_does_not_keep_alive() {
        let mut p = parser();
        assert_eq!(
            feed(&mut p, b"GET / HTTP/1.1\r\nconnection: close\r\n\r\n"),
            ParseStatus::Complete
        );
        assert!(!p.keep_alive());
    }

    #[test]
    fn bad_content_length_is_rejected() {
        assert_eq!(
            feed(&mut parser(), b"GET / HTTP/1.1\r\nContent-Length: -4\r\n\r\n"),
            ParseStatus::Bad
        );
        assert_eq!(
            feed(&mut parser(), b"GET / HTTP/1.1\r\nContent-Length:\r\n\r\n"),
            ParseStatus::Bad
        );
    }

    #[test]
    fn body_waits_for_declared_length() {
        let mut p = parser();
        assert_eq!(
            feed(&mut p, b"GET / HTTP/1.1\r\nContent-Length: 10\r\n\r\n0123"),
            ParseStatus::Incomplete
        );
        assert_eq!(p.state(), CheckState::Body);
        assert_eq!(feed(&mut p, b"456789"), ParseStatus::Complete);
        assert_eq!(p.body(), b"0123456789");
    }

    #[test]
    fn missing_blank_line_stays_incomplete() {
        let mut p = parser();
        assert_eq!(
            feed(&mut p, b"GET / HTTP/1.1\r\nHost: x\r\n"),
            ParseStatus::Incomplete
        );
        assert_eq!(p.state(), CheckState::Headers);
    }

    #[test]
    fn reset_clears_everything() {
        let mut p = parser();
        assert_eq!(feed(&mut p, KEEP_ALIVE_REQ), ParseStatus::Complete);
        p.reset();
        assert_eq!(p.buffered(), 0);
        assert_eq!(p.url(), "");
        assert_eq!(p.host(), None);
        assert!(!p.keep_alive());

        assert_eq!(
            feed(&mut p, b"GET /second HTTP/1.1\r\n\r\n"),
            ParseStatus::Complete
        );
        assert_eq!(p.url(), "/second");
        assert!(!p.keep_alive());
    }

    #[test]
    fn header_helpers() {
        assert_eq!(trim_ascii_whitespace(b" \t x y \t"), b"x y");
        assert_eq!(parse_usize_decimal_strict(b" 42 "), Some(42));
        assert_eq!(parse_usize_decimal_strict(b"4x2"), None);
        assert_eq!(parse_usize_decimal_strict(b"99999999999999999999999"), None);
        assert_eq!(parse_header(b"X-Foo: bar"), HeaderLine::Other(b"X-Foo: bar"));
        assert_eq!(parse_header(b"HOST:  a.b  "), HeaderLine::Host(b"a.b"));
    }
}
