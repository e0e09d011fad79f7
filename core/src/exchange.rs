//! Minimal HTTP/1.1 request/response engine.
//!
//! # Design
//! One `exchange` call per channel: format the request, write it in a single
//! shot, then accumulate reads until the header terminator appears (or a hard
//! cap is hit), parse the status line and `Content-Length`, and hand any body
//! bytes that arrived with the headers to the materializer as the captured
//! fragment. This is deliberately not a general HTTP client: no chunked
//! encoding, no redirects, no retries, and only the two methods the update
//! workflow needs. A non-200 status is a hard failure at this layer.

use tracing::debug;

use crate::channel::Channel;
use crate::error::UpdateError;

/// Cap on the formatted request (line + headers + body).
pub const MAX_REQUEST_BYTES: usize = 8 * 1024;

/// Cap on accumulated response headers. Exceeding it without seeing the
/// `\r\n\r\n` terminator is a protocol error.
pub const MAX_RESPONSE_HEAD_BYTES: usize = 8 * 1024;

/// Ceiling on the declared response size, bounding memory and disk
/// commitment regardless of what the server claims.
pub const MAX_CONTENT_LENGTH: u64 = 100 * 1024 * 1024;

/// The two methods the update workflow uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// One request, described as plain data and formatted by `format_request`.
///
/// `path` carries no leading slash; the request line is `METHOD /path`.
/// `host` is the `Host` header value (including `:port` when non-standard).
#[derive(Debug)]
pub struct Request<'a> {
    pub method: Method,
    pub host: &'a str,
    pub path: &'a str,
    pub headers: &'a [(&'a str, &'a str)],
    pub body: Option<&'a [u8]>,
}

/// A parsed response head plus the channel it arrived on.
///
/// Owns the channel for the rest of its single request/response cycle; the
/// materializer consumes it to read the body, and dropping it on any failure
/// path releases the TLS session and socket.
pub struct Response {
    pub(crate) channel: Box<dyn Channel>,
    status: u16,
    content_length: u64,
    pub(crate) fragment: Vec<u8>,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("fragment", &self.fragment)
            .finish_non_exhaustive()
    }
}

impl Response {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub(crate) fn into_parts(self) -> (Box<dyn Channel>, u64, Vec<u8>) {
        (self.channel, self.content_length, self.fragment)
    }
}

/// Run one request/response cycle over `channel`.
///
/// The request is written in a single shot; a failed write is fatal. Reads
/// accumulate until the header terminator is found, so headers split across
/// TLS records are handled. Requires status 200.
pub fn exchange(
    mut channel: Box<dyn Channel>,
    request: &Request<'_>,
) -> Result<Response, UpdateError> {
    let bytes = format_request(request)?;
    debug!(
        method = request.method.as_str(),
        host = request.host,
        path = request.path,
        len = bytes.len(),
        "sending request"
    );
    channel.write_all(&bytes).map_err(|err| UpdateError::io("write request", err))?;
    channel.flush().map_err(|err| UpdateError::io("write request", err))?;

    let mut head: Vec<u8> = Vec::with_capacity(1024);
    let mut buf = [0u8; 4096];
    let split = loop {
        if let Some(pos) = head.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if head.len() >= MAX_RESPONSE_HEAD_BYTES {
            return Err(UpdateError::Protocol(format!(
                "response headers exceed {MAX_RESPONSE_HEAD_BYTES} bytes without terminator"
            )));
        }
        let n = channel.read(&mut buf).map_err(|err| UpdateError::io("read response", err))?;
        if n == 0 {
            return Err(UpdateError::Protocol(
                "connection closed before end of headers".to_string(),
            ));
        }
        head.extend_from_slice(&buf[..n]);
    };

    let mut fragment = head.split_off(split + 4);
    head.truncate(split);
    let head_text = std::str::from_utf8(&head)
        .map_err(|_| UpdateError::Protocol("response headers are not valid text".to_string()))?;

    let status = parse_status_line(head_text)?;
    debug!(status, "response status parsed");
    if status != 200 {
        return Err(UpdateError::Status(status));
    }

    let content_length = parse_content_length(head_text)?;
    if fragment.len() as u64 > content_length {
        // Servers must not send more than they declared; ignore any excess.
        fragment.truncate(content_length as usize);
    }

    Ok(Response { channel, status, content_length, fragment })
}

/// Format the request line, `Host`, computed `Content-Length`, extra headers,
/// separator, and body into a single buffer, enforcing the size cap.
pub fn format_request(request: &Request<'_>) -> Result<Vec<u8>, UpdateError> {
    let body = request.body.unwrap_or(&[]);
    let mut out = Vec::with_capacity(512 + body.len());
    out.extend_from_slice(
        format!("{} /{} HTTP/1.1\r\n", request.method.as_str(), request.path).as_bytes(),
    );
    out.extend_from_slice(format!("Host: {}\r\n", request.host).as_bytes());
    out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    for (name, value) in request.headers {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    if out.len() > MAX_REQUEST_BYTES {
        return Err(UpdateError::RequestTooLarge {
            actual: out.len(),
            limit: MAX_REQUEST_BYTES,
        });
    }
    Ok(out)
}

fn parse_status_line(head: &str) -> Result<u16, UpdateError> {
    let status_line = head.split("\r\n").next().unwrap_or("");
    let rest = status_line.strip_prefix("HTTP/1.1 ").ok_or_else(|| {
        UpdateError::Protocol(format!("malformed status line: {status_line:?}"))
    })?;
    let token = rest.split(' ').next().unwrap_or("");
    token
        .parse()
        .map_err(|_| UpdateError::Protocol(format!("malformed status line: {status_line:?}")))
}

fn parse_content_length(head: &str) -> Result<u64, UpdateError> {
    for line in head.split("\r\n").skip(1) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("content-length") {
            continue;
        }
        let value = value.trim();
        let length: u64 = value
            .parse()
            .map_err(|_| UpdateError::Protocol(format!("invalid Content-Length: {value:?}")))?;
        if length > MAX_CONTENT_LENGTH {
            return Err(UpdateError::Protocol(format!(
                "Content-Length {length} exceeds the {MAX_CONTENT_LENGTH}-byte ceiling"
            )));
        }
        return Ok(length);
    }
    Err(UpdateError::Protocol("response is missing Content-Length".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Read, Write};

    /// Scripted channel: serves `input` in reads of at most `chunk` bytes.
    struct FakeChannel {
        input: io::Cursor<Vec<u8>>,
        chunk: usize,
    }

    impl FakeChannel {
        fn new(input: &[u8]) -> FakeChannel {
            FakeChannel { input: io::Cursor::new(input.to_vec()), chunk: usize::MAX }
        }

        fn chunked(input: &[u8], chunk: usize) -> FakeChannel {
            FakeChannel { input: io::Cursor::new(input.to_vec()), chunk }
        }
    }

    impl Read for FakeChannel {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let limit = self.chunk.min(buf.len());
            self.input.read(&mut buf[..limit])
        }
    }

    impl Write for FakeChannel {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn request<'a>(body: Option<&'a [u8]>) -> Request<'a> {
        Request {
            method: Method::Post,
            host: "cloud.example.com",
            path: "tok/provision/update",
            headers: &[("Content-Type", "application/json")],
            body,
        }
    }

    #[test]
    fn format_request_produces_expected_framing() {
        let bytes = format_request(&request(Some(b"{\"id\":\"d1\"}"))).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            "POST /tok/provision/update HTTP/1.1\r\n\
             Host: cloud.example.com\r\n\
             Content-Length: 11\r\n\
             Content-Type: application/json\r\n\
             \r\n\
             {\"id\":\"d1\"}"
        );
    }

    #[test]
    fn format_request_without_body_declares_zero_length() {
        let req = Request {
            method: Method::Get,
            host: "cloud.example.com",
            path: "images/update.bin",
            headers: &[("Accept", "*/*")],
            body: None,
        };
        let text = String::from_utf8(format_request(&req).unwrap()).unwrap();
        assert!(text.starts_with("GET /images/update.bin HTTP/1.1\r\n"));
        assert!(text.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn format_request_rejects_oversized_request() {
        let body = vec![b'x'; MAX_REQUEST_BYTES];
        let err = format_request(&request(Some(&body))).unwrap_err();
        assert!(matches!(err, UpdateError::RequestTooLarge { .. }));
    }

    #[test]
    fn exchange_parses_status_length_and_fragment() {
        let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n12345";
        let channel = Box::new(FakeChannel::new(wire));
        let response = exchange(channel, &request(None)).unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.content_length(), 10);
        assert_eq!(response.fragment, b"12345");
    }

    #[test]
    fn exchange_accumulates_headers_split_across_reads() {
        let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nbody";
        let channel = Box::new(FakeChannel::chunked(wire, 3));
        let response = exchange(channel, &request(None)).unwrap();
        assert_eq!(response.content_length(), 4);
        // 3-byte reads: exactly one body byte lands in the same read as the
        // header terminator; the rest stays on the channel for the reader.
        assert_eq!(response.fragment, b"b");
    }

    #[test]
    fn exchange_truncates_fragment_to_declared_length() {
        let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nbody-and-excess";
        let channel = Box::new(FakeChannel::new(wire));
        let response = exchange(channel, &request(None)).unwrap();
        assert_eq!(response.fragment, b"bo");
    }

    #[test]
    fn exchange_rejects_non_200_status() {
        let wire = b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
        let err = exchange(Box::new(FakeChannel::new(wire)), &request(None)).unwrap_err();
        assert!(matches!(err, UpdateError::Status(404)));
    }

    #[test]
    fn exchange_rejects_malformed_status_line() {
        let wire = b"HTTP/2 200\r\nContent-Length: 0\r\n\r\n";
        let err = exchange(Box::new(FakeChannel::new(wire)), &request(None)).unwrap_err();
        assert!(matches!(err, UpdateError::Protocol(_)));
    }

    #[test]
    fn exchange_requires_content_length() {
        let wire = b"HTTP/1.1 200 OK\r\nServer: x\r\n\r\n";
        let err = exchange(Box::new(FakeChannel::new(wire)), &request(None)).unwrap_err();
        assert!(matches!(err, UpdateError::Protocol(_)));
    }

    #[test]
    fn exchange_rejects_content_length_above_ceiling() {
        let wire =
            format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", MAX_CONTENT_LENGTH + 1);
        let err =
            exchange(Box::new(FakeChannel::new(wire.as_bytes())), &request(None)).unwrap_err();
        assert!(matches!(err, UpdateError::Protocol(_)));
    }

    #[test]
    fn exchange_rejects_eof_before_header_terminator() {
        let wire = b"HTTP/1.1 200 OK\r\nContent-Len";
        let err = exchange(Box::new(FakeChannel::new(wire)), &request(None)).unwrap_err();
        assert!(matches!(err, UpdateError::Protocol(_)));
    }

    #[test]
    fn content_length_name_is_case_insensitive_and_value_trimmed() {
        let wire = b"HTTP/1.1 200 OK\r\ncontent-length:   7  \r\n\r\n";
        let response = exchange(Box::new(FakeChannel::new(wire)), &request(None)).unwrap();
        assert_eq!(response.content_length(), 7);
    }
}
