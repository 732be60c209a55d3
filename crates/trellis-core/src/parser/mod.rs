//! HTTP/1.x request-head parsing
//!
//! The framer only needs two facts from the raw bytes: where the header block
//! ends and what Content-Length says. Full parsing of the request line and
//! headers happens once the exchange is complete.

mod method;

pub use method::Method;

use crate::{Error, Result};
use smallvec::SmallVec;

/// Maximum number of headers to parse
pub const MAX_HEADERS: usize = 64;

/// Blank line separating the header block from the body
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Header list borrowed from the connection buffer
pub type Headers<'a> = SmallVec<[(&'a str, &'a str); 16]>;

/// Parsed request line and headers
#[derive(Debug, Clone)]
pub struct RequestHead<'a> {
    pub method: Method,
    /// Raw request target, query string included
    pub target: &'a str,
    /// HTTP/1.x minor version
    pub minor_version: u8,
    pub headers: Headers<'a>,
}

impl<'a> RequestHead<'a> {
    /// Get a header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }

    /// Whether the connection should stay open after this exchange
    ///
    /// HTTP/1.1 defaults to persistent connections, HTTP/1.0 must opt in.
    pub fn keep_alive(&self) -> bool {
        let has_token = |token: &str| {
            self.header("connection")
                .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
                .unwrap_or(false)
        };

        if self.minor_version == 0 {
            has_token("keep-alive")
        } else {
            !has_token("close")
        }
    }
}

/// Find the end of the header block
///
/// Returns the offset just past the terminating blank line.
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    memchr::memmem::find(buf, HEADER_TERMINATOR).map(|i| i + HEADER_TERMINATOR.len())
}

/// Scan a raw header block for Content-Length
///
/// Conflicting duplicate values are rejected.
pub fn content_length(block: &[u8]) -> Result<Option<usize>> {
    let mut found: Option<usize> = None;

    // First line is the request line
    for line in block.split(|&b| b == b'\n').skip(1) {
        let Some(colon) = memchr::memchr(b':', line) else {
            continue;
        };
        let name = line[..colon].trim_ascii();
        if !name.eq_ignore_ascii_case(b"content-length") {
            continue;
        }

        let raw = line[colon + 1..].trim_ascii();
        let value = std::str::from_utf8(raw)
            .ok()
            .filter(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|v| v.parse::<usize>().ok())
            .ok_or_else(|| Error::InvalidContentLength(String::from_utf8_lossy(raw).into_owned()))?;

        match found {
            Some(previous) if previous != value => {
                return Err(Error::InvalidContentLength(format!(
                    "conflicting values {} and {}",
                    previous, value
                )));
            }
            _ => found = Some(value),
        }
    }

    Ok(found)
}

/// Parse the request line and headers
///
/// `block` is the header block including its terminator.
pub fn parse_head(block: &[u8]) -> Result<RequestHead<'_>> {
    let text = std::str::from_utf8(block)
        .map_err(|_| Error::MalformedRequest("header block is not UTF-8".to_string()))?;
    let mut lines = text.split("\r\n");

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::MalformedRequest(format!(
            "bad request line: {:?}",
            request_line
        )));
    };

    let method =
        Method::parse(method.as_bytes()).ok_or_else(|| Error::InvalidMethod(method.to_string()))?;

    if !target.starts_with('/') {
        return Err(Error::MalformedRequest(format!("bad target: {:?}", target)));
    }

    let minor_version = match version {
        "HTTP/1.1" => 1,
        "HTTP/1.0" => 0,
        _ => {
            return Err(Error::MalformedRequest(format!(
                "unsupported version: {:?}",
                version
            )))
        }
    };

    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::MalformedRequest(format!("bad header line: {:?}", line)))?;
        if name.is_empty() || name.bytes().any(|b| b.is_ascii_whitespace()) {
            return Err(Error::MalformedRequest(format!("bad header name: {:?}", name)));
        }
        if headers.len() == MAX_HEADERS {
            return Err(Error::MalformedRequest("too many headers".to_string()));
        }
        headers.push((name, value.trim()));
    }

    Ok(RequestHead {
        method,
        target,
        minor_version,
        headers,
    })
}

/// Split a request target into path and raw query string
pub fn split_target(target: &str) -> (&str, Option<&str>) {
    match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    }
}
