//! HTTP Request types
//!
//! A [`Request`] is a read-only view over one exchange. Everything it holds
//! borrows either the connection's receive buffer or the per-exchange arena,
//! and both are recycled as soon as the response is queued, so nothing
//! derived from a request can outlive it.

use crate::parser::{self, Headers, Method, RequestHead};
use crate::{Error, Result};
use bumpalo::Bump;
use serde::de::DeserializeOwned;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::io::Read;
use std::net::{Ipv4Addr, SocketAddr};
use trellis_router::Params;

/// Decoded query pairs in arrival order
pub type Query<'a> = SmallVec<[(&'a str, &'a str); 8]>;

/// HTTP Request
#[derive(Debug)]
pub struct Request<'a> {
    method: Method,
    target: &'a str,
    path: &'a str,
    query: Query<'a>,
    params: Params<'a>,
    headers: Headers<'a>,
    body: &'a [u8],
    peer: SocketAddr,
    keep_alive: bool,
    arena: &'a Bump,
}

impl<'a> Request<'a> {
    /// Build a request from a parsed head and its body bytes
    pub fn from_head(
        head: RequestHead<'a>,
        body: &'a [u8],
        peer: SocketAddr,
        arena: &'a Bump,
    ) -> Self {
        let keep_alive = head.keep_alive();
        let (path, raw_query) = parser::split_target(head.target);

        Self {
            method: head.method,
            target: head.target,
            path,
            query: raw_query
                .map(|q| parse_query(arena, q))
                .unwrap_or_default(),
            params: Params::new(),
            headers: head.headers,
            body,
            peer,
            keep_alive,
            arena,
        }
    }

    /// Start building a request by hand
    pub fn builder(arena: &'a Bump, method: Method, target: &'a str) -> RequestBuilder<'a> {
        RequestBuilder::new(arena, method, target)
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Raw request target, query string included
    pub fn target(&self) -> &'a str {
        self.target
    }

    /// Request path (without query string)
    pub fn path(&self) -> &'a str {
        self.path
    }

    /// Get a decoded query parameter; the last occurrence wins
    pub fn query(&self, name: &str) -> Option<&'a str> {
        self.query
            .iter()
            .rev()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| *v)
    }

    /// All decoded query pairs
    pub fn query_pairs(&self) -> &[(&'a str, &'a str)] {
        &self.query
    }

    /// Get a route parameter
    pub fn param(&self, name: &str) -> Option<&'a str> {
        self.params.get(name)
    }

    /// All route parameters captured by the router
    pub fn params(&self) -> &Params<'a> {
        &self.params
    }

    pub(crate) fn set_params(&mut self, params: Params<'a>) {
        self.params = params;
    }

    /// Get a header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }

    pub fn headers(&self) -> &[(&'a str, &'a str)] {
        &self.headers
    }

    /// Get content-type header
    pub fn content_type(&self) -> Option<&'a str> {
        self.header("content-type")
    }

    /// Get content-length header
    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length").and_then(|v| v.trim().parse().ok())
    }

    /// Reader over the request body
    ///
    /// Each call starts from the first body byte.
    pub fn body(&self) -> BodyReader<'a> {
        BodyReader {
            remaining: self.body,
        }
    }

    /// Raw body bytes
    pub fn body_bytes(&self) -> &'a [u8] {
        self.body
    }

    /// Body as UTF-8 text
    pub fn text(&self) -> Result<&'a str> {
        std::str::from_utf8(self.body).map_err(|e| Error::MalformedRequest(e.to_string()))
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(self.body)?)
    }

    /// Remote address of the connection
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Whether the client asked to keep the connection open
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Per-exchange arena for handler scratch allocations
    pub fn arena(&self) -> &'a Bump {
        self.arena
    }
}

/// Streaming view over a request body
#[derive(Debug, Clone)]
pub struct BodyReader<'a> {
    remaining: &'a [u8],
}

impl BodyReader<'_> {
    /// Bytes left to read
    pub fn len(&self) -> usize {
        self.remaining.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remaining.is_empty()
    }
}

impl Read for BodyReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.remaining.read(buf)
    }
}

/// Parse a raw query string into decoded pairs
///
/// Pairs without `=` and pairs whose key or value is not valid
/// percent-encoded UTF-8 are skipped. Decoded text that differs from the
/// input is copied into `arena`.
pub fn parse_query<'a>(arena: &'a Bump, raw: &'a str) -> Query<'a> {
    let mut pairs = Query::new();
    for pair in raw.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        if let (Some(key), Some(value)) = (decode(arena, key), decode(arena, value)) {
            pairs.push((key, value));
        }
    }
    pairs
}

fn decode<'a>(arena: &'a Bump, raw: &'a str) -> Option<&'a str> {
    match urlencoding::decode(raw).ok()? {
        Cow::Borrowed(s) => Some(s),
        Cow::Owned(s) => Some(arena.alloc_str(&s)),
    }
}

/// Builder for constructing requests outside the server loop
pub struct RequestBuilder<'a> {
    arena: &'a Bump,
    method: Method,
    target: &'a str,
    headers: Headers<'a>,
    body: &'a [u8],
    peer: SocketAddr,
    minor_version: u8,
}

impl<'a> RequestBuilder<'a> {
    /// Create a new builder
    pub fn new(arena: &'a Bump, method: Method, target: &'a str) -> Self {
        Self {
            arena,
            method,
            target,
            headers: Headers::new(),
            body: &[],
            peer: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            minor_version: 1,
        }
    }

    /// Add a header
    pub fn header(mut self, name: &'a str, value: &'a str) -> Self {
        self.headers.push((name, value));
        self
    }

    /// Set body
    pub fn body(mut self, body: &'a [u8]) -> Self {
        self.body = body;
        self
    }

    /// Set the peer address
    pub fn peer(mut self, peer: SocketAddr) -> Self {
        self.peer = peer;
        self
    }

    /// Mark the request as HTTP/1.0
    pub fn http10(mut self) -> Self {
        self.minor_version = 0;
        self
    }

    /// Build the request
    pub fn build(self) -> Request<'a> {
        let head = RequestHead {
            method: self.method,
            target: self.target,
            minor_version: self.minor_version,
            headers: self.headers,
        };
        Request::from_head(head, self.body, self.peer, self.arena)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_request_header() {
        let arena = Bump::new();
        let req = Request::builder(&arena, Method::Get, "/")
            .header("Content-Type", "application/json")
            .build();

        assert_eq!(req.header("content-type"), Some("application/json"));
        assert_eq!(req.header("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(req.header("accept"), None);
    }

    #[test]
    fn test_query_params() {
        let arena = Bump::new();
        let req = Request::builder(&arena, Method::Get, "/search?a=1&b=hello%20world").build();

        assert_eq!(req.path(), "/search");
        assert_eq!(req.target(), "/search?a=1&b=hello%20world");
        assert_eq!(req.query("a"), Some("1"));
        assert_eq!(req.query("b"), Some("hello world"));
        assert_eq!(req.query_pairs().len(), 2);
    }

    #[test]
    fn test_query_skips_malformed_pairs() {
        let arena = Bump::new();
        let pairs = parse_query(&arena, "flag&a=1&&bad=%FF%FE&c=");
        assert_eq!(pairs.as_slice(), &[("a", "1"), ("c", "")]);
    }

    #[test]
    fn test_query_decodes_keys_and_last_wins() {
        let arena = Bump::new();
        let req = Request::builder(&arena, Method::Get, "/?na%6De=x&name=y").build();
        assert_eq!(req.query("name"), Some("y"));
        assert_eq!(req.query_pairs().len(), 2);
    }

    #[test]
    fn test_body_reader_restarts() {
        let arena = Bump::new();
        let req = Request::builder(&arena, Method::Post, "/upload")
            .body(b"hello")
            .build();

        let mut first = String::new();
        req.body().read_to_string(&mut first).unwrap();
        assert_eq!(first, "hello");

        let reader = req.body();
        assert_eq!(reader.len(), 5);
        assert_eq!(req.text().unwrap(), "hello");
    }

    #[test]
    fn test_empty_body() {
        let arena = Bump::new();
        let req = Request::builder(&arena, Method::Get, "/").build();
        assert!(req.body().is_empty());
        assert_eq!(req.body_bytes(), b"");
    }

    #[test]
    fn test_json_body() {
        #[derive(Deserialize)]
        struct Payload {
            name: String,
            count: u32,
        }

        let arena = Bump::new();
        let req = Request::builder(&arena, Method::Post, "/")
            .body(br#"{"name":"widget","count":3}"#)
            .build();

        let payload: Payload = req.json().unwrap();
        assert_eq!(payload.name, "widget");
        assert_eq!(payload.count, 3);

        let bad = Request::builder(&arena, Method::Post, "/").body(b"{").build();
        assert!(bad.json::<Payload>().is_err());
    }

    #[test]
    fn test_keep_alive_from_version() {
        let arena = Bump::new();
        assert!(Request::builder(&arena, Method::Get, "/").build().keep_alive());
        assert!(!Request::builder(&arena, Method::Get, "/").http10().build().keep_alive());
        assert!(!Request::builder(&arena, Method::Get, "/")
            .header("Connection", "close")
            .build()
            .keep_alive());
    }

    #[test]
    fn test_content_length() {
        let arena = Bump::new();
        let req = Request::builder(&arena, Method::Post, "/")
            .header("Content-Length", "42")
            .build();
        assert_eq!(req.content_length(), Some(42));
    }
}
