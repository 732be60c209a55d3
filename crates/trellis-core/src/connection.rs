//! Incremental HTTP/1.1 request framing
//!
//! Bytes arrive in arbitrary chunks. The [`Framer`] accumulates them and
//! walks `ReadingHeaders -> ReadingBody -> ReadyToProcess`, skipping
//! `ReadingBody` when the request declares no body. Both server modes feed
//! it: the thread-pool mode from blocking reads, the event-driven mode from
//! whatever a readiness notification delivered.
//!
//! Limits are enforced before the request is complete. Oversized header
//! blocks, oversized declared bodies and invalid Content-Length values are
//! errors; the caller closes the connection without responding.
//!
//! Chunked transfer-encoding is not recognised: a request without
//! Content-Length is framed as bodyless.

use crate::parser;
use crate::{Error, Result};

/// Default header block ceiling
pub const DEFAULT_MAX_HEADER_SIZE: usize = 8 * 1024;

/// Default body ceiling
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

/// Framing phase of the current exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ReadingHeaders,
    ReadingBody,
    ReadyToProcess,
}

/// Size ceilings applied while framing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_header_size: usize,
    pub max_body_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

/// Per-connection framing state
#[derive(Debug)]
pub struct Framer {
    buf: Vec<u8>,
    phase: Phase,
    /// Offset just past the header terminator, once found
    header_end: usize,
    /// Declared body length, once known
    content_length: usize,
    /// Bytes already searched for the terminator
    scanned: usize,
    limits: Limits,
}

impl Framer {
    pub fn new(limits: Limits) -> Self {
        Self {
            buf: Vec::with_capacity(1024),
            phase: Phase::ReadingHeaders,
            header_end: 0,
            content_length: 0,
            scanned: 0,
            limits,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase == Phase::ReadyToProcess
    }

    /// Append received bytes and advance the state machine
    ///
    /// Returns `true` only on the call that completes the request. Bytes fed
    /// after that are buffered for the next exchange.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<bool> {
        self.buf.extend_from_slice(bytes);
        if self.is_ready() {
            return Ok(false);
        }
        self.advance()
    }

    fn advance(&mut self) -> Result<bool> {
        loop {
            match self.phase {
                Phase::ReadingHeaders => {
                    // Resume a little early in case the terminator straddles chunks
                    let start = self.scanned.saturating_sub(parser::HEADER_TERMINATOR.len() - 1);
                    let Some(end) = parser::find_header_end(&self.buf[start..]) else {
                        self.scanned = self.buf.len();
                        if self.buf.len() > self.limits.max_header_size {
                            return Err(Error::HeadersTooLarge {
                                limit: self.limits.max_header_size,
                            });
                        }
                        return Ok(false);
                    };

                    self.header_end = start + end;
                    if self.header_end > self.limits.max_header_size {
                        return Err(Error::HeadersTooLarge {
                            limit: self.limits.max_header_size,
                        });
                    }

                    match parser::content_length(&self.buf[..self.header_end])? {
                        Some(size) if size > self.limits.max_body_size => {
                            return Err(Error::BodyTooLarge {
                                size,
                                limit: self.limits.max_body_size,
                            });
                        }
                        Some(size) if size > 0 => {
                            self.content_length = size;
                            self.phase = Phase::ReadingBody;
                        }
                        _ => {
                            self.content_length = 0;
                            self.phase = Phase::ReadyToProcess;
                        }
                    }
                }
                Phase::ReadingBody => {
                    if self.buf.len() - self.header_end < self.content_length {
                        return Ok(false);
                    }
                    self.phase = Phase::ReadyToProcess;
                }
                Phase::ReadyToProcess => return Ok(true),
            }
        }
    }

    /// Header block of the completed request, terminator included
    pub fn head(&self) -> &[u8] {
        &self.buf[..self.header_end]
    }

    /// Body of the current request; may be partial before completion
    pub fn body(&self) -> &[u8] {
        let available = self.buf.len().saturating_sub(self.header_end);
        let end = self.header_end + available.min(self.content_length);
        &self.buf[self.header_end..end]
    }

    /// Declared body length, once the headers have been read
    pub fn content_length(&self) -> usize {
        self.content_length
    }

    /// Total bytes currently buffered
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Prepare for the next exchange on the same connection
    ///
    /// Bytes received beyond the completed request stay buffered and are
    /// framed immediately; returns `true` if they already form a complete
    /// request.
    pub fn reset(&mut self) -> Result<bool> {
        let consumed = if self.is_ready() {
            self.header_end + self.content_length
        } else {
            self.buf.len()
        };
        self.buf.drain(..consumed);
        self.phase = Phase::ReadingHeaders;
        self.header_end = 0;
        self.content_length = 0;
        self.scanned = 0;

        if self.buf.is_empty() {
            return Ok(false);
        }
        self.advance()
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(Limits::default())
    }
}
