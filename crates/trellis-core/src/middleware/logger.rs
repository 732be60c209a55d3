//! Request logging middleware
//!
//! Emits one `tracing` event per request once the rest of the chain has
//! finished, and tags the response with a request ID.

use crate::chain::{HandlerResult, Middleware, Next};
use crate::{Request, Response};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Header carrying the request ID
    pub header_name: String,
    /// Add a request ID to responses
    pub request_id: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            header_name: "X-Request-ID".to_string(),
            request_id: true,
        }
    }
}

impl LoggerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    pub fn request_id(mut self, enabled: bool) -> Self {
        self.request_id = enabled;
        self
    }
}

/// Request logging middleware
#[derive(Debug, Default)]
pub struct Logger {
    config: LoggerConfig,
    counter: AtomicU64,
}

impl Logger {
    pub fn new(config: LoggerConfig) -> Self {
        Self {
            config,
            counter: AtomicU64::new(0),
        }
    }

    /// Incoming ID if the client sent one, otherwise the next counter value
    fn request_id(&self, req: &Request<'_>) -> String {
        match req.header(&self.config.header_name) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let count = self.counter.fetch_add(1, Ordering::Relaxed);
                format!("{:016x}", count)
            }
        }
    }
}

impl<C> Middleware<C> for Logger {
    fn call(
        &self,
        ctx: &C,
        req: &Request<'_>,
        res: &mut Response,
        next: Next<'_, C>,
    ) -> HandlerResult {
        let start = Instant::now();
        let id = self.config.request_id.then(|| self.request_id(req));

        let result = next.run(ctx, req, res);
        let elapsed_us = start.elapsed().as_micros() as u64;

        match &result {
            Ok(()) => tracing::info!(
                method = %req.method(),
                path = req.path(),
                status = res.status.as_u16(),
                elapsed_us,
                request_id = id.as_deref().unwrap_or("-"),
                "request"
            ),
            Err(e) => tracing::info!(
                method = %req.method(),
                path = req.path(),
                error = %e,
                elapsed_us,
                request_id = id.as_deref().unwrap_or("-"),
                "request failed"
            ),
        }

        if let Some(id) = id {
            res.add_header(self.config.header_name.as_str(), id);
        }
        result
    }
}
