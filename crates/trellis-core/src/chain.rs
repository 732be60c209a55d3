//! Handler chain model
//!
//! A route resolves to an ordered list of [`Handler`]s: zero or more
//! middleware followed (usually) by an endpoint. [`Next`] is the
//! continuation a middleware receives; calling [`Next::run`] executes the
//! rest of the chain and returns once it has unwound, so code after the call
//! runs in reverse order of the code before it.
//!
//! `Next` is only a view over the remaining slice. It carries no shared
//! cursor, so it can be copied, stored for the duration of the call, or run
//! more than once without affecting any other view.

use crate::error::BoxError;
use crate::{Request, Response};
use std::sync::Arc;

/// Result of running a handler
pub type HandlerResult = std::result::Result<(), BoxError>;

/// Terminal handler
pub trait Endpoint<C>: Send + Sync {
    fn call(&self, ctx: &C, req: &Request<'_>, res: &mut Response) -> HandlerResult;
}

/// Handler that decides whether the rest of the chain runs
pub trait Middleware<C>: Send + Sync {
    fn call(&self, ctx: &C, req: &Request<'_>, res: &mut Response, next: Next<'_, C>)
        -> HandlerResult;
}

impl<C, F> Endpoint<C> for F
where
    F: Fn(&C, &Request<'_>, &mut Response) -> HandlerResult + Send + Sync,
{
    fn call(&self, ctx: &C, req: &Request<'_>, res: &mut Response) -> HandlerResult {
        self(ctx, req, res)
    }
}

impl<C, F> Middleware<C> for F
where
    F: Fn(&C, &Request<'_>, &mut Response, Next<'_, C>) -> HandlerResult + Send + Sync,
{
    fn call(
        &self,
        ctx: &C,
        req: &Request<'_>,
        res: &mut Response,
        next: Next<'_, C>,
    ) -> HandlerResult {
        self(ctx, req, res, next)
    }
}

/// One unit of a handler chain
pub enum Handler<C> {
    Endpoint(Arc<dyn Endpoint<C>>),
    Middleware(Arc<dyn Middleware<C>>),
}

impl<C> Handler<C> {
    /// Wrap a closure or struct as an endpoint
    pub fn endpoint<E>(endpoint: E) -> Self
    where
        E: Endpoint<C> + 'static,
    {
        Handler::Endpoint(Arc::new(endpoint))
    }

    /// Wrap a closure or struct as a middleware
    pub fn middleware<M>(middleware: M) -> Self
    where
        M: Middleware<C> + 'static,
    {
        Handler::Middleware(Arc::new(middleware))
    }

    /// Closure endpoint with the signature spelled out for inference
    pub fn endpoint_fn<F>(f: F) -> Self
    where
        F: Fn(&C, &Request<'_>, &mut Response) -> HandlerResult + Send + Sync + 'static,
    {
        Handler::endpoint(f)
    }

    /// Closure middleware with the signature spelled out for inference
    pub fn middleware_fn<F>(f: F) -> Self
    where
        F: Fn(&C, &Request<'_>, &mut Response, Next<'_, C>) -> HandlerResult
            + Send
            + Sync
            + 'static,
    {
        Handler::middleware(f)
    }

    pub fn is_endpoint(&self) -> bool {
        matches!(self, Handler::Endpoint(_))
    }
}

impl<C> Clone for Handler<C> {
    fn clone(&self) -> Self {
        match self {
            Handler::Endpoint(e) => Handler::Endpoint(Arc::clone(e)),
            Handler::Middleware(m) => Handler::Middleware(Arc::clone(m)),
        }
    }
}

impl<C> std::fmt::Debug for Handler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handler::Endpoint(_) => f.write_str("Handler::Endpoint"),
            Handler::Middleware(_) => f.write_str("Handler::Middleware"),
        }
    }
}

/// Continuation over the remaining handlers of a chain
pub struct Next<'a, C> {
    remaining: &'a [&'a Handler<C>],
}

impl<C> Clone for Next<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for Next<'_, C> {}

impl<'a, C> Next<'a, C> {
    /// Continuation that starts at the first handler of `chain`
    pub fn new(chain: &'a [&'a Handler<C>]) -> Self {
        Self { remaining: chain }
    }

    /// Number of handlers not yet reached
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }

    /// Run the handler at the front of the view
    ///
    /// An empty view is a successful no-op. An endpoint's result is the
    /// chain's result; a middleware receives the continuation for the rest.
    /// Errors propagate to the caller untouched.
    pub fn run(self, ctx: &C, req: &Request<'_>, res: &mut Response) -> HandlerResult {
        let Some((head, rest)) = self.remaining.split_first() else {
            return Ok(());
        };

        match head {
            Handler::Endpoint(endpoint) => endpoint.call(ctx, req, res),
            Handler::Middleware(middleware) => {
                middleware.call(ctx, req, res, Next { remaining: rest })
            }
        }
    }
}
