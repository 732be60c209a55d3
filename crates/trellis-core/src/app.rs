//! Application: router, shared context and failure recovery
//!
//! [`App`] is what both server modes share. It owns the router and the
//! application context, runs the optional pre-route handler, dispatches the
//! matched chain and is the single place where handler failures (errors and
//! panics alike) are caught and turned into a response.

use crate::chain::HandlerResult;
use crate::connection::Framer;
use crate::error::BoxError;
use crate::parser::{self, Method};
use crate::{Request, Response, Result, Router};
use bumpalo::Bump;
use std::any::Any;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};

/// Recovers from a failed handler chain
pub trait ErrorHandler<C>: Send + Sync {
    fn handle(&self, err: &BoxError, req: &Request<'_>, res: &mut Response, ctx: &C)
        -> HandlerResult;
}

impl<C, F> ErrorHandler<C> for F
where
    F: Fn(&BoxError, &Request<'_>, &mut Response, &C) -> HandlerResult + Send + Sync,
{
    fn handle(
        &self,
        err: &BoxError,
        req: &Request<'_>,
        res: &mut Response,
        ctx: &C,
    ) -> HandlerResult {
        self(err, req, res, ctx)
    }
}

/// Handler consulted before routing
///
/// Returning `true` means the request was answered and routing is skipped.
pub trait PreRoute: Send + Sync {
    fn handle(&self, req: &Request<'_>, res: &mut Response) -> bool;
}

/// Application shared by every worker
pub struct App<C> {
    context: C,
    router: Router<C>,
    error_handler: Option<Box<dyn ErrorHandler<C>>>,
    pre_route: Option<Box<dyn PreRoute>>,
}

impl<C: Send + Sync + 'static> App<C> {
    pub fn new(context: C) -> Self {
        Self {
            context,
            router: Router::new(),
            error_handler: None,
            pre_route: None,
        }
    }

    /// Replace the router
    pub fn with_router(mut self, router: Router<C>) -> Self {
        self.router = router;
        self
    }

    /// Install the handler invoked when a chain fails
    pub fn with_error_handler<E: ErrorHandler<C> + 'static>(mut self, handler: E) -> Self {
        self.error_handler = Some(Box::new(handler));
        self
    }

    /// Install a handler that may answer before routing
    pub fn with_pre_route<P: PreRoute + 'static>(mut self, handler: P) -> Self {
        self.pre_route = Some(Box::new(handler));
        self
    }

    pub fn router(&self) -> &Router<C> {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut Router<C> {
        &mut self.router
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    /// Route `req` and run its chain, leaving the outcome in `res`
    ///
    /// Never fails: a miss becomes 404 and a failed chain goes through the
    /// error handler, falling back to 500.
    pub fn dispatch<'a>(&'a self, req: &mut Request<'a>, res: &mut Response) {
        if let Some(pre_route) = &self.pre_route {
            if pre_route.handle(req, res) {
                return;
            }
        }

        let Some(matched) = self.router.find_route(req.method(), req.path()) else {
            *res = Response::not_found();
            return;
        };
        req.set_params(matched.params.clone());
        let req: &Request<'a> = req;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            matched.next().run(&self.context, req, res)
        }));
        let err = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err,
            Err(payload) => panic_error(payload),
        };

        tracing::warn!(
            method = %req.method(),
            path = req.path(),
            error = %err,
            "handler chain failed"
        );
        self.recover(err, req, res);
    }

    fn recover(&self, err: BoxError, req: &Request<'_>, res: &mut Response) {
        let Some(handler) = &self.error_handler else {
            *res = Response::internal_error();
            return;
        };

        *res = Response::ok();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            handler.handle(&err, req, &mut *res, &self.context)
        }));
        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(payload) => panic_error(payload),
        };

        tracing::error!(
            method = %req.method(),
            path = req.path(),
            error = %failure,
            "error handler failed"
        );
        *res = Response::internal_error();
    }

    /// Serve the request held by a ready framer
    ///
    /// Appends the serialized response to `out` and returns whether the
    /// connection stays open. An unparseable head is an error; the caller
    /// closes the connection without answering.
    pub fn respond(
        &self,
        framer: &Framer,
        peer: SocketAddr,
        arena: &Bump,
        out: &mut Vec<u8>,
    ) -> Result<bool> {
        let head = parser::parse_head(framer.head())?;
        let http10 = head.minor_version == 0;
        let mut req = Request::from_head(head, framer.body(), peer, arena);
        let mut res = Response::ok();

        self.dispatch(&mut req, &mut res);

        let closing = res
            .header("connection")
            .is_some_and(|v| v.eq_ignore_ascii_case("close"));
        let keep_alive = req.keep_alive() && !closing;
        if !keep_alive && !closing {
            res.add_header("Connection", "close");
        } else if keep_alive && http10 && res.header("connection").is_none() {
            // 1.0 clients only persist when told to
            res.add_header("Connection", "keep-alive");
        }

        if req.method() == Method::Head {
            res.write_http1_head(out);
        } else {
            res.write_http1(out);
        }
        Ok(keep_alive)
    }
}

fn panic_error(payload: Box<dyn Any + Send>) -> BoxError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("handler panicked: {}", message).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Handler;
    use crate::StatusCode;

    type Greeting = &'static str;

    fn app() -> App<Greeting> {
        let mut router: Router<Greeting> = Router::new();
        router
            .get(
                "/hello/:name",
                vec![Handler::endpoint_fn(|greeting, req, res| {
                    res.text(format!("{}, {}", greeting, req.param("name").unwrap_or("?")));
                    Ok(())
                })],
            )
            .get(
                "/fail",
                vec![Handler::endpoint_fn(|_, _req, _res| Err("nope".into()))],
            )
            .get(
                "/panic",
                vec![Handler::endpoint_fn(|_, _req, _res| panic!("kaboom"))],
            );
        App::new("Hello").with_router(router)
    }

    fn serve(app: &App<Greeting>, raw: &[u8]) -> (String, bool) {
        let mut framer = Framer::default();
        assert!(framer.feed(raw).unwrap());
        let arena = Bump::new();
        let mut out = Vec::new();
        let keep_alive = app
            .respond(&framer, "127.0.0.1:9000".parse().unwrap(), &arena, &mut out)
            .unwrap();
        (String::from_utf8(out).unwrap(), keep_alive)
    }

    #[test]
    fn test_dispatch_with_params() {
        let (out, keep_alive) = serve(&app(), b"GET /hello/ada HTTP/1.1\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.ends_with("Hello, ada"));
        assert!(keep_alive);
    }

    #[test]
    fn test_miss_is_404() {
        let (out, _) = serve(&app(), b"GET /missing HTTP/1.1\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"));

        let (out, _) = serve(&app(), b"DELETE /hello/ada HTTP/1.1\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn test_error_without_handler_is_500() {
        let (out, _) = serve(&app(), b"GET /fail HTTP/1.1\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(out.contains("Content-Type: text/plain\r\n"));
        assert!(out.ends_with("\r\n\r\nInternal Server Error"));
    }

    #[test]
    fn test_panic_is_contained() {
        let (out, keep_alive) = serve(&app(), b"GET /panic HTTP/1.1\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(keep_alive);
    }

    fn unavailable(
        err: &BoxError,
        req: &Request<'_>,
        res: &mut Response,
        _: &Greeting,
    ) -> HandlerResult {
        res.set_status(StatusCode::SERVICE_UNAVAILABLE)
            .text(format!("{} failed: {}", req.path(), err));
        Ok(())
    }

    fn still_broken(
        _: &BoxError,
        _: &Request<'_>,
        res: &mut Response,
        _: &Greeting,
    ) -> HandlerResult {
        res.set_status(StatusCode::CONFLICT);
        Err("still broken".into())
    }

    #[test]
    fn test_custom_error_handler() {
        let app = app().with_error_handler(unavailable);

        let (out, _) = serve(&app, b"GET /fail HTTP/1.1\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert!(out.ends_with("/fail failed: nope"));
    }

    #[test]
    fn test_failing_error_handler_falls_back_to_500() {
        let app = app().with_error_handler(still_broken);

        let (out, _) = serve(&app, b"GET /fail HTTP/1.1\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    }

    #[test]
    fn test_connection_close_honoured() {
        let (out, keep_alive) = serve(
            &app(),
            b"GET /hello/x HTTP/1.1\r\nConnection: close\r\n\r\n",
        );
        assert!(!keep_alive);
        assert!(out.contains("Connection: close\r\n"));
    }

    #[test]
    fn test_http10_keep_alive_is_echoed() {
        let (out, keep_alive) = serve(
            &app(),
            b"GET /hello/x HTTP/1.0\r\nConnection: keep-alive\r\n\r\n",
        );
        assert!(keep_alive);
        assert!(out.contains("Connection: keep-alive\r\n"));

        let (out, keep_alive) = serve(&app(), b"GET /hello/x HTTP/1.0\r\n\r\n");
        assert!(!keep_alive);
        assert!(out.contains("Connection: close\r\n"));

        let (out, _) = serve(&app(), b"GET /hello/x HTTP/1.1\r\n\r\n");
        assert!(!out.contains("Connection:"));
    }

    #[test]
    fn test_head_request_has_no_body() {
        let mut router: Router<Greeting> = Router::new();
        router.add(
            Method::Head,
            "/doc",
            vec![Handler::endpoint_fn(|_, _req, res| {
                res.text("document");
                Ok(())
            })],
        );
        let app = App::new("").with_router(router);

        let (out, _) = serve(&app, b"HEAD /doc HTTP/1.1\r\n\r\n");
        assert!(out.contains("Content-Length: 8\r\n"));
        assert!(out.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_malformed_head_is_error() {
        let app = app();
        let mut framer = Framer::default();
        assert!(framer.feed(b"NOT A REQUEST\r\n\r\n").unwrap());
        let arena = Bump::new();
        let mut out = Vec::new();
        assert!(app
            .respond(&framer, "127.0.0.1:1".parse().unwrap(), &arena, &mut out)
            .is_err());
        assert!(out.is_empty());
    }

    struct Intercept;

    impl PreRoute for Intercept {
        fn handle(&self, req: &Request<'_>, res: &mut Response) -> bool {
            if req.path().starts_with("/assets/") {
                res.text("asset");
                return true;
            }
            false
        }
    }

    #[test]
    fn test_pre_route() {
        let app = app().with_pre_route(Intercept);

        let (out, _) = serve(&app, b"GET /assets/app.js HTTP/1.1\r\n\r\n");
        assert!(out.ends_with("asset"));

        let (out, _) = serve(&app, b"GET /hello/bob HTTP/1.1\r\n\r\n");
        assert!(out.ends_with("Hello, bob"));
    }
}
