//! trellis-core: lightweight HTTP/1.1 server core
//!
//! Trie routing with `:param` segments, continuation-style middleware chains
//! and two interchangeable serving modes sharing the same routing and chain
//! mechanics:
//! - thread pool: one blocking pooled thread per connection
//! - event-driven: a few workers sharing one readiness poller
//!
//! ```no_run
//! use trellis_core::{App, Handler, Router, Server, ServerConfig};
//!
//! let mut router = Router::new();
//! router.get(
//!     "/users/:id",
//!     vec![Handler::endpoint_fn(|_: &(), req, res| {
//!         res.text(format!("user {}", req.param("id").unwrap_or("?")));
//!         Ok(())
//!     })],
//! );
//!
//! let app = App::new(()).with_router(router);
//! let server = Server::bind(app, ServerConfig::default())?;
//! server.run()?;
//! # Ok::<(), trellis_core::Error>(())
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod app;
pub mod chain;
pub mod connection;
pub mod error;
pub mod middleware;
pub mod multipart;
pub mod parser;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod static_files;

// Re-exports
pub use app::{App, ErrorHandler, PreRoute};
pub use chain::{Endpoint, Handler, HandlerResult, Middleware, Next};
pub use connection::{Framer, Limits, Phase};
pub use error::{BoxError, Error, Result};
pub use multipart::{Multipart, Part};
pub use parser::Method;
pub use request::{BodyReader, Request, RequestBuilder};
pub use response::{Body, Response, ResponseBuilder, StatusCode};
pub use router::{RouteMatch, Router};
pub use server::{Server, ServerConfig, ServerHandle, ServerMode};
pub use static_files::{StaticFileConfig, StaticFiles};

pub use trellis_router::Params;
