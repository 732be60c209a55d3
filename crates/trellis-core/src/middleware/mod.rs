//! Bundled middleware
//!
//! Both are ordinary [`Middleware`](crate::chain::Middleware) values and work
//! for any application context. Register them with
//! [`Router::use_middleware`](crate::Router::use_middleware) or in a route's
//! handler list.

pub mod cors;
pub mod logger;

pub use cors::{Cors, CorsConfig};
pub use logger::{Logger, LoggerConfig};
