//! Application router
//!
//! Wraps the per-method trie from `trellis-router` with the global
//! middleware list. A match is the global middleware followed by the route's
//! own handlers, ready to run through [`Next`].

use crate::chain::{Handler, Next};
use crate::Method;
use smallvec::SmallVec;
use trellis_router::Params;

/// Handlers for one matched request, global middleware first
pub type Chain<'a, C> = SmallVec<[&'a Handler<C>; 8]>;

/// Route match result
pub struct RouteMatch<'a, C> {
    /// Global middleware followed by the route's handlers
    pub handlers: Chain<'a, C>,
    /// Captured path parameters
    pub params: Params<'a>,
}

impl<C> RouteMatch<'_, C> {
    /// Continuation positioned at the first handler
    pub fn next(&self) -> Next<'_, C> {
        Next::new(&self.handlers)
    }
}

/// HTTP router over handler chains
///
/// Register routes and global middleware before serving starts; lookups
/// take `&self` and need no locking.
pub struct Router<C> {
    tree: trellis_router::Router<Handler<C>>,
    global: Vec<Handler<C>>,
}

impl<C> Router<C> {
    /// Create a new router
    pub fn new() -> Self {
        Self {
            tree: trellis_router::Router::new(),
            global: Vec::new(),
        }
    }

    /// Append middleware that runs ahead of every matched route
    pub fn use_middleware(&mut self, handler: Handler<C>) -> &mut Self {
        self.global.push(handler);
        self
    }

    /// Add a route
    ///
    /// Re-adding the same method and path replaces the previous handlers.
    pub fn add(&mut self, method: Method, path: &str, handlers: Vec<Handler<C>>) -> &mut Self {
        self.tree.insert(method.as_str(), path, handlers);
        self
    }

    /// Add a GET route
    pub fn get(&mut self, path: &str, handlers: Vec<Handler<C>>) -> &mut Self {
        self.add(Method::Get, path, handlers)
    }

    /// Add a POST route
    pub fn post(&mut self, path: &str, handlers: Vec<Handler<C>>) -> &mut Self {
        self.add(Method::Post, path, handlers)
    }

    /// Add a PUT route
    pub fn put(&mut self, path: &str, handlers: Vec<Handler<C>>) -> &mut Self {
        self.add(Method::Put, path, handlers)
    }

    /// Add a DELETE route
    pub fn delete(&mut self, path: &str, handlers: Vec<Handler<C>>) -> &mut Self {
        self.add(Method::Delete, path, handlers)
    }

    /// Add a PATCH route
    pub fn patch(&mut self, path: &str, handlers: Vec<Handler<C>>) -> &mut Self {
        self.add(Method::Patch, path, handlers)
    }

    /// Resolve a request to its handler chain
    ///
    /// `None` means no route: the method has no routes, or the path does not
    /// end on a node with handlers.
    pub fn find_route<'a>(&'a self, method: Method, path: &'a str) -> Option<RouteMatch<'a, C>> {
        let matched = self.tree.find(method.as_str(), path)?;

        let mut handlers = Chain::with_capacity(self.global.len() + matched.handlers.len());
        handlers.extend(self.global.iter());
        handlers.extend(matched.handlers.iter());

        Some(RouteMatch {
            handlers,
            params: matched.params,
        })
    }

    /// Number of global middleware
    pub fn global_len(&self) -> usize {
        self.global.len()
    }
}

impl<C> Default for Router<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::HandlerResult;
    use crate::{Request, Response};
    use bumpalo::Bump;

    fn reply(body: &'static str) -> Handler<()> {
        Handler::endpoint_fn(move |_: &(), _req, res| {
            res.text(body);
            Ok(())
        })
    }

    fn run(router: &Router<()>, method: Method, path: &str) -> Option<String> {
        let arena = Bump::new();
        let req = Request::builder(&arena, method, path).build();
        let mut res = Response::ok();
        let matched = router.find_route(method, req.path())?;
        let result: HandlerResult = matched.next().run(&(), &req, &mut res);
        result.unwrap();
        res.body_string()
    }

    #[test]
    fn test_literal_routes() {
        let mut router = Router::new();
        router
            .get("/", vec![reply("home")])
            .get("/about", vec![reply("about")])
            .post("/about", vec![reply("post about")]);

        let m = router.find_route(Method::Get, "/about").unwrap();
        assert_eq!(m.handlers.len(), 1);
        assert!(m.params.is_empty());

        assert_eq!(run(&router, Method::Get, "/").as_deref(), Some("home"));
        assert_eq!(run(&router, Method::Get, "/about").as_deref(), Some("about"));
        assert_eq!(run(&router, Method::Post, "/about").as_deref(), Some("post about"));
    }

    #[test]
    fn test_literal_beats_param() {
        let mut router = Router::new();
        router
            .get("/users/:id", vec![reply("by id")])
            .get("/users/me", vec![reply("me")]);

        let m = router.find_route(Method::Get, "/users/me").unwrap();
        assert!(m.params.get("id").is_none());
        assert_eq!(run(&router, Method::Get, "/users/me").as_deref(), Some("me"));
        assert_eq!(run(&router, Method::Get, "/users/9").as_deref(), Some("by id"));
    }

    #[test]
    fn test_params_captured() {
        let mut router = Router::new();
        router.get("/a/:x/b/:y", vec![reply("ab")]);

        let m = router.find_route(Method::Get, "/a/1/b/2").unwrap();
        assert_eq!(m.params.get("x"), Some("1"));
        assert_eq!(m.params.get("y"), Some("2"));
    }

    #[test]
    fn test_misses() {
        let mut router = Router::new();
        router.get("/users", vec![reply("users")]);

        assert!(router.find_route(Method::Delete, "/users").is_none());
        assert!(router.find_route(Method::Get, "/nope").is_none());
        assert!(router.find_route(Method::Get, "/users/1").is_none());
    }

    #[test]
    fn test_global_middleware_prepended() {
        let mut router = Router::new();
        router.use_middleware(Handler::middleware_fn(|ctx: &(), req, res, next| {
            res.add_header("X-Global", "1");
            next.run(ctx, req, res)
        }));
        router.get("/", vec![reply("home")]);

        let m = router.find_route(Method::Get, "/").unwrap();
        assert_eq!(m.handlers.len(), 2);
        assert!(!m.handlers[0].is_endpoint());
        assert!(m.handlers[1].is_endpoint());
        assert_eq!(router.global_len(), 1);

        // Global middleware never turns a miss into a match
        assert!(router.find_route(Method::Get, "/missing").is_none());
    }
}
