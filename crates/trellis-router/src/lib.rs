//! trellis-router: Zero-dependency per-method route trie
//!
//! Maps `(method, path)` to the ordered handler list registered for it and
//! captures named path parameters. Generic over the handler type so the core
//! crate can store its handler chains here without this crate knowing what
//! a handler is.
//!
//! ## Path Syntax
//! - `literal` - exact segment match
//! - `:name` - named parameter (captures one segment)
//!
//! Empty segments are ignored, so `/users/`, `//users` and `/users` are the
//! same route. There are no wildcards and no regex segments.
//!
//! ## Priority
//! At every node an exact literal child beats the parameter child. Matching
//! never backtracks: once a segment has been bound to a parameter, a dead end
//! further down is a miss even if a literal branch could have matched.
//!
//! ## Example
//! ```
//! use trellis_router::Router;
//!
//! let mut router = Router::new();
//! router.insert("GET", "/users/:id", vec!["show_user"]);
//! router.insert("GET", "/users/me", vec!["show_me"]);
//!
//! let m = router.find("GET", "/users/42").unwrap();
//! assert_eq!(m.handlers, &["show_user"]);
//! assert_eq!(m.params.get("id"), Some("42"));
//!
//! let m = router.find("GET", "/users/me").unwrap();
//! assert_eq!(m.handlers, &["show_me"]);
//! assert!(m.params.is_empty());
//! ```

use std::collections::HashMap;

/// Captured path parameters, one value per distinct name
///
/// Names borrow from the router, values borrow from the matched path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params<'a> {
    pairs: Vec<(&'a str, &'a str)>,
}

impl<'a> Params<'a> {
    /// Create an empty parameter set
    pub fn new() -> Self {
        Self { pairs: Vec::new() }
    }

    /// Record a capture; a repeated name keeps the latest value
    pub fn insert(&mut self, name: &'a str, value: &'a str) {
        match self.pairs.iter_mut().find(|(k, _)| *k == name) {
            Some(pair) => pair.1 = value,
            None => self.pairs.push((name, value)),
        }
    }

    /// Look up a parameter by name
    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.pairs
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| *v)
    }

    /// Iterate captures in path order
    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a str)> + '_ {
        self.pairs.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Copy captures into an owned map
    pub fn to_map(&self) -> HashMap<String, String> {
        self.pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

/// Route match result
#[derive(Debug, Clone, PartialEq)]
pub struct Match<'a, H> {
    /// Handlers registered at the matched route, in registration order
    pub handlers: &'a [H],
    /// Captured path parameters
    pub params: Params<'a>,
}

/// Trie node for path segment matching
#[derive(Debug)]
struct Node<H> {
    /// Literal children (key = exact segment text)
    children: HashMap<String, Node<H>>,
    /// Parameter child (:id)
    param_child: Option<Box<ParamNode<H>>>,
    /// Handler list if a route terminates here
    handlers: Option<Vec<H>>,
}

impl<H> Default for Node<H> {
    fn default() -> Self {
        Self {
            children: HashMap::new(),
            param_child: None,
            handlers: None,
        }
    }
}

#[derive(Debug)]
struct ParamNode<H> {
    name: String,
    node: Node<H>,
}

/// Per-method route trie
///
/// Routes are organized by HTTP method for O(1) method dispatch, then matched
/// segment by segment. Registration happens before serving; lookups take
/// `&self` and are safe to run from many threads at once.
#[derive(Debug)]
pub struct Router<H> {
    /// Method -> Trie root
    trees: HashMap<String, Node<H>>,
}

impl<H> Default for Router<H> {
    fn default() -> Self {
        Self {
            trees: HashMap::new(),
        }
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl<H> Router<H> {
    /// Create a new router
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a route
    ///
    /// # Arguments
    /// * `method` - HTTP method (GET, POST, etc.), case-insensitive
    /// * `path` - URL path with optional params (`:id`)
    /// * `handlers` - Ordered handler list for the route
    ///
    /// Registering the same method and path again replaces the earlier
    /// handler list. Re-declaring a parameter under a different name at the
    /// same position renames it for every route below that node.
    pub fn insert(&mut self, method: &str, path: &str, handlers: Vec<H>) {
        let mut node = self.trees.entry(method.to_ascii_uppercase()).or_default();

        for segment in segments(path) {
            node = if let Some(name) = segment.strip_prefix(':') {
                let param = node.param_child.get_or_insert_with(|| {
                    Box::new(ParamNode {
                        name: name.to_string(),
                        node: Node::default(),
                    })
                });
                if param.name != name {
                    param.name = name.to_string();
                }
                &mut param.node
            } else {
                node.children.entry(segment.to_string()).or_default()
            };
        }

        node.handlers = Some(handlers);
    }

    /// Find a matching route
    ///
    /// # Returns
    /// `Some(Match)` with the handler list and captured params, or `None` if
    /// the method has no routes or the path does not resolve to a route.
    pub fn find<'a>(&'a self, method: &str, path: &'a str) -> Option<Match<'a, H>> {
        let mut node = self.tree(method)?;
        let mut params = Params::new();

        for segment in segments(path) {
            // Literal beats parameter; no backtracking after either choice
            node = if let Some(child) = node.children.get(segment) {
                child
            } else if let Some(param) = node.param_child.as_deref() {
                params.insert(param.name.as_str(), segment);
                &param.node
            } else {
                return None;
            };
        }

        node.handlers.as_deref().map(|handlers| Match { handlers, params })
    }

    fn tree(&self, method: &str) -> Option<&Node<H>> {
        self.trees
            .get(method)
            .or_else(|| self.trees.get(&method.to_ascii_uppercase()))
    }

    /// Check if a method has any routes registered
    pub fn has_method(&self, method: &str) -> bool {
        self.tree(method).is_some()
    }

    /// Get all registered methods
    pub fn methods(&self) -> Vec<String> {
        self.trees.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_routes() {
        let mut router = Router::new();
        router.insert("GET", "/", vec![0]);
        router.insert("GET", "/users", vec![1]);
        router.insert("GET", "/users/list", vec![2]);
        router.insert("POST", "/users", vec![3]);

        for (method, path, id) in [
            ("GET", "/", 0),
            ("GET", "/users", 1),
            ("GET", "/users/list", 2),
            ("POST", "/users", 3),
        ] {
            let m = router.find(method, path).unwrap();
            assert_eq!(m.handlers, &[id]);
            assert!(m.params.is_empty());
        }
        assert!(router.find("GET", "/unknown").is_none());
        assert!(router.find("DELETE", "/users").is_none());
    }

    #[test]
    fn test_handler_list_order() {
        let mut router = Router::new();
        router.insert("GET", "/admin", vec!["auth", "audit", "dashboard"]);

        let m = router.find("GET", "/admin").unwrap();
        assert_eq!(m.handlers, &["auth", "audit", "dashboard"]);
    }

    #[test]
    fn test_param_routes() {
        let mut router = Router::new();
        router.insert("GET", "/users/:id", vec![1]);
        router.insert("GET", "/users/:id/posts/:post_id", vec![2]);

        let m = router.find("GET", "/users/42").unwrap();
        assert_eq!(m.handlers, &[1]);
        assert_eq!(m.params.get("id"), Some("42"));

        let m = router.find("GET", "/users/42/posts/99").unwrap();
        assert_eq!(m.handlers, &[2]);
        assert_eq!(
            m.params.iter().collect::<Vec<_>>(),
            vec![("id", "42"), ("post_id", "99")]
        );
    }

    #[test]
    fn test_interleaved_params() {
        let mut router = Router::new();
        router.insert("GET", "/a/:x/b/:y", vec![1]);

        let m = router.find("GET", "/a/1/b/2").unwrap();
        assert_eq!(m.params.get("x"), Some("1"));
        assert_eq!(m.params.get("y"), Some("2"));
        assert_eq!(m.params.len(), 2);
    }

    #[test]
    fn test_priority_literal_over_param() {
        let mut router = Router::new();
        router.insert("GET", "/users/:id", vec![1]);
        router.insert("GET", "/users/me", vec![2]);

        let m = router.find("GET", "/users/me").unwrap();
        assert_eq!(m.handlers, &[2]);
        assert!(m.params.get("id").is_none());
        assert_eq!(router.find("GET", "/users/123").unwrap().handlers, &[1]);
    }

    #[test]
    fn test_no_backtracking() {
        let mut router = Router::new();
        router.insert("GET", "/users/me/profile", vec![1]);
        router.insert("GET", "/users/:id/posts", vec![2]);

        // "me" commits to the literal branch, which has no "posts" child
        assert!(router.find("GET", "/users/me/posts").is_none());
        assert_eq!(router.find("GET", "/users/7/posts").unwrap().handlers, &[2]);
    }

    #[test]
    fn test_intermediate_node_not_routable() {
        let mut router = Router::new();
        router.insert("GET", "/api/v1/health", vec![1]);

        assert!(router.find("GET", "/api").is_none());
        assert!(router.find("GET", "/api/v1").is_none());
        assert!(router.find("GET", "/api/v1/health").is_some());
    }

    #[test]
    fn test_reregistration_overwrites() {
        let mut router = Router::new();
        router.insert("GET", "/users", vec![1]);
        router.insert("GET", "/users", vec![2, 3]);

        assert_eq!(router.find("GET", "/users").unwrap().handlers, &[2, 3]);
    }

    #[test]
    fn test_param_rename_last_wins() {
        let mut router = Router::new();
        router.insert("GET", "/items/:id", vec![1]);
        router.insert("GET", "/items/:slug/edit", vec![2]);

        let m = router.find("GET", "/items/abc").unwrap();
        assert_eq!(m.handlers, &[1]);
        assert_eq!(m.params.get("slug"), Some("abc"));
        assert_eq!(m.params.get("id"), None);
    }

    #[test]
    fn test_repeated_param_name_keeps_last() {
        let mut params = Params::new();
        params.insert("id", "1");
        params.insert("id", "2");
        assert_eq!(params.get("id"), Some("2"));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_params_map() {
        let mut router = Router::new();
        router.insert("GET", "/users/:id", vec![1]);

        let m = router.find("GET", "/users/42").unwrap();
        let map = m.params.to_map();
        assert_eq!(map.get("id"), Some(&"42".to_string()));
    }

    #[test]
    fn test_methods() {
        let mut router = Router::new();
        router.insert("GET", "/users", vec![1]);
        router.insert("POST", "/users", vec![2]);
        router.insert("DELETE", "/users/:id", vec![3]);

        assert!(router.has_method("GET"));
        assert!(router.has_method("POST"));
        assert!(router.has_method("DELETE"));
        assert!(!router.has_method("PUT"));

        let methods = router.methods();
        assert!(methods.contains(&"GET".to_string()));
        assert!(methods.contains(&"DELETE".to_string()));
    }

    #[test]
    fn test_case_insensitive_method() {
        let mut router = Router::new();
        router.insert("get", "/users", vec![1]);

        assert!(router.find("GET", "/users").is_some());
        assert!(router.find("get", "/users").is_some());
        assert!(router.find("Get", "/users").is_some());
    }

    #[test]
    fn test_root_path() {
        let mut router = Router::new();
        router.insert("GET", "/", vec![0]);
        router.insert("GET", "/api", vec![1]);

        assert_eq!(router.find("GET", "/").unwrap().handlers, &[0]);
        assert_eq!(router.find("GET", "").unwrap().handlers, &[0]);
        assert_eq!(router.find("GET", "/api").unwrap().handlers, &[1]);
    }

    #[test]
    fn test_root_unregistered() {
        let mut router = Router::new();
        router.insert("GET", "/api", vec![1]);

        assert!(router.find("GET", "/").is_none());
    }

    #[test]
    fn test_slashes_collapse() {
        let mut router = Router::new();
        router.insert("GET", "/users/", vec![1]);

        assert_eq!(router.find("GET", "/users").unwrap().handlers, &[1]);
        assert_eq!(router.find("GET", "/users/").unwrap().handlers, &[1]);
        assert_eq!(router.find("GET", "//users//").unwrap().handlers, &[1]);
    }
}
