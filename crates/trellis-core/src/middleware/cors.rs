//! CORS (Cross-Origin Resource Sharing) middleware
//!
//! Answers preflight requests itself and adds CORS headers to everything the
//! rest of the chain produces.

use crate::chain::{HandlerResult, Middleware, Next};
use crate::{Method, Request, Response, StatusCode};
use smallvec::SmallVec;

/// CORS configuration
#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Allowed origins (empty = all)
    pub origins: SmallVec<[String; 4]>,
    /// Allowed methods
    pub methods: SmallVec<[Method; 8]>,
    /// Allowed headers
    pub headers: SmallVec<[String; 8]>,
    /// Exposed headers
    pub expose_headers: SmallVec<[String; 4]>,
    /// Allow credentials
    pub credentials: bool,
    /// Max age (seconds)
    pub max_age: u32,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: SmallVec::new(),
            methods: smallvec::smallvec![
                Method::Get,
                Method::Post,
                Method::Put,
                Method::Delete,
                Method::Patch,
                Method::Head,
                Method::Options,
            ],
            headers: smallvec::smallvec![
                "Content-Type".to_string(),
                "Authorization".to_string(),
                "X-Requested-With".to_string(),
            ],
            expose_headers: SmallVec::new(),
            credentials: false,
            max_age: 86400, // 24 hours
        }
    }
}

impl CorsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.origins.push(origin.into());
        self
    }

    pub fn allow_method(mut self, method: Method) -> Self {
        if !self.methods.contains(&method) {
            self.methods.push(method);
        }
        self
    }

    pub fn allow_header(mut self, header: impl Into<String>) -> Self {
        self.headers.push(header.into());
        self
    }

    pub fn expose_header(mut self, header: impl Into<String>) -> Self {
        self.expose_headers.push(header.into());
        self
    }

    pub fn allow_credentials(mut self) -> Self {
        self.credentials = true;
        self
    }

    pub fn max_age(mut self, seconds: u32) -> Self {
        self.max_age = seconds;
        self
    }
}

/// CORS middleware
#[derive(Debug, Clone)]
pub struct Cors {
    config: CorsConfig,
    /// Pre-joined `Access-Control-Allow-Methods` value
    methods: String,
}

impl Cors {
    pub fn new(config: CorsConfig) -> Self {
        let methods = config
            .methods
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Self { config, methods }
    }

    /// Allow every origin with the default methods and headers
    pub fn permissive() -> Self {
        Self::new(CorsConfig::default())
    }

    fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.config.origins.is_empty() {
            return true;
        }
        self.config.origins.iter().any(|o| o == origin || o == "*")
    }

    fn add_cors_headers(&self, res: &mut Response, origin: &str) {
        let origin_value = if self.config.origins.is_empty() && !self.config.credentials {
            "*"
        } else {
            origin
        };
        res.add_header("Access-Control-Allow-Origin", origin_value);
        res.add_header("Access-Control-Allow-Methods", self.methods.as_str());

        if !self.config.headers.is_empty() {
            res.add_header("Access-Control-Allow-Headers", self.config.headers.join(", "));
        }
        if !self.config.expose_headers.is_empty() {
            res.add_header(
                "Access-Control-Expose-Headers",
                self.config.expose_headers.join(", "),
            );
        }
        if self.config.credentials {
            res.add_header("Access-Control-Allow-Credentials", "true");
        }
        res.add_header("Access-Control-Max-Age", self.config.max_age.to_string());
    }
}

impl<C> Middleware<C> for Cors {
    fn call(
        &self,
        ctx: &C,
        req: &Request<'_>,
        res: &mut Response,
        next: Next<'_, C>,
    ) -> HandlerResult {
        // No origin header means a same-origin request
        let Some(origin) = req.header("origin").filter(|o| !o.is_empty()) else {
            return next.run(ctx, req, res);
        };

        if !self.is_origin_allowed(origin) {
            res.set_status(StatusCode::FORBIDDEN)
                .add_header("Content-Type", "text/plain")
                .static_body(b"CORS: Origin not allowed");
            return Ok(());
        }

        // Preflight never reaches the rest of the chain
        if req.method() == Method::Options {
            res.set_status(StatusCode::NO_CONTENT);
            self.add_cors_headers(res, origin);
            return Ok(());
        }

        next.run(ctx, req, res)?;
        self.add_cors_headers(res, origin);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Handler;
    use bumpalo::Bump;

    fn run(cors: Cors, method: Method, origin: Option<&str>) -> (Response, bool) {
        let reached = std::sync::atomic::AtomicBool::new(false);
        let chain = [
            Handler::middleware(cors),
            Handler::endpoint_fn(|reached: &std::sync::atomic::AtomicBool, _req, res| {
                reached.store(true, std::sync::atomic::Ordering::SeqCst);
                res.text("ok");
                Ok(())
            }),
        ];
        let refs: Vec<_> = chain.iter().collect();

        let arena = Bump::new();
        let mut builder = Request::builder(&arena, method, "/api");
        if let Some(origin) = origin {
            builder = builder.header("Origin", origin);
        }
        let req = builder.build();
        let mut res = Response::ok();
        Next::new(&refs).run(&reached, &req, &mut res).unwrap();
        (res, reached.into_inner())
    }

    #[test]
    fn test_cors_permissive() {
        let cors = Cors::permissive();
        assert!(cors.is_origin_allowed("https://example.com"));
        assert!(cors.is_origin_allowed("http://localhost:3000"));
    }

    #[test]
    fn test_cors_specific_origin() {
        let cors = Cors::new(CorsConfig::new().allow_origin("https://example.com"));
        assert!(cors.is_origin_allowed("https://example.com"));
        assert!(!cors.is_origin_allowed("https://other.com"));
    }

    #[test]
    fn test_preflight_short_circuits() {
        let (res, reached) = run(Cors::permissive(), Method::Options, Some("https://a.dev"));
        assert!(!reached);
        assert_eq!(res.status, StatusCode::NO_CONTENT);
        assert_eq!(res.header("access-control-allow-origin"), Some("*"));
        assert!(res
            .header("access-control-allow-methods")
            .unwrap()
            .contains("PATCH"));
    }

    #[test]
    fn test_headers_added_after_handler() {
        let cors = Cors::new(
            CorsConfig::new()
                .allow_origin("https://a.dev")
                .allow_credentials(),
        );
        let (res, reached) = run(cors, Method::Get, Some("https://a.dev"));
        assert!(reached);
        assert_eq!(res.body_string().unwrap(), "ok");
        assert_eq!(res.header("access-control-allow-origin"), Some("https://a.dev"));
        assert_eq!(res.header("access-control-allow-credentials"), Some("true"));
    }

    #[test]
    fn test_disallowed_origin_rejected() {
        let cors = Cors::new(CorsConfig::new().allow_origin("https://a.dev"));
        let (res, reached) = run(cors, Method::Get, Some("https://evil.dev"));
        assert!(!reached);
        assert_eq!(res.status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_same_origin_untouched() {
        let (res, reached) = run(Cors::permissive(), Method::Get, None);
        assert!(reached);
        assert!(res.header("access-control-allow-origin").is_none());
    }
}
