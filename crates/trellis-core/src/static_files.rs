//! Static file serving
//!
//! [`StaticFiles`] is a [`PreRoute`] handler: it answers GET and HEAD
//! requests that resolve to a file under its root and leaves everything else
//! to the router.
//!
//! Containment is checked on canonical paths. The configured root is
//! canonicalized once, every candidate is canonicalized after decoding and
//! joining, and a candidate that does not start with the root is refused
//! with 403. Symlinks and encoded `..` segments are therefore caught the same
//! way as literal ones.

use crate::app::PreRoute;
use crate::{Method, Request, Response, Result, StatusCode};
use std::fs::Metadata;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Static file configuration
#[derive(Debug, Clone)]
pub struct StaticFileConfig {
    /// Root directory
    pub root: PathBuf,
    /// File served for a directory
    pub index: String,
    /// Cache max-age in seconds
    pub max_age: u32,
    /// Enable ETag
    pub etag: bool,
    /// Serve dot files
    pub hidden: bool,
    /// Extra headers on every served file
    pub headers: Vec<(String, String)>,
}

impl Default for StaticFileConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            index: "index.html".to_string(),
            max_age: 86400, // 1 day
            etag: true,
            hidden: false,
            headers: Vec::new(),
        }
    }
}

impl StaticFileConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.index = name.into();
        self
    }

    pub fn max_age(mut self, seconds: u32) -> Self {
        self.max_age = seconds;
        self
    }

    pub fn etag(mut self, enabled: bool) -> Self {
        self.etag = enabled;
        self
    }

    pub fn hidden(mut self, enabled: bool) -> Self {
        self.hidden = enabled;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

/// Outcome of resolving a request path
#[derive(Debug)]
enum Resolved {
    File(PathBuf, Metadata),
    Forbidden,
    Missing,
}

/// Static file handler
#[derive(Debug)]
pub struct StaticFiles {
    config: StaticFileConfig,
    /// Canonical form of `config.root`
    root: PathBuf,
}

impl StaticFiles {
    /// Fails if the root does not exist
    pub fn new(config: StaticFileConfig) -> Result<Self> {
        let root = config.root.canonicalize()?;
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("static root is not a directory: {}", root.display()),
            )
            .into());
        }
        Ok(Self { config, root })
    }

    /// Serve files from `root` with default settings
    pub fn serve(root: impl Into<PathBuf>) -> Result<Self> {
        Self::new(StaticFileConfig::new(root))
    }

    /// Canonical root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, request_path: &str) -> Resolved {
        let Ok(decoded) = urlencoding::decode(request_path) else {
            return Resolved::Missing;
        };
        let relative = decoded.trim_start_matches('/');

        let target = match self.contain(&self.root.join(relative)) {
            Resolved::File(path, meta) if meta.is_dir() => {
                match self.contain(&path.join(&self.config.index)) {
                    Resolved::File(index, meta) if meta.is_file() => Resolved::File(index, meta),
                    Resolved::Forbidden => Resolved::Forbidden,
                    _ => Resolved::Missing,
                }
            }
            other => other,
        };

        match target {
            Resolved::File(path, _) if !self.config.hidden && self.is_hidden(&path) => {
                Resolved::Missing
            }
            other => other,
        }
    }

    /// Canonicalize `candidate` and require it to stay under the root
    fn contain(&self, candidate: &Path) -> Resolved {
        let Ok(canonical) = candidate.canonicalize() else {
            return Resolved::Missing;
        };
        if !canonical.starts_with(&self.root) {
            return Resolved::Forbidden;
        }
        match canonical.metadata() {
            Ok(meta) => Resolved::File(canonical, meta),
            Err(_) => Resolved::Missing,
        }
    }

    fn is_hidden(&self, path: &Path) -> bool {
        path.strip_prefix(&self.root)
            .map(|rel| {
                rel.components().any(|c| match c {
                    Component::Normal(name) => name.to_string_lossy().starts_with('.'),
                    _ => false,
                })
            })
            .unwrap_or(false)
    }

    fn serve_file(&self, path: &Path, meta: &Metadata, req: &Request<'_>, res: &mut Response) {
        let etag = self.config.etag.then(|| generate_etag(meta));

        if let (Some(etag), Some(if_none_match)) = (&etag, req.header("if-none-match")) {
            if if_none_match == etag.as_str() {
                *res = Response::new(StatusCode::NOT_MODIFIED);
                res.add_header("ETag", etag.as_str());
                return;
            }
        }

        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "static file read failed");
                *res = Response::internal_error();
                return;
            }
        };

        *res = Response::ok();
        res.add_header("Content-Type", mime_type(path));
        if let Some(etag) = etag {
            res.add_header("ETag", etag);
        }
        if self.config.max_age > 0 {
            res.add_header("Cache-Control", format!("max-age={}", self.config.max_age));
        }
        for (k, v) in &self.config.headers {
            res.add_header(k.as_str(), v.as_str());
        }
        // HEAD responses keep the length but the body is never written
        res.bytes(content);
    }
}

impl PreRoute for StaticFiles {
    fn handle(&self, req: &Request<'_>, res: &mut Response) -> bool {
        if req.method() != Method::Get && req.method() != Method::Head {
            return false;
        }

        match self.resolve(req.path()) {
            Resolved::File(path, meta) => {
                self.serve_file(&path, &meta, req, res);
                true
            }
            Resolved::Forbidden => {
                tracing::debug!(path = req.path(), "static path escapes root");
                *res = Response::new(StatusCode::FORBIDDEN);
                res.add_header("Content-Type", "text/plain")
                    .static_body(b"Forbidden");
                true
            }
            Resolved::Missing => false,
        }
    }
}

fn generate_etag(meta: &Metadata) -> String {
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);

    format!("\"{:x}-{:x}\"", mtime, meta.len())
}

/// Content type for a file extension
pub fn mime_type(path: &Path) -> &'static str {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    match ext.to_ascii_lowercase().as_str() {
        // Text
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "xml" => "application/xml",
        "txt" => "text/plain; charset=utf-8",
        "md" => "text/markdown; charset=utf-8",
        "csv" => "text/csv",

        // Images
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "webp" => "image/webp",

        // Audio/Video
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",

        // Fonts
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",

        "pdf" => "application/pdf",
        "wasm" => "application/wasm",

        _ => "application/octet-stream",
    }
}
