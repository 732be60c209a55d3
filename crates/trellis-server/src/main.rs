//! trellis-server: demo host for trellis-core
//!
//! Serves a small JSON API on either serving mode, optionally with a static
//! file directory in front of the router.
//!
//! ```text
//! trellis-server --mode pool --port 8080 --static-dir ./public
//! RUST_LOG=trellis_core=debug trellis-server
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trellis_core::middleware::{Cors, Logger};
use trellis_core::{
    App, BoxError, Handler, HandlerResult, Multipart, Request, Response, Router, Server,
    ServerConfig, ServerMode, StaticFiles, StatusCode,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Largest multipart field the demo upload endpoint will read
const UPLOAD_FIELD_LIMIT: u64 = 256 * 1024;

#[derive(Parser, Debug)]
#[command(name = "trellis-server", version, about = "Lightweight HTTP/1.1 demo server")]
struct Args {
    /// Bind address
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind (0 picks a free port)
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Serving mode: "pool" or "event"
    #[arg(long, default_value = "event")]
    mode: ServerMode,

    /// Event-loop workers sharing the poller
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Blocking pool size (defaults to twice the CPU count)
    #[arg(long)]
    pool_size: Option<usize>,

    /// Largest accepted request body in bytes
    #[arg(long, default_value_t = 1024 * 1024)]
    max_body_size: usize,

    /// Serve files from this directory before routing
    #[arg(long)]
    static_dir: Option<PathBuf>,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        let mut config = ServerConfig::new()
            .host(self.host.clone())
            .port(self.port)
            .mode(self.mode)
            .workers(self.workers)
            .max_body_size(self.max_body_size);
        if let Some(size) = self.pool_size {
            config = config.pool_size(size);
        }
        config
    }
}

/// Application context shared by every handler
struct AppState {
    started: Instant,
    requests: AtomicU64,
}

#[derive(Debug, Serialize)]
struct User {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct CreateUser {
    name: String,
}

#[derive(Debug, Serialize)]
struct UploadedPart {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    size: usize,
}

fn count_requests(
    state: &AppState,
    req: &Request<'_>,
    res: &mut Response,
    next: trellis_core::Next<'_, AppState>,
) -> HandlerResult {
    state.requests.fetch_add(1, Ordering::Relaxed);
    next.run(state, req, res)
}

fn index(_: &AppState, _req: &Request<'_>, res: &mut Response) -> HandlerResult {
    res.html("<h1>trellis</h1><p>Try <code>/health</code> or <code>/users/42</code>.</p>");
    Ok(())
}

fn health(state: &AppState, _req: &Request<'_>, res: &mut Response) -> HandlerResult {
    res.json(&serde_json::json!({
        "status": "ok",
        "uptime_secs": state.started.elapsed().as_secs(),
        "requests": state.requests.load(Ordering::Relaxed),
    }))?;
    Ok(())
}

fn current_user(_: &AppState, _req: &Request<'_>, res: &mut Response) -> HandlerResult {
    res.json(&User {
        id: "me".to_string(),
        name: "Current User".to_string(),
    })?;
    Ok(())
}

fn get_user(_: &AppState, req: &Request<'_>, res: &mut Response) -> HandlerResult {
    let id = req.param("id").unwrap_or_default();
    if !id.bytes().all(|b| b.is_ascii_digit()) {
        *res = Response::bad_request("user id must be numeric");
        return Ok(());
    }
    res.json(&User {
        id: id.to_string(),
        name: format!("User {}", id),
    })?;
    Ok(())
}

fn create_user(_: &AppState, req: &Request<'_>, res: &mut Response) -> HandlerResult {
    let input: CreateUser = req.json()?;
    res.set_status(StatusCode::CREATED).json(&User {
        id: "1".to_string(),
        name: input.name,
    })?;
    Ok(())
}

fn echo(_: &AppState, req: &Request<'_>, res: &mut Response) -> HandlerResult {
    let content_type = req.content_type().unwrap_or("application/octet-stream");
    res.add_header("Content-Type", content_type)
        .bytes(req.body_bytes().to_vec());
    Ok(())
}

fn upload(_: &AppState, req: &Request<'_>, res: &mut Response) -> HandlerResult {
    let mut multipart = Multipart::from_request(req)?;
    let mut parts = Vec::new();
    while let Some(mut part) = multipart.next_part()? {
        let size = part.read_limited(UPLOAD_FIELD_LIMIT)?.len();
        parts.push(UploadedPart {
            name: part.name().to_string(),
            filename: part.filename().map(str::to_string),
            content_type: part.content_type().map(str::to_string),
            size,
        });
    }
    res.json(&parts)?;
    Ok(())
}

fn on_error(
    err: &BoxError,
    _req: &Request<'_>,
    res: &mut Response,
    _: &AppState,
) -> HandlerResult {
    let status = match err.downcast_ref::<trellis_core::Error>() {
        Some(trellis_core::Error::Json(_)) | Some(trellis_core::Error::Multipart(_)) => {
            StatusCode::BAD_REQUEST
        }
        Some(trellis_core::Error::FileTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    res.set_status(status)
        .json(&serde_json::json!({ "error": err.to_string() }))?;
    Ok(())
}

fn router() -> Router<AppState> {
    let mut router = Router::new();
    router
        .use_middleware(Handler::middleware(Logger::default()))
        .use_middleware(Handler::middleware(Cors::permissive()))
        .use_middleware(Handler::middleware_fn(count_requests))
        .get("/", vec![Handler::endpoint_fn(index)])
        .get("/health", vec![Handler::endpoint_fn(health)])
        .get("/users/me", vec![Handler::endpoint_fn(current_user)])
        .get("/users/:id", vec![Handler::endpoint_fn(get_user)])
        .post("/users", vec![Handler::endpoint_fn(create_user)])
        .post("/echo", vec![Handler::endpoint_fn(echo)])
        .post("/upload", vec![Handler::endpoint_fn(upload)]);
    router
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let state = AppState {
        started: Instant::now(),
        requests: AtomicU64::new(0),
    };
    let mut app = App::new(state)
        .with_router(router())
        .with_error_handler(on_error);

    if let Some(dir) = &args.static_dir {
        let files = StaticFiles::serve(dir)?;
        tracing::info!(root = %files.root().display(), "serving static files");
        app = app.with_pre_route(files);
    }

    let server = Server::bind(app, args.server_config())?;
    server.run()?;
    Ok(())
}
