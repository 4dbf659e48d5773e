//! Static file server for the build output directory.
//!
//! Files are served by `tower_http`'s `ServeDir` (content type, HEAD, ranges,
//! `index.html` for directories). Any path with a segment starting with `.`
//! is answered with 404 before the filesystem is consulted.

use std::net::SocketAddr;
use std::path::Path;

use axum::extract::Request;
use axum::handler::HandlerWithoutStateExt;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use percent_encoding::percent_decode_str;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::services::ServeDir;

use crate::error::{io_err, DaemonError};

/// Router serving `root`, with dotfiles hidden.
pub fn router(root: impl AsRef<Path>) -> Router {
    let files = ServeDir::new(root.as_ref())
        .append_index_html_on_directories(true)
        .not_found_service(not_found.into_service());

    Router::new()
        .fallback_service(files)
        .layer(middleware::from_fn(ignore_dotfiles))
}

/// True when any segment of the percent-decoded request path starts with `.`.
pub fn is_hidden_path(path: &str) -> bool {
    percent_decode_str(path)
        .decode_utf8_lossy()
        .split(['/', '\\'])
        .any(|segment| segment.starts_with('.'))
}

async fn ignore_dotfiles(request: Request, next: Next) -> Response {
    if is_hidden_path(request.uri().path()) {
        tracing::debug!(path = %request.uri().path(), "dotfile request ignored");
        return not_found().await.into_response();
    }
    next.run(request).await
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}

/// Bind the server socket on all interfaces.
pub async fn bind(port: u16) -> Result<TcpListener, DaemonError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr)
        .await
        .map_err(|source| DaemonError::Bind { addr, source })
}

/// Serve `root` on `listener` until `shutdown_rx` fires.
pub async fn server_task(
    listener: TcpListener,
    root: impl AsRef<Path>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let root = root.as_ref();
    if !root.is_dir() {
        tracing::warn!(
            path = %root.display(),
            "build output directory missing; requests will 404 until it exists"
        );
    }

    axum::serve(listener, router(root))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
        .map_err(|e| io_err(root, e))?;

    tracing::debug!("server stopped");
    Ok(())
}
