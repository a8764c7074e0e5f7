pub mod common;
pub mod handlers;
pub mod hdhr;
pub mod m3u;
pub mod routes;
pub mod state;
pub mod stream;

use std::net::SocketAddr;

pub use state::AppState;

/// Top-level HTTP server error; startup (bind) failures are fatal and
/// surfaced to `main` with a non-zero exit code.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind to {addr}: {source}")]
    Bind { addr: SocketAddr, source: std::io::Error },
    #[error("server runtime error: {0}")]
    Runtime(String),
}

/// Serve on `(config.server.host, config.server.port)` until the process
/// is asked to shut down (the `axum::serve` future only resolves on I/O
/// error or external cancellation of the caller's task).
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let addr = SocketAddr::new(state.config().server.host, state.config().server.port);
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;

    tracing::info!(%addr, "http server listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| ServerError::Runtime(e.to_string()))?;

    Ok(())
}
