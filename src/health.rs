use crate::error::Result;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

async fn ok() -> &'static str {
    "ok"
}

pub fn routes() -> Router {
    Router::new().route("/", get(ok)).route("/healthz", get(ok))
}

/// Serve the liveness routes on `listener` until the process exits
pub async fn serve_on(listener: TcpListener) -> Result<()> {
    axum::serve(listener, routes()).await?;
    Ok(())
}

/// Bind `0.0.0.0:port` and serve the liveness routes
pub async fn serve(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Liveness endpoint started");
    serve_on(listener).await
}
