//! Axum front end for the HTTP gateway handler.
use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    extract::{ConnectInfo, Request},
    routing::any,
};
use eyre::{Result, WrapErr};
use tokio::{net::TcpListener, sync::oneshot};
use tower_http::trace::TraceLayer;

use crate::{adapters::http_handler::HttpGatewayHandler, utils::ServiceHandle};

/// Router sending every path, including `/`, to the gateway handler.
pub fn router(handler: Arc<HttpGatewayHandler>) -> Router {
    let route = |handler: Arc<HttpGatewayHandler>| {
        any(
            move |ConnectInfo(peer): ConnectInfo<SocketAddr>, req: Request| {
                let handler = handler.clone();
                async move { handler.handle(req, Some(peer)).await }
            },
        )
    };

    Router::new()
        .route("/{*path}", route(handler.clone()))
        .route("/", route(handler))
        .layer(TraceLayer::new_for_http())
}

/// Serve the HTTP gateway on `addr` until the returned handle is stopped.
///
/// Stopping waits for in-flight requests to complete.
pub async fn start(handler: Arc<HttpGatewayHandler>, addr: &str) -> Result<ServiceHandle> {
    let listener = TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("Failed to bind HTTP gateway to {addr}"))?;
    let local_addr = listener
        .local_addr()
        .wrap_err("Failed to read HTTP gateway address")?;

    let app = router(handler);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    tracing::info!(%local_addr, "HTTP gateway listening");

    let task = tokio::spawn(async move {
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = stop_rx.await;
        })
        .await;

        match result {
            Ok(()) => tracing::info!(%local_addr, "HTTP gateway stopped"),
            Err(e) => tracing::error!(%local_addr, "HTTP gateway failed: {}", e),
        }
    });

    Ok(ServiceHandle::new(local_addr, stop_tx, task))
}
