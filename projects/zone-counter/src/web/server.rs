use crate::pipeline::Pipeline;
use crate::web::api::{
    add_zone_handler, delete_zone_handler, get_frame, get_performance, get_stats, get_zones,
    replace_zones_handler, update_zone_handler,
};
use anyhow::Result;
use axum::{
    routing::{get, patch, post},
    Router,
};
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/stats", get(get_stats))
        .route("/performance", get(get_performance))
        .route("/frame.jpg", get(get_frame))
        .route("/zones", get(get_zones).post(replace_zones_handler))
        .route("/zones/add", post(add_zone_handler))
        .route(
            "/zones/:id",
            patch(update_zone_handler).delete(delete_zone_handler),
        )
        .with_state(pipeline)
        .layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

pub async fn run_server(host: IpAddr, port: u16, pipeline: Arc<Pipeline>) -> Result<()> {
    let mut current_port = port;
    let listener = loop {
        let addr = SocketAddr::new(host, current_port);
        match TcpListener::bind(addr) {
            Ok(listener) => {
                // Tokio requires non-blocking std listeners
                listener.set_nonblocking(true)?;
                info!("Successfully bound to {}", addr);
                break listener;
            }
            Err(e) => {
                warn!("Failed to bind to {}: {}. Trying next port...", addr, e);
                current_port = current_port.wrapping_add(1);
                if current_port == 0 {
                    return Err(anyhow::anyhow!("No available ports found"));
                }
            }
        }
    };

    let tokio_listener = tokio::net::TcpListener::from_std(listener)?;
    info!(
        "Zone counter server started on http://{:?}",
        tokio_listener.local_addr()?
    );

    axum::serve(tokio_listener, router(pipeline))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
