//! Server execution logic.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use super::{
    handler::{health_check, issue_ticket, online_users, websocket_handler},
    signal::shutdown_signal,
    state::AppState,
};
use crate::core::RealtimeCore;

/// Realtime WebSocket server hosting one [`RealtimeCore`].
pub struct Server {
    core: Arc<RealtimeCore>,
}

impl Server {
    pub fn new(core: Arc<RealtimeCore>) -> Self {
        Self { core }
    }

    /// Runs until a shutdown signal, then drains connections. Returns
    /// whether the drain finished inside the configured timeout; the
    /// binary turns that into its exit code.
    pub async fn run(self, host: String, port: u16) -> Result<bool, Box<dyn std::error::Error>> {
        self.core.start().await;

        let app_state = Arc::new(AppState {
            core: Arc::clone(&self.core),
        });
        let app = Router::new()
            .route("/ws", get(websocket_handler))
            .route("/ws/ticket", post(issue_ticket))
            .route("/api/health", get(health_check))
            .route("/api/online", get(online_users))
            .layer(TraceLayer::new_for_http())
            .with_state(app_state);

        let bind_addr = format!("{}:{}", host, port);
        let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

        tracing::info!("realtime server listening on {}", listener.local_addr()?);
        tracing::info!("Connect to: ws://{}/ws?ticket=...", bind_addr);
        tracing::info!("Press Ctrl+C to shutdown gracefully");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        let drained = self.core.shutdown().await;
        if drained {
            tracing::info!("Server shutdown complete");
        } else {
            tracing::warn!("Server shutdown with undrained connections");
        }
        Ok(drained)
    }
}
