//! HTTP API endpoint handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use serde::Serialize;
use undertow_shared::UserId;

use crate::{error::TicketError, ui::state::AppState};

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

#[derive(Debug, Serialize)]
pub struct TicketResponse {
    pub ticket: String,
}

/// Mints a single-use connection ticket for the caller.
///
/// Authentication proper belongs to the host application; it forwards
/// the already-verified identity in the `x-user-id` header when it
/// proxies this endpoint.
pub async fn issue_ticket(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<TicketResponse>, StatusCode> {
    let user_id = headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .map(UserId)
        .ok_or(StatusCode::BAD_REQUEST)?;

    match state.core.tickets.issue(user_id).await {
        Ok(ticket) => Ok(Json(TicketResponse { ticket })),
        Err(TicketError::Store(err)) => {
            tracing::error!(%err, "ticket issuance failed");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
        Err(TicketError::Invalid) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// Users currently online across all server processes.
pub async fn online_users(State(state): State<Arc<AppState>>) -> Json<Vec<u64>> {
    let mut ids: Vec<u64> = state
        .core
        .presence
        .online_user_ids()
        .await
        .into_iter()
        .map(|user| user.0)
        .collect();
    ids.sort_unstable();
    Json(ids)
}
