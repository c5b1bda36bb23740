//! Health and reset-all handlers.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use tracing::error;

use crate::admin_api::types::{error_response, json_response};
use crate::admin_api::AdminState;

/// GET /health - Liveness probe
pub fn handle_health() -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, &serde_json::json!({ "status": "ok" }))
}

/// POST /reset - Drop expectations, assertions and all subscriptions
pub async fn handle_reset_all(state: Arc<AdminState>) -> Response<Full<Bytes>> {
    state.registry.reset();
    state.registry.clear_assertions();

    if let Err(e) = state.subscriptions.unsubscribe_all().await {
        error!(error = %e, "reset-all failed to unsubscribe");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("Failed to unsubscribe: {e}"),
        );
    }

    json_response(StatusCode::OK, &serde_json::json!({}))
}
