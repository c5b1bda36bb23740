//! Subscription management handlers.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use tracing::info;
use uuid::Uuid;

use crate::admin_api::types::{
    collect_body, error_response, json_response, parse_query_pairs, query_value,
    CreateSubscriptionRequest,
};
use crate::admin_api::AdminState;

/// POST /subscriptions - Subscribe to a queue
pub async fn handle_create(
    req: Request<Incoming>,
    state: Arc<AdminState>,
) -> Response<Full<Bytes>> {
    let body = match collect_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };

    let dto: CreateSubscriptionRequest = match serde_json::from_slice(&body) {
        Ok(d) => d,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Invalid subscription JSON: {e}"),
            )
        }
    };

    if dto.queue.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Queue name cannot be empty");
    }

    match state.subscriptions.subscribe(&dto.queue, dto.idempotent).await {
        Ok(subscription) => {
            info!(
                subscription_id = %subscription.id(),
                queue = subscription.queue(),
                "subscribed"
            );
            json_response(
                StatusCode::CREATED,
                &serde_json::json!({ "subscription": subscription }),
            )
        }
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("Failed to subscribe: {e}"),
        ),
    }
}

/// GET /subscriptions - List all subscriptions
pub fn handle_list(state: Arc<AdminState>) -> Response<Full<Bytes>> {
    let subscriptions = state.subscriptions.all_subscriptions();
    json_response(
        StatusCode::OK,
        &serde_json::json!({ "subscriptions": subscriptions }),
    )
}

/// DELETE /subscriptions/:id - Unsubscribe by id (absent ids are a no-op)
pub async fn handle_delete_by_id(id: &str, state: Arc<AdminState>) -> Response<Full<Bytes>> {
    let id = match Uuid::parse_str(id) {
        Ok(id) => id,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid subscription id"),
    };

    match state.subscriptions.unsubscribe_by_id(id).await {
        Ok(()) => json_response(StatusCode::OK, &serde_json::json!({})),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("Failed to unsubscribe: {e}"),
        ),
    }
}

/// DELETE /subscriptions - Unsubscribe everything, or one queue with `?queue=`
pub async fn handle_delete(state: Arc<AdminState>, query: Option<&str>) -> Response<Full<Bytes>> {
    let pairs = parse_query_pairs(query);

    let result = match query_value(&pairs, "queue") {
        Some(queue) => state.subscriptions.unsubscribe_by_queue(queue).await,
        None => state.subscriptions.unsubscribe_all().await,
    };

    match result {
        Ok(()) => json_response(StatusCode::OK, &serde_json::json!({})),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("Failed to unsubscribe: {e}"),
        ),
    }
}
