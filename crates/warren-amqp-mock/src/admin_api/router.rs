//! Route dispatch logic for the control plane.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use tracing::debug;

use super::handlers::{assertions, expectations, subscriptions, system};
use super::types::not_found;
use super::AdminState;

/// Main request router
pub async fn route_request(
    req: Request<Incoming>,
    state: Arc<AdminState>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(|s| s.to_string());

    debug!("Admin API: {} {}", method, path);

    Ok(route_by_path(&method, &path, query.as_deref(), req, state).await)
}

async fn route_by_path(
    method: &Method,
    path: &str,
    query: Option<&str>,
    req: Request<Incoming>,
    state: Arc<AdminState>,
) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/health") => return system::handle_health(),
        (&Method::POST, "/reset") => return system::handle_reset_all(state).await,
        (&Method::GET, "/assertions") => return assertions::handle_list(state, query),
        _ => {}
    }

    if path == "/expectations" {
        return match *method {
            Method::GET => expectations::handle_list(state, query),
            Method::POST => expectations::handle_create(req, state).await,
            Method::DELETE => expectations::handle_reset(state),
            _ => not_found(),
        };
    }

    if let Some(id) = path.strip_prefix("/expectations/") {
        return match *method {
            Method::GET => expectations::handle_get(id, state),
            _ => not_found(),
        };
    }

    if path == "/subscriptions" {
        return match *method {
            Method::GET => subscriptions::handle_list(state),
            Method::POST => subscriptions::handle_create(req, state).await,
            Method::DELETE => subscriptions::handle_delete(state, query).await,
            _ => not_found(),
        };
    }

    if let Some(id) = path.strip_prefix("/subscriptions/") {
        return match *method {
            Method::DELETE => subscriptions::handle_delete_by_id(id, state).await,
            _ => not_found(),
        };
    }

    not_found()
}
