//! Assertion listing handler.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use uuid::Uuid;

use crate::admin_api::types::{
    error_response, json_response, parse_query_pairs, query_value, AssertionDto,
};
use crate::admin_api::AdminState;
use crate::expectation::{AssertionFilter, AssertionStatus};

/// GET /assertions - List match attempts
///
/// Filters: `expectationId` (matched assertions for that expectation),
/// `status=matched|unmatched`, and `include=expectation` to embed the frozen
/// snapshot of the matched expectation.
pub fn handle_list(state: Arc<AdminState>, query: Option<&str>) -> Response<Full<Bytes>> {
    let pairs = parse_query_pairs(query);

    let expectation_id = match query_value(&pairs, "expectationId") {
        None => None,
        Some(raw) => match Uuid::parse_str(raw) {
            Ok(id) => Some(id),
            Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid expectation id"),
        },
    };

    let status = match query_value(&pairs, "status") {
        None => None,
        Some("matched") => Some(AssertionStatus::Matched),
        Some("unmatched") => Some(AssertionStatus::Unmatched),
        Some(other) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Unknown status filter: {other}"),
            )
        }
    };

    // opt-in inclusion list; "expectation" is the only recognized value
    let include_expectation = pairs
        .iter()
        .any(|(key, value)| key == "include" && value == "expectation");

    let assertions: Vec<AssertionDto> = state
        .registry
        .assertions(AssertionFilter {
            expectation_id,
            status,
        })
        .iter()
        .map(|a| AssertionDto::from_assertion(a, include_expectation))
        .collect();

    json_response(
        StatusCode::OK,
        &serde_json::json!({ "assertions": assertions }),
    )
}
