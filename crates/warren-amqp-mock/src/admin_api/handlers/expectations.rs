//! Expectation CRUD handlers.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use uuid::Uuid;

use crate::admin_api::types::{
    collect_body, error_response, json_response, parse_query_pairs, query_value, BodyDto,
    CreateExpectationRequest, CreateExpectationResponse, ExpectationDto, TimesDto,
};
use crate::admin_api::AdminState;
use crate::comparator::{BodyComparator, JsonBody, RegexBody};
use crate::expectation::{
    Expectation, ExpectationFilter, ExpectationStatus, Request as ExpectationRequest,
    Response as ExpectationResponse, TimeToLive, Times,
};

/// POST /expectations - Create a new expectation
pub async fn handle_create(
    req: Request<Incoming>,
    state: Arc<AdminState>,
) -> Response<Full<Bytes>> {
    let body = match collect_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };

    let dto: CreateExpectationRequest = match serde_json::from_slice(&body) {
        Ok(d) => d,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Invalid expectation JSON: {e}"),
            )
        }
    };

    let expectation = match build_expectation(dto) {
        Ok(e) => e,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, &message),
    };

    let id = state.registry.create(expectation);
    json_response(
        StatusCode::CREATED,
        &CreateExpectationResponse {
            expectation_id: id.to_string(),
        },
    )
}

/// GET /expectations - List expectations, optionally filtered by status
pub fn handle_list(state: Arc<AdminState>, query: Option<&str>) -> Response<Full<Bytes>> {
    let pairs = parse_query_pairs(query);
    let status = match query_value(&pairs, "status") {
        None => None,
        Some("active") => Some(ExpectationStatus::Active),
        Some("expired") => Some(ExpectationStatus::Expired),
        Some(other) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Unknown status filter: {other}"),
            )
        }
    };

    let expectations: Vec<ExpectationDto> = state
        .registry
        .expectations(ExpectationFilter { status })
        .iter()
        .map(ExpectationDto::from_expectation)
        .collect();

    json_response(
        StatusCode::OK,
        &serde_json::json!({ "expectations": expectations }),
    )
}

/// GET /expectations/:id - Get a single expectation
pub fn handle_get(id: &str, state: Arc<AdminState>) -> Response<Full<Bytes>> {
    let id = match Uuid::parse_str(id) {
        Ok(id) => id,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid expectation id"),
    };

    match state.registry.expectation(id) {
        Some(expectation) => json_response(
            StatusCode::OK,
            &serde_json::json!({ "expectation": ExpectationDto::from_expectation(&expectation) }),
        ),
        None => error_response(StatusCode::NOT_FOUND, "Expectation not found"),
    }
}

/// DELETE /expectations - Reset all expectations (assertions are retained)
pub fn handle_reset(state: Arc<AdminState>) -> Response<Full<Bytes>> {
    state.registry.reset();
    json_response(StatusCode::OK, &serde_json::json!({}))
}

fn build_expectation(dto: CreateExpectationRequest) -> Result<Expectation, String> {
    let comparator = build_comparator(&dto.request.body)?;
    let request = ExpectationRequest::new(dto.request.exchange, dto.request.routing_key, comparator)
        .map_err(|e| e.to_string())?;

    let response_body =
        serde_json::to_vec(&dto.response.body).map_err(|e| format!("Invalid response body: {e}"))?;
    let response = ExpectationResponse::new(response_body);

    let mut builder = Expectation::builder(request, response);

    if let Some(priority) = dto.priority {
        builder = builder.priority(priority);
    }
    if let Some(times) = dto.times {
        builder = builder.times(resolve_times(times)?);
    }
    if let Some(secs) = dto.time_to_live_seconds {
        let duration = Duration::try_from_secs_f64(secs)
            .map_err(|_| "timeToLiveSeconds must be a positive number".to_string())?;
        builder = builder.ttl(TimeToLive::new(duration).map_err(|e| e.to_string())?);
    }

    Ok(builder.build())
}

fn build_comparator(body: &BodyDto) -> Result<BodyComparator, String> {
    if let Some(json) = &body.json_body {
        let raw = serde_json::to_vec(&json.body).map_err(|e| e.to_string())?;
        let comparator = JsonBody::new(&raw, json.match_type.unwrap_or_default())
            .map_err(|e| e.to_string())?;
        return Ok(BodyComparator::Json(comparator));
    }
    if let Some(regex) = &body.regex_body {
        let comparator = RegexBody::new(&regex.regex).map_err(|e| e.to_string())?;
        return Ok(BodyComparator::Regex(comparator));
    }
    Err("Request body pattern is required (jsonBody or regexBody)".to_string())
}

fn resolve_times(dto: TimesDto) -> Result<Times, String> {
    if dto.unlimited == Some(true) {
        return Ok(Times::unlimited());
    }
    match dto.remaining_times {
        Some(count) => Times::limited(count).map_err(|e| e.to_string()),
        None => Err("times must specify unlimited or remainingTimes".to_string()),
    }
}
