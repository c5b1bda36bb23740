//! Wire DTOs and response helpers for the control plane.

use bytes::Bytes;
use chrono::SecondsFormat;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::comparator::{BodyComparator, MatchType};
use crate::expectation::{Assertion, Expectation};

// =============================================================================
// Requests
// =============================================================================

/// Body of `POST /expectations`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateExpectationRequest {
    pub request: RequestDto,
    pub response: ResponseDto,
    #[serde(default)]
    pub times: Option<TimesDto>,
    /// Floating-point number of seconds.
    #[serde(default)]
    pub time_to_live_seconds: Option<f64>,
    #[serde(default)]
    pub priority: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDto {
    pub exchange: String,
    pub routing_key: String,
    pub body: BodyDto,
}

/// Exactly one of `json_body` / `regex_body` must be set.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_body: Option<JsonBodyDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex_body: Option<RegexBodyDto>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonBodyDto {
    pub body: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_type: Option<MatchType>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegexBodyDto {
    pub regex: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseDto {
    pub body: Value,
}

/// Usage counter on the wire: `{"unlimited": true}` or
/// `{"remainingTimes": n}`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimesDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlimited: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_times: Option<u32>,
}

/// Body of `POST /subscriptions`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionRequest {
    pub queue: String,
    #[serde(default)]
    pub idempotent: bool,
}

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateExpectationResponse {
    pub expectation_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectationDto {
    pub id: String,
    pub request: RequestDto,
    pub response: ResponseDto,
    pub times: TimesDto,
    pub priority: i32,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

impl ExpectationDto {
    pub fn from_expectation(expectation: &Expectation) -> Self {
        let times = expectation.times();
        let times_dto = if times.is_unlimited() {
            TimesDto {
                unlimited: Some(true),
                remaining_times: None,
            }
        } else {
            TimesDto {
                unlimited: None,
                remaining_times: Some(times.remaining()),
            }
        };

        Self {
            id: expectation.id().to_string(),
            request: RequestDto {
                exchange: expectation.request().exchange().to_string(),
                routing_key: expectation.request().routing_key().to_string(),
                body: body_dto(expectation.request().body_comparator()),
            },
            response: ResponseDto {
                body: json_or_string(expectation.response().body()),
            },
            times: times_dto,
            priority: expectation.priority(),
            created_at: rfc3339(expectation.created_at()),
            expires_at: expectation.expires_at().map(rfc3339),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionDto {
    pub id: String,
    pub candidate: CandidateDto,
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expectation: Option<ExpectationDto>,
    pub created_at: String,
}

impl AssertionDto {
    pub fn from_assertion(assertion: &Assertion, include_expectation: bool) -> Self {
        let expectation = if include_expectation {
            assertion.expectation().map(ExpectationDto::from_expectation)
        } else {
            None
        };

        Self {
            id: assertion.id().to_string(),
            candidate: CandidateDto {
                exchange: assertion.candidate().exchange().to_string(),
                routing_key: assertion.candidate().routing_key().to_string(),
                body: json_or_string(assertion.candidate().body()),
            },
            matched: assertion.is_matched(),
            expectation,
            created_at: rfc3339(assertion.created_at()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateDto {
    pub exchange: String,
    pub routing_key: String,
    pub body: Value,
}

/// Error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub errors: Vec<ErrorDetail>,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

fn body_dto(comparator: &BodyComparator) -> BodyDto {
    match comparator {
        BodyComparator::Json(json) => BodyDto {
            json_body: Some(JsonBodyDto {
                body: json.body().clone(),
                match_type: Some(json.match_type()),
            }),
            regex_body: None,
        },
        BodyComparator::Regex(regex) => BodyDto {
            json_body: None,
            regex_body: Some(RegexBodyDto {
                regex: regex.pattern().to_string(),
            }),
        },
    }
}

/// Raw payloads that do not parse as JSON are surfaced as a lossy string.
fn json_or_string(raw: &[u8]) -> Value {
    serde_json::from_slice(raw)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(raw).into_owned()))
}

fn rfc3339(at: chrono::DateTime<chrono::Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// =============================================================================
// Response helper functions
// =============================================================================

/// Create a JSON response
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string_pretty(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(json)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("Internal Server Error"))))
}

/// Create an error response
pub fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let error = ErrorResponse {
        errors: vec![ErrorDetail {
            code: status.as_str().to_string(),
            message: message.to_string(),
        }],
    };
    json_response(status, &error)
}

/// Create a not found response
pub fn not_found() -> Response<Full<Bytes>> {
    error_response(StatusCode::NOT_FOUND, "Not Found")
}

/// Collect request body into bytes
pub async fn collect_body(req: Request<Incoming>) -> Result<Bytes, String> {
    use http_body_util::BodyExt;
    req.collect()
        .await
        .map(|c| c.to_bytes())
        .map_err(|e| format!("Failed to read request body: {e}"))
}

/// Parse a query string into key/value pairs. Keys may repeat.
pub fn parse_query_pairs(query: Option<&str>) -> Vec<(String, String)> {
    let Some(query) = query else {
        return Vec::new();
    };
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

/// First value for a key in parsed query pairs.
pub fn query_value<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}
