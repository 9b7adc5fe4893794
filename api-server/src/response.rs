use actix_web::{http::StatusCode, HttpResponse};
use scout_core::SourceError;

pub(crate) fn json_error_with_code(
    status: StatusCode,
    message: impl Into<String>,
    error_code: Option<&str>,
) -> HttpResponse {
    let mut body = serde_json::json!({
        "success": false,
        "error": message.into(),
    });
    if let Some(code) = error_code {
        body["error_code"] = serde_json::Value::String(code.to_string());
    }
    HttpResponse::build(status).json(body)
}

pub(crate) fn bad_request(message: impl Into<String>, error_code: &str) -> HttpResponse {
    json_error_with_code(StatusCode::BAD_REQUEST, message, Some(error_code))
}

pub(crate) fn not_found(message: impl Into<String>, error_code: &str) -> HttpResponse {
    json_error_with_code(StatusCode::NOT_FOUND, message, Some(error_code))
}

/// Storage failures are retryable: the caller keeps its state and asks again.
pub(crate) fn persistence_unavailable(operation: &str, err: impl std::fmt::Display) -> HttpResponse {
    tracing::error!(operation, "persistence failure: {err}");
    json_error_with_code(
        StatusCode::SERVICE_UNAVAILABLE,
        "persistence unavailable, retry shortly",
        Some("persistence_unavailable"),
    )
}

pub(crate) fn source_unavailable(err: &SourceError) -> HttpResponse {
    let SourceError::Unavailable { operation, .. } = err;
    persistence_unavailable(operation, err)
}
