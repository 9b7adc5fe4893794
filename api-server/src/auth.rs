use actix_web::http::header::{HeaderMap, AUTHORIZATION};
use actix_web::{http::StatusCode, HttpRequest, HttpResponse};

use crate::response::json_error_with_code;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let authorization = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = authorization.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim()).filter(|token| !token.is_empty())
}

/// Feeds that write observations or targets need the configured key, either
/// as `x-api-key` or as a bearer token. No key configured means open access.
pub(crate) fn require_api_key(req: &HttpRequest, expected: Option<&str>) -> Result<(), HttpResponse> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let headers = req.headers();
    let presented = headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .or_else(|| bearer_token(headers));
    if presented == Some(expected) {
        return Ok(());
    }

    tracing::warn!(path = %req.path(), "rejected feed request without a valid api key");
    Err(json_error_with_code(
        StatusCode::UNAUTHORIZED,
        "missing or invalid api key",
        Some("unauthorized"),
    ))
}
