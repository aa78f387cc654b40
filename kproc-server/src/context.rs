//! Per-request context: request IDs, tracing spans, and error-body shaping
//!
//! Every inbound request gets a `request_id` - the client-supplied
//! `X-Request-ID` header when present, a fresh UUID otherwise. The ID is
//! attached to the request extensions for handlers, carried on a tracing
//! span for every log line, echoed on the response header, and stamped into
//! every error body. This middleware is the single place error responses
//! take their final JSON shape; no HTML error page can escape it.

use crate::error::ErrorPayload;
use crate::AppState;
use axum::{
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use serde_json::json;
use tracing::Instrument;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
const EXPOSE_HEADERS: &str = "access-control-expose-headers";

/// The request's correlation identifier
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // The middleware always inserts one; the fallback only fires for
        // handlers mounted outside it (tests).
        Ok(parts
            .extensions
            .get::<RequestId>()
            .cloned()
            .unwrap_or_else(|| RequestId(Uuid::new_v4().to_string())))
    }
}

/// Extract the inbound request id, accepting the header case-insensitively
fn inbound_request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Request-context middleware; mounted outermost so it sees final headers
pub async fn request_context(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let request_id =
        inbound_request_id(req.headers()).unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    req.extensions_mut().insert(RequestId(request_id.clone()));

    let span = tracing::info_span!(
        "request",
        method = %method,
        path = %path,
        request_id = %request_id,
    );
    let mut response = next.run(req).instrument(span).await;

    // CORS preflight answers 204 with no body.
    if method == Method::OPTIONS && response.status() == StatusCode::OK {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }

    if response.status().is_client_error() || response.status().is_server_error() {
        response = shape_error(response, &request_id, &path, state.config.debug);
    }

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    merge_expose_headers(headers);

    response
}

/// Rewrite an error response into the canonical JSON error schema
///
/// Handler errors carry an [`ErrorPayload`] extension; transport-level
/// errors (unrouted paths, rejected bodies) arrive bare and are wrapped
/// from their status. JSON error bodies without the payload marker (the
/// duplicate-upload 409) already have their final shape and pass through.
fn shape_error(response: Response, request_id: &str, path: &str, debug: bool) -> Response {
    let status = response.status();
    let payload = response.extensions().get::<ErrorPayload>().cloned();

    if payload.is_none() && is_json(response.headers()) {
        return response;
    }

    let message = payload
        .as_ref()
        .map(|p| p.message.clone())
        .unwrap_or_else(|| default_message(status));

    let mut body = json!({
        "error": message,
        "code": status.as_u16(),
        "request_id": request_id,
    });
    if status == StatusCode::NOT_FOUND {
        body["path"] = json!(path);
    }
    if debug {
        if let Some(exception) = payload.and_then(|p| p.exception) {
            body["exception"] = json!(exception);
        }
    }

    let bytes = serde_json::to_vec(&body).unwrap_or_default();
    let (mut parts, _) = response.into_parts();
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    parts
        .headers
        .insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
    Response::from_parts(parts, Body::from(bytes))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false)
}

fn default_message(status: StatusCode) -> String {
    match status {
        StatusCode::NOT_FOUND => "Not found".to_string(),
        StatusCode::METHOD_NOT_ALLOWED => "Method not allowed".to_string(),
        StatusCode::PAYLOAD_TOO_LARGE => "Payload too large".to_string(),
        StatusCode::UNSUPPORTED_MEDIA_TYPE => "Unsupported media type".to_string(),
        StatusCode::BAD_REQUEST => "Bad request".to_string(),
        other => other
            .canonical_reason()
            .unwrap_or("Request failed")
            .to_string(),
    }
}

/// Merge every `Access-Control-Expose-Headers` value into one deduplicated
/// header that always names `x-request-id`
///
/// Multiple middleware may each add to the list; tokens must end up
/// pairwise distinct.
fn merge_expose_headers(headers: &mut HeaderMap) {
    let mut tokens: Vec<String> = Vec::new();
    for value in headers.get_all(EXPOSE_HEADERS) {
        if let Ok(raw) = value.to_str() {
            for token in raw.split(',') {
                let token = token.trim();
                if !token.is_empty()
                    && !tokens.iter().any(|t| t.eq_ignore_ascii_case(token))
                {
                    tokens.push(token.to_string());
                }
            }
        }
    }
    if !tokens.iter().any(|t| t.eq_ignore_ascii_case(REQUEST_ID_HEADER)) {
        tokens.push(REQUEST_ID_HEADER.to_string());
    }
    if let Ok(value) = HeaderValue::from_str(&tokens.join(", ")) {
        headers.remove(EXPOSE_HEADERS);
        headers.insert(EXPOSE_HEADERS, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_id_accepts_any_header_case() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Request-ID", HeaderValue::from_static("abc-123"));
        assert_eq!(inbound_request_id(&headers).as_deref(), Some("abc-123"));
    }

    #[test]
    fn blank_inbound_id_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("   "));
        assert_eq!(inbound_request_id(&headers), None);
    }

    #[test]
    fn expose_headers_are_deduplicated() {
        let mut headers = HeaderMap::new();
        headers.append(EXPOSE_HEADERS, HeaderValue::from_static("X-Request-ID"));
        headers.append(
            EXPOSE_HEADERS,
            HeaderValue::from_static("x-request-id, Content-Length"),
        );
        merge_expose_headers(&mut headers);

        let merged = headers.get(EXPOSE_HEADERS).unwrap().to_str().unwrap();
        let tokens: Vec<&str> = merged.split(',').map(|t| t.trim()).collect();
        assert_eq!(tokens.len(), 2);
        for (i, a) in tokens.iter().enumerate() {
            for b in &tokens[i + 1..] {
                assert!(!a.eq_ignore_ascii_case(b), "duplicate token {}", a);
            }
        }
    }

    #[test]
    fn expose_headers_always_name_request_id() {
        let mut headers = HeaderMap::new();
        merge_expose_headers(&mut headers);
        let merged = headers.get(EXPOSE_HEADERS).unwrap().to_str().unwrap();
        assert!(merged.to_lowercase().contains("x-request-id"));
    }
}
