//! Request sanitizer: recursive deny-set key scan over JSON bodies and the
//! query string.
//!
//! The deny set targets key-injection payloads (`__proto__`, `constructor`,
//! `prototype`, accessor dunders, any `__`-prefixed key). Rust's typed
//! parsing already refuses arbitrary key injection into models; this layer
//! exists so hostile payloads are rejected (or stripped) before any
//! handler, and logged consistently.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use service_core::error::AppError;

use crate::config::SanitizeMode;
use crate::AppState;

/// JSON/urlencoded body cap (the webhook route uses its own raw cap).
pub const JSON_BODY_LIMIT: usize = 10 * 1024;

const DENY_KEYS: &[&str] = &[
    "__proto__",
    "constructor",
    "prototype",
    "__defineGetter__",
    "__defineSetter__",
    "__lookupGetter__",
    "__lookupSetter__",
];

fn is_denied_key(key: &str) -> bool {
    DENY_KEYS.iter().any(|d| d.eq_ignore_ascii_case(key)) || key.starts_with("__")
}

/// Whether a JSON value contains any denied key, recursively.
pub fn contains_denied_key(value: &Value) -> bool {
    match value {
        Value::Object(map) => map
            .iter()
            .any(|(k, v)| is_denied_key(k) || contains_denied_key(v)),
        Value::Array(items) => items.iter().any(contains_denied_key),
        _ => false,
    }
}

/// Strip denied keys recursively. Returns whether anything was removed.
pub fn strip_denied_keys(value: &mut Value) -> bool {
    match value {
        Value::Object(map) => {
            let before = map.len();
            map.retain(|k, _| !is_denied_key(k));
            let mut changed = map.len() != before;
            for v in map.values_mut() {
                changed |= strip_denied_keys(v);
            }
            changed
        }
        Value::Array(items) => {
            let mut changed = false;
            for v in items.iter_mut() {
                changed |= strip_denied_keys(v);
            }
            changed
        }
        _ => false,
    }
}

/// Whether a raw query string carries a denied parameter name.
pub fn query_has_denied_key(query: &str) -> bool {
    query.split('&').any(|pair| {
        let key = pair.split('=').next().unwrap_or("");
        is_denied_key(&percent_decode(key))
    })
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = &input[i + 1..i + 3];
            if let Ok(byte) = u8::from_str_radix(hex, 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Middleware scanning query and JSON body for denied keys. `block` mode
/// rejects with 400, `sanitize` mode strips and continues.
pub async fn sanitize_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let mode = state.config.security.sanitize_mode;
    let path = req.uri().path().to_string();

    // Webhooks carry raw provider payloads; the signature check owns them.
    if path == "/api/v1/payments/webhook" {
        return Ok(next.run(req).await);
    }

    if let Some(query) = req.uri().query() {
        if query_has_denied_key(query) {
            tracing::warn!(path = %path, "Denied key in query string");
            return Err(AppError::Validation(
                "Request contains a forbidden parameter name".to_string(),
            ));
        }
    }

    let is_json = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false);
    if !is_json {
        return Ok(next.run(req).await);
    }

    let (parts, body) = req.into_parts();
    let bytes = to_bytes(body, JSON_BODY_LIMIT)
        .await
        .map_err(|_| AppError::Validation("Request body too large".to_string()))?;

    if bytes.is_empty() {
        return Ok(next.run(Request::from_parts(parts, Body::empty())).await);
    }

    let Ok(mut value) = serde_json::from_slice::<Value>(&bytes) else {
        // Not parseable here; let the handler's extractor produce the error.
        return Ok(next
            .run(Request::from_parts(parts, Body::from(bytes)))
            .await);
    };

    if contains_denied_key(&value) {
        match mode {
            SanitizeMode::Block => {
                tracing::warn!(path = %path, "Denied key in request body");
                return Err(AppError::Validation(
                    "Request contains a forbidden field name".to_string(),
                ));
            }
            SanitizeMode::Sanitize => {
                strip_denied_keys(&mut value);
                tracing::warn!(path = %path, "Stripped denied keys from request body");
                let cleaned =
                    serde_json::to_vec(&value).map_err(|e| AppError::Internal(e.into()))?;
                return Ok(next
                    .run(Request::from_parts(parts, Body::from(cleaned)))
                    .await);
            }
        }
    }

    Ok(next
        .run(Request::from_parts(parts, Body::from(bytes)))
        .await)
}
