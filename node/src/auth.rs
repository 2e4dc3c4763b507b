//! # Request Authentication
//!
//! Middleware that turns the signed-request headers into a verified
//! [`Caller`]. The principal always comes from the public key whose
//! signature checked out; nothing a client writes in a header can name a
//! principal directly.
//!
//! Requests with none of the three headers pass through unauthenticated,
//! so read-only routes stay open. Handlers that need a caller extract
//! [`Caller`] and answer 401 when the middleware did not attach one.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;

use pfta_protocol::config::{
    MAX_SIGNED_BODY_BYTES, PUBLIC_KEY_HEADER, REQUEST_MAX_SKEW_MS, SIGNATURE_HEADER,
    TIMESTAMP_HEADER,
};
use pfta_protocol::RequestSignature;

use crate::api::{ApiError, AppState, Caller};

// ---------------------------------------------------------------------------
// Replay Tracking
// ---------------------------------------------------------------------------

/// Signatures accepted within the freshness window.
///
/// A signature older than the window can no longer verify, so entries are
/// dropped once their timestamp falls out of it.
#[derive(Debug, Default)]
pub struct ReplayGuard {
    seen: Mutex<HashMap<[u8; 64], i64>>,
}

impl ReplayGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `signature` and returns `true`, or returns `false` if it was
    /// already recorded.
    pub fn check_and_record(&self, signature: [u8; 64], timestamp_ms: i64, now_ms: i64) -> bool {
        let mut seen = self.seen.lock();
        seen.retain(|_, ts| now_ms.saturating_sub(*ts) <= REQUEST_MAX_SKEW_MS);
        if seen.contains_key(&signature) {
            return false;
        }
        seen.insert(signature, timestamp_ms);
        true
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.seen.lock().len()
    }
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

/// Verifies signed requests and attaches the signer as [`Caller`].
pub async fn authenticate(State(state): State<AppState>, request: Request, next: Next) -> Response {
    match verify(&state, request).await {
        Ok(request) => next.run(request).await,
        Err(e) => {
            state
                .metrics
                .rejected_operations_total
                .with_label_values(&["unauthenticated"])
                .inc();
            e.into_response()
        }
    }
}

async fn verify(state: &AppState, request: Request) -> Result<Request, ApiError> {
    let Some(credentials) = credentials(request.headers())? else {
        return Ok(request);
    };
    let method = request.method().as_str().to_owned();
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());

    let (mut parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_SIGNED_BODY_BYTES)
        .await
        .map_err(|_| ApiError::BadRequest(format!("request body is unreadable or exceeds {MAX_SIGNED_BODY_BYTES} bytes")))?;

    let now_ms = Utc::now().timestamp_millis();
    let verified = credentials
        .verify(&method, &path, &bytes, now_ms)
        .map_err(|e| {
            tracing::warn!(%method, %path, error = %e, "request signature rejected");
            ApiError::Unauthenticated(e.to_string())
        })?;
    if !state
        .replay
        .check_and_record(verified.signature, credentials.timestamp_ms, now_ms)
    {
        tracing::warn!(%method, %path, caller = %verified.principal, "replayed request rejected");
        return Err(ApiError::Unauthenticated("request signature was already used".into()));
    }

    parts.extensions.insert(Caller(verified.principal));
    Ok(Request::from_parts(parts, Body::from(bytes)))
}

/// Reads the three signature headers. `None` when all are absent; an
/// error when only some are present or a value is malformed.
fn credentials(headers: &HeaderMap) -> Result<Option<RequestSignature>, ApiError> {
    let fields = [PUBLIC_KEY_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER].map(|name| headers.get(name));
    if fields.iter().all(Option::is_none) {
        return Ok(None);
    }
    let [Some(public_key), Some(signature), Some(timestamp)] = fields else {
        return Err(ApiError::Unauthenticated(format!(
            "{PUBLIC_KEY_HEADER}, {SIGNATURE_HEADER} and {TIMESTAMP_HEADER} must be sent together"
        )));
    };
    let text = |value: &axum::http::HeaderValue, name: &str| {
        value
            .to_str()
            .map(|v| v.trim().to_owned())
            .map_err(|_| ApiError::Unauthenticated(format!("{name} is not valid text")))
    };
    let timestamp_ms = text(timestamp, TIMESTAMP_HEADER)?
        .parse::<i64>()
        .map_err(|_| ApiError::Unauthenticated(format!("{TIMESTAMP_HEADER} must be Unix milliseconds")))?;
    Ok(Some(RequestSignature {
        public_key: text(public_key, PUBLIC_KEY_HEADER)?,
        signature: text(signature, SIGNATURE_HEADER)?,
        timestamp_ms,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_760_000_000_000;

    #[test]
    fn replayed_signature_is_refused() {
        let guard = ReplayGuard::new();
        assert!(guard.check_and_record([7; 64], NOW, NOW));
        assert!(!guard.check_and_record([7; 64], NOW, NOW + 10));
        assert!(guard.check_and_record([8; 64], NOW, NOW + 10));
    }

    #[test]
    fn expired_entries_are_dropped() {
        let guard = ReplayGuard::new();
        guard.check_and_record([1; 64], NOW, NOW);
        guard.check_and_record([2; 64], NOW + REQUEST_MAX_SKEW_MS, NOW + REQUEST_MAX_SKEW_MS);
        assert_eq!(guard.len(), 2);

        guard.check_and_record([3; 64], NOW + REQUEST_MAX_SKEW_MS + 1, NOW + REQUEST_MAX_SKEW_MS + 1);
        assert_eq!(guard.len(), 2);
    }

    #[test]
    fn absent_headers_mean_unsigned() {
        assert!(credentials(&HeaderMap::new()).unwrap().is_none());
    }

    #[test]
    fn partial_headers_are_refused() {
        let mut headers = HeaderMap::new();
        headers.insert(PUBLIC_KEY_HEADER, "ab".parse().unwrap());
        assert!(matches!(credentials(&headers), Err(ApiError::Unauthenticated(_))));
    }

    #[test]
    fn complete_headers_are_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert(PUBLIC_KEY_HEADER, "aa".parse().unwrap());
        headers.insert(SIGNATURE_HEADER, "bb".parse().unwrap());
        headers.insert(TIMESTAMP_HEADER, " 42 ".parse().unwrap());
        let creds = credentials(&headers).unwrap().unwrap();
        assert_eq!(creds.timestamp_ms, 42);
        assert_eq!(creds.public_key, "aa");

        headers.insert(TIMESTAMP_HEADER, "yesterday".parse().unwrap());
        assert!(credentials(&headers).is_err());
    }
}
