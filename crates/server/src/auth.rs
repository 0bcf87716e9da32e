//! Caller identification middleware.
//!
//! Callers identify themselves with a `user_id` header carrying an integer.
//! Real authentication sits in front of this service; here the header is
//! only parsed and attached to the request.

use crate::error::ApiError;
use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use uuid::Uuid;

/// Header naming the calling user.
pub const USER_ID_HEADER: &str = "user_id";

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and potential log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value, keeping printable
    /// ASCII only.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The caller named by the `user_id` header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: i64,
}

impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .copied()
            .ok_or_else(|| ApiError::Forbidden(format!("{USER_ID_HEADER} header missing")))
    }
}

/// Parse the `user_id` header.
///
/// A missing header is `Forbidden`; a value that is not an integer is a bad
/// request.
fn extract_user(req: &Request) -> Result<AuthenticatedUser, ApiError> {
    let value = req
        .headers()
        .get(USER_ID_HEADER)
        .ok_or_else(|| ApiError::Forbidden(format!("{USER_ID_HEADER} header missing")))?;
    let user_id = value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .ok_or_else(|| ApiError::BadRequest(format!("invalid {USER_ID_HEADER} header")))?;
    Ok(AuthenticatedUser { user_id })
}

/// Extract trace ID from X-Trace-Id header or generate a new one.
fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// Identify the caller and run the request inside a span carrying the
/// trace ID and user ID.
pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, ApiError> {
    let trace_id = extract_or_generate_trace_id(&req);
    let user = extract_user(&req)?;

    let span = tracing::info_span!("request", trace_id = %trace_id, user_id = user.user_id);
    req.extensions_mut().insert(trace_id);
    req.extensions_mut().insert(user);

    Ok(next.run(req).instrument(span).await)
}
