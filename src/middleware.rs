//! Router middleware for consumers mounting services behind axum.
//!
//! * [`request_context`] propagates `X-Request-Id` and renders error
//!   envelopes for the configured [`Environment`].
//! * [`trust_user_header`] turns `X-User-ID` into an [`Identity`]. Mount it
//!   only behind a gateway that sets the header itself.

use crate::config::Environment;
use crate::error::AppError;
use crate::identity::{Identity, USER_ID_HEADER};
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Propagated from `X-Request-Id` or generated per request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    fn generate() -> Self {
        RequestId(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<RequestId>().cloned().unwrap_or_else(RequestId::generate))
    }
}

/// Attached to every error response so [`request_context`] can render it
/// again with the request's id and environment.
#[derive(Clone, Debug)]
pub(crate) struct ErrorReport(pub(crate) Arc<AppError>);

/// Use with `axum::middleware::from_fn_with_state(environment, request_context)`.
pub async fn request_context(State(environment): State<Environment>, mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| RequestId(s.to_string()))
        .unwrap_or_else(RequestId::generate);
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;
    if let Some(ErrorReport(err)) = response.extensions().get::<ErrorReport>().cloned() {
        let status = response.status();
        response = (status, Json(err.to_response(environment, request_id.0.clone()))).into_response();
    }
    if let Ok(value) = HeaderValue::from_str(&request_id.0) {
        response.headers_mut().insert(X_REQUEST_ID.clone(), value);
    }
    response
}

/// Use with `axum::middleware::from_fn(trust_user_header)`. An identity
/// already inserted by upstream auth wins over the header.
pub async fn trust_user_header(mut req: Request, next: Next) -> Response {
    if req.extensions().get::<Identity>().is_none() {
        let from_header = req
            .headers()
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Identity::new);
        if let Some(identity) = from_header {
            req.extensions_mut().insert(identity);
        }
    }
    next.run(req).await
}
