//! Client-facing error envelope and the axum mapping.

use super::AppError;
use crate::config::Environment;
use crate::middleware::ErrorReport;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Detail keys that may reach clients outside development.
pub const PUBLIC_DETAIL_KEYS: &[&str] = &["issues", "field", "fields", "resource"];

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorBody,
    pub request_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl AppError {
    /// Render the envelope. Outside development only the public projection
    /// and whitelisted context are included; unexpected errors expose just
    /// their error id.
    pub fn to_response(&self, environment: Environment, request_id: impl Into<String>) -> ErrorResponse {
        let details = if environment.is_development() {
            let mut map = Map::new();
            map.insert("key".into(), Value::String(self.key().to_string()));
            map.insert("error_id".into(), Value::String(self.id().to_string()));
            if !self.details().is_empty() {
                map.insert("context".into(), Value::Object(self.details().clone()));
            }
            if let Ok(chain) = serde_json::to_value(self.chain()) {
                map.insert("chain".into(), chain);
            }
            Some(Value::Object(map))
        } else if self.is_expected() {
            let map: Map<String, Value> = self
                .details()
                .iter()
                .filter(|(k, _)| PUBLIC_DETAIL_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if map.is_empty() {
                None
            } else {
                Some(Value::Object(map))
            }
        } else {
            Some(serde_json::json!({ "error_id": self.id().to_string() }))
        };
        let message = if environment.is_development() {
            self.message().to_string()
        } else {
            self.public().message.to_string()
        };
        ErrorResponse {
            success: false,
            error: ErrorBody {
                code: self.public().code.to_string(),
                message,
                details,
            },
            request_id: request_id.into(),
        }
    }
}

/// Renders as production with a fresh request id. Behind
/// [`request_context`](crate::middleware::request_context) the envelope is
/// rendered again with the request's id and the configured environment.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log();
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = self.to_response(Environment::Production, uuid::Uuid::new_v4().to_string());
        let mut response = (status, Json(body)).into_response();
        response.extensions_mut().insert(ErrorReport(Arc::new(self)));
        response
    }
}
