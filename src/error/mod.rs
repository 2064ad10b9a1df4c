//! Typed errors, error chains and the HTTP mapping.
//!
//! Every failure that leaves the service layer is an [`AppError`]: a
//! registry-backed `CATEGORY.CODE` error with a client-safe projection and an
//! optional cause chain. [`ConfigError`] covers startup-time failures
//! (descriptors, builders, settings).

pub mod db;
pub mod registry;
mod response;

pub use registry::{codes, ErrorCategory, ErrorDefinition, ErrorLayer, PublicError};
pub use response::{ErrorBody, ErrorResponse, PUBLIC_DETAIL_KEYS};

use crate::driver::DriverError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::panic::Location;
use thiserror::Error;
use uuid::Uuid;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("invalid primary key: table {table} column {column}")]
    InvalidPrimaryKey { table: String, column: String },
    #[error("duplicate column: table {table} column {column}")]
    DuplicateColumn { table: String, column: String },
    #[error("unknown field '{field}' in {slot} for table {table}")]
    UnknownField {
        table: String,
        slot: &'static str,
        field: String,
    },
    #[error("unsupported column type '{0}'")]
    UnsupportedType(String),
    #[error("operation '{operation}' on {resource}: {reason}")]
    Operation {
        resource: String,
        operation: String,
        reason: String,
    },
    #[error("environment variable {var}: {message}")]
    Env { var: &'static str, message: String },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// The next link of an error chain.
#[derive(Debug)]
pub enum ErrorCause {
    App(Box<AppError>),
    Foreign(BoxError),
}

impl ErrorCause {
    pub fn foreign(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        ErrorCause::Foreign(Box::new(err))
    }
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCause::App(e) => fmt::Display::fmt(e, f),
            ErrorCause::Foreign(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl std::error::Error for ErrorCause {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ErrorCause::App(e) => e.source(),
            ErrorCause::Foreign(e) => e.source(),
        }
    }
}

impl From<AppError> for ErrorCause {
    fn from(err: AppError) -> Self {
        ErrorCause::App(Box::new(err))
    }
}

impl From<BoxError> for ErrorCause {
    fn from(err: BoxError) -> Self {
        ErrorCause::Foreign(err)
    }
}

impl From<anyhow::Error> for ErrorCause {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<AppError>() {
            Ok(app) => ErrorCause::App(Box::new(app)),
            Err(other) => ErrorCause::Foreign(other.into()),
        }
    }
}

impl From<DriverError> for ErrorCause {
    fn from(err: DriverError) -> Self {
        ErrorCause::foreign(err)
    }
}

impl From<sqlx::Error> for ErrorCause {
    fn from(err: sqlx::Error) -> Self {
        ErrorCause::foreign(err)
    }
}

impl From<serde_json::Error> for ErrorCause {
    fn from(err: serde_json::Error) -> Self {
        ErrorCause::foreign(err)
    }
}

impl From<ConfigError> for ErrorCause {
    fn from(err: ConfigError) -> Self {
        ErrorCause::foreign(err)
    }
}

/// Typed, registry-backed error.
#[derive(Error, Debug)]
#[error("{key}: {message}")]
pub struct AppError {
    category: ErrorCategory,
    code: &'static str,
    key: String,
    message: String,
    http_status: u16,
    is_expected: bool,
    public: PublicError,
    details: Map<String, Value>,
    #[source]
    cause: Option<ErrorCause>,
    layer: Option<ErrorLayer>,
    location: &'static Location<'static>,
    id: Uuid,
    timestamp: DateTime<Utc>,
}

/// One link of a cause chain, outermost first.
#[derive(Debug, Clone, Serialize)]
pub struct ChainLink {
    pub depth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer: Option<ErrorLayer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl AppError {
    /// Start an error from the registry. Unregistered codes fall back to an
    /// unexpected error with the category's default status.
    #[track_caller]
    pub fn new(category: ErrorCategory, code: &'static str) -> ErrorBuilder {
        let location = Location::caller();
        let (is_expected, http_status, public) = match registry::lookup(category, code) {
            Some(def) => (def.is_expected, def.http_status(), def.public),
            None => {
                tracing::warn!(category = %category, code, "unregistered error code");
                let status = category.default_http_status();
                (
                    false,
                    status,
                    PublicError {
                        code,
                        message: "An unexpected error occurred",
                        i18n_key: "errors.unknown",
                        http_status: status,
                    },
                )
            }
        };
        ErrorBuilder {
            error: AppError {
                category,
                code,
                key: format!("{}.{}", category, code),
                message: public.message.to_string(),
                http_status,
                is_expected,
                public,
                details: Map::new(),
                cause: None,
                layer: None,
                location,
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
            },
        }
    }

    #[track_caller]
    pub fn validation(code: &'static str) -> ErrorBuilder {
        Self::new(ErrorCategory::Validation, code)
    }

    #[track_caller]
    pub fn resource(code: &'static str) -> ErrorBuilder {
        Self::new(ErrorCategory::Resource, code)
    }

    #[track_caller]
    pub fn operation(code: &'static str) -> ErrorBuilder {
        Self::new(ErrorCategory::Operation, code)
    }

    #[track_caller]
    pub fn permission(code: &'static str) -> ErrorBuilder {
        Self::new(ErrorCategory::Permission, code)
    }

    #[track_caller]
    pub fn server(code: &'static str) -> ErrorBuilder {
        Self::new(ErrorCategory::Server, code)
    }

    #[track_caller]
    pub fn auth(code: &'static str) -> ErrorBuilder {
        Self::new(ErrorCategory::Auth, code)
    }

    #[track_caller]
    pub fn db(code: &'static str) -> ErrorBuilder {
        Self::new(ErrorCategory::Db, code)
    }

    #[track_caller]
    pub fn cookie(code: &'static str) -> ErrorBuilder {
        Self::new(ErrorCategory::Cookie, code)
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    /// `CATEGORY.CODE`.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn http_status(&self) -> u16 {
        self.http_status
    }

    pub fn is_expected(&self) -> bool {
        self.is_expected
    }

    pub fn public(&self) -> &PublicError {
        &self.public
    }

    pub fn details(&self) -> &Map<String, Value> {
        &self.details
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }

    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_ref()
    }

    pub fn layer(&self) -> Option<ErrorLayer> {
        self.layer
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is(&self, category: ErrorCategory, code: &str) -> bool {
        self.category == category && self.code == code
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Typed errors in the chain, outermost first. Typed errors wrapped by a
    /// foreign error are found through `source()`.
    fn typed_links(&self) -> Vec<&AppError> {
        let mut out = vec![self];
        let mut current = self;
        loop {
            let next = match &current.cause {
                Some(ErrorCause::App(next)) => Some(next.as_ref()),
                Some(ErrorCause::Foreign(err)) => {
                    let first: &(dyn std::error::Error + 'static) = &**err;
                    let mut source = Some(first);
                    let mut found = None;
                    while let Some(e) = source {
                        if let Some(app) = e.downcast_ref::<AppError>() {
                            found = Some(app);
                            break;
                        }
                        source = e.source();
                    }
                    found
                }
                None => None,
            };
            match next {
                Some(app) => {
                    out.push(app);
                    current = app;
                }
                None => break,
            }
        }
        out
    }

    /// Deepest typed error in the chain (`self` when there is no typed cause).
    pub fn root_cause(&self) -> &AppError {
        let links = self.typed_links();
        links.last().copied().unwrap_or(self)
    }

    /// Number of links in the chain, foreign causes included.
    pub fn chain_depth(&self) -> usize {
        self.chain().len()
    }

    pub fn has_in_chain(&self, predicate: impl Fn(&AppError) -> bool) -> bool {
        self.typed_links().into_iter().any(predicate)
    }

    pub fn find_in_chain(&self, category: ErrorCategory, code: &str) -> Option<&AppError> {
        self.typed_links()
            .into_iter()
            .find(|e| e.is(category, code))
    }

    /// Structured trace of the chain, outermost first.
    pub fn chain(&self) -> Vec<ChainLink> {
        let mut links = Vec::new();
        self.push_links(&mut links);
        links
    }

    fn push_links(&self, links: &mut Vec<ChainLink>) {
        links.push(ChainLink {
            depth: links.len(),
            category: Some(self.category),
            code: Some(self.code),
            message: self.message.clone(),
            layer: self.layer,
            location: Some(format!("{}:{}", self.location.file(), self.location.line())),
        });
        match &self.cause {
            Some(ErrorCause::App(next)) => next.push_links(links),
            Some(ErrorCause::Foreign(err)) => {
                let first: &(dyn std::error::Error + 'static) = &**err;
                let mut source = Some(first);
                while let Some(e) = source {
                    if let Some(app) = e.downcast_ref::<AppError>() {
                        app.push_links(links);
                        return;
                    }
                    links.push(ChainLink {
                        depth: links.len(),
                        category: None,
                        code: None,
                        message: e.to_string(),
                        layer: None,
                        location: None,
                    });
                    source = e.source();
                }
            }
            None => {}
        }
    }

    /// Log once at the outermost boundary: expected errors at info, the rest
    /// at error with the full chain.
    pub fn log(&self) {
        if self.is_expected {
            tracing::info!(
                error_id = %self.id,
                key = %self.key,
                status = self.http_status,
                "{}",
                self.message
            );
        } else {
            tracing::error!(
                error_id = %self.id,
                key = %self.key,
                status = self.http_status,
                layer = ?self.layer,
                location = %self.location,
                chain = ?self.chain(),
                "{}",
                self.message
            );
        }
    }
}

impl From<ConfigError> for AppError {
    #[track_caller]
    fn from(err: ConfigError) -> Self {
        AppError::server(codes::server::CONFIG_ERROR)
            .message(err.to_string())
            .cause(err)
            .get()
    }
}

/// Fluent construction of an [`AppError`], terminated by [`get`](Self::get)
/// or [`throw`](Self::throw).
#[must_use]
#[derive(Debug)]
pub struct ErrorBuilder {
    error: AppError,
}

impl ErrorBuilder {
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.error.message = message.into();
        self
    }

    /// Merge a JSON object into the details; any other value lands under `value`.
    pub fn details(mut self, details: Value) -> Self {
        match details {
            Value::Object(map) => self.error.details.extend(map),
            Value::Null => {}
            other => {
                self.error.details.insert("value".into(), other);
            }
        }
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.error.details.insert(key.into(), value.into());
        self
    }

    pub fn cause(mut self, cause: impl Into<ErrorCause>) -> Self {
        self.error.cause = Some(cause.into());
        self
    }

    pub fn layer(mut self, layer: ErrorLayer) -> Self {
        self.error.layer = Some(layer);
        self
    }

    pub fn get(self) -> AppError {
        self.error
    }

    pub fn throw<T>(self) -> Result<T, AppError> {
        Err(self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn factory_populates_from_registry() {
        let err = AppError::resource(codes::resource::NOT_FOUND)
            .message("post 1 not found")
            .detail("resource", "posts")
            .get();
        assert_eq!(err.key(), "RESOURCE.NOT_FOUND");
        assert_eq!(err.http_status(), 404);
        assert!(err.is_expected());
        assert_eq!(err.public().code, "NOT_FOUND");
        assert_eq!(err.detail("resource"), Some(&json!("posts")));
        assert!(err.location().file().ends_with("mod.rs"));
    }

    #[test]
    fn unregistered_code_is_unexpected() {
        let err = AppError::db("SOMETHING_NEW").get();
        assert!(!err.is_expected());
        assert_eq!(err.http_status(), 500);
        assert_eq!(err.key(), "DB.SOMETHING_NEW");
    }

    #[test]
    fn throw_returns_err() {
        let r: Result<(), AppError> = AppError::permission(codes::permission::ACCESS_DENIED).throw();
        assert_eq!(r.unwrap_err().http_status(), 403);
    }

    #[test]
    fn details_merge_objects() {
        let err = AppError::validation(codes::validation::INVALID_VALUE)
            .details(json!({"field": "title"}))
            .details(json!({"max": 10}))
            .details(json!(5))
            .get();
        assert_eq!(err.details().len(), 3);
        assert_eq!(err.detail("value"), Some(&json!(5)));
    }

    #[test]
    fn chain_walks_typed_and_foreign_links() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let db = AppError::db(codes::db::CONNECTION_REFUSED)
            .layer(ErrorLayer::Database)
            .cause(ErrorCause::foreign(io))
            .get();
        let outer = AppError::server(codes::server::INTERNAL_ERROR)
            .layer(ErrorLayer::Service)
            .cause(db)
            .get();

        assert_eq!(outer.chain_depth(), 3);
        assert_eq!(outer.root_cause().code(), "CONNECTION_REFUSED");
        assert!(outer.has_in_chain(|e| e.category() == ErrorCategory::Db));
        assert!(outer.find_in_chain(ErrorCategory::Db, "CONNECTION_REFUSED").is_some());

        let chain = outer.chain();
        assert_eq!(chain[0].code, Some("INTERNAL_ERROR"));
        assert_eq!(chain[1].layer, Some(ErrorLayer::Database));
        assert_eq!(chain[2].category, None);
        assert_eq!(chain[2].message, "refused");
        assert_eq!(chain.iter().map(|l| l.depth).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn typed_error_behind_anyhow_stays_typed() {
        let inner = AppError::db(codes::db::UNIQUE_VIOLATION).get();
        let wrapped: anyhow::Error = inner.into();
        let outer = AppError::server(codes::server::INTERNAL_ERROR).cause(wrapped).get();
        assert!(matches!(outer.cause(), Some(ErrorCause::App(_))));
        assert_eq!(outer.root_cause().code(), "UNIQUE_VIOLATION");
    }

    #[test]
    fn root_cause_of_leaf_is_self() {
        let err = AppError::auth(codes::auth::UNAUTHORIZED).get();
        assert_eq!(err.root_cause().id(), err.id());
        assert_eq!(err.chain_depth(), 1);
    }

    #[test]
    fn config_error_becomes_server_config_error() {
        let err: AppError = ConfigError::Validation("bad".into()).into();
        assert_eq!(err.key(), "SERVER.CONFIG_ERROR");
        assert_eq!(err.chain_depth(), 2);
    }
}
