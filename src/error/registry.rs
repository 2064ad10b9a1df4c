//! Static registry of error definitions keyed by `CATEGORY.CODE`.
//!
//! Keys are a versioned contract with clients: renaming one is a breaking
//! change for anything matching on error codes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level error category. Serialized as the upper-case key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Validation,
    Resource,
    Operation,
    Permission,
    Server,
    Auth,
    Db,
    Cookie,
}

impl ErrorCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Validation => "VALIDATION",
            ErrorCategory::Resource => "RESOURCE",
            ErrorCategory::Operation => "OPERATION",
            ErrorCategory::Permission => "PERMISSION",
            ErrorCategory::Server => "SERVER",
            ErrorCategory::Auth => "AUTH",
            ErrorCategory::Db => "DB",
            ErrorCategory::Cookie => "COOKIE",
        }
    }

    /// Status used when a definition does not carry its own.
    pub const fn default_http_status(self) -> u16 {
        match self {
            ErrorCategory::Validation | ErrorCategory::Cookie => 400,
            ErrorCategory::Resource => 404,
            ErrorCategory::Permission => 403,
            ErrorCategory::Auth => 401,
            ErrorCategory::Operation | ErrorCategory::Server | ErrorCategory::Db => 500,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        ALL_CATEGORIES.iter().copied().find(|c| c.as_str() == s)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const ALL_CATEGORIES: [ErrorCategory; 8] = [
    ErrorCategory::Validation,
    ErrorCategory::Resource,
    ErrorCategory::Operation,
    ErrorCategory::Permission,
    ErrorCategory::Server,
    ErrorCategory::Auth,
    ErrorCategory::Db,
    ErrorCategory::Cookie,
];

/// Layer of the pipeline an error originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorLayer {
    Database,
    Repository,
    Service,
    Endpoint,
    Middleware,
    Client,
}

impl ErrorLayer {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorLayer::Database => "database",
            ErrorLayer::Repository => "repository",
            ErrorLayer::Service => "service",
            ErrorLayer::Endpoint => "endpoint",
            ErrorLayer::Middleware => "middleware",
            ErrorLayer::Client => "client",
        }
    }
}

impl fmt::Display for ErrorLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-safe projection of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicError {
    pub code: &'static str,
    pub message: &'static str,
    pub i18n_key: &'static str,
    pub http_status: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorDefinition {
    pub category: ErrorCategory,
    pub code: &'static str,
    pub layers: &'static [ErrorLayer],
    pub is_expected: bool,
    pub http_status: Option<u16>,
    pub public: PublicError,
}

impl ErrorDefinition {
    pub fn http_status(&self) -> u16 {
        self.http_status
            .unwrap_or_else(|| self.category.default_http_status())
    }

    pub fn key(&self) -> String {
        format!("{}.{}", self.category, self.code)
    }
}

/// Code constants, grouped by category.
pub mod codes {
    pub mod validation {
        pub const INVALID_FORMAT: &str = "INVALID_FORMAT";
        pub const MISSING_FIELD: &str = "MISSING_FIELD";
        pub const INVALID_VALUE: &str = "INVALID_VALUE";
        pub const MISSING_IDENTIFIERS: &str = "MISSING_IDENTIFIERS";
    }
    pub mod resource {
        pub const NOT_FOUND: &str = "NOT_FOUND";
        pub const ALREADY_EXISTS: &str = "ALREADY_EXISTS";
        pub const CONFLICT: &str = "CONFLICT";
    }
    pub mod operation {
        pub const CREATE_FAILED: &str = "CREATE_FAILED";
        pub const UPDATE_FAILED: &str = "UPDATE_FAILED";
        pub const DELETE_FAILED: &str = "DELETE_FAILED";
        pub const GET_FAILED: &str = "GET_FAILED";
        pub const SOFT_DELETE_UNSUPPORTED: &str = "SOFT_DELETE_UNSUPPORTED";
    }
    pub mod permission {
        pub const ACCESS_DENIED: &str = "ACCESS_DENIED";
        pub const NOT_OWNER: &str = "NOT_OWNER";
    }
    pub mod server {
        pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
        pub const CONFIG_ERROR: &str = "CONFIG_ERROR";
        pub const UNKNOWN_OPERATION: &str = "UNKNOWN_OPERATION";
        pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
    }
    pub mod auth {
        pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
        pub const SESSION_EXPIRED: &str = "SESSION_EXPIRED";
        pub const TOKEN_INVALID: &str = "TOKEN_INVALID";
        pub const CONFIG_ERROR: &str = "CONFIG_ERROR";
    }
    pub mod db {
        pub const UNIQUE_VIOLATION: &str = "UNIQUE_VIOLATION";
        pub const FOREIGN_KEY_VIOLATION: &str = "FOREIGN_KEY_VIOLATION";
        pub const NOT_NULL_VIOLATION: &str = "NOT_NULL_VIOLATION";
        pub const SYNTAX_ERROR: &str = "SYNTAX_ERROR";
        pub const CONNECTION_REFUSED: &str = "CONNECTION_REFUSED";
        pub const QUERY_FAILED: &str = "QUERY_FAILED";
        pub const UNKNOWN_COLUMN: &str = "UNKNOWN_COLUMN";
    }
    pub mod cookie {
        pub const INVALID: &str = "INVALID";
        pub const MISSING: &str = "MISSING";
        pub const EXPIRED: &str = "EXPIRED";
    }
}

const GENERIC_MESSAGE: &str = "An unexpected error occurred";

const ENDPOINT: &[ErrorLayer] = &[ErrorLayer::Endpoint, ErrorLayer::Middleware];
const VALIDATING: &[ErrorLayer] = &[
    ErrorLayer::Endpoint,
    ErrorLayer::Repository,
    ErrorLayer::Service,
    ErrorLayer::Client,
];
const DATA: &[ErrorLayer] = &[ErrorLayer::Database];
const SERVICE: &[ErrorLayer] = &[ErrorLayer::Service, ErrorLayer::Repository];
const ANY: &[ErrorLayer] = &[
    ErrorLayer::Database,
    ErrorLayer::Repository,
    ErrorLayer::Service,
    ErrorLayer::Endpoint,
    ErrorLayer::Middleware,
];

const fn def(
    category: ErrorCategory,
    code: &'static str,
    layers: &'static [ErrorLayer],
    is_expected: bool,
    http_status: u16,
    message: &'static str,
    i18n_key: &'static str,
) -> ErrorDefinition {
    ErrorDefinition {
        category,
        code,
        layers,
        is_expected,
        http_status: Some(http_status),
        public: PublicError {
            code,
            message,
            i18n_key,
            http_status,
        },
    }
}

use self::ErrorCategory::*;

static REGISTRY: &[ErrorDefinition] = &[
    def(Validation, codes::validation::INVALID_FORMAT, VALIDATING, true, 400, "The request data is invalid", "errors.validation.invalid_format"),
    def(Validation, codes::validation::MISSING_FIELD, VALIDATING, true, 400, "A required field is missing", "errors.validation.missing_field"),
    def(Validation, codes::validation::INVALID_VALUE, VALIDATING, true, 400, "A field has an invalid value", "errors.validation.invalid_value"),
    def(Validation, codes::validation::MISSING_IDENTIFIERS, DATA, true, 400, "The request does not identify a record", "errors.validation.missing_identifiers"),
    def(Resource, codes::resource::NOT_FOUND, SERVICE, true, 404, "The requested resource was not found", "errors.resource.not_found"),
    def(Resource, codes::resource::ALREADY_EXISTS, SERVICE, true, 409, "The resource already exists", "errors.resource.already_exists"),
    def(Resource, codes::resource::CONFLICT, SERVICE, true, 409, "The resource was modified concurrently", "errors.resource.conflict"),
    def(Operation, codes::operation::CREATE_FAILED, SERVICE, false, 500, GENERIC_MESSAGE, "errors.operation.create_failed"),
    def(Operation, codes::operation::UPDATE_FAILED, SERVICE, false, 500, GENERIC_MESSAGE, "errors.operation.update_failed"),
    def(Operation, codes::operation::DELETE_FAILED, SERVICE, false, 500, GENERIC_MESSAGE, "errors.operation.delete_failed"),
    def(Operation, codes::operation::GET_FAILED, SERVICE, false, 500, GENERIC_MESSAGE, "errors.operation.get_failed"),
    def(Operation, codes::operation::SOFT_DELETE_UNSUPPORTED, DATA, false, 500, GENERIC_MESSAGE, "errors.operation.soft_delete_unsupported"),
    def(Permission, codes::permission::ACCESS_DENIED, ENDPOINT, true, 403, "You do not have permission to perform this action", "errors.permission.access_denied"),
    def(Permission, codes::permission::NOT_OWNER, SERVICE, true, 403, "You do not own this resource", "errors.permission.not_owner"),
    def(Server, codes::server::INTERNAL_ERROR, ANY, false, 500, GENERIC_MESSAGE, "errors.server.internal_error"),
    def(Server, codes::server::CONFIG_ERROR, ANY, false, 500, GENERIC_MESSAGE, "errors.server.config_error"),
    def(Server, codes::server::UNKNOWN_OPERATION, SERVICE, false, 500, GENERIC_MESSAGE, "errors.server.unknown_operation"),
    def(Server, codes::server::SERVICE_UNAVAILABLE, ANY, false, 503, "The service is temporarily unavailable", "errors.server.service_unavailable"),
    def(Auth, codes::auth::UNAUTHORIZED, ENDPOINT, true, 401, "Authentication is required", "errors.auth.unauthorized"),
    def(Auth, codes::auth::SESSION_EXPIRED, ENDPOINT, true, 401, "Your session has expired", "errors.auth.session_expired"),
    def(Auth, codes::auth::TOKEN_INVALID, ENDPOINT, true, 401, "The authentication token is invalid", "errors.auth.token_invalid"),
    def(Auth, codes::auth::CONFIG_ERROR, ENDPOINT, false, 500, GENERIC_MESSAGE, "errors.auth.config_error"),
    def(Db, codes::db::UNIQUE_VIOLATION, DATA, true, 409, "A record with these values already exists", "errors.db.unique_violation"),
    def(Db, codes::db::FOREIGN_KEY_VIOLATION, DATA, true, 409, "A referenced record does not exist", "errors.db.foreign_key_violation"),
    def(Db, codes::db::NOT_NULL_VIOLATION, DATA, false, 500, GENERIC_MESSAGE, "errors.db.not_null_violation"),
    def(Db, codes::db::SYNTAX_ERROR, DATA, false, 500, GENERIC_MESSAGE, "errors.db.syntax_error"),
    def(Db, codes::db::CONNECTION_REFUSED, DATA, false, 503, "The service is temporarily unavailable", "errors.db.connection_refused"),
    def(Db, codes::db::QUERY_FAILED, DATA, false, 500, GENERIC_MESSAGE, "errors.db.query_failed"),
    def(Db, codes::db::UNKNOWN_COLUMN, DATA, false, 500, GENERIC_MESSAGE, "errors.db.unknown_column"),
    def(Cookie, codes::cookie::INVALID, ENDPOINT, true, 400, "The cookie is invalid", "errors.cookie.invalid"),
    def(Cookie, codes::cookie::MISSING, ENDPOINT, true, 401, "A required cookie is missing", "errors.cookie.missing"),
    def(Cookie, codes::cookie::EXPIRED, ENDPOINT, true, 401, "The cookie has expired", "errors.cookie.expired"),
];

/// All registered definitions, in declaration order.
pub fn definitions() -> &'static [ErrorDefinition] {
    REGISTRY
}

pub fn lookup(category: ErrorCategory, code: &str) -> Option<&'static ErrorDefinition> {
    REGISTRY
        .iter()
        .find(|d| d.category == category && d.code == code)
}

/// Look up by full key, e.g. `DB.UNIQUE_VIOLATION`.
pub fn lookup_key(key: &str) -> Option<&'static ErrorDefinition> {
    let (category, code) = key.split_once('.')?;
    lookup(ErrorCategory::parse(category)?, code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keys_are_unique() {
        let mut seen = HashSet::new();
        for d in definitions() {
            assert!(seen.insert(d.key()), "duplicate key {}", d.key());
        }
    }

    #[test]
    fn lookup_by_key() {
        let d = lookup_key("DB.UNIQUE_VIOLATION").unwrap();
        assert_eq!(d.http_status(), 409);
        assert!(d.is_expected);
        assert_eq!(d.public.i18n_key, "errors.db.unique_violation");
        assert!(lookup_key("DB.NOPE").is_none());
        assert!(lookup_key("NOPE.NOT_FOUND").is_none());
        assert!(lookup_key("missing-dot").is_none());
    }

    #[test]
    fn unexpected_errors_use_generic_public_message() {
        for d in definitions().iter().filter(|d| !d.is_expected) {
            assert!(d.public.message == GENERIC_MESSAGE || d.http_status() == 503, "{}", d.key());
        }
    }

    #[test]
    fn category_round_trips_through_its_name() {
        for c in ALL_CATEGORIES {
            assert_eq!(ErrorCategory::parse(c.as_str()), Some(c));
        }
    }
}
