//! Translation of driver errors into `DB.*` errors.
//!
//! Called only by the table operation engine and by the repository's
//! translation middleware; nothing else interprets vendor codes.

use super::{codes, AppError, ErrorLayer};
use crate::driver::DriverError;

/// PostgreSQL SQLSTATE values (plus the OS-level refusal code) the
/// translation table knows about.
pub mod sqlstate {
    pub const UNIQUE_VIOLATION: &str = "23505";
    pub const FOREIGN_KEY_VIOLATION: &str = "23503";
    pub const NOT_NULL_VIOLATION: &str = "23502";
    pub const SYNTAX_ERROR: &str = "42601";
    pub const UNDEFINED_COLUMN: &str = "42703";
    pub const INVALID_CONFLICT_TARGET: &str = "42P10";
    pub const UNABLE_TO_CONNECT: &str = "08001";
    pub const CONNECTION_FAILURE: &str = "08006";
    pub const CONNECTION_REFUSED: &str = "ECONNREFUSED";
    pub const FEATURE_NOT_SUPPORTED: &str = "0A000";
}

/// Registry code and internal description for a vendor code.
pub fn classify(vendor_code: Option<&str>) -> (&'static str, &'static str) {
    match vendor_code {
        Some(sqlstate::UNIQUE_VIOLATION) => (
            codes::db::UNIQUE_VIOLATION,
            "duplicate value violates a unique constraint",
        ),
        Some(sqlstate::FOREIGN_KEY_VIOLATION) => (
            codes::db::FOREIGN_KEY_VIOLATION,
            "value violates a foreign key constraint",
        ),
        Some(sqlstate::NOT_NULL_VIOLATION) => (
            codes::db::NOT_NULL_VIOLATION,
            "null value violates a not-null constraint",
        ),
        Some(sqlstate::SYNTAX_ERROR) => (codes::db::SYNTAX_ERROR, "syntax error in statement"),
        Some(
            sqlstate::CONNECTION_REFUSED
            | sqlstate::UNABLE_TO_CONNECT
            | sqlstate::CONNECTION_FAILURE,
        ) => (codes::db::CONNECTION_REFUSED, "database connection refused"),
        _ => (codes::db::QUERY_FAILED, "query failed"),
    }
}

/// Re-raise a driver error as a categorized `DB.*` error with table and
/// operation context. The driver error stays attached as the cause.
#[track_caller]
pub fn translate(error: DriverError, table: &str, operation: &str) -> AppError {
    let (code, description) = classify(error.code());
    let mut builder = AppError::db(code)
        .message(format!("{} on {} failed: {}", operation, table, description))
        .layer(ErrorLayer::Database)
        .detail("table", table)
        .detail("operation", operation);
    if let Some(vendor) = error.code() {
        builder = builder.detail("vendor_code", vendor);
    }
    if let Some(constraint) = error.constraint() {
        builder = builder.detail("constraint", constraint);
    }
    if let Some(column) = error.column() {
        builder = builder.detail("field", column);
    }
    builder.cause(error).get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(Some("23505"), "UNIQUE_VIOLATION", 409, true)]
    #[case(Some("23503"), "FOREIGN_KEY_VIOLATION", 409, true)]
    #[case(Some("23502"), "NOT_NULL_VIOLATION", 500, false)]
    #[case(Some("42601"), "SYNTAX_ERROR", 500, false)]
    #[case(Some("ECONNREFUSED"), "CONNECTION_REFUSED", 503, false)]
    #[case(Some("08006"), "CONNECTION_REFUSED", 503, false)]
    #[case(Some("22P02"), "QUERY_FAILED", 500, false)]
    #[case(None, "QUERY_FAILED", 500, false)]
    fn translation_table(
        #[case] vendor: Option<&str>,
        #[case] code: &str,
        #[case] status: u16,
        #[case] expected: bool,
    ) {
        let driver = DriverError::new(vendor.map(str::to_owned), "boom");
        let err = translate(driver, "posts", "createRecord");
        assert_eq!(err.code(), code);
        assert_eq!(err.http_status(), status);
        assert_eq!(err.is_expected(), expected);
        assert_eq!(err.layer(), Some(ErrorLayer::Database));
        assert_eq!(err.detail("table"), Some(&json!("posts")));
        assert_eq!(err.detail("operation"), Some(&json!("createRecord")));
    }

    #[test]
    fn constraint_and_column_are_attached() {
        let driver = DriverError::new(Some(sqlstate::UNIQUE_VIOLATION.into()), "dup")
            .with_constraint("posts_slug_key")
            .with_column("slug");
        let err = translate(driver, "posts", "createRecord");
        assert_eq!(err.detail("constraint"), Some(&json!("posts_slug_key")));
        assert_eq!(err.detail("field"), Some(&json!("slug")));
        assert_eq!(err.detail("vendor_code"), Some(&json!("23505")));
        assert_eq!(err.chain_depth(), 2);
        assert_eq!(err.root_cause().code(), "UNIQUE_VIOLATION");
    }
}
