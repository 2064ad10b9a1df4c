//! The narrow seam to the SQL engine: run a statement, get rows or a
//! driver error carrying the vendor code.

mod memory;
mod postgres;

pub use memory::MemoryDriver;
pub use postgres::PgDriver;

use crate::error::BoxError;
use crate::sql::Statement;
use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// One result row, keyed by column name.
pub type Row = Map<String, Value>;

#[derive(Error, Debug)]
#[error("{message}")]
pub struct DriverError {
    code: Option<String>,
    message: String,
    constraint: Option<String>,
    column: Option<String>,
    #[source]
    source: Option<BoxError>,
}

impl DriverError {
    pub fn new(code: Option<String>, message: impl Into<String>) -> Self {
        DriverError {
            code,
            message: message.into(),
            constraint: None,
            column: None,
            source: None,
        }
    }

    /// Shorthand for an error with a known vendor code.
    pub fn with_code(code: &str, message: impl Into<String>) -> Self {
        DriverError::new(Some(code.to_string()), message)
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = Some(constraint.into());
        self
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn constraint(&self) -> Option<&str> {
        self.constraint.as_deref()
    }

    pub fn column(&self) -> Option<&str> {
        self.column.as_deref()
    }
}

#[async_trait]
pub trait Driver: Send + Sync {
    async fn execute(&self, statement: &Statement) -> Result<Vec<Row>, DriverError>;
}
