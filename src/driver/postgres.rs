//! PostgreSQL driver over a bounded sqlx pool.

use super::{Driver, DriverError, Row};
use crate::error::db::sqlstate;
use crate::sql::{render, Statement};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgDatabaseError, PgPool, PgRow};

#[derive(Clone)]
pub struct PgDriver {
    pool: PgPool,
    default_schema: Option<String>,
}

impl PgDriver {
    pub fn new(pool: PgPool) -> Self {
        PgDriver {
            pool,
            default_schema: None,
        }
    }

    /// Qualify tables whose descriptor names no schema.
    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = Some(schema.into());
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Driver for PgDriver {
    async fn execute(&self, statement: &Statement) -> Result<Vec<Row>, DriverError> {
        let q = render(statement, self.default_schema.as_deref());
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for p in q.params {
            query = query.bind(p);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }
}

impl From<sqlx::Error> for DriverError {
    fn from(err: sqlx::Error) -> Self {
        let (code, constraint, column) = match &err {
            sqlx::Error::Database(db) => (
                db.code().map(|c| c.into_owned()),
                db.constraint().map(str::to_owned),
                db.try_downcast_ref::<PgDatabaseError>()
                    .and_then(|e| e.column())
                    .map(str::to_owned),
            ),
            sqlx::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
                (Some(sqlstate::CONNECTION_REFUSED.to_string()), None, None)
            }
            sqlx::Error::PoolTimedOut => (Some(sqlstate::UNABLE_TO_CONNECT.to_string()), None, None),
            _ => (None, None, None),
        };
        let mut out = DriverError::new(code, err.to_string());
        if let Some(c) = constraint {
            out = out.with_constraint(c);
        }
        if let Some(c) = column {
            out = out.with_column(c);
        }
        out.with_source(err)
    }
}

fn row_to_json(row: &PgRow) -> Row {
    use sqlx::Column;
    use sqlx::Row as _;
    let mut map = Row::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    map
}

/// Decode a cell by trying the column types the descriptors support, most
/// specific first.
fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row as _;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_connections_carry_the_os_code() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = DriverError::from(sqlx::Error::Io(io));
        assert_eq!(err.code(), Some("ECONNREFUSED"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn pool_timeouts_map_to_unable_to_connect() {
        let err = DriverError::from(sqlx::Error::PoolTimedOut);
        assert_eq!(err.code(), Some("08001"));
    }

    #[test]
    fn other_errors_have_no_vendor_code() {
        let err = DriverError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.code(), None);
    }
}
