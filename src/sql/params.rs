//! Bind values for rendered statements.
//!
//! Placeholders are cast to the column type (`$1::uuid`), so each value is
//! sent with the closest PostgreSQL type and converted server-side.

use crate::config::ColumnType;
use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::Database;

#[derive(Clone, Debug, PartialEq)]
pub enum PgBindValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Json(Value),
}

impl PgBindValue {
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => PgBindValue::Null,
            Value::Bool(b) => PgBindValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => PgBindValue::I64(i),
                None => PgBindValue::F64(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => PgBindValue::String(s.clone()),
            Value::Array(_) | Value::Object(_) => PgBindValue::Json(v.clone()),
        }
    }

    /// Bind value for a column: every non-null value headed for a json or
    /// jsonb column is sent as a JSON document, scalars included.
    pub fn for_column(v: Value, ty: Option<&ColumnType>) -> Self {
        match (ty, v) {
            (_, Value::Null) => PgBindValue::Null,
            (Some(ColumnType::Json | ColumnType::Jsonb), v) => PgBindValue::Json(v),
            (_, v) => PgBindValue::from_json(&v),
        }
    }
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        Ok(match self {
            PgBindValue::Null => <Option<String> as Encode<Postgres>>::encode_by_ref(&None, buf)?,
            PgBindValue::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf)?,
            PgBindValue::I64(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            PgBindValue::F64(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            PgBindValue::String(s) => <String as Encode<Postgres>>::encode_by_ref(s, buf)?,
            PgBindValue::Json(v) => <Value as Encode<Postgres>>::encode_by_ref(v, buf)?,
        })
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(match self {
            PgBindValue::Null | PgBindValue::String(_) => PgTypeInfo::with_name("TEXT"),
            PgBindValue::Bool(_) => PgTypeInfo::with_name("BOOL"),
            PgBindValue::I64(_) => PgTypeInfo::with_name("INT8"),
            PgBindValue::F64(_) => PgTypeInfo::with_name("FLOAT8"),
            PgBindValue::Json(_) => PgTypeInfo::with_name("JSONB"),
        })
    }
}

impl sqlx::Type<Postgres> for PgBindValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_values_map_to_bind_values() {
        assert_eq!(PgBindValue::from_json(&json!(null)), PgBindValue::Null);
        assert_eq!(PgBindValue::from_json(&json!(7)), PgBindValue::I64(7));
        assert_eq!(PgBindValue::from_json(&json!(1.5)), PgBindValue::F64(1.5));
        assert_eq!(
            PgBindValue::from_json(&json!("6f1c0e4e-8d8b-4b5e-9d43-0b4f5a2b8a11")),
            PgBindValue::String("6f1c0e4e-8d8b-4b5e-9d43-0b4f5a2b8a11".into())
        );
        assert!(matches!(PgBindValue::from_json(&json!({"a": 1})), PgBindValue::Json(_)));
    }

    #[test]
    fn json_columns_bind_scalars_as_documents() {
        let jsonb = Some(&ColumnType::Jsonb);
        assert_eq!(PgBindValue::for_column(json!(5), jsonb), PgBindValue::Json(json!(5)));
        assert_eq!(
            PgBindValue::for_column(json!("hello"), Some(&ColumnType::Json)),
            PgBindValue::Json(json!("hello"))
        );
        assert_eq!(PgBindValue::for_column(json!(null), jsonb), PgBindValue::Null);
        assert_eq!(PgBindValue::for_column(json!(5), Some(&ColumnType::Integer)), PgBindValue::I64(5));
        assert_eq!(PgBindValue::for_column(json!("x"), None), PgBindValue::String("x".into()));
    }
}
