//! Raw shapes derived from a table descriptor.

use super::{FieldKind, FieldSchema, Schema};
use crate::config::{ColumnDef, ColumnType, TableDef};

/// Field for one column, before any requiredness decision.
pub fn column_field(column: &ColumnDef) -> FieldSchema {
    let field = match &column.column_type {
        ColumnType::Text => FieldSchema::string(),
        ColumnType::Varchar(len) => match len {
            Some(n) => FieldSchema::string().max_length(*n),
            None => FieldSchema::string(),
        },
        ColumnType::SmallInt
        | ColumnType::Integer
        | ColumnType::BigInt
        | ColumnType::Serial
        | ColumnType::BigSerial => FieldSchema::integer(),
        ColumnType::Real | ColumnType::Double => FieldSchema::new(FieldKind::Number),
        ColumnType::Numeric => FieldSchema::new(FieldKind::Decimal),
        ColumnType::Boolean => FieldSchema::boolean(),
        ColumnType::Uuid => FieldSchema::uuid(),
        ColumnType::Timestamp | ColumnType::TimestampTz => FieldSchema::new(FieldKind::Timestamp),
        ColumnType::Date => FieldSchema::new(FieldKind::Date),
        ColumnType::Json | ColumnType::Jsonb => FieldSchema::json(),
    };
    if column.nullable {
        field.nullable()
    } else {
        field
    }
}

/// Shape of a selected row: every column present.
pub fn select_shape(table: &TableDef) -> Schema {
    table
        .columns()
        .iter()
        .fold(Schema::new(), |s, c| s.field(c.name.clone(), column_field(c)))
}

/// Shape of an insert: a column is optional when the database can fill it.
pub fn insert_shape(table: &TableDef) -> Schema {
    table.columns().iter().fold(Schema::new(), |s, c| {
        let field = column_field(c);
        let field = if c.nullable || c.has_default() || c.column_type.is_serial() {
            field.optional()
        } else {
            field
        };
        s.field(c.name.clone(), field)
    })
}

pub fn update_shape(table: &TableDef) -> Schema {
    insert_shape(table).partial()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn posts() -> TableDef {
        TableDef::builder("posts")
            .column(ColumnDef::new("id", ColumnType::Serial).primary_key())
            .column(ColumnDef::new("title", ColumnType::Varchar(Some(5))).not_null())
            .column(ColumnDef::new("content", ColumnType::Text))
            .column(ColumnDef::new("is_active", ColumnType::Boolean).not_null().default_value(true))
            .build()
            .unwrap()
    }

    #[test]
    fn insert_shape_requires_only_unfillable_columns() {
        let shape = insert_shape(&posts());
        let required: Vec<_> = shape.fields().filter(|(_, f)| f.required).map(|(n, _)| n).collect();
        assert_eq!(required, vec!["title"]);
        assert!(shape.validate(&json!({ "title": "toolong" })).is_err());
        assert!(shape.validate(&json!({ "title": "ok", "content": null })).is_ok());
    }

    #[test]
    fn select_shape_mirrors_nullability() {
        let shape = select_shape(&posts());
        assert!(shape.get("content").unwrap().nullable);
        assert!(!shape.get("title").unwrap().nullable);
        assert!(shape.fields().all(|(_, f)| f.required));
    }

    #[test]
    fn update_shape_is_all_optional() {
        assert!(update_shape(&posts()).validate(&json!({})).is_ok());
    }
}
