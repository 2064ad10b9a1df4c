//! DDL for table descriptors: schemas first, then tables ordered so that
//! referenced tables exist before the tables pointing at them.

use crate::config::{validate_tables, ColumnDefault, ColumnDef, TableDef};
use crate::driver::DriverError;
use crate::error::{db, AppError};
use crate::sql::{qualified_table, quoted};
use serde_json::Value;
use sqlx::PgPool;
use std::collections::HashSet;

fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".into(),
        Value::Bool(true) => "TRUE".into(),
        Value::Bool(false) => "FALSE".into(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

fn column_sql(c: &ColumnDef) -> String {
    let mut def = format!("{} {}", quoted(&c.name), c.column_type.ddl_name());
    if !c.nullable {
        def.push_str(" NOT NULL");
    }
    match &c.default {
        Some(ColumnDefault::Literal(v)) => {
            def.push_str(" DEFAULT ");
            def.push_str(&literal(v));
        }
        Some(ColumnDefault::Expression(e)) => {
            def.push_str(" DEFAULT ");
            def.push_str(e);
        }
        None => {}
    }
    def
}

fn column_list(columns: &[String]) -> String {
    columns.iter().map(|c| quoted(c)).collect::<Vec<_>>().join(", ")
}

/// `CREATE TABLE IF NOT EXISTS` with primary key, unique and foreign key
/// constraints. Referenced tables live in the same schema.
pub fn create_table_sql(table: &TableDef, default_schema: Option<&str>) -> String {
    let mut defs: Vec<String> = table.columns().iter().map(column_sql).collect();
    defs.push(format!("PRIMARY KEY ({})", column_list(table.primary_key())));
    for c in table.columns().iter().filter(|c| c.unique && !c.primary_key) {
        defs.push(format!("UNIQUE ({})", quoted(&c.name)));
    }
    for set in table.unique_sets() {
        defs.push(format!("UNIQUE ({})", column_list(set)));
    }
    let schema = table.schema().or(default_schema);
    for c in table.columns() {
        let Some(fk) = &c.references else { continue };
        let target = match schema {
            Some(s) => format!("{}.{}", quoted(s), quoted(&fk.table)),
            None => quoted(&fk.table),
        };
        defs.push(format!(
            "FOREIGN KEY ({}) REFERENCES {} ({}) ON UPDATE {} ON DELETE {}",
            quoted(&c.name),
            target,
            quoted(&fk.column),
            fk.on_update.as_deref().unwrap_or("NO ACTION").to_uppercase(),
            fk.on_delete.as_deref().unwrap_or("NO ACTION").to_uppercase(),
        ));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
        qualified_table(table, default_schema),
        defs.join(",\n  ")
    )
}

/// Referenced tables before referencing ones; self references and cycles
/// keep declaration order.
pub fn dependency_order(tables: &[TableDef]) -> Vec<&TableDef> {
    let mut done: HashSet<&str> = HashSet::new();
    let mut out = Vec::with_capacity(tables.len());
    let mut pending: Vec<&TableDef> = tables.iter().collect();
    while !pending.is_empty() {
        let before = pending.len();
        pending.retain(|t| {
            let ready = t.columns().iter().filter_map(|c| c.references.as_ref()).all(|fk| {
                fk.table == t.name()
                    || done.contains(fk.table.as_str())
                    || !tables.iter().any(|o| o.name() == fk.table)
            });
            if ready {
                done.insert(t.name());
                out.push(*t);
            }
            !ready
        });
        if pending.len() == before {
            out.append(&mut pending);
        }
    }
    out
}

/// Validate the descriptors, then create their schemas and tables.
/// Idempotent: every statement is `IF NOT EXISTS`.
pub async fn apply_migrations(pool: &PgPool, tables: &[TableDef], default_schema: Option<&str>) -> Result<(), AppError> {
    validate_tables(tables)?;

    let mut schemas: Vec<&str> = tables.iter().filter_map(|t| t.schema().or(default_schema)).collect();
    schemas.sort_unstable();
    schemas.dedup();
    for schema in schemas {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(schema)))
            .execute(pool)
            .await
            .map_err(|e| db::translate(DriverError::from(e), schema, "createSchema"))?;
    }

    for table in dependency_order(tables) {
        let sql = create_table_sql(table, default_schema);
        tracing::info!(table = table.name(), "applying table migration");
        tracing::debug!(sql = %sql, "migration statement");
        sqlx::query(&sql)
            .execute(pool)
            .await
            .map_err(|e| db::translate(DriverError::from(e), table.name(), "createTable"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ColumnType, TableDef};

    fn users() -> TableDef {
        TableDef::builder("users")
            .column(ColumnDef::new("id", ColumnType::Uuid).primary_key().default_expr("gen_random_uuid()"))
            .column(ColumnDef::new("email", ColumnType::Varchar(Some(255))).not_null().unique())
            .build()
            .unwrap()
    }

    fn posts() -> TableDef {
        TableDef::builder("posts")
            .schema("blog")
            .column(ColumnDef::new("id", ColumnType::BigSerial).primary_key())
            .column(ColumnDef::new("user_id", ColumnType::Uuid).not_null().references("users", "id"))
            .column(ColumnDef::new("slug", ColumnType::Text).not_null())
            .column(ColumnDef::new("title", ColumnType::Text).not_null().default_value("it's new"))
            .column(ColumnDef::new("is_active", ColumnType::Boolean).not_null().default_value(true))
            .unique(["user_id", "slug"])
            .build()
            .unwrap()
    }

    #[test]
    fn renders_columns_and_constraints() {
        let sql = create_table_sql(&posts(), Some("public"));
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"blog\".\"posts\" (\n  \
             \"id\" bigserial NOT NULL,\n  \
             \"user_id\" uuid NOT NULL,\n  \
             \"slug\" text NOT NULL,\n  \
             \"title\" text NOT NULL DEFAULT 'it''s new',\n  \
             \"is_active\" bool NOT NULL DEFAULT TRUE,\n  \
             PRIMARY KEY (\"id\"),\n  \
             UNIQUE (\"user_id\", \"slug\"),\n  \
             FOREIGN KEY (\"user_id\") REFERENCES \"blog\".\"users\" (\"id\") ON UPDATE NO ACTION ON DELETE NO ACTION\n)"
        );
    }

    #[test]
    fn single_unique_columns_get_constraints() {
        let sql = create_table_sql(&users(), None);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"users\" ("));
        assert!(sql.contains("\"email\" varchar(255) NOT NULL"));
        assert!(sql.contains("UNIQUE (\"email\")"));
        assert!(sql.contains("DEFAULT gen_random_uuid()"));
    }

    #[test]
    fn referenced_tables_come_first() {
        let tables = vec![posts(), users()];
        let order: Vec<_> = dependency_order(&tables).iter().map(|t| t.name()).collect();
        assert_eq!(order, vec!["users", "posts"]);
    }
}
