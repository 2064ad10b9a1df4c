//! Renders statements as parameterized PostgreSQL.

use crate::config::{ColumnType, TableDef};
use crate::sql::params::PgBindValue;
use crate::sql::statement::*;
use serde_json::Value;

/// Quote identifier for PostgreSQL (safe: only from config).
pub(crate) fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Table name, schema-qualified when the descriptor or the caller names one.
pub(crate) fn qualified_table(table: &TableDef, default_schema: Option<&str>) -> String {
    match table.schema().or(default_schema) {
        Some(schema) => format!("{}.{}", quoted(schema), quoted(table.name())),
        None => quoted(table.name()),
    }
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgBindValue>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf::default()
    }

    /// Push a parameter and return its placeholder, cast to the column type.
    fn push_param(&mut self, v: Value, ty: Option<&ColumnType>) -> String {
        self.params.push(PgBindValue::for_column(v, ty));
        let n = self.params.len();
        match ty {
            Some(t) => format!("${}::{}", n, t.cast_name()),
            None => format!("${}", n),
        }
    }
}

/// Column list for SELECT/RETURNING; numeric comes back as text so it
/// decodes without a decimal type.
fn select_column_list(table: &TableDef, columns: &[String]) -> String {
    let names: Vec<&str> = if columns.is_empty() {
        table.columns().iter().map(|c| c.name.as_str()).collect()
    } else {
        columns.iter().map(String::as_str).collect()
    };
    names
        .iter()
        .map(|name| {
            let q = quoted(name);
            match table.column(name).map(|c| &c.column_type) {
                Some(ColumnType::Numeric) => format!("{}::text AS {}", q, q),
                _ => q,
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_type<'a>(table: &'a TableDef, field: &str) -> Option<&'a ColumnType> {
    table.column(field).map(|c| &c.column_type)
}

fn render_filter(q: &mut QueryBuf, table: &TableDef, filter: &Filter, qualifier: Option<&str>) -> String {
    let col = |field: &str| match qualifier {
        Some(prefix) => format!("{}.{}", prefix, quoted(field)),
        None => quoted(field),
    };
    let compare = |q: &mut QueryBuf, field: &str, op: &str, value: &Value| {
        let ph = q.push_param(value.clone(), column_type(table, field));
        format!("{} {} {}", col(field), op, ph)
    };
    match filter {
        Filter::Eq { field, value } if value.is_null() => format!("{} IS NULL", col(field)),
        Filter::Ne { field, value } if value.is_null() => format!("{} IS NOT NULL", col(field)),
        Filter::Eq { field, value } => compare(q, field, "=", value),
        Filter::Ne { field, value } => compare(q, field, "<>", value),
        Filter::Gt { field, value } => compare(q, field, ">", value),
        Filter::Gte { field, value } => compare(q, field, ">=", value),
        Filter::Lt { field, value } => compare(q, field, "<", value),
        Filter::Lte { field, value } => compare(q, field, "<=", value),
        Filter::Like { field, pattern } => {
            let ph = q.push_param(Value::String(pattern.clone()), None);
            format!("{} LIKE {}", col(field), ph)
        }
        Filter::Ilike { field, pattern } => {
            let ph = q.push_param(Value::String(pattern.clone()), None);
            format!("{} ILIKE {}", col(field), ph)
        }
        Filter::In { values, .. } if values.is_empty() => "FALSE".into(),
        Filter::In { field, values } => {
            let ty = column_type(table, field);
            let phs: Vec<String> = values.iter().map(|v| q.push_param(v.clone(), ty)).collect();
            format!("{} IN ({})", col(field), phs.join(", "))
        }
        Filter::IsNull { field } => format!("{} IS NULL", col(field)),
        Filter::IsNotNull { field } => format!("{} IS NOT NULL", col(field)),
        Filter::And { filters } if filters.is_empty() => "TRUE".into(),
        Filter::Or { filters } if filters.is_empty() => "FALSE".into(),
        Filter::And { filters } => {
            let parts: Vec<String> = filters.iter().map(|f| render_filter(q, table, f, qualifier)).collect();
            format!("({})", parts.join(" AND "))
        }
        Filter::Or { filters } => {
            let parts: Vec<String> = filters.iter().map(|f| render_filter(q, table, f, qualifier)).collect();
            format!("({})", parts.join(" OR "))
        }
        Filter::Not { filter } => format!("NOT ({})", render_filter(q, table, filter, qualifier)),
    }
}

fn render_set(q: &mut QueryBuf, table: &TableDef, set: &[(String, SetValue)]) -> String {
    set.iter()
        .map(|(name, value)| {
            let rhs = match value {
                SetValue::Value(v) => q.push_param(v.clone(), column_type(table, name)),
                SetValue::Excluded => format!("EXCLUDED.{}", quoted(name)),
                SetValue::CurrentTimestamp => "NOW()".into(),
            };
            format!("{} = {}", quoted(name), rhs)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_where(q: &mut QueryBuf, table: &TableDef, filter: Option<&Filter>) -> String {
    filter
        .map(|f| format!(" WHERE {}", render_filter(q, table, f, None)))
        .unwrap_or_default()
}

/// Render a statement. `default_schema` qualifies tables whose descriptor
/// does not name a schema.
pub fn render(statement: &Statement, default_schema: Option<&str>) -> QueryBuf {
    match statement {
        Statement::Select(s) => select(s, default_schema),
        Statement::Insert(s) => insert(s, default_schema),
        Statement::Update(s) => update(s, default_schema),
        Statement::Delete(s) => delete(s, default_schema),
    }
}

fn select(s: &SelectStatement, default_schema: Option<&str>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(&s.table, default_schema);
    let cols = select_column_list(&s.table, &s.columns);
    let where_clause = render_where(&mut q, &s.table, s.filter.as_ref());
    let order_clause = if s.order_by.is_empty() {
        String::new()
    } else {
        let terms: Vec<String> = s
            .order_by
            .iter()
            .map(|t| format!("{}.{} {}", table, quoted(&t.field), t.direction.as_sql()))
            .collect();
        format!(" ORDER BY {}", terms.join(", "))
    };
    let limit_clause = s.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = s.offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {}{}{}{}{}",
        cols, table, where_clause, order_clause, limit_clause, offset_clause
    );
    q
}

fn insert(s: &InsertStatement, default_schema: Option<&str>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(&s.table, default_schema);
    let cols: Vec<String> = s.columns.iter().map(|c| quoted(c)).collect();
    let mut tuples = Vec::with_capacity(s.rows.len());
    for row in &s.rows {
        let values: Vec<String> = s
            .columns
            .iter()
            .zip(row)
            .map(|(name, value)| match value {
                Some(v) => q.push_param(v.clone(), column_type(&s.table, name)),
                None => "DEFAULT".to_string(),
            })
            .collect();
        tuples.push(format!("({})", values.join(", ")));
    }
    let conflict_clause = match &s.on_conflict {
        None => String::new(),
        Some(c) => {
            let target = if c.target.is_empty() {
                String::new()
            } else {
                let t: Vec<String> = c.target.iter().map(|c| quoted(c)).collect();
                format!(" ({})", t.join(", "))
            };
            match &c.action {
                ConflictAction::Nothing => format!(" ON CONFLICT{} DO NOTHING", target),
                ConflictAction::Update { set, filter } => {
                    let set_clause = render_set(&mut q, &s.table, set);
                    let where_clause = filter
                        .as_ref()
                        .map(|f| format!(" WHERE {}", render_filter(&mut q, &s.table, f, Some(table.as_str()))))
                        .unwrap_or_default();
                    format!(" ON CONFLICT{} DO UPDATE SET {}{}", target, set_clause, where_clause)
                }
            }
        }
    };
    let returning = select_column_list(&s.table, &s.returning);
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES {}{} RETURNING {}",
        table,
        cols.join(", "),
        tuples.join(", "),
        conflict_clause,
        returning
    );
    q
}

fn update(s: &UpdateStatement, default_schema: Option<&str>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(&s.table, default_schema);
    let set_clause = render_set(&mut q, &s.table, &s.set);
    let where_clause = render_where(&mut q, &s.table, s.filter.as_ref());
    let returning = select_column_list(&s.table, &s.returning);
    q.sql = format!(
        "UPDATE {} SET {}{} RETURNING {}",
        table, set_clause, where_clause, returning
    );
    q
}

fn delete(s: &DeleteStatement, default_schema: Option<&str>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(&s.table, default_schema);
    let where_clause = render_where(&mut q, &s.table, s.filter.as_ref());
    let returning = select_column_list(&s.table, &s.returning);
    q.sql = format!("DELETE FROM {}{} RETURNING {}", table, where_clause, returning);
    q
}
