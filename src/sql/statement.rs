//! Structured statements: what the table engine asks a driver to run.
//!
//! Identifiers always come from a [`TableDef`]; values are carried as JSON and
//! bound as parameters by the PostgreSQL renderer.

use crate::config::TableDef;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub enum Statement {
    Select(SelectStatement),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
}

impl Statement {
    pub fn table(&self) -> &Arc<TableDef> {
        match self {
            Statement::Select(s) => &s.table,
            Statement::Insert(s) => &s.table,
            Statement::Update(s) => &s.table,
            Statement::Delete(s) => &s.table,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Statement::Select(_) => "select",
            Statement::Insert(_) => "insert",
            Statement::Update(_) => "update",
            Statement::Delete(_) => "delete",
        }
    }
}

#[derive(Clone, Debug)]
pub struct SelectStatement {
    pub table: Arc<TableDef>,
    /// Projection; empty selects every column.
    pub columns: Vec<String>,
    pub filter: Option<Filter>,
    pub order_by: Vec<OrderTerm>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct InsertStatement {
    pub table: Arc<TableDef>,
    pub columns: Vec<String>,
    /// One entry per row, aligned with `columns`; `None` renders `DEFAULT`.
    pub rows: Vec<Vec<Option<Value>>>,
    pub on_conflict: Option<ConflictClause>,
    pub returning: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct UpdateStatement {
    pub table: Arc<TableDef>,
    pub set: Vec<(String, SetValue)>,
    pub filter: Option<Filter>,
    pub returning: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct DeleteStatement {
    pub table: Arc<TableDef>,
    pub filter: Option<Filter>,
    pub returning: Vec<String>,
}

/// Right-hand side of a `SET` assignment.
#[derive(Clone, Debug, PartialEq)]
pub enum SetValue {
    Value(Value),
    /// `EXCLUDED.<column>` inside `ON CONFLICT DO UPDATE`.
    Excluded,
    CurrentTimestamp,
}

#[derive(Clone, Debug)]
pub struct ConflictClause {
    /// Conflict target; empty means any unique constraint (`DO NOTHING` only).
    pub target: Vec<String>,
    pub action: ConflictAction,
}

#[derive(Clone, Debug)]
pub enum ConflictAction {
    Nothing,
    Update {
        set: Vec<(String, SetValue)>,
        /// Evaluated against the existing row.
        filter: Option<Filter>,
    },
}

/// Row predicate. Equality against `null` means `IS NULL`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    Eq { field: String, value: Value },
    Ne { field: String, value: Value },
    Gt { field: String, value: Value },
    Gte { field: String, value: Value },
    Lt { field: String, value: Value },
    Lte { field: String, value: Value },
    Like { field: String, pattern: String },
    Ilike { field: String, pattern: String },
    In { field: String, values: Vec<Value> },
    IsNull { field: String },
    IsNotNull { field: String },
    And { filters: Vec<Filter> },
    Or { filters: Vec<Filter> },
    Not { filter: Box<Filter> },
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq { field: field.into(), value: value.into() }
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne { field: field.into(), value: value.into() }
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt { field: field.into(), value: value.into() }
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gte { field: field.into(), value: value.into() }
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt { field: field.into(), value: value.into() }
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lte { field: field.into(), value: value.into() }
    }

    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Filter::Like { field: field.into(), pattern: pattern.into() }
    }

    pub fn ilike(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Filter::Ilike { field: field.into(), pattern: pattern.into() }
    }

    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::In { field: field.into(), values }
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Filter::IsNull { field: field.into() }
    }

    pub fn is_not_null(field: impl Into<String>) -> Self {
        Filter::IsNotNull { field: field.into() }
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And { filters }
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or { filters }
    }

    pub fn negate(filter: Filter) -> Self {
        Filter::Not { filter: Box::new(filter) }
    }

    /// Every column the predicate references.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Filter::Eq { field, .. }
            | Filter::Ne { field, .. }
            | Filter::Gt { field, .. }
            | Filter::Gte { field, .. }
            | Filter::Lt { field, .. }
            | Filter::Lte { field, .. }
            | Filter::Like { field, .. }
            | Filter::Ilike { field, .. }
            | Filter::In { field, .. }
            | Filter::IsNull { field }
            | Filter::IsNotNull { field } => out.push(field),
            Filter::And { filters } | Filter::Or { filters } => {
                for f in filters {
                    f.collect_fields(out);
                }
            }
            Filter::Not { filter } => filter.collect_fields(out),
        }
    }
}

/// Conjunction of optional predicates; `None` when nothing remains.
pub fn conjoin(filters: impl IntoIterator<Item = Filter>) -> Option<Filter> {
    let mut parts: Vec<Filter> = filters.into_iter().collect();
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(Filter::And { filters: parts }),
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// One `ORDER BY` term. Deserializes from a bare field name (ascending) or
/// from `{ "field": .., "direction": "asc" | "desc" }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OrderTerm {
    pub field: String,
    pub direction: Direction,
}

impl OrderTerm {
    pub fn asc(field: impl Into<String>) -> Self {
        OrderTerm { field: field.into(), direction: Direction::Asc }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        OrderTerm { field: field.into(), direction: Direction::Desc }
    }
}

impl<'de> Deserialize<'de> for OrderTerm {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bare(String),
            Full {
                field: String,
                #[serde(default)]
                direction: Direction,
            },
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Bare(field) => OrderTerm::asc(field),
            Raw::Full { field, direction } => OrderTerm { field, direction },
        })
    }
}
