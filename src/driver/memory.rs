//! In-memory driver with PostgreSQL semantics for the statement model.
//!
//! Each statement runs against a copy of the store and is committed only when
//! it succeeds, so a failing statement leaves no partial writes. Constraint
//! failures carry the same SQLSTATE codes PostgreSQL reports.

use super::{Driver, DriverError, Row};
use crate::config::{ColumnDefault, TableDef};
use crate::error::db::sqlstate;
use crate::sql::*;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

const CARDINALITY_VIOLATION: &str = "21000";

#[derive(Clone)]
struct TableData {
    def: Arc<TableDef>,
    rows: Vec<Row>,
    sequences: HashMap<String, i64>,
}

impl TableData {
    fn new(def: Arc<TableDef>) -> Self {
        TableData {
            def,
            rows: Vec::new(),
            sequences: HashMap::new(),
        }
    }
}

type Store = HashMap<String, TableData>;

#[derive(Default)]
pub struct MemoryDriver {
    store: Mutex<Store>,
    injected: Mutex<VecDeque<DriverError>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        MemoryDriver::default()
    }

    /// Make a table known up front so foreign keys pointing at it are checked
    /// even before it receives rows.
    pub fn register(&self, table: Arc<TableDef>) {
        self.lock_store()
            .entry(table.name().to_string())
            .or_insert_with(|| TableData::new(table));
    }

    /// Fail the next statement with `error` instead of running it.
    pub fn fail_next(&self, error: DriverError) {
        self.injected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(error);
    }

    /// Current rows of `table`, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock_store()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    fn lock_store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn run(&self, statement: &Statement) -> Result<Vec<Row>, DriverError> {
        if let Some(err) = self
            .injected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        {
            return Err(err);
        }
        let mut guard = self.lock_store();
        let mut store = guard.clone();
        let name = statement.table().name().to_string();
        store
            .entry(name.clone())
            .or_insert_with(|| TableData::new(statement.table().clone()));
        let out = match statement {
            Statement::Select(s) => select(&store, &name, s)?,
            Statement::Insert(s) => insert(&mut store, &name, s)?,
            Statement::Update(s) => update(&mut store, &name, s)?,
            Statement::Delete(s) => delete(&mut store, &name, s)?,
        };
        *guard = store;
        Ok(out)
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn execute(&self, statement: &Statement) -> Result<Vec<Row>, DriverError> {
        tracing::debug!(table = statement.table().name(), kind = statement.kind(), "memory statement");
        self.run(statement)
    }
}

fn undefined_column(table: &TableDef, column: &str) -> DriverError {
    DriverError::with_code(
        sqlstate::UNDEFINED_COLUMN,
        format!("column \"{}\" of relation \"{}\" does not exist", column, table.name()),
    )
    .with_column(column)
}

fn check_columns<'a>(table: &TableDef, columns: impl IntoIterator<Item = &'a str>) -> Result<(), DriverError> {
    for c in columns {
        if !table.has_column(c) {
            return Err(undefined_column(table, c));
        }
    }
    Ok(())
}

fn project(table: &TableDef, row: &Row, columns: &[String]) -> Row {
    if columns.is_empty() {
        table
            .columns()
            .iter()
            .map(|c| (c.name.clone(), row.get(&c.name).cloned().unwrap_or(Value::Null)))
            .collect()
    } else {
        columns
            .iter()
            .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
            .collect()
    }
}

fn field<'a>(row: &'a Row, name: &str) -> &'a Value {
    row.get(name).unwrap_or(&Value::Null)
}

/// SQL equality; `None` when either side is null.
fn sql_eq(a: &Value, b: &Value) -> Option<bool> {
    compare(a, b).map(|o| o == Ordering::Equal)
}

/// SQL comparison; `None` when either side is null or the types differ.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (x, y) if x == y => Some(Ordering::Equal),
        (Value::Array(_) | Value::Object(_), Value::Array(_) | Value::Object(_)) => {
            Some(a.to_string().cmp(&b.to_string()))
        }
        _ => None,
    }
}

fn like_regex(pattern: &str, case_insensitive: bool) -> Result<Regex, DriverError> {
    let mut re = String::from(if case_insensitive { "(?is)^" } else { "(?s)^" });
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            '\\' => {
                if let Some(next) = chars.next() {
                    re.push_str(&regex::escape(&next.to_string()));
                }
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| DriverError::with_code(sqlstate::SYNTAX_ERROR, e.to_string()))
}

/// Three-valued evaluation collapsed to "row qualifies".
fn matches(filter: &Filter, row: &Row) -> Result<bool, DriverError> {
    Ok(eval(filter, row)?.unwrap_or(false))
}

fn eval(filter: &Filter, row: &Row) -> Result<Option<bool>, DriverError> {
    let cmp = |f: &str, v: &Value, ok: fn(Ordering) -> bool| compare(field(row, f), v).map(ok);
    Ok(match filter {
        Filter::Eq { field: f, value } if value.is_null() => Some(field(row, f).is_null()),
        Filter::Ne { field: f, value } if value.is_null() => Some(!field(row, f).is_null()),
        Filter::Eq { field: f, value } => cmp(f, value, |o| o == Ordering::Equal),
        Filter::Ne { field: f, value } => cmp(f, value, |o| o != Ordering::Equal),
        Filter::Gt { field: f, value } => cmp(f, value, |o| o == Ordering::Greater),
        Filter::Gte { field: f, value } => cmp(f, value, |o| o != Ordering::Less),
        Filter::Lt { field: f, value } => cmp(f, value, |o| o == Ordering::Less),
        Filter::Lte { field: f, value } => cmp(f, value, |o| o != Ordering::Greater),
        Filter::Like { field: f, pattern } | Filter::Ilike { field: f, pattern } => {
            let insensitive = matches!(filter, Filter::Ilike { .. });
            match field(row, f) {
                Value::Null => None,
                Value::String(s) => Some(like_regex(pattern, insensitive)?.is_match(s)),
                other => Some(like_regex(pattern, insensitive)?.is_match(&other.to_string())),
            }
        }
        Filter::In { field: f, values } => {
            let v = field(row, f);
            if v.is_null() {
                None
            } else if values.iter().any(|x| sql_eq(v, x) == Some(true)) {
                Some(true)
            } else if values.iter().any(Value::is_null) {
                None
            } else {
                Some(false)
            }
        }
        Filter::IsNull { field: f } => Some(field(row, f).is_null()),
        Filter::IsNotNull { field: f } => Some(!field(row, f).is_null()),
        Filter::And { filters } => {
            let mut unknown = false;
            for f in filters {
                match eval(f, row)? {
                    Some(false) => return Ok(Some(false)),
                    None => unknown = true,
                    Some(true) => {}
                }
            }
            if unknown { None } else { Some(true) }
        }
        Filter::Or { filters } => {
            let mut unknown = false;
            for f in filters {
                match eval(f, row)? {
                    Some(true) => return Ok(Some(true)),
                    None => unknown = true,
                    Some(false) => {}
                }
            }
            if unknown { None } else { Some(false) }
        }
        Filter::Not { filter } => eval(filter, row)?.map(|b| !b),
    })
}

fn check_filter(table: &TableDef, filter: Option<&Filter>) -> Result<(), DriverError> {
    match filter {
        Some(f) => check_columns(table, f.fields()),
        None => Ok(()),
    }
}

fn select(store: &Store, name: &str, s: &SelectStatement) -> Result<Vec<Row>, DriverError> {
    let table = &s.table;
    check_columns(table, s.columns.iter().map(String::as_str))?;
    check_columns(table, s.order_by.iter().map(|t| t.field.as_str()))?;
    check_filter(table, s.filter.as_ref())?;
    let data = store.get(name).map(|t| t.rows.as_slice()).unwrap_or(&[]);
    let mut rows = Vec::new();
    for row in data {
        if s.filter.as_ref().map(|f| matches(f, row)).transpose()?.unwrap_or(true) {
            rows.push(row);
        }
    }
    if !s.order_by.is_empty() {
        rows.sort_by(|a, b| order(&s.order_by, a, b));
    }
    let offset = s.offset.unwrap_or(0) as usize;
    let limit = s.limit.map(|n| n as usize).unwrap_or(usize::MAX);
    Ok(rows
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|r| project(table, r, &s.columns))
        .collect())
}

/// PostgreSQL default null placement: last when ascending, first when descending.
fn order(terms: &[OrderTerm], a: &Row, b: &Row) -> Ordering {
    for t in terms {
        let (x, y) = (field(a, &t.field), field(b, &t.field));
        let o = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            _ => compare(x, y).unwrap_or(Ordering::Equal),
        };
        let o = match t.direction {
            Direction::Asc => o,
            Direction::Desc => o.reverse(),
        };
        if o != Ordering::Equal {
            return o;
        }
    }
    Ordering::Equal
}

fn default_value(data: &mut TableData, column: &str) -> Result<Value, DriverError> {
    let def = data.def.clone();
    let Some(col) = def.column(column) else {
        return Err(undefined_column(&def, column));
    };
    if let Some(default) = &col.default {
        return match default {
            ColumnDefault::Literal(v) => Ok(v.clone()),
            ColumnDefault::Expression(expr) => evaluate_expression(expr),
        };
    }
    if col.column_type.is_serial() {
        let seq = data.sequences.entry(column.to_string()).or_insert(0);
        *seq += 1;
        return Ok(Value::from(*seq));
    }
    Ok(Value::Null)
}

fn evaluate_expression(expr: &str) -> Result<Value, DriverError> {
    let normalized = expr.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "gen_random_uuid()" | "uuid_generate_v4()" => Ok(Value::String(uuid::Uuid::new_v4().to_string())),
        "now()" | "current_timestamp" | "current_timestamp()" => Ok(now()),
        "current_date" => Ok(Value::String(chrono::Utc::now().format("%Y-%m-%d").to_string())),
        "true" => Ok(Value::Bool(true)),
        "false" => Ok(Value::Bool(false)),
        "null" => Ok(Value::Null),
        other => {
            if let Ok(n) = other.parse::<i64>() {
                return Ok(Value::from(n));
            }
            if let Some(s) = other.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
                return Ok(Value::String(s.replace("''", "'")));
            }
            Err(DriverError::with_code(
                sqlstate::FEATURE_NOT_SUPPORTED,
                format!("default expression '{}' is not supported in memory", expr),
            ))
        }
    }
}

fn now() -> Value {
    Value::String(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
}

fn constraint_name(table: &TableDef, columns: &[String]) -> String {
    if columns == table.primary_key() {
        format!("{}_pkey", table.name())
    } else {
        format!("{}_{}_key", table.name(), columns.join("_"))
    }
}

/// First constraint among `sets` that `row` collides with in `rows`, with the
/// index of the existing row. `skip` excludes the row being updated. NULLs
/// never collide.
fn find_conflict(sets: &[Vec<String>], rows: &[Row], row: &Row, skip: Option<usize>) -> Option<(Vec<String>, usize)> {
    for set in sets {
        if set.iter().any(|c| field(row, c).is_null()) {
            continue;
        }
        let hit = rows.iter().enumerate().position(|(i, existing)| {
            Some(i) != skip && set.iter().all(|c| sql_eq(field(existing, c), field(row, c)) == Some(true))
        });
        if let Some(i) = hit {
            return Some((set.clone(), i));
        }
    }
    None
}

fn unique_violation(table: &TableDef, set: &[String]) -> DriverError {
    let name = constraint_name(table, set);
    DriverError::with_code(
        sqlstate::UNIQUE_VIOLATION,
        format!("duplicate key value violates unique constraint \"{}\"", name),
    )
    .with_constraint(name)
}

fn check_not_null(table: &TableDef, row: &Row) -> Result<(), DriverError> {
    for c in table.columns() {
        if !c.nullable && field(row, &c.name).is_null() {
            return Err(DriverError::with_code(
                sqlstate::NOT_NULL_VIOLATION,
                format!(
                    "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                    c.name,
                    table.name()
                ),
            )
            .with_column(c.name.clone()));
        }
    }
    Ok(())
}

/// Foreign keys are checked only against tables the store knows about.
fn check_references(store: &Store, table: &TableDef, row: &Row) -> Result<(), DriverError> {
    for c in table.columns() {
        let Some(fk) = &c.references else { continue };
        let value = field(row, &c.name);
        if value.is_null() {
            continue;
        }
        let Some(target) = store.get(&fk.table) else { continue };
        let found = target
            .rows
            .iter()
            .any(|r| sql_eq(field(r, &fk.column), value) == Some(true));
        if !found {
            let name = format!("{}_{}_fkey", table.name(), c.name);
            return Err(DriverError::with_code(
                sqlstate::FOREIGN_KEY_VIOLATION,
                format!(
                    "insert or update on table \"{}\" violates foreign key constraint \"{}\"",
                    table.name(),
                    name
                ),
            )
            .with_constraint(name)
            .with_column(c.name.clone()));
        }
    }
    Ok(())
}

fn apply_set(row: &mut Row, set: &[(String, SetValue)], excluded: Option<&Row>) -> Result<(), DriverError> {
    let mut assigned = Vec::with_capacity(set.len());
    for (col, value) in set {
        let v = match value {
            SetValue::Value(v) => v.clone(),
            SetValue::CurrentTimestamp => now(),
            SetValue::Excluded => match excluded {
                Some(ex) => field(ex, col).clone(),
                None => {
                    return Err(DriverError::with_code(
                        sqlstate::SYNTAX_ERROR,
                        "missing FROM-clause entry for table \"excluded\"",
                    ))
                }
            },
        };
        assigned.push((col.clone(), v));
    }
    for (col, v) in assigned {
        row.insert(col, v);
    }
    Ok(())
}

fn insert(store: &mut Store, name: &str, s: &InsertStatement) -> Result<Vec<Row>, DriverError> {
    let table = s.table.clone();
    check_columns(&table, s.columns.iter().map(String::as_str))?;
    check_columns(&table, s.returning.iter().map(String::as_str))?;
    if let Some(conflict) = &s.on_conflict {
        if !conflict.target.is_empty() && !table.is_unique_target(&conflict.target) {
            return Err(DriverError::with_code(
                sqlstate::INVALID_CONFLICT_TARGET,
                "there is no unique or exclusion constraint matching the ON CONFLICT specification",
            ));
        }
        if let ConflictAction::Update { set, filter } = &conflict.action {
            check_columns(&table, set.iter().map(|(c, _)| c.as_str()))?;
            check_filter(&table, filter.as_ref())?;
        }
    }

    let mut touched: HashSet<usize> = HashSet::new();
    let mut out = Vec::new();
    for values in &s.rows {
        let data = store
            .get_mut(name)
            .ok_or_else(|| DriverError::with_code(sqlstate::SYNTAX_ERROR, "relation does not exist"))?;
        let mut row = Row::new();
        for c in table.columns() {
            let provided = s
                .columns
                .iter()
                .position(|n| *n == c.name)
                .and_then(|i| values.get(i).cloned().flatten());
            let v = match provided {
                Some(v) => v,
                None => default_value(data, &c.name)?,
            };
            row.insert(c.name.clone(), v);
        }
        check_not_null(&table, &row)?;

        let constraints = table.unique_constraints();
        // The arbiter is the conflict target, or every constraint when none is named.
        let arbiter = s.on_conflict.as_ref().and_then(|clause| {
            if clause.target.is_empty() {
                find_conflict(&constraints, &data.rows, &row, None)
            } else {
                find_conflict(std::slice::from_ref(&clause.target), &data.rows, &row, None)
            }
        });
        let Some((_, index)) = arbiter else {
            if let Some((set, _)) = find_conflict(&constraints, &data.rows, &row, None) {
                return Err(unique_violation(&table, &set));
            }
            check_references(store, &table, &row)?;
            let data = store
                .get_mut(name)
                .ok_or_else(|| DriverError::with_code(sqlstate::SYNTAX_ERROR, "relation does not exist"))?;
            data.rows.push(row.clone());
            touched.insert(data.rows.len() - 1);
            out.push(project(&table, &row, &s.returning));
            continue;
        };
        let Some(clause) = &s.on_conflict else { continue };
        match &clause.action {
            ConflictAction::Nothing => continue,
            ConflictAction::Update { set: assignments, filter } => {
                if !touched.insert(index) {
                    return Err(DriverError::with_code(
                        CARDINALITY_VIOLATION,
                        "ON CONFLICT DO UPDATE command cannot affect row a second time",
                    ));
                }
                let existing = data.rows[index].clone();
                if let Some(f) = filter {
                    if !matches(f, &existing)? {
                        continue;
                    }
                }
                let mut updated = existing;
                apply_set(&mut updated, assignments, Some(&row))?;
                check_not_null(&table, &updated)?;
                if let Some((other, _)) = find_conflict(&constraints, &data.rows, &updated, Some(index)) {
                    return Err(unique_violation(&table, &other));
                }
                check_references(store, &table, &updated)?;
                let data = store
                    .get_mut(name)
                    .ok_or_else(|| DriverError::with_code(sqlstate::SYNTAX_ERROR, "relation does not exist"))?;
                data.rows[index] = updated.clone();
                out.push(project(&table, &updated, &s.returning));
            }
        }
    }
    Ok(out)
}

fn update(store: &mut Store, name: &str, s: &UpdateStatement) -> Result<Vec<Row>, DriverError> {
    let table = s.table.clone();
    check_columns(&table, s.set.iter().map(|(c, _)| c.as_str()))?;
    check_columns(&table, s.returning.iter().map(String::as_str))?;
    check_filter(&table, s.filter.as_ref())?;
    let rows = store.get(name).map(|t| t.rows.clone()).unwrap_or_default();
    let mut next = rows.clone();
    let mut changed = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        if s.filter.as_ref().map(|f| matches(f, row)).transpose()?.unwrap_or(true) {
            apply_set(&mut next[i], &s.set, None)?;
            check_not_null(&table, &next[i])?;
            changed.push(i);
        }
    }
    for &i in &changed {
        if let Some((set, _)) = find_conflict(&table.unique_constraints(), &next, &next[i], Some(i)) {
            return Err(unique_violation(&table, &set));
        }
        check_references(store, &table, &next[i])?;
    }
    let out = changed.iter().map(|&i| project(&table, &next[i], &s.returning)).collect();
    if let Some(data) = store.get_mut(name) {
        data.rows = next;
    }
    Ok(out)
}

fn delete(store: &mut Store, name: &str, s: &DeleteStatement) -> Result<Vec<Row>, DriverError> {
    let table = s.table.clone();
    check_columns(&table, s.returning.iter().map(String::as_str))?;
    check_filter(&table, s.filter.as_ref())?;
    let rows = store.get(name).map(|t| t.rows.clone()).unwrap_or_default();
    let mut kept = Vec::with_capacity(rows.len());
    let mut removed = Vec::new();
    for row in rows {
        if s.filter.as_ref().map(|f| matches(f, &row)).transpose()?.unwrap_or(true) {
            removed.push(row);
        } else {
            kept.push(row);
        }
    }
    if let Some(data) = store.get_mut(name) {
        data.rows = kept;
    }
    cascade(store, &table, &removed)?;
    Ok(removed.iter().map(|r| project(&table, r, &s.returning)).collect())
}

/// Apply `ON DELETE` actions of tables referencing `table`; rows still
/// referenced without an action fail the delete.
fn cascade(store: &mut Store, table: &TableDef, removed: &[Row]) -> Result<(), DriverError> {
    if removed.is_empty() {
        return Ok(());
    }
    let referencing: Vec<(String, Arc<TableDef>)> = store
        .iter()
        .map(|(n, t)| (n.clone(), t.def.clone()))
        .collect();
    for (child_name, child) in referencing {
        for col in child.columns() {
            let Some(fk) = &col.references else { continue };
            if fk.table != table.name() {
                continue;
            }
            let gone: Vec<&Value> = removed.iter().map(|r| field(r, &fk.column)).collect();
            let hit = |r: &Row| gone.iter().any(|g| sql_eq(field(r, &col.name), g) == Some(true));
            let action = fk.on_delete.as_deref().map(str::to_ascii_lowercase);
            let mut cascaded = Vec::new();
            if let Some(data) = store.get_mut(&child_name) {
                match action.as_deref() {
                    Some("cascade") => {
                        let (gone_rows, keep): (Vec<Row>, Vec<Row>) = data.rows.drain(..).partition(|r| hit(r));
                        data.rows = keep;
                        cascaded = gone_rows;
                    }
                    Some("set null") => {
                        for r in data.rows.iter_mut().filter(|r| hit(r)) {
                            r.insert(col.name.clone(), Value::Null);
                        }
                    }
                    _ => {
                        if data.rows.iter().any(|r| hit(r)) {
                            let name = format!("{}_{}_fkey", child.name(), col.name);
                            return Err(DriverError::with_code(
                                sqlstate::FOREIGN_KEY_VIOLATION,
                                format!(
                                    "update or delete on table \"{}\" violates foreign key constraint \"{}\" on table \"{}\"",
                                    table.name(),
                                    name,
                                    child.name()
                                ),
                            )
                            .with_constraint(name));
                        }
                    }
                }
            }
            cascade(store, &child, &cascaded)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ColumnDef, ColumnType};
    use serde_json::json;

    fn tags() -> Arc<TableDef> {
        Arc::new(
            TableDef::builder("tags")
                .column(ColumnDef::new("id", ColumnType::Serial).primary_key())
                .column(ColumnDef::new("label", ColumnType::Text).not_null().unique())
                .column(ColumnDef::new("note", ColumnType::Text))
                .build()
                .unwrap(),
        )
    }

    fn insert_labels(table: &Arc<TableDef>, labels: &[&str], on_conflict: Option<ConflictClause>) -> Statement {
        Statement::Insert(InsertStatement {
            table: table.clone(),
            columns: vec!["label".into()],
            rows: labels.iter().map(|l| vec![Some(json!(l))]).collect(),
            on_conflict,
            returning: vec![],
        })
    }

    #[tokio::test]
    async fn serial_defaults_and_unique_violation() {
        let driver = MemoryDriver::new();
        let t = tags();
        let rows = driver.execute(&insert_labels(&t, &["a", "b"], None)).await.unwrap();
        assert_eq!(rows[0]["id"], json!(1));
        assert_eq!(rows[1]["id"], json!(2));
        assert_eq!(rows[1]["note"], Value::Null);

        let err = driver.execute(&insert_labels(&t, &["c", "a"], None)).await.unwrap_err();
        assert_eq!(err.code(), Some("23505"));
        assert_eq!(err.constraint(), Some("tags_label_key"));
        // statement is atomic: "c" was not kept
        assert_eq!(driver.rows("tags").len(), 2);
    }

    #[tokio::test]
    async fn conflict_do_nothing_skips_duplicates_in_batch() {
        let driver = MemoryDriver::new();
        let t = tags();
        let clause = ConflictClause { target: vec![], action: ConflictAction::Nothing };
        let rows = driver
            .execute(&insert_labels(&t, &["a", "a", "b"], Some(clause)))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn conflict_target_must_be_unique() {
        let driver = MemoryDriver::new();
        let t = tags();
        let clause = ConflictClause { target: vec!["note".into()], action: ConflictAction::Nothing };
        let err = driver.execute(&insert_labels(&t, &["a"], Some(clause))).await.unwrap_err();
        assert_eq!(err.code(), Some("42P10"));
    }

    #[tokio::test]
    async fn ordering_puts_nulls_last_ascending() {
        let driver = MemoryDriver::new();
        let t = tags();
        driver.execute(&insert_labels(&t, &["b", "a", "c"], None)).await.unwrap();
        driver
            .execute(&Statement::Update(UpdateStatement {
                table: t.clone(),
                set: vec![("note".into(), SetValue::Value(json!("x")))],
                filter: Some(Filter::ne("label", "c")),
                returning: vec![],
            }))
            .await
            .unwrap();
        let rows = driver
            .execute(&Statement::Select(SelectStatement {
                table: t.clone(),
                columns: vec!["label".into()],
                filter: None,
                order_by: vec![OrderTerm::asc("note"), OrderTerm::desc("label")],
                limit: None,
                offset: None,
            }))
            .await
            .unwrap();
        let labels: Vec<&Value> = rows.iter().map(|r| &r["label"]).collect();
        assert_eq!(labels, vec![&json!("b"), &json!("a"), &json!("c")]);
    }

    #[tokio::test]
    async fn like_and_in_filters() {
        let driver = MemoryDriver::new();
        let t = tags();
        driver.execute(&insert_labels(&t, &["Rust", "rusty", "go"], None)).await.unwrap();
        let select = |filter: Filter| {
            Statement::Select(SelectStatement {
                table: t.clone(),
                columns: vec![],
                filter: Some(filter),
                order_by: vec![],
                limit: None,
                offset: None,
            })
        };
        assert_eq!(driver.execute(&select(Filter::like("label", "rust%"))).await.unwrap().len(), 1);
        assert_eq!(driver.execute(&select(Filter::ilike("label", "rust%"))).await.unwrap().len(), 2);
        assert_eq!(
            driver
                .execute(&select(Filter::is_in("label", vec![json!("go"), json!("java")])))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn injected_failures_come_first() {
        let driver = MemoryDriver::new();
        driver.fail_next(DriverError::with_code("ECONNREFUSED", "refused"));
        let err = driver.execute(&insert_labels(&tags(), &["a"], None)).await.unwrap_err();
        assert_eq!(err.code(), Some("ECONNREFUSED"));
        assert!(driver.rows("tags").is_empty());
    }

    #[tokio::test]
    async fn foreign_keys_restrict_and_cascade() {
        let driver = MemoryDriver::new();
        let parents = tags();
        let mut col = ColumnDef::new("tag_id", ColumnType::Integer).not_null().references("tags", "id");
        if let Some(fk) = col.references.as_mut() {
            fk.on_delete = Some("CASCADE".into());
        }
        let children = Arc::new(
            TableDef::builder("post_tags")
                .column(ColumnDef::new("id", ColumnType::Serial).primary_key())
                .column(col)
                .build()
                .unwrap(),
        );
        driver.register(children.clone());
        driver.execute(&insert_labels(&parents, &["a"], None)).await.unwrap();
        let link = |tag: i64| {
            Statement::Insert(InsertStatement {
                table: children.clone(),
                columns: vec!["tag_id".into()],
                rows: vec![vec![Some(json!(tag))]],
                on_conflict: None,
                returning: vec![],
            })
        };
        assert_eq!(driver.execute(&link(9)).await.unwrap_err().code(), Some("23503"));
        driver.execute(&link(1)).await.unwrap();
        driver
            .execute(&Statement::Delete(DeleteStatement {
                table: parents.clone(),
                filter: Some(Filter::eq("id", 1)),
                returning: vec![],
            }))
            .await
            .unwrap();
        assert!(driver.rows("post_tags").is_empty());
    }
}
