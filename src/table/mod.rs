//! Generic CRUD executor bound to one table.
//!
//! Every operation takes explicit identifiers so authorization-relevant
//! filters stay visible at the call site. All statements go through
//! [`TableOperations::execute`], the only place driver errors are
//! interpreted.

mod conflict;
mod query;

pub use conflict::{ConflictTarget, OnConflict};
pub use query::{Identifier, Pagination, DEFAULT_PAGE_SIZE, MAX_PAGE, MAX_PAGE_SIZE};

use crate::config::TableDef;
use crate::driver::{Driver, Row};
use crate::error::{codes, db, AppError, ErrorLayer};
use crate::sql::*;
use conflict::unknown_column;
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct GetFirstParams {
    pub identifiers: Vec<Identifier>,
    /// Projection; empty returns every column.
    pub columns: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct GetManyParams {
    pub identifiers: Vec<Identifier>,
    /// Caller-supplied predicate, applied after the identifiers.
    pub filters: Option<Filter>,
    pub order_by: Vec<OrderTerm>,
    pub pagination: Option<Pagination>,
    pub columns: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct CreateParams {
    pub data: Row,
    pub return_columns: Vec<String>,
    pub on_conflict: Option<OnConflict>,
}

#[derive(Clone, Debug)]
pub struct CreateManyParams {
    pub data: Vec<Row>,
    /// Merged into every row before insertion.
    pub override_values: Row,
    pub return_columns: Vec<String>,
    pub on_conflict: OnConflict,
}

impl Default for CreateManyParams {
    fn default() -> Self {
        CreateManyParams {
            data: Vec::new(),
            override_values: Row::new(),
            return_columns: Vec::new(),
            on_conflict: OnConflict::ignore(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct UpdateParams {
    pub identifiers: Vec<Identifier>,
    pub data: Row,
    pub return_columns: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct IdentifiedParams {
    pub identifiers: Vec<Identifier>,
    pub return_columns: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct RemoveParams {
    pub identifiers: Vec<Identifier>,
    pub soft_delete: bool,
    pub return_columns: Vec<String>,
}

impl Default for RemoveParams {
    fn default() -> Self {
        RemoveParams {
            identifiers: Vec::new(),
            soft_delete: true,
            return_columns: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct TableOperations {
    table: Arc<TableDef>,
    driver: Arc<dyn Driver>,
}

impl TableOperations {
    pub fn new(table: Arc<TableDef>, driver: Arc<dyn Driver>) -> Self {
        TableOperations { table, driver }
    }

    pub fn table(&self) -> &Arc<TableDef> {
        &self.table
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// At most one row; `None` when nothing matches.
    pub async fn get_first_record(&self, params: GetFirstParams) -> Result<Option<Row>, AppError> {
        self.check_columns(&params.columns)?;
        let filter = self.identifier_filter(&params.identifiers)?;
        let rows = self
            .execute(
                "getFirstRecord",
                Statement::Select(SelectStatement {
                    table: self.table.clone(),
                    columns: params.columns,
                    filter,
                    order_by: Vec::new(),
                    limit: Some(1),
                    offset: None,
                }),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Identifiers, then filters, then ordering, then pagination.
    pub async fn get_many_records(&self, params: GetManyParams) -> Result<Vec<Row>, AppError> {
        self.check_columns(&params.columns)?;
        for term in &params.order_by {
            self.check_column(&term.field)?;
        }
        let mut parts = self.identifier_filters(&params.identifiers)?;
        if let Some(f) = params.filters {
            for field in f.fields() {
                self.check_column(field)?;
            }
            parts.push(f);
        }
        let (limit, offset) = match params.pagination {
            Some(p) => (Some(p.limit()), Some(p.offset())),
            None => (None, None),
        };
        self.execute(
            "getManyRecords",
            Statement::Select(SelectStatement {
                table: self.table.clone(),
                columns: params.columns,
                filter: conjoin(parts),
                order_by: params.order_by,
                limit,
                offset,
            }),
        )
        .await
    }

    /// The inserted or conflict-resolved row. `None` when the conflict policy
    /// skipped the row.
    pub async fn create_record(&self, params: CreateParams) -> Result<Option<Row>, AppError> {
        let rows = self
            .insert(
                "createRecord",
                vec![params.data],
                params.return_columns,
                params.on_conflict.as_ref(),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn create_many_records(&self, params: CreateManyParams) -> Result<Vec<Row>, AppError> {
        if params.data.is_empty() {
            return Ok(Vec::new());
        }
        let rows = params
            .data
            .into_iter()
            .map(|mut row| {
                for (k, v) in &params.override_values {
                    row.insert(k.clone(), v.clone());
                }
                row
            })
            .collect();
        self.insert(
            "createManyRecords",
            rows,
            params.return_columns,
            Some(&params.on_conflict),
        )
        .await
    }

    /// First updated row, or `None` when nothing matched.
    pub async fn update_record(&self, params: UpdateParams) -> Result<Option<Row>, AppError> {
        let rows = self.update("updateRecord", params).await?;
        Ok(rows.into_iter().next())
    }

    pub async fn update_many_records(&self, params: UpdateParams) -> Result<Vec<Row>, AppError> {
        self.update("updateManyRecords", params).await
    }

    pub async fn deactivate_record(&self, params: IdentifiedParams) -> Result<Option<Row>, AppError> {
        self.set_active("deactivateRecord", params, false).await
    }

    pub async fn activate_record(&self, params: IdentifiedParams) -> Result<Option<Row>, AppError> {
        self.set_active("activateRecord", params, true).await
    }

    /// Soft delete (deactivate) by default; hard delete otherwise.
    pub async fn remove_record(&self, params: RemoveParams) -> Result<Option<Row>, AppError> {
        let target = IdentifiedParams {
            identifiers: params.identifiers,
            return_columns: params.return_columns,
        };
        if params.soft_delete {
            self.deactivate_record(target).await
        } else {
            self.delete_record(target).await
        }
    }

    /// Physically remove matching rows; returns the first one.
    pub async fn delete_record(&self, params: IdentifiedParams) -> Result<Option<Row>, AppError> {
        self.check_columns(&params.return_columns)?;
        let filter = self.write_filter("deleteRecord", &params.identifiers)?;
        let rows = self
            .execute(
                "deleteRecord",
                Statement::Delete(DeleteStatement {
                    table: self.table.clone(),
                    filter: Some(filter),
                    returning: params.return_columns,
                }),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Run one statement, translating driver failures into `DB.*` errors
    /// carrying the table and operation.
    pub async fn execute(&self, operation: &str, statement: Statement) -> Result<Vec<Row>, AppError> {
        tracing::debug!(
            table = self.table.name(),
            operation,
            kind = statement.kind(),
            "table operation"
        );
        self.driver
            .execute(&statement)
            .await
            .map_err(|e| db::translate(e, self.table.name(), operation))
    }

    async fn insert(
        &self,
        operation: &str,
        rows: Vec<Row>,
        return_columns: Vec<String>,
        on_conflict: Option<&OnConflict>,
    ) -> Result<Vec<Row>, AppError> {
        self.check_columns(&return_columns)?;
        for row in &rows {
            for key in row.keys() {
                self.check_column(key)?;
            }
        }
        // Column order follows the descriptor; rows missing a column get DEFAULT.
        let mut columns: Vec<String> = self
            .table
            .columns()
            .iter()
            .filter(|c| rows.iter().any(|r| r.contains_key(&c.name)))
            .map(|c| c.name.clone())
            .collect();
        let mut values: Vec<Vec<Option<Value>>> = rows
            .iter()
            .map(|r| columns.iter().map(|c| r.get(c).cloned()).collect())
            .collect();
        if columns.is_empty() {
            if let Some(first) = self.table.columns().first() {
                columns.push(first.name.clone());
                values = rows.iter().map(|_| vec![None]).collect();
            }
        }
        let on_conflict = match on_conflict {
            Some(policy) => policy.clause(&self.table, &columns)?,
            None => None,
        };
        self.execute(
            operation,
            Statement::Insert(InsertStatement {
                table: self.table.clone(),
                columns,
                rows: values,
                on_conflict,
                returning: return_columns,
            }),
        )
        .await
    }

    async fn update(&self, operation: &str, params: UpdateParams) -> Result<Vec<Row>, AppError> {
        self.check_columns(&params.return_columns)?;
        let filter = self.write_filter(operation, &params.identifiers)?;
        if params.data.is_empty() {
            return self
                .execute(
                    operation,
                    Statement::Select(SelectStatement {
                        table: self.table.clone(),
                        columns: params.return_columns,
                        filter: Some(filter),
                        order_by: Vec::new(),
                        limit: None,
                        offset: None,
                    }),
                )
                .await;
        }
        let mut set = Vec::with_capacity(params.data.len() + 1);
        for c in self.table.columns() {
            if let Some(v) = params.data.get(&c.name) {
                set.push((c.name.clone(), SetValue::Value(v.clone())));
            }
        }
        if let Some(key) = params.data.keys().find(|k| !self.table.has_column(k)) {
            return Err(unknown_column(&self.table, key));
        }
        self.push_touch(&mut set);
        self.execute(
            operation,
            Statement::Update(UpdateStatement {
                table: self.table.clone(),
                set,
                filter: Some(filter),
                returning: params.return_columns,
            }),
        )
        .await
    }

    async fn set_active(&self, operation: &str, params: IdentifiedParams, active: bool) -> Result<Option<Row>, AppError> {
        let Some(column) = self.table.active_column() else {
            return AppError::operation(codes::operation::SOFT_DELETE_UNSUPPORTED)
                .message(format!("{} has no active column", self.table.name()))
                .layer(ErrorLayer::Database)
                .detail("table", self.table.name())
                .detail("operation", operation)
                .throw();
        };
        self.check_columns(&params.return_columns)?;
        let filter = self.write_filter(operation, &params.identifiers)?;
        let mut set = vec![(column.to_string(), SetValue::Value(Value::Bool(active)))];
        self.push_touch(&mut set);
        let rows = self
            .execute(
                operation,
                Statement::Update(UpdateStatement {
                    table: self.table.clone(),
                    set,
                    filter: Some(filter),
                    returning: params.return_columns,
                }),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    fn push_touch(&self, set: &mut Vec<(String, SetValue)>) {
        if let Some(touch) = self.table.touch_column() {
            if !set.iter().any(|(c, _)| c == touch) {
                set.push((touch.to_string(), SetValue::CurrentTimestamp));
            }
        }
    }

    fn check_column(&self, column: &str) -> Result<(), AppError> {
        if self.table.has_column(column) {
            Ok(())
        } else {
            Err(unknown_column(&self.table, column))
        }
    }

    fn check_columns(&self, columns: &[String]) -> Result<(), AppError> {
        columns.iter().try_for_each(|c| self.check_column(c))
    }

    fn identifier_filters(&self, identifiers: &[Identifier]) -> Result<Vec<Filter>, AppError> {
        identifiers
            .iter()
            .map(|id| {
                self.check_column(&id.field)?;
                Ok(id.to_filter())
            })
            .collect()
    }

    fn identifier_filter(&self, identifiers: &[Identifier]) -> Result<Option<Filter>, AppError> {
        Ok(conjoin(self.identifier_filters(identifiers)?))
    }

    /// Writes must be scoped: an empty identifier list would touch every row.
    fn write_filter(&self, operation: &str, identifiers: &[Identifier]) -> Result<Filter, AppError> {
        match self.identifier_filter(identifiers)? {
            Some(f) => Ok(f),
            None => AppError::validation(codes::validation::MISSING_IDENTIFIERS)
                .message(format!("{} on {} requires identifiers", operation, self.table.name()))
                .layer(ErrorLayer::Database)
                .detail("table", self.table.name())
                .detail("operation", operation)
                .throw(),
        }
    }
}
