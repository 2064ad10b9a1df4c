//! Repositories: named query functions bound to one resource and table.
//!
//! Every registered function is composed at `done()` from the raw query and
//! two middlewares: input validation against the contract's query schema,
//! then translation of driver errors that escaped a custom query.

use crate::contract::{ops, Contract, OperationSchemas};
use crate::driver::{DriverError, Row};
use crate::error::{codes, db, AppError, ConfigError, ErrorLayer};
use crate::resource::Resource;
use crate::schema::{invalid_format, Schema, ValidationIssue};
use crate::sql::{conjoin, Filter, OrderTerm};
use crate::table::*;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A repository function: validated input in, JSON out.
pub type QueryFn = Arc<dyn Fn(QueryContext, Value) -> BoxFuture<anyhow::Result<Value>> + Send + Sync>;

/// What a query function gets to work with.
#[derive(Clone)]
pub struct QueryContext {
    pub table: TableOperations,
    pub resource: Arc<Resource>,
}

impl QueryContext {
    /// Identifiers from the `ids` object, in the resource's id order.
    pub fn ids(&self, input: &Value) -> Vec<Identifier> {
        let ids = input.get("ids").and_then(Value::as_object);
        self.resource
            .ids()
            .iter()
            .filter_map(|field| {
                let value = ids?.get(field)?;
                Some(Identifier::new(field.clone(), value.clone()))
            })
            .collect()
    }

    /// The ownership identifier, when the resource declares one and the
    /// input carries it.
    pub fn owner(&self, input: &Value) -> Option<Identifier> {
        let field = self.resource.user_id()?;
        let value = input.get(field)?;
        Some(Identifier::new(field, value.clone()))
    }

    /// Ids then owner.
    pub fn scope(&self, input: &Value) -> Vec<Identifier> {
        let mut out = self.ids(input);
        out.extend(self.owner(input));
        out
    }

    pub fn return_cols(&self) -> Vec<String> {
        self.resource.return_cols().to_vec()
    }
}

/// Equality per key; arrays become `IN`, `null` becomes `IS NULL`.
pub fn filters_from_object(filters: &Map<String, Value>) -> Option<Filter> {
    conjoin(filters.iter().map(|(field, value)| match value {
        Value::Null => Filter::is_null(field.clone()),
        Value::Array(values) => Filter::is_in(field.clone(), values.clone()),
        other => Filter::eq(field.clone(), other.clone()),
    }))
}

fn one(row: Option<Row>) -> Value {
    row.map(Value::Object).unwrap_or(Value::Null)
}

fn many(rows: Vec<Row>) -> Value {
    Value::Array(rows.into_iter().map(Value::Object).collect())
}

fn object(input: &Value, key: &str) -> Row {
    input
        .get(key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

async fn create(ctx: QueryContext, input: Value) -> anyhow::Result<Value> {
    let mut data = object(&input, "data");
    if let Some(owner) = ctx.owner(&input) {
        data.insert(owner.field, owner.value);
    }
    let row = ctx
        .table
        .create_record(CreateParams {
            data,
            return_columns: ctx.return_cols(),
            on_conflict: None,
        })
        .await?;
    Ok(one(row))
}

async fn create_many(ctx: QueryContext, input: Value) -> anyhow::Result<Value> {
    let data = input
        .get("data")
        .and_then(Value::as_array)
        .map(|rows| rows.iter().filter_map(|r| r.as_object().cloned()).collect())
        .unwrap_or_default();
    let mut override_values = Row::new();
    if let Some(owner) = ctx.owner(&input) {
        override_values.insert(owner.field, owner.value);
    }
    let rows = ctx
        .table
        .create_many_records(CreateManyParams {
            data,
            override_values,
            return_columns: ctx.return_cols(),
            ..Default::default()
        })
        .await?;
    Ok(many(rows))
}

/// Deserialize one query-shaped input key; a mismatch is the caller's fault.
fn query_arg<T: serde::de::DeserializeOwned>(input: &Value, key: &str) -> Result<Option<T>, AppError> {
    match input.get(key) {
        Some(v) if !v.is_null() => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| invalid_format(vec![ValidationIssue::new(key, e.to_string())], ErrorLayer::Repository)),
        _ => Ok(None),
    }
}

async fn get_many(ctx: QueryContext, input: Value) -> anyhow::Result<Value> {
    let filters = input
        .get("filters")
        .and_then(Value::as_object)
        .and_then(filters_from_object);
    let pagination = query_arg::<Pagination>(&input, "pagination")?
        .or_else(|| ctx.resource.has_pagination().then(Pagination::default));
    let order_by = query_arg::<Vec<OrderTerm>>(&input, "ordering")?.unwrap_or_default();
    let rows = ctx
        .table
        .get_many_records(GetManyParams {
            identifiers: ctx.owner(&input).into_iter().collect(),
            filters,
            order_by,
            pagination,
            columns: ctx.return_cols(),
        })
        .await?;
    Ok(many(rows))
}

async fn get_by_id(ctx: QueryContext, input: Value) -> anyhow::Result<Value> {
    let row = ctx
        .table
        .get_first_record(GetFirstParams {
            identifiers: ctx.scope(&input),
            columns: ctx.return_cols(),
        })
        .await?;
    Ok(one(row))
}

async fn update_by_id(ctx: QueryContext, input: Value) -> anyhow::Result<Value> {
    let row = ctx
        .table
        .update_record(UpdateParams {
            identifiers: ctx.scope(&input),
            data: object(&input, "data"),
            return_columns: ctx.return_cols(),
        })
        .await?;
    Ok(one(row))
}

async fn remove_by_id(ctx: QueryContext, input: Value) -> anyhow::Result<Value> {
    let soft_delete = ctx.table.table().active_column().is_some();
    let row = ctx
        .table
        .remove_record(RemoveParams {
            identifiers: ctx.scope(&input),
            soft_delete,
            return_columns: ctx.return_cols(),
        })
        .await?;
    Ok(one(row))
}

fn boxed<F, Fut>(f: F) -> QueryFn
where
    F: Fn(QueryContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(move |ctx: QueryContext, input: Value| -> BoxFuture<anyhow::Result<Value>> {
        Box::pin(f(ctx, input))
    })
}

/// Reject input that does not match `schema` before anything runs; the
/// inner function receives the cleaned value.
pub fn with_validation(operation: &str, schema: Schema, inner: QueryFn) -> QueryFn {
    let operation = operation.to_string();
    Arc::new(move |ctx: QueryContext, input: Value| -> BoxFuture<anyhow::Result<Value>> {
        let checked = schema.validate(&input);
        let inner = inner.clone();
        let operation = operation.clone();
        let resource = ctx.resource.name().to_string();
        Box::pin(async move {
            match checked {
                Ok(clean) => inner(ctx, clean).await,
                Err(issues) => {
                    let err = invalid_format(issues, ErrorLayer::Repository)
                        .with_detail("operation", operation)
                        .with_detail("resource", resource);
                    Err(err.into())
                }
            }
        })
    })
}

/// Driver errors raised by custom queries become `DB.*` errors; everything
/// else passes through.
pub fn with_translation(operation: &str, inner: QueryFn) -> QueryFn {
    let operation = operation.to_string();
    Arc::new(move |ctx: QueryContext, input: Value| -> BoxFuture<anyhow::Result<Value>> {
        let inner = inner.clone();
        let operation = operation.clone();
        let table = ctx.table.table().name().to_string();
        Box::pin(async move {
            inner(ctx, input).await.map_err(|err| {
                let err = match err.downcast::<sqlx::Error>() {
                    Ok(sqlx) => DriverError::from(sqlx).into(),
                    Err(other) => other,
                };
                match err.downcast::<DriverError>() {
                    Ok(driver) => db::translate(driver, &table, &operation).into(),
                    Err(other) => other,
                }
            })
        })
    })
}

#[derive(Clone)]
pub struct RepositoryBuilder {
    contract: Arc<Contract>,
    table: TableOperations,
    queries: BTreeMap<String, QueryFn>,
}

impl RepositoryBuilder {
    pub fn new(contract: Arc<Contract>, table: TableOperations) -> Self {
        RepositoryBuilder {
            contract,
            table,
            queries: BTreeMap::new(),
        }
    }

    /// `create`, `createMany`, `getMany`, `getById`, `updateById` and
    /// `removeById` over the bound table.
    pub fn register_standard_operations(&self) -> Self {
        let mut next = self.clone();
        let standard: [(&str, QueryFn); 6] = [
            (ops::CREATE, boxed(create)),
            (ops::CREATE_MANY, boxed(create_many)),
            (ops::GET_MANY, boxed(get_many)),
            (ops::GET_BY_ID, boxed(get_by_id)),
            (ops::UPDATE_BY_ID, boxed(update_by_id)),
            (ops::REMOVE_BY_ID, boxed(remove_by_id)),
        ];
        for (key, f) in standard {
            next.queries.insert(key.to_string(), f);
        }
        next
    }

    /// Register a custom query. Its input schema comes from the contract.
    pub fn add_query<F, Fut>(&self, key: &str, f: F) -> Self
    where
        F: Fn(QueryContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let mut next = self.clone();
        next.queries.insert(key.to_string(), boxed(f));
        next
    }

    pub fn done(&self) -> Result<Arc<Repository>, ConfigError> {
        let resource = self.contract.resource().clone();
        if resource.table().name() != self.table.table().name() {
            return Err(ConfigError::Validation(format!(
                "resource {} is bound to table {}, not {}",
                resource.name(),
                resource.table().name(),
                self.table.table().name()
            )));
        }
        let mut queries = BTreeMap::new();
        for (key, f) in &self.queries {
            let schema = match self.contract.query_schema(key) {
                Some(s) => s.clone(),
                None => OperationSchemas::standard(&resource, key)
                    .and_then(|s| s.query)
                    .ok_or_else(|| ConfigError::Operation {
                        resource: resource.name().to_string(),
                        operation: key.clone(),
                        reason: "no contract schema for query".to_string(),
                    })?,
            };
            let wrapped = with_validation(key, schema, with_translation(key, f.clone()));
            queries.insert(key.clone(), wrapped);
        }
        Ok(Arc::new(Repository {
            context: QueryContext {
                table: self.table.clone(),
                resource,
            },
            contract: self.contract.clone(),
            queries,
        }))
    }
}

impl fmt::Debug for RepositoryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryBuilder")
            .field("table", &self.table.table().name())
            .field("queries", &self.queries.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub struct Repository {
    context: QueryContext,
    contract: Arc<Contract>,
    queries: BTreeMap<String, QueryFn>,
}

impl Repository {
    pub fn builder(contract: Arc<Contract>, table: TableOperations) -> RepositoryBuilder {
        RepositoryBuilder::new(contract, table)
    }

    pub fn resource(&self) -> &Arc<Resource> {
        &self.context.resource
    }

    pub fn contract(&self) -> &Arc<Contract> {
        &self.contract
    }

    pub fn table(&self) -> &TableOperations {
        &self.context.table
    }

    pub fn has(&self, operation: &str) -> bool {
        self.queries.contains_key(operation)
    }

    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.queries.keys().map(String::as_str)
    }

    pub async fn call(&self, operation: &str, input: Value) -> anyhow::Result<Value> {
        let Some(f) = self.queries.get(operation) else {
            return Err(AppError::server(codes::server::UNKNOWN_OPERATION)
                .message(format!("{} has no operation {}", self.resource().name(), operation))
                .layer(ErrorLayer::Repository)
                .detail("operation", operation)
                .detail("resource", self.resource().name())
                .get()
                .into());
        };
        tracing::debug!(resource = self.resource().name(), operation, "repository call");
        f(self.context.clone(), input).await
    }
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("resource", &self.resource().name())
            .field("queries", &self.queries.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ColumnDef, ColumnType, TableDef};
    use crate::driver::MemoryDriver;
    use crate::schema::FieldSchema;
    use serde_json::json;

    const U1: &str = "6f1c1c2e-3a51-4c5e-9a36-5d1f2b3c4d5e";

    fn repository(driver: Arc<MemoryDriver>) -> Arc<Repository> {
        let table = Arc::new(
            TableDef::builder("posts")
                .column(ColumnDef::new("id", ColumnType::Serial).primary_key())
                .column(ColumnDef::new("user_id", ColumnType::Uuid).not_null())
                .column(ColumnDef::new("title", ColumnType::Text).not_null())
                .column(ColumnDef::new("slug", ColumnType::Text).unique())
                .build()
                .unwrap(),
        );
        let resource = Resource::builder(table.clone())
            .set_user_id("user_id")
            .enable_filters(Schema::new().field("title", FieldSchema::string()))
            .done()
            .unwrap();
        let contract = Contract::builder(resource)
            .register_all_standard()
            .add_operation("bySlug", |_| {
                OperationSchemas::with_input(Schema::new().field("slug", FieldSchema::string()))
            })
            .add_operation("raw", |_| OperationSchemas::with_input(Schema::new()))
            .done()
            .unwrap();
        Repository::builder(contract, TableOperations::new(table, driver))
            .register_standard_operations()
            .add_query("bySlug", |ctx, input| async move {
                let slug = input["slug"].clone();
                let row = ctx
                    .table
                    .get_first_record(GetFirstParams {
                        identifiers: vec![Identifier::new("slug", slug)],
                        columns: ctx.return_cols(),
                    })
                    .await?;
                Ok::<_, anyhow::Error>(row.map(Value::Object).unwrap_or(Value::Null))
            })
            .add_query("raw", |_, _| async {
                Err::<Value, _>(anyhow::Error::from(DriverError::with_code("23505", "duplicate")))
            })
            .done()
            .unwrap()
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_the_driver() {
        let driver = Arc::new(MemoryDriver::new());
        let repo = repository(driver.clone());
        let err = repo
            .call(ops::CREATE, json!({ "data": { "title": 5 }, "user_id": U1 }))
            .await
            .unwrap_err()
            .downcast::<AppError>()
            .unwrap();
        assert_eq!(err.key(), "VALIDATION.INVALID_FORMAT");
        assert_eq!(err.detail("operation"), Some(&json!("create")));
        assert!(driver.rows("posts").is_empty());
    }

    #[tokio::test]
    async fn owner_is_injected_and_scopes_reads() {
        let repo = repository(Arc::new(MemoryDriver::new()));
        let created = repo
            .call(ops::CREATE, json!({ "data": { "title": "A", "user_id": "ignored" }, "user_id": U1 }))
            .await
            .unwrap();
        assert_eq!(created["user_id"], json!(U1));

        let other = "00000000-0000-4000-8000-000000000000";
        let mine = repo.call(ops::GET_MANY, json!({ "user_id": U1 })).await.unwrap();
        let theirs = repo.call(ops::GET_MANY, json!({ "user_id": other })).await.unwrap();
        assert_eq!(mine.as_array().unwrap().len(), 1);
        assert!(theirs.as_array().unwrap().is_empty());

        let filtered = repo
            .call(ops::GET_MANY, json!({ "user_id": U1, "filters": { "title": "B" } }))
            .await
            .unwrap();
        assert!(filtered.as_array().unwrap().is_empty());

        let by_id = repo
            .call(ops::GET_BY_ID, json!({ "ids": { "id": created["id"] }, "user_id": other }))
            .await
            .unwrap();
        assert!(by_id.is_null());
    }

    #[tokio::test]
    async fn custom_queries_share_the_table() {
        let repo = repository(Arc::new(MemoryDriver::new()));
        repo.call(ops::CREATE, json!({ "data": { "title": "A", "slug": "a" }, "user_id": U1 }))
            .await
            .unwrap();
        let found = repo.call("bySlug", json!({ "slug": "a" })).await.unwrap();
        assert_eq!(found["title"], json!("A"));
    }

    #[tokio::test]
    async fn escaped_driver_errors_are_translated() {
        let repo = repository(Arc::new(MemoryDriver::new()));
        let err = repo.call("raw", json!({})).await.unwrap_err().downcast::<AppError>().unwrap();
        assert_eq!(err.key(), "DB.UNIQUE_VIOLATION");
        assert_eq!(err.detail("operation"), Some(&json!("raw")));
    }

    #[tokio::test]
    async fn unknown_operations_are_typed() {
        let repo = repository(Arc::new(MemoryDriver::new()));
        let err = repo.call("publish", json!({})).await.unwrap_err().downcast::<AppError>().unwrap();
        assert_eq!(err.key(), "SERVER.UNKNOWN_OPERATION");
    }

    #[test]
    fn custom_query_without_schema_fails_fast() {
        let table = Arc::new(
            TableDef::builder("tags")
                .column(ColumnDef::new("id", ColumnType::Serial).primary_key())
                .build()
                .unwrap(),
        );
        let resource = Resource::builder(table.clone()).done().unwrap();
        let contract = Contract::builder(resource).done().unwrap();
        let err = Repository::builder(contract, TableOperations::new(table, Arc::new(MemoryDriver::new())))
            .add_query("orphan", |_, _| async { Ok::<_, anyhow::Error>(Value::Null) })
            .done()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Operation { ref operation, .. } if operation == "orphan"));
    }
}
