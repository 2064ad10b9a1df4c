//! Example consumer: a posts API on top of strata-sdk.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Identities come from upstream auth middleware. Behind a gateway that owns
//! `X-User-ID`, set `TRUST_USER_HEADER=true` to accept that header instead.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use strata_sdk::{
    apply_migrations, init_tracing, load_tables_from_dir, ops, request_context, success_value, trust_user_header,
    AppError, Contract, FieldSchema, Identity, PgDriver, Repository, Resource, Schema, Service, Settings,
    TableOperations,
};
use tokio::net::TcpListener;

type Posts = State<Arc<Service>>;

async fn create_post(State(posts): Posts, identity: Identity, Json(body): Json<Value>) -> Result<impl IntoResponse, AppError> {
    let created = posts.call_for(&identity, ops::CREATE, json!({ "data": body })).await?;
    Ok(success_value(StatusCode::CREATED, created))
}

async fn list_posts(
    State(posts): Posts,
    identity: Identity,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let mut input = Map::new();
    let mut pagination = Map::new();
    for key in ["page", "page_size"] {
        if let Some(n) = params.get(key).and_then(|v| v.parse::<i64>().ok()) {
            pagination.insert(key.to_string(), json!(n));
        }
    }
    if !pagination.is_empty() {
        input.insert("pagination".into(), Value::Object(pagination));
    }
    if let Some(title) = params.get("title") {
        input.insert("filters".into(), json!({ "title": title }));
    }
    if let Some(order) = params.get("order") {
        let term = match order.strip_prefix('-') {
            Some(field) => json!({ "field": field, "direction": "desc" }),
            None => json!({ "field": order, "direction": "asc" }),
        };
        input.insert("ordering".into(), json!([term]));
    }
    let rows = posts.call_for(&identity, ops::GET_MANY, Value::Object(input)).await?;
    Ok(success_value(StatusCode::OK, rows))
}

async fn get_post(State(posts): Posts, identity: Identity, Path(id): Path<String>) -> Result<impl IntoResponse, AppError> {
    let row = posts.call_for(&identity, ops::GET_BY_ID, json!({ "ids": { "id": id } })).await?;
    Ok(success_value(StatusCode::OK, row))
}

async fn update_post(
    State(posts): Posts,
    identity: Identity,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let row = posts
        .call_for(&identity, ops::UPDATE_BY_ID, json!({ "ids": { "id": id }, "data": body }))
        .await?;
    Ok(success_value(StatusCode::OK, row))
}

async fn remove_post(State(posts): Posts, identity: Identity, Path(id): Path<String>) -> Result<impl IntoResponse, AppError> {
    let row = posts.call_for(&identity, ops::REMOVE_BY_ID, json!({ "ids": { "id": id } })).await?;
    Ok(success_value(StatusCode::OK, row))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_tracing("strata_sdk=info,example_consumer=info");

    let settings = Settings::from_env()?;
    let pool = settings.database.connect().await?;
    let schema = settings.database.schema.clone();

    let tables_dir = std::env::var("TABLES_DIR").unwrap_or_else(|_| "example_consumer/tables".into());
    let tables = load_tables_from_dir(&tables_dir).await?;
    apply_migrations(&pool, &tables, Some(&schema)).await?;

    let table = tables
        .into_iter()
        .find(|t| t.name() == "posts")
        .ok_or("posts.json missing from the tables directory")?;
    let table = Arc::new(table);
    let driver = Arc::new(PgDriver::new(pool).with_default_schema(schema));

    let resource = Resource::builder(table.clone())
        .set_user_id("user_id")
        .restrict_create_data_fields(&["title", "slug", "content"])
        .restrict_update_data_fields(&["title", "content"])
        .restrict_return_cols_fields(&["id", "title", "slug", "content", "is_active", "created_at", "updated_at"])
        .enable_pagination()
        .enable_ordering(&["title", "created_at"])
        .enable_filters(Schema::new().field("title", FieldSchema::string()))
        .transform(|mut s| {
            s.create_data = s
                .create_data
                .map_field("slug", |f| f.pattern("^[a-z0-9]+(-[a-z0-9]+)*$"));
            s
        })
        .done()?;
    let contract = Contract::builder(resource).register_all_standard().done()?;
    let repository = Repository::builder(contract, TableOperations::new(table, driver))
        .register_standard_operations()
        .done()?;
    let service = Service::builder(repository).register_standard_operations().done()?;

    let mut app = Router::new()
        .route("/posts", get(list_posts).post(create_post))
        .route("/posts/:id", get(get_post).patch(update_post).delete(remove_post))
        .with_state(service);
    if settings.trust_user_header {
        tracing::warn!("accepting X-User-ID from clients; only safe behind a gateway");
        app = app.layer(middleware::from_fn(trust_user_header));
    }
    let app = app.layer(middleware::from_fn_with_state(settings.environment, request_context));

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".into());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("posts API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
