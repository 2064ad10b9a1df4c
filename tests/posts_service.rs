//! The full posts pipeline over the in-memory driver: table descriptor,
//! resource, contract, repository and service.

use serde_json::{json, Value};
use std::sync::Arc;
use strata_sdk::config::{ColumnDef, ColumnType, TableDef};
use strata_sdk::table::{GetFirstParams, Identifier};
use strata_sdk::{
    ops, AppError, Contract, ErrorCategory, FieldSchema, Identity, MemoryDriver, NullPolicy, Repository, Resource,
    Schema, Service, TableOperations,
};

const ALICE: &str = "0b9a6c1e-1f4e-4c43-9d1c-6f0a1b2c3d4e";
const BOB: &str = "7e3d2c1b-0a9f-4e8d-8c7b-6a5f4e3d2c1b";

fn posts_table() -> Arc<TableDef> {
    Arc::new(
        TableDef::builder("posts")
            .column(ColumnDef::new("id", ColumnType::Uuid).primary_key().default_expr("gen_random_uuid()"))
            .column(ColumnDef::new("user_id", ColumnType::Uuid).not_null())
            .column(ColumnDef::new("title", ColumnType::Varchar(Some(120))).not_null())
            .column(ColumnDef::new("slug", ColumnType::Text).not_null())
            .column(ColumnDef::new("content", ColumnType::Text))
            .column(ColumnDef::new("is_active", ColumnType::Boolean).not_null().default_value(true))
            .column(ColumnDef::new("created_at", ColumnType::TimestampTz).not_null().default_expr("now()"))
            .column(ColumnDef::new("updated_at", ColumnType::TimestampTz).not_null().default_expr("now()"))
            .unique(["user_id", "slug"])
            .build()
            .unwrap(),
    )
}

struct Posts {
    driver: Arc<MemoryDriver>,
    table: TableOperations,
    service: Arc<Service>,
}

fn posts() -> Posts {
    let table = posts_table();
    let driver = Arc::new(MemoryDriver::new());
    let ops_engine = TableOperations::new(table.clone(), driver.clone());

    let resource = Resource::builder(table)
        .set_user_id("user_id")
        .restrict_create_data_fields(&["title", "slug", "content"])
        .restrict_update_data_fields(&["title", "content"])
        .restrict_return_cols_fields(&["id", "user_id", "title", "slug", "content", "is_active"])
        .enable_pagination()
        .enable_ordering(&["title", "created_at"])
        .enable_filters(
            Schema::new()
                .field("title", FieldSchema::string())
                .field("is_active", FieldSchema::boolean()),
        )
        .transform(|mut s| {
            s.create_data = s.create_data.map_field("title", |f| f.min_length(1));
            s
        })
        .done()
        .unwrap();
    let contract = Contract::builder(resource)
        .register_all_standard()
        .add_operation("publishedCount", |_| {
            strata_sdk::OperationSchemas::with_input(
                Schema::new().field("user_id", FieldSchema::uuid()),
            )
        })
        .done()
        .unwrap();
    let repository = Repository::builder(contract, ops_engine.clone())
        .register_standard_operations()
        .done()
        .unwrap();
    let service = Service::builder(repository)
        .register_standard_operations()
        .add_function("publishedCount", NullPolicy::Return, |repo, input| async move {
            let rows = repo
                .call(ops::GET_MANY, json!({ "user_id": input["user_id"], "filters": { "is_active": true } }))
                .await?;
            Ok::<_, anyhow::Error>(json!(rows.as_array().map(Vec::len).unwrap_or(0)))
        })
        .done()
        .unwrap();
    Posts {
        driver,
        table: ops_engine,
        service,
    }
}

async fn create(service: &Service, owner: &str, title: &str, slug: &str) -> Value {
    service
        .call_for(
            &Identity::new(owner),
            ops::CREATE,
            json!({ "data": { "title": title, "slug": slug } }),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn create_read_update_remove() {
    let Posts { driver, service, .. } = posts();
    let alice = Identity::new(ALICE);

    let created = create(&service, ALICE, "Hello", "hello").await;
    assert_eq!(created["user_id"], json!(ALICE));
    assert_eq!(created["is_active"], json!(true));
    assert!(created.get("created_at").is_none());
    let id = created["id"].clone();

    let fetched = service.call_for(&alice, ops::GET_BY_ID, json!({ "ids": { "id": id } })).await.unwrap();
    assert_eq!(fetched, created);

    let updated = service
        .call_for(
            &alice,
            ops::UPDATE_BY_ID,
            json!({ "ids": { "id": id }, "data": { "title": "Hello again", "slug": "ignored" } }),
        )
        .await
        .unwrap();
    assert_eq!(updated["title"], json!("Hello again"));
    assert_eq!(updated["slug"], json!("hello"));

    let removed = service.call_for(&alice, ops::REMOVE_BY_ID, json!({ "ids": { "id": id } })).await.unwrap();
    assert_eq!(removed["is_active"], json!(false));
    assert_eq!(driver.rows("posts").len(), 1);

    let active = service
        .call_for(&alice, ops::GET_MANY, json!({ "filters": { "is_active": true } }))
        .await
        .unwrap();
    assert_eq!(active, json!([]));
}

#[tokio::test]
async fn identifier_scoping_hides_other_owners_rows() {
    let Posts { service, .. } = posts();
    let created = create(&service, ALICE, "Mine", "mine").await;
    let bob = Identity::new(BOB);

    let err = service
        .call_for(&bob, ops::GET_BY_ID, json!({ "ids": { "id": created["id"] } }))
        .await
        .unwrap_err();
    assert_eq!(err.key(), "RESOURCE.NOT_FOUND");

    let err = service
        .call_for(&bob, ops::UPDATE_BY_ID, json!({ "ids": { "id": created["id"] }, "data": { "title": "Theirs" } }))
        .await
        .unwrap_err();
    assert_eq!(err.key(), "RESOURCE.NOT_FOUND");

    let listed = service.call_for(&bob, ops::GET_MANY, json!({})).await.unwrap();
    assert_eq!(listed, json!([]));
}

#[tokio::test]
async fn null_and_throw_see_the_same_input() {
    let Posts { table, service, .. } = posts();
    let missing = "11111111-2222-4333-8444-555555555555";

    let row = table
        .get_first_record(GetFirstParams {
            identifiers: vec![Identifier::new("id", missing)],
            columns: Vec::new(),
        })
        .await
        .unwrap();
    assert!(row.is_none());

    let err = service
        .call_for(&Identity::new(ALICE), ops::GET_BY_ID, json!({ "ids": { "id": missing } }))
        .await
        .unwrap_err();
    assert_eq!(err.key(), "RESOURCE.NOT_FOUND");
    assert_eq!(err.http_status(), 404);
    assert_eq!(err.detail("operation"), Some(&json!("getById")));
    assert_eq!(err.detail("resource"), Some(&json!("posts")));
}

#[tokio::test]
async fn unique_violation_keeps_its_chain() {
    let Posts { service, .. } = posts();
    create(&service, ALICE, "First", "same").await;

    let err = service
        .call_for(
            &Identity::new(ALICE),
            ops::CREATE,
            json!({ "data": { "title": "Second", "slug": "same" } }),
        )
        .await
        .unwrap_err();
    assert_eq!(err.key(), "DB.UNIQUE_VIOLATION");
    assert_eq!(err.http_status(), 409);
    assert_eq!(err.root_cause().code(), "UNIQUE_VIOLATION");
    assert!(err.chain_depth() >= 2);
    assert!(err.has_in_chain(|e| e.is(ErrorCategory::Db, "UNIQUE_VIOLATION")));

    // Same slug under another owner is fine.
    create(&service, BOB, "Second", "same").await;
}

#[tokio::test]
async fn invalid_input_is_rejected_before_the_table() {
    let Posts { driver, service, .. } = posts();
    let alice = Identity::new(ALICE);

    let err = service
        .call_for(&alice, ops::CREATE, json!({ "data": { "title": "", "slug": "empty" } }))
        .await
        .unwrap_err();
    assert_eq!(err.key(), "VALIDATION.INVALID_FORMAT");
    assert_eq!(err.http_status(), 400);

    let err = service
        .call_for(&alice, ops::GET_BY_ID, json!({ "ids": { "id": "not-a-uuid" } }))
        .await
        .unwrap_err();
    assert_eq!(err.key(), "VALIDATION.INVALID_FORMAT");

    let err = service
        .call_for(&alice, ops::GET_MANY, json!({ "ordering": [{ "field": "slug", "direction": "asc" }] }))
        .await
        .unwrap_err();
    assert_eq!(err.key(), "VALIDATION.INVALID_FORMAT");

    assert!(driver.rows("posts").is_empty());
}

#[tokio::test]
async fn listing_orders_and_pages() {
    let Posts { service, .. } = posts();
    let alice = Identity::new(ALICE);
    for (title, slug) in [("b", "b"), ("c", "c"), ("a", "a")] {
        create(&service, ALICE, title, slug).await;
    }

    let page = service
        .call_for(
            &alice,
            ops::GET_MANY,
            json!({
                "ordering": [{ "field": "title", "direction": "desc" }],
                "pagination": { "page": 1, "page_size": 2 }
            }),
        )
        .await
        .unwrap();
    let titles: Vec<&str> = page.as_array().unwrap().iter().map(|r| r["title"].as_str().unwrap()).collect();
    assert_eq!(titles, vec!["c", "b"]);

    let clamped = service
        .call_for(&alice, ops::GET_MANY, json!({ "pagination": { "page": 0, "page_size": -5 } }))
        .await
        .unwrap();
    assert_eq!(clamped, json!([]));
}

#[tokio::test]
async fn oversized_pages_are_clamped_not_rejected() {
    let Posts { service, .. } = posts();
    let alice = Identity::new(ALICE);
    create(&service, ALICE, "Only", "only").await;

    for page in [json!(18446744073709551615u64), json!(i64::MAX)] {
        let rows = service
            .call_for(&alice, ops::GET_MANY, json!({ "pagination": { "page": page, "page_size": 10 } }))
            .await
            .unwrap();
        assert_eq!(rows, json!([]));
    }

    let err = service
        .call_for(&alice, ops::GET_MANY, json!({ "ordering": [{ "field": "title", "direction": "sideways" }] }))
        .await
        .unwrap_err();
    assert_eq!(err.key(), "VALIDATION.INVALID_FORMAT");
}

#[tokio::test]
async fn custom_service_functions_compose_repository_calls() {
    let Posts { service, .. } = posts();
    let alice = Identity::new(ALICE);
    let first = create(&service, ALICE, "One", "one").await;
    create(&service, ALICE, "Two", "two").await;
    service.call_for(&alice, ops::REMOVE_BY_ID, json!({ "ids": { "id": first["id"] } })).await.unwrap();

    let count: usize = service.call_as("publishedCount", json!({ "user_id": ALICE })).await.unwrap();
    assert_eq!(count, 1);

    let err: AppError = service.call("publishedCount", json!({ "user_id": 5 })).await.unwrap_err();
    assert_eq!(err.key(), "VALIDATION.INVALID_FORMAT");
}
