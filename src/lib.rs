//! Strata SDK: schema-driven table, repository and service layers over
//! PostgreSQL, with a categorized error model shared by every layer.
//!
//! A table descriptor ([`TableDef`]) drives the generic
//! [`TableOperations`] engine. A [`Resource`] derives input and output
//! shapes from the descriptor, a [`Contract`] names operations and their
//! schemas, a [`Repository`] binds validated queries to the engine, and a
//! [`Service`] exposes a chosen subset with not-found handling.

pub mod config;
pub mod contract;
pub mod driver;
pub mod error;
pub mod identity;
pub mod middleware;
pub mod migration;
pub mod repository;
pub mod resource;
pub mod response;
pub mod schema;
pub mod service;
pub mod sql;
pub mod table;
pub mod telemetry;

pub use config::{load_table_from_str, load_tables_from_dir, ColumnDef, ColumnType, DatabaseSettings, Environment, Settings, TableDef};
pub use contract::{ops, Contract, OperationSchemas};
pub use driver::{Driver, DriverError, MemoryDriver, PgDriver, Row};
pub use error::{codes, AppError, ConfigError, ErrorCategory, ErrorLayer};
pub use identity::{Identity, MaybeIdentity};
pub use middleware::{request_context, trust_user_header, RequestId};
pub use migration::apply_migrations;
pub use repository::{QueryContext, Repository};
pub use resource::Resource;
pub use response::{success_many, success_one, success_value};
pub use schema::{FieldSchema, Schema};
pub use service::{NullPolicy, Service};
pub use table::{OnConflict, Pagination, TableOperations};
pub use telemetry::init_tracing;
