//! Resource definitions: the schema family derived from one table.
//!
//! A [`ResourceBuilder`] is a value; every method returns a new builder, so a
//! partially configured resource can be branched and reused. `done()` checks
//! every field name against the table and freezes the result.

use crate::config::TableDef;
use crate::error::ConfigError;
use crate::schema::{insert_shape, select_shape, update_shape, FieldKind, FieldSchema, Schema};
use std::fmt;
use std::sync::Arc;

/// Every schema a resource exposes. Handed to `transform` callbacks.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceSchemas {
    pub base: Schema,
    pub create_data: Schema,
    pub update_data: Schema,
    pub upsert_data: Schema,
    pub id: Schema,
    pub user_id: Option<Schema>,
    pub return_cols: Schema,
    pub filters: Option<FieldSchema>,
    pub pagination: Option<FieldSchema>,
    pub ordering: Option<FieldSchema>,
}

type Transform = Arc<dyn Fn(ResourceSchemas) -> ResourceSchemas + Send + Sync>;

#[derive(Clone)]
pub struct ResourceBuilder {
    table: Arc<TableDef>,
    name: String,
    ids: Vec<String>,
    user_id: Option<String>,
    create_fields: Option<Vec<String>>,
    update_fields: Option<Vec<String>>,
    upsert_fields: Option<Vec<String>>,
    all_fields: Option<Vec<String>>,
    return_cols: Option<Vec<String>>,
    pagination: bool,
    ordering: Option<Vec<String>>,
    filters: Option<Schema>,
    transforms: Vec<Transform>,
}

fn owned(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|s| s.to_string()).collect()
}

impl ResourceBuilder {
    pub fn new(table: Arc<TableDef>) -> Self {
        ResourceBuilder {
            name: table.name().to_string(),
            ids: table.primary_key().to_vec(),
            table,
            user_id: None,
            create_fields: None,
            update_fields: None,
            upsert_fields: None,
            all_fields: None,
            return_cols: None,
            pagination: false,
            ordering: None,
            filters: None,
            transforms: Vec::new(),
        }
    }

    /// Label used in errors; defaults to the table name.
    pub fn named(&self, name: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.name = name.into();
        next
    }

    /// Ownership column, injected from the caller's identity.
    pub fn set_user_id(&self, field: &str) -> Self {
        let mut next = self.clone();
        next.user_id = Some(field.to_string());
        next
    }

    pub fn set_ids(&self, fields: &[&str]) -> Self {
        let mut next = self.clone();
        next.ids = owned(fields);
        next
    }

    pub fn restrict_create_data_fields(&self, fields: &[&str]) -> Self {
        let mut next = self.clone();
        next.create_fields = Some(owned(fields));
        next
    }

    pub fn restrict_update_data_fields(&self, fields: &[&str]) -> Self {
        let mut next = self.clone();
        next.update_fields = Some(owned(fields));
        next
    }

    pub fn restrict_upsert_data_fields(&self, fields: &[&str]) -> Self {
        let mut next = self.clone();
        next.upsert_fields = Some(owned(fields));
        next
    }

    /// Limit the base shape and every data shape to `fields`.
    pub fn restrict_all_fields(&self, fields: &[&str]) -> Self {
        let mut next = self.clone();
        next.all_fields = Some(owned(fields));
        next
    }

    pub fn restrict_return_cols_fields(&self, fields: &[&str]) -> Self {
        let mut next = self.clone();
        next.return_cols = Some(owned(fields));
        next
    }

    pub fn enable_pagination(&self) -> Self {
        let mut next = self.clone();
        next.pagination = true;
        next
    }

    pub fn enable_ordering(&self, columns: &[&str]) -> Self {
        let mut next = self.clone();
        next.ordering = Some(owned(columns));
        next
    }

    /// Filterable columns and their value shapes. Every filter is optional.
    pub fn enable_filters(&self, filters: Schema) -> Self {
        let mut next = self.clone();
        next.filters = Some(filters);
        next
    }

    /// Refine the derived schemas, e.g. to add length constraints. Runs at
    /// `done()`, in registration order.
    pub fn transform<F>(&self, f: F) -> Self
    where
        F: Fn(ResourceSchemas) -> ResourceSchemas + Send + Sync + 'static,
    {
        let mut next = self.clone();
        next.transforms.push(Arc::new(f));
        next
    }

    fn check(&self, slot: &'static str, fields: &[String]) -> Result<(), ConfigError> {
        match fields.iter().find(|f| !self.table.has_column(f)) {
            Some(field) => Err(ConfigError::UnknownField {
                table: self.table.name().to_string(),
                slot,
                field: field.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Transforms may rewrite any shape; every one that names columns is
    /// checked again.
    fn recheck(&self, schemas: &ResourceSchemas) -> Result<(), ConfigError> {
        for (slot, shape) in [
            ("base", &schemas.base),
            ("create_data", &schemas.create_data),
            ("update_data", &schemas.update_data),
            ("upsert_data", &schemas.upsert_data),
            ("ids", &schemas.id),
            ("return_cols", &schemas.return_cols),
        ] {
            self.check(slot, &shape.names())?;
        }
        if let Some(user_id) = &schemas.user_id {
            self.check("user_id", &user_id.names())?;
        }
        if let Some(FieldKind::Object { schema }) = schemas.filters.as_ref().map(|f| &f.kind) {
            self.check("filters", &schema.names())?;
        }
        if let Some(FieldKind::Ordering { columns }) = schemas.ordering.as_ref().map(|f| &f.kind) {
            self.check("ordering", columns)?;
        }
        Ok(())
    }

    pub fn done(&self) -> Result<Arc<Resource>, ConfigError> {
        if self.ids.is_empty() {
            return Err(ConfigError::Validation(format!("resource {} declares no id fields", self.name)));
        }
        self.check("ids", &self.ids)?;
        if let Some(user_id) = &self.user_id {
            self.check("user_id", std::slice::from_ref(user_id))?;
        }
        let slots = [
            ("create_data", &self.create_fields),
            ("update_data", &self.update_fields),
            ("upsert_data", &self.upsert_fields),
            ("all", &self.all_fields),
            ("return_cols", &self.return_cols),
            ("ordering", &self.ordering),
        ];
        for (slot, fields) in slots {
            if let Some(fields) = fields {
                self.check(slot, fields)?;
            }
        }
        if let Some(filters) = &self.filters {
            self.check("filters", &filters.names())?;
        }

        let table = &self.table;
        let all = self.all_fields.clone().unwrap_or_else(|| table.column_names());
        let mut not_data: Vec<String> = self.user_id.iter().cloned().collect();
        let insert = insert_shape(table).pick(&all).omit(&not_data);
        let create_data = match &self.create_fields {
            Some(f) => insert.pick(f),
            None => insert.clone(),
        };
        let upsert_data = match (&self.upsert_fields, &self.create_fields) {
            (Some(f), _) | (None, Some(f)) => insert.pick(f),
            (None, None) => insert,
        };
        not_data.extend(self.ids.iter().cloned());
        let update = update_shape(table).pick(&all).omit(&not_data);
        let update_data = match &self.update_fields {
            Some(f) => update.pick(f),
            None => update,
        };

        let select = select_shape(table);
        let return_cols = self.return_cols.clone().unwrap_or_else(|| all.clone());
        let schemas = ResourceSchemas {
            base: select.pick(&all),
            create_data,
            update_data,
            upsert_data,
            id: select.pick(&self.ids),
            user_id: self.user_id.as_ref().map(|u| select.pick(std::slice::from_ref(u))),
            return_cols: select.pick(&return_cols),
            filters: self
                .filters
                .as_ref()
                .map(|f| FieldSchema::object(f.partial()).optional()),
            pagination: self.pagination.then(|| {
                FieldSchema::object(
                    Schema::new()
                        .field("page", FieldSchema::integer().optional())
                        .field("page_size", FieldSchema::integer().optional()),
                )
                .optional()
            }),
            ordering: self.ordering.as_ref().map(|columns| {
                FieldSchema::new(FieldKind::Ordering { columns: columns.clone() }).optional()
            }),
        };
        let schemas = self.transforms.iter().fold(schemas, |s, t| t(s));
        self.recheck(&schemas)?;

        Ok(Arc::new(Resource {
            name: self.name.clone(),
            table: self.table.clone(),
            ids: self.ids.clone(),
            user_id: self.user_id.clone(),
            return_cols: schemas.return_cols.names(),
            schemas,
        }))
    }
}

impl fmt::Debug for ResourceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceBuilder")
            .field("table", &self.table.name())
            .field("name", &self.name)
            .field("ids", &self.ids)
            .field("user_id", &self.user_id)
            .field("transforms", &self.transforms.len())
            .finish_non_exhaustive()
    }
}

/// Frozen schema bundle for one table.
#[derive(Debug)]
pub struct Resource {
    name: String,
    table: Arc<TableDef>,
    ids: Vec<String>,
    user_id: Option<String>,
    return_cols: Vec<String>,
    schemas: ResourceSchemas,
}

impl Resource {
    pub fn builder(table: Arc<TableDef>) -> ResourceBuilder {
        ResourceBuilder::new(table)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &Arc<TableDef> {
        &self.table
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Projection used by the standard operations.
    pub fn return_cols(&self) -> &[String] {
        &self.return_cols
    }

    pub fn schemas(&self) -> &ResourceSchemas {
        &self.schemas
    }

    pub fn has_pagination(&self) -> bool {
        self.schemas.pagination.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ColumnDef, ColumnType};
    use serde_json::json;

    fn posts() -> Arc<TableDef> {
        Arc::new(
            TableDef::builder("posts")
                .column(ColumnDef::new("id", ColumnType::Uuid).primary_key().default_expr("gen_random_uuid()"))
                .column(ColumnDef::new("user_id", ColumnType::Uuid).not_null())
                .column(ColumnDef::new("title", ColumnType::Text).not_null())
                .column(ColumnDef::new("content", ColumnType::Text))
                .column(ColumnDef::new("secret", ColumnType::Text))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn ownership_and_ids_stay_out_of_data_shapes() {
        let r = Resource::builder(posts()).set_user_id("user_id").done().unwrap();
        let s = r.schemas();
        assert!(!s.create_data.contains("user_id"));
        assert!(s.create_data.contains("id"));
        assert_eq!(s.update_data.names(), vec!["title", "content", "secret"]);
        assert_eq!(s.id.names(), vec!["id"]);
        assert_eq!(s.user_id.as_ref().unwrap().names(), vec!["user_id"]);
        assert_eq!(r.return_cols().len(), 5);
    }

    #[test]
    fn builders_branch_without_sharing_state() {
        let base = Resource::builder(posts()).set_user_id("user_id");
        let narrow = base.restrict_all_fields(&["id", "user_id", "title"]).done().unwrap();
        let wide = base.done().unwrap();
        assert_eq!(narrow.return_cols(), ["id", "user_id", "title"]);
        assert_eq!(narrow.schemas().create_data.names(), vec!["id", "title"]);
        assert!(wide.schemas().create_data.contains("secret"));
    }

    #[test]
    fn later_calls_override_the_same_slot() {
        let r = Resource::builder(posts())
            .restrict_create_data_fields(&["nope"])
            .restrict_create_data_fields(&["title"])
            .done()
            .unwrap();
        assert_eq!(r.schemas().create_data.names(), vec!["title"]);
        assert_eq!(r.schemas().upsert_data.names(), vec!["title"]);
    }

    #[test]
    fn unknown_fields_fail_at_build_time() {
        let err = Resource::builder(posts())
            .restrict_return_cols_fields(&["title", "body"])
            .done()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownField { slot: "return_cols", ref field, .. } if field == "body"
        ));
        assert!(Resource::builder(posts()).set_user_id("owner").done().is_err());
    }

    #[test]
    fn transforms_refine_and_are_rechecked() {
        let r = Resource::builder(posts())
            .transform(|mut s| {
                s.create_data = s.create_data.map_field("title", |f| f.max_length(3));
                s
            })
            .done()
            .unwrap();
        assert!(r.schemas().create_data.validate(&json!({ "title": "long" })).is_err());

        let err = Resource::builder(posts())
            .transform(|mut s| {
                s.create_data = s.create_data.field("slug", FieldSchema::string());
                s
            })
            .done()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownField { slot: "create_data", .. }));
    }

    #[test]
    fn transforms_cannot_smuggle_unknown_columns_into_any_shape() {
        let base = Resource::builder(posts())
            .set_user_id("user_id")
            .enable_filters(Schema::new().field("title", FieldSchema::string()));

        let err = base
            .transform(|mut s| {
                s.return_cols = s.return_cols.field("ghost", FieldSchema::string());
                s
            })
            .done()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownField { slot: "return_cols", ref field, .. } if field == "ghost"));

        let err = base
            .transform(|mut s| {
                s.id = s.id.field("ghost", FieldSchema::uuid());
                s
            })
            .done()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownField { slot: "ids", .. }));

        let err = base
            .transform(|mut s| {
                s.user_id = Some(Schema::new().field("owner", FieldSchema::uuid()));
                s
            })
            .done()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownField { slot: "user_id", .. }));

        let err = base
            .transform(|mut s| {
                s.filters = Some(FieldSchema::object(Schema::new().field("ghost", FieldSchema::string())).optional());
                s
            })
            .done()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownField { slot: "filters", .. }));
    }

    #[test]
    fn optional_query_shapes() {
        let r = Resource::builder(posts())
            .enable_pagination()
            .enable_ordering(&["title"])
            .enable_filters(Schema::new().field("title", FieldSchema::string()))
            .done()
            .unwrap();
        assert!(r.has_pagination());
        let filters = r.schemas().filters.as_ref().unwrap();
        assert!(!filters.required);
        let FieldKind::Object { schema } = &filters.kind else { panic!("object") };
        assert!(schema.validate(&json!({})).is_ok());
        assert!(Resource::builder(posts()).enable_ordering(&["nope"]).done().is_err());
    }
}
