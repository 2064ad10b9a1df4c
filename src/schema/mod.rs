//! Object schemas for validating operation input.
//!
//! A [`Schema`] is an ordered set of named fields. Validation returns a
//! cleaned copy of the input (unknown keys dropped) or every issue found,
//! each tagged with its path.

mod rules;
mod shapes;

pub use rules::ValidationRule;
pub use shapes::{column_field, insert_shape, select_shape, update_shape};

use crate::error::{codes, AppError, ErrorLayer};
use crate::sql::OrderTerm;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Integer,
    Number,
    /// Arbitrary precision; a JSON number or a numeric string.
    Decimal,
    Boolean,
    Uuid,
    Timestamp,
    Date,
    /// Any JSON value.
    Json,
    Object { schema: Schema },
    Array { items: Box<FieldSchema> },
    /// List of ordering terms restricted to `columns`.
    Ordering { columns: Vec<String> },
}

impl FieldKind {
    fn name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Integer => "integer",
            FieldKind::Number | FieldKind::Decimal => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Uuid => "uuid",
            FieldKind::Timestamp => "timestamp",
            FieldKind::Date => "date",
            FieldKind::Json => "json",
            FieldKind::Object { .. } => "object",
            FieldKind::Array { .. } | FieldKind::Ordering { .. } => "array",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldSchema {
    #[serde(flatten)]
    pub kind: FieldKind,
    pub required: bool,
    pub nullable: bool,
    #[serde(skip_serializing_if = "ValidationRule::is_empty")]
    pub rules: ValidationRule,
}

impl FieldSchema {
    pub fn new(kind: FieldKind) -> Self {
        FieldSchema {
            kind,
            required: true,
            nullable: false,
            rules: ValidationRule::default(),
        }
    }

    pub fn string() -> Self {
        Self::new(FieldKind::String)
    }

    pub fn integer() -> Self {
        Self::new(FieldKind::Integer)
    }

    pub fn boolean() -> Self {
        Self::new(FieldKind::Boolean)
    }

    pub fn uuid() -> Self {
        Self::new(FieldKind::Uuid)
    }

    pub fn json() -> Self {
        Self::new(FieldKind::Json)
    }

    pub fn object(schema: Schema) -> Self {
        Self::new(FieldKind::Object { schema })
    }

    pub fn array(items: FieldSchema) -> Self {
        Self::new(FieldKind::Array { items: Box::new(items) })
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_rules(mut self, rules: ValidationRule) -> Self {
        self.rules = rules;
        self
    }

    pub fn min_length(mut self, n: u32) -> Self {
        self.rules.min_length = Some(n);
        self
    }

    pub fn max_length(mut self, n: u32) -> Self {
        self.rules.max_length = Some(n);
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.rules.pattern = Some(pattern.into());
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.rules.format = Some(format.into());
        self
    }

    pub fn allowed(mut self, values: Vec<Value>) -> Self {
        self.rules.allowed = Some(values);
        self
    }

    pub fn minimum(mut self, n: f64) -> Self {
        self.rules.minimum = Some(n);
        self
    }

    pub fn maximum(mut self, n: f64) -> Self {
        self.rules.maximum = Some(n);
        self
    }

    fn validate(&self, path: &str, value: &Value, issues: &mut Vec<ValidationIssue>) -> Option<Value> {
        if value.is_null() {
            if self.nullable {
                return Some(Value::Null);
            }
            issues.push(ValidationIssue::new(path, "must not be null"));
            return None;
        }
        let cleaned = match &self.kind {
            FieldKind::Object { schema } => {
                let before = issues.len();
                let out = schema.validate_at(path, value, issues);
                return (issues.len() == before).then_some(out).flatten();
            }
            FieldKind::Array { items } => {
                let Some(list) = value.as_array() else {
                    issues.push(ValidationIssue::new(path, "expected array"));
                    return None;
                };
                let before = issues.len();
                let out: Vec<Value> = list
                    .iter()
                    .enumerate()
                    .filter_map(|(i, v)| items.validate(&format!("{}[{}]", path, i), v, issues))
                    .collect();
                if issues.len() != before {
                    return None;
                }
                Value::Array(out)
            }
            FieldKind::Ordering { columns } => {
                let terms: Vec<OrderTerm> = match serde_json::from_value(value.clone()) {
                    Ok(t) => t,
                    Err(_) => {
                        issues.push(ValidationIssue::new(path, "expected a list of ordering terms"));
                        return None;
                    }
                };
                if let Some(t) = terms.iter().find(|t| !columns.contains(&t.field)) {
                    issues.push(ValidationIssue::new(path, format!("cannot order by {}", t.field)));
                    return None;
                }
                match serde_json::to_value(terms) {
                    Ok(v) => v,
                    Err(e) => {
                        issues.push(ValidationIssue::new(path, e.to_string()));
                        return None;
                    }
                }
            }
            kind => {
                if !scalar_matches(kind, value) {
                    issues.push(ValidationIssue::new(path, format!("expected {}", kind.name())));
                    return None;
                }
                value.clone()
            }
        };
        if let Some(msg) = self.rules.check(&cleaned) {
            issues.push(ValidationIssue::new(path, msg));
            return None;
        }
        Some(cleaned)
    }
}

fn scalar_matches(kind: &FieldKind, v: &Value) -> bool {
    match kind {
        FieldKind::String => v.is_string(),
        FieldKind::Integer => v.is_i64() || v.is_u64(),
        FieldKind::Number => v.is_number(),
        FieldKind::Decimal => {
            v.is_number() || v.as_str().is_some_and(|s| s.trim().parse::<f64>().is_ok())
        }
        FieldKind::Boolean => v.is_boolean(),
        FieldKind::Uuid => v.as_str().is_some_and(|s| uuid::Uuid::parse_str(s).is_ok()),
        FieldKind::Timestamp => v.as_str().is_some_and(|s| {
            DateTime::parse_from_rfc3339(s).is_ok()
                || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
                || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").is_ok()
        }),
        FieldKind::Date => v
            .as_str()
            .is_some_and(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()),
        FieldKind::Json => true,
        FieldKind::Object { .. } | FieldKind::Array { .. } | FieldKind::Ordering { .. } => false,
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Ordered object schema. Keys not declared are dropped on validation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Schema {
    fields: Vec<(String, FieldSchema)>,
}

impl Schema {
    pub fn new() -> Self {
        Schema::default()
    }

    /// Add or replace a field, keeping the original position on replace.
    pub fn field(mut self, name: impl Into<String>, field: FieldSchema) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = field,
            None => self.fields.push((name, field)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldSchema)> {
        self.fields.iter().map(|(n, f)| (n.as_str(), f))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Keep only `names`, in schema order.
    pub fn pick<S: AsRef<str>>(&self, names: &[S]) -> Schema {
        Schema {
            fields: self
                .fields
                .iter()
                .filter(|(n, _)| names.iter().any(|k| k.as_ref() == n))
                .cloned()
                .collect(),
        }
    }

    pub fn omit<S: AsRef<str>>(&self, names: &[S]) -> Schema {
        Schema {
            fields: self
                .fields
                .iter()
                .filter(|(n, _)| !names.iter().any(|k| k.as_ref() == n))
                .cloned()
                .collect(),
        }
    }

    /// Every field optional.
    pub fn partial(&self) -> Schema {
        Schema {
            fields: self
                .fields
                .iter()
                .map(|(n, f)| (n.clone(), f.clone().optional()))
                .collect(),
        }
    }

    /// Fields of `other` added after ours; same-named fields are replaced.
    pub fn merge(&self, other: &Schema) -> Schema {
        other
            .fields
            .iter()
            .fold(self.clone(), |acc, (n, f)| acc.field(n.clone(), f.clone()))
    }

    /// Replace one field through `f`; no-op when the field is absent.
    pub fn map_field(mut self, name: &str, f: impl FnOnce(FieldSchema) -> FieldSchema) -> Schema {
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| n == name) {
            slot.1 = f(slot.1.clone());
        }
        self
    }

    pub fn validate(&self, value: &Value) -> Result<Value, Vec<ValidationIssue>> {
        let mut issues = Vec::new();
        match self.validate_at("", value, &mut issues) {
            Some(v) if issues.is_empty() => Ok(v),
            _ => Err(issues),
        }
    }

    fn validate_at(&self, path: &str, value: &Value, issues: &mut Vec<ValidationIssue>) -> Option<Value> {
        let Some(obj) = value.as_object() else {
            issues.push(ValidationIssue::new(path, "expected object"));
            return None;
        };
        let mut out = Map::new();
        for (name, field) in &self.fields {
            let child = if path.is_empty() {
                name.clone()
            } else {
                format!("{}.{}", path, name)
            };
            match obj.get(name) {
                None if field.required => issues.push(ValidationIssue::new(child, "is required")),
                None => {}
                Some(v) => {
                    if let Some(cleaned) = field.validate(&child, v, issues) {
                        out.insert(name.clone(), cleaned);
                    }
                }
            }
        }
        Some(Value::Object(out))
    }
}

impl Serialize for Schema {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, field) in &self.fields {
            map.serialize_entry(name, field)?;
        }
        map.end()
    }
}

/// `VALIDATION.INVALID_FORMAT` carrying the issues under `details.issues`.
#[track_caller]
pub fn invalid_format(issues: Vec<ValidationIssue>, layer: ErrorLayer) -> AppError {
    let summary = issues
        .iter()
        .map(|i| {
            if i.path.is_empty() {
                i.message.clone()
            } else {
                format!("{} {}", i.path, i.message)
            }
        })
        .collect::<Vec<_>>()
        .join("; ");
    let issues = serde_json::to_value(&issues).unwrap_or(Value::Null);
    AppError::validation(codes::validation::INVALID_FORMAT)
        .message(summary)
        .layer(layer)
        .detail("issues", issues)
        .get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn post() -> Schema {
        Schema::new()
            .field("title", FieldSchema::string().min_length(1))
            .field("content", FieldSchema::string().optional().nullable())
            .field("views", FieldSchema::integer().optional())
    }

    #[test]
    fn strips_unknown_keys_and_keeps_declared_ones() {
        let out = post()
            .validate(&json!({ "title": "A", "content": null, "extra": 1 }))
            .unwrap();
        assert_eq!(out, json!({ "title": "A", "content": null }));
    }

    #[test]
    fn collects_every_issue_with_paths() {
        let issues = post()
            .validate(&json!({ "content": 5, "views": 1.5 }))
            .unwrap_err();
        let paths: Vec<_> = issues.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["title", "content", "views"]);
    }

    #[test]
    fn nested_objects_and_arrays_report_full_paths() {
        let schema = Schema::new().field(
            "rows",
            FieldSchema::array(FieldSchema::object(post())),
        );
        let issues = schema
            .validate(&json!({ "rows": [{ "title": "ok" }, { "title": "" }] }))
            .unwrap_err();
        assert_eq!(issues, vec![ValidationIssue::new("rows[1].title", "must be at least 1 characters")]);
    }

    #[test]
    fn pick_omit_partial_merge() {
        let s = post();
        assert_eq!(s.pick(&["views", "title"]).names(), vec!["title", "views"]);
        assert_eq!(s.omit(&["title"]).names(), vec!["content", "views"]);
        assert!(s.partial().validate(&json!({})).is_ok());
        let merged = s.merge(&Schema::new().field("title", FieldSchema::string().optional()).field("slug", FieldSchema::string()));
        assert_eq!(merged.names(), vec!["title", "content", "views", "slug"]);
        assert!(!merged.get("title").unwrap().required);
    }

    #[test]
    fn ordering_is_restricted_to_columns() {
        let schema = Schema::new().field(
            "ordering",
            FieldSchema::new(FieldKind::Ordering { columns: vec!["title".into()] }),
        );
        let ok = schema.validate(&json!({ "ordering": ["title"] })).unwrap();
        assert_eq!(ok["ordering"], json!([{ "field": "title", "direction": "asc" }]));
        assert!(schema.validate(&json!({ "ordering": [{ "field": "secret" }] })).is_err());
    }

    #[test]
    fn scalar_kinds() {
        let schema = Schema::new()
            .field("id", FieldSchema::uuid())
            .field("at", FieldSchema::new(FieldKind::Timestamp))
            .field("on", FieldSchema::new(FieldKind::Date))
            .field("price", FieldSchema::new(FieldKind::Decimal));
        assert!(schema
            .validate(&json!({
                "id": "6f1c1c2e-3a51-4c5e-9a36-5d1f2b3c4d5e",
                "at": "2024-01-02T03:04:05Z",
                "on": "2024-01-02",
                "price": "12.50"
            }))
            .is_ok());
        let issues = schema
            .validate(&json!({ "id": "x", "at": "yesterday", "on": "02/01/2024", "price": "cheap" }))
            .unwrap_err();
        assert_eq!(issues.len(), 4);
    }

    #[test]
    fn invalid_format_error_carries_issues() {
        let err = invalid_format(vec![ValidationIssue::new("title", "is required")], ErrorLayer::Repository);
        assert_eq!(err.key(), "VALIDATION.INVALID_FORMAT");
        assert_eq!(err.message(), "title is required");
        assert_eq!(err.detail("issues"), Some(&json!([{ "path": "title", "message": "is required" }])));
    }
}
