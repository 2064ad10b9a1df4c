//! Resolved table descriptor: validated, immutable, used to derive schemas
//! and to build statements.

use crate::config::validate_table;
use crate::error::ConfigError;
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Varchar(Option<u32>),
    SmallInt,
    Integer,
    BigInt,
    Serial,
    BigSerial,
    Real,
    Double,
    Numeric,
    Boolean,
    Uuid,
    Timestamp,
    TimestampTz,
    Date,
    Json,
    Jsonb,
}

impl ColumnType {
    pub fn parse(name: &str, params: &[u32]) -> Result<Self, ConfigError> {
        Ok(match name.trim().to_ascii_lowercase().as_str() {
            "text" => ColumnType::Text,
            "varchar" | "character varying" => ColumnType::Varchar(params.first().copied()),
            "smallint" | "int2" => ColumnType::SmallInt,
            "integer" | "int" | "int4" => ColumnType::Integer,
            "bigint" | "int8" => ColumnType::BigInt,
            "serial" | "serial4" => ColumnType::Serial,
            "bigserial" | "serial8" => ColumnType::BigSerial,
            "real" | "float4" => ColumnType::Real,
            "double precision" | "double" | "float8" => ColumnType::Double,
            "numeric" | "decimal" => ColumnType::Numeric,
            "boolean" | "bool" => ColumnType::Boolean,
            "uuid" => ColumnType::Uuid,
            "timestamp" | "timestamp without time zone" => ColumnType::Timestamp,
            "timestamptz" | "timestamp with time zone" => ColumnType::TimestampTz,
            "date" => ColumnType::Date,
            "json" => ColumnType::Json,
            "jsonb" => ColumnType::Jsonb,
            other => return Err(ConfigError::UnsupportedType(other.to_string())),
        })
    }

    /// Type name used in DDL.
    pub fn ddl_name(&self) -> String {
        match self {
            ColumnType::Varchar(Some(n)) => format!("varchar({})", n),
            ColumnType::Varchar(None) => "varchar".into(),
            ColumnType::Serial => "serial".into(),
            ColumnType::BigSerial => "bigserial".into(),
            other => other.cast_name().to_string(),
        }
    }

    /// Type name used for parameter casts (`$1::uuid`).
    pub fn cast_name(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Varchar(_) => "varchar",
            ColumnType::SmallInt => "int2",
            ColumnType::Integer | ColumnType::Serial => "int4",
            ColumnType::BigInt | ColumnType::BigSerial => "int8",
            ColumnType::Real => "float4",
            ColumnType::Double => "float8",
            ColumnType::Numeric => "numeric",
            ColumnType::Boolean => "bool",
            ColumnType::Uuid => "uuid",
            ColumnType::Timestamp => "timestamp",
            ColumnType::TimestampTz => "timestamptz",
            ColumnType::Date => "date",
            ColumnType::Json => "json",
            ColumnType::Jsonb => "jsonb",
        }
    }

    pub fn is_serial(&self) -> bool {
        matches!(self, ColumnType::Serial | ColumnType::BigSerial)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ColumnType::SmallInt
                | ColumnType::Integer
                | ColumnType::BigInt
                | ColumnType::Serial
                | ColumnType::BigSerial
        )
    }

    pub fn is_timestamp(&self) -> bool {
        matches!(self, ColumnType::Timestamp | ColumnType::TimestampTz)
    }

    pub fn is_json(&self) -> bool {
        matches!(self, ColumnType::Json | ColumnType::Jsonb)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ColumnDefault {
    Literal(Value),
    /// SQL expression, e.g. `gen_random_uuid()` or `now()`.
    Expression(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
    pub on_delete: Option<String>,
    pub on_update: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub default: Option<ColumnDefault>,
    pub primary_key: bool,
    pub unique: bool,
    pub references: Option<ForeignKey>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        ColumnDef {
            name: name.into(),
            column_type,
            nullable: true,
            default: None,
            primary_key: false,
            unique: false,
            references: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Marks the column as (part of) the primary key; implies NOT NULL.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(ColumnDefault::Literal(value.into()));
        self
    }

    pub fn default_expr(mut self, expression: impl Into<String>) -> Self {
        self.default = Some(ColumnDefault::Expression(expression.into()));
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.references = Some(ForeignKey {
            table: table.into(),
            column: column.into(),
            on_delete: None,
            on_update: None,
        });
        self
    }

    /// Whether the database fills the column when an insert omits it.
    pub fn has_default(&self) -> bool {
        self.default.is_some() || self.column_type.is_serial()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TableDef {
    schema: Option<String>,
    name: String,
    columns: Vec<ColumnDef>,
    primary_key: Vec<String>,
    unique: Vec<Vec<String>>,
    active_column: Option<String>,
    touch_column: Option<String>,
}

impl TableDef {
    pub fn builder(name: impl Into<String>) -> TableDefBuilder {
        TableDefBuilder {
            schema: None,
            name: name.into(),
            columns: Vec::new(),
            unique: Vec::new(),
            active_column: None,
            touch_column: None,
        }
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    /// Composite unique sets declared at table level.
    pub fn unique_sets(&self) -> &[Vec<String>] {
        &self.unique
    }

    pub fn active_column(&self) -> Option<&str> {
        self.active_column.as_deref()
    }

    pub fn touch_column(&self) -> Option<&str> {
        self.touch_column.as_deref()
    }

    /// Every unique constraint: primary key first, then single-column
    /// uniques, then composite sets.
    pub fn unique_constraints(&self) -> Vec<Vec<String>> {
        let mut out = vec![self.primary_key.clone()];
        for c in self.columns.iter().filter(|c| c.unique && !c.primary_key) {
            out.push(vec![c.name.clone()]);
        }
        out.extend(self.unique.iter().cloned());
        out
    }

    /// Whether `columns` (in any order) names a unique constraint.
    pub fn is_unique_target(&self, columns: &[String]) -> bool {
        self.unique_constraints().iter().any(|set| {
            set.len() == columns.len() && set.iter().all(|c| columns.contains(c))
        })
    }
}

#[derive(Clone, Debug)]
pub struct TableDefBuilder {
    schema: Option<String>,
    name: String,
    columns: Vec<ColumnDef>,
    unique: Vec<Vec<String>>,
    active_column: Option<String>,
    touch_column: Option<String>,
}

impl TableDefBuilder {
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn unique<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique.push(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn active_column(mut self, column: impl Into<String>) -> Self {
        self.active_column = Some(column.into());
        self
    }

    pub fn touch_column(mut self, column: impl Into<String>) -> Self {
        self.touch_column = Some(column.into());
        self
    }

    /// Resolve and validate. An `is_active` boolean and an `updated_at`
    /// timestamp are picked up as active/touch columns unless set explicitly.
    pub fn build(self) -> Result<TableDef, ConfigError> {
        let primary_key: Vec<String> = self
            .columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.clone())
            .collect();
        let active_column = self.active_column.or_else(|| {
            self.columns
                .iter()
                .find(|c| c.name == "is_active" && c.column_type == ColumnType::Boolean)
                .map(|c| c.name.clone())
        });
        let touch_column = self.touch_column.or_else(|| {
            self.columns
                .iter()
                .find(|c| c.name == "updated_at" && c.column_type.is_timestamp())
                .map(|c| c.name.clone())
        });
        let table = TableDef {
            schema: self.schema,
            name: self.name,
            columns: self.columns,
            primary_key,
            unique: self.unique,
            active_column,
            touch_column,
        };
        validate_table(&table)?;
        Ok(table)
    }
}
