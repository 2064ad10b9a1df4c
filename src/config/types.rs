//! Raw table descriptor types matching the JSON config files.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKeyConfig {
    Single(String),
    Composite(Vec<String>),
}

impl PrimaryKeyConfig {
    pub fn columns(&self) -> Vec<String> {
        match self {
            PrimaryKeyConfig::Single(s) => vec![s.clone()],
            PrimaryKeyConfig::Composite(v) => v.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    pub primary_key: PrimaryKeyConfig,
    /// Composite unique constraints.
    #[serde(default)]
    pub unique: Vec<Vec<String>>,
    /// Boolean column toggled by soft delete.
    #[serde(default)]
    pub active_column: Option<String>,
    /// Timestamp column set to NOW() on every update.
    #[serde(default)]
    pub touch_column: Option<String>,
    pub columns: Vec<ColumnConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnTypeConfig {
    Simple(String),
    Parameterized { name: String, params: Option<Vec<u32>> },
}

impl ColumnTypeConfig {
    pub fn name(&self) -> &str {
        match self {
            ColumnTypeConfig::Simple(s) => s,
            ColumnTypeConfig::Parameterized { name, .. } => name,
        }
    }

    pub fn params(&self) -> &[u32] {
        match self {
            ColumnTypeConfig::Simple(_) => &[],
            ColumnTypeConfig::Parameterized { params, .. } => params.as_deref().unwrap_or(&[]),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub enum ColumnDefaultConfig {
    Literal(Value),
    Expression { expression: String },
}

impl<'de> Deserialize<'de> for ColumnDefaultConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Value::deserialize(deserializer)?;
        match v {
            Value::Object(mut obj) => {
                if let Some(Value::String(s)) = obj.remove("expression") {
                    return Ok(ColumnDefaultConfig::Expression { expression: s });
                }
                if let Some(lit) = obj.remove("value").or_else(|| obj.remove("literal")) {
                    return Ok(ColumnDefaultConfig::Literal(lit));
                }
                Err(serde::de::Error::custom(format!(
                    "column default object must be {{ \"expression\": \"...\" }} or {{ \"value\": ... }}; got keys: {:?}",
                    obj.keys().collect::<Vec<_>>()
                )))
            }
            Value::Array(_) => Err(serde::de::Error::custom(
                "column default must be a scalar, { \"expression\": \"...\" }, or { \"value\": ... }",
            )),
            other => Ok(ColumnDefaultConfig::Literal(other)),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReferenceConfig {
    pub table: String,
    pub column: String,
    #[serde(default)]
    pub on_delete: Option<String>,
    #[serde(default)]
    pub on_update: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: ColumnTypeConfig,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<ColumnDefaultConfig>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub references: Option<ReferenceConfig>,
    #[serde(default)]
    pub comment: Option<String>,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn column_defaults_parse_all_shapes() {
        let lit: ColumnDefaultConfig = serde_json::from_value(json!(true)).unwrap();
        assert!(matches!(lit, ColumnDefaultConfig::Literal(Value::Bool(true))));
        let expr: ColumnDefaultConfig = serde_json::from_value(json!({"expression": "now()"})).unwrap();
        assert!(matches!(expr, ColumnDefaultConfig::Expression { .. }));
        let val: ColumnDefaultConfig = serde_json::from_value(json!({"value": "draft"})).unwrap();
        assert!(matches!(val, ColumnDefaultConfig::Literal(Value::String(_))));
        assert!(serde_json::from_value::<ColumnDefaultConfig>(json!({"other": 1})).is_err());
        assert!(serde_json::from_value::<ColumnDefaultConfig>(json!([1])).is_err());
    }

    #[test]
    fn parameterized_types() {
        let t: ColumnTypeConfig = serde_json::from_value(json!({"name": "varchar", "params": [120]})).unwrap();
        assert_eq!(t.name(), "varchar");
        assert_eq!(t.params(), &[120]);
        let s: ColumnTypeConfig = serde_json::from_value(json!("uuid")).unwrap();
        assert!(s.params().is_empty());
    }
}
