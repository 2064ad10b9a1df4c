//! Load table descriptors from JSON config files.

use crate::config::resolved::{ColumnDef, ColumnDefault, ColumnType, ForeignKey, TableDef};
use crate::config::types::*;
use crate::config::validate_tables;
use crate::error::ConfigError;
use std::collections::HashSet;
use std::path::Path;

/// Build a resolved table from its raw config (validates the result).
pub fn resolve_table(config: &TableConfig) -> Result<TableDef, ConfigError> {
    let pk_names = config.primary_key.columns();
    let names: HashSet<&str> = config.columns.iter().map(|c| c.name.as_str()).collect();
    for pk in &pk_names {
        if !names.contains(pk.as_str()) {
            return Err(ConfigError::InvalidPrimaryKey {
                table: config.name.clone(),
                column: pk.clone(),
            });
        }
    }

    let mut builder = TableDef::builder(config.name.clone());
    if let Some(schema) = &config.schema {
        builder = builder.schema(schema.clone());
    }
    for c in &config.columns {
        let column_type = ColumnType::parse(c.type_.name(), c.type_.params())?;
        let mut def = ColumnDef::new(c.name.clone(), column_type);
        if !c.nullable {
            def = def.not_null();
        }
        if pk_names.contains(&c.name) {
            def = def.primary_key();
        }
        if c.unique {
            def = def.unique();
        }
        def.default = c.default.as_ref().map(|d| match d {
            ColumnDefaultConfig::Literal(v) => ColumnDefault::Literal(v.clone()),
            ColumnDefaultConfig::Expression { expression } => ColumnDefault::Expression(expression.clone()),
        });
        def.references = c.references.as_ref().map(|r| ForeignKey {
            table: r.table.clone(),
            column: r.column.clone(),
            on_delete: r.on_delete.clone(),
            on_update: r.on_update.clone(),
        });
        builder = builder.column(def);
    }
    for set in &config.unique {
        builder = builder.unique(set.iter().cloned());
    }
    if let Some(active) = &config.active_column {
        builder = builder.active_column(active.clone());
    }
    if let Some(touch) = &config.touch_column {
        builder = builder.touch_column(touch.clone());
    }
    builder.build()
}

pub fn load_table_from_str(json: &str) -> Result<TableDef, ConfigError> {
    let config: TableConfig = serde_json::from_str(json).map_err(|e| ConfigError::Load(e.to_string()))?;
    resolve_table(&config)
}

/// Load every `*.json` descriptor in `dir`, sorted by file name, and check
/// cross-table references.
pub async fn load_tables_from_dir(dir: impl AsRef<Path>) -> Result<Vec<TableDef>, ConfigError> {
    let dir = dir.as_ref();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", dir.display(), e)))?;
    let mut paths = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ConfigError::Load(e.to_string()))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut tables = Vec::with_capacity(paths.len());
    for path in paths {
        tracing::debug!(path = %path.display(), "loading table descriptor");
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        let table = load_table_from_str(&raw)
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        tables.push(table);
    }
    validate_tables(&tables)?;
    Ok(tables)
}
