//! Descriptor validation: column integrity and cross-table references.

use crate::config::{ColumnType, TableDef};
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};

pub fn validate_table(table: &TableDef) -> Result<(), ConfigError> {
    if table.name().trim().is_empty() {
        return Err(ConfigError::Validation("table name must not be empty".into()));
    }
    let mut seen = HashSet::new();
    for c in table.columns() {
        if !seen.insert(c.name.as_str()) {
            return Err(ConfigError::DuplicateColumn {
                table: table.name().to_string(),
                column: c.name.clone(),
            });
        }
    }
    if table.primary_key().is_empty() {
        return Err(ConfigError::Validation(format!(
            "table {} has no primary key",
            table.name()
        )));
    }
    for set in table.unique_sets() {
        if set.is_empty() {
            return Err(ConfigError::Validation(format!(
                "table {} declares an empty unique set",
                table.name()
            )));
        }
        for col in set {
            if !table.has_column(col) {
                return Err(ConfigError::MissingReference {
                    kind: "unique column",
                    id: format!("{}.{}", table.name(), col),
                });
            }
        }
    }
    if let Some(active) = table.active_column() {
        match table.column(active) {
            Some(c) if c.column_type == ColumnType::Boolean => {}
            Some(_) => {
                return Err(ConfigError::Validation(format!(
                    "active column {}.{} must be boolean",
                    table.name(),
                    active
                )))
            }
            None => {
                return Err(ConfigError::MissingReference {
                    kind: "active column",
                    id: format!("{}.{}", table.name(), active),
                })
            }
        }
    }
    if let Some(touch) = table.touch_column() {
        match table.column(touch) {
            Some(c) if c.column_type.is_timestamp() => {}
            Some(_) => {
                return Err(ConfigError::Validation(format!(
                    "touch column {}.{} must be a timestamp",
                    table.name(),
                    touch
                )))
            }
            None => {
                return Err(ConfigError::MissingReference {
                    kind: "touch column",
                    id: format!("{}.{}", table.name(), touch),
                })
            }
        }
    }
    Ok(())
}

/// Validate a set of tables together: names are unique and every foreign key
/// points at a known table and column.
pub fn validate_tables(tables: &[TableDef]) -> Result<(), ConfigError> {
    let by_name: HashMap<&str, &TableDef> = tables.iter().map(|t| (t.name(), t)).collect();
    if by_name.len() != tables.len() {
        return Err(ConfigError::Validation("duplicate table names".into()));
    }
    for t in tables {
        validate_table(t)?;
        for c in t.columns() {
            let Some(fk) = &c.references else { continue };
            let target = by_name.get(fk.table.as_str()).ok_or_else(|| ConfigError::MissingReference {
                kind: "table",
                id: fk.table.clone(),
            })?;
            if !target.has_column(&fk.column) {
                return Err(ConfigError::MissingReference {
                    kind: "column",
                    id: format!("{}.{}", fk.table, fk.column),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColumnDef;

    #[test]
    fn rejects_missing_primary_key() {
        let err = TableDef::builder("t")
            .column(ColumnDef::new("a", ColumnType::Text))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn rejects_duplicate_columns() {
        let err = TableDef::builder("t")
            .column(ColumnDef::new("a", ColumnType::Integer).primary_key())
            .column(ColumnDef::new("a", ColumnType::Text))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateColumn { .. }));
    }

    #[test]
    fn rejects_non_boolean_active_column() {
        let err = TableDef::builder("t")
            .column(ColumnDef::new("id", ColumnType::Integer).primary_key())
            .column(ColumnDef::new("state", ColumnType::Text))
            .active_column("state")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn foreign_keys_must_resolve() {
        let users = TableDef::builder("users")
            .column(ColumnDef::new("id", ColumnType::Uuid).primary_key())
            .build()
            .unwrap();
        let posts = TableDef::builder("posts")
            .column(ColumnDef::new("id", ColumnType::Uuid).primary_key())
            .column(ColumnDef::new("user_id", ColumnType::Uuid).references("users", "id"))
            .build()
            .unwrap();
        assert!(validate_tables(&[users.clone(), posts.clone()]).is_ok());
        assert!(matches!(
            validate_tables(&[posts]),
            Err(ConfigError::MissingReference { kind: "table", .. })
        ));
    }
}
