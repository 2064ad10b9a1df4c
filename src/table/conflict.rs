//! Conflict policy for inserts and its translation to `ON CONFLICT`.

use crate::config::TableDef;
use crate::driver::Row;
use crate::error::{codes, AppError, ErrorLayer};
use crate::sql::{ConflictAction, ConflictClause, Filter, SetValue};
use serde::{Deserialize, Deserializer, Serialize};

/// Conflict target: one column or a composite unique key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConflictTarget {
    Single(String),
    Composite(Vec<String>),
}

impl ConflictTarget {
    pub fn columns(&self) -> Vec<String> {
        match self {
            ConflictTarget::Single(s) => vec![s.clone()],
            ConflictTarget::Composite(v) => v.clone(),
        }
    }
}

impl From<&str> for ConflictTarget {
    fn from(s: &str) -> Self {
        ConflictTarget::Single(s.to_string())
    }
}

impl From<Vec<&str>> for ConflictTarget {
    fn from(v: Vec<&str>) -> Self {
        ConflictTarget::Composite(v.into_iter().map(str::to_string).collect())
    }
}

/// What happens when an insert collides with a unique constraint.
///
/// Deserializes from `"ignore"`, `"fail"` or `{ "type": .., .. }`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OnConflict {
    Ignore {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<ConflictTarget>,
    },
    /// Same as passing no policy: the database rejects the duplicate.
    Fail,
    /// Re-apply the incoming values of `set_excluded` (every inserted
    /// non-target column when absent).
    Update {
        target: ConflictTarget,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        set_excluded: Option<Vec<String>>,
        #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
        filter: Option<Filter>,
    },
    UpdateSet {
        target: ConflictTarget,
        set: Row,
        #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
        filter: Option<Filter>,
    },
    /// Excluded and literal values together; literals win on overlap.
    UpdateMixed {
        target: ConflictTarget,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        set_excluded: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        set: Option<Row>,
        #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
        filter: Option<Filter>,
    },
}

impl OnConflict {
    pub fn ignore() -> Self {
        OnConflict::Ignore { target: None }
    }

    pub fn update(target: impl Into<ConflictTarget>, set_excluded: &[&str]) -> Self {
        OnConflict::Update {
            target: target.into(),
            set_excluded: Some(set_excluded.iter().map(|s| s.to_string()).collect()),
            filter: None,
        }
    }

    /// Build the `ON CONFLICT` clause for an insert of `inserted` columns.
    /// `None` means no clause at all.
    pub fn clause(&self, table: &TableDef, inserted: &[String]) -> Result<Option<ConflictClause>, AppError> {
        let (target, excluded, literal, filter) = match self {
            OnConflict::Fail => return Ok(None),
            OnConflict::Ignore { target } => {
                let target = target.as_ref().map(ConflictTarget::columns).unwrap_or_default();
                if !target.is_empty() {
                    check_target(table, &target)?;
                }
                return Ok(Some(ConflictClause {
                    target,
                    action: ConflictAction::Nothing,
                }));
            }
            OnConflict::Update { target, set_excluded, filter } => {
                let target = target.columns();
                let excluded = match set_excluded {
                    Some(cols) => cols.clone(),
                    None => inserted.iter().filter(|c| !target.contains(c)).cloned().collect(),
                };
                (target, excluded, Row::new(), filter.clone())
            }
            OnConflict::UpdateSet { target, set, filter } => {
                (target.columns(), Vec::new(), set.clone(), filter.clone())
            }
            OnConflict::UpdateMixed { target, set_excluded, set, filter } => (
                target.columns(),
                set_excluded.clone().unwrap_or_default(),
                set.clone().unwrap_or_default(),
                filter.clone(),
            ),
        };
        check_target(table, &target)?;
        for col in excluded.iter().chain(literal.keys()) {
            if !table.has_column(col) {
                return Err(unknown_column(table, col));
            }
        }
        if let Some(f) = &filter {
            if let Some(col) = f.fields().into_iter().find(|c| !table.has_column(c)) {
                return Err(unknown_column(table, col));
            }
        }

        let mut set: Vec<(String, SetValue)> = excluded
            .into_iter()
            .filter(|c| !literal.contains_key(c))
            .map(|c| (c, SetValue::Excluded))
            .collect();
        set.extend(literal.into_iter().map(|(c, v)| (c, SetValue::Value(v))));
        if set.is_empty() {
            return Ok(Some(ConflictClause {
                target,
                action: ConflictAction::Nothing,
            }));
        }
        if let Some(touch) = table.touch_column() {
            if !set.iter().any(|(c, _)| c == touch) {
                set.push((touch.to_string(), SetValue::CurrentTimestamp));
            }
        }
        Ok(Some(ConflictClause {
            target,
            action: ConflictAction::Update { set, filter },
        }))
    }
}

impl<'de> Deserialize<'de> for OnConflict {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(tag = "type", rename_all = "snake_case")]
        enum Tagged {
            Ignore {
                #[serde(default)]
                target: Option<ConflictTarget>,
            },
            Fail,
            Update {
                target: ConflictTarget,
                #[serde(default)]
                set_excluded: Option<Vec<String>>,
                #[serde(default, rename = "where")]
                filter: Option<Filter>,
            },
            UpdateSet {
                target: ConflictTarget,
                set: Row,
                #[serde(default, rename = "where")]
                filter: Option<Filter>,
            },
            UpdateMixed {
                target: ConflictTarget,
                #[serde(default)]
                set_excluded: Option<Vec<String>>,
                #[serde(default)]
                set: Option<Row>,
                #[serde(default, rename = "where")]
                filter: Option<Filter>,
            },
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Name(String),
            Tagged(Tagged),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Name(name) => match name.as_str() {
                "ignore" => OnConflict::ignore(),
                "fail" => OnConflict::Fail,
                other => {
                    return Err(serde::de::Error::custom(format!(
                        "unknown conflict policy '{}'",
                        other
                    )))
                }
            },
            Raw::Tagged(Tagged::Ignore { target }) => OnConflict::Ignore { target },
            Raw::Tagged(Tagged::Fail) => OnConflict::Fail,
            Raw::Tagged(Tagged::Update { target, set_excluded, filter }) => {
                OnConflict::Update { target, set_excluded, filter }
            }
            Raw::Tagged(Tagged::UpdateSet { target, set, filter }) => OnConflict::UpdateSet { target, set, filter },
            Raw::Tagged(Tagged::UpdateMixed { target, set_excluded, set, filter }) => {
                OnConflict::UpdateMixed { target, set_excluded, set, filter }
            }
        })
    }
}

fn check_target(table: &TableDef, target: &[String]) -> Result<(), AppError> {
    if let Some(col) = target.iter().find(|c| !table.has_column(c)) {
        return Err(unknown_column(table, col));
    }
    if target.is_empty() || !table.is_unique_target(target) {
        return Err(AppError::validation(codes::validation::INVALID_VALUE)
            .message(format!(
                "conflict target ({}) does not name a unique constraint on {}",
                target.join(", "),
                table.name()
            ))
            .layer(ErrorLayer::Database)
            .detail("table", table.name())
            .detail("fields", target.to_vec())
            .get());
    }
    Ok(())
}

#[track_caller]
pub(crate) fn unknown_column(table: &TableDef, column: &str) -> AppError {
    AppError::db(codes::db::UNKNOWN_COLUMN)
        .message(format!("column {} does not exist on {}", column, table.name()))
        .layer(ErrorLayer::Database)
        .detail("table", table.name())
        .detail("field", column)
        .get()
}
