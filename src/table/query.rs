//! Pagination bounds and identifier filters.

use crate::sql::Filter;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const DEFAULT_PAGE_SIZE: i64 = 100;
pub const MAX_PAGE_SIZE: i64 = 1000;
/// Keeps `(page - 1) * page_size` inside a PostgreSQL `bigint`.
pub const MAX_PAGE: i64 = i64::MAX / MAX_PAGE_SIZE;

/// `{ 1 <= page <= MAX_PAGE, 0 <= page_size <= MAX_PAGE_SIZE }`, clamped
/// before use; callers are never trusted with the bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default = "first_page", deserialize_with = "saturating")]
    pub page: i64,
    #[serde(default = "default_page_size", deserialize_with = "saturating")]
    pub page_size: i64,
}

/// Any JSON number, saturated into `i64`; clamping happens later.
fn saturating<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let n = serde_json::Number::deserialize(deserializer)?;
    Ok(match (n.as_i64(), n.as_u64()) {
        (Some(i), _) => i,
        (None, Some(_)) => i64::MAX,
        (None, None) => n.as_f64().map(|f| f as i64).unwrap_or(0),
    })
}

fn first_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Pagination {
    pub fn new(page: i64, page_size: i64) -> Self {
        Pagination { page, page_size }
    }

    pub fn clamped(self) -> Self {
        Pagination {
            page: self.page.clamp(1, MAX_PAGE),
            page_size: self.page_size.clamp(0, MAX_PAGE_SIZE),
        }
    }

    pub fn limit(&self) -> u64 {
        self.clamped().page_size as u64
    }

    pub fn offset(&self) -> u64 {
        let p = self.clamped();
        ((p.page - 1) * p.page_size) as u64
    }
}

/// A `(field, value)` equality scoped to the bound table. A list of these is
/// a conjunction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Identifier {
    pub field: String,
    pub value: Value,
}

impl Identifier {
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Identifier {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn to_filter(&self) -> Filter {
        Filter::Eq {
            field: self.field.clone(),
            value: self.value.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, -5, 1, 0, 0, 0)]
    #[case(1, 10, 1, 10, 10, 0)]
    #[case(3, 25, 3, 25, 25, 50)]
    #[case(-2, 5000, 1, 1000, 1000, 0)]
    #[case(2, 5000, 2, 1000, 1000, 1000)]
    fn clamps_bounds(
        #[case] page: i64,
        #[case] size: i64,
        #[case] want_page: i64,
        #[case] want_size: i64,
        #[case] limit: u64,
        #[case] offset: u64,
    ) {
        let p = Pagination::new(page, size);
        assert_eq!(p.clamped(), Pagination::new(want_page, want_size));
        assert_eq!(p.limit(), limit);
        assert_eq!(p.offset(), offset);
    }

    #[test]
    fn deserializes_with_defaults() {
        let p: Pagination = serde_json::from_str(r#"{"page_size": 5}"#).unwrap();
        assert_eq!(p, Pagination::new(1, 5));
        let p: Pagination = serde_json::from_str("{}").unwrap();
        assert_eq!(p, Pagination::default());
    }

    #[test]
    fn oversized_numbers_saturate_then_clamp() {
        let p: Pagination = serde_json::from_str(r#"{"page": 18446744073709551615, "page_size": 2.5}"#).unwrap();
        assert_eq!(p, Pagination::new(i64::MAX, 2));
        assert_eq!(p.clamped().page, MAX_PAGE);
        assert!(serde_json::from_str::<Pagination>(r#"{"page": "2"}"#).is_err());
    }

    #[test]
    fn offset_stays_inside_bigint() {
        let p = Pagination::new(i64::MAX, MAX_PAGE_SIZE);
        assert_eq!(p.offset(), ((MAX_PAGE - 1) * MAX_PAGE_SIZE) as u64);
        assert!(p.offset() <= i64::MAX as u64);
    }
}
