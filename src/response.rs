//! Success envelope helpers: `{ success: true, data, meta? }`.

use axum::{http::StatusCode, Json};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct SuccessOne<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct SuccessMany<T> {
    pub success: bool,
    pub data: Vec<T>,
    pub meta: MetaCount,
}

#[derive(Debug, Serialize)]
pub struct MetaCount {
    pub count: u64,
}

pub fn success_one<T: Serialize>(status: StatusCode, data: T) -> (StatusCode, Json<SuccessOne<T>>) {
    (
        status,
        Json(SuccessOne {
            success: true,
            data,
            meta: None,
        }),
    )
}

pub fn success_many<T: Serialize>(status: StatusCode, data: Vec<T>) -> (StatusCode, Json<SuccessMany<T>>) {
    let count = data.len() as u64;
    (
        status,
        Json(SuccessMany {
            success: true,
            data,
            meta: MetaCount { count },
        }),
    )
}

/// Service results are JSON already; arrays get a count.
pub fn success_value(status: StatusCode, data: Value) -> (StatusCode, Json<Value>) {
    let body = match data {
        Value::Array(items) => serde_json::json!({
            "success": true,
            "meta": { "count": items.len() },
            "data": items,
        }),
        other => serde_json::json!({ "success": true, "data": other }),
    };
    (status, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn arrays_carry_a_count() {
        let (status, Json(body)) = success_value(StatusCode::OK, json!([{ "id": 1 }, { "id": 2 }]));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true, "data": [{ "id": 1 }, { "id": 2 }], "meta": { "count": 2 } }));
    }

    #[test]
    fn single_values_have_no_meta() {
        let (status, Json(body)) = success_one(StatusCode::CREATED, json!({ "id": 1 }));
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(serde_json::to_value(body).unwrap(), json!({ "success": true, "data": { "id": 1 } }));
    }

    #[test]
    fn many_counts() {
        let (_, Json(body)) = success_many(StatusCode::OK, vec!["a", "b", "c"]);
        assert_eq!(body.meta.count, 3);
        assert!(body.success);
    }
}
