//! The authenticated caller, as far as this crate cares: an id plus opaque
//! claims. Issuing and verifying sessions happens elsewhere.

use crate::error::{codes, AppError, ErrorLayer};
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Header a trusted gateway may set. Read only when
/// [`trust_user_header`](crate::middleware::trust_user_header) is mounted.
pub const USER_ID_HEADER: &str = "X-User-ID";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    id: Value,
    #[serde(flatten)]
    claims: Map<String, Value>,
}

impl Identity {
    pub fn new(id: impl Into<Value>) -> Self {
        Identity {
            id: id.into(),
            claims: Map::new(),
        }
    }

    pub fn with_claim(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.claims.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &Value {
        &self.id
    }

    pub fn claim(&self, key: &str) -> Option<&Value> {
        self.claims.get(key)
    }

    fn from_parts(parts: &Parts) -> Option<Self> {
        parts.extensions.get::<Identity>().cloned()
    }
}

/// Rejects with `AUTH.UNAUTHORIZED` when no identity is present.
#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match Identity::from_parts(parts) {
            Some(identity) => Ok(identity),
            None => AppError::auth(codes::auth::UNAUTHORIZED)
                .message("request carries no identity")
                .layer(ErrorLayer::Endpoint)
                .throw(),
        }
    }
}

/// Identity when present; never rejects.
#[derive(Clone, Debug)]
pub struct MaybeIdentity(pub Option<Identity>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeIdentity
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeIdentity(Identity::from_parts(parts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use serde_json::json;

    fn parts(builder: axum::http::request::Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn identity_comes_from_the_extension() {
        let mut p = parts(Request::builder());
        p.extensions.insert(Identity::new("u1").with_claim("role", "admin"));
        let identity = Identity::from_request_parts(&mut p, &()).await.unwrap();
        assert_eq!(identity.id(), &json!("u1"));
        assert_eq!(identity.claim("role"), Some(&json!("admin")));
    }

    #[tokio::test]
    async fn a_bare_user_header_is_not_an_identity() {
        let mut p = parts(Request::builder().header(USER_ID_HEADER, "someone-else"));
        let err = Identity::from_request_parts(&mut p, &()).await.unwrap_err();
        assert_eq!(err.key(), "AUTH.UNAUTHORIZED");
        assert_eq!(err.http_status(), 401);
        let MaybeIdentity(none) = MaybeIdentity::from_request_parts(&mut p, &()).await.unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn claims_flatten_on_the_wire() {
        let identity: Identity = serde_json::from_value(json!({ "id": 7, "email": "a@b.c" })).unwrap();
        assert_eq!(identity.id(), &json!(7));
        assert_eq!(serde_json::to_value(&identity).unwrap(), json!({ "id": 7, "email": "a@b.c" }));
    }
}
