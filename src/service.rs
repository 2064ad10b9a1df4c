//! Services: repository functions behind a null policy and error
//! normalization. This is the layer transport handlers call.

use crate::contract::ops;
use crate::error::{codes, AppError, ConfigError, ErrorLayer};
use crate::identity::Identity;
use crate::repository::{BoxFuture, Repository};
use crate::schema::invalid_format;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// What a `null` result means for an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullPolicy {
    /// `null` becomes `RESOURCE.NOT_FOUND`.
    Throw,
    Return,
}

impl NullPolicy {
    /// Point lookups and writes by id throw; creates and lists return.
    pub fn for_operation(operation: &str) -> Self {
        match operation {
            ops::GET_BY_ID | ops::UPDATE_BY_ID | ops::REMOVE_BY_ID => NullPolicy::Throw,
            _ => NullPolicy::Return,
        }
    }
}

pub type ServiceFn = Arc<dyn Fn(Arc<Repository>, Value) -> BoxFuture<anyhow::Result<Value>> + Send + Sync>;

#[derive(Clone)]
struct Entry {
    policy: NullPolicy,
    /// `None` forwards to the repository function of the same name.
    custom: Option<ServiceFn>,
}

#[derive(Clone)]
pub struct ServiceBuilder {
    repository: Arc<Repository>,
    entries: BTreeMap<String, Entry>,
}

impl ServiceBuilder {
    pub fn new(repository: Arc<Repository>) -> Self {
        ServiceBuilder {
            repository,
            entries: BTreeMap::new(),
        }
    }

    /// Expose every standard repository function with its default policy.
    pub fn register_standard_operations(&self) -> Self {
        ops::STANDARD
            .iter()
            .filter(|op| self.repository.has(op))
            .fold(self.clone(), |b, op| b.expose(op, NullPolicy::for_operation(op)))
    }

    /// Forward `operation` to the repository function of the same name.
    pub fn expose(&self, operation: &str, policy: NullPolicy) -> Self {
        let mut next = self.clone();
        next.entries.insert(operation.to_string(), Entry { policy, custom: None });
        next
    }

    /// Service-level logic, usually composing several repository calls.
    pub fn add_function<F, Fut>(&self, operation: &str, policy: NullPolicy, f: F) -> Self
    where
        F: Fn(Arc<Repository>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let mut next = self.clone();
        let f: ServiceFn = Arc::new(move |repo: Arc<Repository>, input: Value| -> BoxFuture<anyhow::Result<Value>> {
            Box::pin(f(repo, input))
        });
        next.entries.insert(
            operation.to_string(),
            Entry {
                policy,
                custom: Some(f),
            },
        );
        next
    }

    /// Change the policy of an already registered operation.
    pub fn with_null_policy(&self, operation: &str, policy: NullPolicy) -> Self {
        let mut next = self.clone();
        if let Some(entry) = next.entries.get_mut(operation) {
            entry.policy = policy;
        }
        next
    }

    pub fn done(&self) -> Result<Arc<Service>, ConfigError> {
        for (key, entry) in &self.entries {
            if entry.custom.is_none() && !self.repository.has(key) {
                return Err(ConfigError::Operation {
                    resource: self.repository.resource().name().to_string(),
                    operation: key.clone(),
                    reason: "no repository function to forward to".to_string(),
                });
            }
        }
        Ok(Arc::new(Service {
            repository: self.repository.clone(),
            entries: self.entries.clone(),
        }))
    }
}

impl fmt::Debug for ServiceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBuilder")
            .field("resource", &self.repository.resource().name())
            .field("operations", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub struct Service {
    repository: Arc<Repository>,
    entries: BTreeMap<String, Entry>,
}

impl Service {
    pub fn builder(repository: Arc<Repository>) -> ServiceBuilder {
        ServiceBuilder::new(repository)
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn null_policy(&self, operation: &str) -> Option<NullPolicy> {
        self.entries.get(operation).map(|e| e.policy)
    }

    /// Run an operation. Every error that leaves is typed.
    pub async fn call(&self, operation: &str, input: Value) -> Result<Value, AppError> {
        let resource = self.repository.resource().name().to_string();
        let Some(entry) = self.entries.get(operation) else {
            return AppError::server(codes::server::UNKNOWN_OPERATION)
                .message(format!("{} has no service operation {}", resource, operation))
                .layer(ErrorLayer::Service)
                .detail("operation", operation)
                .detail("resource", resource)
                .throw();
        };
        let input = self.check_input(operation, input)?;
        tracing::debug!(resource = %resource, operation, "service call");
        let result = match &entry.custom {
            Some(f) => f(self.repository.clone(), input).await,
            None => self.repository.call(operation, input).await,
        };
        match result {
            Ok(Value::Null) if entry.policy == NullPolicy::Throw => AppError::resource(codes::resource::NOT_FOUND)
                .message(format!("{} not found ({})", resource, operation))
                .layer(ErrorLayer::Service)
                .detail("operation", operation)
                .detail("resource", resource)
                .throw(),
            Ok(value) => Ok(value),
            Err(err) => Err(normalize(err, operation, &resource)),
        }
    }

    /// Like [`call`](Self::call), with the ownership field taken from the
    /// caller's identity.
    pub async fn call_for(&self, identity: &Identity, operation: &str, input: Value) -> Result<Value, AppError> {
        let input = match self.repository.resource().user_id() {
            Some(field) => {
                let mut map = match input {
                    Value::Object(map) => map,
                    Value::Null => Map::new(),
                    other => return self.call(operation, other).await,
                };
                map.insert(field.to_string(), identity.id().clone());
                Value::Object(map)
            }
            None => input,
        };
        self.call(operation, input).await
    }

    /// [`call`](Self::call) with the result deserialized into `T`.
    pub async fn call_as<T: DeserializeOwned>(&self, operation: &str, input: Value) -> Result<T, AppError> {
        let value = self.call(operation, input).await?;
        serde_json::from_value(value).map_err(|e| {
            AppError::server(codes::server::INTERNAL_ERROR)
                .message(format!("{} result does not match the requested type: {}", operation, e))
                .layer(ErrorLayer::Service)
                .detail("operation", operation)
                .cause(e)
                .get()
        })
    }

    /// Validate against the service schema when it differs from the one the
    /// repository already checks.
    fn check_input(&self, operation: &str, input: Value) -> Result<Value, AppError> {
        let contract = self.repository.contract();
        let Some(schema) = contract.service_schema(operation) else {
            return Ok(input);
        };
        if self.repository.has(operation) && contract.query_schema(operation) == Some(schema) {
            return Ok(input);
        }
        schema.validate(&input).map_err(|issues| {
            invalid_format(issues, ErrorLayer::Service)
                .with_detail("operation", operation)
                .with_detail("resource", self.repository.resource().name())
        })
    }
}

/// Typed errors pass through; anything else becomes `SERVER.INTERNAL_ERROR`
/// with the original attached.
#[track_caller]
fn normalize(err: anyhow::Error, operation: &str, resource: &str) -> AppError {
    match err.downcast::<AppError>() {
        Ok(typed) => typed,
        Err(other) => AppError::server(codes::server::INTERNAL_ERROR)
            .message(format!("{} on {} failed: {}", operation, resource, other))
            .layer(ErrorLayer::Service)
            .detail("operation", operation)
            .detail("resource", resource)
            .cause(other)
            .get(),
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("resource", &self.repository.resource().name())
            .field("operations", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
