//! Contracts map operation names to per-layer input schemas.
//!
//! Pure data: the repository validates against `query`, the service against
//! `service`, transports against `endpoint`, and clients build forms from
//! `form`.

use crate::error::ConfigError;
use crate::resource::Resource;
use crate::schema::{FieldSchema, Schema};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Standard operation names.
pub mod ops {
    pub const CREATE: &str = "create";
    pub const CREATE_MANY: &str = "createMany";
    pub const GET_MANY: &str = "getMany";
    pub const GET_BY_ID: &str = "getById";
    pub const UPDATE_BY_ID: &str = "updateById";
    pub const REMOVE_BY_ID: &str = "removeById";

    pub const STANDARD: [&str; 6] = [CREATE, CREATE_MANY, GET_MANY, GET_BY_ID, UPDATE_BY_ID, REMOVE_BY_ID];
}

/// What a transport validates, split by request part.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct EndpointSchemas {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Schema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<Schema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Schema>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct OperationSchemas {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<Schema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<Schema>,
    pub endpoint: EndpointSchemas,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form: Option<Schema>,
}

impl OperationSchemas {
    /// Same input shape for the repository and the service.
    pub fn with_input(schema: Schema) -> Self {
        OperationSchemas {
            query: Some(schema.clone()),
            service: Some(schema),
            ..Default::default()
        }
    }

    /// Schema set for one of the [`ops::STANDARD`] operations.
    pub fn standard(resource: &Resource, op: &str) -> Option<Self> {
        let s = resource.schemas();
        let with_owner = |schema: Schema| match &s.user_id {
            Some(owner) => schema.merge(owner),
            None => schema,
        };
        let ids = FieldSchema::object(s.id.clone());
        let schemas = match op {
            ops::CREATE => OperationSchemas {
                endpoint: EndpointSchemas {
                    body: Some(s.create_data.clone()),
                    ..Default::default()
                },
                form: Some(s.create_data.clone()),
                ..Self::with_input(with_owner(
                    Schema::new().field("data", FieldSchema::object(s.create_data.clone())),
                ))
            },
            ops::CREATE_MANY => {
                let data = Schema::new().field(
                    "data",
                    FieldSchema::array(FieldSchema::object(s.create_data.clone())),
                );
                OperationSchemas {
                    endpoint: EndpointSchemas {
                        body: Some(data.clone()),
                        ..Default::default()
                    },
                    ..Self::with_input(with_owner(data))
                }
            }
            ops::GET_MANY => {
                let mut input = Schema::new();
                for (name, field) in [
                    ("filters", &s.filters),
                    ("pagination", &s.pagination),
                    ("ordering", &s.ordering),
                ] {
                    if let Some(field) = field {
                        input = input.field(name, field.clone());
                    }
                }
                OperationSchemas {
                    endpoint: EndpointSchemas {
                        query: Some(input.clone()),
                        ..Default::default()
                    },
                    ..Self::with_input(with_owner(input))
                }
            }
            ops::GET_BY_ID | ops::REMOVE_BY_ID => OperationSchemas {
                endpoint: EndpointSchemas {
                    params: Some(s.id.clone()),
                    ..Default::default()
                },
                ..Self::with_input(with_owner(Schema::new().field("ids", ids)))
            },
            ops::UPDATE_BY_ID => OperationSchemas {
                endpoint: EndpointSchemas {
                    params: Some(s.id.clone()),
                    body: Some(s.update_data.clone()),
                    ..Default::default()
                },
                form: Some(s.update_data.clone()),
                ..Self::with_input(with_owner(
                    Schema::new()
                        .field("ids", ids)
                        .field("data", FieldSchema::object(s.update_data.clone())),
                ))
            },
            _ => return None,
        };
        Some(schemas)
    }
}

#[derive(Clone, Debug)]
pub struct ContractBuilder {
    resource: Arc<Resource>,
    operations: BTreeMap<String, OperationSchemas>,
}

impl ContractBuilder {
    pub fn new(resource: Arc<Resource>) -> Self {
        ContractBuilder {
            resource,
            operations: BTreeMap::new(),
        }
    }

    pub fn register_all_standard(&self) -> Self {
        let mut next = self.clone();
        for op in ops::STANDARD {
            if let Some(schemas) = OperationSchemas::standard(&self.resource, op) {
                next.operations.insert(op.to_string(), schemas);
            }
        }
        next
    }

    /// Add or replace one operation's schemas, built from the resource.
    pub fn add_operation<F>(&self, key: &str, f: F) -> Self
    where
        F: FnOnce(&Resource) -> OperationSchemas,
    {
        let mut next = self.clone();
        next.operations.insert(key.to_string(), f(&self.resource));
        next
    }

    pub fn done(&self) -> Result<Arc<Contract>, ConfigError> {
        for (key, schemas) in &self.operations {
            if schemas.query.is_none() && schemas.service.is_none() {
                return Err(ConfigError::Operation {
                    resource: self.resource.name().to_string(),
                    operation: key.clone(),
                    reason: "no query or service schema".to_string(),
                });
            }
        }
        Ok(Arc::new(Contract {
            resource: self.resource.clone(),
            operations: self.operations.clone(),
        }))
    }
}

#[derive(Debug)]
pub struct Contract {
    resource: Arc<Resource>,
    operations: BTreeMap<String, OperationSchemas>,
}

impl Contract {
    pub fn builder(resource: Arc<Resource>) -> ContractBuilder {
        ContractBuilder::new(resource)
    }

    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    pub fn operation(&self, key: &str) -> Option<&OperationSchemas> {
        self.operations.get(key)
    }

    pub fn operations(&self) -> impl Iterator<Item = (&str, &OperationSchemas)> {
        self.operations.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Repository input schema: the query layer, else the service layer.
    pub fn query_schema(&self, key: &str) -> Option<&Schema> {
        let op = self.operations.get(key)?;
        op.query.as_ref().or(op.service.as_ref())
    }

    /// Service input schema: the service layer, else the query layer.
    pub fn service_schema(&self, key: &str) -> Option<&Schema> {
        let op = self.operations.get(key)?;
        op.service.as_ref().or(op.query.as_ref())
    }
}
