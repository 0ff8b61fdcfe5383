//! Operation, replay context, and result types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GraphqlError;
use crate::identify::identify_map;
use crate::serialize::SharedValue;

/// GraphQL document wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphqlQuery {
    query: String,
}

impl GraphqlQuery {
    /// Create a new document from a string.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
        }
    }

    /// Create a new document from a static string.
    #[must_use]
    pub fn from_static(query: &'static str) -> Self {
        Self::new(query)
    }

    /// Return the document text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.query
    }
}

/// Semantic kind of a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    /// Creates an entity.
    Add,
    /// Updates fields of an existing entity.
    Edit,
    /// Deletes an entity.
    Remove,
}

/// Type descriptor of the entity a mutation targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemType {
    /// GraphQL type name (`Todo`).
    pub type_name: String,
    /// Name of the list field holding every entity of this type (`todos`).
    #[serde(alias = "typeNamePluralCamelCase")]
    pub type_name_plural: String,
    /// Field holding the entity identifier.
    #[serde(default = "default_id_field")]
    pub id_field_name: String,
}

fn default_id_field() -> String {
    "id".to_string()
}

impl ItemType {
    /// Create a descriptor whose identifier lives in `id`.
    #[must_use]
    pub fn new(type_name: impl Into<String>, type_name_plural: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            type_name_plural: type_name_plural.into(),
            id_field_name: default_id_field(),
        }
    }

    /// Override the identifier field.
    #[must_use]
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field_name = field.into();
        self
    }
}

/// Input captured when the mutation was first issued.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutateData {
    /// Target identifier (possibly temporary).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Raw input data.
    #[serde(default)]
    pub data: Value,
    /// Optimistic response shown before the server answered.
    #[serde(default)]
    pub optimistic_response: Value,
}

/// Metadata needed to replay an operation and reapply its cache update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayContext {
    /// Key used downstream to serialize writes to one entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serialization_key: Option<String>,
    /// Whether the operation was issued by the tracked mutation path.
    #[serde(default)]
    pub tracked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_type: Option<QueryType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<ItemType>,
    #[serde(default)]
    pub data_from_mutate_fn: MutateData,
}

/// Context bag travelling with an operation.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    /// Typed replay metadata.
    pub replay: ReplayContext,
    /// Free-form values; may share or reference each other.
    pub extensions: BTreeMap<String, SharedValue>,
}

impl OperationContext {
    /// Wrap replay metadata with an empty extension bag.
    #[must_use]
    pub fn new(replay: ReplayContext) -> Self {
        Self {
            replay,
            extensions: BTreeMap::new(),
        }
    }
}

/// A request travelling through the link chain.
#[derive(Debug, Clone)]
pub struct Operation {
    /// Query or mutation document.
    pub query: GraphqlQuery,
    /// Variables by name.
    pub variables: Map<String, Value>,
    /// Replay metadata and extensions.
    pub context: OperationContext,
}

impl Operation {
    /// Create an operation with an empty context.
    #[must_use]
    pub fn new(query: GraphqlQuery, variables: Map<String, Value>) -> Self {
        Self {
            query,
            variables,
            context: OperationContext::default(),
        }
    }

    /// Create an operation from a JSON object of variables.
    ///
    /// Non-object values yield an operation without variables.
    #[must_use]
    pub fn from_json(query: GraphqlQuery, variables: Value) -> Self {
        let variables = match variables {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(query, variables)
    }

    /// Attach replay metadata.
    #[must_use]
    pub fn with_replay_context(mut self, replay: ReplayContext) -> Self {
        self.context.replay = replay;
        self
    }

    /// Attach an extension value.
    #[must_use]
    pub fn with_extension(mut self, key: impl Into<String>, value: SharedValue) -> Self {
        self.context.extensions.insert(key.into(), value);
        self
    }

    /// Identifier of the entity this operation targets.
    #[must_use]
    pub fn identifier(&self) -> Option<String> {
        identify_map(&self.variables)
    }

    /// Rewrite the `id` variable.
    pub fn set_id(&mut self, id: &str) {
        self.variables
            .insert("id".to_string(), Value::String(id.to_string()));
    }
}

/// GraphQL response container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct GraphqlResponse<T> {
    /// Response data.
    #[serde(default)]
    pub data: Option<T>,
    /// GraphQL errors.
    #[serde(default)]
    pub errors: Vec<GraphqlError>,
    /// Extensions payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl<T> GraphqlResponse<T> {
    /// Returns `true` if no GraphQL errors were returned.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// One value emitted on an operation's result stream.
pub type FetchResult = GraphqlResponse<Value>;

impl GraphqlResponse<Value> {
    /// Build a successful response.
    #[must_use]
    pub fn from_data(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
            extensions: None,
        }
    }

    /// The mutation payload under `data.result`.
    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        self.data.as_ref()?.get("result")
    }
}
