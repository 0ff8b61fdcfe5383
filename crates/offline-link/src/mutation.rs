//! Mutation preparation: identifier selection, optimistic response, and
//! replay metadata.

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::client::MutationRequest;
use crate::identify::{DEFAULT_TEMP_ID_PREFIX, identify, scalar_id};
use crate::operation::{GraphqlQuery, ItemType, MutateData, QueryType, ReplayContext};

/// A fresh placeholder identifier.
#[must_use]
pub fn temporary_id(prefix: &str) -> String {
    format!("{prefix}{}", Uuid::new_v4())
}

/// Builds tracked mutation requests for one mutation document.
#[derive(Debug, Clone)]
pub struct MutationBuilder {
    mutation: GraphqlQuery,
    item_type: ItemType,
    query_type: QueryType,
    temp_id_prefix: String,
}

impl MutationBuilder {
    #[must_use]
    pub fn new(mutation: GraphqlQuery, item_type: ItemType, query_type: QueryType) -> Self {
        Self {
            mutation,
            item_type,
            query_type,
            temp_id_prefix: DEFAULT_TEMP_ID_PREFIX.to_string(),
        }
    }

    /// Set the prefix of generated placeholder identifiers.
    #[must_use]
    pub fn with_temp_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.temp_id_prefix = prefix.into();
        self
    }

    /// Build a request for `data`.
    #[must_use]
    pub fn build(&self, data: Value) -> MutationRequest {
        self.build_with_fallback(data, None)
    }

    /// Build a request for `data`, using `fallback_id` when `data` carries
    /// no identifier.
    ///
    /// `data` is either an input object or a bare identifier. Without any
    /// identifier a temporary one is generated.
    #[must_use]
    pub fn build_with_fallback(&self, data: Value, fallback_id: Option<&str>) -> MutationRequest {
        let id_field = self.item_type.id_field_name.as_str();
        let fields = data.as_object().cloned().unwrap_or_default();
        let supplied = if data.is_object() {
            fields
                .get(id_field)
                .and_then(scalar_id)
                .or_else(|| identify(&data))
        } else {
            scalar_id(&data)
        };
        let id = supplied
            .or_else(|| fallback_id.filter(|id| !id.is_empty()).map(str::to_string))
            .unwrap_or_else(|| temporary_id(&self.temp_id_prefix));

        let mut result = Map::new();
        result.insert(
            "__typename".to_string(),
            Value::String(self.item_type.type_name.clone()),
        );
        result.insert("id".to_string(), Value::String(id.clone()));
        result.insert(id_field.to_string(), Value::String(id.clone()));
        result.extend(fields.clone());
        let mut optimistic = Map::new();
        optimistic.insert("result".to_string(), Value::Object(result));
        let optimistic_response = Value::Object(optimistic);

        let mut variables = fields;
        // A falsy id in `data` must not shadow the chosen one.
        variables.insert("id".to_string(), Value::String(id.clone()));

        let replay = ReplayContext {
            serialization_key: Some(id.clone()),
            tracked: true,
            query_type: Some(self.query_type),
            item_type: Some(self.item_type.clone()),
            data_from_mutate_fn: MutateData {
                id: Some(id),
                data,
                optimistic_response,
            },
        };
        MutationRequest::new(self.mutation.clone(), variables).with_replay_context(replay)
    }
}

/// Prepare a tracked mutation with the default placeholder prefix.
#[must_use]
pub fn prepare_mutation(
    mutation: GraphqlQuery,
    item_type: ItemType,
    query_type: QueryType,
    data: Value,
    fallback_id: Option<&str>,
) -> MutationRequest {
    MutationBuilder::new(mutation, item_type, query_type).build_with_fallback(data, fallback_id)
}
