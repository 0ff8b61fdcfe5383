//! Durable encoding of queued operations.
//!
//! Context extensions are [`SharedValue`] graphs: nodes are reference
//! counted and may point at each other, including cycles. The
//! [`CyclicSerializer`] remembers every node it has entered and omits any
//! node reached a second time, so encoding never fails on a graph that is
//! otherwise valid JSON.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::LinkError;
use crate::operation::{GraphqlQuery, Operation, OperationContext, ReplayContext};

/// A JSON-like value whose objects and lists can be shared.
#[derive(Clone)]
pub enum SharedValue {
    /// Plain owned JSON.
    Json(Value),
    /// Shared object node, fields in insertion order.
    Object(Arc<RwLock<Vec<(String, SharedValue)>>>),
    /// Shared list node.
    List(Arc<RwLock<Vec<SharedValue>>>),
}

impl SharedValue {
    /// New empty object node.
    #[must_use]
    pub fn object() -> Self {
        Self::Object(Arc::new(RwLock::new(Vec::new())))
    }

    /// New empty list node.
    #[must_use]
    pub fn list() -> Self {
        Self::List(Arc::new(RwLock::new(Vec::new())))
    }

    /// Set `key` on an object node, replacing an existing field.
    ///
    /// Returns `false` if `self` is not an object node.
    pub fn insert(&self, key: impl Into<String>, value: Self) -> bool {
        let Self::Object(node) = self else {
            return false;
        };
        let key = key.into();
        let mut fields = node.write();
        if let Some(slot) = fields.iter_mut().find(|(name, _)| *name == key) {
            slot.1 = value;
        } else {
            fields.push((key, value));
        }
        true
    }

    /// Append to a list node.
    ///
    /// Returns `false` if `self` is not a list node.
    pub fn push(&self, value: Self) -> bool {
        let Self::List(node) = self else {
            return false;
        };
        node.write().push(value);
        true
    }

    fn identity(&self) -> Option<usize> {
        match self {
            Self::Json(_) => None,
            Self::Object(node) => Some(Arc::as_ptr(node).cast::<()>() as usize),
            Self::List(node) => Some(Arc::as_ptr(node).cast::<()>() as usize),
        }
    }
}

impl From<Value> for SharedValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

// Shared nodes print by address so cyclic graphs stay printable.
impl fmt::Debug for SharedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(value) => write!(f, "Json({value})"),
            Self::Object(node) => write!(f, "Object({:p})", Arc::as_ptr(node)),
            Self::List(node) => write!(f, "List({:p})", Arc::as_ptr(node)),
        }
    }
}

/// Walks [`SharedValue`] graphs into plain JSON, dropping revisited nodes.
///
/// A revisited object field is left out; a revisited list element becomes
/// `null`. One serializer instance shares its visited set across every
/// value it encodes.
#[derive(Debug, Default)]
pub struct CyclicSerializer {
    seen: HashSet<usize>,
    omitted: usize,
}

impl CyclicSerializer {
    /// Create a serializer with an empty visited set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `value`, or `None` if it was already visited.
    pub fn to_json(&mut self, value: &SharedValue) -> Option<Value> {
        if let Some(identity) = value.identity() {
            if !self.seen.insert(identity) {
                self.omitted += 1;
                return None;
            }
        }
        match value {
            SharedValue::Json(json) => Some(json.clone()),
            SharedValue::Object(node) => {
                let fields = node.read();
                let mut map = Map::with_capacity(fields.len());
                for (key, child) in fields.iter() {
                    if let Some(json) = self.to_json(child) {
                        map.insert(key.clone(), json);
                    }
                }
                Some(Value::Object(map))
            }
            SharedValue::List(node) => {
                let items = node.read();
                let list = items
                    .iter()
                    .map(|child| self.to_json(child).unwrap_or(Value::Null))
                    .collect();
                Some(Value::Array(list))
            }
        }
    }

    /// Number of revisited nodes dropped so far.
    #[must_use]
    pub const fn omitted(&self) -> usize {
        self.omitted
    }
}

/// Context keys owned by [`ReplayContext`]; extensions may not reuse them.
pub const REPLAY_CONTEXT_FIELDS: [&str; 5] = [
    "serializationKey",
    "tracked",
    "queryType",
    "itemType",
    "dataFromMutateFn",
];

/// Persisted context: replay metadata with extensions flattened alongside.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedContext {
    #[serde(flatten)]
    pub replay: ReplayContext,
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

/// Payload stored in a record's `args` string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedArgs {
    /// Document text.
    #[serde(alias = "mutation")]
    pub document_text: String,
    /// Variables by name.
    #[serde(default)]
    pub variables: Map<String, Value>,
    /// Replay context.
    #[serde(default, alias = "ctx")]
    pub context: PersistedContext,
}

impl PersistedArgs {
    /// Capture `operation`, dropping repeated extension nodes.
    #[must_use]
    pub fn capture(operation: &Operation) -> Self {
        let mut serializer = CyclicSerializer::new();
        let mut extensions = Map::new();
        for (key, value) in &operation.context.extensions {
            if REPLAY_CONTEXT_FIELDS.contains(&key.as_str()) {
                debug!(key = %key, "dropped context extension shadowing replay metadata");
                continue;
            }
            if let Some(json) = serializer.to_json(value) {
                extensions.insert(key.clone(), json);
            }
        }
        if serializer.omitted() > 0 {
            debug!(
                omitted = serializer.omitted(),
                "dropped repeated context references"
            );
        }
        Self {
            document_text: operation.query.as_str().to_string(),
            variables: operation.variables.clone(),
            context: PersistedContext {
                replay: operation.context.replay.clone(),
                extensions,
            },
        }
    }

    /// Decode an `args` string.
    pub fn parse(text: &str) -> Result<Self, LinkError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode as an `args` string.
    pub fn to_json_string(&self) -> Result<String, LinkError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Rebuild an operation; extensions come back as plain JSON.
    #[must_use]
    pub fn into_operation(self) -> Operation {
        let mut context = OperationContext::new(self.context.replay);
        for (key, value) in self.context.extensions {
            context.extensions.insert(key, SharedValue::Json(value));
        }
        Operation {
            query: GraphqlQuery::new(self.document_text),
            variables: self.variables,
            context,
        }
    }
}

/// Encode `operation` as a durable `args` string.
pub fn serialize_operation(operation: &Operation) -> Result<String, LinkError> {
    PersistedArgs::capture(operation).to_json_string()
}
