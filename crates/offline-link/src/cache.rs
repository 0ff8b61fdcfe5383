//! Cache capability and mutation side effects.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::error::CacheError;
use crate::identify::{identify, scalar_id};
use crate::operation::{ItemType, QueryType, ReplayContext};

/// Named list fields of a client-side cache.
///
/// Backs both the persisted operation log and the add/edit/remove side
/// effects of completed mutations.
pub trait Cache: Send + Sync {
    /// Read a list field; `None` if it was never written.
    fn read(&self, field: &str) -> Result<Option<Vec<Value>>, CacheError>;

    /// Replace a list field.
    fn write(&self, field: &str, items: Vec<Value>) -> Result<(), CacheError>;

    /// Append one item to a list field, creating it if absent.
    fn append(&self, field: &str, item: Value) -> Result<(), CacheError> {
        let mut items = self.read(field)?.unwrap_or_default();
        items.push(item);
        self.write(field, items)
    }

    /// Keep only the items of a list field matching `keep`.
    fn filter(&self, field: &str, keep: &dyn Fn(&Value) -> bool) -> Result<(), CacheError> {
        let Some(items) = self.read(field)? else {
            return Ok(());
        };
        self.write(field, items.into_iter().filter(|item| keep(item)).collect())
    }

    /// Overwrite `fields` on every cached entity of `type_name` with `id`.
    fn modify_entity(
        &self,
        type_name: &str,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<(), CacheError>;
}

/// In-memory cache.
///
/// Suitable for tests and for hosts that persist [`MemoryCache::snapshot`]
/// themselves.
#[derive(Debug, Default)]
pub struct MemoryCache {
    fields: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemoryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Export every field as one JSON object.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        let fields = self.fields.read();
        let map = fields
            .iter()
            .map(|(name, items)| (name.clone(), Value::Array(items.clone())))
            .collect();
        Value::Object(map)
    }

    /// Rebuild a cache from [`MemoryCache::snapshot`] output.
    pub fn restore(snapshot: &Value) -> Result<Self, CacheError> {
        let Some(map) = snapshot.as_object() else {
            return Err(CacheError::Corrupt {
                field: "<root>".to_string(),
                message: "snapshot is not an object".to_string(),
            });
        };
        let mut fields = HashMap::with_capacity(map.len());
        for (name, value) in map {
            let Some(items) = value.as_array() else {
                return Err(CacheError::Corrupt {
                    field: name.clone(),
                    message: "expected a list".to_string(),
                });
            };
            fields.insert(name.clone(), items.clone());
        }
        Ok(Self {
            fields: RwLock::new(fields),
        })
    }
}

impl Cache for MemoryCache {
    fn read(&self, field: &str) -> Result<Option<Vec<Value>>, CacheError> {
        Ok(self.fields.read().get(field).cloned())
    }

    fn write(&self, field: &str, items: Vec<Value>) -> Result<(), CacheError> {
        self.fields.write().insert(field.to_string(), items);
        Ok(())
    }

    fn append(&self, field: &str, item: Value) -> Result<(), CacheError> {
        self.fields
            .write()
            .entry(field.to_string())
            .or_default()
            .push(item);
        Ok(())
    }

    fn filter(&self, field: &str, keep: &dyn Fn(&Value) -> bool) -> Result<(), CacheError> {
        if let Some(items) = self.fields.write().get_mut(field) {
            items.retain(|item| keep(item));
        }
        Ok(())
    }

    fn modify_entity(
        &self,
        type_name: &str,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<(), CacheError> {
        let mut lists = self.fields.write();
        for item in lists.values_mut().flat_map(|items| items.iter_mut()) {
            let matches = item.get("__typename").and_then(Value::as_str) == Some(type_name)
                && identify(item).as_deref() == Some(id);
            if !matches {
                continue;
            }
            if let Some(object) = item.as_object_mut() {
                for (key, value) in fields {
                    object.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }
}

/// Cache side effect of a completed mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheUpdate {
    pub query_type: QueryType,
    pub item_type: ItemType,
    /// Target identifier.
    pub id: Option<String>,
    /// Raw input data.
    pub data: Value,
    /// Optimistic response; `add` inserts its `result`.
    pub optimistic_response: Value,
}

impl CacheUpdate {
    /// Derive the update described by a replay context.
    ///
    /// Returns `None` unless both the query type and the item type are known.
    #[must_use]
    pub fn from_context(context: &ReplayContext) -> Option<Self> {
        let query_type = context.query_type?;
        let item_type = context.item_type.clone()?;
        let mutate = &context.data_from_mutate_fn;
        Some(Self {
            query_type,
            item_type,
            id: mutate.id.clone(),
            data: mutate.data.clone(),
            optimistic_response: mutate.optimistic_response.clone(),
        })
    }

    /// Apply the side effect to `cache`.
    pub fn apply(&self, cache: &dyn Cache) -> Result<(), CacheError> {
        let list = self.item_type.type_name_plural.as_str();
        match self.query_type {
            QueryType::Add => match self.optimistic_response.get("result") {
                Some(result) => cache.append(list, result.clone()),
                None => Ok(()),
            },
            QueryType::Edit => {
                let Some(fields) = self.data.as_object() else {
                    return Ok(());
                };
                let Some(id) = identify(&self.data).or_else(|| self.id.clone()) else {
                    return Ok(());
                };
                cache.modify_entity(&self.item_type.type_name, &id, fields)
            }
            QueryType::Remove => {
                let Some(id) = self.id.as_deref() else {
                    return Ok(());
                };
                let id_field = self.item_type.id_field_name.as_str();
                cache.filter(list, &|item: &Value| {
                    item.get(id_field).and_then(scalar_id).as_deref() != Some(id)
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::operation::MutateData;

    fn todo() -> ItemType {
        ItemType::new("Todo", "todos")
    }

    fn update(query_type: QueryType, id: &str, data: Value) -> CacheUpdate {
        CacheUpdate {
            query_type,
            item_type: todo(),
            id: Some(id.to_string()),
            optimistic_response: json!({"result": {"__typename": "Todo", "id": id}}),
            data,
        }
    }

    #[test]
    fn append_and_filter() {
        let cache = MemoryCache::new();
        assert_eq!(cache.read("xs").unwrap(), None);
        cache.append("xs", json!(1)).unwrap();
        cache.append("xs", json!(2)).unwrap();
        cache.filter("xs", &|v: &Value| v != &json!(1)).unwrap();
        assert_eq!(cache.read("xs").unwrap(), Some(vec![json!(2)]));
        cache.filter("missing", &|_: &Value| false).unwrap();
        assert_eq!(cache.read("missing").unwrap(), None);
    }

    #[test]
    fn add_appends_optimistic_result() {
        let cache = MemoryCache::new();
        update(QueryType::Add, "temp_1", json!({"title": "milk"}))
            .apply(&cache)
            .unwrap();
        assert_eq!(
            cache.read("todos").unwrap(),
            Some(vec![json!({"__typename": "Todo", "id": "temp_1"})])
        );
    }

    #[test]
    fn edit_patches_matching_entity() {
        let cache = MemoryCache::new();
        cache
            .write(
                "todos",
                vec![
                    json!({"__typename": "Todo", "id": "1", "title": "old"}),
                    json!({"__typename": "Todo", "id": "2", "title": "keep"}),
                    json!({"__typename": "Note", "id": "1", "title": "other type"}),
                ],
            )
            .unwrap();
        update(QueryType::Edit, "1", json!({"id": "1", "title": "new"}))
            .apply(&cache)
            .unwrap();
        let todos = cache.read("todos").unwrap().unwrap();
        assert_eq!(todos[0]["title"], "new");
        assert_eq!(todos[1]["title"], "keep");
        assert_eq!(todos[2]["title"], "other type");
    }

    #[test]
    fn remove_filters_by_id_field() {
        let cache = MemoryCache::new();
        cache
            .write(
                "todos",
                vec![json!({"id": "1"}), json!({"id": "2"}), json!({"id": 3})],
            )
            .unwrap();
        update(QueryType::Remove, "1", Value::Null).apply(&cache).unwrap();
        update(QueryType::Remove, "3", Value::Null).apply(&cache).unwrap();
        assert_eq!(cache.read("todos").unwrap(), Some(vec![json!({"id": "2"})]));
    }

    #[test]
    fn from_context_requires_kind_and_type() {
        let mut context = ReplayContext {
            query_type: Some(QueryType::Remove),
            data_from_mutate_fn: MutateData {
                id: Some("9".to_string()),
                ..MutateData::default()
            },
            ..ReplayContext::default()
        };
        assert!(CacheUpdate::from_context(&context).is_none());
        context.item_type = Some(todo());
        let update = CacheUpdate::from_context(&context).unwrap();
        assert_eq!(update.id.as_deref(), Some("9"));
        assert_eq!(update.query_type, QueryType::Remove);
    }

    #[test]
    fn snapshot_restore() {
        let cache = MemoryCache::new();
        cache.append("todos", json!({"id": "1"})).unwrap();
        let restored = MemoryCache::restore(&cache.snapshot()).unwrap();
        assert_eq!(restored.read("todos").unwrap(), Some(vec![json!({"id": "1"})]));
        assert!(MemoryCache::restore(&json!([1])).is_err());
        assert!(matches!(
            MemoryCache::restore(&json!({"todos": 1})),
            Err(CacheError::Corrupt { field, .. }) if field == "todos"
        ));
    }
}
