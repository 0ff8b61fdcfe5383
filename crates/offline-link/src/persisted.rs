//! Durable mirror of the pending queue.
//!
//! Records live newest-first in one reserved list field of the cache. The
//! log is only as durable as the cache itself.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::cache::Cache;
use crate::error::LinkError;
use crate::serialize::PersistedArgs;

/// Type tag carried by every persisted record.
pub const PENDING_OPERATION_TYPE_NAME: &str = "OfflineUsagePendingOperation";

/// Cache field holding the persisted records.
pub const PENDING_OPERATIONS_FIELD: &str = "OfflineUsagePendingOperations";

/// One queued operation as stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedOperationRecord {
    /// Bucket key.
    pub id: String,
    /// JSON text of [`PersistedArgs`].
    pub args: String,
    #[serde(rename = "__typename", alias = "typeTag")]
    pub type_tag: String,
}

impl PersistedOperationRecord {
    /// Create a record for `key`.
    #[must_use]
    pub fn new(key: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            id: key.into(),
            args: args.into(),
            type_tag: PENDING_OPERATION_TYPE_NAME.to_string(),
        }
    }

    /// Decode the payload.
    pub fn parse_args(&self) -> Result<PersistedArgs, LinkError> {
        PersistedArgs::parse(&self.args)
    }
}

/// Handle on the persisted record list.
#[derive(Clone)]
pub struct PersistedOperationLog {
    cache: Arc<dyn Cache>,
    field: String,
}

impl std::fmt::Debug for PersistedOperationLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedOperationLog")
            .field("field", &self.field)
            .finish_non_exhaustive()
    }
}

impl PersistedOperationLog {
    /// Log stored under `field` of `cache`.
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>, field: impl Into<String>) -> Self {
        Self {
            cache,
            field: field.into(),
        }
    }

    /// The backing cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    /// Current records, newest first; `None` if the field was never written.
    ///
    /// Items that do not decode as records are skipped.
    pub fn records(&self) -> Result<Option<Vec<PersistedOperationRecord>>, LinkError> {
        let Some(items) = self.cache.read(&self.field)? else {
            return Ok(None);
        };
        let records = items
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(field = %self.field, error = %err, "skipping undecodable persisted record");
                    None
                }
            })
            .collect();
        Ok(Some(records))
    }

    /// Current records, initializing the field to an empty list if absent.
    pub fn ensure(&self) -> Result<Vec<PersistedOperationRecord>, LinkError> {
        if let Some(records) = self.records()? {
            return Ok(records);
        }
        self.cache.write(&self.field, Vec::new())?;
        Ok(Vec::new())
    }

    /// Number of stored records.
    pub fn len(&self) -> Result<usize, LinkError> {
        Ok(self.records()?.map_or(0, |records| records.len()))
    }

    /// Returns `true` if no record is stored.
    pub fn is_empty(&self) -> Result<bool, LinkError> {
        Ok(self.len()? == 0)
    }

    /// Insert `record` at the head of the list.
    pub fn prepend(&self, record: &PersistedOperationRecord) -> Result<(), LinkError> {
        let mut items = self.cache.read(&self.field)?.unwrap_or_default();
        items.insert(0, serde_json::to_value(record)?);
        self.cache.write(&self.field, items)?;
        Ok(())
    }

    /// Remove one record for `key`.
    ///
    /// Prefers the record whose payload equals `args`, else the first with
    /// the key. Returns `false` if nothing matched.
    pub fn remove(&self, key: &str, args: Option<&str>) -> Result<bool, LinkError> {
        let Some(mut items) = self.cache.read(&self.field)? else {
            return Ok(false);
        };
        let Some(index) = find_record(&items, key, args) else {
            return Ok(false);
        };
        items.remove(index);
        self.cache.write(&self.field, items)?;
        Ok(true)
    }

    /// Drop every item that does not decode as a record.
    ///
    /// Returns the number of dropped items.
    pub fn discard_undecodable(&self) -> Result<usize, LinkError> {
        let Some(items) = self.cache.read(&self.field)? else {
            return Ok(0);
        };
        let before = items.len();
        let kept: Vec<Value> = items
            .into_iter()
            .filter(|item| serde_json::from_value::<PersistedOperationRecord>(item.clone()).is_ok())
            .collect();
        let dropped = before - kept.len();
        if dropped > 0 {
            self.cache.write(&self.field, kept)?;
        }
        Ok(dropped)
    }

    /// Swap the payload of the record holding `old_args` under `key`.
    pub fn replace(&self, key: &str, old_args: &str, new_args: &str) -> Result<bool, LinkError> {
        let Some(mut items) = self.cache.read(&self.field)? else {
            return Ok(false);
        };
        let Some(index) = items.iter().position(|item| is_record(item, key, Some(old_args))) else {
            return Ok(false);
        };
        items[index] = serde_json::to_value(PersistedOperationRecord::new(key, new_args))?;
        self.cache.write(&self.field, items)?;
        Ok(true)
    }
}

fn is_record(item: &Value, key: &str, args: Option<&str>) -> bool {
    item.get("id").and_then(Value::as_str) == Some(key)
        && args.is_none_or(|args| item.get("args").and_then(Value::as_str) == Some(args))
}

fn find_record(items: &[Value], key: &str, args: Option<&str>) -> Option<usize> {
    items
        .iter()
        .position(|item| is_record(item, key, args))
        .or_else(|| items.iter().position(|item| is_record(item, key, None)))
}
