//! In-memory pending queue: buckets of entries keyed by operation key.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::forward::{Forward, ResultSink};
use crate::operation::Operation;

/// Identity of a queued entry. Assigned in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(u64);

impl EntryId {
    /// Arrival sequence number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) struct Entry {
    pub(crate) id: EntryId,
    pub(crate) key: String,
    pub(crate) operation: Operation,
    pub(crate) forward: Arc<dyn Forward>,
    pub(crate) sink: ResultSink,
    /// Payload of this entry's persisted record, if it has one.
    pub(crate) args: Option<String>,
    /// Set once the entry was forwarded as a representative.
    pub(crate) in_flight: bool,
    /// Set once the entry shadows a forwarded representative.
    pub(crate) enrolled: bool,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("in_flight", &self.in_flight)
            .field("enrolled", &self.enrolled)
            .finish_non_exhaustive()
    }
}

/// Read-only view of a queued entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOperation {
    pub id: EntryId,
    pub key: String,
    pub document: String,
    pub variables: Map<String, Value>,
    /// Forwarded and awaiting its result.
    pub in_flight: bool,
}

impl From<&Entry> for PendingOperation {
    fn from(entry: &Entry) -> Self {
        Self {
            id: entry.id,
            key: entry.key.clone(),
            document: entry.operation.query.as_str().to_string(),
            variables: entry.operation.variables.clone(),
            in_flight: entry.in_flight,
        }
    }
}

/// Buckets ordered by arrival; empty buckets are dropped.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    buckets: HashMap<String, Vec<Entry>>,
    next_id: u64,
}

impl PendingQueue {
    pub(crate) fn next_id(&mut self) -> EntryId {
        let id = EntryId(self.next_id);
        self.next_id += 1;
        id
    }

    pub(crate) fn push(&mut self, entry: Entry) {
        self.buckets.entry(entry.key.clone()).or_default().push(entry);
    }

    pub(crate) fn remove(&mut self, key: &str, id: EntryId) -> Option<Entry> {
        let bucket = self.buckets.get_mut(key)?;
        let index = bucket.iter().position(|entry| entry.id == id)?;
        let entry = bucket.remove(index);
        if bucket.is_empty() {
            self.buckets.remove(key);
        }
        Some(entry)
    }

    pub(crate) fn get(&self, key: &str, id: EntryId) -> Option<&Entry> {
        self.buckets.get(key)?.iter().find(|entry| entry.id == id)
    }

    pub(crate) fn buckets(&self) -> impl Iterator<Item = (&String, &Vec<Entry>)> {
        self.buckets.iter()
    }

    pub(crate) fn buckets_mut(&mut self) -> impl Iterator<Item = (&String, &mut Vec<Entry>)> {
        self.buckets.iter_mut()
    }

    pub(crate) fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
