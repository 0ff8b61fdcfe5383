//! Offline Link - Offline operation queue for GraphQL clients.
//!
//! This crate provides:
//! - A gate that forwards operations while online and queues them offline.
//! - Deduplicating buckets keyed by target entity and document shape.
//! - A persisted operation log mirrored into the client cache.
//! - Replay on reconnect with temporary identifier reconciliation.
//! - Resubmission of operations persisted by an earlier process.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::doc_markdown)]

mod boot;
mod cache;
mod client;
mod error;
mod forward;
mod identify;
mod key;
mod link;
mod mutation;
mod operation;
mod persisted;
mod queue;
mod replay;
mod serialize;
mod stream;

pub use boot::BootHandle;
pub use cache::{Cache, CacheUpdate, MemoryCache};
pub use client::{Client, LinkClient, MutationRequest};
pub use error::{CacheError, GraphqlError, GraphqlErrorLocation, GraphqlPathSegment, LinkError};
pub use forward::{FetchStream, Forward};
pub use identify::{DEFAULT_TEMP_ID_PREFIX, IDENTIFIER_FIELDS, identify, identify_map, is_temporary};
pub use key::{MISSING_IDENTIFIER, hash_code, operation_key};
pub use link::{
    QueueLink, QueueLinkBuilder, QueueLinkConfig, QueueLinkMetrics, QueueLinkMetricsSnapshot,
};
pub use mutation::{MutationBuilder, prepare_mutation, temporary_id};
pub use operation::{
    FetchResult, GraphqlQuery, GraphqlResponse, ItemType, MutateData, Operation,
    OperationContext, QueryType, ReplayContext,
};
pub use persisted::{
    PENDING_OPERATION_TYPE_NAME, PENDING_OPERATIONS_FIELD, PersistedOperationLog,
    PersistedOperationRecord,
};
pub use queue::{EntryId, PendingOperation};
pub use replay::Replay;
pub use serialize::{
    CyclicSerializer, PersistedArgs, PersistedContext, REPLAY_CONTEXT_FIELDS, SharedValue,
    serialize_operation,
};
pub use stream::OperationStream;
