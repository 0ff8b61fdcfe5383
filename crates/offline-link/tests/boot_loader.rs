//! Resubmission of persisted operations after a restart.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use offline_link::{
    Cache, CacheError, Forward, LinkClient, LinkError, MemoryCache, PENDING_OPERATIONS_FIELD,
    QueueLink, operation_key,
};
use offline_link_testkit::{MockClient, MockForward, Reply};
use serde_json::{Map, Value, json};

use common::{TestContext, add_todo, edit_todo, eventually, memory_cache, persisted_ids};

const MODULE: &str = "boot_loader";

/// Queue `operation` offline in a first process and return the cache as a
/// later process would find it.
fn restarted_cache(operation: offline_link::Operation) -> Arc<MemoryCache> {
    let cache = memory_cache();
    let link = QueueLink::new(cache.clone());
    link.close();
    let forward: Arc<dyn Forward> = Arc::new(MockForward::new());
    let _queued = link.request(operation, forward);
    let snapshot = cache.snapshot();
    Arc::new(MemoryCache::restore(&snapshot).unwrap())
}

#[tokio::test]
async fn persisted_add_is_resubmitted_once() {
    let mut ctx = TestContext::new(MODULE, "persisted_add_is_resubmitted_once");
    let operation = add_todo(json!({"title": "milk"}));
    let variables = operation.variables.clone();
    let replay_context = operation.context.replay.clone();
    let cache = restarted_cache(operation);

    let link = QueueLink::new(cache.clone());
    let client = Arc::new(MockClient::observing(cache.clone(), PENDING_OPERATIONS_FIELD));
    ctx.assert_eq(link.persisted_log().len().unwrap(), 1, "record survived the restart");

    let handle = link.load(client.clone()).unwrap();
    ctx.assert_eq(handle.len(), 1, "one resubmission");
    ctx.assert_eq(link.persisted_log().len().unwrap(), 0, "record removed on load");

    let results = handle.finished().await;
    ctx.assert_eq(results.len(), 1, "one result");
    ctx.assert_true(results[0].is_ok(), "mutation succeeded");

    let requests = client.requests();
    ctx.assert_eq(requests.len(), 1, "exactly one mutation call");
    ctx.assert_eq(requests[0].variables.clone(), variables, "stored variables");
    ctx.assert_eq(requests[0].context.replay.clone(), replay_context, "stored context");
    ctx.assert_true(requests[0].update.is_some(), "cache update reattached");
    ctx.assert_true(requests[0].optimistic_response.is_some(), "optimistic response reattached");
    ctx.assert_eq(
        client.observed(),
        vec![Some(Vec::new())],
        "record gone before the mutation ran",
    );
    ctx.assert_eq(link.metrics().resubmitted, 1, "resubmitted metric");
    ctx.finalize("pass", None);
}

#[tokio::test]
async fn extension_shadowing_replay_field_survives_restart() {
    let mut ctx = TestContext::new(MODULE, "extension_shadowing_replay_field_survives_restart");
    let operation = edit_todo(json!({"id": "12", "title": "kept"}))
        .with_extension("tracked", json!("yes").into())
        .with_extension("source", json!("form").into());
    let cache = restarted_cache(operation);

    let link = QueueLink::new(cache);
    let client = Arc::new(MockClient::new());
    let handle = link.load(client.clone()).unwrap();
    ctx.assert_eq(handle.discarded(), 0, "record decodes");
    ctx.assert_eq(handle.len(), 1, "record resubmitted");

    handle.finished().await;
    let requests = client.requests();
    ctx.assert_eq(requests.len(), 1, "one mutation");
    ctx.assert_eq(requests[0].variables["title"].clone(), json!("kept"), "variables restored");
    ctx.assert_true(requests[0].context.replay.tracked, "replay flag keeps its own value");
    ctx.assert_true(
        requests[0].context.extensions.contains_key("source"),
        "other extensions restored",
    );
    ctx.finalize("pass", None);
}

#[tokio::test]
async fn load_runs_once() {
    let mut ctx = TestContext::new(MODULE, "load_runs_once");
    let cache = restarted_cache(add_todo(json!({"title": "bread"})));
    let link = QueueLink::new(cache);
    let client = Arc::new(MockClient::new());

    let first = link.load(client.clone()).unwrap();
    let second = link.load(client.clone()).unwrap();
    ctx.assert_eq(first.len(), 1, "first load resubmits");
    ctx.assert_true(second.is_empty(), "second load is a no-op");
    first.finished().await;
    second.finished().await;
    ctx.assert_eq(client.requests().len(), 1, "one mutation");
    ctx.finalize("pass", None);
}

#[tokio::test]
async fn absent_log_is_initialized_empty() {
    let mut ctx = TestContext::new(MODULE, "absent_log_is_initialized_empty");
    let link = QueueLink::new(memory_cache());
    let client = Arc::new(MockClient::new());

    ctx.assert_eq(link.persisted_log().records().unwrap(), None, "no field yet");
    let handle = link.load(client.clone()).unwrap();
    ctx.assert_true(handle.is_empty(), "nothing to resubmit");
    ctx.assert_eq(
        link.persisted_log().records().unwrap(),
        Some(Vec::new()),
        "field initialized",
    );
    ctx.finalize("pass", None);
}

#[tokio::test]
async fn malformed_records_are_discarded() {
    let mut ctx = TestContext::new(MODULE, "malformed_records_are_discarded");
    let cache = memory_cache();
    cache
        .write(
            PENDING_OPERATIONS_FIELD,
            vec![
                json!({"id": "k_1", "args": "{not json", "__typename": "OfflineUsagePendingOperation"}),
                json!(17),
            ],
        )
        .unwrap();
    let link = QueueLink::new(cache);
    let client = Arc::new(MockClient::new());

    let handle = link.load(client.clone()).unwrap();
    ctx.assert_true(handle.is_empty(), "nothing resubmitted");
    ctx.assert_eq(handle.discarded(), 2, "both items discarded");
    ctx.assert_eq(persisted_ids(&link), Vec::<String>::new(), "log emptied");
    ctx.assert_eq(client.requests().len(), 0, "no mutation");
    ctx.finalize("pass", None);
}

#[tokio::test]
async fn legacy_payload_names_are_accepted() {
    let mut ctx = TestContext::new(MODULE, "legacy_payload_names_are_accepted");
    let cache = memory_cache();
    let args = json!({
        "mutation": common::EDIT_TODO,
        "variables": {"id": "8", "title": "legacy"},
        "ctx": {"tracked": true, "queryType": "edit", "itemType": {"typeName": "Todo", "typeNamePluralCamelCase": "todos", "idFieldName": "id"}}
    });
    cache
        .write(
            PENDING_OPERATIONS_FIELD,
            vec![json!({"id": "8_1", "args": args.to_string(), "typeTag": "OfflineUsagePendingOperation"})],
        )
        .unwrap();
    let link = QueueLink::new(cache);
    let client = Arc::new(MockClient::new());

    link.load(client.clone()).unwrap().finished().await;
    let requests = client.requests();
    ctx.assert_eq(requests.len(), 1, "resubmitted");
    ctx.assert_eq(requests[0].mutation.as_str(), common::EDIT_TODO, "document restored");
    ctx.assert_eq(requests[0].variables["title"].clone(), json!("legacy"), "variables restored");
    ctx.finalize("pass", None);
}

/// Cache whose reads fail until switched on.
#[derive(Default)]
struct FlakyCache {
    inner: MemoryCache,
    available: AtomicBool,
}

impl Cache for FlakyCache {
    fn read(&self, field: &str) -> Result<Option<Vec<Value>>, CacheError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable {
                message: "storage locked".to_string(),
            });
        }
        self.inner.read(field)
    }

    fn write(&self, field: &str, items: Vec<Value>) -> Result<(), CacheError> {
        self.inner.write(field, items)
    }

    fn modify_entity(
        &self,
        type_name: &str,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<(), CacheError> {
        self.inner.modify_entity(type_name, id, fields)
    }
}

#[tokio::test]
async fn cache_failure_leaves_load_retryable() {
    let mut ctx = TestContext::new(MODULE, "cache_failure_leaves_load_retryable");
    let cache = Arc::new(FlakyCache::default());
    let link = QueueLink::new(cache.clone());
    let client = Arc::new(MockClient::new());

    let err = link.load(client.clone()).unwrap_err();
    ctx.assert_true(matches!(err, LinkError::Cache(CacheError::Unavailable { .. })), "cache error surfaced");

    cache.available.store(true, Ordering::SeqCst);
    let handle = link.load(client.clone()).unwrap();
    ctx.assert_true(handle.is_empty(), "retry succeeds");
    ctx.finalize("pass", None);
}

#[tokio::test]
async fn queueing_survives_cache_failures() {
    let mut ctx = TestContext::new(MODULE, "queueing_survives_cache_failures");
    let cache = Arc::new(FlakyCache::default());
    let link = QueueLink::new(cache);
    let mock = Arc::new(MockForward::new());
    link.close();

    let stream = link.request(add_todo(json!({"title": "x"})), mock.clone() as Arc<dyn Forward>);
    ctx.assert_true(stream.is_queued(), "queued despite the cache");
    ctx.assert_eq(link.metrics().persistence_failures, 1, "failure counted");
    ctx.assert_eq(link.pending_count(), 1, "entry kept in memory");
    ctx.finalize("pass", None);
}

#[tokio::test]
async fn link_client_requeues_while_offline() {
    let mut ctx = TestContext::new(MODULE, "link_client_requeues_while_offline");
    let operation = add_todo(json!({"title": "jam"}));
    let key = operation_key(&operation);
    let cache = restarted_cache(operation);

    let link = QueueLink::new(cache.clone());
    let mock = Arc::new(MockForward::scripted([Reply::with_id("real_5")]));
    let client = Arc::new(LinkClient::new(
        link.clone(),
        mock.clone() as Arc<dyn Forward>,
        cache.clone(),
    ));
    client.set_network_state(false);

    let handle = client.load_pending().unwrap();
    ctx.assert_eq(handle.keys().to_vec(), vec![key.clone()], "record resubmitted");
    eventually("requeued mutation", || link.pending_count() == 1).await;
    ctx.assert_eq(persisted_ids(&link), vec![key], "re-persisted under the same key");

    client
        .set_network_state(true)
        .expect("replay started")
        .finished()
        .await;
    let results = handle.finished().await;
    ctx.assert_true(results[0].is_ok(), "resubmitted mutation resolved");
    ctx.assert_eq(mock.call_count(), 1, "forwarded once");
    ctx.assert_eq(cache.read("todos").unwrap().map(|todos| todos.len()), Some(1), "update applied");
    ctx.assert_eq(persisted_ids(&link), Vec::<String>::new(), "log drained");
    ctx.finalize("pass", None);
}

