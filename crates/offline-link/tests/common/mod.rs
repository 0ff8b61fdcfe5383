#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use offline_link::{
    GraphqlQuery, ItemType, MemoryCache, Operation, OperationStream, QueryType, QueueLink,
    prepare_mutation,
};
use offline_link_testkit::LogCapture;
use serde_json::{Value, json};

pub const ADD_TODO: &str = "mutation AddTodo($id: ID!, $title: String) { result: addTodo(input: {id: $id, title: $title}) { id title } }";
pub const EDIT_TODO: &str = "mutation EditTodo($id: ID!, $title: String) { result: editTodo(input: {id: $id, title: $title}) { id title } }";

pub struct TestContext {
    test_name: String,
    module: String,
    correlation_id: String,
    capture: LogCapture,
    start_time: Instant,
    assertions_passed: u32,
    assertions_failed: u32,
}

impl TestContext {
    pub fn new(module: &str, test_name: &str) -> Self {
        offline_link_testkit::init_test_tracing();
        Self {
            test_name: test_name.to_string(),
            module: format!("offline-link::{module}"),
            correlation_id: format!("offline-link-{}", std::process::id()),
            capture: LogCapture::new(),
            start_time: Instant::now(),
            assertions_passed: 0,
            assertions_failed: 0,
        }
    }

    pub fn assert_true(&mut self, condition: bool, msg: &str) {
        if condition {
            self.assertions_passed += 1;
        } else {
            self.assertions_failed += 1;
            panic!("{}", msg);
        }
    }

    pub fn assert_eq<T: std::fmt::Debug + PartialEq>(&mut self, actual: T, expected: T, msg: &str) {
        if actual == expected {
            self.assertions_passed += 1;
        } else {
            self.assertions_failed += 1;
            panic!("{msg}: expected {expected:?}, got {actual:?}");
        }
    }

    pub fn finalize(&self, result: &str, details: Option<Value>) {
        let duration_ms = u64::try_from(self.start_time.elapsed().as_millis()).unwrap_or(u64::MAX);
        let mut entry = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": "info",
            "test_name": self.test_name,
            "module": self.module,
            "phase": "verify",
            "correlation_id": self.correlation_id,
            "result": result,
            "duration_ms": duration_ms,
            "assertions": {
                "passed": self.assertions_passed,
                "failed": self.assertions_failed
            }
        });

        if let Some(extra) = details {
            entry["details"] = extra;
        }

        self.capture
            .push_value(&entry)
            .expect("structured test log entry");
        self.capture.assert_valid();
    }
}

pub fn memory_cache() -> Arc<MemoryCache> {
    Arc::new(MemoryCache::new())
}

pub fn todo_type() -> ItemType {
    ItemType::new("Todo", "todos")
}

/// An `add` operation; without an `id` in `data` it gets a temporary one.
pub fn add_todo(data: Value) -> Operation {
    prepare_mutation(
        GraphqlQuery::from_static(ADD_TODO),
        todo_type(),
        QueryType::Add,
        data,
        None,
    )
    .into_operation()
}

pub fn edit_todo(data: Value) -> Operation {
    prepare_mutation(
        GraphqlQuery::from_static(EDIT_TODO),
        todo_type(),
        QueryType::Edit,
        data,
        None,
    )
    .into_operation()
}

/// Every signal of a queued stream, errors rendered as strings.
pub async fn drain(stream: OperationStream) -> Vec<Result<Value, String>> {
    use futures_util::StreamExt;

    stream
        .map(|item| {
            item.map(|result| result.data.unwrap_or(Value::Null))
                .map_err(|err| err.to_string())
        })
        .collect()
        .await
}

/// Poll `condition` until it holds.
///
/// # Panics
///
/// Panics after two seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

pub fn persisted_ids(link: &QueueLink) -> Vec<String> {
    link.persisted_log()
        .records()
        .expect("read persisted log")
        .unwrap_or_default()
        .into_iter()
        .map(|record| record.id)
        .collect()
}
