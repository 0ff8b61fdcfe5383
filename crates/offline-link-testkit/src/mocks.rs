//! Scriptable stand-ins for the next link stage and the mutation client.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use offline_link::{
    Cache, Client, FetchResult, FetchStream, Forward, LinkError, MutationRequest, Operation,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::Notify;

/// How a [`MockForward`] answers one forwarded operation.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Emit one result with `data`, then complete.
    Data(Value),
    /// Fail with the error.
    Error(LinkError),
    /// Complete without a result.
    Complete,
    /// Wait until the gate is notified, then reply.
    After(Arc<Notify>, Box<Reply>),
    /// Never resolve.
    Hang,
}

impl Reply {
    /// A mutation result confirming `id`.
    #[must_use]
    pub fn with_id(id: &str) -> Self {
        Self::Data(json!({"result": {"id": id}}))
    }

    /// Hold `self` back until `gate` is notified.
    #[must_use]
    pub fn after(self, gate: &Arc<Notify>) -> Self {
        Self::After(Arc::clone(gate), Box::new(self))
    }

    fn into_stream(self) -> FetchStream {
        match self {
            Self::Data(data) => stream::iter([Ok(FetchResult::from_data(data))]).boxed(),
            Self::Error(err) => stream::iter([Err(err)]).boxed(),
            Self::Complete => stream::empty().boxed(),
            Self::Hang => stream::pending().boxed(),
            Self::After(gate, reply) => {
                let reply = *reply;
                stream::once(async move { gate.notified().await })
                    .flat_map(move |()| reply.clone().into_stream())
                    .boxed()
            }
        }
    }
}

/// Records every forwarded operation and answers from a script.
///
/// With an empty script it echoes the variables back as `data.result`.
#[derive(Debug, Default)]
pub struct MockForward {
    calls: Mutex<Vec<Operation>>,
    script: Mutex<VecDeque<Reply>>,
}

impl MockForward {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock answering with `replies`, in order.
    #[must_use]
    pub fn scripted(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            script: Mutex::new(replies.into_iter().collect()),
        }
    }

    /// Queue a reply for the next unanswered call.
    pub fn push_reply(&self, reply: Reply) {
        self.script.lock().push_back(reply);
    }

    /// Every forwarded operation, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<Operation> {
        self.calls.lock().clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// `id` variable of every forwarded operation, in call order.
    #[must_use]
    pub fn forwarded_ids(&self) -> Vec<Option<String>> {
        self.calls
            .lock()
            .iter()
            .map(|operation| {
                operation
                    .variables
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .collect()
    }
}

impl Forward for MockForward {
    fn forward(&self, operation: Operation) -> FetchStream {
        let reply = self.script.lock().pop_front().unwrap_or_else(|| {
            Reply::Data(json!({"result": Value::Object(operation.variables.clone())}))
        });
        self.calls.lock().push(operation);
        reply.into_stream()
    }
}

/// Records every mutation request.
///
/// When built with [`MockClient::observing`], also snapshots one cache field
/// at the moment each mutation is issued.
#[derive(Default)]
pub struct MockClient {
    requests: Mutex<Vec<MutationRequest>>,
    observed: Mutex<Vec<Option<Vec<Value>>>>,
    watch: Option<(Arc<dyn Cache>, String)>,
}

impl std::fmt::Debug for MockClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockClient")
            .field("requests", &self.requests.lock().len())
            .finish_non_exhaustive()
    }
}

impl MockClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot `field` of `cache` on every call.
    #[must_use]
    pub fn observing(cache: Arc<dyn Cache>, field: impl Into<String>) -> Self {
        Self {
            watch: Some((cache, field.into())),
            ..Self::default()
        }
    }

    /// Every received request, in call order.
    #[must_use]
    pub fn requests(&self) -> Vec<MutationRequest> {
        self.requests.lock().clone()
    }

    /// Field snapshots taken at call time, in call order.
    #[must_use]
    pub fn observed(&self) -> Vec<Option<Vec<Value>>> {
        self.observed.lock().clone()
    }
}

#[async_trait]
impl Client for MockClient {
    async fn mutate(&self, request: MutationRequest) -> Result<FetchResult, LinkError> {
        if let Some((cache, field)) = &self.watch {
            self.observed.lock().push(cache.read(field)?);
        }
        let result = json!({"result": Value::Object(request.variables.clone())});
        self.requests.lock().push(request);
        Ok(FetchResult::from_data(result))
    }
}

#[cfg(test)]
mod tests {
    use offline_link::GraphqlQuery;

    use super::*;

    fn operation(id: &str) -> Operation {
        Operation::from_json(GraphqlQuery::from_static("mutation M { m }"), json!({"id": id}))
    }

    #[tokio::test]
    async fn echoes_variables_without_script() {
        let mock = MockForward::new();
        let results: Vec<_> = mock.forward(operation("1")).collect().await;
        assert_eq!(results.len(), 1);
        let value = results[0].as_ref().unwrap();
        assert_eq!(value.result(), Some(&json!({"id": "1"})));
        assert_eq!(mock.forwarded_ids(), vec![Some("1".to_string())]);
    }

    #[tokio::test]
    async fn scripted_replies_in_order() {
        let mock = MockForward::scripted([Reply::with_id("real"), Reply::Error(LinkError::forward("down"))]);
        let first: Vec<_> = mock.forward(operation("a")).collect().await;
        let second: Vec<_> = mock.forward(operation("b")).collect().await;
        assert_eq!(first[0].as_ref().unwrap().result(), Some(&json!({"id": "real"})));
        assert_eq!(second, vec![Err(LinkError::forward("down"))]);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn gated_reply_waits_for_notify() {
        let gate = Arc::new(Notify::new());
        let mock = MockForward::scripted([Reply::Complete.after(&gate)]);
        let mut results = mock.forward(operation("x"));
        gate.notify_one();
        assert!(results.next().await.is_none());
    }
}
