//! Resubmission of operations persisted by an earlier process.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{Client, MutationRequest};
use crate::error::LinkError;
use crate::link::LinkShared;
use crate::operation::FetchResult;

/// Handle on the mutations resubmitted by
/// [`QueueLink::load`](crate::QueueLink::load).
#[derive(Debug, Default)]
pub struct BootHandle {
    keys: Vec<String>,
    discarded: usize,
    tasks: Vec<JoinHandle<Result<FetchResult, LinkError>>>,
}

impl BootHandle {
    /// Keys of the resubmitted records, oldest first.
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Number of resubmitted mutations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if nothing was resubmitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Records dropped because their payload could not be decoded.
    #[must_use]
    pub const fn discarded(&self) -> usize {
        self.discarded
    }

    /// Wait for every resubmitted mutation, in [`BootHandle::keys`] order.
    pub async fn finished(self) -> Vec<Result<FetchResult, LinkError>> {
        let mut results = Vec::with_capacity(self.tasks.len());
        for task in self.tasks {
            results.push(match task.await {
                Ok(result) => result,
                Err(err) => Err(LinkError::protocol(format!("resubmission task failed: {err}"))),
            });
        }
        results
    }
}

/// Drain the persisted log and resubmit each record through `client`.
///
/// Every record leaves the log before its mutation is issued. Only the first
/// successful call per link does anything.
///
/// # Panics
///
/// Panics outside a Tokio runtime when records are pending.
pub(crate) fn load(shared: &LinkShared, client: Arc<dyn Client>) -> Result<BootHandle, LinkError> {
    let mut handle = BootHandle::default();
    let mut requests = Vec::new();
    {
        let mut state = shared.state.lock();
        if state.loaded {
            debug!("persisted operations already loaded");
            return Ok(handle);
        }
        state.loaded = true;

        let records = match shared.log.ensure() {
            Ok(records) => records,
            Err(err) => {
                state.loaded = false;
                return Err(err);
            }
        };
        handle.discarded = shared.log.discard_undecodable().unwrap_or_else(|err| {
            warn!(error = %err, "could not drop undecodable persisted items");
            0
        });

        for record in records.into_iter().rev() {
            let parsed = record.parse_args();
            if let Err(err) = shared.log.remove(&record.id, Some(&record.args)) {
                warn!(key = %record.id, error = %err, "could not remove persisted operation");
                shared.metrics.record_persistence_failure();
            }
            match parsed {
                Ok(args) => {
                    requests.push(MutationRequest::from_persisted(args));
                    handle.keys.push(record.id);
                }
                Err(err) => {
                    warn!(key = %record.id, error = %err, "discarding malformed persisted operation");
                    handle.discarded += 1;
                }
            }
        }
    }

    for request in requests {
        shared.metrics.record_resubmitted();
        let client = Arc::clone(&client);
        handle
            .tasks
            .push(tokio::spawn(async move { client.mutate(request).await }));
    }
    info!(
        resubmitted = handle.keys.len(),
        discarded = handle.discarded,
        "loaded persisted operations"
    );
    Ok(handle)
}
