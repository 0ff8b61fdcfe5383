//! Replay of queued entries after the gate reopens.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::forward::{Forward, ResultSink};
use crate::identify::{identify, is_temporary};
use crate::link::LinkShared;
use crate::operation::FetchResult;
use crate::queue::{EntryId, PendingQueue};

/// One forwarded representative and the shadows sharing its result.
pub(crate) struct Round {
    key: String,
    representative: EntryId,
    sink: ResultSink,
    forward: Arc<dyn Forward>,
    /// Snapshot of the bucket at planning time, in bucket order.
    shadows: Vec<(EntryId, ResultSink)>,
}

/// Pick a representative per bucket and group the resulting rounds.
///
/// The representative is the most recently queued entry. Entries already
/// shadowing a round still in flight stay with that round. Rounds whose
/// representative targets the same temporary identifier share a group and
/// run in arrival order; every other round is a group of its own.
pub(crate) fn plan(queue: &mut PendingQueue, temp_id_prefix: &str) -> Vec<Vec<Round>> {
    let mut groups = Vec::new();
    let mut dependent: BTreeMap<String, Vec<Round>> = BTreeMap::new();

    for (key, bucket) in queue.buckets_mut() {
        let Some((last, earlier)) = bucket.split_last_mut() else {
            continue;
        };
        if last.in_flight {
            debug!(key = %key, entry = %last.id, "bucket already replaying");
            continue;
        }
        last.in_flight = true;
        let representative = last.id;
        let sink = last.sink.clone();
        let forward = Arc::clone(&last.forward);
        let target = last
            .operation
            .identifier()
            .filter(|id| is_temporary(id, temp_id_prefix));

        let shadows = earlier
            .iter_mut()
            .filter(|entry| !entry.in_flight && !entry.enrolled)
            .map(|entry| {
                entry.enrolled = true;
                (entry.id, entry.sink.clone())
            })
            .collect();
        let round = Round {
            key: key.clone(),
            representative,
            sink,
            forward,
            shadows,
        };
        match target {
            Some(target) => dependent.entry(target).or_default().push(round),
            None => groups.push(vec![round]),
        }
    }

    for (_, mut rounds) in dependent {
        rounds.sort_by_key(|round| round.representative);
        groups.push(rounds);
    }
    groups
}

/// Handle on a replay started by [`QueueLink::open`](crate::QueueLink::open).
///
/// Dropping it does not stop the replay.
#[derive(Debug)]
pub struct Replay {
    rounds: usize,
    tasks: Vec<JoinHandle<()>>,
}

impl Replay {
    /// Spawn one task per group.
    ///
    /// # Panics
    ///
    /// Panics outside a Tokio runtime when `groups` is not empty.
    pub(crate) fn start(shared: &Arc<LinkShared>, groups: Vec<Vec<Round>>) -> Self {
        let rounds = groups.iter().map(Vec::len).sum();
        let tasks = groups
            .into_iter()
            .map(|group| tokio::spawn(run_group(Arc::clone(shared), group)))
            .collect();
        Self { rounds, tasks }
    }

    /// Number of representatives forwarded.
    #[must_use]
    pub const fn rounds(&self) -> usize {
        self.rounds
    }

    /// Returns `true` if nothing was pending.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rounds == 0
    }

    /// Wait until every forwarded representative reached a terminal signal.
    pub async fn finished(self) {
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "replay task failed");
            }
        }
    }
}

/// Run the rounds of a group one after another.
///
/// Each round starts once its predecessor produced its first signal, so a
/// round always reads an operation already rewritten by reconciliation.
async fn run_group(shared: Arc<LinkShared>, rounds: Vec<Round>) {
    let mut tasks = Vec::with_capacity(rounds.len());
    for round in rounds {
        let (settled_tx, settled_rx) = oneshot::channel();
        tasks.push(tokio::spawn(run_round(Arc::clone(&shared), round, settled_tx)));
        let _ = settled_rx.await;
    }
    for task in tasks {
        if let Err(err) = task.await {
            warn!(error = %err, "replay round failed");
        }
    }
}

async fn run_round(shared: Arc<LinkShared>, round: Round, settled: oneshot::Sender<()>) {
    let Some(mut operation) = shared.operation_of(&round.key, round.representative) else {
        debug!(key = %round.key, entry = %round.representative, "representative no longer queued");
        return;
    };
    let target = operation
        .identifier()
        .filter(|id| is_temporary(id, &shared.config.temp_id_prefix));
    if let Some(target) = &target {
        operation.context.replay.serialization_key = Some(target.clone());
    }

    shared.metrics.record_replayed();
    debug!(
        key = %round.key,
        entry = %round.representative,
        shadows = round.shadows.len(),
        "forwarding representative"
    );

    let mut settled = Some(settled);
    let mut stream = round.forward.forward(operation);
    loop {
        let terminal = match stream.next().await {
            Some(Ok(value)) => {
                deliver_next(&shared, &round, target.as_deref(), value);
                false
            }
            Some(Err(err)) => {
                finish(&shared, &round, |sink| sink.error(err.clone()));
                true
            }
            None => {
                finish(&shared, &round, ResultSink::complete);
                true
            }
        };
        if let Some(settled) = settled.take() {
            let _ = settled.send(());
        }
        if terminal {
            return;
        }
    }
}

fn deliver_next(shared: &LinkShared, round: &Round, target: Option<&str>, value: FetchResult) {
    if let Some(temp_id) = target {
        match value.result().and_then(identify) {
            Some(new_id) if new_id != temp_id => {
                let rewritten = shared.reconcile(temp_id, &new_id, round.representative);
                debug!(from = %temp_id, to = %new_id, rewritten, "temporary identifier confirmed");
            }
            _ => warn!(key = %round.key, temp_id = %temp_id, "result carried no confirmed identifier"),
        }
    }
    for (_, sink) in &round.shadows {
        sink.next(value.clone());
    }
    round.sink.next(value);
}

/// Remove the representative, then release shadows and the representative.
fn finish(shared: &LinkShared, round: &Round, deliver: impl Fn(&ResultSink)) {
    shared.remove_entry(&round.key, round.representative);
    for (id, sink) in &round.shadows {
        shared.remove_entry(&round.key, *id);
        deliver(sink);
    }
    deliver(&round.sink);
}


#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::cache::MemoryCache;
    use crate::forward::FetchStream;
    use crate::link::QueueLink;
    use crate::operation::{GraphqlQuery, Operation};
    use crate::stream::OperationStream;

    fn queue_edits(link: &QueueLink, titles: &[&str]) -> Vec<OperationStream> {
        let forward: Arc<dyn Forward> =
            Arc::new(|_: Operation| -> FetchStream { futures_util::stream::empty().boxed() });
        titles
            .iter()
            .map(|title| {
                let operation = Operation::from_json(
                    GraphqlQuery::from_static("mutation Edit($id: ID!) { edit(id: $id) }"),
                    json!({"id": "3", "title": title}),
                );
                link.request(operation, Arc::clone(&forward))
            })
            .collect()
    }

    fn plan_link(link: &QueueLink) -> Vec<Vec<Round>> {
        plan(&mut link.shared.state.lock().queue, "temp_")
    }

    #[test]
    fn enrolled_shadows_are_not_planned_again() {
        let link = QueueLink::new(Arc::new(MemoryCache::new()));
        link.close();
        let _first = queue_edits(&link, &["a", "b"]);

        let groups = plan_link(&link);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0][0].shadows.len(), 1);

        let _later = queue_edits(&link, &["c"]);
        let groups = plan_link(&link);
        assert_eq!(groups.len(), 1);
        assert!(groups[0][0].shadows.is_empty());
        assert!(plan_link(&link).is_empty());
    }

    #[test]
    fn entries_leave_the_queue_before_their_signal() {
        let link = QueueLink::new(Arc::new(MemoryCache::new()));
        link.close();
        let _streams = queue_edits(&link, &["a", "b", "c"]);
        let mut groups = plan_link(&link);
        let round = groups.remove(0).remove(0);

        let observed = Mutex::new(Vec::new());
        finish(&link.shared, &round, |_| {
            observed.lock().push(link.pending_count());
        });
        assert_eq!(*observed.lock(), vec![1, 0, 0]);
        assert_eq!(link.metrics().removed, 3);
    }
}
