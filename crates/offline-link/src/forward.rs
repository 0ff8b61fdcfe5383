//! The next pipeline stage and result delivery.

use futures_util::stream::BoxStream;
use tokio::sync::mpsc;

use crate::error::LinkError;
use crate::operation::{FetchResult, Operation};

/// Result stream of a forwarded operation.
///
/// `Ok` items are `next` values, an `Err` item is the terminal `error`, and
/// the end of the stream is `complete`.
pub type FetchStream = BoxStream<'static, Result<FetchResult, LinkError>>;

/// The next stage of the link chain.
pub trait Forward: Send + Sync {
    /// Dispatch `operation` downstream.
    fn forward(&self, operation: Operation) -> FetchStream;
}

impl<F> Forward for F
where
    F: Fn(Operation) -> FetchStream + Send + Sync,
{
    fn forward(&self, operation: Operation) -> FetchStream {
        self(operation)
    }
}

#[derive(Debug)]
pub(crate) enum Signal {
    Next(FetchResult),
    Error(LinkError),
    Complete,
}

/// Sending half of a queued entry's result channel.
///
/// Sends to a dropped receiver are ignored.
#[derive(Debug, Clone)]
pub(crate) struct ResultSink {
    tx: mpsc::UnboundedSender<Signal>,
}

impl ResultSink {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Signal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub(crate) fn next(&self, value: FetchResult) {
        let _ = self.tx.send(Signal::Next(value));
    }

    pub(crate) fn error(&self, err: LinkError) {
        let _ = self.tx.send(Signal::Error(err));
    }

    pub(crate) fn complete(&self) {
        let _ = self.tx.send(Signal::Complete);
    }
}
