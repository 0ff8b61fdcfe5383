//! Caller-facing result stream of a request.

use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::error::LinkError;
use crate::forward::{FetchStream, Signal};
use crate::link::LinkShared;
use crate::operation::FetchResult;
use crate::queue::EntryId;

/// Releases a queued entry when its stream is dropped.
///
/// Armed until the entry reaches a terminal signal; releasing twice is a
/// no-op because removal is keyed by entry id.
pub(crate) struct ReleaseGuard {
    shared: Weak<LinkShared>,
    key: String,
    id: EntryId,
    armed: bool,
}

impl ReleaseGuard {
    pub(crate) const fn new(shared: Weak<LinkShared>, key: String, id: EntryId) -> Self {
        Self {
            shared,
            key,
            id,
            armed: true,
        }
    }

    const fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        if let Some(shared) = self.shared.upgrade() {
            shared.cancel(&self.key, self.id);
        }
    }
}

enum Inner {
    Direct(FetchStream),
    Queued {
        rx: mpsc::UnboundedReceiver<Signal>,
        guard: ReleaseGuard,
        done: bool,
    },
}

/// Results of one request.
///
/// Yields `Ok` for each `next` value, at most one `Err`, and ends on
/// completion. Dropping the stream of a queued, not yet forwarded request
/// removes it from the queue and the persisted log.
pub struct OperationStream {
    inner: Inner,
}

impl OperationStream {
    pub(crate) const fn direct(stream: FetchStream) -> Self {
        Self {
            inner: Inner::Direct(stream),
        }
    }

    pub(crate) const fn queued(rx: mpsc::UnboundedReceiver<Signal>, guard: ReleaseGuard) -> Self {
        Self {
            inner: Inner::Queued {
                rx,
                guard,
                done: false,
            },
        }
    }

    /// Returns `true` if the request was queued rather than forwarded.
    #[must_use]
    pub const fn is_queued(&self) -> bool {
        matches!(self.inner, Inner::Queued { .. })
    }

    /// Bucket key of a queued request.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match &self.inner {
            Inner::Direct(_) => None,
            Inner::Queued { guard, .. } => Some(&guard.key),
        }
    }

    /// Entry id of a queued request.
    #[must_use]
    pub const fn entry_id(&self) -> Option<EntryId> {
        match &self.inner {
            Inner::Direct(_) => None,
            Inner::Queued { guard, .. } => Some(guard.id),
        }
    }

    /// Stop listening. A queued request that was not forwarded yet is
    /// removed from the queue and the persisted log.
    pub fn cancel(self) {
        drop(self);
    }
}

impl std::fmt::Debug for OperationStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationStream")
            .field("queued", &self.is_queued())
            .field("key", &self.key())
            .finish_non_exhaustive()
    }
}

impl Stream for OperationStream {
    type Item = Result<FetchResult, LinkError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.get_mut().inner {
            Inner::Direct(stream) => stream.poll_next_unpin(cx),
            Inner::Queued { rx, guard, done } => {
                if *done {
                    return Poll::Ready(None);
                }
                match rx.poll_recv(cx) {
                    Poll::Pending => Poll::Pending,
                    Poll::Ready(Some(Signal::Next(value))) => Poll::Ready(Some(Ok(value))),
                    Poll::Ready(Some(Signal::Error(err))) => {
                        *done = true;
                        guard.disarm();
                        Poll::Ready(Some(Err(err)))
                    }
                    Poll::Ready(Some(Signal::Complete)) => {
                        *done = true;
                        guard.disarm();
                        Poll::Ready(None)
                    }
                    // Sink gone without a terminal signal: the link was dropped.
                    Poll::Ready(None) => {
                        *done = true;
                        guard.disarm();
                        Poll::Ready(Some(Err(LinkError::Closed)))
                    }
                }
            }
        }
    }
}
