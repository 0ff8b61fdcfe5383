//! Mutation client capability and the link-backed client.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{Map, Value};
use tracing::debug;

use crate::boot::BootHandle;
use crate::cache::{Cache, CacheUpdate};
use crate::error::LinkError;
use crate::forward::Forward;
use crate::link::QueueLink;
use crate::operation::{FetchResult, GraphqlQuery, Operation, OperationContext, ReplayContext};
use crate::queue::PendingOperation;
use crate::replay::Replay;
use crate::serialize::PersistedArgs;

/// A mutation issued through a [`Client`].
#[derive(Debug, Clone)]
pub struct MutationRequest {
    pub mutation: GraphqlQuery,
    pub variables: Map<String, Value>,
    pub context: OperationContext,
    /// Response to show before the server answered.
    pub optimistic_response: Option<Value>,
    /// Cache side effect applied once the server confirmed the mutation.
    pub update: Option<CacheUpdate>,
}

impl MutationRequest {
    /// Create a request with an empty context.
    #[must_use]
    pub fn new(mutation: GraphqlQuery, variables: Map<String, Value>) -> Self {
        Self {
            mutation,
            variables,
            context: OperationContext::default(),
            optimistic_response: None,
            update: None,
        }
    }

    /// Attach replay metadata and derive the cache update it describes.
    #[must_use]
    pub fn with_replay_context(mut self, replay: ReplayContext) -> Self {
        self.update = CacheUpdate::from_context(&replay);
        let optimistic = &replay.data_from_mutate_fn.optimistic_response;
        if !optimistic.is_null() {
            self.optimistic_response = Some(optimistic.clone());
        }
        self.context.replay = replay;
        self
    }

    /// Rebuild a request from a persisted payload.
    #[must_use]
    pub fn from_persisted(args: PersistedArgs) -> Self {
        let operation = args.into_operation();
        let mut request = Self::new(operation.query, operation.variables)
            .with_replay_context(operation.context.replay);
        request.context.extensions = operation.context.extensions;
        request
    }

    /// The operation sent down the link chain.
    #[must_use]
    pub fn into_operation(self) -> Operation {
        Operation {
            query: self.mutation,
            variables: self.variables,
            context: self.context,
        }
    }
}

/// Something that can issue mutations.
#[async_trait]
pub trait Client: Send + Sync {
    /// Issue `request` and resolve with its first result.
    async fn mutate(&self, request: MutationRequest) -> Result<FetchResult, LinkError>;
}

/// Client routing mutations through a [`QueueLink`] to a terminating stage.
pub struct LinkClient {
    link: QueueLink,
    forward: Arc<dyn Forward>,
    cache: Arc<dyn Cache>,
}

impl std::fmt::Debug for LinkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkClient")
            .field("link", &self.link)
            .finish_non_exhaustive()
    }
}

impl LinkClient {
    /// Create a client. `cache` receives the cache updates of confirmed
    /// mutations.
    #[must_use]
    pub fn new(link: QueueLink, forward: Arc<dyn Forward>, cache: Arc<dyn Cache>) -> Self {
        Self {
            link,
            forward,
            cache,
        }
    }

    /// The underlying link.
    #[must_use]
    pub const fn link(&self) -> &QueueLink {
        &self.link
    }

    /// Open or close the gate. Opening returns the started replay.
    pub fn set_network_state(&self, connected: bool) -> Option<Replay> {
        if connected {
            Some(self.link.open())
        } else {
            self.link.close();
            None
        }
    }

    /// Queued entries by bucket key.
    #[must_use]
    pub fn pending_operations(&self) -> BTreeMap<String, Vec<PendingOperation>> {
        self.link.pending_operations()
    }

    /// Resubmit operations persisted by an earlier process through this client.
    pub fn load_pending(self: &Arc<Self>) -> Result<BootHandle, LinkError> {
        let client: Arc<dyn Client> = Arc::clone(self) as Arc<dyn Client>;
        self.link.load(client)
    }
}

#[async_trait]
impl Client for LinkClient {
    async fn mutate(&self, request: MutationRequest) -> Result<FetchResult, LinkError> {
        let update = request.update.clone();
        let mut results = self
            .link
            .request(request.into_operation(), Arc::clone(&self.forward));

        let response = match results.next().await {
            Some(Ok(response)) => response,
            Some(Err(err)) => return Err(err),
            None => return Err(LinkError::protocol("mutation completed without a result")),
        };
        if !response.is_ok() {
            return Err(LinkError::Graphql {
                errors: response.errors,
            });
        }
        if let Some(update) = update {
            debug!(kind = ?update.query_type, list = %update.item_type.type_name_plural, "applying cache update");
            update.apply(self.cache.as_ref())?;
        }
        Ok(response)
    }
}
