//! Error types for the offline queue link.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// GraphQL error location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphqlErrorLocation {
    /// Line number in the document (1-based).
    pub line: u32,
    /// Column number in the document (1-based).
    pub column: u32,
}

/// GraphQL path segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GraphqlPathSegment {
    /// Field name.
    Key(String),
    /// Array index.
    Index(i64),
}

/// GraphQL error returned in-band by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlError {
    /// Human-readable error message.
    pub message: String,
    /// Location(s) within the document.
    #[serde(default)]
    pub locations: Vec<GraphqlErrorLocation>,
    /// Path within the response where the error occurred.
    #[serde(default)]
    pub path: Vec<GraphqlPathSegment>,
    /// Extensions metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

impl GraphqlError {
    /// Create an error carrying only a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            path: Vec::new(),
            extensions: None,
        }
    }
}

/// Errors raised by a [`Cache`](crate::Cache) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The backing store could not be reached.
    #[error("cache unavailable: {message}")]
    Unavailable {
        /// Details.
        message: String,
    },

    /// A cached field holds data of the wrong shape.
    #[error("cache field {field} is corrupt: {message}")]
    Corrupt {
        /// Field name.
        field: String,
        /// Details.
        message: String,
    },
}

/// Error delivered through an operation's result stream.
///
/// `Clone` because a single failure fans out to every subscriber sharing a
/// bucket.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinkError {
    /// The downstream pipeline failed after dispatch.
    #[error("forwarding failed: {message}")]
    Forward {
        /// Details.
        message: String,
    },

    /// GraphQL-level errors returned by the server.
    #[error("GraphQL errors: {errors:?}")]
    Graphql {
        /// GraphQL error list.
        errors: Vec<GraphqlError>,
    },

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The cache collaborator failed.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// A record or result did not have the expected shape.
    #[error("protocol error: {message}")]
    Protocol {
        /// Details.
        message: String,
    },

    /// The result channel closed before a terminal signal arrived.
    #[error("result stream closed before completion")]
    Closed,
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl LinkError {
    /// Shorthand for a forwarding failure.
    #[must_use]
    pub fn forward(message: impl Into<String>) -> Self {
        Self::Forward {
            message: message.into(),
        }
    }

    /// Shorthand for a protocol failure.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Returns `true` if the failure happened downstream of this link.
    #[must_use]
    pub const fn is_forwarding(&self) -> bool {
        matches!(self, Self::Forward { .. } | Self::Graphql { .. })
    }
}
