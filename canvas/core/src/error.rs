//! Canvas error taxonomy
//!
//! Every fallible operation in the core returns [`CanvasError`]. The enum is
//! `Clone` because a single load result is shared between every caller that
//! awaited the same in-flight fetch.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messages::VizPath;

/// Result alias used throughout the core
pub type Result<T> = std::result::Result<T, CanvasError>;

/// What kind of resource a lookup failed to find
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    /// A conversation
    Conversation,
    /// A node inside a conversation
    Node,
    /// A visualization module
    Visualization,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conversation => write!(f, "conversation"),
            Self::Node => write!(f, "node"),
            Self::Visualization => write!(f, "visualization"),
        }
    }
}

/// Errors produced by the canvas core
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CanvasError {
    /// Transport failure, bad status or undecodable response
    #[error("Network failure for {target} after {attempts} attempt(s): {message}")]
    NetworkFailure {
        /// Path or endpoint that failed
        target: String,
        /// Attempts made before giving up
        attempts: u32,
        /// Last underlying error
        message: String,
    },

    /// Module source could not be compiled into a renderable unit
    #[error("Failed to compile {path}: {reason}")]
    CompileFailure {
        /// Path of the module
        path: VizPath,
        /// Why compilation failed
        reason: String,
    },

    /// A conversation, node or module does not exist
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of resource
        kind: ResourceKind,
        /// Identifier that was looked up
        id: String,
    },

    /// A second fetch for a path started while one was in flight
    #[error("Concurrent fetch detected for {path}")]
    ConcurrencyViolation {
        /// Path fetched twice
        path: VizPath,
    },

    /// The identity changed while the load was in flight
    #[error("Load of {path} superseded by identity change")]
    Superseded {
        /// Path whose result was discarded
        path: VizPath,
    },

    /// Server data violates the conversation tree invariants
    #[error("Invalid conversation tree: {0}")]
    InvalidTree(String),

    /// Operation not allowed in the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl CanvasError {
    /// Single-attempt network failure
    pub fn network(target: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::NetworkFailure {
            target: target.into(),
            attempts: 1,
            message: message.to_string(),
        }
    }

    /// Not-found error for `kind`
    pub fn not_found(kind: ResourceKind, id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether another fetch attempt could succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkFailure { .. })
    }

    /// Whether this is a `NotFound`
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Record the total number of attempts on a network failure
    #[must_use]
    pub fn with_attempts(self, total: u32) -> Self {
        match self {
            Self::NetworkFailure {
                target, message, ..
            } => Self::NetworkFailure {
                target,
                attempts: total,
                message,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_attempts_only_touches_network_failures() {
        let err = CanvasError::network("a/b.viz", "connection refused").with_attempts(4);
        assert!(matches!(err, CanvasError::NetworkFailure { attempts: 4, .. }));

        let other = CanvasError::InvalidTree("two roots".into()).with_attempts(4);
        assert_eq!(other, CanvasError::InvalidTree("two roots".into()));
    }

    #[test]
    fn test_retryable() {
        assert!(CanvasError::network("x", "boom").is_retryable());
        assert!(!CanvasError::not_found(ResourceKind::Visualization, "x").is_retryable());
    }

    #[test]
    fn test_display() {
        let err = CanvasError::not_found(ResourceKind::Conversation, "abc");
        assert_eq!(err.to_string(), "conversation not found: abc");
    }
}
