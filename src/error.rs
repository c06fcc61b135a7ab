//! Error types for soft-delete scheduling and persistence.

use std::fmt;

use thiserror::Error;

use crate::events::Events;
use crate::store::CollectionError;

/// The two marker transitions a document can be scheduled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Delete,
    Restore,
}

impl Operation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Delete => "delete",
            Operation::Restore => "restore",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the unit of work, its persisters and the manager.
#[derive(Error, Debug)]
pub enum SoftDeleteError {
    #[error("Document {document} is already scheduled for {operation}")]
    DuplicateScheduling {
        operation: Operation,
        document: String,
    },

    #[error("Cannot {operation} document {document}: {reason}")]
    InvalidState {
        operation: Operation,
        document: String,
        reason: String,
    },

    #[error("Write to collection '{collection}' failed: {source}")]
    WriteFailure {
        collection: String,
        #[source]
        source: CollectionError,
    },

    #[error("Document type not registered: {0}")]
    UnknownDocumentType(String),

    #[error("Document of type '{0}' has no identifier")]
    MissingIdentifier(String),

    #[error("Listener for {event} failed: {message}")]
    ListenerFailed { event: Events, message: String },

    #[error("Document lock poisoned")]
    LockPoisoned,
}

impl SoftDeleteError {
    /// Wrap a collection error raised while writing to `collection`.
    #[must_use]
    pub fn write_failure(collection: impl Into<String>, source: CollectionError) -> Self {
        SoftDeleteError::WriteFailure {
            collection: collection.into(),
            source,
        }
    }

    /// Whether the error came from the backing store rather than from scheduling.
    #[must_use]
    pub fn is_write_failure(&self) -> bool {
        matches!(self, SoftDeleteError::WriteFailure { .. })
    }
}
