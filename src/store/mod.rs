//! Collection abstraction the persisters write through, with in-memory and
//! JSON-file backends.

mod atomic;
mod file;
pub mod matcher;
mod memory;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

pub use atomic::atomic_write;
pub use file::JsonFileCollection;
pub use memory::{MemoryCollection, UpdateCommand};

/// A stored document, a filter, or an update document.
pub type Record = Map<String, Value>;

/// Name of the identifier field every stored document carries.
pub const ID_FIELD: &str = "_id";

#[derive(Error, Debug)]
pub enum CollectionError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Unsupported query operator: {0}")]
    UnsupportedOperator(String),

    #[error("Invalid update document: {0}")]
    InvalidUpdate(String),

    #[error("{0}")]
    Custom(String),
}

/// Options passed with every update command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Apply the update to every matching document, not only the first.
    pub multiple: bool,
    /// Wait for the store to acknowledge the write.
    pub write_ack: bool,
}

impl UpdateOptions {
    /// Multi-document, acknowledged: what soft-delete writes always use.
    #[must_use]
    pub fn bulk() -> Self {
        Self {
            multiple: true,
            write_ack: true,
        }
    }
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            multiple: false,
            write_ack: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteResult {
    /// Documents the filter matched.
    pub matched: u64,
    /// Documents whose content actually changed.
    pub modified: u64,
}

/// A named set of documents that can be updated and queried.
#[async_trait]
pub trait Collection: Send + Sync {
    fn name(&self) -> &str;

    async fn update(
        &self,
        filter: &Record,
        update: &Record,
        options: UpdateOptions,
    ) -> Result<WriteResult, CollectionError>;

    /// Insert a document, generating an `_id` when it has none. Returns the id.
    async fn insert(&self, record: Record) -> Result<Value, CollectionError>;

    async fn find(&self, filter: &Record) -> Result<Vec<Record>, CollectionError>;

    async fn find_one(&self, filter: &Record) -> Result<Option<Record>, CollectionError> {
        Ok(self.find(filter).await?.into_iter().next())
    }

    async fn count(&self, filter: &Record) -> Result<u64, CollectionError> {
        let found = self.find(filter).await?.len();
        Ok(u64::try_from(found).unwrap_or(u64::MAX))
    }
}

/// Give `record` a fresh UUID `_id` if it lacks one, and return the id.
pub(crate) fn ensure_id(record: &mut Record) -> Value {
    record
        .entry(ID_FIELD)
        .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()))
        .clone()
}
