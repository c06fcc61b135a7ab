//! In-process collection backed by a vector of records.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::trace;

use super::matcher::{apply_update, matches};
use super::{ensure_id, Collection, CollectionError, Record, UpdateOptions, WriteResult};

/// An update command as received by a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateCommand {
    pub filter: Record,
    pub update: Record,
    pub options: UpdateOptions,
}

/// Collection kept entirely in memory.
///
/// Every update command is journaled so callers can inspect exactly which
/// writes were issued.
#[derive(Debug, Default)]
pub struct MemoryCollection {
    name: String,
    documents: RwLock<Vec<Record>>,
    journal: RwLock<Vec<UpdateCommand>>,
}

impl MemoryCollection {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            documents: RwLock::new(Vec::new()),
            journal: RwLock::new(Vec::new()),
        }
    }

    /// Update commands received so far, oldest first.
    pub async fn history(&self) -> Vec<UpdateCommand> {
        self.journal.read().await.clone()
    }

    pub async fn clear_history(&self) {
        self.journal.write().await.clear();
    }

    /// Snapshot of every stored document.
    pub async fn documents(&self) -> Vec<Record> {
        self.documents.read().await.clone()
    }
}

/// Apply `update` to the records in `documents` that match `filter`.
pub(crate) fn update_records(
    documents: &mut [Record],
    filter: &Record,
    update: &Record,
    options: UpdateOptions,
) -> Result<WriteResult, CollectionError> {
    let mut result = WriteResult::default();
    for document in documents.iter_mut() {
        if !matches(document, filter)? {
            continue;
        }
        result.matched = result.matched.saturating_add(1);
        if apply_update(document, update)? {
            result.modified = result.modified.saturating_add(1);
        }
        if !options.multiple {
            break;
        }
    }
    Ok(result)
}

/// Records in `documents` that match `filter`.
pub(crate) fn find_records(documents: &[Record], filter: &Record) -> Result<Vec<Record>, CollectionError> {
    let mut found = Vec::new();
    for document in documents {
        if matches(document, filter)? {
            found.push(document.clone());
        }
    }
    Ok(found)
}

#[async_trait]
impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn update(
        &self,
        filter: &Record,
        update: &Record,
        options: UpdateOptions,
    ) -> Result<WriteResult, CollectionError> {
        self.journal.write().await.push(UpdateCommand {
            filter: filter.clone(),
            update: update.clone(),
            options,
        });
        let mut documents = self.documents.write().await;
        let result = update_records(&mut documents, filter, update, options)?;
        trace!(
            "{}: update matched {} modified {}",
            self.name,
            result.matched,
            result.modified
        );
        Ok(result)
    }

    async fn insert(&self, mut record: Record) -> Result<Value, CollectionError> {
        let id = ensure_id(&mut record);
        self.documents.write().await.push(record);
        Ok(id)
    }

    async fn find(&self, filter: &Record) -> Result<Vec<Record>, CollectionError> {
        let documents = self.documents.read().await;
        find_records(&documents, filter)
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
