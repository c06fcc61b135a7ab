//! Collection persisted as a JSON file under a store directory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use super::atomic::atomic_write;
use super::memory::{find_records, update_records};
use super::{ensure_id, Collection, CollectionError, Record, UpdateOptions, WriteResult};

#[derive(Debug, Default, Serialize, Deserialize)]
struct CollectionFile {
    #[serde(default)]
    documents: Vec<Record>,
}

/// Collection stored at `<dir>/<name>.json`.
///
/// Each write reads the file, applies the change and replaces the file
/// atomically. Writes through one instance are serialized.
#[derive(Debug)]
pub struct JsonFileCollection {
    name: String,
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileCollection {
    #[must_use]
    pub fn new(dir: &Path, name: impl Into<String>) -> Self {
        let name = name.into();
        let path = dir.join(format!("{name}.json"));
        Self {
            name,
            path,
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_documents(&self) -> Result<Vec<Record>, CollectionError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let file: CollectionFile = serde_json::from_str(&content)?;
        Ok(file.documents)
    }

    async fn write_documents(&self, documents: Vec<Record>) -> Result<(), CollectionError> {
        let content = serde_json::to_string_pretty(&CollectionFile { documents })?;
        atomic_write(&self.path, &content).await?;
        Ok(())
    }
}

#[async_trait]
impl Collection for JsonFileCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn update(
        &self,
        filter: &Record,
        update: &Record,
        options: UpdateOptions,
    ) -> Result<WriteResult, CollectionError> {
        let _guard = self.lock.lock().await;
        let mut documents = self.read_documents().await?;
        let result = update_records(&mut documents, filter, update, options)?;
        if result.modified > 0 {
            self.write_documents(documents).await?;
        }
        debug!(
            "Updated {} ({} matched, {} modified)",
            self.path.display(),
            result.matched,
            result.modified
        );
        Ok(result)
    }

    async fn insert(&self, mut record: Record) -> Result<Value, CollectionError> {
        let _guard = self.lock.lock().await;
        let mut documents = self.read_documents().await?;
        let id = ensure_id(&mut record);
        documents.push(record);
        self.write_documents(documents).await?;
        Ok(id)
    }

    async fn find(&self, filter: &Record) -> Result<Vec<Record>, CollectionError> {
        let documents = self.read_documents().await?;
        find_records(&documents, filter)
    }
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;
