//! Soft-deleteable documents, the handles the unit of work tracks them by,
//! and the registry describing how each document type is stored.

mod identity;
mod registry;
mod stored;

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use crate::error::SoftDeleteError;

pub use identity::{IdentityMap, Oid};
pub use registry::{ClassMetadata, DocumentRegistry, QueryPreparer};
pub use stored::StoredDocument;

/// A document that can be marked deleted without being removed.
pub trait SoftDeleteable: Send + Sync + 'static {
    /// Registered type name, used to find the collection and persister.
    fn document_name(&self) -> &str;

    /// Database identifier, `None` while the document has not been stored.
    fn identifier(&self) -> Option<Value>;

    fn deleted_at(&self) -> Option<DateTime<Utc>>;

    fn set_deleted_at(&mut self, deleted_at: Option<DateTime<Utc>>);

    fn is_deleted(&self) -> bool {
        self.deleted_at().is_some()
    }
}

/// Shared handle to a host-owned document.
///
/// Two handles refer to the same document when they share an allocation;
/// the unit of work keys its pending sets on that identity, not on the
/// database identifier.
#[derive(Clone)]
pub struct DocumentRef(Arc<RwLock<dyn SoftDeleteable>>);

impl DocumentRef {
    #[must_use]
    pub fn new<T: SoftDeleteable>(document: T) -> Self {
        Self(Arc::new(RwLock::new(document)))
    }

    /// Wrap a handle the host already holds, so mutations made through the
    /// unit of work are visible to it.
    #[must_use]
    pub fn from_shared<T: SoftDeleteable>(document: Arc<RwLock<T>>) -> Self {
        Self(document)
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, dyn SoftDeleteable>, SoftDeleteError> {
        self.0.read().map_err(|_| SoftDeleteError::LockPoisoned)
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, dyn SoftDeleteable>, SoftDeleteError> {
        self.0.write().map_err(|_| SoftDeleteError::LockPoisoned)
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &DocumentRef) -> bool {
        self.address() == other.address()
    }

    pub(crate) fn address(&self) -> usize {
        Arc::as_ptr(&self.0).cast::<()>() as usize
    }

    pub(crate) fn downgrade(&self) -> Weak<RwLock<dyn SoftDeleteable>> {
        Arc::downgrade(&self.0)
    }

    /// `"<type>(<id>)"`, for logs and error messages.
    pub(crate) fn describe(&self) -> String {
        match self.read() {
            Ok(document) => match document.identifier() {
                Some(id) => format!("{}({id})", document.document_name()),
                None => format!("{}(unsaved)", document.document_name()),
            },
            Err(_) => "<poisoned>".to_string(),
        }
    }
}

impl fmt::Debug for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DocumentRef").field(&self.describe()).finish()
    }
}

impl<T: SoftDeleteable> From<Arc<RwLock<T>>> for DocumentRef {
    fn from(document: Arc<RwLock<T>>) -> Self {
        Self::from_shared(document)
    }
}
