//! Explicit mapping from document type names to their storage.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::SoftDeleteable;
use crate::error::SoftDeleteError;
use crate::query::{Criteria, QueryBuilder};
use crate::store::Collection;

/// Normalizes a filter before it is sent to the collection, e.g. to rename
/// fields to their stored names. The result is treated as opaque.
pub trait QueryPreparer: Send + Sync {
    fn prepare_query(&self, criteria: Criteria) -> Criteria;
}

impl<F> QueryPreparer for F
where
    F: Fn(Criteria) -> Criteria + Send + Sync,
{
    fn prepare_query(&self, criteria: Criteria) -> Criteria {
        self(criteria)
    }
}

/// How one document type is stored.
#[derive(Clone)]
pub struct ClassMetadata {
    name: String,
    collection: Arc<dyn Collection>,
    preparer: Option<Arc<dyn QueryPreparer>>,
}

impl ClassMetadata {
    #[must_use]
    pub fn new(name: impl Into<String>, collection: Arc<dyn Collection>) -> Self {
        Self {
            name: name.into(),
            collection,
            preparer: None,
        }
    }

    #[must_use]
    pub fn with_query_preparer(mut self, preparer: impl QueryPreparer + 'static) -> Self {
        self.preparer = Some(Arc::new(preparer));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn collection(&self) -> &Arc<dyn Collection> {
        &self.collection
    }

    /// The storage identifier of `document`.
    pub fn identifier_object(&self, document: &dyn SoftDeleteable) -> Result<Value, SoftDeleteError> {
        document
            .identifier()
            .ok_or_else(|| SoftDeleteError::MissingIdentifier(self.name.clone()))
    }

    /// Run `criteria` through the type's query preparer, if it has one.
    #[must_use]
    pub fn prepare_query(&self, criteria: Criteria) -> Criteria {
        match &self.preparer {
            Some(preparer) => preparer.prepare_query(criteria),
            None => criteria,
        }
    }
}

impl fmt::Debug for ClassMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassMetadata")
            .field("name", &self.name)
            .field("collection", &self.collection.name())
            .field("preparer", &self.preparer.is_some())
            .finish()
    }
}

/// Registered document types, populated before the unit of work is built.
#[derive(Debug, Default, Clone)]
pub struct DocumentRegistry {
    classes: HashMap<String, Arc<ClassMetadata>>,
}

impl DocumentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `metadata`, replacing any type of the same name.
    pub fn register(&mut self, metadata: ClassMetadata) -> &mut Self {
        debug!(
            "Registering document type {} -> collection {}",
            metadata.name(),
            metadata.collection().name()
        );
        self.classes
            .insert(metadata.name().to_string(), Arc::new(metadata));
        self
    }

    pub fn class_metadata(&self, name: &str) -> Result<Arc<ClassMetadata>, SoftDeleteError> {
        self.classes
            .get(name)
            .cloned()
            .ok_or_else(|| SoftDeleteError::UnknownDocumentType(name.to_string()))
    }

    pub fn document_collection(&self, name: &str) -> Result<Arc<dyn Collection>, SoftDeleteError> {
        Ok(Arc::clone(self.class_metadata(name)?.collection()))
    }

    /// Empty query builder on the collection of `name`.
    pub fn create_query_builder(&self, name: &str) -> Result<QueryBuilder, SoftDeleteError> {
        Ok(QueryBuilder::new(self.document_collection(name)?))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Registered type names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.classes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::StoredDocument;
    use crate::store::MemoryCollection;
    use serde_json::json;

    fn registry() -> DocumentRegistry {
        let mut registry = DocumentRegistry::new();
        registry
            .register(ClassMetadata::new("Seller", Arc::new(MemoryCollection::new("sellers"))))
            .register(ClassMetadata::new("Sellable", Arc::new(MemoryCollection::new("sellables"))));
        registry
    }

    #[test]
    fn test_lookup_registered_type() {
        let registry = registry();
        let metadata = registry.class_metadata("Seller").unwrap();
        assert_eq!(metadata.name(), "Seller");
        assert_eq!(metadata.collection().name(), "sellers");
        assert_eq!(registry.names(), vec!["Sellable", "Seller"]);
    }

    #[test]
    fn test_unknown_type() {
        let registry = registry();
        let result = registry.class_metadata("Buyer");
        assert!(matches!(result, Err(SoftDeleteError::UnknownDocumentType(name)) if name == "Buyer"));
        assert!(!registry.contains("Buyer"));
    }

    #[test]
    fn test_identifier_object() {
        let registry = registry();
        let metadata = registry.class_metadata("Seller").unwrap();

        let stored = StoredDocument::with_id("Seller", json!(3));
        assert_eq!(metadata.identifier_object(&stored).unwrap(), json!(3));

        let unsaved = StoredDocument::new("Seller");
        assert!(matches!(
            metadata.identifier_object(&unsaved),
            Err(SoftDeleteError::MissingIdentifier(_))
        ));
    }

    #[test]
    fn test_query_preparer_applied() {
        let metadata = ClassMetadata::new("Seller", Arc::new(MemoryCollection::new("sellers")))
            .with_query_preparer(|mut criteria: Criteria| {
                if let Some(value) = criteria.remove("name") {
                    criteria.insert("n".to_string(), value);
                }
                criteria
            });

        let prepared = metadata.prepare_query(json!({"name": "jwage"}).as_object().cloned().unwrap());
        assert_eq!(prepared.get("n"), Some(&json!("jwage")));
        assert!(!prepared.contains_key("name"));
    }
}
