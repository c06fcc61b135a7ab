//! Common test utilities

#![allow(dead_code)] // Each test binary uses a subset

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use softdelete::{
    ClassMetadata, Collection, CollectionError, Configuration, DocumentRef, DocumentRegistry,
    EventManager, EventSubscriber, Events, LifecycleEventArgs, MemoryCollection, Record,
    SoftDeleteManager, SoftDeleteable, UpdateOptions, WriteResult,
};
use std::sync::{Arc, Mutex, RwLock};

/// Build a record from a `json!` object literal.
pub fn record(value: Value) -> Record {
    value.as_object().cloned().expect("record must be a JSON object")
}

#[derive(Debug, Clone)]
pub struct Seller {
    pub id: Option<Value>,
    pub name: String,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Seller {
    pub fn new(name: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            deleted_at: None,
        }
    }
}

impl SoftDeleteable for Seller {
    fn document_name(&self) -> &str {
        "Seller"
    }

    fn identifier(&self) -> Option<Value> {
        self.id.clone()
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    fn set_deleted_at(&mut self, deleted_at: Option<DateTime<Utc>>) {
        self.deleted_at = deleted_at;
    }
}

#[derive(Debug, Clone)]
pub struct Sellable {
    pub id: Option<Value>,
    pub seller_id: Value,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SoftDeleteable for Sellable {
    fn document_name(&self) -> &str {
        "Sellable"
    }

    fn identifier(&self) -> Option<Value> {
        self.id.clone()
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    fn set_deleted_at(&mut self, deleted_at: Option<DateTime<Utc>>) {
        self.deleted_at = deleted_at;
    }
}

/// Reference to a stored seller, used as the cascade tag.
pub fn seller_ref(id: &Value) -> Value {
    json!({ "$ref": "sellers", "$id": id })
}

/// In-memory sellers and sellables collections with their registry.
pub struct World {
    pub sellers: Arc<MemoryCollection>,
    pub sellables: Arc<MemoryCollection>,
    pub registry: Arc<DocumentRegistry>,
}

impl World {
    pub fn new() -> Self {
        let sellers = Arc::new(MemoryCollection::new("sellers"));
        let sellables = Arc::new(MemoryCollection::new("sellables"));
        let mut registry = DocumentRegistry::new();
        registry
            .register(ClassMetadata::new("Seller", sellers.clone()))
            .register(ClassMetadata::new("Sellable", sellables.clone()));
        Self {
            sellers,
            sellables,
            registry: Arc::new(registry),
        }
    }

    pub fn manager(&self) -> SoftDeleteManager {
        self.manager_with(Configuration::new())
    }

    pub fn manager_with(&self, configuration: Configuration) -> SoftDeleteManager {
        SoftDeleteManager::new(Arc::clone(&self.registry), configuration, EventManager::new())
    }

    /// Store a new seller; returns the host handle and the tracked reference.
    pub async fn persist_seller(&self, name: &str) -> (Arc<RwLock<Seller>>, DocumentRef) {
        let id = self
            .sellers
            .insert(record(json!({ "name": name })))
            .await
            .expect("insert seller");
        let mut seller = Seller::new(name);
        seller.id = Some(id);
        let shared = Arc::new(RwLock::new(seller));
        let document = DocumentRef::from_shared(Arc::clone(&shared));
        (shared, document)
    }

    pub async fn persist_sellable(&self, seller_id: &Value) -> DocumentRef {
        let id = self
            .sellables
            .insert(record(json!({ "seller": { "id": seller_id } })))
            .await
            .expect("insert sellable");
        DocumentRef::new(Sellable {
            id: Some(id),
            seller_id: seller_id.clone(),
            deleted_at: None,
        })
    }
}

/// Count documents in `collection` with the marker `field` present or absent.
pub async fn count_marked(collection: &MemoryCollection, field: &str, deleted: bool) -> u64 {
    let mut filter = Record::new();
    filter.insert(field.to_string(), json!({ "$exists": deleted }));
    collection.count(&filter).await.expect("count")
}

/// Cascades seller deletes and restores to the seller's sellables.
pub struct CascadeDeleteAndRestore;

impl CascadeDeleteAndRestore {
    fn seller_id(args: &LifecycleEventArgs<'_>) -> anyhow::Result<Option<Value>> {
        let document = args.document().read()?;
        if document.document_name() != "Seller" {
            return Ok(None);
        }
        Ok(document.identifier())
    }
}

impl EventSubscriber for CascadeDeleteAndRestore {
    fn subscribed_events(&self) -> Vec<Events> {
        vec![Events::PreSoftDelete, Events::PreSoftDeleteRestore]
    }

    fn pre_soft_delete(&self, args: &mut LifecycleEventArgs<'_>) -> anyhow::Result<()> {
        if let Some(id) = Self::seller_id(args)? {
            args.delete_by(
                "Sellable",
                record(json!({ "seller.id": id.clone() })),
                record(json!({ "cascadeDeletedBy": seller_ref(&id) })),
            )?;
        }
        Ok(())
    }

    fn pre_soft_delete_restore(&self, args: &mut LifecycleEventArgs<'_>) -> anyhow::Result<()> {
        if let Some(id) = Self::seller_id(args)? {
            args.restore_by(
                "Sellable",
                record(json!({ "seller.id": id.clone() })),
                record(json!({ "cascadeDeletedBy": seller_ref(&id) })),
            )?;
        }
        Ok(())
    }
}

/// Records the name of every event it receives.
#[derive(Default)]
pub struct RecordingSubscriber {
    pub called: Mutex<Vec<&'static str>>,
}

impl RecordingSubscriber {
    fn push(&self, event: Events) {
        self.called.lock().expect("lock").push(event.as_str());
    }

    pub fn take(&self) -> Vec<&'static str> {
        std::mem::take(&mut *self.called.lock().expect("lock"))
    }
}

impl EventSubscriber for RecordingSubscriber {
    fn subscribed_events(&self) -> Vec<Events> {
        Events::ALL.to_vec()
    }

    fn pre_soft_delete(&self, _args: &mut LifecycleEventArgs<'_>) -> anyhow::Result<()> {
        self.push(Events::PreSoftDelete);
        Ok(())
    }

    fn post_soft_delete(&self, _args: &mut LifecycleEventArgs<'_>) -> anyhow::Result<()> {
        self.push(Events::PostSoftDelete);
        Ok(())
    }

    fn pre_soft_delete_restore(&self, _args: &mut LifecycleEventArgs<'_>) -> anyhow::Result<()> {
        self.push(Events::PreSoftDeleteRestore);
        Ok(())
    }

    fn post_soft_delete_restore(&self, _args: &mut LifecycleEventArgs<'_>) -> anyhow::Result<()> {
        self.push(Events::PostSoftDeleteRestore);
        Ok(())
    }
}

/// A collection whose writes always fail.
pub struct FailingCollection;

#[async_trait]
impl Collection for FailingCollection {
    fn name(&self) -> &str {
        "failing"
    }

    async fn update(
        &self,
        _filter: &Record,
        _update: &Record,
        _options: UpdateOptions,
    ) -> Result<WriteResult, CollectionError> {
        Err(CollectionError::Custom("write rejected".to_string()))
    }

    async fn insert(&self, _record: Record) -> Result<Value, CollectionError> {
        Err(CollectionError::Custom("write rejected".to_string()))
    }

    async fn find(&self, _filter: &Record) -> Result<Vec<Record>, CollectionError> {
        Ok(Vec::new())
    }
}
