use super::*;
use crate::document::{ClassMetadata, SoftDeleteable, StoredDocument};
use crate::store::{Collection, CollectionError, MemoryCollection, Record, UpdateOptions, WriteResult};
use async_trait::async_trait;
use chrono::TimeZone;
use serde_json::{json, Value};
use std::sync::Mutex;

fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

fn timestamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 5, 6, 7).unwrap()
}

struct Fixture {
    sellers: Arc<MemoryCollection>,
    sellables: Arc<MemoryCollection>,
    registry: Arc<DocumentRegistry>,
}

async fn fixture() -> Fixture {
    let sellers = Arc::new(MemoryCollection::new("sellers"));
    let sellables = Arc::new(MemoryCollection::new("sellables"));
    for id in 1..=2 {
        sellers.insert(record(json!({"_id": id}))).await.unwrap();
        for n in 0..2 {
            sellables
                .insert(record(json!({"_id": id * 10 + n, "seller": id})))
                .await
                .unwrap();
        }
    }
    let mut registry = DocumentRegistry::new();
    registry
        .register(ClassMetadata::new("Seller", sellers.clone()))
        .register(ClassMetadata::new("Sellable", sellables.clone()));
    Fixture {
        sellers,
        sellables,
        registry: Arc::new(registry),
    }
}

impl Fixture {
    fn unit_of_work(&self) -> UnitOfWork {
        UnitOfWork::new(Arc::clone(&self.registry), Configuration::new(), EventManager::new())
    }

    fn strict_unit_of_work(&self) -> UnitOfWork {
        let configuration = Configuration::new().with_scheduling_policy(SchedulingPolicy::Strict);
        UnitOfWork::new(Arc::clone(&self.registry), configuration, EventManager::new())
    }
}

fn seller(id: i64) -> DocumentRef {
    DocumentRef::new(StoredDocument::with_id("Seller", json!(id)))
}

fn deleted_seller(id: i64) -> DocumentRef {
    let mut document = StoredDocument::with_id("Seller", json!(id));
    document.set_deleted_at(Some(timestamp()));
    DocumentRef::new(document)
}

fn event_log(uow: &mut UnitOfWork) -> Arc<Mutex<Vec<String>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for event in Events::ALL {
        let log = Arc::clone(&log);
        uow.event_manager_mut().add_listener(event, move |args| {
            let id = args.document().read()?.identifier().unwrap_or(Value::Null);
            log.lock().unwrap().push(format!("{event}:{id}"));
            Ok(())
        });
    }
    log
}

#[tokio::test]
async fn test_delete_schedules_document() {
    let fixture = fixture().await;
    let mut uow = fixture.unit_of_work();
    let document = seller(1);

    uow.delete(&document).unwrap();

    assert!(uow.is_scheduled_for_delete(&document));
    assert!(!uow.is_scheduled_for_restore(&document));
    assert_eq!(uow.document_deletes().len(), 1);
    assert!(uow.document_deletes()[0].ptr_eq(&document));
}

#[tokio::test]
async fn test_restore_schedules_document() {
    let fixture = fixture().await;
    let mut uow = fixture.unit_of_work();
    let document = deleted_seller(1);

    uow.restore(&document).unwrap();

    assert!(uow.is_scheduled_for_restore(&document));
    assert_eq!(uow.document_restores().len(), 1);
}

#[tokio::test]
async fn test_double_delete_is_noop_when_lenient() {
    let fixture = fixture().await;
    let mut uow = fixture.unit_of_work();
    let document = seller(1);

    uow.delete(&document).unwrap();
    uow.delete(&document.clone()).unwrap();

    assert_eq!(uow.document_deletes().len(), 1);
}

#[tokio::test]
async fn test_double_delete_fails_when_strict() {
    let fixture = fixture().await;
    let mut uow = fixture.strict_unit_of_work();
    let document = seller(1);

    uow.delete(&document).unwrap();
    let result = uow.delete(&document);

    assert!(matches!(
        result,
        Err(SoftDeleteError::DuplicateScheduling { operation: Operation::Delete, .. })
    ));
}

#[tokio::test]
async fn test_strict_rejects_invalid_state() {
    let fixture = fixture().await;
    let mut uow = fixture.strict_unit_of_work();

    let result = uow.delete(&deleted_seller(1));
    assert!(matches!(
        result,
        Err(SoftDeleteError::InvalidState { operation: Operation::Delete, .. })
    ));

    let result = uow.restore(&seller(2));
    assert!(matches!(
        result,
        Err(SoftDeleteError::InvalidState { operation: Operation::Restore, .. })
    ));
    assert!(!uow.has_pending_work());
}

#[tokio::test]
async fn test_lenient_accepts_any_state() {
    let fixture = fixture().await;
    let mut uow = fixture.unit_of_work();

    uow.delete(&deleted_seller(1)).unwrap();
    uow.restore(&seller(2)).unwrap();

    assert_eq!(uow.document_deletes().len(), 1);
    assert_eq!(uow.document_restores().len(), 1);
}

#[tokio::test]
async fn test_unregistered_type_rejected() {
    let fixture = fixture().await;
    let mut uow = fixture.unit_of_work();
    let document = DocumentRef::new(StoredDocument::with_id("Buyer", json!(1)));

    assert!(matches!(
        uow.delete(&document),
        Err(SoftDeleteError::UnknownDocumentType(_))
    ));
    assert!(matches!(
        uow.delete_by_criteria("Buyer", Criteria::new(), Criteria::new()),
        Err(SoftDeleteError::UnknownDocumentType(_))
    ));
}

#[tokio::test]
async fn test_delete_then_restore_cancels_out() {
    let fixture = fixture().await;
    let mut uow = fixture.unit_of_work();
    let log = event_log(&mut uow);
    let document = seller(1);

    uow.delete(&document).unwrap();
    uow.restore(&document).unwrap();

    assert!(!uow.is_scheduled_for_delete(&document));
    assert!(!uow.is_scheduled_for_restore(&document));
    let report = uow.commit().await.unwrap();
    assert_eq!(report.commands(), 0);
    assert!(fixture.sellers.history().await.is_empty());
    assert!(log.lock().unwrap().is_empty());
    assert!(!document.read().unwrap().is_deleted());
}

#[tokio::test]
async fn test_restore_then_delete_of_deleted_document_cancels_out() {
    let fixture = fixture().await;
    let mut uow = fixture.unit_of_work();
    let document = deleted_seller(1);

    uow.restore(&document).unwrap();
    uow.delete(&document).unwrap();

    assert!(!uow.has_pending_work());
    assert_eq!(document.read().unwrap().deleted_at(), Some(timestamp()));
}

#[tokio::test]
async fn test_opposite_scheduling_evicts() {
    let fixture = fixture().await;
    let mut uow = fixture.unit_of_work();
    let document = deleted_seller(1);

    uow.delete(&document).unwrap();
    uow.restore(&document).unwrap();

    assert!(!uow.is_scheduled_for_delete(&document));
    assert!(uow.is_scheduled_for_restore(&document));
}

#[tokio::test]
async fn test_commit_sets_marker_and_fires_events() {
    let fixture = fixture().await;
    let mut uow = fixture.unit_of_work();
    let log = event_log(&mut uow);
    let document = seller(1);

    uow.delete(&document).unwrap();
    let report = uow.commit_at(timestamp()).await.unwrap();

    assert_eq!(report.deletes.modified, 1);
    assert_eq!(document.read().unwrap().deleted_at(), Some(timestamp()));
    let stored = fixture.sellers.find_one(&record(json!({"_id": 1}))).await.unwrap().unwrap();
    assert_eq!(stored.get("deletedAt"), Some(&json!(timestamp().to_rfc3339())));
    assert_eq!(
        *log.lock().unwrap(),
        vec!["preSoftDelete:1".to_string(), "postSoftDelete:1".to_string()]
    );
    assert!(!uow.has_pending_work());
    assert!(!uow.is_scheduled_for_delete(&document));
}

#[tokio::test]
async fn test_commit_restore_clears_marker() {
    let fixture = fixture().await;
    fixture
        .sellers
        .update(
            &record(json!({"_id": 2})),
            &record(json!({"$set": {"deletedAt": timestamp().to_rfc3339()}})),
            UpdateOptions::bulk(),
        )
        .await
        .unwrap();
    let mut uow = fixture.unit_of_work();
    let log = event_log(&mut uow);
    let document = deleted_seller(2);

    uow.restore(&document).unwrap();
    uow.commit().await.unwrap();

    assert!(!document.read().unwrap().is_deleted());
    let stored = fixture.sellers.find_one(&record(json!({"_id": 2}))).await.unwrap().unwrap();
    assert!(!stored.contains_key("deletedAt"));
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "preSoftDeleteRestore:2".to_string(),
            "postSoftDeleteRestore:2".to_string()
        ]
    );
}

#[tokio::test]
async fn test_commit_batches_per_type() {
    let fixture = fixture().await;
    let mut uow = fixture.unit_of_work();
    uow.delete(&seller(1)).unwrap();
    uow.delete(&seller(2)).unwrap();
    uow.delete(&DocumentRef::new(StoredDocument::with_id("Sellable", json!(10))))
        .unwrap();

    let report = uow.commit().await.unwrap();

    assert_eq!(report.deletes.commands, 2);
    assert_eq!(fixture.sellers.history().await.len(), 1);
    assert_eq!(fixture.sellables.history().await.len(), 1);
}

#[tokio::test]
async fn test_deletes_run_before_restores() {
    let fixture = fixture().await;
    let mut uow = fixture.unit_of_work();
    let log = event_log(&mut uow);

    uow.restore(&deleted_seller(2)).unwrap();
    uow.delete(&seller(1)).unwrap();
    uow.commit().await.unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log[0], "preSoftDelete:1");
    assert_eq!(log[1], "postSoftDelete:1");
    assert_eq!(log[2], "preSoftDeleteRestore:2");
    assert_eq!(log[3], "postSoftDeleteRestore:2");
}

#[tokio::test]
async fn test_commit_with_nothing_pending_writes_nothing() {
    let fixture = fixture().await;
    let mut uow = fixture.unit_of_work();

    let report = uow.commit().await.unwrap();

    assert_eq!(report, CommitReport::default());
    assert!(fixture.sellers.history().await.is_empty());
    assert!(fixture.sellables.history().await.is_empty());
}

#[tokio::test]
async fn test_criteria_operations_are_not_deduplicated() {
    let fixture = fixture().await;
    let mut uow = fixture.unit_of_work();
    uow.delete_by_criteria("Sellable", record(json!({"seller": 1})), Criteria::new())
        .unwrap();
    uow.delete_by_criteria("Sellable", record(json!({"seller": 1})), Criteria::new())
        .unwrap();

    assert_eq!(uow.pending_criteria().deletes()["Sellable"].len(), 2);
    let report = uow.commit().await.unwrap();

    assert_eq!(report.deletes.commands, 2);
    assert_eq!(report.deletes.modified, 2);
    assert!(uow.pending_criteria().is_empty());
}

#[tokio::test]
async fn test_pre_delete_listener_cascades_in_same_commit() {
    let fixture = fixture().await;
    let mut uow = fixture.unit_of_work();
    uow.event_manager_mut()
        .add_listener(Events::PreSoftDelete, |args| {
            let id = args.document().read()?.identifier().unwrap_or(Value::Null);
            args.delete_by(
                "Sellable",
                record(json!({"seller": id.clone()})),
                record(json!({"cascadeDeletedBy": id})),
            )?;
            Ok(())
        });

    uow.delete(&seller(1)).unwrap();
    uow.commit().await.unwrap();

    let cascaded = fixture
        .sellables
        .find(&record(json!({"cascadeDeletedBy": 1, "deletedAt": {"$exists": true}})))
        .await
        .unwrap();
    assert_eq!(cascaded.len(), 2);
    let untouched = fixture
        .sellables
        .count(&record(json!({"seller": 2, "deletedAt": {"$exists": false}})))
        .await
        .unwrap();
    assert_eq!(untouched, 2);
}

#[tokio::test]
async fn test_pre_delete_listener_restores_in_same_commit() {
    let fixture = fixture().await;
    fixture
        .sellables
        .insert(record(json!({
            "_id": 30,
            "seller": 3,
            "deletedAt": "2024-01-01T00:00:00+00:00",
            "cascadeDeletedBy": 3
        })))
        .await
        .unwrap();
    let mut uow = fixture.unit_of_work();
    uow.event_manager_mut()
        .add_listener(Events::PreSoftDelete, |args| {
            args.restore_by(
                "Sellable",
                record(json!({"seller": 3})),
                record(json!({"cascadeDeletedBy": 3})),
            )?;
            Ok(())
        });

    uow.delete(&seller(1)).unwrap();
    let report = uow.commit().await.unwrap();

    let restored = fixture
        .sellables
        .find_one(&record(json!({"_id": 30})))
        .await
        .unwrap()
        .unwrap();
    assert!(!restored.contains_key("deletedAt"));
    assert!(!restored.contains_key("cascadeDeletedBy"));
    assert_eq!(report.restores.modified, 1);
    assert!(!uow.has_pending_work());
}

#[tokio::test]
async fn test_pre_restore_listener_deletes_in_same_commit() {
    let fixture = fixture().await;
    let mut uow = fixture.unit_of_work();
    uow.event_manager_mut()
        .add_listener(Events::PreSoftDeleteRestore, |args| {
            args.delete_by("Sellable", record(json!({"seller": 2})), Criteria::new())?;
            Ok(())
        });

    uow.restore(&deleted_seller(1)).unwrap();
    let report = uow.commit().await.unwrap();

    let live = fixture
        .sellables
        .count(&record(json!({"seller": 2, "deletedAt": {"$exists": false}})))
        .await
        .unwrap();
    assert_eq!(live, 0);
    assert_eq!(report.deletes.commands, 1);
    assert_eq!(report.deletes.modified, 2);
    assert!(!uow.has_pending_work());
}

#[tokio::test]
async fn test_post_event_criteria_run_before_commit_returns() {
    let fixture = fixture().await;
    let mut uow = fixture.unit_of_work();
    uow.event_manager_mut()
        .add_listener(Events::PostSoftDelete, |args| {
            args.delete_by("Sellable", record(json!({"seller": 1})), Criteria::new())?;
            Ok(())
        });
    uow.event_manager_mut()
        .add_listener(Events::PostSoftDeleteRestore, |args| {
            args.restore_by("Sellable", record(json!({"seller": 1})), Criteria::new())?;
            Ok(())
        });

    uow.delete(&seller(1)).unwrap();
    let report = uow.commit().await.unwrap();

    assert!(!uow.has_pending_work());
    assert!(uow.pending_criteria().is_empty());
    assert_eq!(report.deletes.commands, 2);
    let deleted = fixture
        .sellables
        .count(&record(json!({"seller": 1, "deletedAt": {"$exists": true}})))
        .await
        .unwrap();
    assert_eq!(deleted, 2);

    uow.restore(&deleted_seller(1)).unwrap();
    uow.commit().await.unwrap();

    assert!(!uow.has_pending_work());
    let live = fixture
        .sellables
        .count(&record(json!({"seller": 1, "deletedAt": {"$exists": false}})))
        .await
        .unwrap();
    assert_eq!(live, 2);
}

#[tokio::test]
async fn test_pending_documents_listed_in_token_order() {
    let fixture = fixture().await;
    let mut uow = fixture.unit_of_work();
    let first_seen = seller(1);
    let second_seen = seller(2);

    uow.restore(&first_seen).unwrap();
    uow.delete(&second_seen).unwrap();
    uow.delete(&first_seen).unwrap();

    let deletes = uow.document_deletes();
    assert_eq!(deletes.len(), 2);
    assert!(deletes[0].ptr_eq(&first_seen));
    assert!(deletes[1].ptr_eq(&second_seen));
    assert!(uow.document_restores().is_empty());
}

#[tokio::test]
async fn test_listener_failure_aborts_commit() {
    let fixture = fixture().await;
    let mut uow = fixture.unit_of_work();
    uow.event_manager_mut()
        .add_listener(Events::PreSoftDelete, |_| anyhow::bail!("not allowed"));
    let document = seller(1);

    uow.delete(&document).unwrap();
    let result = uow.commit().await;

    match result {
        Err(SoftDeleteError::ListenerFailed { event, message }) => {
            assert_eq!(event, Events::PreSoftDelete);
            assert_eq!(message, "not allowed");
        }
        other => panic!("expected listener failure, got {other:?}"),
    }
    assert!(fixture.sellers.history().await.is_empty());
    assert!(uow.is_scheduled_for_delete(&document));
}

#[tokio::test]
async fn test_clear_drops_pending_work() {
    let fixture = fixture().await;
    let mut uow = fixture.unit_of_work();
    let document = seller(1);
    uow.delete(&document).unwrap();
    uow.restore(&deleted_seller(2)).unwrap();
    uow.delete_by_criteria("Sellable", Criteria::new(), Criteria::new())
        .unwrap();

    uow.clear();

    assert!(!uow.has_pending_work());
    assert!(!uow.is_scheduled_for_delete(&document));
    uow.commit().await.unwrap();
    assert!(fixture.sellers.history().await.is_empty());
}

#[tokio::test]
async fn test_document_persister_is_cached() {
    let fixture = fixture().await;
    let mut uow = fixture.unit_of_work();

    let first = uow.document_persister("Seller").unwrap() as *const CollectionPersister;
    let second = uow.document_persister("Seller").unwrap() as *const CollectionPersister;

    assert_eq!(first, second);
    assert_eq!(uow.document_persister("Seller").unwrap().class().name(), "Seller");
    assert!(uow.document_persister("Buyer").is_err());
}

struct FailingCollection;

#[async_trait]
impl Collection for FailingCollection {
    fn name(&self) -> &str {
        "failing"
    }

    async fn update(&self, _: &Record, _: &Record, _: UpdateOptions) -> Result<WriteResult, CollectionError> {
        Err(CollectionError::Custom("disk full".to_string()))
    }

    async fn insert(&self, _: Record) -> Result<Value, CollectionError> {
        Err(CollectionError::Custom("disk full".to_string()))
    }

    async fn find(&self, _: &Record) -> Result<Vec<Record>, CollectionError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_failed_delete_skips_restores_and_keeps_pending() {
    let sellers = Arc::new(MemoryCollection::new("sellers"));
    let mut registry = DocumentRegistry::new();
    registry
        .register(ClassMetadata::new("Broken", Arc::new(FailingCollection)))
        .register(ClassMetadata::new("Seller", sellers.clone()));
    let mut uow = UnitOfWork::new(Arc::new(registry), Configuration::new(), EventManager::new());
    let broken = DocumentRef::new(StoredDocument::with_id("Broken", json!(1)));

    uow.delete(&broken).unwrap();
    uow.restore(&deleted_seller(2)).unwrap();
    let result = uow.commit().await;

    assert!(result.unwrap_err().is_write_failure());
    assert!(sellers.history().await.is_empty());
    assert!(uow.is_scheduled_for_delete(&broken));
    assert!(!broken.read().unwrap().is_deleted());
    assert_eq!(uow.document_restores().len(), 1);
}
