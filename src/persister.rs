//! Per-type batching of soft-delete and restore writes.
//!
//! A `CollectionPersister` queues documents by identity token and criteria
//! operations in call order, then turns each queue into as few bulk update
//! commands as possible against its type's collection.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::document::{ClassMetadata, DocumentRef, Oid};
use crate::error::SoftDeleteError;
use crate::query::{and, exists, id_in, marker_value, Criteria};
use crate::store::{Record, UpdateOptions, WriteResult};

/// A delete or restore addressed by filter rather than by document.
#[derive(Debug, Clone, PartialEq)]
pub struct CriteriaOperation {
    pub criteria: Criteria,
    /// Fields set together with the marker on delete, and required then
    /// unset on restore.
    pub extra_fields: Criteria,
}

impl CriteriaOperation {
    #[must_use]
    pub fn new(criteria: Criteria, extra_fields: Criteria) -> Self {
        Self {
            criteria,
            extra_fields,
        }
    }
}

/// What an execute call sent and what the collection reported back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteSummary {
    pub commands: usize,
    pub matched: u64,
    pub modified: u64,
}

impl ExecuteSummary {
    fn record(&mut self, result: WriteResult) {
        self.commands = self.commands.saturating_add(1);
        self.matched = self.matched.saturating_add(result.matched);
        self.modified = self.modified.saturating_add(result.modified);
    }
}

pub struct CollectionPersister {
    class: Arc<ClassMetadata>,
    queued_deletes: BTreeMap<Oid, DocumentRef>,
    queued_restores: BTreeMap<Oid, DocumentRef>,
    queued_delete_criteria: Vec<CriteriaOperation>,
    queued_restore_criteria: Vec<CriteriaOperation>,
}

impl CollectionPersister {
    #[must_use]
    pub fn new(class: Arc<ClassMetadata>) -> Self {
        Self {
            class,
            queued_deletes: BTreeMap::new(),
            queued_restores: BTreeMap::new(),
            queued_delete_criteria: Vec::new(),
            queued_restore_criteria: Vec::new(),
        }
    }

    #[must_use]
    pub fn class(&self) -> &Arc<ClassMetadata> {
        &self.class
    }

    pub fn queue_delete(&mut self, oid: Oid, document: DocumentRef) {
        self.queued_deletes.insert(oid, document);
    }

    pub fn queue_restore(&mut self, oid: Oid, document: DocumentRef) {
        self.queued_restores.insert(oid, document);
    }

    pub fn queue_delete_by_criteria(&mut self, operation: CriteriaOperation) {
        self.queued_delete_criteria.push(operation);
    }

    pub fn queue_restore_by_criteria(&mut self, operation: CriteriaOperation) {
        self.queued_restore_criteria.push(operation);
    }

    #[must_use]
    pub fn queued_deletes(&self) -> &BTreeMap<Oid, DocumentRef> {
        &self.queued_deletes
    }

    #[must_use]
    pub fn queued_restores(&self) -> &BTreeMap<Oid, DocumentRef> {
        &self.queued_restores
    }

    #[must_use]
    pub fn queued_delete_criteria(&self) -> &[CriteriaOperation] {
        &self.queued_delete_criteria
    }

    #[must_use]
    pub fn queued_restore_criteria(&self) -> &[CriteriaOperation] {
        &self.queued_restore_criteria
    }

    #[must_use]
    pub fn has_queued_deletes(&self) -> bool {
        !self.queued_deletes.is_empty() || !self.queued_delete_criteria.is_empty()
    }

    #[must_use]
    pub fn has_queued_restores(&self) -> bool {
        !self.queued_restores.is_empty() || !self.queued_restore_criteria.is_empty()
    }

    /// Remove `oid` from both document queues. Returns whether it was queued.
    pub fn unqueue(&mut self, oid: Oid) -> bool {
        let deleted = self.queued_deletes.remove(&oid).is_some();
        let restored = self.queued_restores.remove(&oid).is_some();
        deleted || restored
    }

    /// Drop every queue without writing.
    pub fn reset(&mut self) {
        self.queued_deletes.clear();
        self.queued_restores.clear();
        self.queued_delete_criteria.clear();
        self.queued_restore_criteria.clear();
    }

    /// Mark every queued document and criteria match as deleted at
    /// `deleted_at` (now when `None`). Documents that already carry a marker
    /// are left alone.
    pub async fn execute_deletes(
        &mut self,
        configuration: &Configuration,
        deleted_at: Option<DateTime<Utc>>,
    ) -> Result<ExecuteSummary, SoftDeleteError> {
        let field = configuration.deleted_field_name();
        let marker = marker_value(deleted_at.unwrap_or_else(Utc::now));
        let mut summary = ExecuteSummary::default();

        if !self.queued_deletes.is_empty() {
            let filter = and(id_in(self.queued_ids(&self.queued_deletes)?), exists(field, false));
            let update = set_update(field, &marker, None);
            summary.record(self.send(filter, update).await?);
        }

        for operation in &self.queued_delete_criteria {
            let filter = and(operation.criteria.clone(), exists(field, false));
            let update = set_update(field, &marker, Some(&operation.extra_fields));
            summary.record(self.send(filter, update).await?);
        }

        info!(
            "Soft deleted in {}: {} command(s), {} matched, {} modified",
            self.class.collection().name(),
            summary.commands,
            summary.matched,
            summary.modified
        );
        self.queued_deletes.clear();
        self.queued_delete_criteria.clear();
        Ok(summary)
    }

    /// Clear the marker on every queued document and criteria match.
    pub async fn execute_restores(
        &mut self,
        configuration: &Configuration,
    ) -> Result<ExecuteSummary, SoftDeleteError> {
        let field = configuration.deleted_field_name();
        let mut summary = ExecuteSummary::default();

        if !self.queued_restores.is_empty() {
            let filter = and(id_in(self.queued_ids(&self.queued_restores)?), exists(field, true));
            let update = unset_update(field, None);
            summary.record(self.send(filter, update).await?);
        }

        for operation in &self.queued_restore_criteria {
            let filter = and(
                and(operation.criteria.clone(), tag_filter(&operation.extra_fields)),
                exists(field, true),
            );
            let update = unset_update(field, Some(&operation.extra_fields));
            summary.record(self.send(filter, update).await?);
        }

        info!(
            "Restored in {}: {} command(s), {} matched, {} modified",
            self.class.collection().name(),
            summary.commands,
            summary.matched,
            summary.modified
        );
        self.queued_restores.clear();
        self.queued_restore_criteria.clear();
        Ok(summary)
    }

    fn queued_ids(&self, queue: &BTreeMap<Oid, DocumentRef>) -> Result<Vec<Value>, SoftDeleteError> {
        let mut ids = Vec::with_capacity(queue.len());
        for document in queue.values() {
            let document = document.read()?;
            ids.push(self.class.identifier_object(&*document)?);
        }
        Ok(ids)
    }

    async fn send(&self, filter: Criteria, update: Record) -> Result<WriteResult, SoftDeleteError> {
        let filter = self.class.prepare_query(filter);
        let collection = self.class.collection();
        debug!("{}: update {:?} -> {:?}", collection.name(), filter, update);
        collection
            .update(&filter, &update, UpdateOptions::bulk())
            .await
            .map_err(|e| {
                warn!("Write to {} failed: {}", collection.name(), e);
                SoftDeleteError::write_failure(collection.name(), e)
            })
    }
}

impl std::fmt::Debug for CollectionPersister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionPersister")
            .field("class", &self.class.name())
            .field("queued_deletes", &self.queued_deletes.len())
            .field("queued_restores", &self.queued_restores.len())
            .field("queued_delete_criteria", &self.queued_delete_criteria.len())
            .field("queued_restore_criteria", &self.queued_restore_criteria.len())
            .finish()
    }
}

fn set_update(field: &str, marker: &Value, extra_fields: Option<&Criteria>) -> Record {
    let mut set = Record::new();
    if let Some(extra) = extra_fields {
        set.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    set.insert(field.to_string(), marker.clone());
    let mut update = Record::new();
    update.insert("$set".to_string(), Value::Object(set));
    update
}

fn unset_update(field: &str, extra_fields: Option<&Criteria>) -> Record {
    let mut unset = Record::new();
    unset.insert(field.to_string(), Value::Bool(true));
    if let Some(extra) = extra_fields {
        for key in extra.keys() {
            unset.insert(key.clone(), Value::Bool(true));
        }
    }
    let mut update = Record::new();
    update.insert("$unset".to_string(), Value::Object(unset));
    update
}

/// Exact-value conditions on the cascade tag fields, written with `$eq`
/// so tag values that look like operator documents still compare literally.
fn tag_filter(extra_fields: &Criteria) -> Criteria {
    extra_fields
        .iter()
        .map(|(k, v)| (k.clone(), json!({ "$eq": v })))
        .collect()
}

#[cfg(test)]
#[path = "persister_tests.rs"]
mod tests;
