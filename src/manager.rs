//! Entry point for applications: schedule soft deletes and restores, flush
//! them, and query live or deleted documents.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::Configuration;
use crate::document::{DocumentRef, DocumentRegistry};
use crate::error::SoftDeleteError;
use crate::events::EventManager;
use crate::query::{Criteria, QueryBuilder};
use crate::unit_of_work::{CommitReport, UnitOfWork};

#[derive(Debug)]
pub struct SoftDeleteManager {
    registry: Arc<DocumentRegistry>,
    unit_of_work: UnitOfWork,
}

impl SoftDeleteManager {
    pub fn new(
        registry: Arc<DocumentRegistry>,
        configuration: Configuration,
        event_manager: EventManager,
    ) -> Self {
        let unit_of_work = UnitOfWork::new(Arc::clone(&registry), configuration, event_manager);
        Self {
            registry,
            unit_of_work,
        }
    }

    #[must_use]
    pub fn configuration(&self) -> &Configuration {
        self.unit_of_work.configuration()
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<DocumentRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn event_manager(&self) -> &EventManager {
        self.unit_of_work.event_manager()
    }

    pub fn event_manager_mut(&mut self) -> &mut EventManager {
        self.unit_of_work.event_manager_mut()
    }

    #[must_use]
    pub fn unit_of_work(&self) -> &UnitOfWork {
        &self.unit_of_work
    }

    pub fn unit_of_work_mut(&mut self) -> &mut UnitOfWork {
        &mut self.unit_of_work
    }

    /// Query builder over the live (not deleted) documents of `name`.
    pub fn create_query_builder(&self, name: &str) -> Result<QueryBuilder, SoftDeleteError> {
        let field = self.configuration().deleted_field_name().to_string();
        Ok(self.registry.create_query_builder(name)?.field(field).exists(false))
    }

    /// Query builder over the soft-deleted documents of `name`.
    pub fn create_deleted_query_builder(&self, name: &str) -> Result<QueryBuilder, SoftDeleteError> {
        let field = self.configuration().deleted_field_name().to_string();
        Ok(self.registry.create_query_builder(name)?.field(field).exists(true))
    }

    pub fn delete(&mut self, document: &DocumentRef) -> Result<(), SoftDeleteError> {
        self.unit_of_work.delete(document)
    }

    pub fn restore(&mut self, document: &DocumentRef) -> Result<(), SoftDeleteError> {
        self.unit_of_work.restore(document)
    }

    pub fn delete_by(
        &mut self,
        name: &str,
        criteria: Criteria,
        extra_fields: Criteria,
    ) -> Result<(), SoftDeleteError> {
        self.unit_of_work.delete_by_criteria(name, criteria, extra_fields)
    }

    pub fn restore_by(
        &mut self,
        name: &str,
        criteria: Criteria,
        extra_fields: Criteria,
    ) -> Result<(), SoftDeleteError> {
        self.unit_of_work.restore_by_criteria(name, criteria, extra_fields)
    }

    #[must_use]
    pub fn is_scheduled_for_delete(&self, document: &DocumentRef) -> bool {
        self.unit_of_work.is_scheduled_for_delete(document)
    }

    #[must_use]
    pub fn is_scheduled_for_restore(&self, document: &DocumentRef) -> bool {
        self.unit_of_work.is_scheduled_for_restore(document)
    }

    #[must_use]
    pub fn document_deletes(&self) -> Vec<DocumentRef> {
        self.unit_of_work.document_deletes()
    }

    #[must_use]
    pub fn document_restores(&self) -> Vec<DocumentRef> {
        self.unit_of_work.document_restores()
    }

    /// Write everything scheduled so far.
    pub async fn flush(&mut self) -> Result<CommitReport, SoftDeleteError> {
        self.unit_of_work.commit().await
    }

    pub async fn flush_at(&mut self, deleted_at: DateTime<Utc>) -> Result<CommitReport, SoftDeleteError> {
        self.unit_of_work.commit_at(deleted_at).await
    }

    pub fn clear(&mut self) {
        self.unit_of_work.clear();
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
