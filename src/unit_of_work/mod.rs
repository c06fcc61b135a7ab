//! Scheduling of soft deletes and restores, applied in bulk on commit.
//!
//! Documents are tracked by identity token, so two handles to the same
//! instance share one pending entry. A document is pending on at most one
//! side at a time: scheduling it for the opposite operation evicts it, and
//! when the eviction leaves its in-memory state already at the requested
//! target the two calls cancel out.
//!
//! A commit runs every delete before any restore. For each side, the pre
//! events fire for all pending documents first, so listeners can add
//! criteria operations that run in the same commit. Then each document type
//! with work gets exactly one execute call on its persister, after which
//! the documents' markers are updated and the post events fire. Criteria
//! that listeners add where the current pass can no longer pick them up
//! (delete criteria from restore events, anything from post events) run in
//! a follow-up pass before the commit returns.

mod pending;

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::mem;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{Configuration, SchedulingPolicy};
use crate::document::{DocumentRef, DocumentRegistry, IdentityMap, Oid};
use crate::error::{Operation, SoftDeleteError};
use crate::events::{EventManager, Events, LifecycleEventArgs};
use crate::persister::{CollectionPersister, ExecuteSummary};
use crate::query::Criteria;

pub use pending::PendingCriteria;

/// Totals for one commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub deletes: ExecuteSummary,
    pub restores: ExecuteSummary,
}

impl CommitReport {
    /// Number of update commands sent to collections.
    #[must_use]
    pub fn commands(&self) -> usize {
        self.deletes.commands.saturating_add(self.restores.commands)
    }
}

fn merge(total: &mut ExecuteSummary, part: ExecuteSummary) {
    total.commands = total.commands.saturating_add(part.commands);
    total.matched = total.matched.saturating_add(part.matched);
    total.modified = total.modified.saturating_add(part.modified);
}

impl Operation {
    fn events(self) -> (Events, Events) {
        match self {
            Operation::Delete => (Events::PreSoftDelete, Events::PostSoftDelete),
            Operation::Restore => (Events::PreSoftDeleteRestore, Events::PostSoftDeleteRestore),
        }
    }

    fn opposite(self) -> Operation {
        match self {
            Operation::Delete => Operation::Restore,
            Operation::Restore => Operation::Delete,
        }
    }
}

pub struct UnitOfWork {
    registry: Arc<DocumentRegistry>,
    configuration: Configuration,
    event_manager: EventManager,
    identities: IdentityMap,
    document_deletes: BTreeMap<Oid, DocumentRef>,
    document_restores: BTreeMap<Oid, DocumentRef>,
    criteria: PendingCriteria,
    persisters: HashMap<String, CollectionPersister>,
}

impl UnitOfWork {
    pub fn new(
        registry: Arc<DocumentRegistry>,
        configuration: Configuration,
        event_manager: EventManager,
    ) -> Self {
        Self {
            registry,
            configuration,
            event_manager,
            identities: IdentityMap::new(),
            document_deletes: BTreeMap::new(),
            document_restores: BTreeMap::new(),
            criteria: PendingCriteria::default(),
            persisters: HashMap::new(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<DocumentRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn configuration_mut(&mut self) -> &mut Configuration {
        &mut self.configuration
    }

    #[must_use]
    pub fn event_manager(&self) -> &EventManager {
        &self.event_manager
    }

    pub fn event_manager_mut(&mut self) -> &mut EventManager {
        &mut self.event_manager
    }

    /// Schedule `document` to be soft deleted on the next commit.
    pub fn delete(&mut self, document: &DocumentRef) -> Result<(), SoftDeleteError> {
        self.schedule(Operation::Delete, document)
    }

    /// Schedule `document` to have its marker cleared on the next commit.
    pub fn restore(&mut self, document: &DocumentRef) -> Result<(), SoftDeleteError> {
        self.schedule(Operation::Restore, document)
    }

    /// Soft delete every live `name` document matching `criteria` on the
    /// next commit, setting `extra_fields` with the marker.
    pub fn delete_by_criteria(
        &mut self,
        name: &str,
        criteria: Criteria,
        extra_fields: Criteria,
    ) -> Result<(), SoftDeleteError> {
        self.registry.class_metadata(name)?;
        debug!("Scheduled delete of {} by criteria {:?}", name, criteria);
        self.criteria.push_delete(name, criteria, extra_fields);
        Ok(())
    }

    /// Restore every deleted `name` document matching `criteria` and
    /// carrying `extra_fields` on the next commit.
    pub fn restore_by_criteria(
        &mut self,
        name: &str,
        criteria: Criteria,
        extra_fields: Criteria,
    ) -> Result<(), SoftDeleteError> {
        self.registry.class_metadata(name)?;
        debug!("Scheduled restore of {} by criteria {:?}", name, criteria);
        self.criteria.push_restore(name, criteria, extra_fields);
        Ok(())
    }

    fn schedule(&mut self, operation: Operation, document: &DocumentRef) -> Result<(), SoftDeleteError> {
        let (name, is_deleted) = {
            let guard = document.read()?;
            (guard.document_name().to_string(), guard.is_deleted())
        };
        self.registry.class_metadata(&name)?;
        let strict = self.configuration.scheduling_policy() == SchedulingPolicy::Strict;
        let oid = self.identities.oid(document);

        if self.pending(operation).contains_key(&oid) {
            if strict {
                return Err(SoftDeleteError::DuplicateScheduling {
                    operation,
                    document: document.describe(),
                });
            }
            debug!("{} already scheduled for {}", document.describe(), operation);
            return Ok(());
        }

        let at_target = match operation {
            Operation::Delete => is_deleted,
            Operation::Restore => !is_deleted,
        };
        let evicted = self.pending_mut(operation.opposite()).remove(&oid).is_some();
        if evicted {
            for persister in self.persisters.values_mut() {
                persister.unqueue(oid);
            }
            if at_target {
                debug!(
                    "{} of {} cancels its pending {}",
                    operation,
                    document.describe(),
                    operation.opposite()
                );
                return Ok(());
            }
        } else if strict && at_target {
            let reason = match operation {
                Operation::Delete => "document is already deleted",
                Operation::Restore => "document is not deleted",
            };
            return Err(SoftDeleteError::InvalidState {
                operation,
                document: document.describe(),
                reason: reason.to_string(),
            });
        }

        self.pending_mut(operation).insert(oid, document.clone());
        debug!("Scheduled {} of {} ({})", operation, document.describe(), oid);
        Ok(())
    }

    fn pending(&self, operation: Operation) -> &BTreeMap<Oid, DocumentRef> {
        match operation {
            Operation::Delete => &self.document_deletes,
            Operation::Restore => &self.document_restores,
        }
    }

    fn pending_mut(&mut self, operation: Operation) -> &mut BTreeMap<Oid, DocumentRef> {
        match operation {
            Operation::Delete => &mut self.document_deletes,
            Operation::Restore => &mut self.document_restores,
        }
    }

    #[must_use]
    pub fn is_scheduled_for_delete(&self, document: &DocumentRef) -> bool {
        self.identities
            .lookup(document)
            .is_some_and(|oid| self.document_deletes.contains_key(&oid))
    }

    #[must_use]
    pub fn is_scheduled_for_restore(&self, document: &DocumentRef) -> bool {
        self.identities
            .lookup(document)
            .is_some_and(|oid| self.document_restores.contains_key(&oid))
    }

    /// Documents pending deletion, in identity-token order.
    #[must_use]
    pub fn document_deletes(&self) -> Vec<DocumentRef> {
        self.document_deletes.values().cloned().collect()
    }

    /// Documents pending restoration, in identity-token order.
    #[must_use]
    pub fn document_restores(&self) -> Vec<DocumentRef> {
        self.document_restores.values().cloned().collect()
    }

    #[must_use]
    pub fn pending_criteria(&self) -> &PendingCriteria {
        &self.criteria
    }

    #[must_use]
    pub fn has_pending_work(&self) -> bool {
        !self.document_deletes.is_empty()
            || !self.document_restores.is_empty()
            || !self.criteria.is_empty()
            || self
                .persisters
                .values()
                .any(|p| p.has_queued_deletes() || p.has_queued_restores())
    }

    /// The persister for `name`, created on first use and kept for the
    /// lifetime of this unit of work.
    pub fn document_persister(&mut self, name: &str) -> Result<&mut CollectionPersister, SoftDeleteError> {
        Self::persister_for(&mut self.persisters, &self.registry, name)
    }

    fn persister_for<'p>(
        persisters: &'p mut HashMap<String, CollectionPersister>,
        registry: &DocumentRegistry,
        name: &str,
    ) -> Result<&'p mut CollectionPersister, SoftDeleteError> {
        if !persisters.contains_key(name) {
            let class = registry.class_metadata(name)?;
            debug!("Creating persister for {}", name);
            persisters.insert(name.to_string(), CollectionPersister::new(class));
        }
        persisters
            .get_mut(name)
            .ok_or_else(|| SoftDeleteError::UnknownDocumentType(name.to_string()))
    }

    /// Drop all pending work without writing anything.
    pub fn clear(&mut self) {
        self.document_deletes.clear();
        self.document_restores.clear();
        self.criteria.clear();
        for persister in self.persisters.values_mut() {
            persister.reset();
        }
        self.identities.prune();
        debug!("Cleared unit of work");
    }

    /// Write all pending deletes, then all pending restores.
    pub async fn commit(&mut self) -> Result<CommitReport, SoftDeleteError> {
        self.commit_with(None).await
    }

    /// Like [`commit`](Self::commit), using `deleted_at` as the marker value.
    pub async fn commit_at(&mut self, deleted_at: DateTime<Utc>) -> Result<CommitReport, SoftDeleteError> {
        self.commit_with(Some(deleted_at)).await
    }

    async fn commit_with(&mut self, deleted_at: Option<DateTime<Utc>>) -> Result<CommitReport, SoftDeleteError> {
        if !self.has_pending_work() {
            debug!("Nothing to commit");
            return Ok(CommitReport::default());
        }

        let deleted_at = deleted_at.unwrap_or_else(Utc::now);
        let mut report = CommitReport::default();
        let mut pass: u32 = 0;
        // Listeners may schedule criteria on either side while a pass runs;
        // those go out in a follow-up pass. Criteria raise no events, so the
        // second pass cannot schedule more.
        loop {
            pass = pass.saturating_add(1);
            merge(&mut report.deletes, self.execute(Operation::Delete, deleted_at).await?);
            merge(&mut report.restores, self.execute(Operation::Restore, deleted_at).await?);
            if !self.has_pending_work() {
                break;
            }
            debug!("Pass {} left listener-scheduled criteria; running another pass", pass);
        }
        self.identities.prune();
        info!(
            "Committed {} delete command(s) ({} modified) and {} restore command(s) ({} modified)",
            report.deletes.commands,
            report.deletes.modified,
            report.restores.commands,
            report.restores.modified
        );
        Ok(report)
    }

    async fn execute(
        &mut self,
        operation: Operation,
        deleted_at: DateTime<Utc>,
    ) -> Result<ExecuteSummary, SoftDeleteError> {
        let (pre_event, post_event) = operation.events();
        let pending: Vec<(Oid, DocumentRef)> = self
            .pending(operation)
            .iter()
            .map(|(oid, document)| (*oid, document.clone()))
            .collect();

        for (_, document) in &pending {
            self.dispatch(pre_event, document)?;
        }

        let mut by_type: BTreeMap<String, Vec<(Oid, DocumentRef)>> = BTreeMap::new();
        for (oid, document) in pending {
            let name = document.read()?.document_name().to_string();
            by_type.entry(name).or_default().push((oid, document));
        }

        let names = self.stage(operation, &by_type)?;

        let mut summary = ExecuteSummary::default();
        for name in &names {
            let persister = Self::persister_for(&mut self.persisters, &self.registry, name)?;
            let result = match operation {
                Operation::Delete => {
                    persister
                        .execute_deletes(&self.configuration, Some(deleted_at))
                        .await?
                }
                Operation::Restore => persister.execute_restores(&self.configuration).await?,
            };
            merge(&mut summary, result);

            let Some(documents) = by_type.get(name) else {
                continue;
            };
            for (oid, document) in documents {
                {
                    let mut guard = document.write()?;
                    match operation {
                        Operation::Delete if !guard.is_deleted() => {
                            guard.set_deleted_at(Some(deleted_at));
                        }
                        Operation::Delete => {}
                        Operation::Restore => guard.set_deleted_at(None),
                    }
                }
                self.pending_mut(operation).remove(oid);
            }
            for (_, document) in documents {
                self.dispatch(post_event, document)?;
            }
        }
        Ok(summary)
    }

    /// Move the pending criteria and documents of `operation` onto their
    /// persisters. Returns every type with queued work, sorted. Persisters
    /// are resolved before anything moves, so an unknown type leaves the
    /// pending state untouched.
    fn stage(
        &mut self,
        operation: Operation,
        by_type: &BTreeMap<String, Vec<(Oid, DocumentRef)>>,
    ) -> Result<BTreeSet<String>, SoftDeleteError> {
        let criteria = match operation {
            Operation::Delete => &self.criteria.deletes,
            Operation::Restore => &self.criteria.restores,
        };
        let mut names: BTreeSet<String> = by_type.keys().cloned().collect();
        names.extend(criteria.keys().cloned());
        names.extend(
            self.persisters
                .iter()
                .filter(|(_, p)| match operation {
                    Operation::Delete => p.has_queued_deletes(),
                    Operation::Restore => p.has_queued_restores(),
                })
                .map(|(name, _)| name.clone()),
        );
        for name in &names {
            Self::persister_for(&mut self.persisters, &self.registry, name)?;
        }

        let criteria = match operation {
            Operation::Delete => mem::take(&mut self.criteria.deletes),
            Operation::Restore => mem::take(&mut self.criteria.restores),
        };
        for (name, operations) in criteria {
            let persister = Self::persister_for(&mut self.persisters, &self.registry, &name)?;
            for queued in operations {
                match operation {
                    Operation::Delete => persister.queue_delete_by_criteria(queued),
                    Operation::Restore => persister.queue_restore_by_criteria(queued),
                }
            }
        }
        for (name, documents) in by_type {
            let persister = Self::persister_for(&mut self.persisters, &self.registry, name)?;
            for (oid, document) in documents {
                match operation {
                    Operation::Delete => persister.queue_delete(*oid, document.clone()),
                    Operation::Restore => persister.queue_restore(*oid, document.clone()),
                }
            }
        }
        Ok(names)
    }

    fn dispatch(&mut self, event: Events, document: &DocumentRef) -> Result<(), SoftDeleteError> {
        if !self.event_manager.has_listeners(event) {
            return Ok(());
        }
        let mut args = LifecycleEventArgs::new(document, &self.registry, &mut self.criteria);
        self.event_manager.dispatch(event, &mut args)
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("configuration", &self.configuration)
            .field("document_deletes", &self.document_deletes.len())
            .field("document_restores", &self.document_restores.len())
            .field("criteria", &self.criteria)
            .field("persisters", &self.persisters.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "unit_of_work_tests.rs"]
mod tests;
