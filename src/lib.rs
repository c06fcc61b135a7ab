// Allow panic/unwrap/expect in tests (denied globally via Cargo.toml lints)
#![cfg_attr(
    test,
    allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        clippy::arithmetic_side_effects,
        clippy::indexing_slicing
    )
)]

//! Soft deletes for document collections.
//!
//! Documents are never removed: deleting one sets a timestamp marker field,
//! restoring it unsets the field. Deletes and restores are scheduled on a
//! [`SoftDeleteManager`], batched per document type, and written as bulk
//! update commands when the manager is flushed. Lifecycle listeners can
//! cascade a delete or restore to related documents by criteria.

pub mod config;
pub mod document;
pub mod error;
pub mod events;
pub mod logging;
pub mod manager;
pub mod persister;
pub mod query;
pub mod store;
pub mod unit_of_work;

pub use config::{ConfigError, Configuration, SchedulingPolicy, DEFAULT_DELETED_FIELD_NAME};
pub use document::{
    ClassMetadata, DocumentRef, DocumentRegistry, IdentityMap, Oid, QueryPreparer, SoftDeleteable,
    StoredDocument,
};
pub use error::{Operation, SoftDeleteError};
pub use events::{EventManager, EventSubscriber, Events, LifecycleEventArgs};
pub use manager::SoftDeleteManager;
pub use persister::{CollectionPersister, CriteriaOperation, ExecuteSummary};
pub use query::{Criteria, FieldBuilder, QueryBuilder};
pub use store::{
    Collection, CollectionError, JsonFileCollection, MemoryCollection, Record, UpdateCommand,
    UpdateOptions, WriteResult, ID_FIELD,
};
pub use unit_of_work::{CommitReport, PendingCriteria, UnitOfWork};
