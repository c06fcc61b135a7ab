//! Filter construction helpers and a small query builder.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

use crate::store::{Collection, CollectionError, Record, ID_FIELD};

/// A filter document.
pub type Criteria = Record;

/// `{field: {$exists: exists}}`
#[must_use]
pub fn exists(field: &str, exists: bool) -> Criteria {
    let mut criteria = Criteria::new();
    criteria.insert(field.to_string(), json!({ "$exists": exists }));
    criteria
}

/// `{_id: {$in: ids}}`
#[must_use]
pub fn id_in(ids: Vec<Value>) -> Criteria {
    let mut criteria = Criteria::new();
    criteria.insert(ID_FIELD.to_string(), json!({ "$in": ids }));
    criteria
}

/// Conjunction of two filters. Disjoint filters are merged into one
/// document; overlapping ones are wrapped in `$and` so neither side's
/// condition on a shared field is lost.
#[must_use]
pub fn and(left: Criteria, right: Criteria) -> Criteria {
    if left.is_empty() {
        return right;
    }
    if right.is_empty() {
        return left;
    }
    if left.keys().any(|k| right.contains_key(k)) {
        let mut criteria = Criteria::new();
        criteria.insert(
            "$and".to_string(),
            Value::Array(vec![Value::Object(left), Value::Object(right)]),
        );
        return criteria;
    }
    let mut merged = left;
    merged.extend(right);
    merged
}

/// Stored representation of a deletion marker.
#[must_use]
pub fn marker_value(deleted_at: DateTime<Utc>) -> Value {
    Value::String(deleted_at.to_rfc3339())
}

/// Accumulates a filter and runs it against one collection.
#[derive(Clone)]
pub struct QueryBuilder {
    collection: Arc<dyn Collection>,
    filter: Criteria,
}

impl QueryBuilder {
    #[must_use]
    pub fn new(collection: Arc<dyn Collection>) -> Self {
        Self {
            collection,
            filter: Criteria::new(),
        }
    }

    #[must_use]
    pub fn field(self, name: impl Into<String>) -> FieldBuilder {
        FieldBuilder {
            query: self,
            name: name.into(),
        }
    }

    /// Add every clause of `criteria`.
    #[must_use]
    pub fn matching(mut self, criteria: Criteria) -> Self {
        let current = std::mem::take(&mut self.filter);
        self.filter = and(current, criteria);
        self
    }

    #[must_use]
    pub fn filter(&self) -> &Criteria {
        &self.filter
    }

    pub async fn execute(&self) -> Result<Vec<Record>, CollectionError> {
        self.collection.find(&self.filter).await
    }

    pub async fn count(&self) -> Result<u64, CollectionError> {
        self.collection.count(&self.filter).await
    }
}

impl fmt::Debug for QueryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("collection", &self.collection.name())
            .field("filter", &self.filter)
            .finish()
    }
}

/// A pending condition on one field of a [`QueryBuilder`].
#[derive(Debug)]
pub struct FieldBuilder {
    query: QueryBuilder,
    name: String,
}

impl FieldBuilder {
    #[must_use]
    pub fn exists(self, present: bool) -> QueryBuilder {
        let criteria = exists(&self.name, present);
        self.query.matching(criteria)
    }

    #[must_use]
    pub fn equals(self, value: impl Into<Value>) -> QueryBuilder {
        let mut criteria = Criteria::new();
        criteria.insert(self.name, value.into());
        self.query.matching(criteria)
    }
}
