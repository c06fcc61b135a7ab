use chrono::{DateTime, Utc};
use serde_json::Value;

use super::SoftDeleteable;
use crate::store::{Record, ID_FIELD};

/// A document held as its raw stored fields.
///
/// Useful when no typed entity exists for a collection, as in the command
/// line tool, which loads records and schedules them directly.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    name: String,
    fields: Record,
    deleted_at: Option<DateTime<Utc>>,
}

impl StoredDocument {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Record::new(),
            deleted_at: None,
        }
    }

    #[must_use]
    pub fn with_id(name: impl Into<String>, id: Value) -> Self {
        let mut document = Self::new(name);
        document.fields.insert(ID_FIELD.to_string(), id);
        document
    }

    /// Build from a stored record, reading the marker from `deleted_field`.
    /// A marker that is not an RFC 3339 string is ignored.
    #[must_use]
    pub fn from_record(name: impl Into<String>, fields: Record, deleted_field: &str) -> Self {
        let deleted_at = fields
            .get(deleted_field)
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc));
        Self {
            name: name.into(),
            fields,
            deleted_at,
        }
    }

    #[must_use]
    pub fn fields(&self) -> &Record {
        &self.fields
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

impl SoftDeleteable for StoredDocument {
    fn document_name(&self) -> &str {
        &self.name
    }

    fn identifier(&self) -> Option<Value> {
        self.fields.get(ID_FIELD).cloned()
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    fn set_deleted_at(&mut self, deleted_at: Option<DateTime<Utc>>) {
        self.deleted_at = deleted_at;
    }
}
