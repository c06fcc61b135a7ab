use std::collections::BTreeMap;

use crate::persister::CriteriaOperation;
use crate::query::Criteria;

/// Criteria operations waiting for the next commit, per document type, in
/// the order they were scheduled.
#[derive(Debug, Default, Clone)]
pub struct PendingCriteria {
    pub(super) deletes: BTreeMap<String, Vec<CriteriaOperation>>,
    pub(super) restores: BTreeMap<String, Vec<CriteriaOperation>>,
}

impl PendingCriteria {
    pub(crate) fn push_delete(&mut self, name: &str, criteria: Criteria, extra_fields: Criteria) {
        self.deletes
            .entry(name.to_string())
            .or_default()
            .push(CriteriaOperation::new(criteria, extra_fields));
    }

    pub(crate) fn push_restore(&mut self, name: &str, criteria: Criteria, extra_fields: Criteria) {
        self.restores
            .entry(name.to_string())
            .or_default()
            .push(CriteriaOperation::new(criteria, extra_fields));
    }

    #[must_use]
    pub fn deletes(&self) -> &BTreeMap<String, Vec<CriteriaOperation>> {
        &self.deletes
    }

    #[must_use]
    pub fn restores(&self) -> &BTreeMap<String, Vec<CriteriaOperation>> {
        &self.restores
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.restores.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.deletes.clear();
        self.restores.clear();
    }
}
