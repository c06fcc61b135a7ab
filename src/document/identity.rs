use std::collections::HashMap;
use std::fmt;
use std::sync::{RwLock, Weak};

use super::{DocumentRef, SoftDeleteable};

/// Per-instance identity token issued by an [`IdentityMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid(u64);

impl Oid {
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Assigns monotonically increasing tokens to live document handles.
///
/// Entries hold a weak reference; an address whose document has been
/// dropped is treated as new, so a reused allocation never inherits a dead
/// document's token.
#[derive(Default)]
pub struct IdentityMap {
    next: u64,
    entries: HashMap<usize, (Weak<RwLock<dyn SoftDeleteable>>, Oid)>,
}

impl IdentityMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for `document`, issuing a fresh one on first sight.
    pub fn oid(&mut self, document: &DocumentRef) -> Oid {
        if let Some(oid) = self.lookup(document) {
            return oid;
        }
        self.next = self.next.saturating_add(1);
        let oid = Oid(self.next);
        self.entries
            .insert(document.address(), (document.downgrade(), oid));
        oid
    }

    /// Token already issued for `document`, if it is still live.
    #[must_use]
    pub fn lookup(&self, document: &DocumentRef) -> Option<Oid> {
        self.entries
            .get(&document.address())
            .filter(|(weak, _)| weak.strong_count() > 0)
            .map(|(_, oid)| *oid)
    }

    /// Forget entries whose documents have been dropped.
    pub fn prune(&mut self) {
        self.entries.retain(|_, (weak, _)| weak.strong_count() > 0);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for IdentityMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityMap")
            .field("next", &self.next)
            .field("entries", &self.entries.len())
            .finish()
    }
}
