//! Replace-set reconciliation for association collections.
//!
//! A stored association (issue ↔ sprint, fix version, label, product) must
//! end up exactly equal to the freshly fetched set. [`diff_sets`] computes
//! the minimal change: links to delete, links to insert, and links left
//! untouched.

use std::collections::BTreeSet;

/// Difference between a stored set and the desired set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDiff<K> {
    /// In desired but not stored.
    pub added: Vec<K>,
    /// Stored but no longer desired.
    pub removed: Vec<K>,
    /// Present in both.
    pub unchanged: Vec<K>,
}

impl<K> SetDiff<K> {
    /// Whether applying the diff changes anything.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// `"<name> +added -removed"` for the audit trail, or `None` for a no-op.
    #[must_use]
    pub fn summary(&self, name: &str) -> Option<String> {
        (!self.is_noop()).then(|| format!("{name} +{} -{}", self.added.len(), self.removed.len()))
    }
}

impl<K> Default for SetDiff<K> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            removed: Vec::new(),
            unchanged: Vec::new(),
        }
    }
}

/// Diff `current` against `desired`. Duplicates collapse; output is sorted.
pub fn diff_sets<K, C, D>(current: C, desired: D) -> SetDiff<K>
where
    K: Ord + Clone,
    C: IntoIterator<Item = K>,
    D: IntoIterator<Item = K>,
{
    let current: BTreeSet<K> = current.into_iter().collect();
    let desired: BTreeSet<K> = desired.into_iter().collect();

    SetDiff {
        added: desired.difference(&current).cloned().collect(),
        removed: current.difference(&desired).cloned().collect(),
        unchanged: current.intersection(&desired).cloned().collect(),
    }
}
