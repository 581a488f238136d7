//! Flow and group table reconciliation.

use rw_types::Keyed;
use std::collections::{BTreeMap, BTreeSet};

/// The difference between a table and the entries a caller wants in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDelta<E> {
    /// New entries and new versions of changed entries.
    pub to_add: Vec<E>,
    /// Existing versions replaced by an entry in `to_add`.
    pub to_delete: Vec<E>,
    /// The table once the delta is applied.
    pub in_force: Vec<E>,
}

impl<E> TableDelta<E> {
    /// True when applying the delta would not change the table.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_delete.is_empty()
    }
}

impl<E> Default for TableDelta<E> {
    fn default() -> Self {
        Self {
            to_add: Vec::new(),
            to_delete: Vec::new(),
            in_force: Vec::new(),
        }
    }
}

/// Computes the delta that brings `existing` up to date with `desired`.
///
/// Entries are paired by key and compared by content. Existing entries
/// that `desired` does not mention are kept: callers pass partial updates,
/// and removals go through explicit delete requests.
pub fn reconcile<E>(desired: &[E], existing: &[E]) -> TableDelta<E>
where
    E: Keyed + Clone + PartialEq,
{
    let current: BTreeMap<E::Key, &E> = existing.iter().map(|e| (e.key(), e)).collect();
    let mut delta = TableDelta::default();
    let mut superseded = BTreeSet::new();

    for entry in desired {
        let key = entry.key();
        match current.get(&key) {
            None => delta.to_add.push(entry.clone()),
            Some(old) if *old != entry => {
                delta.to_add.push(entry.clone());
                delta.to_delete.push((*old).clone());
                superseded.insert(key);
            }
            Some(_) => {}
        }
    }

    delta.in_force = existing
        .iter()
        .filter(|e| !superseded.contains(&e.key()))
        .chain(delta.to_add.iter())
        .cloned()
        .collect();
    delta
}
