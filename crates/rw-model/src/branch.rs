//! Per-transaction lines of revisions of a single node.

use crate::revision::{hash_of, Revision};
use std::collections::HashMap;
use std::time::Instant;

/// Transaction id of the committed line.
pub const COMMITTED: &str = "";

/// A line of revisions of one node, owned by one transaction.
///
/// `origin` is the committed revision the branch was opened on and
/// `latest` is its current head. `None` means "absent": an origin of `None`
/// records that the path did not exist when the branch opened and a latest
/// of `None` records a staged removal.
pub struct Branch<T> {
    txid: String,
    origin: Option<Revision<T>>,
    latest: Option<Revision<T>>,
    revisions: HashMap<String, Revision<T>>,
    opened_at: Instant,
}

impl<T> Branch<T> {
    /// Creates the committed branch with `latest` as its only revision.
    pub fn committed(latest: Option<Revision<T>>) -> Self {
        let mut branch = Self::open(COMMITTED, latest);
        branch.rebase();
        branch
    }

    /// Opens a branch for `txid` on top of `origin`.
    pub fn open(txid: impl Into<String>, origin: Option<Revision<T>>) -> Self {
        let mut revisions = HashMap::new();
        if let Some(rev) = &origin {
            revisions.insert(rev.hash().to_string(), rev.clone());
        }
        Self {
            txid: txid.into(),
            latest: origin.clone(),
            origin,
            revisions,
            opened_at: Instant::now(),
        }
    }

    pub fn txid(&self) -> &str {
        &self.txid
    }

    pub fn is_committed(&self) -> bool {
        self.txid == COMMITTED
    }

    pub fn origin(&self) -> Option<&Revision<T>> {
        self.origin.as_ref()
    }

    pub fn latest(&self) -> Option<&Revision<T>> {
        self.latest.as_ref()
    }

    pub fn origin_hash(&self) -> Option<&str> {
        hash_of(self.origin.as_ref())
    }

    pub fn latest_hash(&self) -> Option<&str> {
        hash_of(self.latest.as_ref())
    }

    /// Number of distinct revisions retained by the branch.
    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.revisions.contains_key(hash)
    }

    pub fn age(&self) -> std::time::Duration {
        self.opened_at.elapsed()
    }

    /// Appends a new head. `None` stages a removal.
    pub fn push(&mut self, revision: Option<Revision<T>>) {
        if let Some(rev) = &revision {
            self.revisions
                .entry(rev.hash().to_string())
                .or_insert_with(|| rev.clone());
        }
        self.latest = revision;
    }

    /// Advances the committed line to `latest` and drops older revisions.
    pub fn advance(&mut self, latest: Option<Revision<T>>) {
        self.latest = latest;
        self.rebase();
    }

    fn rebase(&mut self) {
        self.origin = self.latest.clone();
        self.revisions.clear();
        if let Some(rev) = &self.latest {
            self.revisions.insert(rev.hash().to_string(), rev.clone());
        }
    }

    /// True when the head differs from the origin.
    pub fn has_changes(&self) -> bool {
        self.origin_hash() != self.latest_hash()
    }
}
