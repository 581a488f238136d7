//! A single path in the store and its branches.

use crate::branch::{Branch, COMMITTED};
use crate::error::{StoreError, StoreResult};
use crate::revision::Revision;
use crate::Model;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

/// The committed and proposed heads of a path, captured for a merge.
pub struct Merge<T> {
    pub old: Option<Revision<T>>,
    pub new: Option<Revision<T>>,
}

impl<T> Merge<T> {
    /// True when the merge would not change the committed value.
    pub fn is_noop(&self) -> bool {
        match (&self.old, &self.new) {
            (None, None) => true,
            (Some(old), Some(new)) => old.same_content(new),
            _ => false,
        }
    }
}

/// A versioned path.
///
/// The committed branch always exists; every other branch belongs to an
/// open transaction and must be merged or discarded. Branch state sits
/// behind a synchronous lock held only for the duration of a lookup or
/// swap, so callback handlers may read the node while a commit is in
/// flight. Commits serialise on a separate async lock.
pub struct Node<T> {
    path: String,
    branches: RwLock<HashMap<String, Branch<T>>>,
    commit_lock: Mutex<()>,
}

impl<T: Model> Node<T> {
    pub fn new(path: impl Into<String>, committed: Option<Revision<T>>) -> Self {
        let mut branches = HashMap::new();
        branches.insert(COMMITTED.to_string(), Branch::committed(committed));
        Self {
            path: path.into(),
            branches: RwLock::new(branches),
            commit_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The committed head.
    pub fn committed(&self) -> Option<Revision<T>> {
        self.branches
            .read()
            .get(COMMITTED)
            .and_then(|b| b.latest().cloned())
    }

    /// The head visible to `txid`: its own branch when open, else committed.
    pub fn get(&self, txid: &str) -> Option<Revision<T>> {
        let branches = self.branches.read();
        if !txid.is_empty() {
            if let Some(branch) = branches.get(txid) {
                return branch.latest().cloned();
            }
        }
        branches.get(COMMITTED).and_then(|b| b.latest().cloned())
    }

    /// Transaction ids with an open branch on this node.
    pub fn open_transactions(&self) -> Vec<String> {
        self.branches
            .read()
            .keys()
            .filter(|txid| !txid.is_empty())
            .cloned()
            .collect()
    }

    /// Appends a new head to the branch of `txid`, opening it if needed.
    ///
    /// `None` stages a removal. No I/O happens here.
    pub fn stage(&self, txid: &str, value: Option<T>) -> StoreResult<Option<Revision<T>>> {
        if txid.is_empty() {
            return Err(StoreError::transaction_not_found(&self.path, txid));
        }

        let mut branches = self.branches.write();
        if !branches.contains_key(txid) {
            let origin = branches.get(COMMITTED).and_then(|b| b.latest().cloned());
            branches.insert(txid.to_string(), Branch::open(txid, origin));
        }
        let branch = branches
            .get_mut(txid)
            .ok_or_else(|| StoreError::transaction_not_found(&self.path, txid))?;

        let revision = match value {
            Some(value) => {
                let parent = branch.latest().or(branch.origin());
                Some(Revision::new(self.path.clone(), value, parent)?)
            }
            None => None,
        };
        branch.push(revision.clone());

        log::debug!(
            "Staged {} on {} (tx {})",
            revision.as_ref().map(|r| r.hash()).unwrap_or("removal"),
            self.path,
            txid
        );
        Ok(revision)
    }

    /// Waits for exclusive commit rights on this node.
    pub(crate) async fn lock_commits(&self) -> MutexGuard<'_, ()> {
        self.commit_lock.lock().await
    }

    /// Captures the heads to merge, rejecting stale transactions.
    ///
    /// Must be called with the commit lock held.
    pub(crate) fn prepare_merge(&self, txid: &str) -> StoreResult<Merge<T>> {
        let branches = self.branches.read();
        let branch = branches
            .get(txid)
            .filter(|b| !b.is_committed())
            .ok_or_else(|| StoreError::transaction_not_found(&self.path, txid))?;
        let committed = branches.get(COMMITTED).and_then(|b| b.latest().cloned());

        let committed_hash = committed.as_ref().map(|r| r.hash());
        if branch.origin_hash() != committed_hash {
            log::warn!(
                "Rejecting merge of tx {} on {}: origin {:?} is no longer committed head {:?}",
                txid,
                self.path,
                branch.origin_hash(),
                committed_hash
            );
            return Err(StoreError::conflict(&self.path, txid));
        }

        Ok(Merge {
            old: committed,
            new: branch.latest().cloned(),
        })
    }

    /// Advances the committed line and closes the transaction branch.
    ///
    /// Must be called with the commit lock held, after [`prepare_merge`].
    ///
    /// [`prepare_merge`]: Node::prepare_merge
    pub(crate) fn complete_merge(&self, txid: &str, latest: Option<Revision<T>>) {
        let mut branches = self.branches.write();
        branches.remove(txid);
        if let Some(committed) = branches.get_mut(COMMITTED) {
            committed.advance(latest);
        }
    }

    /// Replaces the committed head without a merge, used when reloading
    /// from the backing store. Open transaction branches are left alone.
    pub(crate) fn replace_committed(&self, latest: Option<Revision<T>>) {
        let mut branches = self.branches.write();
        match branches.get_mut(COMMITTED) {
            Some(committed) => committed.advance(latest),
            None => {
                branches.insert(COMMITTED.to_string(), Branch::committed(latest));
            }
        }
    }

    /// Drops the branch of `txid`. Returns false if none was open.
    pub fn discard(&self, txid: &str) -> bool {
        if txid.is_empty() {
            return false;
        }
        self.branches.write().remove(txid).is_some()
    }

    /// Drops transaction branches opened more than `max_age` ago.
    pub fn discard_stale(&self, max_age: Duration) -> usize {
        let mut branches = self.branches.write();
        let before = branches.len();
        branches.retain(|txid, b| txid.is_empty() || b.age() < max_age);
        before - branches.len()
    }

    /// True when nothing is committed and no transaction is open.
    pub fn is_vacant(&self) -> bool {
        let branches = self.branches.read();
        branches.len() == 1
            && branches
                .get(COMMITTED)
                .map(|b| b.latest().is_none())
                .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn node_with(value: u32) -> Node<u32> {
        let rev = Revision::new("/counters/a", value, None).unwrap();
        Node::new("/counters/a", Some(rev))
    }

    #[test]
    fn test_branch_isolation() {
        let node = node_with(1);
        node.stage("tx-1", Some(2)).unwrap();

        assert_eq!(node.get("tx-1").map(|r| *r.data()), Some(2));
        assert_eq!(node.get("").map(|r| *r.data()), Some(1));
        assert_eq!(node.get("tx-other").map(|r| *r.data()), Some(1));
    }

    #[test]
    fn test_stage_requires_txid() {
        let node = node_with(1);
        assert!(matches!(
            node.stage("", Some(2)),
            Err(StoreError::TransactionNotFound { .. })
        ));
    }

    #[test]
    fn test_stale_origin_conflicts() {
        let node = node_with(1);
        node.stage("tx-1", Some(2)).unwrap();
        node.stage("tx-2", Some(3)).unwrap();

        let merge = node.prepare_merge("tx-1").unwrap();
        node.complete_merge("tx-1", merge.new);
        assert_eq!(node.committed().map(|r| *r.data()), Some(2));

        assert!(matches!(
            node.prepare_merge("tx-2"),
            Err(StoreError::Conflict { .. })
        ));
    }

    #[test]
    fn test_noop_merge_detection() {
        let node = node_with(1);
        node.stage("tx-1", Some(1)).unwrap();
        assert!(node.prepare_merge("tx-1").unwrap().is_noop());
    }

    #[test]
    fn test_discard_and_vacancy() {
        let node: Node<u32> = Node::new("/counters/b", None);
        assert!(node.is_vacant());

        node.stage("tx-1", Some(5)).unwrap();
        assert!(!node.is_vacant());
        assert!(node.discard("tx-1"));
        assert!(!node.discard("tx-1"));
        assert!(node.is_vacant());
    }

    #[test]
    fn test_discard_stale() {
        let node = node_with(1);
        node.stage("tx-1", Some(2)).unwrap();
        assert_eq!(node.discard_stale(Duration::from_secs(3600)), 0);
        assert_eq!(node.discard_stale(Duration::ZERO), 1);
        assert!(node.open_transactions().is_empty());
    }
}
