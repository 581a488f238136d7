//! Named transactions spanning one or more paths of a root.

use crate::error::StoreResult;
use crate::revision::Revision;
use crate::root::{Expect, Root};
use crate::Model;
use parking_lot::Mutex;
use std::sync::Arc;

/// A named branch set on one root.
///
/// Writes are staged on the transaction's branches and are invisible to
/// other readers until [`commit`](Transaction::commit). Commit merges the
/// touched paths one by one in the order they were first written; there
/// is no atomicity across paths. Dropping an unfinished transaction
/// discards its branches.
pub struct Transaction<T: Model> {
    txid: String,
    root: Arc<Root<T>>,
    touched: Mutex<Vec<String>>,
}

impl<T: Model> Transaction<T> {
    pub(crate) fn new(root: Arc<Root<T>>) -> Self {
        let txid = uuid::Uuid::new_v4().to_string();
        log::debug!("Opened transaction {} on {}", txid, root.prefix());
        Self {
            txid,
            root,
            touched: Mutex::new(Vec::new()),
        }
    }

    pub fn txid(&self) -> &str {
        &self.txid
    }

    fn touch(&self, path: &str) {
        let mut touched = self.touched.lock();
        if !touched.iter().any(|p| p == path) {
            touched.push(path.to_string());
        }
    }

    /// Reads `path` as this transaction sees it.
    pub fn get(&self, path: &str) -> StoreResult<Arc<T>> {
        self.root.get(path, &self.txid)
    }

    pub fn add(&self, path: &str, value: T) -> StoreResult<Option<Revision<T>>> {
        let staged = self.root.stage_checked(path, &self.txid, Some(value), Expect::Absent)?;
        self.touch(path);
        Ok(staged)
    }

    pub fn update(&self, path: &str, value: T) -> StoreResult<Option<Revision<T>>> {
        let staged = self.root.stage_checked(path, &self.txid, Some(value), Expect::Present)?;
        self.touch(path);
        Ok(staged)
    }

    pub fn remove(&self, path: &str) -> StoreResult<()> {
        self.root.stage_checked(path, &self.txid, None, Expect::Present)?;
        self.touch(path);
        Ok(())
    }

    /// Paths written so far, in first-write order.
    pub fn touched(&self) -> Vec<String> {
        self.touched.lock().clone()
    }

    /// Merges every touched path.
    ///
    /// Stops at the first failure; paths merged before it stay committed
    /// and the remaining branches are discarded.
    pub async fn commit(self) -> StoreResult<()> {
        let paths = self.touched();
        for (i, path) in paths.iter().enumerate() {
            if let Err(e) = self.root.commit(path, &self.txid).await {
                log::warn!(
                    "Transaction {} failed on {} after {} of {} paths: {}",
                    self.txid,
                    path,
                    i,
                    paths.len(),
                    e
                );
                return Err(e);
            }
            self.touched.lock().retain(|p| p != path);
        }
        Ok(())
    }

    /// Drops every staged change.
    pub fn discard(self) {
        log::debug!("Discarding transaction {} ({} paths)", self.txid, self.touched.lock().len());
    }
}

impl<T: Model> Drop for Transaction<T> {
    fn drop(&mut self) {
        for path in self.touched.lock().drain(..) {
            self.root.discard(&path, &self.txid);
        }
    }
}
