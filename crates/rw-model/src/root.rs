//! Collection root: every entity of one kind under a path prefix.

use crate::backend::KvClient;
use crate::callback::{CallbackDispatcher, CallbackEvent, ChangeKind};
use crate::error::{StoreError, StoreResult};
use crate::node::Node;
use crate::proxy::Proxy;
use crate::revision::Revision;
use crate::transaction::Transaction;
use crate::Model;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Settings shared by every root attached to one backing store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Prepended to every path to form the backend key.
    pub key_prefix: String,
    /// Upper bound on each backend call.
    pub timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            key_prefix: "service/voltha".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// What must be visible at a path before a write is staged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expect {
    Absent,
    Present,
}

/// The store for one entity kind, e.g. every device under `/devices`.
///
/// Each entity lives in its own [`Node`] at `{prefix}/{id}`. Reads never
/// block on commits; commits on one path are serialised and commits on
/// different paths run concurrently.
pub struct Root<T> {
    prefix: String,
    nodes: RwLock<BTreeMap<String, Arc<Node<T>>>>,
    backend: Arc<dyn KvClient>,
    options: StoreOptions,
    callbacks: CallbackDispatcher<T>,
}

impl<T: Model> Root<T> {
    pub fn new(prefix: impl Into<String>, backend: Arc<dyn KvClient>, options: StoreOptions) -> Arc<Self> {
        Arc::new(Self {
            prefix: prefix.into(),
            nodes: RwLock::new(BTreeMap::new()),
            backend,
            options,
            callbacks: CallbackDispatcher::new(),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Path of the entity with the given id.
    pub fn path_of(&self, id: &str) -> String {
        format!("{}/{}", self.prefix, id)
    }

    pub fn callbacks(&self) -> &CallbackDispatcher<T> {
        &self.callbacks
    }

    /// A view bound to `path` (the root prefix or one entity path).
    pub fn proxy(self: &Arc<Self>, path: impl Into<String>) -> Proxy<T> {
        Proxy::new(path, Arc::clone(self))
    }

    /// Opens a transaction with a generated id.
    pub fn begin(self: &Arc<Self>) -> Transaction<T> {
        Transaction::new(Arc::clone(self))
    }

    fn check_path(&self, path: &str) -> StoreResult<()> {
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) if rest.len() > 1 && rest.starts_with('/') => Ok(()),
            _ => Err(StoreError::InvalidPath {
                path: path.to_string(),
                prefix: self.prefix.clone(),
            }),
        }
    }

    fn key_of(&self, path: &str) -> String {
        format!("{}{}", self.options.key_prefix, path)
    }

    fn node(&self, path: &str) -> Option<Arc<Node<T>>> {
        self.nodes.read().get(path).cloned()
    }

    fn node_or_insert(&self, path: &str) -> Arc<Node<T>> {
        if let Some(node) = self.node(path) {
            return node;
        }
        let mut nodes = self.nodes.write();
        Arc::clone(
            nodes
                .entry(path.to_string())
                .or_insert_with(|| Arc::new(Node::new(path, None))),
        )
    }

    /// Drops `node` from the map when it holds nothing and nobody else is
    /// using it.
    fn prune(&self, node: &Arc<Node<T>>) {
        let mut nodes = self.nodes.write();
        // One reference in the map, one held by the caller.
        if Arc::strong_count(node) <= 2 && node.is_vacant() {
            nodes.remove(node.path());
        }
    }

    /// The revision visible to `txid` at `path`.
    pub fn get_revision(&self, path: &str, txid: &str) -> StoreResult<Revision<T>> {
        self.node(path)
            .and_then(|node| node.get(txid))
            .ok_or_else(|| StoreError::not_found(path))
    }

    /// The value visible to `txid` at `path`; an empty txid reads committed state.
    pub fn get(&self, path: &str, txid: &str) -> StoreResult<Arc<T>> {
        self.get_revision(path, txid).map(|r| r.data_arc())
    }

    /// Every committed value under `path`, in path order.
    pub fn list_under(&self, path: &str) -> Vec<Arc<T>> {
        let nodes: Vec<Arc<Node<T>>> = self.nodes.read().values().cloned().collect();
        nodes
            .iter()
            .filter(|n| n.path() == path || n.path().starts_with(&format!("{}/", path)))
            .filter_map(|n| n.committed().map(|r| r.data_arc()))
            .collect()
    }

    /// Every committed value of this root.
    pub fn list(&self) -> Vec<Arc<T>> {
        self.list_under(&self.prefix)
    }

    /// Paths with a committed value.
    pub fn paths(&self) -> Vec<String> {
        let nodes: Vec<Arc<Node<T>>> = self.nodes.read().values().cloned().collect();
        nodes
            .iter()
            .filter(|n| n.committed().is_some())
            .map(|n| n.path().to_string())
            .collect()
    }

    /// Creates `path`. With an empty txid the write is committed at once;
    /// otherwise it is staged on the transaction's branch.
    pub async fn add(&self, path: &str, value: T, txid: &str) -> StoreResult<Option<Revision<T>>> {
        self.write(path, Some(value), txid, Expect::Absent).await
    }

    /// Replaces the value at `path`.
    pub async fn update(&self, path: &str, value: T, txid: &str) -> StoreResult<Option<Revision<T>>> {
        self.write(path, Some(value), txid, Expect::Present).await
    }

    /// Removes `path`, returning the value that was visible.
    pub async fn remove(&self, path: &str, txid: &str) -> StoreResult<Arc<T>> {
        let current = self.get(path, txid)?;
        self.write(path, None, txid, Expect::Present).await?;
        Ok(current)
    }

    async fn write(
        &self,
        path: &str,
        value: Option<T>,
        txid: &str,
        expect: Expect,
    ) -> StoreResult<Option<Revision<T>>> {
        if !txid.is_empty() {
            return self.stage_checked(path, txid, value, expect);
        }

        self.check_path(path)?;
        let node = self.node_or_insert(path);
        let result = {
            let _guard = node.lock_commits().await;
            match check_expectation(path, node.committed().is_some(), expect) {
                Ok(()) => {
                    let implicit = uuid::Uuid::new_v4().to_string();
                    let merged = match node.stage(&implicit, value) {
                        Ok(_) => self.merge_locked(&node, &implicit).await,
                        Err(e) => Err(e),
                    };
                    if merged.is_err() {
                        node.discard(&implicit);
                    }
                    merged
                }
                Err(e) => Err(e),
            }
        };
        self.prune(&node);
        result
    }

    pub(crate) fn stage_checked(
        &self,
        path: &str,
        txid: &str,
        value: Option<T>,
        expect: Expect,
    ) -> StoreResult<Option<Revision<T>>> {
        self.check_path(path)?;
        let node = self.node_or_insert(path);
        let visible = node.get(txid).is_some();
        if let Err(e) = check_expectation(path, visible, expect) {
            self.prune(&node);
            return Err(e);
        }
        node.stage(txid, value)
    }

    /// Stages `value` (or a removal, for `None`) on the branch of `txid`
    /// without any I/O and without checking what is visible.
    pub fn stage(&self, path: &str, txid: &str, value: Option<T>) -> StoreResult<Option<Revision<T>>> {
        self.check_path(path)?;
        self.node_or_insert(path).stage(txid, value)
    }

    /// Merges the branch of `txid` at `path` into the committed line.
    ///
    /// Fails with [`StoreError::Conflict`] when another transaction
    /// committed the path after this one opened its branch. On any failure
    /// the committed line is unchanged and the branch stays open.
    pub async fn commit(&self, path: &str, txid: &str) -> StoreResult<Option<Revision<T>>> {
        let node = self
            .node(path)
            .ok_or_else(|| StoreError::transaction_not_found(path, txid))?;
        let result = {
            let _guard = node.lock_commits().await;
            self.merge_locked(&node, txid).await
        };
        self.prune(&node);
        result
    }

    /// Drops the branch of `txid` at `path`.
    pub fn discard(&self, path: &str, txid: &str) -> bool {
        let Some(node) = self.node(path) else {
            return false;
        };
        let discarded = node.discard(txid);
        self.prune(&node);
        discarded
    }

    async fn merge_locked(&self, node: &Arc<Node<T>>, txid: &str) -> StoreResult<Option<Revision<T>>> {
        let path = node.path();
        let merge = node.prepare_merge(txid)?;
        if merge.is_noop() {
            log::debug!("Commit of tx {} on {} changes nothing", txid, path);
            node.complete_merge(txid, merge.old.clone());
            return Ok(merge.old);
        }

        let change = match (&merge.old, &merge.new) {
            (None, Some(_)) => ChangeKind::Add,
            (Some(_), Some(_)) => ChangeKind::Update,
            (Some(_), None) => ChangeKind::Remove,
            (None, None) => return Ok(None),
        };

        let mut event = CallbackEvent {
            kind: change.pre(),
            path: path.to_string(),
            txid: txid.to_string(),
            old: merge.old.as_ref().map(|r| r.data_arc()),
            new: merge.new.as_ref().map(|r| r.data_arc()),
        };
        self.callbacks.dispatch(&event);

        let key = self.key_of(path);
        let written = match &merge.new {
            Some(rev) => match serde_json::to_vec(rev.data()) {
                Ok(bytes) => self.bounded("put", self.backend.put(&key, bytes)).await,
                Err(e) => Err(e.into()),
            },
            None => self.bounded("delete", self.backend.delete(&key)).await,
        };
        if let Err(e) = written {
            log::error!("Failed to persist {} (tx {}): {}", path, txid, e);
            return Err(e);
        }

        node.complete_merge(txid, merge.new.clone());
        log::debug!(
            "Committed {:?} on {} (tx {}): {}",
            change,
            path,
            txid,
            merge.new.as_ref().map(|r| r.hash()).unwrap_or("removed")
        );

        event.kind = change.post();
        self.callbacks.dispatch(&event);
        Ok(merge.new)
    }

    async fn bounded<R>(
        &self,
        operation: &str,
        call: impl Future<Output = StoreResult<R>>,
    ) -> StoreResult<R> {
        match tokio::time::timeout(self.options.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::timeout(operation, self.options.timeout)),
        }
    }

    /// Rebuilds committed state from the backing store.
    ///
    /// Used after a restart. No callbacks fire. Returns the number of
    /// entities loaded.
    pub async fn load(&self) -> StoreResult<usize> {
        let key_prefix = self.key_of(&format!("{}/", self.prefix));
        let entries = self.bounded("list", self.backend.list(&key_prefix)).await?;

        let mut loaded = 0;
        for (key, bytes) in entries {
            let Some(path) = key.strip_prefix(self.options.key_prefix.as_str()) else {
                continue;
            };
            self.install(path, &bytes)?;
            loaded += 1;
        }
        log::info!("Loaded {} entries under {}", loaded, self.prefix);
        Ok(loaded)
    }

    /// Reloads a single path from the backing store.
    ///
    /// Returns `None` when the backend holds nothing for the path.
    pub async fn load_path(&self, path: &str) -> StoreResult<Option<Arc<T>>> {
        self.check_path(path)?;
        let key = self.key_of(path);
        match self.bounded("get", self.backend.get(&key)).await? {
            Some(bytes) => self.install(path, &bytes).map(Some),
            None => Ok(None),
        }
    }

    fn install(&self, path: &str, bytes: &[u8]) -> StoreResult<Arc<T>> {
        let value: T = serde_json::from_slice(bytes)?;
        let revision = Revision::new(path, value, None)?;
        let data = revision.data_arc();
        self.node_or_insert(path).replace_committed(Some(revision));
        Ok(data)
    }

    /// Discards transaction branches older than `max_age` on every path.
    pub fn discard_stale(&self, max_age: Duration) -> usize {
        let nodes: Vec<Arc<Node<T>>> = self.nodes.read().values().cloned().collect();
        let discarded = nodes.iter().map(|n| n.discard_stale(max_age)).sum();
        for node in &nodes {
            self.prune(node);
        }
        if discarded > 0 {
            log::warn!("Discarded {} stale transaction branches under {}", discarded, self.prefix);
        }
        discarded
    }

    /// True when the backing store answers a liveness check within the
    /// store timeout.
    pub async fn backend_alive(&self) -> bool {
        self.bounded("ping", async { Ok(self.backend.is_alive().await) })
            .await
            .unwrap_or(false)
    }
}

fn check_expectation(path: &str, visible: bool, expect: Expect) -> StoreResult<()> {
    match (expect, visible) {
        (Expect::Absent, true) => Err(StoreError::already_exists(path)),
        (Expect::Present, false) => Err(StoreError::not_found(path)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryKvClient;
    use pretty_assertions::assert_eq;

    fn root() -> (Arc<Root<u32>>, Arc<MemoryKvClient>) {
        let kv = Arc::new(MemoryKvClient::new());
        let root = Root::new("/counters", kv.clone(), StoreOptions::default());
        (root, kv)
    }

    #[tokio::test]
    async fn test_direct_writes_persist() {
        let (root, kv) = root();
        root.add("/counters/a", 1, "").await.unwrap();
        assert_eq!(kv.keys(), vec!["service/voltha/counters/a".to_string()]);

        root.update("/counters/a", 2, "").await.unwrap();
        assert_eq!(*root.get("/counters/a", "").unwrap(), 2);

        let removed = root.remove("/counters/a", "").await.unwrap();
        assert_eq!(*removed, 2);
        assert!(kv.is_empty());
        assert!(root.paths().is_empty());
    }

    #[tokio::test]
    async fn test_add_and_update_preconditions() {
        let (root, _) = root();
        assert!(matches!(
            root.update("/counters/a", 1, "").await,
            Err(StoreError::NotFound { .. })
        ));
        root.add("/counters/a", 1, "").await.unwrap();
        assert!(matches!(
            root.add("/counters/a", 1, "").await,
            Err(StoreError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_paths_outside_prefix_are_rejected() {
        let (root, _) = root();
        assert!(matches!(
            root.add("/devices/a", 1, "").await,
            Err(StoreError::InvalidPath { .. })
        ));
        assert!(matches!(
            root.add("/counters", 1, "").await,
            Err(StoreError::InvalidPath { .. })
        ));
    }

    #[tokio::test]
    async fn test_identical_update_is_not_written() {
        let (root, kv) = root();
        root.add("/counters/a", 7, "").await.unwrap();
        kv.set_fail_writes(true);
        // Same content: nothing to persist, so the failing backend is not hit.
        root.update("/counters/a", 7, "").await.unwrap();
    }

    #[tokio::test]
    async fn test_load_path() {
        let (root, kv) = root();
        kv.put("service/voltha/counters/z", b"42".to_vec()).await.unwrap();
        assert_eq!(root.load_path("/counters/z").await.unwrap().map(|v| *v), Some(42));
        assert_eq!(root.load_path("/counters/missing").await.unwrap(), None);
    }
}
