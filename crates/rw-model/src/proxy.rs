//! Path-bound views of a root.

use crate::callback::{CallbackEvent, CallbackId, CallbackKind};
use crate::error::StoreResult;
use crate::revision::Revision;
use crate::root::Root;
use crate::Model;
use parking_lot::Mutex;
use std::sync::Arc;

/// A capability to read, write and watch one path of a root.
///
/// A proxy owns nothing but its callback registrations, which it drops
/// through [`Proxy::unregister_all`].
pub struct Proxy<T> {
    path: String,
    root: Arc<Root<T>>,
    registered: Mutex<Vec<CallbackId>>,
}

impl<T: Model> Proxy<T> {
    pub(crate) fn new(path: impl Into<String>, root: Arc<Root<T>>) -> Self {
        Self {
            path: path.into(),
            root,
            registered: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn root(&self) -> &Arc<Root<T>> {
        &self.root
    }

    /// A proxy for the child `id` of this path.
    pub fn child(&self, id: &str) -> Proxy<T> {
        Proxy::new(format!("{}/{}", self.path, id), Arc::clone(&self.root))
    }

    /// The committed value at the bound path.
    pub fn get(&self) -> StoreResult<Arc<T>> {
        self.root.get(&self.path, "")
    }

    /// The value visible to `txid` at the bound path.
    pub fn get_in(&self, txid: &str) -> StoreResult<Arc<T>> {
        self.root.get(&self.path, txid)
    }

    pub fn revision(&self) -> StoreResult<Revision<T>> {
        self.root.get_revision(&self.path, "")
    }

    /// Committed values at and below the bound path.
    pub fn list(&self) -> Vec<Arc<T>> {
        self.root.list_under(&self.path)
    }

    pub async fn add(&self, value: T, txid: &str) -> StoreResult<Option<Revision<T>>> {
        self.root.add(&self.path, value, txid).await
    }

    pub async fn update(&self, value: T, txid: &str) -> StoreResult<Option<Revision<T>>> {
        self.root.update(&self.path, value, txid).await
    }

    pub async fn remove(&self, txid: &str) -> StoreResult<Arc<T>> {
        self.root.remove(&self.path, txid).await
    }

    /// Registers `handler` for mutations at or below the bound path.
    pub fn register_callback<F>(&self, kind: CallbackKind, handler: F) -> CallbackId
    where
        F: Fn(&CallbackEvent<T>) + Send + Sync + 'static,
    {
        let id = self
            .root
            .callbacks()
            .register(self.path.clone(), kind, Arc::new(handler));
        self.registered.lock().push(id);
        id
    }

    pub fn unregister_callback(&self, id: CallbackId) -> bool {
        self.registered.lock().retain(|r| *r != id);
        self.root.callbacks().unregister(id)
    }

    /// Drops every callback registered through this proxy.
    pub fn unregister_all(&self) -> usize {
        let ids: Vec<CallbackId> = self.registered.lock().drain(..).collect();
        ids.into_iter()
            .filter(|id| self.root.callbacks().unregister(*id))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryKvClient;
    use crate::root::StoreOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_entity_proxy_callbacks() {
        let root: Arc<Root<u32>> = Root::new(
            "/counters",
            Arc::new(MemoryKvClient::new()),
            StoreOptions::default(),
        );
        let proxy = root.proxy("/counters").child("a");
        assert_eq!(proxy.path(), "/counters/a");

        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        proxy.register_callback(CallbackKind::PostAdd, move |e: &CallbackEvent<u32>| {
            assert_eq!(e.new.as_deref(), Some(&3));
            f.fetch_add(1, Ordering::SeqCst);
        });

        proxy.add(3, "").await.unwrap();
        root.add("/counters/b", 4, "").await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        assert_eq!(proxy.unregister_all(), 1);
        assert!(root.callbacks().is_empty());
    }
}
