//! Key/value backing store seam.

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Durable key/value store that committed revisions are written through to.
///
/// Values are opaque bytes (the JSON encoding of the stored entity).
#[async_trait]
pub trait KvClient: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Returns every key/value pair whose key starts with `prefix`.
    async fn list(&self, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>>;

    /// Cheap liveness check.
    async fn is_alive(&self) -> bool;
}

/// In-process [`KvClient`].
///
/// Writes can be made to fail and liveness can be toggled, which is how
/// store-failure paths are exercised without a real server.
#[derive(Debug, Default)]
pub struct MemoryKvClient {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
    write_delay: Mutex<Option<Duration>>,
    down: AtomicBool,
}

impl MemoryKvClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `put` and `delete` calls fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent `delete` calls fail while `put` keeps working.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Delays every `put` and `delete` by `delay`.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *self.write_delay.lock() = delay;
    }

    /// Marks the store unreachable: every call fails and liveness checks report dead.
    pub fn set_alive(&self, alive: bool) {
        self.down.store(!alive, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    fn check_reachable(&self, operation: &str) -> StoreResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::backend(operation, "store unreachable"));
        }
        Ok(())
    }

    fn check_writable(&self, operation: &str) -> StoreResult<()> {
        self.check_reachable(operation)?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::backend(operation, "write rejected"));
        }
        Ok(())
    }

    async fn slow_write(&self) {
        let delay = *self.write_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl KvClient for MemoryKvClient {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.check_reachable("get")?;
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        self.slow_write().await;
        self.check_writable("put")?;
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.slow_write().await;
        self.check_writable("delete")?;
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::backend("delete", "delete rejected"));
        }
        self.entries.write().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        self.check_reachable("list")?;
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn is_alive(&self) -> bool {
        !self.down.load(Ordering::SeqCst)
    }
}
