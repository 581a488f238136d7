//! Versioned object store for the rw-core orchestrator.
//!
//! The store keeps one authoritative value per path and a history of
//! content-hashed revisions for each in-flight transaction:
//!
//! - [`Revision`]: immutable snapshot of a value, identified by its hash
//! - [`Branch`]: a line of revisions owned by one transaction
//! - [`Node`]: a path with its committed branch and open transaction branches
//! - [`Root`]: every entity of one kind, write-through to a [`KvClient`]
//! - [`Proxy`]: a path-bound view with change callbacks
//! - [`Transaction`]: a named set of branches committed together
//!
//! # Commit protocol
//!
//! Writes are staged first ([`Root::stage`]), which is pure, and merged
//! second ([`Root::commit`]). A merge checks that the branch was opened on
//! the current committed revision, fires pre-callbacks, writes the value
//! through to the backing store, advances the committed line and fires
//! post-callbacks. If the backing store write fails the committed line
//! does not move.
//!
//! ```ignore
//! let root = Root::new("/devices", backend, StoreOptions::default());
//! root.add("/devices/abc", device, "").await?;
//!
//! let tx = root.begin();
//! tx.update("/devices/abc", changed)?;
//! tx.commit().await?;
//! ```

mod backend;
mod branch;
mod callback;
mod error;
mod node;
mod proxy;
#[cfg(feature = "redis")]
mod redis_backend;
mod revision;
mod root;
mod transaction;

pub use backend::{KvClient, MemoryKvClient};
pub use branch::{Branch, COMMITTED};
pub use callback::{CallbackDispatcher, CallbackEvent, CallbackId, CallbackKind, ChangeKind, Handler};
pub use error::{StoreError, StoreResult};
pub use node::{Merge, Node};
pub use proxy::Proxy;
#[cfg(feature = "redis")]
pub use redis_backend::{RedisConfig, RedisKvClient};
pub use revision::{content_hash, Revision, RevisionConfig};
pub use root::{Root, StoreOptions};
pub use transaction::Transaction;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A value that can be stored: serializable for hashing and persistence,
/// and shareable across tasks.
pub trait Model: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Model for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}
