//! Change callbacks fired on committed mutations.

use parking_lot::RwLock;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// When a callback fires relative to a committed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    PreAdd,
    PostAdd,
    PreUpdate,
    PostUpdate,
    PreRemove,
    PostRemove,
}

impl CallbackKind {
    pub fn is_pre(&self) -> bool {
        matches!(
            self,
            CallbackKind::PreAdd | CallbackKind::PreUpdate | CallbackKind::PreRemove
        )
    }
}

impl fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallbackKind::PreAdd => "PRE_ADD",
            CallbackKind::PostAdd => "POST_ADD",
            CallbackKind::PreUpdate => "PRE_UPDATE",
            CallbackKind::PostUpdate => "POST_UPDATE",
            CallbackKind::PreRemove => "PRE_REMOVE",
            CallbackKind::PostRemove => "POST_REMOVE",
        };
        f.write_str(name)
    }
}

/// The kind of a committed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Add,
    Update,
    Remove,
}

impl ChangeKind {
    pub fn pre(&self) -> CallbackKind {
        match self {
            ChangeKind::Add => CallbackKind::PreAdd,
            ChangeKind::Update => CallbackKind::PreUpdate,
            ChangeKind::Remove => CallbackKind::PreRemove,
        }
    }

    pub fn post(&self) -> CallbackKind {
        match self {
            ChangeKind::Add => CallbackKind::PostAdd,
            ChangeKind::Update => CallbackKind::PostUpdate,
            ChangeKind::Remove => CallbackKind::PostRemove,
        }
    }
}

/// Payload handed to callback handlers.
#[derive(Debug)]
pub struct CallbackEvent<T> {
    pub kind: CallbackKind,
    pub path: String,
    /// Transaction that produced the mutation; empty for direct writes.
    pub txid: String,
    pub old: Option<Arc<T>>,
    pub new: Option<Arc<T>>,
}

/// Handle returned on registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

/// A callback handler.
pub type Handler<T> = Arc<dyn Fn(&CallbackEvent<T>) + Send + Sync>;

struct Registration<T> {
    id: CallbackId,
    kind: CallbackKind,
    path: String,
    handler: Handler<T>,
}

/// Registry of handlers for one store root.
///
/// Handlers run synchronously in the committing task, in registration
/// order. A handler registered at `/devices` sees mutations of every path
/// below it; one registered at `/devices/abc` sees only that device.
pub struct CallbackDispatcher<T> {
    registrations: RwLock<Vec<Registration<T>>>,
    next_id: AtomicU64,
}

impl<T> Default for CallbackDispatcher<T> {
    fn default() -> Self {
        Self {
            registrations: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<T> CallbackDispatcher<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, path: impl Into<String>, kind: CallbackKind, handler: Handler<T>) -> CallbackId {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let path = path.into();
        log::debug!("Registered {} callback {:?} at {}", kind, id, path);
        self.registrations.write().push(Registration {
            id,
            kind,
            path,
            handler,
        });
        id
    }

    /// Removes a handler. Returns false if the id was unknown.
    pub fn unregister(&self, id: CallbackId) -> bool {
        let mut registrations = self.registrations.write();
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        registrations.len() != before
    }

    /// Removes every handler registered exactly at `path`.
    pub fn unregister_path(&self, path: &str) -> usize {
        let mut registrations = self.registrations.write();
        let before = registrations.len();
        registrations.retain(|r| r.path != path);
        before - registrations.len()
    }

    pub fn len(&self) -> usize {
        self.registrations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.read().is_empty()
    }

    /// Runs every matching handler once, in registration order.
    ///
    /// A panicking handler is logged and skipped; it never aborts the
    /// commit or the handlers after it. Returns the number of handlers run.
    pub fn dispatch(&self, event: &CallbackEvent<T>) -> usize {
        let handlers: Vec<(CallbackId, Handler<T>)> = self
            .registrations
            .read()
            .iter()
            .filter(|r| r.kind == event.kind && covers(&r.path, &event.path))
            .map(|r| (r.id, Arc::clone(&r.handler)))
            .collect();

        for (id, handler) in &handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                log::error!(
                    "{} callback {:?} panicked while handling {}",
                    event.kind,
                    id,
                    event.path
                );
            }
        }
        handlers.len()
    }
}

/// True when `path` equals `registered` or lies below it.
fn covers(registered: &str, path: &str) -> bool {
    match path.strip_prefix(registered) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || registered.ends_with('/'),
        None => false,
    }
}
