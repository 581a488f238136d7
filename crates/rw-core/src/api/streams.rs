//! Bounded event queues with single-subscriber streaming.

use crate::logical::EventSink;
use async_trait::async_trait;
use parking_lot::Mutex;
use rw_types::{PacketIn, PortStatus};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of each event queue.
pub const EVENT_QUEUE_CAPACITY: usize = 100;

/// Change events published on the change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    PortStatus(PortStatus),
}

/// The streaming feeds a subscriber can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    PacketsIn,
    ChangeEvents,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::PacketsIn => f.write_str("packets_in"),
            StreamKind::ChangeEvents => f.write_str("change_events"),
        }
    }
}

/// Delivery to a subscriber failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stream send failed: {0}")]
pub struct SendError(pub String);

/// Where a subscriber receives its items.
#[async_trait]
pub trait StreamSink<T>: Send + Sync {
    async fn send(&self, item: T) -> Result<(), SendError>;
}

#[async_trait]
impl<T: Send + 'static> StreamSink<T> for mpsc::Sender<T> {
    async fn send(&self, item: T) -> Result<(), SendError> {
        mpsc::Sender::send(self, item)
            .await
            .map_err(|_| SendError("receiver dropped".to_string()))
    }
}

/// Why a subscription stopped streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// A newer subscription to the same feed took over, or the feeds were
    /// shut down.
    Preempted,
    /// The sink refused an item; the item is kept for the next subscriber.
    SinkFailed,
    /// The queue was closed.
    Closed,
}

/// One cancellation handle per stream kind.
///
/// Registering a subscriber cancels the one it replaces.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    active: Mutex<HashMap<StreamKind, (u64, CancellationToken)>>,
    next: AtomicU64,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber of `kind` and returns its handle.
    pub fn register(&self, kind: StreamKind) -> (u64, CancellationToken) {
        let generation = self.next.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let previous = self.active.lock().insert(kind, (generation, token.clone()));
        if let Some((_, previous)) = previous {
            info!(stream = %kind, "Preempting previous subscriber");
            previous.cancel();
        }
        (generation, token)
    }

    /// Drops the registration of `generation` unless it was replaced.
    pub fn unregister(&self, kind: StreamKind, generation: u64) {
        let mut active = self.active.lock();
        if active.get(&kind).map(|(g, _)| *g) == Some(generation) {
            active.remove(&kind);
        }
    }

    pub fn is_active(&self, kind: StreamKind) -> bool {
        self.active.lock().contains_key(&kind)
    }

    /// Cancels every registered subscriber.
    pub fn cancel_all(&self) {
        for (_, (_, token)) in self.active.lock().drain() {
            token.cancel();
        }
    }
}

struct Feed<T> {
    kind: StreamKind,
    tx: mpsc::Sender<T>,
    rx: tokio::sync::Mutex<mpsc::Receiver<T>>,
    failed: Mutex<Option<T>>,
}

impl<T: Clone + Send + 'static> Feed<T> {
    fn new(kind: StreamKind, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            kind,
            tx,
            rx: tokio::sync::Mutex::new(rx),
            failed: Mutex::new(None),
        }
    }

    fn publish(&self, item: T) {
        match self.tx.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!(stream = %self.kind, "Event queue full, dropping event"),
            Err(TrySendError::Closed(_)) => warn!(stream = %self.kind, "Event queue closed, dropping event"),
        }
    }

    async fn serve<S: StreamSink<T> + ?Sized>(&self, registry: &StreamRegistry, sink: &S) -> StreamEnd {
        let (generation, token) = registry.register(self.kind);
        let end = self.drain(&token, sink).await;
        registry.unregister(self.kind, generation);
        debug!(stream = %self.kind, end = ?end, "Subscriber detached");
        end
    }

    async fn drain<S: StreamSink<T> + ?Sized>(&self, token: &CancellationToken, sink: &S) -> StreamEnd {
        let replay = self.failed.lock().take();
        if let Some(item) = replay {
            debug!(stream = %self.kind, "Replaying last failed event");
            if let Err(e) = self.deliver(sink, item).await {
                warn!(stream = %self.kind, error = %e, "Replay failed");
                return StreamEnd::SinkFailed;
            }
        }

        loop {
            let item = tokio::select! {
                biased;
                _ = token.cancelled() => return StreamEnd::Preempted,
                item = async { self.rx.lock().await.recv().await } => item,
            };
            let Some(item) = item else {
                return StreamEnd::Closed;
            };
            if let Err(e) = self.deliver(sink, item).await {
                warn!(stream = %self.kind, error = %e, "Failed to send event");
                return StreamEnd::SinkFailed;
            }
        }
    }

    async fn deliver<S: StreamSink<T> + ?Sized>(&self, sink: &S, item: T) -> Result<(), SendError> {
        if let Err(e) = sink.send(item.clone()).await {
            *self.failed.lock() = Some(item);
            return Err(e);
        }
        Ok(())
    }
}

/// The packet-in and change-event queues of the core.
///
/// Producers never block: when a queue is full the event is dropped.
/// Each queue is drained by at most one subscriber at a time.
pub struct EventFeeds {
    packets: Feed<PacketIn>,
    changes: Feed<ChangeEvent>,
    registry: StreamRegistry,
}

impl EventFeeds {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(EVENT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            packets: Feed::new(StreamKind::PacketsIn, capacity),
            changes: Feed::new(StreamKind::ChangeEvents, capacity),
            registry: StreamRegistry::new(),
        })
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    /// Streams packet-in events to `sink` until preempted or the sink fails.
    pub async fn stream_packets_in<S: StreamSink<PacketIn> + ?Sized>(&self, sink: &S) -> StreamEnd {
        self.packets.serve(&self.registry, sink).await
    }

    /// Streams change events to `sink` until preempted or the sink fails.
    pub async fn stream_change_events<S: StreamSink<ChangeEvent> + ?Sized>(&self, sink: &S) -> StreamEnd {
        self.changes.serve(&self.registry, sink).await
    }

    /// Stops every active subscriber.
    pub fn shutdown(&self) {
        self.registry.cancel_all();
    }
}

impl EventSink for EventFeeds {
    fn send_port_status(&self, status: PortStatus) {
        self.changes.publish(ChangeEvent::PortStatus(status));
    }

    fn send_packet_in(&self, packet: PacketIn) {
        self.packets.publish(packet);
    }
}
