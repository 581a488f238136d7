//! Northbound event feeds.
//!
//! The RPC surface itself lives outside the core; this module owns the
//! bounded queues the logical devices publish into and the registry that
//! lets exactly one subscriber drain each of them.

mod streams;

pub use streams::{
    ChangeEvent, EventFeeds, SendError, StreamEnd, StreamKind, StreamRegistry, StreamSink, EVENT_QUEUE_CAPACITY,
};
