//! rw-core: device and logical device orchestration.
//!
//! The core keeps the authoritative state of every managed device (OLTs and
//! the ONUs behind them) and of the logical OpenFlow switches built on top
//! of them. State lives in a versioned store ([`rw_model`]) written through
//! to a key/value backend; hardware is reached only through an
//! [`AdapterProxy`].
//!
//! - [`DeviceManager`] / [`DeviceAgent`]: device lifecycle, ports, PM
//!   configuration and per-device flow tables
//! - [`LogicalDeviceManager`] / [`LogicalDeviceAgent`]: logical ports and
//!   the flow, group and meter tables a controller programs
//! - [`TransitionMap`]: side effects run when a device changes state
//! - [`EventFeeds`]: bounded packet-in and change-event queues
//! - [`Core`]: bootstrap, restore and store liveness

pub mod adapter;
pub mod api;
pub mod config;
pub mod daemon;
pub mod device;
pub mod error;
pub mod flows;
pub mod logical;
pub mod request;

pub use adapter::{AdapterError, AdapterProxy, DetachedAdapter, PortCapability, SwitchCapability};
pub use api::{ChangeEvent, EventFeeds, StreamEnd, StreamKind, StreamSink};
pub use config::{Args, ConfigError, CoreConfig};
pub use daemon::{Core, StartupError};
pub use device::{DeviceAgent, DeviceManager, TransitionHandler, TransitionMap};
pub use error::{CoreError, ErrorCode, Result};
pub use flows::{reconcile, TableDelta};
pub use logical::{EventSink, LogicalDeviceAgent, LogicalDeviceManager};
pub use request::RequestContext;
