//! Domain types for the rw-core device orchestrator.
//!
//! This crate provides the values carried inside store revisions and
//! exchanged with hardware adapters:
//!
//! - [`Device`]: a physical device (OLT or ONU) with its ports and tables
//! - [`LogicalDevice`]: the OpenFlow switch abstraction built on a root device
//! - [`FlowStats`], [`GroupEntry`], [`MeterEntry`]: forwarding table entries
//! - [`AdminState`], [`OperStatus`], [`ConnectStatus`]: lifecycle enums
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses
//!
//! Every type is `serde`-serializable and uses ordered collections only, so
//! the JSON encoding of a value is canonical and can be hashed.

mod device;
mod logical;
mod mac;
mod openflow;
mod state;

pub use device::{
    Device, DeviceAttribute, PeerPort, PmConfig, PmConfigs, Port, PortKey, PortType, ProxyAddress,
};
pub use logical::{
    LogicalDevice, LogicalPort, OfpPort, PortReason, PortStatus, SwitchDesc, SwitchFeatures,
    OFPPC_PORT_DOWN, OFPPS_LINK_DOWN, OFPPS_LIVE,
};
pub use mac::MacAddress;
pub use openflow::{
    Action, Bucket, FlowMod, FlowModCommand, FlowStats, GroupDesc, GroupEntry, GroupMod,
    GroupModCommand, GroupType, Instruction, Keyed, MatchField, MeterBand, MeterBandType,
    MeterEntry, MeterMod, MeterModCommand, PacketIn, PacketOut, OFPG_ALL, OFPG_ANY,
    OFPP_ANY, OFPP_CONTROLLER, OFPTT_ALL,
};
pub use state::{AdminState, ConnectStatus, OperStatus};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid admin state: {0}")]
    InvalidAdminState(String),

    #[error("invalid operational status: {0}")]
    InvalidOperStatus(String),

    #[error("invalid connect status: {0}")]
    InvalidConnectStatus(String),

    #[error("invalid port type: {0}")]
    InvalidPortType(String),
}
