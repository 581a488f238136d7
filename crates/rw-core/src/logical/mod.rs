//! Logical devices: the OpenFlow switch view of a root device and its
//! children.

mod agent;
mod manager;

pub use agent::LogicalDeviceAgent;
pub use manager::LogicalDeviceManager;

use rw_types::{PacketIn, PortStatus};

/// Receiver of events a logical device publishes northbound.
///
/// Implementations must not block; events are produced while an agent
/// holds its lock.
pub trait EventSink: Send + Sync {
    fn send_port_status(&self, status: PortStatus);

    fn send_packet_in(&self, packet: PacketIn);
}
