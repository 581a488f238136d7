//! Logical (OpenFlow switch) device records.

use crate::mac::MacAddress;
use crate::openflow::{FlowStats, GroupEntry, MeterEntry};
use serde::{Deserialize, Serialize};

/// Port config bit: administratively down.
pub const OFPPC_PORT_DOWN: u32 = 1;

/// Port state bit: no physical link.
pub const OFPPS_LINK_DOWN: u32 = 1;

/// Port state bit: live for fast failover.
pub const OFPPS_LIVE: u32 = 4;

/// OpenFlow port description.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OfpPort {
    pub port_no: u32,
    pub hw_addr: MacAddress,
    pub name: String,
    pub config: u32,
    pub state: u32,
    pub curr: u32,
    pub advertised: u32,
    pub supported: u32,
    pub peer: u32,
    pub curr_speed: u32,
    pub max_speed: u32,
}

impl OfpPort {
    pub fn is_down(&self) -> bool {
        self.config & OFPPC_PORT_DOWN != 0
    }

    /// Marks the port administratively up or down.
    pub fn set_down(&mut self, down: bool) {
        if down {
            self.config |= OFPPC_PORT_DOWN;
            self.state = OFPPS_LINK_DOWN;
        } else {
            self.config &= !OFPPC_PORT_DOWN;
            self.state = OFPPS_LIVE;
        }
    }
}

/// A port of a logical device, backed by a physical device port.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogicalPort {
    pub id: String,
    pub ofp_port: OfpPort,
    pub device_id: String,
    pub device_port_no: u32,
    /// True for the NNI port(s) of the root device.
    pub root_port: bool,
}

/// Switch description reported to controllers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SwitchDesc {
    pub mfr_desc: String,
    pub hw_desc: String,
    pub sw_desc: String,
    pub serial_num: String,
    pub dp_desc: String,
}

/// Switch feature set reported to controllers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SwitchFeatures {
    pub n_buffers: u32,
    pub n_tables: u32,
    pub capabilities: u32,
}

/// A logical OpenFlow switch built on top of a root device and its children.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogicalDevice {
    pub id: String,
    pub datapath_id: u64,
    pub root_device_id: String,
    pub desc: SwitchDesc,
    pub switch_features: SwitchFeatures,
    #[serde(default)]
    pub ports: Vec<LogicalPort>,
    #[serde(default)]
    pub flows: Vec<FlowStats>,
    #[serde(default)]
    pub flow_groups: Vec<GroupEntry>,
    #[serde(default)]
    pub meters: Vec<MeterEntry>,
}

impl LogicalDevice {
    pub fn port(&self, port_no: u32) -> Option<&LogicalPort> {
        self.ports.iter().find(|p| p.ofp_port.port_no == port_no)
    }

    pub fn port_mut(&mut self, port_no: u32) -> Option<&mut LogicalPort> {
        self.ports.iter_mut().find(|p| p.ofp_port.port_no == port_no)
    }

    /// Ports backed by the given physical device.
    pub fn ports_of_device(&self, device_id: &str) -> Vec<&LogicalPort> {
        self.ports.iter().filter(|p| p.device_id == device_id).collect()
    }
}

/// Reason carried in a port status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PortReason {
    Add,
    Delete,
    Modify,
}

/// Port status change of a logical device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStatus {
    pub logical_device_id: String,
    pub reason: PortReason,
    pub desc: OfpPort,
}
