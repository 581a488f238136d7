//! Physical device records and typed attribute updates.

use crate::openflow::{FlowStats, GroupEntry};
use crate::state::{AdminState, ConnectStatus, OperStatus};
use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Type of a device port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PortType {
    #[default]
    Unknown,
    /// Network-facing Ethernet port of an OLT.
    EthernetNni,
    /// Subscriber-facing Ethernet port of an ONU.
    EthernetUni,
    /// PON port on the OLT side.
    PonOlt,
    /// PON port on the ONU side.
    PonOnu,
    VenetOlt,
    VenetOnu,
}

impl PortType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            PortType::Unknown => "UNKNOWN",
            PortType::EthernetNni => "ETHERNET_NNI",
            PortType::EthernetUni => "ETHERNET_UNI",
            PortType::PonOlt => "PON_OLT",
            PortType::PonOnu => "PON_ONU",
            PortType::VenetOlt => "VENET_OLT",
            PortType::VenetOnu => "VENET_ONU",
        }
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PortType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "UNKNOWN" => Ok(PortType::Unknown),
            "ETHERNET_NNI" => Ok(PortType::EthernetNni),
            "ETHERNET_UNI" => Ok(PortType::EthernetUni),
            "PON_OLT" => Ok(PortType::PonOlt),
            "PON_ONU" => Ok(PortType::PonOnu),
            "VENET_OLT" => Ok(PortType::VenetOlt),
            "VENET_ONU" => Ok(PortType::VenetOnu),
            _ => Err(ParseError::InvalidPortType(s.to_string())),
        }
    }
}

/// Composite port key: caller-supplied port number plus port type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortKey {
    pub port_no: u32,
    pub port_type: PortType,
}

impl fmt::Display for PortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port_type, self.port_no)
    }
}

/// Port on a peer device linked to a local port.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PeerPort {
    pub device_id: String,
    pub port_no: u32,
}

/// A device port.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Port {
    pub port_no: u32,
    pub label: String,
    pub port_type: PortType,
    pub admin_state: AdminState,
    pub oper_status: OperStatus,
    #[serde(default)]
    pub peers: Vec<PeerPort>,
}

impl Port {
    pub fn key(&self) -> PortKey {
        PortKey {
            port_no: self.port_no,
            port_type: self.port_type,
        }
    }
}

/// Addressing used by a parent device to reach a child through its adapter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProxyAddress {
    pub device_id: String,
    pub device_type: String,
    pub channel_id: u32,
    pub channel_group_id: u32,
    pub channel_termination: String,
    pub onu_id: u32,
}

/// A single performance-monitoring metric setting.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PmConfig {
    pub name: String,
    pub enabled: bool,
    pub sample_freq: u32,
}

/// Performance-monitoring configuration of a device.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PmConfigs {
    pub id: String,
    pub default_freq: u32,
    pub grouped: bool,
    pub freq_override: bool,
    #[serde(default)]
    pub metrics: Vec<PmConfig>,
}

/// A managed physical device.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub root: bool,
    pub parent_id: String,
    pub parent_port_no: u32,
    pub vendor: String,
    pub model: String,
    pub hardware_version: String,
    pub firmware_version: String,
    pub serial_number: String,
    pub vendor_id: String,
    pub adapter: String,
    pub mac_address: String,
    pub host_and_port: String,
    pub vlan: u32,
    pub reason: String,
    pub proxy_address: Option<ProxyAddress>,
    pub admin_state: AdminState,
    pub oper_status: OperStatus,
    pub connect_status: ConnectStatus,
    #[serde(default)]
    pub ports: Vec<Port>,
    #[serde(default)]
    pub flows: Vec<FlowStats>,
    #[serde(default)]
    pub flow_groups: Vec<GroupEntry>,
    pub pm_configs: Option<PmConfigs>,
}

impl Device {
    /// Returns the port with the given composite key.
    pub fn port(&self, key: PortKey) -> Option<&Port> {
        self.ports.iter().find(|p| p.key() == key)
    }

    /// Returns a mutable reference to the port with the given composite key.
    pub fn port_mut(&mut self, key: PortKey) -> Option<&mut Port> {
        self.ports.iter_mut().find(|p| p.key() == key)
    }

    /// Returns the ports of a single type, in device order.
    pub fn ports_of_type(&self, port_type: PortType) -> Vec<Port> {
        self.ports
            .iter()
            .filter(|p| p.port_type == port_type)
            .cloned()
            .collect()
    }

    /// True when the device is enabled, active and reachable.
    pub fn is_operational(&self) -> bool {
        self.admin_state == AdminState::Enabled
            && self.oper_status == OperStatus::Active
            && self.connect_status == ConnectStatus::Reachable
    }

    /// Applies a single typed attribute update.
    pub fn apply(&mut self, attribute: DeviceAttribute) {
        match attribute {
            DeviceAttribute::Root(v) => self.root = v,
            DeviceAttribute::Vendor(v) => self.vendor = v,
            DeviceAttribute::Model(v) => self.model = v,
            DeviceAttribute::HardwareVersion(v) => self.hardware_version = v,
            DeviceAttribute::FirmwareVersion(v) => self.firmware_version = v,
            DeviceAttribute::SerialNumber(v) => self.serial_number = v,
            DeviceAttribute::VendorId(v) => self.vendor_id = v,
            DeviceAttribute::MacAddress(v) => self.mac_address = v,
            DeviceAttribute::Vlan(v) => self.vlan = v,
            DeviceAttribute::Reason(v) => self.reason = v,
            DeviceAttribute::ParentPortNo(v) => self.parent_port_no = v,
            DeviceAttribute::ProxyAddress(v) => self.proxy_address = Some(v),
        }
    }

    /// Extracts the attributes an adapter is allowed to overwrite.
    ///
    /// Status, ports, tables and identity are owned by the core and are
    /// never taken from adapter-supplied device data.
    pub fn adapter_attributes(&self) -> Vec<DeviceAttribute> {
        let mut attributes = vec![
            DeviceAttribute::Root(self.root),
            DeviceAttribute::Vendor(self.vendor.clone()),
            DeviceAttribute::Model(self.model.clone()),
            DeviceAttribute::HardwareVersion(self.hardware_version.clone()),
            DeviceAttribute::FirmwareVersion(self.firmware_version.clone()),
            DeviceAttribute::SerialNumber(self.serial_number.clone()),
            DeviceAttribute::VendorId(self.vendor_id.clone()),
            DeviceAttribute::MacAddress(self.mac_address.clone()),
            DeviceAttribute::Vlan(self.vlan),
            DeviceAttribute::Reason(self.reason.clone()),
            DeviceAttribute::ParentPortNo(self.parent_port_no),
        ];
        if let Some(proxy_address) = &self.proxy_address {
            attributes.push(DeviceAttribute::ProxyAddress(proxy_address.clone()));
        }
        attributes
    }
}

/// A typed update of one device attribute.
///
/// Each variant names one settable field and carries a value of that
/// field's type, so an unknown field name cannot be expressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceAttribute {
    Root(bool),
    Vendor(String),
    Model(String),
    HardwareVersion(String),
    FirmwareVersion(String),
    SerialNumber(String),
    VendorId(String),
    MacAddress(String),
    Vlan(u32),
    Reason(String),
    ParentPortNo(u32),
    ProxyAddress(ProxyAddress),
}

impl DeviceAttribute {
    /// Field name, for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            DeviceAttribute::Root(_) => "root",
            DeviceAttribute::Vendor(_) => "vendor",
            DeviceAttribute::Model(_) => "model",
            DeviceAttribute::HardwareVersion(_) => "hardware_version",
            DeviceAttribute::FirmwareVersion(_) => "firmware_version",
            DeviceAttribute::SerialNumber(_) => "serial_number",
            DeviceAttribute::VendorId(_) => "vendor_id",
            DeviceAttribute::MacAddress(_) => "mac_address",
            DeviceAttribute::Vlan(_) => "vlan",
            DeviceAttribute::Reason(_) => "reason",
            DeviceAttribute::ParentPortNo(_) => "parent_port_no",
            DeviceAttribute::ProxyAddress(_) => "proxy_address",
        }
    }
}
