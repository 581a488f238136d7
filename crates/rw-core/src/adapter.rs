//! Boundary to the hardware-abstraction adapters.
//!
//! The core never talks to hardware. Every device-affecting operation is
//! forwarded to the adapter that owns the device type through
//! [`AdapterProxy`]; the transport behind it (message bus, RPC) is not part
//! of the core.

use crate::error::ErrorCode;
use crate::flows::TableDelta;
use async_trait::async_trait;
use rw_types::{Device, FlowStats, GroupEntry, LogicalPort, PacketOut, PmConfigs, SwitchDesc, SwitchFeatures};
use thiserror::Error;

/// Errors reported by an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// The adapter processed the request and refused it.
    #[error("adapter {adapter} rejected request: {message}")]
    Rejected { adapter: String, message: String },

    /// The adapter could not be reached.
    #[error("adapter {adapter} unavailable: {message}")]
    Unavailable { adapter: String, message: String },

    /// The adapter does not implement the request.
    #[error("adapter {adapter} does not support {operation}")]
    Unsupported { adapter: String, operation: String },
}

impl AdapterError {
    pub fn rejected(adapter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            adapter: adapter.into(),
            message: message.into(),
        }
    }

    pub fn unavailable(adapter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            adapter: adapter.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AdapterError::Rejected { .. } => ErrorCode::FailedPrecondition,
            AdapterError::Unavailable { .. } => ErrorCode::Unavailable,
            AdapterError::Unsupported { .. } => ErrorCode::InvalidArgument,
        }
    }
}

/// Switch-level description an adapter reports for a root device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SwitchCapability {
    pub desc: SwitchDesc,
    pub switch_features: SwitchFeatures,
}

/// Logical port description an adapter reports for one device port.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PortCapability {
    pub port: LogicalPort,
}

/// Requests the core sends to adapters.
///
/// Implementations must be cheap to call concurrently; the core bounds
/// every call with the caller's deadline and may drop the future early.
#[async_trait]
pub trait AdapterProxy: Send + Sync {
    /// Hands a preprovisioned device to its adapter.
    async fn adopt_device(&self, device: &Device) -> Result<(), AdapterError>;

    async fn reenable_device(&self, device: &Device) -> Result<(), AdapterError>;

    async fn disable_device(&self, device: &Device) -> Result<(), AdapterError>;

    async fn reboot_device(&self, device: &Device) -> Result<(), AdapterError>;

    async fn delete_device(&self, device: &Device) -> Result<(), AdapterError>;

    /// Programs the difference between the device tables and the desired ones.
    async fn update_flows_incremental(
        &self,
        device: &Device,
        flows: &TableDelta<FlowStats>,
        groups: &TableDelta<GroupEntry>,
    ) -> Result<(), AdapterError>;

    async fn update_pm_config(&self, device: &Device, configs: &PmConfigs) -> Result<(), AdapterError>;

    async fn get_ofp_device_info(&self, device: &Device) -> Result<SwitchCapability, AdapterError>;

    async fn get_ofp_port_info(&self, device: &Device, port_no: u32) -> Result<PortCapability, AdapterError>;

    /// Sends a controller packet out of `egress_port` of the device.
    async fn packet_out(&self, device: &Device, egress_port: u32, packet: &PacketOut) -> Result<(), AdapterError>;
}

/// Adapter proxy used when no adapter transport is attached.
///
/// Every request fails with [`AdapterError::Unavailable`], so state
/// changes that need an adapter are refused and leave the store untouched.
#[derive(Debug, Clone)]
pub struct DetachedAdapter {
    endpoint: String,
}

impl DetachedAdapter {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    fn unavailable(&self, device: &Device, operation: &str) -> AdapterError {
        tracing::warn!(
            device_id = %device.id,
            adapter = %device.adapter,
            operation,
            endpoint = %self.endpoint,
            "No adapter transport attached"
        );
        let adapter = if device.adapter.is_empty() {
            device.device_type.clone()
        } else {
            device.adapter.clone()
        };
        AdapterError::unavailable(adapter, format!("{} not reachable at {}", operation, self.endpoint))
    }
}

#[async_trait]
impl AdapterProxy for DetachedAdapter {
    async fn adopt_device(&self, device: &Device) -> Result<(), AdapterError> {
        Err(self.unavailable(device, "adopt_device"))
    }

    async fn reenable_device(&self, device: &Device) -> Result<(), AdapterError> {
        Err(self.unavailable(device, "reenable_device"))
    }

    async fn disable_device(&self, device: &Device) -> Result<(), AdapterError> {
        Err(self.unavailable(device, "disable_device"))
    }

    async fn reboot_device(&self, device: &Device) -> Result<(), AdapterError> {
        Err(self.unavailable(device, "reboot_device"))
    }

    async fn delete_device(&self, device: &Device) -> Result<(), AdapterError> {
        Err(self.unavailable(device, "delete_device"))
    }

    async fn update_flows_incremental(
        &self,
        device: &Device,
        _flows: &TableDelta<FlowStats>,
        _groups: &TableDelta<GroupEntry>,
    ) -> Result<(), AdapterError> {
        Err(self.unavailable(device, "update_flows_incremental"))
    }

    async fn update_pm_config(&self, device: &Device, _configs: &PmConfigs) -> Result<(), AdapterError> {
        Err(self.unavailable(device, "update_pm_config"))
    }

    async fn get_ofp_device_info(&self, device: &Device) -> Result<SwitchCapability, AdapterError> {
        Err(self.unavailable(device, "get_ofp_device_info"))
    }

    async fn get_ofp_port_info(&self, device: &Device, _port_no: u32) -> Result<PortCapability, AdapterError> {
        Err(self.unavailable(device, "get_ofp_port_info"))
    }

    async fn packet_out(&self, device: &Device, _egress_port: u32, _packet: &PacketOut) -> Result<(), AdapterError> {
        Err(self.unavailable(device, "packet_out"))
    }
}
