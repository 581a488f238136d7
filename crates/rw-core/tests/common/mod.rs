//! Shared fixtures for rw-core integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use rw_core::{
    AdapterError, AdapterProxy, DeviceManager, EventSink, LogicalDeviceManager, PortCapability, RequestContext,
    SwitchCapability, TableDelta,
};
use rw_model::{MemoryKvClient, Root, StoreOptions};
use rw_types::{
    AdminState, ConnectStatus, Device, FlowStats, GroupEntry, LogicalPort, MacAddress, OfpPort, OperStatus,
    PacketIn, PacketOut, PmConfigs, Port, PortStatus, PortType, ProxyAddress, SwitchDesc, SwitchFeatures,
    OFPPS_LIVE,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

pub const NNI_PORT: u32 = 65536;
pub const PON_PORT: u32 = 1;
pub const UNI_PORT: u32 = 16;

/// One recorded adapter request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: &'static str,
    pub device_id: String,
}

/// In-process adapter that records requests.
///
/// Individual operations can be made to fail and every request can be
/// delayed, which is how timeout and cancellation paths are driven.
#[derive(Default)]
pub struct MockAdapter {
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<&'static str>>,
    delay: Mutex<Option<Duration>>,
    flow_updates: Mutex<Vec<(String, TableDelta<FlowStats>, TableDelta<GroupEntry>)>>,
    packets_out: Mutex<Vec<(String, u32, PacketOut)>>,
    ofp_ports: Mutex<BTreeMap<(String, u32), u32>>,
}

impl MockAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_on(&self, operation: &'static str) {
        self.failing.lock().insert(operation);
    }

    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn operations_for(&self, device_id: &str) -> Vec<&'static str> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.device_id == device_id)
            .map(|c| c.operation)
            .collect()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.operation == operation).count()
    }

    pub fn flow_updates(&self) -> Vec<(String, TableDelta<FlowStats>, TableDelta<GroupEntry>)> {
        self.flow_updates.lock().clone()
    }

    pub fn packets_out(&self) -> Vec<(String, u32, PacketOut)> {
        self.packets_out.lock().clone()
    }

    async fn handle(&self, operation: &'static str, device: &Device) -> Result<(), AdapterError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().push(Call {
            operation,
            device_id: device.id.clone(),
        });
        if self.failing.lock().contains(operation) {
            return Err(AdapterError::rejected(device.device_type.clone(), format!("{} refused", operation)));
        }
        Ok(())
    }

    /// Ofp port numbers are handed out in request order, once per device port.
    fn ofp_port_no(&self, device: &Device, port_no: u32) -> u32 {
        let mut ports = self.ofp_ports.lock();
        let next = ports.len() as u32 + 1;
        let assigned = if device.root { port_no } else { next + 100 };
        *ports.entry((device.id.clone(), port_no)).or_insert(assigned)
    }
}

#[async_trait]
impl AdapterProxy for MockAdapter {
    async fn adopt_device(&self, device: &Device) -> Result<(), AdapterError> {
        self.handle("adopt_device", device).await
    }

    async fn reenable_device(&self, device: &Device) -> Result<(), AdapterError> {
        self.handle("reenable_device", device).await
    }

    async fn disable_device(&self, device: &Device) -> Result<(), AdapterError> {
        self.handle("disable_device", device).await
    }

    async fn reboot_device(&self, device: &Device) -> Result<(), AdapterError> {
        self.handle("reboot_device", device).await
    }

    async fn delete_device(&self, device: &Device) -> Result<(), AdapterError> {
        self.handle("delete_device", device).await
    }

    async fn update_flows_incremental(
        &self,
        device: &Device,
        flows: &TableDelta<FlowStats>,
        groups: &TableDelta<GroupEntry>,
    ) -> Result<(), AdapterError> {
        self.handle("update_flows_incremental", device).await?;
        self.flow_updates
            .lock()
            .push((device.id.clone(), flows.clone(), groups.clone()));
        Ok(())
    }

    async fn update_pm_config(&self, device: &Device, _configs: &PmConfigs) -> Result<(), AdapterError> {
        self.handle("update_pm_config", device).await
    }

    async fn get_ofp_device_info(&self, device: &Device) -> Result<SwitchCapability, AdapterError> {
        self.handle("get_ofp_device_info", device).await?;
        Ok(SwitchCapability {
            desc: SwitchDesc {
                mfr_desc: "VOLTHA Project".to_string(),
                hw_desc: "simulated_pon".to_string(),
                sw_desc: "simulated_pon".to_string(),
                serial_num: device.serial_number.clone(),
                dp_desc: "n/a".to_string(),
            },
            switch_features: SwitchFeatures {
                n_buffers: 256,
                n_tables: 2,
                capabilities: 15,
            },
        })
    }

    async fn get_ofp_port_info(&self, device: &Device, port_no: u32) -> Result<PortCapability, AdapterError> {
        self.handle("get_ofp_port_info", device).await?;
        let ofp_port_no = self.ofp_port_no(device, port_no);
        Ok(PortCapability {
            port: LogicalPort {
                id: format!("{}-port-{}", device.id, port_no),
                ofp_port: OfpPort {
                    port_no: ofp_port_no,
                    hw_addr: MacAddress::new([0, 0, 0, 0, (port_no >> 8) as u8, port_no as u8]),
                    name: format!("port-{}", ofp_port_no),
                    state: OFPPS_LIVE,
                    curr_speed: 32,
                    max_speed: 32,
                    ..OfpPort::default()
                },
                ..LogicalPort::default()
            },
        })
    }

    async fn packet_out(&self, device: &Device, egress_port: u32, packet: &PacketOut) -> Result<(), AdapterError> {
        self.handle("packet_out", device).await?;
        self.packets_out
            .lock()
            .push((device.id.clone(), egress_port, packet.clone()));
        Ok(())
    }
}

/// Records everything logical devices publish.
#[derive(Default)]
pub struct RecordingSink {
    pub port_statuses: Mutex<Vec<PortStatus>>,
    pub packets_in: Mutex<Vec<PacketIn>>,
}

impl RecordingSink {
    pub fn port_statuses(&self) -> Vec<PortStatus> {
        self.port_statuses.lock().clone()
    }

    pub fn packets_in(&self) -> Vec<PacketIn> {
        self.packets_in.lock().clone()
    }
}

impl EventSink for RecordingSink {
    fn send_port_status(&self, status: PortStatus) {
        self.port_statuses.lock().push(status);
    }

    fn send_packet_in(&self, packet: PacketIn) {
        self.packets_in.lock().push(packet);
    }
}

/// Managers wired on an in-memory store.
pub struct Harness {
    pub kv: Arc<MemoryKvClient>,
    pub adapter: Arc<MockAdapter>,
    pub events: Arc<RecordingSink>,
    pub devices: Arc<DeviceManager>,
    pub logical: Arc<LogicalDeviceManager>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryKvClient::new()), MockAdapter::new())
    }

    /// Managers on an existing store, as after a restart.
    pub fn with_store(kv: Arc<MemoryKvClient>, adapter: Arc<MockAdapter>) -> Self {
        let options = StoreOptions::default();
        let device_store = Root::new("/devices", kv.clone(), options.clone());
        let logical_store = Root::new("/logical_devices", kv.clone(), options);
        let events = Arc::new(RecordingSink::default());
        let devices = DeviceManager::new(device_store, adapter.clone(), Duration::from_secs(1));
        let logical = LogicalDeviceManager::new(logical_store, Arc::clone(&devices), events.clone());
        Self {
            kv,
            adapter,
            events,
            devices,
            logical,
        }
    }

    /// Creates, enables and activates an OLT with one NNI and one PON port.
    /// Returns the device id and the id of its logical device.
    pub async fn bring_up_olt(&self, mac: &str) -> (String, String) {
        let olt = self.devices.create_device(olt(mac)).await.unwrap();
        self.devices.add_port(&olt.id, port(NNI_PORT, PortType::EthernetNni)).await.unwrap();
        self.devices.add_port(&olt.id, port(PON_PORT, PortType::PonOlt)).await.unwrap();
        self.devices.enable_device(&ctx(), &olt.id).await.unwrap();
        self.devices
            .update_device_status(&olt.id, Some(OperStatus::Active), Some(ConnectStatus::Reachable))
            .await
            .unwrap();
        let ld = self
            .logical
            .list_logical_devices()
            .into_iter()
            .find(|ld| ld.root_device_id == olt.id)
            .expect("logical device created");
        (olt.id.clone(), ld.id.clone())
    }

    /// Detects and activates an ONU with one UNI port behind `olt_id`.
    pub async fn bring_up_onu(&self, olt_id: &str, onu_id: u32) -> String {
        let onu = self
            .devices
            .child_device_detected(&ctx(), olt_id, PON_PORT, "brcm_openomci_onu", proxy_address(olt_id, onu_id))
            .await
            .unwrap();
        self.devices.add_port(&onu.id, port(UNI_PORT, PortType::EthernetUni)).await.unwrap();
        self.devices
            .update_device_status(&onu.id, Some(OperStatus::Active), Some(ConnectStatus::Reachable))
            .await
            .unwrap();
        onu.id.clone()
    }
}

pub fn ctx() -> RequestContext {
    RequestContext::with_timeout(Duration::from_secs(2))
}

pub fn olt(mac: &str) -> Device {
    Device {
        device_type: "simulated_olt".to_string(),
        root: true,
        vendor: "simulated".to_string(),
        serial_number: "SIMOLT0001".to_string(),
        mac_address: mac.to_string(),
        host_and_port: "172.17.0.1:50060".to_string(),
        admin_state: AdminState::Preprovisioned,
        ..Device::default()
    }
}

/// An ONU as its adapter first reports it.
pub fn onu(parent_id: &str, onu_id: u32) -> Device {
    Device {
        device_type: "brcm_openomci_onu".to_string(),
        root: false,
        parent_id: parent_id.to_string(),
        parent_port_no: PON_PORT,
        vendor: "BRCM".to_string(),
        model: "BRCM33333333".to_string(),
        serial_number: format!("BRCM3333333{}", onu_id),
        vendor_id: "BRCM".to_string(),
        proxy_address: Some(proxy_address(parent_id, onu_id)),
        connect_status: ConnectStatus::Reachable,
        oper_status: OperStatus::Discovered,
        ..Device::default()
    }
}

pub fn proxy_address(parent_id: &str, onu_id: u32) -> ProxyAddress {
    ProxyAddress {
        device_id: parent_id.to_string(),
        device_type: "simulated_olt".to_string(),
        channel_id: 1,
        channel_group_id: 1,
        channel_termination: "channel-termination-1".to_string(),
        onu_id,
    }
}

pub fn port(port_no: u32, port_type: PortType) -> Port {
    Port {
        port_no,
        label: format!("{}-{}", port_type, port_no).to_lowercase(),
        port_type,
        admin_state: AdminState::Enabled,
        oper_status: OperStatus::Active,
        peers: Vec::new(),
    }
}
