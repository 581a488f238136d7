//! Device manager: owns the device agents and routes requests to them.

use super::agent::{DeviceAgent, TransitionHook};
use super::create_id;
use super::transitions::{TransitionHandler, TransitionMap};
use crate::adapter::AdapterProxy;
use crate::error::{CoreError, Result};
use crate::logical::LogicalDeviceManager;
use crate::request::RequestContext;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use rw_model::Root;
use rw_types::{
    AdminState, ConnectStatus, Device, DeviceAttribute, FlowStats, GroupEntry, MacAddress, OperStatus,
    PacketOut, PeerPort, PmConfigs, Port, PortType, ProxyAddress,
};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Creates, finds and drives device agents.
///
/// Agents live for as long as their device: one is created when a device
/// is created or reloaded, and it is dropped once the device is removed.
pub struct DeviceManager {
    devices: Arc<Root<Device>>,
    adapter: Arc<dyn AdapterProxy>,
    agents: DashMap<String, Arc<DeviceAgent>>,
    transitions: TransitionMap,
    logical: RwLock<Option<Weak<LogicalDeviceManager>>>,
    /// Serialises root device creation so the MAC check holds until the
    /// new device is committed.
    creating: tokio::sync::Mutex<()>,
    this: Weak<DeviceManager>,
    /// Deadline of requests the core issues on its own, e.g. cascades.
    core_timeout: Duration,
}

impl DeviceManager {
    pub fn new(devices: Arc<Root<Device>>, adapter: Arc<dyn AdapterProxy>, core_timeout: Duration) -> Arc<Self> {
        Self::with_transitions(devices, adapter, core_timeout, TransitionMap::default())
    }

    pub fn with_transitions(
        devices: Arc<Root<Device>>,
        adapter: Arc<dyn AdapterProxy>,
        core_timeout: Duration,
        transitions: TransitionMap,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            devices,
            adapter,
            agents: DashMap::new(),
            transitions,
            logical: RwLock::new(None),
            creating: tokio::sync::Mutex::new(()),
            this: this.clone(),
            core_timeout,
        })
    }

    pub fn set_logical_device_manager(&self, logical: &Arc<LogicalDeviceManager>) {
        *self.logical.write() = Some(Arc::downgrade(logical));
    }

    fn logical(&self) -> Option<Arc<LogicalDeviceManager>> {
        self.logical.read().as_ref().and_then(Weak::upgrade)
    }

    pub fn store(&self) -> &Arc<Root<Device>> {
        &self.devices
    }

    fn new_agent(&self, device_id: &str) -> Arc<DeviceAgent> {
        let hook: Weak<dyn TransitionHook> = self.this.clone();
        Arc::new(DeviceAgent::new(
            device_id,
            &self.devices,
            Arc::clone(&self.adapter),
            Some(hook),
        ))
    }

    fn core_context(&self) -> RequestContext {
        RequestContext::with_timeout(self.core_timeout)
    }

    /// The agent of `device_id`.
    pub fn agent(&self, device_id: &str) -> Result<Arc<DeviceAgent>> {
        self.agents
            .get(device_id)
            .map(|a| Arc::clone(a.value()))
            .ok_or_else(|| CoreError::not_found("device", device_id))
    }

    pub fn is_device_in_cache(&self, device_id: &str) -> bool {
        self.agents.contains_key(device_id)
    }

    /// Registers a new device in PREPROVISIONED state and returns it.
    ///
    /// Root devices must carry a MAC address no other root device uses.
    pub async fn create_device(&self, mut device: Device) -> Result<Arc<Device>> {
        let _creating = if device.root {
            let guard = self.creating.lock().await;
            self.check_unique_mac(&device)?;
            Some(guard)
        } else {
            None
        };

        device.id = create_id();
        device.admin_state = AdminState::Preprovisioned;
        info!(device_id = %device.id, device_type = %device.device_type, "Creating device");

        let agent = self.new_agent(&device.id);
        let created = agent.start(Some(device)).await?;
        self.agents.insert(created.id.clone(), agent);
        Ok(created)
    }

    fn check_unique_mac(&self, device: &Device) -> Result<()> {
        if device.mac_address.is_empty() {
            return Ok(());
        }
        let mac: MacAddress = device
            .mac_address
            .parse()
            .map_err(|e| CoreError::invalid_argument(format!("{}", e)))?;
        let duplicate = self.devices.list().into_iter().any(|d| {
            d.root && d.mac_address.parse::<MacAddress>().map(|m| m == mac).unwrap_or(false)
        });
        if duplicate {
            return Err(CoreError::already_exists("device with mac", mac.to_string()));
        }
        Ok(())
    }

    pub async fn enable_device(&self, ctx: &RequestContext, device_id: &str) -> Result<()> {
        self.agent(device_id)?.enable(ctx).await
    }

    pub async fn disable_device(&self, ctx: &RequestContext, device_id: &str) -> Result<()> {
        self.agent(device_id)?.disable(ctx).await
    }

    pub async fn reboot_device(&self, ctx: &RequestContext, device_id: &str) -> Result<()> {
        self.agent(device_id)?.reboot(ctx).await
    }

    /// Deletes a DISABLED device. A device left DELETED by an earlier
    /// failed cleanup has its cleanup run again instead.
    pub async fn delete_device(&self, ctx: &RequestContext, device_id: &str) -> Result<()> {
        let agent = self.agent(device_id)?;
        let device = agent.get_device().await?;
        if device.admin_state == AdminState::Deleted {
            info!(device_id = %device_id, "Resuming cleanup of deleted device");
            let mut previous = (*device).clone();
            previous.admin_state = AdminState::Disabled;
            return self.process_transition(&previous, &device).await;
        }
        agent.delete(ctx).await
    }

    pub async fn get_device(&self, device_id: &str) -> Result<Arc<Device>> {
        self.agent(device_id)?.get_device().await
    }

    /// Every committed device.
    pub fn list_devices(&self) -> Vec<Arc<Device>> {
        self.devices.list()
    }

    pub fn list_device_ids(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.key().clone()).collect()
    }

    /// Creates the agent of a device already in the store.
    pub async fn load_device(&self, device_id: &str) -> Result<Arc<DeviceAgent>> {
        if let Ok(agent) = self.agent(device_id) {
            return Ok(agent);
        }
        let agent = self.new_agent(device_id);
        agent.start(None).await?;
        let agent = Arc::clone(
            self.agents
                .entry(device_id.to_string())
                .or_insert(agent)
                .value(),
        );
        Ok(agent)
    }

    /// Rebuilds every device agent from the backing store.
    pub async fn load_devices(&self) -> Result<usize> {
        self.devices.load().await?;
        let ids: Vec<String> = self.devices.list().iter().map(|d| d.id.clone()).collect();
        self.reconcile_devices(&ids).await
    }

    /// Loads an agent for each listed device. Missing devices are skipped.
    pub async fn reconcile_devices(&self, device_ids: &[String]) -> Result<usize> {
        let mut loaded = 0;
        for device_id in device_ids {
            match self.load_device(device_id).await {
                Ok(_) => loaded += 1,
                Err(CoreError::NotFound { .. }) => {
                    warn!(device_id = %device_id, "Cannot reconcile unknown device");
                }
                Err(e) => return Err(e),
            }
        }
        info!(requested = device_ids.len(), loaded, "Reconciled devices");
        Ok(loaded)
    }

    /// Registers a device discovered behind `parent_id` and asks its
    /// adapter to adopt it.
    pub async fn child_device_detected(
        &self,
        ctx: &RequestContext,
        parent_id: &str,
        parent_port_no: u32,
        device_type: &str,
        proxy_address: ProxyAddress,
    ) -> Result<Arc<Device>> {
        let parent = self.get_device(parent_id).await?;
        if parent.admin_state != AdminState::Enabled {
            return Err(CoreError::precondition(
                parent_id,
                format!("parent is {}", parent.admin_state),
            ));
        }

        let child = Device {
            device_type: device_type.to_string(),
            root: false,
            parent_id: parent_id.to_string(),
            parent_port_no,
            vlan: proxy_address.channel_id,
            proxy_address: Some(proxy_address),
            ..Device::default()
        };
        let created = self.create_device(child).await?;
        info!(device_id = %created.id, parent_id = %parent_id, "Child device detected");
        self.enable_device(ctx, &created.id).await?;
        self.get_device(&created.id).await
    }

    /// Ids of the devices whose parent is `parent_id`.
    pub fn get_child_device_ids(&self, parent_id: &str) -> Vec<String> {
        self.devices
            .list()
            .iter()
            .filter(|d| d.parent_id == parent_id && !d.root)
            .map(|d| d.id.clone())
            .collect()
    }

    /// The child of `parent_id` behind ONU id `onu_id`.
    pub fn get_child_device(&self, parent_id: &str, onu_id: u32) -> Result<Arc<Device>> {
        self.devices
            .list()
            .into_iter()
            .find(|d| {
                d.parent_id == parent_id
                    && d.proxy_address.as_ref().map(|p| p.onu_id) == Some(onu_id)
            })
            .ok_or_else(|| CoreError::not_found("child device", format!("{}/onu-{}", parent_id, onu_id)))
    }

    pub async fn update_device_from_adapter(&self, device: &Device) -> Result<()> {
        self.agent(&device.id)?.update_device_from_adapter(device).await
    }

    pub async fn update_device_attributes(&self, device_id: &str, attributes: Vec<DeviceAttribute>) -> Result<()> {
        self.agent(device_id)?.update_attributes(attributes).await
    }

    pub async fn update_device_status(
        &self,
        device_id: &str,
        oper_status: Option<OperStatus>,
        connect_status: Option<ConnectStatus>,
    ) -> Result<()> {
        self.agent(device_id)?
            .update_device_status(oper_status, connect_status)
            .await
    }

    pub async fn update_port_state(
        &self,
        device_id: &str,
        port_type: PortType,
        port_no: u32,
        oper_status: OperStatus,
    ) -> Result<()> {
        self.agent(device_id)?
            .update_port_state(port_type, port_no, oper_status)
            .await
    }

    /// Adds a port and records it as a peer on every device it names.
    pub async fn add_port(&self, device_id: &str, port: Port) -> Result<()> {
        let peers = port.peers.clone();
        let port_no = port.port_no;
        let port_type = port.port_type;
        let agent = self.agent(device_id)?;
        agent.add_port(port).await?;

        for peer in peers {
            let back = PeerPort {
                device_id: device_id.to_string(),
                port_no,
            };
            match self.agent(&peer.device_id) {
                Ok(agent) => agent.add_peer_port(back).await?,
                Err(_) => debug!(device_id = %device_id, peer = %peer.device_id, "Peer device not managed here"),
            }
        }

        // Ports added after the device came up get their logical port now.
        let device = agent.get_device().await?;
        let exposed = match port_type {
            PortType::EthernetNni => device.root,
            PortType::EthernetUni => !device.root,
            _ => false,
        };
        if exposed && device.is_operational() {
            if let Some(logical) = self.logical() {
                match logical.add_logical_port(&self.core_context(), &device, port_no).await {
                    Ok(()) | Err(CoreError::NotFound { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    pub async fn add_peer_port(&self, device_id: &str, peer: PeerPort) -> Result<()> {
        self.agent(device_id)?.add_peer_port(peer).await
    }

    pub async fn get_ports(&self, device_id: &str, port_type: PortType) -> Result<Vec<Port>> {
        self.agent(device_id)?.get_ports(port_type).await
    }

    pub async fn update_pm_configs(&self, device_id: &str, configs: PmConfigs) -> Result<()> {
        self.agent(device_id)?.update_pm_configs(configs).await
    }

    pub async fn apply_pm_configs(&self, ctx: &RequestContext, device_id: &str, configs: PmConfigs) -> Result<()> {
        self.agent(device_id)?.apply_pm_configs(ctx, configs).await
    }

    pub async fn update_flows_and_groups(
        &self,
        ctx: &RequestContext,
        device_id: &str,
        flows: &[FlowStats],
        groups: &[GroupEntry],
    ) -> Result<()> {
        self.agent(device_id)?
            .update_flows_and_groups(ctx, flows, groups)
            .await
    }

    pub async fn remove_flows_and_groups(
        &self,
        ctx: &RequestContext,
        device_id: &str,
        flow_ids: &[u64],
        group_ids: &[u32],
    ) -> Result<()> {
        self.agent(device_id)?
            .remove_flows_and_groups(ctx, flow_ids, group_ids)
            .await
    }

    pub async fn packet_out(&self, ctx: &RequestContext, device_id: &str, egress_port: u32, packet: &PacketOut) -> Result<()> {
        self.agent(device_id)?
            .packet_out(ctx, egress_port, packet)
            .await
    }

    /// Forwards a packet an adapter received on a device port.
    pub async fn packet_in(&self, device_id: &str, port_no: u32, data: Vec<u8>) -> Result<()> {
        let logical = self
            .logical()
            .ok_or_else(|| CoreError::not_found("logical device manager", device_id))?;
        logical.packet_in(device_id, port_no, data).await
    }

    /// Stops the agent of `device_id` and removes the device from the store.
    /// Removes a device from the store, then drops its agent. The agent
    /// is kept when the store removal fails so the delete can be retried.
    pub async fn remove_device(&self, device_id: &str) -> Result<()> {
        match self.devices.remove(&self.devices.path_of(device_id), "").await {
            Ok(_) => info!(device_id = %device_id, "Device removed"),
            Err(rw_model::StoreError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        if let Some((_, agent)) = self.agents.remove(device_id) {
            agent.stop();
        }
        Ok(())
    }

    async fn disable_all_child_devices(&self, parent: &Device) -> Result<()> {
        let ctx = self.core_context();
        for child_id in self.get_child_device_ids(&parent.id) {
            let agent = self.agent(&child_id)?;
            let child = agent.get_device().await?;
            if matches!(child.admin_state, AdminState::Disabled | AdminState::Deleted) {
                continue;
            }
            agent.disable(&ctx).await?;
        }
        Ok(())
    }

    async fn delete_all_child_devices(&self, parent: &Device) -> Result<()> {
        let ctx = self.core_context();
        for child_id in self.get_child_device_ids(&parent.id) {
            let agent = match self.agent(&child_id) {
                Ok(agent) => agent,
                Err(_) => continue,
            };
            let child = agent.get_device().await?;
            if !matches!(child.admin_state, AdminState::Disabled | AdminState::Deleted) {
                agent.disable(&ctx).await?;
            }
            self.delete_device(&ctx, &child_id).await?;
        }
        Ok(())
    }

    async fn run_handler(&self, handler: TransitionHandler, current: &Device) -> Result<()> {
        debug!(device_id = %current.id, handler = %handler, "Running transition handler");
        let logical = self.logical();
        match handler {
            TransitionHandler::DisableAllChildDevices => self.disable_all_child_devices(current).await,
            TransitionHandler::DeleteAllChildDevices => self.delete_all_child_devices(current).await,
            TransitionHandler::RemoveDevice => self.remove_device(&current.id).await,
            _ => {
                let Some(logical) = logical else {
                    warn!(device_id = %current.id, handler = %handler, "No logical device manager, skipping");
                    return Ok(());
                };
                let ctx = self.core_context();
                match handler {
                    TransitionHandler::CreateLogicalDevice => {
                        logical.create_logical_device(&ctx, current).await.map(|_| ())
                    }
                    TransitionHandler::SetupUniLogicalPorts => logical.setup_uni_logical_ports(&ctx, current).await,
                    TransitionHandler::DeleteLogicalPorts => logical.delete_logical_ports(&current.id).await,
                    TransitionHandler::DeleteLogicalDevice => logical.delete_logical_device(current).await,
                    _ => Ok(()),
                }
            }
        }
    }
}

#[async_trait]
impl TransitionHook for DeviceManager {
    async fn process_transition(&self, previous: &Device, current: &Device) -> Result<()> {
        let handlers = self.transitions.handlers(previous, current);
        if handlers.is_empty() {
            return Ok(());
        }
        info!(
            device_id = %current.id,
            from = %previous.admin_state,
            to = %current.admin_state,
            oper_status = %current.oper_status,
            handlers = handlers.len(),
            "Processing transition"
        );
        for handler in handlers {
            self.run_handler(handler, current).await?;
        }
        Ok(())
    }
}
