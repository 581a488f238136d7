//! Logical device manager.

use super::agent::LogicalDeviceAgent;
use super::EventSink;
use crate::device::{create_id, DeviceManager};
use crate::error::{CoreError, Result};
use crate::request::RequestContext;
use dashmap::DashMap;
use rw_model::{Root, StoreError};
use rw_types::{
    Device, FlowMod, FlowStats, GroupEntry, GroupMod, LogicalDevice, LogicalPort, MeterEntry, MeterMod,
    PacketOut, PortType,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owns one agent per logical device.
pub struct LogicalDeviceManager {
    logical_devices: Arc<Root<LogicalDevice>>,
    devices: Arc<DeviceManager>,
    events: Arc<dyn EventSink>,
    agents: DashMap<String, Arc<LogicalDeviceAgent>>,
}

impl LogicalDeviceManager {
    /// Creates the manager and registers it with `devices` so device
    /// transitions can reach it.
    pub fn new(
        logical_devices: Arc<Root<LogicalDevice>>,
        devices: Arc<DeviceManager>,
        events: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            logical_devices,
            devices: Arc::clone(&devices),
            events,
            agents: DashMap::new(),
        });
        devices.set_logical_device_manager(&manager);
        manager
    }

    pub fn store(&self) -> &Arc<Root<LogicalDevice>> {
        &self.logical_devices
    }

    fn new_agent(&self, logical_device_id: &str, root_device_id: &str) -> Arc<LogicalDeviceAgent> {
        Arc::new(LogicalDeviceAgent::new(
            logical_device_id,
            root_device_id,
            &self.logical_devices,
            Arc::clone(&self.devices),
            Arc::clone(&self.events),
        ))
    }

    pub fn agent(&self, logical_device_id: &str) -> Result<Arc<LogicalDeviceAgent>> {
        self.agents
            .get(logical_device_id)
            .map(|a| Arc::clone(a.value()))
            .ok_or_else(|| CoreError::not_found("logical device", logical_device_id))
    }

    fn agent_for_root(&self, root_device_id: &str) -> Option<Arc<LogicalDeviceAgent>> {
        self.agents
            .iter()
            .find(|a| a.root_device_id() == root_device_id)
            .map(|a| Arc::clone(a.value()))
    }

    /// Builds the logical device of a root device. Returns the id of the
    /// existing one when the root device already has it.
    pub async fn create_logical_device(&self, ctx: &RequestContext, device: &Device) -> Result<String> {
        if !device.root {
            return Err(CoreError::invalid_argument(format!(
                "device {} is not a root device",
                device.id
            )));
        }
        if let Some(agent) = self.agent_for_root(&device.id) {
            debug!(device_id = %device.id, logical_device_id = %agent.logical_device_id(), "Logical device exists");
            return Ok(agent.logical_device_id().to_string());
        }

        let logical_device_id = create_id();
        let agent = self.new_agent(&logical_device_id, &device.id);
        agent.start(ctx).await?;
        self.agents.insert(logical_device_id.clone(), agent);
        info!(logical_device_id = %logical_device_id, device_id = %device.id, "Logical device created");
        Ok(logical_device_id)
    }

    /// Stops and removes the logical device of a root device.
    pub async fn delete_logical_device(&self, device: &Device) -> Result<()> {
        let Some(agent) = self.agent_for_root(&device.id) else {
            debug!(device_id = %device.id, "No logical device to delete");
            return Ok(());
        };
        let logical_device_id = agent.logical_device_id().to_string();
        match self
            .logical_devices
            .remove(&self.logical_devices.path_of(&logical_device_id), "")
            .await
        {
            Ok(_) | Err(StoreError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        agent.stop();
        self.agents.remove(&logical_device_id);
        info!(logical_device_id = %logical_device_id, "Logical device deleted");
        Ok(())
    }

    pub async fn get_logical_device(&self, logical_device_id: &str) -> Result<Arc<LogicalDevice>> {
        self.agent(logical_device_id)?.get_logical_device().await
    }

    pub fn list_logical_devices(&self) -> Vec<Arc<LogicalDevice>> {
        self.logical_devices.list()
    }

    pub fn list_logical_device_ids(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.key().clone()).collect()
    }

    /// Id of the logical device `device` belongs to, following parent
    /// links up to the root device.
    pub async fn logical_device_id_of(&self, device: &Device) -> Result<String> {
        let mut current = device.clone();
        // Bounded walk; device trees are at most a few levels deep.
        for _ in 0..8 {
            if current.root {
                return self
                    .agent_for_root(&current.id)
                    .map(|a| a.logical_device_id().to_string())
                    .ok_or_else(|| CoreError::not_found("logical device of", &current.id));
            }
            if current.parent_id.is_empty() {
                break;
            }
            current = (*self.devices.get_device(&current.parent_id).await?).clone();
        }
        Err(CoreError::not_found("logical device of", &device.id))
    }

    /// Reloads every logical device from the backing store.
    pub async fn load_logical_devices(&self, ctx: &RequestContext) -> Result<usize> {
        self.logical_devices.load().await?;
        let mut loaded = 0;
        for ld in self.logical_devices.list() {
            if self.agents.contains_key(&ld.id) {
                continue;
            }
            let agent = self.new_agent(&ld.id, &ld.root_device_id);
            agent.start(ctx).await?;
            self.agents.insert(ld.id.clone(), agent);
            loaded += 1;
        }
        info!(loaded, "Loaded logical devices");
        Ok(loaded)
    }

    /// Adds a logical port for each UNI port of a child device.
    pub async fn setup_uni_logical_ports(&self, ctx: &RequestContext, child: &Device) -> Result<()> {
        let logical_device_id = self.logical_device_id_of(child).await?;
        let agent = self.agent(&logical_device_id)?;
        for port in child.ports_of_type(PortType::EthernetUni) {
            agent.add_port(ctx, child, &port).await?;
        }
        Ok(())
    }

    /// Adds the logical port backed by one device port.
    pub async fn add_logical_port(&self, ctx: &RequestContext, device: &Device, port_no: u32) -> Result<()> {
        let port = device
            .ports
            .iter()
            .find(|p| p.port_no == port_no)
            .ok_or_else(|| CoreError::not_found("port", format!("{}/{}", device.id, port_no)))?;
        let logical_device_id = self.logical_device_id_of(device).await?;
        self.agent(&logical_device_id)?.add_port(ctx, device, port).await
    }

    /// Removes the logical ports backed by `device_id` on every logical device.
    pub async fn delete_logical_ports(&self, device_id: &str) -> Result<()> {
        let agents: Vec<Arc<LogicalDeviceAgent>> = self.agents.iter().map(|a| Arc::clone(a.value())).collect();
        for agent in agents {
            if !agent.has_ports_of(device_id).await {
                continue;
            }
            let removed = agent.delete_ports_of_device(device_id).await?;
            debug!(
                logical_device_id = %agent.logical_device_id(),
                device_id = %device_id,
                removed,
                "Logical ports removed"
            );
        }
        Ok(())
    }

    pub async fn list_logical_ports(&self, logical_device_id: &str) -> Result<Vec<LogicalPort>> {
        self.agent(logical_device_id)?.list_ports().await
    }

    pub async fn list_flows(&self, logical_device_id: &str) -> Result<Vec<FlowStats>> {
        self.agent(logical_device_id)?.list_flows().await
    }

    pub async fn list_flow_groups(&self, logical_device_id: &str) -> Result<Vec<GroupEntry>> {
        self.agent(logical_device_id)?.list_flow_groups().await
    }

    pub async fn list_meters(&self, logical_device_id: &str) -> Result<Vec<MeterEntry>> {
        self.agent(logical_device_id)?.list_meters().await
    }

    pub async fn enable_logical_port(&self, logical_device_id: &str, port_id: &str) -> Result<()> {
        self.agent(logical_device_id)?.enable_port(port_id).await
    }

    pub async fn disable_logical_port(&self, logical_device_id: &str, port_id: &str) -> Result<()> {
        self.agent(logical_device_id)?.disable_port(port_id).await
    }

    pub async fn update_flow_table(&self, ctx: &RequestContext, logical_device_id: &str, flow_mod: &FlowMod) -> Result<()> {
        self.agent(logical_device_id)?
            .update_flow_table(ctx, flow_mod)
            .await
    }

    pub async fn update_group_table(&self, ctx: &RequestContext, logical_device_id: &str, group_mod: &GroupMod) -> Result<()> {
        self.agent(logical_device_id)?
            .update_group_table(ctx, group_mod)
            .await
    }

    pub async fn update_meter_table(&self, ctx: &RequestContext, logical_device_id: &str, meter_mod: &MeterMod) -> Result<()> {
        self.agent(logical_device_id)?
            .update_meter_table(ctx, meter_mod)
            .await
    }

    pub async fn packet_out(&self, ctx: &RequestContext, logical_device_id: &str, packet: &PacketOut) -> Result<()> {
        self.agent(logical_device_id)?.packet_out(ctx, packet).await
    }

    /// Routes a packet received on a device port to its logical device.
    pub async fn packet_in(&self, device_id: &str, port_no: u32, data: Vec<u8>) -> Result<()> {
        let device = self.devices.get_device(device_id).await?;
        let logical_device_id = match self.logical_device_id_of(&device).await {
            Ok(id) => id,
            Err(e) => {
                warn!(device_id = %device_id, port_no, error = %e, "Dropping packet-in");
                return Err(e);
            }
        };
        self.agent(&logical_device_id)?
            .packet_in(device_id, port_no, data)
            .await
    }
}
