//! Per-logical-device actor.

use super::EventSink;
use crate::device::DeviceManager;
use crate::error::{CoreError, Result};
use crate::flows::reconcile;
use crate::request::RequestContext;
use rw_model::{CallbackEvent, CallbackKind, Proxy, Root, StoreError};
use rw_types::{
    Device, FlowMod, FlowModCommand, FlowStats, GroupEntry, GroupMod, GroupModCommand, Keyed, LogicalDevice,
    LogicalPort, MacAddress, MeterEntry, MeterMod, MeterModCommand, PacketIn, PacketOut, Port, PortReason,
    PortStatus, PortType, OFPG_ALL,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// Owns the flow, group and meter tables of one logical device.
///
/// Table changes are pushed to the root device before they are committed,
/// so a table never lists an entry the root device refused.
pub struct LogicalDeviceAgent {
    logical_device_id: String,
    root_device_id: String,
    proxy: Proxy<LogicalDevice>,
    devices: Arc<DeviceManager>,
    events: Arc<dyn EventSink>,
    lock: RwLock<()>,
}

impl LogicalDeviceAgent {
    pub fn new(
        logical_device_id: impl Into<String>,
        root_device_id: impl Into<String>,
        logical_devices: &Arc<Root<LogicalDevice>>,
        devices: Arc<DeviceManager>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let logical_device_id = logical_device_id.into();
        let proxy = logical_devices.proxy(logical_devices.path_of(&logical_device_id));
        Self {
            logical_device_id,
            root_device_id: root_device_id.into(),
            proxy,
            devices,
            events,
            lock: RwLock::new(()),
        }
    }

    pub fn logical_device_id(&self) -> &str {
        &self.logical_device_id
    }

    pub fn root_device_id(&self) -> &str {
        &self.root_device_id
    }

    /// Loads the logical device, or builds it from the root device and
    /// its NNI ports when it does not exist yet.
    pub async fn start(&self, ctx: &RequestContext) -> Result<Arc<LogicalDevice>> {
        let _guard = self.lock.write().await;
        let existing = match self.proxy.get() {
            Ok(ld) => Some(ld),
            Err(StoreError::NotFound { .. }) => self.proxy.root().load_path(self.proxy.path()).await?,
            Err(e) => return Err(e.into()),
        };

        let ld = match existing {
            Some(ld) => ld,
            None => {
                let built = self.build(ctx).await?;
                let ld = self
                    .proxy
                    .add(built, "")
                    .await?
                    .map(|r| r.data_arc())
                    .ok_or_else(|| CoreError::not_found("logical device", &self.logical_device_id))?;
                for port in &ld.ports {
                    self.publish_port(PortReason::Add, port);
                }
                ld
            }
        };

        let logical_device_id = self.logical_device_id.clone();
        self.proxy.register_callback(
            CallbackKind::PostUpdate,
            move |event: &CallbackEvent<LogicalDevice>| {
                debug!(
                    logical_device_id = %logical_device_id,
                    flows = event.new.as_ref().map(|ld| ld.flows.len()).unwrap_or(0),
                    "Logical device updated in store"
                );
            },
        );
        info!(
            logical_device_id = %self.logical_device_id,
            root_device_id = %self.root_device_id,
            "Logical device agent started"
        );
        Ok(ld)
    }

    async fn build(&self, ctx: &RequestContext) -> Result<LogicalDevice> {
        let root = self.devices.agent(&self.root_device_id)?;
        let device = root.get_device().await?;
        let mac: MacAddress = device.mac_address.parse().map_err(|e| {
            CoreError::invalid_argument(format!("root device {}: {}", self.root_device_id, e))
        })?;
        let capability = root.get_switch_capability(ctx).await?;

        let mut ld = LogicalDevice {
            id: self.logical_device_id.clone(),
            datapath_id: mac.to_u64(),
            root_device_id: self.root_device_id.clone(),
            desc: capability.desc,
            switch_features: capability.switch_features,
            ..LogicalDevice::default()
        };
        for port in device.ports_of_type(PortType::EthernetNni) {
            let logical_port = self.logical_port(ctx, &device, &port).await?;
            ld.ports.push(logical_port);
        }
        Ok(ld)
    }

    async fn logical_port(&self, ctx: &RequestContext, device: &Device, port: &Port) -> Result<LogicalPort> {
        let capability = self
            .devices
            .agent(&device.id)?
            .get_port_capability(ctx, port.port_no)
            .await?;
        let mut logical_port = capability.port;
        logical_port.device_id = device.id.clone();
        logical_port.device_port_no = port.port_no;
        logical_port.root_port = device.id == self.root_device_id;
        if logical_port.id.is_empty() {
            logical_port.id = if port.label.is_empty() {
                format!("{}-{}", device.id, port.port_no)
            } else {
                port.label.clone()
            };
        }
        Ok(logical_port)
    }

    pub fn stop(&self) {
        self.proxy.unregister_all();
        info!(logical_device_id = %self.logical_device_id, "Logical device agent stopped");
    }

    fn current(&self) -> Result<Arc<LogicalDevice>> {
        self.proxy.get().map_err(|e| match e {
            StoreError::NotFound { .. } => CoreError::not_found("logical device", &self.logical_device_id),
            other => other.into(),
        })
    }

    async fn store(&self, ld: LogicalDevice) -> Result<Arc<LogicalDevice>> {
        match self.proxy.update(ld, "").await {
            Ok(Some(revision)) => Ok(revision.data_arc()),
            Ok(None) => Err(CoreError::not_found("logical device", &self.logical_device_id)),
            Err(e) => {
                error!(
                    logical_device_id = %self.logical_device_id,
                    error = %e,
                    "Failed to update logical device in store"
                );
                Err(e.into())
            }
        }
    }

    fn publish_port(&self, reason: PortReason, port: &LogicalPort) {
        self.events.send_port_status(PortStatus {
            logical_device_id: self.logical_device_id.clone(),
            reason,
            desc: port.ofp_port.clone(),
        });
    }

    pub async fn get_logical_device(&self) -> Result<Arc<LogicalDevice>> {
        let _guard = self.lock.read().await;
        self.current()
    }

    pub async fn list_ports(&self) -> Result<Vec<LogicalPort>> {
        Ok(self.get_logical_device().await?.ports.clone())
    }

    pub async fn list_flows(&self) -> Result<Vec<FlowStats>> {
        Ok(self.get_logical_device().await?.flows.clone())
    }

    pub async fn list_flow_groups(&self) -> Result<Vec<GroupEntry>> {
        Ok(self.get_logical_device().await?.flow_groups.clone())
    }

    pub async fn list_meters(&self) -> Result<Vec<MeterEntry>> {
        Ok(self.get_logical_device().await?.meters.clone())
    }

    /// Adds the logical port backed by `port` of `device`.
    ///
    /// Adding a port that is already present is a no-op.
    pub async fn add_port(&self, ctx: &RequestContext, device: &Device, port: &Port) -> Result<()> {
        let _guard = self.lock.write().await;
        let ld = self.current()?;
        if ld
            .ports
            .iter()
            .any(|p| p.device_id == device.id && p.device_port_no == port.port_no)
        {
            debug!(
                logical_device_id = %self.logical_device_id,
                device_id = %device.id,
                port_no = port.port_no,
                "Logical port already present"
            );
            return Ok(());
        }

        let logical_port = self.logical_port(ctx, device, port).await?;
        if ld.port(logical_port.ofp_port.port_no).is_some() {
            return Err(CoreError::already_exists(
                "logical port",
                format!("{}/{}", self.logical_device_id, logical_port.ofp_port.port_no),
            ));
        }

        let mut cloned = (*ld).clone();
        cloned.ports.push(logical_port.clone());
        self.store(cloned).await?;
        self.publish_port(PortReason::Add, &logical_port);
        Ok(())
    }

    /// Removes every logical port backed by a port of `device_id`.
    pub async fn delete_ports_of_device(&self, device_id: &str) -> Result<usize> {
        let _guard = self.lock.write().await;
        let ld = self.current()?;
        let (removed, kept): (Vec<LogicalPort>, Vec<LogicalPort>) =
            ld.ports.iter().cloned().partition(|p| p.device_id == device_id);
        if removed.is_empty() {
            return Ok(0);
        }

        let mut cloned = (*ld).clone();
        cloned.ports = kept;
        self.store(cloned).await?;
        for port in &removed {
            self.publish_port(PortReason::Delete, port);
        }
        Ok(removed.len())
    }

    pub async fn enable_port(&self, port_id: &str) -> Result<()> {
        self.set_port_down(port_id, false).await
    }

    pub async fn disable_port(&self, port_id: &str) -> Result<()> {
        self.set_port_down(port_id, true).await
    }

    async fn set_port_down(&self, port_id: &str, down: bool) -> Result<()> {
        let _guard = self.lock.write().await;
        let ld = self.current()?;
        let mut cloned = (*ld).clone();
        let port = cloned
            .ports
            .iter_mut()
            .find(|p| p.id == port_id)
            .ok_or_else(|| CoreError::not_found("logical port", format!("{}/{}", self.logical_device_id, port_id)))?;
        if port.ofp_port.is_down() == down {
            return Ok(());
        }
        port.ofp_port.set_down(down);
        let port = port.clone();
        self.store(cloned).await?;
        self.publish_port(PortReason::Modify, &port);
        Ok(())
    }

    /// Applies a flow table modification.
    pub async fn update_flow_table(&self, ctx: &RequestContext, flow_mod: &FlowMod) -> Result<()> {
        let _guard = self.lock.write().await;
        let ld = self.current()?;
        debug!(
            logical_device_id = %self.logical_device_id,
            command = ?flow_mod.command,
            table_id = flow_mod.table_id,
            priority = flow_mod.priority,
            "Flow table update"
        );
        match flow_mod.command {
            FlowModCommand::Add => self.flow_add(ctx, &ld, flow_mod).await,
            FlowModCommand::Modify => self.flow_modify(ctx, &ld, flow_mod, false).await,
            FlowModCommand::ModifyStrict => self.flow_modify(ctx, &ld, flow_mod, true).await,
            FlowModCommand::Delete => self.flow_delete(ctx, &ld, flow_mod, false).await,
            FlowModCommand::DeleteStrict => self.flow_delete(ctx, &ld, flow_mod, true).await,
        }
    }

    fn check_meters(&self, ld: &LogicalDevice, flows: &[FlowStats]) -> Result<()> {
        for meter_id in flows.iter().flat_map(|f| f.meter_ids()) {
            if !ld.meters.iter().any(|m| m.meter_id == meter_id) {
                return Err(CoreError::invalid_argument(format!(
                    "flow references unknown meter {}",
                    meter_id
                )));
            }
        }
        Ok(())
    }

    /// Pushes `flows` and `groups` to the root device, then commits the
    /// reconciled tables.
    async fn push_and_commit(
        &self,
        ctx: &RequestContext,
        ld: &LogicalDevice,
        flows: &[FlowStats],
        groups: &[GroupEntry],
    ) -> Result<()> {
        let flow_delta = reconcile(flows, &ld.flows);
        let group_delta = reconcile(groups, &ld.flow_groups);
        if flow_delta.is_empty() && group_delta.is_empty() {
            return Ok(());
        }

        self.devices
            .update_flows_and_groups(ctx, &self.root_device_id, &flow_delta.to_add, &group_delta.to_add)
            .await?;

        let mut cloned = ld.clone();
        cloned.flows = flow_delta.in_force;
        cloned.flow_groups = group_delta.in_force;
        count_meter_references(&mut cloned);
        self.store(cloned).await.map(|_| ())
    }

    /// Removes flows and groups from the root device and returns the
    /// logical device without them, ready to commit.
    async fn remove_from_root(
        &self,
        ctx: &RequestContext,
        ld: &LogicalDevice,
        flow_ids: &[u64],
        group_ids: &[u32],
    ) -> Result<LogicalDevice> {
        self.devices
            .remove_flows_and_groups(ctx, &self.root_device_id, flow_ids, group_ids)
            .await?;

        let mut cloned = ld.clone();
        cloned.flows.retain(|f| !flow_ids.contains(&f.key()));
        cloned.flow_groups.retain(|g| !group_ids.contains(&g.key()));
        count_meter_references(&mut cloned);
        Ok(cloned)
    }

    async fn flow_add(&self, ctx: &RequestContext, ld: &LogicalDevice, flow_mod: &FlowMod) -> Result<()> {
        let flow = FlowStats::from_flow_mod(flow_mod);
        self.check_meters(ld, std::slice::from_ref(&flow))?;
        self.push_and_commit(ctx, ld, &[flow], &[]).await
    }

    async fn flow_modify(&self, ctx: &RequestContext, ld: &LogicalDevice, flow_mod: &FlowMod, strict: bool) -> Result<()> {
        let modified: Vec<FlowStats> = ld
            .flows
            .iter()
            .filter(|f| selected(flow_mod, f, strict))
            .map(|f| FlowStats {
                instructions: flow_mod.instructions.clone(),
                ..f.clone()
            })
            .collect();
        if modified.is_empty() {
            return Ok(());
        }
        self.check_meters(ld, &modified)?;
        self.push_and_commit(ctx, ld, &modified, &[]).await
    }

    async fn flow_delete(&self, ctx: &RequestContext, ld: &LogicalDevice, flow_mod: &FlowMod, strict: bool) -> Result<()> {
        let ids: Vec<u64> = ld
            .flows
            .iter()
            .filter(|f| selected(flow_mod, f, strict))
            .map(|f| f.key())
            .collect();
        if ids.is_empty() {
            return Ok(());
        }
        let updated = self.remove_from_root(ctx, ld, &ids, &[]).await?;
        self.store(updated).await.map(|_| ())
    }

    /// Applies a group table modification.
    pub async fn update_group_table(&self, ctx: &RequestContext, group_mod: &GroupMod) -> Result<()> {
        let _guard = self.lock.write().await;
        let ld = self.current()?;
        let exists = ld.flow_groups.iter().any(|g| g.key() == group_mod.group_id);
        let group_key = || format!("{}/{}", self.logical_device_id, group_mod.group_id);

        match group_mod.command {
            GroupModCommand::Add => {
                if exists {
                    return Err(CoreError::already_exists("group", group_key()));
                }
                self.push_and_commit(ctx, &ld, &[], &[GroupEntry::from_group_mod(group_mod)])
                    .await
            }
            GroupModCommand::Modify => {
                if !exists {
                    return Err(CoreError::not_found("group", group_key()));
                }
                self.push_and_commit(ctx, &ld, &[], &[GroupEntry::from_group_mod(group_mod)])
                    .await
            }
            GroupModCommand::Delete => {
                let group_ids: Vec<u32> = ld
                    .flow_groups
                    .iter()
                    .map(|g| g.key())
                    .filter(|id| group_mod.group_id == OFPG_ALL || *id == group_mod.group_id)
                    .collect();
                if group_ids.is_empty() {
                    return Ok(());
                }
                // Flows forwarding to a deleted group go with it.
                let flow_ids: Vec<u64> = ld
                    .flows
                    .iter()
                    .filter(|f| group_ids.iter().any(|g| f.has_group(*g)))
                    .map(|f| f.key())
                    .collect();
                let updated = self.remove_from_root(ctx, &ld, &flow_ids, &group_ids).await?;
                self.store(updated).await.map(|_| ())
            }
        }
    }

    /// Applies a meter table modification. Meters are kept on the logical
    /// device only; deleting one removes the flows that use it.
    pub async fn update_meter_table(&self, ctx: &RequestContext, meter_mod: &MeterMod) -> Result<()> {
        let _guard = self.lock.write().await;
        let ld = self.current()?;
        let position = ld.meters.iter().position(|m| m.key() == meter_mod.meter_id);
        let meter_key = || format!("{}/{}", self.logical_device_id, meter_mod.meter_id);

        let updated = match (meter_mod.command, position) {
            (MeterModCommand::Add, Some(_)) => return Err(CoreError::already_exists("meter", meter_key())),
            (MeterModCommand::Add, None) => {
                let mut cloned = (*ld).clone();
                cloned.meters.push(MeterEntry::from_meter_mod(meter_mod));
                cloned
            }
            (MeterModCommand::Modify, None) => return Err(CoreError::not_found("meter", meter_key())),
            (MeterModCommand::Modify, Some(index)) => {
                let mut cloned = (*ld).clone();
                let meter = &mut cloned.meters[index];
                meter.flags = meter_mod.flags;
                meter.bands = meter_mod.bands.clone();
                cloned
            }
            (MeterModCommand::Delete, None) => return Ok(()),
            (MeterModCommand::Delete, Some(_)) => {
                let flow_ids: Vec<u64> = ld
                    .flows
                    .iter()
                    .filter(|f| f.meter_ids().contains(&meter_mod.meter_id))
                    .map(|f| f.key())
                    .collect();
                let mut cloned = if flow_ids.is_empty() {
                    (*ld).clone()
                } else {
                    self.remove_from_root(ctx, &ld, &flow_ids, &[]).await?
                };
                cloned.meters.retain(|m| m.meter_id != meter_mod.meter_id);
                cloned
            }
        };
        self.store(updated).await.map(|_| ())
    }

    /// Sends a controller packet out of the device port behind the
    /// packet's output port.
    pub async fn packet_out(&self, ctx: &RequestContext, packet: &PacketOut) -> Result<()> {
        let ld = self.get_logical_device().await?;
        let out_port = packet
            .output_port()
            .ok_or_else(|| CoreError::invalid_argument("packet-out without an output action"))?;
        let port = ld.port(out_port).ok_or_else(|| {
            CoreError::not_found("logical port", format!("{}/{}", self.logical_device_id, out_port))
        })?;
        self.devices
            .packet_out(ctx, &port.device_id, port.device_port_no, packet)
            .await
    }

    /// Publishes a packet received on `device_port_no` of `device_id`.
    pub async fn packet_in(&self, device_id: &str, device_port_no: u32, data: Vec<u8>) -> Result<()> {
        let ld = self.get_logical_device().await?;
        let port = ld
            .ports
            .iter()
            .find(|p| p.device_id == device_id && p.device_port_no == device_port_no)
            .ok_or_else(|| CoreError::not_found("logical port", format!("{}/{}", device_id, device_port_no)))?;
        self.events.send_packet_in(PacketIn {
            logical_device_id: self.logical_device_id.clone(),
            port_no: port.ofp_port.port_no,
            table_id: 0,
            cookie: 0,
            data,
        });
        Ok(())
    }

    /// True when one of this device's ports is backed by `device_id`.
    pub async fn has_ports_of(&self, device_id: &str) -> bool {
        self.get_logical_device()
            .await
            .map(|ld| ld.ports.iter().any(|p| p.device_id == device_id))
            .unwrap_or(false)
    }
}

fn selected(flow_mod: &FlowMod, flow: &FlowStats, strict: bool) -> bool {
    if strict {
        flow_mod.selects_strict(flow)
    } else {
        flow_mod.selects(flow)
    }
}

fn count_meter_references(ld: &mut LogicalDevice) {
    for meter in &mut ld.meters {
        meter.flow_count = ld
            .flows
            .iter()
            .filter(|f| f.meter_ids().contains(&meter.meter_id))
            .count() as u32;
    }
}
