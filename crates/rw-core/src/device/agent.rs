//! Per-device actor.

use crate::adapter::{AdapterProxy, PortCapability, SwitchCapability};
use crate::error::{CoreError, Result};
use crate::flows::{reconcile, TableDelta};
use crate::request::RequestContext;
use async_trait::async_trait;
use rw_model::{CallbackEvent, CallbackKind, Proxy, Root, StoreError};
use rw_types::{
    AdminState, ConnectStatus, Device, DeviceAttribute, FlowStats, GroupEntry, Keyed, OperStatus,
    PacketOut, PeerPort, PmConfigs, Port, PortKey, PortType,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Side effects of a committed device change.
///
/// Invoked by an agent after it has released its own lock, so
/// implementations may call back into the same agent.
#[async_trait]
pub trait TransitionHook: Send + Sync {
    async fn process_transition(&self, previous: &Device, current: &Device) -> Result<()>;
}

/// Serialises every mutation of one device.
///
/// Each operation follows the same shape: take the device lock, read the
/// committed device, check the admin state, call the adapter if needed,
/// commit a modified copy, release the lock and run the transition hook.
/// A failed adapter call or store write leaves the device unchanged.
pub struct DeviceAgent {
    device_id: String,
    proxy: Proxy<Device>,
    adapter: Arc<dyn AdapterProxy>,
    lock: RwLock<()>,
    hook: Option<Weak<dyn TransitionHook>>,
}

impl DeviceAgent {
    pub fn new(
        device_id: impl Into<String>,
        devices: &Arc<Root<Device>>,
        adapter: Arc<dyn AdapterProxy>,
        hook: Option<Weak<dyn TransitionHook>>,
    ) -> Self {
        let device_id = device_id.into();
        let proxy = devices.proxy(devices.path_of(&device_id));
        Self {
            device_id,
            proxy,
            adapter,
            lock: RwLock::new(()),
            hook,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Persists `device` when given, otherwise loads the committed device,
    /// falling back to the backing store after a restart.
    pub async fn start(&self, device: Option<Device>) -> Result<Arc<Device>> {
        let _guard = self.lock.write().await;
        let device = match device {
            Some(device) => self
                .proxy
                .add(device, "")
                .await?
                .map(|r| r.data_arc())
                .ok_or_else(|| CoreError::not_found("device", &self.device_id))?,
            None => match self.proxy.get() {
                Ok(device) => device,
                Err(StoreError::NotFound { .. }) => self
                    .proxy
                    .root()
                    .load_path(self.proxy.path())
                    .await?
                    .ok_or_else(|| CoreError::not_found("device", &self.device_id))?,
                Err(e) => return Err(e.into()),
            },
        };

        let device_id = self.device_id.clone();
        self.proxy.register_callback(
            CallbackKind::PostUpdate,
            move |event: &CallbackEvent<Device>| {
                debug!(
                    device_id = %device_id,
                    txid = %event.txid,
                    admin_state = ?event.new.as_ref().map(|d| d.admin_state),
                    "Device updated in store"
                );
            },
        );
        info!(device_id = %self.device_id, "Device agent started");
        Ok(device)
    }

    pub fn stop(&self) {
        let dropped = self.proxy.unregister_all();
        info!(device_id = %self.device_id, callbacks = dropped, "Device agent stopped");
    }

    fn current(&self) -> Result<Arc<Device>> {
        self.proxy.get().map_err(|e| match e {
            StoreError::NotFound { .. } => CoreError::not_found("device", &self.device_id),
            other => other.into(),
        })
    }

    /// Commits `device`; must be called with the write lock held.
    async fn store(&self, device: Device) -> Result<Arc<Device>> {
        match self.proxy.update(device, "").await {
            Ok(Some(revision)) => Ok(revision.data_arc()),
            Ok(None) => Err(CoreError::not_found("device", &self.device_id)),
            Err(e) => {
                error!(device_id = %self.device_id, error = %e, "Failed to update device in store");
                Err(e.into())
            }
        }
    }

    async fn transition(&self, previous: &Device, current: &Device) -> Result<()> {
        let Some(hook) = self.hook.as_ref().and_then(Weak::upgrade) else {
            return Ok(());
        };
        hook.process_transition(previous, current).await.map_err(|e| {
            warn!(device_id = %self.device_id, error = %e, "Transition failed");
            e
        })
    }

    /// The committed device.
    pub async fn get_device(&self) -> Result<Arc<Device>> {
        let _guard = self.lock.read().await;
        self.current()
    }

    /// Adopts a preprovisioned device or re-enables a disabled one.
    pub async fn enable(&self, ctx: &RequestContext) -> Result<()> {
        let (previous, current) = {
            let _guard = self.lock.write().await;
            let device = self.current()?;
            debug!(device_id = %self.device_id, admin_state = %device.admin_state, "Enabling device");

            match device.admin_state {
                AdminState::Preprovisioned => {
                    ctx.run("adopt_device", self.adapter.adopt_device(&device)).await?
                }
                AdminState::Disabled => {
                    ctx.run("reenable_device", self.adapter.reenable_device(&device))
                        .await?
                }
                AdminState::Enabled => {
                    debug!(device_id = %self.device_id, "Device already enabled");
                    return Ok(());
                }
                other => {
                    return Err(CoreError::precondition(
                        &self.device_id,
                        format!("cannot enable a device in state {}", other),
                    ))
                }
            }

            let mut cloned = (*device).clone();
            cloned.admin_state = AdminState::Enabled;
            cloned.oper_status = OperStatus::Activating;
            let current = self.store(cloned).await?;
            (device, current)
        };
        self.transition(&previous, &current).await
    }

    /// Disables the device and every port on it.
    pub async fn disable(&self, ctx: &RequestContext) -> Result<()> {
        let (previous, current) = {
            let _guard = self.lock.write().await;
            let device = self.current()?;
            if matches!(device.admin_state, AdminState::Disabled | AdminState::Deleted) {
                return Err(CoreError::precondition(
                    &self.device_id,
                    format!("cannot disable a device in state {}", device.admin_state),
                ));
            }

            ctx.run("disable_device", self.adapter.disable_device(&device))
                .await?;

            let mut cloned = (*device).clone();
            cloned.admin_state = AdminState::Disabled;
            for port in &mut cloned.ports {
                port.admin_state = AdminState::Disabled;
                port.oper_status = OperStatus::Unknown;
            }
            let current = self.store(cloned).await?;
            (device, current)
        };
        self.transition(&previous, &current).await
    }

    /// Asks the adapter to reboot a disabled device. Nothing is stored.
    pub async fn reboot(&self, ctx: &RequestContext) -> Result<()> {
        let _guard = self.lock.write().await;
        let device = self.current()?;
        self.expect_disabled(&device)?;
        ctx.run("reboot_device", self.adapter.reboot_device(&device))
            .await
    }

    /// Marks a disabled device deleted; the transition hook removes it.
    pub async fn delete(&self, ctx: &RequestContext) -> Result<()> {
        let (previous, current) = {
            let _guard = self.lock.write().await;
            let device = self.current()?;
            self.expect_disabled(&device)?;

            ctx.run("delete_device", self.adapter.delete_device(&device))
                .await?;

            let mut cloned = (*device).clone();
            cloned.admin_state = AdminState::Deleted;
            let current = self.store(cloned).await?;
            (device, current)
        };
        self.transition(&previous, &current).await
    }

    fn expect_disabled(&self, device: &Device) -> Result<()> {
        if device.admin_state != AdminState::Disabled {
            return Err(CoreError::precondition(
                &self.device_id,
                format!(
                    "expected admin state {}, found {}",
                    AdminState::Disabled,
                    device.admin_state
                ),
            ));
        }
        Ok(())
    }

    pub async fn get_ports(&self, port_type: PortType) -> Result<Vec<Port>> {
        let _guard = self.lock.read().await;
        Ok(self.current()?.ports_of_type(port_type))
    }

    /// Switch description of a root device, as reported by its adapter.
    pub async fn get_switch_capability(&self, ctx: &RequestContext) -> Result<SwitchCapability> {
        let device = self.get_device().await?;
        ctx.run("get_ofp_device_info", self.adapter.get_ofp_device_info(&device))
            .await
    }

    pub async fn get_port_capability(&self, ctx: &RequestContext, port_no: u32) -> Result<PortCapability> {
        let device = self.get_device().await?;
        ctx.run(
            "get_ofp_port_info",
            self.adapter.get_ofp_port_info(&device, port_no),
        )
        .await
    }

    /// Takes the adapter-owned attributes of `reported` into the stored device.
    pub async fn update_device_from_adapter(&self, reported: &Device) -> Result<()> {
        self.update_attributes(reported.adapter_attributes()).await
    }

    pub async fn update_attributes(&self, attributes: Vec<DeviceAttribute>) -> Result<()> {
        self.mutate("update_attributes", |device| {
            for attribute in attributes {
                device.apply(attribute);
            }
            Ok(())
        })
        .await
    }

    /// Updates oper and connect status; `None` leaves a field as is.
    pub async fn update_device_status(
        &self,
        oper_status: Option<OperStatus>,
        connect_status: Option<ConnectStatus>,
    ) -> Result<()> {
        self.mutate("update_device_status", |device| {
            if let Some(oper_status) = oper_status {
                device.oper_status = oper_status;
            }
            if let Some(connect_status) = connect_status {
                device.connect_status = connect_status;
            }
            Ok(())
        })
        .await
    }

    /// Sets the oper status of one port. An active port is also enabled.
    pub async fn update_port_state(&self, port_type: PortType, port_no: u32, oper_status: OperStatus) -> Result<()> {
        let device_id = self.device_id.clone();
        self.mutate("update_port_state", move |device| {
            let key = PortKey { port_no, port_type };
            let port = device
                .port_mut(key)
                .ok_or_else(|| CoreError::not_found("port", format!("{}/{}", device_id, key)))?;
            port.oper_status = oper_status;
            if oper_status == OperStatus::Active {
                port.admin_state = AdminState::Enabled;
            }
            Ok(())
        })
        .await
    }

    /// Appends a port. An active port is also enabled.
    pub async fn add_port(&self, mut port: Port) -> Result<()> {
        let device_id = self.device_id.clone();
        self.mutate("add_port", move |device| {
            if device.port(port.key()).is_some() {
                return Err(CoreError::already_exists(
                    "port",
                    format!("{}/{}", device_id, port.key()),
                ));
            }
            if port.oper_status == OperStatus::Active {
                port.admin_state = AdminState::Enabled;
            }
            device.ports.push(port);
            Ok(())
        })
        .await
    }

    /// Records `peer` on the local port with the same port number.
    pub async fn add_peer_port(&self, peer: PeerPort) -> Result<()> {
        let device_id = self.device_id.clone();
        self.mutate("add_peer_port", move |device| {
            let port = device
                .ports
                .iter_mut()
                .find(|p| p.port_no == peer.port_no)
                .ok_or_else(|| CoreError::not_found("port", format!("{}/{}", device_id, peer.port_no)))?;
            if !port.peers.contains(&peer) {
                port.peers.push(peer);
            }
            Ok(())
        })
        .await
    }

    /// Stores PM configs reported by the adapter.
    pub async fn update_pm_configs(&self, configs: PmConfigs) -> Result<()> {
        self.mutate("update_pm_configs", |device| {
            device.pm_configs = Some(configs);
            Ok(())
        })
        .await
    }

    /// Pushes PM configs requested northbound to the adapter, then stores them.
    pub async fn apply_pm_configs(&self, ctx: &RequestContext, configs: PmConfigs) -> Result<()> {
        let _guard = self.lock.write().await;
        let device = self.current()?;
        ctx.run("update_pm_config", self.adapter.update_pm_config(&device, &configs))
            .await?;
        let mut cloned = (*device).clone();
        cloned.pm_configs = Some(configs);
        self.store(cloned).await.map(|_| ())
    }

    /// Merges `flows` and `groups` into the device tables.
    ///
    /// Only the difference is sent to the adapter. Entries the device has
    /// but the caller does not mention are left in place.
    pub async fn update_flows_and_groups(
        &self,
        ctx: &RequestContext,
        flows: &[FlowStats],
        groups: &[GroupEntry],
    ) -> Result<()> {
        let _guard = self.lock.write().await;
        let device = self.current()?;
        let flow_delta = reconcile(flows, &device.flows);
        let group_delta = reconcile(groups, &device.flow_groups);
        self.program(ctx, &device, flow_delta, group_delta).await
    }

    /// Removes the flows and groups with the given keys from the device.
    pub async fn remove_flows_and_groups(
        &self,
        ctx: &RequestContext,
        flow_ids: &[u64],
        group_ids: &[u32],
    ) -> Result<()> {
        let _guard = self.lock.write().await;
        let device = self.current()?;
        let flow_delta = removal(&device.flows, flow_ids);
        let group_delta = removal(&device.flow_groups, group_ids);
        self.program(ctx, &device, flow_delta, group_delta).await
    }

    async fn program(
        &self,
        ctx: &RequestContext,
        device: &Device,
        flows: TableDelta<FlowStats>,
        groups: TableDelta<GroupEntry>,
    ) -> Result<()> {
        if flows.is_empty() && groups.is_empty() {
            debug!(device_id = %self.device_id, "Flow tables already up to date");
            return Ok(());
        }
        debug!(
            device_id = %self.device_id,
            flows_added = flows.to_add.len(),
            flows_deleted = flows.to_delete.len(),
            groups_added = groups.to_add.len(),
            groups_deleted = groups.to_delete.len(),
            "Programming flow tables"
        );
        ctx.run(
            "update_flows_incremental",
            self.adapter.update_flows_incremental(device, &flows, &groups),
        )
        .await?;

        let mut cloned = device.clone();
        cloned.flows = flows.in_force;
        cloned.flow_groups = groups.in_force;
        self.store(cloned).await.map(|_| ())
    }

    /// Sends a controller packet out of `egress_port`.
    pub async fn packet_out(&self, ctx: &RequestContext, egress_port: u32, packet: &PacketOut) -> Result<()> {
        let device = self.get_device().await?;
        if !device.is_operational() {
            return Err(CoreError::precondition(
                &self.device_id,
                "device is not operational",
            ));
        }
        ctx.run(
            "packet_out",
            self.adapter.packet_out(&device, egress_port, packet),
        )
        .await
    }

    /// Lock, read, clone, mutate, commit, unlock, transition.
    async fn mutate<F>(&self, operation: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Device) -> Result<()>,
    {
        let (previous, current) = {
            let _guard = self.lock.write().await;
            let device = self.current()?;
            let mut cloned = (*device).clone();
            apply(&mut cloned)?;
            debug!(device_id = %self.device_id, operation, "Updating device");
            let current = self.store(cloned).await?;
            (device, current)
        };
        self.transition(&previous, &current).await
    }
}

/// A delta that deletes the entries of `existing` whose keys are listed.
fn removal<E>(existing: &[E], keys: &[E::Key]) -> TableDelta<E>
where
    E: Keyed + Clone,
{
    let keys: BTreeSet<&E::Key> = keys.iter().collect();
    let (to_delete, in_force): (Vec<E>, Vec<E>) = existing
        .iter()
        .cloned()
        .partition(|e| keys.contains(&e.key()));
    TableDelta {
        to_add: Vec::new(),
        to_delete,
        in_force,
    }
}
