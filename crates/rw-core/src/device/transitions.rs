//! Device state transition table.
//!
//! Maps a change of (admin, connect, oper) state on a parent or child
//! device to the side effects the core performs in response.

use rw_types::{AdminState, ConnectStatus, Device, OperStatus};
use std::fmt;

/// Side effects a device state change can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionHandler {
    /// Build the logical device of a root device.
    CreateLogicalDevice,
    /// Add the UNI ports of a child device to its logical device.
    SetupUniLogicalPorts,
    /// Remove the logical ports backed by a device.
    DeleteLogicalPorts,
    /// Disable every child of a parent device.
    DisableAllChildDevices,
    /// Delete every child of a parent device.
    DeleteAllChildDevices,
    /// Remove the logical device of a root device.
    DeleteLogicalDevice,
    /// Stop the agent and remove the device from the store.
    RemoveDevice,
}

impl fmt::Display for TransitionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransitionHandler::CreateLogicalDevice => "create_logical_device",
            TransitionHandler::SetupUniLogicalPorts => "setup_uni_logical_ports",
            TransitionHandler::DeleteLogicalPorts => "delete_logical_ports",
            TransitionHandler::DisableAllChildDevices => "disable_all_child_devices",
            TransitionHandler::DeleteAllChildDevices => "delete_all_child_devices",
            TransitionHandler::DeleteLogicalDevice => "delete_logical_device",
            TransitionHandler::RemoveDevice => "remove_device",
        };
        f.write_str(name)
    }
}

/// Which devices a transition applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    Parent,
    Child,
    Any,
}

impl DeviceRole {
    fn matches(&self, device: &Device) -> bool {
        match self {
            DeviceRole::Parent => device.root,
            DeviceRole::Child => !device.root,
            DeviceRole::Any => true,
        }
    }
}

/// A device state with optional wildcards; `None` matches anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatePattern {
    pub admin: Option<AdminState>,
    pub connect: Option<ConnectStatus>,
    pub oper: Option<OperStatus>,
}

impl StatePattern {
    pub const ANY: StatePattern = StatePattern {
        admin: None,
        connect: None,
        oper: None,
    };

    pub const fn admin(admin: AdminState) -> Self {
        StatePattern {
            admin: Some(admin),
            connect: None,
            oper: None,
        }
    }

    pub const fn exact(admin: AdminState, connect: ConnectStatus, oper: OperStatus) -> Self {
        StatePattern {
            admin: Some(admin),
            connect: Some(connect),
            oper: Some(oper),
        }
    }

    fn matches(&self, device: &Device) -> bool {
        self.admin.map_or(true, |s| s == device.admin_state)
            && self.connect.map_or(true, |s| s == device.connect_status)
            && self.oper.map_or(true, |s| s == device.oper_status)
    }

    /// Number of fields pinned to a value.
    fn specificity(&self) -> usize {
        usize::from(self.admin.is_some()) + usize::from(self.connect.is_some()) + usize::from(self.oper.is_some())
    }
}

/// One row of the table.
#[derive(Debug, Clone)]
pub struct Transition {
    pub role: DeviceRole,
    pub previous: StatePattern,
    pub current: StatePattern,
    pub handlers: Vec<TransitionHandler>,
}

/// The transition table consulted after every committed device change.
#[derive(Debug, Clone)]
pub struct TransitionMap {
    transitions: Vec<Transition>,
}

fn state_of(device: &Device) -> (AdminState, ConnectStatus, OperStatus) {
    (device.admin_state, device.connect_status, device.oper_status)
}

impl TransitionMap {
    pub fn new(transitions: Vec<Transition>) -> Self {
        Self { transitions }
    }

    /// Handlers for the change from `previous` to `current`.
    ///
    /// A change that leaves the state triple untouched triggers nothing.
    /// When several rows match, the most specific one wins.
    pub fn handlers(&self, previous: &Device, current: &Device) -> Vec<TransitionHandler> {
        if state_of(previous) == state_of(current) {
            return Vec::new();
        }
        self.transitions
            .iter()
            .filter(|t| t.role.matches(current) && t.previous.matches(previous) && t.current.matches(current))
            .max_by_key(|t| (t.current.specificity(), t.previous.specificity()))
            .map(|t| t.handlers.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}

impl Default for TransitionMap {
    fn default() -> Self {
        use AdminState::{Deleted, Disabled, Enabled};
        use TransitionHandler::*;

        let operational = StatePattern::exact(Enabled, ConnectStatus::Reachable, OperStatus::Active);
        TransitionMap::new(vec![
            Transition {
                role: DeviceRole::Parent,
                previous: StatePattern::ANY,
                current: operational,
                handlers: vec![CreateLogicalDevice],
            },
            Transition {
                role: DeviceRole::Child,
                previous: StatePattern::ANY,
                current: operational,
                handlers: vec![SetupUniLogicalPorts],
            },
            Transition {
                role: DeviceRole::Parent,
                previous: StatePattern::admin(Enabled),
                current: StatePattern::admin(Disabled),
                handlers: vec![DisableAllChildDevices],
            },
            Transition {
                role: DeviceRole::Child,
                previous: StatePattern::admin(Enabled),
                current: StatePattern::admin(Disabled),
                handlers: vec![DeleteLogicalPorts],
            },
            Transition {
                role: DeviceRole::Parent,
                previous: StatePattern::ANY,
                current: StatePattern::admin(Deleted),
                handlers: vec![DeleteAllChildDevices, DeleteLogicalDevice, RemoveDevice],
            },
            Transition {
                role: DeviceRole::Child,
                previous: StatePattern::ANY,
                current: StatePattern::admin(Deleted),
                handlers: vec![DeleteLogicalPorts, RemoveDevice],
            },
        ])
    }
}
