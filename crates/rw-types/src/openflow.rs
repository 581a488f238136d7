//! OpenFlow-style flow, group and meter records.
//!
//! Only the subset of OpenFlow 1.3 that the core stores and reconciles is
//! modelled here. Adapters translate these records into device programming.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Debug;
use std::hash::Hash;

/// Table id meaning "every table" in delete requests.
pub const OFPTT_ALL: u32 = 0xff;

/// Group id meaning "every group" in group delete requests.
pub const OFPG_ALL: u32 = 0xffff_fffc;

/// Group id wildcard for flow delete filters.
pub const OFPG_ANY: u32 = 0xffff_ffff;

/// Port number wildcard for flow delete filters.
pub const OFPP_ANY: u32 = 0xffff_ffff;

/// Reserved port number for the controller.
pub const OFPP_CONTROLLER: u32 = 0xffff_fffd;

/// An entry with a stable identity inside its table.
///
/// Reconciliation pairs desired and existing entries by key and compares
/// them by full content.
pub trait Keyed {
    type Key: Ord + Hash + Clone + Debug;

    fn key(&self) -> Self::Key;
}

/// A single OXM match criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "field", content = "value")]
pub enum MatchField {
    InPort(u32),
    EthType(u16),
    VlanVid(u16),
    VlanPcp(u8),
    IpProto(u8),
    UdpSrc(u16),
    UdpDst(u16),
    Metadata(u64),
    TunnelId(u64),
}

/// A flow or bucket action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Action {
    Output { port: u32 },
    PushVlan { ethertype: u16 },
    PopVlan,
    SetField { field: MatchField },
    Group { group_id: u32 },
}

/// A flow instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Instruction {
    ApplyActions { actions: Vec<Action> },
    WriteMetadata { metadata: u64 },
    GotoTable { table_id: u32 },
    Meter { meter_id: u32 },
}

/// An installed flow entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FlowStats {
    pub id: u64,
    pub table_id: u32,
    pub priority: u32,
    pub idle_timeout: u32,
    pub hard_timeout: u32,
    pub flags: u32,
    pub cookie: u64,
    pub packet_count: u64,
    pub byte_count: u64,
    #[serde(default)]
    pub match_fields: Vec<MatchField>,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
}

impl FlowStats {
    /// Builds the table entry described by an add or modify request.
    pub fn from_flow_mod(flow_mod: &FlowMod) -> Self {
        let mut flow = FlowStats {
            id: 0,
            table_id: flow_mod.table_id,
            priority: flow_mod.priority,
            idle_timeout: flow_mod.idle_timeout,
            hard_timeout: flow_mod.hard_timeout,
            flags: flow_mod.flags,
            cookie: flow_mod.cookie,
            packet_count: 0,
            byte_count: 0,
            match_fields: flow_mod.match_fields.clone(),
            instructions: flow_mod.instructions.clone(),
        };
        flow.id = flow.compute_id();
        flow
    }

    /// Derives the flow id from table, priority and match.
    ///
    /// Two flows with the same match at the same priority in the same table
    /// are the same OpenFlow entry, so they share an id.
    pub fn compute_id(&self) -> u64 {
        let mut fields = self.match_fields.clone();
        fields.sort();
        let encoded = serde_json::to_vec(&(self.table_id, self.priority, &fields)).unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(&encoded);
        let digest = hasher.finalize();

        let mut id = [0u8; 8];
        id.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(id)
    }

    /// True when the flow's cookie equals `cookie` under `mask`.
    pub fn cookie_matches(&self, cookie: u64, mask: u64) -> bool {
        self.cookie & mask == cookie & mask
    }

    /// True when every field in `fields` is also present in this flow.
    pub fn match_contains(&self, fields: &[MatchField]) -> bool {
        fields.iter().all(|f| self.match_fields.contains(f))
    }

    /// True when the flow has exactly the given match, ignoring order.
    pub fn match_equals(&self, fields: &[MatchField]) -> bool {
        self.match_fields.len() == fields.len() && self.match_contains(fields)
    }

    /// True when the flow outputs to `port` in any apply-actions instruction.
    pub fn has_output(&self, port: u32) -> bool {
        self.actions().any(|a| matches!(a, Action::Output { port: p } if *p == port))
    }

    /// True when the flow forwards to `group_id`.
    pub fn has_group(&self, group_id: u32) -> bool {
        self.actions().any(|a| matches!(a, Action::Group { group_id: g } if *g == group_id))
    }

    /// Meter ids referenced by this flow.
    pub fn meter_ids(&self) -> Vec<u32> {
        self.instructions
            .iter()
            .filter_map(|i| match i {
                Instruction::Meter { meter_id } => Some(*meter_id),
                _ => None,
            })
            .collect()
    }

    fn actions(&self) -> impl Iterator<Item = &Action> {
        self.instructions.iter().flat_map(|i| match i {
            Instruction::ApplyActions { actions } => actions.as_slice(),
            _ => &[][..],
        })
    }
}

impl Keyed for FlowStats {
    type Key = u64;

    fn key(&self) -> u64 {
        self.id
    }
}

/// Flow table modification command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowModCommand {
    Add,
    Modify,
    ModifyStrict,
    Delete,
    DeleteStrict,
}

/// A flow table modification request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowMod {
    pub command: FlowModCommand,
    pub cookie: u64,
    pub cookie_mask: u64,
    pub table_id: u32,
    pub idle_timeout: u32,
    pub hard_timeout: u32,
    pub priority: u32,
    pub out_port: u32,
    pub out_group: u32,
    pub flags: u32,
    #[serde(default)]
    pub match_fields: Vec<MatchField>,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
}

impl Default for FlowMod {
    fn default() -> Self {
        FlowMod {
            command: FlowModCommand::Add,
            cookie: 0,
            cookie_mask: 0,
            table_id: 0,
            idle_timeout: 0,
            hard_timeout: 0,
            priority: 0,
            out_port: OFPP_ANY,
            out_group: OFPG_ANY,
            flags: 0,
            match_fields: Vec::new(),
            instructions: Vec::new(),
        }
    }
}

impl FlowMod {
    /// True when a non-strict delete or modify request selects `flow`.
    pub fn selects(&self, flow: &FlowStats) -> bool {
        (self.table_id == OFPTT_ALL || self.table_id == flow.table_id)
            && flow.cookie_matches(self.cookie, self.cookie_mask)
            && flow.match_contains(&self.match_fields)
            && (self.out_port == OFPP_ANY || flow.has_output(self.out_port))
            && (self.out_group == OFPG_ANY || flow.has_group(self.out_group))
    }

    /// True when a strict delete or modify request selects `flow`.
    pub fn selects_strict(&self, flow: &FlowStats) -> bool {
        self.table_id == flow.table_id
            && self.priority == flow.priority
            && flow.match_equals(&self.match_fields)
            && flow.cookie_matches(self.cookie, self.cookie_mask)
    }
}

/// Group type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupType {
    #[default]
    All,
    Select,
    Indirect,
    FastFailover,
}

/// One bucket of a group.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Bucket {
    pub weight: u32,
    pub watch_port: u32,
    pub watch_group: u32,
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// Group description.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupDesc {
    pub group_type: GroupType,
    pub group_id: u32,
    #[serde(default)]
    pub buckets: Vec<Bucket>,
}

/// An installed group.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupEntry {
    pub desc: GroupDesc,
}

impl GroupEntry {
    pub fn from_group_mod(group_mod: &GroupMod) -> Self {
        GroupEntry {
            desc: GroupDesc {
                group_type: group_mod.group_type,
                group_id: group_mod.group_id,
                buckets: group_mod.buckets.clone(),
            },
        }
    }
}

impl Keyed for GroupEntry {
    type Key = u32;

    fn key(&self) -> u32 {
        self.desc.group_id
    }
}

/// Group table modification command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupModCommand {
    Add,
    Modify,
    Delete,
}

/// A group table modification request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMod {
    pub command: GroupModCommand,
    pub group_type: GroupType,
    pub group_id: u32,
    #[serde(default)]
    pub buckets: Vec<Bucket>,
}

/// Meter band type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeterBandType {
    #[default]
    Drop,
    DscpRemark,
}

/// A meter band.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MeterBand {
    pub band_type: MeterBandType,
    pub rate: u32,
    pub burst_size: u32,
}

/// An installed meter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MeterEntry {
    pub meter_id: u32,
    pub flags: u32,
    #[serde(default)]
    pub bands: Vec<MeterBand>,
    /// Number of flows referencing the meter.
    pub flow_count: u32,
}

impl MeterEntry {
    pub fn from_meter_mod(meter_mod: &MeterMod) -> Self {
        MeterEntry {
            meter_id: meter_mod.meter_id,
            flags: meter_mod.flags,
            bands: meter_mod.bands.clone(),
            flow_count: 0,
        }
    }
}

impl Keyed for MeterEntry {
    type Key = u32;

    fn key(&self) -> u32 {
        self.meter_id
    }
}

/// Meter table modification command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeterModCommand {
    Add,
    Modify,
    Delete,
}

/// A meter table modification request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterMod {
    pub command: MeterModCommand,
    pub meter_id: u32,
    pub flags: u32,
    #[serde(default)]
    pub bands: Vec<MeterBand>,
}

/// A packet received on a logical port and forwarded to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PacketIn {
    pub logical_device_id: String,
    pub port_no: u32,
    pub table_id: u32,
    pub cookie: u64,
    pub data: Vec<u8>,
}

/// A packet sent by the controller out of a logical device.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PacketOut {
    pub in_port: u32,
    #[serde(default)]
    pub actions: Vec<Action>,
    pub data: Vec<u8>,
}

impl PacketOut {
    /// First output port named by the actions, if any.
    pub fn output_port(&self) -> Option<u32> {
        self.actions.iter().find_map(|a| match a {
            Action::Output { port } => Some(*port),
            _ => None,
        })
    }
}
