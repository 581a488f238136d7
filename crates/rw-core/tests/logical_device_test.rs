//! Logical devices: ports, flow/group/meter tables, packets and events.

mod common;

use common::{ctx, olt, port, Harness, MockAdapter, NNI_PORT, UNI_PORT};
use pretty_assertions::assert_eq;
use rw_core::{ChangeEvent, CoreError, DeviceManager, ErrorCode, EventFeeds, LogicalDeviceManager, StreamEnd};
use rw_model::{MemoryKvClient, Root, StoreOptions};
use rw_types::{
    Action, Bucket, ConnectStatus, FlowMod, FlowModCommand, GroupMod, GroupModCommand, GroupType, Instruction,
    MacAddress, MatchField, MeterBand, MeterBandType, MeterMod, MeterModCommand, OperStatus, PacketOut, PortReason,
    PortType, OFPG_ALL,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const OLT_MAC: &str = "00:0c:e2:31:40:00";

fn flow_add(in_port: u32, vlan: u16, out_port: u32) -> FlowMod {
    FlowMod {
        command: FlowModCommand::Add,
        priority: 1000,
        match_fields: vec![MatchField::InPort(in_port), MatchField::VlanVid(vlan)],
        instructions: vec![Instruction::ApplyActions {
            actions: vec![Action::Output { port: out_port }],
        }],
        ..FlowMod::default()
    }
}

fn metered(mut flow_mod: FlowMod, meter_id: u32) -> FlowMod {
    flow_mod.instructions.push(Instruction::Meter { meter_id });
    flow_mod
}

fn meter_add(meter_id: u32) -> MeterMod {
    MeterMod {
        command: MeterModCommand::Add,
        meter_id,
        flags: 1,
        bands: vec![MeterBand {
            band_type: MeterBandType::Drop,
            rate: 1_000_000,
            burst_size: 5000,
        }],
    }
}

fn group_mod(command: GroupModCommand, group_id: u32, out_port: u32) -> GroupMod {
    GroupMod {
        command,
        group_type: GroupType::All,
        group_id,
        buckets: vec![Bucket {
            actions: vec![Action::Output { port: out_port }],
            ..Bucket::default()
        }],
    }
}

/// An OLT with one active ONU; returns (olt, onu, logical device, uni ofp port).
async fn topology(h: &Harness) -> (String, String, String, u32) {
    let (olt_id, ld_id) = h.bring_up_olt(OLT_MAC).await;
    let onu_id = h.bring_up_onu(&olt_id, 1).await;
    let ld = h.logical.get_logical_device(&ld_id).await.unwrap();
    let uni = ld
        .ports
        .iter()
        .find(|p| p.device_id == onu_id)
        .map(|p| p.ofp_port.port_no)
        .expect("uni logical port");
    (olt_id, onu_id, ld_id, uni)
}

#[tokio::test]
async fn test_logical_device_built_from_root() {
    let h = Harness::new();
    let (olt_id, ld_id) = h.bring_up_olt(OLT_MAC).await;

    let ld = h.logical.get_logical_device(&ld_id).await.unwrap();
    let mac: MacAddress = OLT_MAC.parse().unwrap();
    assert_eq!(ld.root_device_id, olt_id);
    assert_eq!(ld.datapath_id, mac.to_u64());
    assert_eq!(ld.desc.mfr_desc, "VOLTHA Project");
    assert_eq!(ld.switch_features.n_tables, 2);
    assert_eq!(ld.ports.len(), 1);
    assert_eq!(ld.ports[0].device_id, olt_id);
    assert_eq!(ld.ports[0].device_port_no, NNI_PORT);
    assert!(ld.ports[0].root_port);

    let statuses = h.events.port_statuses();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].reason, PortReason::Add);
    assert_eq!(statuses[0].logical_device_id, ld_id);
    assert_eq!(h.logical.list_logical_device_ids(), vec![ld_id]);
}

#[tokio::test]
async fn test_create_logical_device_is_idempotent() {
    let h = Harness::new();
    let (olt_id, ld_id) = h.bring_up_olt(OLT_MAC).await;
    let olt = h.devices.get_device(&olt_id).await.unwrap();

    let again = h.logical.create_logical_device(&ctx(), &olt).await.unwrap();
    assert_eq!(again, ld_id);
    assert_eq!(h.logical.list_logical_devices().len(), 1);
}

#[tokio::test]
async fn test_create_logical_device_rejects_child() {
    let h = Harness::new();
    let (olt_id, _) = h.bring_up_olt(OLT_MAC).await;
    let onu_id = h.bring_up_onu(&olt_id, 1).await;
    let onu = h.devices.get_device(&onu_id).await.unwrap();

    let err = h.logical.create_logical_device(&ctx(), &onu).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

#[tokio::test]
async fn test_onu_activation_adds_uni_port() {
    let h = Harness::new();
    let (_, onu_id, ld_id, uni) = topology(&h).await;

    let ports = h.logical.list_logical_ports(&ld_id).await.unwrap();
    assert_eq!(ports.len(), 2);
    let port = ports.iter().find(|p| p.ofp_port.port_no == uni).unwrap();
    assert_eq!(port.device_id, onu_id);
    assert_eq!(port.device_port_no, UNI_PORT);
    assert!(!port.root_port);

    let reasons: Vec<PortReason> = h.events.port_statuses().iter().map(|s| s.reason).collect();
    assert_eq!(reasons, vec![PortReason::Add, PortReason::Add]);

    // Re-running the setup adds nothing.
    let onu = h.devices.get_device(&onu_id).await.unwrap();
    h.logical.setup_uni_logical_ports(&ctx(), &onu).await.unwrap();
    assert_eq!(h.logical.list_logical_ports(&ld_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_onu_disable_removes_its_logical_ports() {
    let h = Harness::new();
    let (_, onu_id, ld_id, uni) = topology(&h).await;

    h.devices.disable_device(&ctx(), &onu_id).await.unwrap();
    let ports = h.logical.list_logical_ports(&ld_id).await.unwrap();
    assert_eq!(ports.len(), 1);
    assert!(ports.iter().all(|p| p.device_id != onu_id));

    let last = h.events.port_statuses().pop().unwrap();
    assert_eq!(last.reason, PortReason::Delete);
    assert_eq!(last.desc.port_no, uni);
}

#[tokio::test]
async fn test_logical_port_enable_disable() {
    let h = Harness::new();
    let (_, _, ld_id, uni) = topology(&h).await;
    let port_id = h
        .logical
        .list_logical_ports(&ld_id)
        .await
        .unwrap()
        .into_iter()
        .find(|p| p.ofp_port.port_no == uni)
        .map(|p| p.id)
        .unwrap();

    h.logical.disable_logical_port(&ld_id, &port_id).await.unwrap();
    let ld = h.logical.get_logical_device(&ld_id).await.unwrap();
    assert!(ld.port(uni).unwrap().ofp_port.is_down());
    assert_eq!(h.events.port_statuses().pop().unwrap().reason, PortReason::Modify);

    let events_before = h.events.port_statuses().len();
    h.logical.disable_logical_port(&ld_id, &port_id).await.unwrap();
    assert_eq!(h.events.port_statuses().len(), events_before);

    h.logical.enable_logical_port(&ld_id, &port_id).await.unwrap();
    let ld = h.logical.get_logical_device(&ld_id).await.unwrap();
    assert!(!ld.port(uni).unwrap().ofp_port.is_down());

    let err = h.logical.enable_logical_port(&ld_id, "no-such-port").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn test_flow_add_programs_root_device() {
    let h = Harness::new();
    let (olt_id, _, ld_id, uni) = topology(&h).await;

    h.logical
        .update_flow_table(&ctx(), &ld_id, &flow_add(uni, 100, NNI_PORT))
        .await
        .unwrap();

    let flows = h.logical.list_flows(&ld_id).await.unwrap();
    assert_eq!(flows.len(), 1);
    assert_eq!(flows[0].id, flows[0].compute_id());
    let olt = h.devices.get_device(&olt_id).await.unwrap();
    assert_eq!(olt.flows, flows);

    let updates = h.adapter.flow_updates();
    assert_eq!(updates.len(), 1);
    let (device_id, flow_delta, _) = &updates[0];
    assert_eq!(device_id, &olt_id);
    assert_eq!(flow_delta.to_add, flows);
    assert!(flow_delta.to_delete.is_empty());

    // Adding the same flow again changes nothing.
    h.logical
        .update_flow_table(&ctx(), &ld_id, &flow_add(uni, 100, NNI_PORT))
        .await
        .unwrap();
    assert_eq!(h.adapter.flow_updates().len(), 1);
}

#[tokio::test]
async fn test_flow_add_replaces_same_match() {
    let h = Harness::new();
    let (olt_id, _, ld_id, uni) = topology(&h).await;
    h.logical
        .update_flow_table(&ctx(), &ld_id, &flow_add(uni, 100, NNI_PORT))
        .await
        .unwrap();
    h.logical
        .update_flow_table(&ctx(), &ld_id, &flow_add(uni, 200, NNI_PORT))
        .await
        .unwrap();

    // Same match and priority, new actions.
    h.logical
        .update_flow_table(&ctx(), &ld_id, &flow_add(uni, 100, 7))
        .await
        .unwrap();

    let flows = h.logical.list_flows(&ld_id).await.unwrap();
    assert_eq!(flows.len(), 2);
    assert!(flows.iter().any(|f| f.has_output(7)));
    let (_, delta, _) = h.adapter.flow_updates().pop().unwrap();
    assert_eq!(delta.to_add.len(), 1);
    assert_eq!(delta.to_delete.len(), 1);
    assert_eq!(delta.in_force.len(), 2);
    assert_eq!(h.devices.get_device(&olt_id).await.unwrap().flows.len(), 2);
}

#[tokio::test]
async fn test_adapter_failure_leaves_tables_unchanged() {
    let h = Harness::new();
    let (olt_id, _, ld_id, uni) = topology(&h).await;
    h.adapter.fail_on("update_flows_incremental");

    let err = h
        .logical
        .update_flow_table(&ctx(), &ld_id, &flow_add(uni, 100, NNI_PORT))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Adapter(_)));
    assert!(h.logical.list_flows(&ld_id).await.unwrap().is_empty());
    assert!(h.devices.get_device(&olt_id).await.unwrap().flows.is_empty());
}

#[tokio::test]
async fn test_flow_delete_and_modify() {
    let h = Harness::new();
    let (olt_id, _, ld_id, uni) = topology(&h).await;
    for vlan in [100, 101, 102] {
        h.logical
            .update_flow_table(&ctx(), &ld_id, &flow_add(uni, vlan, NNI_PORT))
            .await
            .unwrap();
    }

    let modify = FlowMod {
        command: FlowModCommand::ModifyStrict,
        instructions: vec![Instruction::ApplyActions {
            actions: vec![Action::Output { port: 9 }],
        }],
        ..flow_add(uni, 101, NNI_PORT)
    };
    h.logical.update_flow_table(&ctx(), &ld_id, &modify).await.unwrap();
    let flows = h.logical.list_flows(&ld_id).await.unwrap();
    assert_eq!(flows.iter().filter(|f| f.has_output(9)).count(), 1);

    let strict_delete = FlowMod {
        command: FlowModCommand::DeleteStrict,
        ..flow_add(uni, 100, NNI_PORT)
    };
    h.logical.update_flow_table(&ctx(), &ld_id, &strict_delete).await.unwrap();
    assert_eq!(h.logical.list_flows(&ld_id).await.unwrap().len(), 2);

    // Non-strict delete on in_port removes every remaining flow.
    let delete = FlowMod {
        command: FlowModCommand::Delete,
        match_fields: vec![MatchField::InPort(uni)],
        ..FlowMod::default()
    };
    h.logical.update_flow_table(&ctx(), &ld_id, &delete).await.unwrap();
    assert!(h.logical.list_flows(&ld_id).await.unwrap().is_empty());
    assert!(h.devices.get_device(&olt_id).await.unwrap().flows.is_empty());

    // Nothing selected: no adapter call.
    let updates = h.adapter.flow_updates().len();
    h.logical.update_flow_table(&ctx(), &ld_id, &delete).await.unwrap();
    assert_eq!(h.adapter.flow_updates().len(), updates);
}

#[tokio::test]
async fn test_meters_and_metered_flows() {
    let h = Harness::new();
    let (_, _, ld_id, uni) = topology(&h).await;

    let err = h
        .logical
        .update_flow_table(&ctx(), &ld_id, &metered(flow_add(uni, 100, NNI_PORT), 1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    h.logical.update_meter_table(&ctx(), &ld_id, &meter_add(1)).await.unwrap();
    let err = h
        .logical
        .update_meter_table(&ctx(), &ld_id, &meter_add(1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyExists);

    h.logical
        .update_flow_table(&ctx(), &ld_id, &metered(flow_add(uni, 100, NNI_PORT), 1))
        .await
        .unwrap();
    h.logical
        .update_flow_table(&ctx(), &ld_id, &flow_add(uni, 200, NNI_PORT))
        .await
        .unwrap();
    let meters = h.logical.list_meters(&ld_id).await.unwrap();
    assert_eq!(meters[0].flow_count, 1);

    let modify = MeterMod {
        command: MeterModCommand::Modify,
        flags: 5,
        ..meter_add(1)
    };
    h.logical.update_meter_table(&ctx(), &ld_id, &modify).await.unwrap();
    assert_eq!(h.logical.list_meters(&ld_id).await.unwrap()[0].flags, 5);

    let delete = MeterMod {
        command: MeterModCommand::Delete,
        ..meter_add(1)
    };
    h.logical.update_meter_table(&ctx(), &ld_id, &delete).await.unwrap();
    assert!(h.logical.list_meters(&ld_id).await.unwrap().is_empty());
    let flows = h.logical.list_flows(&ld_id).await.unwrap();
    assert_eq!(flows.len(), 1);
    assert!(flows[0].meter_ids().is_empty());

    let err = h.logical.update_meter_table(&ctx(), &ld_id, &modify).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn test_group_table() {
    let h = Harness::new();
    let (olt_id, _, ld_id, uni) = topology(&h).await;

    h.logical
        .update_group_table(&ctx(), &ld_id, &group_mod(GroupModCommand::Add, 10, NNI_PORT))
        .await
        .unwrap();
    let err = h
        .logical
        .update_group_table(&ctx(), &ld_id, &group_mod(GroupModCommand::Add, 10, NNI_PORT))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyExists);
    let err = h
        .logical
        .update_group_table(&ctx(), &ld_id, &group_mod(GroupModCommand::Modify, 11, NNI_PORT))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);

    h.logical
        .update_group_table(&ctx(), &ld_id, &group_mod(GroupModCommand::Modify, 10, 5))
        .await
        .unwrap();
    let groups = h.logical.list_flow_groups(&ld_id).await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].desc.buckets[0].actions, vec![Action::Output { port: 5 }]);
    assert_eq!(h.devices.get_device(&olt_id).await.unwrap().flow_groups, groups);

    let to_group = FlowMod {
        instructions: vec![Instruction::ApplyActions {
            actions: vec![Action::Group { group_id: 10 }],
        }],
        ..flow_add(uni, 300, NNI_PORT)
    };
    h.logical.update_flow_table(&ctx(), &ld_id, &to_group).await.unwrap();
    h.logical
        .update_flow_table(&ctx(), &ld_id, &flow_add(uni, 301, NNI_PORT))
        .await
        .unwrap();

    h.logical
        .update_group_table(&ctx(), &ld_id, &group_mod(GroupModCommand::Delete, OFPG_ALL, 0))
        .await
        .unwrap();
    assert!(h.logical.list_flow_groups(&ld_id).await.unwrap().is_empty());
    let flows = h.logical.list_flows(&ld_id).await.unwrap();
    assert_eq!(flows.len(), 1);
    assert!(!flows[0].has_group(10));

    let olt = h.devices.get_device(&olt_id).await.unwrap();
    assert!(olt.flow_groups.is_empty());
    assert_eq!(olt.flows, flows);
}

#[tokio::test]
async fn test_packet_out_reaches_device_port() {
    let h = Harness::new();
    let (_, onu_id, ld_id, uni) = topology(&h).await;

    let packet = PacketOut {
        in_port: 0xffff_fffd,
        actions: vec![Action::Output { port: uni }],
        data: vec![0xde, 0xad],
    };
    h.logical.packet_out(&ctx(), &ld_id, &packet).await.unwrap();
    assert_eq!(h.adapter.packets_out(), vec![(onu_id.clone(), UNI_PORT, packet)]);

    let no_output = PacketOut {
        data: vec![1],
        ..PacketOut::default()
    };
    let err = h.logical.packet_out(&ctx(), &ld_id, &no_output).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    let unknown_port = PacketOut {
        actions: vec![Action::Output { port: 4242 }],
        ..PacketOut::default()
    };
    let err = h.logical.packet_out(&ctx(), &ld_id, &unknown_port).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn test_packet_in_published_on_logical_port() {
    let h = Harness::new();
    let (_, onu_id, ld_id, uni) = topology(&h).await;

    h.devices.packet_in(&onu_id, UNI_PORT, vec![1, 2, 3]).await.unwrap();
    let packets = h.events.packets_in();
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].logical_device_id, ld_id);
    assert_eq!(packets[0].port_no, uni);
    assert_eq!(packets[0].data, vec![1, 2, 3]);

    let err = h.devices.packet_in(&onu_id, 99, vec![]).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn test_events_flow_through_feeds() {
    let kv = Arc::new(MemoryKvClient::new());
    let options = StoreOptions::default();
    let devices = DeviceManager::new(
        Root::new("/devices", kv.clone(), options.clone()),
        MockAdapter::new(),
        Duration::from_secs(1),
    );
    let feeds = EventFeeds::new();
    let logical = LogicalDeviceManager::new(
        Root::new("/logical_devices", kv, options),
        Arc::clone(&devices),
        feeds.clone(),
    );

    let (tx, mut rx) = mpsc::channel::<ChangeEvent>(8);
    let stream = {
        let feeds = Arc::clone(&feeds);
        tokio::spawn(async move { feeds.stream_change_events(&tx).await })
    };

    let device = devices.create_device(olt(OLT_MAC)).await.unwrap();
    devices.add_port(&device.id, port(NNI_PORT, PortType::EthernetNni)).await.unwrap();
    devices.enable_device(&ctx(), &device.id).await.unwrap();
    devices
        .update_device_status(&device.id, Some(OperStatus::Active), Some(ConnectStatus::Reachable))
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let ChangeEvent::PortStatus(status) = event;
    assert_eq!(status.reason, PortReason::Add);
    assert_eq!(status.desc.port_no, NNI_PORT);
    assert!(logical.list_logical_devices().iter().any(|ld| ld.root_device_id == device.id));

    feeds.shutdown();
    assert_eq!(stream.await.unwrap(), StreamEnd::Preempted);
}

#[tokio::test]
async fn test_logical_devices_reload_after_restart() {
    let kv = Arc::new(MemoryKvClient::new());
    let adapter = MockAdapter::new();
    let (ld_id, uni) = {
        let h = Harness::with_store(kv.clone(), adapter.clone());
        let (_, _, ld_id, uni) = topology(&h).await;
        h.logical.update_meter_table(&ctx(), &ld_id, &meter_add(2)).await.unwrap();
        h.logical
            .update_flow_table(&ctx(), &ld_id, &metered(flow_add(uni, 100, NNI_PORT), 2))
            .await
            .unwrap();
        (ld_id, uni)
    };

    let h = Harness::with_store(kv, adapter.clone());
    h.devices.load_devices().await.unwrap();
    assert_eq!(h.logical.load_logical_devices(&ctx()).await.unwrap(), 1);

    let ld = h.logical.get_logical_device(&ld_id).await.unwrap();
    assert_eq!(ld.ports.len(), 2);
    assert_eq!(ld.flows.len(), 1);
    assert_eq!(ld.meters[0].flow_count, 1);

    // Reloaded tables are live: an identical add is a no-op.
    let updates = adapter.flow_updates().len();
    h.logical
        .update_flow_table(&ctx(), &ld_id, &metered(flow_add(uni, 100, NNI_PORT), 2))
        .await
        .unwrap();
    assert_eq!(adapter.flow_updates().len(), updates);
}

#[tokio::test]
async fn test_unknown_logical_device() {
    let h = Harness::new();
    let err = h.logical.get_logical_device("ffffffffffff").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
    let err = h
        .logical
        .update_flow_table(&ctx(), "ffffffffffff", &flow_add(1, 1, 2))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}
