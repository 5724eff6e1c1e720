//! Change notification end to end: mutations through the hub, dispatcher
//! task, JSONL and channel sinks.

use chrono::{TimeZone, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tallyflow::ingest::ingest_reader;
use tallyflow::ledger::{ExitType, SqliteLedger};
use tallyflow::notify::{run_dispatcher, ChangeEvent, ChangeNotifier, ChannelSink, JsonlChangeSink};
use tallyflow::triggers::rows::{BroadcastRow, ChannelEventRow, FlowRunRow, MsgStatus, PathStep};
use tallyflow::triggers::{EntityType, MutationEvent, Operation, TriggerHub};
use tallyflow::NegativeReadPolicy;
use tempfile::TempDir;

fn hub_with_notifier(buffer: usize) -> (TriggerHub, tokio::sync::mpsc::Receiver<ChangeEvent>) {
    let ledger = SqliteLedger::open_in_memory(NegativeReadPolicy::Report).unwrap();
    let (notifier, rx) = ChangeNotifier::channel(buffer);
    (TriggerHub::new(Arc::new(ledger)).with_notifier(notifier), rx)
}

fn broadcast(status: MsgStatus) -> BroadcastRow {
    BroadcastRow {
        id: 40,
        text: "Vaccination day tomorrow".to_string(),
        status,
        recipient_count: 250,
        created_on: Utc.with_ymd_and_hms(2024, 4, 2, 7, 0, 0).unwrap(),
    }
}

fn run(path: &[&str], exit_type: Option<ExitType>) -> FlowRunRow {
    FlowRunRow {
        id: 8,
        flow_id: 2,
        start_id: None,
        contact_id: 3,
        exit_type,
        is_active: exit_type.is_none(),
        path: path
            .iter()
            .enumerate()
            .map(|(i, node)| PathStep {
                node_uuid: node.to_string(),
                exit_uuid: if i + 1 < path.len() {
                    Some(format!("{}-exit", node))
                } else {
                    None
                },
                arrived_on: Utc.with_ymd_and_hms(2024, 4, 2, 7, i as u32, 0).unwrap(),
            })
            .collect(),
        results: BTreeMap::new(),
        modified_on: Utc.with_ymd_and_hms(2024, 4, 2, 7, 30, 0).unwrap(),
    }
}

#[tokio::test]
async fn test_one_event_per_row_mutation_in_commit_order() {
    let (hub, rx) = hub_with_notifier(64);
    let (sink, mut out) = ChannelSink::new(64);
    let dispatcher = tokio::spawn(run_dispatcher(rx, Box::new(sink), 50));

    hub.apply(MutationEvent::insert(broadcast(MsgStatus::Queued)))
        .unwrap();
    hub.apply(MutationEvent::update(
        broadcast(MsgStatus::Queued),
        broadcast(MsgStatus::Sent),
    ))
    .unwrap();
    // No notifiable field changed
    hub.apply(MutationEvent::update(
        broadcast(MsgStatus::Sent),
        broadcast(MsgStatus::Sent),
    ))
    .unwrap();
    hub.apply(MutationEvent::delete(broadcast(MsgStatus::Sent)))
        .unwrap();

    drop(hub);
    let stats = dispatcher.await.unwrap();
    assert_eq!(stats.delivered, 3);

    let mut events = Vec::new();
    while let Ok(event) = out.try_recv() {
        events.push(event);
    }

    let ops: Vec<Operation> = events.iter().map(|e| e.operation).collect();
    assert_eq!(ops, vec![Operation::Insert, Operation::Update, Operation::Delete]);
    assert!(events.iter().all(|e| e.entity_type == EntityType::Broadcast && e.entity_id == 40));
    assert_eq!(events[1].changed_fields, vec!["status".to_string()]);
    assert!(events[2].changed_fields.is_empty());
}

#[tokio::test]
async fn test_flow_run_notified_on_path_changes_only() {
    let (hub, mut rx) = hub_with_notifier(16);

    hub.apply(MutationEvent::insert(run(&["a"], None))).unwrap();
    hub.apply(MutationEvent::update(run(&["a"], None), run(&["a", "b"], None)))
        .unwrap();
    // Exit without moving: counted, not notified
    hub.apply(MutationEvent::update(
        run(&["a", "b"], None),
        run(&["a", "b"], Some(ExitType::Completed)),
    ))
    .unwrap();

    let first = rx.try_recv().unwrap();
    assert_eq!(first.operation, Operation::Insert);
    let second = rx.try_recv().unwrap();
    assert_eq!(second.operation, Operation::Update);
    assert_eq!(second.changed_fields, vec!["path".to_string()]);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_sink_failure_never_affects_mutations() {
    let (hub, rx) = hub_with_notifier(16);
    let (sink, out) = ChannelSink::new(1);
    drop(out);
    let dispatcher = tokio::spawn(run_dispatcher(rx, Box::new(sink), 50));

    let event = ChannelEventRow {
        id: 1,
        channel_id: 6,
        contact_id: Some(2),
        event_type: "new_conversation".to_string(),
        extra: Some(json!({"referrer": "ad"})),
        occurred_on: Utc.with_ymd_and_hms(2024, 4, 2, 7, 0, 0).unwrap(),
    };
    hub.apply(MutationEvent::insert(event.clone())).unwrap();
    hub.apply(MutationEvent::delete(event)).unwrap();
    assert_eq!(hub.stats().events_queued, 2);

    drop(hub);
    let stats = dispatcher.await.unwrap();
    assert_eq!(stats.failed, 2);
}

#[tokio::test]
async fn test_ingested_records_reach_jsonl_sink() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("streams/changes.jsonl");

    let (hub, rx) = hub_with_notifier(16);
    let sink = JsonlChangeSink::new(&path).unwrap();
    let dispatcher = tokio::spawn(run_dispatcher(rx, Box::new(sink), 50));

    let input = [
        json!({"table": "msg", "op": "insert", "new": {
            "id": 5, "channel_id": 1, "contact_id": 2, "direction": "in", "msg_type": "text",
            "status": "handled", "visibility": "visible", "text": "join", "topup_id": null,
            "created_on": "2024-04-02T07:00:00Z"}}),
        json!({"table": "debit", "op": "insert", "new": {
            "id": 1, "topup_id": 3, "amount": 10, "created_on": "2024-04-02T07:00:00Z"}}),
    ]
    .iter()
    .map(|v| v.to_string())
    .collect::<Vec<_>>()
    .join("\n");

    let report = ingest_reader(&hub, std::io::Cursor::new(input)).unwrap();
    assert_eq!(report.applied, 2);

    drop(hub);
    dispatcher.await.unwrap();

    let lines: Vec<ChangeEvent> = std::fs::read_to_string(&path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].entity_type, EntityType::Msg);
    assert_eq!(lines[0].entity_id, 5);
}
