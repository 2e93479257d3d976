//! End-to-end reconciliation scenarios between in-process nodes.

use peersync_core::VectorClock;
use peersync_engine::{AntiEntropyProtocol, ProtocolEvent, SyncConfig};
use peersync_proto::{MessagePayload, SyncEntry, SyncMessage};
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

fn node(n: u8) -> Uuid {
    Uuid::from_bytes([n; 16])
}

fn make_node(n: u8) -> (AntiEntropyProtocol, UnboundedReceiver<ProtocolEvent>) {
    let config = SyncConfig {
        node_id: node(n),
        digest_range_count: 4,
        ..SyncConfig::default()
    };
    AntiEntropyProtocol::new(config).unwrap()
}

/// Deliver messages across the CBOR wire until neither side replies.
fn pump(a: &AntiEntropyProtocol, b: &AntiEntropyProtocol, first: Vec<SyncMessage>) {
    let mut queue = first;
    while let Some(message) = queue.pop() {
        // Round-trip through the wire encoding like a real transport.
        let bytes = message.to_cbor().unwrap();
        let message = SyncMessage::from_cbor(&bytes).unwrap();

        let handler = if message.target == a.node_id() { a } else { b };
        if let Some(reply) = handler.handle_message(&message) {
            queue.push(reply);
        }
    }
}

/// An entry as another replica would ship it: its own clock, its own
/// wall-clock timestamp.
fn entry(key: &str, value: serde_json::Value, writer: u8, timestamp_ms: u64) -> SyncEntry {
    let mut clock = VectorClock::new();
    clock.increment(node(writer));
    SyncEntry {
        key: key.to_string(),
        value,
        clock,
        timestamp_ms,
        writer: node(writer),
    }
}

fn push(source: u8, target: u8, entries: Vec<SyncEntry>) -> SyncMessage {
    SyncMessage::new(
        node(source),
        node(target),
        Uuid::new_v4(),
        0,
        VectorClock::new(),
        MessagePayload::Push { entries },
    )
}

fn drain_conflicts(events: &mut UnboundedReceiver<ProtocolEvent>) -> Vec<ProtocolEvent> {
    let mut conflicts = Vec::new();
    while let Ok(event) = events.try_recv() {
        if matches!(event, ProtocolEvent::ConflictDetected { .. }) {
            conflicts.push(event);
        }
    }
    conflicts
}

#[test]
fn concurrent_writes_converge_with_one_conflict_each() {
    let (a, mut a_events) = make_node(1);
    let (b, mut b_events) = make_node(2);

    // Node 1 wrote x=1 at t=100; node 2 wrote x=2 at t=105, with no
    // causal link between the writes. Each node first learns its own
    // write, then the other's.
    let a_write = entry("x", json!(1), 1, 100);
    let b_write = entry("x", json!(2), 2, 105);

    let _ = a.handle_message(&push(1, 1, vec![a_write.clone()]));
    let _ = b.handle_message(&push(2, 2, vec![b_write.clone()]));

    // Cross-push, both directions.
    let _ = b.handle_message(&push(1, 2, vec![a_write]));
    let _ = a.handle_message(&push(2, 1, vec![b_write]));

    // Both sides settle on the later write.
    assert_eq!(a.get("x"), Some(json!(2)));
    assert_eq!(b.get("x"), Some(json!(2)));

    // Exactly one conflict was detected on each side.
    assert_eq!(drain_conflicts(&mut a_events).len(), 1);
    assert_eq!(drain_conflicts(&mut b_events).len(), 1);
}

#[test]
fn gossip_exchange_unions_divergent_stores() {
    let (a, _) = make_node(1);
    let (b, _) = make_node(2);

    a.set("a", json!("only-a"));
    a.set("b", json!("shared-b"));
    a.set("c", json!("shared-c"));

    b.set("b", json!("shared-b"));
    b.set("c", json!("shared-c"));
    b.set("d", json!("only-d"));

    // One gossip exchange in each direction.
    pump(&a, &b, a.gossip_round(&[b.node_id()]));
    pump(&a, &b, b.gossip_round(&[a.node_id()]));

    for proto in [&a, &b] {
        assert_eq!(proto.len(), 4);
        assert_eq!(proto.get("a"), Some(json!("only-a")));
        assert_eq!(proto.get("b"), Some(json!("shared-b")));
        assert_eq!(proto.get("c"), Some(json!("shared-c")));
        assert_eq!(proto.get("d"), Some(json!("only-d")));
    }

    // Stores with identical content now fingerprint identically.
    assert_eq!(a.digest().root, b.digest().root);
}

#[test]
fn converged_nodes_exchange_nothing_but_acks() {
    let (a, mut a_events) = make_node(1);
    let (b, _) = make_node(2);

    a.set("k", json!(1));
    pump(&a, &b, a.gossip_round(&[b.node_id()]));

    // Drain events from the first exchange.
    while a_events.try_recv().is_ok() {}

    // A second round finds identical roots and syncs no entries.
    pump(&a, &b, a.gossip_round(&[b.node_id()]));

    let mut synced = 0;
    while let Ok(event) = a_events.try_recv() {
        if matches!(event, ProtocolEvent::EntrySynced { .. }) {
            synced += 1;
        }
    }
    assert_eq!(synced, 0);
    assert_eq!(a.session_stats().completed, 2);
}

#[test]
fn delete_holds_on_the_deleting_node() {
    let (a, _) = make_node(1);
    let (b, _) = make_node(2);

    a.set("keep", json!(1));
    a.set("drop", json!(2));
    pump(&a, &b, a.gossip_round(&[b.node_id()]));
    assert_eq!(b.len(), 2);

    assert!(a.delete("drop"));

    // Gossiping toward b only moves entries a still holds. The plain
    // key/value store has no tombstones, so b keeps its copy until it
    // deletes locally, and nothing in the exchange resurrects the key
    // on a.
    pump(&a, &b, a.gossip_round(&[b.node_id()]));
    assert_eq!(a.get("drop"), None);
    assert_eq!(a.len(), 1);
    assert_eq!(b.get("drop"), Some(json!(2)));
}

#[test]
fn three_nodes_reach_the_same_state() {
    let (a, _) = make_node(1);
    let (b, _) = make_node(2);
    let (c, _) = make_node(3);

    a.set("from-a", json!(1));
    b.set("from-b", json!(2));
    c.set("from-c", json!(3));

    pump(&a, &b, a.gossip_round(&[b.node_id()]));
    pump(&b, &c, b.gossip_round(&[c.node_id()]));
    pump(&c, &a, c.gossip_round(&[a.node_id()]));
    pump(&a, &b, b.gossip_round(&[a.node_id()]));
    pump(&b, &c, c.gossip_round(&[b.node_id()]));

    assert_eq!(a.digest().root, b.digest().root);
    assert_eq!(b.digest().root, c.digest().root);
    for proto in [&a, &b, &c] {
        assert_eq!(proto.len(), 3);
    }
}

#[test]
fn flat_hash_mode_still_converges() {
    let config_a = SyncConfig {
        node_id: node(1),
        enable_merkle_tree: false,
        ..SyncConfig::default()
    };
    let config_b = SyncConfig {
        node_id: node(2),
        enable_merkle_tree: false,
        ..SyncConfig::default()
    };
    let (a, _) = AntiEntropyProtocol::new(config_a).unwrap();
    let (b, _) = AntiEntropyProtocol::new(config_b).unwrap();

    a.set("x", json!("left"));
    b.set("y", json!("right"));

    pump(&a, &b, a.gossip_round(&[b.node_id()]));
    pump(&a, &b, b.gossip_round(&[a.node_id()]));

    assert_eq!(a.len(), 2);
    assert_eq!(b.len(), 2);
    assert_eq!(a.digest().root, b.digest().root);
}

#[test]
fn many_keys_cross_multiple_digest_ranges() {
    let (a, _) = make_node(1);
    let (b, _) = make_node(2);

    for i in 0..40 {
        a.set(&format!("key-{i:03}"), json!(i));
    }
    // b shares half the keys and has a few of its own.
    for i in 20..40 {
        b.set(&format!("key-{i:03}"), json!(i));
    }
    b.set("zz-extra", json!("tail"));

    pump(&a, &b, a.gossip_round(&[b.node_id()]));
    pump(&a, &b, b.gossip_round(&[a.node_id()]));

    assert_eq!(a.len(), 41);
    assert_eq!(b.len(), 41);
    assert_eq!(a.digest().root, b.digest().root);
}
