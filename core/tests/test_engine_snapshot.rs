// Integration tests for engine persistence and frame exchange
//
// Route tables and live broadcasts saved to sled, the engine dropped, and a
// fresh engine restored from the same directory. Also two engines trading
// broadcast frames through in-memory transports.

use meshaid_core::broadcast::{BroadcastOptions, BroadcastType, IngestOutcome, Severity};
use meshaid_core::clock::{Clock, ManualClock};
use meshaid_core::config::MeshConfig;
use meshaid_core::engine::{InboundOutcome, MeshEngine, Platform};
use meshaid_core::node::{Node, NodeRole};
use meshaid_core::platform::{InMemoryDiscovery, InMemoryTransport, PeerDiscoverySource, Transport};
use meshaid_core::routing::RouteConstraints;
use meshaid_core::store::{SledStorage, SnapshotStore};
use meshaid_core::MeshError;
use std::sync::Arc;
use tempfile::TempDir;

fn engine(id: &str, clock: &Arc<ManualClock>, transport: &Arc<InMemoryTransport>) -> MeshEngine {
    let platform = Platform::default()
        .with_clock(Arc::clone(clock) as Arc<dyn Clock>)
        .with_transport(Arc::clone(transport) as Arc<dyn Transport>);
    MeshEngine::with_platform(id, NodeRole::Relay, MeshConfig::default(), platform)
}

fn sled_store(dir: &TempDir) -> SnapshotStore {
    let backend = SledStorage::open(dir.path().join("snapshots")).unwrap();
    SnapshotStore::new(Arc::new(backend))
}

/// a - b - c as seen from a
fn wire_line(engine: &MeshEngine) {
    for id in ["b", "c"] {
        engine.add_remote_node(Node::new(id, NodeRole::Relay).with_last_seen(0));
    }
    engine.connect_peer("b").unwrap();
    engine.topology().connect("b", "c").unwrap();
}

#[test]
fn test_snapshot_survives_restart() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(1_000));
    let transport = Arc::new(InMemoryTransport::new());

    let broadcast_id;
    let short_lived_id;
    {
        let first = engine("a", &clock, &transport).with_snapshots(sled_store(&dir));
        wire_line(&first);
        let route = first.find_route("c", &RouteConstraints::new()).unwrap();
        assert_eq!(route.next_hop, "b");

        broadcast_id = first
            .create_broadcast(
                BroadcastType::Medical,
                Severity::High,
                "Field hospital at the stadium",
                BroadcastOptions::default(),
            )
            .unwrap()
            .id;
        short_lived_id = first
            .create_broadcast(
                BroadcastType::Info,
                Severity::Low,
                "Bread at noon",
                BroadcastOptions::default().expires_in(5_000),
            )
            .unwrap()
            .id;
        first.save_snapshot().unwrap();
    }

    // the short-lived broadcast lapses while the node is down
    clock.advance(10_000);
    let second = engine("a", &clock, &transport).with_snapshots(sled_store(&dir));
    let (destinations, broadcasts) = second.restore_snapshot().unwrap();
    assert_eq!(destinations, 1);
    assert_eq!(broadcasts, 1);

    let restored = second.routes().lookup("c", &RouteConstraints::new()).unwrap();
    assert_eq!(restored.next_hop, "b");
    assert_eq!(restored.hop_count, 2);
    assert!(second.broadcasts().get(&broadcast_id).is_some());
    assert!(second.broadcasts().get(&short_lived_id).is_none());

    println!("✓ Routes and live broadcasts restored from sled after restart");
}

#[test]
fn test_snapshot_requires_a_store() {
    let clock = Arc::new(ManualClock::new(0));
    let transport = Arc::new(InMemoryTransport::new());
    let engine = engine("a", &clock, &transport);
    assert!(matches!(engine.save_snapshot(), Err(MeshError::Storage(_))));
    assert!(matches!(engine.restore_snapshot(), Err(MeshError::Storage(_))));
}

#[test]
fn test_broadcast_frames_between_engines() {
    let clock = Arc::new(ManualClock::new(50_000));
    let a_link = Arc::new(InMemoryTransport::new());
    let b_link = Arc::new(InMemoryTransport::new());
    let a = engine("a", &clock, &a_link);
    let b = engine("b", &clock, &b_link);
    a.add_remote_node(Node::new("b", NodeRole::Relay).with_last_seen(50_000));
    a.connect_peer("b").unwrap();
    b.add_remote_node(Node::new("a", NodeRole::Relay).with_last_seen(50_000));
    b.connect_peer("a").unwrap();

    let broadcast = a
        .create_broadcast(
            BroadcastType::Evacuation,
            Severity::Critical,
            "Dam failure, go to high ground",
            BroadcastOptions::default(),
        )
        .unwrap();
    assert!(a.is_emergency_mode());

    let frames = a_link.sent();
    assert!(!frames.is_empty());
    let (target, bytes) = &frames[0];
    assert_eq!(target, "b");

    let outcome = b.handle_inbound("a", bytes).unwrap();
    assert!(matches!(outcome, InboundOutcome::Broadcast(IngestOutcome::Accepted)));
    assert!(b.broadcasts().get(&broadcast.id).is_some());
    assert!(b.is_emergency_mode());

    // b acknowledges straight back to a
    let acks: Vec<_> = b_link.sent().into_iter().filter(|(to, _)| to == "a").collect();
    assert!(!acks.is_empty());
    let acked = acks
        .iter()
        .filter_map(|(_, bytes)| a.handle_inbound("b", bytes).ok())
        .any(|o| matches!(o, InboundOutcome::Acknowledged));
    assert!(acked);
    assert!(a.broadcasts().get(&broadcast.id).unwrap().acknowledgements >= 1);

    // a second copy is a duplicate
    let again = b.handle_inbound("a", bytes).unwrap();
    assert!(matches!(again, InboundOutcome::Broadcast(IngestOutcome::Duplicate)));

    println!("✓ Critical broadcast crosses engines, is acknowledged and deduplicated");
}

#[test]
fn test_discovered_peers_are_linked_and_routable() -> anyhow::Result<()> {
    let clock = Arc::new(ManualClock::new(0));
    let transport = Arc::new(InMemoryTransport::new());
    let engine = engine("a", &clock, &transport);

    let source = Arc::new(InMemoryDiscovery::new());
    source.announce(Node::new("b", NodeRole::Relay));
    // our own announcement echoes back and is ignored
    source.announce(Node::new("a", NodeRole::Relay));
    engine.add_peer_source(Arc::clone(&source) as Arc<dyn PeerDiscoverySource>);

    let joined = tokio_test::block_on(engine.discover_peers());
    assert_eq!(joined, 1);
    assert!(engine.topology().graph().are_linked("a", "b"));

    let route = engine.find_route("b", &RouteConstraints::new())?;
    assert_eq!(route.hop_count, 1);
    assert_eq!(route.next_hop, "b");
    Ok(())
}
