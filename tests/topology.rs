mod common;

use common::wait_until;
use qnetsim::build_and_wire;
use qnetsim::config::{NetworkType, TopologyDescription};
use qnetsim::errors::{SimError, TopologyError};
use qnetsim::events::{EventType, RecordingSink};
use std::sync::Arc;
use std::time::Duration;

const HYBRID: &str = include_str!("../demos/hybrid.json");

fn hybrid() -> TopologyDescription {
    serde_json::from_str(HYBRID).unwrap()
}

#[test]
fn demo_topology_wires_every_node_and_link() {
    let sink = Arc::new(RecordingSink::new());
    let world = build_and_wire(&hybrid(), sink).unwrap();

    assert_eq!(world.name(), "two-campus");
    assert_eq!(world.size(), (1000.0, 600.0));
    assert_eq!(world.zones().count(), 2);
    assert_eq!(world.networks().count(), 4);
    // nine declared nodes plus the exchange
    assert_eq!(world.nodes().count(), 10);
    assert_eq!(world.connections().len(), 5);
    assert_eq!(world.quantum_channels().len(), 3);

    let west = world.zone("west").unwrap();
    assert_eq!(west.adapters().len(), 1);
    assert_eq!(
        world.network("qnet_west").unwrap().kind(),
        NetworkType::Quantum
    );
    assert_eq!(world.adapter("qa_west").unwrap().peer().unwrap().as_str(), "10.0.2.254");

    let alice = world.host("alice_pc").unwrap();
    assert_eq!(alice.default_gateway().unwrap().as_str(), "10.0.1.1");
}

#[test]
fn wrong_network_type_is_rejected() {
    let sink = Arc::new(RecordingSink::new());
    let mut world = build_and_wire(&hybrid(), sink).unwrap();
    let err = world.add_router("qnet_east", "r9", "10.0.9.1").unwrap_err();
    assert!(matches!(err, TopologyError::UnsupportedNetwork { ref node, .. } if node == "r9"));

    let err = world.add_quantum_host("lan_east", "q9", "q-9").unwrap_err();
    assert!(matches!(err, TopologyError::UnsupportedNetwork { .. }));

    let err = world.add_host("lan_east", "bob_pc", "10.0.2.99").unwrap_err();
    assert!(matches!(err, TopologyError::DuplicateNode(_)));
}

#[test]
fn linking_a_classical_host_to_a_quantum_channel_fails() {
    let sink = Arc::new(RecordingSink::new());
    let mut world = build_and_wire(&hybrid(), sink).unwrap();
    let err = world
        .add_quantum_channel("alice_pc", "qnode_east", Default::default())
        .unwrap_err();
    assert!(matches!(
        err,
        SimError::Topology(TopologyError::UnsupportedNetwork { .. })
    ));
}

#[test]
fn adapter_must_share_a_zone_with_its_quantum_host() {
    let sink = Arc::new(RecordingSink::new());
    let mut world = build_and_wire(&hybrid(), sink).unwrap();
    let err = world
        .add_adapter("lan_west", "qa_far", "10.0.1.253", "qnode_east")
        .unwrap_err();
    assert!(matches!(err, TopologyError::UnsupportedNetwork { .. }));
}

#[tokio::test(start_paused = true)]
async fn running_networks_deliver_across_the_quantum_link() {
    let sink = Arc::new(RecordingSink::new());
    let world = build_and_wire(&hybrid(), sink.clone()).unwrap();
    let bob = world.host("bob_pc").unwrap();

    world.start_all().unwrap();
    assert!(world.is_running("lan_west").unwrap());
    assert!(!world.start_network("lan_west").unwrap());
    assert_eq!(sink.count(EventType::NetworkStarted), 4);

    world
        .send_message("alice_pc", "bob_pc", "hello over qkd")
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || !bob.received().is_empty()).await);
    assert_eq!(bob.received()[0].text(), "hello over qkd");
    assert!(sink.count(EventType::SharedKeyGenerated) >= 1);

    world.stop_all();
    assert!(!world.is_running("lan_west").unwrap());
    assert_eq!(sink.count(EventType::NetworkStopped), 4);
}

#[tokio::test(start_paused = true)]
async fn stopped_networks_stop_forwarding() {
    let sink = Arc::new(RecordingSink::new());
    let world = build_and_wire(&hybrid(), sink.clone()).unwrap();
    let bob = world.host("bob_pc").unwrap();

    world.start_network("lan_east").unwrap();
    assert!(world.stop_network("lan_east").unwrap());
    assert!(!world.stop_network("lan_east").unwrap());

    world.send_message("alice_pc", "bob_pc", "nobody home").unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(bob.received().is_empty());
    assert!(matches!(
        world.start_network("nowhere"),
        Err(SimError::Topology(TopologyError::UnknownNetwork(_)))
    ));
}
