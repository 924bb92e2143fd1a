mod common;

use approx::assert_relative_eq;
use common::recording_world;
use qnetsim::quantum::Qubit;
use qnetsim::{BellState, World};
use qnetsim::config::{NetworkType, QuantumChannelConfig};
use qnetsim::events::{EventType, RecordingSink};
use std::sync::Arc;

fn qnet(num_bits: usize, threshold: f64) -> (World, Arc<RecordingSink>) {
    let (mut world, sink) = recording_world("bb84");
    world.add_zone("z").unwrap();
    world.add_network("z", "qnet", NetworkType::Quantum).unwrap();
    world.add_quantum_host("qnet", "alice", "q1").unwrap();
    world.add_quantum_host("qnet", "bob", "q2").unwrap();
    world
        .add_quantum_channel(
            "alice",
            "bob",
            QuantumChannelConfig {
                num_bits,
                error_rate_threshold: threshold,
                ..Default::default()
            },
        )
        .unwrap();
    (world, sink)
}

#[test]
fn fifty_qubits_share_about_half_their_bases() {
    let (world, sink) = qnet(50, 10.0);
    let alice = world.quantum_host("alice").unwrap();
    let bob = world.quantum_host("bob").unwrap();

    assert!(alice.initiate_qkd().unwrap());
    for _ in 0..10 {
        world.tick_all();
    }

    let a = alice.session();
    let b = bob.session();
    assert_eq!(a.shared_bases_indices, b.shared_bases_indices);
    // binomial(50, 1/2): mean 25, sd ~3.5
    let shared = a.shared_bases_indices.len();
    assert!((10..=40).contains(&shared), "{shared} shared bases");

    let key_a = alice.shared_key().unwrap();
    assert_eq!(key_a.len(), shared);
    assert_eq!(Some(key_a), bob.shared_key());

    // one sender, one receiver
    assert_eq!(sink.count(EventType::QkdInitiated), 2);
    assert_eq!(sink.count(EventType::QkdCompleted), 2);
    assert_eq!(sink.count(EventType::SharedKeyGenerated), 1);
    assert_eq!(sink.count(EventType::SharedKeyReceived), 1);
}

#[test]
fn lossless_channel_never_loses_a_qubit_over_any_length() {
    let (mut world, sink) = recording_world("long");
    world.add_zone("z").unwrap();
    world.add_network("z", "qnet", NetworkType::Quantum).unwrap();
    let alice = world.add_quantum_host("qnet", "alice", "q1").unwrap();
    world.add_quantum_host("qnet", "bob", "q2").unwrap();
    world
        .add_quantum_channel(
            "alice",
            "bob",
            QuantumChannelConfig {
                length_km: 10_000.0,
                loss_per_km: 0.0,
                num_bits: 200,
                ..Default::default()
            },
        )
        .unwrap();

    alice.initiate_qkd().unwrap();
    assert_eq!(sink.count(EventType::QubitLost), 0);
    assert_eq!(alice.session().bits.len(), 200);
}

#[test]
fn repeater_swap_links_the_outer_hosts() {
    let (mut world, sink) = recording_world("chain");
    world.add_zone("z").unwrap();
    world.add_network("z", "qnet", NetworkType::Quantum).unwrap();
    let alice = world.add_quantum_host("qnet", "alice", "q1").unwrap();
    let bob = world.add_quantum_host("qnet", "bob", "q2").unwrap();
    let relay = world.add_repeater("qnet", "relay", "q3", 2).unwrap();
    world
        .add_quantum_channel("alice", "relay", QuantumChannelConfig::default())
        .unwrap();
    world
        .add_quantum_channel("bob", "relay", QuantumChannelConfig::default())
        .unwrap();

    alice.distribute_entanglement(relay.address()).unwrap();
    bob.distribute_entanglement(relay.address()).unwrap();
    for _ in 0..3 {
        world.tick_all();
    }

    assert_eq!(relay.swaps(), 1);
    assert_eq!(sink.count(EventType::RepeaterBellMeasurement), 1);
    let half = bob.entangled_half(relay.address()).unwrap();
    assert_eq!(half.partner.as_ref().map(|a| a.as_str()), Some("q1"));
    assert!(half.correction.is_some());

    let kept = alice.entangled_half(relay.address()).unwrap().qubit;
    let pair = Qubit::joint_state(&kept, &half.qubit).unwrap();
    assert_relative_eq!(
        pair.fidelity(&BellState::PhiPlus.ket()).unwrap(),
        1.0,
        epsilon = 1e-9
    );
}
