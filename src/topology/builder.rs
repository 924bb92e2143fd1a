use crate::config::{NodeDescription, TopologyDescription};
use crate::errors::SimError;
use crate::events::{EventSink, SimContext};
use crate::topology::world::World;
use std::sync::Arc;
use tracing::info;

/// Builds a [`World`] from a parsed description and wires every link.
///
/// Adapters are placed after all other nodes so they can reference quantum
/// hosts declared anywhere in their zone. Links follow in the order
/// connections, adapter pairs, quantum channels.
pub fn build_and_wire(
    description: &TopologyDescription,
    sink: Arc<dyn EventSink>,
) -> Result<World, SimError> {
    let ctx = SimContext::new(description.simulation.clone(), sink);
    let mut world = World::new(description.name.clone(), ctx).with_size(description.size);

    for zone in &description.zones {
        world.add_zone(zone.name.clone())?;
        for network in &zone.networks {
            world.add_network(&zone.name, network.name.clone(), network.kind)?;
        }
    }

    let placements = description
        .zones
        .iter()
        .flat_map(|zone| &zone.networks)
        .flat_map(|network| network.nodes.iter().map(move |node| (network.name.as_str(), node)));

    let mut adapters = Vec::new();
    for (network, node) in placements {
        match node {
            NodeDescription::Host { name, address } => {
                world.add_host(network, name, address)?;
            }
            NodeDescription::Router { name, address } => {
                world.add_router(network, name, address)?;
            }
            NodeDescription::QuantumHost { name, address } => {
                world.add_quantum_host(network, name, address)?;
            }
            NodeDescription::QuantumRepeater {
                name,
                address,
                num_memories,
            } => {
                world.add_repeater(network, name, address, *num_memories)?;
            }
            NodeDescription::QuantumAdapter {
                name,
                address,
                quantum_host,
            } => adapters.push((network, name, address, quantum_host)),
        }
    }
    for (network, name, address, quantum_host) in adapters {
        world.add_adapter(network, name, address, quantum_host)?;
    }

    for link in &description.connections {
        world.connect(&link.from, &link.to, link.config.clone())?;
    }
    for link in &description.adapter_pairs {
        world.pair_adapters(&link.from, &link.to, link.config.clone())?;
    }
    for link in &description.quantum_channels {
        world.add_quantum_channel(&link.from, &link.to, link.config.clone())?;
    }

    info!(
        world = %world.name(),
        nodes = world.nodes().count(),
        connections = world.connections().len(),
        quantum_channels = world.quantum_channels().len(),
        "topology wired"
    );
    Ok(world)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TopologyError;
    use crate::events::NoopSink;

    fn parse(json: &str) -> TopologyDescription {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn adapters_may_precede_their_quantum_host() {
        let description = parse(
            r#"{
                "name": "w",
                "zones": [{
                    "name": "z",
                    "networks": [
                        {"name": "lan", "type": "CLASSICAL", "nodes": [
                            {"kind": "quantum_adapter", "name": "qa", "address": "10.0.0.9", "quantum_host": "alice"}
                        ]},
                        {"name": "qnet", "type": "QUANTUM", "nodes": [
                            {"kind": "quantum_host", "name": "alice", "address": "q1"}
                        ]}
                    ]
                }]
            }"#,
        );
        let world = build_and_wire(&description, Arc::new(NoopSink)).unwrap();
        let adapter = world.adapter("qa").unwrap();
        assert_eq!(adapter.host().identity().name, "alice");
        assert!(adapter.host().has_control_plane());
        assert_eq!(world.zone("z").unwrap().adapters().len(), 1);
    }

    #[test]
    fn hosts_in_quantum_networks_are_rejected() {
        let description = parse(
            r#"{
                "name": "w",
                "zones": [{
                    "name": "z",
                    "networks": [{"name": "qnet", "type": "QUANTUM", "nodes": [
                        {"kind": "host", "name": "h", "address": "10.0.0.1"}
                    ]}]
                }]
            }"#,
        );
        let err = build_and_wire(&description, Arc::new(NoopSink)).unwrap_err();
        assert!(matches!(
            err,
            SimError::Topology(TopologyError::UnsupportedNetwork { ref node, .. }) if node == "h"
        ));
    }

    #[test]
    fn links_to_unknown_nodes_fail() {
        let description = parse(
            r#"{
                "name": "w",
                "zones": [{"name": "z", "networks": [{"name": "lan", "type": "CLASSICAL", "nodes": [
                    {"kind": "host", "name": "h", "address": "10.0.0.1"}
                ]}]}],
                "connections": [{"from": "h", "to": "ghost"}]
            }"#,
        );
        let err = build_and_wire(&description, Arc::new(NoopSink)).unwrap_err();
        assert!(matches!(
            err,
            SimError::Topology(TopologyError::UnknownNode(ref name)) if name == "ghost"
        ));
    }
}
