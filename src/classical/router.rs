use crate::classical::connection::{Connection, LinkEnd};
use crate::classical::exchange::RoutingGraph;
use crate::classical::interface::Interfaces;
use crate::classical::packet::ClassicDataPacket;
use crate::errors::{RoutingError, SimError};
use crate::events::{EventType, SimContext};
use crate::identity::{Address, NodeIdentity};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Store-and-forward router. Its routing table is the set of attached links;
/// anything further away is resolved through the shared [`RoutingGraph`].
#[derive(Debug)]
pub struct ClassicalRouter {
    iface: Interfaces,
    graph: Arc<RoutingGraph>,
}

impl ClassicalRouter {
    pub fn new(identity: NodeIdentity, ctx: Arc<SimContext>, graph: Arc<RoutingGraph>) -> Arc<Self> {
        Arc::new(Self::build(identity, ctx, graph))
    }

    pub(crate) fn build(identity: NodeIdentity, ctx: Arc<SimContext>, graph: Arc<RoutingGraph>) -> Self {
        Self {
            iface: Interfaces::new(identity, ctx),
            graph,
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        self.iface.identity()
    }

    pub fn address(&self) -> &Address {
        self.iface.address()
    }

    pub fn interfaces(&self) -> &Interfaces {
        &self.iface
    }

    pub fn graph(&self) -> &Arc<RoutingGraph> {
        &self.graph
    }

    pub fn link_end(&self) -> LinkEnd {
        self.iface.link_end()
    }

    /// Registers the neighbour buffer, the routing table entry and the graph
    /// edge for `connection`.
    pub fn add_connection(&self, connection: Arc<Connection>) -> Result<Address, SimError> {
        let neighbor = self.iface.attach(connection)?;
        self.graph.add_edge(self.address(), &neighbor);
        Ok(neighbor)
    }

    pub fn routing_table(&self) -> Vec<Address> {
        self.iface.neighbors()
    }

    /// Next hop towards `destination`: the destination itself when directly
    /// attached, otherwise the first hop of the shortest path.
    pub fn next_hop(&self, destination: &Address) -> Result<Address, RoutingError> {
        if self.iface.has_link(destination) {
            return Ok(destination.clone());
        }
        self.graph
            .next_hop(self.address(), destination)
            .filter(|hop| self.iface.has_link(hop))
            .ok_or_else(|| RoutingError::NotConnected {
                from: self.address().clone(),
                to: destination.clone(),
            })
    }

    /// Forwards `packet` one hop towards its destination.
    pub fn route_packet(&self, packet: ClassicDataPacket) -> Result<Duration, SimError> {
        let next = self.next_hop(&packet.destination)?;
        debug!(router = %self.identity(), packet = packet.id, %next, "routing");
        self.iface.emit(
            EventType::PacketRouted,
            json!({"packet": packet.summary(), "next_hop": next}),
        );
        self.iface.send_to(packet, &next)
    }

    /// Handles a packet addressed to this router.
    pub fn receive(&self, from: &Address, packet: ClassicDataPacket) {
        if let Some(packet) = self.iface.reassemble(packet) {
            self.iface.emit(
                EventType::DataReceived,
                json!({"from": from, "packet": packet.summary(), "data": packet.payload_text()}),
            );
        }
    }

    pub fn forward(&self) {
        for (from, packet) in self.iface.drain() {
            if &packet.destination == self.address() {
                self.receive(&from, packet);
                continue;
            }
            let summary = packet.summary();
            if let Err(err) = self.route_packet(packet) {
                self.iface.routing_failed(summary, &err);
            }
        }
    }
}
