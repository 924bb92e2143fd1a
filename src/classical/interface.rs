use crate::classical::connection::{Connection, LinkEnd};
use crate::classical::inbox::Inbox;
use crate::classical::packet::{ClassicDataPacket, Reassembler};
use crate::errors::{SimError, TopologyError};
use crate::events::{EventType, SimContext};
use crate::identity::{Address, NodeIdentity};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

/// Link bookkeeping shared by every classical node: identity, inbound
/// buffers, attached connections and the reassembly table.
#[derive(Debug)]
pub struct Interfaces {
    identity: NodeIdentity,
    ctx: Arc<SimContext>,
    inbox: Arc<Inbox<ClassicDataPacket>>,
    links: RwLock<IndexMap<Address, Arc<Connection>>>,
    reassembly: Reassembler,
}

impl Interfaces {
    pub fn new(identity: NodeIdentity, ctx: Arc<SimContext>) -> Self {
        let inbox = Arc::new(Inbox::new(identity.address.clone()));
        let reassembly = Reassembler::new(ctx.config().reassembly_timeout());
        Self {
            identity,
            ctx,
            inbox,
            links: RwLock::new(IndexMap::new()),
            reassembly,
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn address(&self) -> &Address {
        &self.identity.address
    }

    pub fn ctx(&self) -> &Arc<SimContext> {
        &self.ctx
    }

    pub fn link_end(&self) -> LinkEnd {
        LinkEnd {
            identity: self.identity.clone(),
            inbox: Arc::downgrade(&self.inbox),
        }
    }

    /// Registers the buffer and link for the neighbour across `connection`.
    pub fn attach(&self, connection: Arc<Connection>) -> Result<Address, TopologyError> {
        let neighbor = connection
            .other(self.address())
            .ok_or_else(|| TopologyError::NotAnEndpoint {
                node: self.address().clone(),
                link: connection.name().to_owned(),
            })?
            .address()
            .clone();
        self.inbox.register(neighbor.clone());
        self.links.write().insert(neighbor.clone(), connection);
        Ok(neighbor)
    }

    pub fn link(&self, neighbor: &Address) -> Option<Arc<Connection>> {
        self.links.read().get(neighbor).cloned()
    }

    pub fn has_link(&self, neighbor: &Address) -> bool {
        self.links.read().contains_key(neighbor)
    }

    pub fn neighbors(&self) -> Vec<Address> {
        self.links.read().keys().cloned().collect()
    }

    /// Hands `packet` to the connection towards `neighbor`.
    pub fn send_to(
        &self,
        mut packet: ClassicDataPacket,
        neighbor: &Address,
    ) -> Result<Duration, SimError> {
        let connection = self
            .link(neighbor)
            .ok_or_else(|| TopologyError::BufferNotAssigned {
                node: self.address().clone(),
                neighbor: neighbor.clone(),
            })?;
        packet.next_hop = Some(neighbor.clone());
        packet.hops.push(self.address().clone());
        connection.send(packet, self.address())
    }

    pub fn drain(&self) -> Vec<(Address, ClassicDataPacket)> {
        self.inbox.drain()
    }

    pub fn pending(&self) -> usize {
        self.inbox.len()
    }

    /// Feeds a packet addressed to this node through reassembly.
    pub fn reassemble(&self, packet: ClassicDataPacket) -> Option<ClassicDataPacket> {
        let was_fragment = packet.is_fragment();
        let complete = self.reassembly.accept(packet)?;
        if was_fragment {
            self.emit(EventType::PacketReassembled, json!({"packet": complete.summary()}));
        }
        Some(complete)
    }

    pub fn emit(&self, event_type: EventType, data: Value) {
        self.ctx.emit(event_type, &self.identity, data);
    }

    /// Reports a forwarding failure raised from the tick instead of
    /// propagating it.
    pub fn routing_failed(&self, packet: Value, err: &SimError) {
        self.emit(
            EventType::RoutingFailed,
            json!({"packet": packet, "error": err.to_string()}),
        );
    }
}
