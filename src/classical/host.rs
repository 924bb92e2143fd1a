use crate::classical::connection::{Connection, LinkEnd};
use crate::classical::interface::Interfaces;
use crate::classical::packet::ClassicDataPacket;
use crate::errors::{RoutingError, SimError};
use crate::events::{EventType, SimContext};
use crate::identity::{Address, NodeIdentity};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Application data handed to a host once fully reassembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub from: Address,
    pub payload: Vec<u8>,
}

impl ReceivedMessage {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// End host: originates and consumes data, never forwards.
#[derive(Debug)]
pub struct ClassicalHost {
    iface: Interfaces,
    default_gateway: RwLock<Option<Address>>,
    received: Mutex<Vec<ReceivedMessage>>,
}

impl ClassicalHost {
    pub fn new(identity: NodeIdentity, ctx: Arc<SimContext>) -> Arc<Self> {
        Arc::new(Self {
            iface: Interfaces::new(identity, ctx),
            default_gateway: RwLock::new(None),
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn identity(&self) -> &NodeIdentity {
        self.iface.identity()
    }

    pub fn address(&self) -> &Address {
        self.iface.address()
    }

    pub fn link_end(&self) -> LinkEnd {
        self.iface.link_end()
    }

    pub fn add_connection(&self, connection: Arc<Connection>) -> Result<Address, SimError> {
        Ok(self.iface.attach(connection)?)
    }

    pub fn default_gateway(&self) -> Option<Address> {
        self.default_gateway.read().clone()
    }

    pub fn set_default_gateway(&self, gateway: Address) {
        *self.default_gateway.write() = Some(gateway);
    }

    /// Adopts `gateway` unless one is already known.
    pub fn learn_gateway(&self, gateway: &Address) {
        let mut current = self.default_gateway.write();
        if current.is_none() {
            *current = Some(gateway.clone());
        }
    }

    /// Sends `payload` to `destination`, directly when a link exists and via
    /// the default gateway otherwise.
    pub fn send_data(
        &self,
        payload: impl Into<Vec<u8>>,
        destination: &Address,
    ) -> Result<Duration, SimError> {
        let packet = ClassicDataPacket::new(
            self.iface.ctx(),
            self.address().clone(),
            destination.clone(),
            payload,
        );

        if self.iface.has_link(destination) {
            return self.iface.send_to(packet, destination);
        }

        match self.default_gateway() {
            Some(gateway) if self.iface.has_link(&gateway) => self.iface.send_to(packet, &gateway),
            _ => Err(RoutingError::DefaultGatewayNotFound {
                host: self.identity().name.clone(),
                destination: destination.clone(),
            }
            .into()),
        }
    }

    pub fn received(&self) -> Vec<ReceivedMessage> {
        self.received.lock().clone()
    }

    pub fn forward(&self) {
        for (from, packet) in self.iface.drain() {
            if &packet.destination != self.address() {
                self.iface.emit(
                    EventType::PacketDropped,
                    json!({"packet": packet.summary(), "reason": "not addressed to this host"}),
                );
                continue;
            }
            let Some(packet) = self.iface.reassemble(packet) else {
                continue;
            };
            self.iface.emit(
                EventType::DataReceived,
                json!({
                    "from": from,
                    "source": packet.source,
                    "packet": packet.summary(),
                    "data": packet.payload_text(),
                }),
            );
            self.received.lock().push(ReceivedMessage {
                from: packet.source,
                payload: packet.payload,
            });
        }
    }
}
