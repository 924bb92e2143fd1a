//! Bridge between a classical segment and a quantum-secured link.
//!
//! An adapter routes like a classical router, except that packets whose next
//! hop is its paired adapter are encrypted with the QKD key first. Without a
//! key those packets wait in the input buffer while the attached quantum
//! host runs BB84; control traffic for that host rides the pairing link.

use crate::classical::{ClassicDataPacket, ClassicalRouter, Connection, LinkEnd, RoutingGraph};
use crate::errors::{SimError, TopologyError};
use crate::events::{EventType, SimContext};
use crate::identity::{Address, NodeIdentity};
use crate::quantum::control::{ControlMessage, ControlPlane};
use crate::quantum::host::QuantumHost;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Packs key bits MSB first; a trailing partial byte is zero padded.
pub fn key_bytes(key: &[bool]) -> Vec<u8> {
    key.chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |byte, (i, &bit)| byte | (u8::from(bit) << (7 - i)))
        })
        .collect()
}

/// XORs every byte with the key bytes, cycling the key. Applying it twice
/// restores the input.
pub fn xor_cipher(data: &[u8], key: &[u8]) -> Vec<u8> {
    if key.is_empty() {
        return data.to_vec();
    }
    data.iter()
        .zip(key.iter().cycle())
        .map(|(d, k)| d ^ k)
        .collect()
}

#[derive(Debug, Clone)]
struct Pairing {
    peer: Address,
    connection: Arc<Connection>,
}

#[derive(Debug)]
pub struct QuantumAdapter {
    router: ClassicalRouter,
    host: Arc<QuantumHost>,
    pairing: RwLock<Option<Pairing>>,
    shared_key: RwLock<Option<Vec<bool>>>,
    input_buffer: Mutex<VecDeque<ClassicDataPacket>>,
    last_attempt: Mutex<Option<Instant>>,
}

impl QuantumAdapter {
    /// Creates the adapter and installs it as `host`'s control plane.
    pub fn new(
        identity: NodeIdentity,
        ctx: Arc<SimContext>,
        graph: Arc<RoutingGraph>,
        host: Arc<QuantumHost>,
    ) -> Arc<Self> {
        let adapter = Arc::new(Self {
            router: ClassicalRouter::build(identity, ctx, graph),
            host,
            pairing: RwLock::new(None),
            shared_key: RwLock::new(None),
            input_buffer: Mutex::new(VecDeque::new()),
            last_attempt: Mutex::new(None),
        });
        let plane: Arc<dyn ControlPlane> = adapter.clone();
        adapter.host.set_control_plane(Arc::downgrade(&plane));
        adapter
    }

    pub fn identity(&self) -> &NodeIdentity {
        self.router.identity()
    }

    pub fn address(&self) -> &Address {
        self.router.address()
    }

    pub fn host(&self) -> &Arc<QuantumHost> {
        &self.host
    }

    pub fn link_end(&self) -> LinkEnd {
        self.router.link_end()
    }

    pub fn add_connection(&self, connection: Arc<Connection>) -> Result<Address, SimError> {
        self.router.add_connection(connection)
    }

    pub fn peer(&self) -> Option<Address> {
        self.pairing.read().as_ref().map(|p| p.peer.clone())
    }

    pub fn shared_key(&self) -> Option<Vec<bool>> {
        self.shared_key.read().clone()
    }

    /// Packets waiting for a key.
    pub fn buffered(&self) -> usize {
        self.input_buffer.lock().len()
    }

    /// Attaches the dedicated control connection to `peer`.
    pub fn pair(&self, peer: Address, connection: Arc<Connection>) -> Result<(), SimError> {
        let mut pairing = self.pairing.write();
        if pairing.is_some() {
            return Err(TopologyError::PairingAlreadyExists {
                adapter: self.identity().name.clone(),
            }
            .into());
        }
        let neighbor = self.router.add_connection(connection.clone())?;
        if neighbor != peer {
            return Err(TopologyError::NotAnEndpoint {
                node: peer,
                link: connection.name().to_owned(),
            }
            .into());
        }
        *pairing = Some(Pairing { peer, connection });
        Ok(())
    }

    fn pairing(&self) -> Result<Pairing, TopologyError> {
        self.pairing
            .read()
            .clone()
            .ok_or_else(|| TopologyError::PairingDoesNotExist {
                adapter: self.identity().name.clone(),
            })
    }

    fn emit(&self, event_type: EventType, data: serde_json::Value) {
        self.router.interfaces().emit(event_type, data);
    }

    /// Asks the quantum host for a key unless one exists or the last request
    /// is more recent than the attempt interval.
    pub fn initiate_qkd(&self) -> Result<bool, SimError> {
        if self.shared_key.read().is_some() {
            return Ok(false);
        }
        let now = Instant::now();
        let interval = self.router.interfaces().ctx().config().qkd.attempt_interval();
        {
            let mut last = self.last_attempt.lock();
            if last.is_some_and(|at| now.duration_since(at) < interval) {
                trace!(adapter = %self.identity(), "QKD attempt too soon");
                return Ok(false);
            }
            *last = Some(now);
        }
        self.host.initiate_qkd()
    }

    /// Routes `packet`, encrypting it when it crosses to the paired adapter.
    pub fn route_packet(&self, packet: ClassicDataPacket) -> Result<(), SimError> {
        let next = self.router.next_hop(&packet.destination)?;
        let crossing = self.peer().is_some_and(|peer| peer == next && peer != packet.destination);
        if !crossing {
            self.router.route_packet(packet)?;
            return Ok(());
        }

        // the tunnel carries whole packets
        let Some(packet) = self.router.interfaces().reassemble(packet) else {
            return Ok(());
        };

        if let Some(key) = self.shared_key() {
            return self.encrypt_and_send(packet, &key_bytes(&key));
        }

        self.emit(
            EventType::PacketBuffered,
            json!({"packet": packet.summary(), "buffered": self.buffered() + 1}),
        );
        self.input_buffer.lock().push_back(packet);
        self.initiate_qkd()?;
        Ok(())
    }

    fn encrypt_and_send(&self, packet: ClassicDataPacket, key: &[u8]) -> Result<(), SimError> {
        let pairing = self.pairing()?;

        let mut sealed = packet;
        sealed.final_destination = Some(sealed.destination.clone());
        sealed.destination = pairing.peer.clone();
        sealed.payload = xor_cipher(&sealed.payload, key);
        self.emit(
            EventType::DataEncrypted,
            json!({"packet": sealed.summary(), "peer": pairing.peer}),
        );
        self.send_over_pairing(&pairing, sealed)
    }

    /// Sends on the control connection; oversized packets fragment there.
    fn send_over_pairing(
        &self,
        pairing: &Pairing,
        mut packet: ClassicDataPacket,
    ) -> Result<(), SimError> {
        packet.next_hop = Some(pairing.peer.clone());
        packet.hops.push(self.address().clone());
        pairing.connection.send(packet, self.address())?;
        Ok(())
    }

    /// Decrypts a tunnelled packet from the peer and routes it onwards.
    fn open_and_route(&self, packet: ClassicDataPacket) -> Result<(), SimError> {
        let Some(mut packet) = self.router.interfaces().reassemble(packet) else {
            return Ok(());
        };
        let Some(destination) = packet.final_destination.take() else {
            return Ok(());
        };
        let Some(key) = self.shared_key() else {
            self.emit(
                EventType::PacketDropped,
                json!({"packet": packet.summary(), "reason": "no shared key to decrypt with"}),
            );
            return Ok(());
        };
        packet.payload = xor_cipher(&packet.payload, &key_bytes(&key));
        packet.destination = destination;
        self.emit(EventType::DataDecrypted, json!({"packet": packet.summary()}));
        self.router.route_packet(packet)?;
        Ok(())
    }

    /// Encrypts and forwards everything waiting in the input buffer.
    fn flush(&self) {
        let Some(key) = self.shared_key() else {
            return;
        };
        let key = key_bytes(&key);
        let pending: Vec<ClassicDataPacket> = self.input_buffer.lock().drain(..).collect();
        for packet in pending {
            let summary = packet.summary();
            if let Err(err) = self.encrypt_and_send(packet, &key) {
                self.router.interfaces().routing_failed(summary, &err);
            }
        }
    }

    pub fn forward(&self) {
        let peer = self.peer();
        for (from, packet) in self.router.interfaces().drain() {
            let summary = packet.summary();
            let result = if packet.is_control() && &packet.destination == self.address() {
                self.deliver_control(&from, &packet)
            } else if &packet.destination == self.address() {
                if peer.as_ref() == Some(&from) && packet.final_destination.is_some() {
                    self.open_and_route(packet)
                } else {
                    self.router.receive(&from, packet);
                    Ok(())
                }
            } else {
                self.route_packet(packet)
            };
            if let Err(err) = result {
                self.router.interfaces().routing_failed(summary, &err);
            }
        }

        let waiting = self.buffered() > 0;
        if waiting && self.shared_key.read().is_some() {
            self.flush();
        } else if waiting && let Err(err) = self.initiate_qkd() {
            debug!(adapter = %self.identity(), %err, "QKD retry failed");
        }
    }

    fn deliver_control(&self, from: &Address, packet: &ClassicDataPacket) -> Result<(), SimError> {
        let Some(decoded) = packet.control_message() else {
            return Ok(());
        };
        self.host.receive_classical(from, decoded?);
        Ok(())
    }
}

impl ControlPlane for QuantumAdapter {
    fn send_control(&self, _from: &Address, message: ControlMessage) -> Result<(), SimError> {
        let pairing = self.pairing()?;
        let packet = ClassicDataPacket::control(
            self.router.interfaces().ctx(),
            self.address().clone(),
            pairing.peer.clone(),
            &message,
        )?;
        self.send_over_pairing(&pairing, packet)
    }

    fn key_established(&self, key: &[bool]) {
        *self.shared_key.write() = Some(key.to_vec());
        debug!(adapter = %self.identity(), bits = key.len(), "key installed");
        self.flush();
    }
}
