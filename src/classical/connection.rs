//! Classical links and the asynchronous delivery workers they spawn.

use crate::classical::inbox::Inbox;
use crate::classical::packet::ClassicDataPacket;
use crate::config::ConnectionConfig;
use crate::errors::{LinkError, RoutingError, SimError, TopologyError};
use crate::events::{EventType, SimContext};
use crate::identity::{Address, NodeIdentity};
use parking_lot::RwLock;
use rand::Rng;
use serde_json::json;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::trace;

/// One side of a link: who sits there and where delivered packets go.
#[derive(Debug, Clone)]
pub struct LinkEnd {
    pub identity: NodeIdentity,
    pub inbox: Weak<Inbox<ClassicDataPacket>>,
}

impl LinkEnd {
    pub fn address(&self) -> &Address {
        &self.identity.address
    }
}

/// What the delivery worker decided for one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Impairments {
    lost: bool,
    /// Payload bit to flip.
    corrupt_bit: Option<usize>,
}

/// Rolls loss and corruption independently.
fn roll_impairments(config: &ConnectionConfig, size_bits: usize) -> Impairments {
    let mut rng = rand::rng();
    let lost = config.packet_loss_rate > 0.0 && rng.random_bool(config.packet_loss_rate);
    let corrupted = config.packet_error_rate > 0.0 && rng.random_bool(config.packet_error_rate);
    let corrupt_bit = (corrupted && size_bits > 0).then(|| rng.random_range(0..size_bits));
    Impairments { lost, corrupt_bit }
}

/// Undirected classical link between exactly two nodes.
#[derive(Debug)]
pub struct Connection {
    name: String,
    ends: [LinkEnd; 2],
    config: RwLock<ConnectionConfig>,
    ctx: Arc<SimContext>,
}

impl Connection {
    pub fn new(
        ctx: Arc<SimContext>,
        name: impl Into<String>,
        a: LinkEnd,
        b: LinkEnd,
        config: ConnectionConfig,
    ) -> Result<Arc<Self>, TopologyError> {
        config.validate()?;
        if a.address() == b.address() {
            return Err(TopologyError::InvalidParameter(format!(
                "connection endpoints must differ, got {} twice",
                a.address()
            )));
        }
        Ok(Arc::new(Self {
            name: name.into(),
            ends: [a, b],
            config: RwLock::new(config),
            ctx,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoints(&self) -> (&Address, &Address) {
        (self.ends[0].address(), self.ends[1].address())
    }

    pub fn config(&self) -> ConnectionConfig {
        self.config.read().clone()
    }

    pub fn mtu(&self) -> Option<usize> {
        self.config.read().mtu
    }

    pub fn is_up(&self) -> bool {
        self.config.read().up
    }

    pub fn set_up(&self, up: bool) {
        self.config.write().up = up;
    }

    pub fn connects(&self, address: &Address) -> bool {
        self.ends.iter().any(|end| end.address() == address)
    }

    /// The endpoint opposite `address`.
    pub fn other(&self, address: &Address) -> Option<&LinkEnd> {
        match &self.ends {
            [a, b] if a.address() == address => Some(b),
            [a, b] if b.address() == address => Some(a),
            _ => None,
        }
    }

    fn end(&self, address: &Address) -> Option<&LinkEnd> {
        self.ends.iter().find(|end| end.address() == address)
    }

    /// `latency + size_bits / bandwidth`.
    pub fn delay_for(&self, packet: &ClassicDataPacket) -> Result<Duration, LinkError> {
        let config = self.config.read();
        if !(config.bandwidth_bps > 0.0) {
            return Err(LinkError::InvalidBandwidth {
                connection: self.name.clone(),
                bandwidth: config.bandwidth_bps,
            });
        }
        let serialization_secs = packet.size_bits() as f64 / config.bandwidth_bps;
        let out_of_range = || LinkError::DelayOutOfRange {
            connection: self.name.clone(),
            latency_ms: config.latency_ms,
            serialization_secs,
        };
        let latency = config.latency().ok_or_else(out_of_range)?;
        let serialization =
            Duration::try_from_secs_f64(serialization_secs).map_err(|_| out_of_range())?;
        latency.checked_add(serialization).ok_or_else(out_of_range)
    }

    /// Sends `packet` from `sender` to the opposite endpoint, fragmenting it
    /// first when it exceeds the MTU. Returns the longest fragment delay.
    pub fn send(&self, packet: ClassicDataPacket, sender: &Address) -> Result<Duration, SimError> {
        let receiver = self
            .other(sender)
            .ok_or_else(|| RoutingError::Misrouted {
                connection: self.name.clone(),
                sender: sender.clone(),
                receiver: packet.next_hop.clone().unwrap_or_else(|| packet.destination.clone()),
            })?
            .address()
            .clone();

        let fragments = match self.mtu() {
            Some(mtu) if packet.size() > mtu && !packet.is_fragment() => {
                let fragment_id = self.ctx.next_id();
                let original = packet.summary();
                let fragments = packet.fragment(mtu, fragment_id);
                if let Some(end) = self.end(sender) {
                    self.ctx.emit(
                        EventType::PacketFragmented,
                        &end.identity,
                        json!({
                            "packet": original,
                            "connection": self.name,
                            "mtu": mtu,
                            "fragments": fragments.len(),
                        }),
                    );
                }
                fragments
            }
            _ => vec![packet],
        };

        let mut longest = Duration::ZERO;
        for fragment in fragments {
            longest = longest.max(self.transmit_packet(fragment, sender, &receiver)?);
        }
        Ok(longest)
    }

    /// Validates the hop and hands the packet to a delivery worker that rolls
    /// loss and corruption, waits out the delay and fills the receiver's
    /// buffer.
    pub fn transmit_packet(
        &self,
        packet: ClassicDataPacket,
        sender: &Address,
        receiver: &Address,
    ) -> Result<Duration, SimError> {
        let (Some(from), Some(to)) = (self.end(sender), self.end(receiver)) else {
            return Err(self.misrouted(sender, receiver));
        };
        if sender == receiver {
            return Err(self.misrouted(sender, receiver));
        }

        let config = self.config();
        if !config.up {
            return Err(LinkError::ConnectionDown {
                connection: self.name.clone(),
            }
            .into());
        }
        if let Some(mtu) = config.mtu
            && packet.size() > mtu
        {
            return Err(LinkError::MtuExceeded {
                connection: self.name.clone(),
                size: packet.size(),
                mtu,
            }
            .into());
        }
        let delay = self.delay_for(&packet)?;
        let runtime = Handle::try_current().map_err(|_| LinkError::NoExecutor)?;

        self.ctx.emit(
            EventType::PacketTransmitted,
            &from.identity,
            json!({
                "packet": packet.summary(),
                "connection": self.name,
                "delay_s": delay.as_secs_f64(),
            }),
        );

        let ctx = self.ctx.clone();
        let connection = self.name.clone();
        let sender = sender.clone();
        let target = to.clone();
        runtime.spawn(async move {
            deliver(ctx, connection, config, sender, target, packet, delay).await;
        });

        Ok(delay)
    }

    fn misrouted(&self, sender: &Address, receiver: &Address) -> SimError {
        RoutingError::Misrouted {
            connection: self.name.clone(),
            sender: sender.clone(),
            receiver: receiver.clone(),
        }
        .into()
    }
}

async fn deliver(
    ctx: Arc<SimContext>,
    connection: String,
    config: ConnectionConfig,
    sender: Address,
    target: LinkEnd,
    mut packet: ClassicDataPacket,
    delay: Duration,
) {
    let fate = roll_impairments(&config, packet.size_bits());
    if fate.lost {
        ctx.emit(
            EventType::PacketDropped,
            &target.identity,
            json!({"packet": packet.summary(), "connection": connection, "reason": "loss"}),
        );
        return;
    }
    if let Some(bit) = fate.corrupt_bit {
        packet.payload[bit / 8] ^= 1 << (bit % 8);
        ctx.emit(
            EventType::PacketCorrupted,
            &target.identity,
            json!({"packet": packet.summary(), "connection": connection, "bit": bit}),
        );
    }

    tokio::time::sleep(delay).await;
    trace!(%connection, packet = packet.id, "delivery worker woke up");

    let summary = packet.summary();
    let pushed = match target.inbox.upgrade() {
        Some(inbox) => inbox.push(&sender, packet).map_err(|e| e.to_string()),
        None => Err(format!("{} is no longer part of the topology", target.address())),
    };
    match pushed {
        Ok(()) => ctx.emit(
            EventType::PacketReceived,
            &target.identity,
            json!({"packet": summary, "connection": connection}),
        ),
        Err(reason) => ctx.emit(
            EventType::TransmissionFailed,
            &target.identity,
            json!({"packet": summary, "connection": connection, "reason": reason}),
        ),
    }
}
