//! Quantum host: runs BB84 sessions over its quantum channel and holds
//! entangled halves distributed through repeaters.

use crate::core::PauliCorrection;
use crate::errors::{QuantumError, SimError, TopologyError};
use crate::events::{EventType, SimContext};
use crate::identity::{Address, NodeIdentity};
use crate::protocols::qkd::bb84::{
    Bb84Phase, Bb84Protocol, Bb84Role, Bb84Session, ErrorSample, StandardBb84,
};
use crate::quantum::channel::QuantumChannel;
use crate::quantum::control::{ControlMessage, ControlPlane};
use crate::quantum::port::{Arrival, QuantumPort};
use crate::quantum::qubit::{Basis, Qubit};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Local half of an entangled pair created by
/// [`QuantumHost::distribute_entanglement`].
#[derive(Debug, Clone)]
pub struct EntangledHalf {
    pub qubit: Qubit,
    /// Remote host this half ended up entangled with, once swapped.
    pub partner: Option<Address>,
    pub correction: Option<PauliCorrection>,
}

pub struct QuantumHost {
    identity: NodeIdentity,
    ctx: Arc<SimContext>,
    port: Arc<QuantumPort>,
    channels: RwLock<IndexMap<Address, Arc<QuantumChannel>>>,
    protocol: Arc<dyn Bb84Protocol>,
    session: Mutex<Bb84Session>,
    control_plane: RwLock<Option<Weak<dyn ControlPlane>>>,
    shared_key: RwLock<Option<Vec<bool>>>,
    sessions_started: AtomicUsize,
    entanglement: Mutex<IndexMap<Address, EntangledHalf>>,
}

impl fmt::Debug for QuantumHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuantumHost")
            .field("identity", &self.identity)
            .field("session", &*self.session.lock())
            .field("shared_key", &*self.shared_key.read())
            .finish_non_exhaustive()
    }
}

impl QuantumHost {
    pub fn new(identity: NodeIdentity, ctx: Arc<SimContext>) -> Arc<Self> {
        Self::with_protocol(identity, ctx, Arc::new(StandardBb84))
    }

    /// Host whose BB84 steps are delegated to `protocol`.
    pub fn with_protocol(
        identity: NodeIdentity,
        ctx: Arc<SimContext>,
        protocol: Arc<dyn Bb84Protocol>,
    ) -> Arc<Self> {
        let port = Arc::new(QuantumPort::new(identity.address.clone()));
        Arc::new(Self {
            identity,
            ctx,
            port,
            channels: RwLock::new(IndexMap::new()),
            protocol,
            session: Mutex::new(Bb84Session::default()),
            control_plane: RwLock::new(None),
            shared_key: RwLock::new(None),
            sessions_started: AtomicUsize::new(0),
            entanglement: Mutex::new(IndexMap::new()),
        })
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn address(&self) -> &Address {
        &self.identity.address
    }

    pub fn port(&self) -> Arc<QuantumPort> {
        self.port.clone()
    }

    pub fn add_quantum_channel(&self, channel: Arc<QuantumChannel>) -> Result<Address, SimError> {
        let neighbor = channel
            .other_end(self.address())
            .ok_or_else(|| TopologyError::NotAnEndpoint {
                node: self.address().clone(),
                link: channel.name().to_owned(),
            })?
            .address()
            .clone();
        self.port.register(neighbor.clone());
        self.channels.write().insert(neighbor.clone(), channel);
        Ok(neighbor)
    }

    pub fn set_control_plane(&self, plane: Weak<dyn ControlPlane>) {
        *self.control_plane.write() = Some(plane);
    }

    pub fn has_control_plane(&self) -> bool {
        self.control_plane().is_some()
    }

    fn control_plane(&self) -> Option<Arc<dyn ControlPlane>> {
        self.control_plane.read().as_ref().and_then(Weak::upgrade)
    }

    pub fn shared_key(&self) -> Option<Vec<bool>> {
        self.shared_key.read().clone()
    }

    /// Snapshot of the current BB84 session.
    pub fn session(&self) -> Bb84Session {
        self.session.lock().clone()
    }

    /// Sessions this host initiated as sender.
    pub fn sessions_started(&self) -> usize {
        self.sessions_started.load(Ordering::Relaxed)
    }

    pub fn entangled_half(&self, repeater: &Address) -> Option<EntangledHalf> {
        self.entanglement.lock().get(repeater).cloned()
    }

    /// The channel BB84 runs over: the first one attached.
    fn qkd_channel(&self) -> Result<(Address, Arc<QuantumChannel>), QuantumError> {
        self.channels
            .read()
            .first()
            .map(|(peer, channel)| (peer.clone(), channel.clone()))
            .ok_or_else(|| QuantumError::QuantumChannelDoesNotExist {
                node: self.identity.name.clone(),
            })
    }

    fn channel_to(&self, peer: &Address) -> Result<Arc<QuantumChannel>, QuantumError> {
        self.channels
            .read()
            .get(peer)
            .cloned()
            .ok_or_else(|| QuantumError::QuantumChannelDoesNotExist {
                node: self.identity.name.clone(),
            })
    }

    fn send_control(&self, message: ControlMessage) -> Result<(), SimError> {
        let plane = self
            .control_plane()
            .ok_or_else(|| QuantumError::NoControlPlane {
                node: self.identity.name.clone(),
            })?;
        plane.send_control(self.address(), message)
    }

    fn emit(&self, event_type: EventType, data: serde_json::Value) {
        self.ctx.emit(event_type, &self.identity, data);
    }

    /// Queues a control message; it is handled on the next tick.
    pub fn receive_classical(&self, from: &Address, message: ControlMessage) {
        self.port.push_control(from, message);
    }

    /// Starts a BB84 session as sender. Returns `false` when the in-progress
    /// guard or the retry back-off skipped it, or when no qubit got through.
    pub fn initiate_qkd(&self) -> Result<bool, SimError> {
        let (peer, channel) = self.qkd_channel()?;
        let now = Instant::now();
        let retry_delay = self.ctx.config().qkd.retry_delay();

        // held from the start check until the bases and bits are recorded,
        // so a peer replying from another worker never sees a half-built
        // session
        let mut session = self.session.lock();
        if !session.can_start(now, retry_delay) {
            let (in_progress, phase) = (session.in_progress, session.phase);
            drop(session);
            self.emit(
                EventType::QkdSkipped,
                json!({"in_progress": in_progress, "phase": phase}),
            );
            return Ok(false);
        }
        session.begin(Bb84Role::Sender, now);
        session.peer = Some(peer.clone());
        self.sessions_started.fetch_add(1, Ordering::Relaxed);

        let prepared = match self.protocol.send_qubits(channel.num_bits()) {
            Ok(prepared) => prepared,
            Err(err) => {
                session.finish(false, Instant::now());
                return Err(err.into());
            }
        };
        self.emit(
            EventType::QkdInitiated,
            json!({"role": Bb84Role::Sender, "peer": peer, "num_bits": channel.num_bits()}),
        );

        let mut lost = 0;
        for p in prepared {
            match channel.transmit_qubit(p.qubit, self.address()) {
                Ok(()) => {
                    session.bases.push(p.basis);
                    session.bits.push(p.bit);
                }
                Err(SimError::Quantum(QuantumError::QubitLoss { .. })) => lost += 1,
                Err(err) => {
                    session.finish(false, Instant::now());
                    return Err(err);
                }
            }
        }
        let delivered = session.bits.len();
        if delivered == 0 {
            session.finish(false, Instant::now());
        } else {
            session.expected = Some(delivered);
        }
        drop(session);

        self.emit(
            EventType::QubitSent,
            json!({"peer": peer, "delivered": delivered, "lost": lost}),
        );
        if lost > 0 {
            self.emit(EventType::QubitLost, json!({"channel": channel.name(), "count": lost}));
        }
        if delivered == 0 {
            self.emit(
                EventType::QkdAborted,
                json!({"role": Bb84Role::Sender, "reason": "every qubit was lost"}),
            );
            return Ok(false);
        }

        self.send_control(ControlMessage::QubitsSent { count: delivered })?;
        Ok(true)
    }

    /// Drains arrived qubits then queued control messages.
    pub fn forward(&self) {
        for (from, arrival) in self.port.drain_qubits() {
            if let Err(err) = self.process_received_qbit(&from, arrival) {
                self.fail_session(&err);
            }
        }
        for (from, message) in self.port.drain_control() {
            if let Err(err) = self.handle_control(&from, message) {
                self.fail_session(&err);
            }
        }
    }

    fn fail_session(&self, err: &SimError) {
        let role = {
            let mut session = self.session.lock();
            let role = session.role;
            if session.in_progress {
                session.finish(false, Instant::now());
            }
            role
        };
        self.emit(
            EventType::QkdAborted,
            json!({"role": role, "error": err.to_string()}),
        );
    }

    /// Measures one arriving qubit in a random basis, opening a receiver
    /// session when needed. Reconciliation starts once every announced qubit
    /// is measured.
    pub fn process_received_qbit(&self, from: &Address, mut arrival: Arrival) -> Result<(), SimError> {
        let channel = self.channel_to(from)?;
        let now = Instant::now();
        let retry_delay = self.ctx.config().qkd.retry_delay();

        let mut session = self.session.lock();
        if session.is_active(Bb84Role::Sender) {
            // both sides started at once: the lower address keeps sending
            if self.address() < from {
                debug!(host = %self.identity, %from, "discarding qubit while sending");
                return Ok(());
            }
            session.finish(false, now);
        }
        let stale = session.phase != Bb84Phase::Measuring || session.can_start(now, retry_delay);
        if !session.is_active(Bb84Role::Receiver) || stale {
            session.begin(Bb84Role::Receiver, now);
            session.peer = Some(from.clone());
            self.emit(
                EventType::QkdInitiated,
                json!({"role": Bb84Role::Receiver, "peer": from, "channel": arrival.channel}),
            );
        }

        let (basis, bit) = self.protocol.process_received_qubit(&mut arrival.qubit)?;
        session.bases.push(basis);
        session.bits.push(bit);

        let target = session.expected.unwrap_or_else(|| channel.num_bits());
        if session.bits.len() < target {
            return Ok(());
        }
        session.phase = Bb84Phase::Reconciling;
        let bases = session.bases.clone();
        drop(session);

        self.emit(EventType::QubitsMeasured, json!({"count": bases.len()}));
        self.send_control(ControlMessage::ReconcileBases { bases })
    }

    pub fn handle_control(&self, from: &Address, message: ControlMessage) -> Result<(), SimError> {
        match message {
            ControlMessage::QubitsSent { count } => self.on_qubits_sent(count),
            ControlMessage::ReconcileBases { bases } => self.bb84_reconcile_bases(&bases),
            ControlMessage::SharedBases { indices } => self.on_shared_bases(indices),
            ControlMessage::EstimateErrorRate { samples } => self.bb84_estimate_error_rate(&samples),
            ControlMessage::Complete => self.on_complete(),
            ControlMessage::KeyEstablished => self.on_key_established(),
            ControlMessage::Abort { error_rate } => {
                let mut session = self.session.lock();
                if !session.is_active(Bb84Role::Receiver) {
                    return Ok(());
                }
                session.finish(false, Instant::now());
                drop(session);
                self.emit(
                    EventType::QkdAborted,
                    json!({"role": Bb84Role::Receiver, "error_rate": error_rate}),
                );
                Ok(())
            }
            ControlMessage::EntanglementCorrection { correction, partner } => {
                self.apply_entanglement_correction(from, correction, partner)
            }
        }
    }

    fn on_qubits_sent(&self, count: usize) -> Result<(), SimError> {
        let mut session = self.session.lock();
        if !session.is_active(Bb84Role::Receiver) {
            return Ok(());
        }
        session.expected = Some(count);
        if session.phase != Bb84Phase::Measuring || session.bits.len() < count {
            return Ok(());
        }
        // more measured than announced means stale qubits from an older run
        session.bases.truncate(count);
        session.bits.truncate(count);
        session.phase = Bb84Phase::Reconciling;
        let bases = session.bases.clone();
        drop(session);

        self.emit(EventType::QubitsMeasured, json!({"count": bases.len()}));
        self.send_control(ControlMessage::ReconcileBases { bases })
    }

    /// Sender side: sifts on the receiver's bases and announces the shared
    /// positions.
    fn bb84_reconcile_bases(&self, peer_bases: &[Basis]) -> Result<(), SimError> {
        let mut session = self.session.lock();
        if !session.is_active(Bb84Role::Sender) || session.phase != Bb84Phase::Sending {
            return Ok(());
        }
        let indices = self.protocol.reconcile_bases(&session.bases, peer_bases);
        session.shared_bases_indices = indices.clone();
        session.phase = Bb84Phase::ErrorEstimating;
        drop(session);

        self.emit(EventType::BasesReconciled, json!({"shared": indices.len()}));
        self.send_control(ControlMessage::SharedBases { indices })
    }

    /// Receiver side: stores the shared positions and discloses a sample.
    fn on_shared_bases(&self, indices: Vec<usize>) -> Result<(), SimError> {
        let mut session = self.session.lock();
        if !session.is_active(Bb84Role::Receiver) || session.phase != Bb84Phase::Reconciling {
            return Ok(());
        }
        let num_bits = match &session.peer {
            Some(peer) => self.channel_to(peer)?.num_bits(),
            None => session.bits.len(),
        };
        let fraction = self.ctx.config().qkd.sample_fraction;
        let samples = self
            .protocol
            .select_error_sample(&indices, &session.bits, num_bits, fraction);
        session.shared_bases_indices = indices;
        session.phase = Bb84Phase::ErrorEstimating;
        let shared = session.shared_bases_indices.len();
        drop(session);

        self.emit(
            EventType::BasesReconciled,
            json!({"shared": shared, "sample_size": samples.len()}),
        );
        self.send_control(ControlMessage::EstimateErrorRate { samples })
    }

    /// Sender side: compares the disclosed sample and either completes or
    /// aborts the session.
    fn bb84_estimate_error_rate(&self, samples: &[ErrorSample]) -> Result<(), SimError> {
        let mut session = self.session.lock();
        if !session.is_active(Bb84Role::Sender) || session.phase != Bb84Phase::ErrorEstimating {
            return Ok(());
        }
        let threshold = match &session.peer {
            Some(peer) => self.channel_to(peer)?.error_rate_threshold(),
            None => 0.0,
        };
        let error_rate = self.protocol.estimate_error_rate(&session.bits, samples);
        let shared = session.shared_bases_indices.len();
        let accepted = shared > 0 && error_rate <= threshold;
        if accepted {
            session.phase = Bb84Phase::Complete;
        } else {
            session.finish(false, Instant::now());
        }
        drop(session);

        self.emit(
            EventType::ErrorRateEstimated,
            json!({"error_rate": error_rate, "sample_size": samples.len(), "threshold": threshold}),
        );
        if accepted {
            self.send_control(ControlMessage::Complete)
        } else {
            self.emit(
                EventType::QkdAborted,
                json!({"role": Bb84Role::Sender, "error_rate": error_rate, "shared": shared}),
            );
            self.send_control(ControlMessage::Abort { error_rate })
        }
    }

    /// Receiver side: the sender accepted the error rate.
    fn on_complete(&self) -> Result<(), SimError> {
        let mut session = self.session.lock();
        if !session.is_active(Bb84Role::Receiver) || session.phase != Bb84Phase::ErrorEstimating {
            return Ok(());
        }
        let key = session.extract_key();
        session.finish(true, Instant::now());
        drop(session);

        self.establish_key(key, Bb84Role::Receiver);
        self.send_control(ControlMessage::KeyEstablished)
    }

    /// Sender side: the receiver holds its key.
    fn on_key_established(&self) -> Result<(), SimError> {
        let mut session = self.session.lock();
        if !session.is_active(Bb84Role::Sender) || session.phase != Bb84Phase::Complete {
            return Ok(());
        }
        let key = session.extract_key();
        session.finish(true, Instant::now());
        drop(session);

        self.establish_key(key, Bb84Role::Sender);
        Ok(())
    }

    fn establish_key(&self, key: Vec<bool>, role: Bb84Role) {
        *self.shared_key.write() = Some(key.clone());
        self.emit(
            EventType::QkdCompleted,
            json!({"role": role, "key_length": key.len()}),
        );
        let event = match role {
            Bb84Role::Sender => EventType::SharedKeyGenerated,
            Bb84Role::Receiver => EventType::SharedKeyReceived,
        };
        self.emit(event, json!({"key_length": key.len()}));
        if let Some(plane) = self.control_plane() {
            plane.key_established(&key);
        }
    }

    /// Prepares |Φ+>, keeps one half and sends the other to `repeater`.
    pub fn distribute_entanglement(&self, repeater: &Address) -> Result<(), SimError> {
        let channel = self.channel_to(repeater)?;
        let (kept, sent) = Qubit::entangled_pair()?;

        if let Err(err) = channel.transmit_qubit(sent, self.address()) {
            if matches!(err, SimError::Quantum(QuantumError::QubitLoss { .. })) {
                self.emit(
                    EventType::QubitLost,
                    json!({"channel": channel.name(), "purpose": "entanglement"}),
                );
            }
            return Err(err);
        }

        self.entanglement.lock().insert(
            repeater.clone(),
            EntangledHalf {
                qubit: kept,
                partner: None,
                correction: None,
            },
        );
        self.emit(
            EventType::QubitSent,
            json!({"peer": repeater, "purpose": "entanglement"}),
        );
        Ok(())
    }

    fn apply_entanglement_correction(
        &self,
        repeater: &Address,
        correction: PauliCorrection,
        partner: Address,
    ) -> Result<(), SimError> {
        let mut held = self.entanglement.lock();
        let Some(half) = held.get_mut(repeater) else {
            warn!(host = %self.identity, %repeater, "correction for a pair this host does not hold");
            return Ok(());
        };
        half.qubit.apply(&correction.gate())?;
        half.partner = Some(partner.clone());
        half.correction = Some(correction);
        drop(held);

        self.emit(
            EventType::EntanglementEstablished,
            json!({"repeater": repeater, "partner": partner, "correction": correction}),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QuantumChannelConfig, SimulationConfig};
    use crate::events::RecordingSink;
    use crate::quantum::control::DirectLink;

    struct Pair {
        alice: Arc<QuantumHost>,
        bob: Arc<QuantumHost>,
        link: Arc<DirectLink>,
        sink: Arc<RecordingSink>,
    }

    fn pair(config: QuantumChannelConfig) -> Pair {
        let sink = Arc::new(RecordingSink::new());
        let ctx = SimContext::new(SimulationConfig::default(), sink.clone());
        let alice = QuantumHost::new(NodeIdentity::new("alice", "q1", "qnet", "z"), ctx.clone());
        let bob = QuantumHost::new(NodeIdentity::new("bob", "q2", "qnet", "z"), ctx);
        let channel = QuantumChannel::new("alice-bob", alice.port(), bob.port(), config).unwrap();
        alice.add_quantum_channel(channel.clone()).unwrap();
        bob.add_quantum_channel(channel).unwrap();

        let link = Arc::new(DirectLink::new(
            Arc::downgrade(&alice.port()),
            Arc::downgrade(&bob.port()),
        ));
        let plane: Arc<dyn ControlPlane> = link.clone();
        alice.set_control_plane(Arc::downgrade(&plane));
        bob.set_control_plane(Arc::downgrade(&plane));
        Pair { alice, bob, link, sink }
    }

    fn run(p: &Pair, ticks: usize) {
        for _ in 0..ticks {
            p.alice.forward();
            p.bob.forward();
        }
    }

    #[test]
    fn ideal_channel_yields_equal_non_empty_keys() {
        let p = pair(QuantumChannelConfig {
            num_bits: 64,
            ..Default::default()
        });
        assert!(p.alice.initiate_qkd().unwrap());
        run(&p, 5);

        let a = p.alice.shared_key().unwrap();
        let b = p.bob.shared_key().unwrap();
        assert!(!a.is_empty());
        assert_eq!(a, b);
        assert_eq!(p.link.keys().len(), 2);
        assert_eq!(p.alice.session().phase, Bb84Phase::Complete);
        assert!(!p.bob.session().in_progress);
        assert_eq!(p.sink.count(EventType::SharedKeyGenerated), 1);
        assert_eq!(p.sink.count(EventType::SharedKeyReceived), 1);
    }

    #[test]
    fn peers_ticking_on_another_thread_never_see_a_half_built_session() {
        let p = pair(QuantumChannelConfig {
            num_bits: 1500,
            ..Default::default()
        });
        let worker = {
            let (alice, bob) = (p.alice.clone(), p.bob.clone());
            std::thread::spawn(move || {
                let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
                let mut half_built = 0;
                while alice.shared_key().is_none() && std::time::Instant::now() < deadline {
                    let s = alice.session();
                    if s.role == Some(Bb84Role::Sender)
                        && s.phase == Bb84Phase::Sending
                        && s.expected.is_none()
                    {
                        half_built += 1;
                    }
                    bob.forward();
                    alice.forward();
                }
                half_built
            })
        };

        assert!(p.alice.initiate_qkd().unwrap());
        assert_eq!(worker.join().unwrap(), 0);
        run(&p, 5);

        assert_eq!(p.sink.count(EventType::QkdAborted), 0);
        let a = p.alice.shared_key().unwrap();
        assert!(!a.is_empty());
        assert_eq!(Some(a), p.bob.shared_key());
    }

    #[test]
    fn in_progress_guard_and_back_off_skip_new_sessions() {
        let p = pair(QuantumChannelConfig::default());
        assert!(p.alice.initiate_qkd().unwrap());
        assert!(!p.alice.initiate_qkd().unwrap());
        run(&p, 5);
        // finished just now, so the back-off still applies
        assert!(!p.alice.initiate_qkd().unwrap());
        assert_eq!(p.alice.sessions_started(), 1);
        assert_eq!(p.sink.count(EventType::QkdSkipped), 2);
    }

    #[test]
    fn too_noisy_channel_aborts() {
        let p = pair(QuantumChannelConfig {
            noise_model: Some(crate::config::NoiseModel::BitFlip),
            noise_strength: 1.0,
            error_rate_threshold: 0.1,
            num_bits: 64,
            ..Default::default()
        });
        p.alice.initiate_qkd().unwrap();
        run(&p, 5);

        assert!(p.alice.shared_key().is_none());
        assert!(p.bob.shared_key().is_none());
        assert!(!p.alice.session().in_progress);
        assert!(!p.bob.session().in_progress);
        assert!(p.sink.count(EventType::QkdAborted) >= 1);
    }

    #[test]
    fn lost_qubits_are_pruned_before_sifting() {
        let p = pair(QuantumChannelConfig {
            length_km: 1.0,
            loss_per_km: 0.3,
            num_bits: 80,
            ..Default::default()
        });
        p.alice.initiate_qkd().unwrap();
        run(&p, 5);

        let a = p.alice.shared_key().unwrap();
        assert_eq!(Some(a), p.bob.shared_key());
        assert_eq!(p.alice.session().bits.len(), p.bob.session().bits.len());
    }

    #[test]
    fn without_a_channel_qkd_cannot_start() {
        let ctx = SimContext::detached();
        let lonely = QuantumHost::new(NodeIdentity::new("solo", "q9", "qnet", "z"), ctx);
        let err = lonely.initiate_qkd().unwrap_err();
        assert!(matches!(
            err,
            SimError::Quantum(QuantumError::QuantumChannelDoesNotExist { .. })
        ));
    }

    #[test]
    fn simultaneous_initiation_settles_on_one_sender() {
        let p = pair(QuantumChannelConfig::default());
        p.alice.initiate_qkd().unwrap();
        p.bob.initiate_qkd().unwrap();
        run(&p, 6);

        assert_eq!(p.alice.shared_key(), p.bob.shared_key());
        assert!(p.alice.shared_key().is_some());
    }
}
