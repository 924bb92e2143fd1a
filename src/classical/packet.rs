//! Classical packets, MTU fragmentation and destination-side reassembly.

use crate::events::SimContext;
use crate::identity::Address;
use crate::quantum::{ControlMessage, MessageType};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FragmentHeader {
    /// Shared by every fragment of one original packet.
    pub fragment_id: u64,
    pub index: usize,
    pub more_fragments: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassicDataPacket {
    pub id: u64,
    pub source: Address,
    pub destination: Address,
    /// Set while a packet is tunnelled between paired adapters.
    pub final_destination: Option<Address>,
    pub hops: Vec<Address>,
    pub next_hop: Option<Address>,
    pub payload: Vec<u8>,
    pub fragment: Option<FragmentHeader>,
    /// Present on QKD transmission packets; the payload is then a JSON
    /// encoded [`ControlMessage`].
    pub message_type: Option<MessageType>,
}

impl ClassicDataPacket {
    pub fn new(
        ctx: &SimContext,
        source: Address,
        destination: Address,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            id: ctx.next_id(),
            source,
            destination,
            final_destination: None,
            hops: Vec::new(),
            next_hop: None,
            payload: payload.into(),
            fragment: None,
            message_type: None,
        }
    }

    pub fn control(
        ctx: &SimContext,
        source: Address,
        destination: Address,
        message: &ControlMessage,
    ) -> Result<Self, serde_json::Error> {
        let mut packet = Self::new(ctx, source, destination, serde_json::to_vec(message)?);
        packet.message_type = Some(message.message_type());
        Ok(packet)
    }

    /// Payload length in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    pub fn size_bits(&self) -> usize {
        self.size() * 8
    }

    pub fn is_fragment(&self) -> bool {
        self.fragment.is_some()
    }

    pub fn is_control(&self) -> bool {
        self.message_type.is_some()
    }

    pub fn control_message(&self) -> Option<Result<ControlMessage, serde_json::Error>> {
        self.message_type
            .map(|_| serde_json::from_slice::<ControlMessage>(&self.payload))
    }

    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Compact description used in event payloads.
    pub fn summary(&self) -> Value {
        json!({
            "id": self.id,
            "source": self.source,
            "destination": self.destination,
            "final_destination": self.final_destination,
            "next_hop": self.next_hop,
            "size": self.size(),
            "fragment": self.fragment,
            "message_type": self.message_type,
        })
    }

    /// Splits the payload into `ceil(size / mtu)` fragments sharing
    /// `fragment_id`. Packets that fit are returned unchanged.
    pub fn fragment(self, mtu: usize, fragment_id: u64) -> Vec<ClassicDataPacket> {
        if mtu == 0 || self.size() <= mtu || self.is_fragment() {
            return vec![self];
        }

        let count = self.payload.len().div_ceil(mtu);
        self.payload
            .chunks(mtu)
            .enumerate()
            .map(|(index, chunk)| ClassicDataPacket {
                payload: chunk.to_vec(),
                fragment: Some(FragmentHeader {
                    fragment_id,
                    index,
                    more_fragments: index + 1 < count,
                }),
                ..self.clone_header()
            })
            .collect()
    }

    fn clone_header(&self) -> ClassicDataPacket {
        ClassicDataPacket {
            id: self.id,
            source: self.source.clone(),
            destination: self.destination.clone(),
            final_destination: self.final_destination.clone(),
            hops: self.hops.clone(),
            next_hop: self.next_hop.clone(),
            payload: Vec::new(),
            fragment: None,
            message_type: self.message_type,
        }
    }
}

#[derive(Debug)]
struct PendingFragments {
    parts: BTreeMap<usize, ClassicDataPacket>,
    terminal: Option<usize>,
    first_seen: Instant,
}

impl PendingFragments {
    fn is_complete(&self) -> bool {
        match self.terminal {
            Some(last) => (0..=last).all(|i| self.parts.contains_key(&i)),
            None => false,
        }
    }
}

/// Collects fragments per `fragment_id` until the set is complete.
///
/// Arrival order is irrelevant: a set completes once the terminal fragment
/// and every fragment before it are present. Sets still incomplete `timeout`
/// after their first fragment arrived are dropped, since a lost sibling is
/// never resent.
#[derive(Debug)]
pub struct Reassembler {
    timeout: Duration,
    pending: Mutex<IndexMap<u64, PendingFragments>>,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TIMEOUT)
    }
}

impl Reassembler {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: Mutex::new(IndexMap::new()),
        }
    }

    /// Returns the reassembled packet once `fragment` completes its set.
    /// Unfragmented packets pass straight through.
    pub fn accept(&self, fragment: ClassicDataPacket) -> Option<ClassicDataPacket> {
        let Some(header) = fragment.fragment else {
            return Some(fragment);
        };

        let now = Instant::now();
        let mut pending = self.pending.lock();
        self.evict_stale(&mut pending, now);
        let entry = pending
            .entry(header.fragment_id)
            .or_insert_with(|| PendingFragments {
                parts: BTreeMap::new(),
                terminal: None,
                first_seen: now,
            });
        if !header.more_fragments {
            entry.terminal = Some(header.index);
        }
        entry.parts.insert(header.index, fragment);

        if !entry.is_complete() {
            return None;
        }

        let entry = pending.shift_remove(&header.fragment_id)?;
        let mut parts = entry.parts.into_values();
        let mut packet = parts.next()?;
        for part in parts {
            packet.payload.extend_from_slice(&part.payload);
        }
        packet.fragment = None;
        Some(packet)
    }

    fn evict_stale(&self, pending: &mut IndexMap<u64, PendingFragments>, now: Instant) {
        pending.retain(|fragment_id, entry| {
            let fresh = now.duration_since(entry.first_seen) < self.timeout;
            if !fresh {
                debug!(
                    fragment_id,
                    received = entry.parts.len(),
                    "dropping incomplete fragment set"
                );
            }
            fresh
        });
    }

    /// Number of fragment sets still waiting for pieces.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;

    fn packet(size: usize) -> ClassicDataPacket {
        let ctx = SimContext::detached();
        let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        ClassicDataPacket::new(&ctx, "a".into(), "b".into(), payload)
    }

    #[test]
    fn fragment_count_is_ceil_of_size_over_mtu() {
        for (size, mtu, expected) in [(3000, 1500, 2), (3001, 1500, 3), (10, 3, 4), (1500, 1500, 1)] {
            let fragments = packet(size).fragment(mtu, 9);
            assert_eq!(fragments.len(), expected, "size {size} mtu {mtu}");
            assert!(fragments.iter().all(|f| f.size() <= mtu));
        }
    }

    #[test]
    fn only_the_last_fragment_clears_more_fragments() {
        let fragments = packet(4000).fragment(1500, 3);
        let flags: Vec<bool> = fragments
            .iter()
            .map(|f| f.fragment.unwrap().more_fragments)
            .collect();
        assert_eq!(flags, vec![true, true, false]);
        assert!(fragments.iter().all(|f| f.fragment.unwrap().fragment_id == 3));
    }

    #[test]
    fn reassembly_tolerates_any_arrival_order() {
        let original = packet(7321);
        for _ in 0..10 {
            let mut fragments = original.clone().fragment(1000, 42);
            fragments.shuffle(&mut rand::rng());

            let reassembler = Reassembler::default();
            let mut done = Vec::new();
            for f in fragments {
                if let Some(p) = reassembler.accept(f) {
                    done.push(p);
                }
            }
            assert_eq!(done.len(), 1);
            assert_eq!(done[0].payload, original.payload);
            assert!(done[0].fragment.is_none());
            assert_eq!(reassembler.pending(), 0);
        }
    }

    #[test]
    fn terminal_fragment_first_waits_for_the_rest() {
        let mut fragments = packet(30).fragment(10, 1);
        let reassembler = Reassembler::default();
        let last = fragments.pop().unwrap();
        assert!(reassembler.accept(last).is_none());
        assert!(reassembler.accept(fragments.remove(0)).is_none());
        assert!(reassembler.accept(fragments.remove(0)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_incomplete_sets_are_dropped() {
        let reassembler = Reassembler::new(Duration::from_millis(100));
        let mut lossy = packet(30).fragment(10, 1);
        assert!(reassembler.accept(lossy.remove(0)).is_none());

        tokio::time::advance(Duration::from_millis(60)).await;
        let mut healthy = packet(20).fragment(10, 2);
        assert!(reassembler.accept(healthy.remove(0)).is_none());
        assert_eq!(reassembler.pending(), 2);

        // set 1 is now past its timeout, set 2 is not
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(reassembler.accept(healthy.remove(0)).is_some());
        assert_eq!(reassembler.pending(), 0);

        // a straggler from the dropped set starts over rather than completing it
        assert!(reassembler.accept(lossy.remove(0)).is_none());
        assert_eq!(reassembler.pending(), 1);
    }

    #[test]
    fn unfragmented_packets_pass_through() {
        let reassembler = Reassembler::default();
        let p = packet(5);
        assert_eq!(reassembler.accept(p.clone()), Some(p));
    }

    #[test]
    fn control_packets_carry_json() {
        let ctx = SimContext::detached();
        let message = ControlMessage::QubitsSent { count: 12 };
        let p = ClassicDataPacket::control(&ctx, "a".into(), "b".into(), &message).unwrap();
        assert_eq!(p.message_type, Some(MessageType::QubitsSent));
        assert_eq!(p.control_message().unwrap().unwrap(), message);
    }
}
