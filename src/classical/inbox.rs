use crate::errors::TopologyError;
use crate::identity::Address;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Per-neighbour FIFO queues of one node.
///
/// A queue exists only for neighbours registered through a link; delivery
/// workers of different links may push concurrently while the owning node
/// drains from its tick.
#[derive(Debug)]
pub struct Inbox<T> {
    owner: Address,
    queues: Mutex<IndexMap<Address, VecDeque<T>>>,
}

impl<T> Inbox<T> {
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            queues: Mutex::new(IndexMap::new()),
        }
    }

    pub fn owner(&self) -> &Address {
        &self.owner
    }

    pub fn register(&self, neighbor: Address) {
        self.queues.lock().entry(neighbor).or_default();
    }

    pub fn is_registered(&self, neighbor: &Address) -> bool {
        self.queues.lock().contains_key(neighbor)
    }

    pub fn neighbors(&self) -> Vec<Address> {
        self.queues.lock().keys().cloned().collect()
    }

    pub fn push(&self, from: &Address, item: T) -> Result<(), TopologyError> {
        let mut queues = self.queues.lock();
        let queue = queues
            .get_mut(from)
            .ok_or_else(|| TopologyError::BufferNotAssigned {
                node: self.owner.clone(),
                neighbor: from.clone(),
            })?;
        queue.push_back(item);
        Ok(())
    }

    /// Empties every queue, neighbour by neighbour in registration order.
    pub fn drain(&self) -> Vec<(Address, T)> {
        let mut queues = self.queues.lock();
        let mut out = Vec::new();
        for (neighbor, queue) in queues.iter_mut() {
            out.extend(queue.drain(..).map(|item| (neighbor.clone(), item)));
        }
        out
    }

    pub fn len(&self) -> usize {
        self.queues.lock().values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_requires_a_registered_neighbor() {
        let inbox = Inbox::new(Address::from("10.0.0.1"));
        let err = inbox.push(&Address::from("10.0.0.2"), 1u8).unwrap_err();
        assert!(matches!(err, TopologyError::BufferNotAssigned { .. }));

        inbox.register(Address::from("10.0.0.2"));
        inbox.push(&Address::from("10.0.0.2"), 1u8).unwrap();
        assert_eq!(inbox.len(), 1);
    }

    #[test]
    fn drain_keeps_per_neighbor_fifo_order() {
        let inbox = Inbox::new(Address::from("r"));
        let a = Address::from("a");
        let b = Address::from("b");
        inbox.register(a.clone());
        inbox.register(b.clone());

        inbox.push(&b, 10).unwrap();
        inbox.push(&a, 1).unwrap();
        inbox.push(&a, 2).unwrap();

        let drained: Vec<_> = inbox.drain();
        assert_eq!(drained, vec![(a.clone(), 1), (a, 2), (b, 10)]);
        assert!(inbox.is_empty());
    }
}
