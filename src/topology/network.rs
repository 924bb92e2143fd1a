use crate::config::NetworkType;
use crate::driver::TickDriver;
use crate::errors::LinkError;
use crate::quantum::QuantumAdapter;
use crate::topology::node::NodeRef;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;

/// Typed container of nodes, ticked as one unit.
#[derive(Debug)]
pub struct Network {
    name: String,
    zone: String,
    kind: NetworkType,
    nodes: RwLock<Vec<NodeRef>>,
    driver: Mutex<Option<TickDriver>>,
}

impl Network {
    pub fn new(name: impl Into<String>, zone: impl Into<String>, kind: NetworkType) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            zone: zone.into(),
            kind,
            nodes: RwLock::new(Vec::new()),
            driver: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub fn kind(&self) -> NetworkType {
        self.kind
    }

    pub fn nodes(&self) -> Vec<NodeRef> {
        self.nodes.read().clone()
    }

    pub(crate) fn add_node(&self, node: NodeRef) {
        self.nodes.write().push(node);
    }

    /// Runs `forward` once on every node, in insertion order.
    pub fn tick(&self) {
        for node in self.nodes() {
            node.forward();
        }
    }

    /// Spawns the tick loop. Returns `false` if it was already running.
    pub fn start(self: &Arc<Self>, period: Duration) -> Result<bool, LinkError> {
        let mut driver = self.driver.lock();
        if driver.as_ref().is_some_and(TickDriver::is_running) {
            return Ok(false);
        }
        let network = Arc::downgrade(self);
        *driver = Some(TickDriver::spawn(self.name.clone(), period, move || {
            if let Some(network) = network.upgrade() {
                network.tick();
            }
        })?);
        Ok(true)
    }

    /// Stops the tick loop. Returns `false` if it was not running.
    pub fn stop(&self) -> bool {
        match self.driver.lock().take() {
            Some(driver) => {
                let was_running = driver.is_running();
                driver.stop();
                was_running
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.driver.lock().as_ref().is_some_and(TickDriver::is_running)
    }
}

/// Named region grouping networks and the adapters bridging them.
#[derive(Debug)]
pub struct Zone {
    name: String,
    networks: Vec<Arc<Network>>,
    adapters: Vec<Arc<QuantumAdapter>>,
}

impl Zone {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            networks: Vec::new(),
            adapters: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn networks(&self) -> &[Arc<Network>] {
        &self.networks
    }

    pub fn adapters(&self) -> &[Arc<QuantumAdapter>] {
        &self.adapters
    }

    pub(crate) fn add_network(&mut self, network: Arc<Network>) {
        self.networks.push(network);
    }

    pub(crate) fn add_adapter(&mut self, adapter: Arc<QuantumAdapter>) {
        self.adapters.push(adapter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classical::ClassicalHost;
    use crate::events::SimContext;
    use crate::identity::NodeIdentity;

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent_and_stop_reports_state() {
        let net = Network::new("lan", "z", NetworkType::Classical);
        net.add_node(NodeRef::Host(ClassicalHost::new(
            NodeIdentity::new("h", "10.0.0.1", "lan", "z"),
            SimContext::detached(),
        )));

        assert!(!net.is_running());
        assert!(net.start(Duration::from_millis(10)).unwrap());
        assert!(!net.start(Duration::from_millis(10)).unwrap());
        assert!(net.is_running());

        assert!(net.stop());
        assert!(!net.is_running());
        assert!(!net.stop());
    }

    #[test]
    fn starting_outside_a_runtime_fails() {
        let net = Network::new("lan", "z", NetworkType::Quantum);
        assert!(matches!(
            net.start(Duration::from_millis(10)),
            Err(LinkError::NoExecutor)
        ));
    }
}
