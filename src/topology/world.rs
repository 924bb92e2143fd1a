//! Root of a simulation: zones, networks, nodes and the links between them.

use crate::classical::{ClassicalHost, ClassicalRouter, Connection, InternetExchange};
use crate::config::{ConnectionConfig, NetworkType, QuantumChannelConfig};
use crate::driver::TickDriver;
use crate::errors::{SimError, TopologyError};
use crate::events::{EventSource, EventType, Severity, SimContext};
use crate::identity::{Address, NodeIdentity};
use crate::protocols::bb84::Bb84Protocol;
use crate::quantum::{
    ControlPlane, DirectLink, QuantumAdapter, QuantumChannel, QuantumHost, QuantumRepeater,
};
use crate::topology::network::{Network, Zone};
use crate::topology::node::{ClassicalNode, NodeRef, QuantumNode};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct World {
    name: String,
    size: (f64, f64),
    ctx: Arc<SimContext>,
    exchange: Arc<InternetExchange>,
    zones: IndexMap<String, Zone>,
    networks: IndexMap<String, Arc<Network>>,
    nodes: IndexMap<String, NodeRef>,
    connections: Vec<Arc<Connection>>,
    channels: Vec<Arc<QuantumChannel>>,
    // hosts only hold weak references to their control plane
    control_planes: Vec<Arc<dyn ControlPlane>>,
    exchange_driver: Mutex<Option<TickDriver>>,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("name", &self.name)
            .field("zones", &self.zones.keys().collect::<Vec<_>>())
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl World {
    pub fn new(name: impl Into<String>, ctx: Arc<SimContext>) -> Self {
        let exchange = InternetExchange::new(ctx.clone());
        let mut nodes = IndexMap::new();
        nodes.insert(
            InternetExchange::NAME.to_owned(),
            NodeRef::Exchange(exchange.clone()),
        );
        Self {
            name: name.into(),
            size: (0.0, 0.0),
            ctx,
            exchange,
            zones: IndexMap::new(),
            networks: IndexMap::new(),
            nodes,
            connections: Vec::new(),
            channels: Vec::new(),
            control_planes: Vec::new(),
            exchange_driver: Mutex::new(None),
        }
    }

    pub fn with_size(mut self, size: (f64, f64)) -> Self {
        self.size = size;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> (f64, f64) {
        self.size
    }

    pub fn ctx(&self) -> &Arc<SimContext> {
        &self.ctx
    }

    pub fn exchange(&self) -> &Arc<InternetExchange> {
        &self.exchange
    }

    pub fn zone(&self, name: &str) -> Option<&Zone> {
        self.zones.get(name)
    }

    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.zones.values()
    }

    pub fn network(&self, name: &str) -> Result<&Arc<Network>, TopologyError> {
        self.networks
            .get(name)
            .ok_or_else(|| TopologyError::UnknownNetwork(name.to_owned()))
    }

    pub fn networks(&self) -> impl Iterator<Item = &Arc<Network>> {
        self.networks.values()
    }

    pub fn node(&self, name: &str) -> Result<&NodeRef, TopologyError> {
        self.nodes
            .get(name)
            .ok_or_else(|| TopologyError::UnknownNode(name.to_owned()))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeRef> {
        self.nodes.values()
    }

    pub fn connections(&self) -> &[Arc<Connection>] {
        &self.connections
    }

    pub fn quantum_channels(&self) -> &[Arc<QuantumChannel>] {
        &self.channels
    }

    pub fn host(&self, name: &str) -> Result<Arc<ClassicalHost>, TopologyError> {
        let node = self.node(name)?;
        node.as_host().cloned().ok_or_else(|| wrong_kind(node, "a classical host"))
    }

    pub fn router(&self, name: &str) -> Result<Arc<ClassicalRouter>, TopologyError> {
        let node = self.node(name)?;
        node.as_router().cloned().ok_or_else(|| wrong_kind(node, "a router"))
    }

    pub fn quantum_host(&self, name: &str) -> Result<Arc<QuantumHost>, TopologyError> {
        let node = self.node(name)?;
        node.as_quantum_host()
            .cloned()
            .ok_or_else(|| wrong_kind(node, "a quantum host"))
    }

    pub fn adapter(&self, name: &str) -> Result<Arc<QuantumAdapter>, TopologyError> {
        let node = self.node(name)?;
        node.as_adapter().cloned().ok_or_else(|| wrong_kind(node, "a quantum adapter"))
    }

    pub fn repeater(&self, name: &str) -> Result<Arc<QuantumRepeater>, TopologyError> {
        let node = self.node(name)?;
        node.as_repeater()
            .cloned()
            .ok_or_else(|| wrong_kind(node, "a quantum repeater"))
    }

    pub fn add_zone(&mut self, name: impl Into<String>) -> Result<(), TopologyError> {
        let name = name.into();
        if self.zones.contains_key(&name) {
            return Err(TopologyError::InvalidParameter(format!(
                "zone {name} already exists"
            )));
        }
        self.zones.insert(name.clone(), Zone::new(name));
        Ok(())
    }

    pub fn add_network(
        &mut self,
        zone: &str,
        name: impl Into<String>,
        kind: NetworkType,
    ) -> Result<Arc<Network>, TopologyError> {
        let name = name.into();
        if self.networks.contains_key(&name) {
            return Err(TopologyError::InvalidParameter(format!(
                "network {name} already exists"
            )));
        }
        let zone_entry = self
            .zones
            .get_mut(zone)
            .ok_or_else(|| TopologyError::UnknownZone(zone.to_owned()))?;
        let network = Network::new(name.clone(), zone, kind);
        zone_entry.add_network(network.clone());
        self.networks.insert(name, network.clone());
        Ok(network)
    }

    /// Checks name uniqueness and network type, and builds the identity a
    /// node placed in `network` gets.
    fn identity_in(
        &self,
        network: &str,
        name: &str,
        address: &str,
        required: NetworkType,
    ) -> Result<NodeIdentity, TopologyError> {
        if self.nodes.contains_key(name) {
            return Err(TopologyError::DuplicateNode(name.to_owned()));
        }
        let address = Address::from(address);
        if self.nodes.values().any(|node| node.address() == &address) {
            return Err(TopologyError::InvalidParameter(format!(
                "address {address} is already taken"
            )));
        }
        let net = self.network(network)?;
        if net.kind() != required {
            return Err(TopologyError::UnsupportedNetwork {
                node: name.to_owned(),
                reason: format!(
                    "needs a {:?} network but {} is {:?}",
                    required,
                    net.name(),
                    net.kind()
                ),
            });
        }
        Ok(NodeIdentity::new(name, address, network, net.zone()))
    }

    fn place(&mut self, node: NodeRef) -> Result<(), TopologyError> {
        let identity = node.identity().clone();
        self.network(&identity.network)?.add_node(node.clone());
        debug!(node = %identity, kind = node.kind(), network = %identity.network, "node placed");
        self.nodes.insert(identity.name, node);
        Ok(())
    }

    pub fn add_host(
        &mut self,
        network: &str,
        name: &str,
        address: &str,
    ) -> Result<Arc<ClassicalHost>, TopologyError> {
        let identity = self.identity_in(network, name, address, NetworkType::Classical)?;
        let host = ClassicalHost::new(identity, self.ctx.clone());
        self.place(NodeRef::Host(host.clone()))?;
        Ok(host)
    }

    pub fn add_router(
        &mut self,
        network: &str,
        name: &str,
        address: &str,
    ) -> Result<Arc<ClassicalRouter>, TopologyError> {
        let identity = self.identity_in(network, name, address, NetworkType::Classical)?;
        let router = ClassicalRouter::new(identity, self.ctx.clone(), self.exchange.graph());
        self.place(NodeRef::Router(router.clone()))?;
        Ok(router)
    }

    pub fn add_quantum_host(
        &mut self,
        network: &str,
        name: &str,
        address: &str,
    ) -> Result<Arc<QuantumHost>, TopologyError> {
        let identity = self.identity_in(network, name, address, NetworkType::Quantum)?;
        let host = QuantumHost::new(identity, self.ctx.clone());
        self.place(NodeRef::QuantumHost(host.clone()))?;
        Ok(host)
    }

    /// Quantum host running a caller-supplied BB84 strategy.
    pub fn add_quantum_host_with_protocol(
        &mut self,
        network: &str,
        name: &str,
        address: &str,
        protocol: Arc<dyn Bb84Protocol>,
    ) -> Result<Arc<QuantumHost>, TopologyError> {
        let identity = self.identity_in(network, name, address, NetworkType::Quantum)?;
        let host = QuantumHost::with_protocol(identity, self.ctx.clone(), protocol);
        self.place(NodeRef::QuantumHost(host.clone()))?;
        Ok(host)
    }

    pub fn add_repeater(
        &mut self,
        network: &str,
        name: &str,
        address: &str,
        num_memories: usize,
    ) -> Result<Arc<QuantumRepeater>, TopologyError> {
        let identity = self.identity_in(network, name, address, NetworkType::Quantum)?;
        let repeater = QuantumRepeater::new(identity, self.ctx.clone(), num_memories)?;
        self.place(NodeRef::Repeater(repeater.clone()))?;
        Ok(repeater)
    }

    /// Adds an adapter to a classical network, driving `quantum_host` from
    /// the same zone.
    pub fn add_adapter(
        &mut self,
        network: &str,
        name: &str,
        address: &str,
        quantum_host: &str,
    ) -> Result<Arc<QuantumAdapter>, TopologyError> {
        let identity = self.identity_in(network, name, address, NetworkType::Classical)?;
        let host = self.quantum_host(quantum_host)?;
        if host.identity().zone != identity.zone {
            return Err(TopologyError::UnsupportedNetwork {
                node: name.to_owned(),
                reason: format!(
                    "quantum host {quantum_host} lives in zone {}, not {}",
                    host.identity().zone,
                    identity.zone
                ),
            });
        }
        let taken = self
            .nodes
            .values()
            .filter_map(NodeRef::as_adapter)
            .any(|adapter| adapter.host().address() == host.address());
        if taken {
            return Err(TopologyError::UnsupportedNetwork {
                node: name.to_owned(),
                reason: format!("quantum host {quantum_host} already has an adapter"),
            });
        }

        let adapter = QuantumAdapter::new(identity, self.ctx.clone(), self.exchange.graph(), host);
        self.place(NodeRef::Adapter(adapter.clone()))?;
        if let Some(zone) = self.zones.get_mut(&adapter.identity().zone) {
            zone.add_adapter(adapter.clone());
        }
        Ok(adapter)
    }

    /// Wires a classical connection between two named nodes. A host linked to
    /// a router, exchange or adapter adopts it as gateway if it has none.
    pub fn connect(
        &mut self,
        a: &str,
        b: &str,
        config: ConnectionConfig,
    ) -> Result<Arc<Connection>, SimError> {
        let (na, nb) = (self.node(a)?.clone(), self.node(b)?.clone());
        let ca = classical(&na)?;
        let cb = classical(&nb)?;

        let connection = Connection::new(
            self.ctx.clone(),
            format!("{a}<->{b}"),
            ca.link_end(),
            cb.link_end(),
            config,
        )?;
        ca.add_connection(connection.clone())?;
        cb.add_connection(connection.clone())?;

        for (node, other) in [(&na, &nb), (&nb, &na)] {
            if let Some(host) = node.as_host()
                && other.is_gateway()
            {
                host.learn_gateway(other.address());
            }
        }
        self.connections.push(connection.clone());
        Ok(connection)
    }

    /// Wires a quantum channel. Two hosts without an adapter get a direct
    /// control plane so BB84 can still run between them.
    pub fn add_quantum_channel(
        &mut self,
        a: &str,
        b: &str,
        config: QuantumChannelConfig,
    ) -> Result<Arc<QuantumChannel>, SimError> {
        let (na, nb) = (self.node(a)?.clone(), self.node(b)?.clone());
        let qa = quantum(&na)?;
        let qb = quantum(&nb)?;

        let channel = QuantumChannel::new(format!("{a}~{b}"), qa.port(), qb.port(), config)?;
        qa.add_quantum_channel(channel.clone())?;
        qb.add_quantum_channel(channel.clone())?;

        if let (Some(ha), Some(hb)) = (na.as_quantum_host(), nb.as_quantum_host())
            && !ha.has_control_plane()
            && !hb.has_control_plane()
        {
            let plane: Arc<dyn ControlPlane> = Arc::new(DirectLink::new(
                Arc::downgrade(&ha.port()),
                Arc::downgrade(&hb.port()),
            ));
            ha.set_control_plane(Arc::downgrade(&plane));
            hb.set_control_plane(Arc::downgrade(&plane));
            self.control_planes.push(plane);
        }
        self.channels.push(channel.clone());
        Ok(channel)
    }

    /// Joins two adapters with their dedicated control connection.
    pub fn pair_adapters(
        &mut self,
        a: &str,
        b: &str,
        config: ConnectionConfig,
    ) -> Result<Arc<Connection>, SimError> {
        let aa = self.adapter(a)?;
        let ab = self.adapter(b)?;
        let connection = Connection::new(
            self.ctx.clone(),
            format!("{a}<=>{b}"),
            aa.link_end(),
            ab.link_end(),
            config,
        )?;
        aa.pair(ab.address().clone(), connection.clone())?;
        ab.pair(aa.address().clone(), connection.clone())?;
        self.connections.push(connection.clone());
        Ok(connection)
    }

    fn emit_network(&self, event_type: EventType, network: &Network) {
        self.ctx.emit_with(
            Severity::Info,
            event_type,
            EventSource {
                name: network.name().to_owned(),
                address: Address::from(""),
            },
            json!({"network": network.name(), "zone": network.zone(), "type": network.kind()}),
        );
    }

    fn tick_interval(&self) -> Duration {
        self.ctx.config().tick_interval()
    }

    /// Starts the network's tick loop, and the exchange's on first use.
    /// Returns `false` if the network was already running.
    pub fn start_network(&self, name: &str) -> Result<bool, SimError> {
        let network = self.network(name)?;
        {
            let mut driver = self.exchange_driver.lock();
            if !driver.as_ref().is_some_and(TickDriver::is_running) {
                let exchange = Arc::downgrade(&self.exchange);
                *driver = Some(TickDriver::spawn(
                    InternetExchange::NAME,
                    self.tick_interval(),
                    move || {
                        if let Some(exchange) = exchange.upgrade() {
                            exchange.forward();
                        }
                    },
                )?);
            }
        }
        let started = network.start(self.tick_interval())?;
        if started {
            info!(network = name, "network started");
            self.emit_network(EventType::NetworkStarted, network);
        }
        Ok(started)
    }

    /// Stops the network's tick loop; the exchange stops with the last one.
    /// In-flight deliveries still land.
    pub fn stop_network(&self, name: &str) -> Result<bool, SimError> {
        let network = self.network(name)?;
        Ok(self.stop_one(network))
    }

    fn stop_one(&self, network: &Network) -> bool {
        let stopped = network.stop();
        if stopped {
            info!(network = network.name(), "network stopped");
            self.emit_network(EventType::NetworkStopped, network);
        }
        if !self.networks.values().any(|n| n.is_running())
            && let Some(driver) = self.exchange_driver.lock().take()
        {
            driver.stop();
        }
        stopped
    }

    pub fn is_running(&self, name: &str) -> Result<bool, TopologyError> {
        Ok(self.network(name)?.is_running())
    }

    pub fn start_all(&self) -> Result<(), SimError> {
        for name in self.networks.keys() {
            self.start_network(name)?;
        }
        Ok(())
    }

    pub fn stop_all(&self) {
        for network in self.networks.values() {
            self.stop_one(network);
        }
    }

    /// One manual step: the exchange, then every network in creation order.
    pub fn tick_all(&self) {
        self.exchange.forward();
        for network in self.networks.values() {
            network.tick();
        }
    }

    /// Sends `payload` from the named classical host to the named node.
    pub fn send_message(
        &self,
        from: &str,
        to: &str,
        payload: impl Into<Vec<u8>>,
    ) -> Result<Duration, SimError> {
        let host = self.host(from)?;
        let destination = self.node(to)?.address().clone();
        host.send_data(payload, &destination)
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn wrong_kind(node: &NodeRef, wanted: &str) -> TopologyError {
    TopologyError::UnsupportedNetwork {
        node: node.identity().name.clone(),
        reason: format!("is a {}, not {wanted}", node.kind()),
    }
}

fn classical(node: &NodeRef) -> Result<&dyn ClassicalNode, TopologyError> {
    node.as_classical()
        .ok_or_else(|| wrong_kind(node, "a classical node"))
}

fn quantum(node: &NodeRef) -> Result<&dyn QuantumNode, TopologyError> {
    node.as_quantum().ok_or_else(|| wrong_kind(node, "a quantum node"))
}
