use crate::classical::{ClassicalHost, ClassicalRouter, Connection, InternetExchange, LinkEnd};
use crate::errors::SimError;
use crate::identity::{Address, NodeIdentity};
use crate::quantum::{QuantumAdapter, QuantumChannel, QuantumHost, QuantumPort, QuantumRepeater};
use std::sync::Arc;

/// Anything a network ticks.
pub trait Node: Send + Sync {
    fn identity(&self) -> &NodeIdentity;

    /// Drains inbound buffers and acts on what arrived.
    fn forward(&self);

    fn address(&self) -> &Address {
        &self.identity().address
    }
}

/// Node with classical interfaces.
pub trait ClassicalNode: Node {
    fn link_end(&self) -> LinkEnd;

    fn add_connection(&self, connection: Arc<Connection>) -> Result<Address, SimError>;
}

/// Node with a quantum port.
pub trait QuantumNode: Node {
    fn port(&self) -> Arc<QuantumPort>;

    fn add_quantum_channel(&self, channel: Arc<QuantumChannel>) -> Result<Address, SimError>;
}

macro_rules! impl_node {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Node for $ty {
                fn identity(&self) -> &NodeIdentity {
                    <$ty>::identity(self)
                }

                fn forward(&self) {
                    <$ty>::forward(self)
                }
            }
        )*
    };
}

impl_node!(
    ClassicalHost,
    ClassicalRouter,
    InternetExchange,
    QuantumHost,
    QuantumAdapter,
    QuantumRepeater,
);

macro_rules! impl_classical_node {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ClassicalNode for $ty {
                fn link_end(&self) -> LinkEnd {
                    <$ty>::link_end(self)
                }

                fn add_connection(&self, connection: Arc<Connection>) -> Result<Address, SimError> {
                    <$ty>::add_connection(self, connection)
                }
            }
        )*
    };
}

impl_classical_node!(ClassicalHost, ClassicalRouter, InternetExchange, QuantumAdapter);

macro_rules! impl_quantum_node {
    ($($ty:ty),* $(,)?) => {
        $(
            impl QuantumNode for $ty {
                fn port(&self) -> Arc<QuantumPort> {
                    <$ty>::port(self)
                }

                fn add_quantum_channel(&self, channel: Arc<QuantumChannel>) -> Result<Address, SimError> {
                    <$ty>::add_quantum_channel(self, channel)
                }
            }
        )*
    };
}

impl_quantum_node!(QuantumHost, QuantumRepeater);

/// Shared handle to any node variant.
#[derive(Debug, Clone)]
pub enum NodeRef {
    Host(Arc<ClassicalHost>),
    Router(Arc<ClassicalRouter>),
    Exchange(Arc<InternetExchange>),
    QuantumHost(Arc<QuantumHost>),
    Adapter(Arc<QuantumAdapter>),
    Repeater(Arc<QuantumRepeater>),
}

impl NodeRef {
    pub fn node(&self) -> &dyn Node {
        match self {
            NodeRef::Host(n) => n.as_ref(),
            NodeRef::Router(n) => n.as_ref(),
            NodeRef::Exchange(n) => n.as_ref(),
            NodeRef::QuantumHost(n) => n.as_ref(),
            NodeRef::Adapter(n) => n.as_ref(),
            NodeRef::Repeater(n) => n.as_ref(),
        }
    }

    pub fn as_classical(&self) -> Option<&dyn ClassicalNode> {
        match self {
            NodeRef::Host(n) => Some(n.as_ref()),
            NodeRef::Router(n) => Some(n.as_ref()),
            NodeRef::Exchange(n) => Some(n.as_ref()),
            NodeRef::Adapter(n) => Some(n.as_ref()),
            NodeRef::QuantumHost(_) | NodeRef::Repeater(_) => None,
        }
    }

    pub fn as_quantum(&self) -> Option<&dyn QuantumNode> {
        match self {
            NodeRef::QuantumHost(n) => Some(n.as_ref()),
            NodeRef::Repeater(n) => Some(n.as_ref()),
            _ => None,
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        self.node().identity()
    }

    pub fn address(&self) -> &Address {
        self.node().address()
    }

    pub fn forward(&self) {
        self.node().forward();
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NodeRef::Host(_) => "host",
            NodeRef::Router(_) => "router",
            NodeRef::Exchange(_) => "internet_exchange",
            NodeRef::QuantumHost(_) => "quantum_host",
            NodeRef::Adapter(_) => "quantum_adapter",
            NodeRef::Repeater(_) => "quantum_repeater",
        }
    }

    /// Whether hosts connected to this node adopt it as default gateway.
    pub fn is_gateway(&self) -> bool {
        matches!(
            self,
            NodeRef::Router(_) | NodeRef::Exchange(_) | NodeRef::Adapter(_)
        )
    }

    pub fn as_host(&self) -> Option<&Arc<ClassicalHost>> {
        match self {
            NodeRef::Host(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_router(&self) -> Option<&Arc<ClassicalRouter>> {
        match self {
            NodeRef::Router(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_quantum_host(&self) -> Option<&Arc<QuantumHost>> {
        match self {
            NodeRef::QuantumHost(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_adapter(&self) -> Option<&Arc<QuantumAdapter>> {
        match self {
            NodeRef::Adapter(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_repeater(&self) -> Option<&Arc<QuantumRepeater>> {
        match self {
            NodeRef::Repeater(n) => Some(n),
            _ => None,
        }
    }
}
