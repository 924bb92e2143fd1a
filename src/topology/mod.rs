//! World, zones, networks and the node handles they tick.

mod builder;
mod network;
mod node;
mod world;

pub use builder::build_and_wire;
pub use network::{Network, Zone};
pub use node::{ClassicalNode, Node, NodeRef, QuantumNode};
pub use world::World;
