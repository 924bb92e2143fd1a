//! Shortest-path routing context and the Internet Exchange node that owns it.

use crate::classical::connection::{Connection, LinkEnd};
use crate::classical::router::ClassicalRouter;
use crate::errors::SimError;
use crate::events::SimContext;
use crate::identity::{Address, NodeIdentity};
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

/// Undirected graph of router links used for unweighted shortest paths.
#[derive(Debug, Default)]
pub struct RoutingGraph {
    adjacency: RwLock<IndexMap<Address, IndexSet<Address>>>,
}

impl RoutingGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&self, a: &Address, b: &Address) {
        let mut adjacency = self.adjacency.write();
        adjacency.entry(a.clone()).or_default().insert(b.clone());
        adjacency.entry(b.clone()).or_default().insert(a.clone());
    }

    pub fn contains(&self, node: &Address) -> bool {
        self.adjacency.read().contains_key(node)
    }

    pub fn neighbors(&self, node: &Address) -> Vec<Address> {
        self.adjacency
            .read()
            .get(node)
            .map(|n| n.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.read().values().map(IndexSet::len).sum::<usize>() / 2
    }

    /// Breadth-first shortest path including both ends; empty when `to` is
    /// unreachable. Neighbours are explored in insertion order, so equal
    /// length paths resolve the same way every time.
    pub fn shortest_path(&self, from: &Address, to: &Address) -> Vec<Address> {
        if from == to {
            return vec![from.clone()];
        }

        let adjacency = self.adjacency.read();
        if !adjacency.contains_key(from) || !adjacency.contains_key(to) {
            return Vec::new();
        }

        let mut parent: IndexMap<&Address, &Address> = IndexMap::new();
        let mut queue = VecDeque::from([from]);
        parent.insert(from, from);

        while let Some(node) = queue.pop_front() {
            if node == to {
                break;
            }
            for next in adjacency.get(node).into_iter().flatten() {
                if !parent.contains_key(next) {
                    parent.insert(next, node);
                    queue.push_back(next);
                }
            }
        }

        if !parent.contains_key(to) {
            return Vec::new();
        }

        let mut path = vec![to.clone()];
        let mut cursor = to;
        while cursor != from {
            match parent.get(cursor) {
                Some(&prev) => {
                    path.push(prev.clone());
                    cursor = prev;
                }
                None => return Vec::new(),
            }
        }
        path.reverse();
        path
    }

    /// First hop on the shortest path, if there is one.
    pub fn next_hop(&self, from: &Address, to: &Address) -> Option<Address> {
        let path = self.shortest_path(from, to);
        (path.len() > 1).then(|| path[1].clone())
    }
}

/// Default-route node. It forwards like any router and owns the routing
/// graph every router of the simulation registers its links in.
#[derive(Debug)]
pub struct InternetExchange {
    router: ClassicalRouter,
}

impl InternetExchange {
    pub const NAME: &'static str = "internet_exchange";
    pub const ADDRESS: &'static str = "0.0.0.0";

    pub fn new(ctx: Arc<SimContext>) -> Arc<Self> {
        let graph = Arc::new(RoutingGraph::new());
        let identity = NodeIdentity::new(Self::NAME, Self::ADDRESS, "", "");
        Arc::new(Self {
            router: ClassicalRouter::build(identity, ctx, graph),
        })
    }

    pub fn graph(&self) -> Arc<RoutingGraph> {
        self.router.graph().clone()
    }

    pub fn router(&self) -> &ClassicalRouter {
        &self.router
    }

    pub fn identity(&self) -> &NodeIdentity {
        self.router.identity()
    }

    pub fn link_end(&self) -> LinkEnd {
        self.router.link_end()
    }

    pub fn add_connection(&self, connection: Arc<Connection>) -> Result<Address, SimError> {
        self.router.add_connection(connection)
    }

    pub fn forward(&self) {
        self.router.forward();
    }
}
