//! Network arena module
//!
//! Holds every node created by the caller, keyed by identifier, with
//! neighbour links stored as identifiers. Unjoined nodes sit in the same
//! table as rings of one.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::dht::node::{owns, Key, Node, NodeId};
use crate::dht::routing::IndexEntry;
use crate::error::{Result, RingError};
use crate::storage::backend::{validate_name, StorageBackend};
use crate::storage::memory::MemoryBackend;

/// Outcome of a ring walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Node whose ownership range contains the key
    pub owner: NodeId,
    /// Number of forwards taken from the starting node
    pub hops: usize,
}

/// A set of ring nodes sharing one storage backend
pub struct Network {
    /// All live nodes
    nodes: HashMap<NodeId, Node>,
    /// Name lookup
    names: HashMap<String, NodeId>,
    /// Blob storage shared by every namespace
    pub(crate) backend: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("nodes", &self.nodes.len())
            .field("storage", &self.backend.storage_type())
            .finish()
    }
}

impl Network {
    /// Create an empty network on top of a storage backend
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            nodes: HashMap::new(),
            names: HashMap::new(),
            backend,
        }
    }

    /// Create an empty network backed by memory
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Get the storage backend
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Create a standalone node and its storage namespace
    pub async fn create_node(&mut self, name: &str) -> Result<NodeId> {
        validate_name(name)?;
        if self.names.contains_key(name) {
            return Err(RingError::duplicate_node(name));
        }

        let node = Node::new(name);
        if let Some(existing) = self.nodes.get(&node.id) {
            return Err(RingError::duplicate_node(format!("{} (id collides with {})", name, existing.name)));
        }

        self.backend.create_namespace(node.namespace()).await?;

        let id = node.id;
        info!("Created node {} with id {}", name, id.short());
        self.names.insert(name.to_string(), id);
        self.nodes.insert(id, node);
        Ok(id)
    }

    /// Look up a node by name
    pub fn node(&self, name: &str) -> Result<&Node> {
        let id = self.id_of(name)?;
        self.node_by_id(&id)
    }

    /// Look up a node by identifier
    pub fn node_by_id(&self, id: &NodeId) -> Result<&Node> {
        self.nodes
            .get(id)
            .ok_or_else(|| RingError::unknown_node(id.short()))
    }

    pub(crate) fn node_mut_by_id(&mut self, id: &NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| RingError::unknown_node(id.short()))
    }

    /// Identifier of a named node
    pub fn id_of(&self, name: &str) -> Result<NodeId> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| RingError::unknown_node(name))
    }

    /// Whether a node with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Number of live nodes (joined or not)
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the network has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Remove a node from the arena
    pub(crate) fn retire(&mut self, id: &NodeId) -> Option<Node> {
        let node = self.nodes.remove(id)?;
        self.names.remove(&node.name);
        debug!("Retired node {}", node.name);
        Some(node)
    }

    /// Whether `node` owns `key` under the ring ownership rule
    pub fn owns_key(node: &Node, key: &Key) -> bool {
        owns(key, &node.id, &node.predecessor, node.is_anchor)
    }

    /// Walk the ring from `start` to the node owning `key`.
    ///
    /// Every step applies the same ownership test before forwarding, so
    /// store and fetch stop at the same node.
    pub fn locate(&self, start: &str, key: &Key) -> Result<Route> {
        let start_id = self.id_of(start)?;
        self.locate_from(&start_id, key)
    }

    pub(crate) fn locate_from(&self, start: &NodeId, key: &Key) -> Result<Route> {
        let mut current = self.node_by_id(start)?;
        let max_hops = self.nodes.len();

        for hops in 0..=max_hops {
            if Self::owns_key(current, key) {
                return Ok(Route { owner: current.id, hops });
            }
            let next = if key > &current.id {
                current.successor
            } else {
                current.predecessor
            };
            current = self.node_by_id(&next)?;
        }

        Err(RingError::routing_error_with_key(
            format!("No owner found after {} hops from {}", max_hops, start.short()),
            key.to_hex(),
        ))
    }

    /// Name of the node owning `key`, starting the walk at `start`
    pub fn owner_of(&self, start: &str, key: &Key) -> Result<&Node> {
        let route = self.locate(start, key)?;
        self.node_by_id(&route.owner)
    }

    /// Anchor of the ring containing `name`
    pub fn anchor_of(&self, name: &str) -> Result<&Node> {
        let start = self.node(name)?;
        let mut current = start;
        for _ in 0..=self.nodes.len() {
            if current.is_anchor {
                return Ok(current);
            }
            current = self.node_by_id(&current.successor)?;
        }
        Err(RingError::routing_error(format!("Ring containing {} has no anchor", name)))
    }

    /// Members of the ring containing `name`, in ascending id order from the anchor
    pub fn ring_members(&self, name: &str) -> Result<Vec<&Node>> {
        let anchor = self.anchor_of(name)?;
        let mut members = vec![anchor];
        let mut current = self.node_by_id(&anchor.successor)?;
        while current.id != anchor.id {
            if members.len() > self.nodes.len() {
                return Err(RingError::routing_error(format!("Successor chain from {} does not close", anchor.name)));
            }
            members.push(current);
            current = self.node_by_id(&current.successor)?;
        }
        Ok(members)
    }

    /// Nodes in the ring containing `start` that claim `key`
    pub fn claimants(&self, start: &str, key: &Key) -> Result<Vec<&Node>> {
        Ok(self
            .ring_members(start)?
            .into_iter()
            .filter(|n| Self::owns_key(n, key))
            .collect())
    }

    /// Index entry stored under blob name `name` anywhere in the ring containing `member`
    pub fn entry_named(&self, member: &str, name: &str) -> Result<Option<(&Node, &IndexEntry)>> {
        for node in self.ring_members(member)? {
            if let Some(entry) = node.index.entries().find(|e| e.location.name == name) {
                return Ok(Some((node, entry)));
            }
        }
        Ok(None)
    }

    /// Node in the ring containing `member` whose index holds `key`
    pub fn holder_of(&self, member: &str, key: &Key) -> Result<Option<&Node>> {
        Ok(self
            .ring_members(member)?
            .into_iter()
            .find(|n| n.index.contains(key)))
    }

    /// Total number of indexed records across all nodes
    pub fn record_count(&self) -> usize {
        self.nodes.values().map(|n| n.index.len()).sum()
    }

    /// Verify the ring invariants for every ring in the network.
    ///
    /// Checks link symmetry, ascending order from a single anchor, that
    /// each ring partitions its node ids and the identifier extremes, and
    /// that every index entry is owned by its holder and stored in its
    /// namespace.
    pub fn check_invariants(&self) -> Result<()> {
        let mut seen: HashSet<NodeId> = HashSet::new();

        for node in self.nodes.values() {
            let succ = self.node_by_id(&node.successor)?;
            let pred = self.node_by_id(&node.predecessor)?;
            if succ.predecessor != node.id || pred.successor != node.id {
                return Err(violation(format!("links around {} are not symmetric", node.name)));
            }
            if node.predecessor == node.id && node.successor != node.id {
                return Err(violation(format!("{} is half-linked", node.name)));
            }

            for entry in node.index.entries() {
                if !Self::owns_key(node, &entry.key) {
                    return Err(violation(format!("{} indexes key {} outside its range", node.name, entry.key.short())));
                }
                if entry.location.namespace != node.namespace() {
                    return Err(violation(format!("{} indexes a blob in namespace {}", node.name, entry.location.namespace)));
                }
            }

            if seen.contains(&node.id) {
                continue;
            }

            let members = self.ring_members(&node.name)?;
            let anchors = members.iter().filter(|n| n.is_anchor).count();
            if anchors != 1 {
                return Err(violation(format!("ring containing {} has {} anchors", node.name, anchors)));
            }
            if members.windows(2).any(|w| w[0].id >= w[1].id) {
                return Err(violation(format!("ring containing {} is not sorted from its anchor", node.name)));
            }

            let mut probes: Vec<Key> = members.iter().map(|n| n.id).collect();
            probes.push(NodeId::MIN);
            probes.push(NodeId::MAX);
            for key in &probes {
                let claimants = members.iter().filter(|n| Self::owns_key(n, key)).count();
                if claimants != 1 {
                    return Err(violation(format!("key {} has {} owners", key.short(), claimants)));
                }
            }

            seen.extend(members.iter().map(|n| n.id));
        }

        Ok(())
    }
}

fn violation(message: String) -> RingError {
    RingError::validation_error(format!("Ring invariant violated: {}", message))
}
