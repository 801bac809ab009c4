//! Membership module
//!
//! Join and leave for ring nodes. Both run as three steps: relocate the
//! blobs whose owner changes, then commit links, anchor flags and index
//! entries together. A failed relocation moves already-relocated blobs back
//! and restores the previous links, so the ring is never committed with a
//! record missing from its owner.

use std::collections::HashSet;

use tracing::{debug, error, info, warn};

use crate::dht::network::Network;
use crate::dht::node::{owns, Key, NodeId};
use crate::error::{Result, RingError};
use crate::storage::backend::Location;

/// Outcome of a successful join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinReport {
    /// Name of the node that joined
    pub node: String,
    /// New predecessor of the joined node
    pub predecessor: String,
    /// New successor of the joined node (the node whose range shrank)
    pub successor: String,
    /// Records relocated as part of the join
    pub migrated: usize,
    /// Whether the joined node took over the anchor role
    pub became_anchor: bool,
}

/// Outcome of a successful leave
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveReport {
    /// Name of the node that left
    pub node: String,
    /// Node that absorbed the departing range
    pub successor: String,
    /// Records handed to the successor
    pub transferred: usize,
    /// Whether the anchor role moved to the successor
    pub anchor_handed_over: bool,
}

/// One planned record relocation
#[derive(Debug, Clone)]
struct Transfer {
    key: Key,
    from: NodeId,
    to: NodeId,
    location: Location,
}

/// Link state of one node, kept for rollback
#[derive(Debug, Clone, Copy)]
struct LinkSnapshot {
    id: NodeId,
    predecessor: NodeId,
    successor: NodeId,
    is_anchor: bool,
}

impl Network {
    /// Insert `node` into the ring containing `via`.
    ///
    /// If `via` is standalone the two form a new ring. Records in the
    /// successor's index that fall into the new node's range move to it, as
    /// do records the joining node held while standalone that now belong
    /// elsewhere.
    pub async fn join(&mut self, node: &str, via: &str) -> Result<JoinReport> {
        let new_id = self.id_of(node)?;
        let via_id = self.id_of(via)?;

        if new_id == via_id {
            return Err(RingError::validation_error_with_field("A node cannot join through itself", "via"));
        }
        if self.node_by_id(&new_id)?.is_joined() {
            warn!("Node {} is already in the network, join skipped", node);
            return Err(RingError::already_joined(node));
        }

        self.check_merge_conflicts(&new_id, via)?;

        // Find the node whose range shrinks to admit the newcomer
        let via_node = self.node_by_id(&via_id)?;
        let succ_id = if via_node.is_joined() {
            self.locate_from(&via_id, &new_id)?.owner
        } else {
            via_id
        };
        let pred_id = self.node_by_id(&succ_id)?.predecessor;

        let snapshot = self.snapshot(&[new_id, succ_id, pred_id])?;

        // Splice new between pred and succ
        {
            let new_node = self.node_mut_by_id(&new_id)?;
            new_node.predecessor = pred_id;
            new_node.successor = succ_id;
        }
        self.node_mut_by_id(&pred_id)?.successor = new_id;
        self.node_mut_by_id(&succ_id)?.predecessor = new_id;

        // Newcomer below the anchor becomes the new anchor
        let became_anchor = {
            let succ = self.node_by_id(&succ_id)?;
            succ.is_anchor && new_id < succ.id
        };
        if became_anchor {
            self.node_mut_by_id(&succ_id)?.is_anchor = false;
        }
        self.node_mut_by_id(&new_id)?.is_anchor = became_anchor;

        let plan = match self.plan_join_migration(&new_id, &succ_id) {
            Ok(plan) => plan,
            Err(e) => {
                self.restore(&snapshot);
                return Err(e);
            }
        };

        if let Err(e) = self.relocate(&plan).await {
            self.restore(&snapshot);
            error!("Join of {} aborted: {}", node, e);
            return Err(e);
        }
        self.commit(&plan)?;

        let report = JoinReport {
            node: node.to_string(),
            predecessor: self.node_by_id(&pred_id)?.name.clone(),
            successor: self.node_by_id(&succ_id)?.name.clone(),
            migrated: plan.len(),
            became_anchor,
        };
        info!(
            "Node {} joined between {} and {} ({} records migrated{})",
            report.node,
            report.predecessor,
            report.successor,
            report.migrated,
            if became_anchor { ", now anchor" } else { "" }
        );
        Ok(report)
    }

    /// Remove `node` from its ring, handing its records to its successor.
    ///
    /// A standalone node has nothing to hand over: its namespace is still
    /// torn down and `NotJoined` is returned. Either way the node is gone
    /// from the network afterwards.
    pub async fn leave(&mut self, node: &str) -> Result<LeaveReport> {
        let id = self.id_of(node)?;
        let leaving = self.node_by_id(&id)?;

        if !leaving.is_joined() {
            warn!("Node {} is already outside the network, tearing down its storage", node);
            let namespace = leaving.namespace().to_string();
            self.retire(&id);
            self.backend.destroy_namespace(&namespace).await?;
            return Err(RingError::not_joined(node));
        }

        let succ_id = leaving.successor;
        let pred_id = leaving.predecessor;
        let was_anchor = leaving.is_anchor;

        let plan: Vec<Transfer> = leaving
            .index
            .entries()
            .map(|e| Transfer {
                key: e.key,
                from: id,
                to: succ_id,
                location: e.location.clone(),
            })
            .collect();
        self.check_conflicts(&plan)?;

        if let Err(e) = self.relocate(&plan).await {
            error!("Leave of {} aborted: {}", node, e);
            return Err(e);
        }
        self.commit(&plan)?;

        self.node_mut_by_id(&pred_id)?.successor = succ_id;
        {
            let succ = self.node_mut_by_id(&succ_id)?;
            succ.predecessor = pred_id;
            if was_anchor {
                succ.is_anchor = true;
            }
        }

        let successor = self.node_by_id(&succ_id)?.name.clone();
        let mut departed = self
            .retire(&id)
            .ok_or_else(|| RingError::unknown_node(node))?;
        departed.reset();

        self.backend
            .destroy_namespace(departed.namespace())
            .await
            .map_err(|e| e.with_context(format!("after {} left the ring", node)))?;

        let report = LeaveReport {
            node: node.to_string(),
            successor,
            transferred: plan.len(),
            anchor_handed_over: was_anchor,
        };
        info!(
            "Node {} left, {} records handed to {}{}",
            report.node,
            report.transferred,
            report.successor,
            if was_anchor { " (new anchor)" } else { "" }
        );
        Ok(report)
    }

    /// Records that change owner once `new_id` sits before `succ_id`
    fn plan_join_migration(&self, new_id: &NodeId, succ_id: &NodeId) -> Result<Vec<Transfer>> {
        let new_node = self.node_by_id(new_id)?;
        let succ = self.node_by_id(succ_id)?;

        let mut plan: Vec<Transfer> = succ
            .index
            .entries()
            .filter(|e| owns(&e.key, &new_node.id, &new_node.predecessor, new_node.is_anchor))
            .map(|e| Transfer {
                key: e.key,
                from: *succ_id,
                to: *new_id,
                location: e.location.clone(),
            })
            .collect();

        // Records the newcomer stored while it owned the whole space
        for entry in new_node.index.entries() {
            if Self::owns_key(new_node, &entry.key) {
                continue;
            }
            let owner = self.locate_from(new_id, &entry.key)?.owner;
            plan.push(Transfer {
                key: entry.key,
                from: *new_id,
                to: owner,
                location: entry.location.clone(),
            });
        }

        self.check_conflicts(&plan)?;
        Ok(plan)
    }

    /// Refuse to merge a standalone node whose records clash with the ring it joins.
    ///
    /// A key already held in the ring, or a blob name already used there,
    /// would otherwise replace a ring record or break name uniqueness.
    fn check_merge_conflicts(&self, new_id: &NodeId, via: &str) -> Result<()> {
        let newcomer = self.node_by_id(new_id)?;
        for entry in newcomer.index.entries() {
            if let Some(holder) = self.holder_of(via, &entry.key)? {
                return Err(RingError::migration_failure_full(
                    format!("Key {} is already stored in the ring", entry.key.short()),
                    holder.name.clone(),
                    "duplicate key",
                ));
            }
            if let Some((holder, _)) = self.entry_named(via, &entry.location.name)? {
                return Err(RingError::migration_failure_full(
                    format!("Blob name '{}' already used by another record", entry.location.name),
                    holder.name.clone(),
                    "name conflict",
                ));
            }
        }
        Ok(())
    }

    /// Refuse plans that would overwrite another record's key or blob
    fn check_conflicts(&self, plan: &[Transfer]) -> Result<()> {
        let mut claimed: HashSet<(NodeId, &str)> = HashSet::new();
        for transfer in plan {
            let target = self.node_by_id(&transfer.to)?;
            if transfer.from != transfer.to && target.index.contains(&transfer.key) {
                return Err(RingError::migration_failure_full(
                    format!("Key {} is already indexed at the target", transfer.key.short()),
                    target.name.clone(),
                    "duplicate key",
                ));
            }

            let name = transfer.location.name.as_str();
            let taken = target
                .index
                .entries()
                .any(|e| e.location.name == name && e.key != transfer.key);
            if taken || !claimed.insert((transfer.to, name)) {
                return Err(RingError::migration_failure_full(
                    format!("Blob name '{}' already used by another record", name),
                    target.name.clone(),
                    "name conflict",
                ));
            }
        }
        Ok(())
    }

    /// Move every planned blob; on failure move the finished ones back
    async fn relocate(&self, plan: &[Transfer]) -> Result<()> {
        for (done, transfer) in plan.iter().enumerate() {
            let to_ns = self.node_by_id(&transfer.to)?.namespace().to_string();
            let from_ns = transfer.location.namespace.as_str();
            let name = transfer.location.name.as_str();

            if let Err(e) = self.backend.move_blob(from_ns, &to_ns, name).await {
                error!("Failed to move {} to {}: {}", transfer.location, to_ns, e);
                let stranded = self.roll_back(&plan[..done]).await;
                let source = if stranded.is_empty() {
                    e.to_string()
                } else {
                    format!("{}; rollback left {} in place", e, stranded.join(", "))
                };
                return Err(RingError::migration_failure_full(
                    format!("Failed to relocate '{}' for key {}", name, transfer.key.short()),
                    to_ns,
                    source,
                ));
            }
            debug!("Moved {} -> {}/{}", transfer.location, to_ns, name);
        }
        Ok(())
    }

    /// Move relocated blobs back; returns the ones that could not be returned
    async fn roll_back(&self, moved: &[Transfer]) -> Vec<String> {
        let mut stranded = Vec::new();
        for transfer in moved.iter().rev() {
            let to_ns = match self.node_by_id(&transfer.to) {
                Ok(node) => node.namespace().to_string(),
                Err(_) => {
                    stranded.push(transfer.location.to_string());
                    continue;
                }
            };
            let name = transfer.location.name.as_str();
            if let Err(e) = self.backend.move_blob(&to_ns, &transfer.location.namespace, name).await {
                error!("Rollback could not return {} from {}: {}", transfer.location, to_ns, e);
                stranded.push(format!("{}/{}", to_ns, name));
            }
        }
        stranded
    }

    /// Re-home index entries after their blobs moved
    fn commit(&mut self, plan: &[Transfer]) -> Result<()> {
        for transfer in plan {
            self.node_mut_by_id(&transfer.from)?.index.remove(&transfer.key);
            let target = self.node_mut_by_id(&transfer.to)?;
            let location = transfer.location.relocated(&target.name);
            target.index.insert(transfer.key, location);
        }
        Ok(())
    }

    fn snapshot(&self, ids: &[NodeId]) -> Result<Vec<LinkSnapshot>> {
        ids.iter()
            .map(|id| {
                let node = self.node_by_id(id)?;
                Ok(LinkSnapshot {
                    id: node.id,
                    predecessor: node.predecessor,
                    successor: node.successor,
                    is_anchor: node.is_anchor,
                })
            })
            .collect()
    }

    fn restore(&mut self, snapshot: &[LinkSnapshot]) {
        for saved in snapshot {
            if let Ok(node) = self.node_mut_by_id(&saved.id) {
                node.predecessor = saved.predecessor;
                node.successor = saved.successor;
                node.is_anchor = saved.is_anchor;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::node::hash_name;
    use crate::storage::backend::{StorageBackend, StorageType};
    use crate::storage::memory::MemoryBackend;
    use async_trait::async_trait;
    use bytes::Bytes;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    async fn ring(names: &[&str]) -> Network {
        let mut network = Network::in_memory();
        for name in names {
            network.create_node(name).await.unwrap();
        }
        for name in &names[1..] {
            network.join(name, names[0]).await.unwrap();
        }
        network
    }

    fn owner_name(network: &Network, start: &str, key: &Key) -> String {
        network.owner_of(start, key).unwrap().name.clone()
    }

    #[tokio::test]
    async fn test_two_node_ring_anchor_is_smaller() {
        let network = ring(&["a", "b"]).await;

        let a = network.node("a").unwrap();
        let b = network.node("b").unwrap();
        assert_eq!(a.successor, b.id);
        assert_eq!(a.predecessor, b.id);
        assert_eq!(b.successor, a.id);

        let smaller = if a.id < b.id { "a" } else { "b" };
        assert!(network.node(smaller).unwrap().is_anchor);
        network.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn test_five_node_ring_sorted() {
        let network = ring(&["a", "b", "c", "d", "e"]).await;
        network.check_invariants().unwrap();

        let members = network.ring_members("c").unwrap();
        assert_eq!(members.len(), 5);
        assert!(members.windows(2).all(|w| w[0].id < w[1].id));
        assert!(members[0].is_anchor);
        assert_eq!(members.iter().filter(|n| n.is_anchor).count(), 1);
    }

    #[tokio::test]
    async fn test_join_order_does_not_matter() {
        let forward = ring(&["a", "b", "c", "d", "e"]).await;
        let backward = ring(&["e", "d", "c", "b", "a"]).await;

        let f: Vec<NodeId> = forward.ring_members("a").unwrap().iter().map(|n| n.id).collect();
        let b: Vec<NodeId> = backward.ring_members("a").unwrap().iter().map(|n| n.id).collect();
        assert_eq!(f, b);
    }

    #[tokio::test]
    async fn test_join_twice_is_rejected_without_mutation() {
        let mut network = ring(&["a", "b", "c"]).await;
        let before: Vec<(NodeId, NodeId, bool)> = network
            .ring_members("a")
            .unwrap()
            .iter()
            .map(|n| (n.predecessor, n.successor, n.is_anchor))
            .collect();

        let result = network.join("b", "c").await;
        assert!(matches!(result, Err(RingError::AlreadyJoined { .. })));

        let after: Vec<(NodeId, NodeId, bool)> = network
            .ring_members("a")
            .unwrap()
            .iter()
            .map(|n| (n.predecessor, n.successor, n.is_anchor))
            .collect();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_join_through_itself_rejected() {
        let mut network = Network::in_memory();
        network.create_node("a").await.unwrap();
        let result = network.join("a", "a").await;
        assert!(matches!(result, Err(RingError::ValidationError { .. })));
    }

    #[tokio::test]
    async fn test_partition_property() {
        let network = ring(&["a", "b", "c", "d", "e", "f", "g"]).await;
        let mut rng = StdRng::seed_from_u64(7);

        let mut probes = vec![NodeId::MIN, NodeId::MAX];
        for node in network.ring_members("a").unwrap() {
            probes.push(node.id);
        }
        for _ in 0..200 {
            let mut bytes = [0u8; 32];
            rng.fill(&mut bytes);
            probes.push(NodeId::new(bytes));
        }

        for key in &probes {
            let claimants = network.claimants("a", key).unwrap();
            assert_eq!(claimants.len(), 1, "key {} has {} owners", key.short(), claimants.len());
            assert_eq!(claimants[0].id, network.locate("d", key).unwrap().owner);
        }
    }

    #[tokio::test]
    async fn test_join_migrates_records() {
        let mut network = ring(&["a", "b", "c"]).await;
        for i in 0..40 {
            let name = format!("rec{}", i);
            network
                .store("a", hash_name(&name), Bytes::from(name.clone()), &name)
                .await
                .unwrap();
        }
        let before = network.record_count();

        network.create_node("d").await.unwrap();
        let d_id = hash_name("d");
        let report = network.join("d", "b").await.unwrap();

        assert_eq!(network.record_count(), before);
        let d = network.node("d").unwrap();
        assert_eq!(d.index.len(), report.migrated);
        for entry in d.index.entries() {
            assert_eq!(entry.location.namespace, "d");
        }
        assert_eq!(owner_name(&network, "a", &d_id), "d");

        for i in 0..40 {
            let name = format!("rec{}", i);
            let value = network.fetch_value("c", &hash_name(&name)).await.unwrap();
            assert_eq!(value, Bytes::from(name));
        }
        network.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn test_standalone_records_rehomed_on_join() {
        let mut network = ring(&["a", "b", "c"]).await;
        network.create_node("d").await.unwrap();
        for i in 0..20 {
            let name = format!("solo{}", i);
            network
                .store("d", hash_name(&name), Bytes::from(name.clone()), &name)
                .await
                .unwrap();
        }
        assert_eq!(network.node("d").unwrap().index.len(), 20);

        network.join("d", "a").await.unwrap();

        assert_eq!(network.record_count(), 20);
        network.check_invariants().unwrap();
        for i in 0..20 {
            let name = format!("solo{}", i);
            let value = network.fetch_value("a", &hash_name(&name)).await.unwrap();
            assert_eq!(value, Bytes::from(name));
        }
    }

    #[tokio::test]
    async fn test_leave_hands_records_to_successor() {
        let mut network = ring(&["a", "b", "c", "d", "e"]).await;
        let key = hash_name("k1");
        network.store("b", key, Bytes::from_static(b"hello"), "k1").await.unwrap();

        let owners: Vec<String> = ["a", "b", "c", "d", "e"]
            .iter()
            .filter(|n| network.node(n).unwrap().index.contains(&key))
            .map(|n| n.to_string())
            .collect();
        assert_eq!(owners.len(), 1);
        let owner = owners[0].clone();
        let successor_id = network.node(&owner).unwrap().successor;
        let successor = network.node_by_id(&successor_id).unwrap().name.clone();

        let report = network.leave(&owner).await.unwrap();
        assert_eq!(report.successor, successor);
        assert_eq!(report.transferred, 1);
        assert!(!network.contains(&owner));

        assert_eq!(owner_name(&network, &successor, &key), successor);
        let location = network.fetch(&successor, &key).unwrap();
        assert_eq!(location.namespace, successor);
        let value = network.read(&location).await.unwrap();
        assert_eq!(value, Bytes::from_static(b"hello"));
        network.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn test_leave_anchor_hands_over_role() {
        let mut network = ring(&["a", "b", "c", "d"]).await;
        let anchor = network.anchor_of("a").unwrap().name.clone();
        let successor_id = network.anchor_of("a").unwrap().successor;

        let report = network.leave(&anchor).await.unwrap();
        assert!(report.anchor_handed_over);

        let new_anchor = network.node_by_id(&successor_id).unwrap();
        assert!(new_anchor.is_anchor);
        network.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn test_leave_down_to_one_node() {
        let mut network = ring(&["a", "b"]).await;
        network.store("a", hash_name("x"), Bytes::from_static(b"x"), "x").await.unwrap();
        network.store("a", hash_name("y"), Bytes::from_static(b"y"), "y").await.unwrap();

        network.leave("a").await.unwrap();

        let b = network.node("b").unwrap();
        assert!(!b.is_joined());
        assert!(b.is_anchor);
        assert_eq!(b.index.len(), 2);
        network.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn test_leave_unjoined_tears_down_storage() {
        let backend = Arc::new(MemoryBackend::new());
        let mut network = Network::new(backend.clone());
        network.create_node("a").await.unwrap();
        network.store("a", hash_name("x"), Bytes::from_static(b"x"), "x").await.unwrap();

        let result = network.leave("a").await;
        assert!(matches!(result, Err(RingError::NotJoined { .. })));
        assert!(!backend.has_namespace("a"));
        assert!(!network.contains("a"));
    }

    #[tokio::test]
    async fn test_rejoin_after_leave_is_fresh() {
        let mut network = ring(&["a", "b", "c"]).await;
        network.leave("b").await.unwrap();

        network.create_node("b").await.unwrap();
        assert!(network.node("b").unwrap().index.is_empty());
        network.join("b", "c").await.unwrap();
        assert_eq!(network.ring_members("a").unwrap().len(), 3);
        network.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn test_no_data_loss_under_churn() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut network = Network::in_memory();
        let mut members: Vec<String> = Vec::new();

        for i in 0..8 {
            let name = format!("n{}", i);
            network.create_node(&name).await.unwrap();
            if let Some(via) = members.first() {
                network.join(&name, via).await.unwrap();
            }
            members.push(name);
        }

        let mut records = Vec::new();
        for i in 0..60 {
            let name = format!("record{}", i);
            let key = hash_name(&name);
            let value = Bytes::from(format!("value-{}", i));
            let start = &members[rng.gen_range(0..members.len())];
            network.store(start, key, value.clone(), &name).await.unwrap();
            records.push((key, value));
        }

        let mut fresh = 0;
        for _ in 0..40 {
            if members.len() > 2 && rng.gen_bool(0.5) {
                let victim = members.remove(rng.gen_range(0..members.len()));
                network.leave(&victim).await.unwrap();
            } else {
                let name = format!("m{}", fresh);
                fresh += 1;
                let via = members[rng.gen_range(0..members.len())].clone();
                network.create_node(&name).await.unwrap();
                network.join(&name, &via).await.unwrap();
                members.push(name);
            }

            network.check_invariants().unwrap();
            assert_eq!(network.record_count(), records.len());
            let start = &members[rng.gen_range(0..members.len())];
            for (key, value) in &records {
                assert_eq!(&network.fetch_value(start, key).await.unwrap(), value);
            }
        }
    }

    /// Memory backend that refuses moves into one namespace after a number of successes
    struct FlakyBackend {
        inner: MemoryBackend,
        target: Mutex<String>,
        allowed: AtomicUsize,
        pin_target: AtomicBool,
    }

    impl FlakyBackend {
        fn new() -> Self {
            Self {
                inner: MemoryBackend::new(),
                target: Mutex::new(String::new()),
                allowed: AtomicUsize::new(0),
                pin_target: AtomicBool::new(false),
            }
        }

        fn fail_moves_into(&self, namespace: &str, allowed: usize) {
            *self.target.lock().unwrap() = namespace.to_string();
            self.allowed.store(allowed, Ordering::SeqCst);
        }

        /// Also refuse every move out of the target namespace
        fn pin_target(&self, pinned: bool) {
            self.pin_target.store(pinned, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl StorageBackend for FlakyBackend {
        async fn create_namespace(&self, namespace: &str) -> Result<()> {
            self.inner.create_namespace(namespace).await
        }

        async fn destroy_namespace(&self, namespace: &str) -> Result<()> {
            self.inner.destroy_namespace(namespace).await
        }

        async fn put(&self, namespace: &str, name: &str, data: Bytes) -> Result<()> {
            self.inner.put(namespace, name, data).await
        }

        async fn get(&self, namespace: &str, name: &str) -> Result<Option<Bytes>> {
            self.inner.get(namespace, name).await
        }

        async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
            self.inner.delete(namespace, name).await
        }

        async fn list(&self, namespace: &str) -> Result<Vec<String>> {
            self.inner.list(namespace).await
        }

        async fn move_blob(&self, from: &str, to: &str, name: &str) -> Result<()> {
            if self.pin_target.load(Ordering::SeqCst) && *self.target.lock().unwrap() == from {
                return Err(RingError::storage_error_with_namespace("injected failure", from));
            }
            let refused = *self.target.lock().unwrap() == to;
            if refused {
                let left = self.allowed.load(Ordering::SeqCst);
                if left == 0 {
                    return Err(RingError::storage_error_with_namespace("injected failure", to));
                }
                self.allowed.store(left - 1, Ordering::SeqCst);
            }
            self.inner.move_blob(from, to, name).await
        }

        fn storage_type(&self) -> StorageType {
            StorageType::Memory
        }
    }

    /// `id - delta` in the identifier space
    fn minus(id: NodeId, delta: u8) -> NodeId {
        let mut bytes = id.0;
        let mut borrow = delta as i16;
        for b in bytes.iter_mut().rev() {
            let v = *b as i16 - borrow;
            if v < 0 {
                *b = (v + 256) as u8;
                borrow = 1;
            } else {
                *b = v as u8;
                borrow = 0;
            }
            if borrow == 0 {
                break;
            }
        }
        NodeId(bytes)
    }

    async fn flaky_ring() -> (Arc<FlakyBackend>, Network, Vec<(Key, Bytes)>) {
        let backend = Arc::new(FlakyBackend::new());
        let mut network = Network::new(backend.clone());
        for name in ["a", "b", "c", "d"] {
            network.create_node(name).await.unwrap();
        }
        for name in ["b", "c", "d"] {
            network.join(name, "a").await.unwrap();
        }
        let mut records = Vec::new();
        for i in 0..30 {
            let name = format!("r{}", i);
            let key = hash_name(&name);
            let value = Bytes::from(name.clone());
            network.store("a", key, value.clone(), &name).await.unwrap();
            records.push((key, value));
        }
        (backend, network, records)
    }

    fn links(network: &Network) -> Vec<(String, NodeId, NodeId, bool)> {
        network
            .ring_members("a")
            .unwrap()
            .iter()
            .map(|n| (n.name.clone(), n.predecessor, n.successor, n.is_anchor))
            .collect()
    }

    #[tokio::test]
    async fn test_join_migration_failure_rolls_back() {
        let (backend, mut network, mut records) = flaky_ring().await;

        // Three records just below hash("e") are certain to move to "e"
        let e_id = hash_name("e");
        for delta in 0..3u8 {
            let name = format!("near_e_{}", delta);
            let value = Bytes::from(name.clone());
            let key = minus(e_id, delta);
            network.store("b", key, value.clone(), &name).await.unwrap();
            records.push((key, value));
        }

        network.create_node("e").await.unwrap();
        backend.fail_moves_into("e", 1);
        let before = links(&network);

        let result = network.join("e", "a").await;
        assert!(matches!(result, Err(RingError::MigrationFailure { .. })));

        assert_eq!(links(&network), before);
        assert!(!network.node("e").unwrap().is_joined());
        assert!(network.node("e").unwrap().index.is_empty());
        assert!(backend.inner.list("e").await.unwrap().is_empty());
        network.check_invariants().unwrap();
        for (key, value) in &records {
            assert_eq!(&network.fetch_value("c", key).await.unwrap(), value);
        }

        // Once the backend recovers the same join goes through
        backend.fail_moves_into("", 0);
        let report = network.join("e", "a").await.unwrap();
        assert!(report.migrated >= 3);
        network.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn test_leave_migration_failure_keeps_node() {
        let (backend, mut network, records) = flaky_ring().await;

        let holder = ["a", "b", "c", "d"]
            .iter()
            .find(|n| !network.node(n).unwrap().index.is_empty())
            .map(|n| n.to_string())
            .unwrap();
        let held = network.node(&holder).unwrap().index.len();
        let succ_id = network.node(&holder).unwrap().successor;
        let succ = network.node_by_id(&succ_id).unwrap().name.clone();

        backend.fail_moves_into(&succ, 0);
        let before = links(&network);

        let result = network.leave(&holder).await;
        assert!(matches!(result, Err(RingError::MigrationFailure { .. })));

        assert_eq!(links(&network), before);
        assert_eq!(network.node(&holder).unwrap().index.len(), held);
        network.check_invariants().unwrap();
        for (key, value) in &records {
            assert_eq!(&network.fetch_value("a", key).await.unwrap(), value);
        }
    }

    #[tokio::test]
    async fn test_failed_rollback_reported_in_error() {
        let (backend, mut network, _records) = flaky_ring().await;

        let e_id = hash_name("e");
        for delta in 0..3u8 {
            let name = format!("near_e_{}", delta);
            network.store("b", minus(e_id, delta), Bytes::from(name.clone()), &name).await.unwrap();
        }

        network.create_node("e").await.unwrap();
        backend.fail_moves_into("e", 1);
        backend.pin_target(true);

        let err = network.join("e", "a").await.unwrap_err();
        match err {
            RingError::MigrationFailure { source: Some(source), .. } => {
                assert!(source.contains("rollback left e/"), "source was: {}", source);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(!network.node("e").unwrap().is_joined());
    }

    #[tokio::test]
    async fn test_join_rejects_key_already_in_ring() {
        let mut network = ring(&["a", "b", "c"]).await;
        let key = hash_name("dup");
        network.store("a", key, Bytes::from_static(b"ring"), "ring_copy").await.unwrap();

        network.create_node("d").await.unwrap();
        network.store("d", key, Bytes::from_static(b"solo"), "solo_copy").await.unwrap();
        let before = links(&network);

        let result = network.join("d", "a").await;
        assert!(matches!(result, Err(RingError::MigrationFailure { .. })));

        assert_eq!(links(&network), before);
        assert!(!network.node("d").unwrap().is_joined());
        assert_eq!(network.record_count(), 2);
        assert_eq!(network.fetch_value("b", &key).await.unwrap(), Bytes::from_static(b"ring"));
        assert_eq!(network.fetch_value("d", &key).await.unwrap(), Bytes::from_static(b"solo"));
        network.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn test_join_rejects_blob_name_already_in_ring() {
        let mut network = ring(&["a", "b", "c"]).await;
        network.store("a", hash_name("one"), Bytes::from_static(b"1"), "shared").await.unwrap();

        network.create_node("d").await.unwrap();
        network.store("d", hash_name("two"), Bytes::from_static(b"2"), "shared").await.unwrap();

        let result = network.join("d", "b").await;
        assert!(matches!(result, Err(RingError::MigrationFailure { .. })));
        assert!(!network.node("d").unwrap().is_joined());
        assert_eq!(network.record_count(), 2);
    }

    #[tokio::test]
    async fn test_shared_name_cannot_block_leave() {
        let names = ["n0", "n1", "n2", "n3", "n4", "n5"];
        let mut network = ring(&names).await;

        let k1 = hash_name("k1");
        network.store("n0", k1, Bytes::from_static(b"first"), "shared").await.unwrap();
        let owner = owner_name(&network, "n0", &k1);

        // The same name under another key is refused wherever that key lands
        for (i, start) in names.iter().enumerate() {
            let other = hash_name(&format!("other{}", i));
            let result = network.store(start, other, Bytes::from_static(b"second"), "shared").await;
            assert!(matches!(result, Err(RingError::ValidationError { .. })));
        }

        let report = network.leave(&owner).await.unwrap();
        assert_eq!(report.transferred, 1);
        assert_eq!(network.fetch_value(&report.successor, &k1).await.unwrap(), Bytes::from_static(b"first"));
        network.check_invariants().unwrap();
    }
}
