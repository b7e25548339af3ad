// src/monitor/registry.rs

//! C1: the node registry. A persistent (in-process) table of nodes, keyed
//! by node id, with a unique constraint on (formation, node_name) and on
//! (node_host, node_port).
//!
//! All mutations go through a single `parking_lot::Mutex`-guarded table so
//! that transitions touching more than one peer (§4.4, §5) commit as one
//! atomic unit — the in-process analogue of the monitor's real transaction
//! boundary, grounded in the teacher's `Mutex<MasterState>`-per-master
//! locking model (`core/warden/state.rs`).

use crate::error::{PgAutoFailoverError, Result};
use crate::monitor::state::{
    FormationKind, Health, Node, NodeId, ReplicationState, SyncState, WalPosition,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

#[derive(Default)]
struct Table {
    nodes: HashMap<NodeId, Node>,
}

/// The node registry. Cheaply cloneable (`Arc`-backed internally via the
/// enclosing `Arc<NodeRegistry>` the monitor holds).
pub struct NodeRegistry {
    table: Mutex<Table>,
    next_id: AtomicI64,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table::default()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Registers a brand-new node and assigns it an initial reported/goal
    /// state (`init`, immediately advanced to `single` if it is the first
    /// node of its group). Not idempotent: a concurrent call for the same
    /// (host, port) while unresolved returns a `Conflict` (SQLSTATE 55006
    /// in the real monitor); callers must retry.
    pub fn insert_node(
        &self,
        formation_id: &str,
        node_name: &str,
        host: &str,
        port: u16,
        desired_group: Option<i32>,
        kind: FormationKind,
        candidate_priority: u8,
        replication_quorum: bool,
        system_identifier: u64,
    ) -> Result<(NodeId, i32, ReplicationState)> {
        let mut table = self.table.lock();

        if table
            .nodes
            .values()
            .any(|n| n.node_host == host && n.node_port == port)
        {
            return Err(PgAutoFailoverError::Conflict(format!(
                "a node already exists at {host}:{port}"
            )));
        }
        if table
            .nodes
            .values()
            .any(|n| n.formation_id == formation_id && n.node_name == node_name)
        {
            return Err(PgAutoFailoverError::Conflict(format!(
                "node name '{node_name}' already registered in formation '{formation_id}'"
            )));
        }

        let group_id = desired_group.unwrap_or_else(|| {
            // Citus formations place every new node in its own group unless
            // told otherwise; pgsql formations default to group 0.
            match kind {
                FormationKind::Citus => {
                    table
                        .nodes
                        .values()
                        .filter(|n| n.formation_id == formation_id)
                        .map(|n| n.group_id)
                        .max()
                        .map(|g| g + 1)
                        .unwrap_or(0)
                }
                FormationKind::Pgsql => 0,
            }
        });

        // Invariant S: all nodes in a group must share the same system
        // identifier once any of them has ever been secondary. A brand-new
        // group has no established identifier yet, so any value is accepted
        // and becomes the group's reference.
        if let Some(existing) = table
            .nodes
            .values()
            .find(|n| n.formation_id == formation_id && n.group_id == group_id)
            && existing.system_identifier != 0
            && system_identifier != 0
            && existing.system_identifier != system_identifier
        {
            return Err(PgAutoFailoverError::InvariantViolation(format!(
                "system identifier mismatch joining group {group_id}: expected {}, got {system_identifier}",
                existing.system_identifier
            )));
        }

        let is_first_in_group = !table
            .nodes
            .values()
            .any(|n| n.formation_id == formation_id && n.group_id == group_id);

        let node_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let initial_state = if is_first_in_group {
            ReplicationState::Single
        } else {
            ReplicationState::Init
        };

        let now = Instant::now();
        let node = Node {
            node_id,
            formation_id: formation_id.to_string(),
            group_id,
            node_name: node_name.to_string(),
            node_host: host.to_string(),
            node_port: port,
            system_identifier,
            reported_state: initial_state,
            goal_state: initial_state,
            pg_is_running: false,
            pgsr_sync_state: SyncState::Unknown,
            report_time: now,
            wal_report_time: now,
            health: Health::Unknown,
            health_check_time: now,
            state_change_time: now,
            reported_tli: 0,
            reported_lsn: 0,
            candidate_priority,
            replication_quorum,
            node_cluster: "default".to_string(),
        };
        table.nodes.insert(node_id, node);
        Ok((node_id, group_id, initial_state))
    }

    pub fn get(&self, node_id: NodeId) -> Result<Node> {
        self.table
            .lock()
            .nodes
            .get(&node_id)
            .cloned()
            .ok_or_else(|| PgAutoFailoverError::NodeNotFound(node_id.to_string()))
    }

    pub fn find_by_addr(&self, host: &str, port: u16) -> Option<Node> {
        self.table
            .lock()
            .nodes
            .values()
            .find(|n| n.node_host == host && n.node_port == port)
            .cloned()
    }

    pub fn find_by_name(&self, formation_id: &str, node_name: &str) -> Option<Node> {
        self.table
            .lock()
            .nodes
            .values()
            .find(|n| n.formation_id == formation_id && n.node_name == node_name)
            .cloned()
    }

    /// Nodes ordered by node id, per §4.1.
    pub fn list_group(&self, formation_id: &str, group_id: i32) -> Vec<Node> {
        let table = self.table.lock();
        let mut nodes: Vec<Node> = table
            .nodes
            .values()
            .filter(|n| n.formation_id == formation_id && n.group_id == group_id)
            .cloned()
            .collect();
        nodes.sort_by_key(|n| n.node_id);
        nodes
    }

    pub fn get_primary(&self, formation_id: &str, group_id: i32) -> Option<Node> {
        self.list_group(formation_id, group_id)
            .into_iter()
            .find(|n| n.reported_state.is_writable())
    }

    pub fn all_nodes(&self) -> Vec<Node> {
        let table = self.table.lock();
        let mut nodes: Vec<Node> = table.nodes.values().cloned().collect();
        nodes.sort_by_key(|n| n.node_id);
        nodes
    }

    pub fn list_formation(&self, formation_id: &str) -> Vec<Node> {
        let table = self.table.lock();
        let mut nodes: Vec<Node> = table
            .nodes
            .values()
            .filter(|n| n.formation_id == formation_id)
            .cloned()
            .collect();
        nodes.sort_by_key(|n| n.node_id);
        nodes
    }

    pub fn remove_node(&self, node_id: NodeId) -> Result<Node> {
        self.table
            .lock()
            .nodes
            .remove(&node_id)
            .ok_or_else(|| PgAutoFailoverError::NodeNotFound(node_id.to_string()))
    }

    /// Updates the reported columns for one node — the input half of every
    /// `node_active` call.
    pub fn set_reported_state(
        &self,
        node_id: NodeId,
        reported_state: ReplicationState,
        pg_is_running: bool,
        sync_state: SyncState,
        tli: i32,
        lsn: u64,
    ) -> Result<()> {
        let mut table = self.table.lock();
        let node = table
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| PgAutoFailoverError::NodeNotFound(node_id.to_string()))?;
        node.reported_state = reported_state;
        node.pg_is_running = pg_is_running;
        node.pgsr_sync_state = sync_state;
        node.reported_tli = tli;
        node.reported_lsn = lsn;
        node.report_time = Instant::now();
        node.wal_report_time = Instant::now();
        Ok(())
    }

    pub fn update_health(&self, node_id: NodeId, health: Health) -> Result<bool> {
        let mut table = self.table.lock();
        let node = table
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| PgAutoFailoverError::NodeNotFound(node_id.to_string()))?;
        let changed = node.health != health;
        node.health = health;
        node.health_check_time = Instant::now();
        Ok(changed)
    }

    /// Runs `f` with exclusive, atomic access to every node in a group,
    /// guaranteeing that multi-peer writes (e.g. promoting one node while
    /// demoting another) land as a single transaction (§5, invariant W).
    pub fn with_group_mut<T>(
        &self,
        formation_id: &str,
        group_id: i32,
        f: impl FnOnce(&mut Vec<&mut Node>) -> T,
    ) -> T {
        let mut table = self.table.lock();
        let mut group: Vec<&mut Node> = table
            .nodes
            .values_mut()
            .filter(|n| n.formation_id == formation_id && n.group_id == group_id)
            .collect();
        group.sort_by_key(|n| n.node_id);
        f(&mut group)
    }

    pub fn set_candidate_priority(&self, node_id: NodeId, priority: u8) -> Result<()> {
        let mut table = self.table.lock();
        let node = table
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| PgAutoFailoverError::NodeNotFound(node_id.to_string()))?;
        node.candidate_priority = priority;
        Ok(())
    }

    pub fn set_replication_quorum(&self, node_id: NodeId, quorum: bool) -> Result<()> {
        let mut table = self.table.lock();
        let node = table
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| PgAutoFailoverError::NodeNotFound(node_id.to_string()))?;
        node.replication_quorum = quorum;
        Ok(())
    }

    /// Invariant W check, exposed for tests and for the FSM's own assertions.
    pub fn writable_count(&self, formation_id: &str, group_id: i32) -> usize {
        self.list_group(formation_id, group_id)
            .iter()
            .filter(|n| n.reported_state.is_writable())
            .count()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn candidate_wal_position(node: &Node) -> WalPosition {
    node.wal_position()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> NodeRegistry {
        NodeRegistry::new()
    }

    #[test]
    fn first_node_in_group_starts_single() {
        let reg = registry();
        let (id, group, state) = reg
            .insert_node("f", "a", "h1", 5432, None, FormationKind::Pgsql, 100, true, 0)
            .unwrap();
        assert_eq!(id, 1);
        assert_eq!(group, 0);
        assert_eq!(state, ReplicationState::Single);
    }

    #[test]
    fn second_node_in_group_starts_init() {
        let reg = registry();
        reg.insert_node("f", "a", "h1", 5432, None, FormationKind::Pgsql, 100, true, 0)
            .unwrap();
        let (_, _, state) = reg
            .insert_node("f", "b", "h2", 5432, None, FormationKind::Pgsql, 100, true, 0)
            .unwrap();
        assert_eq!(state, ReplicationState::Init);
    }

    #[test]
    fn duplicate_host_port_is_conflict() {
        let reg = registry();
        reg.insert_node("f", "a", "h1", 5432, None, FormationKind::Pgsql, 100, true, 0)
            .unwrap();
        let err = reg
            .insert_node("f", "b", "h1", 5432, None, FormationKind::Pgsql, 100, true, 0)
            .unwrap_err();
        assert!(matches!(err, PgAutoFailoverError::Conflict(_)));
    }

    #[test]
    fn system_identifier_mismatch_is_refused() {
        let reg = registry();
        reg.insert_node(
            "f",
            "a",
            "h1",
            5432,
            Some(0),
            FormationKind::Pgsql,
            100,
            true,
            42,
        )
        .unwrap();
        let err = reg
            .insert_node(
                "f",
                "b",
                "h2",
                5432,
                Some(0),
                FormationKind::Pgsql,
                100,
                true,
                99,
            )
            .unwrap_err();
        assert!(matches!(err, PgAutoFailoverError::InvariantViolation(_)));
    }

    #[test]
    fn writable_count_starts_at_one() {
        let reg = registry();
        reg.insert_node("f", "a", "h1", 5432, None, FormationKind::Pgsql, 100, true, 0)
            .unwrap();
        assert_eq!(reg.writable_count("f", 0), 1);
    }
}
