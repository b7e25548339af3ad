// src/rpc/messages.rs

//! The typed monitor RPC surface (§6). Every keeper-to-monitor call and its
//! response is one variant here; `src/rpc/codec.rs` frames these over TCP.

use crate::monitor::state::{NodeId, ReplicationState, SyncState};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    RegisterNode {
        formation_id: String,
        node_name: String,
        host: String,
        port: u16,
        desired_group: Option<i32>,
        dbname: String,
        candidate_priority: u8,
        replication_quorum: bool,
        system_identifier: u64,
    },
    NodeActive {
        node_id: NodeId,
        reported_state: ReplicationState,
        pg_is_running: bool,
        sync_state: SyncState,
        tli: i32,
        lsn: u64,
    },
    GetNodes {
        formation_id: String,
        group_id: Option<i32>,
    },
    GetOtherNodes {
        node_id: NodeId,
    },
    GetPrimary {
        formation_id: String,
        group_id: i32,
    },
    GetCoordinator {
        formation_id: String,
    },
    SetNodeCandidatePriority {
        node_id: NodeId,
        priority: u8,
    },
    SetNodeReplicationQuorum {
        node_id: NodeId,
        quorum: bool,
    },
    SetFormationNumberSyncStandbys {
        formation_id: String,
        n: u32,
    },
    PerformFailover {
        formation_id: String,
        group_id: i32,
    },
    StartMaintenance {
        node_id: NodeId,
    },
    StopMaintenance {
        node_id: NodeId,
    },
    RemoveNode {
        node_id: NodeId,
    },
    SyncStandbyNames {
        formation_id: String,
        group_id: i32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeView {
    pub node_id: NodeId,
    pub node_name: String,
    pub host: String,
    pub port: u16,
    pub group_id: i32,
    pub reported_state: ReplicationState,
    pub goal_state: ReplicationState,
    pub candidate_priority: u8,
    pub replication_quorum: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Registered {
        node_id: NodeId,
        group_id: i32,
        goal_state: ReplicationState,
    },
    NodeActive {
        goal_state: ReplicationState,
        candidate_priority: u8,
        replication_quorum: bool,
    },
    Nodes(Vec<NodeView>),
    Node(Option<NodeView>),
    CoordinatorNotApplicable,
    SyncStandbyNames(String),
    Ok,
    Error { message: String, exit_code: i32 },
}

impl Response {
    pub fn from_error(err: &crate::error::PgAutoFailoverError) -> Self {
        Response::Error {
            message: err.to_string(),
            exit_code: err.exit_code(),
        }
    }
}
