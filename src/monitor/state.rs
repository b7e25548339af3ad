// src/monitor/state.rs

//! Defines the data structures the monitor uses to track the authoritative
//! view of every formation, group, and node in the cluster.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// The full replication state set from the data model. Every node's
/// `reported_state` and `goal_state` are drawn from this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReplicationState {
    Init,
    Single,
    WaitPrimary,
    Primary,
    JoinPrimary,
    ApplySettings,
    WaitStandby,
    CatchingUp,
    Secondary,
    PreparePromotion,
    StopReplication,
    WaitForward,
    FastForward,
    JoinSecondary,
    ReportLsn,
    Draining,
    DemoteTimeout,
    Demoted,
    PrepareMaintenance,
    WaitMaintenance,
    Maintenance,
    Dropped,
}

impl ReplicationState {
    /// Invariant W: a group may have at most one node in one of these states.
    pub const WRITABLE: &'static [ReplicationState] = &[
        ReplicationState::Single,
        ReplicationState::Primary,
        ReplicationState::WaitPrimary,
        ReplicationState::JoinPrimary,
        ReplicationState::ApplySettings,
    ];

    pub fn is_writable(self) -> bool {
        Self::WRITABLE.contains(&self)
    }

    /// §4.4.3: a standby is "participating in a promotion" while it (or its
    /// goal) is in one of these states.
    pub const PROMOTION_PARTICIPANT: &'static [ReplicationState] = &[
        ReplicationState::ReportLsn,
        ReplicationState::FastForward,
        ReplicationState::PreparePromotion,
        ReplicationState::StopReplication,
        ReplicationState::WaitPrimary,
        ReplicationState::JoinSecondary,
    ];

    pub fn is_promotion_participant(self) -> bool {
        Self::PROMOTION_PARTICIPANT.contains(&self)
    }
}

/// `pgsrSyncState`, as reported by the keeper from `pg_stat_replication`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Unknown,
    Async,
    Sync,
    Potential,
    Quorum,
}

/// The health of a node as last updated by the health prober (C3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    #[default]
    Unknown,
    Bad,
    Good,
}

/// A 64-bit Postgres WAL position paired with its replay timeline, ordered
/// lexicographically by (timeline, lsn) as required for candidate selection
/// (§4.4.2: NO_LOSS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct WalPosition {
    pub timeline: i32,
    pub lsn: u64,
}

pub type NodeId = i64;

/// A node's identity and dynamic state, as owned exclusively by the monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub node_id: NodeId,
    pub formation_id: String,
    pub group_id: i32,
    pub node_name: String,
    pub node_host: String,
    pub node_port: u16,
    pub system_identifier: u64,
    pub reported_state: ReplicationState,
    pub goal_state: ReplicationState,
    pub pg_is_running: bool,
    pub pgsr_sync_state: SyncState,
    #[serde(skip, default = "Instant::now")]
    pub report_time: Instant,
    #[serde(skip, default = "Instant::now")]
    pub wal_report_time: Instant,
    pub health: Health,
    #[serde(skip, default = "Instant::now")]
    pub health_check_time: Instant,
    #[serde(skip, default = "Instant::now")]
    pub state_change_time: Instant,
    pub reported_tli: i32,
    pub reported_lsn: u64,
    pub candidate_priority: u8,
    pub replication_quorum: bool,
    pub node_cluster: String,
}

impl Node {
    pub fn addr(&self) -> SocketAddr {
        format!("{}:{}", self.node_host, self.node_port)
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], self.node_port)))
    }

    pub fn wal_position(&self) -> WalPosition {
        WalPosition {
            timeline: self.reported_tli,
            lsn: self.reported_lsn,
        }
    }

    /// "Healthy" per §4.4: `health=good ∧ pgIsRunning=true ∧ reportTime within UnhealthyTimeoutMs`.
    pub fn is_healthy(&self, unhealthy_timeout: Duration) -> bool {
        self.health == Health::Good
            && self.pg_is_running
            && self.report_time.elapsed() < unhealthy_timeout
    }

    pub fn set_goal_state(&mut self, state: ReplicationState) {
        self.goal_state = state;
        self.state_change_time = Instant::now();
    }
}

/// A logically named cluster, keyed by formation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formation {
    pub formation_id: String,
    pub kind: FormationKind,
    pub dbname: String,
    pub opt_secondary: bool,
    pub number_sync_standbys: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormationKind {
    Pgsql,
    Citus,
}

impl Formation {
    pub fn new(formation_id: impl Into<String>) -> Self {
        Self {
            formation_id: formation_id.into(),
            kind: FormationKind::Pgsql,
            dbname: "postgres".to_string(),
            opt_secondary: true,
            number_sync_standbys: 0,
        }
    }
}

/// The stage of an in-flight failover for one group, used by the FSM to
/// refuse starting a second concurrent failover (§4.4.3).
#[derive(Debug, Clone, Default)]
pub struct GroupFailoverState {
    pub candidate: Option<NodeId>,
    pub lsn_reports: HashMap<NodeId, WalPosition>,
    pub started_at: Option<Instant>,
}
