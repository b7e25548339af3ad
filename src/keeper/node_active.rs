// src/keeper/node_active.rs

//! C7: the keeper's node-active loop. Ticks every `KeeperSleepTime`,
//! probes Postgres locally, reports to the monitor, and drives the local
//! FSM toward whatever the monitor assigns (§4.7).

use crate::config::keeper::KeeperConfig;
use crate::error::{PgAutoFailoverError, Result};
use crate::keeper::client::MonitorClient;
use crate::keeper::local_fsm::LocalFsm;
use crate::keeper::pg::PgCtl;
use crate::keeper::state_file;
use crate::monitor::state::NodeId;
use crate::rpc::{Request, Response};
use std::net::ToSocketAddrs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct NodeActiveTimeouts {
    pub tick: Duration,
    pub ping_retry_timeout: Duration,
}

impl Default for NodeActiveTimeouts {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(5),
            ping_retry_timeout: Duration::from_secs(15 * 60),
        }
    }
}

pub struct NodeActiveLoop<'a> {
    config: KeeperConfig,
    timeouts: NodeActiveTimeouts,
    state_path: PathBuf,
    pg: &'a dyn PgCtl,
}

impl<'a> NodeActiveLoop<'a> {
    pub fn new(config: KeeperConfig, timeouts: NodeActiveTimeouts, state_path: PathBuf, pg: &'a dyn PgCtl) -> Self {
        Self {
            config,
            timeouts,
            state_path,
            pg,
        }
    }

    fn monitor_addr(&self) -> Result<std::net::SocketAddr> {
        (self.config.pg_autoctl.monitor_host.as_str(), self.config.pg_autoctl.monitor_port)
            .to_socket_addrs()
            .map_err(|e| PgAutoFailoverError::Configuration(format!("resolving monitor address: {e}")))?
            .next()
            .ok_or_else(|| PgAutoFailoverError::Configuration("monitor address did not resolve".into()))
    }

    /// Registers this node if it has no state file yet, retrying on the
    /// monitor's SQLSTATE-55006-equivalent `Conflict` by sleeping one tick
    /// (§4.7).
    pub async fn register(&self) -> Result<state_file::KeeperState> {
        if let Ok(state) = state_file::read(&self.state_path) {
            return Ok(state);
        }

        loop {
            let addr = self.monitor_addr()?;
            let mut client = MonitorClient::connect(addr).await?;
            let request = Request::RegisterNode {
                formation_id: self.config.pg_autoctl.formation.clone().unwrap_or_else(|| "default".to_string()),
                node_name: self.config.pg_autoctl.node_name.clone(),
                host: self.config.pg_autoctl.hostname.clone(),
                port: self.config.postgres.pg_port,
                desired_group: self.config.pg_autoctl.group,
                dbname: self.config.postgres.dbname.clone(),
                candidate_priority: self.config.replication.candidate_priority,
                replication_quorum: self.config.replication.replication_quorum,
                system_identifier: 0,
            };
            match client.call(request).await? {
                Response::Registered { node_id, group_id, goal_state } => {
                    let mut state = state_file::KeeperState::new(node_id, group_id, goal_state);
                    state.touch_monitor_contact();
                    state_file::write(&self.state_path, &state)?;
                    return Ok(state);
                }
                // exit code 6 covers Conflict/Rpc/Transient (error.rs); a
                // conflicting concurrent registration is retried in place.
                Response::Error { message, exit_code: 6 } => {
                    warn!(message, "registration conflict, retrying after one tick");
                    tokio::time::sleep(self.timeouts.tick).await;
                }
                Response::Error { message, .. } => return Err(PgAutoFailoverError::Rpc(message)),
                other => return Err(PgAutoFailoverError::Internal(format!("unexpected register_node reply: {other:?}"))),
            }
        }
    }

    /// Runs one tick: probe, report, converge. Returns the new state.
    pub async fn tick(&self, state: &mut state_file::KeeperState, peers: &[NodeId]) -> Result<()> {
        let status = self.pg.status().await?;
        let addr = self.monitor_addr()?;

        let call_result = self.call_node_active(addr, state, &status).await;
        let response = match call_result {
            Ok(response) => response,
            Err(e) if e.is_retryable() => {
                self.retry_node_active(addr, state, &status).await?
            }
            Err(e) => return Err(e),
        };

        if let Response::NodeActive { goal_state, .. } = response {
            state.assigned_role = goal_state;
            state.pg_is_running = status.is_running;
            state.touch_monitor_contact();
            state_file::write(&self.state_path, state)?;

            let sync_standby_names = if state.current_role == crate::monitor::state::ReplicationState::Primary
                && state.assigned_role == crate::monitor::state::ReplicationState::ApplySettings
            {
                Some(self.fetch_sync_standby_names(addr, state.current_group).await?)
            } else {
                None
            };

            let fsm = LocalFsm::new(self.pg);
            let reached = fsm
                .converge(state.current_role, state.assigned_role, peers, None, sync_standby_names.as_deref())
                .await?;
            if reached != state.current_role {
                state.current_role = reached;
                state_file::write(&self.state_path, state)?;
                info!(node = state.current_node_id, from = %status.is_running, to = %reached, "local FSM converged");
            }
        }
        Ok(())
    }

    /// Fetches the `synchronous_standby_names` value the monitor computed
    /// for this node's group (§4.4.4) ahead of the `apply_settings` hop.
    async fn fetch_sync_standby_names(&self, addr: std::net::SocketAddr, group_id: i32) -> Result<String> {
        let mut client = MonitorClient::connect(addr).await?;
        let request = Request::SyncStandbyNames {
            formation_id: self.config.pg_autoctl.formation.clone().unwrap_or_else(|| "default".to_string()),
            group_id,
        };
        match client.call(request).await? {
            Response::SyncStandbyNames(value) => Ok(value),
            Response::Error { message, .. } => Err(PgAutoFailoverError::Rpc(message)),
            other => Err(PgAutoFailoverError::Internal(format!("unexpected sync_standby_names reply: {other:?}"))),
        }
    }

    async fn call_node_active(
        &self,
        addr: std::net::SocketAddr,
        state: &state_file::KeeperState,
        status: &crate::keeper::pg::PgStatus,
    ) -> Result<Response> {
        let mut client = MonitorClient::connect(addr).await?;
        client
            .call(Request::NodeActive {
                node_id: state.current_node_id,
                reported_state: state.current_role,
                pg_is_running: status.is_running,
                sync_state: status.sync_state,
                tli: status.timeline,
                lsn: status.lsn,
            })
            .await
    }

    /// Retries `node_active` with exponential backoff bounded by the tick
    /// interval, capped by `PingRetryTimeout` total (§4.7). The local FSM
    /// keeps converging toward the last known assigned role while retrying.
    async fn retry_node_active(
        &self,
        addr: std::net::SocketAddr,
        state: &state_file::KeeperState,
        status: &crate::keeper::pg::PgStatus,
    ) -> Result<Response> {
        let deadline = Instant::now() + self.timeouts.ping_retry_timeout;
        let mut backoff = Duration::from_millis(200);
        loop {
            if Instant::now() >= deadline {
                return Err(PgAutoFailoverError::Transient(
                    "exceeded PingRetryTimeout contacting the monitor".into(),
                ));
            }
            tokio::time::sleep(backoff.min(self.timeouts.tick)).await;
            match self.call_node_active(addr, state, status).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() => {
                    backoff = (backoff * 2).min(self.timeouts.tick);
                    error!(error = %e, "monitor unreachable, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Runs the tick loop forever. Intended to be spawned as one task in
    /// the supervisor's child set.
    pub async fn run(&self, peers: impl Fn() -> Vec<NodeId>) -> Result<()> {
        let mut state = self.register().await?;
        let mut ticker = tokio::time::interval(self.timeouts.tick);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick(&mut state, &peers()).await {
                error!(error = %e, "node-active tick failed");
            }
        }
    }
}
