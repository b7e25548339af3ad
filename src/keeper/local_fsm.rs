// src/keeper/local_fsm.rs

//! C8: the keeper's local FSM. One pure-over-its-inputs handler per
//! transition named in §4.8, each driving the local Postgres through the
//! `PgCtl` trait. Idempotent: every handler re-checks actual Postgres
//! status before acting rather than trusting its own last result.

use crate::error::{PgAutoFailoverError, Result};
use crate::keeper::pg::PgCtl;
use crate::monitor::state::ReplicationState as S;
use tracing::info;

/// Canonical replication slot name for a peer, mirroring the real
/// `pgautofailover_standby_<nodeId>` convention named in §6.
pub fn slot_name(node_id: i64) -> String {
    format!("pgautofailover_standby_{node_id}")
}

pub struct LocalFsm<'a> {
    pg: &'a dyn PgCtl,
}

impl<'a> LocalFsm<'a> {
    pub fn new(pg: &'a dyn PgCtl) -> Self {
        Self { pg }
    }

    /// Drives one step toward `goal`, returning the role actually reached.
    /// A handler that cannot complete leaves Postgres's status (and so the
    /// reported role) unchanged; the monitor will retry on the next tick.
    /// `sync_standby_names` is the monitor-computed `SyncStandbyNames` RPC
    /// reply (§4.4.4); only needed for the `primary -> apply_settings` hop.
    pub async fn converge(
        &self,
        current: S,
        goal: S,
        peers: &[i64],
        primary_conninfo: Option<&str>,
        sync_standby_names: Option<&str>,
    ) -> Result<S> {
        if current == goal {
            return Ok(current);
        }
        match (current, goal) {
            (S::WaitStandby, S::CatchingUp) => self.wait_standby_to_catching_up(primary_conninfo).await,
            (S::CatchingUp, S::Secondary) => self.catching_up_to_secondary(peers).await,
            (S::Primary, S::ApplySettings) => self.apply_settings(sync_standby_names).await,
            (S::ApplySettings, S::Primary) => Ok(S::Primary),
            (S::PreparePromotion, S::StopReplication) => self.prepare_promotion_to_stop_replication().await,
            (S::StopReplication, S::WaitPrimary) => self.stop_replication_to_wait_primary(peers).await,
            (S::WaitPrimary, S::Primary) => Ok(S::Primary),
            (_, S::ReportLsn) => self.report_lsn().await,
            (S::ReportLsn, S::FastForward) => self.fast_forward(peers).await,
            _ => {
                info!(?current, ?goal, "no local handler for this transition, waiting for monitor");
                Ok(current)
            }
        }
    }

    async fn wait_standby_to_catching_up(&self, primary_conninfo: Option<&str>) -> Result<S> {
        let conninfo = primary_conninfo.ok_or_else(|| {
            PgAutoFailoverError::Configuration("wait_standby requires a primary_conninfo".into())
        })?;
        self.pg.setup_standby(conninfo, "pgautofailover_primary").await?;
        Ok(S::CatchingUp)
    }

    async fn catching_up_to_secondary(&self, peers: &[i64]) -> Result<S> {
        let status = self.pg.status().await?;
        if !status.is_in_recovery || !status.is_running {
            return Ok(S::CatchingUp);
        }
        for peer in peers {
            self.pg.create_replication_slot(&slot_name(*peer)).await?;
        }
        Ok(S::Secondary)
    }

    async fn apply_settings(&self, sync_standby_names: Option<&str>) -> Result<S> {
        // §4.4.4: the value is computed on the monitor from group topology
        // (`monitor::sync_standby::render`), not derived client-side.
        let value = sync_standby_names.ok_or_else(|| {
            PgAutoFailoverError::Configuration("apply_settings requires synchronous_standby_names from the monitor".into())
        })?;
        self.pg.set_synchronous_standby_names(value).await?;
        Ok(S::ApplySettings)
    }

    async fn prepare_promotion_to_stop_replication(&self) -> Result<S> {
        self.pg.promote().await?;
        let status = self.pg.status().await?;
        if status.is_in_recovery {
            return Ok(S::PreparePromotion);
        }
        Ok(S::StopReplication)
    }

    async fn stop_replication_to_wait_primary(&self, peers: &[i64]) -> Result<S> {
        for peer in peers {
            self.pg.create_replication_slot(&slot_name(*peer)).await?;
        }
        Ok(S::WaitPrimary)
    }

    async fn report_lsn(&self) -> Result<S> {
        Ok(S::ReportLsn)
    }

    async fn fast_forward(&self, peers: &[i64]) -> Result<S> {
        let status = self.pg.status().await?;
        let target = if let Some(&peer) = peers.first() {
            self.pg.fast_forward(&slot_name(peer), status.lsn).await?;
            status.lsn
        } else {
            status.lsn
        };
        let _ = target;
        Ok(S::FastForward)
    }
}
