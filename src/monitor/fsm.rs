// src/monitor/fsm.rs

//! C4: the replication FSM, the heart of the monitor. Computes, for every
//! `node_active` call (and for operator-triggered actions like
//! `perform_failover`/`start_maintenance`), the new assigned goal state of
//! the reporting node and any peer whose state must change as a
//! consequence — all written back atomically (§4.4.6).

use crate::error::{PgAutoFailoverError, Result};
use crate::monitor::events::EventLog;
use crate::monitor::formation::FormationRegistry;
use crate::monitor::registry::NodeRegistry;
use crate::monitor::state::{
    GroupFailoverState, Node, NodeId, ReplicationState as S, SyncState, WalPosition,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

/// Timing knobs the FSM needs from the monitor configuration (§4.3, §4.4, §6).
#[derive(Debug, Clone, Copy)]
pub struct FsmTimeouts {
    pub unhealthy_timeout: Duration,
    pub drain_timeout: Duration,
    pub report_lsn_timeout: Duration,
}

impl Default for FsmTimeouts {
    fn default() -> Self {
        Self {
            unhealthy_timeout: Duration::from_secs(20),
            drain_timeout: Duration::from_secs(30),
            report_lsn_timeout: Duration::from_secs(10),
        }
    }
}

/// The result of a `node_active` call: the caller's own assigned goal state
/// plus the two pieces of per-node config it needs to converge locally.
pub struct NodeActiveResult {
    pub goal_state: S,
    pub candidate_priority: u8,
    pub replication_quorum: bool,
}

/// Demotion chain for a primary losing its writable role (§4.4.1, §4.4.3).
const DEMOTION_CHAIN: &[S] = &[S::Draining, S::DemoteTimeout, S::Demoted];
/// Promotion chain for the chosen candidate in a multi-standby failover.
/// Also covers the sole-standby case (`perform_failover` assigns
/// `prepare_promotion` directly, joining this chain partway through).
const CANDIDATE_PROMOTION_CHAIN: &[S] = &[
    S::ReportLsn,
    S::FastForward,
    S::PreparePromotion,
    S::StopReplication,
    S::WaitPrimary,
    S::Primary,
];
/// Chain for a standby that reported LSN but was not chosen.
const NON_CANDIDATE_CHAIN: &[S] = &[S::ReportLsn, S::JoinSecondary, S::Secondary];
/// Maintenance chain for an operator-requested drain of one secondary.
const MAINTENANCE_CHAIN: &[S] = &[S::PrepareMaintenance, S::WaitMaintenance, S::Maintenance];
/// `apply_settings` round-trip (§4.4.4) outside of a maintenance exit, where
/// `stop_maintenance` drives it back to `primary` explicitly instead.
const APPLY_SETTINGS_CHAIN: &[S] = &[S::ApplySettings, S::Primary];

fn next_in_chain(chain: &[S], current_goal: S) -> Option<S> {
    let idx = chain.iter().position(|s| *s == current_goal)?;
    chain.get(idx + 1).copied()
}

/// Per-group bookkeeping for an in-flight multi-standby failover: which
/// candidate has been picked and who has reported their (tli, lsn) so far.
struct GroupState {
    failover: Mutex<GroupFailoverState>,
}

pub struct ReplicationFsm {
    timeouts: FsmTimeouts,
    groups: DashMap<(String, i32), GroupState>,
}

impl ReplicationFsm {
    pub fn new(timeouts: FsmTimeouts) -> Self {
        Self {
            timeouts,
            groups: DashMap::new(),
        }
    }

    fn group_entry(&self, formation_id: &str, group_id: i32) -> dashmap::mapref::one::RefMut<'_, (String, i32), GroupState> {
        self.groups
            .entry((formation_id.to_string(), group_id))
            .or_insert_with(|| GroupState {
                failover: Mutex::new(GroupFailoverState::default()),
            })
    }

    /// Applies the pairing transition triggered by `register_node` itself
    /// (§4.4.1: "a second node has been registered"), not by `node_active`.
    pub fn on_node_registered(
        &self,
        registry: &NodeRegistry,
        events: &EventLog,
        formation_id: &str,
        group_id: i32,
        new_node_id: NodeId,
    ) -> Result<()> {
        registry.with_group_mut(formation_id, group_id, |nodes| {
            let new_idx = nodes
                .iter()
                .position(|n| n.node_id == new_node_id)
                .ok_or_else(|| {
                    PgAutoFailoverError::Internal("new node missing from its own group".into())
                })?;

            // The first pairing (lone `single` becoming a primary) flips the
            // existing node to `wait_primary`. Joining a group that already
            // has a primary (§4.4.2: group growth) leaves it untouched —
            // the new standby reaches `secondary` on its own via
            // `try_standby_catchup` once it catches up.
            if nodes.len() == 2 {
                let existing_idx = 1 - new_idx;
                if nodes[existing_idx].goal_state == S::Single {
                    let existing_id = nodes[existing_idx].node_id;
                    nodes[existing_idx].set_goal_state(S::WaitPrimary);
                    events.record(
                        formation_id,
                        group_id,
                        existing_id,
                        &nodes[existing_idx].node_name,
                        nodes[existing_idx].node_port,
                        nodes[existing_idx].reported_state,
                        S::WaitPrimary,
                        "a standby joined the group",
                    );
                }
            }

            let new_id = nodes[new_idx].node_id;
            nodes[new_idx].set_goal_state(S::WaitStandby);
            events.record(
                formation_id,
                group_id,
                new_id,
                &nodes[new_idx].node_name,
                nodes[new_idx].node_port,
                nodes[new_idx].reported_state,
                S::WaitStandby,
                "new standby assigned wait_standby",
            );
            Ok(())
        })
    }

    /// The core dispatch: handles one `node_active` report.
    pub fn node_active(
        &self,
        registry: &NodeRegistry,
        formations: &FormationRegistry,
        events: &EventLog,
        node_id: NodeId,
        reported_state: S,
        pg_is_running: bool,
        sync_state: SyncState,
        tli: i32,
        lsn: u64,
    ) -> Result<NodeActiveResult> {
        let before = registry.get(node_id)?;
        registry.set_reported_state(node_id, reported_state, pg_is_running, sync_state, tli, lsn)?;
        let formation = formations.get_or_default(&before.formation_id);

        registry.with_group_mut(&before.formation_id, before.group_id, |nodes| {
            self.dispatch_group(events, &formation.formation_id, before.group_id, nodes, node_id, &formation)
        })?;

        let after = registry.get(node_id)?;
        Ok(NodeActiveResult {
            goal_state: after.goal_state,
            candidate_priority: after.candidate_priority,
            replication_quorum: after.replication_quorum,
        })
    }

    /// Runs every transition rule that can fire given the reporting node's
    /// new reported state and the group's current snapshot. All writes here
    /// land within the single `with_group_mut` transaction the caller holds.
    fn dispatch_group(
        &self,
        events: &EventLog,
        formation_id: &str,
        group_id: i32,
        nodes: &mut Vec<&mut Node>,
        reporter_id: NodeId,
        formation: &crate::monitor::state::Formation,
    ) -> Result<()> {
        // 1. Chain convergence: if the reporter has reached its assigned
        // goal and that goal is a step in a known multi-step chain, advance
        // it to the next step.
        self.advance_chains(events, formation_id, group_id, nodes, reporter_id)?;

        // 2. wait_primary -> (join_primary) -> primary: the first standby
        // catches up to the primary's LSN (§4.4.1).
        self.try_first_standby_catchup(events, formation_id, group_id, nodes)?;

        // 3. Multi-standby report_lsn resolution: once every participating
        // node has reported, pick a candidate (§4.4.2).
        self.try_resolve_candidate(events, formation_id, group_id, nodes)?;

        // 4. Invariant P: an unhealthy secondary under quorum demotes the
        // primary to wait_primary; it is restored once the secondary heals.
        self.enforce_pairing_invariant(events, formation_id, group_id, nodes, formation)?;

        Ok(())
    }

    fn advance_chains(
        &self,
        events: &EventLog,
        formation_id: &str,
        group_id: i32,
        nodes: &mut [&mut Node],
        reporter_id: NodeId,
    ) -> Result<()> {
        let Some(reporter) = nodes.iter_mut().find(|n| n.node_id == reporter_id) else {
            return Ok(());
        };
        if reporter.reported_state != reporter.goal_state {
            return Ok(());
        }
        let goal = reporter.goal_state;
        let reporter_id = reporter.node_id;

        // `wait_primary` is shared between the initial-pairing flow (which
        // advances only once the new standby catches up, via
        // `try_first_standby_catchup`) and the promotion chain (which goes
        // straight to `primary`, §4.4.1). Only the node this group's
        // failover actually picked as its candidate gets the chain's
        // auto-advance out of `wait_primary`.
        let is_failover_candidate =
            self.group_entry(formation_id, group_id).failover.lock().candidate == Some(reporter_id);

        let chain = if DEMOTION_CHAIN.contains(&goal) {
            Some(DEMOTION_CHAIN)
        } else if goal == S::WaitPrimary {
            is_failover_candidate.then_some(CANDIDATE_PROMOTION_CHAIN)
        } else if CANDIDATE_PROMOTION_CHAIN.contains(&goal) && goal != S::ReportLsn {
            Some(CANDIDATE_PROMOTION_CHAIN)
        } else if NON_CANDIDATE_CHAIN.contains(&goal) && goal != S::ReportLsn {
            Some(NON_CANDIDATE_CHAIN)
        } else if MAINTENANCE_CHAIN.contains(&goal) {
            Some(MAINTENANCE_CHAIN)
        } else if goal == S::ApplySettings {
            Some(APPLY_SETTINGS_CHAIN)
        } else {
            None
        };
        if let Some(chain) = chain
            && let Some(next) = next_in_chain(chain, goal)
        {
            let reporter = nodes.iter_mut().find(|n| n.node_id == reporter_id).unwrap();
            let id = reporter.node_id;
            let name = reporter.node_name.clone();
            let port = reporter.node_port;
            let old = reporter.reported_state;
            reporter.set_goal_state(next);
            events.record(formation_id, group_id, id, &name, port, old, next, "chain advance");

            // Only the candidate-promotion chain reaching `primary` retires
            // this group's failover bookkeeping. The old primary's demotion
            // chain (`-> demoted`) runs concurrently with that promotion and
            // must not clear the candidate out from under it.
            if next == S::Primary {
                self.group_entry(formation_id, group_id).failover.lock().started_at = None;
                self.group_entry(formation_id, group_id).failover.lock().candidate = None;
            }
        }
        Ok(())
    }

    /// `wait_primary -> (join_primary) -> primary` for the first pairing, and
    /// `wait_standby -> catching_up -> secondary` for any standby catching up
    /// afterwards, whether that standby paired at group creation or joined a
    /// group that already has an established primary (§4.4.1, §4.4.2).
    fn try_first_standby_catchup(
        &self,
        events: &EventLog,
        formation_id: &str,
        group_id: i32,
        nodes: &mut [&mut Node],
    ) -> Result<()> {
        let Some(primary_idx) = nodes
            .iter()
            .position(|n| n.goal_state == S::WaitPrimary || n.goal_state == S::Primary)
        else {
            return Ok(());
        };
        let primary_goal = nodes[primary_idx].goal_state;

        // This `wait_primary` belongs to a promotion chain, not the initial
        // pairing; `advance_chains` owns its progress to `primary` instead.
        if primary_goal == S::WaitPrimary {
            let failover_candidate = self.group_entry(formation_id, group_id).failover.lock().candidate;
            if failover_candidate == Some(nodes[primary_idx].node_id) {
                return Ok(());
            }
        }

        let primary_wal = nodes[primary_idx].wal_position();
        let caught_up: Vec<usize> = nodes
            .iter()
            .enumerate()
            .filter(|(i, n)| {
                *i != primary_idx
                    && n.goal_state == S::WaitStandby
                    && n.reported_state == S::CatchingUp
                    && n.wal_position() >= primary_wal
            })
            .map(|(i, _)| i)
            .collect();
        if caught_up.is_empty() {
            return Ok(());
        }

        if primary_goal == S::WaitPrimary {
            // `wait_primary → join_primary → primary` (§4.4.1): the pairing
            // flow's join_primary hop has no local-FSM action of its own, so
            // it is recorded and passed through in the same dispatch.
            let (p_id, p_name, p_port, p_old) = {
                let p = &nodes[primary_idx];
                (p.node_id, p.node_name.clone(), p.node_port, p.reported_state)
            };
            nodes[primary_idx].set_goal_state(S::JoinPrimary);
            events.record(formation_id, group_id, p_id, &p_name, p_port, p_old, S::JoinPrimary, "standby caught up, primary joining");
            nodes[primary_idx].set_goal_state(S::Primary);
            events.record(formation_id, group_id, p_id, &p_name, p_port, S::JoinPrimary, S::Primary, "primary promotion complete");
        }

        for idx in caught_up {
            let (s_id, s_name, s_port, s_old) = {
                let s = &nodes[idx];
                (s.node_id, s.node_name.clone(), s.node_port, s.reported_state)
            };
            nodes[idx].set_goal_state(S::Secondary);
            events.record(formation_id, group_id, s_id, &s_name, s_port, s_old, S::Secondary, "standby caught up to primary LSN");
        }
        Ok(())
    }

    fn try_resolve_candidate(
        &self,
        events: &EventLog,
        formation_id: &str,
        group_id: i32,
        nodes: &mut [&mut Node],
    ) -> Result<()> {
        let group_entry = self.group_entry(formation_id, group_id);
        let mut failover = group_entry.failover.lock();
        if failover.candidate.is_some() {
            return Ok(());
        }

        let reporters: Vec<NodeId> = nodes
            .iter()
            .filter(|n| n.goal_state == S::ReportLsn && n.reported_state == S::ReportLsn)
            .map(|n| n.node_id)
            .collect();
        for id in &reporters {
            let node = nodes.iter().find(|n| n.node_id == *id).unwrap();
            failover.lsn_reports.insert(*id, node.wal_position());
        }

        let expected: Vec<NodeId> = nodes
            .iter()
            .filter(|n| n.goal_state == S::ReportLsn)
            .map(|n| n.node_id)
            .collect();
        if expected.is_empty() {
            return Ok(());
        }
        let all_reported = expected.iter().all(|id| failover.lsn_reports.contains_key(id));
        let timed_out = failover
            .started_at
            .is_some_and(|t| t.elapsed() > self.timeouts.report_lsn_timeout);
        if !all_reported && !timed_out {
            return Ok(());
        }

        let candidate_id = select_candidate(nodes, &failover.lsn_reports);
        let Some(candidate_id) = candidate_id else {
            warn!("no eligible promotion candidate found for {formation_id}/{group_id}");
            return Ok(());
        };
        failover.candidate = Some(candidate_id);

        for n in nodes.iter_mut() {
            if n.goal_state != S::ReportLsn {
                continue;
            }
            let old = n.reported_state;
            let (id, name, port) = (n.node_id, n.node_name.clone(), n.node_port);
            if n.node_id == candidate_id {
                n.set_goal_state(S::FastForward);
                events.record(formation_id, group_id, id, &name, port, old, S::FastForward, "selected as promotion candidate");
            } else {
                n.set_goal_state(S::JoinSecondary);
                events.record(formation_id, group_id, id, &name, port, old, S::JoinSecondary, "not selected, will follow new primary");
            }
        }
        Ok(())
    }

    /// Invariant P: when replication quorum is required and no healthy
    /// secondary exists, the primary is demoted to `wait_primary`
    /// (writes allowed, not synchronously replicated); restored once a
    /// healthy secondary reappears.
    fn enforce_pairing_invariant(
        &self,
        events: &EventLog,
        formation_id: &str,
        group_id: i32,
        nodes: &mut [&mut Node],
        formation: &crate::monitor::state::Formation,
    ) -> Result<()> {
        if !formation.opt_secondary || formation.number_sync_standbys == 0 {
            return Ok(());
        }
        let primary_idx = nodes.iter().position(|n| n.goal_state == S::Primary || n.goal_state == S::WaitPrimary);
        let Some(primary_idx) = primary_idx else {
            return Ok(());
        };

        let healthy_secondaries = nodes
            .iter()
            .enumerate()
            .filter(|(i, n)| {
                *i != primary_idx
                    && n.replication_quorum
                    && n.goal_state == S::Secondary
                    && n.is_healthy(self.timeouts.unhealthy_timeout)
            })
            .count();

        let goal = nodes[primary_idx].goal_state;
        if healthy_secondaries == 0 && goal == S::Primary {
            let (id, name, port, old) = {
                let p = &nodes[primary_idx];
                (p.node_id, p.node_name.clone(), p.node_port, p.reported_state)
            };
            nodes[primary_idx].set_goal_state(S::WaitPrimary);
            events.record(formation_id, group_id, id, &name, port, old, S::WaitPrimary, "replication quorum lost, demoted to wait_primary");
        } else if healthy_secondaries > 0 && goal == S::WaitPrimary {
            let (id, name, port, old) = {
                let p = &nodes[primary_idx];
                (p.node_id, p.node_name.clone(), p.node_port, p.reported_state)
            };
            nodes[primary_idx].set_goal_state(S::Primary);
            events.record(formation_id, group_id, id, &name, port, old, S::Primary, "replication quorum restored");
        }
        Ok(())
    }

    /// Explicit operator-triggered failover (§4.4.1, §4.4.2). Refuses to
    /// start while any node is already participating in a promotion
    /// (§4.4.3).
    pub fn perform_failover(
        &self,
        registry: &NodeRegistry,
        events: &EventLog,
        formation_id: &str,
        group_id: i32,
    ) -> Result<()> {
        registry.with_group_mut(formation_id, group_id, |nodes| {
            if nodes.iter().any(|n| n.goal_state.is_promotion_participant() || n.reported_state.is_promotion_participant()) {
                return Err(PgAutoFailoverError::InvariantViolation(
                    "a failover is already in progress for this group".into(),
                ));
            }

            let primary_idx = nodes
                .iter()
                .position(|n| n.goal_state == S::Primary || n.goal_state == S::Single)
                .ok_or_else(|| PgAutoFailoverError::InvariantViolation("no writable node to fail over from".into()))?;

            let secondaries: Vec<usize> = (0..nodes.len()).filter(|i| *i != primary_idx).collect();
            if secondaries.is_empty() {
                return Err(PgAutoFailoverError::InvariantViolation(
                    "no standby available to promote".into(),
                ));
            }
            let has_candidate = secondaries.iter().any(|i| {
                nodes[*i].candidate_priority > 0 && nodes[*i].is_healthy(self.timeouts.unhealthy_timeout)
            });
            if !has_candidate {
                return Err(PgAutoFailoverError::InvariantViolation(
                    "no healthy secondary with candidate_priority > 0".into(),
                ));
            }

            let (p_id, p_name, p_port, p_old) = {
                let p = &nodes[primary_idx];
                (p.node_id, p.node_name.clone(), p.node_port, p.reported_state)
            };
            nodes[primary_idx].set_goal_state(S::Draining);
            events.record(formation_id, group_id, p_id, &p_name, p_port, p_old, S::Draining, "operator-requested failover");

            if secondaries.len() == 1 {
                let idx = secondaries[0];
                let (id, name, port, old) = {
                    let s = &nodes[idx];
                    (s.node_id, s.node_name.clone(), s.node_port, s.reported_state)
                };
                nodes[idx].set_goal_state(S::PreparePromotion);
                events.record(formation_id, group_id, id, &name, port, old, S::PreparePromotion, "promoting sole standby");
                self.group_entry(formation_id, group_id).failover.lock().candidate = Some(id);
            } else {
                for idx in &secondaries {
                    let (id, name, port, old) = {
                        let s = &nodes[*idx];
                        (s.node_id, s.node_name.clone(), s.node_port, s.reported_state)
                    };
                    nodes[*idx].set_goal_state(S::ReportLsn);
                    events.record(formation_id, group_id, id, &name, port, old, S::ReportLsn, "reporting LSN for candidate selection");
                }
                self.group_entry(formation_id, group_id).failover.lock().started_at = Some(Instant::now());
            }
            Ok(())
        })
    }

    pub fn start_maintenance(&self, registry: &NodeRegistry, events: &EventLog, node_id: NodeId) -> Result<()> {
        let node = registry.get(node_id)?;
        registry.with_group_mut(&node.formation_id, node.group_id, |nodes| {
            let idx = nodes
                .iter()
                .position(|n| n.node_id == node_id)
                .ok_or_else(|| PgAutoFailoverError::NodeNotFound(node_id.to_string()))?;
            if nodes[idx].reported_state != S::Secondary {
                return Err(PgAutoFailoverError::InvariantViolation(
                    "only a secondary can enter maintenance".into(),
                ));
            }
            let (id, name, port, old) = {
                let n = &nodes[idx];
                (n.node_id, n.node_name.clone(), n.node_port, n.reported_state)
            };
            nodes[idx].set_goal_state(S::PrepareMaintenance);
            events.record(&node.formation_id, node.group_id, id, &name, port, old, S::PrepareMaintenance, "operator-requested maintenance");

            if let Some(primary_idx) = nodes.iter().position(|n| n.goal_state == S::Primary) {
                let (pid, pname, pport, pold) = {
                    let p = &nodes[primary_idx];
                    (p.node_id, p.node_name.clone(), p.node_port, p.reported_state)
                };
                nodes[primary_idx].set_goal_state(S::ApplySettings);
                events.record(&node.formation_id, node.group_id, pid, &pname, pport, pold, S::ApplySettings, "refreshing sync replication for maintenance");
            }
            Ok(())
        })
    }

    pub fn stop_maintenance(&self, registry: &NodeRegistry, events: &EventLog, node_id: NodeId) -> Result<()> {
        let node = registry.get(node_id)?;
        registry.with_group_mut(&node.formation_id, node.group_id, |nodes| {
            let idx = nodes
                .iter()
                .position(|n| n.node_id == node_id)
                .ok_or_else(|| PgAutoFailoverError::NodeNotFound(node_id.to_string()))?;
            let (id, name, port, old) = {
                let n = &nodes[idx];
                (n.node_id, n.node_name.clone(), n.node_port, n.reported_state)
            };
            nodes[idx].set_goal_state(S::CatchingUp);
            events.record(&node.formation_id, node.group_id, id, &name, port, old, S::CatchingUp, "leaving maintenance");

            if let Some(primary_idx) = nodes.iter().position(|n| n.goal_state == S::ApplySettings) {
                let (pid, pname, pport, pold) = {
                    let p = &nodes[primary_idx];
                    (p.node_id, p.node_name.clone(), p.node_port, p.reported_state)
                };
                nodes[primary_idx].set_goal_state(S::Primary);
                events.record(&node.formation_id, node.group_id, pid, &pname, pport, pold, S::Primary, "resuming normal replication after maintenance");
            }
            Ok(())
        })
    }

    /// `primary → apply_settings → primary` round-trip (§4.4.4), used to
    /// refresh `synchronous_standby_names` after a topology change.
    pub fn apply_settings(&self, registry: &NodeRegistry, events: &EventLog, formation_id: &str, group_id: i32) -> Result<()> {
        registry.with_group_mut(formation_id, group_id, |nodes| {
            if let Some(idx) = nodes.iter().position(|n| n.goal_state == S::Primary) {
                let (id, name, port, old) = {
                    let p = &nodes[idx];
                    (p.node_id, p.node_name.clone(), p.node_port, p.reported_state)
                };
                nodes[idx].set_goal_state(S::ApplySettings);
                events.record(formation_id, group_id, id, &name, port, old, S::ApplySettings, "applying updated replication settings");
            }
            Ok(())
        })
    }
}

/// Candidate selection (§4.4.2): eligible candidates are nodes with
/// `candidate_priority > 0`; the winner has the highest (tli, lsn) pair,
/// tie-broken by candidate_priority then node id.
fn select_candidate(nodes: &[&mut Node], reports: &std::collections::HashMap<NodeId, WalPosition>) -> Option<NodeId> {
    nodes
        .iter()
        .filter(|n| n.candidate_priority > 0 && reports.contains_key(&n.node_id))
        .max_by(|a, b| {
            let pos_a = reports[&a.node_id];
            let pos_b = reports[&b.node_id];
            pos_a
                .cmp(&pos_b)
                .then(a.candidate_priority.cmp(&b.candidate_priority))
                .then(a.node_id.cmp(&b.node_id))
        })
        .map(|n| n.node_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::state::FormationKind;

    fn setup() -> (NodeRegistry, FormationRegistry, EventLog, ReplicationFsm) {
        (
            NodeRegistry::new(),
            FormationRegistry::new(),
            EventLog::new(),
            ReplicationFsm::new(FsmTimeouts::default()),
        )
    }

    #[test]
    fn scenario_single_node_bringup() {
        let (reg, forms, events, fsm) = setup();
        forms.create("default", FormationKind::Pgsql, "postgres", true).unwrap();
        let (id, group, state) = reg
            .insert_node("default", "a", "h1", 5432, None, FormationKind::Pgsql, 100, true, 0)
            .unwrap();
        assert_eq!(state, S::Single);
        let result = fsm
            .node_active(&reg, &forms, &events, id, S::Single, true, SyncState::Unknown, 1, 0)
            .unwrap();
        assert_eq!(result.goal_state, S::Single);
        assert_eq!(group, 0);
    }

    #[test]
    fn scenario_standby_join() {
        let (reg, forms, events, fsm) = setup();
        forms.create("default", FormationKind::Pgsql, "postgres", true).unwrap();
        let (a, _, _) = reg
            .insert_node("default", "a", "h1", 5432, None, FormationKind::Pgsql, 100, true, 0)
            .unwrap();
        let (b, _, _) = reg
            .insert_node("default", "b", "h2", 5432, None, FormationKind::Pgsql, 100, true, 0)
            .unwrap();
        fsm.on_node_registered(&reg, &events, "default", 0, b).unwrap();

        assert_eq!(reg.get(a).unwrap().goal_state, S::WaitPrimary);
        assert_eq!(reg.get(b).unwrap().goal_state, S::WaitStandby);

        // A reports it is still single until it observes wait_primary; here we
        // simulate it having already converged.
        fsm.node_active(&reg, &forms, &events, a, S::WaitPrimary, true, SyncState::Unknown, 1, 1000)
            .unwrap();
        let result = fsm
            .node_active(&reg, &forms, &events, b, S::CatchingUp, true, SyncState::Async, 1, 1000)
            .unwrap();
        assert_eq!(result.goal_state, S::Secondary);
        assert_eq!(reg.get(a).unwrap().goal_state, S::Primary);
    }

    #[test]
    fn scenario_third_standby_joins_established_group() {
        let (reg, forms, events, fsm) = setup();
        forms.create("default", FormationKind::Pgsql, "postgres", true).unwrap();
        let (a, _, _) = reg
            .insert_node("default", "a", "h1", 5432, None, FormationKind::Pgsql, 100, true, 0)
            .unwrap();
        let (b, _, _) = reg
            .insert_node("default", "b", "h2", 5432, None, FormationKind::Pgsql, 100, true, 0)
            .unwrap();
        fsm.on_node_registered(&reg, &events, "default", 0, b).unwrap();
        fsm.node_active(&reg, &forms, &events, a, S::WaitPrimary, true, SyncState::Unknown, 1, 1000).unwrap();
        fsm.node_active(&reg, &forms, &events, b, S::CatchingUp, true, SyncState::Async, 1, 1000).unwrap();
        assert_eq!(reg.get(a).unwrap().goal_state, S::Primary);
        assert_eq!(reg.get(b).unwrap().goal_state, S::Secondary);

        // A third node registers into the now-established group through the
        // real registration RPC path, not a direct state poke.
        let (c, _, _) = reg
            .insert_node("default", "c", "h3", 5432, Some(0), FormationKind::Pgsql, 100, true, 0)
            .unwrap();
        fsm.on_node_registered(&reg, &events, "default", 0, c).unwrap();
        assert_eq!(reg.get(a).unwrap().goal_state, S::Primary, "existing primary must stay untouched");
        assert_eq!(reg.get(c).unwrap().goal_state, S::WaitStandby);

        let result = fsm
            .node_active(&reg, &forms, &events, c, S::CatchingUp, true, SyncState::Async, 1, 1000)
            .unwrap();
        assert_eq!(result.goal_state, S::Secondary);
        assert_eq!(reg.writable_count("default", 0), 1);
    }

    #[test]
    fn scenario_planned_failover_single_standby() {
        let (reg, forms, events, fsm) = setup();
        forms.create("default", FormationKind::Pgsql, "postgres", true).unwrap();
        let (a, _, _) = reg
            .insert_node("default", "a", "h1", 5432, None, FormationKind::Pgsql, 100, true, 0)
            .unwrap();
        let (b, _, _) = reg
            .insert_node("default", "b", "h2", 5432, None, FormationKind::Pgsql, 100, true, 0)
            .unwrap();
        fsm.on_node_registered(&reg, &events, "default", 0, b).unwrap();
        fsm.node_active(&reg, &forms, &events, a, S::WaitPrimary, true, SyncState::Unknown, 1, 1000).unwrap();
        fsm.node_active(&reg, &forms, &events, b, S::CatchingUp, true, SyncState::Async, 1, 1000).unwrap();
        // The pairing's wait_primary -> join_primary -> primary hop has
        // already completed on the monitor side; let A report convergence,
        // as its keeper would on the next tick, before failing over.
        fsm.node_active(&reg, &forms, &events, a, S::Primary, true, SyncState::Unknown, 1, 1000).unwrap();
        reg.update_health(b, crate::monitor::state::Health::Good).unwrap();

        fsm.perform_failover(&reg, &events, "default", 0).unwrap();
        assert_eq!(reg.get(a).unwrap().goal_state, S::Draining);
        assert_eq!(reg.get(b).unwrap().goal_state, S::PreparePromotion);

        // Drive both chains to completion by having each report convergence.
        fsm.node_active(&reg, &forms, &events, a, S::Draining, true, SyncState::Unknown, 1, 1000).unwrap();
        assert_eq!(reg.get(a).unwrap().goal_state, S::DemoteTimeout);
        fsm.node_active(&reg, &forms, &events, a, S::DemoteTimeout, true, SyncState::Unknown, 1, 1000).unwrap();
        assert_eq!(reg.get(a).unwrap().goal_state, S::Demoted);

        fsm.node_active(&reg, &forms, &events, b, S::PreparePromotion, true, SyncState::Unknown, 1, 1000).unwrap();
        assert_eq!(reg.get(b).unwrap().goal_state, S::StopReplication);
        fsm.node_active(&reg, &forms, &events, b, S::StopReplication, true, SyncState::Unknown, 1, 1000).unwrap();
        assert_eq!(reg.get(b).unwrap().goal_state, S::WaitPrimary);
        fsm.node_active(&reg, &forms, &events, b, S::WaitPrimary, true, SyncState::Unknown, 1, 1000).unwrap();
        assert_eq!(reg.get(b).unwrap().goal_state, S::Primary);

        // Exactly one writable node remains.
        assert_eq!(reg.writable_count("default", 0), 1);
    }

    #[test]
    fn scenario_candidate_selection_prefers_higher_lsn_over_priority() {
        let (reg, forms, events, fsm) = setup();
        forms.create("default", FormationKind::Pgsql, "postgres", true).unwrap();
        let (a, _, _) = reg.insert_node("default", "a", "h1", 5432, None, FormationKind::Pgsql, 100, true, 0).unwrap();
        let (b, _, _) = reg.insert_node("default", "b", "h2", 5432, None, FormationKind::Pgsql, 100, true, 0).unwrap();
        fsm.on_node_registered(&reg, &events, "default", 0, b).unwrap();
        let (c, _, _) = reg.insert_node("default", "c", "h3", 5432, Some(0), FormationKind::Pgsql, 50, true, 0).unwrap();

        reg.set_reported_state(a, S::Primary, true, SyncState::Unknown, 1, 0).unwrap();
        reg.with_group_mut("default", 0, |nodes| {
            for n in nodes.iter_mut() {
                if n.node_id == a {
                    n.set_goal_state(S::Primary);
                }
            }
        });
        reg.set_candidate_priority(b, 100).unwrap();
        reg.set_candidate_priority(c, 50).unwrap();
        reg.set_reported_state(b, S::Secondary, true, SyncState::Async, 1, 10_000_000).unwrap();
        reg.set_reported_state(c, S::Secondary, true, SyncState::Async, 1, 20_000_000).unwrap();
        reg.update_health(b, crate::monitor::state::Health::Good).unwrap();
        reg.update_health(c, crate::monitor::state::Health::Good).unwrap();
        reg.with_group_mut("default", 0, |nodes| {
            for n in nodes.iter_mut() {
                if n.node_id != a {
                    n.set_goal_state(S::Secondary);
                }
            }
        });

        fsm.perform_failover(&reg, &events, "default", 0).unwrap();
        assert_eq!(reg.get(b).unwrap().goal_state, S::ReportLsn);
        assert_eq!(reg.get(c).unwrap().goal_state, S::ReportLsn);

        fsm.node_active(&reg, &forms, &events, b, S::ReportLsn, true, SyncState::Unknown, 1, 10_000_000).unwrap();
        fsm.node_active(&reg, &forms, &events, c, S::ReportLsn, true, SyncState::Unknown, 1, 20_000_000).unwrap();

        assert_eq!(reg.get(c).unwrap().goal_state, S::FastForward);
        assert_eq!(reg.get(b).unwrap().goal_state, S::JoinSecondary);
    }
}
