// src/monitor/sync_standby.rs

//! Renders Postgres's `synchronous_standby_names` GUC from the current
//! group membership (§10.7). The primary's keeper applies this string via
//! `apply_settings` whenever the FSM recomputes it.

use crate::monitor::state::{Formation, Node, ReplicationState};

/// Builds the `synchronous_standby_names` value for a primary given its
/// formation's `number_sync_standbys` and the set of secondaries
/// participating in the replication quorum.
///
/// Returns `""` when no synchronous replication is required (quorum
/// standbys disabled, or no eligible secondary exists yet), matching
/// Postgres's convention that an empty value disables synchronous commit.
pub fn render(formation: &Formation, group: &[Node]) -> String {
    if !formation.opt_secondary {
        return String::new();
    }

    let mut candidates: Vec<&Node> = group
        .iter()
        .filter(|n| {
            n.replication_quorum
                && matches!(
                    n.reported_state,
                    ReplicationState::Secondary
                        | ReplicationState::CatchingUp
                        | ReplicationState::JoinSecondary
                )
        })
        .collect();
    if candidates.is_empty() {
        return String::new();
    }
    candidates.sort_by(|a, b| b.candidate_priority.cmp(&a.candidate_priority).then(a.node_id.cmp(&b.node_id)));

    let n = formation.number_sync_standbys.max(1).min(candidates.len() as u32);
    let names: Vec<String> = candidates.iter().map(|n| format!("\"{}\"", n.node_name)).collect();
    format!("ANY {} ({})", n, names.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::state::{FormationKind, Health, SyncState};
    use std::time::Instant;

    fn node(name: &str, priority: u8, quorum: bool, state: ReplicationState) -> Node {
        Node {
            node_id: 1,
            formation_id: "default".into(),
            group_id: 0,
            node_name: name.into(),
            node_host: "h".into(),
            node_port: 5432,
            system_identifier: 0,
            reported_state: state,
            goal_state: state,
            pg_is_running: true,
            pgsr_sync_state: SyncState::Async,
            report_time: Instant::now(),
            wal_report_time: Instant::now(),
            health: Health::Good,
            health_check_time: Instant::now(),
            state_change_time: Instant::now(),
            reported_tli: 1,
            reported_lsn: 0,
            candidate_priority: priority,
            replication_quorum: quorum,
            node_cluster: "default".into(),
        }
    }

    #[test]
    fn renders_any_n_clause_for_quorum_secondaries() {
        let formation = Formation {
            formation_id: "default".into(),
            kind: FormationKind::Pgsql,
            dbname: "postgres".into(),
            opt_secondary: true,
            number_sync_standbys: 1,
        };
        let group = vec![node("a", 100, true, ReplicationState::Secondary)];
        assert_eq!(render(&formation, &group), "ANY 1 (\"a\")");
    }

    #[test]
    fn empty_when_secondary_disabled() {
        let formation = Formation {
            formation_id: "default".into(),
            kind: FormationKind::Pgsql,
            dbname: "postgres".into(),
            opt_secondary: false,
            number_sync_standbys: 1,
        };
        assert_eq!(render(&formation, &[]), "");
    }
}
