// tests/monitor_scenarios.rs

//! End-to-end monitor scenarios driving the registry/FSM pair through a
//! full formation lifecycle without a real Postgres or network socket,
//! grounded in the teacher's `tests/integration` layout.

use pg_auto_failover::monitor::events::EventLog;
use pg_auto_failover::monitor::formation::FormationRegistry;
use pg_auto_failover::monitor::fsm::{FsmTimeouts, ReplicationFsm};
use pg_auto_failover::monitor::registry::NodeRegistry;
use pg_auto_failover::monitor::state::{FormationKind, Health, ReplicationState as S, SyncState};

fn setup() -> (NodeRegistry, FormationRegistry, EventLog, ReplicationFsm) {
    (
        NodeRegistry::new(),
        FormationRegistry::new(),
        EventLog::new(),
        ReplicationFsm::new(FsmTimeouts::default()),
    )
}

/// Scenario 5: an unhealthy standby under sync quorum blocks synchronous
/// writes until it recovers (invariant P).
#[test]
fn unhealthy_standby_demotes_primary_to_wait_primary_then_restores() {
    let (reg, forms, events, fsm) = setup();
    forms.create("default", FormationKind::Pgsql, "postgres", true).unwrap();
    forms.set_number_sync_standbys("default", 1).unwrap();

    let (a, _, _) = reg.insert_node("default", "a", "h1", 5432, None, FormationKind::Pgsql, 100, true, 0).unwrap();
    let (b, _, _) = reg.insert_node("default", "b", "h2", 5432, None, FormationKind::Pgsql, 100, true, 0).unwrap();
    fsm.on_node_registered(&reg, &events, "default", 0, b).unwrap();
    reg.set_replication_quorum(b, true).unwrap();
    reg.update_health(b, Health::Good).unwrap();

    fsm.node_active(&reg, &forms, &events, a, S::WaitPrimary, true, SyncState::Unknown, 1, 1000).unwrap();
    fsm.node_active(&reg, &forms, &events, b, S::CatchingUp, true, SyncState::Async, 1, 1000).unwrap();
    assert_eq!(reg.get(a).unwrap().goal_state, S::Primary);

    // B goes unhealthy; the next report for any node in the group re-runs
    // the pairing invariant and demotes A to wait_primary.
    reg.update_health(b, Health::Bad).unwrap();
    fsm.node_active(&reg, &forms, &events, a, S::Primary, true, SyncState::Unknown, 1, 1000).unwrap();
    assert_eq!(reg.get(a).unwrap().goal_state, S::WaitPrimary);

    // B recovers; A is restored to primary.
    reg.update_health(b, Health::Good).unwrap();
    fsm.node_active(&reg, &forms, &events, a, S::WaitPrimary, true, SyncState::Unknown, 1, 1000).unwrap();
    assert_eq!(reg.get(a).unwrap().goal_state, S::Primary);
}

/// Scenario 6: a `number_sync_standbys` reload drives the primary through
/// the complete `primary -> apply_settings -> primary` notification pair.
#[test]
fn configuration_reload_round_trips_primary_through_apply_settings() {
    let (reg, forms, events, fsm) = setup();
    forms.create("default", FormationKind::Pgsql, "postgres", true).unwrap();
    forms.set_number_sync_standbys("default", 1).unwrap();

    let (a, _, _) = reg.insert_node("default", "a", "h1", 5432, None, FormationKind::Pgsql, 100, true, 0).unwrap();
    reg.set_reported_state(a, S::Primary, true, SyncState::Unknown, 1, 0).unwrap();
    reg.with_group_mut("default", 0, |nodes| nodes[0].set_goal_state(S::Primary));

    for name in ["b", "c", "d"] {
        let (id, _, _) = reg.insert_node("default", name, name, 5432, None, FormationKind::Pgsql, 100, true, 0).unwrap();
        reg.set_reported_state(id, S::Secondary, true, SyncState::Async, 1, 0).unwrap();
        reg.with_group_mut("default", 0, |nodes| {
            nodes.iter_mut().find(|n| n.node_id == id).unwrap().set_goal_state(S::Secondary);
        });
        reg.set_replication_quorum(id, true).unwrap();
        reg.update_health(id, Health::Good).unwrap();
    }

    forms.set_number_sync_standbys("default", 2).unwrap();
    fsm.apply_settings(&reg, &events, "default", 0).unwrap();
    assert_eq!(reg.get(a).unwrap().goal_state, S::ApplySettings);

    let result = fsm
        .node_active(&reg, &forms, &events, a, S::ApplySettings, true, SyncState::Unknown, 1, 0)
        .unwrap();
    assert_eq!(result.goal_state, S::Primary);
}
