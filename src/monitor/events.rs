// src/monitor/events.rs

//! C5: the append-only event log. Every state transition the FSM commits is
//! recorded here and published on the `state`/`log` notification channels
//! (§4.5) so keepers and `pg_autoctl show events` observers can follow
//! convergence without polling.

use crate::monitor::state::{NodeId, ReplicationState};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: i64,
    pub formation_id: String,
    pub group_id: i32,
    pub node_id: NodeId,
    pub node_name: String,
    pub node_port: u16,
    pub reported_state: ReplicationState,
    pub goal_state: ReplicationState,
    pub description: String,
}

/// Append-only; `capacity` bounds the in-memory ring so a long-running
/// monitor doesn't grow unbounded (the real monitor persists to a SQL
/// table instead — here the in-memory log is the full store).
///
/// Two notification channels, grounding the monitor's `LISTEN
/// state`/`LISTEN log` pair (§4.5/§6): `state` carries only the fixed
/// `new_state for ...` grammar line, `log` carries the free-form
/// description. Both fire from the same `record()` call.
pub struct EventLog {
    events: Mutex<Vec<Event>>,
    next_id: AtomicI64,
    state_tx: broadcast::Sender<String>,
    log_tx: broadcast::Sender<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        let (state_tx, _rx) = broadcast::channel(1024);
        let (log_tx, _rx) = broadcast::channel(1024);
        Self {
            events: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
            state_tx,
            log_tx,
        }
    }

    /// Subscribes to the `state` channel: one line per transition, rendered
    /// in the §4.5 grammar (`new_state for ‹name›:‹port›/‹nodeId› in
    /// formation "‹fid›": ‹reported›/‹assigned›`).
    pub fn subscribe_state(&self) -> broadcast::Receiver<String> {
        self.state_tx.subscribe()
    }

    /// Subscribes to the `log` channel: the full structured `Event`, one per
    /// transition, for `pg_autoctl show events` and similar observers.
    pub fn subscribe_log(&self) -> broadcast::Receiver<Event> {
        self.log_tx.subscribe()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        formation_id: &str,
        group_id: i32,
        node_id: NodeId,
        node_name: &str,
        node_port: u16,
        reported_state: ReplicationState,
        goal_state: ReplicationState,
        description: &str,
    ) {
        let event = Event {
            event_id: self.next_id.fetch_add(1, Ordering::SeqCst),
            formation_id: formation_id.to_string(),
            group_id,
            node_id,
            node_name: node_name.to_string(),
            node_port,
            reported_state,
            goal_state,
            description: description.to_string(),
        };
        tracing::info!(
            formation = %event.formation_id,
            group = event.group_id,
            node = event.node_id,
            from = %event.reported_state,
            to = %event.goal_state,
            "{}",
            event.description
        );
        let state_line = format!(
            "new_state for {}:{}/{} in formation \"{}\": {}/{}",
            event.node_name,
            event.node_port,
            event.node_id,
            event.formation_id,
            event.reported_state,
            event.goal_state,
        );
        self.events.lock().push(event.clone());
        // No active subscribers is a routine, not an error condition.
        let _ = self.state_tx.send(state_line);
        let _ = self.log_tx.send(event);
    }

    pub fn tail(&self, formation_id: Option<&str>, limit: usize) -> Vec<Event> {
        let events = self.events.lock();
        events
            .iter()
            .rev()
            .filter(|e| formation_id.is_none_or(|f| e.formation_id == f))
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_appended_in_order() {
        let log = EventLog::new();
        log.record("f", 0, 1, "a", 5432, ReplicationState::Init, ReplicationState::Single, "joined");
        log.record("f", 0, 1, "a", 5432, ReplicationState::Single, ReplicationState::WaitPrimary, "standby joined");
        let tail = log.tail(Some("f"), 10);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].goal_state, ReplicationState::WaitPrimary);
        assert_eq!(tail[1].goal_state, ReplicationState::Single);
    }

    #[test]
    fn subscribers_receive_live_events() {
        let log = EventLog::new();
        let mut rx = log.subscribe_log();
        log.record("f", 0, 1, "a", 5432, ReplicationState::Init, ReplicationState::Single, "joined");
        let event = rx.try_recv().unwrap();
        assert_eq!(event.goal_state, ReplicationState::Single);
    }

    #[test]
    fn state_channel_renders_the_fixed_grammar() {
        let log = EventLog::new();
        let mut rx = log.subscribe_state();
        log.record("default", 0, 7, "node_a", 5432, ReplicationState::Init, ReplicationState::Single, "joined");
        let line = rx.try_recv().unwrap();
        assert_eq!(line, "new_state for node_a:5432/7 in formation \"default\": init/single");
    }
}
