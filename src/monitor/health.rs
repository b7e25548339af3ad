// src/monitor/health.rs

//! C3: the health prober. A background task that periodically opens a
//! plain TCP connection to every registered node's Postgres port — no SQL
//! round-trip, just a connect/handshake probe (§4.3) — and feeds the
//! result into the node registry and FSM.

use crate::monitor::events::EventLog;
use crate::monitor::fsm::ReplicationFsm;
use crate::monitor::registry::NodeRegistry;
use crate::monitor::state::Health;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct HealthCheckConfig {
    pub period: Duration,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub startup_grace_period: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(5),
            timeout: Duration::from_secs(5),
            max_retries: 2,
            retry_delay: Duration::from_secs(2),
            startup_grace_period: Duration::from_secs(10),
        }
    }
}

pub struct HealthProber {
    config: HealthCheckConfig,
    started_at: Instant,
}

impl HealthProber {
    pub fn new(config: HealthCheckConfig) -> Self {
        Self {
            config,
            started_at: Instant::now(),
        }
    }

    /// Attempts a single connect to `addr`, retrying up to `max_retries`
    /// times with `retry_delay` between attempts before giving up.
    async fn probe_once(&self, addr: SocketAddr) -> bool {
        for attempt in 0..=self.config.max_retries {
            match timeout(self.config.timeout, TcpStream::connect(addr)).await {
                Ok(Ok(_stream)) => return true,
                Ok(Err(e)) => debug!(%addr, attempt, error = %e, "health probe connection refused"),
                Err(_) => debug!(%addr, attempt, "health probe timed out"),
            }
            if attempt < self.config.max_retries {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }
        false
    }

    /// Runs the probe loop forever, ticking every `period`. Intended to be
    /// spawned as one task in the monitor's `JoinSet` (§5).
    pub async fn run(
        &self,
        registry: std::sync::Arc<NodeRegistry>,
        formations: std::sync::Arc<crate::monitor::formation::FormationRegistry>,
        fsm: std::sync::Arc<ReplicationFsm>,
        events: std::sync::Arc<EventLog>,
    ) {
        let mut ticker = tokio::time::interval(self.config.period);
        loop {
            ticker.tick().await;
            // §4.3: a one-time window from the monitor's own startup, not
            // re-armed per node, so nodes mid-bootstrap alongside the
            // monitor aren't flagged unhealthy before Postgres is up.
            if self.started_at.elapsed() < self.config.startup_grace_period {
                continue;
            }
            // Snapshot every known node; the node count in any real
            // deployment is small enough that this is cheap.
            for node in registry.all_nodes() {
                let healthy = self.probe_once(node.addr()).await;
                let new_health = if healthy { Health::Good } else { Health::Bad };
                match registry.update_health(node.node_id, new_health) {
                    Ok(true) => {
                        if !healthy {
                            warn!(node = node.node_id, addr = %node.addr(), "node became unhealthy");
                        }
                        events.record(
                            &node.formation_id,
                            node.group_id,
                            node.node_id,
                            &node.node_name,
                            node.node_port,
                            node.reported_state,
                            node.goal_state,
                            if healthy { "health check recovered" } else { "health check failed" },
                        );
                        // A health transition can flip invariant P (pairing);
                        // re-run the FSM for the affected group by replaying
                        // the node's own last report.
                        let _ = fsm.node_active(
                            &registry,
                            &formations,
                            &events,
                            node.node_id,
                            node.reported_state,
                            node.pg_is_running,
                            node.pgsr_sync_state,
                            node.reported_tli,
                            node.reported_lsn,
                        );
                    }
                    Ok(false) => {}
                    Err(e) => warn!(node = node.node_id, error = %e, "failed to update node health"),
                }
            }
        }
    }
}
