// src/monitor/mod.rs

//! The monitor process: the authoritative FSM driving every keeper in the
//! cluster. Wires the node/formation registries, health prober, FSM, event
//! log, and RPC listener into a single `JoinSet`, grounded in the
//! teacher's `server/spawner.rs` task-supervision pattern.

pub mod events;
pub mod formation;
pub mod fsm;
pub mod health;
pub mod listener;
pub mod registry;
pub mod state;
pub mod sync_standby;

use crate::config::monitor::MonitorConfig;
use crate::error::Result;
use events::EventLog;
use formation::FormationRegistry;
use fsm::{FsmTimeouts, ReplicationFsm};
use health::{HealthCheckConfig, HealthProber};
use listener::MonitorServices;
use registry::NodeRegistry;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::info;

pub async fn run(config: MonitorConfig) -> Result<()> {
    let registry = Arc::new(NodeRegistry::new());
    let formations = Arc::new(FormationRegistry::new());
    let events = Arc::new(EventLog::new());
    let fsm = Arc::new(ReplicationFsm::new(FsmTimeouts {
        unhealthy_timeout: config.unhealthy_timeout,
        drain_timeout: config.drain_timeout,
        report_lsn_timeout: config.report_lsn_timeout,
    }));

    let services = Arc::new(MonitorServices {
        registry: registry.clone(),
        formations: formations.clone(),
        events: events.clone(),
        fsm: fsm.clone(),
    });

    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    let listen_port = config.port;
    let listener_services = services.clone();
    tasks.spawn(async move { listener::run(listen_port, listener_services).await });

    let health_config = HealthCheckConfig {
        period: config.health_check_period,
        timeout: config.health_check_timeout,
        max_retries: config.health_check_max_retries,
        retry_delay: config.health_check_retry_delay,
        startup_grace_period: config.startup_grace_period,
    };
    let prober = HealthProber::new(health_config);
    let (health_registry, health_formations, health_fsm, health_events) =
        (registry.clone(), formations.clone(), fsm.clone(), events.clone());
    tasks.spawn(async move {
        prober.run(health_registry, health_formations, health_fsm, health_events).await;
        Ok(())
    });

    info!(port = config.port, "monitor started");

    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(error = %e, "a monitor task exited with an error");
                return Err(e);
            }
            Err(join_err) => {
                tracing::error!(error = %join_err, "a monitor task panicked");
                return Err(crate::error::PgAutoFailoverError::Internal(join_err.to_string()));
            }
        }
    }
    Ok(())
}
