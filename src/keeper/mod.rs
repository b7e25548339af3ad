// src/keeper/mod.rs

//! The keeper process: node-active loop (C7), local FSM (C8), on-disk
//! state (C6), and the Postgres-facing collaborator traits.

pub mod client;
pub mod local_fsm;
pub mod node_active;
pub mod pg;
pub mod state_file;

use crate::config::KeeperConfig;
use crate::error::Result;
use crate::supervisor::{self, Restart, ServiceSpec, SupervisorLimits};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Runs the keeper's node-active loop under the supervisor (C9), until a
/// shutdown signal arrives. `PgCtl` itself is an external collaborator
/// (§1); this crate ships only the `test_double::FakePg` double, so that
/// is what a real deployment's `pg_ctl`/`postgres` adapter would replace.
pub async fn run(config: KeeperConfig, state_path: PathBuf) -> Result<()> {
    let pg: Arc<dyn pg::PgCtl> = Arc::new(pg::test_double::FakePg::new(true));
    let (shutdown_tx, _) = broadcast::channel(1);

    let services = vec![ServiceSpec {
        name: "node-active",
        restart: Restart::Permanent,
        factory: Box::new(move |_shutdown| {
            let config = config.clone();
            let state_path = state_path.clone();
            let pg = pg.clone();
            Box::pin(async move {
                let node_active = node_active::NodeActiveLoop::new(
                    config,
                    node_active::NodeActiveTimeouts::default(),
                    state_path,
                    pg.as_ref(),
                );
                node_active.run(Vec::new).await
            })
        }),
    }];

    tokio::select! {
        result = supervisor::run(services, SupervisorLimits::default(), shutdown_tx.clone()) => result,
        _ = supervisor::await_shutdown_signal() => {
            let _ = shutdown_tx.send(());
            Ok(())
        }
    }
}
