// src/supervisor/mod.rs

//! C9: supervises the keeper's sub-services (node-active loop, Postgres
//! control process, and optionally the monitor listener/HTTP status
//! endpoint), restarting `permanent` ones with exponential backoff and
//! exiting if one flaps too often. Generalizes the teacher's
//! `server/spawner.rs` `JoinSet`-of-tasks pattern — service boundaries
//! here are async tasks rather than forked OS processes, consistent with
//! this crate's cooperative single-threaded-event-loop model (§5).

pub mod pidfile;

use crate::error::{PgAutoFailoverError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

pub type BoxFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restart {
    Permanent,
    Transient,
}

pub struct ServiceSpec {
    pub name: &'static str,
    pub restart: Restart,
    pub factory: Box<dyn Fn(broadcast::Receiver<()>) -> BoxFuture + Send + Sync>,
}

#[derive(Debug, Clone, Copy)]
pub struct SupervisorLimits {
    pub restart_max_delay: Duration,
    pub restart_window: Duration,
    pub restart_window_max_failures: u32,
}

impl Default for SupervisorLimits {
    fn default() -> Self {
        Self {
            restart_max_delay: Duration::from_secs(30),
            restart_window: Duration::from_secs(60),
            restart_window_max_failures: 5,
        }
    }
}

struct FailureHistory {
    timestamps: Vec<Instant>,
}

/// Runs every registered service to completion, restarting permanent ones
/// with exponential backoff, until `shutdown_tx` fires or a permanent
/// service flaps more than `restart_window_max_failures` times within
/// `restart_window`.
pub async fn run(services: Vec<ServiceSpec>, limits: SupervisorLimits, shutdown_tx: broadcast::Sender<()>) -> Result<()> {
    let mut tasks = tokio::task::JoinSet::new();
    let mut histories: HashMap<&'static str, FailureHistory> = HashMap::new();
    let mut backoffs: HashMap<&'static str, Duration> = HashMap::new();

    for spec in &services {
        spawn_service(&mut tasks, spec, shutdown_tx.subscribe());
    }

    let service_by_name: HashMap<&'static str, &ServiceSpec> = services.iter().map(|s| (s.name, s)).collect();

    while let Some((name, result)) = tasks.join_next().await.map(|r| match r {
        Ok((name, inner)) => (name, inner),
        Err(join_err) => ("<unknown>", Err(PgAutoFailoverError::Internal(join_err.to_string()))),
    }) {
        let Some(spec) = service_by_name.get(name) else {
            continue;
        };

        match &result {
            Ok(()) => info!(service = name, "service exited cleanly"),
            Err(e) => warn!(service = name, error = %e, "service exited with an error"),
        }

        if spec.restart == Restart::Transient {
            continue;
        }

        let history = histories.entry(name).or_insert_with(|| FailureHistory { timestamps: Vec::new() });
        let now = Instant::now();
        history.timestamps.retain(|t| now.duration_since(*t) < limits.restart_window);
        history.timestamps.push(now);

        if history.timestamps.len() as u32 > limits.restart_window_max_failures {
            error!(service = name, "permanent service restarted too many times, shutting down");
            let _ = shutdown_tx.send(());
            return Err(PgAutoFailoverError::Internal(format!(
                "service '{name}' exceeded restart window limit"
            )));
        }

        let backoff = backoffs.entry(name).or_insert(Duration::from_millis(100));
        *backoff = (*backoff * 2).min(limits.restart_max_delay);
        let delay = *backoff;
        info!(service = name, ?delay, "restarting permanent service");
        tokio::time::sleep(delay).await;
        spawn_service(&mut tasks, spec, shutdown_tx.subscribe());
    }

    Ok(())
}

fn spawn_service(
    tasks: &mut tokio::task::JoinSet<(&'static str, Result<()>)>,
    spec: &ServiceSpec,
    shutdown_rx: broadcast::Receiver<()>,
) {
    let name = spec.name;
    let future = (spec.factory)(shutdown_rx);
    tasks.spawn(async move { (name, future.await) });
}

/// Waits for SIGTERM/SIGINT (mirroring the teacher's
/// `server/connection_loop.rs` `await_shutdown_signal`), then broadcasts
/// shutdown to every supervised service.
#[cfg(unix)]
pub async fn await_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received, shutting down"),
        _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
    }
}

#[cfg(not(unix))]
pub async fn await_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Ctrl-C received, shutting down");
}

/// Waits for SIGHUP and invokes `reload` each time it fires, logging and
/// discarding any validation failure rather than tearing down the process
/// (§4.9, §7 Configuration error category).
#[cfg(unix)]
pub async fn watch_for_reload(reload: impl Fn() -> Result<()>) {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sighup = signal(SignalKind::hangup()).expect("failed to register SIGHUP handler");
    loop {
        sighup.recv().await;
        info!("SIGHUP received, reloading configuration");
        if let Err(e) = reload() {
            warn!(error = %e, "configuration reload failed, keeping previous configuration");
        }
    }
}

#[cfg(not(unix))]
pub async fn watch_for_reload(_reload: impl Fn() -> Result<()>) {
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static ATTEMPTS: AtomicU32 = AtomicU32::new(0);

    fn flaky_service(_shutdown: broadcast::Receiver<()>) -> BoxFuture {
        Box::pin(async move {
            ATTEMPTS.fetch_add(1, Ordering::SeqCst);
            Err(PgAutoFailoverError::Internal("always fails".into()))
        })
    }

    #[tokio::test]
    async fn permanent_service_restarts_until_window_limit_then_shuts_down() {
        ATTEMPTS.store(0, Ordering::SeqCst);
        let (tx, _rx) = broadcast::channel(1);
        let limits = SupervisorLimits {
            restart_max_delay: Duration::from_millis(1),
            restart_window: Duration::from_secs(60),
            restart_window_max_failures: 2,
        };
        let services = vec![ServiceSpec {
            name: "flaky",
            restart: Restart::Permanent,
            factory: Box::new(flaky_service),
        }];
        let result = run(services, limits, tx).await;
        assert!(result.is_err());
        assert!(ATTEMPTS.load(Ordering::SeqCst) >= 3);
    }
}
