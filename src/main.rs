// src/main.rs

//! The `pg_autoctl` binary entry point: a deliberately thin mode dispatch
//! (monitor vs. keeper), grounded in the teacher's manual `env::args()`
//! branching and reloadable `tracing_subscriber` filter setup.

use pg_auto_failover::config::{KeeperConfig, MonitorConfig};
use pg_auto_failover::error::PgAutoFailoverError;
use pg_auto_failover::{keeper, monitor};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

#[tokio::main]
async fn main() {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--version") {
        println!("pg_autoctl version {VERSION}");
        return;
    }

    let result = match args.get(1).map(String::as_str) {
        Some("monitor") => run_monitor(&args).await,
        Some("keeper") => run_keeper(&args).await,
        _ => {
            eprintln!("Usage: pg_autoctl <monitor|keeper> --config <path> [--state <path>]");
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        error!(error = %e, "pg_autoctl exited with an error");
        std::process::exit(e.exit_code());
    }
}

fn flag_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter().position(|a| a == name).and_then(|i| args.get(i + 1)).map(String::as_str)
}

/// Installs a reloadable `EnvFilter` layer so a future SIGHUP-triggered
/// config reload can adjust verbosity without restarting the process.
fn init_logging(initial_level: &str) {
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(
        env::var("RUST_LOG").unwrap_or_else(|_| initial_level.to_string()),
    ));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .try_init();
    // Held so a SIGHUP handler could swap the filter in a future reload path.
    let _reload_handle = Arc::new(reload_handle);
}

async fn run_monitor(args: &[String]) -> Result<(), PgAutoFailoverError> {
    let config_path = flag_value(args, "--config").unwrap_or("monitor.toml");
    let config = MonitorConfig::from_file(config_path).unwrap_or_default();
    init_logging(&config.log_level);

    let metrics_port = config.metrics_port;
    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let metrics_rx = shutdown_tx.subscribe();
    let metrics_task = tokio::spawn(async move {
        pg_auto_failover::metrics::run(metrics_port, metrics_rx).await;
    });

    let result = tokio::select! {
        result = monitor::run(config) => result,
        _ = pg_auto_failover::supervisor::await_shutdown_signal() => Ok(()),
    };
    let _ = shutdown_tx.send(());
    let _ = metrics_task.await;
    result
}

async fn run_keeper(args: &[String]) -> Result<(), PgAutoFailoverError> {
    let config_path = flag_value(args, "--config").unwrap_or("pg_autoctl.ini");
    let config = KeeperConfig::from_file(config_path)?;
    init_logging("info");

    let state_path = flag_value(args, "--state")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&config.postgres.pgdata).join("pg_autoctl.state"));

    keeper::run(config, state_path).await
}
