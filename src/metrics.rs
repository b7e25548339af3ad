// src/metrics.rs

//! Ambient Prometheus metrics surface (§10.7), carried regardless of the
//! spec's feature-level Non-goals: an axum `/metrics` handler serving the
//! `prometheus` crate's default registry, grounded in the teacher's
//! `server/metrics_server.rs`.

use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tracing::{error, info};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static NODE_GOAL_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    let gauge = IntGaugeVec::new(
        Opts::new("pgautofailover_node_goal_state", "current goal state per node, one gauge per (node, state) set to 1"),
        &["formation", "node_id", "state"],
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).ok();
    gauge
});

pub static WRITABLE_NODES: Lazy<IntGaugeVec> = Lazy::new(|| {
    let gauge = IntGaugeVec::new(
        Opts::new("pgautofailover_writable_nodes", "count of writable nodes per group"),
        &["formation", "group"],
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).ok();
    gauge
});

pub static REGISTERED_NODES: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("pgautofailover_registered_nodes", "total nodes known to the monitor").unwrap();
    REGISTRY.register(Box::new(gauge.clone())).ok();
    gauge
});

fn gather() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buf = Vec::new();
    encoder.encode(&metric_families, &mut buf).ok();
    buf
}

async fn metrics_handler() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "text/plain; version=0.0.4")], gather())
}

/// Runs the `/metrics` HTTP server until `shutdown_rx` fires. A no-op when
/// `port` is `None` (metrics are opt-in, per `MonitorConfig::metrics_port`).
pub async fn run(port: Option<u16>, mut shutdown_rx: broadcast::Receiver<()>) {
    let Some(port) = port else {
        info!("metrics server disabled");
        return;
    };

    let app = Router::new().route("/metrics", get(metrics_handler));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "metrics server listening");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, port, "failed to bind metrics server");
            return;
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("metrics server shutting down");
        })
        .await
        .ok();
}
