// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub const ENTRIES_APPLIED: &str = "replica_catchup_entries_applied_total";
pub const CATCHUP_ROUNDS: &str = "replica_catchup_rounds_total";
pub const PEER_FAILURES: &str = "replica_peer_failures_total";
pub const CATCHUP_DURATION: &str = "replica_catchup_duration_seconds";
pub const VERIFY_DIVERGENCES: &str = "replica_verify_divergences_total";
pub const LEDGER_SIZE: &str = "replica_ledger_size";

/// Initialize telemetry (logs + metrics)
pub fn init_telemetry() {
    // 1. Initialize Tracing (Logs)
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "replica_node=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    // 2. Initialize Metrics (Prometheus)
    init_metrics();
}

/// Install the Prometheus recorder once per process.
pub fn init_metrics() {
    if PROM_HANDLE.get().is_some() {
        return;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROM_HANDLE.set(handle).is_err() {
                tracing::warn!("Prometheus handle already set. Telemetry re-initialized?");
            }
        }
        Err(e) => {
            tracing::warn!("Prometheus recorder not installed: {}", e);
            return;
        }
    }

    metrics::describe_counter!(ENTRIES_APPLIED, "Ledger entries applied by catchup");
    metrics::describe_counter!(CATCHUP_ROUNDS, "Catchup rounds started");
    metrics::describe_counter!(PEER_FAILURES, "Peer requests that failed or timed out");
    metrics::describe_histogram!(CATCHUP_DURATION, "Wall time of completed catchups");
    metrics::describe_counter!(VERIFY_DIVERGENCES, "Divergences reported by consistency checks");
    metrics::describe_gauge!(LEDGER_SIZE, "Ledger size per node");

    metrics::gauge!("replica_node_up", 1.0);
}

/// Get the Prometheus handle to render metrics
pub fn get_metrics() -> String {
    if let Some(handle) = PROM_HANDLE.get() {
        handle.render()
    } else {
        "# metrics not initialized".to_string()
    }
}
