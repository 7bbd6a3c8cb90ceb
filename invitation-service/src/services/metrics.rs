//! Metrics for invitation-service.
//!
//! Everything goes through the `metrics` facade; the Prometheus recorder
//! renders it for `/metrics`.

use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

use crate::models::SecurityEventType;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Safe to call more than once.
pub fn init_metrics() -> Result<(), anyhow::Error> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {}", e))?;

    if METRICS_HANDLE.set(handle).is_err() {
        tracing::warn!("Metrics recorder initialized concurrently");
    }
    Ok(())
}

/// Get metrics output in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

pub fn record_invitation_created(outcome: &'static str) {
    counter!("invitations_created_total", "outcome" => outcome).increment(1);
}

pub fn record_invitation_accepted(outcome: &'static str) {
    counter!("invitation_acceptances_total", "outcome" => outcome).increment(1);
}

pub fn record_invitation_revoked() {
    counter!("invitations_revoked_total").increment(1);
}

pub fn record_mail_delivery(outcome: &'static str) {
    counter!("invitation_mail_deliveries_total", "outcome" => outcome).increment(1);
}

pub fn record_security_event(event_type: SecurityEventType) {
    counter!("security_events_total", "event_type" => event_type.as_str()).increment(1);
}
