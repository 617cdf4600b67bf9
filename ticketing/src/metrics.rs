//! Engine metrics.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `boxoffice_capacity_consumed_total{pool}` - Units accepted by the ledger
//! - `boxoffice_capacity_rejected_total{pool}` - Consume calls rejected at the bound
//! - `boxoffice_capacity_released_total{pool}` - Units returned to a pool
//! - `boxoffice_reservations_total{status}` - Reservation transitions by resulting status
//! - `boxoffice_tickets_issued_total{disposition}` - Tickets issued (`valid` or `flagged`)
//! - `boxoffice_issuance_duplicates_total` - Redelivered payment events answered from storage
//! - `boxoffice_issuance_rejected_total{reason}` - Payment events refused at validation
//! - `boxoffice_scans_total{result}` - Scan attempts by result
//! - `boxoffice_store_errors_total{kind}` - Store failures (recorded by `boxoffice-postgres`)
//!
//! ## Gauges
//! - `boxoffice_active_reservations` - Reservations created minus reservations closed by this process

use crate::config::MetricsConfig;
use boxoffice_core::CapacityPool;
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Host is not an IP address
    #[error("Invalid metrics host: {0}")]
    InvalidHost(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Initialize and register all metric descriptions.
///
/// This should be called once at application startup, before any metrics are recorded.
pub fn register_metrics() {
    describe_counter!(
        "boxoffice_capacity_consumed_total",
        "Units of capacity accepted by the ledger, by pool"
    );
    describe_counter!(
        "boxoffice_capacity_rejected_total",
        "Consume attempts rejected because the pool bound was reached"
    );
    describe_counter!(
        "boxoffice_capacity_released_total",
        "Units of capacity returned to a pool"
    );

    describe_counter!(
        "boxoffice_reservations_total",
        "Reservation transitions by resulting status (active, fulfilled, released, expired)"
    );
    describe_gauge!(
        "boxoffice_active_reservations",
        "Reservations holding capacity"
    );

    describe_counter!(
        "boxoffice_tickets_issued_total",
        "Tickets issued by disposition (valid, flagged)"
    );
    describe_counter!(
        "boxoffice_issuance_duplicates_total",
        "Payment events answered from an existing transaction"
    );
    describe_counter!(
        "boxoffice_issuance_rejected_total",
        "Payment events refused during validation"
    );

    describe_counter!("boxoffice_scans_total", "Scan attempts by result");
    describe_counter!(
        "boxoffice_store_errors_total",
        "Store failures by kind (unavailable, conflict, corrupt)"
    );

    tracing::info!("Box office metrics registered");
}

/// Install the Prometheus recorder with an HTTP listener on `config`.
///
/// # Errors
///
/// Returns [`MetricsError`] if the host does not parse or the exporter cannot
/// be installed (for example, a recorder is already installed).
pub fn install_prometheus(config: &MetricsConfig) -> Result<SocketAddr, MetricsError> {
    let ip: IpAddr = config
        .host
        .parse()
        .map_err(|_| MetricsError::InvalidHost(config.host.clone()))?;
    let addr = SocketAddr::new(ip, config.port);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    tracing::info!(%addr, "Metrics exporter listening");
    Ok(addr)
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record units accepted by the ledger.
pub fn record_capacity_consumed(pool: CapacityPool, amount: u32) {
    metrics::counter!("boxoffice_capacity_consumed_total", "pool" => pool.as_str())
        .increment(u64::from(amount));
}

/// Record a consume rejected at the bound.
pub fn record_capacity_rejected(pool: CapacityPool) {
    metrics::counter!("boxoffice_capacity_rejected_total", "pool" => pool.as_str()).increment(1);
}

/// Record units returned to a pool.
pub fn record_capacity_released(pool: CapacityPool, amount: u32) {
    metrics::counter!("boxoffice_capacity_released_total", "pool" => pool.as_str())
        .increment(u64::from(amount));
}

/// Record a new reservation hold.
pub fn record_reservation_created() {
    metrics::counter!("boxoffice_reservations_total", "status" => "active").increment(1);
    metrics::gauge!("boxoffice_active_reservations").increment(1.0);
}

/// Record a reservation leaving `active`.
///
/// # Arguments
///
/// * `status` - The terminal status it moved to
pub fn record_reservation_closed(status: &'static str) {
    metrics::counter!("boxoffice_reservations_total", "status" => status).increment(1);
    metrics::gauge!("boxoffice_active_reservations").decrement(1.0);
}

/// Record one issuance's tickets.
pub fn record_tickets_issued(valid: usize, flagged: usize) {
    metrics::counter!("boxoffice_tickets_issued_total", "disposition" => "valid")
        .increment(u64::try_from(valid).unwrap_or(u64::MAX));
    if flagged > 0 {
        metrics::counter!("boxoffice_tickets_issued_total", "disposition" => "flagged")
            .increment(u64::try_from(flagged).unwrap_or(u64::MAX));
    }
}

/// Record a redelivered payment event.
pub fn record_issuance_duplicate() {
    metrics::counter!("boxoffice_issuance_duplicates_total").increment(1);
}

/// Record a payment event refused at validation.
pub fn record_issuance_rejected(reason: &'static str) {
    metrics::counter!("boxoffice_issuance_rejected_total", "reason" => reason).increment(1);
}

/// Record a scan attempt.
///
/// # Arguments
///
/// * `result` - `accepted`, `limit_exceeded`, `not_scannable` or `not_found`
pub fn record_scan(result: &'static str) {
    metrics::counter!("boxoffice_scans_total", "result" => result).increment(1);
}
