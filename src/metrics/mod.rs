//! Prometheus metrics for monitoring
//!
//! Counts auctions, per-attempt outcomes, call failures, and settlement
//! accounting. The engine records into the default registry; embedding hosts
//! expose it however they serve metrics.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Gauge, Histogram,
};

lazy_static! {
    // Auction metrics
    pub static ref AUCTIONS_TOTAL: CounterVec = register_counter_vec!(
        "maestro_auctions_total",
        "Total auctions run, by selection mode",
        &["mode"]
    ).unwrap();

    pub static ref AUCTIONS_WON_TOTAL: Counter = register_counter!(
        "maestro_auctions_won_total",
        "Total auctions that produced a winning solver"
    ).unwrap();

    pub static ref SOLVER_ATTEMPTS: CounterVec = register_counter_vec!(
        "maestro_solver_attempts_total",
        "Total solver execution attempts by outcome",
        &["outcome"]
    ).unwrap();

    // Call metrics
    pub static ref CALL_FAILURES: CounterVec = register_counter_vec!(
        "maestro_call_failures_total",
        "Total failed calls by error class",
        &["error"]
    ).unwrap();

    pub static ref GAS_CHARGED: Histogram = register_histogram!(
        "maestro_gas_charged",
        "Gas units charged per call",
        vec![10_000.0, 50_000.0, 100_000.0, 250_000.0, 500_000.0, 1_000_000.0, 5_000_000.0]
    ).unwrap();

    pub static ref REFUNDS_TOTAL: Counter = register_counter!(
        "maestro_refunds_total",
        "Total calls that returned surplus attached value"
    ).unwrap();

    // Escrow metrics
    pub static ref ESCROW_TOTAL: Gauge = register_gauge!(
        "maestro_escrow_total_wei",
        "Total value currently custodied in escrow"
    ).unwrap();
}

// Helper functions to record metrics

pub fn record_auction(ex_post: bool) {
    let mode = if ex_post { "ex_post" } else { "sequential" };
    AUCTIONS_TOTAL.with_label_values(&[mode]).inc();
}

pub fn record_auction_won() {
    AUCTIONS_WON_TOTAL.inc();
}

pub fn record_solver_attempt(outcome: &str) {
    SOLVER_ATTEMPTS.with_label_values(&[outcome]).inc();
}

pub fn record_call_failure(error: &str) {
    CALL_FAILURES.with_label_values(&[error]).inc();
}

pub fn record_gas_charged(gas_units: u64) {
    GAS_CHARGED.observe(gas_units as f64);
}

pub fn record_refund() {
    REFUNDS_TOTAL.inc();
}

pub fn record_escrow_total(total_wei: f64) {
    ESCROW_TOTAL.set(total_wei);
}
