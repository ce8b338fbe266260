//! Metrics definitions for the indexer.
//!
//! This module defines all metrics used throughout the indexer.
//! Metrics are collected using the `metrics` crate and can be exported
//! to Prometheus via `metrics-exporter-prometheus`.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

/// Initialize all metric descriptions.
/// Call this once at startup before any metrics are recorded.
pub fn init_metrics() {
    describe_counter!(
        "decode_errors_total",
        "Total number of decode errors during block processing"
    );
    describe_counter!(
        "blocks_indexed_total",
        "Total number of blocks successfully indexed"
    );
    describe_histogram!(
        "block_processing_duration_seconds",
        "Time taken to process a block in seconds"
    );
    describe_counter!(
        "handler_errors_total",
        "Total number of handler errors during event processing"
    );
    describe_counter!(
        "accounts_created_total",
        "Total number of ledger accounts created from chain snapshots"
    );
    describe_counter!(
        "balance_events_total",
        "Total number of balance events reconciled, labelled by kind"
    );
}

/// Record a decode error.
///
/// # Arguments
/// * `error_type` - The type of error (e.g. "event")
/// * `pallet` - The pallet name (if known)
pub fn record_decode_error(error_type: &str, pallet: &str) {
    counter!("decode_errors_total", "type" => error_type.to_string(), "pallet" => pallet.to_string())
        .increment(1);
}

/// Record a successfully indexed block.
pub fn record_block_indexed() {
    counter!("blocks_indexed_total").increment(1);
}

/// Record block processing duration.
pub fn record_block_processing_duration(duration_secs: f64) {
    histogram!("block_processing_duration_seconds").record(duration_secs);
}

/// Record a handler error.
///
/// # Arguments
/// * `pallet` - The pallet name
pub fn record_handler_error(pallet: &str) {
    counter!("handler_errors_total", "pallet" => pallet.to_string()).increment(1);
}

/// Record a ledger account created from a chain snapshot.
pub fn record_account_created() {
    counter!("accounts_created_total").increment(1);
}

/// Record a reconciled balance event.
///
/// # Arguments
/// * `kind` - The event kind (e.g. "transfer", "deposit", "slash")
pub fn record_balance_event(kind: &str) {
    counter!("balance_events_total", "kind" => kind.to_string()).increment(1);
}

/// A timer that automatically records duration when dropped.
pub struct ProcessingTimer {
    start: Instant,
}

impl ProcessingTimer {
    /// Start a new processing timer.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for ProcessingTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessingTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_block_processing_duration(duration);
    }
}
