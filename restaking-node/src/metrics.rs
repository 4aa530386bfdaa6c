//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `restaking_delegations_total` - Delegations applied
//! - `restaking_undelegations_total` - Undelegations queued
//! - `restaking_actions_rejected_total` - Transactions that failed without aborting the block
//! - `restaking_undelegations_settled_total` - Undelegations completed at block end
//! - `restaking_undelegations_rescheduled_total` - Undelegations pushed back (operator frozen)
//! - `restaking_blocks_applied_total` - Blocks committed
//! - `restaking_blocks_aborted_total` - Blocks aborted on a fatal error
//! - `restaking_block_apply_duration_seconds` - Histogram of block apply latencies

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics collector
#[derive(Debug, Clone)]
pub struct Metrics {
    /// Delegations applied
    pub delegations_total: IntCounter,

    /// Undelegations queued
    pub undelegations_total: IntCounter,

    /// Failed transactions
    pub actions_rejected_total: IntCounter,

    /// Undelegations completed
    pub undelegations_settled_total: IntCounter,

    /// Undelegations rescheduled
    pub undelegations_rescheduled_total: IntCounter,

    /// Blocks committed
    pub blocks_applied_total: IntCounter,

    /// Blocks aborted
    pub blocks_aborted_total: IntCounter,

    /// Block apply duration histogram
    pub block_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector on a private registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let counter = IntCounter::new(name, help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        let delegations_total = counter("restaking_delegations_total", "Delegations applied")?;
        let undelegations_total =
            counter("restaking_undelegations_total", "Undelegations queued")?;
        let actions_rejected_total = counter(
            "restaking_actions_rejected_total",
            "Transactions that failed without aborting the block",
        )?;
        let undelegations_settled_total = counter(
            "restaking_undelegations_settled_total",
            "Undelegations completed at block end",
        )?;
        let undelegations_rescheduled_total = counter(
            "restaking_undelegations_rescheduled_total",
            "Undelegations pushed back because the operator is frozen",
        )?;
        let blocks_applied_total = counter("restaking_blocks_applied_total", "Blocks committed")?;
        let blocks_aborted_total = counter(
            "restaking_blocks_aborted_total",
            "Blocks aborted on a fatal error",
        )?;

        let block_duration = Histogram::with_opts(
            HistogramOpts::new(
                "restaking_block_apply_duration_seconds",
                "Histogram of block apply latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.050, 0.100, 0.500, 1.0]),
        )?;
        registry.register(Box::new(block_duration.clone()))?;

        Ok(Self {
            delegations_total,
            undelegations_total,
            actions_rejected_total,
            undelegations_settled_total,
            undelegations_rescheduled_total,
            blocks_applied_total,
            blocks_aborted_total,
            block_duration,
            registry,
        })
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every metric in the Prometheus text format
    pub fn encode_text(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_are_independent() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.delegations_total.inc();
        assert_eq!(first.delegations_total.get(), 1);
        assert_eq!(second.delegations_total.get(), 0);
    }

    #[test]
    fn test_encode_text() {
        let metrics = Metrics::new().unwrap();
        metrics.blocks_applied_total.inc();
        let text = metrics.encode_text().unwrap();
        assert!(text.contains("restaking_blocks_applied_total 1"));
    }
}
