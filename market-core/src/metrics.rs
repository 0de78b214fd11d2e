//! Metrics collection for observability
//!
//! Each ledger owns a [`Metrics`] instance with its own Prometheus registry.
//!
//! # Metrics
//!
//! - `{ledger}_operations_total{operation}` - Successful mutations
//! - `{ledger}_operation_failures_total{operation,reason}` - Rejected mutations
//! - `{ledger}_held_value` - Value currently held by the ledger (escrow only)

use prometheus::{Gauge, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Successful operations by name
    pub operations: IntCounterVec,

    /// Failed operations by name and error kind
    pub failures: IntCounterVec,

    /// Value held (escrowed funds plus unwithdrawn fees)
    pub held_value: Gauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector for `ledger`
    pub fn new(ledger: &str) -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let operations = IntCounterVec::new(
            Opts::new(
                format!("{}_operations_total", ledger),
                "Successful ledger operations",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(operations.clone()))?;

        let failures = IntCounterVec::new(
            Opts::new(
                format!("{}_operation_failures_total", ledger),
                "Rejected ledger operations",
            ),
            &["operation", "reason"],
        )?;
        registry.register(Box::new(failures.clone()))?;

        let held_value = Gauge::new(
            format!("{}_held_value", ledger),
            "Value currently held by the ledger",
        )?;
        registry.register(Box::new(held_value.clone()))?;

        Ok(Self {
            operations,
            failures,
            held_value,
            registry,
        })
    }

    /// Count the outcome of one operation
    pub fn record<T>(&self, operation: &str, outcome: &crate::Result<T>) {
        match outcome {
            Ok(_) => self.operations.with_label_values(&[operation]).inc(),
            Err(e) => self
                .failures
                .with_label_values(&[operation, e.kind()])
                .inc(),
        }
    }

    /// Successful count for `operation`
    pub fn succeeded(&self, operation: &str) -> u64 {
        self.operations.with_label_values(&[operation]).get()
    }

    /// Failure count for `operation` with `reason`
    pub fn failed(&self, operation: &str, reason: &str) -> u64 {
        self.failures.with_label_values(&[operation, reason]).get()
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_metrics_creation() {
        // Separate registries: two ledgers with the same name must not clash
        let a = Metrics::new("delivery").unwrap();
        let b = Metrics::new("delivery").unwrap();
        assert_eq!(a.succeeded("create"), 0);
        assert_eq!(b.succeeded("create"), 0);
    }

    #[test]
    fn test_record_outcomes() {
        let metrics = Metrics::new("escrow").unwrap();
        metrics.record("escrow", &Ok::<_, Error>(()));
        metrics.record("escrow", &Ok::<_, Error>(()));
        metrics.record::<()>("escrow", &Err(Error::InvalidDeliveryId));

        assert_eq!(metrics.succeeded("escrow"), 2);
        assert_eq!(metrics.failed("escrow", "invalid_delivery_id"), 1);
        assert_eq!(metrics.registry().gather().len(), 3);
    }
}
