//! # Owned Resource Metrics
//!
//! Writes the engine performs on child resources, and certificates issued by the
//! cluster CA.

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::{IntCounter, IntCounterVec};
use std::sync::LazyLock;

static OWNED_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "gateway_operator_owned_operations_total",
            "Total number of operations on owned resources",
        ),
        &["kind", "result"],
    )
    .expect("Failed to create OWNED_OPERATIONS_TOTAL metric - this should never happen")
});

static DUPLICATES_REDUCED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "gateway_operator_duplicates_reduced_total",
            "Total number of duplicate owned resources deleted",
        ),
        &["kind"],
    )
    .expect("Failed to create DUPLICATES_REDUCED_TOTAL metric - this should never happen")
});

static CERTIFICATES_ISSUED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "gateway_operator_certificates_issued_total",
        "Total number of certificates issued by the cluster CA",
    )
    .expect("Failed to create CERTIFICATES_ISSUED_TOTAL metric - this should never happen")
});

/// Register owned resource metrics with the registry
pub(crate) fn register_owned_metrics() -> Result<()> {
    REGISTRY.register(Box::new(OWNED_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DUPLICATES_REDUCED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CERTIFICATES_ISSUED_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_owned_operations(kind: &str, result: &str) {
    OWNED_OPERATIONS_TOTAL
        .with_label_values(&[kind, result])
        .inc();
}

pub fn increment_duplicates_reduced(kind: &str) {
    DUPLICATES_REDUCED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_certificates_issued() {
    CERTIFICATES_ISSUED_TOTAL.inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_owned_operations() {
        let before = OWNED_OPERATIONS_TOTAL
            .with_label_values(&["Service", "created"])
            .get();
        increment_owned_operations("Service", "created");
        let after = OWNED_OPERATIONS_TOTAL
            .with_label_values(&["Service", "created"])
            .get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_certificates_issued() {
        let before = CERTIFICATES_ISSUED_TOTAL.get();
        increment_certificates_issued();
        assert_eq!(CERTIFICATES_ISSUED_TOTAL.get(), before + 1u64);
    }
}
