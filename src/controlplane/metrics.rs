//! Engine Metrics
//!
//! Prometheus instruments for reconciliation operations, registered in a
//! caller-supplied registry so tests and embedders stay isolated.

use crate::error::Result;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::time::Duration;

/// Outcome label values
pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_ERROR: &str = "error";

/// Counters and histograms shared by every engine
#[derive(Clone)]
pub struct EngineMetrics {
    operations: IntCounterVec,
    duration: HistogramVec,
    work_request_polls: IntCounterVec,
}

impl EngineMetrics {
    pub fn register(registry: &Registry) -> Result<Self> {
        let operations = IntCounterVec::new(
            Opts::new(
                "reconciler_operations_total",
                "Reconciliation operations by kind, verb and outcome",
            ),
            &["kind", "verb", "outcome"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "reconciler_operation_duration_seconds",
                "Duration of reconciliation operations",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 1200.0]),
            &["kind", "verb"],
        )?;
        let work_request_polls = IntCounterVec::new(
            Opts::new(
                "reconciler_work_request_polls_total",
                "Remote polls issued while waiting on asynchronous operations",
            ),
            &["kind"],
        )?;

        registry.register(Box::new(operations.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(work_request_polls.clone()))?;

        Ok(Self {
            operations,
            duration,
            work_request_polls,
        })
    }

    pub fn observe(&self, kind: &str, verb: &str, success: bool, elapsed: Duration) {
        let outcome = if success { OUTCOME_SUCCESS } else { OUTCOME_ERROR };
        self.operations
            .with_label_values(&[kind, verb, outcome])
            .inc();
        self.duration
            .with_label_values(&[kind, verb])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_polls(&self, kind: &str, polls: u32) {
        if polls > 0 {
            self.work_request_polls
                .with_label_values(&[kind])
                .inc_by(u64::from(polls));
        }
    }

    pub fn operations(&self, kind: &str, verb: &str, outcome: &str) -> u64 {
        self.operations
            .with_label_values(&[kind, verb, outcome])
            .get()
    }

    pub fn polls(&self, kind: &str) -> u64 {
        self.work_request_polls.with_label_values(&[kind]).get()
    }
}
