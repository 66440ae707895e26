// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Prometheus metrics for shard migration
//!
//! Exports metrics for monitoring migrations including:
//! - Copy increment outcomes (requeued, complete, timeouts, failures)
//! - Job queue throughput and failures

use prometheus::{IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use strum::IntoStaticStr;

// Static metric initialization uses expect because these are compile-time
// constant definitions that cannot fail in practice. If they do fail, it indicates
// a programming error (e.g., invalid metric name) that should cause a panic at startup.
#[allow(clippy::expect_used)]
mod metrics_impl {
    use super::*;
    use lazy_static::lazy_static;

    lazy_static! {
        /// Registry for all shard-migration metrics
        pub static ref REGISTRY: Registry = Registry::new();

        /// Copy increments by outcome
        pub static ref COPY_INCREMENTS: IntCounterVec = IntCounterVec::new(
            Opts::new(
                "shard_migration_copy_increments_total",
                "Total copy job increments, by outcome"
            ),
            &["outcome"]
        ).expect("valid metric name");

        /// Jobs run to completion by the queue, successful or not
        pub static ref JOBS_EXECUTED: IntCounter = IntCounter::with_opts(
            Opts::new(
                "shard_migration_jobs_executed_total",
                "Total jobs executed by the job queue"
            )
        ).expect("valid metric name");

        /// Jobs that returned an error or panicked
        pub static ref JOBS_FAILED: IntCounter = IntCounter::with_opts(
            Opts::new(
                "shard_migration_jobs_failed_total",
                "Total jobs that failed in the job queue"
            )
        ).expect("valid metric name");
    }
}

pub use metrics_impl::{COPY_INCREMENTS, JOBS_EXECUTED, JOBS_FAILED, REGISTRY};

/// How a single copy increment ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum CopyOutcome {
    /// More rows remain; a successor was queued
    Requeued,
    /// The copy finished and the destination was returned to service
    Complete,
    /// The destination was cancelled by an operator
    Cancelled,
    /// Source or destination no longer exists
    Abandoned,
    /// Source timed out; a smaller successor was queued
    ShardTimeout,
    /// Connection timed out; a smaller successor was queued
    ConnectionTimeout,
    /// The destination was marked errored
    Failed,
}

/// Register all metrics with the registry
///
/// Should be called once during application startup.
/// Panics if registration fails (indicates a programming error).
#[allow(clippy::expect_used)]
pub fn register_metrics() {
    REGISTRY
        .register(Box::new(COPY_INCREMENTS.clone()))
        .expect("Failed to register COPY_INCREMENTS");
    REGISTRY
        .register(Box::new(JOBS_EXECUTED.clone()))
        .expect("Failed to register JOBS_EXECUTED");
    REGISTRY
        .register(Box::new(JOBS_FAILED.clone()))
        .expect("Failed to register JOBS_FAILED");
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

pub fn record_copy_outcome(outcome: CopyOutcome) {
    let label: &'static str = outcome.into();
    COPY_INCREMENTS.with_label_values(&[label]).inc();
}

pub fn copy_outcome_count(outcome: CopyOutcome) -> u64 {
    let label: &'static str = outcome.into();
    COPY_INCREMENTS.with_label_values(&[label]).get()
}

pub fn record_job_executed(failed: bool) {
    JOBS_EXECUTED.inc();
    if failed {
        JOBS_FAILED.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_outcome_labels() {
        let label: &'static str = CopyOutcome::ConnectionTimeout.into();
        assert_eq!(label, "connection_timeout");
        let label: &'static str = CopyOutcome::Requeued.into();
        assert_eq!(label, "requeued");
    }

    #[test]
    fn test_copy_outcome_counter() {
        // Counters are process-global; compare deltas only.
        let before = copy_outcome_count(CopyOutcome::Abandoned);
        record_copy_outcome(CopyOutcome::Abandoned);
        record_copy_outcome(CopyOutcome::Abandoned);
        assert!(copy_outcome_count(CopyOutcome::Abandoned) - before >= 2);
    }

    #[test]
    fn test_job_failure_counter() {
        let executed = JOBS_EXECUTED.get();
        let failed = JOBS_FAILED.get();
        record_job_executed(true);
        assert!(JOBS_EXECUTED.get() > executed);
        assert!(JOBS_FAILED.get() > failed);
    }
}
