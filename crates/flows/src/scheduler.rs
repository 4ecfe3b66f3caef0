//! Time-driven scheduler — an external periodic caller invokes
//! [`Scheduler::process_due`]; the engine never self-schedules.
//!
//! Run statistics are an explicit value threaded through calls, not hidden
//! process-global state: losing them on restart costs only displayed
//! counters, never enrollment correctness.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use lifecycle_core::config::SchedulerConfig;
use lifecycle_core::store::SnapshotStore;

use crate::engine::FlowEngine;
use crate::store::FlowStore;
use crate::types::{AdvanceOutcome, EnrollmentStatus, FlowStatus};

/// Counters for one `process_due` invocation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SchedulerRun {
    /// Due enrollments selected this tick, including skips.
    pub processed: u64,
    pub advanced: u64,
    pub completed: u64,
    pub errors: u64,
    /// Enrollments left pending: non-active flow or a lost claim race.
    pub skipped: u64,
    pub actions_dispatched: u64,
}

/// Advisory cumulative statistics. Persist them if cross-restart visibility
/// matters; they are never a correctness dependency.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_duration_ms: u64,
    pub last_processed: u64,
    pub total_runs: u64,
    pub total_processed: u64,
    pub total_advanced: u64,
    pub total_completed: u64,
    pub total_errors: u64,
}

impl SchedulerStats {
    fn record(&mut self, run: &SchedulerRun, now: DateTime<Utc>, duration_ms: u64) {
        self.last_run_at = Some(now);
        self.last_run_duration_ms = duration_ms;
        self.last_processed = run.processed;
        self.total_runs += 1;
        self.total_processed += run.processed;
        self.total_advanced += run.advanced;
        self.total_completed += run.completed;
        self.total_errors += run.errors;
    }
}

/// Drives due enrollments through the flow engine.
pub struct Scheduler {
    engine: Arc<FlowEngine>,
    store: Arc<dyn FlowStore>,
    snapshots: Arc<dyn SnapshotStore>,
    tick_batch_size: usize,
}

impl Scheduler {
    pub fn new(
        engine: Arc<FlowEngine>,
        store: Arc<dyn FlowStore>,
        snapshots: Arc<dyn SnapshotStore>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            engine,
            store,
            snapshots,
            tick_batch_size: config.tick_batch_size,
        }
    }

    /// Selects active enrollments with `next_process_at <= now` and advances
    /// each one. Per-enrollment serialization comes from the store's
    /// compare-and-swap claim: the loser of a race skips the enrollment for
    /// this tick and picks it up on the next.
    pub fn process_due(&self, now: DateTime<Utc>, stats: &mut SchedulerStats) -> SchedulerRun {
        let started = Instant::now();
        let due = self.store.due_enrollments(now, self.tick_batch_size);
        let mut run = SchedulerRun::default();

        for candidate in due {
            run.processed += 1;

            let Some(flow) = self.store.get_flow(&candidate.flow_id) else {
                // The graph is gone; the enrollment can never make progress.
                run.errors += 1;
                if self.store.claim(&candidate.id, candidate.version) {
                    if let Some(mut enrollment) = self.store.get_enrollment(&candidate.id) {
                        enrollment.status = EnrollmentStatus::Errored;
                        enrollment.error = Some(format!("flow {} not found", candidate.flow_id));
                        enrollment.next_process_at = None;
                        enrollment.updated_at = now;
                        if let Err(e) = self.store.save_enrollment(enrollment) {
                            warn!(error = %e, "Enrollment write failed");
                        }
                    }
                }
                continue;
            };

            // Paused or archived flows keep their enrollments pending so
            // operators can pause without losing state.
            if flow.status != FlowStatus::Active {
                debug!(
                    enrollment_id = %candidate.id,
                    flow_id = %flow.id,
                    status = ?flow.status,
                    "Flow not active, leaving enrollment pending"
                );
                run.skipped += 1;
                continue;
            }

            if !self.store.claim(&candidate.id, candidate.version) {
                run.skipped += 1;
                continue;
            }
            let Some(mut enrollment) = self.store.get_enrollment(&candidate.id) else {
                run.errors += 1;
                continue;
            };

            // Over-age enrollments exit instead of advancing.
            if let Some(days) = flow.settings.auto_exit_after_days {
                if now - enrollment.enrolled_at >= Duration::days(days as i64) {
                    enrollment.status = EnrollmentStatus::Exited;
                    enrollment.exit_reason = Some("auto_exit_window_elapsed".into());
                    enrollment.next_process_at = None;
                    enrollment.updated_at = now;
                    run.completed += 1;
                    if let Err(e) = self.store.save_enrollment(enrollment) {
                        warn!(error = %e, "Enrollment write failed");
                        run.errors += 1;
                    }
                    continue;
                }
            }

            let Some(snapshot) = self.snapshots.get(&enrollment.entity_id) else {
                run.errors += 1;
                enrollment.status = EnrollmentStatus::Errored;
                enrollment.error = Some("entity snapshot unavailable".into());
                enrollment.next_process_at = None;
                enrollment.updated_at = now;
                if let Err(e) = self.store.save_enrollment(enrollment) {
                    warn!(error = %e, "Enrollment write failed");
                }
                continue;
            };

            let report = self.engine.advance_one(&mut enrollment, &flow, &snapshot, now);
            run.actions_dispatched += report.actions_executed as u64;
            match report.outcome {
                AdvanceOutcome::Waiting { .. } => run.advanced += 1,
                AdvanceOutcome::Completed | AdvanceOutcome::Exited { .. } => {
                    run.advanced += 1;
                    run.completed += 1;
                }
                AdvanceOutcome::Errored { .. } => run.errors += 1,
            }
            if let Err(e) = self.store.save_enrollment(enrollment) {
                warn!(error = %e, "Enrollment write failed");
                run.errors += 1;
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        stats.record(&run, now, duration_ms);
        metrics::counter!("scheduler.runs").increment(1);
        metrics::counter!("scheduler.enrollments_processed").increment(run.processed);
        info!(
            processed = run.processed,
            advanced = run.advanced,
            completed = run.completed,
            errors = run.errors,
            skipped = run.skipped,
            duration_ms,
            "Scheduler tick complete"
        );
        run
    }
}
