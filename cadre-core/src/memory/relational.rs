//! Cross-session relational metrics
//!
//! Observability only: the sink is written by the flow thread and never read
//! on the control path. Storage failures are logged and swallowed so metrics
//! can never fail a run.

use chrono::{DateTime, Utc};
use std::sync::Mutex;
use uuid::Uuid;

use cadre_db::repos::{PhaseMetricsRepository, RoleMetricsRepository, RunRepository};
use cadre_db::Database;

use crate::llm::TokenUsage;

/// Destination for run, phase, and role metrics
pub trait MetricsSink: Send + Sync {
    fn run_started(&self, run_id: &Uuid, started_at: DateTime<Utc>);
    fn run_finished(&self, run_id: &Uuid, ended_at: DateTime<Utc>, final_phase: &str);
    fn phase_completed(
        &self,
        run_id: &Uuid,
        phase: &str,
        duration_ms: i64,
        retries: u32,
        usage: TokenUsage,
        outcome: &str,
    );
    /// Fold a phase's worth of activity for one (role, model) pair into the
    /// cross-session aggregate
    fn role_activity(
        &self,
        role: &str,
        model_id: &str,
        invocations: u32,
        usage: TokenUsage,
        failures: u32,
    );
}

/// Sink that drops everything; used when metrics are disabled
#[derive(Debug, Clone, Default)]
pub struct NullMetrics;

impl MetricsSink for NullMetrics {
    fn run_started(&self, _run_id: &Uuid, _started_at: DateTime<Utc>) {}
    fn run_finished(&self, _run_id: &Uuid, _ended_at: DateTime<Utc>, _final_phase: &str) {}
    fn phase_completed(
        &self,
        _run_id: &Uuid,
        _phase: &str,
        _duration_ms: i64,
        _retries: u32,
        _usage: TokenUsage,
        _outcome: &str,
    ) {
    }
    fn role_activity(
        &self,
        _role: &str,
        _model_id: &str,
        _invocations: u32,
        _usage: TokenUsage,
        _failures: u32,
    ) {
    }
}

/// SQLite-backed sink over the cross-session store
pub struct RelationalMetrics {
    db: Mutex<Database>,
}

impl RelationalMetrics {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }
}

impl MetricsSink for RelationalMetrics {
    fn run_started(&self, run_id: &Uuid, started_at: DateTime<Utc>) {
        let db = self.db.lock().expect("metrics db poisoned");
        if let Err(error) = RunRepository::new(&db).insert(&run_id.to_string(), started_at) {
            tracing::warn!(%error, "failed to record run start");
        }
    }

    fn run_finished(&self, run_id: &Uuid, ended_at: DateTime<Utc>, final_phase: &str) {
        let db = self.db.lock().expect("metrics db poisoned");
        if let Err(error) =
            RunRepository::new(&db).finish(&run_id.to_string(), ended_at, final_phase)
        {
            tracing::warn!(%error, "failed to record run finish");
        }
    }

    fn phase_completed(
        &self,
        run_id: &Uuid,
        phase: &str,
        duration_ms: i64,
        retries: u32,
        usage: TokenUsage,
        outcome: &str,
    ) {
        let db = self.db.lock().expect("metrics db poisoned");
        let metric = cadre_db::models::PhaseMetric {
            run_id: run_id.to_string(),
            phase: phase.to_string(),
            duration_ms,
            retries: i64::from(retries),
            tokens_in: usage.input as i64,
            tokens_out: usage.output as i64,
            outcome: outcome.to_string(),
        };
        if let Err(error) = PhaseMetricsRepository::new(&db).record(&metric) {
            tracing::warn!(%error, "failed to record phase metric");
        }
    }

    fn role_activity(
        &self,
        role: &str,
        model_id: &str,
        invocations: u32,
        usage: TokenUsage,
        failures: u32,
    ) {
        let db = self.db.lock().expect("metrics db poisoned");
        if let Err(error) = RoleMetricsRepository::new(&db).record_activity(
            role,
            model_id,
            i64::from(invocations),
            usage.input as i64,
            usage.output as i64,
            i64::from(failures),
        ) {
            tracing::warn!(%error, "failed to record role metric");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sink_accepts_everything() {
        let sink = NullMetrics;
        let id = Uuid::new_v4();
        sink.run_started(&id, Utc::now());
        sink.phase_completed(&id, "planning", 12, 0, TokenUsage::new(10, 20), "success");
        sink.role_activity("architect", "large", 1, TokenUsage::new(5, 5), 0);
        sink.run_finished(&id, Utc::now(), "complete");
    }

    #[test]
    fn test_relational_sink_records_lifecycle() {
        let sink = RelationalMetrics::new(Database::in_memory().unwrap());
        let id = Uuid::new_v4();
        sink.run_started(&id, Utc::now());
        sink.phase_completed(&id, "planning", 120, 1, TokenUsage::new(100, 50), "success");
        sink.phase_completed(&id, "testing", 90, 2, TokenUsage::new(80, 40), "retry");
        sink.role_activity("architect", "large", 1, TokenUsage::new(60, 30), 0);
        sink.role_activity("architect", "large", 1, TokenUsage::new(40, 20), 1);
        sink.run_finished(&id, Utc::now(), "complete");

        let db = sink.db.lock().unwrap();
        let run = RunRepository::new(&db)
            .find(&id.to_string())
            .unwrap()
            .expect("run recorded");
        assert_eq!(run.final_phase.as_deref(), Some("complete"));
        assert!(run.ended_at.is_some());

        let phases = PhaseMetricsRepository::new(&db)
            .for_run(&id.to_string())
            .unwrap();
        assert_eq!(phases.len(), 2);

        let role = RoleMetricsRepository::new(&db)
            .get("architect", "large")
            .unwrap()
            .expect("role metric recorded");
        assert_eq!(role.invocations, 2);
        assert_eq!(role.failures, 1);
        assert_eq!(role.tokens_in, 100);
    }
}
