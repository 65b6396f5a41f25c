//! Store models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One orchestrator run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub final_phase: Option<String>,
}

impl RunRecord {
    /// Whether the run has finished
    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }
}

/// Metrics for one phase execution within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseMetric {
    pub run_id: String,
    pub phase: String,
    pub duration_ms: i64,
    pub retries: i64,
    pub tokens_in: i64,
    pub tokens_out: i64,
    /// e.g. success, retry, escalated, error
    pub outcome: String,
}

/// Aggregate metrics for a (role, model) pair across runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleMetric {
    pub role: String,
    pub model_id: String,
    pub invocations: i64,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub failures: i64,
}

impl RoleMetric {
    /// Failure ratio over all invocations
    pub fn failure_rate(&self) -> f64 {
        if self.invocations == 0 {
            0.0
        } else {
            self.failures as f64 / self.invocations as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_record_finished() {
        let mut run = RunRecord {
            run_id: "r1".into(),
            started_at: Utc::now(),
            ended_at: None,
            final_phase: None,
        };
        assert!(!run.is_finished());
        run.ended_at = Some(Utc::now());
        assert!(run.is_finished());
    }

    #[test]
    fn test_failure_rate() {
        let metric = RoleMetric {
            role: "architect".into(),
            model_id: "large".into(),
            invocations: 4,
            tokens_in: 100,
            tokens_out: 50,
            failures: 1,
        };
        assert!((metric.failure_rate() - 0.25).abs() < 1e-9);

        let empty = RoleMetric {
            invocations: 0,
            failures: 0,
            ..metric
        };
        assert_eq!(empty.failure_rate(), 0.0);
    }
}
