//! Repositories over the relational schema

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::models::{PhaseMetric, RoleMetric, RunRecord};
use crate::{Database, Error, Result};

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    text.parse::<DateTime<Utc>>()
        .map_err(|e| Error::InvalidData(format!("bad timestamp '{text}': {e}")))
}

/// Repository for run records
pub struct RunRepository<'a> {
    db: &'a Database,
}

impl<'a> RunRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert a new run at start time
    pub fn insert(&self, run_id: &str, started_at: DateTime<Utc>) -> Result<()> {
        self.db.connection().execute(
            "INSERT OR IGNORE INTO runs (run_id, started_at) VALUES (?1, ?2)",
            params![run_id, started_at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Mark a run finished with its terminal phase
    pub fn finish(&self, run_id: &str, ended_at: DateTime<Utc>, final_phase: &str) -> Result<()> {
        self.db.connection().execute(
            "UPDATE runs SET ended_at = ?2, final_phase = ?3 WHERE run_id = ?1",
            params![run_id, ended_at.to_rfc3339(), final_phase],
        )?;
        Ok(())
    }

    /// Look up a run by id
    pub fn find(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let mut stmt = self.db.connection().prepare(
            "SELECT run_id, started_at, ended_at, final_phase FROM runs WHERE run_id = ?1",
        )?;
        let mut rows = stmt.query(params![run_id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let started: String = row.get(1)?;
        let ended: Option<String> = row.get(2)?;
        Ok(Some(RunRecord {
            run_id: row.get(0)?,
            started_at: parse_timestamp(&started)?,
            ended_at: ended.as_deref().map(parse_timestamp).transpose()?,
            final_phase: row.get(3)?,
        }))
    }

    /// Most recent runs, newest first
    pub fn recent(&self, limit: u32) -> Result<Vec<RunRecord>> {
        let mut stmt = self.db.connection().prepare(
            "SELECT run_id, started_at, ended_at, final_phase
             FROM runs ORDER BY started_at DESC LIMIT ?1",
        )?;
        let mut rows = stmt.query(params![limit])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let started: String = row.get(1)?;
            let ended: Option<String> = row.get(2)?;
            out.push(RunRecord {
                run_id: row.get(0)?,
                started_at: parse_timestamp(&started)?,
                ended_at: ended.as_deref().map(parse_timestamp).transpose()?,
                final_phase: row.get(3)?,
            });
        }
        Ok(out)
    }
}

/// Repository for per-phase metrics
pub struct PhaseMetricsRepository<'a> {
    db: &'a Database,
}

impl<'a> PhaseMetricsRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Append one phase metric row
    pub fn record(&self, metric: &PhaseMetric) -> Result<()> {
        self.db.connection().execute(
            "INSERT INTO phase_metrics
             (run_id, phase, duration_ms, retries, tokens_in, tokens_out, outcome)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                metric.run_id,
                metric.phase,
                metric.duration_ms,
                metric.retries,
                metric.tokens_in,
                metric.tokens_out,
                metric.outcome,
            ],
        )?;
        Ok(())
    }

    /// All phase metrics for a run, in insertion order
    pub fn for_run(&self, run_id: &str) -> Result<Vec<PhaseMetric>> {
        let mut stmt = self.db.connection().prepare(
            "SELECT run_id, phase, duration_ms, retries, tokens_in, tokens_out, outcome
             FROM phase_metrics WHERE run_id = ?1 ORDER BY id",
        )?;
        let mut rows = stmt.query(params![run_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(PhaseMetric {
                run_id: row.get(0)?,
                phase: row.get(1)?,
                duration_ms: row.get(2)?,
                retries: row.get(3)?,
                tokens_in: row.get(4)?,
                tokens_out: row.get(5)?,
                outcome: row.get(6)?,
            });
        }
        Ok(out)
    }
}

/// Repository for per-role/model aggregates
pub struct RoleMetricsRepository<'a> {
    db: &'a Database,
}

impl<'a> RoleMetricsRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Fold one invocation into the (role, model) aggregate
    pub fn record_invocation(
        &self,
        role: &str,
        model_id: &str,
        tokens_in: i64,
        tokens_out: i64,
        failed: bool,
    ) -> Result<()> {
        self.record_activity(role, model_id, 1, tokens_in, tokens_out, i64::from(failed))
    }

    /// Fold a batch of activity into the (role, model) aggregate
    pub fn record_activity(
        &self,
        role: &str,
        model_id: &str,
        invocations: i64,
        tokens_in: i64,
        tokens_out: i64,
        failures: i64,
    ) -> Result<()> {
        self.db.connection().execute(
            "INSERT INTO role_metrics (role, model_id, invocations, tokens_in, tokens_out, failures, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, CURRENT_TIMESTAMP)
             ON CONFLICT(role, model_id) DO UPDATE SET
                invocations = invocations + excluded.invocations,
                tokens_in = tokens_in + excluded.tokens_in,
                tokens_out = tokens_out + excluded.tokens_out,
                failures = failures + excluded.failures,
                updated_at = CURRENT_TIMESTAMP",
            params![role, model_id, invocations, tokens_in, tokens_out, failures],
        )?;
        Ok(())
    }

    /// Aggregate for one (role, model) pair
    pub fn get(&self, role: &str, model_id: &str) -> Result<Option<RoleMetric>> {
        let mut stmt = self.db.connection().prepare(
            "SELECT role, model_id, invocations, tokens_in, tokens_out, failures
             FROM role_metrics WHERE role = ?1 AND model_id = ?2",
        )?;
        let mut rows = stmt.query(params![role, model_id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        Ok(Some(RoleMetric {
            role: row.get(0)?,
            model_id: row.get(1)?,
            invocations: row.get(2)?,
            tokens_in: row.get(3)?,
            tokens_out: row.get(4)?,
            failures: row.get(5)?,
        }))
    }

    /// All aggregates
    pub fn all(&self) -> Result<Vec<RoleMetric>> {
        let mut stmt = self.db.connection().prepare(
            "SELECT role, model_id, invocations, tokens_in, tokens_out, failures
             FROM role_metrics ORDER BY role, model_id",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(RoleMetric {
                role: row.get(0)?,
                model_id: row.get(1)?,
                invocations: row.get(2)?,
                tokens_in: row.get(3)?,
                tokens_out: row.get(4)?,
                failures: row.get(5)?,
            });
        }
        Ok(out)
    }
}
