//! Error classification, recovery strategy, and the per-phase circuit
//! breaker

use std::collections::HashMap;

use crate::error::Error;
use crate::state::Phase;

/// Number of consecutive failures in one phase that forces escalation
pub const CIRCUIT_BREAKER_THRESHOLD: u32 = 3;

/// Classification that drives the recovery strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Retry with exponential backoff (LLM timeout, rate limit, brief tool
    /// unavailability)
    Transient,
    /// Re-invoke the failed work with the diagnostic appended to context
    /// (shape failures, soft guardrail failures)
    Recoverable,
    /// Stop the phase and move the run to the error phase (configuration,
    /// critical guardrail, unrecoverable tool errors)
    Fatal,
}

/// Classify an error for recovery.
///
/// Budget exhaustion and cancellation are handled before classification;
/// both fall through as fatal here.
pub fn classify(error: &Error) -> ErrorCategory {
    if error.is_transient() {
        return ErrorCategory::Transient;
    }
    if error.is_recoverable() {
        return ErrorCategory::Recoverable;
    }
    ErrorCategory::Fatal
}

/// Per-phase consecutive-failure counter.
///
/// Three consecutive failures in the same phase force escalation to a human
/// (or the error phase) regardless of remaining retry budget.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    counts: HashMap<Phase, u32>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CIRCUIT_BREAKER_THRESHOLD)
    }
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            counts: HashMap::new(),
        }
    }

    /// Record one failure; returns the new consecutive count
    pub fn record_failure(&mut self, phase: Phase) -> u32 {
        let count = self.counts.entry(phase).or_insert(0);
        *count += 1;
        tracing::warn!(phase = %phase, consecutive = *count, "phase failure recorded");
        *count
    }

    /// Reset the counter on phase success
    pub fn reset(&mut self, phase: Phase) {
        self.counts.insert(phase, 0);
    }

    pub fn consecutive_failures(&self, phase: Phase) -> u32 {
        self.counts.get(&phase).copied().unwrap_or(0)
    }

    /// Whether the breaker has tripped for this phase
    pub fn should_escalate(&self, phase: Phase) -> bool {
        self.consecutive_failures(phase) >= self.threshold
    }
}
