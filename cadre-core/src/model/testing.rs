//! Test execution results and the testing→development feedback payload

use serde::{Deserialize, Serialize};

/// Per-file coverage breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileCoverage {
    pub path: String,
    /// Line coverage ratio in `0.0..=1.0`
    pub line_coverage: f64,
}

/// Result of executing the generated test suite
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestRun {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub errored: u32,
    pub skipped: u32,
    /// Overall line coverage ratio in `0.0..=1.0`
    pub coverage: f64,
    #[serde(default)]
    pub per_file: Vec<FileCoverage>,
    /// Names of failing test cases
    #[serde(default)]
    pub failing: Vec<String>,
    /// Failure traces, parallel to `failing` where available
    #[serde(default)]
    pub traces: Vec<String>,
    #[serde(default)]
    pub raw_output: String,
}

impl TestRun {
    /// All tests passed and at least one ran
    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.errored == 0 && self.total > 0
    }

    /// Coverage meets the threshold; exactly at the threshold passes
    pub fn meets_coverage(&self, threshold: f64) -> bool {
        self.coverage >= threshold
    }

    pub fn summary(&self) -> String {
        format!(
            "{}/{} passed, {} failed, {} errored, {} skipped, coverage {:.0}%",
            self.passed,
            self.total,
            self.failed,
            self.errored,
            self.skipped,
            self.coverage * 100.0
        )
    }
}

/// Structured feedback routed from testing back to development
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestFeedback {
    pub failing_tests: Vec<String>,
    pub traces: Vec<String>,
    pub suggested_fixes: Vec<String>,
}

impl TestFeedback {
    /// Build feedback from a failed run plus reviewer suggestions
    pub fn from_run(run: &TestRun, suggested_fixes: Vec<String>) -> Self {
        Self {
            failing_tests: run.failing.clone(),
            traces: run.traces.clone(),
            suggested_fixes,
        }
    }

    /// Render as plain text for inclusion in the next attempt's context
    pub fn render(&self) -> String {
        let mut out = String::from("Previous test run failed.\n");
        if !self.failing_tests.is_empty() {
            out.push_str("Failing tests:\n");
            for name in &self.failing_tests {
                out.push_str(&format!("  - {name}\n"));
            }
        }
        if !self.traces.is_empty() {
            out.push_str("Traces:\n");
            for trace in &self.traces {
                out.push_str(&format!("{trace}\n"));
            }
        }
        if !self.suggested_fixes.is_empty() {
            out.push_str("Suggested fixes:\n");
            for fix in &self.suggested_fixes {
                out.push_str(&format!("  - {fix}\n"));
            }
        }
        out
    }
}
