//! # Change Execution
//!
//! A `ChangeRecord` is an ordered batch of operations executed through
//! [`Runtime::apply`], one call per step. Execution stops at the first
//! failing step; the record stays retryable and a later run skips every
//! step that already succeeded.

use crate::operation::Operation;
use crate::runtime::Runtime;
use crate::KernelError;
use serde::{Deserialize, Serialize};

/// Outcome of one step's most recent attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub op_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub change_id: String,
    #[serde(default)]
    pub steps: Vec<Operation>,
    #[serde(default)]
    pub step_results: Vec<StepOutcome>,
    #[serde(default)]
    pub executed: bool,
}

/// Summary of one `execute` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub applied: usize,
    pub skipped: usize,
    /// Op id of the step that stopped execution.
    pub failed: Option<String>,
}

impl ChangeRecord {
    pub fn new(change_id: impl Into<String>, steps: Vec<Operation>) -> Self {
        Self {
            change_id: change_id.into(),
            steps,
            step_results: Vec::new(),
            executed: false,
        }
    }

    /// Decode a change document.
    pub fn from_json(text: &str) -> Result<Self, KernelError> {
        let record: Self = serde_json::from_str(text)
            .map_err(|e| KernelError::Validation(format!("malformed change record: {}", e)))?;
        if record.change_id.trim().is_empty() {
            return Err(KernelError::Validation("change_id must not be empty".to_string()));
        }
        Ok(record)
    }

    fn succeeded(&self, op_id: &str) -> bool {
        self.step_results
            .iter()
            .any(|r| r.op_id == op_id && r.success)
    }

    fn record(&mut self, outcome: StepOutcome) {
        match self.step_results.iter_mut().find(|r| r.op_id == outcome.op_id) {
            Some(existing) => *existing = outcome,
            None => self.step_results.push(outcome),
        }
    }

    /// Apply every outstanding step in order.
    pub fn execute(&mut self, runtime: &mut Runtime) -> ExecutionSummary {
        let span = tracing::info_span!("change", change_id = %self.change_id);
        let _enter = span.enter();

        let mut summary = ExecutionSummary::default();
        let steps = self.steps.clone();
        for step in steps {
            // A step may also have been applied outside this record.
            if self.succeeded(&step.op_id) || runtime.ledger().contains_successful_op(&step.op_id) {
                summary.skipped += 1;
                continue;
            }
            let op_id = step.op_id.clone();
            let result = runtime.apply(step);
            self.record(StepOutcome {
                op_id: op_id.clone(),
                success: result.success,
                error: result.error_message().map(str::to_string),
            });
            if !result.success {
                tracing::warn!(op_id = %op_id, "change step failed; change left retryable");
                summary.failed = Some(op_id);
                return summary;
            }
            summary.applied += 1;
        }

        self.executed = true;
        tracing::info!(applied = summary.applied, skipped = summary.skipped, "change executed");
        summary
    }
}
