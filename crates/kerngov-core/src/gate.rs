//! # Gate Engine
//!
//! Independently togglable pre-mutation checks. Gates run strictly before
//! any Registry mutation and before the Ledger append; the first failing
//! check short-circuits the operation.
//!
//! | Check id               | Applies to                 | Toggle                       |
//! |------------------------|----------------------------|------------------------------|
//! | `issue_required`       | every operation            | `gates.issue_required`       |
//! | `bootstrap_protection` | maturity-affecting ops     | `gates.bootstrap_protection` |
//! | `authority`            | maturity-affecting ops     | skipped in solo mode         |
//! | `caller_checks`        | maturity transitions       | `gates.caller_checks`        |
//! | `evidence_governance`  | forward transitions        | `gates.evidence_governance`  |

use crate::config::{GateToggles, RuntimeSettings};
use crate::{Kernel, KernelError, Maturity, Operation, VerificationStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const ISSUE_REQUIRED: &str = "issue_required";
pub const BOOTSTRAP_PROTECTION: &str = "bootstrap_protection";
pub const AUTHORITY: &str = "authority";
pub const CALLER_CHECKS: &str = "caller_checks";
pub const EVIDENCE_GOVERNANCE: &str = "evidence_governance";

// =============================================================================
// OUTCOMES
// =============================================================================

/// Outcome of one evaluated check, recorded under `details.gate_checks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateCheckOutcome {
    pub check_id: String,
    pub passed: bool,
    pub message: String,
}

/// Accumulates check outcomes in evaluation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateReport {
    checks: Vec<GateCheckOutcome>,
}

impl GateReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a check. A failing check is turned into the rejection error.
    fn record(&mut self, check_id: &str, result: Result<String, String>) -> Result<(), KernelError> {
        match result {
            Ok(message) => {
                self.checks.push(GateCheckOutcome {
                    check_id: check_id.to_string(),
                    passed: true,
                    message,
                });
                Ok(())
            }
            Err(message) => {
                tracing::debug!(check = check_id, %message, "gate check failed");
                self.checks.push(GateCheckOutcome {
                    check_id: check_id.to_string(),
                    passed: false,
                    message: message.clone(),
                });
                Err(KernelError::gate(check_id, message))
            }
        }
    }

    #[must_use]
    pub fn checks(&self) -> &[GateCheckOutcome] {
        &self.checks
    }

    #[must_use]
    pub fn into_checks(self) -> Vec<GateCheckOutcome> {
        self.checks
    }

    /// The failing check, if evaluation stopped on one.
    #[must_use]
    pub fn first_failure(&self) -> Option<&GateCheckOutcome> {
        self.checks.iter().find(|c| !c.passed)
    }
}

// =============================================================================
// TRANSITION CONTEXT
// =============================================================================

/// Everything the transition checks look at.
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext<'a> {
    pub kernel: &'a Kernel,
    pub from: Maturity,
    pub to: Maturity,
    pub caller_checks: &'a BTreeMap<String, bool>,
    /// Review verdicts recorded outside the kernel, keyed by evidence id.
    pub reviews: &'a BTreeMap<String, VerificationStatus>,
}

impl<'a> TransitionContext<'a> {
    /// Context for moving `kernel` from its current stage to `to`.
    #[must_use]
    pub fn for_kernel(
        kernel: &'a Kernel,
        to: Maturity,
        caller_checks: &'a BTreeMap<String, bool>,
        reviews: &'a BTreeMap<String, VerificationStatus>,
    ) -> Self {
        Self {
            kernel,
            from: kernel.maturity,
            to,
            caller_checks,
            reviews,
        }
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// The Gate Engine. Built once from `RuntimeSettings`.
#[derive(Debug, Clone)]
pub struct GateEngine {
    toggles: GateToggles,
    bootstrap_kernel_id: String,
    solo_mode: bool,
    maturity_roles: BTreeSet<String>,
    allowlisted_origins: BTreeSet<String>,
}

impl GateEngine {
    #[must_use]
    pub fn new(settings: &RuntimeSettings) -> Self {
        Self {
            toggles: settings.gates,
            bootstrap_kernel_id: settings.bootstrap_kernel_id.clone(),
            solo_mode: settings.solo_mode,
            maturity_roles: settings.maturity_roles.clone(),
            allowlisted_origins: settings.allowlisted_origins.clone(),
        }
    }

    #[must_use]
    pub fn toggles(&self) -> GateToggles {
        self.toggles
    }

    #[must_use]
    pub fn is_bootstrap(&self, kernel_id: &str) -> bool {
        kernel_id == self.bootstrap_kernel_id
    }

    /// Envelope-level checks: issue reference, bootstrap protection and
    /// actor authority.
    pub fn preflight(&self, op: &Operation, report: &mut GateReport) -> Result<(), KernelError> {
        let subject = format!("operation {} ({})", op.op_id, op.kind());
        self.check_issue(&subject, &op.issue, report)?;

        if !op.kind().is_maturity_affecting() {
            return Ok(());
        }

        if self.toggles.bootstrap_protection {
            let outcome = if self.is_bootstrap(op.kernel_id()) {
                Err(format!(
                    "kernel {} is the protected bootstrap kernel; its maturity cannot change",
                    op.kernel_id()
                ))
            } else {
                Ok("not the bootstrap kernel".to_string())
            };
            report.record(BOOTSTRAP_PROTECTION, outcome)?;
        }

        self.check_authority(&op.actor, op.actor_role.as_deref(), "change maturity", report)
    }

    /// Checks for an evidence review verdict. A verdict can unblock a
    /// forward transition, so it needs the same issue reference and
    /// authority as a maturity change.
    pub fn review_preflight(
        &self,
        reviewer: &str,
        role: Option<&str>,
        issue: &str,
        report: &mut GateReport,
    ) -> Result<(), KernelError> {
        let subject = format!("evidence review by {}", reviewer);
        self.check_issue(&subject, issue, report)?;
        self.check_authority(reviewer, role, "review evidence", report)
    }

    fn check_issue(&self, subject: &str, issue: &str, report: &mut GateReport) -> Result<(), KernelError> {
        if !self.toggles.issue_required {
            return Ok(());
        }
        let outcome = if issue.trim().is_empty() {
            Err(format!("{} carries no issue reference", subject))
        } else {
            Ok(format!("issue {}", issue))
        };
        report.record(ISSUE_REQUIRED, outcome)
    }

    /// Skipped entirely in solo mode.
    fn check_authority(
        &self,
        actor: &str,
        role: Option<&str>,
        action: &str,
        report: &mut GateReport,
    ) -> Result<(), KernelError> {
        if self.solo_mode {
            return Ok(());
        }
        let outcome = match role {
            Some(role) if self.maturity_roles.contains(role) => {
                Ok(format!("role '{}' may {}", role, action))
            }
            Some(role) => Err(format!(
                "role '{}' may not {} (allowed: {})",
                role,
                action,
                join(&self.maturity_roles)
            )),
            None => Err(format!(
                "actor {} has no role; to {} requires one of: {}",
                actor,
                action,
                join(&self.maturity_roles)
            )),
        };
        report.record(AUTHORITY, outcome)
    }

    /// Transition-level checks: caller-supplied checks and evidence
    /// governance.
    pub fn evaluate_transition(
        &self,
        ctx: &TransitionContext<'_>,
        report: &mut GateReport,
    ) -> Result<(), KernelError> {
        if self.toggles.caller_checks && !ctx.caller_checks.is_empty() {
            let failing: Vec<&str> = ctx
                .caller_checks
                .iter()
                .filter(|(_, ok)| !**ok)
                .map(|(name, _)| name.as_str())
                .collect();
            let outcome = if failing.is_empty() {
                Ok(format!("{} caller check(s) passed", ctx.caller_checks.len()))
            } else {
                Err(format!("caller checks failed: {}", failing.join(", ")))
            };
            report.record(CALLER_CHECKS, outcome)?;
        }

        if self.toggles.evidence_governance && ctx.from.is_forward_to(ctx.to) {
            let blocking = self.unverified_evidence(ctx);
            let outcome = if blocking.is_empty() {
                Ok(format!(
                    "{} evidence item(s) acceptable",
                    ctx.kernel.evidence.len()
                ))
            } else {
                Err(format!(
                    "unverified evidence blocks {} -> {}: {}",
                    ctx.from,
                    ctx.to,
                    blocking.join(", ")
                ))
            };
            report.record(EVIDENCE_GOVERNANCE, outcome)?;
        }

        Ok(())
    }

    /// Evidence ids (with origin) that would block forward progress.
    ///
    /// Origins on the allow-list pass regardless of status. Absent or
    /// unknown origins require verification.
    #[must_use]
    pub fn unverified_evidence(&self, ctx: &TransitionContext<'_>) -> Vec<String> {
        ctx.kernel
            .evidence
            .iter()
            .filter(|e| {
                !e.source_origin
                    .as_deref()
                    .is_some_and(|origin| self.allowlisted_origins.contains(origin))
            })
            .filter(|e| {
                let status = ctx
                    .reviews
                    .get(&e.id)
                    .copied()
                    .unwrap_or(e.verification_status);
                status != VerificationStatus::Verified
            })
            .map(|e| {
                format!(
                    "{} (origin: {})",
                    e.id,
                    e.source_origin.as_deref().unwrap_or("unknown")
                )
            })
            .collect()
    }
}

fn join(set: &BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(", ")
}

// =============================================================================
// TESTS
// =============================================================================
