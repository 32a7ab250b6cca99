//! # Core Type Definitions
//!
//! This module contains the Kernel data model and the error taxonomy:
//! - Lifecycle stage (`Maturity`)
//! - NRVV chain items (`Need`, `Requirement`, `VerificationItem`, `ValidationItem`)
//! - Supporting records (`Evidence`, `EvidenceReview`, `ExceptionRecord`,
//!   `DecisionRecord`, `HistoryEntry`)
//! - The governed unit itself (`Kernel`)
//! - Error types (`KernelError`, `ErrorKind`)
//!
//! ## Determinism Guarantees
//!
//! Every timestamp stored on a Kernel comes from the operation that produced
//! it, never from the wall clock at fold time. Two folds over the same
//! operations therefore produce equal values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// MATURITY
// =============================================================================

/// Lifecycle stage of a Kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Maturity {
    Draft,
    UnderReview,
    Agreed,
    Frozen,
    Deprecated,
}

impl Maturity {
    /// All stages in lifecycle order.
    pub const ALL: [Maturity; 5] = [
        Maturity::Draft,
        Maturity::UnderReview,
        Maturity::Agreed,
        Maturity::Frozen,
        Maturity::Deprecated,
    ];

    /// Wire name of the stage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Maturity::Draft => "draft",
            Maturity::UnderReview => "under_review",
            Maturity::Agreed => "agreed",
            Maturity::Frozen => "frozen",
            Maturity::Deprecated => "deprecated",
        }
    }

    /// Position on the progression ladder. `Deprecated` is off the ladder.
    #[must_use]
    pub fn rank(&self) -> Option<u8> {
        match self {
            Maturity::Draft => Some(0),
            Maturity::UnderReview => Some(1),
            Maturity::Agreed => Some(2),
            Maturity::Frozen => Some(3),
            Maturity::Deprecated => None,
        }
    }

    /// Whether moving from `self` to `to` is forward progress.
    #[must_use]
    pub fn is_forward_to(&self, to: Maturity) -> bool {
        match (self.rank(), to.rank()) {
            (Some(from), Some(to)) => to > from,
            _ => false,
        }
    }

    /// Agreed and frozen kernels count towards convergence.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(self, Maturity::Agreed | Maturity::Frozen)
    }
}

impl fmt::Display for Maturity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Maturity {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Maturity::ALL
            .into_iter()
            .find(|m| m.as_str() == s.trim())
            .ok_or_else(|| KernelError::Validation(format!("unknown maturity '{}'", s)))
    }
}

// =============================================================================
// NRVV CHAIN
// =============================================================================

/// A stakeholder need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Need {
    pub id: String,
    pub statement: String,
}

/// A requirement derived from one or more needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub id: String,
    pub statement: String,
    #[serde(default)]
    pub need_refs: Vec<String>,
}

/// Outcome of a verification or validation activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    #[default]
    Planned,
    Passed,
    Failed,
}

/// Verification that a requirement is met ("built it right").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationItem {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub requirement_refs: Vec<String>,
    #[serde(default)]
    pub status: TraceStatus,
}

/// Validation that a need is satisfied ("built the right thing").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationItem {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub need_refs: Vec<String>,
    #[serde(default)]
    pub status: TraceStatus,
}

// =============================================================================
// EVIDENCE
// =============================================================================

/// Review state of an evidence item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    #[default]
    Unverified,
    Verified,
    Rejected,
}

impl VerificationStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Unverified => "unverified",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for VerificationStatus {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            VerificationStatus::Unverified,
            VerificationStatus::Verified,
            VerificationStatus::Rejected,
        ]
        .into_iter()
        .find(|v| v.as_str() == s.trim())
        .ok_or_else(|| KernelError::Validation(format!("unknown verification status '{}'", s)))
    }
}

/// A piece of supporting evidence linked to a Kernel.
///
/// `source_origin` records where the evidence came from (for example
/// `human` or `ai_generated`). An absent origin is treated as unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub id: String,
    pub kind: String,
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_origin: Option<String>,
    #[serde(default)]
    pub verification_status: VerificationStatus,
}

/// A reviewer's verdict on one evidence item.
///
/// Kept in the governance store, not on the Kernel: a review changes the
/// evidence's effective status without a ledger entry. The Registry carries
/// the latest verdicts as an overlay on top of the recorded status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceReview {
    pub kernel_id: String,
    pub evidence_id: String,
    pub reviewer: String,
    pub reviewer_role: Option<String>,
    pub issue: String,
    pub status: VerificationStatus,
    pub reviewed_at: DateTime<Utc>,
    pub note: Option<String>,
}

impl EvidenceReview {
    /// Store key: `kernel_id/evidence_id`.
    #[must_use]
    pub fn key(&self) -> String {
        review_key(&self.kernel_id, &self.evidence_id)
    }
}

#[must_use]
pub fn review_key(kernel_id: &str, evidence_id: &str) -> String {
    format!("{}/{}", kernel_id, evidence_id)
}

// =============================================================================
// EXCEPTIONS & DECISIONS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Advisory,
    Blocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionStatus {
    Open,
    Closed,
}

/// A governance exception raised against a Kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    pub id: String,
    pub reason: String,
    pub severity: Severity,
    pub status: ExceptionStatus,
    pub raised_by: String,
    pub raised_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

impl ExceptionRecord {
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == ExceptionStatus::Open
    }
}

/// The recorded decision behind a Kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub summary: String,
    pub rationale: String,
    #[serde(default)]
    pub alternatives: Vec<String>,
    pub decided_by: String,
    pub decided_at: DateTime<Utc>,
}

/// One line of a Kernel's append-only history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub op_id: String,
    pub kind: String,
    pub actor: String,
    pub at: DateTime<Utc>,
    pub summary: String,
}

// =============================================================================
// KERNEL
// =============================================================================

/// A governed knowledge unit with NRVV traceability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kernel {
    pub id: String,
    pub statement: String,
    pub category: String,
    pub owner: String,
    pub maturity: Maturity,
    #[serde(default)]
    pub needs: Vec<Need>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    #[serde(default)]
    pub verification: Vec<VerificationItem>,
    #[serde(default)]
    pub validation: Vec<ValidationItem>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub exceptions: Vec<ExceptionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<DecisionRecord>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frozen_at: Option<DateTime<Utc>>,
}

impl Kernel {
    /// Look up an evidence item by id.
    #[must_use]
    pub fn evidence_item(&self, evidence_id: &str) -> Option<&Evidence> {
        self.evidence.iter().find(|e| e.id == evidence_id)
    }

    /// Look up an exception by id.
    #[must_use]
    pub fn exception(&self, exception_id: &str) -> Option<&ExceptionRecord> {
        self.exceptions.iter().find(|e| e.id == exception_id)
    }

    /// Number of exceptions still open.
    #[must_use]
    pub fn open_exception_count(&self) -> usize {
        self.exceptions.iter().filter(|e| e.is_open()).count()
    }

    /// Whether any open exception has blocking severity.
    #[must_use]
    pub fn has_blocking_exception(&self) -> bool {
        self.exceptions
            .iter()
            .any(|e| e.is_open() && e.severity == Severity::Blocking)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Classification of a failure as surfaced in an `OperationResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    GateRejection,
    NotFoundError,
    IllegalTransitionError,
    PersistenceError,
    ConfigError,
}

/// Errors that can occur in the governance engine.
///
/// Inside the Runtime every variant is converted to a failed
/// `OperationResult`; nothing is thrown across the `apply()` boundary.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The operation or its payload is malformed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A named gate check failed.
    #[error("Gate '{check_id}' rejected the operation: {message}")]
    GateRejection { check_id: String, message: String },

    /// Unknown kernel, request, reevaluation or exception id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The maturity edge is not allowed, or must go through the
    /// two-phase coordinator.
    #[error("Illegal transition [{code}]: {message}")]
    IllegalTransition { code: String, message: String },

    /// Underlying I/O or encoding failure.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl KernelError {
    pub fn gate(check_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::GateRejection {
            check_id: check_id.into(),
            message: message.into(),
        }
    }

    pub fn illegal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IllegalTransition {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Taxonomy bucket of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            KernelError::Validation(_) => ErrorKind::ValidationError,
            KernelError::GateRejection { .. } => ErrorKind::GateRejection,
            KernelError::NotFound(_) => ErrorKind::NotFoundError,
            KernelError::IllegalTransition { .. } => ErrorKind::IllegalTransitionError,
            KernelError::Persistence(_) => ErrorKind::PersistenceError,
            KernelError::Config(_) => ErrorKind::ConfigError,
        }
    }

    /// Machine-readable code: the gate check id or the transition code.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            KernelError::GateRejection { check_id, .. } => Some(check_id),
            KernelError::IllegalTransition { code, .. } => Some(code),
            _ => None,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maturity_roundtrips_through_str() {
        for m in Maturity::ALL {
            assert_eq!(m.as_str().parse::<Maturity>().expect("parse"), m);
        }
        assert!("final".parse::<Maturity>().is_err());
    }

    #[test]
    fn verification_status_parses_wire_names() {
        assert_eq!(
            "verified".parse::<VerificationStatus>().expect("parse"),
            VerificationStatus::Verified
        );
        assert!("approved".parse::<VerificationStatus>().is_err());
    }

    #[test]
    fn forward_progress_ignores_deprecated() {
        assert!(Maturity::Draft.is_forward_to(Maturity::UnderReview));
        assert!(Maturity::Agreed.is_forward_to(Maturity::Frozen));
        assert!(!Maturity::UnderReview.is_forward_to(Maturity::Draft));
        assert!(!Maturity::Draft.is_forward_to(Maturity::Deprecated));
    }

    #[test]
    fn maturity_serializes_snake_case() {
        let json = serde_json::to_string(&Maturity::UnderReview).expect("serialize");
        assert_eq!(json, "\"under_review\"");
    }

    #[test]
    fn error_codes_name_the_check() {
        let err = KernelError::gate("evidence_governance", "E1 unverified");
        assert_eq!(err.kind(), ErrorKind::GateRejection);
        assert_eq!(err.code(), Some("evidence_governance"));

        let err = KernelError::NotFound("kernel K9".to_string());
        assert_eq!(err.code(), None);
    }
}
