//! # Operation Model
//!
//! The closed set of mutation intents. Each kind carries exactly one
//! strongly-typed payload; dispatch elsewhere in the crate matches on
//! [`OperationPayload`] exhaustively, so adding a kind is a compile error
//! until every stage handles it.
//!
//! Wire shape (JSON):
//!
//! ```json
//! {
//!   "op_id": "op-1", "actor": "alice", "actor_role": "owner",
//!   "issue": "GOV-12", "timestamp": "2026-01-01T00:00:00Z",
//!   "kind": "set_state",
//!   "payload": { "kernel_id": "K1", "to": "under_review" }
//! }
//! ```

use crate::gate::GateCheckOutcome;
use crate::primitives::{MAX_ID_LENGTH, MAX_TEXT_LENGTH};
use crate::transition::TransitionStatus;
use crate::{ErrorKind, Evidence, KernelError, Maturity, Need, Requirement, Severity};
use crate::{ValidationItem, VerificationItem};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// OPERATION KIND
// =============================================================================

/// Discriminant of an operation, used for filtering and history lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    RecordDecision,
    LinkEvidence,
    RecordVerification,
    RecordValidation,
    SetState,
    RaiseException,
    CloseException,
    RequestMaturityTransition,
    ApproveMaturityTransition,
    RejectMaturityTransition,
    CommitMaturityTransition,
    StartReevaluation,
    CompleteReevaluation,
}

impl OperationKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::RecordDecision => "record_decision",
            OperationKind::LinkEvidence => "link_evidence",
            OperationKind::RecordVerification => "record_verification",
            OperationKind::RecordValidation => "record_validation",
            OperationKind::SetState => "set_state",
            OperationKind::RaiseException => "raise_exception",
            OperationKind::CloseException => "close_exception",
            OperationKind::RequestMaturityTransition => "request_maturity_transition",
            OperationKind::ApproveMaturityTransition => "approve_maturity_transition",
            OperationKind::RejectMaturityTransition => "reject_maturity_transition",
            OperationKind::CommitMaturityTransition => "commit_maturity_transition",
            OperationKind::StartReevaluation => "start_reevaluation",
            OperationKind::CompleteReevaluation => "complete_reevaluation",
        }
    }

    /// Kinds that can change a Kernel's maturity.
    #[must_use]
    pub fn is_maturity_affecting(&self) -> bool {
        matches!(
            self,
            OperationKind::SetState | OperationKind::CommitMaturityTransition
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// PAYLOADS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateKernel {
    pub kernel_id: String,
    pub statement: String,
    pub category: String,
    pub owner: String,
    #[serde(default)]
    pub needs: Vec<Need>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordDecision {
    pub kernel_id: String,
    pub summary: String,
    pub rationale: String,
    #[serde(default)]
    pub alternatives: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkEvidence {
    pub kernel_id: String,
    pub evidence: Evidence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordVerification {
    pub kernel_id: String,
    pub item: VerificationItem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordValidation {
    pub kernel_id: String,
    pub item: ValidationItem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetState {
    pub kernel_id: String,
    pub to: Maturity,
    /// Optimistic check: fail if the kernel is no longer at this stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_from: Option<Maturity>,
    /// Caller-evaluated checks such as `nrvv_complete`; all must be true.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gate_checks: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RaiseException {
    pub kernel_id: String,
    pub reason: String,
    #[serde(default)]
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloseException {
    pub kernel_id: String,
    pub exception_id: String,
    pub resolution: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestTransition {
    pub kernel_id: String,
    pub from: Maturity,
    pub to: Maturity,
    pub required_approver_roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApproveTransition {
    pub kernel_id: String,
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RejectTransition {
    pub kernel_id: String,
    pub request_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommitTransition {
    pub kernel_id: String,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gate_checks: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartReevaluation {
    pub kernel_id: String,
    pub trigger_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompleteReevaluation {
    pub kernel_id: String,
    pub reevaluation_id: String,
    pub outcome: String,
}

/// Per-kind payload. The `kind` tag selects the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum OperationPayload {
    Create(CreateKernel),
    RecordDecision(RecordDecision),
    LinkEvidence(LinkEvidence),
    RecordVerification(RecordVerification),
    RecordValidation(RecordValidation),
    SetState(SetState),
    RaiseException(RaiseException),
    CloseException(CloseException),
    RequestMaturityTransition(RequestTransition),
    ApproveMaturityTransition(ApproveTransition),
    RejectMaturityTransition(RejectTransition),
    CommitMaturityTransition(CommitTransition),
    StartReevaluation(StartReevaluation),
    CompleteReevaluation(CompleteReevaluation),
}

impl OperationPayload {
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationPayload::Create(_) => OperationKind::Create,
            OperationPayload::RecordDecision(_) => OperationKind::RecordDecision,
            OperationPayload::LinkEvidence(_) => OperationKind::LinkEvidence,
            OperationPayload::RecordVerification(_) => OperationKind::RecordVerification,
            OperationPayload::RecordValidation(_) => OperationKind::RecordValidation,
            OperationPayload::SetState(_) => OperationKind::SetState,
            OperationPayload::RaiseException(_) => OperationKind::RaiseException,
            OperationPayload::CloseException(_) => OperationKind::CloseException,
            OperationPayload::RequestMaturityTransition(_) => {
                OperationKind::RequestMaturityTransition
            }
            OperationPayload::ApproveMaturityTransition(_) => {
                OperationKind::ApproveMaturityTransition
            }
            OperationPayload::RejectMaturityTransition(_) => {
                OperationKind::RejectMaturityTransition
            }
            OperationPayload::CommitMaturityTransition(_) => {
                OperationKind::CommitMaturityTransition
            }
            OperationPayload::StartReevaluation(_) => OperationKind::StartReevaluation,
            OperationPayload::CompleteReevaluation(_) => OperationKind::CompleteReevaluation,
        }
    }

    /// The Kernel this operation targets.
    #[must_use]
    pub fn kernel_id(&self) -> &str {
        match self {
            OperationPayload::Create(p) => &p.kernel_id,
            OperationPayload::RecordDecision(p) => &p.kernel_id,
            OperationPayload::LinkEvidence(p) => &p.kernel_id,
            OperationPayload::RecordVerification(p) => &p.kernel_id,
            OperationPayload::RecordValidation(p) => &p.kernel_id,
            OperationPayload::SetState(p) => &p.kernel_id,
            OperationPayload::RaiseException(p) => &p.kernel_id,
            OperationPayload::CloseException(p) => &p.kernel_id,
            OperationPayload::RequestMaturityTransition(p) => &p.kernel_id,
            OperationPayload::ApproveMaturityTransition(p) => &p.kernel_id,
            OperationPayload::RejectMaturityTransition(p) => &p.kernel_id,
            OperationPayload::CommitMaturityTransition(p) => &p.kernel_id,
            OperationPayload::StartReevaluation(p) => &p.kernel_id,
            OperationPayload::CompleteReevaluation(p) => &p.kernel_id,
        }
    }

    /// Structural checks on the payload fields.
    fn validate(&self) -> Result<(), KernelError> {
        require_id("kernel_id", self.kernel_id())?;
        match self {
            OperationPayload::Create(p) => {
                require_text("statement", &p.statement)?;
                require_text("category", &p.category)?;
                require_id("owner", &p.owner)?;
                for need in &p.needs {
                    require_id("needs[].id", &need.id)?;
                    require_text("needs[].statement", &need.statement)?;
                }
                for req in &p.requirements {
                    require_id("requirements[].id", &req.id)?;
                    require_text("requirements[].statement", &req.statement)?;
                }
                unique_ids("needs", p.needs.iter().map(|n| n.id.as_str()))?;
                unique_ids("requirements", p.requirements.iter().map(|r| r.id.as_str()))?;
                for tag in &p.tags {
                    require_id("tags[]", tag)?;
                }
            }
            OperationPayload::RecordDecision(p) => {
                require_text("summary", &p.summary)?;
                require_text("rationale", &p.rationale)?;
            }
            OperationPayload::LinkEvidence(p) => {
                require_id("evidence.id", &p.evidence.id)?;
                require_text("evidence.kind", &p.evidence.kind)?;
                require_text("evidence.reference", &p.evidence.reference)?;
            }
            OperationPayload::RecordVerification(p) => {
                require_id("item.id", &p.item.id)?;
                require_text("item.method", &p.item.method)?;
            }
            OperationPayload::RecordValidation(p) => {
                require_id("item.id", &p.item.id)?;
                require_text("item.method", &p.item.method)?;
            }
            OperationPayload::SetState(p) => {
                for check in p.gate_checks.keys() {
                    require_id("gate_checks key", check)?;
                }
            }
            OperationPayload::RaiseException(p) => require_text("reason", &p.reason)?,
            OperationPayload::CloseException(p) => {
                require_id("exception_id", &p.exception_id)?;
                require_text("resolution", &p.resolution)?;
            }
            OperationPayload::RequestMaturityTransition(p) => {
                if p.required_approver_roles.is_empty() {
                    return Err(KernelError::Validation(
                        "required_approver_roles must name at least one role".to_string(),
                    ));
                }
                for role in &p.required_approver_roles {
                    require_id("required_approver_roles[]", role)?;
                }
                unique_ids(
                    "required_approver_roles",
                    p.required_approver_roles.iter().map(String::as_str),
                )?;
            }
            OperationPayload::ApproveMaturityTransition(p) => {
                require_id("request_id", &p.request_id)?;
            }
            OperationPayload::RejectMaturityTransition(p) => {
                require_id("request_id", &p.request_id)?;
                require_text("reason", &p.reason)?;
            }
            OperationPayload::CommitMaturityTransition(p) => {
                require_id("request_id", &p.request_id)?;
            }
            OperationPayload::StartReevaluation(p) => {
                require_id("trigger_type", &p.trigger_type)?;
                if let Some(entity) = &p.entity_id {
                    require_id("entity_id", entity)?;
                }
            }
            OperationPayload::CompleteReevaluation(p) => {
                require_id("reevaluation_id", &p.reevaluation_id)?;
                require_text("outcome", &p.outcome)?;
            }
        }
        Ok(())
    }

    /// One-line description for the Kernel history.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            OperationPayload::Create(p) => format!("created kernel in category '{}'", p.category),
            OperationPayload::RecordDecision(p) => format!("recorded decision: {}", p.summary),
            OperationPayload::LinkEvidence(p) => format!("linked evidence {}", p.evidence.id),
            OperationPayload::RecordVerification(p) => {
                format!("recorded verification {}", p.item.id)
            }
            OperationPayload::RecordValidation(p) => format!("recorded validation {}", p.item.id),
            OperationPayload::SetState(p) => format!("maturity set to {}", p.to),
            OperationPayload::RaiseException(p) => format!("raised exception: {}", p.reason),
            OperationPayload::CloseException(p) => format!("closed exception {}", p.exception_id),
            OperationPayload::RequestMaturityTransition(p) => {
                format!("requested transition {} -> {}", p.from, p.to)
            }
            OperationPayload::ApproveMaturityTransition(p) => {
                format!("approved transition request {}", p.request_id)
            }
            OperationPayload::RejectMaturityTransition(p) => {
                format!("rejected transition request {}", p.request_id)
            }
            OperationPayload::CommitMaturityTransition(p) => {
                format!("committed transition request {}", p.request_id)
            }
            OperationPayload::StartReevaluation(p) => {
                format!("reevaluation triggered by {}", p.trigger_type)
            }
            OperationPayload::CompleteReevaluation(p) => {
                format!("reevaluation {} completed: {}", p.reevaluation_id, p.outcome)
            }
        }
    }
}

fn require_id(field: &str, value: &str) -> Result<(), KernelError> {
    if value.trim().is_empty() {
        return Err(KernelError::Validation(format!("{} must not be empty", field)));
    }
    if value.len() > MAX_ID_LENGTH {
        return Err(KernelError::Validation(format!(
            "{} exceeds {} bytes",
            field, MAX_ID_LENGTH
        )));
    }
    Ok(())
}

fn require_text(field: &str, value: &str) -> Result<(), KernelError> {
    if value.trim().is_empty() {
        return Err(KernelError::Validation(format!("{} must not be empty", field)));
    }
    if value.len() > MAX_TEXT_LENGTH {
        return Err(KernelError::Validation(format!(
            "{} exceeds {} bytes",
            field, MAX_TEXT_LENGTH
        )));
    }
    Ok(())
}

fn unique_ids<'a>(field: &str, ids: impl Iterator<Item = &'a str>) -> Result<(), KernelError> {
    let mut seen = std::collections::BTreeSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(KernelError::Validation(format!(
                "{} contains duplicate id '{}'",
                field, id
            )));
        }
    }
    Ok(())
}

// =============================================================================
// OPERATION
// =============================================================================

/// A typed mutation intent plus its envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub op_id: String,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_role: Option<String>,
    /// Tracking-issue reference. Required unless the issue gate is off.
    #[serde(default)]
    pub issue: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: OperationPayload,
}

impl Operation {
    /// Build an operation with a fresh op id.
    pub fn new(
        actor: impl Into<String>,
        issue: impl Into<String>,
        timestamp: DateTime<Utc>,
        payload: OperationPayload,
    ) -> Self {
        Self {
            op_id: uuid::Uuid::new_v4().to_string(),
            actor: actor.into(),
            actor_role: None,
            issue: issue.into(),
            timestamp,
            payload,
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.actor_role = Some(role.into());
        self
    }

    #[must_use]
    pub fn with_op_id(mut self, op_id: impl Into<String>) -> Self {
        self.op_id = op_id.into();
        self
    }

    /// Decode an operation document. Unknown kinds and missing payload
    /// fields surface as validation errors.
    pub fn from_json(text: &str) -> Result<Self, KernelError> {
        serde_json::from_str(text)
            .map_err(|e| KernelError::Validation(format!("malformed operation: {}", e)))
    }

    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.payload.kind()
    }

    #[must_use]
    pub fn kernel_id(&self) -> &str {
        self.payload.kernel_id()
    }

    /// Structural validation of envelope and payload. Runs before any gate
    /// or I/O.
    pub fn validate(&self) -> Result<(), KernelError> {
        require_id("op_id", &self.op_id)?;
        require_id("actor", &self.actor)?;
        if let Some(role) = &self.actor_role {
            require_id("actor_role", role)?;
        }
        if self.issue.len() > MAX_ID_LENGTH {
            return Err(KernelError::Validation(format!(
                "issue exceeds {} bytes",
                MAX_ID_LENGTH
            )));
        }
        self.payload.validate()
    }
}

// =============================================================================
// RESULT
// =============================================================================

/// Structured failure carried by a failed `OperationResult`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

impl From<&KernelError> for ErrorInfo {
    fn from(err: &KernelError) -> Self {
        Self {
            kind: err.kind(),
            code: err.code().map(str::to_string),
            message: err.to_string(),
        }
    }
}

/// A maturity edge `from -> to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaturityEdge {
    pub from: Maturity,
    pub to: Maturity,
}

/// Outcome data recorded alongside an operation.
///
/// Identifiers generated while applying (exception ids, request ids,
/// reevaluation ids) are stored here and read back during replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResultDetails {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gate_checks: Vec<GateCheckOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<MaturityEdge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_status: Option<TransitionStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub approvals_received: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub already_approved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reevaluation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deduplicated: Option<bool>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
}

/// Result of `Runtime::apply` / `Runtime::dry_run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub op_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default)]
    pub details: ResultDetails,
}

impl OperationResult {
    #[must_use]
    pub fn succeeded(op_id: &str, timestamp: DateTime<Utc>, details: ResultDetails) -> Self {
        Self {
            success: true,
            op_id: op_id.to_string(),
            timestamp,
            error: None,
            details,
        }
    }

    #[must_use]
    pub fn failed(
        op_id: &str,
        timestamp: DateTime<Utc>,
        err: &KernelError,
        details: ResultDetails,
    ) -> Self {
        Self {
            success: false,
            op_id: op_id.to_string(),
            timestamp,
            error: Some(ErrorInfo::from(err)),
            details,
        }
    }

    /// Error message, if the operation failed.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }

    /// The failing gate check or transition code, if any.
    #[must_use]
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().and_then(|e| e.code.as_deref())
    }
}

// =============================================================================
// TESTS
// =============================================================================
