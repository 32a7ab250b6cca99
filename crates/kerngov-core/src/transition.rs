//! # Maturity Transitions
//!
//! The fixed transition graph and the two-phase transition request used by
//! the coordinator.
//!
//! ```text
//! draft ──► under_review ──► agreed ──► frozen
//!   ▲            │  ▲          │          │
//!   └────────────┘  └──────────┴──────────┘
//! any non-terminal stage ──► deprecated (terminal)
//! ```
//!
//! Request lifecycle: `pending → approved → committed`, or
//! `pending → rejected | expired`.

use crate::{KernelError, Maturity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// =============================================================================
// TRANSITION GRAPH
// =============================================================================

/// Stages reachable in one step from `from`.
#[must_use]
pub fn allowed_targets(from: Maturity) -> &'static [Maturity] {
    match from {
        Maturity::Draft => &[Maturity::UnderReview, Maturity::Deprecated],
        Maturity::UnderReview => &[Maturity::Draft, Maturity::Agreed, Maturity::Deprecated],
        Maturity::Agreed => &[Maturity::Frozen, Maturity::UnderReview, Maturity::Deprecated],
        Maturity::Frozen => &[Maturity::UnderReview, Maturity::Deprecated],
        Maturity::Deprecated => &[],
    }
}

#[must_use]
pub fn is_allowed(from: Maturity, to: Maturity) -> bool {
    allowed_targets(from).contains(&to)
}

/// Fail with `edge_not_allowed` unless `from -> to` is in the graph.
pub fn check_edge(from: Maturity, to: Maturity) -> Result<(), KernelError> {
    if is_allowed(from, to) {
        return Ok(());
    }
    let allowed = allowed_targets(from)
        .iter()
        .map(Maturity::as_str)
        .collect::<Vec<_>>();
    Err(KernelError::illegal(
        "edge_not_allowed",
        format!(
            "{} -> {} is not in the transition graph (allowed from {}: [{}])",
            from,
            to,
            from,
            allowed.join(", ")
        ),
    ))
}

// =============================================================================
// REQUEST
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Committed,
}

impl TransitionStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionStatus::Pending => "pending",
            TransitionStatus::Approved => "approved",
            TransitionStatus::Rejected => "rejected",
            TransitionStatus::Expired => "expired",
            TransitionStatus::Committed => "committed",
        }
    }

    /// No further approvals, rejections or commits are possible.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            TransitionStatus::Rejected | TransitionStatus::Expired | TransitionStatus::Committed
        )
    }
}

impl fmt::Display for TransitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One role's approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub role: String,
    pub actor: String,
    pub approved_at: DateTime<Utc>,
}

/// A proposed maturity change awaiting multi-role consensus.
///
/// Stored in the governance store with a binary codec, so every field is
/// always serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaturityTransitionRequest {
    pub request_id: String,
    pub kernel_id: String,
    pub from: Maturity,
    pub to: Maturity,
    pub required_approver_roles: Vec<String>,
    pub approvals_received: Vec<Approval>,
    pub status: TransitionStatus,
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_note: Option<String>,
}

impl MaturityTransitionRequest {
    #[must_use]
    pub fn new(
        request_id: String,
        kernel_id: String,
        from: Maturity,
        to: Maturity,
        required_approver_roles: Vec<String>,
        requested_by: String,
        requested_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            request_id,
            kernel_id,
            from,
            to,
            required_approver_roles,
            approvals_received: Vec::new(),
            status: TransitionStatus::Pending,
            requested_by,
            requested_at,
            expires_at,
            resolved_at: None,
            resolution_note: None,
        }
    }

    /// Roles that have approved so far.
    #[must_use]
    pub fn approved_roles(&self) -> BTreeSet<&str> {
        self.approvals_received
            .iter()
            .map(|a| a.role.as_str())
            .collect()
    }

    /// Required roles still missing an approval.
    #[must_use]
    pub fn missing_roles(&self) -> Vec<&str> {
        let approved = self.approved_roles();
        self.required_approver_roles
            .iter()
            .map(String::as_str)
            .filter(|role| !approved.contains(role))
            .collect()
    }

    #[must_use]
    pub fn is_fully_approved(&self) -> bool {
        self.missing_roles().is_empty()
    }

    #[must_use]
    pub fn requires_role(&self, role: &str) -> bool {
        self.required_approver_roles.iter().any(|r| r == role)
    }

    /// Whether the request is past its deadline and still open.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_closed() && self.expires_at.is_some_and(|deadline| now > deadline)
    }

    fn ensure_open(&self) -> Result<(), KernelError> {
        if self.status.is_closed() {
            return Err(KernelError::illegal(
                "request_closed",
                format!("request {} is already {}", self.request_id, self.status),
            ));
        }
        Ok(())
    }

    fn ensure_required_role<'a>(&self, role: Option<&'a str>) -> Result<&'a str, KernelError> {
        match role {
            Some(role) if self.requires_role(role) => Ok(role),
            Some(role) => Err(KernelError::gate(
                "approver_role",
                format!(
                    "role '{}' is not among the required roles [{}] of request {}",
                    role,
                    self.required_approver_roles.join(", "),
                    self.request_id
                ),
            )),
            None => Err(KernelError::gate(
                "approver_role",
                format!(
                    "request {} needs an actor role from [{}]",
                    self.request_id,
                    self.required_approver_roles.join(", ")
                ),
            )),
        }
    }

    /// Record an approval. Returns `false` when the role had already
    /// approved (a no-op).
    pub fn approve(
        &mut self,
        role: Option<&str>,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, KernelError> {
        self.ensure_open()?;
        let role = self.ensure_required_role(role)?;
        if self.approved_roles().contains(role) {
            return Ok(false);
        }
        self.approvals_received.push(Approval {
            role: role.to_string(),
            actor: actor.to_string(),
            approved_at: at,
        });
        if self.is_fully_approved() {
            self.status = TransitionStatus::Approved;
        }
        Ok(true)
    }

    /// Reject a request that has not been committed.
    pub fn reject(
        &mut self,
        role: Option<&str>,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<(), KernelError> {
        self.ensure_open()?;
        self.ensure_required_role(role)?;
        self.status = TransitionStatus::Rejected;
        self.resolved_at = Some(at);
        self.resolution_note = Some(reason.to_string());
        Ok(())
    }

    /// Check that `role` may commit and every required role has approved.
    pub fn ensure_committable(&self, role: Option<&str>) -> Result<(), KernelError> {
        self.ensure_open()?;
        self.ensure_required_role(role)?;
        if self.status != TransitionStatus::Approved || !self.is_fully_approved() {
            return Err(KernelError::illegal(
                "partial_approval",
                format!(
                    "request {} is not fully approved; missing roles: [{}]",
                    self.request_id,
                    self.missing_roles().join(", ")
                ),
            ));
        }
        Ok(())
    }

    pub fn mark_committed(&mut self, at: DateTime<Utc>) {
        self.status = TransitionStatus::Committed;
        self.resolved_at = Some(at);
    }

    pub fn mark_expired(&mut self, at: DateTime<Utc>) {
        self.status = TransitionStatus::Expired;
        self.resolved_at = Some(at);
    }
}

// =============================================================================
// TESTS
// =============================================================================
