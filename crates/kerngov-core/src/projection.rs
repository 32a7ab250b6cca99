//! # Projection
//!
//! The single fold from (current Kernel, successful Operation) to the next
//! Kernel. The live Runtime and Ledger replay both go through [`project`],
//! which is what makes replay reproduce the live Registry exactly.
//!
//! Nothing here reads the clock or generates ids: timestamps come from the
//! operation and generated ids come from the stored result details.

use crate::operation::{OperationPayload, ResultDetails};
use crate::{DecisionRecord, ExceptionRecord, ExceptionStatus, HistoryEntry, Kernel, KernelError};
use crate::{Maturity, Operation};
use std::collections::BTreeMap;

/// Compute the Kernel that results from applying `op` to `current`.
pub fn project(
    current: Option<&Kernel>,
    op: &Operation,
    details: &ResultDetails,
) -> Result<Kernel, KernelError> {
    let mut kernel = match (&op.payload, current) {
        (OperationPayload::Create(p), None) => Kernel {
            id: p.kernel_id.clone(),
            statement: p.statement.clone(),
            category: p.category.clone(),
            owner: p.owner.clone(),
            maturity: Maturity::Draft,
            needs: p.needs.clone(),
            requirements: p.requirements.clone(),
            verification: Vec::new(),
            validation: Vec::new(),
            evidence: Vec::new(),
            exceptions: Vec::new(),
            decision: None,
            history: Vec::new(),
            tags: p.tags.clone(),
            created_at: op.timestamp,
            updated_at: op.timestamp,
            approved_at: None,
            frozen_at: None,
        },
        (OperationPayload::Create(p), Some(_)) => {
            return Err(KernelError::Validation(format!(
                "kernel {} already exists",
                p.kernel_id
            )));
        }
        (_, None) => {
            return Err(KernelError::NotFound(format!("kernel {}", op.kernel_id())));
        }
        (_, Some(existing)) => {
            let mut kernel = existing.clone();
            mutate(&mut kernel, op, details)?;
            kernel
        }
    };

    kernel.updated_at = op.timestamp;
    kernel.history.push(HistoryEntry {
        op_id: op.op_id.clone(),
        kind: op.kind().as_str().to_string(),
        actor: op.actor.clone(),
        at: op.timestamp,
        summary: op.payload.summary(),
    });
    Ok(kernel)
}

/// Fold `op` into a kernel map.
pub fn fold(
    kernels: &mut BTreeMap<String, Kernel>,
    op: &Operation,
    details: &ResultDetails,
) -> Result<(), KernelError> {
    let next = project(kernels.get(op.kernel_id()), op, details)?;
    kernels.insert(next.id.clone(), next);
    Ok(())
}

fn mutate(kernel: &mut Kernel, op: &Operation, details: &ResultDetails) -> Result<(), KernelError> {
    match &op.payload {
        OperationPayload::Create(_) => {}
        OperationPayload::RecordDecision(p) => {
            kernel.decision = Some(DecisionRecord {
                summary: p.summary.clone(),
                rationale: p.rationale.clone(),
                alternatives: p.alternatives.clone(),
                decided_by: op.actor.clone(),
                decided_at: op.timestamp,
            });
        }
        OperationPayload::LinkEvidence(p) => {
            if kernel.evidence_item(&p.evidence.id).is_some() {
                return Err(KernelError::Validation(format!(
                    "evidence {} is already linked to kernel {}",
                    p.evidence.id, kernel.id
                )));
            }
            kernel.evidence.push(p.evidence.clone());
        }
        OperationPayload::RecordVerification(p) => {
            match kernel.verification.iter_mut().find(|v| v.id == p.item.id) {
                Some(existing) => *existing = p.item.clone(),
                None => kernel.verification.push(p.item.clone()),
            }
        }
        OperationPayload::RecordValidation(p) => {
            match kernel.validation.iter_mut().find(|v| v.id == p.item.id) {
                Some(existing) => *existing = p.item.clone(),
                None => kernel.validation.push(p.item.clone()),
            }
        }
        OperationPayload::SetState(_) | OperationPayload::CommitMaturityTransition(_) => {
            let edge = details.transition.ok_or_else(|| {
                KernelError::Validation(format!(
                    "{} result for {} carries no transition",
                    op.kind(),
                    op.op_id
                ))
            })?;
            if kernel.maturity != edge.from {
                return Err(KernelError::illegal(
                    "stale_from",
                    format!(
                        "kernel {} is {}, not {}",
                        kernel.id, kernel.maturity, edge.from
                    ),
                ));
            }
            kernel.maturity = edge.to;
            match edge.to {
                Maturity::Agreed => kernel.approved_at = Some(op.timestamp),
                Maturity::Frozen => kernel.frozen_at = Some(op.timestamp),
                _ => {}
            }
        }
        OperationPayload::RaiseException(p) => {
            let id = details.exception_id.clone().ok_or_else(|| {
                KernelError::Validation(format!(
                    "raise_exception result for {} carries no exception_id",
                    op.op_id
                ))
            })?;
            kernel.exceptions.push(ExceptionRecord {
                id,
                reason: p.reason.clone(),
                severity: p.severity,
                status: ExceptionStatus::Open,
                raised_by: op.actor.clone(),
                raised_at: op.timestamp,
                closed_at: None,
                resolution: None,
            });
        }
        OperationPayload::CloseException(p) => {
            let kernel_id = kernel.id.clone();
            let record = kernel
                .exceptions
                .iter_mut()
                .find(|e| e.id == p.exception_id)
                .ok_or_else(|| {
                    KernelError::NotFound(format!(
                        "exception {} on kernel {}",
                        p.exception_id, kernel_id
                    ))
                })?;
            if !record.is_open() {
                return Err(KernelError::Validation(format!(
                    "exception {} is already closed",
                    p.exception_id
                )));
            }
            record.status = ExceptionStatus::Closed;
            record.closed_at = Some(op.timestamp);
            record.resolution = Some(p.resolution.clone());
        }
        // Coordinator and reevaluation state lives in the governance store;
        // the kernel only records the history line.
        OperationPayload::RequestMaturityTransition(_)
        | OperationPayload::ApproveMaturityTransition(_)
        | OperationPayload::RejectMaturityTransition(_)
        | OperationPayload::StartReevaluation(_)
        | OperationPayload::CompleteReevaluation(_) => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{CreateKernel, MaturityEdge, RaiseException, SetState};
    use crate::Severity;
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 10, min, 0).single().expect("date")
    }

    fn create() -> Operation {
        Operation::new(
            "alice",
            "GOV-1",
            ts(0),
            OperationPayload::Create(CreateKernel {
                kernel_id: "K1".to_string(),
                statement: "The system shall log".to_string(),
                category: "ops".to_string(),
                owner: "alice".to_string(),
                needs: vec![],
                requirements: vec![],
                tags: vec![],
            }),
        )
        .with_op_id("op-1")
    }

    #[test]
    fn create_seeds_draft_kernel_with_history() {
        let k = project(None, &create(), &ResultDetails::default()).expect("create");
        assert_eq!(k.maturity, Maturity::Draft);
        assert_eq!(k.history.len(), 1);
        assert_eq!(k.history[0].op_id, "op-1");
        assert_eq!(k.created_at, ts(0));
    }

    #[test]
    fn create_twice_fails() {
        let k = project(None, &create(), &ResultDetails::default()).expect("create");
        let err = project(Some(&k), &create(), &ResultDetails::default()).expect_err("dup");
        assert!(matches!(err, KernelError::Validation(_)));
    }

    #[test]
    fn exception_id_comes_from_details() {
        let k = project(None, &create(), &ResultDetails::default()).expect("create");
        let op = Operation::new(
            "bob",
            "GOV-2",
            ts(5),
            OperationPayload::RaiseException(RaiseException {
                kernel_id: "K1".to_string(),
                reason: "gap".to_string(),
                severity: Severity::Blocking,
            }),
        );
        assert!(project(Some(&k), &op, &ResultDetails::default()).is_err());

        let details = ResultDetails {
            exception_id: Some("EXC-7".to_string()),
            ..ResultDetails::default()
        };
        let k = project(Some(&k), &op, &details).expect("raise");
        assert_eq!(k.exceptions[0].id, "EXC-7");
        assert!(k.has_blocking_exception());
        assert_eq!(k.updated_at, ts(5));
    }

    #[test]
    fn set_state_follows_recorded_edge() {
        let mut kernels = BTreeMap::new();
        fold(&mut kernels, &create(), &ResultDetails::default()).expect("create");
        let op = Operation::new(
            "alice",
            "GOV-3",
            ts(9),
            OperationPayload::SetState(SetState {
                kernel_id: "K1".to_string(),
                to: Maturity::UnderReview,
                expected_from: None,
                gate_checks: BTreeMap::new(),
                reason: None,
            }),
        );
        let details = ResultDetails {
            transition: Some(MaturityEdge {
                from: Maturity::Draft,
                to: Maturity::UnderReview,
            }),
            ..ResultDetails::default()
        };
        fold(&mut kernels, &op, &details).expect("set_state");
        assert_eq!(kernels["K1"].maturity, Maturity::UnderReview);

        // Same edge again no longer matches the current stage.
        let err = fold(&mut kernels, &op, &details).expect_err("stale");
        assert_eq!(err.code(), Some("stale_from"));
    }
}
