//! # NRVV Validation
//!
//! Need → Requirement → Verification → Validation checks for one Kernel.
//!
//! - **valid**: every reference points at an id that exists on the Kernel.
//! - **traceability complete**: no chain list is empty, every need has a
//!   requirement and a validation, every requirement has a verification.

use crate::{Kernel, Maturity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Result of validating one Kernel's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NrvvReport {
    pub kernel_id: String,
    pub is_valid: bool,
    pub traceability_complete: bool,
    pub missing_links: Vec<String>,
}

impl NrvvReport {
    /// Both checks pass.
    #[must_use]
    pub fn is_sound(&self) -> bool {
        self.is_valid && self.traceability_complete
    }
}

#[must_use]
pub fn validate(kernel: &Kernel) -> NrvvReport {
    let need_ids: BTreeSet<&str> = kernel.needs.iter().map(|n| n.id.as_str()).collect();
    let req_ids: BTreeSet<&str> = kernel.requirements.iter().map(|r| r.id.as_str()).collect();

    let mut dangling = Vec::new();
    for req in &kernel.requirements {
        for need in req.need_refs.iter().filter(|n| !need_ids.contains(n.as_str())) {
            dangling.push(format!("requirement {} references unknown need {}", req.id, need));
        }
    }
    for ver in &kernel.verification {
        for req in ver
            .requirement_refs
            .iter()
            .filter(|r| !req_ids.contains(r.as_str()))
        {
            dangling.push(format!(
                "verification {} references unknown requirement {}",
                ver.id, req
            ));
        }
    }
    for val in &kernel.validation {
        for need in val.need_refs.iter().filter(|n| !need_ids.contains(n.as_str())) {
            dangling.push(format!("validation {} references unknown need {}", val.id, need));
        }
    }

    let mut gaps = Vec::new();
    for (label, empty) in [
        ("needs", kernel.needs.is_empty()),
        ("requirements", kernel.requirements.is_empty()),
        ("verification", kernel.verification.is_empty()),
        ("validation", kernel.validation.is_empty()),
    ] {
        if empty {
            gaps.push(format!("no {} recorded", label));
        }
    }

    let required: BTreeSet<&str> = kernel
        .requirements
        .iter()
        .flat_map(|r| r.need_refs.iter().map(String::as_str))
        .collect();
    let verified: BTreeSet<&str> = kernel
        .verification
        .iter()
        .flat_map(|v| v.requirement_refs.iter().map(String::as_str))
        .collect();
    let validated: BTreeSet<&str> = kernel
        .validation
        .iter()
        .flat_map(|v| v.need_refs.iter().map(String::as_str))
        .collect();

    for need in &need_ids {
        if !required.contains(need) {
            gaps.push(format!("need {} has no requirement", need));
        }
        if !validated.contains(need) {
            gaps.push(format!("need {} has no validation", need));
        }
    }
    for req in &req_ids {
        if !verified.contains(req) {
            gaps.push(format!("requirement {} has no verification", req));
        }
    }

    let is_valid = dangling.is_empty();
    let traceability_complete = gaps.is_empty();
    dangling.extend(gaps);

    NrvvReport {
        kernel_id: kernel.id.clone(),
        is_valid,
        traceability_complete,
        missing_links: dangling,
    }
}

/// Agreed or frozen, with a sound chain.
#[must_use]
pub fn is_converged(kernel: &Kernel) -> bool {
    matches!(kernel.maturity, Maturity::Agreed | Maturity::Frozen) && validate(kernel).is_sound()
}
