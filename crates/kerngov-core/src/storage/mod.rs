//! # Governance Store
//!
//! Side data the coordinator and the gate engine need but that is not part
//! of Kernel state: transition requests, reevaluation records and evidence
//! reviews. Two backends:
//!
//! - [`MemoryStore`]: `BTreeMap`s, for tests and dry tooling.
//! - [`RedbStore`]: redb tables with postcard-encoded values.
//!
//! Every put and remove is one committed unit, so the Runtime can undo a
//! staged write by restoring the value it read beforehand.

mod redb_store;

pub use redb_store::RedbStore;

use crate::reevaluation::ReevaluationRecord;
use crate::transition::MaturityTransitionRequest;
use crate::{EvidenceReview, KernelError, VerificationStatus};
use std::collections::BTreeMap;

/// Storage seam for governance side data.
pub trait GovernanceStore: Send {
    fn get_request(&self, request_id: &str)
    -> Result<Option<MaturityTransitionRequest>, KernelError>;
    fn put_request(&mut self, request: &MaturityTransitionRequest) -> Result<(), KernelError>;
    fn remove_request(&mut self, request_id: &str) -> Result<(), KernelError>;
    fn list_requests(&self) -> Result<Vec<MaturityTransitionRequest>, KernelError>;

    fn get_reevaluation(&self, reevaluation_id: &str)
    -> Result<Option<ReevaluationRecord>, KernelError>;
    fn put_reevaluation(&mut self, record: &ReevaluationRecord) -> Result<(), KernelError>;
    fn remove_reevaluation(&mut self, reevaluation_id: &str) -> Result<(), KernelError>;
    fn list_reevaluations(&self) -> Result<Vec<ReevaluationRecord>, KernelError>;

    fn get_review(&self, key: &str) -> Result<Option<EvidenceReview>, KernelError>;
    fn put_review(&mut self, review: &EvidenceReview) -> Result<(), KernelError>;
    fn list_reviews(&self) -> Result<Vec<EvidenceReview>, KernelError>;

    /// Latest review verdict per evidence id for one kernel.
    fn review_statuses(
        &self,
        kernel_id: &str,
    ) -> Result<BTreeMap<String, VerificationStatus>, KernelError> {
        Ok(self
            .list_reviews()?
            .into_iter()
            .filter(|r| r.kernel_id == kernel_id)
            .map(|r| (r.evidence_id, r.status))
            .collect())
    }

    /// Requests for one kernel, in id order.
    fn requests_for(&self, kernel_id: &str) -> Result<Vec<MaturityTransitionRequest>, KernelError> {
        Ok(self
            .list_requests()?
            .into_iter()
            .filter(|r| r.kernel_id == kernel_id)
            .collect())
    }
}

// =============================================================================
// MEMORY BACKEND
// =============================================================================

/// In-memory governance store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    requests: BTreeMap<String, MaturityTransitionRequest>,
    reevaluations: BTreeMap<String, ReevaluationRecord>,
    reviews: BTreeMap<String, EvidenceReview>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl GovernanceStore for MemoryStore {
    fn get_request(
        &self,
        request_id: &str,
    ) -> Result<Option<MaturityTransitionRequest>, KernelError> {
        Ok(self.requests.get(request_id).cloned())
    }

    fn put_request(&mut self, request: &MaturityTransitionRequest) -> Result<(), KernelError> {
        self.requests
            .insert(request.request_id.clone(), request.clone());
        Ok(())
    }

    fn remove_request(&mut self, request_id: &str) -> Result<(), KernelError> {
        self.requests.remove(request_id);
        Ok(())
    }

    fn list_requests(&self) -> Result<Vec<MaturityTransitionRequest>, KernelError> {
        Ok(self.requests.values().cloned().collect())
    }

    fn get_reevaluation(
        &self,
        reevaluation_id: &str,
    ) -> Result<Option<ReevaluationRecord>, KernelError> {
        Ok(self.reevaluations.get(reevaluation_id).cloned())
    }

    fn put_reevaluation(&mut self, record: &ReevaluationRecord) -> Result<(), KernelError> {
        self.reevaluations
            .insert(record.reevaluation_id.clone(), record.clone());
        Ok(())
    }

    fn remove_reevaluation(&mut self, reevaluation_id: &str) -> Result<(), KernelError> {
        self.reevaluations.remove(reevaluation_id);
        Ok(())
    }

    fn list_reevaluations(&self) -> Result<Vec<ReevaluationRecord>, KernelError> {
        Ok(self.reevaluations.values().cloned().collect())
    }

    fn get_review(&self, key: &str) -> Result<Option<EvidenceReview>, KernelError> {
        Ok(self.reviews.get(key).cloned())
    }

    fn put_review(&mut self, review: &EvidenceReview) -> Result<(), KernelError> {
        self.reviews.insert(review.key(), review.clone());
        Ok(())
    }

    fn list_reviews(&self) -> Result<Vec<EvidenceReview>, KernelError> {
        Ok(self.reviews.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Maturity;
    use chrono::{TimeZone, Utc};

    #[test]
    fn memory_store_put_get_remove() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).single().expect("date");
        let mut store = MemoryStore::new();
        let req = MaturityTransitionRequest::new(
            "R1".to_string(),
            "K1".to_string(),
            Maturity::UnderReview,
            Maturity::Agreed,
            vec!["owner".to_string()],
            "alice".to_string(),
            at,
            None,
        );
        store.put_request(&req).expect("put");
        assert_eq!(store.get_request("R1").expect("get"), Some(req));
        assert_eq!(store.requests_for("K1").expect("list").len(), 1);
        assert!(store.requests_for("K2").expect("list").is_empty());

        store.remove_request("R1").expect("remove");
        assert_eq!(store.get_request("R1").expect("get"), None);
    }

    #[test]
    fn later_review_replaces_earlier() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).single().expect("date");
        let mut store = MemoryStore::new();
        let mut review = EvidenceReview {
            kernel_id: "K1".to_string(),
            evidence_id: "E1".to_string(),
            reviewer: "bob".to_string(),
            reviewer_role: None,
            issue: "GOV-1".to_string(),
            status: VerificationStatus::Rejected,
            reviewed_at: at,
            note: None,
        };
        store.put_review(&review).expect("put");
        review.status = VerificationStatus::Verified;
        store.put_review(&review).expect("put");

        let statuses = store.review_statuses("K1").expect("statuses");
        assert_eq!(statuses.get("E1"), Some(&VerificationStatus::Verified));
        assert!(store.review_statuses("K2").expect("statuses").is_empty());
    }
}
