//! # redb-backed Governance Store
//!
//! One table per record type, keyed by id, values encoded with postcard.
//! Each mutation runs in its own write transaction, so a committed put or
//! remove survives a crash and a failed one leaves nothing behind.

use super::GovernanceStore;
use crate::reevaluation::ReevaluationRecord;
use crate::transition::MaturityTransitionRequest;
use crate::{EvidenceReview, KernelError};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::path::Path;

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// request_id -> postcard(MaturityTransitionRequest)
const TRANSITION_REQUESTS: Table = TableDefinition::new("transition_requests");

/// reevaluation_id -> postcard(ReevaluationRecord)
const REEVALUATIONS: Table = TableDefinition::new("reevaluations");

/// "kernel_id/evidence_id" -> postcard(EvidenceReview)
const EVIDENCE_REVIEWS: Table = TableDefinition::new("evidence_reviews");

fn io(e: impl Display) -> KernelError {
    KernelError::Persistence(e.to_string())
}

/// Governance store persisted in a redb database file.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create the database at `path`, creating all tables.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KernelError> {
        crate::formats::ensure_parent(path.as_ref())?;
        let db = Database::create(path.as_ref()).map_err(io)?;

        // Create the tables if they don't exist yet
        let write_txn = db.begin_write().map_err(io)?;
        for table in [TRANSITION_REQUESTS, REEVALUATIONS, EVIDENCE_REVIEWS] {
            let _table = write_txn.open_table(table).map_err(io)?;
        }
        write_txn.commit().map_err(io)?;

        Ok(Self { db })
    }

    /// Number of records per table: (requests, reevaluations, reviews).
    pub fn counts(&self) -> Result<(u64, u64, u64), KernelError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let count = |table: Table| -> Result<u64, KernelError> {
            read_txn.open_table(table).map_err(io)?.len().map_err(io)
        };
        Ok((
            count(TRANSITION_REQUESTS)?,
            count(REEVALUATIONS)?,
            count(EVIDENCE_REVIEWS)?,
        ))
    }

    fn get_value<T: DeserializeOwned>(&self, table: Table, key: &str) -> Result<Option<T>, KernelError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(table).map_err(io)?;
        match table.get(key).map_err(io)? {
            Some(data) => Ok(Some(postcard::from_bytes(data.value()).map_err(io)?)),
            None => Ok(None),
        }
    }

    fn put_value<T: Serialize>(&self, table: Table, key: &str, value: &T) -> Result<(), KernelError> {
        let bytes = postcard::to_allocvec(value).map_err(io)?;
        let write_txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = write_txn.open_table(table).map_err(io)?;
            table.insert(key, bytes.as_slice()).map_err(io)?;
        }
        write_txn.commit().map_err(io)
    }

    fn remove_value(&self, table: Table, key: &str) -> Result<(), KernelError> {
        let write_txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = write_txn.open_table(table).map_err(io)?;
            table.remove(key).map_err(io)?;
        }
        write_txn.commit().map_err(io)
    }

    fn list_values<T: DeserializeOwned>(&self, table: Table) -> Result<Vec<T>, KernelError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(table).map_err(io)?;
        let mut values = Vec::new();
        for entry in table.iter().map_err(io)? {
            let (_, data) = entry.map_err(io)?;
            values.push(postcard::from_bytes(data.value()).map_err(io)?);
        }
        Ok(values)
    }
}

impl GovernanceStore for RedbStore {
    fn get_request(
        &self,
        request_id: &str,
    ) -> Result<Option<MaturityTransitionRequest>, KernelError> {
        self.get_value(TRANSITION_REQUESTS, request_id)
    }

    fn put_request(&mut self, request: &MaturityTransitionRequest) -> Result<(), KernelError> {
        self.put_value(TRANSITION_REQUESTS, &request.request_id, request)
    }

    fn remove_request(&mut self, request_id: &str) -> Result<(), KernelError> {
        self.remove_value(TRANSITION_REQUESTS, request_id)
    }

    fn list_requests(&self) -> Result<Vec<MaturityTransitionRequest>, KernelError> {
        self.list_values(TRANSITION_REQUESTS)
    }

    fn get_reevaluation(
        &self,
        reevaluation_id: &str,
    ) -> Result<Option<ReevaluationRecord>, KernelError> {
        self.get_value(REEVALUATIONS, reevaluation_id)
    }

    fn put_reevaluation(&mut self, record: &ReevaluationRecord) -> Result<(), KernelError> {
        self.put_value(REEVALUATIONS, &record.reevaluation_id, record)
    }

    fn remove_reevaluation(&mut self, reevaluation_id: &str) -> Result<(), KernelError> {
        self.remove_value(REEVALUATIONS, reevaluation_id)
    }

    fn list_reevaluations(&self) -> Result<Vec<ReevaluationRecord>, KernelError> {
        self.list_values(REEVALUATIONS)
    }

    fn get_review(&self, key: &str) -> Result<Option<EvidenceReview>, KernelError> {
        self.get_value(EVIDENCE_REVIEWS, key)
    }

    fn put_review(&mut self, review: &EvidenceReview) -> Result<(), KernelError> {
        self.put_value(EVIDENCE_REVIEWS, &review.key(), review)
    }

    fn list_reviews(&self) -> Result<Vec<EvidenceReview>, KernelError> {
        self.list_values(EVIDENCE_REVIEWS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reevaluation::ReevaluationStatus;
    use crate::transition::TransitionStatus;
    use crate::{Maturity, VerificationStatus};
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    #[test]
    fn fresh_store_has_empty_tables() {
        let temp = tempdir().expect("temp dir");
        let store = RedbStore::open(temp.path().join("store.redb")).expect("open");
        // Reads would fail with TableDoesNotExist if open had not created them.
        assert_eq!(store.counts().expect("counts"), (0, 0, 0));
        assert!(store.list_reviews().expect("list").is_empty());
    }

    #[test]
    fn records_survive_reopen() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("gov").join("store.redb");
        let at = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).single().expect("date");

        let mut req = MaturityTransitionRequest::new(
            "R1".to_string(),
            "K1".to_string(),
            Maturity::Agreed,
            Maturity::Frozen,
            vec!["owner".to_string(), "qa".to_string()],
            "alice".to_string(),
            at,
            Some(at),
        );
        req.approve(Some("owner"), "alice", at).expect("approve");

        {
            let mut store = RedbStore::open(&db_path).expect("open");
            store.put_request(&req).expect("put");
            store
                .put_reevaluation(&ReevaluationRecord::new(
                    "V1".to_string(),
                    "K1",
                    "manual",
                    Some("E1"),
                    at,
                ))
                .expect("put");
            store
                .put_review(&EvidenceReview {
                    kernel_id: "K1".to_string(),
                    evidence_id: "E1".to_string(),
                    reviewer: "bob".to_string(),
                    reviewer_role: Some("governance".to_string()),
                    issue: "GOV-7".to_string(),
                    status: VerificationStatus::Verified,
                    reviewed_at: at,
                    note: Some("checked".to_string()),
                })
                .expect("put");
        }

        let store = RedbStore::open(&db_path).expect("reopen");
        let loaded = store.get_request("R1").expect("get").expect("present");
        assert_eq!(loaded, req);
        assert_eq!(loaded.status, TransitionStatus::Pending);

        let rec = store.get_reevaluation("V1").expect("get").expect("present");
        assert_eq!(rec.status, ReevaluationStatus::Pending);
        assert_eq!(rec.dedupe_key, "K1:manual:E1");

        let statuses = store.review_statuses("K1").expect("statuses");
        assert_eq!(statuses.get("E1"), Some(&VerificationStatus::Verified));
        assert_eq!(store.counts().expect("counts"), (1, 1, 1));
    }

    #[test]
    fn remove_deletes_record() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("store.redb")).expect("open");
        let at = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).single().expect("date");
        let rec = ReevaluationRecord::new("V1".to_string(), "K1", "manual", None, at);
        store.put_reevaluation(&rec).expect("put");
        store.remove_reevaluation("V1").expect("remove");
        assert!(store.get_reevaluation("V1").expect("get").is_none());
        assert!(store.list_reevaluations().expect("list").is_empty());
    }
}
