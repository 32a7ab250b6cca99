//! Deterministic replay of the ledger through the shared projection fold.

use super::{Ledger, LedgerEntry};
use crate::projection;
use crate::registry::Registry;
use crate::{Kernel, KernelError};
use std::collections::BTreeMap;

impl Ledger {
    /// Fold every successful entry, in recorded order, into a kernel map.
    ///
    /// With `kernel_id`, only that kernel's entries are folded. Replay is
    /// pure: it reads ids from stored result details and never touches the
    /// clock.
    pub fn replay(&self, kernel_id: Option<&str>) -> Result<BTreeMap<String, Kernel>, KernelError> {
        let mut kernels = BTreeMap::new();
        for entry in self.successful(kernel_id) {
            projection::fold(&mut kernels, &entry.operation, &entry.result.details).map_err(
                |e| {
                    KernelError::Persistence(format!(
                        "replay failed at entry {} (op {}): {}",
                        entry.sequence, entry.operation.op_id, e
                    ))
                },
            )?;
        }
        Ok(kernels)
    }

    /// Rebuild a detached Registry purely from the log.
    pub fn export_to_registry(&self) -> Result<Registry, KernelError> {
        Ok(Registry::from_kernels(self.replay(None)?))
    }

    fn successful<'a>(&'a self, kernel_id: Option<&'a str>) -> impl Iterator<Item = &'a LedgerEntry> {
        self.entries.iter().filter(move |e| {
            e.result.success && kernel_id.is_none_or(|id| e.operation.kernel_id() == id)
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::config::LedgerFormat;
    use crate::ledger::Ledger;
    use crate::operation::{
        CreateKernel, MaturityEdge, Operation, OperationPayload, OperationResult, ResultDetails,
        SetState,
    };
    use crate::runtime::WriteToken;
    use crate::{KernelError, Maturity};
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn ts(sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, sec).single().expect("date")
    }

    fn create(id: &str, sec: u32) -> Operation {
        Operation::new(
            "alice",
            "GOV-1",
            ts(sec),
            OperationPayload::Create(CreateKernel {
                kernel_id: id.to_string(),
                statement: format!("{} statement", id),
                category: "c".to_string(),
                owner: "alice".to_string(),
                needs: vec![],
                requirements: vec![],
                tags: vec![],
            }),
        )
        .with_op_id(format!("create-{}-{}", id, sec))
    }

    fn to_review(id: &str, sec: u32) -> (Operation, ResultDetails) {
        let op = Operation::new(
            "alice",
            "GOV-2",
            ts(sec),
            OperationPayload::SetState(SetState {
                kernel_id: id.to_string(),
                to: Maturity::UnderReview,
                expected_from: None,
                gate_checks: BTreeMap::new(),
                reason: None,
            }),
        )
        .with_op_id(format!("review-{}-{}", id, sec));
        let details = ResultDetails {
            transition: Some(MaturityEdge {
                from: Maturity::Draft,
                to: Maturity::UnderReview,
            }),
            ..ResultDetails::default()
        };
        (op, details)
    }

    fn seeded() -> Ledger {
        let token = WriteToken::for_tests();
        let mut ledger = Ledger::in_memory();
        for (i, id) in ["K1", "K2"].into_iter().enumerate() {
            let op = create(id, i as u32);
            let result = OperationResult::succeeded(&op.op_id, op.timestamp, ResultDetails::default());
            ledger.append(&token, op.clone(), result, op.timestamp).expect("append");
        }
        let (op, details) = to_review("K1", 9);
        let result = OperationResult::succeeded(&op.op_id, op.timestamp, details);
        ledger.append(&token, op.clone(), result, op.timestamp).expect("append");
        ledger
    }

    #[test]
    fn replay_is_idempotent() {
        let ledger = seeded();
        let first = ledger.replay(None).expect("replay");
        let second = ledger.replay(None).expect("replay");
        assert_eq!(first, second);
        assert_eq!(first["K1"].maturity, Maturity::UnderReview);
        assert_eq!(first["K1"].history.len(), 2);
    }

    #[test]
    fn replay_can_focus_on_one_kernel() {
        let kernels = seeded().replay(Some("K2")).expect("replay");
        assert_eq!(kernels.len(), 1);
        assert!(kernels.contains_key("K2"));
    }

    #[test]
    fn failed_entries_are_not_folded() {
        let mut ledger = seeded();
        let op = create("K1", 30);
        let err = KernelError::Validation("already exists".to_string());
        let result = OperationResult::failed(&op.op_id, op.timestamp, &err, ResultDetails::default());
        ledger
            .append(&WriteToken::for_tests(), op.clone(), result, op.timestamp)
            .expect("append");
        assert_eq!(ledger.replay(None).expect("replay"), seeded().replay(None).expect("replay"));
    }

    #[test]
    fn inconsistent_log_fails_replay() {
        let token = WriteToken::for_tests();
        let mut ledger = Ledger::in_memory();
        let (op, details) = to_review("K9", 0);
        let result = OperationResult::succeeded(&op.op_id, op.timestamp, details);
        ledger.append(&token, op.clone(), result, op.timestamp).expect("append");
        assert!(matches!(ledger.replay(None), Err(KernelError::Persistence(_))));
    }

    #[test]
    fn export_builds_registry_snapshot() {
        let registry = seeded().export_to_registry().expect("export");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.statistics().by_maturity["draft"], 1);
        assert!(registry.path().is_none());
    }

    #[test]
    fn replay_survives_yaml_roundtrip() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("ledger.yaml");
        let token = WriteToken::for_tests();
        let mut ledger = Ledger::open(&path, LedgerFormat::Yaml).expect("open");
        for entry in seeded().read_all() {
            ledger
                .append(&token, entry.operation.clone(), entry.result.clone(), entry.recorded_at)
                .expect("append");
        }
        let reopened = Ledger::open(&path, LedgerFormat::Yaml).expect("reopen");
        assert_eq!(reopened.replay(None).expect("replay"), seeded().replay(None).expect("replay"));
    }
}
