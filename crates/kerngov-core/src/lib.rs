//! # kerngov-core
//!
//! The event-sourced governance engine for Kernel requirement units.
//!
//! A Kernel (NRVV: Needs, Requirements, Verification, Validation) only ever
//! changes through [`Runtime::apply`]. Every successful operation is
//! appended to the [`Ledger`], and the [`Registry`] is a projection of that
//! log that can be rebuilt at any time by replay.
//!
//! ## Architectural Constraints
//!
//! - Single writer: `apply(&mut self)` serializes every mutation
//! - Ledger and Registry mutators require a [`WriteToken`] only the Runtime
//!   can mint
//! - The live Runtime and replay share one projection fold
//! - Deterministic: BTreeMap only, no floats, ids read back from results
//! - No async, no network dependencies

// =============================================================================
// MODULES
// =============================================================================

pub mod change;
pub mod clock;
pub mod config;
pub mod digest;
pub mod formats;
pub mod gate;
pub mod ledger;
pub mod operation;
pub mod primitives;
pub mod projection;
pub mod reevaluation;
pub mod registry;
pub mod runtime;
pub mod storage;
pub mod transition;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    DecisionRecord, ErrorKind, Evidence, EvidenceReview, ExceptionRecord, ExceptionStatus,
    HistoryEntry, Kernel, KernelError, Maturity, Need, Requirement, Severity, TraceStatus,
    ValidationItem, VerificationItem, VerificationStatus, review_key,
};

// =============================================================================
// RE-EXPORTS: Operations and Runtime
// =============================================================================

pub use change::{ChangeRecord, ExecutionSummary, StepOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, LedgerFormat, RuntimeSettings};
pub use gate::{GateCheckOutcome, GateEngine, GateReport};
pub use operation::{
    ErrorInfo, Operation, OperationKind, OperationPayload, OperationResult, ResultDetails,
};
pub use runtime::{Actor, ConsistencyReport, Runtime, WriteToken};

// =============================================================================
// RE-EXPORTS: Persistence and Projections
// =============================================================================

pub use digest::snapshot_checksum;
#[cfg(feature = "crypto-hash")]
pub use digest::snapshot_crypto_hash;
pub use ledger::{Ledger, LedgerEntry};
pub use reevaluation::{ReevaluationRecord, ReevaluationSink, ReevaluationStatus, TracingSink};
pub use registry::{NrvvReport, Registry, ReviewOverlay, SearchCriteria};
pub use storage::{GovernanceStore, MemoryStore, RedbStore};
pub use transition::{MaturityTransitionRequest, TransitionStatus};
