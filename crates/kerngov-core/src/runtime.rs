//! # Runtime
//!
//! The sole mutation entry point. `apply()` runs every operation through
//! the same pipeline:
//!
//! 1. structural validation (and duplicate op id rejection)
//! 2. preflight gates: issue, bootstrap protection, authority
//! 3. semantic checks, transition gates, staging of the next Kernel state
//! 4. Registry and governance store mutation
//! 5. Ledger append; if it fails, stage 4 is rolled back
//! 6. the `OperationResult`
//!
//! `dry_run()` stops after stage 3. A failure at any stage leaves the
//! Ledger, the Registry and the governance store untouched, with one
//! exception: a transition request found past its deadline is marked
//! `expired` in the governance store even though the operation fails.
//!
//! Evidence review verdicts are the one write outside `apply()`: they pass
//! the issue and authority gates, land in the governance store and are
//! overlaid on the Registry, but never reach the Ledger.
//!
//! The Ledger and Registry mutators take a [`WriteToken`]. Only this module
//! can mint one, so nothing outside the Runtime can write them.

use crate::clock::Clock;
use crate::config::RuntimeSettings;
use crate::gate::{GateEngine, GateReport, TransitionContext};
use crate::ledger::Ledger;
use crate::operation::{
    ApproveTransition, CommitTransition, CompleteReevaluation, MaturityEdge, Operation,
    OperationPayload, OperationResult, RejectTransition, RequestTransition, ResultDetails,
    StartReevaluation,
};
use crate::projection;
use crate::reevaluation::{ReevaluationRecord, ReevaluationSink, dedupe_key};
use crate::registry::{NrvvReport, Registry, ReviewOverlay, SearchCriteria};
use crate::storage::{GovernanceStore, MemoryStore, RedbStore};
use crate::transition::{self, MaturityTransitionRequest};
use crate::{EvidenceReview, Kernel, KernelError, Maturity, VerificationStatus};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

// =============================================================================
// WRITE TOKEN
// =============================================================================

/// Capability required by every Ledger and Registry mutator.
#[derive(Debug)]
pub struct WriteToken {
    _private: (),
}

impl WriteToken {
    fn new() -> Self {
        Self { _private: () }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::new()
    }
}

// =============================================================================
// ACTOR
// =============================================================================

/// Who is acting, in which role, under which tracking issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub name: String,
    pub role: Option<String>,
    pub issue: String,
}

impl Actor {
    pub fn new(name: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: None,
            issue: issue.into(),
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

// =============================================================================
// CONSISTENCY
// =============================================================================

/// Live Registry compared with a fresh replay of the Ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub ledger_entries: usize,
    pub registry_kernels: usize,
    pub replayed_kernels: usize,
    /// Kernel ids whose live and replayed states differ.
    pub mismatched: Vec<String>,
}

impl ConsistencyReport {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.mismatched.is_empty()
    }
}

// =============================================================================
// STAGING
// =============================================================================

/// Effects of one operation, computed before anything is written.
#[derive(Debug)]
struct Plan {
    kernel: Kernel,
    details: ResultDetails,
    store_writes: Vec<StoreWrite>,
    notify: Option<ReevaluationRecord>,
}

#[derive(Debug)]
enum StoreWrite {
    Request(MaturityTransitionRequest),
    Reevaluation(ReevaluationRecord),
}

/// What a store write replaced, for rollback.
#[derive(Debug)]
enum Undo {
    Request {
        id: String,
        previous: Option<MaturityTransitionRequest>,
    },
    Reevaluation {
        id: String,
        previous: Option<ReevaluationRecord>,
    },
}

fn generate_id(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
}

fn review_overlay(reviews: Vec<EvidenceReview>) -> ReviewOverlay {
    let mut overlay = ReviewOverlay::new();
    for review in reviews {
        overlay
            .entry(review.kernel_id)
            .or_default()
            .insert(review.evidence_id, review.status);
    }
    overlay
}

fn require<'a>(kernel: Option<&'a Kernel>, kernel_id: &str) -> Result<&'a Kernel, KernelError> {
    kernel.ok_or_else(|| KernelError::NotFound(format!("kernel {}", kernel_id)))
}

fn stale_from(kernel: &Kernel, expected: Maturity) -> KernelError {
    KernelError::illegal(
        "stale_from",
        format!(
            "kernel {} is {}, expected {}",
            kernel.id, kernel.maturity, expected
        ),
    )
}

// =============================================================================
// RUNTIME
// =============================================================================

/// The orchestrator.
pub struct Runtime {
    settings: RuntimeSettings,
    clock: Arc<dyn Clock>,
    gates: GateEngine,
    ledger: Ledger,
    registry: Registry,
    store: Box<dyn GovernanceStore>,
    sink: Option<Arc<dyn ReevaluationSink>>,
    token: WriteToken,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("ledger_entries", &self.ledger.len())
            .field("kernels", &self.registry.len())
            .field("solo_mode", &self.settings.solo_mode)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Open the file-backed ledger, registry and governance store named in
    /// `settings`.
    ///
    /// The ledger is authoritative: a registry file that disagrees with the
    /// replayed ledger (or is missing) is rebuilt and rewritten.
    pub fn open(settings: RuntimeSettings, clock: Arc<dyn Clock>) -> Result<Self, KernelError> {
        let ledger = Ledger::open(&settings.ledger_path, settings.ledger_format)?;
        let registry = Registry::open(&settings.registry_path)?;
        let store = RedbStore::open(&settings.governance_store_path)?;
        let mut runtime = Self::from_parts(settings, clock, ledger, registry, Box::new(store));

        let mut stale = false;
        let replayed = runtime.ledger.replay(None)?;
        if replayed != *runtime.registry.kernels() {
            tracing::warn!(
                ledger_entries = runtime.ledger.len(),
                registry_kernels = runtime.registry.len(),
                "registry out of step with ledger; rebuilding from ledger"
            );
            runtime.registry.replace_all(&runtime.token, replayed);
            stale = true;
        }
        let overlay = review_overlay(runtime.store.list_reviews()?);
        if overlay != *runtime.registry.reviews() {
            tracing::debug!("syncing registry review overlay with governance store");
            runtime.registry.replace_reviews(&runtime.token, overlay);
            stale = true;
        }
        if stale {
            runtime.registry.save(&runtime.token)?;
        }

        tracing::info!(
            ledger = %runtime.settings.ledger_path.display(),
            entries = runtime.ledger.len(),
            kernels = runtime.registry.len(),
            "runtime opened"
        );
        Ok(runtime)
    }

    /// A runtime with no files at all.
    #[must_use]
    pub fn in_memory(settings: RuntimeSettings, clock: Arc<dyn Clock>) -> Self {
        Self::from_parts(
            settings,
            clock,
            Ledger::in_memory(),
            Registry::new(),
            Box::new(MemoryStore::new()),
        )
    }

    /// Assemble a runtime from already-opened parts.
    #[must_use]
    pub fn from_parts(
        settings: RuntimeSettings,
        clock: Arc<dyn Clock>,
        ledger: Ledger,
        registry: Registry,
        store: Box<dyn GovernanceStore>,
    ) -> Self {
        Self {
            gates: GateEngine::new(&settings),
            settings,
            clock,
            ledger,
            registry,
            store,
            sink: None,
            token: WriteToken::new(),
        }
    }

    /// Route reevaluation notifications to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ReevaluationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    #[must_use]
    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn store(&self) -> &dyn GovernanceStore {
        self.store.as_ref()
    }

    #[must_use]
    pub fn kernel(&self, kernel_id: &str) -> Option<&Kernel> {
        self.registry.kernel(kernel_id)
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // =========================================================================
    // APPLY
    // =========================================================================

    /// Apply one operation. Either exactly one ledger entry is appended and
    /// a successful result returned, or nothing changes and the result
    /// carries the error.
    pub fn apply(&mut self, op: Operation) -> OperationResult {
        let now = self.clock.now();
        let span = tracing::info_span!("apply", op_id = %op.op_id, kind = %op.kind());
        let _enter = span.enter();

        let mut report = GateReport::new();
        let mut expired = None;
        let staged = self.stage(&op, now, &mut report, &mut expired);
        let checks = report.into_checks();

        let mut plan = match staged {
            Ok(plan) => plan,
            Err(err) => {
                if let Some(request) = expired {
                    self.record_expiry(&request);
                }
                tracing::warn!(kernel = %op.kernel_id(), error = %err, "operation rejected");
                let details = ResultDetails {
                    gate_checks: checks,
                    ..ResultDetails::default()
                };
                return OperationResult::failed(&op.op_id, now, &err, details);
            }
        };
        plan.details.gate_checks = checks;
        self.commit(op, plan, now)
    }

    /// Run stages 1-3 only. Nothing is written.
    pub fn dry_run(&self, op: &Operation) -> OperationResult {
        let now = self.clock.now();
        let mut report = GateReport::new();
        let mut expired = None;
        let staged = self.stage(op, now, &mut report, &mut expired);
        let checks = report.into_checks();

        match staged {
            Ok(mut plan) => {
                plan.details.gate_checks = checks;
                plan.details.dry_run = true;
                OperationResult::succeeded(&op.op_id, now, plan.details)
            }
            Err(err) => {
                let details = ResultDetails {
                    gate_checks: checks,
                    dry_run: true,
                    ..ResultDetails::default()
                };
                OperationResult::failed(&op.op_id, now, &err, details)
            }
        }
    }

    fn stage(
        &self,
        op: &Operation,
        now: DateTime<Utc>,
        report: &mut GateReport,
        expired: &mut Option<MaturityTransitionRequest>,
    ) -> Result<Plan, KernelError> {
        op.validate()?;
        if self.ledger.contains_successful_op(&op.op_id) {
            return Err(KernelError::Validation(format!(
                "operation {} has already been applied",
                op.op_id
            )));
        }
        self.gates.preflight(op, report)?;

        let current = self.registry.kernel(op.kernel_id());
        let mut details = ResultDetails::default();
        let mut store_writes = Vec::new();
        let mut notify = None;

        match &op.payload {
            OperationPayload::Create(_)
            | OperationPayload::RecordDecision(_)
            | OperationPayload::LinkEvidence(_)
            | OperationPayload::RecordVerification(_)
            | OperationPayload::RecordValidation(_)
            | OperationPayload::CloseException(_) => {}

            OperationPayload::RaiseException(_) => {
                details.exception_id = Some(generate_id("EXC"));
            }

            OperationPayload::SetState(p) => {
                let kernel = require(current, &p.kernel_id)?;
                if let Some(expected) = p.expected_from
                    && expected != kernel.maturity
                {
                    return Err(stale_from(kernel, expected));
                }
                transition::check_edge(kernel.maturity, p.to)?;
                if self.settings.propose_only.contains(&(kernel.maturity, p.to)) {
                    return Err(KernelError::illegal(
                        "propose_only",
                        format!(
                            "{} -> {} requires request, approval and commit",
                            kernel.maturity, p.to
                        ),
                    ));
                }
                self.evaluate_transition(kernel, p.to, &p.gate_checks, report)?;
                details.transition = Some(MaturityEdge {
                    from: kernel.maturity,
                    to: p.to,
                });
            }

            OperationPayload::RequestMaturityTransition(p) => {
                let kernel = require(current, &p.kernel_id)?;
                if p.from != kernel.maturity {
                    return Err(stale_from(kernel, p.from));
                }
                transition::check_edge(p.from, p.to)?;
                if let Some(deadline) = p.expires_at
                    && deadline <= now
                {
                    return Err(KernelError::Validation(format!(
                        "expires_at {} is not in the future",
                        deadline
                    )));
                }
                let request = MaturityTransitionRequest::new(
                    generate_id("MTR"),
                    p.kernel_id.clone(),
                    p.from,
                    p.to,
                    p.required_approver_roles.clone(),
                    op.actor.clone(),
                    now,
                    p.expires_at,
                );
                details.request_id = Some(request.request_id.clone());
                details.request_status = Some(request.status);
                store_writes.push(StoreWrite::Request(request));
            }

            OperationPayload::ApproveMaturityTransition(p) => {
                let mut request = self.open_request(&p.kernel_id, &p.request_id, now, expired)?;
                let recorded = request.approve(op.actor_role.as_deref(), &op.actor, now)?;
                details.request_id = Some(request.request_id.clone());
                details.request_status = Some(request.status);
                details.already_approved = Some(!recorded);
                details.approvals_received = request
                    .approved_roles()
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                if recorded {
                    store_writes.push(StoreWrite::Request(request));
                }
            }

            OperationPayload::RejectMaturityTransition(p) => {
                let mut request = self.open_request(&p.kernel_id, &p.request_id, now, expired)?;
                request.reject(op.actor_role.as_deref(), &p.reason, now)?;
                details.request_id = Some(request.request_id.clone());
                details.request_status = Some(request.status);
                store_writes.push(StoreWrite::Request(request));
            }

            OperationPayload::CommitMaturityTransition(p) => {
                let mut request = self.open_request(&p.kernel_id, &p.request_id, now, expired)?;
                request.ensure_committable(op.actor_role.as_deref())?;
                let kernel = require(current, &p.kernel_id)?;
                if kernel.maturity != request.from {
                    return Err(stale_from(kernel, request.from));
                }
                transition::check_edge(request.from, request.to)?;
                self.evaluate_transition(kernel, request.to, &p.gate_checks, report)?;
                request.mark_committed(now);
                details.transition = Some(MaturityEdge {
                    from: request.from,
                    to: request.to,
                });
                details.request_id = Some(request.request_id.clone());
                details.request_status = Some(request.status);
                store_writes.push(StoreWrite::Request(request));
            }

            OperationPayload::StartReevaluation(p) => {
                require(current, &p.kernel_id)?;
                let key = dedupe_key(&p.kernel_id, &p.trigger_type, p.entity_id.as_deref());
                let window = self.settings.dedup_window;
                let existing = self
                    .store
                    .list_reevaluations()?
                    .into_iter()
                    .filter(|r| r.suppresses(&key, now, window))
                    .max_by_key(|r| r.triggered_at);
                match existing {
                    Some(record) => {
                        tracing::debug!(reevaluation_id = %record.reevaluation_id, "reevaluation deduplicated");
                        details.reevaluation_id = Some(record.reevaluation_id);
                        details.deduplicated = Some(true);
                    }
                    None => {
                        let record = ReevaluationRecord::new(
                            generate_id("REV"),
                            &p.kernel_id,
                            &p.trigger_type,
                            p.entity_id.as_deref(),
                            now,
                        );
                        details.reevaluation_id = Some(record.reevaluation_id.clone());
                        details.deduplicated = Some(false);
                        notify = Some(record.clone());
                        store_writes.push(StoreWrite::Reevaluation(record));
                    }
                }
            }

            OperationPayload::CompleteReevaluation(p) => {
                let mut record = self
                    .store
                    .get_reevaluation(&p.reevaluation_id)?
                    .ok_or_else(|| {
                        KernelError::NotFound(format!("reevaluation {}", p.reevaluation_id))
                    })?;
                if record.kernel_id != p.kernel_id {
                    return Err(KernelError::Validation(format!(
                        "reevaluation {} belongs to kernel {}",
                        record.reevaluation_id, record.kernel_id
                    )));
                }
                if !record.is_pending() {
                    return Err(KernelError::Validation(format!(
                        "reevaluation {} is already completed",
                        record.reevaluation_id
                    )));
                }
                record.complete(&p.outcome, now);
                details.reevaluation_id = Some(record.reevaluation_id.clone());
                store_writes.push(StoreWrite::Reevaluation(record));
            }
        }

        let kernel = projection::project(current, op, &details)?;
        Ok(Plan {
            kernel,
            details,
            store_writes,
            notify,
        })
    }

    fn evaluate_transition(
        &self,
        kernel: &Kernel,
        to: Maturity,
        caller_checks: &BTreeMap<String, bool>,
        report: &mut GateReport,
    ) -> Result<(), KernelError> {
        let reviews = self.store.review_statuses(&kernel.id)?;
        let ctx = TransitionContext::for_kernel(kernel, to, caller_checks, &reviews);
        self.gates.evaluate_transition(&ctx, report)
    }

    /// Load a request that is still open. A request past its deadline is
    /// handed back through `expired` and the call fails.
    fn open_request(
        &self,
        kernel_id: &str,
        request_id: &str,
        now: DateTime<Utc>,
        expired: &mut Option<MaturityTransitionRequest>,
    ) -> Result<MaturityTransitionRequest, KernelError> {
        let request = self
            .store
            .get_request(request_id)?
            .ok_or_else(|| KernelError::NotFound(format!("transition request {}", request_id)))?;
        if request.kernel_id != kernel_id {
            return Err(KernelError::Validation(format!(
                "transition request {} belongs to kernel {}",
                request_id, request.kernel_id
            )));
        }
        if request.is_expired_at(now) {
            let mut lapsed = request;
            lapsed.mark_expired(now);
            *expired = Some(lapsed);
            return Err(KernelError::illegal(
                "request_expired",
                format!("transition request {} has expired", request_id),
            ));
        }
        Ok(request)
    }

    fn record_expiry(&mut self, request: &MaturityTransitionRequest) {
        match self.store.put_request(request) {
            Ok(()) => tracing::info!(request_id = %request.request_id, "transition request expired"),
            Err(e) => tracing::warn!(request_id = %request.request_id, error = %e, "could not record expiry"),
        }
    }

    fn commit(&mut self, op: Operation, plan: Plan, now: DateTime<Utc>) -> OperationResult {
        let Plan {
            kernel,
            details,
            store_writes,
            notify,
        } = plan;
        let op_id = op.op_id.clone();

        // Stage 4: governance store, then registry.
        let mut undo = Vec::with_capacity(store_writes.len());
        for write in store_writes {
            match self.write_store(write) {
                Ok(entry) => undo.push(entry),
                Err(err) => {
                    self.undo_store(undo);
                    tracing::warn!(error = %err, "governance store write failed");
                    return OperationResult::failed(&op_id, now, &err, details);
                }
            }
        }
        let kernel_id = kernel.id.clone();
        let previous = self.registry.upsert_kernel(&self.token, kernel);

        // Stage 5: ledger.
        let result = OperationResult::succeeded(&op_id, now, details);
        let sequence = match self.ledger.append(&self.token, op, result.clone(), now) {
            Ok(sequence) => sequence,
            Err(err) => {
                self.registry.restore_kernel(&self.token, &kernel_id, previous);
                self.undo_store(undo);
                tracing::warn!(error = %err, "ledger append failed; staged changes rolled back");
                return OperationResult::failed(&op_id, now, &err, result.details);
            }
        };

        if let Err(err) = self.registry.save(&self.token) {
            tracing::warn!(error = %err, "registry save failed; rebuild it from the ledger");
        }
        if let (Some(sink), Some(record)) = (&self.sink, &notify) {
            sink.reevaluation_started(record);
        }

        tracing::info!(kernel = %kernel_id, sequence, "operation applied");
        result
    }

    fn write_store(&mut self, write: StoreWrite) -> Result<Undo, KernelError> {
        match write {
            StoreWrite::Request(request) => {
                let previous = self.store.get_request(&request.request_id)?;
                self.store.put_request(&request)?;
                Ok(Undo::Request {
                    id: request.request_id,
                    previous,
                })
            }
            StoreWrite::Reevaluation(record) => {
                let previous = self.store.get_reevaluation(&record.reevaluation_id)?;
                self.store.put_reevaluation(&record)?;
                Ok(Undo::Reevaluation {
                    id: record.reevaluation_id,
                    previous,
                })
            }
        }
    }

    fn undo_store(&mut self, undo: Vec<Undo>) {
        for entry in undo.into_iter().rev() {
            let outcome = match &entry {
                Undo::Request {
                    previous: Some(request),
                    ..
                } => self.store.put_request(request),
                Undo::Request { id, previous: None } => self.store.remove_request(id),
                Undo::Reevaluation {
                    previous: Some(record),
                    ..
                } => self.store.put_reevaluation(record),
                Undo::Reevaluation { id, previous: None } => self.store.remove_reevaluation(id),
            };
            if let Err(e) = outcome {
                tracing::error!(error = %e, undo = ?entry, "governance store rollback failed");
            }
        }
    }

    fn operation(&self, actor: &Actor, payload: OperationPayload) -> Operation {
        let mut op = Operation::new(&actor.name, &actor.issue, self.clock.now(), payload);
        op.actor_role = actor.role.clone();
        op
    }

    // =========================================================================
    // COORDINATOR
    // =========================================================================

    pub fn request_transition(&mut self, actor: &Actor, request: RequestTransition) -> OperationResult {
        let op = self.operation(actor, OperationPayload::RequestMaturityTransition(request));
        self.apply(op)
    }

    pub fn approve_transition(
        &mut self,
        actor: &Actor,
        kernel_id: &str,
        request_id: &str,
    ) -> OperationResult {
        let payload = OperationPayload::ApproveMaturityTransition(ApproveTransition {
            kernel_id: kernel_id.to_string(),
            request_id: request_id.to_string(),
        });
        let op = self.operation(actor, payload);
        self.apply(op)
    }

    pub fn reject_transition(
        &mut self,
        actor: &Actor,
        kernel_id: &str,
        request_id: &str,
        reason: &str,
    ) -> OperationResult {
        let payload = OperationPayload::RejectMaturityTransition(RejectTransition {
            kernel_id: kernel_id.to_string(),
            request_id: request_id.to_string(),
            reason: reason.to_string(),
        });
        let op = self.operation(actor, payload);
        self.apply(op)
    }

    pub fn commit_transition(
        &mut self,
        actor: &Actor,
        kernel_id: &str,
        request_id: &str,
        gate_checks: BTreeMap<String, bool>,
    ) -> OperationResult {
        let payload = OperationPayload::CommitMaturityTransition(CommitTransition {
            kernel_id: kernel_id.to_string(),
            request_id: request_id.to_string(),
            gate_checks,
        });
        let op = self.operation(actor, payload);
        self.apply(op)
    }

    /// Transition requests, optionally for one kernel.
    pub fn transition_requests(
        &self,
        kernel_id: Option<&str>,
    ) -> Result<Vec<MaturityTransitionRequest>, KernelError> {
        match kernel_id {
            Some(id) => self.store.requests_for(id),
            None => self.store.list_requests(),
        }
    }

    // =========================================================================
    // REEVALUATION
    // =========================================================================

    pub fn start_reevaluation(
        &mut self,
        actor: &Actor,
        kernel_id: &str,
        trigger_type: &str,
        entity_id: Option<&str>,
    ) -> OperationResult {
        let payload = OperationPayload::StartReevaluation(StartReevaluation {
            kernel_id: kernel_id.to_string(),
            trigger_type: trigger_type.to_string(),
            entity_id: entity_id.map(str::to_string),
        });
        let op = self.operation(actor, payload);
        self.apply(op)
    }

    pub fn complete_reevaluation(
        &mut self,
        actor: &Actor,
        kernel_id: &str,
        reevaluation_id: &str,
        outcome: &str,
    ) -> OperationResult {
        let payload = OperationPayload::CompleteReevaluation(CompleteReevaluation {
            kernel_id: kernel_id.to_string(),
            reevaluation_id: reevaluation_id.to_string(),
            outcome: outcome.to_string(),
        });
        let op = self.operation(actor, payload);
        self.apply(op)
    }

    pub fn reevaluations(&self, kernel_id: Option<&str>) -> Result<Vec<ReevaluationRecord>, KernelError> {
        Ok(self
            .store
            .list_reevaluations()?
            .into_iter()
            .filter(|r| kernel_id.is_none_or(|id| r.kernel_id == id))
            .collect())
    }

    // =========================================================================
    // EVIDENCE REVIEW
    // =========================================================================

    /// Record a reviewer's verdict on a linked evidence item.
    ///
    /// The reviewer passes the issue and authority gates like a maturity
    /// change. The verdict is stored with its issue and role, and the
    /// Registry overlays it: statistics and [`Registry::evidence_status`]
    /// report the reviewed status. The Kernel and the Ledger are not
    /// modified.
    pub fn review_evidence(
        &mut self,
        reviewer: &Actor,
        kernel_id: &str,
        evidence_id: &str,
        status: VerificationStatus,
        note: Option<&str>,
    ) -> Result<EvidenceReview, KernelError> {
        if reviewer.name.trim().is_empty() {
            return Err(KernelError::Validation("reviewer must not be empty".to_string()));
        }
        let mut report = GateReport::new();
        if let Err(err) = self.gates.review_preflight(
            &reviewer.name,
            reviewer.role.as_deref(),
            &reviewer.issue,
            &mut report,
        ) {
            tracing::warn!(
                kernel = kernel_id,
                evidence = evidence_id,
                reviewer = %reviewer.name,
                error = %err,
                "evidence review rejected"
            );
            return Err(err);
        }
        let kernel = require(self.registry.kernel(kernel_id), kernel_id)?;
        if kernel.evidence_item(evidence_id).is_none() {
            return Err(KernelError::NotFound(format!(
                "evidence {} on kernel {}",
                evidence_id, kernel_id
            )));
        }
        let review = EvidenceReview {
            kernel_id: kernel_id.to_string(),
            evidence_id: evidence_id.to_string(),
            reviewer: reviewer.name.clone(),
            reviewer_role: reviewer.role.clone(),
            issue: reviewer.issue.clone(),
            status,
            reviewed_at: self.clock.now(),
            note: note.map(str::to_string),
        };
        self.store.put_review(&review)?;
        self.registry
            .record_review(&self.token, kernel_id, evidence_id, status);
        if let Err(err) = self.registry.save(&self.token) {
            tracing::warn!(error = %err, "registry save failed; reopen to resync reviews");
        }
        tracing::info!(
            kernel = kernel_id,
            evidence = evidence_id,
            issue = %review.issue,
            ?status,
            "evidence reviewed"
        );
        Ok(review)
    }

    /// Effective status of one evidence item (see [`Registry::evidence_status`]).
    pub fn evidence_status(
        &self,
        kernel_id: &str,
        evidence_id: &str,
    ) -> Result<VerificationStatus, KernelError> {
        self.registry
            .evidence_status(kernel_id, evidence_id)
            .ok_or_else(|| {
                KernelError::NotFound(format!("evidence {} on kernel {}", evidence_id, kernel_id))
            })
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    pub fn replay(&self, kernel_id: Option<&str>) -> Result<BTreeMap<String, Kernel>, KernelError> {
        self.ledger.replay(kernel_id)
    }

    #[must_use]
    pub fn search_kernels(&self, criteria: &SearchCriteria) -> Vec<&Kernel> {
        self.registry.search_kernels(criteria)
    }

    pub fn validate_nrvv(&self, kernel_id: &str) -> Result<NrvvReport, KernelError> {
        self.registry.validate_nrvv(kernel_id)
    }

    /// Compare the live Registry with a fresh replay.
    pub fn verify_consistency(&self) -> Result<ConsistencyReport, KernelError> {
        let replayed = self.ledger.replay(None)?;
        let live = self.registry.kernels();
        let ids: BTreeSet<&String> = replayed.keys().chain(live.keys()).collect();
        let mismatched = ids
            .into_iter()
            .filter(|id| replayed.get(*id) != live.get(*id))
            .cloned()
            .collect();
        Ok(ConsistencyReport {
            ledger_entries: self.ledger.len(),
            registry_kernels: live.len(),
            replayed_kernels: replayed.len(),
            mismatched,
        })
    }

    /// Replace the live Registry with a replay of the Ledger and save it.
    /// Returns the number of kernels.
    pub fn rebuild_registry(&mut self) -> Result<usize, KernelError> {
        let replayed = self.ledger.replay(None)?;
        self.registry.replace_all(&self.token, replayed);
        let overlay = review_overlay(self.store.list_reviews()?);
        self.registry.replace_reviews(&self.token, overlay);
        self.registry.save(&self.token)?;
        tracing::info!(kernels = self.registry.len(), "registry rebuilt from ledger");
        Ok(self.registry.len())
    }
}

// =============================================================================
// TESTS
// =============================================================================
