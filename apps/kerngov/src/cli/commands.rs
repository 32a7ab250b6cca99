//! # CLI Command Implementations
//!
//! Every command loads the configuration first; the Runtime cannot be built
//! without it. Mutating commands go through `Runtime::apply` or
//! `Runtime::review_evidence`, never through the stores directly.

use kerngov_core::formats::{to_yaml, write_atomic};
use kerngov_core::{
    Actor, ChangeRecord, Config, KernelError, Ledger, Maturity, Operation, OperationResult, Runtime,
    RuntimeSettings, SearchCriteria, SystemClock, TracingSink, VerificationStatus,
    snapshot_checksum, snapshot_crypto_hash,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// =============================================================================
// FILE LIMITS
// =============================================================================

/// Maximum size of an operation or change document (16 MB).
const MAX_INPUT_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Configuration written by `init`. Relative paths resolve against the
/// directory holding the configuration file.
pub const DEFAULT_CONFIG: &str = r#"[kernel_runtime]
default_ledger_path = "kerngov/ledger.jsonl"
default_registry_path = "kerngov/registry.yaml"
governance_store_path = "kerngov/governance.redb"
ledger_format = "jsonl"
bootstrap_kernel_id = "KERNEL-0000"
solo_mode = true
dedup_window_hours = 24

[kernel_runtime.gates]
issue_required = true
bootstrap_protection = true
caller_checks = true
evidence_governance = true

[kernel_runtime.evidence_governance]
allowlisted_origins = ["human"]

[kernel_runtime.authority]
maturity_roles = ["owner", "governance"]

[kernel_runtime.transitions]
propose_only = ["under_review->agreed", "agreed->frozen"]
"#;

/// Canonicalize an input path and make sure it is a regular file of
/// acceptable size.
fn validate_file_path(path: &Path) -> Result<PathBuf, KernelError> {
    let canonical = path.canonicalize().map_err(|e| {
        KernelError::Persistence(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    let metadata = std::fs::metadata(&canonical)
        .map_err(|e| KernelError::Persistence(format!("Cannot read file metadata: {}", e)))?;
    if !metadata.is_file() {
        return Err(KernelError::Persistence(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }
    if metadata.len() > MAX_INPUT_FILE_SIZE {
        return Err(KernelError::Validation(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            MAX_INPUT_FILE_SIZE
        )));
    }
    Ok(canonical)
}

/// Resolve an output path against its canonical parent directory.
fn validate_output_path(path: &Path) -> Result<PathBuf, KernelError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let canonical_parent = parent.canonicalize().map_err(|e| {
        KernelError::Persistence(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;
    let filename = path
        .file_name()
        .ok_or_else(|| KernelError::Persistence("Output path has no filename".to_string()))?;
    Ok(canonical_parent.join(filename))
}

fn read_input(path: &Path) -> Result<String, KernelError> {
    let validated = validate_file_path(path)?;
    std::fs::read_to_string(&validated)
        .map_err(|e| KernelError::Persistence(format!("Read {}: {}", validated.display(), e)))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), KernelError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| KernelError::Persistence(format!("Encode output: {}", e)))?;
    println!("{}", text);
    Ok(())
}

// =============================================================================
// RUNTIME LOADING
// =============================================================================

/// Load settings, resolving relative store paths against the directory of
/// the configuration file.
pub fn load_settings(config_path: &Path) -> Result<RuntimeSettings, KernelError> {
    let config = Config::load(config_path)?;
    let mut settings = RuntimeSettings::from_config(&config)?;

    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    for path in [
        &mut settings.ledger_path,
        &mut settings.registry_path,
        &mut settings.governance_store_path,
    ] {
        if path.is_relative() {
            *path = base.join(&*path);
        }
    }
    Ok(settings)
}

/// Open the file-backed Runtime described by the configuration.
pub fn open_runtime(config_path: &Path) -> Result<Runtime, KernelError> {
    let settings = load_settings(config_path)?;
    Ok(Runtime::open(settings, Arc::new(SystemClock))?.with_sink(Arc::new(TracingSink)))
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Write the default configuration and create empty stores.
pub fn cmd_init(config_path: &Path, force: bool) -> Result<(), KernelError> {
    if config_path.exists() && !force {
        return Err(KernelError::Config(format!(
            "Configuration '{}' already exists. Use --force to overwrite.",
            config_path.display()
        )));
    }
    write_atomic(config_path, DEFAULT_CONFIG.as_bytes())?;

    let mut runtime = open_runtime(config_path)?;
    let kernels = runtime.rebuild_registry()?;

    println!("Initialized kerngov at {}", config_path.display());
    println!("  Ledger:   {}", runtime.settings().ledger_path.display());
    println!("  Registry: {} ({} kernels)", runtime.settings().registry_path.display(), kernels);
    println!("  Store:    {}", runtime.settings().governance_store_path.display());
    Ok(())
}

// =============================================================================
// APPLY COMMAND
// =============================================================================

/// Parse a document holding one operation or an array of them.
pub fn parse_operations(text: &str) -> Result<Vec<Operation>, KernelError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| KernelError::Validation(format!("malformed operation document: {}", e)))?;
    let items = match value {
        serde_json::Value::Array(items) => items,
        single => vec![single],
    };
    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item)
                .map_err(|e| KernelError::Validation(format!("malformed operation: {}", e)))
        })
        .collect()
}

fn print_result(op: &Operation, result: &OperationResult) {
    if result.success {
        let marker = if result.details.dry_run { "dry-run ok" } else { "ok" };
        println!("{:<10} {} {} {}", marker, result.op_id, op.kind(), op.kernel_id());
    } else {
        println!(
            "{:<10} {} {} {}: {}",
            "FAILED",
            result.op_id,
            op.kind(),
            op.kernel_id(),
            result.error_message().unwrap_or("unknown error")
        );
    }
    for check in &result.details.gate_checks {
        let flag = if check.passed { "pass" } else { "FAIL" };
        println!("           [{}] {}: {}", flag, check.check_id, check.message);
    }
}

/// Apply operations in order, stopping at the first failure.
pub fn cmd_apply(
    config_path: &Path,
    json_mode: bool,
    file: &Path,
    dry_run: bool,
) -> Result<(), KernelError> {
    let operations = parse_operations(&read_input(file)?)?;
    let mut runtime = open_runtime(config_path)?;
    tracing::info!(count = operations.len(), dry_run, "applying operations from {:?}", file);

    let mut results = Vec::with_capacity(operations.len());
    let mut failed = None;
    for op in operations {
        let result = if dry_run {
            runtime.dry_run(&op)
        } else {
            runtime.apply(op.clone())
        };
        if !json_mode {
            print_result(&op, &result);
        }
        let success = result.success;
        results.push(result);
        if !success {
            failed = Some(op.op_id);
            break;
        }
    }

    if json_mode {
        print_json(&results)?;
    }
    match failed {
        Some(op_id) => Err(KernelError::Validation(format!(
            "operation {} failed; {} applied before it",
            op_id,
            results.len() - 1
        ))),
        None => Ok(()),
    }
}

// =============================================================================
// CHANGE COMMAND
// =============================================================================

/// Execute a change record and write its step results back.
pub fn cmd_change(config_path: &Path, json_mode: bool, file: &Path) -> Result<(), KernelError> {
    let validated = validate_file_path(file)?;
    let mut change = ChangeRecord::from_json(&read_input(&validated)?)?;
    let mut runtime = open_runtime(config_path)?;

    let summary = change.execute(&mut runtime);
    let text = serde_json::to_string_pretty(&change)
        .map_err(|e| KernelError::Persistence(format!("Encode change record: {}", e)))?;
    write_atomic(&validated, text.as_bytes())?;

    if json_mode {
        print_json(&serde_json::json!({
            "change_id": change.change_id,
            "executed": change.executed,
            "applied": summary.applied,
            "skipped": summary.skipped,
            "failed": summary.failed,
            "step_results": change.step_results,
        }))?;
    } else {
        println!("Change {}", change.change_id);
        println!("  Applied: {}", summary.applied);
        println!("  Skipped: {}", summary.skipped);
        for step in change.step_results.iter().filter(|s| !s.success) {
            println!(
                "  Failed:  {} ({})",
                step.op_id,
                step.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    match summary.failed {
        Some(op_id) => Err(KernelError::Validation(format!(
            "change {} stopped at step {}; re-run to retry",
            change.change_id, op_id
        ))),
        None => Ok(()),
    }
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show ledger and registry status.
pub fn cmd_status(config_path: &Path, json_mode: bool) -> Result<(), KernelError> {
    let runtime = open_runtime(config_path)?;
    let stats = runtime.registry().statistics();
    let checksum = snapshot_checksum(runtime.registry().kernels())?;
    let hash = snapshot_crypto_hash(runtime.registry().kernels())?;
    let requests = runtime.transition_requests(None)?;
    let open_requests = requests.iter().filter(|r| !r.status.is_closed()).count();
    let blocked = runtime
        .registry()
        .kernels()
        .values()
        .filter(|k| k.has_blocking_exception())
        .count();

    if json_mode {
        return print_json(&serde_json::json!({
            "ledger": runtime.settings().ledger_path.display().to_string(),
            "ledger_entries": runtime.ledger().len(),
            "registry": runtime.settings().registry_path.display().to_string(),
            "statistics": stats,
            "blocked_kernels": blocked,
            "open_transition_requests": open_requests,
            "checksum": format!("{:016x}", checksum),
            "blake3": hash,
        }));
    }

    println!("kerngov Status");
    println!("==============");
    println!("Ledger:   {}", runtime.settings().ledger_path.display());
    println!("Registry: {}", runtime.settings().registry_path.display());
    println!();
    println!("Ledger entries:      {}", runtime.ledger().len());
    println!("Kernels:             {}", stats.total_kernels);
    for (maturity, count) in &stats.by_maturity {
        println!("  {:<18} {}", maturity, count);
    }
    println!("Open exceptions:     {}", stats.open_exceptions);
    println!("Blocked kernels:     {}", blocked);
    println!(
        "Evidence:            {} ({} unverified)",
        stats.evidence_items, stats.unverified_evidence
    );
    println!(
        "Converged:           {} ({}%)",
        stats.converged_kernels, stats.convergence_percent
    );
    println!("Open requests:       {}", open_requests);
    println!("Checksum:            {:016x}", checksum);
    println!("BLAKE3:              {}", hash);
    Ok(())
}

// =============================================================================
// KERNEL COMMANDS
// =============================================================================

/// Print one kernel.
pub fn cmd_show(config_path: &Path, json_mode: bool, kernel_id: &str) -> Result<(), KernelError> {
    let runtime = open_runtime(config_path)?;
    // Evidence is shown with review verdicts applied.
    let kernel = runtime
        .registry()
        .effective_kernel(kernel_id)
        .ok_or_else(|| KernelError::NotFound(format!("kernel {}", kernel_id)))?;
    if json_mode {
        return print_json(&kernel);
    }
    print!("{}", to_yaml(&kernel)?);
    Ok(())
}

/// Replay the ledger and print the result with its checksum.
pub fn cmd_replay(
    config_path: &Path,
    json_mode: bool,
    kernel: Option<&str>,
) -> Result<(), KernelError> {
    let settings = load_settings(config_path)?;
    let ledger = Ledger::open(&settings.ledger_path, settings.ledger_format)?;
    let kernels = ledger.replay(kernel)?;
    let checksum = snapshot_checksum(&kernels)?;

    if json_mode {
        return print_json(&serde_json::json!({
            "entries": ledger.len(),
            "checksum": format!("{:016x}", checksum),
            "kernels": kernels,
        }));
    }
    print!("{}", to_yaml(&kernels)?);
    println!("# {} entries, {} kernels, checksum {:016x}", ledger.len(), kernels.len(), checksum);
    Ok(())
}

/// NRVV validation of one kernel.
pub fn cmd_validate(config_path: &Path, json_mode: bool, kernel_id: &str) -> Result<(), KernelError> {
    let runtime = open_runtime(config_path)?;
    let report = runtime.validate_nrvv(kernel_id)?;
    let evidence: BTreeMap<String, VerificationStatus> = runtime
        .registry()
        .effective_kernel(kernel_id)
        .map(|k| {
            k.evidence
                .into_iter()
                .map(|e| (e.id, e.verification_status))
                .collect()
        })
        .unwrap_or_default();
    if json_mode {
        return print_json(&serde_json::json!({
            "nrvv": report,
            "evidence_status": evidence,
        }));
    }

    println!("NRVV report for {}", report.kernel_id);
    println!("  Valid:                  {}", report.is_valid);
    println!("  Traceability complete:  {}", report.traceability_complete);
    for link in &report.missing_links {
        println!("  - {}", link);
    }
    for (id, status) in &evidence {
        println!("  Evidence {}: {}", id, status.as_str());
    }
    Ok(())
}

/// Search kernels.
pub fn cmd_search(
    config_path: &Path,
    json_mode: bool,
    maturity: Option<String>,
    category: Option<String>,
    owner: Option<String>,
    tag: Option<String>,
    text: Option<String>,
) -> Result<(), KernelError> {
    let mut criteria = SearchCriteria::new();
    if let Some(m) = maturity {
        criteria = criteria.maturity(m.parse::<Maturity>()?);
    }
    if let Some(c) = category {
        criteria = criteria.category(c);
    }
    if let Some(o) = owner {
        criteria = criteria.owner(o);
    }
    if let Some(t) = tag {
        criteria = criteria.tag(t);
    }
    if let Some(t) = text {
        criteria = criteria.text(t);
    }

    let runtime = open_runtime(config_path)?;
    let hits = runtime.search_kernels(&criteria);
    if json_mode {
        return print_json(&hits);
    }
    if hits.is_empty() {
        println!("No kernels match");
    }
    for kernel in hits {
        println!("{:<16} {:<14} {}", kernel.id, kernel.maturity, kernel.statement);
    }
    Ok(())
}

// =============================================================================
// GOVERNANCE COMMANDS
// =============================================================================

/// List transition requests.
pub fn cmd_transitions(
    config_path: &Path,
    json_mode: bool,
    kernel: Option<&str>,
) -> Result<(), KernelError> {
    let runtime = open_runtime(config_path)?;
    let requests = runtime.transition_requests(kernel)?;
    if json_mode {
        return print_json(&requests);
    }
    if requests.is_empty() {
        println!("No transition requests");
    }
    for r in &requests {
        println!(
            "{} {} {} -> {} [{}] approvals {}/{}",
            r.request_id,
            r.kernel_id,
            r.from,
            r.to,
            r.status,
            r.approved_roles().len(),
            r.required_approver_roles.len()
        );
    }
    Ok(())
}

/// List reevaluation records.
pub fn cmd_reevaluations(
    config_path: &Path,
    json_mode: bool,
    kernel: Option<&str>,
) -> Result<(), KernelError> {
    let runtime = open_runtime(config_path)?;
    let records = runtime.reevaluations(kernel)?;
    if json_mode {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No reevaluations");
    }
    for r in &records {
        println!(
            "{} {} {} ({:?}) triggered {}",
            r.reevaluation_id, r.kernel_id, r.dedupe_key, r.status, r.triggered_at
        );
    }
    Ok(())
}

/// Record an evidence review.
pub fn cmd_review_evidence(
    config_path: &Path,
    json_mode: bool,
    kernel_id: &str,
    evidence_id: &str,
    status: &str,
    reviewer: &Actor,
    note: Option<&str>,
) -> Result<(), KernelError> {
    let status = status.parse::<VerificationStatus>()?;
    let mut runtime = open_runtime(config_path)?;
    let review = runtime.review_evidence(reviewer, kernel_id, evidence_id, status, note)?;
    if json_mode {
        return print_json(&review);
    }
    println!(
        "Evidence {} on {} marked {} by {} ({})",
        review.evidence_id,
        review.kernel_id,
        review.status.as_str(),
        review.reviewer,
        review.issue
    );
    Ok(())
}

// =============================================================================
// CONSISTENCY COMMANDS
// =============================================================================

/// Compare the registry with a replay of the ledger.
pub fn cmd_verify(config_path: &Path, json_mode: bool) -> Result<(), KernelError> {
    let runtime = open_runtime(config_path)?;
    let report = runtime.verify_consistency()?;

    if json_mode {
        print_json(&serde_json::json!({
            "consistent": report.is_consistent(),
            "ledger_entries": report.ledger_entries,
            "registry_kernels": report.registry_kernels,
            "replayed_kernels": report.replayed_kernels,
            "mismatched": report.mismatched,
        }))?;
    } else {
        println!("Ledger entries:   {}", report.ledger_entries);
        println!("Registry kernels: {}", report.registry_kernels);
        println!("Replayed kernels: {}", report.replayed_kernels);
        println!(
            "Consistent:       {}",
            if report.is_consistent() { "yes" } else { "NO" }
        );
    }

    if report.is_consistent() {
        Ok(())
    } else {
        Err(KernelError::Persistence(format!(
            "registry diverges from ledger for: {}",
            report.mismatched.join(", ")
        )))
    }
}

/// Overwrite the registry with a replay of the ledger.
pub fn cmd_rebuild_registry(config_path: &Path) -> Result<(), KernelError> {
    let mut runtime = open_runtime(config_path)?;
    let kernels = runtime.rebuild_registry()?;
    println!(
        "Rebuilt {} from {} ledger entries ({} kernels)",
        runtime.settings().registry_path.display(),
        runtime.ledger().len(),
        kernels
    );
    Ok(())
}

/// Write a registry document built purely from the ledger.
pub fn cmd_export_registry(config_path: &Path, output: &Path) -> Result<(), KernelError> {
    let settings = load_settings(config_path)?;
    let ledger = Ledger::open(&settings.ledger_path, settings.ledger_format)?;
    let registry = ledger.export_to_registry()?;
    let output = validate_output_path(output)?;
    write_atomic(&output, registry.to_yaml_string()?.as_bytes())?;
    println!("Exported {} kernels to {}", registry.len(), output.display());
    Ok(())
}
