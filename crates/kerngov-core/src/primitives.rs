//! # Fixed Primitives
//!
//! Hardcoded constants for the governance engine. Values that operators may
//! tune (paths, toggles, windows) live in configuration; these are the
//! defaults and format identifiers compiled into the binary.

/// Default deduplication window for reevaluation triggers, in hours.
///
/// Two triggers with the same dedupe key inside this window collapse into one
/// reevaluation record.
pub const DEDUP_WINDOW_HOURS: i64 = 24;

/// Format identifier written into the registry `meta` block.
pub const REGISTRY_FORMAT: &str = "kerngov-registry";

/// Current registry document version.
///
/// Increment this when making breaking changes to the registry layout.
pub const REGISTRY_VERSION: u32 = 1;

/// Current ledger entry schema version.
pub const LEDGER_SCHEMA_VERSION: u32 = 1;

/// Default location of the newline-delimited JSON ledger.
pub const DEFAULT_LEDGER_PATH: &str = "kerngov/ledger.jsonl";

/// Default location of the registry YAML document.
pub const DEFAULT_REGISTRY_PATH: &str = "kerngov/registry.yaml";

/// Default location of the redb governance store.
pub const DEFAULT_GOVERNANCE_STORE_PATH: &str = "kerngov/governance.redb";

/// Default id of the protected bootstrap kernel.
pub const DEFAULT_BOOTSTRAP_KERNEL_ID: &str = "KERNEL-0000";

/// Evidence origins that never need verification unless configured otherwise.
pub const DEFAULT_ALLOWLISTED_ORIGINS: &[&str] = &["human"];

/// Roles allowed to move maturity when authority checks are active.
pub const DEFAULT_MATURITY_ROLES: &[&str] = &["owner", "governance"];

/// Edges that may only be taken through a two-phase transition request.
pub const DEFAULT_PROPOSE_ONLY_EDGES: &[&str] = &["under_review->agreed", "agreed->frozen"];

/// Maximum length for free-text payload fields.
///
/// Longer values are rejected during structural validation.
pub const MAX_TEXT_LENGTH: usize = 65536;

/// Maximum length for identifiers (kernel ids, evidence ids, roles).
pub const MAX_ID_LENGTH: usize = 256;
