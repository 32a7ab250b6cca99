//! # Configuration
//!
//! Read-only dotted-path lookup over a TOML document, plus the typed
//! [`RuntimeSettings`] derived from it.
//!
//! Configuration is loaded once at process start. A [`crate::Runtime`] can
//! only be constructed from `RuntimeSettings`, so "config is loaded before
//! the Runtime exists" holds by construction.
//!
//! ```toml
//! [kernel_runtime]
//! default_ledger_path = "data/ledger.jsonl"
//! bootstrap_kernel_id = "KERNEL-0000"
//! solo_mode = true
//!
//! [kernel_runtime.gates]
//! evidence_governance = true
//! ```

use crate::primitives;
use crate::{KernelError, Maturity};
use chrono::TimeDelta;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Root table every configuration document must carry.
pub const ROOT_TABLE: &str = "kernel_runtime";

// =============================================================================
// RAW CONFIG (dotted-path lookup)
// =============================================================================

/// A parsed configuration document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    root: toml::Table,
}

impl Config {
    /// Parse configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, KernelError> {
        let root: toml::Table = toml::from_str(text)
            .map_err(|e| KernelError::Config(format!("invalid TOML: {}", e)))?;
        Ok(Self { root })
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KernelError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            KernelError::Config(format!("cannot read config '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Look up a value by dotted path, e.g. `kernel_runtime.gates.issue_required`.
    #[must_use]
    pub fn get(&self, dotted: &str) -> Option<&toml::Value> {
        let mut parts = dotted.split('.');
        let first = parts.next()?;
        let mut current = self.root.get(first)?;
        for part in parts {
            current = current.as_table()?.get(part)?;
        }
        Some(current)
    }

    /// Whether a key exists.
    #[must_use]
    pub fn contains(&self, dotted: &str) -> bool {
        self.get(dotted).is_some()
    }

    /// String value at `dotted`. A value of another type is an error.
    pub fn get_str(&self, dotted: &str) -> Result<Option<&str>, KernelError> {
        match self.get(dotted) {
            None => Ok(None),
            Some(v) => v
                .as_str()
                .map(Some)
                .ok_or_else(|| type_error(dotted, "a string")),
        }
    }

    /// Boolean value at `dotted`.
    pub fn get_bool(&self, dotted: &str) -> Result<Option<bool>, KernelError> {
        match self.get(dotted) {
            None => Ok(None),
            Some(v) => v
                .as_bool()
                .map(Some)
                .ok_or_else(|| type_error(dotted, "a boolean")),
        }
    }

    /// Integer value at `dotted`.
    pub fn get_int(&self, dotted: &str) -> Result<Option<i64>, KernelError> {
        match self.get(dotted) {
            None => Ok(None),
            Some(v) => v
                .as_integer()
                .map(Some)
                .ok_or_else(|| type_error(dotted, "an integer")),
        }
    }

    /// Array of strings at `dotted`.
    pub fn get_str_list(&self, dotted: &str) -> Result<Option<Vec<String>>, KernelError> {
        let Some(value) = self.get(dotted) else {
            return Ok(None);
        };
        let items = value
            .as_array()
            .ok_or_else(|| type_error(dotted, "an array of strings"))?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| type_error(dotted, "an array of strings"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}

fn type_error(key: &str, expected: &str) -> KernelError {
    KernelError::Config(format!("'{}' must be {}", key, expected))
}

// =============================================================================
// TYPED SETTINGS
// =============================================================================

/// On-disk layout of the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerFormat {
    /// One JSON entry per line (default).
    Jsonl,
    /// A single YAML document with an `entries` list.
    Yaml,
}

impl LedgerFormat {
    pub fn parse(s: &str) -> Result<Self, KernelError> {
        match s.trim() {
            "jsonl" | "ndjson" => Ok(Self::Jsonl),
            "yaml" | "yml" => Ok(Self::Yaml),
            other => Err(KernelError::Config(format!(
                "unknown ledger format '{}' (expected jsonl or yaml)",
                other
            ))),
        }
    }
}

/// Independent gate toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateToggles {
    pub issue_required: bool,
    pub bootstrap_protection: bool,
    pub caller_checks: bool,
    pub evidence_governance: bool,
}

/// Typed runtime settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    pub ledger_path: PathBuf,
    pub registry_path: PathBuf,
    pub governance_store_path: PathBuf,
    pub ledger_format: LedgerFormat,
    pub bootstrap_kernel_id: String,
    /// Skip authority checks. Same pipeline, different policy data.
    pub solo_mode: bool,
    pub dedup_window: TimeDelta,
    pub gates: GateToggles,
    pub allowlisted_origins: BTreeSet<String>,
    pub maturity_roles: BTreeSet<String>,
    pub propose_only: BTreeSet<(Maturity, Maturity)>,
}

impl RuntimeSettings {
    /// Derive settings from a loaded configuration.
    ///
    /// Fails fast when the `[kernel_runtime]` table is missing or a present
    /// key has the wrong type.
    pub fn from_config(config: &Config) -> Result<Self, KernelError> {
        if config.get(ROOT_TABLE).and_then(|v| v.as_table()).is_none() {
            return Err(KernelError::Config(format!(
                "missing [{}] table; configuration must be loaded before the runtime is built",
                ROOT_TABLE
            )));
        }

        let key = |suffix: &str| format!("{}.{}", ROOT_TABLE, suffix);
        let path_or = |suffix: &str, default: &str| -> Result<PathBuf, KernelError> {
            Ok(PathBuf::from(
                config.get_str(&key(suffix))?.unwrap_or(default),
            ))
        };
        let flag_or = |suffix: &str, default: bool| -> Result<bool, KernelError> {
            Ok(config.get_bool(&key(suffix))?.unwrap_or(default))
        };
        let set_or = |suffix: &str, default: &[&str]| -> Result<BTreeSet<String>, KernelError> {
            Ok(match config.get_str_list(&key(suffix))? {
                Some(list) => list.into_iter().collect(),
                None => default.iter().map(|s| (*s).to_string()).collect(),
            })
        };

        let ledger_format = match config.get_str(&key("ledger_format"))? {
            Some(s) => LedgerFormat::parse(s)?,
            None => LedgerFormat::Jsonl,
        };

        let window_hours = config
            .get_int(&key("dedup_window_hours"))?
            .unwrap_or(primitives::DEDUP_WINDOW_HOURS);
        let dedup_window = TimeDelta::try_hours(window_hours)
            .filter(|_| window_hours > 0)
            .ok_or_else(|| {
                KernelError::Config(format!(
                    "'{}' must be a positive number of hours, got {}",
                    key("dedup_window_hours"),
                    window_hours
                ))
            })?;

        let edges = set_or(
            "transitions.propose_only",
            primitives::DEFAULT_PROPOSE_ONLY_EDGES,
        )?;
        let propose_only = edges
            .iter()
            .map(|edge| parse_edge(edge))
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(Self {
            ledger_path: path_or("default_ledger_path", primitives::DEFAULT_LEDGER_PATH)?,
            registry_path: path_or("default_registry_path", primitives::DEFAULT_REGISTRY_PATH)?,
            governance_store_path: path_or(
                "governance_store_path",
                primitives::DEFAULT_GOVERNANCE_STORE_PATH,
            )?,
            ledger_format,
            bootstrap_kernel_id: config
                .get_str(&key("bootstrap_kernel_id"))?
                .unwrap_or(primitives::DEFAULT_BOOTSTRAP_KERNEL_ID)
                .to_string(),
            solo_mode: flag_or("solo_mode", true)?,
            dedup_window,
            gates: GateToggles {
                issue_required: flag_or("gates.issue_required", true)?,
                bootstrap_protection: flag_or("gates.bootstrap_protection", true)?,
                caller_checks: flag_or("gates.caller_checks", true)?,
                evidence_governance: flag_or("gates.evidence_governance", true)?,
            },
            allowlisted_origins: set_or(
                "evidence_governance.allowlisted_origins",
                primitives::DEFAULT_ALLOWLISTED_ORIGINS,
            )?,
            maturity_roles: set_or("authority.maturity_roles", primitives::DEFAULT_MATURITY_ROLES)?,
            propose_only,
        })
    }

    /// Parse and derive in one step.
    pub fn from_toml_str(text: &str) -> Result<Self, KernelError> {
        Self::from_config(&Config::from_toml_str(text)?)
    }
}

/// Parse an edge written as `from->to`.
pub fn parse_edge(edge: &str) -> Result<(Maturity, Maturity), KernelError> {
    let (from, to) = edge
        .split_once("->")
        .ok_or_else(|| KernelError::Config(format!("edge '{}' must look like from->to", edge)))?;
    let parse = |s: &str| {
        s.parse::<Maturity>()
            .map_err(|e| KernelError::Config(format!("edge '{}': {}", edge, e)))
    };
    Ok((parse(from)?, parse(to)?))
}

// =============================================================================
// TESTS
// =============================================================================
