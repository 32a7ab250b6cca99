//! # Registry
//!
//! The current-state projection: every Kernel by id, plus indices and
//! statistics recomputed from the kernel map on every mutation.
//!
//! Persisted as one YAML document:
//!
//! ```yaml
//! meta:        { format: kerngov-registry, version: 1, kernel_count: 2, updated_at: ... }
//! kernels:     { K1: {...}, K2: {...} }
//! indices:     { by_maturity: {...}, by_category: {...}, by_owner: {...}, by_tag: {...} }
//! statistics:  { total_kernels: 2, convergence_percent: 50, ... }
//! reviews:     { K1: { E1: verified } }   # only when verdicts exist
//! ```
//!
//! `reviews` is the overlay of evidence review verdicts from the governance
//! store. Statistics and [`Registry::evidence_status`] read evidence through
//! it; the kernels themselves stay exactly what the ledger replays to.
//!
//! Mutators take a [`WriteToken`], which only the Runtime can mint.

mod nrvv;

pub use nrvv::{NrvvReport, is_converged, validate as validate_kernel};

use crate::formats;
use crate::primitives::{REGISTRY_FORMAT, REGISTRY_VERSION};
use crate::runtime::WriteToken;
use crate::{Kernel, KernelError, Maturity, VerificationStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// =============================================================================
// DOCUMENT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryMeta {
    pub format: String,
    pub version: u32,
    pub kernel_count: usize,
    /// Latest `updated_at` across all kernels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Kernel ids grouped by attribute. Lists are sorted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegistryIndices {
    pub by_maturity: BTreeMap<String, Vec<String>>,
    pub by_category: BTreeMap<String, Vec<String>>,
    pub by_owner: BTreeMap<String, Vec<String>>,
    pub by_tag: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegistryStatistics {
    pub total_kernels: usize,
    pub by_maturity: BTreeMap<String, usize>,
    pub open_exceptions: usize,
    pub evidence_items: usize,
    /// Evidence whose effective status is not `verified`.
    pub unverified_evidence: usize,
    pub converged_kernels: usize,
    /// Integer percentage of kernels that are converged, rounded down.
    pub convergence_percent: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryDocument {
    pub meta: RegistryMeta,
    pub kernels: BTreeMap<String, Kernel>,
    #[serde(default)]
    pub indices: RegistryIndices,
    #[serde(default)]
    pub statistics: RegistryStatistics,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reviews: ReviewOverlay,
}

/// Latest review verdict per kernel id, then evidence id.
pub type ReviewOverlay = BTreeMap<String, BTreeMap<String, VerificationStatus>>;

// =============================================================================
// SEARCH
// =============================================================================

/// Conjunctive search filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchCriteria {
    pub maturity: Option<Maturity>,
    pub category: Option<String>,
    pub owner: Option<String>,
    pub tag: Option<String>,
    /// Case-insensitive substring of id or statement.
    pub text: Option<String>,
}

impl SearchCriteria {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn maturity(mut self, maturity: Maturity) -> Self {
        self.maturity = Some(maturity);
        self
    }

    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[must_use]
    pub fn matches(&self, kernel: &Kernel) -> bool {
        if self.maturity.is_some_and(|m| m != kernel.maturity) {
            return false;
        }
        if self.category.as_ref().is_some_and(|c| *c != kernel.category) {
            return false;
        }
        if self.owner.as_ref().is_some_and(|o| *o != kernel.owner) {
            return false;
        }
        if self.tag.as_ref().is_some_and(|t| !kernel.tags.contains(t)) {
            return false;
        }
        if let Some(text) = &self.text {
            let needle = text.to_lowercase();
            let hit = kernel.id.to_lowercase().contains(&needle)
                || kernel.statement.to_lowercase().contains(&needle);
            if !hit {
                return false;
            }
        }
        true
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Current-state projection of all Kernels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    kernels: BTreeMap<String, Kernel>,
    indices: RegistryIndices,
    statistics: RegistryStatistics,
    reviews: ReviewOverlay,
    path: Option<PathBuf>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::from_kernels(BTreeMap::new())
    }
}

impl Registry {
    /// An empty registry with no backing file.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a detached registry from a kernel map (used by replay export).
    #[must_use]
    pub fn from_kernels(kernels: BTreeMap<String, Kernel>) -> Self {
        let mut registry = Self {
            kernels,
            indices: RegistryIndices::default(),
            statistics: RegistryStatistics::default(),
            reviews: ReviewOverlay::new(),
            path: None,
        };
        registry.recompute();
        registry
    }

    /// Load the registry at `path`; a missing file yields an empty registry
    /// bound to that path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KernelError> {
        let path = path.as_ref();
        let mut registry = match formats::read_document(path)? {
            Some(text) => Self::from_yaml_str(&text)?,
            None => Self::new(),
        };
        registry.path = Some(path.to_path_buf());
        Ok(registry)
    }

    /// Parse a registry document. Indices and statistics are recomputed
    /// rather than trusted.
    pub fn from_yaml_str(text: &str) -> Result<Self, KernelError> {
        let doc: RegistryDocument = formats::from_yaml(text)?;
        if doc.meta.format != REGISTRY_FORMAT {
            return Err(KernelError::Persistence(format!(
                "not a registry document (format '{}')",
                doc.meta.format
            )));
        }
        if doc.meta.version != REGISTRY_VERSION {
            return Err(KernelError::Persistence(format!(
                "unsupported registry version {} (expected {})",
                doc.meta.version, REGISTRY_VERSION
            )));
        }
        for (key, kernel) in &doc.kernels {
            if *key != kernel.id {
                return Err(KernelError::Persistence(format!(
                    "registry key {} holds kernel {}",
                    key, kernel.id
                )));
            }
        }
        let mut registry = Self::from_kernels(doc.kernels);
        registry.reviews = doc.reviews;
        registry.recompute();
        Ok(registry)
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn kernel(&self, kernel_id: &str) -> Option<&Kernel> {
        self.kernels.get(kernel_id)
    }

    #[must_use]
    pub fn kernels(&self) -> &BTreeMap<String, Kernel> {
        &self.kernels
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    #[must_use]
    pub fn indices(&self) -> &RegistryIndices {
        &self.indices
    }

    #[must_use]
    pub fn statistics(&self) -> &RegistryStatistics {
        &self.statistics
    }

    #[must_use]
    pub fn reviews(&self) -> &ReviewOverlay {
        &self.reviews
    }

    /// Status of one evidence item: the latest review verdict if there is
    /// one, else the status recorded on the kernel. `None` when the kernel
    /// or the evidence item is unknown.
    #[must_use]
    pub fn evidence_status(&self, kernel_id: &str, evidence_id: &str) -> Option<VerificationStatus> {
        let evidence = self.kernels.get(kernel_id)?.evidence_item(evidence_id)?;
        Some(self.overlaid(kernel_id, evidence_id, evidence.verification_status))
    }

    /// A copy of the kernel with every evidence status overlaid by its
    /// review verdict.
    #[must_use]
    pub fn effective_kernel(&self, kernel_id: &str) -> Option<Kernel> {
        let mut kernel = self.kernels.get(kernel_id)?.clone();
        for evidence in &mut kernel.evidence {
            evidence.verification_status =
                self.overlaid(kernel_id, &evidence.id, evidence.verification_status);
        }
        Some(kernel)
    }

    fn overlaid(&self, kernel_id: &str, evidence_id: &str, recorded: VerificationStatus) -> VerificationStatus {
        self.reviews
            .get(kernel_id)
            .and_then(|verdicts| verdicts.get(evidence_id))
            .copied()
            .unwrap_or(recorded)
    }

    /// Insert or replace a kernel. Returns the previous value.
    pub fn upsert_kernel(&mut self, _token: &WriteToken, kernel: Kernel) -> Option<Kernel> {
        let previous = self.kernels.insert(kernel.id.clone(), kernel);
        self.recompute();
        previous
    }

    /// Put back the value `upsert_kernel` returned.
    pub fn restore_kernel(&mut self, _token: &WriteToken, kernel_id: &str, previous: Option<Kernel>) {
        match previous {
            Some(kernel) => {
                self.kernels.insert(kernel_id.to_string(), kernel);
            }
            None => {
                self.kernels.remove(kernel_id);
            }
        }
        self.recompute();
    }

    /// Replace every kernel (used when rebuilding from the ledger).
    pub fn replace_all(&mut self, _token: &WriteToken, kernels: BTreeMap<String, Kernel>) {
        self.kernels = kernels;
        self.recompute();
    }

    /// Overlay one review verdict.
    pub fn record_review(
        &mut self,
        _token: &WriteToken,
        kernel_id: &str,
        evidence_id: &str,
        status: VerificationStatus,
    ) {
        self.reviews
            .entry(kernel_id.to_string())
            .or_default()
            .insert(evidence_id.to_string(), status);
        self.recompute();
    }

    /// Replace the whole overlay (used when syncing with the governance
    /// store).
    pub fn replace_reviews(&mut self, _token: &WriteToken, reviews: ReviewOverlay) {
        self.reviews = reviews;
        self.recompute();
    }

    /// Write the document to the bound path. Detached registries do nothing.
    pub fn save(&self, _token: &WriteToken) -> Result<(), KernelError> {
        match &self.path {
            Some(path) => formats::write_atomic(path, self.to_yaml_string()?.as_bytes()),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn to_document(&self) -> RegistryDocument {
        RegistryDocument {
            meta: RegistryMeta {
                format: REGISTRY_FORMAT.to_string(),
                version: REGISTRY_VERSION,
                kernel_count: self.kernels.len(),
                updated_at: self.kernels.values().map(|k| k.updated_at).max(),
            },
            kernels: self.kernels.clone(),
            indices: self.indices.clone(),
            statistics: self.statistics.clone(),
            reviews: self.reviews.clone(),
        }
    }

    pub fn to_yaml_string(&self) -> Result<String, KernelError> {
        formats::to_yaml(&self.to_document())
    }

    /// Kernels matching every set criterion, in id order.
    #[must_use]
    pub fn search_kernels(&self, criteria: &SearchCriteria) -> Vec<&Kernel> {
        self.kernels.values().filter(|k| criteria.matches(k)).collect()
    }

    pub fn validate_nrvv(&self, kernel_id: &str) -> Result<NrvvReport, KernelError> {
        self.kernels
            .get(kernel_id)
            .map(nrvv::validate)
            .ok_or_else(|| KernelError::NotFound(format!("kernel {}", kernel_id)))
    }

    fn recompute(&mut self) {
        let mut indices = RegistryIndices::default();
        let mut stats = RegistryStatistics {
            total_kernels: self.kernels.len(),
            ..RegistryStatistics::default()
        };

        for kernel in self.kernels.values() {
            let id = kernel.id.clone();
            indices
                .by_maturity
                .entry(kernel.maturity.as_str().to_string())
                .or_default()
                .push(id.clone());
            indices
                .by_category
                .entry(kernel.category.clone())
                .or_default()
                .push(id.clone());
            indices
                .by_owner
                .entry(kernel.owner.clone())
                .or_default()
                .push(id.clone());
            for tag in &kernel.tags {
                let ids = indices.by_tag.entry(tag.clone()).or_default();
                if !ids.contains(&id) {
                    ids.push(id.clone());
                }
            }

            *stats
                .by_maturity
                .entry(kernel.maturity.as_str().to_string())
                .or_default() += 1;
            stats.open_exceptions += kernel.open_exception_count();
            stats.evidence_items += kernel.evidence.len();
            stats.unverified_evidence += kernel
                .evidence
                .iter()
                .filter(|e| {
                    self.overlaid(&kernel.id, &e.id, e.verification_status)
                        != VerificationStatus::Verified
                })
                .count();
            if nrvv::is_converged(kernel) {
                stats.converged_kernels += 1;
            }
        }

        stats.convergence_percent = stats
            .converged_kernels
            .saturating_mul(100)
            .checked_div(stats.total_kernels)
            .map(|p| p as u32)
            .unwrap_or(0);

        self.indices = indices;
        self.statistics = stats;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn kernel(id: &str, maturity: Maturity, category: &str, tags: &[&str]) -> Kernel {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("date");
        Kernel {
            id: id.to_string(),
            statement: format!("statement of {}", id),
            category: category.to_string(),
            owner: "alice".to_string(),
            maturity,
            needs: vec![],
            requirements: vec![],
            verification: vec![],
            validation: vec![],
            evidence: vec![],
            exceptions: vec![],
            decision: None,
            history: vec![],
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
            created_at: at,
            updated_at: at,
            approved_at: None,
            frozen_at: None,
        }
    }

    fn sample() -> Registry {
        let kernels = [
            kernel("K1", Maturity::Draft, "safety", &["core"]),
            kernel("K2", Maturity::Agreed, "safety", &[]),
            kernel("K3", Maturity::Draft, "ops", &["core", "ui"]),
        ]
        .into_iter()
        .map(|k| (k.id.clone(), k))
        .collect();
        Registry::from_kernels(kernels)
    }

    #[test]
    fn indices_group_ids() {
        let reg = sample();
        assert_eq!(reg.indices().by_maturity["draft"], vec!["K1", "K3"]);
        assert_eq!(reg.indices().by_category["safety"], vec!["K1", "K2"]);
        assert_eq!(reg.indices().by_tag["core"], vec!["K1", "K3"]);
        assert_eq!(reg.statistics().total_kernels, 3);
        assert_eq!(reg.statistics().by_maturity["agreed"], 1);
    }

    #[test]
    fn search_combines_criteria() {
        let reg = sample();
        let hits = reg.search_kernels(&SearchCriteria::new().category("safety").maturity(Maturity::Draft));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "K1");

        let hits = reg.search_kernels(&SearchCriteria::new().text("OF K3"));
        assert_eq!(hits.len(), 1);

        assert!(reg.search_kernels(&SearchCriteria::new().tag("missing")).is_empty());
        assert_eq!(reg.search_kernels(&SearchCriteria::new()).len(), 3);
    }

    #[test]
    fn yaml_document_roundtrips() {
        let reg = sample();
        let text = reg.to_yaml_string().expect("yaml");
        assert!(text.contains("meta:"));
        assert!(text.contains("statistics:"));
        let back = Registry::from_yaml_str(&text).expect("parse");
        assert_eq!(back.kernels(), reg.kernels());
        assert_eq!(back.statistics(), reg.statistics());
    }

    #[test]
    fn review_overlay_drives_effective_status() {
        let token = WriteToken::for_tests();
        let mut reg = sample();
        let mut k1 = reg.kernel("K1").expect("K1").clone();
        k1.evidence.push(crate::Evidence {
            id: "E1".to_string(),
            kind: "analysis".to_string(),
            reference: "docs/e1.md".to_string(),
            source_origin: Some("ai_generated".to_string()),
            verification_status: VerificationStatus::Unverified,
        });
        reg.upsert_kernel(&token, k1);
        assert_eq!(reg.statistics().unverified_evidence, 1);

        reg.record_review(&token, "K1", "E1", VerificationStatus::Verified);
        assert_eq!(reg.evidence_status("K1", "E1"), Some(VerificationStatus::Verified));
        assert_eq!(reg.statistics().unverified_evidence, 0);
        let effective = reg.effective_kernel("K1").expect("K1");
        assert_eq!(effective.evidence[0].verification_status, VerificationStatus::Verified);
        // The kernel itself keeps the recorded status.
        assert_eq!(
            reg.kernel("K1").expect("K1").evidence[0].verification_status,
            VerificationStatus::Unverified
        );
        assert_eq!(reg.evidence_status("K1", "E9"), None);

        let text = reg.to_yaml_string().expect("yaml");
        assert!(text.contains("reviews:"));
        let back = Registry::from_yaml_str(&text).expect("parse");
        assert_eq!(back.reviews(), reg.reviews());
        assert_eq!(back.statistics().unverified_evidence, 0);
    }

    #[test]
    fn foreign_document_rejected() {
        let text = "meta: {format: other, version: 1, kernel_count: 0}\nkernels: {}\n";
        assert!(matches!(
            Registry::from_yaml_str(text),
            Err(KernelError::Persistence(_))
        ));
    }

    #[test]
    fn validate_unknown_kernel_is_not_found() {
        assert!(matches!(
            sample().validate_nrvv("K9"),
            Err(KernelError::NotFound(_))
        ));
    }

    #[test]
    fn empty_registry_has_zero_convergence() {
        let reg = Registry::new();
        assert_eq!(reg.statistics().convergence_percent, 0);
        assert!(reg.is_empty());
    }
}
