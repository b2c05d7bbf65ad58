//! Audit validation: structural provenance checks over derivatives.
//!
//! The validator compares fields and digests only. It never interprets the
//! meaning of a context value, so a single corruption per derivative is
//! always detected and an untouched derivative always passes.

use crate::derivative::{Derivative, FixityPolicy, Hop, ProvenanceDerivative, SealedDerivative};
use crate::fixity::ContentHash;
use crate::record::{MandatoryContext, Record};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

/// The first rule a derivative violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditRule {
    /// `generated_label` missing or empty.
    MissingDisclosureLabel,
    /// `generated_by` missing or empty.
    MissingGeneratedBy,
    /// `parent_sha256` missing.
    MissingParentLink,
    /// `parent_sha256` names nothing in the chain.
    OrphanParentLink,
    /// `parent_sha256` names a real parent, but not this derivative's own.
    ParentMismatch,
    /// Hop 2 does not resolve through its hop-1 parent to the source record.
    AncestorMismatch,
    /// A mandatory-context field is missing or differs from the parent.
    ContextMismatch,
    /// Stored digest differs from a recomputation of the content.
    FixityMismatch,
}

impl AuditRule {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingDisclosureLabel => "missing_disclosure_label",
            Self::MissingGeneratedBy => "missing_generated_by",
            Self::MissingParentLink => "missing_parent_link",
            Self::OrphanParentLink => "orphan_parent_link",
            Self::ParentMismatch => "parent_mismatch",
            Self::AncestorMismatch => "ancestor_mismatch",
            Self::ContextMismatch => "context_mismatch",
            Self::FixityMismatch => "fixity_mismatch",
        }
    }
}

impl fmt::Display for AuditRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of one derivative under one scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "rule", rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail(AuditRule),
    /// Naive derivatives make no auditable claim.
    Unaudited,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditResult {
    pub record_id: String,
    pub scenario: String,
    pub verdict: Verdict,
    /// Ground truth: this derivative was corrupted by the scenario.
    pub was_injected: bool,
}

impl AuditResult {
    pub fn failed(&self) -> bool {
        matches!(self.verdict, Verdict::Fail(_))
    }

    pub fn rule(&self) -> Option<AuditRule> {
        match self.verdict {
            Verdict::Fail(rule) => Some(rule),
            _ => None,
        }
    }
}

struct Hop1Entry {
    hash: ContentHash,
    parent: Option<ContentHash>,
    context: MandatoryContext,
}

/// The trusted chain a derivative population is audited against: source
/// records and the uncorrupted hop-1 provenance derivatives, keyed by record id.
pub struct LineageIndex {
    sources: HashMap<String, (ContentHash, MandatoryContext)>,
    source_hashes: HashSet<ContentHash>,
    hop1: HashMap<String, Hop1Entry>,
    hop1_hashes: HashSet<ContentHash>,
}

impl LineageIndex {
    pub fn new(records: &[Record], hop1: &[SealedDerivative], policy: FixityPolicy) -> Self {
        let sources: HashMap<String, (ContentHash, MandatoryContext)> = records
            .iter()
            .map(|r| (r.record_id.clone(), (r.content_hash(), r.context.clone())))
            .collect();
        let source_hashes = sources.values().map(|(h, _)| h.clone()).collect();

        let hop1: HashMap<String, Hop1Entry> = hop1
            .iter()
            .filter_map(|d| {
                let p = d.derivative.as_provenance()?;
                Some((
                    p.body.record_id.clone(),
                    Hop1Entry {
                        hash: d.derivative.content_hash(policy),
                        parent: p.meta.parent_sha256.clone(),
                        context: p.context.clone(),
                    },
                ))
            })
            .collect();
        let hop1_hashes = hop1.values().map(|e| e.hash.clone()).collect();

        Self {
            sources,
            source_hashes,
            hop1,
            hop1_hashes,
        }
    }

    pub fn source_hash(&self, record_id: &str) -> Option<&ContentHash> {
        self.sources.get(record_id).map(|(h, _)| h)
    }
}

/// Evaluates derivatives against a [`LineageIndex`].
///
/// Pure: the same index and derivatives always produce the same results.
pub struct AuditValidator<'a> {
    index: &'a LineageIndex,
    policy: FixityPolicy,
}

impl<'a> AuditValidator<'a> {
    pub fn new(index: &'a LineageIndex, policy: FixityPolicy) -> Self {
        Self { index, policy }
    }

    /// Verdict for one sealed derivative.
    pub fn check(&self, sealed: &SealedDerivative) -> Verdict {
        let Derivative::Provenance(p) = &sealed.derivative else {
            return Verdict::Unaudited;
        };
        match self.first_violation(p, sealed) {
            Some(rule) => Verdict::Fail(rule),
            None => Verdict::Pass,
        }
    }

    fn first_violation(&self, p: &ProvenanceDerivative, sealed: &SealedDerivative) -> Option<AuditRule> {
        if p.meta.generated_label.as_deref().is_none_or(str::is_empty) {
            return Some(AuditRule::MissingDisclosureLabel);
        }
        if p.meta.generated_by.as_deref().is_none_or(str::is_empty) {
            return Some(AuditRule::MissingGeneratedBy);
        }
        let Some(parent) = &p.meta.parent_sha256 else {
            return Some(AuditRule::MissingParentLink);
        };

        let record_id = p.body.record_id.as_str();
        let (known, true_parent, parent_context) = match p.body.hop {
            Hop::One => {
                let source = self.index.sources.get(record_id);
                (
                    &self.index.source_hashes,
                    source.map(|(h, _)| h),
                    source.map(|(_, c)| c),
                )
            }
            Hop::Two => {
                let entry = self.index.hop1.get(record_id);
                (
                    &self.index.hop1_hashes,
                    entry.map(|e| &e.hash),
                    entry.map(|e| &e.context),
                )
            }
        };

        if !known.contains(parent) {
            return Some(AuditRule::OrphanParentLink);
        }
        if true_parent != Some(parent) {
            return Some(AuditRule::ParentMismatch);
        }

        if p.body.hop == Hop::Two && !self.ancestor_resolves(p) {
            return Some(AuditRule::AncestorMismatch);
        }

        if let Some(expected) = parent_context
            && !context_preserved(expected, &p.context)
        {
            return Some(AuditRule::ContextMismatch);
        }

        if !sealed.fixity_holds(self.policy) {
            return Some(AuditRule::FixityMismatch);
        }
        None
    }

    /// Hop-2 ancestor link equals the hop-1 parent's own source link, and
    /// that link names the source record.
    fn ancestor_resolves(&self, p: &ProvenanceDerivative) -> bool {
        let record_id = p.body.record_id.as_str();
        let Some(hop1) = self.index.hop1.get(record_id) else {
            return false;
        };
        let Some(ancestor) = &p.meta.ancestor_sha256 else {
            return false;
        };
        hop1.parent.as_ref() == Some(ancestor) && self.index.source_hash(record_id) == Some(ancestor)
    }

    /// Audit a scenario-tagged population.
    pub fn audit(
        &self,
        scenario: &str,
        derivatives: &[SealedDerivative],
        injected: &BTreeSet<usize>,
    ) -> Vec<AuditResult> {
        derivatives
            .iter()
            .enumerate()
            .map(|(i, d)| AuditResult {
                record_id: d.record_id().to_string(),
                scenario: scenario.to_string(),
                verdict: self.check(d),
                was_injected: injected.contains(&i),
            })
            .collect()
    }
}

/// Every parent field is present with the identical value.
fn context_preserved(parent: &MandatoryContext, child: &MandatoryContext) -> bool {
    parent.iter().all(|(field, value)| child.get(field) == Some(value))
}
