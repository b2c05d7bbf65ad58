//! Fault injection: named lineage corruptions applied to a deterministic
//! subset of provenance derivatives.
//!
//! Selection is index-based: for `n` derivatives and rate `r`, `k =
//! max(1, floor(n * r))` positions are chosen at an even stride, shifted by
//! the scenario seed. No random draws are involved, so the injected set (the
//! ground truth for recall scoring) is identical on every run.
//!
//! A corrupted derivative is resealed after mutation. This models a tamperer
//! who recomputes the stored digest, so detection has to come from the
//! structural lineage checks rather than from fixity alone.

use crate::config::InjectionConfig;
use crate::derivative::{FixityPolicy, Hop, SealedDerivative};
use crate::fixity::{self, ContentHash};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The corruption a scenario applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    /// Injects nothing.
    Baseline,
    /// `parent_sha256` replaced with a digest absent from the chain.
    OrphanParentLink,
    /// `generated_by` removed.
    MissingGeneratedBy,
    /// First mandatory-context field removed.
    MandatoryContextErasure,
    /// `generated_label` removed.
    GeneratedLabelStripped,
    /// Hop-2 `parent_sha256` pointed at a different hop-1 derivative.
    AncestorMismatch,
}

impl ScenarioKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Baseline => "baseline_provenance",
            Self::OrphanParentLink => "orphan_parent_link",
            Self::MissingGeneratedBy => "missing_generated_by",
            Self::MandatoryContextErasure => "mandatory_context_erasure",
            Self::GeneratedLabelStripped => "generated_label_stripped",
            Self::AncestorMismatch => "ancestor_mismatch",
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named fault-injection transform with its rate and index offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub kind: ScenarioKind,
    pub hop: Hop,
    pub rate: f64,
    pub seed: u64,
}

const ONE_HOP: [(ScenarioKind, u64); 4] = [
    (ScenarioKind::OrphanParentLink, 61),
    (ScenarioKind::MissingGeneratedBy, 71),
    (ScenarioKind::MandatoryContextErasure, 81),
    (ScenarioKind::GeneratedLabelStripped, 91),
];

const TWO_HOP: [(ScenarioKind, u64); 5] = [
    (ScenarioKind::OrphanParentLink, 401),
    (ScenarioKind::AncestorMismatch, 402),
    (ScenarioKind::MandatoryContextErasure, 403),
    (ScenarioKind::GeneratedLabelStripped, 404),
    (ScenarioKind::MissingGeneratedBy, 405),
];

impl Scenario {
    fn build(hop: Hop, kind: ScenarioKind, rate: f64, default_seed: u64, config: &InjectionConfig) -> Self {
        let name = match hop {
            Hop::One => kind.as_str().to_string(),
            Hop::Two => format!("two_hop_{}", kind.as_str()),
        };
        let seed = config.seeds.get(&name).copied().unwrap_or(default_seed);
        let rate = if kind == ScenarioKind::Baseline { 0.0 } else { rate };
        Self {
            name,
            kind,
            hop,
            rate,
            seed,
        }
    }

    /// Baseline followed by the four one-hop corruptions.
    pub fn one_hop(config: &InjectionConfig) -> Vec<Scenario> {
        std::iter::once(Self::build(Hop::One, ScenarioKind::Baseline, 0.0, 0, config))
            .chain(
                ONE_HOP
                    .iter()
                    .map(|&(kind, seed)| Self::build(Hop::One, kind, config.one_hop_rate, seed, config)),
            )
            .collect()
    }

    /// Baseline followed by the five two-hop corruptions.
    pub fn two_hop(config: &InjectionConfig) -> Vec<Scenario> {
        std::iter::once(Self::build(Hop::Two, ScenarioKind::Baseline, 0.0, 0, config))
            .chain(
                TWO_HOP
                    .iter()
                    .map(|&(kind, seed)| Self::build(Hop::Two, kind, config.two_hop_rate, seed, config)),
            )
            .collect()
    }

    pub fn is_baseline(&self) -> bool {
        self.kind == ScenarioKind::Baseline
    }
}

/// Positions selected for injection out of `n`.
pub fn injected_indices(n: usize, rate: f64, seed: u64) -> BTreeSet<usize> {
    if n == 0 || rate <= 0.0 {
        return BTreeSet::new();
    }
    // Small epsilon so that e.g. 30 * 0.1 lands on 3, not 2.
    let k = ((n as f64 * rate + 1e-9).floor() as usize).clamp(1, n);
    let stride = n / k;
    let offset = (seed % stride as u64) as usize;
    (0..k).map(|j| (j * n / k + offset) % n).collect()
}

/// Scenario-tagged copy of a derivative population.
#[derive(Debug, Clone)]
pub struct InjectedSet {
    pub scenario: Scenario,
    pub derivatives: Vec<SealedDerivative>,
    /// Positions that were actually corrupted.
    pub injected: BTreeSet<usize>,
}

/// Applies scenarios to provenance derivatives.
pub struct FaultInjector<'a> {
    /// Hop-1 digests in population order; ancestor mismatches pick from these.
    hop1_hashes: &'a [ContentHash],
    policy: FixityPolicy,
}

impl<'a> FaultInjector<'a> {
    pub fn new(hop1_hashes: &'a [ContentHash], policy: FixityPolicy) -> Self {
        Self {
            hop1_hashes,
            policy,
        }
    }

    /// Copy `population` and corrupt the selected positions.
    ///
    /// Positions whose derivative cannot carry the corruption (naive shape,
    /// no mandatory fields, no alternative hop-1 parent) are left untouched
    /// and are not counted as injected.
    pub fn apply(&self, scenario: &Scenario, population: &[SealedDerivative]) -> InjectedSet {
        let mut derivatives = population.to_vec();
        let mut injected = BTreeSet::new();

        for idx in injected_indices(population.len(), scenario.rate, scenario.seed) {
            let sealed = &mut derivatives[idx];
            if self.corrupt(scenario.kind, idx, sealed) {
                sealed.reseal(self.policy);
                injected.insert(idx);
            }
        }

        tracing::debug!(
            scenario = %scenario.name,
            selected = injected.len(),
            total = population.len(),
            "Applied fault injection"
        );

        InjectedSet {
            scenario: scenario.clone(),
            derivatives,
            injected,
        }
    }

    fn corrupt(&self, kind: ScenarioKind, idx: usize, sealed: &mut SealedDerivative) -> bool {
        let Some(p) = sealed.derivative.as_provenance_mut() else {
            return false;
        };
        match kind {
            ScenarioKind::Baseline => false,
            ScenarioKind::OrphanParentLink => {
                let orphan = fixity::sha256_bytes(
                    format!("orphan_parent_link:{}:{}", p.body.stream, p.body.record_id).as_bytes(),
                );
                p.meta.parent_sha256 = Some(orphan);
                true
            }
            ScenarioKind::MissingGeneratedBy => p.meta.generated_by.take().is_some(),
            ScenarioKind::GeneratedLabelStripped => p.meta.generated_label.take().is_some(),
            ScenarioKind::MandatoryContextErasure => {
                let Some(first) = p.context.iter().next().map(|(field, _)| field.to_string()) else {
                    return false;
                };
                p.context.remove(&first).is_some()
            }
            ScenarioKind::AncestorMismatch => {
                if p.body.hop != Hop::Two {
                    return false;
                }
                let n = self.hop1_hashes.len();
                let current = p.meta.parent_sha256.clone();
                let replacement = (1..n)
                    .map(|step| &self.hop1_hashes[(idx + step) % n])
                    .find(|h| Some(*h) != current.as_ref());
                match replacement {
                    Some(hash) => {
                        p.meta.parent_sha256 = Some(hash.clone());
                        true
                    }
                    None => false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derivative::DerivativeGenerator;
    use crate::record::{Normalizer, Record, StreamProfile};
    use chrono::Utc;
    use serde_json::json;

    fn records(n: usize) -> Vec<Record> {
        let profile = StreamProfile {
            name: "s".into(),
            source_url: None,
            source_file: None,
            id_field: "id".into(),
            mandatory_fields: vec!["id".into(), "title".into()],
            summary_fields: vec!["title".into()],
        };
        let normalizer = Normalizer::new(&profile);
        (0..n)
            .map(|i| {
                normalizer
                    .normalize(i, &json!({"id": format!("r{i:02}"), "title": format!("Object {i}")}))
                    .unwrap()
            })
            .collect()
    }

    fn hop1(records: &[Record]) -> Vec<SealedDerivative> {
        let g = DerivativeGenerator::new("DERIVED_RECORD", "t", Utc::now(), FixityPolicy::default());
        records
            .iter()
            .map(|r| g.provenance_from_record(r, &format!("summary {}", r.record_id)))
            .collect()
    }

    #[test]
    fn test_injected_indices_counts() {
        assert_eq!(injected_indices(30, 0.10, 61).len(), 3);
        assert_eq!(injected_indices(12, 0.20, 402).len(), 2);
        assert_eq!(injected_indices(5, 0.10, 61).len(), 1);
        assert!(injected_indices(30, 0.0, 61).is_empty());
        assert!(injected_indices(0, 0.5, 61).is_empty());
    }

    #[test]
    fn test_injected_indices_deterministic_and_in_range() {
        for n in 1..60 {
            let a = injected_indices(n, 0.2, 7);
            assert_eq!(a, injected_indices(n, 0.2, 7));
            assert!(a.iter().all(|&i| i < n));
        }
    }

    #[test]
    fn test_scenario_lists() {
        let config = InjectionConfig::default();
        let one: Vec<String> = Scenario::one_hop(&config).into_iter().map(|s| s.name).collect();
        assert_eq!(
            one,
            vec![
                "baseline_provenance",
                "orphan_parent_link",
                "missing_generated_by",
                "mandatory_context_erasure",
                "generated_label_stripped",
            ]
        );
        let two = Scenario::two_hop(&config);
        assert_eq!(two[0].name, "two_hop_baseline_provenance");
        assert_eq!(two[0].rate, 0.0);
        assert!(two.iter().any(|s| s.name == "two_hop_ancestor_mismatch" && s.seed == 402));
    }

    #[test]
    fn test_seed_override_by_name() {
        let mut config = InjectionConfig::default();
        config.seeds.insert("orphan_parent_link".into(), 5);
        let scenarios = Scenario::one_hop(&config);
        assert_eq!(scenarios[1].seed, 5);
        assert_eq!(scenarios[2].seed, 71);
    }

    #[test]
    fn test_baseline_injects_nothing() {
        let recs = records(10);
        let population = hop1(&recs);
        let injector = FaultInjector::new(&[], FixityPolicy::default());
        let scenario = &Scenario::one_hop(&InjectionConfig::default())[0];
        let set = injector.apply(scenario, &population);
        assert!(set.injected.is_empty());
        assert_eq!(set.derivatives, population);
    }

    #[test]
    fn test_corruptions_touch_only_selected_and_reseal() {
        let recs = records(30);
        let population = hop1(&recs);
        let injector = FaultInjector::new(&[], FixityPolicy::default());
        for scenario in Scenario::one_hop(&InjectionConfig::default()).iter().skip(1) {
            let set = injector.apply(scenario, &population);
            assert_eq!(set.injected.len(), 3, "{}", scenario.name);
            for (i, (before, after)) in population.iter().zip(&set.derivatives).enumerate() {
                assert!(after.fixity_holds(FixityPolicy::default()));
                assert_eq!(before != after, set.injected.contains(&i), "{} at {i}", scenario.name);
            }
        }
    }

    #[test]
    fn test_context_erasure_removes_first_field() {
        let recs = records(10);
        let population = hop1(&recs);
        let scenario = Scenario {
            name: "erase".into(),
            kind: ScenarioKind::MandatoryContextErasure,
            hop: Hop::One,
            rate: 0.1,
            seed: 0,
        };
        let set = FaultInjector::new(&[], FixityPolicy::default()).apply(&scenario, &population);
        let idx = *set.injected.iter().next().unwrap();
        let p = set.derivatives[idx].derivative.as_provenance().unwrap();
        assert_eq!(p.context.get("id"), None);
        assert_eq!(p.context.get("title"), Some(format!("Object {idx}").as_str()));
    }

    #[test]
    fn test_ancestor_mismatch_points_at_other_hop_one() {
        let recs = records(12);
        let first = hop1(&recs);
        let hashes: Vec<ContentHash> = first.iter().map(|d| d.fixity.clone()).collect();
        let g = DerivativeGenerator::new("DERIVED_RECORD", "t", Utc::now(), FixityPolicy::default());
        let second: Vec<SealedDerivative> = first
            .iter()
            .map(|d| g.provenance_from_derivative(d.derivative.as_provenance().unwrap(), "i"))
            .collect();

        let scenario = Scenario::two_hop(&InjectionConfig::default())
            .into_iter()
            .find(|s| s.kind == ScenarioKind::AncestorMismatch)
            .unwrap();
        let set = FaultInjector::new(&hashes, FixityPolicy::default()).apply(&scenario, &second);
        assert_eq!(set.injected.len(), 2);
        for &i in &set.injected {
            let parent = set.derivatives[i]
                .derivative
                .as_provenance()
                .unwrap()
                .meta
                .parent_sha256
                .clone()
                .unwrap();
            assert_ne!(parent, hashes[i]);
            assert!(hashes.contains(&parent));
        }
    }

    #[test]
    fn test_ancestor_mismatch_ignores_hop_one() {
        let recs = records(10);
        let population = hop1(&recs);
        let hashes: Vec<ContentHash> = population.iter().map(|d| d.fixity.clone()).collect();
        let scenario = Scenario {
            name: "x".into(),
            kind: ScenarioKind::AncestorMismatch,
            hop: Hop::One,
            rate: 0.2,
            seed: 0,
        };
        let set = FaultInjector::new(&hashes, FixityPolicy::default()).apply(&scenario, &population);
        assert!(set.injected.is_empty());
    }
}
