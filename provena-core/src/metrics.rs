//! Metrics aggregation: per-scenario detection rates and per-stream
//! population rates.
//!
//! All rates are fractions in `[0, 1]`. A detection recall with no injected
//! ground truth is undefined and serializes as the string `"n/a"`.

use crate::audit::{AuditResult, AuditValidator, Verdict};
use crate::config::InjectionConfig;
use crate::derivative::{FixityPolicy, SealedDerivative};
use crate::fixity::ContentHash;
use crate::inject::{Scenario, injected_indices};
use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Serde adapter writing `None` as `"n/a"`.
mod na {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<f64>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => s.serialize_f64(*v),
            None => s.serialize_str("n/a"),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Rate(f64),
            Text(String),
        }
        match Raw::deserialize(d)? {
            Raw::Rate(v) => Ok(Some(v)),
            Raw::Text(t) if t == "n/a" => Ok(None),
            Raw::Text(t) => Err(D::Error::custom(format!(
                "expected a rate or \"n/a\", got {t:?}"
            ))),
        }
    }
}

fn rate(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

/// Recall over the injected set and false-positive rate over the rest.
fn detection_rates(total: usize, injected: &BTreeSet<usize>, failed: &BTreeSet<usize>) -> (Option<f64>, f64) {
    let caught = failed.intersection(injected).count();
    let false_alarms = failed.difference(injected).count();
    let recall = (!injected.is_empty()).then(|| rate(caught, injected.len()));
    let fp = false_alarms as f64 / total.saturating_sub(injected.len()).max(1) as f64;
    (recall, fp)
}

/// Audit outcome of one scenario over one stream's population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub scenario: String,
    pub total: usize,
    pub injected: usize,
    pub failed: usize,
    pub pass_rate: f64,
    pub fail_rate: f64,
    #[serde(with = "na")]
    pub detection_recall: Option<f64>,
    pub false_positive_rate: f64,
    pub expected_fail_rate: f64,
    pub within_tolerance: bool,
}

impl ScenarioOutcome {
    pub fn from_results(scenario: &Scenario, results: &[AuditResult], tolerance: f64) -> Self {
        let total = results.len();
        let injected: BTreeSet<usize> = results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.was_injected.then_some(i))
            .collect();
        let failed: BTreeSet<usize> = results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.failed().then_some(i))
            .collect();
        let (detection_recall, false_positive_rate) = detection_rates(total, &injected, &failed);
        let fail_rate = rate(failed.len(), total);
        let expected_fail_rate = rate(injected.len(), total);

        let outcome = Self {
            scenario: scenario.name.clone(),
            total,
            injected: injected.len(),
            failed: failed.len(),
            pass_rate: rate(total - failed.len(), total),
            fail_rate,
            detection_recall,
            false_positive_rate,
            expected_fail_rate,
            within_tolerance: (fail_rate - expected_fail_rate).abs() <= tolerance + 1e-9,
        };
        tracing::info!(
            scenario = %outcome.scenario,
            injected = outcome.injected,
            failed = outcome.failed,
            fail_rate = outcome.fail_rate,
            "Scenario audited"
        );
        outcome
    }
}

/// Detection result of one integrity probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub injected: usize,
    pub detected: usize,
    #[serde(with = "na")]
    pub recall: Option<f64>,
    pub false_positive_rate: f64,
}

impl ProbeOutcome {
    fn new(total: usize, injected: BTreeSet<usize>, detected: BTreeSet<usize>) -> Self {
        let (recall, false_positive_rate) = detection_rates(total, &injected, &detected);
        Self {
            injected: injected.len(),
            detected: detected.len(),
            recall,
            false_positive_rate,
        }
    }
}

/// Extended integrity checks run alongside the named scenarios.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityProbes {
    /// Source values altered in place; detected as record digest drift.
    pub tamper: ProbeOutcome,
    /// Hop-1 parent link cleared.
    pub lineage_break: ProbeOutcome,
    /// Hop-1 parent link pointed at the neighbouring source record.
    pub parent_mismatch: ProbeOutcome,
}

const TAMPER_SUFFIX: &str = "::tampered";

impl IntegrityProbes {
    pub fn run(
        records: &[Record],
        hop1: &[SealedDerivative],
        validator: &AuditValidator<'_>,
        config: &InjectionConfig,
        policy: FixityPolicy,
    ) -> Self {
        let n = records.len();
        let seed = |name: &str, default: u64| config.seeds.get(name).copied().unwrap_or(default);

        // Tamper: append a marker to the first mandatory value of selected records.
        let original: Vec<ContentHash> = records.iter().map(Record::content_hash).collect();
        let mut tampered_idx = BTreeSet::new();
        let mut tampered: Vec<Record> = records.to_vec();
        for i in injected_indices(n, config.one_hop_rate, seed("tamper", 31)) {
            let record = &mut tampered[i];
            let Some(field) = record.context.iter().next().map(|(f, _)| f.to_string()) else {
                continue;
            };
            let value = format!("{}{TAMPER_SUFFIX}", record.field(&field));
            record.fields.insert(field, value);
            tampered_idx.insert(i);
        }
        let drifted: BTreeSet<usize> = tampered
            .iter()
            .zip(&original)
            .enumerate()
            .filter_map(|(i, (r, h))| (r.content_hash() != *h).then_some(i))
            .collect();
        let tamper = ProbeOutcome::new(n, tampered_idx, drifted);

        let lineage_break = Self::relink(hop1, validator, policy, config, seed("lineage_break", 41), |_| None);
        let parent_mismatch = Self::relink(hop1, validator, policy, config, seed("parent_mismatch", 51), |i| {
            (n > 1).then(|| original[(i + 1) % n].clone())
        });

        Self {
            tamper,
            lineage_break,
            parent_mismatch,
        }
    }

    /// Rewrite the parent link of selected hop-1 derivatives and count what
    /// the validator flags.
    fn relink(
        hop1: &[SealedDerivative],
        validator: &AuditValidator<'_>,
        policy: FixityPolicy,
        config: &InjectionConfig,
        seed: u64,
        new_parent: impl Fn(usize) -> Option<ContentHash>,
    ) -> ProbeOutcome {
        let n = hop1.len();
        let mut population = hop1.to_vec();
        let mut injected = BTreeSet::new();
        for i in injected_indices(n, config.one_hop_rate, seed) {
            let sealed = &mut population[i];
            let Some(p) = sealed.derivative.as_provenance_mut() else {
                continue;
            };
            let replacement = new_parent(i);
            if replacement == p.meta.parent_sha256 {
                continue;
            }
            p.meta.parent_sha256 = replacement;
            sealed.reseal(policy);
            injected.insert(i);
        }
        let detected = population
            .iter()
            .enumerate()
            .filter_map(|(i, d)| matches!(validator.check(d), Verdict::Fail(_)).then_some(i))
            .collect();
        ProbeOutcome::new(n, injected, detected)
    }
}

/// Naive and provenance derivatives of one hop, aligned with the records.
#[derive(Debug, Clone, Copy)]
pub struct HopPopulation<'a> {
    pub naive: &'a [SealedDerivative],
    pub provenance: &'a [SealedDerivative],
}

/// Two-hop chain rates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwoHopMetrics {
    pub one_hop_provenance_audit_pass_rate: f64,
    pub two_hop_naive_lineage_completeness_rate: f64,
    pub two_hop_provenance_lineage_completeness_rate: f64,
    pub two_hop_provenance_context_retention_avg: f64,
    pub two_hop_provenance_chain_audit_pass_rate: f64,
}

/// Population rates for one stream. Computed over the uncorrupted population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMetrics {
    pub fixity_stability_rate: f64,
    pub naive_context_retention_avg: f64,
    pub provenance_context_retention_avg: f64,
    pub naive_source_distinguishability_rate: f64,
    pub provenance_source_distinguishability_rate: f64,
    pub naive_lineage_completeness_rate: f64,
    pub provenance_lineage_completeness_rate: f64,
    pub naive_disclosure_label_rate: f64,
    pub provenance_disclosure_label_rate: f64,
    pub provenance_reproducible_root_hash: bool,
    pub integrity: IntegrityProbes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub two_hop: Option<TwoHopMetrics>,
}

/// Rolls a stream's derivative populations into [`StreamMetrics`].
pub struct MetricsAggregator<'a> {
    records: &'a [Record],
    validator: &'a AuditValidator<'a>,
    policy: FixityPolicy,
}

impl<'a> MetricsAggregator<'a> {
    pub fn new(records: &'a [Record], validator: &'a AuditValidator<'a>, policy: FixityPolicy) -> Self {
        Self {
            records,
            validator,
            policy,
        }
    }

    fn fraction(&self, items: &[SealedDerivative], pred: impl Fn(usize, &SealedDerivative) -> bool) -> f64 {
        let hits = items.iter().enumerate().filter(|(i, d)| pred(*i, *d)).count();
        rate(hits, items.len())
    }

    fn context_avg(&self, items: &[SealedDerivative]) -> f64 {
        if items.is_empty() {
            return 0.0;
        }
        let sum: f64 = items
            .iter()
            .zip(self.records)
            .map(|(d, r)| d.derivative.context_retention(&r.context))
            .sum();
        sum / items.len() as f64
    }

    fn passes(&self, d: &SealedDerivative) -> bool {
        self.validator.check(d) == Verdict::Pass
    }

    fn lineage_complete(&self, d: &SealedDerivative) -> bool {
        d.derivative.lineage_fields_present() && self.passes(d)
    }

    pub fn stream_metrics(
        &self,
        hop1: HopPopulation<'_>,
        hop2: Option<HopPopulation<'_>>,
        reproducible_root_hash: bool,
        integrity: IntegrityProbes,
    ) -> StreamMetrics {
        let provenance_all = hop1
            .provenance
            .iter()
            .chain(hop2.iter().flat_map(|h| h.provenance.iter()));
        let (stable, sealed_total) = provenance_all.fold((0, 0), |(ok, total), d| {
            (ok + usize::from(d.fixity_holds(self.policy)), total + 1)
        });

        let two_hop = hop2.map(|h| TwoHopMetrics {
            one_hop_provenance_audit_pass_rate: self.fraction(hop1.provenance, |_, d| self.passes(d)),
            two_hop_naive_lineage_completeness_rate: self
                .fraction(h.naive, |_, d| self.lineage_complete(d)),
            two_hop_provenance_lineage_completeness_rate: self.fraction(h.provenance, |_, d| {
                self.lineage_complete(d)
                    && d.derivative
                        .as_provenance()
                        .is_some_and(|p| p.meta.ancestor_sha256.is_some())
            }),
            two_hop_provenance_context_retention_avg: self.context_avg(h.provenance),
            two_hop_provenance_chain_audit_pass_rate: self.fraction(h.provenance, |_, d| self.passes(d)),
        });

        StreamMetrics {
            fixity_stability_rate: rate(stable, sealed_total),
            naive_context_retention_avg: self.context_avg(hop1.naive),
            provenance_context_retention_avg: self.context_avg(hop1.provenance),
            naive_source_distinguishability_rate: self.fraction(hop1.naive, |_, d| {
                d.derivative
                    .as_provenance()
                    .is_some_and(|p| p.meta.parent_sha256.is_some())
            }),
            provenance_source_distinguishability_rate: self.fraction(hop1.provenance, |i, d| {
                hop1.naive.get(i).is_some_and(|naive| naive.fixity != d.fixity)
            }),
            naive_lineage_completeness_rate: self.fraction(hop1.naive, |_, d| self.lineage_complete(d)),
            provenance_lineage_completeness_rate: self
                .fraction(hop1.provenance, |_, d| self.lineage_complete(d)),
            naive_disclosure_label_rate: self.fraction(hop1.naive, |_, d| d.derivative.has_disclosure_label()),
            provenance_disclosure_label_rate: self
                .fraction(hop1.provenance, |_, d| d.derivative.has_disclosure_label()),
            provenance_reproducible_root_hash: reproducible_root_hash,
            integrity,
            two_hop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditRule, LineageIndex};
    use crate::derivative::{DerivativeGenerator, Hop};
    use crate::inject::ScenarioKind;
    use crate::record::{Normalizer, StreamProfile};
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn scenario(name: &str) -> Scenario {
        Scenario {
            name: name.into(),
            kind: ScenarioKind::OrphanParentLink,
            hop: Hop::One,
            rate: 0.1,
            seed: 0,
        }
    }

    fn result(failed: bool, injected: bool) -> AuditResult {
        AuditResult {
            record_id: "r".into(),
            scenario: "x".into(),
            verdict: if failed {
                Verdict::Fail(AuditRule::OrphanParentLink)
            } else {
                Verdict::Pass
            },
            was_injected: injected,
        }
    }

    #[test]
    fn test_outcome_exact_detection() {
        let mut results: Vec<AuditResult> = (0..27).map(|_| result(false, false)).collect();
        results.extend((0..3).map(|_| result(true, true)));
        let o = ScenarioOutcome::from_results(&scenario("orphan_parent_link"), &results, 0.01);
        assert_eq!(o.injected, 3);
        assert_eq!(o.failed, 3);
        assert_eq!(o.detection_recall, Some(1.0));
        assert_eq!(o.false_positive_rate, 0.0);
        assert!((o.fail_rate - 0.10).abs() < 1e-12);
        assert!(o.within_tolerance);
    }

    #[test]
    fn test_outcome_baseline_recall_is_na() {
        let results: Vec<AuditResult> = (0..10).map(|_| result(false, false)).collect();
        let o = ScenarioOutcome::from_results(&scenario("baseline_provenance"), &results, 0.01);
        assert_eq!(o.detection_recall, None);
        assert_eq!(o.fail_rate, 0.0);
        let json = serde_json::to_value(&o).unwrap();
        assert_eq!(json["detection_recall"], "n/a");

        let back: ScenarioOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back, o);
    }

    #[test]
    fn test_outcome_false_positive_and_miss() {
        let results = vec![
            result(true, false),
            result(false, true),
            result(true, true),
            result(false, false),
        ];
        let o = ScenarioOutcome::from_results(&scenario("s"), &results, 0.01);
        assert_eq!(o.detection_recall, Some(0.5));
        assert_eq!(o.false_positive_rate, 0.5);
    }

    #[test]
    fn test_empty_results_do_not_divide_by_zero() {
        let o = ScenarioOutcome::from_results(&scenario("s"), &[], 0.01);
        assert_eq!(o.fail_rate, 0.0);
        assert_eq!(o.pass_rate, 0.0);
        assert_eq!(o.false_positive_rate, 0.0);
    }

    fn fixture(n: usize) -> (Vec<Record>, Vec<SealedDerivative>, Vec<SealedDerivative>) {
        let profile = StreamProfile {
            name: "s".into(),
            source_url: None,
            source_file: None,
            id_field: "id".into(),
            mandatory_fields: vec!["id".into(), "title".into()],
            summary_fields: vec!["title".into()],
        };
        let normalizer = Normalizer::new(&profile);
        let records: Vec<Record> = (0..n)
            .map(|i| normalizer.normalize(i, &json!({"id": i, "title": format!("T{i}")})).unwrap())
            .collect();
        let g = DerivativeGenerator::new("DERIVED_RECORD", "t", Utc::now(), FixityPolicy::default());
        let naive = records
            .iter()
            .map(|r| g.naive(&r.stream, &r.record_id, Hop::One, r.field("title")))
            .collect();
        let prov = records
            .iter()
            .map(|r| g.provenance_from_record(r, r.field("title")))
            .collect();
        (records, naive, prov)
    }

    #[test]
    fn test_stream_metrics_on_clean_population() {
        let (records, naive, prov) = fixture(20);
        let index = LineageIndex::new(&records, &prov, FixityPolicy::default());
        let validator = AuditValidator::new(&index, FixityPolicy::default());
        let config = InjectionConfig::default();
        let probes = IntegrityProbes::run(&records, &prov, &validator, &config, FixityPolicy::default());
        let metrics = MetricsAggregator::new(&records, &validator, FixityPolicy::default()).stream_metrics(
            HopPopulation {
                naive: &naive,
                provenance: &prov,
            },
            None,
            true,
            probes,
        );

        assert_eq!(metrics.fixity_stability_rate, 1.0);
        assert_eq!(metrics.naive_context_retention_avg, 0.0);
        assert_eq!(metrics.provenance_context_retention_avg, 1.0);
        assert_eq!(metrics.naive_source_distinguishability_rate, 0.0);
        assert_eq!(metrics.provenance_source_distinguishability_rate, 1.0);
        assert_eq!(metrics.naive_lineage_completeness_rate, 0.0);
        assert_eq!(metrics.provenance_lineage_completeness_rate, 1.0);
        assert_eq!(metrics.naive_disclosure_label_rate, 0.0);
        assert_eq!(metrics.provenance_disclosure_label_rate, 1.0);
        assert!(metrics.two_hop.is_none());
    }

    #[test]
    fn test_integrity_probes_detect_exactly() {
        let (records, _, prov) = fixture(30);
        let index = LineageIndex::new(&records, &prov, FixityPolicy::default());
        let validator = AuditValidator::new(&index, FixityPolicy::default());
        let probes = IntegrityProbes::run(
            &records,
            &prov,
            &validator,
            &InjectionConfig::default(),
            FixityPolicy::default(),
        );
        for probe in [&probes.tamper, &probes.lineage_break, &probes.parent_mismatch] {
            assert_eq!(probe.injected, 3);
            assert_eq!(probe.detected, 3);
            assert_eq!(probe.recall, Some(1.0));
            assert_eq!(probe.false_positive_rate, 0.0);
        }
    }
}
