//! Run orchestration.
//!
//! Each stream runs normalize → generate → derive → reproducibility check →
//! inject → audit → aggregate in its own task. Streams share nothing except
//! the run-wide [`ThrottledSource`], which keeps one generation call in
//! flight across all of them.

use crate::artifact::{RunReport, RunStatus, StreamReport};
use crate::audit::{AuditValidator, LineageIndex};
use crate::config::ProvenaConfig;
use crate::derivative::{DerivativeGenerator, Hop, SealedDerivative};
use crate::error::{ConfigError, ProvenaError, ReproducibilityError, Result, RunError};
use crate::fixity::{self, ContentHash};
use crate::generation::{ContentSource, GenerationRequest, ThrottledSource, create_source};
use crate::inject::{FaultInjector, Scenario};
use crate::metrics::{HopPopulation, IntegrityProbes, MetricsAggregator, ScenarioOutcome};
use crate::record::{Normalizer, Record, StreamProfile, load_snapshot, sample_by_index};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Already-fetched rows for one stream.
#[derive(Debug, Clone)]
pub struct StreamInput {
    pub profile: StreamProfile,
    pub rows: Vec<Value>,
}

/// Read every configured stream's snapshot, resolving relative paths
/// against `base_dir`.
pub async fn load_inputs(config: &ProvenaConfig, base_dir: &Path) -> Result<Vec<StreamInput>> {
    let mut inputs = Vec::with_capacity(config.streams.len());
    for profile in &config.streams {
        let file = profile.source_file.as_ref().ok_or_else(|| ConfigError::Invalid {
            message: format!("stream '{}' has no source_file", profile.name),
        })?;
        let path = base_dir.join(file);
        let rows = load_snapshot(&path).await?;
        info!(stream = %profile.name, rows = rows.len(), path = %path.display(), "Loaded snapshot");
        inputs.push(StreamInput {
            profile: profile.clone(),
            rows,
        });
    }
    Ok(inputs)
}

/// Load every configured snapshot under `base_dir` and run the pipeline.
///
/// Snapshot and source setup failures become a failed artifact rather than
/// an error, so callers always have a report to write.
pub async fn run_workspace(config: ProvenaConfig, base_dir: &Path) -> RunReport {
    let started_at = Utc::now();
    let prepared = async {
        let inputs = load_inputs(&config, base_dir).await?;
        let pipeline = Pipeline::new(config)?;
        Ok::<_, ProvenaError>((pipeline, inputs))
    }
    .await;
    match prepared {
        Ok((pipeline, inputs)) => pipeline.run(inputs).await,
        Err(e) => {
            error!(kind = e.kind(), error = %e, "Validation run could not start");
            RunReport::failed(Uuid::new_v4(), started_at, &e)
        }
    }
}

/// Source root hash of a snapshot file under a stream profile.
pub async fn snapshot_root_hash(profile: &StreamProfile, path: &Path) -> Result<(ContentHash, usize)> {
    let rows = load_snapshot(path).await?;
    let batch = Normalizer::new(profile).normalize_batch(&rows);
    Ok((source_root(&profile.name, &batch.records), batch.records.len()))
}

fn source_root(stream: &str, records: &[Record]) -> ContentHash {
    let digests: Vec<(String, ContentHash)> = records
        .iter()
        .map(|r| (r.record_id.clone(), r.content_hash()))
        .collect();
    fixity::root_hash(stream, &digests)
}

fn derivative_root(stream: &str, derivatives: &[SealedDerivative]) -> ContentHash {
    let digests: Vec<(String, ContentHash)> = derivatives
        .iter()
        .map(|d| (d.record_id().to_string(), d.fixity.clone()))
        .collect();
    fixity::root_hash(stream, &digests)
}

/// Generated text for one record: hop-1 summary and optional hop-2 interpretation.
#[derive(Debug, Clone)]
struct GeneratedText {
    summary: String,
    interpretation: Option<String>,
}

/// Derivative populations of one stream, aligned by position with its records.
struct Populations {
    naive_hop1: Vec<SealedDerivative>,
    provenance_hop1: Vec<SealedDerivative>,
    naive_hop2: Vec<SealedDerivative>,
    provenance_hop2: Vec<SealedDerivative>,
}

fn derive_populations(generator: &DerivativeGenerator, records: &[Record], texts: &[GeneratedText]) -> Populations {
    let mut pops = Populations {
        naive_hop1: Vec::with_capacity(records.len()),
        provenance_hop1: Vec::with_capacity(records.len()),
        naive_hop2: Vec::new(),
        provenance_hop2: Vec::new(),
    };
    for (record, text) in records.iter().zip(texts) {
        pops.naive_hop1
            .push(generator.naive(&record.stream, &record.record_id, Hop::One, &text.summary));
        let hop1 = generator.provenance_from_record(record, &text.summary);

        if let Some(interpretation) = &text.interpretation {
            pops.naive_hop2
                .push(generator.naive(&record.stream, &record.record_id, Hop::Two, interpretation));
            if let Some(parent) = hop1.derivative.as_provenance() {
                pops.provenance_hop2
                    .push(generator.provenance_from_derivative(parent, interpretation));
            }
        }
        debug!(stream = %record.stream, record_id = %record.record_id, fixity = %hop1.fixity, "Derived record");
        pops.provenance_hop1.push(hop1);
    }
    pops
}

/// Orchestrates a validation run over a set of streams.
pub struct Pipeline {
    config: Arc<ProvenaConfig>,
    source: Arc<ThrottledSource>,
}

impl Pipeline {
    /// Build a pipeline with the configured content source.
    pub fn new(config: ProvenaConfig) -> Result<Self> {
        let source = create_source(&config.generation)?;
        Ok(Self::with_source(config, source))
    }

    /// Build a pipeline around an explicit content source.
    pub fn with_source(config: ProvenaConfig, source: Arc<dyn ContentSource>) -> Self {
        let throttled = ThrottledSource::new(
            source,
            config.generation.retry.clone(),
            config.generation.timeout_secs,
        );
        Self {
            config: Arc::new(config),
            source: Arc::new(throttled),
        }
    }

    pub fn config(&self) -> &ProvenaConfig {
        &self.config
    }

    /// Run every stream and assemble the artifact.
    ///
    /// Never returns an error: fatal conditions produce a report whose status
    /// is [`RunStatus::Failed`] and which carries no stream metrics.
    pub async fn run(&self, inputs: Vec<StreamInput>) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(run_id = %run_id, streams = inputs.len(), source = self.source.name(), "Starting validation run");

        match self.run_streams(inputs, started_at).await {
            Ok(streams) => {
                let status = if streams.iter().any(|s| s.partial) {
                    RunStatus::Partial
                } else {
                    RunStatus::Ok
                };
                let is_model = self.source.is_model();
                let report = RunReport {
                    run_id,
                    status,
                    started_at,
                    generated_at: Utc::now(),
                    total_records: streams.iter().map(|s| s.record_count).sum(),
                    skipped_records: streams.iter().map(|s| s.skipped_records).sum(),
                    model: is_model.then(|| self.config.generation.model.clone()),
                    total_llm_calls: is_model.then(|| self.source.calls()),
                    streams,
                };
                info!(
                    run_id = %run_id,
                    total_records = report.total_records,
                    skipped = report.skipped_records,
                    "Validation run finished"
                );
                report
            }
            Err(e) => {
                error!(run_id = %run_id, kind = e.kind(), error = %e, "Validation run failed");
                RunReport::failed(run_id, started_at, &e)
            }
        }
    }

    async fn run_streams(&self, inputs: Vec<StreamInput>, started_at: DateTime<Utc>) -> Result<Vec<StreamReport>> {
        let deadline = (self.config.run.timeout_secs > 0)
            .then(|| Instant::now() + std::time::Duration::from_secs(self.config.run.timeout_secs));
        let limit = Arc::new(Semaphore::new(self.config.run.max_parallel_streams));

        let mut handles = Vec::with_capacity(inputs.len());
        for input in inputs {
            let worker = StreamWorker {
                config: Arc::clone(&self.config),
                source: Arc::clone(&self.source),
                generated_at: started_at,
                deadline,
            };
            handles.push(tokio::spawn(worker.gated(Arc::clone(&limit), input)));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            let report = handle.await.map_err(|e| RunError::TaskJoin {
                message: e.to_string(),
            })??;
            reports.push(report);
        }
        Ok(reports)
    }
}

/// Everything one stream task needs; owned so the task is `'static`.
struct StreamWorker {
    config: Arc<ProvenaConfig>,
    source: Arc<ThrottledSource>,
    generated_at: DateTime<Utc>,
    deadline: Option<Instant>,
}

impl StreamWorker {
    /// Wait for a stream slot, then process.
    async fn gated(self, limit: Arc<Semaphore>, input: StreamInput) -> Result<StreamReport> {
        let _permit = limit.acquire_owned().await.map_err(|e| RunError::TaskJoin {
            message: e.to_string(),
        })?;
        self.process(input).await
    }

    async fn process(self, input: StreamInput) -> Result<StreamReport> {
        let profile = &input.profile;
        let stream = profile.name.as_str();

        let batch = Normalizer::new(profile).normalize_batch(&input.rows);
        let mut skipped = batch.rejected.len();
        let mut records = batch.records;
        if let Some(n) = self.config.run.sample_per_stream {
            records = sample_by_index(records, n);
        }
        if records.is_empty() {
            return Err(RunError::EmptyStream {
                stream: stream.to_string(),
            }
            .into());
        }

        let (records, texts, partial, failed) = self.generate(profile, records).await;
        skipped += failed;

        let required = self.config.run.min_records_per_stream;
        if records.len() < required {
            return Err(RunError::InsufficientRecords {
                stream: stream.to_string(),
                got: records.len(),
                required,
            }
            .into());
        }

        let policy = self.config.fixity;
        let generator = DerivativeGenerator::new(
            self.config.generation.label.clone(),
            self.config.generation.agent_id(),
            self.generated_at,
            policy,
        );
        let pops = derive_populations(&generator, &records, &texts);

        let source_root_hash = source_root(stream, &records);
        let provenance_root_hash = derivative_root(stream, &pops.provenance_hop1);
        let reproducible = self.check_reproducible(stream, &records, &texts, &source_root_hash, &provenance_root_hash)?;

        let index = LineageIndex::new(&records, &pops.provenance_hop1, policy);
        let validator = AuditValidator::new(&index, policy);
        let hop1_hashes: Vec<ContentHash> = pops.provenance_hop1.iter().map(|d| d.fixity.clone()).collect();
        let injector = FaultInjector::new(&hop1_hashes, policy);
        let tolerance = self.config.injection.fail_rate_tolerance;

        let run_scenarios = |scenarios: Vec<Scenario>, population: &[SealedDerivative]| -> Vec<ScenarioOutcome> {
            scenarios
                .iter()
                .map(|scenario| {
                    let set = injector.apply(scenario, population);
                    let results = validator.audit(&scenario.name, &set.derivatives, &set.injected);
                    let outcome = ScenarioOutcome::from_results(scenario, &results, tolerance);
                    if !outcome.within_tolerance {
                        warn!(
                            stream = %stream,
                            scenario = %scenario.name,
                            fail_rate = outcome.fail_rate,
                            expected = outcome.expected_fail_rate,
                            "Fail rate outside tolerance"
                        );
                    }
                    outcome
                })
                .collect()
        };

        let audit_failure_scenarios = run_scenarios(Scenario::one_hop(&self.config.injection), &pops.provenance_hop1);
        let two_hop_enabled = self.config.run.two_hop;
        let two_hop_audit_failure_scenarios = if two_hop_enabled {
            run_scenarios(Scenario::two_hop(&self.config.injection), &pops.provenance_hop2)
        } else {
            Vec::new()
        };

        let probes = IntegrityProbes::run(
            &records,
            &pops.provenance_hop1,
            &validator,
            &self.config.injection,
            policy,
        );
        let metrics = MetricsAggregator::new(&records, &validator, policy).stream_metrics(
            HopPopulation {
                naive: &pops.naive_hop1,
                provenance: &pops.provenance_hop1,
            },
            two_hop_enabled.then_some(HopPopulation {
                naive: &pops.naive_hop2,
                provenance: &pops.provenance_hop2,
            }),
            reproducible,
            probes,
        );

        info!(
            stream = %stream,
            records = records.len(),
            skipped,
            partial,
            root = %provenance_root_hash,
            "Stream validated"
        );

        Ok(StreamReport {
            stream_name: stream.to_string(),
            source_url: profile.source_url.clone(),
            record_count: records.len(),
            skipped_records: skipped,
            mandatory_fields: profile.mandatory_fields.clone(),
            partial,
            source_root_hash,
            provenance_root_hash,
            metrics,
            audit_failure_scenarios,
            two_hop_audit_failure_scenarios,
        })
    }

    /// Generate text for each record in order. Records whose generation
    /// fails are skipped; reaching the run deadline stops the stream.
    ///
    /// Returns the kept records, their texts, whether the deadline was hit,
    /// and the number of records skipped for generation errors.
    async fn generate(
        &self,
        profile: &StreamProfile,
        records: Vec<Record>,
    ) -> (Vec<Record>, Vec<GeneratedText>, bool, usize) {
        let stream = profile.name.as_str();
        let two_hop = self.config.run.two_hop;
        let mut kept = Vec::with_capacity(records.len());
        let mut texts = Vec::with_capacity(records.len());
        let mut failed = 0;

        for record in records {
            let request = GenerationRequest::Summary {
                stream,
                record: &record,
                fields: &profile.summary_fields,
            };
            let summary = match self.call(&request).await {
                Some(Ok(text)) => text,
                Some(Err(e)) => {
                    warn!(stream = %stream, record_id = %record.record_id, error = %e, "Skipping record: generation failed");
                    failed += 1;
                    continue;
                }
                None => return (kept, texts, true, failed),
            };

            let interpretation = if two_hop {
                let request = GenerationRequest::Interpretation {
                    stream,
                    summary: &summary,
                };
                match self.call(&request).await {
                    Some(Ok(text)) => Some(text),
                    Some(Err(e)) => {
                        warn!(stream = %stream, record_id = %record.record_id, error = %e, "Skipping record: generation failed");
                        failed += 1;
                        continue;
                    }
                    None => return (kept, texts, true, failed),
                }
            } else {
                None
            };

            texts.push(GeneratedText {
                summary,
                interpretation,
            });
            kept.push(record);
        }
        (kept, texts, false, failed)
    }

    /// One throttled call, bounded by the run deadline. `None` means the
    /// deadline passed.
    async fn call(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Option<std::result::Result<String, crate::error::GenerationError>> {
        match self.deadline {
            Some(deadline) => {
                if Instant::now() >= deadline {
                    warn!(stream = %request.stream(), "Run deadline reached; remaining records dropped");
                    return None;
                }
                match tokio::time::timeout_at(deadline, self.source.generate(request)).await {
                    Ok(result) => Some(result),
                    Err(_) => {
                        warn!(stream = %request.stream(), "Run deadline reached; remaining records dropped");
                        None
                    }
                }
            }
            None => Some(self.source.generate(request).await),
        }
    }

    /// Rebuild both root hashes from scratch and compare.
    fn check_reproducible(
        &self,
        stream: &str,
        records: &[Record],
        texts: &[GeneratedText],
        source_root_hash: &ContentHash,
        provenance_root_hash: &ContentHash,
    ) -> Result<bool> {
        let rebuilt: Vec<Record> = records.to_vec();
        let generator = DerivativeGenerator::new(
            self.config.generation.label.clone(),
            self.config.generation.agent_id(),
            self.generated_at,
            self.config.fixity,
        );
        let provenance: Vec<SealedDerivative> = rebuilt
            .iter()
            .zip(texts)
            .map(|(r, t)| generator.provenance_from_record(r, &t.summary))
            .collect();

        for (scope, first, second) in [
            ("source", source_root_hash, source_root(stream, &rebuilt)),
            ("provenance", provenance_root_hash, derivative_root(stream, &provenance)),
        ] {
            if *first != second {
                return Err(ProvenaError::from(ReproducibilityError::RootHashDrift {
                    stream: stream.to_string(),
                    scope: scope.to_string(),
                    first: first.to_string(),
                    second: second.to_string(),
                }));
            }
        }
        Ok(true)
    }
}
