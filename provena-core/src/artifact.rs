//! Machine-readable run artifact.

use crate::error::ProvenaError;
use crate::fixity::ContentHash;
use crate::metrics::{ScenarioOutcome, StreamMetrics};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall run status. Anything but `Ok` must not be read as a clean result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    /// The run deadline cut off generation; unreached records were dropped.
    Partial,
    Failed { kind: String, message: String },
}

impl RunStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, RunStatus::Failed { .. })
    }
}

/// Per-stream section of the artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamReport {
    pub stream_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub record_count: usize,
    /// Records dropped by ingestion or generation errors.
    pub skipped_records: usize,
    pub mandatory_fields: Vec<String>,
    pub partial: bool,
    pub source_root_hash: ContentHash,
    pub provenance_root_hash: ContentHash,
    pub metrics: StreamMetrics,
    pub audit_failure_scenarios: Vec<ScenarioOutcome>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub two_hop_audit_failure_scenarios: Vec<ScenarioOutcome>,
}

/// The full result set of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub total_records: usize,
    pub skipped_records: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_llm_calls: Option<u64>,
    pub streams: Vec<StreamReport>,
}

impl RunReport {
    /// Artifact for a run that hit a fatal condition. Carries no metrics.
    pub fn failed(run_id: Uuid, started_at: DateTime<Utc>, error: &ProvenaError) -> Self {
        Self {
            run_id,
            status: RunStatus::Failed {
                kind: error.kind().to_string(),
                message: error.to_string(),
            },
            started_at,
            generated_at: Utc::now(),
            total_records: 0,
            skipped_records: 0,
            model: None,
            total_llm_calls: None,
            streams: Vec::new(),
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
