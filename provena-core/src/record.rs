//! Record normalization: heterogeneous upstream rows into canonical records.
//!
//! Upstream collections arrive as already-fetched JSON arrays (one object per
//! row). A [`StreamProfile`] names the identifier field and the ordered
//! mandatory-context fields for its stream; [`Normalizer`] applies it.

use crate::error::IngestionError;
use crate::fixity::{self, ContentHash};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Per-stream ingestion profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamProfile {
    /// Stream identifier, used in artifacts and root hashes.
    pub name: String,
    /// Where the upstream collector fetched the rows from (informational).
    #[serde(default)]
    pub source_url: Option<String>,
    /// Snapshot file holding the already-fetched rows.
    #[serde(default)]
    pub source_file: Option<PathBuf>,
    /// Field holding the stable record identifier.
    pub id_field: String,
    /// Mandatory-context fields, in the order they are carried forward.
    #[serde(default)]
    pub mandatory_fields: Vec<String>,
    /// Fields used to build derivative text.
    #[serde(default)]
    pub summary_fields: Vec<String>,
}

impl StreamProfile {
    /// The three archive streams of the original validation study.
    pub fn builtin() -> Vec<StreamProfile> {
        vec![
            StreamProfile {
                name: "nyc_archaeology_reports".into(),
                source_url: Some("https://data.cityofnewyork.us/resource/fuzb-9jre.json".into()),
                source_file: Some("data/nyc_archaeology_reports_source_extended.json".into()),
                id_field: "biblioid".into(),
                mandatory_fields: strings(&["biblioid", "borough", "author", "date", "title"]),
                summary_fields: strings(&["title", "date", "borough", "author", "report_abstract"]),
            },
            StreamProfile {
                name: "cleveland_museum_ancient_collections".into(),
                source_url: Some("https://openaccess-api.clevelandart.org/api/artworks/".into()),
                source_file: Some(
                    "data/cleveland_museum_ancient_collections_source_extended.json".into(),
                ),
                id_field: "objectID".into(),
                mandatory_fields: strings(&[
                    "objectID",
                    "department",
                    "title",
                    "culture",
                    "objectDate",
                    "accessionNumber",
                ]),
                summary_fields: strings(&[
                    "title",
                    "culture",
                    "objectDate",
                    "department",
                    "accessionNumber",
                ]),
            },
            StreamProfile {
                name: "aic_ancient_collections".into(),
                source_url: Some("https://api.artic.edu/api/v1/artworks/search".into()),
                source_file: Some("data/aic_ancient_collections_source_extended.json".into()),
                id_field: "id".into(),
                mandatory_fields: strings(&[
                    "id",
                    "title",
                    "date_display",
                    "place_of_origin",
                    "main_reference_number",
                ]),
                summary_fields: strings(&[
                    "title",
                    "date_display",
                    "place_of_origin",
                    "main_reference_number",
                ]),
            },
        ]
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Ordered mandatory-context mapping carried from a parent to its derivatives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MandatoryContext(Vec<(String, String)>);

impl MandatoryContext {
    pub fn new(entries: Vec<(String, String)>) -> Self {
        Self(entries)
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
    }

    /// Remove a field, returning its previous value.
    pub fn remove(&mut self, field: &str) -> Option<String> {
        let idx = self.0.iter().position(|(name, _)| name == field)?;
        Some(self.0.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// JSON object view, used when building canonical content.
    pub fn to_json_map(&self) -> serde_json::Map<String, Value> {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect()
    }
}

/// A canonical, immutable source record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub stream: String,
    pub record_id: String,
    /// Mandatory-context values in profile order.
    pub context: MandatoryContext,
    /// Every normalized field of the upstream row; this is the hashed content.
    pub fields: BTreeMap<String, String>,
}

impl Record {
    /// Canonical content used for fixity hashing.
    pub fn canonical_content(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
                .collect(),
        )
    }

    pub fn content_hash(&self) -> ContentHash {
        fixity::hash_value(&self.canonical_content())
    }

    pub fn field(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or("")
    }
}

/// Outcome of normalizing one upstream batch.
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub records: Vec<Record>,
    pub rejected: Vec<IngestionError>,
}

/// Applies a [`StreamProfile`] to raw upstream rows.
pub struct Normalizer<'a> {
    profile: &'a StreamProfile,
}

impl<'a> Normalizer<'a> {
    pub fn new(profile: &'a StreamProfile) -> Self {
        Self { profile }
    }

    /// Normalize one raw row.
    pub fn normalize(&self, position: usize, raw: &Value) -> Result<Record, IngestionError> {
        let Value::Object(map) = raw else {
            return Err(IngestionError::NotAnObject {
                stream: self.profile.name.clone(),
                position,
            });
        };

        let mut fields: BTreeMap<String, String> = map
            .iter()
            .map(|(k, v)| (k.clone(), stringify(v)))
            .collect();

        let record_id = fields
            .get(&self.profile.id_field)
            .filter(|id| !id.is_empty())
            .cloned()
            .ok_or_else(|| IngestionError::MissingRecordId {
                stream: self.profile.name.clone(),
                position,
                field: self.profile.id_field.clone(),
            })?;

        let mut context = Vec::with_capacity(self.profile.mandatory_fields.len());
        for field in &self.profile.mandatory_fields {
            let value = fields.entry(field.clone()).or_default().clone();
            if value.is_empty() {
                tracing::debug!(
                    stream = %self.profile.name,
                    record_id = %record_id,
                    field = %field,
                    "Mandatory context field is empty"
                );
            }
            context.push((field.clone(), value));
        }

        Ok(Record {
            stream: self.profile.name.clone(),
            record_id,
            context: MandatoryContext::new(context),
            fields,
        })
    }

    /// Normalize a batch, skipping (and collecting) rows that fail.
    ///
    /// Duplicate identifiers keep their first occurrence.
    pub fn normalize_batch(&self, raw: &[Value]) -> NormalizedBatch {
        let mut batch = NormalizedBatch::default();
        let mut seen = HashSet::new();

        for (position, row) in raw.iter().enumerate() {
            match self.normalize(position, row) {
                Ok(record) => {
                    if seen.insert(record.record_id.clone()) {
                        batch.records.push(record);
                    } else {
                        batch.rejected.push(IngestionError::DuplicateRecord {
                            stream: self.profile.name.clone(),
                            record_id: record.record_id,
                        });
                    }
                }
                Err(e) => batch.rejected.push(e),
            }
        }

        for err in &batch.rejected {
            tracing::warn!(stream = %self.profile.name, error = %err, "Skipping record");
        }
        batch
    }
}

/// Convert a raw JSON value into the string form carried by records.
fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(stringify)
            .collect::<Vec<_>>()
            .join("; "),
        Value::Object(_) => fixity::canonical_json(value),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
    }
}

/// Read an already-fetched snapshot (a JSON array of rows) from disk.
pub async fn load_snapshot(path: &Path) -> Result<Vec<Value>, IngestionError> {
    let content =
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| IngestionError::SnapshotRead {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
    let value: Value = serde_json::from_str(&content).map_err(|e| IngestionError::SnapshotRead {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    match value {
        Value::Array(rows) => Ok(rows),
        _ => Err(IngestionError::SnapshotShape {
            path: path.to_path_buf(),
        }),
    }
}

/// Pick `n` evenly spaced records by position.
pub fn sample_by_index(records: Vec<Record>, n: usize) -> Vec<Record> {
    let len = records.len();
    if len <= n {
        return records;
    }
    let keep: HashSet<usize> = (0..n).map(|i| i * len / n).collect();
    records
        .into_iter()
        .enumerate()
        .filter_map(|(i, r)| keep.contains(&i).then_some(r))
        .collect()
}
