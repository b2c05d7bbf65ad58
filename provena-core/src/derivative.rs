//! Derivatives: naive and provenance-first outputs built from a parent.
//!
//! A [`Derivative`] is a tagged variant over a shared [`DerivativeBody`]. The
//! naive shape carries only the derived text. The provenance shape adds the
//! disclosure label, the generating agent, a generation timestamp, the parent
//! link (`parent_sha256`) and a verbatim copy of the parent's mandatory
//! context. Hop-2 provenance derivatives also carry `ancestor_sha256`, the
//! link from their hop-1 parent back to the source record.

use crate::fixity::{self, ContentHash};
use crate::record::{MandatoryContext, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Derivation depth from the source record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hop {
    One,
    Two,
}

impl Hop {
    /// Content key for the derived text at this depth.
    pub fn text_key(self) -> &'static str {
        match self {
            Hop::One => "summary",
            Hop::Two => "interpretation",
        }
    }
}

/// Which workflow produced a derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Naive,
    Provenance,
}

/// Fields shared by both derivative shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivativeBody {
    pub stream: String,
    pub record_id: String,
    pub hop: Hop,
    pub text: String,
}

/// Provenance metadata. Every field is optional so that corruption can
/// remove it; a freshly generated derivative always has all of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceMeta {
    pub generated_label: Option<String>,
    pub generated_by: Option<String>,
    pub generated_at: Option<DateTime<Utc>>,
    pub parent_sha256: Option<ContentHash>,
    /// Hop-2 only: the source record digest the hop-1 parent points at.
    pub ancestor_sha256: Option<ContentHash>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceDerivative {
    pub body: DerivativeBody,
    pub meta: ProvenanceMeta,
    pub context: MandatoryContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Derivative {
    Naive { body: DerivativeBody },
    Provenance(ProvenanceDerivative),
}

/// Controls which fields enter the canonical hashed content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixityPolicy {
    /// Hash `generated_at` as content. Off by default: the wall-clock
    /// capture time differs across independent runs.
    #[serde(default)]
    pub hash_generated_at: bool,
}

impl Derivative {
    pub fn body(&self) -> &DerivativeBody {
        match self {
            Derivative::Naive { body } => body,
            Derivative::Provenance(p) => &p.body,
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            Derivative::Naive { .. } => Mode::Naive,
            Derivative::Provenance(_) => Mode::Provenance,
        }
    }

    pub fn as_provenance(&self) -> Option<&ProvenanceDerivative> {
        match self {
            Derivative::Provenance(p) => Some(p),
            Derivative::Naive { .. } => None,
        }
    }

    pub fn as_provenance_mut(&mut self) -> Option<&mut ProvenanceDerivative> {
        match self {
            Derivative::Provenance(p) => Some(p),
            Derivative::Naive { .. } => None,
        }
    }

    /// Canonical content used for fixity hashing.
    pub fn canonical_content(&self, policy: FixityPolicy) -> Value {
        let body = self.body();
        let mut out = Map::new();
        out.insert(body.hop.text_key().into(), Value::from(body.text.as_str()));

        if let Derivative::Provenance(p) = self {
            let meta = &p.meta;
            if let Some(label) = &meta.generated_label {
                out.insert("generated_label".into(), Value::from(label.as_str()));
            }
            if let Some(agent) = &meta.generated_by {
                out.insert("generated_by".into(), Value::from(agent.as_str()));
            }
            if policy.hash_generated_at
                && let Some(at) = &meta.generated_at
            {
                out.insert("generated_at".into(), Value::from(at.to_rfc3339()));
            }
            if let Some(parent) = &meta.parent_sha256 {
                out.insert("parent_sha256".into(), Value::from(parent.as_str()));
            }
            if let Some(ancestor) = &meta.ancestor_sha256 {
                out.insert("ancestor_sha256".into(), Value::from(ancestor.as_str()));
            }
            out.insert("context".into(), Value::Object(p.context.to_json_map()));
        }
        Value::Object(out)
    }

    pub fn content_hash(&self, policy: FixityPolicy) -> ContentHash {
        fixity::hash_value(&self.canonical_content(policy))
    }

    /// All four lineage fields present and non-empty.
    pub fn lineage_fields_present(&self) -> bool {
        match self {
            Derivative::Naive { .. } => false,
            Derivative::Provenance(p) => {
                let m = &p.meta;
                non_empty(&m.generated_label)
                    && non_empty(&m.generated_by)
                    && m.generated_at.is_some()
                    && m.parent_sha256.as_ref().is_some_and(|h| !h.as_str().is_empty())
            }
        }
    }

    /// A non-empty disclosure label marks the content as machine-generated.
    pub fn has_disclosure_label(&self) -> bool {
        match self {
            Derivative::Naive { .. } => false,
            Derivative::Provenance(p) => non_empty(&p.meta.generated_label),
        }
    }

    /// Fraction of `parent` context fields carried verbatim.
    pub fn context_retention(&self, parent: &MandatoryContext) -> f64 {
        if parent.is_empty() {
            return 0.0;
        }
        let Derivative::Provenance(p) = self else {
            return 0.0;
        };
        let kept = parent
            .iter()
            .filter(|(field, value)| p.context.get(field) == Some(*value))
            .count();
        kept as f64 / parent.len() as f64
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_ref().is_some_and(|v| !v.is_empty())
}

/// A derivative together with the fixity digest recorded when it was emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealedDerivative {
    pub derivative: Derivative,
    pub fixity: ContentHash,
}

impl SealedDerivative {
    pub fn seal(derivative: Derivative, policy: FixityPolicy) -> Self {
        let fixity = derivative.content_hash(policy);
        Self { derivative, fixity }
    }

    /// Recompute the digest after a mutation.
    pub fn reseal(&mut self, policy: FixityPolicy) {
        self.fixity = self.derivative.content_hash(policy);
    }

    /// Stored digest matches a fresh recomputation.
    pub fn fixity_holds(&self, policy: FixityPolicy) -> bool {
        self.derivative.content_hash(policy) == self.fixity
    }

    pub fn record_id(&self) -> &str {
        &self.derivative.body().record_id
    }
}

/// Wraps derived text in naive or provenance shape.
///
/// Content origin (deterministic template or generative model) is invisible
/// here: both arrive as plain text and are wrapped identically.
#[derive(Debug, Clone)]
pub struct DerivativeGenerator {
    label: String,
    agent: String,
    generated_at: DateTime<Utc>,
    policy: FixityPolicy,
}

impl DerivativeGenerator {
    pub fn new(
        label: impl Into<String>,
        agent: impl Into<String>,
        generated_at: DateTime<Utc>,
        policy: FixityPolicy,
    ) -> Self {
        Self {
            label: label.into(),
            agent: agent.into(),
            generated_at,
            policy,
        }
    }

    pub fn policy(&self) -> FixityPolicy {
        self.policy
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    /// Naive derivative: text only, no lineage and no context copy.
    pub fn naive(&self, stream: &str, record_id: &str, hop: Hop, text: &str) -> SealedDerivative {
        let derivative = Derivative::Naive {
            body: DerivativeBody {
                stream: stream.to_string(),
                record_id: record_id.to_string(),
                hop,
                text: text.to_string(),
            },
        };
        SealedDerivative::seal(derivative, self.policy)
    }

    /// Hop-1 provenance derivative of a source record.
    pub fn provenance_from_record(&self, record: &Record, text: &str) -> SealedDerivative {
        let derivative = Derivative::Provenance(ProvenanceDerivative {
            body: DerivativeBody {
                stream: record.stream.clone(),
                record_id: record.record_id.clone(),
                hop: Hop::One,
                text: text.to_string(),
            },
            meta: self.meta(record.content_hash(), None),
            context: record.context.clone(),
        });
        SealedDerivative::seal(derivative, self.policy)
    }

    /// Hop-2 provenance derivative built on a hop-1 provenance derivative.
    pub fn provenance_from_derivative(
        &self,
        parent: &ProvenanceDerivative,
        text: &str,
    ) -> SealedDerivative {
        let parent_hash =
            Derivative::Provenance(parent.clone()).content_hash(self.policy);
        let derivative = Derivative::Provenance(ProvenanceDerivative {
            body: DerivativeBody {
                stream: parent.body.stream.clone(),
                record_id: parent.body.record_id.clone(),
                hop: Hop::Two,
                text: text.to_string(),
            },
            meta: self.meta(parent_hash, parent.meta.parent_sha256.clone()),
            context: parent.context.clone(),
        });
        SealedDerivative::seal(derivative, self.policy)
    }

    fn meta(&self, parent: ContentHash, ancestor: Option<ContentHash>) -> ProvenanceMeta {
        ProvenanceMeta {
            generated_label: Some(self.label.clone()),
            generated_by: Some(self.agent.clone()),
            generated_at: Some(self.generated_at),
            parent_sha256: Some(parent),
            ancestor_sha256: ancestor,
        }
    }
}
