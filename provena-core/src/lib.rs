//! # Provena Core
//!
//! Provenance validation and fault-injection audit engine for derived
//! archival records. Provides record normalization, fixity hashing, naive and
//! provenance-first derivative generation over one or two hops, named lineage
//! fault injection, structural auditing, and metrics aggregation.

pub mod artifact;
pub mod audit;
pub mod config;
pub mod derivative;
pub mod error;
pub mod fixity;
pub mod generation;
pub mod inject;
pub mod metrics;
pub mod pipeline;
pub mod record;

// Re-export commonly used types at the crate root.
pub use artifact::{RunReport, RunStatus, StreamReport};
pub use audit::{AuditResult, AuditRule, AuditValidator, LineageIndex, Verdict};
pub use config::{GenerationBackend, ProvenaConfig, load_config};
pub use derivative::{Derivative, DerivativeGenerator, FixityPolicy, Hop, Mode, SealedDerivative};
pub use error::{ProvenaError, Result};
pub use fixity::{ContentHash, root_hash};
pub use generation::{ContentSource, GenerationRequest, OllamaSource, TemplateSource, ThrottledSource};
pub use inject::{FaultInjector, InjectedSet, Scenario, ScenarioKind, injected_indices};
pub use metrics::{HopPopulation, IntegrityProbes, MetricsAggregator, ScenarioOutcome, StreamMetrics};
pub use pipeline::{Pipeline, StreamInput, load_inputs, run_workspace, snapshot_root_hash};
pub use record::{MandatoryContext, Normalizer, Record, StreamProfile};
