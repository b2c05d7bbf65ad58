//! Error types for the Provena audit engine.
//!
//! Uses `thiserror` for a nested taxonomy: per-record recoverable errors
//! (ingestion, generation) and run-level fatal errors (reproducibility,
//! insufficient records). Structural audit violations are *not* errors; they
//! are recorded as [`AuditRule`](crate::audit::AuditRule) failures.

use std::path::PathBuf;

/// Top-level error type for the Provena core library.
#[derive(Debug, thiserror::Error)]
pub enum ProvenaError {
    #[error("Ingestion error: {0}")]
    Ingestion(#[from] IngestionError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Reproducibility error: {0}")]
    Reproducibility(#[from] ReproducibilityError),

    #[error("Run error: {0}")]
    Run(#[from] RunError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProvenaError {
    /// Stable machine-readable kind, emitted in failed-run artifacts.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ingestion(_) => "ingestion_error",
            Self::Generation(_) => "generation_error",
            Self::Reproducibility(_) => "reproducibility_error",
            Self::Run(RunError::InsufficientRecords { .. }) => "insufficient_records",
            Self::Run(_) => "run_error",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::Serialization(_) => "serialization_error",
        }
    }
}

/// Errors while turning upstream records into canonical [`Record`](crate::record::Record)s.
///
/// Per-record variants are skip-and-continue: the record is logged and
/// excluded from every denominator.
#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("record at position {position} in stream '{stream}' is not a JSON object")]
    NotAnObject { stream: String, position: usize },

    #[error("record at position {position} in stream '{stream}' has no '{field}' identifier")]
    MissingRecordId {
        stream: String,
        position: usize,
        field: String,
    },

    #[error("duplicate record id '{record_id}' in stream '{stream}'")]
    DuplicateRecord { stream: String, record_id: String },

    #[error("failed to read snapshot {path}: {message}")]
    SnapshotRead { path: PathBuf, message: String },

    #[error("snapshot {path} must contain a JSON array")]
    SnapshotShape { path: PathBuf },
}

/// Errors from the generative-content provider.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("request failed: {message}")]
    Request { message: String },

    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response parse error: {message}")]
    ResponseParse { message: String },

    #[error("provider returned an empty response")]
    EmptyResponse,

    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

impl GenerationError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request { .. } | Self::Timeout { .. } | Self::EmptyResponse => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::ResponseParse { .. } => false,
        }
    }
}

/// Root hash differs across two independent computations over identical input.
#[derive(Debug, thiserror::Error)]
pub enum ReproducibilityError {
    #[error("{scope} root hash for stream '{stream}' drifted between runs: {first} != {second}")]
    RootHashDrift {
        stream: String,
        scope: String,
        first: String,
        second: String,
    },
}

/// Run-level failures that prevent an OK result artifact.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("stream '{stream}' has {got} usable records, {required} required")]
    InsufficientRecords {
        stream: String,
        got: usize,
        required: usize,
    },

    #[error("stream '{stream}' has no records")]
    EmptyStream { stream: String },

    #[error("stream worker failed: {message}")]
    TaskJoin { message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration load error: {message}")]
    Load { message: String },

    #[error("Unknown stream: {name}")]
    UnknownStream { name: String },
}

/// A type alias for results using the top-level `ProvenaError`.
pub type Result<T> = std::result::Result<T, ProvenaError>;
