//! Configuration system for Provena.
//!
//! Uses `figment` for layered configuration: defaults -> user config ->
//! workspace config -> explicit file -> environment. Configuration is loaded
//! from `~/.config/provena/config.toml`, `.provena/config.toml` in the
//! workspace, and an optional file passed on the command line.

use crate::derivative::FixityPolicy;
use crate::error::ConfigError;
use crate::record::StreamProfile;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Top-level configuration for a validation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenaConfig {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub fixity: FixityPolicy,
    #[serde(default)]
    pub injection: InjectionConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default = "StreamProfile::builtin")]
    pub streams: Vec<StreamProfile>,
}

impl Default for ProvenaConfig {
    fn default() -> Self {
        Self {
            run: RunConfig::default(),
            fixity: FixityPolicy::default(),
            injection: InjectionConfig::default(),
            generation: GenerationConfig::default(),
            streams: StreamProfile::builtin(),
        }
    }
}

impl ProvenaConfig {
    /// Reject values that would make the run meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, rate) in [
            ("injection.one_hop_rate", self.injection.one_hop_rate),
            ("injection.two_hop_rate", self.injection.two_hop_rate),
            ("injection.fail_rate_tolerance", self.injection.fail_rate_tolerance),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::Invalid {
                    message: format!("{name} must be within [0, 1], got {rate}"),
                });
            }
        }

        let mut seen = HashSet::new();
        for stream in &self.streams {
            if stream.name.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    message: "stream name must not be empty".into(),
                });
            }
            if stream.id_field.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    message: format!("stream '{}' has an empty id_field", stream.name),
                });
            }
            if !seen.insert(stream.name.as_str()) {
                return Err(ConfigError::Invalid {
                    message: format!("duplicate stream name '{}'", stream.name),
                });
            }
        }

        if self.run.max_parallel_streams == 0 {
            return Err(ConfigError::Invalid {
                message: "run.max_parallel_streams must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Render as TOML, the format `.provena/config.toml` is written in.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid {
            message: format!("cannot render configuration as TOML: {e}"),
        })
    }

    /// Look up a stream profile by name.
    pub fn stream(&self, name: &str) -> Result<&StreamProfile, ConfigError> {
        self.streams
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ConfigError::UnknownStream {
                name: name.to_string(),
            })
    }
}

/// Run-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Streams with fewer usable records fail the run.
    #[serde(default = "default_min_records")]
    pub min_records_per_stream: usize,
    /// Run-level deadline in seconds (0 = none). Records not reached before
    /// the deadline are dropped and the artifact is marked partial.
    #[serde(default)]
    pub timeout_secs: u64,
    /// Build and audit a second derivation hop.
    #[serde(default = "default_true")]
    pub two_hop: bool,
    /// Maximum concurrently processed streams.
    #[serde(default = "default_parallel_streams")]
    pub max_parallel_streams: usize,
    /// Deterministic evenly-spaced sample size per stream.
    #[serde(default)]
    pub sample_per_stream: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            min_records_per_stream: default_min_records(),
            timeout_secs: 0,
            two_hop: true,
            max_parallel_streams: default_parallel_streams(),
            sample_per_stream: None,
        }
    }
}

fn default_min_records() -> usize {
    10
}

fn default_parallel_streams() -> usize {
    4
}

/// Fault-injection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionConfig {
    #[serde(default = "default_one_hop_rate")]
    pub one_hop_rate: f64,
    #[serde(default = "default_two_hop_rate")]
    pub two_hop_rate: f64,
    /// Allowed absolute deviation between observed and expected fail rate.
    #[serde(default = "default_tolerance")]
    pub fail_rate_tolerance: f64,
    /// Index offsets per scenario name; scenarios not listed use their built-in seed.
    #[serde(default)]
    pub seeds: std::collections::BTreeMap<String, u64>,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            one_hop_rate: default_one_hop_rate(),
            two_hop_rate: default_two_hop_rate(),
            fail_rate_tolerance: default_tolerance(),
            seeds: Default::default(),
        }
    }
}

fn default_one_hop_rate() -> f64 {
    0.10
}

fn default_two_hop_rate() -> f64 {
    0.20
}

fn default_tolerance() -> f64 {
    0.01
}

/// Derivative text source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationBackend {
    /// Deterministic field template.
    #[default]
    Template,
    /// Local Ollama `/api/generate` endpoint.
    Ollama,
}

/// Generative-content settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub backend: GenerationBackend,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Disclosure label stamped on provenance derivatives.
    #[serde(default = "default_label")]
    pub label: String,
    /// `generated_by` for template output; model output uses `ollama:<model>`.
    #[serde(default = "default_agent")]
    pub agent: String,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backend: GenerationBackend::default(),
            endpoint: default_endpoint(),
            model: default_model(),
            timeout_secs: default_generation_timeout(),
            temperature: default_temperature(),
            label: default_label(),
            agent: default_agent(),
            retry: RetryConfig::default(),
        }
    }
}

impl GenerationConfig {
    /// The `generated_by` value for the configured backend.
    pub fn agent_id(&self) -> String {
        match self.backend {
            GenerationBackend::Template => self.agent.clone(),
            GenerationBackend::Ollama => format!("ollama:{}", self.model),
        }
    }
}

fn default_endpoint() -> String {
    "http://127.0.0.1:11434/api/generate".to_string()
}

fn default_model() -> String {
    "qwen2.5-coder:1.5b".to_string()
}

fn default_generation_timeout() -> u64 {
    120
}

fn default_temperature() -> f32 {
    0.2
}

fn default_label() -> String {
    "DERIVED_RECORD".to_string()
}

fn default_agent() -> String {
    "deterministic_transform_v2".to_string()
}

/// Retry policy for generation calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_multiplier(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    1000
}

fn default_max_backoff() -> u64 {
    8000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `PROVENA_`, nested with `__`)
/// 2. Explicit config file
/// 3. Workspace-local config (`.provena/config.toml`)
/// 4. User config (`~/.config/provena/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    explicit: Option<&Path>,
) -> Result<ProvenaConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(ProvenaConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "provena", "provena") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".provena").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::Load {
                message: format!("config file not found: {}", path.display()),
            });
        }
        figment = figment.merge(Toml::file(path));
    }

    // PROVENA_RUN__TWO_HOP, PROVENA_GENERATION__MODEL, etc.
    figment = figment.merge(Env::prefixed("PROVENA_").split("__"));

    let config: ProvenaConfig = figment.extract().map_err(|e| ConfigError::Load {
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProvenaConfig::default();
        assert_eq!(config.run.min_records_per_stream, 10);
        assert!(config.run.two_hop);
        assert_eq!(config.injection.one_hop_rate, 0.10);
        assert_eq!(config.injection.two_hop_rate, 0.20);
        assert_eq!(config.generation.backend, GenerationBackend::Template);
        assert!(!config.fixity.hash_generated_at);
        assert_eq!(config.streams.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_agent_id_per_backend() {
        let mut config = GenerationConfig::default();
        assert_eq!(config.agent_id(), "deterministic_transform_v2");
        config.backend = GenerationBackend::Ollama;
        config.model = "llama3".into();
        assert_eq!(config.agent_id(), "ollama:llama3");
    }

    #[test]
    fn test_validate_rejects_bad_rate() {
        let mut config = ProvenaConfig::default();
        config.injection.one_hop_rate = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_validate_rejects_duplicate_streams() {
        let mut config = ProvenaConfig::default();
        let first = config.streams[0].clone();
        config.streams.push(first);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate stream name"));
    }

    #[test]
    fn test_stream_lookup() {
        let config = ProvenaConfig::default();
        assert!(config.stream("aic_ancient_collections").is_ok());
        assert!(matches!(
            config.stream("missing"),
            Err(ConfigError::UnknownStream { .. })
        ));
    }

    #[test]
    fn test_load_explicit_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(
            &path,
            r#"
[run]
min_records_per_stream = 2
two_hop = false

[injection]
one_hop_rate = 0.2

[[streams]]
name = "local"
id_field = "id"
mandatory_fields = ["id", "title"]
summary_fields = ["title"]
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), Some(&path)).unwrap();
        assert_eq!(config.run.min_records_per_stream, 2);
        assert!(!config.run.two_hop);
        assert_eq!(config.injection.one_hop_rate, 0.2);
        assert_eq!(config.injection.two_hop_rate, 0.20);
        assert_eq!(config.streams.len(), 1);
        assert_eq!(config.streams[0].name, "local");
    }

    #[test]
    fn test_toml_rendering_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = ProvenaConfig::default();
        config.injection.seeds.insert("orphan_parent_link".into(), 7);
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();

        let loaded = load_config(None, Some(&path)).unwrap();
        assert_eq!(loaded.streams, config.streams);
        assert_eq!(loaded.injection.seeds.get("orphan_parent_link"), Some(&7));
    }

    #[test]
    fn test_load_missing_explicit_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            load_config(None, Some(&missing)),
            Err(ConfigError::Load { .. })
        ));
    }
}
