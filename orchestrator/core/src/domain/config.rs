// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Strata Configuration Manifest
//!
//! Kubernetes-style manifest (`apiVersion`, `kind`, `metadata`, `spec`) for one
//! Strata process: executor limits, suggestion weights, threshold adaptation,
//! graph and SHGAT hyperparameters and replay settings. Every field has a
//! default so an empty `spec: {}` is a valid configuration.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Typed configuration with discovery and environment overrides

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use strata_cortex::application::{
    BatchTrainerConfig, GraphEngineConfig, PerConfig, ShgatConfig, ThresholdConfig, Thresholds,
};
use strata_cortex::application::graph_algorithms::PageRankConfig;
use strata_cortex::domain::graph::ConfidencePolicy;

pub const API_VERSION: &str = "strata.100monkeys.ai/v1";
pub const KIND: &str = "StrataConfig";
pub const CONFIG_PATH_ENV: &str = "STRATA_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrataConfigManifest {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: ManifestMetadata,
    #[serde(default)]
    pub spec: StrataConfigSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrataConfigSpec {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub suggester: SuggesterConfig,
    #[serde(default)]
    pub thresholds: ThresholdSettings,
    #[serde(default)]
    pub graph: GraphSettings,
    #[serde(default)]
    pub shgat: ShgatSettings,
    #[serde(default)]
    pub training: TrainingSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Tasks of one layer running at the same time.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,
    /// Extra attempts for idempotent capabilities.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Suspend for approval after every non-final layer.
    #[serde(default)]
    pub hil_checkpoints: bool,
    #[serde(default)]
    pub speculation: bool,
    #[serde(default = "default_speculation_k")]
    pub speculation_k: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            task_timeout_ms: default_task_timeout_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            hil_checkpoints: false,
            speculation: false,
            speculation_k: default_speculation_k(),
        }
    }
}

impl ExecutorConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// Weights of the three candidate sources in `suggest_next`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggesterConfig {
    #[serde(default = "default_topology_weight")]
    pub topology_weight: f64,
    #[serde(default = "default_shgat_weight")]
    pub shgat_weight: f64,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    /// Candidates fetched from the vector index before merging.
    #[serde(default = "default_vector_limit")]
    pub vector_limit: usize,
}

impl Default for SuggesterConfig {
    fn default() -> Self {
        Self {
            topology_weight: default_topology_weight(),
            shgat_weight: default_shgat_weight(),
            vector_weight: default_vector_weight(),
            vector_limit: default_vector_limit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSettings {
    #[serde(default = "default_suggestion_threshold")]
    pub suggestion_threshold: f64,
    #[serde(default = "default_explicit_threshold")]
    pub explicit_threshold: f64,
    #[serde(default = "default_threshold_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_window_size")]
    pub window_size: usize,
}

impl Default for ThresholdSettings {
    fn default() -> Self {
        Self {
            suggestion_threshold: default_suggestion_threshold(),
            explicit_threshold: default_explicit_threshold(),
            learning_rate: default_threshold_learning_rate(),
            window_size: default_window_size(),
        }
    }
}

impl ThresholdSettings {
    pub fn to_threshold_config(&self) -> ThresholdConfig {
        ThresholdConfig {
            initial: Thresholds {
                suggestion_threshold: self.suggestion_threshold,
                explicit_threshold: self.explicit_threshold,
            },
            learning_rate: self.learning_rate,
            window_size: self.window_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSettings {
    #[serde(default)]
    pub confidence_policy: ConfidencePolicy,
    #[serde(default = "default_transition_alpha")]
    pub transition_alpha: f64,
    #[serde(default = "default_damping")]
    pub pagerank_damping: f64,
    #[serde(default = "default_pagerank_iterations")]
    pub pagerank_max_iterations: usize,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            confidence_policy: ConfidencePolicy::default(),
            transition_alpha: default_transition_alpha(),
            pagerank_damping: default_damping(),
            pagerank_max_iterations: default_pagerank_iterations(),
        }
    }
}

impl GraphSettings {
    pub fn to_engine_config(&self) -> GraphEngineConfig {
        GraphEngineConfig {
            pagerank: PageRankConfig {
                damping: self.pagerank_damping,
                max_iterations: self.pagerank_max_iterations,
                ..PageRankConfig::default()
            },
            confidence_policy: self.confidence_policy,
            transition_alpha: self.transition_alpha,
            ..GraphEngineConfig::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShgatSettings {
    /// Must match the embedding model's dimension.
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
    #[serde(default = "default_hidden_dim")]
    pub hidden_dim: usize,
    #[serde(default = "default_num_heads")]
    pub num_heads: usize,
    #[serde(default = "default_shgat_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for ShgatSettings {
    fn default() -> Self {
        Self {
            embedding_dim: default_embedding_dim(),
            hidden_dim: default_hidden_dim(),
            num_heads: default_num_heads(),
            learning_rate: default_shgat_learning_rate(),
            seed: default_seed(),
        }
    }
}

impl ShgatSettings {
    pub fn to_shgat_config(&self) -> ShgatConfig {
        ShgatConfig {
            embedding_dim: self.embedding_dim,
            hidden_dim: self.hidden_dim,
            num_heads: self.num_heads,
            learning_rate: self.learning_rate,
            seed: self.seed,
            ..ShgatConfig::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSettings {
    #[serde(default = "default_replay_capacity")]
    pub replay_capacity: usize,
    #[serde(default = "default_replay_alpha")]
    pub replay_alpha: f64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_beta_start")]
    pub beta_start: f64,
    #[serde(default = "default_trace_limit")]
    pub trace_limit: usize,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            replay_capacity: default_replay_capacity(),
            replay_alpha: default_replay_alpha(),
            batch_size: default_batch_size(),
            beta_start: default_beta_start(),
            trace_limit: default_trace_limit(),
        }
    }
}

impl TrainingSettings {
    pub fn to_per_config(&self) -> PerConfig {
        PerConfig {
            capacity: self.replay_capacity,
            alpha: self.replay_alpha,
            ..PerConfig::default()
        }
    }

    pub fn to_batch_config(&self) -> BatchTrainerConfig {
        BatchTrainerConfig {
            trace_limit: self.trace_limit,
            batch_size: self.batch_size,
            beta_start: self.beta_start,
            ..BatchTrainerConfig::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `compact` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_max_concurrency() -> usize {
    4
}

fn default_task_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_speculation_k() -> usize {
    5
}

fn default_topology_weight() -> f64 {
    0.4
}

fn default_shgat_weight() -> f64 {
    0.4
}

fn default_vector_weight() -> f64 {
    0.2
}

fn default_vector_limit() -> usize {
    20
}

fn default_suggestion_threshold() -> f64 {
    0.7
}

fn default_explicit_threshold() -> f64 {
    0.5
}

fn default_threshold_learning_rate() -> f64 {
    0.05
}

fn default_window_size() -> usize {
    50
}

fn default_transition_alpha() -> f64 {
    0.2
}

fn default_damping() -> f64 {
    0.85
}

fn default_pagerank_iterations() -> usize {
    100
}

fn default_embedding_dim() -> usize {
    64
}

fn default_hidden_dim() -> usize {
    16
}

fn default_num_heads() -> usize {
    4
}

fn default_shgat_learning_rate() -> f64 {
    0.1
}

fn default_seed() -> u64 {
    42
}

fn default_replay_capacity() -> usize {
    10_000
}

fn default_replay_alpha() -> f64 {
    0.6
}

fn default_batch_size() -> usize {
    32
}

fn default_beta_start() -> f64 {
    0.4
}

fn default_trace_limit() -> usize {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for StrataConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "strata".to_string(),
                version: None,
                labels: None,
            },
            spec: StrataConfigSpec::default(),
        }
    }
}

impl StrataConfigManifest {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover a configuration file:
    /// 1. `STRATA_CONFIG_PATH`
    /// 2. `./strata-config.yaml`
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./strata-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        None
    }

    /// An explicit path must load. Otherwise discovery, then defaults.
    /// Environment overrides apply in every case.
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?
        } else if let Some(path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", path);
            Self::from_yaml_file(path)?
        } else {
            tracing::warn!("No configuration file found. Using defaults.");
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Container deployments override selected fields through `STRATA_*`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("STRATA_HIL_CHECKPOINTS") {
            if let Some(flag) = parse_flag("STRATA_HIL_CHECKPOINTS", &val) {
                self.spec.executor.hil_checkpoints = flag;
            }
        }
        if let Some(val) = lookup("STRATA_SPECULATION") {
            if let Some(flag) = parse_flag("STRATA_SPECULATION", &val) {
                self.spec.executor.speculation = flag;
            }
        }
        if let Some(val) = lookup("STRATA_MAX_CONCURRENCY") {
            match val.parse::<usize>() {
                Ok(n) => {
                    tracing::info!("Environment override: STRATA_MAX_CONCURRENCY={}", n);
                    self.spec.executor.max_concurrency = n;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for STRATA_MAX_CONCURRENCY: '{}'. Ignoring.",
                    val
                ),
            }
        }
        if let Some(val) = lookup("STRATA_TASK_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(ms) => {
                    tracing::info!("Environment override: STRATA_TASK_TIMEOUT_MS={}", ms);
                    self.spec.executor.task_timeout_ms = ms;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for STRATA_TASK_TIMEOUT_MS: '{}'. Ignoring.",
                    val
                ),
            }
        }
        if let Some(val) = lookup("STRATA_LOG_LEVEL") {
            tracing::info!("Environment override: STRATA_LOG_LEVEL={}", val);
            self.spec.logging.level = val;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }
        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }
        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let executor = &self.spec.executor;
        if executor.max_concurrency == 0 {
            anyhow::bail!("spec.executor.max_concurrency must be at least 1");
        }
        if executor.task_timeout_ms == 0 {
            anyhow::bail!("spec.executor.task_timeout_ms must be positive");
        }
        if executor.heartbeat_interval_ms == 0 {
            anyhow::bail!("spec.executor.heartbeat_interval_ms must be positive");
        }

        let s = &self.spec.suggester;
        for (name, weight) in [
            ("topology_weight", s.topology_weight),
            ("shgat_weight", s.shgat_weight),
            ("vector_weight", s.vector_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                anyhow::bail!("spec.suggester.{} must be a non-negative number", name);
            }
        }

        let t = &self.spec.thresholds;
        for (name, value) in [
            ("suggestion_threshold", t.suggestion_threshold),
            ("explicit_threshold", t.explicit_threshold),
            ("learning_rate", t.learning_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("spec.thresholds.{} must be within [0, 1]", name);
            }
        }
        if t.window_size == 0 {
            anyhow::bail!("spec.thresholds.window_size must be at least 1");
        }

        let shgat = &self.spec.shgat;
        if shgat.embedding_dim == 0 || shgat.hidden_dim == 0 || shgat.num_heads == 0 {
            anyhow::bail!("spec.shgat dimensions must be positive");
        }
        if !matches!(self.spec.logging.format.as_str(), "compact" | "json") {
            anyhow::bail!(
                "Invalid spec.logging.format: '{}'. Must be 'compact' or 'json'",
                self.spec.logging.format
            );
        }
        if !(0.0..=1.0).contains(&self.spec.training.replay_alpha) {
            anyhow::bail!("spec.training.replay_alpha must be within [0, 1]");
        }
        Ok(())
    }
}

fn parse_flag(key: &str, val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => {
            tracing::info!("Environment override: {}=true", key);
            Some(true)
        }
        "false" | "0" | "no" | "off" => {
            tracing::info!("Environment override: {}=false", key);
            Some(false)
        }
        _ => {
            tracing::warn!(
                "Invalid value for {}: '{}'. Expected true/false. Ignoring.",
                key,
                val
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = StrataConfigManifest::default();
        assert_eq!(manifest.api_version, API_VERSION);
        assert_eq!(manifest.kind, KIND);
        assert_eq!(manifest.spec.executor.max_concurrency, 4);
        assert!(!manifest.spec.executor.hil_checkpoints);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_partial_spec_uses_defaults() {
        let yaml = r#"
apiVersion: strata.100monkeys.ai/v1
kind: StrataConfig
metadata:
  name: test-node
spec:
  executor:
    max_concurrency: 8
    hil_checkpoints: true
  graph:
    confidence_policy:
      policy: exponential_moving_average
      alpha: 0.3
"#;
        let manifest = StrataConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.metadata.name, "test-node");
        assert_eq!(manifest.spec.executor.max_concurrency, 8);
        assert!(manifest.spec.executor.hil_checkpoints);
        assert_eq!(manifest.spec.executor.max_retries, 2);
        assert_eq!(
            manifest.spec.graph.confidence_policy,
            ConfidencePolicy::ExponentialMovingAverage { alpha: 0.3 }
        );
        assert_eq!(manifest.spec.suggester, SuggesterConfig::default());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata-config.yaml");

        let mut manifest = StrataConfigManifest::default();
        manifest.metadata.labels = Some(HashMap::from([(
            "environment".to_string(),
            "test".to_string(),
        )]));
        manifest.spec.thresholds.window_size = 10;
        manifest.to_yaml_file(&path).unwrap();

        let parsed = StrataConfigManifest::from_yaml_file(&path).unwrap();
        assert_eq!(parsed, manifest);

        let loaded = StrataConfigManifest::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.spec.thresholds.window_size, 10);
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let result = StrataConfigManifest::load_or_default(Some(PathBuf::from(
            "/nonexistent/strata-config.yaml",
        )));
        assert!(result.is_err());
    }

    #[test]
    fn test_overrides() {
        let mut manifest = StrataConfigManifest::default();
        manifest.apply_overrides(|key| match key {
            "STRATA_HIL_CHECKPOINTS" => Some("yes".to_string()),
            "STRATA_MAX_CONCURRENCY" => Some("not-a-number".to_string()),
            "STRATA_TASK_TIMEOUT_MS" => Some("250".to_string()),
            _ => None,
        });
        assert!(manifest.spec.executor.hil_checkpoints);
        assert_eq!(manifest.spec.executor.max_concurrency, 4);
        assert_eq!(manifest.spec.executor.task_timeout_ms, 250);
    }

    #[test]
    fn test_validation() {
        let mut manifest = StrataConfigManifest::default();
        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());

        let mut manifest = StrataConfigManifest::default();
        manifest.spec.thresholds.suggestion_threshold = 1.5;
        assert!(manifest.validate().is_err());

        let mut manifest = StrataConfigManifest::default();
        manifest.spec.executor.max_concurrency = 0;
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_cortex_config_conversion() {
        let spec = StrataConfigSpec::default();
        assert_eq!(spec.shgat.to_shgat_config(), ShgatConfig::default());
        assert_eq!(spec.training.to_per_config(), PerConfig::default());
        assert_eq!(spec.thresholds.to_threshold_config(), ThresholdConfig::default());
        assert_eq!(
            spec.graph.to_engine_config().confidence_policy,
            ConfidencePolicy::Replace
        );
    }
}
