//! # Config Loader — Loads and validates TOML configuration
//!
//! Reads `warden.toml` (or a custom path) and deserializes into typed config
//! structs. Missing file falls back to defaults; invalid thresholds or
//! weights are fatal at startup.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::error::{WardenError, WardenResult};

/// Top-level PageWarden configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub thresholds: RiskThresholds,
    #[serde(default)]
    pub weights: LayerWeights,
    #[serde(default)]
    pub reasoner: ReasonerConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub patterns: PatternConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub log_level: String,
    /// Append-only JSONL audit trail; empty disables it.
    pub audit_log: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self { log_level: "info".into(), audit_log: String::new() }
    }
}

/// Inclusive lower bounds for each verdict band. Anything below `warn` is ALLOW.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub block: f64,
    pub confirm: f64,
    pub warn: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self { block: 0.80, confirm: 0.50, warn: 0.30 }
    }
}

/// Aggregation weights per analysis layer, renormalized over layers that ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerWeights {
    pub dom: f64,
    pub nlp: f64,
    pub llm: f64,
}

impl Default for LayerWeights {
    fn default() -> Self {
        Self { dom: 0.30, nlp: 0.30, llm: 0.40 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonerConfig {
    /// API key for the hosted model; falls back to $GEMINI_API_KEY.
    /// Absent both ways, the reasoner layer reports `skipped`.
    pub api_key: String,
    pub model: String,
    /// Gray band [gray_low, gray_high]: the reasoner runs only when the
    /// provisional risk lands inside it (or a named injection signal exists).
    pub gray_low: f64,
    pub gray_high: f64,
    pub temperature: f64,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gemini-2.5-flash-lite".into(),
            gray_low: 0.25,
            gray_high: 0.75,
            temperature: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub dom_ms: u64,
    pub nlp_ms: u64,
    pub llm_ms: u64,
    pub total_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { dom_ms: 500, nlp_ms: 200, llm_ms: 8_000, total_ms: 10_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Pages above this are truncated and flagged `oversize`.
    pub max_html_bytes: usize,
    /// Fingerprint-keyed assessment cache. Off by default: cached records
    /// repeat their original timing fields.
    pub cache_enabled: bool,
    pub cache_capacity: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self { max_html_bytes: 5 * 1024 * 1024, cache_enabled: false, cache_capacity: 1_024 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternConfig {
    /// External TOML pattern table for the NLP classifier; empty uses the
    /// builtin families.
    pub pattern_file: String,
}

impl WardenConfig {
    /// Load config from a TOML file path. A missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> WardenResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: WardenConfig = toml::from_str(&content)
            .map_err(|e| WardenError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        info!(
            path = %path.display(),
            block = config.thresholds.block,
            confirm = config.thresholds.confirm,
            warn = config.thresholds.warn,
            reasoner = %config.reasoner.model,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Save current config to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> WardenResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| WardenError::Config(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Startup validation. Bad thresholds or weights are fatal: a mediator
    /// built on them would map risks to the wrong bands silently.
    pub fn validate(&self) -> WardenResult<()> {
        let t = &self.thresholds;
        for (name, v) in [("block", t.block), ("confirm", t.confirm), ("warn", t.warn)] {
            if !(0.0..=1.0).contains(&v) {
                return Err(WardenError::Config(format!("threshold `{}` out of [0,1]: {}", name, v)));
            }
        }
        if !(t.warn <= t.confirm && t.confirm <= t.block) {
            return Err(WardenError::Config(format!(
                "thresholds must satisfy warn <= confirm <= block, got {} / {} / {}",
                t.warn, t.confirm, t.block
            )));
        }
        let w = &self.weights;
        if w.dom < 0.0 || w.nlp < 0.0 || w.llm < 0.0 {
            return Err(WardenError::Config("layer weights must be non-negative".into()));
        }
        if w.dom + w.nlp + w.llm <= 0.0 {
            return Err(WardenError::Config("layer weights must not all be zero".into()));
        }
        let r = &self.reasoner;
        if !(0.0..=1.0).contains(&r.gray_low)
            || !(0.0..=1.0).contains(&r.gray_high)
            || r.gray_low > r.gray_high
        {
            return Err(WardenError::Config(format!(
                "gray band must satisfy 0 <= low <= high <= 1, got [{}, {}]",
                r.gray_low, r.gray_high
            )));
        }
        if self.timeouts.total_ms == 0 {
            return Err(WardenError::Config("total timeout must be positive".into()));
        }
        Ok(())
    }

    /// Resolved reasoner credential: config first, then environment.
    pub fn reasoner_api_key(&self) -> Option<String> {
        if !self.reasoner.api_key.is_empty() {
            return Some(self.reasoner.api_key.clone());
        }
        std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty())
    }
}
