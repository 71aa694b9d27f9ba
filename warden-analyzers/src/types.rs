//! Shared types for the analysis pipeline.

use serde::{Deserialize, Serialize};

/// What the agent intends to do on the page it submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposedAction {
    Navigate,
    Click,
    FillForm,
    Submit,
    Extract,
    Other,
}

impl ProposedAction {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "navigate" => Self::Navigate,
            "click" => Self::Click,
            "fill_form" | "fill" => Self::FillForm,
            "submit" => Self::Submit,
            "extract" | "read" => Self::Extract,
            _ => Self::Other,
        }
    }
}

/// One page the agent wants to interact with. Created per action request,
/// consumed once, discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageContext {
    pub html: String,
    /// May be empty (e.g. about:blank content injection).
    pub url: String,
    /// Short natural-language statement of what the agent is trying to do.
    pub agent_intent: String,
    pub proposed_action: ProposedAction,
    /// Optional CSS selector the action targets.
    pub target: Option<String>,
}

impl PageContext {
    pub fn new(html: impl Into<String>, url: impl Into<String>, intent: impl Into<String>, action: ProposedAction) -> Self {
        Self {
            html: html.into(),
            url: url.into(),
            agent_intent: intent.into(),
            proposed_action: action,
            target: None,
        }
    }

    pub fn with_target(mut self, selector: impl Into<String>) -> Self {
        self.target = Some(selector.into());
        self
    }
}

/// Threat-category tags. Kinds are open strings so pattern families stay
/// configurable as data and the reasoner can mint `llm_flagged_*` kinds;
/// these constants cover everything the builtin detectors emit.
pub mod kinds {
    pub const HIDDEN_TEXT: &str = "hidden_text";
    pub const SUSPICIOUS_FORM: &str = "suspicious_form";
    pub const MALICIOUS_IFRAME: &str = "malicious_iframe";
    pub const RISKY_SCRIPT: &str = "risky_script";
    pub const DECEPTIVE_OVERLAY: &str = "deceptive_overlay";
    pub const PARSE_ERROR: &str = "parse_error";
    pub const OVERSIZE: &str = "oversize";

    pub const INSTRUCTION_OVERRIDE: &str = "instruction_override";
    pub const ROLE_HIJACK: &str = "role_hijack";
    pub const CREDENTIAL_SOLICIT: &str = "credential_solicit";
    pub const URGENCY_PRESSURE: &str = "urgency_pressure";
    pub const EXFILTRATION_CUE: &str = "exfiltration_cue";

    pub const INTENT_MISMATCH: &str = "intent_mismatch";
    pub const LLM_FLAGGED_PREFIX: &str = "llm_flagged_";
}

/// Canonical layer names, shared by reports, weights, and metrics.
pub mod layers {
    pub const DOM: &str = "dom";
    pub const NLP: &str = "nlp";
    pub const LLM: &str = "llm";
}

/// A single finding from one analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Layer that emitted it (`layers::*`).
    pub source: String,
    /// Threat category (`kinds::*` or `llm_flagged_<type>`).
    pub kind: String,
    /// [0, 1].
    pub severity: f64,
    /// Short locator: a selector, a matched excerpt, a quoted phrase.
    pub evidence: String,
    /// [0, 1].
    pub confidence: f64,
}

impl Signal {
    pub fn new(source: &str, kind: &str, severity: f64, evidence: impl Into<String>, confidence: f64) -> Self {
        Self {
            source: source.to_string(),
            kind: kind.to_string(),
            severity: severity.clamp(0.0, 1.0),
            evidence: evidence.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerStatus {
    Ok,
    Skipped,
    Error,
}

impl LayerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerStatus::Ok => "ok",
            LayerStatus::Skipped => "skipped",
            LayerStatus::Error => "error",
        }
    }
}

/// Per-analyzer output: findings plus execution metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerReport {
    pub layer_name: String,
    pub signals: Vec<Signal>,
    pub elapsed_ms: u64,
    pub status: LayerStatus,
    pub error_detail: Option<String>,
}

impl LayerReport {
    pub fn ok(layer: &str, signals: Vec<Signal>, elapsed_ms: u64) -> Self {
        Self {
            layer_name: layer.to_string(),
            signals,
            elapsed_ms,
            status: LayerStatus::Ok,
            error_detail: None,
        }
    }

    pub fn skipped(layer: &str) -> Self {
        Self {
            layer_name: layer.to_string(),
            signals: Vec::new(),
            elapsed_ms: 0,
            status: LayerStatus::Skipped,
            error_detail: None,
        }
    }

    pub fn error(layer: &str, detail: impl Into<String>, signals: Vec<Signal>, elapsed_ms: u64) -> Self {
        Self {
            layer_name: layer.to_string(),
            signals,
            elapsed_ms,
            status: LayerStatus::Error,
            error_detail: Some(detail.into()),
        }
    }
}

/// The mediator's decision, strictest last. `Ord` follows strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Allow,
    Warn,
    Confirm,
    Block,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Allow => "ALLOW",
            Verdict::Warn => "WARN",
            Verdict::Confirm => "CONFIRM",
            Verdict::Block => "BLOCK",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The mediator's return value for one page assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_score: f64,
    pub verdict: Verdict,
    pub layer_reports: Vec<LayerReport>,
    pub explanation: String,
    pub decided_at: i64,
    pub total_elapsed_ms: u64,
}
