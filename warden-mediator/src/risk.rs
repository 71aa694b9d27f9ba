//! Risk Calculator — deterministic reduction of layer signals to one scalar.
//!
//! Per layer, severity×confidence combine noisy-or style, so several weak
//! findings approach but never exceed 1.0. Layer risks are then blended with
//! fixed weights renormalized over the layers that actually ran, and a small
//! set of escalators rewards the signatures that matter in combination.

use warden_core::config_loader::{LayerWeights, RiskThresholds};

use warden_analyzers::types::{kinds, layers, LayerReport, LayerStatus, Signal, Verdict};

/// Hidden text plus an override phrase is the classic injection signature.
const ESCALATOR_HIDDEN_OVERRIDE: f64 = 0.15;
/// A credential form confirmed by credential-soliciting language.
const ESCALATOR_FORM_CREDENTIAL: f64 = 0.10;
/// Independent layers agreeing is worth more than one layer shouting.
const ESCALATOR_LAYER_DIVERSITY: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct RiskCalculator {
    weights: LayerWeights,
    thresholds: RiskThresholds,
}

impl RiskCalculator {
    pub fn new(weights: LayerWeights, thresholds: RiskThresholds) -> Self {
        Self { weights, thresholds }
    }

    fn weight_for(&self, layer_name: &str) -> f64 {
        match layer_name {
            layers::DOM => self.weights.dom,
            layers::NLP => self.weights.nlp,
            layers::LLM => self.weights.llm,
            // Registered extension layers default to the DOM weight.
            _ => self.weights.dom,
        }
    }

    /// Noisy-or over one layer's signals: `1 − ∏ (1 − severity·confidence)`.
    pub fn layer_risk(signals: &[Signal]) -> f64 {
        let survival: f64 = signals
            .iter()
            .map(|s| 1.0 - (s.severity * s.confidence).clamp(0.0, 1.0))
            .product();
        1.0 - survival
    }

    /// Combined risk over the reports of layers that ran cleanly. Errored and
    /// skipped layers contribute neither signals nor weight; error handling is
    /// the mediator's fail-safe floor, not this function's concern.
    pub fn combined_risk(&self, reports: &[&LayerReport]) -> f64 {
        let ran: Vec<&LayerReport> = reports
            .iter()
            .copied()
            .filter(|r| r.status == LayerStatus::Ok)
            .collect();
        if ran.is_empty() {
            return 0.0;
        }

        let mut weighted = 0.0;
        let mut weight_total = 0.0;
        let mut hot_layers = 0usize;
        for report in &ran {
            let weight = self.weight_for(&report.layer_name);
            let risk = Self::layer_risk(&report.signals);
            weighted += weight * risk;
            weight_total += weight;
            if risk >= self.thresholds.warn {
                hot_layers += 1;
            }
        }
        let mut risk = if weight_total > 0.0 { weighted / weight_total } else { 0.0 };

        let all_signals: Vec<&Signal> = ran.iter().flat_map(|r| r.signals.iter()).collect();
        let has_kind = |kind: &str| all_signals.iter().any(|s| s.kind == kind);

        if has_kind(kinds::HIDDEN_TEXT) && has_kind(kinds::INSTRUCTION_OVERRIDE) {
            risk += ESCALATOR_HIDDEN_OVERRIDE;
        }
        if has_kind(kinds::SUSPICIOUS_FORM) && has_kind(kinds::CREDENTIAL_SOLICIT) {
            risk += ESCALATOR_FORM_CREDENTIAL;
        }
        if hot_layers > 1 {
            risk += ESCALATOR_LAYER_DIVERSITY * (hot_layers - 1) as f64;
        }

        // A single high-severity signal must never be diluted into ALLOW by
        // the weighted blend.
        if all_signals.iter().any(|s| s.severity >= 0.8) {
            risk = risk.max(self.thresholds.warn);
        }

        risk.clamp(0.0, 1.0)
    }

    /// Inclusive lower bounds; the strictest band whose bound is met wins.
    pub fn verdict(&self, risk: f64) -> Verdict {
        if risk >= self.thresholds.block {
            Verdict::Block
        } else if risk >= self.thresholds.confirm {
            Verdict::Confirm
        } else if risk >= self.thresholds.warn {
            Verdict::Warn
        } else {
            Verdict::Allow
        }
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }
}
