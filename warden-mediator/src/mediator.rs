//! Security Mediator — the policy enforcement point.
//!
//! One entry point, [`SecurityMediator::assess`]: DOM analysis always, NLP
//! classification always, the LLM reasoner only when the gray-band policy
//! calls for it, then risk aggregation, fail-safe floors, explanation, and
//! metrics. Per-layer failures degrade the assessment; they never escape it.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use warden_core::audit::{AuditLayer, AuditLog, AuditRecord};
use warden_core::config_loader::WardenConfig;
use warden_core::error::{WardenError, WardenResult};
use warden_core::fingerprint::{content_fingerprint, url_hash, FingerprintCache};
use warden_core::metrics::MetricsCollector;

use warden_analyzers::dom::{DomAnalyzer, TextExtraction};
use warden_analyzers::llm::{ActionValidation, CompletionProvider, LlmReasoner};
use warden_analyzers::nlp::NlpClassifier;
use warden_analyzers::types::{
    kinds, layers, LayerReport, LayerStatus, PageContext, RiskAssessment, Signal, Verdict,
};

use crate::explanation;
use crate::risk::RiskCalculator;

/// How far into the CONFIRM band a lost policy-required reasoner lands.
const REASONER_FLOOR_POSITION: f64 = 2.0 / 3.0;

/// Gray-band invocation policy, kept as a pure function so it is testable
/// without a network: invoke when static analysis is inconclusive, or
/// unconditionally once a named injection signal exists.
pub fn should_invoke_reasoner(provisional_risk: f64, prior_signals: &[Signal], gray_band: (f64, f64)) -> bool {
    if prior_signals
        .iter()
        .any(|s| s.kind == kinds::INSTRUCTION_OVERRIDE || s.kind == kinds::ROLE_HIJACK)
    {
        return true;
    }
    provisional_risk >= gray_band.0 && provisional_risk <= gray_band.1
}

pub struct SecurityMediator {
    config: WardenConfig,
    dom: DomAnalyzer,
    nlp: NlpClassifier,
    reasoner: Option<LlmReasoner>,
    risk: RiskCalculator,
    metrics: MetricsCollector,
    audit: Option<Arc<AuditLog>>,
    cache: Option<FingerprintCache<RiskAssessment>>,
}

impl SecurityMediator {
    /// Build from validated configuration. `provider` is the hosted-model
    /// client; `None` disables the reasoner layer (it reports `skipped`).
    pub fn new(config: WardenConfig, provider: Option<Arc<dyn CompletionProvider>>) -> WardenResult<Self> {
        config.validate()?;

        let nlp = if config.patterns.pattern_file.is_empty() {
            NlpClassifier::new()
        } else {
            NlpClassifier::from_file(&config.patterns.pattern_file)?
        };

        let cache = config
            .analyzer
            .cache_enabled
            .then(|| FingerprintCache::new(config.analyzer.cache_capacity));

        Ok(Self {
            dom: DomAnalyzer::new(config.analyzer.max_html_bytes),
            nlp,
            reasoner: provider.map(LlmReasoner::new),
            risk: RiskCalculator::new(config.weights.clone(), config.thresholds.clone()),
            metrics: MetricsCollector::new(),
            audit: None,
            cache,
            config,
        })
    }

    /// Share a process-lived metrics collector across mediator instances.
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn reasoner_enabled(&self) -> bool {
        self.reasoner.is_some()
    }

    /// Assess one page. Always produces a `RiskAssessment` unless the input
    /// itself is structurally invalid.
    pub async fn assess(&self, page: &PageContext) -> WardenResult<RiskAssessment> {
        if page.html.is_empty() && page.agent_intent.is_empty() {
            return Err(WardenError::Config(
                "structurally invalid PageContext: empty html and empty intent".into(),
            ));
        }

        if let Some(cache) = &self.cache {
            let key = content_fingerprint(&page.html);
            if let Some(hit) = cache.get(&key) {
                debug!(url = %page.url, "Assessment cache hit");
                return Ok(hit);
            }
        }

        let started = Instant::now();
        let deadline = started + Duration::from_millis(self.config.timeouts.total_ms);

        // Layer 1: DOM. Its parse also yields the text split for layer 2.
        let (dom_report, texts) = self.dom.analyze_full(page);
        let dom_report = enforce_layer_budget(dom_report, self.config.timeouts.dom_ms);
        self.record_layer(&dom_report);

        // Layer 2: NLP over visible and hidden text.
        let nlp_report = self.nlp.classify(page, &texts.visible, &texts.hidden);
        let nlp_report = enforce_layer_budget(nlp_report, self.config.timeouts.nlp_ms);
        self.record_layer(&nlp_report);

        // Provisional risk decides whether semantic reasoning is warranted.
        let provisional = self.risk.combined_risk(&[&dom_report, &nlp_report]);
        let prior_signals: Vec<Signal> = [&dom_report, &nlp_report]
            .iter()
            .filter(|r| r.status == LayerStatus::Ok)
            .flat_map(|r| r.signals.iter().cloned())
            .collect();
        let gray_band = (self.config.reasoner.gray_low, self.config.reasoner.gray_high);
        let policy_invoke = should_invoke_reasoner(provisional, &prior_signals, gray_band);

        let llm_report = self
            .run_reasoner(page, &prior_signals, &texts, policy_invoke, deadline)
            .await;
        self.record_layer(&llm_report);

        // Final aggregation over everything that ran, then fail-safe floors.
        // Both floors sit inside the CONFIRM band wherever the thresholds
        // are configured: a mandatory-layer error pins risk to the band's
        // lower bound, a lost policy-required reasoner two thirds of the way
        // to BLOCK (0.50 and 0.70 at the default thresholds).
        let mut risk_score = self
            .risk
            .combined_risk(&[&dom_report, &nlp_report, &llm_report]);
        let thresholds = self.risk.thresholds();
        if dom_report.status == LayerStatus::Error || nlp_report.status == LayerStatus::Error {
            risk_score = risk_score.max(thresholds.confirm);
        }
        if policy_invoke && llm_report.status == LayerStatus::Error {
            let reasoner_floor = thresholds.confirm
                + (thresholds.block - thresholds.confirm) * REASONER_FLOOR_POSITION;
            risk_score = risk_score.max(reasoner_floor);
        }

        let verdict = self.risk.verdict(risk_score);
        let layer_reports = vec![dom_report, nlp_report, llm_report];
        let explanation = explanation::generate(verdict, risk_score, &layer_reports);

        let assessment = RiskAssessment {
            risk_score,
            verdict,
            layer_reports,
            explanation,
            decided_at: chrono::Utc::now().timestamp(),
            total_elapsed_ms: started.elapsed().as_millis() as u64,
        };

        match verdict {
            Verdict::Block | Verdict::Confirm => warn!(
                url = %page.url,
                verdict = %verdict,
                risk = format!("{:.3}", risk_score),
                signals = assessment.layer_reports.iter().map(|r| r.signals.len()).sum::<usize>(),
                "Page assessment"
            ),
            _ => debug!(url = %page.url, verdict = %verdict, risk = risk_score, "Page assessment"),
        }

        // Recording is best-effort: a full audit disk or poisoned metrics
        // store must not change the verdict.
        self.metrics.record_verdict(verdict.as_str());
        if let Some(audit) = &self.audit {
            let record = AuditRecord {
                timestamp: assessment.decided_at,
                url_hash: url_hash(&page.url),
                verdict: verdict.as_str().into(),
                risk: risk_score,
                layers: assessment
                    .layer_reports
                    .iter()
                    .map(|r| AuditLayer {
                        layer: r.layer_name.clone(),
                        status: r.status.as_str().into(),
                        signals: r.signals.len(),
                        elapsed_ms: r.elapsed_ms,
                    })
                    .collect(),
            };
            if let Err(e) = audit.append(&record) {
                warn!(error = %e, "Audit append failed");
            }
        }
        if let Some(cache) = &self.cache {
            cache.insert(content_fingerprint(&page.html), assessment.clone());
        }

        Ok(assessment)
    }

    /// Record a ground-truth label for the last decision on this page class.
    pub fn record_labeled(&self, assessment: &RiskAssessment, expected: Verdict) {
        self.metrics
            .record_labeled(assessment.verdict.as_str(), expected.as_str());
    }

    /// Supplemental pre-action check against the reasoner. Without a
    /// configured provider the action passes (the page assessment is the
    /// enforcement point; this is an extra opinion, not a gate).
    pub async fn validate_action(&self, action_desc: &str, page_excerpt: &str) -> WardenResult<ActionValidation> {
        match &self.reasoner {
            Some(reasoner) => {
                reasoner
                    .validate_action(
                        action_desc,
                        page_excerpt,
                        Duration::from_millis(self.config.timeouts.llm_ms),
                    )
                    .await
            }
            None => Ok(ActionValidation {
                safe: true,
                risk_level: "low".into(),
                concerns: Vec::new(),
                recommendation: "proceed".into(),
            }),
        }
    }

    async fn run_reasoner(
        &self,
        page: &PageContext,
        prior_signals: &[Signal],
        texts: &TextExtraction,
        policy_invoke: bool,
        deadline: Instant,
    ) -> LayerReport {
        if !policy_invoke {
            return LayerReport::skipped(layers::LLM);
        }
        let Some(reasoner) = &self.reasoner else {
            debug!("Reasoner required by policy but no provider configured");
            return LayerReport::skipped(layers::LLM);
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            // Total budget already spent; the unfinished layer is reported,
            // not silently dropped.
            return LayerReport::error(layers::LLM, "ProviderTimeout", Vec::new(), 0);
        }
        let budget = remaining.min(Duration::from_millis(self.config.timeouts.llm_ms));
        reasoner.reason(page, prior_signals, texts, budget).await
    }

    fn record_layer(&self, report: &LayerReport) {
        self.metrics
            .record_layer(&report.layer_name, report.elapsed_ms, report.status.as_str());
    }
}

/// Cooperative timeout for the synchronous layers: the work already
/// happened, but an over-budget layer is demoted to `error` so the fail-safe
/// floor applies rather than trusting a degenerate run.
fn enforce_layer_budget(report: LayerReport, budget_ms: u64) -> LayerReport {
    if report.status == LayerStatus::Ok && report.elapsed_ms >= budget_ms {
        let layer = report.layer_name.clone();
        LayerReport::error(
            &layer,
            format!("LayerTimeout: spent {} ms of {} ms budget", report.elapsed_ms, budget_ms),
            report.signals,
            report.elapsed_ms,
        )
    } else {
        report
    }
}
