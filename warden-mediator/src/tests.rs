#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use warden_analyzers::llm::RecordedProvider;
    use warden_analyzers::types::*;
    use warden_core::config_loader::{LayerWeights, RiskThresholds, WardenConfig};

    use crate::explanation;
    use crate::mediator::{should_invoke_reasoner, SecurityMediator};
    use crate::risk::RiskCalculator;

    fn calculator() -> RiskCalculator {
        RiskCalculator::new(LayerWeights::default(), RiskThresholds::default())
    }

    fn signal(source: &str, kind: &str, severity: f64, confidence: f64) -> Signal {
        Signal::new(source, kind, severity, format!("{} evidence", kind), confidence)
    }

    // ── Risk calculator ─────────────────────────────────────────────────────

    #[test]
    fn test_layer_risk_noisy_or() {
        let signals = vec![
            signal(layers::DOM, kinds::HIDDEN_TEXT, 0.6, 0.9),
            signal(layers::DOM, kinds::RISKY_SCRIPT, 0.4, 0.9),
        ];
        let risk = RiskCalculator::layer_risk(&signals);
        let expected = 1.0 - (1.0 - 0.54) * (1.0 - 0.36);
        assert!((risk - expected).abs() < 1e-9);
    }

    #[test]
    fn test_layer_risk_empty_is_zero() {
        assert_eq!(RiskCalculator::layer_risk(&[]), 0.0);
    }

    #[test]
    fn test_combined_risk_renormalizes_over_ran_layers() {
        let calc = calculator();
        let dom = LayerReport::ok(layers::DOM, vec![signal(layers::DOM, kinds::RISKY_SCRIPT, 0.5, 0.8)], 1);
        let nlp = LayerReport::ok(layers::NLP, vec![], 1);
        let llm_skipped = LayerReport::skipped(layers::LLM);

        let with_skip = calc.combined_risk(&[&dom, &nlp, &llm_skipped]);
        let without = calc.combined_risk(&[&dom, &nlp]);
        assert!((with_skip - without).abs() < 1e-9, "skipped layer must not dilute");
    }

    #[test]
    fn test_combined_risk_excludes_errored_layer_signals() {
        let calc = calculator();
        let errored = LayerReport::error(
            layers::DOM,
            "ParseError",
            vec![signal(layers::DOM, kinds::PARSE_ERROR, 0.9, 0.9)],
            1,
        );
        let nlp = LayerReport::ok(layers::NLP, vec![], 1);
        assert_eq!(calc.combined_risk(&[&errored, &nlp]), 0.0);
    }

    #[test]
    fn test_monotonicity_adding_signal_never_decreases() {
        let calc = calculator();
        let base_signals = vec![signal(layers::NLP, kinds::URGENCY_PRESSURE, 0.3, 0.7)];
        for extra_severity in [0.05, 0.2, 0.5, 0.8, 1.0] {
            let dom = LayerReport::ok(layers::DOM, vec![], 1);
            let nlp = LayerReport::ok(layers::NLP, base_signals.clone(), 1);
            let before = calc.combined_risk(&[&dom, &nlp]);

            let mut extended = base_signals.clone();
            extended.push(signal(layers::NLP, kinds::CREDENTIAL_SOLICIT, extra_severity, 0.7));
            let nlp2 = LayerReport::ok(layers::NLP, extended, 1);
            let after = calc.combined_risk(&[&dom, &nlp2]);
            assert!(after >= before, "severity {} decreased risk", extra_severity);
        }
    }

    #[test]
    fn test_escalator_hidden_plus_override() {
        let calc = calculator();
        let dom = LayerReport::ok(layers::DOM, vec![signal(layers::DOM, kinds::HIDDEN_TEXT, 0.6, 0.9)], 1);
        let nlp_plain = LayerReport::ok(layers::NLP, vec![signal(layers::NLP, kinds::URGENCY_PRESSURE, 0.74, 0.73)], 1);
        let nlp_override = LayerReport::ok(layers::NLP, vec![signal(layers::NLP, kinds::INSTRUCTION_OVERRIDE, 0.74, 0.73)], 1);

        let without = calc.combined_risk(&[&dom, &nlp_plain]);
        let with = calc.combined_risk(&[&dom, &nlp_override]);
        // Same severities, same confidences: the delta is exactly the escalator.
        assert!((with - without - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_high_severity_signal_blocks_allow() {
        let calc = calculator();
        // Lone high-severity, low-confidence signal would otherwise average
        // out below the WARN bound.
        let nlp = LayerReport::ok(layers::NLP, vec![signal(layers::NLP, kinds::INSTRUCTION_OVERRIDE, 0.8, 0.3)], 1);
        let dom = LayerReport::ok(layers::DOM, vec![], 1);
        let risk = calc.combined_risk(&[&dom, &nlp]);
        assert!(risk >= 0.30);
        assert_ne!(calc.verdict(risk), Verdict::Allow);
    }

    #[test]
    fn test_verdict_bands_inclusive_lower_bounds() {
        let calc = calculator();
        assert_eq!(calc.verdict(0.0), Verdict::Allow);
        assert_eq!(calc.verdict(0.29), Verdict::Allow);
        assert_eq!(calc.verdict(0.30), Verdict::Warn);
        assert_eq!(calc.verdict(0.49), Verdict::Warn);
        assert_eq!(calc.verdict(0.50), Verdict::Confirm);
        assert_eq!(calc.verdict(0.79), Verdict::Confirm);
        assert_eq!(calc.verdict(0.80), Verdict::Block);
        assert_eq!(calc.verdict(1.0), Verdict::Block);
    }

    // ── Gray-band policy ────────────────────────────────────────────────────

    #[test]
    fn test_policy_gray_band_truth_table() {
        let band = (0.25, 0.75);
        assert!(!should_invoke_reasoner(0.0, &[], band));
        assert!(!should_invoke_reasoner(0.24, &[], band));
        assert!(should_invoke_reasoner(0.25, &[], band));
        assert!(should_invoke_reasoner(0.5, &[], band));
        assert!(should_invoke_reasoner(0.75, &[], band));
        assert!(!should_invoke_reasoner(0.76, &[], band));
        assert!(!should_invoke_reasoner(1.0, &[], band));
    }

    #[test]
    fn test_policy_always_escalates_named_injection() {
        let band = (0.25, 0.75);
        let override_sig = vec![signal(layers::NLP, kinds::INSTRUCTION_OVERRIDE, 0.8, 0.7)];
        let hijack_sig = vec![signal(layers::NLP, kinds::ROLE_HIJACK, 0.7, 0.7)];
        let other_sig = vec![signal(layers::DOM, kinds::RISKY_SCRIPT, 0.4, 0.9)];
        assert!(should_invoke_reasoner(0.05, &override_sig, band));
        assert!(should_invoke_reasoner(0.99, &hijack_sig, band));
        assert!(!should_invoke_reasoner(0.05, &other_sig, band));
    }

    // ── Explanation generator ───────────────────────────────────────────────

    #[test]
    fn test_explanation_format_and_stability() {
        let reports = vec![
            LayerReport::ok(
                layers::DOM,
                vec![
                    signal(layers::DOM, kinds::RISKY_SCRIPT, 0.4, 0.9),
                    signal(layers::DOM, kinds::HIDDEN_TEXT, 0.8, 0.9),
                ],
                3,
            ),
            LayerReport::ok(layers::NLP, vec![], 1),
            LayerReport::skipped(layers::LLM),
        ];
        let a = explanation::generate(Verdict::Warn, 0.42, &reports);
        let b = explanation::generate(Verdict::Warn, 0.42, &reports);
        assert_eq!(a, b);
        assert!(a.starts_with("SECURITY ASSESSMENT: WARN (risk 0.42)"));
        // Descending severity within the layer.
        let hidden_pos = a.find("hidden_text").unwrap();
        let script_pos = a.find("risky_script").unwrap();
        assert!(hidden_pos < script_pos);
        assert!(a.contains("(severity=0.80)"));
        assert!(a.contains("llm: skipped"));
    }

    #[test]
    fn test_explanation_appends_rationale() {
        let reports = vec![
            LayerReport::ok(layers::DOM, vec![], 1),
            LayerReport::ok(layers::NLP, vec![], 1),
            LayerReport::ok(
                layers::LLM,
                vec![Signal::new(layers::LLM, "llm_flagged_phishing", 0.9, "page imitates a bank login", 0.8)],
                120,
            ),
        ];
        let text = explanation::generate(Verdict::Block, 0.85, &reports);
        assert!(text.contains("Reasoner rationale: page imitates a bank login"));
    }

    // ── Mediator end-to-end (no provider) ───────────────────────────────────

    fn mediator(provider: Option<Arc<RecordedProvider>>) -> SecurityMediator {
        let config = WardenConfig::default();
        let provider = provider.map(|p| p as Arc<dyn warden_analyzers::llm::CompletionProvider>);
        SecurityMediator::new(config, provider).unwrap()
    }

    fn clean_page() -> PageContext {
        PageContext::new(
            "<html><body><h1>News</h1><p>Weather today is sunny.</p></body></html>",
            "https://news.example/",
            "read news",
            ProposedAction::Extract,
        )
    }

    #[tokio::test]
    async fn test_assess_clean_page_allows() {
        let mediator = mediator(None);
        let assessment = mediator.assess(&clean_page()).await.unwrap();
        assert_eq!(assessment.verdict, Verdict::Allow);
        assert!(assessment.risk_score < 0.30);
        assert_eq!(assessment.layer_reports.len(), 3);
        assert!(assessment
            .layer_reports
            .iter()
            .all(|r| r.signals.is_empty()));
        assert!(!assessment.explanation.is_empty());
    }

    #[tokio::test]
    async fn test_assess_deterministic_without_reasoner() {
        let mediator = mediator(None);
        let a = mediator.assess(&clean_page()).await.unwrap();
        let b = mediator.assess(&clean_page()).await.unwrap();
        assert_eq!(a.risk_score, b.risk_score);
        assert_eq!(a.verdict, b.verdict);
        assert_eq!(a.explanation, b.explanation);
    }

    #[tokio::test]
    async fn test_assess_parse_error_never_allows() {
        let mediator = mediator(None);
        let page = PageContext::new(
            "binary garbage with no markup whatsoever",
            "https://x.example/",
            "read",
            ProposedAction::Extract,
        );
        let assessment = mediator.assess(&page).await.unwrap();
        assert_ne!(assessment.verdict, Verdict::Allow);
        assert!(assessment.risk_score >= 0.50);
        let dom = &assessment.layer_reports[0];
        assert_eq!(dom.status, LayerStatus::Error);
    }

    #[tokio::test]
    async fn test_assess_dom_budget_overrun_escalates() {
        let mut config = WardenConfig::default();
        config.timeouts.dom_ms = 0;
        let mediator = SecurityMediator::new(config, None).unwrap();

        let assessment = mediator.assess(&clean_page()).await.unwrap();
        let dom = &assessment.layer_reports[0];
        assert_eq!(dom.status, LayerStatus::Error);
        assert!(dom
            .error_detail
            .as_deref()
            .unwrap()
            .starts_with("LayerTimeout"));
        assert!(assessment.risk_score >= 0.50);
        assert_eq!(assessment.verdict, Verdict::Confirm);
    }

    #[tokio::test]
    async fn test_assess_nlp_budget_overrun_escalates() {
        let mut config = WardenConfig::default();
        config.timeouts.nlp_ms = 0;
        let mediator = SecurityMediator::new(config, None).unwrap();

        let assessment = mediator.assess(&clean_page()).await.unwrap();
        let nlp = &assessment.layer_reports[1];
        assert_eq!(nlp.status, LayerStatus::Error);
        assert!(nlp
            .error_detail
            .as_deref()
            .unwrap()
            .starts_with("LayerTimeout"));
        assert_ne!(assessment.verdict, Verdict::Allow);
    }

    #[tokio::test]
    async fn test_fail_safe_floor_tracks_configured_bands() {
        // A stricter-than-default CONFIRM bound: the floor must follow it,
        // not sit at an absolute 0.50 (which would land in WARN here).
        let mut config = WardenConfig::default();
        config.thresholds.confirm = 0.60;
        config.thresholds.block = 0.90;
        let mediator = SecurityMediator::new(config, None).unwrap();

        let page = PageContext::new(
            "binary garbage with no markup whatsoever",
            "https://x.example/",
            "read",
            ProposedAction::Extract,
        );
        let assessment = mediator.assess(&page).await.unwrap();
        assert_eq!(assessment.layer_reports[0].status, LayerStatus::Error);
        assert!(assessment.risk_score >= 0.60);
        assert_eq!(assessment.verdict, Verdict::Confirm);
    }

    #[tokio::test]
    async fn test_assess_rejects_structurally_invalid_input() {
        let mediator = mediator(None);
        let page = PageContext::new("", "", "", ProposedAction::Other);
        assert!(mediator.assess(&page).await.is_err());
    }

    #[tokio::test]
    async fn test_assess_reasoner_timeout_floors_to_confirm() {
        let mut config = WardenConfig::default();
        config.timeouts.llm_ms = 30;
        let provider = RecordedProvider::new(vec![
            r#"{"aligned": true, "suspected_attack": false, "attack_type": null, "severity": 0.0, "rationale": "late"}"#.into(),
        ])
        .with_delay(Duration::from_millis(300));
        let mediator = SecurityMediator::new(config, Some(Arc::new(provider))).unwrap();

        // Gray-band page: urgency + credential language, nothing structural.
        let page = PageContext::new(
            "<html><body><p>Please verify your account immediately.</p></body></html>",
            "https://mail.example/",
            "read email",
            ProposedAction::Extract,
        );
        let assessment = mediator.assess(&page).await.unwrap();
        let llm = &assessment.layer_reports[2];
        assert_eq!(llm.status, LayerStatus::Error);
        assert_eq!(llm.error_detail.as_deref(), Some("ProviderTimeout"));
        assert!(assessment.risk_score >= 0.70);
        assert_eq!(assessment.verdict, Verdict::Confirm);
    }

    #[tokio::test]
    async fn test_assess_skips_reasoner_outside_gray_band() {
        let provider = Arc::new(RecordedProvider::new(vec![
            r#"{"aligned": true, "suspected_attack": false, "attack_type": null, "severity": 0.0, "rationale": "unused"}"#.into(),
        ]));
        let mediator = mediator(Some(provider));
        let assessment = mediator.assess(&clean_page()).await.unwrap();
        let llm = &assessment.layer_reports[2];
        assert_eq!(llm.status, LayerStatus::Skipped);
    }

    #[tokio::test]
    async fn test_metrics_recorded_per_assessment() {
        let mediator = mediator(None);
        let a = mediator.assess(&clean_page()).await.unwrap();
        mediator.record_labeled(&a, Verdict::Allow);

        let summary = mediator.metrics().summary();
        assert_eq!(summary.total_assessments, 1);
        assert_eq!(summary.verdict_distribution.get("ALLOW"), Some(&1));
        assert!(summary.layers.iter().any(|l| l.layer == "dom"));
        assert_eq!(summary.labeled_samples, 1);
        assert!((summary.accuracy - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_validate_action_without_provider_proceeds() {
        let mediator = mediator(None);
        let validation = mediator.validate_action("click #submit", "a search page").await.unwrap();
        assert!(validation.safe);
        assert_eq!(validation.recommendation, "proceed");
    }
}
