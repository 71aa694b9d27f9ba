//! Assessment metrics — per-layer latency, verdict distribution, and
//! ground-truth evaluation counts.
//!
//! Process-lived and shared across mediator instances. Updates serialize
//! under one lock; readers get a snapshot copy via [`MetricsCollector::summary`].

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Rolling latency window per layer (measurements, not raw pages).
const LATENCY_WINDOW: usize = 256;

#[derive(Debug, Clone, Default)]
struct LayerStats {
    invocations: u64,
    errors: u64,
    skips: u64,
    latencies_ms: Vec<f64>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    layers: HashMap<String, LayerStats>,
    verdicts: HashMap<String, u64>,
    /// (predicted, expected) → count
    confusion: HashMap<(String, String), u64>,
    total_assessments: u64,
}

/// Shared metrics collector. Cheap to clone; all clones feed one store.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    inner: Arc<RwLock<MetricsInner>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSummary {
    pub layer: String,
    pub invocations: u64,
    pub errors: u64,
    pub skips: u64,
    pub mean_elapsed_ms: f64,
    pub p95_elapsed_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassReport {
    pub verdict: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_assessments: u64,
    pub layers: Vec<LayerSummary>,
    pub verdict_distribution: HashMap<String, u64>,
    pub labeled_samples: u64,
    pub accuracy: f64,
    pub per_class: Vec<ClassReport>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one layer execution. `status` is the report's status tag
    /// ("ok" / "skipped" / "error").
    pub fn record_layer(&self, layer: &str, elapsed_ms: u64, status: &str) {
        let mut inner = self.inner.write();
        let stats = inner.layers.entry(layer.to_string()).or_default();
        stats.invocations += 1;
        match status {
            "error" => stats.errors += 1,
            "skipped" => stats.skips += 1,
            _ => {}
        }
        if stats.latencies_ms.len() >= LATENCY_WINDOW {
            stats.latencies_ms.remove(0);
        }
        stats.latencies_ms.push(elapsed_ms as f64);
    }

    /// Record the final verdict of one assessment.
    pub fn record_verdict(&self, verdict: &str) {
        let mut inner = self.inner.write();
        *inner.verdicts.entry(verdict.to_string()).or_insert(0) += 1;
        inner.total_assessments += 1;
    }

    /// Record a ground-truth comparison: what the mediator decided vs. what a
    /// labeled corpus says it should have decided.
    pub fn record_labeled(&self, predicted: &str, expected: &str) {
        let mut inner = self.inner.write();
        *inner
            .confusion
            .entry((predicted.to_string(), expected.to_string()))
            .or_insert(0) += 1;
    }

    /// Read-only snapshot of everything accumulated so far.
    pub fn summary(&self) -> MetricsSummary {
        let inner = self.inner.read();

        let mut layers: Vec<LayerSummary> = inner
            .layers
            .iter()
            .map(|(name, s)| LayerSummary {
                layer: name.clone(),
                invocations: s.invocations,
                errors: s.errors,
                skips: s.skips,
                mean_elapsed_ms: mean(&s.latencies_ms),
                p95_elapsed_ms: percentile(&s.latencies_ms, 0.95),
            })
            .collect();
        layers.sort_by(|a, b| a.layer.cmp(&b.layer));

        let labeled: u64 = inner.confusion.values().sum();
        let correct: u64 = inner
            .confusion
            .iter()
            .filter(|((p, e), _)| p == e)
            .map(|(_, c)| *c)
            .sum();

        let mut classes: Vec<String> = inner
            .confusion
            .keys()
            .flat_map(|(p, e)| [p.clone(), e.clone()])
            .collect();
        classes.sort();
        classes.dedup();

        let per_class = classes
            .iter()
            .map(|class| {
                let tp = *inner.confusion.get(&(class.clone(), class.clone())).unwrap_or(&0);
                let fp: u64 = inner
                    .confusion
                    .iter()
                    .filter(|((p, e), _)| p == class && e != class)
                    .map(|(_, c)| *c)
                    .sum();
                let fne: u64 = inner
                    .confusion
                    .iter()
                    .filter(|((p, e), _)| e == class && p != class)
                    .map(|(_, c)| *c)
                    .sum();
                let precision = ratio(tp, tp + fp);
                let recall = ratio(tp, tp + fne);
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassReport {
                    verdict: class.clone(),
                    precision,
                    recall,
                    f1,
                    support: tp + fne,
                }
            })
            .collect();

        MetricsSummary {
            total_assessments: inner.total_assessments,
            layers,
            verdict_distribution: inner.verdicts.clone(),
            labeled_samples: labeled,
            accuracy: ratio(correct, labeled),
            per_class,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((sorted.len() as f64 * p) as usize).min(sorted.len() - 1);
    sorted[idx]
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}
