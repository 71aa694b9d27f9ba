//! Explanation Generator — deterministic textual justification for a verdict.
//!
//! Same signals in, same string out; snapshot tests depend on it.

use warden_analyzers::types::{layers, LayerReport, LayerStatus, Verdict};

/// Render the verdict headline, per-layer findings in descending severity,
/// and the reasoner's rationale verbatim when that layer ran.
pub fn generate(verdict: Verdict, risk: f64, reports: &[LayerReport]) -> String {
    let mut out = String::new();
    out.push_str(&format!("SECURITY ASSESSMENT: {} (risk {:.2})\n", verdict, risk));

    for report in reports {
        match report.status {
            LayerStatus::Skipped => {
                out.push_str(&format!("\n{}: skipped\n", report.layer_name));
                continue;
            }
            LayerStatus::Error => {
                out.push_str(&format!(
                    "\n{}: error ({})\n",
                    report.layer_name,
                    report.error_detail.as_deref().unwrap_or("unknown")
                ));
            }
            LayerStatus::Ok => {
                if report.signals.is_empty() {
                    continue;
                }
                out.push_str(&format!("\n{}:\n", report.layer_name));
            }
        }

        let mut signals: Vec<_> = report.signals.iter().collect();
        signals.sort_by(|a, b| {
            b.severity
                .partial_cmp(&a.severity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.kind.cmp(&b.kind))
        });
        for signal in signals {
            out.push_str(&format!(
                "- [{}] {} (severity={:.2})\n",
                signal.kind, signal.evidence, signal.severity
            ));
        }
    }

    if let Some(rationale) = reasoner_rationale(reports) {
        out.push_str(&format!("\nReasoner rationale: {}\n", rationale));
    }

    if reports
        .iter()
        .all(|r| r.signals.is_empty() && r.status != LayerStatus::Error)
    {
        out.push_str("\nNo threat signals detected.\n");
    }

    out
}

fn reasoner_rationale(reports: &[LayerReport]) -> Option<&str> {
    reports
        .iter()
        .find(|r| r.layer_name == layers::LLM && r.status == LayerStatus::Ok)
        .and_then(|r| r.signals.first())
        .map(|s| s.evidence.as_str())
}
