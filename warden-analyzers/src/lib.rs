//! PageWarden analysis layers.
//!
//! Three detectors with one output contract ([`types::LayerReport`]):
//!
//! - [`dom::DomAnalyzer`] — static DOM inspection, never executes scripts
//! - [`nlp::NlpClassifier`] — injection / social-engineering phrase scan
//! - [`llm::LlmReasoner`] — semantic intent check against a hosted model
//!
//! The mediator crate composes them; nothing here decides a verdict.

pub mod dom;
pub mod llm;
pub mod nlp;
pub mod types;
