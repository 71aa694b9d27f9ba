//! PageWarden policy core.
//!
//! [`mediator::SecurityMediator`] is the single entry point: it runs the
//! analysis layers in order, aggregates their signals through
//! [`risk::RiskCalculator`], and returns one enforceable
//! [`warden_analyzers::types::RiskAssessment`].

pub mod explanation;
pub mod mediator;
pub mod risk;

#[cfg(test)]
mod tests;
