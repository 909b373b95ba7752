//! Anomaly search and diagnosis
//!
//! This module provides:
//! - Random and simulated-annealing exploration strategies
//! - The single-trial pipeline (cleanup, execute, aggregate, classify)
//! - Minimal feature set reduction for PFC anomalies
//! - The search loop and its per-run context

mod context;
mod engine;
mod mfs;
mod runner;
mod strategy;

#[cfg(test)]
mod tests;

pub use context::RunContext;
pub use engine::{SearchConfig, SearchEngine, SearchEngineBuilder, SearchReport};
pub use mfs::{signature, MfsReducer, MfsResult, ReductionStep, StepOutcome};
pub use runner::TrialRunner;
pub use strategy::{
    build_strategy, severity, Annealing, AnnealingConfig, Decision, RandomSearch, Strategy,
    StrategyKind,
};
