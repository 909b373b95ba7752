//! Anomaly classification for measured trials
//!
//! This module provides:
//! - Classifier bars ([`Thresholds`]) and their validation
//! - The three-way [`Classification`] of a measurement
//! - Data quality reporting for incomplete measurements

mod classifier;

pub use classifier::{classify, inspect, Classification, Thresholds, Verdict};
