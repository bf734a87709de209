//! # Metrics Engine
//!
//! Observability signals computed once per round from the post-apply
//! workspace, plus challenge-effectiveness tracking.

pub mod challenges;
pub mod integration;

pub use challenges::{
    Assessment, ChallengeReport, ChallengeTracker, ChallengedAgent, EmpiricalPatterns,
    EmpiricalPolicy,
};
pub use integration::{
    coherence_score, convergence_rate, ContributionLedger, MetricsEngine, RoundMetrics,
};
