//! # Integration, Convergence & Coherence
//!
//! Read-only signals derived from the post-apply workspace and the
//! session's contribution ledger. Never stored inside the workspace.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::workspace::Workspace;

/// Challenges needed for full marks on the challenge component
const CHALLENGE_TARGET: f64 = 3.0;

/// Who contributed what over the whole session (survives pruning)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContributionLedger {
    /// Hypotheses + decisions applied, per role
    pub by_role: HashMap<String, usize>,
    pub challenges_issued: usize,
}

impl ContributionLedger {
    pub fn record_contribution(&mut self, role: &str) {
        *self.by_role.entry(role.to_string()).or_insert(0) += 1;
    }

    pub fn record_challenge(&mut self) {
        self.challenges_issued += 1;
    }

    pub fn contributions_of(&self, role: &str) -> usize {
        self.by_role.get(role).copied().unwrap_or(0)
    }
}

/// Metrics computed after each round
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundMetrics {
    /// 0–100
    pub integration_score: f64,
    /// 0–1
    pub convergence_rate: f64,
    /// 0–1
    pub coherence_score: f64,
}

/// Computes round metrics for one session
#[derive(Debug, Clone)]
pub struct MetricsEngine {
    pub known_roles: Vec<String>,
    pub max_iterations: u32,
    pub max_tokens: usize,
}

impl MetricsEngine {
    pub fn new(known_roles: Vec<String>, max_iterations: u32, max_tokens: usize) -> Self {
        Self {
            known_roles,
            max_iterations,
            max_tokens,
        }
    }

    pub fn measure(&self, ws: &Workspace, ledger: &ContributionLedger) -> RoundMetrics {
        RoundMetrics {
            integration_score: self.integration_score(ws, ledger),
            convergence_rate: convergence_rate(ws),
            coherence_score: coherence_score(ws),
        }
    }

    /// Breadth and depth of engagement, 0–100
    pub fn integration_score(&self, ws: &Workspace, ledger: &ContributionLedger) -> f64 {
        let participation = self.participation_points(ledger);
        let challenges = 25.0 * (ledger.challenges_issued as f64 / CHALLENGE_TARGET).min(1.0);
        let utilization = utilization_points(ws.token_count(), self.max_tokens);
        let progress = if self.max_iterations == 0 {
            25.0
        } else {
            25.0 * (ws.iteration() as f64 / self.max_iterations as f64).min(1.0)
        };

        (participation + challenges + utilization + progress).clamp(0.0, 100.0)
    }

    fn participation_points(&self, ledger: &ContributionLedger) -> f64 {
        if self.known_roles.is_empty() {
            return 0.0;
        }
        let counts: Vec<usize> = self
            .known_roles
            .iter()
            .map(|role| ledger.contributions_of(role))
            .filter(|&n| n > 0)
            .collect();

        let coverage = 25.0 * counts.len() as f64 / self.known_roles.len() as f64;
        let balance = match (counts.iter().min(), counts.iter().max()) {
            (Some(&min), Some(&max)) if max > 0 => 5.0 * min as f64 / max as f64,
            _ => 0.0,
        };
        coverage + balance
    }
}

/// Full marks in the 50–80% band, 20 above it, linear below
fn utilization_points(tokens: usize, max_tokens: usize) -> f64 {
    if max_tokens == 0 {
        return 20.0;
    }
    let ratio = tokens as f64 / max_tokens as f64;
    if ratio > 0.8 {
        20.0
    } else if ratio >= 0.5 {
        25.0
    } else {
        25.0 * ratio / 0.5
    }
}

/// Share of weight held by decisions; 0 with no contributions
pub fn convergence_rate(ws: &Workspace) -> f64 {
    let decisions = 2.0 * ws.decisions.len() as f64;
    let total = decisions + ws.hypotheses.len() as f64;
    if total == 0.0 {
        0.0
    } else {
        decisions / total
    }
}

/// 1 minus the pressure of pending challenges; 1 with no contributions
pub fn coherence_score(ws: &Workspace) -> f64 {
    let contributions = ws.contribution_count();
    if contributions == 0 {
        return 1.0;
    }
    let pending = ws.pending_challenges.len() as f64;
    1.0 - (pending / contributions as f64).min(1.0)
}
