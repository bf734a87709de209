//! # Attention Scorer
//!
//! Scores one proposal against the current workspace. Pure and
//! deterministic: the same inputs always yield the same score in [0, 1].
//!
//! ```text
//! score = 0.40·relevance + 0.25·novelty + 0.15·confidence
//!       + 0.10·empirical + 0.10·priority
//! ```

use serde::Serialize;

use crate::text::{jaccard, overlap_ratio, tokenize};
use crate::workspace::{Proposal, ProposalKind, Workspace};

pub const RELEVANCE_WEIGHT: f64 = 0.40;
pub const NOVELTY_WEIGHT: f64 = 0.25;
pub const CONFIDENCE_WEIGHT: f64 = 0.15;
pub const EMPIRICAL_WEIGHT: f64 = 0.10;
pub const PRIORITY_WEIGHT: f64 = 0.10;

/// Relevance when there is no focus to compare against
const NEUTRAL_RELEVANCE: f64 = 0.5;
/// Confidence assumed when the agent reports none
const DEFAULT_CONFIDENCE: f64 = 0.5;
/// Empirical bonus for hypotheses citing a stored tool result
const CITED_EVIDENCE_BONUS: f64 = 0.8;

/// Per-factor breakdown of a score, each factor in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub relevance: f64,
    pub novelty: f64,
    pub confidence: f64,
    pub empirical: f64,
    pub priority: f64,
}

impl ScoreBreakdown {
    /// Weighted total, clamped to [0, 1]
    pub fn total(&self) -> f64 {
        let sum = RELEVANCE_WEIGHT * self.relevance
            + NOVELTY_WEIGHT * self.novelty
            + CONFIDENCE_WEIGHT * self.confidence
            + EMPIRICAL_WEIGHT * self.empirical
            + PRIORITY_WEIGHT * self.priority;
        clamp_unit(sum)
    }
}

/// Scores proposals against a workspace
#[derive(Debug, Clone)]
pub struct AttentionScorer {
    /// Role whose responses count as empirical evidence
    pub challenger_role: String,
}

impl Default for AttentionScorer {
    fn default() -> Self {
        Self::new("challenger")
    }
}

impl AttentionScorer {
    pub fn new(challenger_role: &str) -> Self {
        Self {
            challenger_role: challenger_role.to_string(),
        }
    }

    /// Score a proposal in [0, 1]
    pub fn score(&self, proposal: &Proposal, workspace: &Workspace) -> f64 {
        self.breakdown(proposal, workspace).total()
    }

    /// Score with every factor exposed
    pub fn breakdown(&self, proposal: &Proposal, workspace: &Workspace) -> ScoreBreakdown {
        ScoreBreakdown {
            relevance: relevance(proposal, workspace),
            novelty: novelty(proposal, workspace),
            confidence: clamp_unit(proposal.confidence.unwrap_or(DEFAULT_CONFIDENCE)),
            empirical: self.empirical(proposal, workspace),
            priority: priority(proposal, workspace),
        }
    }

    fn empirical(&self, proposal: &Proposal, workspace: &Workspace) -> f64 {
        match &proposal.kind {
            ProposalKind::ToolResult { .. } => 1.0,
            ProposalKind::Response { .. } if proposal.source == self.challenger_role => 1.0,
            ProposalKind::Hypothesis if workspace.references_tool_result(&proposal.content) => {
                CITED_EVIDENCE_BONUS
            }
            _ => 0.0,
        }
    }
}

fn relevance(proposal: &Proposal, workspace: &Workspace) -> f64 {
    let focus = tokenize(&workspace.current_focus);
    let content = tokenize(&proposal.content);
    overlap_ratio(&content, &focus).unwrap_or(NEUTRAL_RELEVANCE)
}

fn novelty(proposal: &Proposal, workspace: &Workspace) -> f64 {
    let content = tokenize(&proposal.content);
    let max_similarity = workspace
        .hypotheses
        .iter()
        .chain(workspace.decisions.iter())
        .map(|existing| jaccard(&content, &tokenize(&existing.content)))
        .fold(0.0_f64, f64::max);
    clamp_unit(1.0 - max_similarity)
}

fn priority(proposal: &Proposal, workspace: &Workspace) -> f64 {
    match &proposal.kind {
        ProposalKind::Challenge { .. } => 1.0,
        ProposalKind::Response { .. } if workspace.has_open_challenge_for(&proposal.source) => 1.0,
        _ => 0.0,
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}
