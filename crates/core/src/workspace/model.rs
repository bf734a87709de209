//! # Workspace Model
//!
//! The bounded shared blackboard one session operates on. The loop is the
//! only writer; agents receive an immutable snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::proposal::{Proposal, ProposalKind};

/// Approximate characters per token for the budget estimate
const CHARS_PER_TOKEN: usize = 4;

/// An applied hypothesis or decision
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceEntry {
    /// Agent that proposed it
    pub source: String,
    pub content: String,
    pub confidence: Option<f64>,
    /// Round in which it was applied
    pub iteration: u32,
    pub timestamp: DateTime<Utc>,
    /// Only meaningful for decisions
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_final: bool,
}

/// Value stored under a tool-result key
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub value: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    /// Insertion counter, breaks timestamp ties during eviction
    pub seq: u64,
}

/// Key-ordered tool results (deterministic serialization)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ToolResults {
    entries: BTreeMap<String, ToolResult>,
}

impl ToolResults {
    /// Insert or replace a result. Returns true if the key already existed.
    pub fn upsert(&mut self, key: &str, value: serde_json::Value) -> bool {
        let seq = self.entries.values().map(|r| r.seq + 1).max().unwrap_or(0);
        self.entries
            .insert(
                key.to_string(),
                ToolResult {
                    value,
                    timestamp: Utc::now(),
                    seq,
                },
            )
            .is_some()
    }

    pub fn get(&self, key: &str) -> Option<&ToolResult> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Key of the oldest result by (timestamp, seq)
    pub fn oldest_key(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|(_, r)| (r.timestamp, r.seq))
            .map(|(k, _)| k.clone())
    }

    pub fn remove(&mut self, key: &str) -> Option<ToolResult> {
        self.entries.remove(key)
    }
}

/// A past session recalled at session start
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpisodicMatch {
    pub session_id: String,
    pub summary: String,
    pub similarity: f64,
}

/// One agent contesting another agent's position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Challenge {
    pub from: String,
    pub to: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_hypothesis: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub responded: bool,
}

/// What applying a proposal changed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    HypothesisAdded,
    DecisionAdded { is_final: bool },
    FocusChanged,
    ToolResultStored { key: String, replaced: bool },
    ChallengeOpened { to: String },
    ChallengeAnswered { challenger: String },
    ResponseUnmatched,
}

/// The shared working memory of a session.
///
/// A decoded workspace is recounted; any serialized `token_count` is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "StoredWorkspace")]
pub struct Workspace {
    pub current_focus: String,
    pub hypotheses: Vec<WorkspaceEntry>,
    pub decisions: Vec<WorkspaceEntry>,
    pub tool_results: ToolResults,
    pub episodic_matches: Vec<EpisodicMatch>,
    pub pending_challenges: Vec<Challenge>,
    token_count: usize,
    iteration: u32,
}

/// Wire form of a workspace, without the derived count
#[derive(Default, Deserialize)]
#[serde(default)]
struct StoredWorkspace {
    current_focus: String,
    hypotheses: Vec<WorkspaceEntry>,
    decisions: Vec<WorkspaceEntry>,
    tool_results: ToolResults,
    episodic_matches: Vec<EpisodicMatch>,
    pending_challenges: Vec<Challenge>,
    iteration: u32,
}

impl From<StoredWorkspace> for Workspace {
    fn from(stored: StoredWorkspace) -> Self {
        let mut ws = Self {
            current_focus: stored.current_focus,
            hypotheses: stored.hypotheses,
            decisions: stored.decisions,
            tool_results: stored.tool_results,
            episodic_matches: stored.episodic_matches,
            pending_challenges: stored.pending_challenges,
            token_count: 0,
            iteration: stored.iteration,
        };
        ws.recount();
        ws
    }
}

/// Borrowed view used for token estimation (excludes the count itself)
#[derive(Serialize)]
struct Measured<'a> {
    current_focus: &'a str,
    hypotheses: &'a [WorkspaceEntry],
    decisions: &'a [WorkspaceEntry],
    tool_results: &'a ToolResults,
    episodic_matches: &'a [EpisodicMatch],
    pending_challenges: &'a [Challenge],
    iteration: u32,
}

impl Workspace {
    /// Create a workspace focused on a goal
    pub fn new(focus: &str) -> Self {
        let mut ws = Self {
            current_focus: focus.to_string(),
            ..Self::default()
        };
        ws.recount();
        ws
    }

    /// Token count as of the last recount
    pub fn token_count(&self) -> usize {
        self.token_count
    }

    /// Number of applied rounds
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Serialize and estimate the token length of the workspace
    pub fn estimate_tokens(&self) -> usize {
        let view = Measured {
            current_focus: &self.current_focus,
            hypotheses: &self.hypotheses,
            decisions: &self.decisions,
            tool_results: &self.tool_results,
            episodic_matches: &self.episodic_matches,
            pending_challenges: &self.pending_challenges,
            iteration: self.iteration,
        };
        let len = serde_json::to_string(&view).map(|s| s.len()).unwrap_or(0);
        len.div_ceil(CHARS_PER_TOKEN)
    }

    /// Recompute and store the token count
    pub fn recount(&mut self) -> usize {
        self.token_count = self.estimate_tokens();
        self.token_count
    }

    /// Replace recalled episodes (session start only)
    pub fn set_episodic_matches(&mut self, matches: Vec<EpisodicMatch>) {
        self.episodic_matches = matches;
        self.recount();
    }

    /// The final decision, if one has been reached
    pub fn final_decision(&self) -> Option<&WorkspaceEntry> {
        self.decisions.iter().find(|d| d.is_final)
    }

    /// Whether an unresponded challenge targets `agent`
    pub fn has_open_challenge_for(&self, agent: &str) -> bool {
        self.pending_challenges
            .iter()
            .any(|c| !c.responded && c.to == agent)
    }

    /// Whether `content` mentions any stored tool-result key
    pub fn references_tool_result(&self, content: &str) -> bool {
        let lowered = content.to_lowercase();
        self.tool_results
            .keys()
            .any(|key| !key.is_empty() && lowered.contains(&key.to_lowercase()))
    }

    /// Number of hypotheses and decisions currently held
    pub fn contribution_count(&self) -> usize {
        self.hypotheses.len() + self.decisions.len()
    }

    /// Apply a winning proposal, advance the iteration, and recount tokens
    pub fn apply(&mut self, proposal: &Proposal) -> ApplyOutcome {
        let now = Utc::now();
        let next_iteration = self.iteration + 1;
        let entry = |is_final: bool| WorkspaceEntry {
            source: proposal.source.clone(),
            content: proposal.content.clone(),
            confidence: proposal.confidence,
            iteration: next_iteration,
            timestamp: now,
            is_final,
        };

        let outcome = match &proposal.kind {
            ProposalKind::Hypothesis => {
                self.hypotheses.push(entry(false));
                ApplyOutcome::HypothesisAdded
            }
            ProposalKind::Decision { is_final } => {
                let is_final = if *is_final && self.final_decision().is_some() {
                    tracing::warn!(
                        source = %proposal.source,
                        "Final decision already recorded, storing as non-final"
                    );
                    false
                } else {
                    *is_final
                };
                self.decisions.push(entry(is_final));
                ApplyOutcome::DecisionAdded { is_final }
            }
            ProposalKind::Focus => {
                self.current_focus = proposal.content.clone();
                ApplyOutcome::FocusChanged
            }
            ProposalKind::ToolResult { key, value } => {
                let replaced = self.tool_results.upsert(key, value.clone());
                ApplyOutcome::ToolResultStored {
                    key: key.clone(),
                    replaced,
                }
            }
            ProposalKind::Challenge {
                to,
                target_hypothesis,
            } => {
                self.pending_challenges.push(Challenge {
                    from: proposal.source.clone(),
                    to: to.clone(),
                    content: proposal.content.clone(),
                    target_hypothesis: target_hypothesis.clone(),
                    timestamp: now,
                    responded: false,
                });
                ApplyOutcome::ChallengeOpened { to: to.clone() }
            }
            ProposalKind::Response {
                to,
                target_hypothesis,
            } => {
                let matched = self.pending_challenges.iter_mut().find(|c| {
                    !c.responded
                        && c.to == proposal.source
                        && to.as_ref().map_or(true, |t| *t == c.from)
                        && target_hypothesis
                            .as_ref()
                            .map_or(true, |t| c.target_hypothesis.as_ref() == Some(t))
                });
                match matched {
                    Some(challenge) => {
                        challenge.responded = true;
                        ApplyOutcome::ChallengeAnswered {
                            challenger: challenge.from.clone(),
                        }
                    }
                    None => ApplyOutcome::ResponseUnmatched,
                }
            }
        };

        self.iteration = next_iteration;
        self.recount();
        outcome
    }
}
