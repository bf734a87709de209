//! # Capacity Manager
//!
//! Enforces the workspace token budget by evicting content in a fixed
//! priority order, re-measuring after every removal:
//!
//! ```text
//! hypotheses > keep → non-final decisions > keep → tool results > keep
//!   → episodic matches → responded challenges → truncate focus (lossy)
//! ```
//!
//! Final decisions are never touched.

use serde::Serialize;

use super::model::Workspace;
use crate::config::{KeepCounts, OrchestratorConfig};

/// Marker appended to a truncated focus
pub const ELLIPSIS: &str = "...";

/// What a prune pass removed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PruneReport {
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub hypotheses_evicted: usize,
    pub decisions_evicted: usize,
    pub tool_results_evicted: usize,
    pub episodes_evicted: usize,
    pub challenges_evicted: usize,
    /// The emergency step ran and information was lost
    pub focus_truncated: bool,
    pub within_budget: bool,
}

impl PruneReport {
    /// Whether anything was removed or truncated
    pub fn evicted_anything(&self) -> bool {
        self.hypotheses_evicted
            + self.decisions_evicted
            + self.tool_results_evicted
            + self.episodes_evicted
            + self.challenges_evicted
            > 0
            || self.focus_truncated
    }
}

/// Token-budget pruner
#[derive(Debug, Clone)]
pub struct Pruner {
    pub max_tokens: usize,
    pub keep: KeepCounts,
    pub focus_truncate_chars: usize,
}

impl Pruner {
    pub fn new(max_tokens: usize, keep: KeepCounts) -> Self {
        Self {
            max_tokens,
            keep,
            focus_truncate_chars: 200,
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            max_tokens: config.max_workspace_tokens,
            keep: config.keep.clone(),
            focus_truncate_chars: config.focus_truncate_chars,
        }
    }

    fn over(&self, ws: &mut Workspace) -> bool {
        ws.recount() > self.max_tokens
    }

    /// Evict until the workspace fits or nothing more can go.
    ///
    /// Logging is left to the caller so dry runs stay quiet.
    pub fn prune(&self, ws: &mut Workspace) -> PruneReport {
        let mut report = PruneReport {
            tokens_before: ws.recount(),
            ..PruneReport::default()
        };

        while self.over(ws) && ws.hypotheses.len() > self.keep.hypotheses {
            ws.hypotheses.remove(0);
            report.hypotheses_evicted += 1;
        }

        while self.over(ws) {
            let non_final = ws.decisions.iter().filter(|d| !d.is_final).count();
            if non_final <= self.keep.decisions {
                break;
            }
            match ws.decisions.iter().position(|d| !d.is_final) {
                Some(idx) => {
                    ws.decisions.remove(idx);
                    report.decisions_evicted += 1;
                }
                None => break,
            }
        }

        while self.over(ws) && ws.tool_results.len() > self.keep.tool_results {
            match ws.tool_results.oldest_key() {
                Some(key) => {
                    ws.tool_results.remove(&key);
                    report.tool_results_evicted += 1;
                }
                None => break,
            }
        }

        while self.over(ws) && !ws.episodic_matches.is_empty() {
            ws.episodic_matches.remove(0);
            report.episodes_evicted += 1;
        }

        if self.over(ws) {
            let before = ws.pending_challenges.len();
            ws.pending_challenges.retain(|c| !c.responded);
            report.challenges_evicted = before - ws.pending_challenges.len();
        }

        if self.over(ws) && ws.current_focus.chars().count() > self.focus_truncate_chars {
            let cut: String = ws
                .current_focus
                .chars()
                .take(self.focus_truncate_chars)
                .collect();
            ws.current_focus = format!("{}{}", cut, ELLIPSIS);
            report.focus_truncated = true;
        }

        report.tokens_after = ws.recount();
        report.within_budget = report.tokens_after <= self.max_tokens;
        report
    }
}
