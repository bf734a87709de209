//! # Round Phases
//!
//! The phases one round moves through, and where the loop goes after
//! pruning.

use serde::{Deserialize, Serialize};

/// Phase of the orchestration loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// Fanning out to agents
    Collecting,
    /// Scoring collected proposals
    Scoring,
    /// Picking the best proposal that fits
    Selecting,
    /// Mutating the workspace
    Applying,
    /// Enforcing the token budget
    Pruning,
    /// Session over
    Terminated,
}

/// The round state machine
#[derive(Debug, Clone)]
pub struct RoundCycle {
    /// Current phase
    pub phase: RoundPhase,
    /// Rounds that reached Pruning
    pub completed_rounds: u32,
}

impl Default for RoundCycle {
    fn default() -> Self {
        Self {
            phase: RoundPhase::Collecting,
            completed_rounds: 0,
        }
    }
}

impl RoundCycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance to the next phase. Pruning wraps back to Collecting.
    pub fn advance(&mut self) {
        self.phase = match self.phase {
            RoundPhase::Collecting => RoundPhase::Scoring,
            RoundPhase::Scoring => RoundPhase::Selecting,
            RoundPhase::Selecting => RoundPhase::Applying,
            RoundPhase::Applying => RoundPhase::Pruning,
            RoundPhase::Pruning => {
                self.completed_rounds += 1;
                RoundPhase::Collecting
            }
            RoundPhase::Terminated => RoundPhase::Terminated,
        };
    }

    /// Move to a phase directly, logging the transition
    pub fn enter(&mut self, phase: RoundPhase) {
        if self.phase != phase {
            tracing::trace!(from = ?self.phase, to = ?phase, "Round phase");
        }
        self.phase = phase;
    }

    pub fn terminate(&mut self) {
        self.enter(RoundPhase::Terminated);
    }

    pub fn is_terminated(&self) -> bool {
        self.phase == RoundPhase::Terminated
    }
}
