//! # Error Types
//!
//! Failure taxonomy for the agent boundary. These never reach callers of
//! [`Coordinator::run`](crate::swarm::Coordinator::run): a failed agent is
//! simply absent from the round.

use thiserror::Error;

/// Why an agent contributed no proposal this round
#[derive(Debug, Error)]
pub enum ProposalError {
    /// Agent did not answer within the collection timeout
    #[error("agent timed out after {0} ms")]
    Timeout(u64),

    /// Agent returned an error
    #[error("agent error: {0}")]
    Agent(#[from] anyhow::Error),

    /// Result did not decode as one of the known proposal variants
    #[error("malformed proposal: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Result decoded but violates a field constraint
    #[error("invalid proposal: {0}")]
    Invalid(String),

    /// Agent task panicked or was aborted
    #[error("agent task failed: {0}")]
    Panicked(String),
}

impl ProposalError {
    /// Short machine-readable label used in round events
    pub fn label(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Agent(_) => "agent_error",
            Self::Malformed(_) => "malformed",
            Self::Invalid(_) => "invalid",
            Self::Panicked(_) => "panicked",
        }
    }
}
