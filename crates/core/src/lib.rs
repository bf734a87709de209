//! # Agora Core
//!
//! The orchestration core of Agora: a bounded shared workspace that several
//! agents compete to update, one winning proposal per round.
//!
//! ## Architecture
//!
//! - `workspace/` - Workspace store, proposal vocabulary, token-budget pruner
//! - `attention` - Scores a proposal against the current workspace
//! - `metrics/` - Integration, convergence, coherence, challenge effectiveness
//! - `swarm/` - Agents, fan-out, the round coordinator, side channel
//! - `state/` - SQLite session history (`.agora/agora.db`)
//! - `memory/` - Episodic recall of past sessions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agora_core::config::OrchestratorConfig;
//! use agora_core::swarm::{Agent, Coordinator, ScriptFile};
//!
//! let agents = ScriptFile::load("agents.json")?.into_agents();
//! let mut coordinator = Coordinator::new(OrchestratorConfig::load()?, agents);
//! let result = coordinator.run("Choose a message queue").await?;
//! ```

pub mod attention;
pub mod config;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod state;
pub mod swarm;
pub mod text;
pub mod workspace;

pub use attention::AttentionScorer;
pub use config::OrchestratorConfig;
pub use error::ProposalError;
pub use swarm::{Coordinator, SessionResult, TerminationReason};
pub use workspace::{Proposal, ProposalKind, Workspace};
