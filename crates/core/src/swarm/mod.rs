//! # Swarm Orchestration
//!
//! Runs agents against a shared workspace, one winning proposal per round.
//!
//! ## Round Flow
//!
//! ```text
//! agents ─► collect_proposals ─► AttentionScorer ─► select (fits budget?)
//!                                                        │
//!        SideChannel ◄── RoundEvent / WorkspaceUpdate ◄── apply + prune
//! ```

pub mod agent;
pub mod coordinator;
pub mod dispatch;
pub mod events;
pub mod notify;
pub mod pipeline;

pub use agent::{
    collect_proposals, Agent, AgentFailure, AgentScript, Collected, ScriptFile, ScriptedAgent,
};
pub use coordinator::{
    CandidateScore, Coordinator, CoordinatorCommand, RoundRecord, SessionMetrics, SessionResult,
    TerminationReason,
};
pub use dispatch::{Collaborators, SideChannel, SideEffect};
pub use events::{RoundEvent, RoundEventKind};
pub use notify::{BroadcastNotifier, Notifier, WorkspaceUpdate};
pub use pipeline::{RoundCycle, RoundPhase};
