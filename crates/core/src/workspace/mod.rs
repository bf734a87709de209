//! # Workspace Store
//!
//! The bounded shared blackboard, its proposal vocabulary, and the
//! capacity manager that keeps it within budget.

pub mod model;
pub mod proposal;
pub mod pruner;

pub use model::{
    ApplyOutcome, Challenge, EpisodicMatch, ToolResult, ToolResults, Workspace, WorkspaceEntry,
};
pub use proposal::{Proposal, ProposalKind};
pub use pruner::{PruneReport, Pruner, ELLIPSIS};
