//! # Memory Module
//!
//! Episodic memory: what earlier sessions concluded, recalled once at the
//! start of a new session.
//!
//! ```text
//! session end ──► SqliteEpisodes::add(summary)
//!                        │
//! session start ◄── EpisodicRecall::search(goal) ──► Workspace.episodic_matches
//! ```

pub mod episodes;

pub use episodes::{EpisodicRecall, SqliteEpisodes};
