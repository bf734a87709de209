//! # Orchestrator Configuration
//!
//! Session-start inputs for the orchestration loop. Loaded from
//! `<runtime>/config.json` with environment overrides on top.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::metrics::EmpiricalPatterns;

/// How many of the most recent items of each category survive pruning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KeepCounts {
    pub hypotheses: usize,
    pub decisions: usize,
    pub tool_results: usize,
}

impl Default for KeepCounts {
    fn default() -> Self {
        Self {
            hypotheses: 3,
            decisions: 5,
            tool_results: 5,
        }
    }
}

/// Episodic recall parameters used once at session start
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EpisodicConfig {
    pub limit: usize,
    pub min_score: f64,
}

impl Default for EpisodicConfig {
    fn default() -> Self {
        Self {
            limit: 3,
            min_score: 0.3,
        }
    }
}

/// Configuration for the orchestration loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Token budget for the serialized workspace
    pub max_workspace_tokens: usize,
    /// Hard cap on applied rounds
    pub max_iterations: u32,
    /// Per-category keep counts for the pruner
    pub keep: KeepCounts,
    /// Per-agent proposal timeout in milliseconds
    pub agent_timeout_ms: u64,
    /// Role whose responses earn the empirical bonus
    pub challenger_role: String,
    /// Roles counted by the integration score (empty: registered agents)
    pub known_roles: Vec<String>,
    /// Episodic recall parameters
    pub episodic: EpisodicConfig,
    /// Patterns for empirical-attempt detection (None: built-in set)
    pub empirical: Option<EmpiricalPatterns>,
    /// Length `current_focus` is cut to by the emergency prune step
    pub focus_truncate_chars: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workspace_tokens: 4000,
            max_iterations: 10,
            keep: KeepCounts::default(),
            agent_timeout_ms: 30_000,
            challenger_role: "challenger".to_string(),
            known_roles: Vec::new(),
            episodic: EpisodicConfig::default(),
            empirical: None,
            focus_truncate_chars: 200,
        }
    }
}

impl OrchestratorConfig {
    /// Per-agent collection timeout
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_timeout_ms)
    }

    /// Load `<runtime>/config.json`, falling back to defaults, then apply env overrides
    pub fn load() -> Result<Self> {
        Self::load_from(runtime_path().join("config.json"))
    }

    /// Load from a specific file (missing file yields defaults)
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {:?}", path))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config: {:?}", path))?
        } else {
            tracing::debug!(path = ?path, "No config file, using defaults");
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Save to a specific file, creating parent directories
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).with_context(|| format!("Failed to write config: {:?}", path))
    }

    /// Apply `AGORA_*` environment overrides
    pub fn apply_env(&mut self) {
        if let Some(v) = env_parse::<usize>("AGORA_MAX_TOKENS") {
            self.max_workspace_tokens = v;
        }
        if let Some(v) = env_parse::<u32>("AGORA_MAX_ITERATIONS") {
            self.max_iterations = v;
        }
        if let Some(v) = env_parse::<u64>("AGORA_AGENT_TIMEOUT_MS") {
            self.agent_timeout_ms = v;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable env override");
            None
        }
    }
}

/// Get the runtime directory path (.agora)
pub fn runtime_path() -> PathBuf {
    if let Ok(path) = std::env::var("AGORA_RUNTIME_PATH") {
        return PathBuf::from(path);
    }

    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".agora")
}
