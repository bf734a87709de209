//! # Agents
//!
//! The agent capability consumed by the loop, a scripted implementation
//! used by tests and the CLI, and the per-round fan-out/fan-in.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::ProposalError;
use crate::workspace::{Proposal, Workspace};

/// Something that proposes workspace updates.
///
/// Agents only ever see an immutable snapshot. Returning `Ok(None)` means
/// the agent abstains this round.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    async fn propose(&self, workspace: Arc<Workspace>) -> Result<Option<serde_json::Value>>;
}

/// One scripted agent as written in a script file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentScript {
    pub name: String,
    /// Delay before every answer
    pub delay_ms: u64,
    /// Keep replaying the final entry once the script runs out
    pub repeat_last: bool,
    /// Raw proposals, replayed in order. `null` abstains; an object with
    /// an `error` field and no `type` fails the call.
    pub proposals: Vec<serde_json::Value>,
}

/// A script file: `{"agents": [...]}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptFile {
    pub agents: Vec<AgentScript>,
}

impl ScriptFile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse script {}", path.display()))
    }

    /// Build the agents in file order
    pub fn into_agents(self) -> Vec<Arc<dyn Agent>> {
        self.agents
            .into_iter()
            .map(|script| Arc::new(ScriptedAgent::from_script(script)) as Arc<dyn Agent>)
            .collect()
    }
}

/// Agent that replays a fixed queue of proposals
pub struct ScriptedAgent {
    name: String,
    script: Mutex<VecDeque<serde_json::Value>>,
    last: Mutex<Option<serde_json::Value>>,
    delay: Option<Duration>,
    repeat_last: bool,
}

impl ScriptedAgent {
    pub fn new(name: &str, proposals: Vec<serde_json::Value>) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(proposals.into()),
            last: Mutex::new(None),
            delay: None,
            repeat_last: false,
        }
    }

    pub fn from_script(script: AgentScript) -> Self {
        let mut agent = Self::new(&script.name, script.proposals);
        if script.delay_ms > 0 {
            agent.delay = Some(Duration::from_millis(script.delay_ms));
        }
        agent.repeat_last = script.repeat_last;
        agent
    }

    /// Wait this long before every answer
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Keep replaying the final entry once the script runs out
    pub fn repeating(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    fn next_entry(&self) -> Result<Option<serde_json::Value>> {
        let mut script = self
            .script
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let mut last = self
            .last
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        match script.pop_front() {
            Some(entry) => {
                *last = Some(entry.clone());
                Ok(Some(entry))
            }
            None if self.repeat_last => Ok(last.clone()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn propose(&self, _workspace: Arc<Workspace>) -> Result<Option<serde_json::Value>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.next_entry()? {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(entry) if entry.get("type").is_none() && entry.get("error").is_some() => {
                let message = entry
                    .get("error")
                    .and_then(|e| e.as_str())
                    .unwrap_or("scripted failure");
                anyhow::bail!("{}", message)
            }
            Some(entry) => Ok(Some(entry)),
        }
    }
}

/// An agent that contributed nothing this round, and why
#[derive(Debug)]
pub struct AgentFailure {
    pub agent: String,
    pub error: ProposalError,
}

/// Everything one COLLECTING phase produced
#[derive(Debug, Default)]
pub struct Collected {
    /// Valid proposals, in agent registration order
    pub proposals: Vec<Proposal>,
    pub failures: Vec<AgentFailure>,
    /// Agents that answered with no proposal
    pub abstained: Vec<String>,
}

/// Ask every agent for one proposal concurrently and wait for all of them.
///
/// Each call is bounded by `timeout`; a call that overruns is cancelled and
/// counted as a failure. Nothing here ever fails the round.
pub async fn collect_proposals(
    agents: &[Arc<dyn Agent>],
    snapshot: Arc<Workspace>,
    timeout: Duration,
) -> Collected {
    use tokio::task::JoinSet;

    let mut join_set = JoinSet::new();
    let timeout_ms = timeout.as_millis() as u64;

    // SCATTER
    for (index, agent) in agents.iter().enumerate() {
        let agent = Arc::clone(agent);
        let snapshot = Arc::clone(&snapshot);

        join_set.spawn(async move {
            let name = agent.name().to_string();
            let outcome = match tokio::time::timeout(timeout, agent.propose(snapshot)).await {
                Err(_) => Err(ProposalError::Timeout(timeout_ms)),
                Ok(Err(e)) => Err(ProposalError::Agent(e)),
                Ok(Ok(None)) => Ok(None),
                Ok(Ok(Some(value))) => Proposal::from_value(value, &name).map(Some),
            };
            (index, outcome)
        });
    }

    // GATHER
    let mut slots: Vec<Option<Result<Option<Proposal>, ProposalError>>> =
        (0..agents.len()).map(|_| None).collect();

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, outcome)) => slots[index] = Some(outcome),
            Err(e) => tracing::warn!("Agent task panicked: {}", e),
        }
    }

    let mut collected = Collected::default();
    for (index, slot) in slots.into_iter().enumerate() {
        let name = agents[index].name().to_string();
        // A task that never reported back panicked
        let outcome = slot.unwrap_or_else(|| {
            Err(ProposalError::Panicked(format!("agent {} did not settle", name)))
        });

        match outcome {
            Ok(Some(proposal)) => collected.proposals.push(proposal),
            Ok(None) => {
                tracing::debug!(agent = %name, "Agent abstained");
                collected.abstained.push(name);
            }
            Err(error) => {
                tracing::warn!(
                    agent = %name,
                    reason = error.label(),
                    "Agent contributed no proposal: {}",
                    error
                );
                collected.failures.push(AgentFailure { agent: name, error });
            }
        }
    }

    collected
}
