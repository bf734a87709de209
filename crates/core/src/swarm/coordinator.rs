//! # Round Coordinator
//!
//! Drives one session over a shared workspace: collect proposals from every
//! agent, score them, apply the best one that fits the budget, prune, and
//! repeat until a terminal condition.
//!
//! ```text
//! COLLECTING → SCORING → SELECTING → APPLYING → PRUNING ─┐
//!      ▲                                                 │
//!      └──────────────────────── next round ◄────────────┘
//! ```
//!
//! The coordinator is the workspace's only writer. Persistence and
//! notification are handed to a side channel and never awaited by a round.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::attention::{AttentionScorer, ScoreBreakdown};
use crate::config::OrchestratorConfig;
use crate::memory::EpisodicRecall;
use crate::metrics::{
    ChallengeReport, ChallengeTracker, ContributionLedger, EmpiricalPolicy, MetricsEngine,
    RoundMetrics,
};
use crate::state::EventSink;
use crate::workspace::{ApplyOutcome, Proposal, ProposalKind, PruneReport, Pruner, Workspace};

use super::agent::{collect_proposals, Agent};
use super::dispatch::{Collaborators, SideChannel, SideEffect};
use super::events::{uuid_v4, RoundEvent, RoundEventKind};
use super::notify::Notifier;
use super::pipeline::{RoundCycle, RoundPhase};

/// How long a finished session waits for queued side effects
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Commands sent from callers to a running coordinator
#[derive(Debug)]
pub enum CoordinatorCommand {
    /// Stop before the next round
    Abort,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// A final decision won a round
    DecisionReached,
    /// `max_iterations` rounds were applied
    IterationLimit,
    /// No collected proposal fits the budget, even after pruning
    CapacityExhausted,
    /// Every agent failed or abstained
    NoProposals,
    /// A caller asked the session to stop
    Cancelled,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DecisionReached => "decision_reached",
            Self::IterationLimit => "iteration_limit",
            Self::CapacityExhausted => "capacity_exhausted",
            Self::NoProposals => "no_proposals",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One scored candidate of a round
#[derive(Debug, Clone, Serialize)]
pub struct CandidateScore {
    pub agent: String,
    pub kind: String,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

/// What one applied round looked like
#[derive(Debug, Clone, Serialize)]
pub struct RoundRecord {
    pub iteration: u32,
    pub winner: String,
    pub kind: String,
    pub score: f64,
    /// Every candidate, in agent registration order
    pub candidates: Vec<CandidateScore>,
    pub outcome: ApplyOutcome,
    /// Tokens held after pruning
    pub token_count: usize,
    /// Measured on the applied workspace, before pruning
    pub metrics: RoundMetrics,
}

/// Session-level metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionMetrics {
    pub integration_score: f64,
    pub convergence_rate: f64,
    pub coherence_score: f64,
    pub challenges_issued: usize,
    /// Winning responses that showed empirical evidence
    pub attempts_matched: usize,
}

/// What the caller gets back from a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionResult {
    pub session_id: String,
    pub iterations: u32,
    pub final_decision: Option<String>,
    pub termination: TerminationReason,
    pub workspace: Workspace,
    pub metrics: SessionMetrics,
    pub challenge_report: ChallengeReport,
    pub rounds: Vec<RoundRecord>,
}

/// A proposal with its score
struct Scored {
    proposal: Proposal,
    breakdown: ScoreBreakdown,
    score: f64,
}

/// The candidate a round adopts
struct Selection {
    index: usize,
    outcome: ApplyOutcome,
    /// Post-apply state, before eviction
    applied: Workspace,
    pruned: Workspace,
    report: PruneReport,
}

/// Per-session bookkeeping that outlives pruning
struct Ledgers {
    contributions: ContributionLedger,
    challenges: ChallengeTracker,
}

/// The round coordinator
pub struct Coordinator {
    config: OrchestratorConfig,
    agents: Vec<Arc<dyn Agent>>,
    scorer: AttentionScorer,
    pruner: Pruner,
    cycle: RoundCycle,
    session_id: String,
    events: Vec<RoundEvent>,
    event_tx: Option<mpsc::Sender<RoundEvent>>,
    command_rx: Option<mpsc::Receiver<CoordinatorCommand>>,
    collaborators: Collaborators,
}

impl Coordinator {
    /// Create a coordinator over a fixed set of agents
    pub fn new(config: OrchestratorConfig, agents: Vec<Arc<dyn Agent>>) -> Self {
        Self {
            scorer: AttentionScorer::new(&config.challenger_role),
            pruner: Pruner::from_config(&config),
            config,
            agents,
            cycle: RoundCycle::new(),
            session_id: uuid_v4(),
            events: Vec::new(),
            event_tx: None,
            command_rx: None,
            collaborators: Collaborators::default(),
        }
    }

    /// Use a caller-chosen session id
    pub fn with_session_id(mut self, session_id: &str) -> Self {
        self.session_id = session_id.to_string();
        self
    }

    /// Persist round events through `sink`
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.collaborators.sink = Some(sink);
        self
    }

    /// Push post-round workspace snapshots through `notifier`
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.collaborators.notifier = Some(notifier);
        self
    }

    /// Recall related sessions at start and record this one at the end
    pub fn with_recall(mut self, recall: Arc<dyn EpisodicRecall>) -> Self {
        self.collaborators.recall = Some(recall);
        self
    }

    /// Accept commands (cancellation) between rounds
    pub fn with_command_channel(mut self, rx: mpsc::Receiver<CoordinatorCommand>) -> Self {
        self.command_rx = Some(rx);
        self
    }

    /// Set event channel for streaming events
    pub fn with_event_channel(mut self, tx: mpsc::Sender<RoundEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Events emitted so far
    pub fn events(&self) -> &[RoundEvent] {
        &self.events
    }

    pub fn phase(&self) -> RoundPhase {
        self.cycle.phase
    }

    /// Emit an event
    fn emit(&mut self, side: &SideChannel, event: RoundEvent) {
        self.events.push(event.clone());
        if let Some(tx) = &self.event_tx {
            if tx.try_send(event.clone()).is_err() {
                tracing::debug!("Event channel full or closed");
            }
        }
        side.send(SideEffect::Log(event));
    }

    /// Whether a caller asked us to stop
    fn abort_requested(&mut self) -> bool {
        match self.command_rx.as_mut().map(|rx| rx.try_recv()) {
            Some(Ok(CoordinatorCommand::Abort)) => true,
            Some(Err(mpsc::error::TryRecvError::Disconnected)) => {
                self.command_rx = None;
                false
            }
            _ => false,
        }
    }

    /// Run one session on a goal.
    ///
    /// Only construction faults are errors. Every way a session can end is
    /// an `Ok` result carrying a [`TerminationReason`].
    #[tracing::instrument(
        skip(self),
        fields(
            session_id = %self.session_id,
            goal_preview = %goal.chars().take(50).collect::<String>()
        )
    )]
    pub async fn run(&mut self, goal: &str) -> Result<SessionResult> {
        if self.agents.is_empty() {
            anyhow::bail!("Coordinator has no registered agents");
        }
        let policy = match &self.config.empirical {
            Some(patterns) => EmpiricalPolicy::from_patterns(patterns)?,
            None => EmpiricalPolicy::default(),
        };

        let known_roles = if self.config.known_roles.is_empty() {
            self.agents.iter().map(|a| a.name().to_string()).collect()
        } else {
            self.config.known_roles.clone()
        };
        let engine = MetricsEngine::new(
            known_roles,
            self.config.max_iterations,
            self.config.max_workspace_tokens,
        );
        let mut ledgers = Ledgers {
            contributions: ContributionLedger::default(),
            challenges: ChallengeTracker::new(policy),
        };

        let side = SideChannel::spawn(self.collaborators.clone());
        self.cycle = RoundCycle::new();

        let mut ws = Workspace::new(goal);
        let recall_prune = self.recall_episodes(&mut ws, goal).await;

        tracing::info!(
            agents = self.agents.len(),
            max_iterations = self.config.max_iterations,
            max_tokens = self.config.max_workspace_tokens,
            "Session started"
        );
        let started = RoundEvent::new(
            &self.session_id,
            RoundEventKind::SessionStarted,
            "coordinator",
            0,
        )
        .with_data(serde_json::json!({
            "goal": goal,
            "agents": self.agents.iter().map(|a| a.name()).collect::<Vec<_>>(),
            "episodic_matches": ws.episodic_matches.len(),
            "token_count": ws.token_count(),
        }));
        self.emit(&side, started);
        if let Some(report) = recall_prune {
            self.report_prune(&side, 0, &report);
        }

        let mut rounds = Vec::new();
        let termination = self
            .round_loop(&side, &mut ws, &engine, &mut ledgers, &mut rounds)
            .await;
        self.cycle.terminate();

        let result = self.build_result(termination, ws, &engine, &ledgers, rounds);
        tracing::info!(
            termination = termination.as_str(),
            iterations = result.iterations,
            integration_score = result.metrics.integration_score,
            "Session terminated"
        );

        let terminated = RoundEvent::new(
            &self.session_id,
            RoundEventKind::SessionTerminated,
            "coordinator",
            result.iterations,
        )
        .with_data(serde_json::json!({
            "termination": termination.as_str(),
            "final_decision": result.final_decision,
            "result": serde_json::to_value(&result).unwrap_or(serde_json::Value::Null),
        }));
        self.emit(&side, terminated);

        if termination == TerminationReason::Cancelled {
            side.detach();
        } else {
            side.send(SideEffect::Remember {
                session_id: self.session_id.clone(),
                summary: episode_summary(&result),
            });
            side.drain(DRAIN_TIMEOUT).await;
        }

        Ok(result)
    }

    /// Load related past sessions into a fresh workspace and fit it to the
    /// budget. The prune report is returned for the caller to publish.
    async fn recall_episodes(&self, ws: &mut Workspace, goal: &str) -> Option<PruneReport> {
        let recall = self.collaborators.recall.as_ref()?;
        let cfg = &self.config.episodic;
        match recall.search(goal, cfg.limit, cfg.min_score).await {
            Ok(matches) => {
                tracing::debug!(matches = matches.len(), "Episodic recall");
                ws.set_episodic_matches(matches);
                Some(self.pruner.prune(ws))
            }
            Err(e) => {
                tracing::warn!("Episodic recall failed: {:#}", e);
                None
            }
        }
    }

    async fn round_loop(
        &mut self,
        side: &SideChannel,
        ws: &mut Workspace,
        engine: &MetricsEngine,
        ledgers: &mut Ledgers,
        rounds: &mut Vec<RoundRecord>,
    ) -> TerminationReason {
        let agents = self.agents.clone();
        let timeout = self.config.agent_timeout();

        loop {
            // A session that already ran every round is not cancelled
            if ws.iteration() >= self.config.max_iterations {
                return TerminationReason::IterationLimit;
            }
            if self.abort_requested() {
                tracing::info!(iteration = ws.iteration(), "Session cancelled");
                return TerminationReason::Cancelled;
            }

            // COLLECTING
            self.cycle.enter(RoundPhase::Collecting);
            let iteration = ws.iteration();
            let collected = collect_proposals(&agents, Arc::new(ws.clone()), timeout).await;
            for failure in &collected.failures {
                let event = RoundEvent::new(
                    &self.session_id,
                    RoundEventKind::AgentFailed,
                    &failure.agent,
                    iteration,
                )
                .with_data(serde_json::json!({
                    "reason": failure.error.label(),
                    "error": failure.error.to_string(),
                }));
                self.emit(side, event);
            }
            if collected.proposals.is_empty() {
                tracing::info!(iteration, "No proposals collected");
                return TerminationReason::NoProposals;
            }

            // SCORING
            self.cycle.advance();
            let scored: Vec<Scored> = collected
                .proposals
                .into_iter()
                .map(|proposal| {
                    let breakdown = self.scorer.breakdown(&proposal, ws);
                    Scored {
                        score: breakdown.total(),
                        breakdown,
                        proposal,
                    }
                })
                .collect();

            // SELECTING
            self.cycle.advance();
            let Some(selection) = self.select(ws, &scored) else {
                tracing::warn!(
                    iteration,
                    candidates = scored.len(),
                    "No proposal fits the workspace budget"
                );
                return TerminationReason::CapacityExhausted;
            };

            // APPLYING
            self.cycle.advance();
            let Selection {
                index,
                outcome,
                applied: post_apply,
                pruned,
                report,
            } = selection;
            let winner = &scored[index];
            self.record_ledgers(ledgers, &winner.proposal, &outcome);
            let metrics = engine.measure(&post_apply, &ledgers.contributions);
            *ws = pruned;
            tracing::debug!(
                iteration = ws.iteration(),
                agent = %winner.proposal.source,
                kind = winner.proposal.kind.label(),
                score = winner.score,
                "Round applied"
            );
            if outcome == ApplyOutcome::ResponseUnmatched {
                tracing::info!(
                    agent = %winner.proposal.source,
                    "Response matched no pending challenge"
                );
            }
            let applied = RoundEvent::new(
                &self.session_id,
                RoundEventKind::RoundApplied,
                &winner.proposal.source,
                ws.iteration(),
            )
            .with_data(serde_json::json!({
                "type": winner.proposal.kind.label(),
                "content": winner.proposal.content,
                "score": winner.score,
                "breakdown": winner.breakdown,
                "outcome": outcome,
                "candidates": scored.len(),
                "token_count": ws.token_count(),
            }));
            self.emit(side, applied);
            side.send(SideEffect::Publish {
                session_id: self.session_id.clone(),
                workspace: Box::new(ws.clone()),
            });

            // PRUNING
            self.cycle.advance();
            self.report_prune(side, ws.iteration(), &report);

            tracing::debug!(
                integration_score = metrics.integration_score,
                convergence_rate = metrics.convergence_rate,
                coherence_score = metrics.coherence_score,
                "Round metrics"
            );
            rounds.push(RoundRecord {
                iteration: ws.iteration(),
                winner: winner.proposal.source.clone(),
                kind: winner.proposal.kind.label().to_string(),
                score: winner.score,
                candidates: scored
                    .iter()
                    .map(|s| CandidateScore {
                        agent: s.proposal.source.clone(),
                        kind: s.proposal.kind.label().to_string(),
                        score: s.score,
                        breakdown: s.breakdown,
                    })
                    .collect(),
                outcome: outcome.clone(),
                token_count: ws.token_count(),
                metrics,
            });
            self.cycle.advance();

            if matches!(outcome, ApplyOutcome::DecisionAdded { is_final: true }) {
                return TerminationReason::DecisionReached;
            }
        }
    }

    /// Highest score first; ties go to the earlier-registered agent. The
    /// winner is the first candidate whose apply + prune fits the budget.
    fn select(&self, ws: &Workspace, scored: &[Scored]) -> Option<Selection> {
        let mut order: Vec<usize> = (0..scored.len()).collect();
        order.sort_by(|&a, &b| scored[b].score.total_cmp(&scored[a].score));

        order.into_iter().find_map(|idx| {
            let mut applied = ws.clone();
            let outcome = applied.apply(&scored[idx].proposal);
            let mut pruned = applied.clone();
            let report = self.pruner.prune(&mut pruned);
            if report.within_budget {
                Some(Selection {
                    index: idx,
                    outcome,
                    applied,
                    pruned,
                    report,
                })
            } else {
                tracing::debug!(
                    agent = %scored[idx].proposal.source,
                    tokens = report.tokens_after,
                    "Candidate does not fit the budget"
                );
                None
            }
        })
    }

    fn record_ledgers(&self, ledgers: &mut Ledgers, proposal: &Proposal, outcome: &ApplyOutcome) {
        let now = chrono::Utc::now();
        match (&proposal.kind, outcome) {
            (ProposalKind::Hypothesis, _) | (ProposalKind::Decision { .. }, _) => {
                ledgers.contributions.record_contribution(&proposal.source);
            }
            (ProposalKind::Challenge { to, .. }, _) => {
                ledgers.contributions.record_challenge();
                ledgers
                    .challenges
                    .record_challenge(&proposal.source, to, now);
            }
            (ProposalKind::Response { .. }, ApplyOutcome::ChallengeAnswered { challenger }) => {
                ledgers.challenges.record_response(
                    &proposal.source,
                    Some(challenger.as_str()),
                    &proposal.content,
                    now,
                );
            }
            (ProposalKind::Response { .. }, _) => {
                ledgers
                    .challenges
                    .record_response(&proposal.source, None, &proposal.content, now);
            }
            (ProposalKind::Focus, _) | (ProposalKind::ToolResult { .. }, _) => {}
        }
    }

    fn report_prune(&mut self, side: &SideChannel, iteration: u32, report: &PruneReport) {
        if !report.evicted_anything() {
            return;
        }

        tracing::info!(
            iteration,
            tokens_before = report.tokens_before,
            tokens_after = report.tokens_after,
            hypotheses = report.hypotheses_evicted,
            decisions = report.decisions_evicted,
            tool_results = report.tool_results_evicted,
            episodes = report.episodes_evicted,
            challenges = report.challenges_evicted,
            "Workspace pruned"
        );
        let data = serde_json::to_value(report).unwrap_or(serde_json::Value::Null);
        let pruned = RoundEvent::new(
            &self.session_id,
            RoundEventKind::WorkspacePruned,
            "coordinator",
            iteration,
        )
        .with_data(data.clone());
        self.emit(side, pruned);

        if report.focus_truncated {
            tracing::warn!(
                iteration,
                limit = self.config.focus_truncate_chars,
                "Emergency prune: current focus truncated, information lost"
            );
            let truncated = RoundEvent::new(
                &self.session_id,
                RoundEventKind::FocusTruncated,
                "coordinator",
                iteration,
            )
            .with_data(data);
            self.emit(side, truncated);
        }
    }

    fn build_result(
        &self,
        termination: TerminationReason,
        ws: Workspace,
        engine: &MetricsEngine,
        ledgers: &Ledgers,
        rounds: Vec<RoundRecord>,
    ) -> SessionResult {
        let metrics = engine.measure(&ws, &ledgers.contributions);
        let challenge_report = ledgers.challenges.report();

        SessionResult {
            session_id: self.session_id.clone(),
            iterations: ws.iteration(),
            final_decision: ws.final_decision().map(|d| d.content.clone()),
            termination,
            metrics: SessionMetrics {
                integration_score: metrics.integration_score,
                convergence_rate: metrics.convergence_rate,
                coherence_score: metrics.coherence_score,
                challenges_issued: ledgers.challenges.issued(),
                attempts_matched: ledgers.challenges.empirical_attempts(),
            },
            challenge_report,
            rounds,
            workspace: ws,
        }
    }
}

/// One-line memory of a session for later recall
fn episode_summary(result: &SessionResult) -> String {
    let ws = &result.workspace;
    let conclusion = result
        .final_decision
        .as_deref()
        .or_else(|| ws.decisions.last().map(|d| d.content.as_str()))
        .or_else(|| ws.hypotheses.last().map(|h| h.content.as_str()))
        .unwrap_or("no conclusion");
    format!(
        "{} -> {} ({})",
        ws.current_focus,
        conclusion,
        result.termination.as_str()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SqliteEpisodes;
    use crate::state::{AgoraDb, SqliteEventSink};
    use crate::swarm::{BroadcastNotifier, ScriptedAgent};
    use serde_json::{json, Value};

    fn hypothesis(content: &str, confidence: f64) -> Value {
        json!({"type": "hypothesis", "content": content, "confidence": confidence})
    }

    fn final_decision(content: &str) -> Value {
        json!({"type": "decision", "content": content, "confidence": 0.9, "is_final": true})
    }

    fn agent(name: &str, script: Vec<Value>) -> Arc<dyn Agent> {
        Arc::new(ScriptedAgent::new(name, script))
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            agent_timeout_ms: 1_000,
            ..OrchestratorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_zero_agents_is_an_error() {
        let mut coordinator = Coordinator::new(config(), Vec::new());
        assert!(coordinator.run("goal").await.is_err());
    }

    #[tokio::test]
    async fn test_final_decision_ends_session() {
        let sage = agent(
            "sage",
            vec![
                hypothesis("postgres fits the workload", 0.7),
                final_decision("use postgres"),
                hypothesis("never applied", 0.9),
            ],
        );
        let mut coordinator = Coordinator::new(config(), vec![sage]);
        let result = coordinator.run("choose a database").await.unwrap();

        assert_eq!(result.termination, TerminationReason::DecisionReached);
        assert_eq!(result.iterations, 2);
        assert_eq!(result.rounds.len(), 2);
        assert_eq!(result.final_decision.as_deref(), Some("use postgres"));
        assert_eq!(coordinator.phase(), RoundPhase::Terminated);
        assert_eq!(
            coordinator.events().last().map(|e| e.kind),
            Some(RoundEventKind::SessionTerminated)
        );
    }

    #[tokio::test]
    async fn test_iteration_limit_bounds_the_session() {
        let forge = Arc::new(
            ScriptedAgent::new("forge", vec![hypothesis("keep going", 0.5)]).repeating(),
        );
        let mut coordinator = Coordinator::new(
            OrchestratorConfig {
                max_iterations: 4,
                ..config()
            },
            vec![forge],
        );
        let result = coordinator.run("endless").await.unwrap();

        assert_eq!(result.termination, TerminationReason::IterationLimit);
        assert_eq!(result.iterations, 4);
    }

    #[tokio::test]
    async fn test_zero_max_iterations_runs_no_round() {
        let forge = agent("forge", vec![hypothesis("anything", 0.5)]);
        let mut coordinator = Coordinator::new(
            OrchestratorConfig {
                max_iterations: 0,
                ..config()
            },
            vec![forge],
        );
        let result = coordinator.run("goal").await.unwrap();
        assert_eq!(result.termination, TerminationReason::IterationLimit);
        assert_eq!(result.iterations, 0);
    }

    #[tokio::test]
    async fn test_agents_that_always_time_out_end_the_session() {
        let sleepy = Arc::new(
            ScriptedAgent::new("sleepy", vec![hypothesis("late", 0.5)])
                .repeating()
                .with_delay(Duration::from_secs(10)),
        );
        let mut coordinator = Coordinator::new(
            OrchestratorConfig {
                agent_timeout_ms: 20,
                ..config()
            },
            vec![sleepy],
        );
        let result = coordinator.run("goal").await.unwrap();

        assert_eq!(result.termination, TerminationReason::NoProposals);
        assert_eq!(result.iterations, 0);
        assert!(coordinator
            .events()
            .iter()
            .any(|e| e.kind == RoundEventKind::AgentFailed && e.data["reason"] == "timeout"));
    }

    #[tokio::test]
    async fn test_failing_agents_are_absent_not_fatal() {
        let agents = vec![
            Arc::new(
                ScriptedAgent::new("sleepy", vec![hypothesis("late", 0.5)])
                    .repeating()
                    .with_delay(Duration::from_secs(10)),
            ) as Arc<dyn Agent>,
            Arc::new(ScriptedAgent::new("garbled", vec![json!({"kind": "??"})]).repeating()),
            Arc::new(
                ScriptedAgent::new("steady", vec![hypothesis("steady idea", 0.6)]).repeating(),
            ),
        ];
        let mut coordinator = Coordinator::new(
            OrchestratorConfig {
                max_iterations: 3,
                agent_timeout_ms: 20,
                ..config()
            },
            agents,
        );
        let result = coordinator.run("goal").await.unwrap();

        assert_eq!(result.termination, TerminationReason::IterationLimit);
        assert!(result.rounds.iter().all(|r| r.winner == "steady"));
        let failures = coordinator
            .events()
            .iter()
            .filter(|e| e.kind == RoundEventKind::AgentFailed)
            .count();
        assert_eq!(failures, 6);
    }

    #[tokio::test]
    async fn test_everyone_abstains() {
        let mut coordinator = Coordinator::new(
            config(),
            vec![agent("scout", vec![]), agent("forge", vec![json!(null)])],
        );
        let result = coordinator.run("goal").await.unwrap();
        assert_eq!(result.termination, TerminationReason::NoProposals);
        assert!(result.final_decision.is_none());
    }

    #[tokio::test]
    async fn test_most_relevant_proposal_wins() {
        let agents = vec![
            agent("db", vec![hypothesis("optimize the database", 0.8)]),
            agent(
                "auth",
                vec![hypothesis("use JWT tokens for authentication", 0.8)],
            ),
        ];
        let mut coordinator = Coordinator::new(
            OrchestratorConfig {
                max_iterations: 1,
                ..config()
            },
            agents,
        );
        let result = coordinator
            .run("implement user authentication")
            .await
            .unwrap();

        assert_eq!(result.rounds[0].winner, "auth");
        assert_eq!(result.rounds[0].candidates.len(), 2);
        assert_eq!(result.workspace.hypotheses[0].source, "auth");
    }

    #[tokio::test]
    async fn test_oversized_winner_is_skipped_for_one_that_fits() {
        let goal = "collect evidence";
        let budget = Workspace::new(goal).token_count() + 120;
        let agents = vec![
            agent(
                "runner",
                vec![json!({
                    "type": "tool_result",
                    "content": "collect evidence dump",
                    "confidence": 1.0,
                    "key": "dump",
                    "value": "x".repeat(4_000),
                })],
            ),
            agent("scout", vec![hypothesis("small note", 0.1)]),
        ];
        let mut coordinator = Coordinator::new(
            OrchestratorConfig {
                max_iterations: 1,
                max_workspace_tokens: budget,
                ..config()
            },
            agents,
        );
        let result = coordinator.run(goal).await.unwrap();

        assert_eq!(result.rounds[0].winner, "scout");
        assert!(result.rounds[0].candidates[0].score > result.rounds[0].score);
        assert!(result.workspace.tool_results.is_empty());
    }

    #[tokio::test]
    async fn test_nothing_fits_exhausts_capacity() {
        let goal = "short goal";
        let budget = Workspace::new(goal).token_count() + 10;
        let agents = vec![agent("verbose", vec![hypothesis(&"word ".repeat(500), 0.9)])];
        let mut coordinator = Coordinator::new(
            OrchestratorConfig {
                max_workspace_tokens: budget,
                ..config()
            },
            agents,
        );
        let result = coordinator.run(goal).await.unwrap();

        assert_eq!(result.termination, TerminationReason::CapacityExhausted);
        assert_eq!(result.iterations, 0);
        assert!(result.workspace.token_count() <= budget);
    }

    #[tokio::test]
    async fn test_budget_holds_after_every_round() {
        let budget = 200;
        let agents: Vec<Arc<dyn Agent>> = (0..3)
            .map(|i| {
                let script = (0..6)
                    .map(|j| {
                        let content = format!("idea {} from agent {} about caching layers", j, i);
                        hypothesis(&content, 0.5)
                    })
                    .collect();
                Arc::new(ScriptedAgent::new(&format!("agent{}", i), script)) as Arc<dyn Agent>
            })
            .collect();
        let mut coordinator = Coordinator::new(
            OrchestratorConfig {
                max_iterations: 12,
                max_workspace_tokens: budget,
                ..config()
            },
            agents,
        );
        let result = coordinator.run("design a caching layer").await.unwrap();

        // Every agent runs out of script after six rounds
        assert_eq!(result.termination, TerminationReason::NoProposals);
        assert_eq!(result.iterations, 6);
        assert!(result.rounds.iter().all(|r| r.token_count <= budget));
        assert!(result.workspace.hypotheses.len() < 6);
        assert!(coordinator
            .events()
            .iter()
            .any(|e| e.kind == RoundEventKind::WorkspacePruned));
    }

    #[tokio::test]
    async fn test_challenge_and_response_are_tracked() {
        let agents = vec![
            agent(
                "scout",
                vec![json!({
                    "type": "challenge",
                    "content": "prove the cache is faster",
                    "to": "forge",
                })],
            ),
            agent(
                "forge",
                vec![
                    json!(null),
                    json!({
                        "type": "response",
                        "content": "ran the benchmark, result: 3x faster, all checks passed",
                        "to": "scout",
                    }),
                ],
            ),
        ];
        let mut coordinator = Coordinator::new(
            OrchestratorConfig {
                max_iterations: 2,
                ..config()
            },
            agents,
        );
        let result = coordinator.run("speed up the cache").await.unwrap();

        assert_eq!(result.iterations, 2);
        assert_eq!(result.metrics.challenges_issued, 1);
        assert_eq!(result.metrics.attempts_matched, 1);
        assert_eq!(result.challenge_report.responded, 1);
        assert_eq!(result.challenge_report.successful_attempts, 1);
        assert!(result.workspace.pending_challenges[0].responded);
        assert_eq!(
            result.rounds[1].outcome,
            ApplyOutcome::ChallengeAnswered {
                challenger: "scout".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_abort_before_first_round() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(CoordinatorCommand::Abort).await.unwrap();

        let forge = Arc::new(ScriptedAgent::new("forge", vec![hypothesis("x", 0.5)]).repeating());
        let mut coordinator = Coordinator::new(config(), vec![forge]).with_command_channel(rx);
        let result = coordinator.run("goal").await.unwrap();

        assert_eq!(result.termination, TerminationReason::Cancelled);
        assert_eq!(result.iterations, 0);
    }

    #[tokio::test]
    async fn test_abort_between_rounds() {
        let (tx, rx) = mpsc::channel(4);
        let forge = Arc::new(
            ScriptedAgent::new("forge", vec![hypothesis("x", 0.5)])
                .repeating()
                .with_delay(Duration::from_millis(10)),
        );
        let mut coordinator = Coordinator::new(
            OrchestratorConfig {
                max_iterations: 10_000,
                ..config()
            },
            vec![forge],
        )
        .with_command_channel(rx);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            let _ = tx.send(CoordinatorCommand::Abort).await;
        });
        let result = coordinator.run("goal").await.unwrap();

        assert_eq!(result.termination, TerminationReason::Cancelled);
        assert!(result.iterations < 10_000);
    }

    #[tokio::test]
    async fn test_side_effects_reach_sqlite_and_subscribers() {
        let db = AgoraDb::open_in_memory().unwrap();
        let sink = Arc::new(SqliteEventSink::new(&db));
        let episodes = Arc::new(SqliteEpisodes::new(&db));
        episodes
            .add("earlier", "choose a database -> use sqlite")
            .unwrap();
        let notifier = Arc::new(BroadcastNotifier::new(16));
        let mut updates = notifier.subscribe();
        let (event_tx, mut event_rx) = mpsc::channel(64);

        let sage = agent(
            "sage",
            vec![hypothesis("sqlite is enough", 0.6), final_decision("use sqlite")],
        );
        let mut coordinator = Coordinator::new(config(), vec![sage])
            .with_session_id("s-42")
            .with_event_sink(sink.clone())
            .with_notifier(notifier.clone())
            .with_recall(episodes.clone())
            .with_event_channel(event_tx);
        let result = coordinator.run("choose a database").await.unwrap();

        assert_eq!(result.session_id, "s-42");
        assert_eq!(result.workspace.episodic_matches[0].session_id, "earlier");

        let session = sink.load_session("s-42").unwrap();
        assert_eq!(session.status, "finished");
        assert_eq!(session.termination.as_deref(), Some("decision_reached"));
        assert_eq!(session.final_decision.as_deref(), Some("use sqlite"));

        let kinds: Vec<String> = sink
            .events_for("s-42")
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(kinds.first().map(String::as_str), Some("session_started"));
        assert_eq!(kinds.last().map(String::as_str), Some("session_terminated"));
        assert_eq!(kinds.iter().filter(|k| *k == "round_applied").count(), 2);

        let first = updates.recv().await.unwrap();
        assert_eq!(first.session_id, "s-42");
        assert_eq!(first.iteration, 1);

        assert_eq!(
            event_rx.recv().await.unwrap().kind,
            RoundEventKind::SessionStarted
        );
        assert_eq!(episodes.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failing_collaborators_do_not_change_the_outcome() {
        struct BrokenSink;

        #[async_trait::async_trait]
        impl EventSink for BrokenSink {
            async fn log_round(
                &self,
                _session_id: &str,
                _event_type: &str,
                _data: &Value,
                _actor: &str,
                _iteration: u32,
            ) -> Result<()> {
                anyhow::bail!("database is locked")
            }
        }

        // No subscribers: every notification fails
        let notifier = Arc::new(BroadcastNotifier::new(4));
        let sage = agent("sage", vec![final_decision("ship it")]);
        let mut coordinator = Coordinator::new(config(), vec![sage])
            .with_event_sink(Arc::new(BrokenSink))
            .with_notifier(notifier);
        let result = coordinator.run("release plan").await.unwrap();

        assert_eq!(result.termination, TerminationReason::DecisionReached);
        assert_eq!(result.iterations, 1);
    }

    /// Sends `Abort` while proposing, as a caller would mid-round
    struct AbortingAgent {
        commands: mpsc::Sender<CoordinatorCommand>,
    }

    #[async_trait::async_trait]
    impl Agent for AbortingAgent {
        fn name(&self) -> &str {
            "impatient"
        }

        async fn propose(&self, _workspace: Arc<Workspace>) -> Result<Option<Value>> {
            let _ = self.commands.try_send(CoordinatorCommand::Abort);
            Ok(Some(hypothesis("one last idea", 0.5)))
        }
    }

    #[tokio::test]
    async fn test_abort_during_last_round_reports_iteration_limit() {
        let (tx, rx) = mpsc::channel(4);
        let impatient = Arc::new(AbortingAgent { commands: tx }) as Arc<dyn Agent>;
        let mut coordinator = Coordinator::new(
            OrchestratorConfig {
                max_iterations: 1,
                ..config()
            },
            vec![impatient],
        )
        .with_command_channel(rx);
        let result = coordinator.run("goal").await.unwrap();

        assert_eq!(result.termination, TerminationReason::IterationLimit);
        assert_eq!(result.iterations, 1);
    }

    #[tokio::test]
    async fn test_abort_during_earlier_round_still_cancels() {
        let (tx, rx) = mpsc::channel(4);
        let impatient = Arc::new(AbortingAgent { commands: tx }) as Arc<dyn Agent>;
        let mut coordinator = Coordinator::new(
            OrchestratorConfig {
                max_iterations: 5,
                ..config()
            },
            vec![impatient],
        )
        .with_command_channel(rx);
        let result = coordinator.run("goal").await.unwrap();

        assert_eq!(result.termination, TerminationReason::Cancelled);
        assert_eq!(result.iterations, 1);
    }

    #[tokio::test]
    async fn test_oversized_goal_truncated_at_recall_is_reported() {
        let db = AgoraDb::open_in_memory().unwrap();
        let episodes = Arc::new(SqliteEpisodes::new(&db));
        let goal = "design ".repeat(3000);
        let sage = agent("sage", vec![final_decision("use a monolith")]);
        let mut coordinator = Coordinator::new(
            OrchestratorConfig {
                max_workspace_tokens: 500,
                ..config()
            },
            vec![sage],
        )
        .with_recall(episodes);
        let result = coordinator.run(&goal).await.unwrap();

        assert_eq!(result.termination, TerminationReason::DecisionReached);
        assert!(result.workspace.current_focus.chars().count() <= 203);

        let kinds: Vec<RoundEventKind> = coordinator.events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds[0], RoundEventKind::SessionStarted);
        let truncated = coordinator
            .events()
            .iter()
            .find(|e| e.kind == RoundEventKind::FocusTruncated)
            .expect("focus truncation was not reported");
        assert_eq!(truncated.iteration, 0);
        assert_eq!(truncated.data["focus_truncated"], true);
        assert!(kinds.contains(&RoundEventKind::WorkspacePruned));
    }

    #[tokio::test]
    async fn test_round_metrics_measure_the_applied_workspace() {
        let goal = "pick a cache";
        let script = vec![
            json!({"type": "decision", "content": "use redis", "confidence": 0.6, "is_final": false}),
            hypothesis(&"redis handles the load ".repeat(50), 0.5),
            hypothesis(&"memcached is simpler ".repeat(25), 0.5),
        ];

        // Size the budget so only the third round needs an eviction
        let mut mirror = Workspace::new(goal);
        for value in &script {
            mirror.apply(&Proposal::from_value(value.clone(), "forge").unwrap());
        }
        let budget = mirror.token_count() - 60;

        let mut coordinator = Coordinator::new(
            OrchestratorConfig {
                max_iterations: 3,
                max_workspace_tokens: budget,
                keep: crate::config::KeepCounts {
                    hypotheses: 1,
                    ..Default::default()
                },
                ..config()
            },
            vec![agent("forge", script)],
        );
        let result = coordinator.run(goal).await.unwrap();

        assert_eq!(result.iterations, 3);
        assert_eq!(result.workspace.hypotheses.len(), 1);
        assert!(coordinator
            .events()
            .iter()
            .any(|e| e.kind == RoundEventKind::WorkspacePruned && e.iteration == 3));

        // One decision (weight 2) and both hypotheses, before eviction
        let last = &result.rounds[2];
        assert!((last.metrics.convergence_rate - 0.5).abs() < 1e-9);
        assert!(last.token_count <= budget);
    }

    #[test]
    fn test_episode_summary_prefers_final_decision() {
        let mut ws = Workspace::new("pick a queue");
        ws.apply(&Proposal {
            source: "sage".to_string(),
            content: "use nats".to_string(),
            confidence: None,
            kind: ProposalKind::Decision { is_final: true },
        });
        let result = SessionResult {
            session_id: "s".to_string(),
            iterations: 1,
            final_decision: Some("use nats".to_string()),
            termination: TerminationReason::DecisionReached,
            workspace: ws,
            metrics: SessionMetrics::default(),
            challenge_report: ChallengeReport::default(),
            rounds: Vec::new(),
        };
        assert_eq!(
            episode_summary(&result),
            "pick a queue -> use nats (decision_reached)"
        );
    }
}
