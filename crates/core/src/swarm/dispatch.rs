//! # Side Channel
//!
//! Fire-and-forget delivery of round events, workspace updates and episode
//! summaries. The loop only ever enqueues; one background worker delivers
//! in order and logs failures. Nothing here can stall or fail a round.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::events::RoundEvent;
use super::notify::Notifier;
use crate::memory::EpisodicRecall;
use crate::state::EventSink;
use crate::workspace::Workspace;

/// Queue depth before new side effects are dropped
const QUEUE_DEPTH: usize = 256;

/// Work the background worker performs
#[derive(Debug)]
pub enum SideEffect {
    Log(RoundEvent),
    Publish {
        session_id: String,
        workspace: Box<Workspace>,
    },
    Remember { session_id: String, summary: String },
}

/// Collaborators the worker delivers to. Any of them may be absent.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub sink: Option<Arc<dyn EventSink>>,
    pub notifier: Option<Arc<dyn Notifier>>,
    pub recall: Option<Arc<dyn EpisodicRecall>>,
}

impl Collaborators {
    fn is_empty(&self) -> bool {
        self.sink.is_none() && self.notifier.is_none() && self.recall.is_none()
    }
}

/// Handle to the per-session side-channel worker
pub struct SideChannel {
    tx: Option<mpsc::Sender<SideEffect>>,
    worker: Option<JoinHandle<()>>,
}

impl SideChannel {
    /// Spawn the worker. With no collaborators nothing is spawned and every
    /// side effect is discarded.
    pub fn spawn(collaborators: Collaborators) -> Self {
        if collaborators.is_empty() {
            return Self {
                tx: None,
                worker: None,
            };
        }

        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let worker = tokio::spawn(deliver(rx, collaborators));
        Self {
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    /// Enqueue without waiting
    pub fn send(&self, effect: SideEffect) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.try_send(effect) {
            tracing::warn!("Side channel dropped an update: {}", e);
        }
    }

    /// Close the queue and wait up to `timeout` for the worker to finish
    pub async fn drain(mut self, timeout: Duration) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if tokio::time::timeout(timeout, worker).await.is_err() {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Side channel still busy, detaching"
                );
            }
        }
    }

    /// Close the queue and return at once; queued work finishes unobserved
    pub fn detach(mut self) {
        self.tx.take();
        self.worker.take();
    }
}

async fn deliver(mut rx: mpsc::Receiver<SideEffect>, collaborators: Collaborators) {
    while let Some(effect) = rx.recv().await {
        match effect {
            SideEffect::Log(event) => {
                if let Some(sink) = &collaborators.sink {
                    if let Err(e) = sink
                        .log_round(
                            &event.session_id,
                            event.kind.as_str(),
                            &event.data,
                            &event.actor,
                            event.iteration,
                        )
                        .await
                    {
                        tracing::warn!(
                            session_id = %event.session_id,
                            event = event.kind.as_str(),
                            "Failed to persist round event: {:#}",
                            e
                        );
                    }
                }
            }
            SideEffect::Publish {
                session_id,
                workspace,
            } => {
                if let Some(notifier) = &collaborators.notifier {
                    if let Err(e) = notifier.publish_update(&session_id, &workspace).await {
                        tracing::debug!(
                            session_id = %session_id,
                            "Workspace update not delivered: {}",
                            e
                        );
                    }
                }
            }
            SideEffect::Remember {
                session_id,
                summary,
            } => {
                if let Some(recall) = &collaborators.recall {
                    if let Err(e) = recall.record(&session_id, &summary).await {
                        tracing::warn!(
                            session_id = %session_id,
                            "Failed to record episode: {:#}",
                            e
                        );
                    }
                }
            }
        }
    }
}
