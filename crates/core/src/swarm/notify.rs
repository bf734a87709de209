//! # Workspace Notifications
//!
//! Best-effort push of post-round workspace snapshots to observers.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::workspace::Workspace;

/// One snapshot pushed to observers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceUpdate {
    pub session_id: String,
    pub iteration: u32,
    pub workspace: Workspace,
}

/// Notification channel. Delivery failure never reaches the loop.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish_update(&self, session_id: &str, workspace: &Workspace) -> Result<()>;
}

/// Notifier over a tokio broadcast channel
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<WorkspaceUpdate>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkspaceUpdate> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn publish_update(&self, session_id: &str, workspace: &Workspace) -> Result<()> {
        self.tx
            .send(WorkspaceUpdate {
                session_id: session_id.to_string(),
                iteration: workspace.iteration(),
                workspace: workspace.clone(),
            })
            .map(|_| ())
            .map_err(|_| anyhow::anyhow!("no subscribers for session {}", session_id))
    }
}
