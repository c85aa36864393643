//! Per-invocation context threaded through every planner, tool, and model call.

use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{MullError, Result};

/// The best answer seen so far during one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialAnswer {
    pub text: String,
    pub score: f64,
}

/// Context for one Executor invocation.
///
/// Cloning is cheap and shares the cancellation token and the partial-answer
/// slot. Use [`RunContext::child`] to derive a context for a nested agent.
#[derive(Clone)]
pub struct RunContext {
    run_id: Uuid,
    agent_id: String,
    depth: u32,
    cancel: CancellationToken,
    handoff_context: Map<String, Value>,
    partial: Arc<Mutex<Option<PartialAnswer>>>,
}

impl RunContext {
    pub fn new(agent_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            depth: 0,
            cancel,
            handoff_context: Map::new(),
            partial: Arc::new(Mutex::new(None)),
        }
    }

    /// A context with its own, never-cancelled token. Handy in tests.
    pub fn detached(agent_id: impl Into<String>) -> Self {
        Self::new(agent_id, CancellationToken::new())
    }

    /// Context for a nested agent run: child token, fresh partial slot, depth + 1.
    pub fn child(&self, agent_id: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            depth: self.depth + 1,
            cancel: self.cancel.child_token(),
            handoff_context: self.handoff_context.clone(),
            partial: Arc::new(Mutex::new(None)),
        }
    }

    /// Same run and agent on a child token, so the copy can be cancelled
    /// without cancelling `self`. The partial-answer slot stays shared.
    pub fn scoped(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            ..self.clone()
        }
    }

    /// Attach key/value data that travels with handoffs.
    pub fn with_handoff_context(mut self, data: Map<String, Value>) -> Self {
        self.handoff_context.extend(data);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn handoff_context(&self) -> &Map<String, Value> {
        &self.handoff_context
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail fast if the token has already fired.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(MullError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Drive `fut` to completion unless the token fires first, in which case
    /// the future is dropped and `Cancelled` is returned.
    pub async fn guard<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(MullError::Cancelled),
            res = fut => res,
        }
    }

    /// Record a candidate answer; the highest score wins, earlier on ties.
    pub fn offer_partial(&self, text: impl Into<String>, score: f64) {
        let mut slot = self.partial.lock();
        let better = match slot.as_ref() {
            Some(current) => score > current.score,
            None => true,
        };
        if better {
            *slot = Some(PartialAnswer {
                text: text.into(),
                score,
            });
        }
    }

    pub fn best_partial(&self) -> Option<PartialAnswer> {
        self.partial.lock().clone()
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("agent_id", &self.agent_id)
            .field("depth", &self.depth)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
