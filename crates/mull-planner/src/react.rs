use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::common::respond;
use mull_core::{Action, Planner, PlannerState, Result, RunContext};
use mull_llm::ChatModel;

/// Reason-and-act: the model sees the whole conversation and either calls
/// tools or answers. No search and no backtracking.
pub struct ReActPlanner {
    model: Arc<dyn ChatModel>,
}

impl ReActPlanner {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Planner for ReActPlanner {
    fn name(&self) -> &str {
        "react"
    }

    async fn plan(&self, ctx: &RunContext, state: &PlannerState) -> Result<Vec<Action>> {
        let actions = respond(ctx, &self.model, state, None).await?;
        debug!(
            model = self.model.name(),
            iteration = state.iteration_count(),
            actions = actions.len(),
            "react step"
        );
        Ok(actions)
    }
}
