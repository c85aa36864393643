use async_trait::async_trait;

use crate::context::RunContext;
use crate::error::Result;
use crate::state::{Action, PlannerState};

/// A reasoning strategy. The Executor calls `plan` on the first iteration and
/// `replan` on every later one, after the previous actions' observations have
/// been appended to `state`.
#[async_trait]
pub trait Planner: Send + Sync {
    fn name(&self) -> &str;

    async fn plan(&self, ctx: &RunContext, state: &PlannerState) -> Result<Vec<Action>>;

    async fn replan(&self, ctx: &RunContext, state: &PlannerState) -> Result<Vec<Action>> {
        self.plan(ctx, state).await
    }
}
