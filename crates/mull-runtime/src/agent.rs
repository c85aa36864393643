use futures::future::BoxFuture;

use crate::executor::{Executor, RunOutput};
use mull_core::{Result, RunContext};

/// A named Executor that other agents can hand off to.
pub struct Agent {
    id: String,
    description: String,
    executor: Executor,
}

impl Agent {
    pub fn new(id: impl Into<String>, executor: Executor) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            executor,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Run this agent's Executor on `input`. Boxed because handoffs nest runs.
    pub fn run<'a>(&'a self, ctx: &'a RunContext, input: String) -> BoxFuture<'a, Result<RunOutput>> {
        Box::pin(self.executor.run(ctx, input))
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("planner", &self.executor.planner_name())
            .finish()
    }
}
