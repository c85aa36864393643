//! Agent-to-agent transfer, surfaced to the model as `transfer_to_{id}` tools.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;

use crate::agent::Agent;
use mull_core::{Result, RunContext, ToolDefinition};

pub const HANDOFF_PREFIX: &str = "transfer_to_";

/// What the target agent receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffInput {
    pub message: String,
    /// Key/value data carried into the target's context.
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl HandoffInput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: Map::new(),
        }
    }
}

type EnabledFn = dyn Fn(&RunContext) -> bool + Send + Sync;
type OnHandoffFn = dyn Fn(&RunContext, &HandoffInput) -> Result<()> + Send + Sync;
type InputFilterFn = dyn Fn(HandoffInput) -> HandoffInput + Send + Sync;

/// A transfer route from one agent to `target`.
#[derive(Clone)]
pub struct Handoff {
    target: Arc<Agent>,
    description: Option<String>,
    is_enabled: Option<Arc<EnabledFn>>,
    on_handoff: Option<Arc<OnHandoffFn>>,
    input_filter: Option<Arc<InputFilterFn>>,
}

impl Handoff {
    pub fn new(target: Arc<Agent>) -> Self {
        Self {
            target,
            description: None,
            is_enabled: None,
            on_handoff: None,
            input_filter: None,
        }
    }

    /// Shorthand for a handoff with a custom description.
    pub fn to(target: Arc<Agent>, description: impl Into<String>) -> Self {
        Self::new(target).with_description(description)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_enabled<F>(mut self, f: F) -> Self
    where
        F: Fn(&RunContext) -> bool + Send + Sync + 'static,
    {
        self.is_enabled = Some(Arc::new(f));
        self
    }

    /// Runs after the input filter, before the target. An error aborts the
    /// transfer.
    pub fn with_on_handoff<F>(mut self, f: F) -> Self
    where
        F: Fn(&RunContext, &HandoffInput) -> Result<()> + Send + Sync + 'static,
    {
        self.on_handoff = Some(Arc::new(f));
        self
    }

    pub fn with_input_filter<F>(mut self, f: F) -> Self
    where
        F: Fn(HandoffInput) -> HandoffInput + Send + Sync + 'static,
    {
        self.input_filter = Some(Arc::new(f));
        self
    }

    pub fn target(&self) -> &Arc<Agent> {
        &self.target
    }

    pub fn target_id(&self) -> &str {
        self.target.id()
    }

    pub fn tool_name(&self) -> String {
        handoff_tool_name(self.target.id())
    }

    pub fn description(&self) -> String {
        match &self.description {
            Some(d) if !d.trim().is_empty() => d.clone(),
            _ => format!("Transfer the conversation to {}.", self.target.id()),
        }
    }

    pub fn tool_definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            self.tool_name(),
            self.description(),
            json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "The message to pass to the target agent"
                    }
                },
                "required": ["message"]
            }),
        )
    }

    pub fn is_enabled(&self, ctx: &RunContext) -> bool {
        self.is_enabled.as_ref().is_none_or(|f| f(ctx))
    }

    /// Apply the input filter, then the `on_handoff` callback.
    pub fn prepare(&self, ctx: &RunContext, input: HandoffInput) -> Result<HandoffInput> {
        let input = match &self.input_filter {
            Some(filter) => filter(input),
            None => input,
        };
        if let Some(f) = &self.on_handoff {
            f(ctx, &input)?;
        }
        Ok(input)
    }
}

impl std::fmt::Debug for Handoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handoff")
            .field("target", &self.target.id())
            .field("description", &self.description())
            .finish()
    }
}

pub fn handoff_tool_name(target: &str) -> String {
    format!("{HANDOFF_PREFIX}{target}")
}

pub fn is_handoff_tool(name: &str) -> bool {
    handoff_target(name).is_some()
}

/// The agent ID in a `transfer_to_{id}` name.
pub fn handoff_target(name: &str) -> Option<&str> {
    name.strip_prefix(HANDOFF_PREFIX).filter(|id| !id.is_empty())
}

pub fn handoffs_to_tools(handoffs: &[Handoff]) -> Vec<ToolDefinition> {
    handoffs.iter().map(Handoff::tool_definition).collect()
}
