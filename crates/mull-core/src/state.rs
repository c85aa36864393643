use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{MullError, Result};
use crate::message::Message;
use crate::tool::{ToolCall, ToolDefinition, ToolOutput};

/// What a planner asks the Executor to do next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    Handoff {
        target: String,
        message: String,
    },
    FinalAnswer {
        text: String,
    },
}

impl Action {
    /// A tool call with a fresh call id.
    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        Action::ToolCall {
            id: new_call_id(),
            name: name.into(),
            arguments,
        }
    }

    pub fn from_tool_call(call: &ToolCall) -> Self {
        Action::ToolCall {
            id: call.id.clone(),
            name: call.tool_name.clone(),
            arguments: call.arguments.clone(),
        }
    }

    pub fn handoff(target: impl Into<String>, message: impl Into<String>) -> Self {
        Action::Handoff {
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn final_answer(text: impl Into<String>) -> Self {
        Action::FinalAnswer { text: text.into() }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Action::FinalAnswer { .. })
    }

    /// Reject actions the Executor cannot dispatch.
    pub fn validate(&self) -> Result<()> {
        match self {
            Action::ToolCall {
                id,
                name,
                arguments,
            } => {
                if name.trim().is_empty() {
                    return Err(MullError::InvalidAction("tool call without a name".into()));
                }
                if id.is_empty() {
                    return Err(MullError::InvalidAction(format!(
                        "tool call '{name}' without an id"
                    )));
                }
                if !(arguments.is_object() || arguments.is_null()) {
                    return Err(MullError::InvalidAction(format!(
                        "tool call '{name}' arguments must be a JSON object"
                    )));
                }
                Ok(())
            }
            Action::Handoff { target, .. } => {
                if target.trim().is_empty() {
                    return Err(MullError::InvalidAction("handoff without a target".into()));
                }
                Ok(())
            }
            Action::FinalAnswer { .. } => Ok(()),
        }
    }
}

pub fn new_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

/// Where an observation came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ObservationKind {
    Tool { call: ToolCall },
    Handoff { call: ToolCall, target: String },
    /// Self-critique produced between actor attempts.
    Critique { attempt: usize },
    /// One member's output in a fan-out layer.
    Proposal { layer: usize, member: usize },
}

/// The result of executing an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub kind: ObservationKind,
    pub content: String,
    pub is_error: bool,
    #[serde(default)]
    pub latency_ms: u64,
}

impl Observation {
    pub fn tool(call: ToolCall, output: ToolOutput, latency: Duration) -> Self {
        Self {
            kind: ObservationKind::Tool { call },
            content: output.content,
            is_error: output.is_error,
            latency_ms: latency.as_millis() as u64,
        }
    }

    pub fn tool_error(call: ToolCall, message: impl Into<String>) -> Self {
        Self {
            kind: ObservationKind::Tool { call },
            content: message.into(),
            is_error: true,
            latency_ms: 0,
        }
    }

    pub fn handoff(
        call: ToolCall,
        target: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            kind: ObservationKind::Handoff {
                call,
                target: target.into(),
            },
            content: content.into(),
            is_error,
            latency_ms: 0,
        }
    }

    pub fn critique(attempt: usize, content: impl Into<String>) -> Self {
        Self {
            kind: ObservationKind::Critique { attempt },
            content: content.into(),
            is_error: false,
            latency_ms: 0,
        }
    }

    pub fn proposal(layer: usize, member: usize, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            kind: ObservationKind::Proposal { layer, member },
            content: content.into(),
            is_error,
            latency_ms: 0,
        }
    }

    /// Render as conversation messages for the next model call.
    pub fn to_messages(&self) -> Vec<Message> {
        match &self.kind {
            ObservationKind::Tool { call } | ObservationKind::Handoff { call, .. } => vec![
                Message::assistant_tool_calls("", vec![call.clone()]),
                Message::tool_result(call.id.clone(), self.content.clone(), self.is_error),
            ],
            ObservationKind::Critique { attempt } => vec![Message::system(format!(
                "Reflection on attempt {}:\n{}",
                attempt, self.content
            ))],
            ObservationKind::Proposal { layer, member } if !self.is_error => {
                vec![Message::system(format!(
                    "Proposal from layer {} member {}:\n{}",
                    layer + 1,
                    member + 1,
                    self.content
                ))]
            }
            ObservationKind::Proposal { .. } => vec![],
        }
    }
}

/// Conversational state for one Executor invocation.
///
/// Only the Executor mutates this between planner calls. Planners that fan out
/// work on clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerState {
    /// The task as the caller phrased it.
    pub input: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    /// Free-form values a caller can seed, e.g. a cached reasoning structure.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    iteration: usize,
    observations: Vec<Observation>,
}

impl PlannerState {
    pub fn new(input: impl Into<String>) -> Self {
        let input = input.into();
        Self {
            messages: vec![Message::user(input.clone())],
            input,
            tools: vec![],
            metadata: Map::new(),
            iteration: 0,
            observations: vec![],
        }
    }

    pub fn with_system(mut self, prompt: impl Into<String>) -> Self {
        self.messages.insert(0, Message::system(prompt));
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn append(&mut self, observation: Observation) {
        self.observations.push(observation);
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn iteration_count(&self) -> usize {
        self.iteration
    }

    /// Count one more planner call. Never decreases.
    pub fn advance(&mut self) -> usize {
        self.iteration += 1;
        self.iteration
    }

    pub fn exceeded(&self, max: usize) -> bool {
        self.iteration >= max
    }

    /// Base messages followed by every observation rendered in order.
    pub fn conversation(&self) -> Vec<Message> {
        let mut out = self.messages.clone();
        for obs in &self.observations {
            out.extend(obs.to_messages());
        }
        out
    }

    /// Synthesize the tool call a handoff action corresponds to.
    pub fn handoff_call(target: &str, message: &str) -> ToolCall {
        ToolCall::new(
            new_call_id(),
            format!("transfer_to_{target}"),
            json!({ "message": message }),
        )
    }
}
