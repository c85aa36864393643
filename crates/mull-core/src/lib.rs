//! # mull-core
//!
//! Core types and traits for the Mull reasoning engine. This crate defines the
//! shared vocabulary used by every other crate in the workspace: planner state,
//! actions and observations, the planner contract, tools, messages, the event
//! stream payloads, and the cross-agent event bus.

pub mod bus;
pub mod context;
pub mod error;
pub mod event;
pub mod message;
pub mod planner;
pub mod state;
pub mod tool;

pub use bus::{BusMessage, EventBus, Subscription};
pub use context::{PartialAnswer, RunContext};
pub use error::{ErrorKind, MullError, Result};
pub use event::{Event, EventPayload};
pub use message::{Message, MessageContent, Role};
pub use planner::Planner;
pub use state::{Action, Observation, ObservationKind, PlannerState, new_call_id};
pub use tool::{FnTool, Tool, ToolCall, ToolDefinition, ToolOutput, ToolRegistry};
