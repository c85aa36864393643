//! # mull-runtime
//!
//! Drives a [`mull_core::Planner`] through the Plan, Act, Observe loop.
//!
//! ## Architecture
//!
//! ```text
//!              ┌──────────────┐
//!   input ───► │   Executor   │ ───► RunStream (text, tool_call, tool_result,
//!              │              │                 handoff, done | error)
//!              │  1. Plan     │  ← Planner::plan / replan
//!              │  2. Act      │  ← tools, transfer_to_{id}
//!              │  3. Observe  │  ← observations appended to state
//!              └──────┬───────┘
//!                     │ Handoff
//!                     ▼
//!              ┌──────────────┐
//!              │ target Agent │  ← its own Executor, depth + 1
//!              └──────────────┘
//! ```
//!
//! Hooks observe (and in a few places veto or rewrite) each step. Finished
//! runs are summarised on the optional [`mull_core::EventBus`].

pub mod agent;
pub mod executor;
pub mod handoff;
pub mod hooks;
pub mod stream;

pub use agent::Agent;
pub use executor::{
    DEFAULT_MAX_HANDOFF_DEPTH, DEFAULT_MAX_ITERATIONS, DEFAULT_TIMEOUT, Executor, ExecutorBuilder,
    RUNS_TOPIC, RunOutput,
};
pub use handoff::{
    HANDOFF_PREFIX, Handoff, HandoffInput, handoff_target, handoff_tool_name, handoffs_to_tools,
    is_handoff_tool,
};
pub use hooks::{ErrorDecision, Hooks};
pub use stream::RunStream;
