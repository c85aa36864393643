//! The Plan, Act, Observe loop.
//!
//! ```text
//!   plan ──► actions ──┬─ ToolCall   ──► tool        ──► observation ─┐
//!    ▲                 ├─ Handoff    ──► target agent ──► observation ─┤
//!    │                 └─ FinalAnswer ──► done                         │
//!    └──────────────────────── replan ◄────────────────────────────────┘
//! ```
//!
//! Bounded by `max_iterations` planner calls and a wall-clock timeout. Tool
//! and handoff failures become error observations; planner and model
//! failures end the run unless an `on_error` hook suppresses them.

use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::handoff::{Handoff, HandoffInput, handoff_target, handoffs_to_tools};
use crate::hooks::Hooks;
use crate::stream::{Emitter, RunStream};
use mull_config::{ExecutorConfig, MullConfig};
use mull_core::{
    Action, EventBus, EventPayload, MullError, Observation, ObservationKind, Planner, PlannerState,
    Result, Role, RunContext, Tool, ToolCall, ToolDefinition, ToolOutput, ToolRegistry,
};
use mull_planner::{PlannerOptions, PlannerRegistry};

/// Bus topic that receives one summary per finished run.
pub const RUNS_TOPIC: &str = "runs";

pub const DEFAULT_MAX_ITERATIONS: usize = 10;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_HANDOFF_DEPTH: u32 = 4;

/// A successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub answer: String,
    /// Planner calls made, including the one that produced the answer.
    pub iterations: usize,
    pub observations: Vec<Observation>,
}

/// Runs one planner against tools and handoff targets.
///
/// Cloning is cheap; clones share the planner, tools and agents.
#[derive(Clone)]
pub struct Executor {
    planner: Arc<dyn Planner>,
    tools: ToolRegistry,
    handoffs: Vec<Handoff>,
    hooks: Hooks,
    max_iterations: usize,
    timeout: Option<Duration>,
    tool_timeout: Option<Duration>,
    finish_on_handoff: bool,
    max_handoff_depth: u32,
    system_prompt: Option<String>,
    bus: Option<EventBus>,
}

impl Executor {
    pub fn new(planner: Arc<dyn Planner>) -> Self {
        Self {
            planner,
            tools: ToolRegistry::new(),
            handoffs: Vec::new(),
            hooks: Hooks::default(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            timeout: Some(DEFAULT_TIMEOUT),
            tool_timeout: None,
            finish_on_handoff: false,
            max_handoff_depth: DEFAULT_MAX_HANDOFF_DEPTH,
            system_prompt: None,
            bus: None,
        }
    }

    pub fn builder(planner: Arc<dyn Planner>) -> ExecutorBuilder {
        ExecutorBuilder {
            inner: Self::new(planner),
        }
    }

    /// Builder for the planner named by `[planner] default`, with the
    /// `[executor]` limits applied.
    pub fn from_config(
        config: &MullConfig,
        registry: &PlannerRegistry,
        options: &PlannerOptions,
    ) -> Result<ExecutorBuilder> {
        let options = options.clone().with_settings(config.planner.clone());
        let planner = registry.create(&config.planner.default, &options)?;
        Ok(Self::builder(planner).config(&config.executor))
    }

    pub fn planner_name(&self) -> &str {
        self.planner.name()
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn handoffs(&self) -> &[Handoff] {
        &self.handoffs
    }

    /// Registered tools followed by one `transfer_to_{id}` per handoff.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs = self.tools.definitions();
        defs.extend(handoffs_to_tools(&self.handoffs));
        defs
    }

    pub async fn run(&self, ctx: &RunContext, input: impl Into<String>) -> Result<RunOutput> {
        self.run_state(ctx, PlannerState::new(input)).await
    }

    /// Run with a caller-built state, e.g. one carrying earlier messages.
    pub async fn run_state(&self, ctx: &RunContext, state: PlannerState) -> Result<RunOutput> {
        let mut emitter = Emitter::silent(ctx.agent_id());
        self.execute(ctx, state, &mut emitter).await
    }

    pub fn stream(&self, ctx: &RunContext, input: impl Into<String>) -> RunStream {
        self.stream_state(ctx, PlannerState::new(input))
    }

    /// Spawn the run and return its event stream. The run advances only as
    /// fast as the stream is read; dropping the stream cancels it.
    pub fn stream_state(&self, ctx: &RunContext, state: PlannerState) -> RunStream {
        let run_ctx = ctx.scoped();
        let guard = run_ctx.cancel_token().clone().drop_guard();
        let (mut emitter, rx) = RunStream::channel(ctx.agent_id());
        let this = self.clone();
        let handle = tokio::spawn(async move { this.execute(&run_ctx, state, &mut emitter).await });
        RunStream::new(rx, handle, guard)
    }

    async fn execute(
        &self,
        ctx: &RunContext,
        state: PlannerState,
        emitter: &mut Emitter,
    ) -> Result<RunOutput> {
        let started = Instant::now();
        let mut state = self.prepare(state);
        info!(
            agent = %ctx.agent_id(),
            planner = %self.planner.name(),
            depth = ctx.depth(),
            "run started"
        );

        let outcome = match self.hooks.start(ctx, &state.input) {
            Ok(()) => self.drive_with_timeout(ctx, &mut state, emitter).await,
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(output) => {
                emitter
                    .emit(EventPayload::Done {
                        answer: output.answer.clone(),
                        iterations: output.iterations,
                    })
                    .await;
                info!(
                    agent = %ctx.agent_id(),
                    iterations = output.iterations,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    events = emitter.sequence(),
                    "run finished"
                );
            }
            Err(e) => {
                emitter
                    .emit(EventPayload::Error {
                        kind: e.kind(),
                        message: e.to_string(),
                        partial: e.partial_answer().map(str::to_string),
                    })
                    .await;
                warn!(
                    agent = %ctx.agent_id(),
                    error = %e,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "run failed"
                );
            }
        }
        self.publish(ctx, &outcome);
        self.hooks.end(ctx, &outcome);
        outcome
    }

    fn prepare(&self, mut state: PlannerState) -> PlannerState {
        if let Some(prompt) = &self.system_prompt
            && !state.messages.iter().any(|m| m.role == Role::System)
        {
            state = state.with_system(prompt.clone());
        }
        for def in self.tool_definitions() {
            if !state.tools.iter().any(|t| t.name == def.name) {
                state.tools.push(def);
            }
        }
        state
    }

    async fn drive_with_timeout(
        &self,
        ctx: &RunContext,
        state: &mut PlannerState,
        emitter: &mut Emitter,
    ) -> Result<RunOutput> {
        let Some(limit) = self.timeout else {
            return self.drive(ctx, state, emitter).await;
        };
        match tokio::time::timeout(limit, self.drive(ctx, state, emitter)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(agent = %ctx.agent_id(), ?limit, "run timed out");
                Err(MullError::Timeout {
                    limit,
                    partial: best_partial(ctx),
                })
            }
        }
    }

    async fn drive(
        &self,
        ctx: &RunContext,
        state: &mut PlannerState,
        emitter: &mut Emitter,
    ) -> Result<RunOutput> {
        loop {
            if state.exceeded(self.max_iterations) {
                warn!(
                    agent = %ctx.agent_id(),
                    limit = self.max_iterations,
                    "max iterations reached"
                );
                return Err(MullError::MaxIterationsExceeded {
                    limit: self.max_iterations,
                    partial: best_partial(ctx),
                });
            }
            ctx.check()?;
            let iteration = state.advance();
            self.hooks.iteration(ctx, iteration);

            let planned = if iteration == 1 {
                ctx.guard(self.planner.plan(ctx, state)).await
            } else {
                ctx.guard(self.planner.replan(ctx, state)).await
            };
            let actions = match planned.and_then(validate_actions) {
                Ok(actions) => actions,
                Err(MullError::Cancelled) => return Err(MullError::Cancelled),
                Err(e) => {
                    warn!(iteration, error = %e, planner = %self.planner.name(), "planning failed");
                    match self.hooks.error(ctx, e) {
                        Some(e) => return Err(e),
                        None => {
                            debug!(iteration, "planner error suppressed by hook");
                            continue;
                        }
                    }
                }
            };
            debug!(iteration, actions = actions.len(), "planner returned actions");

            for action in actions {
                let observation = match action {
                    Action::FinalAnswer { text } => {
                        emitter.emit(EventPayload::Text { text: text.clone() }).await;
                        return Ok(RunOutput {
                            answer: text,
                            iterations: iteration,
                            observations: state.observations().to_vec(),
                        });
                    }
                    Action::ToolCall {
                        id,
                        name,
                        arguments,
                    } => {
                        let call = ToolCall::new(id, name, arguments);
                        match self.handoff_for(&call.tool_name) {
                            Some(target) => self.transfer_tool(ctx, &target, call, emitter).await?,
                            None => self.call_tool(ctx, call, emitter).await?,
                        }
                    }
                    Action::Handoff { target, message } => {
                        let call = PlannerState::handoff_call(&target, &message);
                        self.hand_off(ctx, &target, call, message, emitter).await?
                    }
                };

                let handed_over = matches!(observation.kind, ObservationKind::Handoff { .. })
                    && !observation.is_error;
                if self.finish_on_handoff && handed_over {
                    let answer = observation.content.clone();
                    state.append(observation);
                    emitter.emit(EventPayload::Text { text: answer.clone() }).await;
                    return Ok(RunOutput {
                        answer,
                        iterations: iteration,
                        observations: state.observations().to_vec(),
                    });
                }
                state.append(observation);
            }
        }
    }

    /// Target ID when `name` is a configured `transfer_to_{id}` tool.
    fn handoff_for(&self, name: &str) -> Option<String> {
        let target = handoff_target(name)?;
        self.handoffs
            .iter()
            .any(|h| h.target_id() == target)
            .then(|| target.to_string())
    }

    /// A `transfer_to_{id}` call: vetted by `on_tool_call` like any tool,
    /// then handed off.
    async fn transfer_tool(
        &self,
        ctx: &RunContext,
        target: &str,
        call: ToolCall,
        emitter: &mut Emitter,
    ) -> Result<Observation> {
        if let Err(e) = self.hooks.tool_call(ctx, &call) {
            debug!(tool = %call.tool_name, error = %e, "handoff call vetoed by hook");
            emitter
                .emit(EventPayload::ToolCall {
                    id: call.id.clone(),
                    name: call.tool_name.clone(),
                    arguments: call.arguments.clone(),
                })
                .await;
            let observation =
                Observation::handoff(call, target, format!("tool call rejected: {e}"), true);
            emit_result(emitter, &observation).await;
            return Ok(observation);
        }
        let message = call
            .arguments
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.hand_off(ctx, target, call, message, emitter).await
    }

    async fn call_tool(
        &self,
        ctx: &RunContext,
        call: ToolCall,
        emitter: &mut Emitter,
    ) -> Result<Observation> {
        emitter
            .emit(EventPayload::ToolCall {
                id: call.id.clone(),
                name: call.tool_name.clone(),
                arguments: call.arguments.clone(),
            })
            .await;
        let observation = self.execute_tool(ctx, call).await?;
        self.hooks.tool_result(ctx, &observation);
        emit_result(emitter, &observation).await;
        Ok(observation)
    }

    /// Only cancellation escapes as an error; every other failure is folded
    /// into the observation.
    async fn execute_tool(&self, ctx: &RunContext, call: ToolCall) -> Result<Observation> {
        if let Err(e) = self.hooks.tool_call(ctx, &call) {
            debug!(tool = %call.tool_name, error = %e, "tool call vetoed by hook");
            return Ok(Observation::tool_error(call, format!("tool call rejected: {e}")));
        }
        let Some(tool) = self.tools.get(&call.tool_name) else {
            warn!(tool = %call.tool_name, "tool not found");
            let message = MullError::ToolNotFound(call.tool_name.clone()).to_string();
            return Ok(Observation::tool_error(call, message));
        };

        let started = Instant::now();
        let arguments = if call.arguments.is_null() {
            json!({})
        } else {
            call.arguments.clone()
        };
        let result = self.invoke(ctx, tool.as_ref(), &call.tool_name, arguments).await;
        match result {
            Ok(output) => {
                debug!(
                    tool = %call.tool_name,
                    is_error = output.is_error,
                    latency_ms = started.elapsed().as_millis() as u64,
                    "tool finished"
                );
                Ok(Observation::tool(call, output, started.elapsed()))
            }
            Err(MullError::Cancelled) => Err(MullError::Cancelled),
            Err(e) => {
                warn!(tool = %call.tool_name, error = %e, "tool failed");
                Ok(Observation::tool_error(call, e.to_string()))
            }
        }
    }

    async fn invoke(
        &self,
        ctx: &RunContext,
        tool: &dyn Tool,
        name: &str,
        arguments: Value,
    ) -> Result<ToolOutput> {
        let run = ctx.guard(tool.execute(ctx, arguments));
        match self.tool_timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .map_err(|_| MullError::ToolExecution {
                    tool: name.to_string(),
                    reason: format!("timed out after {limit:?}"),
                })?,
            None => run.await,
        }
    }

    async fn hand_off(
        &self,
        ctx: &RunContext,
        target: &str,
        call: ToolCall,
        message: String,
        emitter: &mut Emitter,
    ) -> Result<Observation> {
        emitter
            .emit(EventPayload::Handoff {
                target: target.to_string(),
                message: message.clone(),
            })
            .await;
        let observation = match self.transfer(ctx, target, message).await {
            Ok(answer) => Observation::handoff(call, target, answer, false),
            Err(MullError::Cancelled) => return Err(MullError::Cancelled),
            Err(e) => {
                warn!(from = %ctx.agent_id(), to = target, error = %e, "handoff failed");
                Observation::handoff(call, target, e.to_string(), true)
            }
        };
        emit_result(emitter, &observation).await;
        Ok(observation)
    }

    async fn transfer(&self, ctx: &RunContext, target: &str, message: String) -> Result<String> {
        let refused = |reason: String| MullError::Handoff {
            target: target.to_string(),
            reason,
        };
        let Some(handoff) = self.handoffs.iter().find(|h| h.target_id() == target) else {
            return Err(refused("no handoff to this agent is configured".into()));
        };
        if ctx.depth() >= self.max_handoff_depth {
            return Err(refused(format!(
                "handoff depth limit ({}) reached",
                self.max_handoff_depth
            )));
        }
        if !handoff.is_enabled(ctx) {
            return Err(refused("handoff is disabled".into()));
        }

        let mut input = HandoffInput::new(message);
        input.context = ctx.handoff_context().clone();
        let input = handoff.prepare(ctx, input).map_err(|e| match e {
            MullError::Cancelled => MullError::Cancelled,
            other => refused(other.to_string()),
        })?;
        self.hooks.handoff(ctx, target, &input);

        info!(from = %ctx.agent_id(), to = target, depth = ctx.depth() + 1, "handing off");
        let child = ctx.child(target).with_handoff_context(input.context);
        let output = handoff.target().run(&child, input.message).await?;
        Ok(output.answer)
    }

    fn publish(&self, ctx: &RunContext, outcome: &Result<RunOutput>) {
        let Some(bus) = &self.bus else {
            return;
        };
        let payload = match outcome {
            Ok(output) => json!({
                "run_id": ctx.run_id().to_string(),
                "status": "done",
                "answer": output.answer,
                "iterations": output.iterations,
            }),
            Err(e) => json!({
                "run_id": ctx.run_id().to_string(),
                "status": "error",
                "kind": e.kind(),
                "error": e.to_string(),
            }),
        };
        bus.publish(RUNS_TOPIC, ctx.agent_id(), payload);
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("planner", &self.planner.name())
            .field("tools", &self.tools.len())
            .field("handoffs", &self.handoffs)
            .field("max_iterations", &self.max_iterations)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn validate_actions(actions: Vec<Action>) -> Result<Vec<Action>> {
    if actions.is_empty() {
        return Err(MullError::InvalidAction("planner returned no actions".into()));
    }
    for action in &actions {
        action.validate()?;
    }
    Ok(actions)
}

fn best_partial(ctx: &RunContext) -> Option<String> {
    ctx.best_partial().map(|p| p.text)
}

async fn emit_result(emitter: &mut Emitter, observation: &Observation) {
    let (id, name) = match &observation.kind {
        ObservationKind::Tool { call } | ObservationKind::Handoff { call, .. } => {
            (call.id.clone(), call.tool_name.clone())
        }
        _ => return,
    };
    emitter
        .emit(EventPayload::ToolResult {
            id,
            name,
            content: observation.content.clone(),
            is_error: observation.is_error,
        })
        .await;
}

/// Fluent construction of an [`Executor`].
#[derive(Debug)]
pub struct ExecutorBuilder {
    inner: Executor,
}

impl ExecutorBuilder {
    pub fn new(planner: Arc<dyn Planner>) -> Self {
        Executor::builder(planner)
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.inner.tools.register(tool);
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.inner.tools = tools;
        self
    }

    pub fn handoff(mut self, handoff: Handoff) -> Self {
        self.inner.handoffs.push(handoff);
        self
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.inner.hooks = hooks;
        self
    }

    /// Zero is ignored.
    pub fn max_iterations(mut self, n: usize) -> Self {
        if n > 0 {
            self.inner.max_iterations = n;
        }
        self
    }

    /// `None` disables the wall-clock limit.
    pub fn timeout(mut self, limit: Option<Duration>) -> Self {
        self.inner.timeout = limit;
        self
    }

    pub fn tool_timeout(mut self, limit: Option<Duration>) -> Self {
        self.inner.tool_timeout = limit;
        self
    }

    /// End the run with the target agent's answer instead of replanning.
    pub fn finish_on_handoff(mut self, yes: bool) -> Self {
        self.inner.finish_on_handoff = yes;
        self
    }

    pub fn max_handoff_depth(mut self, depth: u32) -> Self {
        self.inner.max_handoff_depth = depth;
        self
    }

    /// Prepended when the incoming state has no system message.
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.inner.system_prompt = Some(prompt.into());
        self
    }

    /// Publish a summary of every finished run on [`RUNS_TOPIC`].
    pub fn bus(mut self, bus: EventBus) -> Self {
        self.inner.bus = Some(bus);
        self
    }

    pub fn config(mut self, config: &ExecutorConfig) -> Self {
        self = self
            .max_iterations(config.max_iterations)
            .timeout(config.timeout())
            .tool_timeout(config.tool_timeout())
            .finish_on_handoff(config.finish_on_handoff)
            .max_handoff_depth(config.max_handoff_depth);
        if let Some(prompt) = &config.system_prompt {
            self = self.system_prompt(prompt.clone());
        }
        self
    }

    pub fn build(self) -> Executor {
        self.inner
    }
}
