use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::common::{ask, parse_numbered_list, respond};
use mull_config::SelfDiscoverConfig;
use mull_core::{Action, Planner, PlannerState, Result, RunContext};
use mull_llm::ChatModel;

/// Metadata key a caller can seed with a ready-made reasoning structure.
pub const STRUCTURE_KEY: &str = "self_discover_structure";

/// One entry of the reasoning-module catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningModule {
    pub name: String,
    pub description: String,
    pub template: String,
}

impl ReasoningModule {
    pub fn new(name: &str, description: &str, template: &str) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            template: template.into(),
        }
    }
}

/// The built-in catalog.
pub fn default_modules() -> Vec<ReasoningModule> {
    vec![
        ReasoningModule::new(
            "critical_thinking",
            "Question assumptions and evaluate evidence",
            "What assumptions does this rely on, and which of them could be wrong?",
        ),
        ReasoningModule::new(
            "decomposition",
            "Break the problem into smaller sub-problems",
            "What are the independent parts of this problem, and in what order should they be solved?",
        ),
        ReasoningModule::new(
            "analogical_reasoning",
            "Relate the problem to a similar solved one",
            "Which known problem resembles this one, and how does its solution transfer?",
        ),
        ReasoningModule::new(
            "causal_reasoning",
            "Trace causes and effects",
            "What causes lead to the observed outcome, and what follows from each step?",
        ),
        ReasoningModule::new(
            "constraint_analysis",
            "Identify the hard constraints a solution must meet",
            "Which constraints are fixed, and which candidate solutions do they rule out?",
        ),
        ReasoningModule::new(
            "abstraction",
            "Strip away detail to find the core structure",
            "What is the essential form of this problem once the specifics are removed?",
        ),
        ReasoningModule::new(
            "step_by_step",
            "Work through the problem one step at a time",
            "What is the first concrete step, and what does each following step depend on?",
        ),
        ReasoningModule::new(
            "hypothesis_testing",
            "Propose candidate answers and check them",
            "What answers are plausible, and how can each be confirmed or rejected?",
        ),
    ]
}

/// SELECT, ADAPT, then IMPLEMENT.
///
/// SELECT and ADAPT run once per run; the composed structure is held under
/// the run ID so later iterations, or a retry after an IMPLEMENT failure,
/// cost a single model call. The entry is dropped once IMPLEMENT answers.
pub struct SelfDiscoverPlanner {
    model: Arc<dyn ChatModel>,
    modules: Vec<ReasoningModule>,
    max_modules: usize,
    structures: Mutex<HashMap<Uuid, String>>,
}

impl SelfDiscoverPlanner {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self::from_config(model, &SelfDiscoverConfig::default())
    }

    pub fn from_config(model: Arc<dyn ChatModel>, config: &SelfDiscoverConfig) -> Self {
        Self {
            model,
            modules: default_modules(),
            max_modules: config.max_modules,
            structures: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the catalog. An empty list keeps the current one.
    pub fn with_modules(mut self, modules: Vec<ReasoningModule>) -> Self {
        if !modules.is_empty() {
            self.modules = modules;
        }
        self
    }

    pub fn modules(&self) -> &[ReasoningModule] {
        &self.modules
    }

    /// The structure held for the run behind `ctx`, if one was composed.
    pub fn cached_structure(&self, ctx: &RunContext) -> Option<String> {
        self.structures.lock().get(&ctx.run_id()).cloned()
    }

    async fn select(&self, ctx: &RunContext, input: &str) -> Result<Vec<ReasoningModule>> {
        let catalog: String = self
            .modules
            .iter()
            .map(|m| format!("- {}: {}\n", m.name, m.description))
            .collect();
        let prompt = format!(
            "Select the reasoning modules most useful for solving the task.\n\n\
             Task: {input}\n\nAvailable modules:\n{catalog}\n\
             Reply with the selected module names, one per line."
        );
        let reply = ask(
            ctx,
            self.model.as_ref(),
            "Select reasoning modules for a task. Reply with module names only.",
            prompt,
        )
        .await?;

        let mut selected: Vec<ReasoningModule> = Vec::new();
        for line in parse_numbered_list(&reply, usize::MAX) {
            let line = line.to_lowercase().replace(' ', "_");
            let Some(m) = self.modules.iter().find(|m| line.contains(&m.name)) else {
                continue;
            };
            if !selected.iter().any(|s| s.name == m.name) {
                selected.push(m.clone());
            }
        }
        if self.max_modules > 0 {
            selected.truncate(self.max_modules);
        }
        if selected.is_empty() {
            let fallback = self
                .modules
                .iter()
                .find(|m| m.name == "step_by_step")
                .or(self.modules.first())
                .cloned();
            selected.extend(fallback);
        }
        Ok(selected)
    }

    async fn adapt(
        &self,
        ctx: &RunContext,
        input: &str,
        selected: &[ReasoningModule],
    ) -> Result<Vec<String>> {
        let modules: String = selected
            .iter()
            .map(|m| format!("- {}: {}\n", m.name, m.template))
            .collect();
        let prompt = format!(
            "Rephrase each reasoning module so it applies specifically to the task.\n\n\
             Task: {input}\n\nModules:\n{modules}\n\
             Reply with one adapted step per line, numbered."
        );
        let reply = ask(
            ctx,
            self.model.as_ref(),
            "Adapt generic reasoning modules to a specific task.",
            prompt,
        )
        .await?;
        let steps = parse_numbered_list(&reply, usize::MAX);
        if steps.is_empty() {
            Ok(vec![reply.trim().to_string()])
        } else {
            Ok(steps)
        }
    }

    async fn discover(&self, ctx: &RunContext, input: &str) -> Result<String> {
        let selected = self.select(ctx, input).await?;
        debug!(
            modules = ?selected.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
            "self-discover selected modules"
        );
        let adapted = self.adapt(ctx, input, &selected).await?;
        let structure: String = adapted
            .iter()
            .enumerate()
            .map(|(i, step)| format!("{}. {}\n", i + 1, step))
            .collect();
        self.structures.lock().insert(ctx.run_id(), structure.clone());
        info!(steps = adapted.len(), "self-discover structure composed");
        Ok(structure)
    }
}

#[async_trait]
impl Planner for SelfDiscoverPlanner {
    fn name(&self) -> &str {
        "self-discover"
    }

    async fn plan(&self, ctx: &RunContext, state: &PlannerState) -> Result<Vec<Action>> {
        let seeded = state
            .metadata
            .get(STRUCTURE_KEY)
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let structure = match seeded.or_else(|| self.cached_structure(ctx)) {
            Some(s) => s,
            None => self.discover(ctx, &state.input).await?,
        };

        let preamble = format!("Follow this reasoning structure to solve the task:\n\n{structure}");
        let actions = respond(ctx, &self.model, state, Some(preamble)).await?;
        if actions.iter().any(Action::is_final) {
            self.structures.lock().remove(&ctx.run_id());
        }
        Ok(actions)
    }
}
