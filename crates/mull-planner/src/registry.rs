use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{
    GraphOfThoughtPlanner, LatsPlanner, MixtureOfAgentsPlanner, ReActPlanner, ReflexionPlanner,
    SelfDiscoverPlanner, TreeOfThoughtPlanner,
};
use mull_config::PlannerConfig;
use mull_core::{MullError, Planner, Result};
use mull_llm::ChatModel;

/// Everything a factory may need to build a planner.
#[derive(Clone, Default)]
pub struct PlannerOptions {
    /// The main model. Every built-in planner requires one.
    pub model: Option<Arc<dyn ChatModel>>,
    /// Reflexion's evaluator; defaults to `model`.
    pub evaluator: Option<Arc<dyn ChatModel>>,
    /// Mixture-of-Agents layers; defaults to one layer of `model`.
    pub layers: Vec<Vec<Arc<dyn ChatModel>>>,
    /// Mixture-of-Agents aggregator; defaults to `model`.
    pub aggregator: Option<Arc<dyn ChatModel>>,
    pub settings: PlannerConfig,
}

impl PlannerOptions {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model: Some(model),
            ..Default::default()
        }
    }

    pub fn with_settings(mut self, settings: PlannerConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ChatModel>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn with_layers(mut self, layers: Vec<Vec<Arc<dyn ChatModel>>>) -> Self {
        self.layers = layers;
        self
    }

    pub fn with_aggregator(mut self, aggregator: Arc<dyn ChatModel>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    fn require_model(&self, planner: &str) -> Result<Arc<dyn ChatModel>> {
        self.model
            .clone()
            .ok_or_else(|| MullError::Config(format!("{planner} planner requires a model")))
    }
}

fn shared<P: Planner + 'static>(planner: P) -> Result<Arc<dyn Planner>> {
    Ok(Arc::new(planner))
}

pub type PlannerFactory = Arc<dyn Fn(&PlannerOptions) -> Result<Arc<dyn Planner>> + Send + Sync>;

/// Name → constructor map. Built explicitly and handed to whoever needs it;
/// there is no process-wide registry.
#[derive(Clone, Default)]
pub struct PlannerRegistry {
    factories: BTreeMap<String, PlannerFactory>,
}

impl PlannerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the seven built-in strategies.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("react", |opts| {
            shared(ReActPlanner::new(opts.require_model("react")?))
        });
        registry.register("reflexion", |opts| {
            let model = opts.require_model("reflexion")?;
            let mut planner = ReflexionPlanner::from_config(model, &opts.settings.reflexion);
            if let Some(evaluator) = &opts.evaluator {
                planner = planner.with_evaluator(Arc::clone(evaluator));
            }
            shared(planner)
        });
        registry.register("self-discover", |opts| {
            let model = opts.require_model("self-discover")?;
            shared(SelfDiscoverPlanner::from_config(
                model,
                &opts.settings.self_discover,
            ))
        });
        registry.register("tree-of-thought", |opts| {
            let model = opts.require_model("tree-of-thought")?;
            shared(TreeOfThoughtPlanner::from_config(
                model,
                &opts.settings.tree_of_thought,
                opts.settings.concurrency,
            ))
        });
        registry.register("graph-of-thought", |opts| {
            let model = opts.require_model("graph-of-thought")?;
            shared(GraphOfThoughtPlanner::from_config(
                model,
                &opts.settings.graph_of_thought,
                opts.settings.concurrency,
            ))
        });
        registry.register("lats", |opts| {
            let model = opts.require_model("lats")?;
            shared(LatsPlanner::from_config(model, &opts.settings.lats))
        });
        registry.register("mixture-of-agents", |opts| {
            let model = opts.require_model("mixture-of-agents")?;
            let mut planner = MixtureOfAgentsPlanner::from_config(
                model,
                &opts.settings.mixture_of_agents,
                opts.settings.concurrency,
            )
            .with_layers(opts.layers.clone());
            if let Some(aggregator) = &opts.aggregator {
                planner = planner.with_aggregator(Arc::clone(aggregator));
            }
            shared(planner)
        });
        registry
    }

    /// Register or replace a factory.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&PlannerOptions) -> Result<Arc<dyn Planner>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn create(&self, name: &str, options: &PlannerOptions) -> Result<Arc<dyn Planner>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| MullError::UnknownPlanner(name.to_string()))?;
        factory(options)
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}
