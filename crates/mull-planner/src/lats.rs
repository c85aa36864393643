use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::common::{ask, parse_numbered_list, parse_score, render_steps, respond};
use mull_config::LatsConfig;
use mull_core::{Action, MullError, Planner, PlannerState, Result, RunContext};
use mull_llm::ChatModel;

/// Upper confidence bound for trees. Unvisited nodes score infinity.
pub fn uct(total_value: f64, visit_count: u32, parent_visits: u32, c: f64) -> f64 {
    if visit_count == 0 {
        return f64::INFINITY;
    }
    let n = f64::from(visit_count);
    let parent = f64::from(parent_visits.max(1));
    total_value / n + c * (parent.ln() / n).sqrt()
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchNode {
    pub id: usize,
    pub parent_id: Option<usize>,
    /// The reasoning step this node stands for. The root holds the task.
    pub action: String,
    pub visit_count: u32,
    pub total_value: f64,
    pub children: Vec<usize>,
    pub depth: usize,
    pub reflection: Option<String>,
}

impl SearchNode {
    pub fn mean_value(&self) -> f64 {
        if self.visit_count == 0 {
            0.0
        } else {
            self.total_value / f64::from(self.visit_count)
        }
    }
}

/// Arena search tree; node 0 is the root.
#[derive(Debug, Clone, Serialize)]
pub struct SearchTree {
    nodes: Vec<SearchNode>,
}

impl SearchTree {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            nodes: vec![SearchNode {
                id: 0,
                parent_id: None,
                action: root.into(),
                visit_count: 0,
                total_value: 0.0,
                children: vec![],
                depth: 0,
                reflection: None,
            }],
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: usize) -> Option<&SearchNode> {
        self.nodes.get(id)
    }

    pub fn add_child(&mut self, parent: usize, action: impl Into<String>) -> usize {
        let id = self.nodes.len();
        let depth = self.nodes.get(parent).map(|p| p.depth + 1).unwrap_or(1);
        self.nodes.push(SearchNode {
            id,
            parent_id: Some(parent),
            action: action.into(),
            visit_count: 0,
            total_value: 0.0,
            children: vec![],
            depth,
            reflection: None,
        });
        if let Some(p) = self.nodes.get_mut(parent) {
            p.children.push(id);
        }
        id
    }

    /// Child of `id` with the highest UCT; the first one wins ties.
    pub fn best_uct_child(&self, id: usize, c: f64) -> Option<usize> {
        let node = self.nodes.get(id)?;
        let mut best: Option<(usize, f64)> = None;
        for &child in &node.children {
            let ch = &self.nodes[child];
            let score = uct(ch.total_value, ch.visit_count, node.visit_count, c);
            if best.is_none_or(|(_, b)| score > b) {
                best = Some((child, score));
            }
        }
        best.map(|(child, _)| child)
    }

    /// Descend from the root by UCT until a node without children.
    pub fn select(&self, c: f64) -> usize {
        let mut id = 0;
        while let Some(child) = self.best_uct_child(id, c) {
            id = child;
        }
        id
    }

    /// Add `reward` to the node and every ancestor.
    pub fn backpropagate(&mut self, id: usize, reward: f64) {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Some(node) = self.nodes.get_mut(current) else {
                break;
            };
            node.visit_count += 1;
            node.total_value += reward;
            cursor = node.parent_id;
        }
    }

    /// Follow the highest mean value among visited children from the root.
    pub fn best_exploitation_leaf(&self) -> usize {
        let mut id = 0;
        loop {
            let next = self.nodes[id]
                .children
                .iter()
                .map(|&c| &self.nodes[c])
                .filter(|c| c.visit_count > 0)
                .fold(None::<&SearchNode>, |best, c| match best {
                    Some(b) if b.mean_value() >= c.mean_value() => Some(b),
                    _ => Some(c),
                });
            match next {
                Some(n) => id = n.id,
                None => return id,
            }
        }
    }

    /// Steps from the root to `id`, root excluded.
    pub fn path(&self, id: usize) -> Vec<String> {
        let mut steps = Vec::new();
        let mut cursor = self.nodes.get(id);
        while let Some(node) = cursor {
            if node.parent_id.is_none() {
                break;
            }
            steps.push(node.action.clone());
            cursor = node.parent_id.and_then(|p| self.nodes.get(p));
        }
        steps.reverse();
        steps
    }

    fn set_reflection(&mut self, id: usize, reflection: String) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.reflection = Some(reflection);
        }
    }
}

/// Language Agent Tree Search.
///
/// Runs up to `simulations` rounds of select / expand / simulate /
/// backpropagate, one at a time. Weak simulations leave a reflection that
/// later expansions see. The answer follows the best mean-value path.
pub struct LatsPlanner {
    model: Arc<dyn ChatModel>,
    expansion_width: usize,
    max_depth: usize,
    simulations: usize,
    exploration_constant: f64,
    early_stop_reward: f64,
    reflect_below: f64,
    rollout: bool,
    reflections: Mutex<Vec<String>>,
}

impl LatsPlanner {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self::from_config(model, &LatsConfig::default())
    }

    pub fn from_config(model: Arc<dyn ChatModel>, config: &LatsConfig) -> Self {
        Self {
            model,
            expansion_width: config.expansion_width.max(1),
            max_depth: config.max_depth,
            simulations: config.simulations.max(1),
            exploration_constant: config.exploration_constant,
            early_stop_reward: config.early_stop_reward,
            reflect_below: config.reflect_below,
            rollout: config.rollout,
            reflections: Mutex::new(Vec::new()),
        }
    }

    pub fn with_simulations(mut self, n: usize) -> Self {
        if n > 0 {
            self.simulations = n;
        }
        self
    }

    pub fn with_expansion_width(mut self, n: usize) -> Self {
        if n > 0 {
            self.expansion_width = n;
        }
        self
    }

    pub fn with_exploration_constant(mut self, c: f64) -> Self {
        if c >= 0.0 {
            self.exploration_constant = c;
        }
        self
    }

    pub fn reflections(&self) -> Vec<String> {
        self.reflections.lock().clone()
    }

    async fn expand(&self, ctx: &RunContext, tree: &SearchTree, leaf: usize) -> Result<Vec<String>> {
        let input = &tree.nodes[0].action;
        let n = self.expansion_width;
        let path = tree.path(leaf);
        let mut prompt = format!("Generate {n} distinct next reasoning steps for the following problem.\n\nProblem: {input}\n");
        if !path.is_empty() {
            prompt.push_str(&format!("\nReasoning so far:\n{}", render_steps(&path)));
        }
        let lessons = self.reflections();
        if !lessons.is_empty() {
            prompt.push_str(&format!(
                "\nPrevious reflections to consider:\n{}\n",
                lessons.join("\n")
            ));
        }
        prompt.push_str(&format!("\nNumber them 1 through {n}."));

        let reply = ask(
            ctx,
            self.model.as_ref(),
            "You are an expert problem solver. Generate diverse reasoning steps.",
            prompt,
        )
        .await?;
        Ok(parse_numbered_list(&reply, n))
    }

    async fn simulate(&self, ctx: &RunContext, input: &str, path: &[String]) -> Result<f64> {
        let mut trajectory = render_steps(path);
        if self.rollout {
            let prompt = format!(
                "Continue this reasoning to a complete answer.\n\nProblem: {input}\n\nReasoning so far:\n{trajectory}"
            );
            let completion = ask(
                ctx,
                self.model.as_ref(),
                "Finish the line of reasoning concisely.",
                prompt,
            )
            .await?;
            trajectory.push_str(&format!("Completion: {completion}\n"));
        }
        let prompt = format!(
            "Evaluate the quality of the following reasoning path for solving the problem.\n\n\
             Problem: {input}\n\nReasoning path:\n{trajectory}\n\
             Rate it from 0.0 (wrong or irrelevant) to 1.0 (correct and complete).\n\
             Reply with ONLY a number between 0.0 and 1.0."
        );
        let reply = ask(
            ctx,
            self.model.as_ref(),
            "You are a reasoning evaluator. Output only a decimal number between 0.0 and 1.0.",
            prompt,
        )
        .await?;
        Ok(parse_score(&reply))
    }

    async fn reflect(&self, ctx: &RunContext, input: &str, step: &str, reward: f64) -> Result<String> {
        let prompt = format!(
            "The following reasoning step scored {reward:.2}/1.0 for the problem.\n\n\
             Problem: {input}\n\nReasoning: {step}\n\n\
             Provide a brief reflection on what went wrong and how to improve."
        );
        ask(
            ctx,
            self.model.as_ref(),
            "Provide concise, actionable reflection on failed reasoning.",
            prompt,
        )
        .await
    }

    /// Run the simulation budget and return the tree with the chosen node.
    pub async fn search(&self, ctx: &RunContext, input: &str) -> Result<(SearchTree, usize)> {
        let mut tree = SearchTree::new(input);

        for sim in 0..self.simulations {
            ctx.check()?;
            let mut node = tree.select(self.exploration_constant);

            // Expand the root and any node already simulated once.
            let current = &tree.nodes[node];
            if current.depth < self.max_depth && (node == 0 || current.visit_count > 0) {
                match self.expand(ctx, &tree, node).await {
                    Ok(steps) => {
                        let mut first = None;
                        for step in steps {
                            let id = tree.add_child(node, step);
                            first.get_or_insert(id);
                        }
                        if let Some(id) = first {
                            node = id;
                        }
                    }
                    Err(MullError::Cancelled) => return Err(MullError::Cancelled),
                    Err(e) => {
                        warn!(error = %e, sim, "lats expansion failed");
                        continue;
                    }
                }
            }

            let path = tree.path(node);
            let reward = match self.simulate(ctx, input, &path).await {
                Ok(r) => r,
                Err(MullError::Cancelled) => return Err(MullError::Cancelled),
                Err(e) => {
                    warn!(error = %e, sim, "lats simulation failed");
                    continue;
                }
            };
            tree.backpropagate(node, reward);
            if !path.is_empty() {
                ctx.offer_partial(path.join("\n"), reward);
            }
            debug!(sim, node, reward, nodes = tree.len(), "lats simulation");

            if reward >= self.early_stop_reward && node != 0 {
                return Ok((tree, node));
            }
            if reward < self.reflect_below && node != 0 && tree.nodes[node].reflection.is_none() {
                let step = tree.nodes[node].action.clone();
                match self.reflect(ctx, input, &step, reward).await {
                    Ok(reflection) => {
                        tree.set_reflection(node, reflection.clone());
                        self.reflections.lock().push(reflection);
                    }
                    Err(MullError::Cancelled) => return Err(MullError::Cancelled),
                    Err(e) => warn!(error = %e, "lats reflection failed"),
                }
            }
        }

        let best = tree.best_exploitation_leaf();
        Ok((tree, best))
    }
}

#[async_trait]
impl Planner for LatsPlanner {
    fn name(&self) -> &str {
        "lats"
    }

    async fn plan(&self, ctx: &RunContext, state: &PlannerState) -> Result<Vec<Action>> {
        let (tree, best) = self.search(ctx, &state.input).await?;
        let path = tree.path(best);

        let mut preamble = String::new();
        if !path.is_empty() {
            preamble.push_str("Use the following reasoning path to formulate your response:\n\n");
            preamble.push_str(&render_steps(&path));
        }
        let lessons = self.reflections();
        if !lessons.is_empty() {
            preamble.push_str("\nLessons learned from exploration:\n");
            preamble.push_str(&lessons.join("\n"));
        }
        respond(ctx, &self.model, state, (!preamble.is_empty()).then_some(preamble)).await
    }
}
