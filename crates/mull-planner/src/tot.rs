use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::common::{
    VERDICT_SYSTEM, ask, concurrency_limit, parse_numbered_list, parse_verdict, render_steps,
    respond, verdict_prompt,
};
use mull_config::{SearchStrategy, TreeOfThoughtConfig};
use mull_core::{Action, Planner, PlannerState, Result, RunContext};
use mull_llm::ChatModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Open,
    Expanded,
    Pruned,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThoughtNode {
    pub id: usize,
    pub parent_id: Option<usize>,
    pub content: String,
    /// Verdict for this step alone.
    pub score: f64,
    /// Sum of scores from the root down to this node.
    pub path_score: f64,
    pub depth: usize,
    pub status: NodeStatus,
}

/// Arena of thoughts. Node 0 is the task itself; IDs follow discovery order.
#[derive(Debug, Clone, Serialize)]
pub struct ThoughtTree {
    nodes: Vec<ThoughtNode>,
}

impl ThoughtTree {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            nodes: vec![ThoughtNode {
                id: 0,
                parent_id: None,
                content: root.into(),
                score: 0.0,
                path_score: 0.0,
                depth: 0,
                status: NodeStatus::Open,
            }],
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: usize) -> Option<&ThoughtNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> &[ThoughtNode] {
        &self.nodes
    }

    /// Add a scored child. A zero score prunes it on arrival.
    pub fn add(&mut self, parent: usize, content: String, score: f64) -> usize {
        let id = self.nodes.len();
        let (depth, base) = self
            .nodes
            .get(parent)
            .map(|p| (p.depth + 1, p.path_score))
            .unwrap_or((1, 0.0));
        self.nodes.push(ThoughtNode {
            id,
            parent_id: Some(parent),
            content,
            score,
            path_score: base + score,
            depth,
            status: if score > 0.0 {
                NodeStatus::Open
            } else {
                NodeStatus::Pruned
            },
        });
        id
    }

    fn set_status(&mut self, id: usize, status: NodeStatus) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.status = status;
        }
    }

    /// Contents from the first step down to `id`, root excluded.
    pub fn path(&self, id: usize) -> Vec<String> {
        let mut steps = Vec::new();
        let mut cursor = self.nodes.get(id);
        while let Some(node) = cursor {
            if node.parent_id.is_none() {
                break;
            }
            steps.push(node.content.clone());
            cursor = node.parent_id.and_then(|p| self.nodes.get(p));
        }
        steps.reverse();
        steps
    }

    /// Highest cumulative score among surviving thoughts; earlier wins ties.
    pub fn best_leaf(&self) -> Option<usize> {
        self.nodes
            .iter()
            .filter(|n| n.id != 0 && n.status != NodeStatus::Pruned)
            .fold(None::<&ThoughtNode>, |best, n| match best {
                Some(b) if b.path_score >= n.path_score => Some(b),
                _ => Some(n),
            })
            .map(|n| n.id)
    }

    /// Order `ids` best first, stable by ID.
    fn rank(&self, ids: &mut [usize]) {
        ids.sort_by(|a, b| {
            self.nodes[*b]
                .path_score
                .total_cmp(&self.nodes[*a].path_score)
                .then(a.cmp(b))
        });
    }
}

type SolutionFn = dyn Fn(&ThoughtNode) -> bool + Send + Sync;

/// Tree-of-Thought search.
///
/// Each open node yields up to `branch_factor` continuations, each scored
/// sure / maybe / impossible. The best `beam_width` of a layer survive; the
/// rest are pruned and never expanded again. The best path is then handed to
/// the model as structure for the final reply.
pub struct TreeOfThoughtPlanner {
    model: Arc<dyn ChatModel>,
    branch_factor: usize,
    max_depth: usize,
    strategy: SearchStrategy,
    beam_width: usize,
    concurrency: usize,
    solution_score: f64,
    is_solution: Option<Arc<SolutionFn>>,
}

impl TreeOfThoughtPlanner {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self::from_config(model, &TreeOfThoughtConfig::default(), 0)
    }

    pub fn from_config(
        model: Arc<dyn ChatModel>,
        config: &TreeOfThoughtConfig,
        concurrency: usize,
    ) -> Self {
        Self {
            model,
            branch_factor: config.branch_factor.max(1),
            max_depth: config.max_depth,
            strategy: config.strategy,
            beam_width: config.beam_width,
            concurrency,
            solution_score: config.solution_score,
            is_solution: None,
        }
    }

    pub fn with_branch_factor(mut self, n: usize) -> Self {
        if n > 0 {
            self.branch_factor = n;
        }
        self
    }

    pub fn with_max_depth(mut self, n: usize) -> Self {
        self.max_depth = n;
        self
    }

    pub fn with_strategy(mut self, strategy: SearchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    /// Stop the search at the first surviving node the predicate accepts.
    pub fn with_solution<F>(mut self, f: F) -> Self
    where
        F: Fn(&ThoughtNode) -> bool + Send + Sync + 'static,
    {
        self.is_solution = Some(Arc::new(f));
        self
    }

    fn beam(&self) -> usize {
        if self.beam_width == 0 {
            self.branch_factor
        } else {
            self.beam_width.min(self.branch_factor)
        }
    }

    fn solved(&self, node: &ThoughtNode) -> bool {
        if let Some(f) = &self.is_solution {
            if f(node) {
                return true;
            }
        }
        self.solution_score > 0.0 && node.score >= self.solution_score
    }

    async fn generate(&self, ctx: &RunContext, input: &str, path: &[String]) -> Result<Vec<String>> {
        let n = self.branch_factor;
        let so_far = if path.is_empty() {
            String::new()
        } else {
            format!("\n\nCurrent reasoning path:\n{}", render_steps(path))
        };
        let prompt = format!(
            "Given the following problem, generate exactly {n} distinct next reasoning steps.{so_far}\n\n\
             Problem: {input}\n\n\
             Each step should be a single clear thought. Number them 1 through {n}, one per line."
        );
        let reply = ask(
            ctx,
            self.model.as_ref(),
            "You are an expert problem solver. Generate distinct reasoning steps.",
            prompt,
        )
        .await?;
        Ok(parse_numbered_list(&reply, n))
    }

    async fn evaluate(&self, ctx: &RunContext, input: &str, thought: &str) -> Result<f64> {
        let reply = ask(
            ctx,
            self.model.as_ref(),
            VERDICT_SYSTEM,
            verdict_prompt(input, thought),
        )
        .await?;
        Ok(parse_verdict(&reply))
    }

    /// Generate and score children for every parent. Calls run concurrently
    /// up to the limit; results come back in parent order.
    async fn expand(
        &self,
        ctx: &RunContext,
        tree: &ThoughtTree,
        parents: &[usize],
    ) -> Result<Vec<(usize, String, f64)>> {
        let limit = concurrency_limit(self.concurrency, self.branch_factor);
        let input = tree.nodes[0].content.as_str();
        let jobs: Vec<(usize, Vec<String>)> = parents.iter().map(|&id| (id, tree.path(id))).collect();

        let generated: Vec<Result<(usize, Vec<String>)>> = stream::iter(jobs)
            .map(|(id, path)| async move { self.generate(ctx, input, &path).await.map(|t| (id, t)) })
            .buffered(limit)
            .collect()
            .await;

        let mut candidates = Vec::new();
        for result in generated {
            let (parent, thoughts) = result?;
            candidates.extend(thoughts.into_iter().map(|t| (parent, t)));
        }

        let thoughts: Vec<String> = candidates.iter().map(|(_, t)| t.clone()).collect();
        let scores: Vec<Result<f64>> = stream::iter(thoughts)
            .map(|thought| async move { self.evaluate(ctx, input, &thought).await })
            .buffered(limit)
            .collect()
            .await;

        candidates
            .into_iter()
            .zip(scores)
            .map(|((parent, thought), score)| score.map(|s| (parent, thought, s)))
            .collect()
    }

    /// Add expanded children, prune below the beam, return survivors best first.
    fn absorb(&self, tree: &mut ThoughtTree, expanded: Vec<(usize, String, f64)>) -> Vec<usize> {
        let mut layer = Vec::new();
        for (parent, content, score) in expanded {
            let id = tree.add(parent, content, score);
            if tree.nodes[id].status == NodeStatus::Open {
                layer.push(id);
            }
        }
        tree.rank(&mut layer);
        let beam = self.beam();
        for &id in layer.iter().skip(beam) {
            tree.set_status(id, NodeStatus::Pruned);
        }
        layer.truncate(beam);
        layer
    }

    /// Run the search and return the tree with the chosen node, if any.
    pub async fn search(&self, ctx: &RunContext, input: &str) -> Result<(ThoughtTree, Option<usize>)> {
        let mut tree = ThoughtTree::new(input);
        match self.strategy {
            SearchStrategy::Bfs => {
                let mut frontier = vec![0];
                for depth in 1..=self.max_depth {
                    if frontier.is_empty() {
                        break;
                    }
                    ctx.check()?;
                    let expanded = self.expand(ctx, &tree, &frontier).await?;
                    for &id in &frontier {
                        tree.set_status(id, NodeStatus::Expanded);
                    }
                    frontier = self.absorb(&mut tree, expanded);
                    debug!(depth, kept = frontier.len(), nodes = tree.len(), "tree-of-thought layer");
                    if let Some(&hit) = frontier.iter().find(|&&id| self.solved(&tree.nodes[id])) {
                        return Ok((tree, Some(hit)));
                    }
                }
            }
            SearchStrategy::Dfs => {
                let mut stack = vec![0];
                while let Some(id) = stack.pop() {
                    if tree.nodes[id].depth >= self.max_depth {
                        continue;
                    }
                    ctx.check()?;
                    let expanded = self.expand(ctx, &tree, &[id]).await?;
                    tree.set_status(id, NodeStatus::Expanded);
                    let children = self.absorb(&mut tree, expanded);
                    if let Some(&hit) = children.iter().find(|&&c| self.solved(&tree.nodes[c])) {
                        return Ok((tree, Some(hit)));
                    }
                    // Best child on top.
                    stack.extend(children.iter().rev());
                }
            }
        }
        let best = tree.best_leaf();
        Ok((tree, best))
    }
}

#[async_trait]
impl Planner for TreeOfThoughtPlanner {
    fn name(&self) -> &str {
        "tree-of-thought"
    }

    async fn plan(&self, ctx: &RunContext, state: &PlannerState) -> Result<Vec<Action>> {
        let (tree, best) = self.search(ctx, &state.input).await?;
        let path = best.map(|id| tree.path(id)).unwrap_or_default();
        debug!(nodes = tree.len(), path_len = path.len(), "tree-of-thought search done");

        let preamble = (!path.is_empty()).then(|| {
            format!(
                "Use the following reasoning path to formulate your response:\n\n{}",
                render_steps(&path)
            )
        });
        respond(ctx, &self.model, state, preamble).await
    }
}
