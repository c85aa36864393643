use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::common::{
    VERDICT_SYSTEM, ask, concurrency_limit, parse_numbered_list, parse_verdict, render_steps,
    respond, verdict_prompt,
};
use mull_config::GraphOfThoughtConfig;
use mull_core::{Action, MullError, Planner, PlannerState, Result, RunContext};
use mull_llm::ChatModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Split,
    Merge,
    Loop,
    Aggregate,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: usize,
    pub content: String,
    pub score: f64,
    pub depth: usize,
    pub parents: Vec<usize>,
    pub children: Vec<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphEdge {
    pub from: usize,
    pub to: usize,
    pub kind: EdgeKind,
    pub traversals: u32,
    pub pruned: bool,
}

/// Arena graph of thoughts. Nodes may have several parents; loop edges point
/// back at an ancestor and carry a traversal counter.
#[derive(Debug, Clone, Serialize)]
pub struct ThoughtGraph {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
}

impl ThoughtGraph {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            nodes: vec![GraphNode {
                id: 0,
                content: root.into(),
                score: 1.0,
                depth: 0,
                parents: vec![],
                children: vec![],
            }],
            edges: vec![],
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: usize) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    /// Add a node below `parents`, linking each with an edge of `kind`.
    pub fn add_node(&mut self, content: String, score: f64, parents: &[usize], kind: EdgeKind) -> usize {
        let id = self.nodes.len();
        let depth = parents
            .iter()
            .filter_map(|p| self.nodes.get(*p))
            .map(|p| p.depth + 1)
            .max()
            .unwrap_or(0);
        for &p in parents {
            if let Some(parent) = self.nodes.get_mut(p) {
                parent.children.push(id);
                self.edges.push(GraphEdge {
                    from: p,
                    to: id,
                    kind,
                    traversals: 0,
                    pruned: false,
                });
            }
        }
        self.nodes.push(GraphNode {
            id,
            content,
            score,
            depth,
            parents: parents.to_vec(),
            children: vec![],
        });
        id
    }

    /// The loop edge back into `to`, created from `from` on first request.
    pub fn loop_edge(&mut self, from: usize, to: usize) -> usize {
        if let Some(idx) = self
            .edges
            .iter()
            .position(|e| e.kind == EdgeKind::Loop && e.to == to)
        {
            return idx;
        }
        self.edges.push(GraphEdge {
            from,
            to,
            kind: EdgeKind::Loop,
            traversals: 0,
            pruned: false,
        });
        self.edges.len() - 1
    }

    /// Count one traversal. Returns false once the edge has gone past `bound`,
    /// after which the edge stays pruned.
    pub fn traverse(&mut self, edge: usize, bound: u32) -> bool {
        let Some(e) = self.edges.get_mut(edge) else {
            return false;
        };
        if e.pruned {
            return false;
        }
        e.traversals += 1;
        if e.traversals > bound {
            e.pruned = true;
            return false;
        }
        true
    }

    pub fn is_pruned(&self, edge: usize) -> bool {
        self.edges.get(edge).is_none_or(|e| e.pruned)
    }

    /// Nodes without children, best score first, lowest ID on ties.
    pub fn leaves(&self) -> Vec<usize> {
        let mut ids: Vec<usize> = self
            .nodes
            .iter()
            .filter(|n| n.children.is_empty())
            .map(|n| n.id)
            .collect();
        ids.sort_by(|a, b| {
            self.nodes[*b]
                .score
                .total_cmp(&self.nodes[*a].score)
                .then(a.cmp(b))
        });
        ids
    }
}

#[derive(Debug, Clone, Copy)]
struct Ranked {
    score: f64,
    id: usize,
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    // Max-heap on score; the older node wins ties.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Nodes waiting to be worked on, highest score first.
#[derive(Debug, Default)]
pub struct Frontier {
    heap: BinaryHeap<Ranked>,
}

impl Frontier {
    pub fn push(&mut self, id: usize, score: f64) {
        self.heap.push(Ranked { score, id });
    }

    pub fn pop(&mut self) -> Option<usize> {
        self.heap.pop().map(|r| r.id)
    }

    pub fn peek(&self) -> Option<usize> {
        self.heap.peek().map(|r| r.id)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Branch a node into new children.
    Split { node: usize },
    /// Join two reasoning paths into one node.
    Merge { nodes: Vec<usize> },
    /// Re-attempt the branch under `to` using what `from` produced.
    Loop { from: usize, to: usize },
    /// Combine nodes into the closing synthesis.
    Aggregate { nodes: Vec<usize> },
}

impl Operation {
    /// Every node ID the operation refers to.
    pub fn node_ids(&self) -> Vec<usize> {
        match self {
            Operation::Split { node } => vec![*node],
            Operation::Loop { from, to } => vec![*from, *to],
            Operation::Merge { nodes } | Operation::Aggregate { nodes } => nodes.clone(),
        }
    }
}

/// Decides which graph operation to run next. `None` ends construction.
pub trait Controller: Send + Sync {
    fn next_operation(
        &self,
        graph: &mut ThoughtGraph,
        frontier: &mut Frontier,
        remaining: usize,
    ) -> Option<Operation>;
}

/// Split the best node; loop weak branches back to their parent; merge
/// same-depth nodes from different branches; aggregate the best leaves when
/// the budget or the frontier runs out.
#[derive(Debug, Clone)]
pub struct DefaultController {
    pub max_depth: usize,
    pub merge_enabled: bool,
    pub loop_threshold: f64,
    pub aggregate_top: usize,
}

impl DefaultController {
    pub fn from_config(config: &GraphOfThoughtConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            merge_enabled: config.merge_enabled,
            loop_threshold: config.loop_threshold,
            aggregate_top: config.aggregate_top.max(1),
        }
    }

    fn aggregate(&self, graph: &ThoughtGraph) -> Operation {
        let mut nodes: Vec<usize> = graph.leaves().into_iter().filter(|&id| id != 0).collect();
        nodes.truncate(self.aggregate_top);
        if nodes.is_empty() {
            nodes.push(0);
        }
        Operation::Aggregate { nodes }
    }
}

impl Controller for DefaultController {
    fn next_operation(
        &self,
        graph: &mut ThoughtGraph,
        frontier: &mut Frontier,
        remaining: usize,
    ) -> Option<Operation> {
        if remaining <= 1 {
            return Some(self.aggregate(graph));
        }
        while let Some(id) = frontier.pop() {
            let Some(node) = graph.node(id).cloned() else {
                continue;
            };

            if node.depth > 0 && node.score < self.loop_threshold {
                let Some(&parent) = node.parents.first() else {
                    continue;
                };
                let edge = graph.loop_edge(id, parent);
                if graph.is_pruned(edge) {
                    continue;
                }
                return Some(Operation::Loop { from: id, to: parent });
            }

            if self.merge_enabled && node.depth > 0 {
                let partner = frontier.peek().and_then(|p| graph.node(p)).filter(|p| {
                    p.depth == node.depth
                        && p.score >= self.loop_threshold
                        && p.parents != node.parents
                });
                if let Some(p) = partner.map(|p| p.id) {
                    frontier.pop();
                    return Some(Operation::Merge { nodes: vec![id, p] });
                }
            }

            if node.depth < self.max_depth {
                return Some(Operation::Split { node: id });
            }
        }
        Some(self.aggregate(graph))
    }
}

/// Graph-of-Thought planning.
///
/// A controller drives split / merge / loop operations over a
/// priority-ordered frontier, bounded by `max_operations`, and finishes with
/// an aggregate whose score is the mean of its inputs. The aggregate content
/// then steers the final reply.
pub struct GraphOfThoughtPlanner {
    model: Arc<dyn ChatModel>,
    controller: Arc<dyn Controller>,
    branch_factor: usize,
    max_operations: usize,
    loop_bound: u32,
    concurrency: usize,
}

impl GraphOfThoughtPlanner {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self::from_config(model, &GraphOfThoughtConfig::default(), 0)
    }

    pub fn from_config(
        model: Arc<dyn ChatModel>,
        config: &GraphOfThoughtConfig,
        concurrency: usize,
    ) -> Self {
        Self {
            model,
            controller: Arc::new(DefaultController::from_config(config)),
            branch_factor: config.branch_factor.max(1),
            max_operations: config.max_operations.max(1),
            loop_bound: config.loop_bound,
            concurrency,
        }
    }

    pub fn with_controller(mut self, controller: Arc<dyn Controller>) -> Self {
        self.controller = controller;
        self
    }

    pub fn with_max_operations(mut self, n: usize) -> Self {
        if n > 0 {
            self.max_operations = n;
        }
        self
    }

    async fn score_all(&self, ctx: &RunContext, input: &str, thoughts: &[String]) -> Result<Vec<f64>> {
        let limit = concurrency_limit(self.concurrency, self.branch_factor);
        let scores: Vec<Result<f64>> = stream::iter(thoughts.to_vec())
            .map(|t| async move {
                let reply = ask(ctx, self.model.as_ref(), VERDICT_SYSTEM, verdict_prompt(input, &t)).await?;
                Ok::<_, MullError>(parse_verdict(&reply))
            })
            .buffered(limit)
            .collect()
            .await;
        scores.into_iter().collect()
    }

    fn lineage(graph: &ThoughtGraph, id: usize) -> Vec<String> {
        let mut steps = Vec::new();
        let mut cursor = graph.node(id);
        while let Some(node) = cursor {
            if node.id == 0 {
                break;
            }
            steps.push(node.content.clone());
            cursor = node.parents.first().and_then(|p| graph.node(*p));
        }
        steps.reverse();
        steps
    }

    async fn split(
        &self,
        ctx: &RunContext,
        graph: &mut ThoughtGraph,
        frontier: &mut Frontier,
        node: usize,
        hint: Option<String>,
    ) -> Result<Vec<usize>> {
        let input = graph.nodes[0].content.clone();
        let n = if hint.is_some() { 1 } else { self.branch_factor };
        let path = Self::lineage(graph, node);
        let mut prompt = format!(
            "Given the following problem, generate {n} distinct new thoughts that advance the reasoning.\n\n\
             Problem: {input}\n"
        );
        if !path.is_empty() {
            prompt.push_str(&format!("\nReasoning so far:\n{}", render_steps(&path)));
        }
        if let Some(previous) = hint {
            prompt.push_str(&format!(
                "\nA previous attempt from here was judged weak:\n{previous}\nImprove on it.\n"
            ));
        }
        prompt.push_str(&format!("\nNumber the thoughts 1 through {n}."));

        let reply = ask(
            ctx,
            self.model.as_ref(),
            "Generate distinct reasoning thoughts. Number each thought.",
            prompt,
        )
        .await?;
        let thoughts = parse_numbered_list(&reply, n);
        let scores = self.score_all(ctx, &input, &thoughts).await?;

        let mut added = Vec::with_capacity(thoughts.len());
        for (thought, score) in thoughts.into_iter().zip(scores) {
            let id = graph.add_node(thought, score, &[node], EdgeKind::Split);
            frontier.push(id, score);
            added.push(id);
        }
        Ok(added)
    }

    async fn apply(
        &self,
        ctx: &RunContext,
        graph: &mut ThoughtGraph,
        frontier: &mut Frontier,
        op: &Operation,
    ) -> Result<Option<usize>> {
        if let Some(id) = op.node_ids().into_iter().find(|id| graph.node(*id).is_none()) {
            return Err(MullError::Planning(format!(
                "graph-of-thought operation {op:?} refers to unknown node {id}"
            )));
        }
        let input = graph.nodes[0].content.clone();
        match op {
            Operation::Split { node } => {
                self.split(ctx, graph, frontier, *node, None).await?;
                Ok(None)
            }
            Operation::Loop { from, to } => {
                let edge = graph.loop_edge(*from, *to);
                if !graph.traverse(edge, self.loop_bound) {
                    debug!(from, to, "loop edge exhausted, pruned");
                    return Ok(None);
                }
                let previous = graph
                    .node(*from)
                    .map(|n| n.content.clone())
                    .ok_or_else(|| MullError::Planning(format!("loop from unknown node {from}")))?;
                self.split(ctx, graph, frontier, *to, Some(previous)).await?;
                Ok(None)
            }
            Operation::Merge { nodes } => {
                let content = nodes
                    .iter()
                    .filter_map(|id| graph.node(*id))
                    .map(|n| n.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                let score = self.score_all(ctx, &input, std::slice::from_ref(&content)).await?;
                let score = score.first().copied().unwrap_or(0.0);
                let id = graph.add_node(content, score, nodes, EdgeKind::Merge);
                frontier.push(id, score);
                Ok(None)
            }
            Operation::Aggregate { nodes } => {
                let thoughts: Vec<&GraphNode> = nodes.iter().filter_map(|id| graph.node(*id)).collect();
                let listed: String = thoughts
                    .iter()
                    .enumerate()
                    .map(|(i, n)| format!("{}. {}\n", i + 1, n.content))
                    .collect();
                let mean = if thoughts.is_empty() {
                    0.0
                } else {
                    thoughts.iter().map(|n| n.score).sum::<f64>() / thoughts.len() as f64
                };
                let prompt = format!(
                    "Aggregate the following thoughts into one comprehensive line of reasoning.\n\n\
                     Problem: {input}\n\nThoughts:\n{listed}"
                );
                let content = ask(
                    ctx,
                    self.model.as_ref(),
                    "Aggregate thoughts into a comprehensive answer.",
                    prompt,
                )
                .await?;
                let id = graph.add_node(content, mean, nodes, EdgeKind::Aggregate);
                Ok(Some(id))
            }
        }
    }

    /// Build the graph for `input`. Returns it with the aggregate node, if any.
    pub async fn build(&self, ctx: &RunContext, input: &str) -> Result<(ThoughtGraph, Option<usize>)> {
        let mut graph = ThoughtGraph::new(input);
        let mut frontier = Frontier::default();
        frontier.push(0, 1.0);

        let mut aggregate = None;
        for performed in 0..self.max_operations {
            ctx.check()?;
            let remaining = self.max_operations - performed;
            let Some(op) = self
                .controller
                .next_operation(&mut graph, &mut frontier, remaining)
            else {
                break;
            };
            debug!(?op, remaining, "graph-of-thought operation");
            match self.apply(ctx, &mut graph, &mut frontier, &op).await {
                Ok(Some(id)) => {
                    aggregate = Some(id);
                    break;
                }
                Ok(None) => {}
                Err(MullError::Cancelled) => return Err(MullError::Cancelled),
                Err(e) => {
                    warn!(error = %e, ?op, "graph-of-thought operation failed");
                    return Err(e);
                }
            }
        }
        Ok((graph, aggregate))
    }
}

#[async_trait]
impl Planner for GraphOfThoughtPlanner {
    fn name(&self) -> &str {
        "graph-of-thought"
    }

    async fn plan(&self, ctx: &RunContext, state: &PlannerState) -> Result<Vec<Action>> {
        let (graph, aggregate) = self.build(ctx, &state.input).await?;
        let insights: Vec<String> = match aggregate {
            Some(id) => vec![graph.nodes[id].content.clone()],
            None => graph
                .leaves()
                .into_iter()
                .filter(|&id| id != 0)
                .map(|id| graph.nodes[id].content.clone())
                .collect(),
        };
        debug!(nodes = graph.len(), edges = graph.edges().len(), "graph-of-thought built");

        let preamble = (!insights.is_empty()).then(|| {
            let body: String = insights
                .iter()
                .enumerate()
                .map(|(i, s)| format!("Insight {}: {}\n", i + 1, s))
                .collect();
            format!("Reasoning from thought graph:\n\n{body}")
        });
        respond(ctx, &self.model, state, preamble).await
    }
}
