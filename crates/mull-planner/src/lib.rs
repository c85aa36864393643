//! # mull-planner
//!
//! Reasoning strategies behind the `Planner` trait, plus the registry that
//! builds them by name.
//!
//! Every strategy ends the same way: it turns the model's reply into actions.
//! What differs is the work done before that reply. ReAct does none;
//! Reflexion grades and retries; Self-Discover composes a reasoning
//! structure; ToT, GoT and LATS search over thoughts; MoA fans out to
//! several models and aggregates.

pub mod common;
pub mod got;
pub mod lats;
pub mod moa;
pub mod react;
pub mod reflexion;
pub mod registry;
pub mod self_discover;
pub mod tot;

pub use common::{parse_numbered_list, parse_score, parse_verdict, response_to_actions};
pub use got::{
    Controller, DefaultController, EdgeKind, Frontier, GraphOfThoughtPlanner, Operation,
    ThoughtGraph,
};
pub use lats::{LatsPlanner, SearchNode, SearchTree, uct};
pub use moa::MixtureOfAgentsPlanner;
pub use react::ReActPlanner;
pub use reflexion::ReflexionPlanner;
pub use registry::{PlannerFactory, PlannerOptions, PlannerRegistry};
pub use self_discover::{ReasoningModule, STRUCTURE_KEY, SelfDiscoverPlanner, default_modules};
pub use tot::{NodeStatus, ThoughtNode, ThoughtTree, TreeOfThoughtPlanner};
