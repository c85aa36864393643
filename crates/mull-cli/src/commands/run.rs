//! `mull run`: drive one input through an Executor whose model replays a
//! JSON script, printing each event as a JSON line.

use clap::Args;
use futures::StreamExt;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use mull_config::MullConfig;
use mull_core::{EventBus, MullError, Result, RunContext};
use mull_llm::{ChatModel, MockModel, MockResponse, RetryingModel};
use mull_planner::{PlannerOptions, PlannerRegistry};
use mull_runtime::{Executor, RUNS_TOPIC};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// The task to solve
    pub input: String,

    /// Planner to use (defaults to `planner.default`)
    #[arg(short, long)]
    pub planner: Option<String>,

    /// JSON array of model replies, consumed in order
    #[arg(short, long)]
    pub script: PathBuf,

    /// Separate script for the evaluator model (reflexion)
    #[arg(long)]
    pub evaluator_script: Option<PathBuf>,

    /// Agent ID stamped on every event
    #[arg(long, default_value = "mull")]
    pub agent: String,

    /// Override `executor.max_iterations`
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Override `executor.timeout_secs` (0 disables the limit)
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Retry failed model calls this many times
    #[arg(long, default_value = "0")]
    pub retries: u32,
}

/// One scripted reply: a bare string is shorthand for a text reply.
#[derive(Deserialize)]
#[serde(untagged)]
enum ScriptEntry {
    Text(String),
    Full(MockResponse),
}

pub(super) fn load_script(path: &Path) -> Result<Vec<MockResponse>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| MullError::Config(format!("cannot read script {}: {e}", path.display())))?;
    let entries: Vec<ScriptEntry> = serde_json::from_str(&raw)?;
    Ok(entries
        .into_iter()
        .map(|entry| match entry {
            ScriptEntry::Text(text) => MockResponse::text(&text),
            ScriptEntry::Full(resp) => resp,
        })
        .collect())
}

fn scripted(name: &str, path: &Path, retries: u32) -> Result<Arc<dyn ChatModel>> {
    let model: Arc<dyn ChatModel> =
        Arc::new(MockModel::new(name).with_responses(load_script(path)?));
    if retries == 0 {
        return Ok(model);
    }
    Ok(Arc::new(RetryingModel::new(model).with_max_retries(retries)))
}

pub(super) async fn cmd_run(mut config: MullConfig, args: RunArgs) -> Result<()> {
    if let Some(planner) = args.planner {
        config.planner.default = planner;
    }
    if let Some(n) = args.max_iterations {
        config.executor.max_iterations = n;
    }
    if let Some(secs) = args.timeout_secs {
        config.executor.timeout_secs = secs;
    }

    let mut options = PlannerOptions::new(scripted("scripted", &args.script, args.retries)?);
    if let Some(path) = &args.evaluator_script {
        options = options.with_evaluator(scripted("evaluator", path, args.retries)?);
    }

    let bus = EventBus::new(config.bus.capacity);
    let mut runs = bus.subscribe(RUNS_TOPIC);
    let executor = Executor::from_config(&config, &PlannerRegistry::with_builtins(), &options)?
        .bus(bus)
        .build();
    info!(planner = executor.planner_name(), agent = %args.agent, "starting run");

    let token = CancellationToken::new();
    let ctx = RunContext::new(args.agent, token.clone());
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let mut stream = executor.stream(&ctx, args.input);
    while let Some(event) = stream.next().await {
        println!("{}", serde_json::to_string(&event)?);
    }
    let outcome = stream.finish().await;
    ctrl_c.abort();

    if let Some(summary) = runs.try_recv() {
        debug!(payload = %summary.payload, "run summary");
    }
    outcome.map(|_| ())
}
