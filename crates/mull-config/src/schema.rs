use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Names of the planners every registry ships with.
pub const BUILTIN_PLANNERS: &[&str] = &[
    "react",
    "reflexion",
    "self-discover",
    "tree-of-thought",
    "graph-of-thought",
    "lats",
    "mixture-of-agents",
];

/// Root configuration, mapped to `mull.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MullConfig {
    pub executor: ExecutorConfig,
    pub planner: PlannerConfig,
    pub bus: BusConfig,
    pub logging: LoggingConfig,
}

// ── Executor ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum planner calls per invocation.
    pub max_iterations: usize,
    /// Wall-clock limit for one invocation. 0 = no timeout.
    pub timeout_secs: u64,
    /// Per tool call limit. 0 = none.
    pub tool_timeout_secs: u64,
    /// When true, a successful handoff's answer ends the run.
    pub finish_on_handoff: bool,
    /// Maximum nesting of agent-to-agent handoffs.
    pub max_handoff_depth: u32,
    /// System prompt prepended to every conversation.
    pub system_prompt: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            timeout_secs: 300,
            tool_timeout_secs: 0,
            finish_on_handoff: false,
            max_handoff_depth: 4,
            system_prompt: None,
        }
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        (self.tool_timeout_secs > 0).then(|| Duration::from_secs(self.tool_timeout_secs))
    }
}

// ── Planners ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Registered name of the planner to build.
    pub default: String,
    /// Concurrent model calls inside fan-out planners. 0 = branch factor.
    pub concurrency: usize,
    pub reflexion: ReflexionConfig,
    pub self_discover: SelfDiscoverConfig,
    pub tree_of_thought: TreeOfThoughtConfig,
    pub graph_of_thought: GraphOfThoughtConfig,
    pub lats: LatsConfig,
    pub mixture_of_agents: MixtureOfAgentsConfig,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            default: "react".into(),
            concurrency: 0,
            reflexion: ReflexionConfig::default(),
            self_discover: SelfDiscoverConfig::default(),
            tree_of_thought: TreeOfThoughtConfig::default(),
            graph_of_thought: GraphOfThoughtConfig::default(),
            lats: LatsConfig::default(),
            mixture_of_agents: MixtureOfAgentsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflexionConfig {
    /// Minimum evaluator score (0.0–1.0) to accept a candidate.
    pub threshold: f64,
    /// Actor attempts per planner call.
    pub max_attempts: usize,
    /// Critiques the planner keeps before it stops reflecting.
    pub max_reflections: usize,
}

impl Default for ReflexionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            max_attempts: 3,
            max_reflections: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfDiscoverConfig {
    /// Cap on modules kept from SELECT. 0 = no cap.
    pub max_modules: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    #[default]
    Bfs,
    Dfs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeOfThoughtConfig {
    pub branch_factor: usize,
    pub max_depth: usize,
    pub strategy: SearchStrategy,
    /// Nodes kept per layer. 0 = branch factor.
    pub beam_width: usize,
    /// Stop as soon as a node scores at least this. 0 = never.
    pub solution_score: f64,
}

impl Default for TreeOfThoughtConfig {
    fn default() -> Self {
        Self {
            branch_factor: 3,
            max_depth: 5,
            strategy: SearchStrategy::Bfs,
            beam_width: 0,
            solution_score: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphOfThoughtConfig {
    pub branch_factor: usize,
    pub max_depth: usize,
    /// Upper bound on graph operations per planner call.
    pub max_operations: usize,
    /// Traversals allowed per loop edge before it is pruned.
    pub loop_bound: u32,
    pub merge_enabled: bool,
    /// Branches whose best child scores below this are looped back.
    pub loop_threshold: f64,
    /// Leaves combined by the final aggregate.
    pub aggregate_top: usize,
}

impl Default for GraphOfThoughtConfig {
    fn default() -> Self {
        Self {
            branch_factor: 3,
            max_depth: 4,
            max_operations: 10,
            loop_bound: 2,
            merge_enabled: true,
            loop_threshold: 0.3,
            aggregate_top: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LatsConfig {
    /// Children generated per expansion.
    pub expansion_width: usize,
    pub max_depth: usize,
    /// Simulation budget per planner call.
    pub simulations: usize,
    pub exploration_constant: f64,
    /// Stop early once a simulation earns at least this reward.
    pub early_stop_reward: f64,
    /// Reflect on simulations rewarded below this.
    pub reflect_below: f64,
    /// Complete the trajectory before scoring instead of scoring the step.
    pub rollout: bool,
}

impl Default for LatsConfig {
    fn default() -> Self {
        Self {
            expansion_width: 3,
            max_depth: 5,
            simulations: 12,
            exploration_constant: std::f64::consts::SQRT_2,
            early_stop_reward: 0.9,
            reflect_below: 0.3,
            rollout: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MixtureOfAgentsConfig {
    /// Per member call limit. 0 = none.
    pub call_timeout_secs: u64,
}

impl Default for MixtureOfAgentsConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 60,
        }
    }
}

impl MixtureOfAgentsConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_secs > 0).then(|| Duration::from_secs(self.call_timeout_secs))
    }
}

// ── Bus ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Per-topic buffer; slower subscribers lose older messages.
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
    /// Log file path (None = stderr only).
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
            file: None,
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A config issue found during validation.
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "{} {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, " ({})", h)?;
        }
        Ok(())
    }
}

impl MullConfig {
    /// Validate the configuration. Returns warnings; fails if any are errors.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Executor ───
        if self.executor.max_iterations == 0 {
            warnings.push(ConfigWarning {
                field: "executor.max_iterations".into(),
                message: "max_iterations is 0, the planner would never run".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 10".into()),
            });
        }
        if self.executor.timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "executor.timeout_secs".into(),
                message: "no wall-clock timeout, only max_iterations bounds a run".into(),
                severity: WarningSeverity::Info,
                hint: None,
            });
        }

        // ── Planner name ───
        if !BUILTIN_PLANNERS.contains(&self.planner.default.as_str()) {
            warnings.push(ConfigWarning {
                field: "planner.default".into(),
                message: format!("'{}' is not a built-in planner", self.planner.default),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Built-in: {}", BUILTIN_PLANNERS.join(", "))),
            });
        }

        // ── Reflexion ───
        let threshold = self.planner.reflexion.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            warnings.push(ConfigWarning {
                field: "planner.reflexion.threshold".into(),
                message: format!("threshold {} is out of range", threshold),
                severity: WarningSeverity::Error,
                hint: Some("Scores are between 0.0 and 1.0".into()),
            });
        }
        if self.planner.reflexion.max_attempts == 0 {
            warnings.push(ConfigWarning {
                field: "planner.reflexion.max_attempts".into(),
                message: "max_attempts is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to at least 1".into()),
            });
        }

        // ── Search budgets ───
        let tot = &self.planner.tree_of_thought;
        if tot.branch_factor == 0 {
            warnings.push(ConfigWarning {
                field: "planner.tree_of_thought.branch_factor".into(),
                message: "branch_factor is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 3".into()),
            });
        } else if tot.branch_factor.saturating_pow(tot.max_depth as u32) > 10_000 {
            warnings.push(ConfigWarning {
                field: "planner.tree_of_thought".into(),
                message: format!(
                    "branch_factor {} with max_depth {} allows a very large tree",
                    tot.branch_factor, tot.max_depth
                ),
                severity: WarningSeverity::Warning,
                hint: Some("Each node costs two model calls".into()),
            });
        }
        if tot.beam_width > tot.branch_factor {
            warnings.push(ConfigWarning {
                field: "planner.tree_of_thought.beam_width".into(),
                message: "beam_width above branch_factor is clamped".into(),
                severity: WarningSeverity::Info,
                hint: None,
            });
        }

        let got = &self.planner.graph_of_thought;
        if got.branch_factor == 0 || got.max_operations == 0 {
            warnings.push(ConfigWarning {
                field: "planner.graph_of_thought".into(),
                message: "branch_factor and max_operations must be positive".into(),
                severity: WarningSeverity::Error,
                hint: None,
            });
        }
        if got.loop_bound == 0 {
            warnings.push(ConfigWarning {
                field: "planner.graph_of_thought.loop_bound".into(),
                message: "loop_bound is 0, loop edges are pruned on first use".into(),
                severity: WarningSeverity::Info,
                hint: None,
            });
        }

        let lats = &self.planner.lats;
        if lats.simulations == 0 || lats.expansion_width == 0 {
            warnings.push(ConfigWarning {
                field: "planner.lats".into(),
                message: "simulations and expansion_width must be positive".into(),
                severity: WarningSeverity::Error,
                hint: Some("Defaults: simulations = 12, expansion_width = 3".into()),
            });
        }
        if lats.exploration_constant < 0.0 {
            warnings.push(ConfigWarning {
                field: "planner.lats.exploration_constant".into(),
                message: "exploration constant is negative".into(),
                severity: WarningSeverity::Error,
                hint: Some("The usual value is sqrt(2)".into()),
            });
        }

        // ── Logging ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        // Check for hard errors
        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
