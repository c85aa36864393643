//! # mull-config
//!
//! Configuration for the Mull executor and planners. Reads from `mull.toml`
//! and environment variables, in that precedence order.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::MullConfig;
pub use schema::{
    BUILTIN_PLANNERS, BusConfig, ConfigWarning, ExecutorConfig, GraphOfThoughtConfig, LatsConfig,
    LoggingConfig, MixtureOfAgentsConfig, PlannerConfig, ReflexionConfig, SearchStrategy,
    SelfDiscoverConfig, TreeOfThoughtConfig, WarningSeverity,
};
