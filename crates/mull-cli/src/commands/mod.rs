use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use mull_config::{ConfigLoader, LoggingConfig, MullConfig, WarningSeverity};
use mull_core::{MullError, Result};
use mull_planner::PlannerRegistry;

mod run;

pub use run::RunArgs;

/// Mull: pluggable reasoning strategies for LLM agents
#[derive(Parser)]
#[command(name = "mull", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to mull.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the registered planners
    Planners,
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration and report problems
    Check,
    /// Run one input through an agent backed by a scripted model
    Run(RunArgs),
    /// Show version and build info
    Version,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // --verbose > --quiet > --log-level > config; RUST_LOG beats all of them
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level.as_deref().unwrap_or(config.logging.level.as_str())
        };
        init_tracing(&config.logging, log_level)?;

        match self.command {
            Commands::Planners => Self::cmd_planners(&config),
            Commands::Config { json } => Self::cmd_config(&config, json),
            Commands::Check => Self::cmd_check(&config),
            Commands::Run(args) => run::cmd_run(config, args).await,
            Commands::Version => Self::cmd_version(),
        }
    }

    fn cmd_planners(config: &MullConfig) -> Result<()> {
        for name in PlannerRegistry::with_builtins().list() {
            let marker = if name == config.planner.default { "*" } else { " " };
            println!("{marker} {name}");
        }
        Ok(())
    }

    fn cmd_config(config: &MullConfig, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(config).map_err(|e| MullError::Config(e.to_string()))?
            );
        }
        Ok(())
    }

    fn cmd_check(config: &MullConfig) -> Result<()> {
        let warnings = config.validate().map_err(MullError::Config)?;
        if warnings.is_empty() {
            println!("configuration ok");
            return Ok(());
        }
        for w in &warnings {
            println!("  {w}");
        }
        let count = |s: WarningSeverity| warnings.iter().filter(|w| w.severity == s).count();
        println!(
            "{} warning(s), {} note(s)",
            count(WarningSeverity::Warning),
            count(WarningSeverity::Info)
        );
        Ok(())
    }

    fn cmd_version() -> Result<()> {
        println!("mull v{}", env!("CARGO_PKG_VERSION"));
        println!("   Target: {}", std::env::consts::ARCH);
        println!("   OS: {}", std::env::consts::OS);
        #[cfg(debug_assertions)]
        println!("   Profile: debug");
        #[cfg(not(debug_assertions))]
        println!("   Profile: release");
        Ok(())
    }
}

/// Logs go to stderr (or `logging.file`); stdout carries command output.
fn init_tracing(logging: &LoggingConfig, level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    match logging.format.as_str() {
        "json" => builder.json().with_target(true).init(),
        "compact" => builder.compact().with_target(false).init(),
        _ => builder.with_target(false).init(),
    }
    Ok(())
}
