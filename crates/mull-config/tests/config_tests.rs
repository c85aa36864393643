#[cfg(test)]
mod tests {
    use mull_config::ConfigLoader;
    use mull_config::schema::*;
    use std::io::Write;
    use std::time::Duration;

    // ── Default tests ──────────────────────────────────────────

    #[test]
    fn test_executor_config_defaults() {
        let config = ExecutorConfig::default();
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.timeout(), Some(Duration::from_secs(300)));
        assert_eq!(config.tool_timeout(), None);
        assert!(!config.finish_on_handoff);
        assert_eq!(config.max_handoff_depth, 4);
    }

    #[test]
    fn test_planner_config_defaults() {
        let config = PlannerConfig::default();
        assert_eq!(config.default, "react");
        assert_eq!(config.reflexion.threshold, 0.7);
        assert_eq!(config.reflexion.max_attempts, 3);
        assert_eq!(config.tree_of_thought.branch_factor, 3);
        assert_eq!(config.tree_of_thought.strategy, SearchStrategy::Bfs);
        assert_eq!(config.graph_of_thought.loop_bound, 2);
        assert!(config.graph_of_thought.merge_enabled);
        assert!((config.lats.exploration_constant - 2f64.sqrt()).abs() < 1e-12);
        assert_eq!(config.lats.early_stop_reward, 0.9);
        assert_eq!(
            config.mixture_of_agents.call_timeout(),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, "pretty");
    }

    #[test]
    fn test_default_config_validates_cleanly() {
        let warnings = MullConfig::default().validate().unwrap();
        assert!(
            warnings
                .iter()
                .all(|w| w.severity != WarningSeverity::Error)
        );
    }

    // ── TOML tests ─────────────────────────────────────────────

    #[test]
    fn test_config_toml_roundtrip() {
        let config = MullConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let restored: MullConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(restored.planner.default, config.planner.default);
        assert_eq!(restored.executor.max_iterations, 10);
    }

    #[test]
    fn test_partial_toml_applies_defaults() {
        let config = ConfigLoader::parse(
            r#"
[planner]
default = "tree-of-thought"

[planner.tree_of_thought]
strategy = "dfs"
max_depth = 2
"#,
        )
        .unwrap();
        assert_eq!(config.planner.default, "tree-of-thought");
        assert_eq!(config.planner.tree_of_thought.strategy, SearchStrategy::Dfs);
        assert_eq!(config.planner.tree_of_thought.max_depth, 2);
        assert_eq!(config.planner.tree_of_thought.branch_factor, 3);
        assert_eq!(config.executor.max_iterations, 10);
        assert_eq!(config.bus.capacity, 1024);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = ConfigLoader::parse("[executor\nmax_iterations = ").unwrap_err();
        assert!(matches!(err, mull_core::MullError::Config(_)));
    }

    // ── Validation tests ───────────────────────────────────────

    #[test]
    fn test_zero_iterations_is_error() {
        let mut config = MullConfig::default();
        config.executor.max_iterations = 0;
        let err = config.validate().unwrap_err();
        assert!(err.contains("executor.max_iterations"));
    }

    #[test]
    fn test_threshold_out_of_range_is_error() {
        let mut config = MullConfig::default();
        config.planner.reflexion.threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_planner_is_warning() {
        let mut config = MullConfig::default();
        config.planner.default = "custom".into();
        let warnings = config.validate().unwrap();
        assert!(warnings.iter().any(|w| w.field == "planner.default"));
    }

    #[test]
    fn test_large_tree_warns() {
        let mut config = MullConfig::default();
        config.planner.tree_of_thought.branch_factor = 10;
        config.planner.tree_of_thought.max_depth = 6;
        let warnings = config.validate().unwrap();
        assert!(
            warnings
                .iter()
                .any(|w| w.field == "planner.tree_of_thought"
                    && w.severity == WarningSeverity::Warning)
        );
    }

    // ── Env override tests ─────────────────────────────────────

    #[test]
    fn test_env_overrides() {
        let env = |key: &str| match key {
            "MULL_PLANNER" => Some("lats".to_string()),
            "MULL_MAX_ITERATIONS" => Some("25".to_string()),
            "MULL_TIMEOUT_SECS" => Some("not-a-number".to_string()),
            "MULL_LOG_FORMAT" => Some("json".to_string()),
            _ => None,
        };
        let config = ConfigLoader::apply_env_overrides(MullConfig::default(), env);
        assert_eq!(config.planner.default, "lats");
        assert_eq!(config.executor.max_iterations, 25);
        // Unparseable numbers leave the value alone
        assert_eq!(config.executor.timeout_secs, 300);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    // ── ConfigLoader tests ─────────────────────────────────────

    #[test]
    fn test_config_loader_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("mull.toml");
        let mut f = std::fs::File::create(&config_path).unwrap();
        writeln!(
            f,
            r#"
[executor]
max_iterations = 4
finish_on_handoff = true

[planner.reflexion]
threshold = 0.8

[bus]
capacity = 64
"#
        )
        .unwrap();

        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();
        let config = loader.get();
        assert_eq!(loader.path(), config_path.as_path());
        assert!(config.executor.finish_on_handoff);
        assert_eq!(config.planner.reflexion.threshold, 0.8);
        assert_eq!(config.bus.capacity, 64);
    }

    #[test]
    fn test_config_loader_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::load(Some(dir.path().join("absent.toml").as_path())).unwrap();
        assert_eq!(loader.get().bus.capacity, 1024);
        assert!(loader.reload().is_err());
    }

    #[test]
    fn test_config_loader_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("mull.toml");
        std::fs::write(&config_path, "[planner.lats]\nsimulations = 0\n").unwrap();
        let err = ConfigLoader::load(Some(config_path.as_path())).err().unwrap();
        assert!(err.to_string().contains("planner.lats"));
    }

    #[test]
    fn test_config_loader_reload() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("mull.toml");

        std::fs::write(&config_path, "[planner]\ndefault = \"reflexion\"\n").unwrap();
        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();
        let shared = loader.shared();
        assert_eq!(loader.get().planner.default, "reflexion");

        std::fs::write(&config_path, "[planner]\ndefault = \"lats\"\n").unwrap();
        loader.reload().unwrap();
        assert_eq!(shared.read().planner.default, "lats");
    }

    // ── JSON roundtrip ─────────────────────────────────────────

    #[test]
    fn test_config_json_roundtrip() {
        let config = MullConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let restored: MullConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.planner.lats.simulations, 12);
    }
}
