use av_domain::config::AppConfig;

#[test]
fn default_confidence_threshold() {
    let config = AppConfig::default();
    assert_eq!(config.router.confidence_threshold, 0.7);
    assert_eq!(config.router.short_confirmation_max_chars, 10);
    assert_eq!(config.router.sticky_window_secs, 300);
}

#[test]
fn default_runner_settings() {
    let config = AppConfig::default();
    assert_eq!(config.runner.binary, "claude");
    assert_eq!(config.runner.spawn_timeout_secs, 10);
    assert_eq!(config.runner.terminate_grace_secs, 5);
    assert_eq!(config.runner.evolution_env_gate, "AVIARY_EVOLUTION_ENABLED");
}

#[test]
fn default_memory_settings() {
    let config = AppConfig::default();
    assert_eq!(config.memory.concurrency, 5);
    assert_eq!(config.memory.task_timeout_secs, 30);
    assert_eq!(config.memory.fallback_max_chars, 500);
}

#[test]
fn partial_toml_overrides_only_named_fields() {
    let toml_str = r#"
[router]
confidence_threshold = 0.6

[runner]
binary = "claude-code"
"#;
    let config: AppConfig = toml::from_str(toml_str).unwrap();
    assert_eq!(config.router.confidence_threshold, 0.6);
    assert_eq!(config.runner.binary, "claude-code");
    // Untouched sections keep defaults.
    assert_eq!(config.router.short_confirmation_max_chars, 10);
    assert_eq!(config.stats.queue_capacity, 256);
}

#[test]
fn user_workdir_is_per_user() {
    let config = AppConfig::default();
    let dir = config.runner.user_workdir(42);
    assert!(dir.to_string_lossy().ends_with("user_42"));
}
