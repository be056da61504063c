use taskdag::SchedulerConfig;

#[test]
fn defaults_match_the_documented_values() {
    let config = SchedulerConfig::default();

    assert_eq!(config.max_pool_size, 20);
    assert_eq!(config.core_pool_size, 1);
    assert_eq!(config.keep_alive_secs, 120);
    assert_eq!(config.max_retries, 5);
    assert!(!config.debug_graph);

    assert!(config.validate().is_ok());
}

#[test]
fn a_zero_sized_pool_is_rejected() {
    let config = SchedulerConfig {
        max_pool_size: 0,
        ..SchedulerConfig::default()
    };

    assert!(matches!(
        config.validate(),
        Err(taskdag::Error::Config(_))
    ));
}

#[test]
fn a_core_size_above_the_cap_is_rejected() {
    let config = SchedulerConfig {
        core_pool_size: 8,
        max_pool_size: 4,
        ..SchedulerConfig::default()
    };

    assert!(config.validate().is_err());
}
