use shepherd::config::{ConfigProps, ConfigurationProfile, WrapperConfig};
use shepherd::core::errors::WrapperError;
use shepherd::core::failover::FailoverMode;
use std::collections::HashMap;

fn base_props() -> ConfigProps {
    let mut props = HashMap::new();
    props.insert("host".to_string(), "db.example.com".to_string());
    props
}

#[tokio::test]
async fn test_defaults() {
    let config = WrapperConfig::from_props(&base_props()).unwrap();
    assert_eq!(config.plugins, vec!["failover".to_string()]);
    assert!(config.auto_sort_plugin_order);
    assert_eq!(config.failover_timeout_ms, 60_000);
    assert_eq!(config.failover_mode, FailoverMode::Unknown);
    assert_eq!(config.failover_reader_host_selector_strategy, "random");
    assert_eq!(config.host_availability_strategy_max_retries, 5);
    assert!(config.enable_cluster_aware_failover);
    assert!(config.transfer_session_state_on_switch);
    assert!(config.reset_session_state_on_close);
}

#[tokio::test]
async fn test_missing_host_is_rejected() {
    let err = WrapperConfig::from_props(&HashMap::new()).unwrap_err();
    assert!(matches!(err, WrapperError::IllegalArgument(_)));
}

#[tokio::test]
async fn test_plugin_list_parsing() {
    let mut props = base_props();
    props.insert(
        "plugins".to_string(),
        "initialConnection, failover ,staleDns".to_string(),
    );
    let config = WrapperConfig::from_props(&props).unwrap();
    assert_eq!(
        config.plugins,
        vec!["initialConnection", "failover", "staleDns"]
    );
}

#[tokio::test]
async fn test_invalid_numeric_value_is_rejected() {
    let mut props = base_props();
    props.insert("failoverTimeoutMs".to_string(), "soon".to_string());
    let err = WrapperConfig::from_props(&props).unwrap_err();
    assert!(matches!(err, WrapperError::IllegalArgument(_)));
}

#[tokio::test]
async fn test_unknown_failover_mode_is_rejected() {
    let mut props = base_props();
    props.insert("failoverMode".to_string(), "fastest".to_string());
    assert!(WrapperConfig::from_props(&props).is_err());
}

#[tokio::test]
async fn test_failover_mode_parsing() {
    let mut props = base_props();
    props.insert("failoverMode".to_string(), "strict-reader".to_string());
    let config = WrapperConfig::from_props(&props).unwrap();
    assert_eq!(config.failover_mode, FailoverMode::StrictReader);
}

#[tokio::test]
async fn test_zero_backoff_parameters_are_rejected() {
    let mut props = base_props();
    props.insert(
        "hostAvailabilityStrategyMaxRetries".to_string(),
        "0".to_string(),
    );
    assert!(WrapperConfig::from_props(&props).is_err());
}

#[tokio::test]
async fn test_profile_fills_plugins_under_user_properties() {
    ConfigurationProfile::new("testReadHeavy")
        .with_plugins(vec![
            "initialConnection".to_string(),
            "readWriteSplitting".to_string(),
            "failover".to_string(),
        ])
        .with_property("failoverTimeoutMs", "15000")
        .register();

    let mut props = base_props();
    props.insert("profileName".to_string(), "testReadHeavy".to_string());
    let config = WrapperConfig::from_props(&props).unwrap();
    assert_eq!(
        config.plugins,
        vec!["initialConnection", "readWriteSplitting", "failover"]
    );
    assert_eq!(config.failover_timeout_ms, 15_000);

    // Explicit user properties win over the profile.
    props.insert("failoverTimeoutMs".to_string(), "20000".to_string());
    let config = WrapperConfig::from_props(&props).unwrap();
    assert_eq!(config.failover_timeout_ms, 20_000);

    ConfigurationProfile::remove("testReadHeavy");
}

#[tokio::test]
async fn test_unknown_profile_is_rejected() {
    let mut props = base_props();
    props.insert("profileName".to_string(), "nope".to_string());
    assert!(WrapperConfig::from_props(&props).is_err());
}
