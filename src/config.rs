// src/config.rs

//! Wrapper configuration: the free-form string property map of the public API
//! is parsed once into a typed [`WrapperConfig`]; everything downstream works
//! on the typed object. Named configuration profiles can pre-fill plugin
//! chains and option bundles before user properties are applied.

use crate::core::errors::WrapperError;
use crate::core::failover::FailoverMode;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::warn;

/// The free-form property map accepted at the public boundary.
pub type ConfigProps = HashMap<String, String>;

/// Default plugin chain when `plugins` is not specified.
fn default_plugins() -> Vec<String> {
    vec!["failover".to_string()]
}
fn default_failover_timeout_ms() -> u64 {
    60_000
}
fn default_reader_selector() -> String {
    "random".to_string()
}
fn default_availability_max_retries() -> u32 {
    5
}
fn default_availability_initial_backoff_sec() -> u64 {
    30
}
fn default_bg_interval_baseline_ms() -> u64 {
    60_000
}
fn default_bg_interval_increased_ms() -> u64 {
    1_000
}
fn default_bg_interval_high_ms() -> u64 {
    100
}
fn default_bg_switchover_timeout_ms() -> u64 {
    180_000
}
fn default_bg_connect_timeout_ms() -> u64 {
    30_000
}
fn default_wrapper_connect_timeout_ms() -> u64 {
    10_000
}
fn default_wrapper_query_timeout_ms() -> u64 {
    0 // disabled
}
fn default_topology_refresh_ms() -> u64 {
    5_000
}

/// The typed configuration value-object. One instance travels with every
/// connect attempt; plugins may clone and override per-attempt fields (host,
/// IAM signing parameters) without touching the caller's copy.
#[derive(Debug, Clone)]
pub struct WrapperConfig {
    pub host: String,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,

    pub plugins: Vec<String>,
    pub auto_sort_plugin_order: bool,
    pub profile_name: Option<String>,

    pub cluster_instance_host_pattern: Option<String>,
    pub cluster_id: Option<String>,
    pub cluster_topology_refresh_rate_ms: u64,
    /// User-named dialect code, overriding URL-shape classification.
    pub dialect: Option<String>,

    pub iam_host: Option<String>,
    pub iam_default_port: Option<u16>,
    pub iam_region: Option<String>,

    pub enable_cluster_aware_failover: bool,
    pub failover_mode: FailoverMode,
    pub failover_timeout_ms: u64,
    pub failover_reader_host_selector_strategy: String,

    pub rollback_on_switch: bool,
    pub transfer_session_state_on_switch: bool,
    pub reset_session_state_on_close: bool,

    pub host_availability_strategy_max_retries: u32,
    pub host_availability_strategy_initial_backoff_time_sec: u64,

    pub bg_interval_baseline_ms: u64,
    pub bg_interval_increased_ms: u64,
    pub bg_interval_high_ms: u64,
    pub bg_switchover_timeout_ms: u64,
    pub bg_connect_timeout_ms: u64,
    pub bg_suspend_new_blue_connections_when_in_progress: bool,

    pub wrapper_connect_timeout_ms: u64,
    pub wrapper_query_timeout_ms: u64,

    pub enable_green_host_replacement: bool,
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: None,
            user: None,
            password: None,
            database: None,
            plugins: default_plugins(),
            auto_sort_plugin_order: true,
            profile_name: None,
            cluster_instance_host_pattern: None,
            cluster_id: None,
            cluster_topology_refresh_rate_ms: default_topology_refresh_ms(),
            dialect: None,
            iam_host: None,
            iam_default_port: None,
            iam_region: None,
            enable_cluster_aware_failover: true,
            failover_mode: FailoverMode::Unknown,
            failover_timeout_ms: default_failover_timeout_ms(),
            failover_reader_host_selector_strategy: default_reader_selector(),
            rollback_on_switch: true,
            transfer_session_state_on_switch: true,
            reset_session_state_on_close: true,
            host_availability_strategy_max_retries: default_availability_max_retries(),
            host_availability_strategy_initial_backoff_time_sec:
                default_availability_initial_backoff_sec(),
            bg_interval_baseline_ms: default_bg_interval_baseline_ms(),
            bg_interval_increased_ms: default_bg_interval_increased_ms(),
            bg_interval_high_ms: default_bg_interval_high_ms(),
            bg_switchover_timeout_ms: default_bg_switchover_timeout_ms(),
            bg_connect_timeout_ms: default_bg_connect_timeout_ms(),
            bg_suspend_new_blue_connections_when_in_progress: false,
            wrapper_connect_timeout_ms: default_wrapper_connect_timeout_ms(),
            wrapper_query_timeout_ms: default_wrapper_query_timeout_ms(),
            enable_green_host_replacement: false,
        }
    }
}

impl WrapperConfig {
    /// Parses the public property map. A `profile` property is resolved first
    /// so explicit user properties win over profile-supplied ones.
    pub fn from_props(props: &ConfigProps) -> Result<Self, WrapperError> {
        let mut merged: ConfigProps = ConfigProps::new();
        if let Some(profile_name) = props.get("profileName") {
            let profile = ConfigurationProfile::find(profile_name).ok_or_else(|| {
                WrapperError::IllegalArgument(format!(
                    "Unknown configuration profile '{profile_name}'"
                ))
            })?;
            merged.extend(profile.properties.clone());
            if !profile.plugins.is_empty() {
                merged.insert("plugins".to_string(), profile.plugins.join(","));
            }
        }
        merged.extend(props.clone());

        let mut config = WrapperConfig {
            host: merged.get("host").cloned().unwrap_or_default(),
            port: parse_opt(&merged, "port")?,
            user: merged.get("user").cloned(),
            password: merged.get("password").cloned(),
            database: merged.get("database").cloned(),
            profile_name: merged.get("profileName").cloned(),
            cluster_instance_host_pattern: merged.get("clusterInstanceHostPattern").cloned(),
            cluster_id: merged.get("clusterId").cloned(),
            dialect: merged.get("dialect").cloned(),
            iam_host: merged.get("iamHost").cloned(),
            iam_region: merged.get("iamRegion").cloned(),
            ..WrapperConfig::default()
        };

        if let Some(list) = merged.get("plugins") {
            config.plugins = list
                .split(',')
                .map(|code| code.trim().to_string())
                .filter(|code| !code.is_empty())
                .collect();
        }
        if let Some(v) = parse_opt::<bool>(&merged, "autoSortPluginOrder")? {
            config.auto_sort_plugin_order = v;
        }
        if let Some(v) = parse_opt::<u16>(&merged, "iamDefaultPort")? {
            config.iam_default_port = Some(v);
        }
        if let Some(v) = parse_opt::<bool>(&merged, "enableClusterAwareFailover")? {
            config.enable_cluster_aware_failover = v;
        }
        if let Some(mode) = merged.get("failoverMode") {
            config.failover_mode = FailoverMode::from_str(mode).map_err(|_| {
                WrapperError::IllegalArgument(format!("Unknown failoverMode '{mode}'"))
            })?;
        }
        if let Some(v) = parse_opt::<u64>(&merged, "failoverTimeoutMs")? {
            config.failover_timeout_ms = v;
        }
        if let Some(v) = merged.get("failoverReaderHostSelectorStrategy") {
            config.failover_reader_host_selector_strategy = v.clone();
        }
        if let Some(v) = parse_opt::<bool>(&merged, "rollbackOnSwitch")? {
            config.rollback_on_switch = v;
        }
        if let Some(v) = parse_opt::<bool>(&merged, "transferSessionStateOnSwitch")? {
            config.transfer_session_state_on_switch = v;
        }
        if let Some(v) = parse_opt::<bool>(&merged, "resetSessionStateOnClose")? {
            config.reset_session_state_on_close = v;
        }
        if let Some(v) = parse_opt::<u32>(&merged, "hostAvailabilityStrategyMaxRetries")? {
            config.host_availability_strategy_max_retries = v;
        }
        if let Some(v) = parse_opt::<u64>(&merged, "hostAvailabilityStrategyInitialBackoffTimeSec")?
        {
            config.host_availability_strategy_initial_backoff_time_sec = v;
        }
        if let Some(v) = parse_opt::<u64>(&merged, "clusterTopologyRefreshRateMs")? {
            config.cluster_topology_refresh_rate_ms = v;
        }
        if let Some(v) = parse_opt::<u64>(&merged, "bgIntervalBaselineMs")? {
            config.bg_interval_baseline_ms = v;
        }
        if let Some(v) = parse_opt::<u64>(&merged, "bgIntervalIncreasedMs")? {
            config.bg_interval_increased_ms = v;
        }
        if let Some(v) = parse_opt::<u64>(&merged, "bgIntervalHighMs")? {
            config.bg_interval_high_ms = v;
        }
        if let Some(v) = parse_opt::<u64>(&merged, "bgSwitchoverTimeoutMs")? {
            config.bg_switchover_timeout_ms = v;
        }
        if let Some(v) = parse_opt::<u64>(&merged, "bgConnectTimeoutMs")? {
            config.bg_connect_timeout_ms = v;
        }
        if let Some(v) = parse_opt::<bool>(&merged, "bgSuspendNewBlueConnectionsWhenInProgress")? {
            config.bg_suspend_new_blue_connections_when_in_progress = v;
        }
        if let Some(v) = parse_opt::<u64>(&merged, "wrapperConnectTimeoutMs")? {
            config.wrapper_connect_timeout_ms = v;
        }
        if let Some(v) = parse_opt::<u64>(&merged, "wrapperQueryTimeoutMs")? {
            config.wrapper_query_timeout_ms = v;
        }
        if let Some(v) = parse_opt::<bool>(&merged, "enableGreenHostReplacement")? {
            config.enable_green_host_replacement = v;
        }

        for key in merged.keys() {
            if !RECOGNIZED_KEYS.contains(&key.as_str()) {
                warn!("Ignoring unrecognized property '{}'", key);
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), WrapperError> {
        if self.host.is_empty() {
            return Err(WrapperError::IllegalArgument(
                "A 'host' property is required".into(),
            ));
        }
        if self.host_availability_strategy_max_retries < 1 {
            return Err(WrapperError::IllegalArgument(
                "hostAvailabilityStrategyMaxRetries must be at least 1".into(),
            ));
        }
        if self.host_availability_strategy_initial_backoff_time_sec < 1 {
            return Err(WrapperError::IllegalArgument(
                "hostAvailabilityStrategyInitialBackoffTimeSec must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Every property key the adapter understands.
const RECOGNIZED_KEYS: &[&str] = &[
    "host",
    "port",
    "user",
    "password",
    "database",
    "plugins",
    "autoSortPluginOrder",
    "profileName",
    "clusterInstanceHostPattern",
    "clusterId",
    "clusterTopologyRefreshRateMs",
    "dialect",
    "iamHost",
    "iamDefaultPort",
    "iamRegion",
    "enableClusterAwareFailover",
    "failoverMode",
    "failoverTimeoutMs",
    "failoverReaderHostSelectorStrategy",
    "rollbackOnSwitch",
    "transferSessionStateOnSwitch",
    "resetSessionStateOnClose",
    "hostAvailabilityStrategyMaxRetries",
    "hostAvailabilityStrategyInitialBackoffTimeSec",
    "bgIntervalBaselineMs",
    "bgIntervalIncreasedMs",
    "bgIntervalHighMs",
    "bgSwitchoverTimeoutMs",
    "bgConnectTimeoutMs",
    "bgSuspendNewBlueConnectionsWhenInProgress",
    "wrapperConnectTimeoutMs",
    "wrapperQueryTimeoutMs",
    "enableGreenHostReplacement",
];

fn parse_opt<T: FromStr>(props: &ConfigProps, key: &str) -> Result<Option<T>, WrapperError> {
    match props.get(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            WrapperError::IllegalArgument(format!("Invalid value '{raw}' for property '{key}'"))
        }),
    }
}

/// A named bundle of plugin codes and property overrides. Profiles are applied
/// below explicit user properties.
#[derive(Debug, Clone, Default)]
pub struct ConfigurationProfile {
    pub name: String,
    pub plugins: Vec<String>,
    pub properties: ConfigProps,
}

static PROFILES: Lazy<DashMap<String, ConfigurationProfile>> = Lazy::new(DashMap::new);

impl ConfigurationProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_plugins(mut self, plugins: Vec<String>) -> Self {
        self.plugins = plugins;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Registers the profile process-wide. Re-registering a name replaces it.
    pub fn register(self) {
        PROFILES.insert(self.name.clone(), self);
    }

    pub fn find(name: &str) -> Option<ConfigurationProfile> {
        PROFILES.get(name).map(|entry| entry.clone())
    }

    pub fn remove(name: &str) {
        PROFILES.remove(name);
    }
}
