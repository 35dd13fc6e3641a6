// src/core/plugin/registry.rs

//! Plugin codes, the weight table that orders them, and the factory registry
//! that turns a configured code list into a live chain. External plugins
//! (IAM, Secrets Manager, federated auth) attach here by registering a
//! factory under their code.

use super::ConnectionPlugin;
use super::default_plugin::DefaultPlugin;
use super::initial_connection::InitialConnectionPlugin;
use super::read_write_splitting::ReadWriteSplittingPlugin;
use super::service::PluginService;
use super::stale_dns::StaleDnsPlugin;
use super::timing::{ConnectTimePlugin, ExecuteTimePlugin};
use crate::config::WrapperConfig;
use crate::core::bluegreen::plugin::BlueGreenPlugin;
use crate::core::errors::WrapperError;
use crate::core::failover::FailoverPlugin;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;
use tracing::debug;

/// Sentinel weight: the plugin inherits its predecessor's weight plus one, so
/// that decorator-style plugins hug whatever they were listed after.
pub const WEIGHT_STICK_TO_PRIOR: i32 = -1;

/// Weight assigned to codes the table does not know; they keep their relative
/// user order at the end of the chain.
const WEIGHT_UNKNOWN: i64 = i64::MAX;

/// Built-in weight table, lower = earlier in the chain.
const BUILTIN_WEIGHTS: &[(&str, i32)] = &[
    ("initialConnection", 100),
    ("staleDns", 200),
    ("bluegreen", 250),
    ("readWriteSplitting", 300),
    ("failover", 400),
    ("iam", 500),
    ("secretsManager", 510),
    ("federatedAuth", 520),
    ("okta", 530),
    ("connectTime", WEIGHT_STICK_TO_PRIOR),
    ("executeTime", WEIGHT_STICK_TO_PRIOR),
];

/// Factory signature for externally supplied plugins.
pub type PluginFactoryFn = Arc<
    dyn Fn(&Arc<PluginService>, &WrapperConfig) -> Result<Arc<dyn ConnectionPlugin>, WrapperError>
        + Send
        + Sync,
>;

struct ExternalFactory {
    weight: i32,
    factory: PluginFactoryFn,
}

static EXTERNAL_FACTORIES: Lazy<DashMap<String, ExternalFactory>> = Lazy::new(DashMap::new);

/// Registers (or replaces) an external plugin factory under a code. The
/// weight places the plugin in auto-sorted chains; `WEIGHT_STICK_TO_PRIOR`
/// glues it to its predecessor.
pub fn register_plugin_factory(code: impl Into<String>, weight: i32, factory: PluginFactoryFn) {
    EXTERNAL_FACTORIES.insert(code.into(), ExternalFactory { weight, factory });
}

pub fn unregister_plugin_factory(code: &str) {
    EXTERNAL_FACTORIES.remove(code);
}

fn weight_of(code: &str) -> Option<i32> {
    BUILTIN_WEIGHTS
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, weight)| *weight)
        .or_else(|| EXTERNAL_FACTORIES.get(code).map(|entry| entry.weight))
}

/// Resolves the effective weight of every code, then stable-sorts when the
/// user did not opt out. A `STICK_TO_PRIOR` code inherits `prior + 1`,
/// chaining across consecutive stickers.
pub fn sort_plugin_codes(codes: &[String], auto_sort: bool) -> Vec<String> {
    let mut weighted: Vec<(String, i64)> = Vec::with_capacity(codes.len());
    let mut prior: i64 = 0;
    for code in codes {
        let effective = match weight_of(code) {
            Some(WEIGHT_STICK_TO_PRIOR) => prior + 1,
            Some(weight) => i64::from(weight),
            None => WEIGHT_UNKNOWN,
        };
        prior = effective;
        weighted.push((code.clone(), effective));
    }
    if auto_sort {
        weighted.sort_by_key(|(_, weight)| *weight);
    }
    weighted.into_iter().map(|(code, _)| code).collect()
}

fn create_plugin(
    code: &str,
    service: &Arc<PluginService>,
    config: &WrapperConfig,
) -> Result<Arc<dyn ConnectionPlugin>, WrapperError> {
    match code {
        "initialConnection" => Ok(Arc::new(InitialConnectionPlugin::new(service.clone()))),
        "staleDns" => Ok(Arc::new(StaleDnsPlugin::new(service.clone()))),
        "readWriteSplitting" => Ok(Arc::new(ReadWriteSplittingPlugin::new(
            service.clone(),
            config,
        )?)),
        "failover" => Ok(Arc::new(FailoverPlugin::new(service.clone(), config)?)),
        "bluegreen" => Ok(Arc::new(BlueGreenPlugin::new(service.clone(), config))),
        "connectTime" => Ok(Arc::new(ConnectTimePlugin::new())),
        "executeTime" => Ok(Arc::new(ExecuteTimePlugin::new())),
        other => match EXTERNAL_FACTORIES.get(other) {
            Some(entry) => (entry.factory)(service, config),
            None => Err(WrapperError::IllegalArgument(format!(
                "Unknown plugin code '{other}'. Built-in codes: {}; external codes register via register_plugin_factory.",
                BUILTIN_WEIGHTS
                    .iter()
                    .map(|(code, _)| *code)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        },
    }
}

/// Builds the full ordered chain for a configuration, terminal default plugin
/// included.
pub fn create_plugin_chain(
    service: &Arc<PluginService>,
    config: &WrapperConfig,
) -> Result<Vec<Arc<dyn ConnectionPlugin>>, WrapperError> {
    let ordered = sort_plugin_codes(&config.plugins, config.auto_sort_plugin_order);
    debug!("Plugin chain order: {:?}", ordered);

    let mut chain: Vec<Arc<dyn ConnectionPlugin>> = Vec::with_capacity(ordered.len() + 1);
    for code in &ordered {
        chain.push(create_plugin(code, service, config)?);
    }
    chain.push(Arc::new(DefaultPlugin::new(service.connection_provider())));
    Ok(chain)
}
