// src/core/plugin/manager.rs

//! Composes the ordered plugin chain and exposes the uniform pipeline entry
//! points. For a call to method `m`, the subscribers of `m` are threaded into
//! a nested composition `p1(p2(...pn(target)...))` with the default plugin as
//! the permanent tail.

use super::{
    ALL_METHODS, ConnectKind, ConnectionPlugin, ExecuteContext, HostChange, HostChangeMap,
    METHOD_INIT_HOST_PROVIDER, NextConnect, NextExecute, NextInitHostProvider,
    OldConnectionSuggestion, TargetOperation,
};
use crate::config::WrapperConfig;
use crate::core::driver::ClientWrapper;
use crate::core::errors::WrapperError;
use crate::core::host::{HostInfo, HostRole};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

type Chain = Arc<Vec<Arc<dyn ConnectionPlugin>>>;

/// Owns the ordered plugin list and dispatches pipeline calls and
/// notifications. The subscriber selection per method name is cached.
pub struct PluginManager {
    plugins: Vec<Arc<dyn ConnectionPlugin>>,
    chain_cache: DashMap<String, Chain>,
}

impl PluginManager {
    /// `plugins` must already be ordered, with the terminal default plugin in
    /// the last position.
    pub fn new(plugins: Vec<Arc<dyn ConnectionPlugin>>) -> Self {
        Self {
            plugins,
            chain_cache: DashMap::new(),
        }
    }

    pub fn plugin_names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|plugin| plugin.name()).collect()
    }

    /// The subscribers of a method, in chain order.
    fn chain_for(&self, method_name: &str) -> Chain {
        if let Some(chain) = self.chain_cache.get(method_name) {
            return chain.clone();
        }
        let chain: Chain = Arc::new(
            self.plugins
                .iter()
                .filter(|plugin| plugin.is_subscribed(method_name))
                .cloned()
                .collect(),
        );
        self.chain_cache
            .insert(method_name.to_string(), chain.clone());
        chain
    }

    pub async fn connect(
        &self,
        kind: ConnectKind,
        host: HostInfo,
        config: WrapperConfig,
        is_initial: bool,
    ) -> Result<Arc<ClientWrapper>, WrapperError> {
        let chain = self.chain_for(kind.method_name());
        NextConnect {
            chain: chain.as_slice(),
            kind,
            is_initial,
        }
        .call(host, config)
        .await
    }

    pub async fn execute(
        &self,
        ctx: &ExecuteContext,
        target: TargetOperation,
    ) -> Result<Value, WrapperError> {
        let chain = self.chain_for(&ctx.method_name);
        NextExecute {
            chain: chain.as_slice(),
            ctx,
            target: &target,
        }
        .call()
        .await
    }

    pub async fn init_host_provider(
        &self,
        host: HostInfo,
        config: WrapperConfig,
    ) -> Result<(), WrapperError> {
        let chain = self.chain_for(METHOD_INIT_HOST_PROVIDER);
        NextInitHostProvider { chain: chain.as_slice() }
            .call(host, config)
            .await
    }

    /// Fans a connection change out to every subscribed plugin, aggregating
    /// their opinions about the previous client.
    pub async fn notify_connection_changed(
        &self,
        changes: &HashSet<HostChange>,
        skip_plugin: Option<&str>,
    ) -> HashSet<OldConnectionSuggestion> {
        let mut suggestions = HashSet::new();
        for plugin in &self.plugins {
            if Some(plugin.name()) == skip_plugin {
                continue;
            }
            if plugin.is_subscribed(super::METHOD_NOTIFY_CONNECTION_CHANGED) {
                suggestions.insert(plugin.notify_connection_changed(changes).await);
            }
        }
        suggestions
    }

    pub async fn notify_host_list_changed(&self, changes: &HostChangeMap) {
        if changes.is_empty() {
            return;
        }
        for plugin in &self.plugins {
            if plugin.is_subscribed(super::METHOD_NOTIFY_HOST_LIST_CHANGED) {
                plugin.notify_host_list_changed(changes).await;
            }
        }
    }

    /// True when any plugin implements the named selection strategy for the
    /// role.
    pub fn accepts_strategy(&self, role: HostRole, strategy: &str) -> bool {
        self.plugins
            .iter()
            .any(|plugin| plugin.accepts_strategy(role, strategy))
    }

    /// Consults plugins in chain order; the first one that produces a host
    /// wins. A plugin error counts as "does not handle".
    pub async fn host_info_by_strategy(
        &self,
        role: HostRole,
        strategy: &str,
        hosts: Option<&[HostInfo]>,
    ) -> Result<HostInfo, WrapperError> {
        let mut last_error: Option<WrapperError> = None;
        for plugin in &self.plugins {
            if !plugin.accepts_strategy(role, strategy) {
                continue;
            }
            match plugin.host_info_by_strategy(role, strategy, hosts).await {
                Ok(host) => return Ok(host),
                Err(e) => {
                    debug!(
                        "Plugin '{}' could not supply a host for strategy '{}': {}",
                        plugin.name(),
                        strategy,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            WrapperError::UnsupportedMethod(format!(
                "No plugin accepts host selection strategy '{strategy}' for role {role}"
            ))
        }))
    }

    /// True when at least one plugin other than the default subscribes to the
    /// method, i.e. the pipeline does more than delegate.
    pub fn has_subscribers(&self, method_name: &str) -> bool {
        self.plugins
            .iter()
            .take(self.plugins.len().saturating_sub(1))
            .any(|plugin| {
                plugin
                    .subscribed_methods()
                    .iter()
                    .any(|m| *m == ALL_METHODS || *m == method_name)
            })
    }
}
