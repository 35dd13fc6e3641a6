// src/core/plugin/mod.rs

//! The plugin abstraction and the per-method pipeline that threads a user
//! call through every subscribed plugin down to the terminal default plugin.

pub mod default_plugin;
pub mod initial_connection;
pub mod manager;
pub mod read_write_splitting;
pub mod registry;
pub mod service;
pub mod stale_dns;
pub mod timing;

use crate::config::WrapperConfig;
use crate::core::driver::ClientWrapper;
use crate::core::errors::WrapperError;
use crate::core::host::{HostInfo, HostRole};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub const METHOD_CONNECT: &str = "connect";
pub const METHOD_FORCE_CONNECT: &str = "forceConnect";
pub const METHOD_INIT_HOST_PROVIDER: &str = "initHostProvider";
pub const METHOD_NOTIFY_CONNECTION_CHANGED: &str = "notifyConnectionChanged";
pub const METHOD_NOTIFY_HOST_LIST_CHANGED: &str = "notifyHostListChanged";
pub const ALL_METHODS: &str = "*";

/// Whether a connect enters through the normal or the force entry point.
/// Internally both run the same pipeline; the kind only selects the method
/// name plugins subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectKind {
    Normal,
    Force,
}

impl ConnectKind {
    pub fn method_name(self) -> &'static str {
        match self {
            ConnectKind::Normal => METHOD_CONNECT,
            ConnectKind::Force => METHOD_FORCE_CONNECT,
        }
    }
}

/// Per-host observations distributed with host-list and connection change
/// notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostChange {
    HostAdded,
    HostDeleted,
    HostnameChanged,
    PromotedToWriter,
    PromotedToReader,
    WentUp,
    WentDown,
    HostChanged,
    ConnectionObjectChanged,
    InitialConnection,
}

/// host url -> changes observed for that host.
pub type HostChangeMap = HashMap<String, HashSet<HostChange>>;

/// A plugin's opinion on what to do with the previous client after a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OldConnectionSuggestion {
    NoOpinion,
    Preserve,
    Dispose,
}

/// Identifies the user call travelling through the execute pipeline.
#[derive(Debug, Clone)]
pub struct ExecuteContext {
    pub method_name: String,
    /// The statement text, for methods that carry one.
    pub sql: Option<String>,
    /// The call's argument, for setter-style methods.
    pub args: Option<Value>,
}

impl ExecuteContext {
    pub fn new(method_name: impl Into<String>, sql: Option<String>) -> Self {
        Self {
            method_name: method_name.into(),
            sql,
            args: None,
        }
    }

    pub fn with_args(method_name: impl Into<String>, args: Value) -> Self {
        Self {
            method_name: method_name.into(),
            sql: None,
            args: Some(args),
        }
    }
}

/// The innermost operation of an execute pipeline: the actual driver call.
pub type TargetOperation =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Value, WrapperError>> + Send + Sync>;

/// Continuation handed to a plugin's `connect` hook. Calling it resumes the
/// pipeline with the (possibly modified) host and properties.
pub struct NextConnect<'a> {
    pub(crate) chain: &'a [Arc<dyn ConnectionPlugin>],
    pub(crate) kind: ConnectKind,
    pub(crate) is_initial: bool,
}

impl<'a> NextConnect<'a> {
    pub fn call(
        self,
        host: HostInfo,
        config: WrapperConfig,
    ) -> BoxFuture<'a, Result<Arc<ClientWrapper>, WrapperError>> {
        Box::pin(async move {
            let Some((head, tail)) = self.chain.split_first() else {
                return Err(WrapperError::Internal(
                    "Connect pipeline ran past the terminal plugin".into(),
                ));
            };
            head.connect(
                self.kind,
                host,
                config,
                self.is_initial,
                NextConnect {
                    chain: tail,
                    kind: self.kind,
                    is_initial: self.is_initial,
                },
            )
            .await
        })
    }
}

/// Continuation handed to a plugin's `execute` hook.
pub struct NextExecute<'a> {
    pub(crate) chain: &'a [Arc<dyn ConnectionPlugin>],
    pub(crate) ctx: &'a ExecuteContext,
    pub(crate) target: &'a TargetOperation,
}

impl<'a> NextExecute<'a> {
    pub fn call(self) -> BoxFuture<'a, Result<Value, WrapperError>> {
        Box::pin(async move {
            let Some((head, tail)) = self.chain.split_first() else {
                return Err(WrapperError::Internal(
                    "Execute pipeline ran past the terminal plugin".into(),
                ));
            };
            head.execute(
                self.ctx,
                NextExecute {
                    chain: tail,
                    ctx: self.ctx,
                    target: self.target,
                },
            )
            .await
        })
    }

    /// The terminal driver operation. Only the default plugin invokes it.
    pub fn target(&self) -> TargetOperation {
        self.target.clone()
    }
}

/// Continuation handed to a plugin's `init_host_provider` hook.
pub struct NextInitHostProvider<'a> {
    pub(crate) chain: &'a [Arc<dyn ConnectionPlugin>],
}

impl<'a> NextInitHostProvider<'a> {
    pub fn call(
        self,
        host: HostInfo,
        config: WrapperConfig,
    ) -> BoxFuture<'a, Result<(), WrapperError>> {
        Box::pin(async move {
            match self.chain.split_first() {
                Some((head, tail)) => {
                    head.init_host_provider(host, config, NextInitHostProvider { chain: tail })
                        .await
                }
                None => Ok(()),
            }
        })
    }
}

/// A pipeline participant. Hooks default to pass-through, so a plugin only
/// implements the methods it subscribes to.
#[async_trait]
pub trait ConnectionPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// The method names this plugin participates in; `*` subscribes to all.
    fn subscribed_methods(&self) -> &[&'static str];

    fn is_subscribed(&self, method_name: &str) -> bool {
        self.subscribed_methods()
            .iter()
            .any(|m| *m == ALL_METHODS || *m == method_name)
    }

    async fn connect(
        &self,
        _kind: ConnectKind,
        host: HostInfo,
        config: WrapperConfig,
        _is_initial: bool,
        next: NextConnect<'_>,
    ) -> Result<Arc<ClientWrapper>, WrapperError> {
        next.call(host, config).await
    }

    async fn execute(
        &self,
        _ctx: &ExecuteContext,
        next: NextExecute<'_>,
    ) -> Result<Value, WrapperError> {
        next.call().await
    }

    async fn init_host_provider(
        &self,
        host: HostInfo,
        config: WrapperConfig,
        next: NextInitHostProvider<'_>,
    ) -> Result<(), WrapperError> {
        next.call(host, config).await
    }

    async fn notify_connection_changed(
        &self,
        _changes: &HashSet<HostChange>,
    ) -> OldConnectionSuggestion {
        OldConnectionSuggestion::NoOpinion
    }

    async fn notify_host_list_changed(&self, _changes: &HostChangeMap) {}

    fn accepts_strategy(&self, _role: HostRole, _strategy: &str) -> bool {
        false
    }

    async fn host_info_by_strategy(
        &self,
        _role: HostRole,
        strategy: &str,
        _hosts: Option<&[HostInfo]>,
    ) -> Result<HostInfo, WrapperError> {
        Err(WrapperError::UnsupportedMethod(format!(
            "hostInfoByStrategy({strategy})"
        )))
    }
}
