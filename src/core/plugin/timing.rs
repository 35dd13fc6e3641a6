// src/core/plugin/timing.rs

//! Decorator plugins measuring the time spent in the rest of the chain. Both
//! carry the stick-to-prior weight so they hug whatever they were listed
//! after.

use super::{
    ALL_METHODS, ConnectKind, ConnectionPlugin, ExecuteContext, METHOD_CONNECT,
    METHOD_FORCE_CONNECT, NextConnect, NextExecute,
};
use crate::config::WrapperConfig;
use crate::core::driver::ClientWrapper;
use crate::core::errors::WrapperError;
use crate::core::host::HostInfo;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

const CONNECT_TIME_SUBSCRIBED: &[&str] = &[METHOD_CONNECT, METHOD_FORCE_CONNECT];
const EXECUTE_TIME_SUBSCRIBED: &[&str] = &[ALL_METHODS];

/// Logs the wall-clock time of each connect attempt.
pub struct ConnectTimePlugin;

impl ConnectTimePlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConnectTimePlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionPlugin for ConnectTimePlugin {
    fn name(&self) -> &'static str {
        "connectTime"
    }

    fn subscribed_methods(&self) -> &[&'static str] {
        CONNECT_TIME_SUBSCRIBED
    }

    async fn connect(
        &self,
        _kind: ConnectKind,
        host: HostInfo,
        config: WrapperConfig,
        _is_initial: bool,
        next: NextConnect<'_>,
    ) -> Result<Arc<ClientWrapper>, WrapperError> {
        let url = host.url();
        let started = Instant::now();
        let result = next.call(host, config).await;
        info!(
            "Connect to '{}' took {:?} ({}).",
            url,
            started.elapsed(),
            if result.is_ok() { "ok" } else { "failed" }
        );
        result
    }
}

/// Logs the wall-clock time of each pipeline call.
pub struct ExecuteTimePlugin;

impl ExecuteTimePlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ExecuteTimePlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionPlugin for ExecuteTimePlugin {
    fn name(&self) -> &'static str {
        "executeTime"
    }

    fn subscribed_methods(&self) -> &[&'static str] {
        EXECUTE_TIME_SUBSCRIBED
    }

    async fn execute(
        &self,
        ctx: &ExecuteContext,
        next: NextExecute<'_>,
    ) -> Result<Value, WrapperError> {
        let started = Instant::now();
        let result = next.call().await;
        info!(
            "Call '{}' took {:?} ({}).",
            ctx.method_name,
            started.elapsed(),
            if result.is_ok() { "ok" } else { "failed" }
        );
        result
    }
}
