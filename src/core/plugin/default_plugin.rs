// src/core/plugin/default_plugin.rs

//! The terminal plugin: always the tail of every pipeline, owns the calls
//! into the driver-specific connection provider and the target operation.

use super::{
    ALL_METHODS, ConnectKind, ConnectionPlugin, ExecuteContext, NextConnect, NextExecute,
};
use crate::config::WrapperConfig;
use crate::core::driver::{ClientWrapper, ConnectionProvider};
use crate::core::errors::WrapperError;
use crate::core::host::HostInfo;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_PLUGIN_NAME: &str = "default";

const SUBSCRIBED: &[&str] = &[ALL_METHODS];

pub struct DefaultPlugin {
    connection_provider: Arc<dyn ConnectionProvider>,
}

impl DefaultPlugin {
    pub fn new(connection_provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            connection_provider,
        }
    }
}

#[async_trait]
impl ConnectionPlugin for DefaultPlugin {
    fn name(&self) -> &'static str {
        DEFAULT_PLUGIN_NAME
    }

    fn subscribed_methods(&self) -> &[&'static str] {
        SUBSCRIBED
    }

    async fn connect(
        &self,
        _kind: ConnectKind,
        host: HostInfo,
        config: WrapperConfig,
        _is_initial: bool,
        _next: NextConnect<'_>,
    ) -> Result<Arc<ClientWrapper>, WrapperError> {
        debug!("Opening driver connection to '{}'.", host.url());
        self.connection_provider.connect(&host, &config).await
    }

    async fn execute(
        &self,
        _ctx: &ExecuteContext,
        next: NextExecute<'_>,
    ) -> Result<Value, WrapperError> {
        (next.target())().await
    }
}
