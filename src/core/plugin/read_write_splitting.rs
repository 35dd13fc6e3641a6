// src/core/plugin/read_write_splitting.rs

//! Read/write traffic splitting. `setReadOnly(true)` moves the session to a
//! pooled reader connection picked by strategy; `setReadOnly(false)` moves it
//! back to the writer. Both pooled clients stay open across switches.

use super::service::PluginService;
use super::{
    ConnectionPlugin, ExecuteContext, HostChange, METHOD_NOTIFY_CONNECTION_CHANGED, NextExecute,
    OldConnectionSuggestion,
};
use crate::config::WrapperConfig;
use crate::core::driver::ClientWrapper;
use crate::core::errors::WrapperError;
use crate::core::host::{HostInfo, HostRole};
use crate::core::strategy::{
    HostSelector, RandomHostSelector, RoundRobinHostSelector, STRATEGY_RANDOM,
    STRATEGY_ROUND_ROBIN, selector_for,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

const METHOD_SET_READ_ONLY: &str = "setReadOnly";

const SUBSCRIBED: &[&str] = &[METHOD_SET_READ_ONLY, METHOD_NOTIFY_CONNECTION_CHANGED];

pub struct ReadWriteSplittingPlugin {
    service: Arc<PluginService>,
    default_selector: Arc<dyn HostSelector>,
    selectors: HashMap<&'static str, Arc<dyn HostSelector>>,
    writer_client: Mutex<Option<Arc<ClientWrapper>>>,
    reader_client: Mutex<Option<Arc<ClientWrapper>>>,
    /// Set while this plugin is swapping the current client, so the change
    /// notification knows the retired client is pooled here.
    switch_in_progress: AtomicBool,
}

impl ReadWriteSplittingPlugin {
    pub fn new(service: Arc<PluginService>, config: &WrapperConfig) -> Result<Self, WrapperError> {
        let default_selector = selector_for(&config.failover_reader_host_selector_strategy)?;
        let mut selectors: HashMap<&'static str, Arc<dyn HostSelector>> = HashMap::new();
        selectors.insert(STRATEGY_RANDOM, Arc::new(RandomHostSelector));
        selectors.insert(STRATEGY_ROUND_ROBIN, Arc::new(RoundRobinHostSelector::new()));
        Ok(Self {
            service,
            default_selector,
            selectors,
            writer_client: Mutex::new(None),
            reader_client: Mutex::new(None),
            switch_in_progress: AtomicBool::new(false),
        })
    }

    fn requested_read_only(ctx: &ExecuteContext) -> Option<bool> {
        match &ctx.args {
            Some(Value::Bool(read_only)) => Some(*read_only),
            _ => None,
        }
    }

    async fn install(
        &self,
        client: Arc<ClientWrapper>,
        host: HostInfo,
    ) -> Result<(), WrapperError> {
        self.switch_in_progress.store(true, Ordering::SeqCst);
        let result = self.service.set_current_client(client, host).await;
        self.switch_in_progress.store(false, Ordering::SeqCst);
        result.map(|_| ())
    }

    async fn switch_to_reader(&self) -> Result<(), WrapperError> {
        let current = self.service.current_client();
        if let Some(current) = &current
            && current.host_info.role == HostRole::Reader
        {
            return Ok(());
        }

        // Remember the writer connection for the way back.
        if let Some(current) = current {
            *self.writer_client.lock() = Some(current);
        }

        let pooled = self.reader_client.lock().clone();
        if let Some(reader) = pooled {
            if reader.is_valid().await {
                let host = reader.host_info.clone();
                debug!("Reusing pooled reader connection to '{}'.", host.url());
                return self.install(reader, host).await;
            }
            *self.reader_client.lock() = None;
        }

        let readers = self.service.hosts_by_role(HostRole::Reader);
        if readers.is_empty() {
            debug!("No readers in topology; staying on the current connection.");
            return Ok(());
        }
        let reader_host = self.default_selector.select(&readers, HostRole::Reader)?;
        let client = self
            .service
            .connect(&reader_host, self.service.config())
            .await?;
        info!("Read-only session switched to reader '{}'.", reader_host.url());
        *self.reader_client.lock() = Some(client.clone());
        self.install(client, reader_host).await
    }

    async fn switch_to_writer(&self) -> Result<(), WrapperError> {
        let current = self.service.current_client();
        if let Some(current) = &current
            && current.host_info.role != HostRole::Reader
        {
            return Ok(());
        }

        if let Some(current) = current {
            *self.reader_client.lock() = Some(current);
        }

        let pooled = self.writer_client.lock().clone();
        if let Some(writer) = pooled {
            if writer.is_valid().await {
                // The pooled connection may have been opened through the
                // cluster DNS; label it with the resolved topology writer.
                let host = self
                    .service
                    .writer_host()
                    .unwrap_or_else(|| writer.host_info.clone());
                debug!("Reusing pooled writer connection to '{}'.", host.url());
                return self.install(writer, host).await;
            }
            *self.writer_client.lock() = None;
        }

        let writer_host = self.service.writer_host().ok_or_else(|| {
            WrapperError::UnavailableHost("No writer found in the current topology".into())
        })?;
        let client = self
            .service
            .connect(&writer_host, self.service.config())
            .await?;
        info!("Session switched back to writer '{}'.", writer_host.url());
        *self.writer_client.lock() = Some(client.clone());
        self.install(client, writer_host).await
    }
}

#[async_trait]
impl ConnectionPlugin for ReadWriteSplittingPlugin {
    fn name(&self) -> &'static str {
        "readWriteSplitting"
    }

    fn subscribed_methods(&self) -> &[&'static str] {
        SUBSCRIBED
    }

    async fn execute(
        &self,
        ctx: &ExecuteContext,
        next: NextExecute<'_>,
    ) -> Result<Value, WrapperError> {
        let Some(read_only) = Self::requested_read_only(ctx) else {
            return next.call().await;
        };

        if self.service.in_transaction() {
            return Err(WrapperError::Internal(
                "setReadOnly cannot switch connections while a transaction is open".into(),
            ));
        }

        self.service.refresh_host_list(None).await.ok();
        if read_only {
            self.switch_to_reader().await?;
        } else {
            self.switch_to_writer().await?;
        }
        next.call().await
    }

    async fn notify_connection_changed(
        &self,
        changes: &std::collections::HashSet<HostChange>,
    ) -> OldConnectionSuggestion {
        if self.switch_in_progress.load(Ordering::SeqCst) {
            // The retired client is one of the pooled connections.
            return OldConnectionSuggestion::Preserve;
        }
        if changes.contains(&HostChange::ConnectionObjectChanged) {
            // An external switch (failover) invalidates the pooled clients.
            *self.writer_client.lock() = None;
            *self.reader_client.lock() = None;
        }
        OldConnectionSuggestion::NoOpinion
    }

    fn accepts_strategy(&self, _role: HostRole, strategy: &str) -> bool {
        self.selectors.contains_key(strategy)
    }

    async fn host_info_by_strategy(
        &self,
        role: HostRole,
        strategy: &str,
        hosts: Option<&[HostInfo]>,
    ) -> Result<HostInfo, WrapperError> {
        let selector = self
            .selectors
            .get(strategy)
            .cloned()
            .ok_or_else(|| {
                WrapperError::UnsupportedMethod(format!("hostInfoByStrategy({strategy})"))
            })?;
        let owned;
        let pool: &[HostInfo] = match hosts {
            Some(hosts) => hosts,
            None => {
                owned = self.service.all_hosts();
                &owned
            }
        };
        selector.select(pool, role)
    }
}
