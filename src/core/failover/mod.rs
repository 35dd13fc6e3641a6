// src/core/failover/mod.rs

//! The failover engine: watches pipeline traffic for network-class failures,
//! and drives the writer- and reader-failover state machines to install a
//! replacement connection.

pub mod reader;
pub mod writer;

use crate::config::WrapperConfig;
use crate::core::errors::WrapperError;
use crate::core::driver::ClientWrapper;
use crate::core::host::{HostAvailability, HostInfo, HostRole};
use crate::core::plugin::service::PluginService;
use crate::core::plugin::{
    ALL_METHODS, ConnectKind, ConnectionPlugin, ExecuteContext, NextConnect, NextExecute,
    NextInitHostProvider,
};
use crate::core::rds::{self, RdsUrlType};
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
use std::time::Duration;
use tracing::{info, warn};

const SUBSCRIBED: &[&str] = &[ALL_METHODS];

/// Methods that never trigger failover handling.
const PASSIVE_METHODS: &[&str] = &["end", "rollback"];

/// Which role a failover episode must land on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum FailoverMode {
    StrictWriter,
    StrictReader,
    ReaderOrWriter,
    /// Not configured; derived from the URL shape once the entry point is
    /// known.
    Unknown,
}

impl FailoverMode {
    fn derive_from_url(host: &str) -> FailoverMode {
        match rds::identify_rds_url_type(host) {
            RdsUrlType::ClusterReaderDns => FailoverMode::ReaderOrWriter,
            _ => FailoverMode::StrictWriter,
        }
    }
}

/// Everything the state machines need from the plugin.
pub(crate) struct FailoverContext {
    pub service: Arc<PluginService>,
    pub selector: Arc<dyn HostSelector>,
    pub mode: FailoverMode,
}

pub struct FailoverPlugin {
    service: Arc<PluginService>,
    enabled: bool,
    failover_timeout: Duration,
    mode: Mutex<FailoverMode>,
    selector: Arc<dyn HostSelector>,
    selectors: HashMap<&'static str, Arc<dyn HostSelector>>,
    /// Guards against the machines' own pipeline connects re-entering
    /// failover handling. Pipeline calls are serialized per client.
    in_failover: AtomicBool,
    last_error: Mutex<Option<WrapperError>>,
}

impl FailoverPlugin {
    pub fn new(service: Arc<PluginService>, config: &WrapperConfig) -> Result<Self, WrapperError> {
        let selector = selector_for(&config.failover_reader_host_selector_strategy)?;
        let mut selectors: HashMap<&'static str, Arc<dyn HostSelector>> = HashMap::new();
        selectors.insert(STRATEGY_RANDOM, Arc::new(RandomHostSelector));
        selectors.insert(STRATEGY_ROUND_ROBIN, Arc::new(RoundRobinHostSelector::new()));
        Ok(Self {
            service,
            enabled: config.enable_cluster_aware_failover,
            failover_timeout: Duration::from_millis(config.failover_timeout_ms),
            mode: Mutex::new(config.failover_mode),
            selector,
            selectors,
            in_failover: AtomicBool::new(false),
            last_error: Mutex::new(None),
        })
    }

    fn resolved_mode(&self) -> FailoverMode {
        *self.mode.lock()
    }

    /// Runs one failover episode under the configured deadline. On success
    /// the service carries a new current client.
    async fn failover(&self) -> Result<(), WrapperError> {
        let mode = self.resolved_mode();
        let ctx = FailoverContext {
            service: self.service.clone(),
            selector: self.selector.clone(),
            mode,
        };

        self.in_failover.store(true, Ordering::SeqCst);
        let result = tokio::time::timeout(self.failover_timeout, async {
            match mode {
                FailoverMode::StrictWriter => writer::failover_to_writer(&ctx).await,
                FailoverMode::StrictReader | FailoverMode::ReaderOrWriter => {
                    reader::failover_to_reader(&ctx).await
                }
                FailoverMode::Unknown => {
                    // Derivation happens at init; reaching this means the
                    // entry point was never initialized.
                    writer::failover_to_writer(&ctx).await
                }
            }
        })
        .await;
        self.in_failover.store(false, Ordering::SeqCst);

        match result {
            Ok(inner) => inner,
            Err(_) => Err(WrapperError::InternalQueryTimeout),
        }
    }

    /// The advisory error surfaced to the caller after a successful episode.
    fn failover_outcome(&self, was_in_transaction: bool) -> WrapperError {
        if was_in_transaction {
            WrapperError::TransactionResolutionUnknown
        } else {
            WrapperError::FailoverSuccess
        }
    }

    async fn handle_network_error(&self, error: WrapperError) -> WrapperError {
        // Record the failure against the resolved current host before
        // anything else; the wrapper may have been opened through a cluster
        // endpoint.
        let was_in_transaction = self.service.in_transaction();
        let failed_host = self
            .service
            .current_host_info()
            .or_else(|| self.service.current_client().map(|c| c.host_info.clone()));
        if let Some(host) = failed_host {
            self.service
                .set_availability(&host.all_aliases(), HostAvailability::NotAvailable);
        }
        *self.last_error.lock() = Some(error.clone());

        warn!("Network failure on the current connection: {}. Starting failover.", error);
        match self.failover().await {
            Ok(()) => {
                info!("Failover installed a new connection.");
                self.failover_outcome(was_in_transaction)
            }
            Err(failover_error) => {
                warn!("Failover did not complete: {}", failover_error);
                failover_error
            }
        }
    }

    fn is_new_network_error(&self, error: &WrapperError) -> bool {
        if !error.is_network_error() {
            return false;
        }
        let last = self.last_error.lock();
        match &*last {
            Some(previous) => previous != error,
            None => true,
        }
    }
}

#[async_trait]
impl ConnectionPlugin for FailoverPlugin {
    fn name(&self) -> &'static str {
        "failover"
    }

    fn subscribed_methods(&self) -> &[&'static str] {
        SUBSCRIBED
    }

    async fn init_host_provider(
        &self,
        host: HostInfo,
        config: WrapperConfig,
        next: NextInitHostProvider<'_>,
    ) -> Result<(), WrapperError> {
        if self.enabled && self.resolved_mode() == FailoverMode::Unknown {
            let derived = FailoverMode::derive_from_url(&host.host);
            info!("Failover mode resolved from URL shape: {}.", derived);
            *self.mode.lock() = derived;
        }
        next.call(host, config).await
    }

    async fn connect(
        &self,
        _kind: ConnectKind,
        host: HostInfo,
        config: WrapperConfig,
        is_initial: bool,
        next: NextConnect<'_>,
    ) -> Result<Arc<ClientWrapper>, WrapperError> {
        if !self.enabled || self.in_failover.load(Ordering::SeqCst) || is_initial {
            return next.call(host, config).await;
        }

        let topology = self.service.all_hosts();
        let known = topology.iter().any(|member| member.same_host(&host));
        let marked_down = host.effective_availability() == HostAvailability::NotAvailable
            || self
                .service
                .availability_for_url(&host.url())
                .map(|availability| availability == HostAvailability::NotAvailable)
                .unwrap_or(false);

        if (!known && !topology.is_empty()) || marked_down {
            info!(
                "Host '{}' is unavailable or unknown to the topology; entering failover.",
                host.url()
            );
            self.service.refresh_host_list(None).await.ok();
            self.failover().await?;
            return self
                .service
                .current_client()
                .ok_or_else(|| WrapperError::FailoverFailed("No client after failover".into()));
        }

        next.call(host, config).await
    }

    async fn execute(
        &self,
        ctx: &ExecuteContext,
        next: NextExecute<'_>,
    ) -> Result<Value, WrapperError> {
        if !self.enabled
            || self.in_failover.load(Ordering::SeqCst)
            || PASSIVE_METHODS.contains(&ctx.method_name.as_str())
        {
            return next.call().await;
        }

        // An error captured while the connection sat idle surfaces before the
        // new call touches the wire.
        if let Some(client) = self.service.current_client()
            && let Some(idle_error) = client.client.take_tracked_error()
        {
            return Err(self.handle_network_error(idle_error).await);
        }

        match next.call().await {
            Ok(result) => Ok(result),
            Err(error) if self.is_new_network_error(&error) => {
                Err(self.handle_network_error(error).await)
            }
            Err(error) => Err(error),
        }
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
        let selector = self.selectors.get(strategy).cloned().ok_or_else(|| {
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
