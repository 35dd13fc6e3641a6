// src/core/bluegreen/plugin.rs

//! Applies the Blue/Green routing tables to the connect and execute
//! pipelines: substitute connects to the staged side, suspend calls while a
//! switchover is in flight, reject connects to the staged cluster until its
//! DNS is retired.

use super::provider::BlueGreenStatusProvider;
use super::status::{BlueGreenPhase, BlueGreenStatus, RoutingControl, SubstituteRoute};
use crate::config::WrapperConfig;
use crate::core::driver::ClientWrapper;
use crate::core::errors::WrapperError;
use crate::core::host::HostInfo;
use crate::core::plugin::service::PluginService;
use crate::core::plugin::{
    ALL_METHODS, ConnectKind, ConnectionPlugin, ExecuteContext, NextConnect, NextExecute,
    NextInitHostProvider,
};
use crate::core::rds;
use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Granularity of the suspension sleep.
const SUSPEND_CHUNK: Duration = Duration::from_millis(100);

const SUBSCRIBED: &[&str] = &[ALL_METHODS];

/// One provider (and so one pair of monitors) per observed deployment,
/// process-wide.
static PROVIDERS: Lazy<DashMap<String, Arc<BlueGreenStatusProvider>>> = Lazy::new(DashMap::new);

/// Returns the provider monitoring one deployment, starting it on first use.
pub fn provider_for_deployment(
    bgd_id: &str,
    service: &Arc<PluginService>,
    config: &WrapperConfig,
) -> Arc<BlueGreenStatusProvider> {
    PROVIDERS
        .entry(bgd_id.to_string())
        .or_insert_with(|| {
            info!("Starting Blue/Green status monitoring for deployment '{}'.", bgd_id);
            BlueGreenStatusProvider::start(
                bgd_id,
                config.clone(),
                service.initial_host(),
                service.dialect(),
                service.connection_provider(),
                service.storage(),
            )
        })
        .clone()
}

/// Stops and removes the provider of one deployment. Used on shutdown.
pub async fn stop_provider(bgd_id: &str) {
    if let Some((_, provider)) = PROVIDERS.remove(bgd_id) {
        provider.stop().await;
    }
}

pub struct BlueGreenPlugin {
    service: Arc<PluginService>,
    connect_timeout: Duration,
    enable_green_host_replacement: bool,
    provider: OnceCell<Arc<BlueGreenStatusProvider>>,
}

impl BlueGreenPlugin {
    pub fn new(service: Arc<PluginService>, config: &WrapperConfig) -> Self {
        Self {
            service,
            connect_timeout: Duration::from_millis(config.bg_connect_timeout_ms),
            enable_green_host_replacement: config.enable_green_host_replacement,
            provider: OnceCell::new(),
        }
    }

    fn ensure_provider(&self) -> Option<Arc<BlueGreenStatusProvider>> {
        if let Some(provider) = self.provider.get() {
            return Some(provider.clone());
        }
        // Only dialects exposing the status table are worth monitoring.
        self.service.dialect().blue_green()?;
        let initial = self.service.initial_host();
        let bgd_id = rds::cluster_id_of(&initial.host, initial.port).unwrap_or_else(|| initial.url());
        let provider = provider_for_deployment(&bgd_id, &self.service, self.service.config());
        let _ = self.provider.set(provider.clone());
        Some(provider)
    }

    fn status(&self) -> Option<Arc<BlueGreenStatus>> {
        self.ensure_provider().map(|provider| provider.status())
    }

    /// Waits while the observed snapshot stays current and the switchover is
    /// in progress. Exits silently when the snapshot moves on; fails when the
    /// deadline passes first.
    async fn hold_while_in_progress(
        &self,
        observed: &Arc<BlueGreenStatus>,
    ) -> Result<(), WrapperError> {
        let Some(provider) = self.ensure_provider() else {
            return Ok(());
        };
        let deadline = tokio::time::Instant::now() + self.connect_timeout;
        loop {
            let current = provider.status();
            if current.phase != BlueGreenPhase::InProgress || current.revision != observed.revision
            {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(WrapperError::Internal(
                    "Blue/Green switchover is still in progress; try later".into(),
                ));
            }
            tokio::time::sleep(SUSPEND_CHUNK).await;
        }
    }

    /// Waits until the summary publishes a green counterpart for the blue
    /// host, bounded by the same deadline as plain suspension.
    async fn hold_until_corresponding_host(&self, host: &str) -> Result<(), WrapperError> {
        let Some(provider) = self.ensure_provider() else {
            return Ok(());
        };
        let key = host.to_lowercase();
        let deadline = tokio::time::Instant::now() + self.connect_timeout;
        loop {
            let current = provider.status();
            if current.corresponding_hosts.contains_key(&key)
                || !current.phase.is_active_switchover()
            {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(WrapperError::Internal(format!(
                    "No corresponding host appeared for '{host}' before the deadline; try later"
                )));
            }
            tokio::time::sleep(SUSPEND_CHUNK).await;
        }
    }

    /// SUBSTITUTE: IP targets iterate the IAM candidates (cloning the config
    /// with the candidate as signing host); DNS targets connect directly.
    /// Login failures fall through to the next candidate, everything else
    /// propagates.
    async fn connect_substitute(
        &self,
        route: &SubstituteRoute,
        config: &WrapperConfig,
    ) -> Result<Arc<ClientWrapper>, WrapperError> {
        let provider = self.service.connection_provider();

        if !rds::is_ip_address(&route.target.host) || route.iam_candidates.is_empty() {
            debug!("Substituting connect target with '{}'.", route.target.url());
            return provider.connect(&route.target, config).await;
        }

        let mut last_error: Option<WrapperError> = None;
        for candidate in &route.iam_candidates {
            let mut candidate_config = config.clone();
            candidate_config.iam_host = Some(candidate.host.clone());
            if candidate.port > 0 {
                candidate_config.iam_default_port = u16::try_from(candidate.port).ok();
            }
            debug!(
                "Substituting connect target with '{}' (IAM host '{}').",
                route.target.url(),
                candidate.host
            );
            match provider.connect(&route.target, &candidate_config).await {
                Ok(client) => {
                    if let Some(on_success) = &route.on_iam_success {
                        on_success(candidate);
                    }
                    return Ok(client);
                }
                Err(e) if e.is_login_error() => {
                    debug!("IAM candidate '{}' was rejected: {}", candidate.host, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            WrapperError::Internal("No IAM candidate produced a connection".into())
        }))
    }

    /// `enableGreenHostReplacement`: when a green DNS name stops resolving
    /// after switchover, retry once with the suffix stripped.
    async fn retry_without_green_suffix(
        &self,
        host: &HostInfo,
        config: &WrapperConfig,
        original_error: WrapperError,
    ) -> Result<Arc<ClientWrapper>, WrapperError> {
        if !self.enable_green_host_replacement
            || !original_error.is_network_error()
            || !rds::is_green_instance(&host.host)
        {
            return Err(original_error);
        }
        let stripped = rds::strip_green_suffix(&host.host);
        warn!(
            "Green host '{}' no longer resolves; retrying as '{}'.",
            host.host, stripped
        );
        let replacement = HostInfo::builder()
            .host(stripped)
            .port(host.port)
            .build()?;
        self.service
            .connection_provider()
            .connect(&replacement, config)
            .await
    }
}

#[async_trait]
impl ConnectionPlugin for BlueGreenPlugin {
    fn name(&self) -> &'static str {
        "bluegreen"
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
        self.ensure_provider();
        next.call(host, config).await
    }

    async fn connect(
        &self,
        _kind: ConnectKind,
        host: HostInfo,
        config: WrapperConfig,
        _is_initial: bool,
        next: NextConnect<'_>,
    ) -> Result<Arc<ClientWrapper>, WrapperError> {
        let Some(status) = self.status() else {
            return next.call(host, config).await;
        };

        let role = status.role_of(&host.host);
        let routing = status
            .connect_routing_for(&host.url(), role)
            .or_else(|| status.connect_routing_for(&host.host.to_lowercase(), role))
            .cloned();

        match routing.map(|entry| entry.control) {
            None | Some(RoutingControl::PassThrough) => {
                match next.call(host.clone(), config.clone()).await {
                    Ok(client) => Ok(client),
                    Err(e) => self.retry_without_green_suffix(&host, &config, e).await,
                }
            }
            Some(RoutingControl::Substitute(route)) => {
                self.connect_substitute(&route, &config).await
            }
            Some(RoutingControl::Suspend) => {
                debug!(
                    "Suspending connect to '{}' while the switchover is in progress.",
                    host.url()
                );
                self.hold_while_in_progress(&status).await?;
                next.call(host, config).await
            }
            Some(RoutingControl::SuspendUntilCorrespondingHostFound) => {
                debug!(
                    "Suspending connect to '{}' until its corresponding host appears.",
                    host.url()
                );
                self.hold_until_corresponding_host(&host.host).await?;
                next.call(host, config).await
            }
            Some(RoutingControl::Reject) => Err(WrapperError::Internal(format!(
                "Connections to '{}' are rejected during the Blue/Green switchover",
                host.url()
            ))),
        }
    }

    async fn execute(
        &self,
        ctx: &ExecuteContext,
        next: NextExecute<'_>,
    ) -> Result<serde_json::Value, WrapperError> {
        let Some(status) = self.status() else {
            return next.call().await;
        };
        if status.execute_routing.is_empty() {
            return next.call().await;
        }

        let Some(current) = self.service.current_client() else {
            return next.call().await;
        };
        let host = &current.host_info;
        let role = status.role_of(&host.host);
        let routing = status
            .execute_routing_for(&host.url(), role)
            .or_else(|| status.execute_routing_for(&host.host.to_lowercase(), role))
            .cloned();

        match routing.map(|entry| entry.control) {
            Some(RoutingControl::Suspend) => {
                debug!(
                    "Suspending '{}' on '{}' while the switchover is in progress.",
                    ctx.method_name,
                    host.url()
                );
                self.hold_while_in_progress(&status).await?;
                next.call().await
            }
            Some(RoutingControl::SuspendUntilCorrespondingHostFound) => {
                self.hold_until_corresponding_host(&host.host).await?;
                next.call().await
            }
            _ => next.call().await,
        }
    }
}
