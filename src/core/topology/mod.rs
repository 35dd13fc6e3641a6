// src/core/topology/mod.rs

//! Host-list providers: materialize and refresh the cluster topology for a
//! given initial URL, sharing snapshots across providers through the
//! cluster-id-keyed cache in the storage service.

use crate::config::WrapperConfig;
use crate::core::dialect::{DatabaseDialect, TopologyRow};
use crate::core::driver::{ClientWrapper, ConnectionProvider, TargetClient};
use crate::core::errors::WrapperError;
use crate::core::host::availability::ExponentialBackoffAvailabilityStrategy;
use crate::core::host::{HostInfo, HostRole, NO_PORT};
use crate::core::rds;
use crate::core::storage::{StorageService, Topology};
use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// One provider can teach others which cluster id a host belongs to, so that
/// drivers entering through an instance endpoint share the cluster cache.
static SUGGESTED_CLUSTER_ID_BY_HOST: Lazy<DashMap<String, String>> = Lazy::new(DashMap::new);

/// Availability strategies are shared across all providers for a host URL.
static STRATEGY_BY_HOST: Lazy<DashMap<String, Arc<ExponentialBackoffAvailabilityStrategy>>> =
    Lazy::new(DashMap::new);

fn shared_strategy(
    url: &str,
    config: &WrapperConfig,
) -> Option<Arc<ExponentialBackoffAvailabilityStrategy>> {
    if let Some(existing) = STRATEGY_BY_HOST.get(url) {
        return Some(existing.clone());
    }
    match ExponentialBackoffAvailabilityStrategy::new(
        config.host_availability_strategy_max_retries,
        config.host_availability_strategy_initial_backoff_time_sec,
    ) {
        Ok(strategy) => {
            let strategy = Arc::new(strategy);
            STRATEGY_BY_HOST.insert(url.to_string(), strategy.clone());
            Some(strategy)
        }
        Err(e) => {
            warn!("Could not build availability strategy for '{}': {}", url, e);
            None
        }
    }
}

/// Produces and refreshes the list of hosts representing a cluster.
#[async_trait]
pub trait HostListProvider: Send + Sync {
    /// Returns the cached topology when it is still fresh, querying otherwise.
    async fn refresh(
        &self,
        client: Option<&Arc<ClientWrapper>>,
    ) -> Result<Vec<HostInfo>, WrapperError>;

    /// Bypasses freshness and always queries.
    async fn force_refresh(
        &self,
        client: Option<&Arc<ClientWrapper>>,
    ) -> Result<Vec<HostInfo>, WrapperError>;

    /// Resolves which topology member the given client is connected to.
    async fn identify_connection(
        &self,
        client: &Arc<ClientWrapper>,
        dialect: &Arc<dyn DatabaseDialect>,
    ) -> Result<Option<HostInfo>, WrapperError>;

    async fn host_role(
        &self,
        client: &Arc<ClientWrapper>,
        dialect: &Arc<dyn DatabaseDialect>,
    ) -> Result<HostRole, WrapperError>;

    fn cluster_id(&self) -> String;

    /// False for providers that only echo the connection string.
    fn supports_topology(&self) -> bool;
}

/// Provider for dialects without cluster observability: echoes the initial
/// hosts and never refreshes.
pub struct ConnectionStringHostListProvider {
    hosts: Vec<HostInfo>,
    cluster_id: String,
}

impl ConnectionStringHostListProvider {
    pub fn new(hosts: Vec<HostInfo>, cluster_id: String) -> Self {
        Self { hosts, cluster_id }
    }
}

#[async_trait]
impl HostListProvider for ConnectionStringHostListProvider {
    async fn refresh(
        &self,
        _client: Option<&Arc<ClientWrapper>>,
    ) -> Result<Vec<HostInfo>, WrapperError> {
        Ok(self.hosts.clone())
    }

    async fn force_refresh(
        &self,
        _client: Option<&Arc<ClientWrapper>>,
    ) -> Result<Vec<HostInfo>, WrapperError> {
        Ok(self.hosts.clone())
    }

    async fn identify_connection(
        &self,
        client: &Arc<ClientWrapper>,
        _dialect: &Arc<dyn DatabaseDialect>,
    ) -> Result<Option<HostInfo>, WrapperError> {
        Ok(Some(client.host_info.clone()))
    }

    async fn host_role(
        &self,
        _client: &Arc<ClientWrapper>,
        _dialect: &Arc<dyn DatabaseDialect>,
    ) -> Result<HostRole, WrapperError> {
        Ok(HostRole::Unknown)
    }

    fn cluster_id(&self) -> String {
        self.cluster_id.clone()
    }

    fn supports_topology(&self) -> bool {
        false
    }
}

/// Topology-aware provider backed by the dialect's in-database topology view.
pub struct ClusterTopologyHostListProvider {
    config: WrapperConfig,
    initial_host: HostInfo,
    /// Template host carrying a `?` placeholder for the instance name.
    instance_template: Option<String>,
    cluster_id: String,
    dialect: Arc<dyn DatabaseDialect>,
    storage: Arc<StorageService>,
    connection_provider: Arc<dyn ConnectionProvider>,
    /// Guards query/install so concurrent refreshes collapse into one.
    refresh_lock: Mutex<()>,
}

impl ClusterTopologyHostListProvider {
    pub fn new(
        config: WrapperConfig,
        initial_host: HostInfo,
        dialect: Arc<dyn DatabaseDialect>,
        storage: Arc<StorageService>,
        connection_provider: Arc<dyn ConnectionProvider>,
    ) -> Self {
        let instance_template = config
            .cluster_instance_host_pattern
            .clone()
            .or_else(|| rds::instance_template(&initial_host.host));

        let cluster_id = config
            .cluster_id
            .clone()
            .or_else(|| rds::cluster_id_of(&initial_host.host, initial_host.port))
            .or_else(|| {
                SUGGESTED_CLUSTER_ID_BY_HOST
                    .get(&initial_host.url())
                    .map(|entry| entry.clone())
            })
            .unwrap_or_else(|| initial_host.url());

        Self {
            config,
            initial_host,
            instance_template,
            cluster_id,
            dialect,
            storage,
            connection_provider,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Turns raw topology rows into an installed-order host list with exactly
    /// one writer. Duplicate rows per host resolve to the most recent one;
    /// duplicate writers resolve to the most recently updated one and the
    /// rest are discarded. An empty result means "no fresh topology".
    fn materialize(&self, rows: Vec<TopologyRow>) -> Vec<HostInfo> {
        let mut newest_by_host: std::collections::HashMap<String, TopologyRow> =
            std::collections::HashMap::new();
        for row in rows {
            match newest_by_host.get(&row.host_id) {
                Some(existing) if existing.last_update_time >= row.last_update_time => {}
                _ => {
                    newest_by_host.insert(row.host_id.clone(), row);
                }
            }
        }

        let mut writers: Vec<&TopologyRow> = newest_by_host
            .values()
            .filter(|row| row.is_writer)
            .collect();
        if writers.is_empty() {
            debug!(
                "Topology query for cluster '{}' returned no writer; discarding snapshot.",
                self.cluster_id
            );
            return Vec::new();
        }
        writers.sort_by_key(|row| std::cmp::Reverse(row.last_update_time));
        let elected_writer = writers[0].host_id.clone();

        // Stale writers are dropped entirely, not demoted.
        let mut hosts: Vec<HostInfo> = newest_by_host
            .into_values()
            .filter(|row| row.host_id == elected_writer || !row.is_writer)
            .filter_map(|row| self.host_from_row(row, &elected_writer))
            .collect();

        // Writer first, readers in name order: a stable shape for selectors.
        hosts.sort_by(|a, b| {
            (a.role != HostRole::Writer)
                .cmp(&(b.role != HostRole::Writer))
                .then_with(|| a.host.cmp(&b.host))
        });
        hosts
    }

    fn host_from_row(&self, row: TopologyRow, elected_writer: &str) -> Option<HostInfo> {
        let host_name = match (&row.endpoint, &self.instance_template) {
            (Some(endpoint), _) => endpoint.clone(),
            (None, Some(template)) => rds::apply_instance_template(template, &row.host_id),
            (None, None) => row.host_id.clone(),
        };
        let port = row
            .port
            .map(i32::from)
            .or(self.config.port.map(i32::from))
            .or_else(|| {
                (self.initial_host.port != NO_PORT).then_some(self.initial_host.port)
            })
            .unwrap_or_else(|| i32::from(self.dialect.default_port()));
        let role = if row.host_id == elected_writer {
            HostRole::Writer
        } else {
            HostRole::Reader
        };

        let mut builder = HostInfo::builder()
            .host(&host_name)
            .port(port)
            .role(role)
            .weight(row.weight)
            .last_update_time(row.last_update_time)
            .host_id(&row.host_id);
        let url = if port == NO_PORT {
            host_name.to_lowercase()
        } else {
            format!("{}:{}", host_name.to_lowercase(), port)
        };
        if let Some(strategy) = shared_strategy(&url, &self.config) {
            builder = builder.availability_strategy(strategy);
        }
        builder.build().ok()
    }

    async fn query_topology(
        &self,
        client: Option<&Arc<ClientWrapper>>,
    ) -> Result<Vec<HostInfo>, WrapperError> {
        let topology_dialect = self.dialect.topology().ok_or_else(|| {
            WrapperError::Internal(format!(
                "Dialect '{}' is not topology-aware",
                self.dialect.code()
            ))
        })?;

        let rows = match client {
            Some(wrapper) => topology_dialect.query_for_topology(&wrapper.client).await?,
            None => {
                // No caller connection: open a short-lived one to the initial
                // host just for the query.
                let wrapper = self
                    .connection_provider
                    .connect(&self.initial_host, &self.config)
                    .await?;
                let result = topology_dialect.query_for_topology(&wrapper.client).await;
                self.dialect.try_closing_target_client(&wrapper.client).await;
                result?
            }
        };

        let hosts = self.materialize(rows);
        if !hosts.is_empty() {
            self.storage
                .set::<String, Topology>(self.cluster_id.clone(), hosts.clone());
            for host in &hosts {
                SUGGESTED_CLUSTER_ID_BY_HOST.insert(host.url(), self.cluster_id.clone());
            }
        }
        Ok(hosts)
    }

    async fn instance_id_of(
        &self,
        client: &Arc<dyn TargetClient>,
        dialect: &Arc<dyn DatabaseDialect>,
    ) -> Result<Option<String>, WrapperError> {
        match dialect.topology() {
            Some(topology_dialect) => topology_dialect.instance_id(client).await,
            None => Ok(None),
        }
    }
}

#[async_trait]
impl HostListProvider for ClusterTopologyHostListProvider {
    async fn refresh(
        &self,
        client: Option<&Arc<ClientWrapper>>,
    ) -> Result<Vec<HostInfo>, WrapperError> {
        if let Some(cached) = self.storage.get::<String, Topology>(&self.cluster_id) {
            return Ok(cached);
        }
        let _guard = self.refresh_lock.lock().await;
        // Re-check: another task may have refreshed while we waited.
        if let Some(cached) = self.storage.get::<String, Topology>(&self.cluster_id) {
            return Ok(cached);
        }
        self.query_topology(client).await
    }

    async fn force_refresh(
        &self,
        client: Option<&Arc<ClientWrapper>>,
    ) -> Result<Vec<HostInfo>, WrapperError> {
        let _guard = self.refresh_lock.lock().await;
        self.query_topology(client).await
    }

    async fn identify_connection(
        &self,
        client: &Arc<ClientWrapper>,
        dialect: &Arc<dyn DatabaseDialect>,
    ) -> Result<Option<HostInfo>, WrapperError> {
        let Some(instance_id) = self.instance_id_of(&client.client, dialect).await? else {
            return Ok(None);
        };

        let topology = self.refresh(Some(client)).await?;
        if let Some(found) = topology.iter().find(|host| host.host_id == instance_id) {
            return Ok(Some(found.clone()));
        }

        // The member may have joined after the cached snapshot; refresh once.
        let topology = self.force_refresh(Some(client)).await?;
        Ok(topology
            .iter()
            .find(|host| host.host_id == instance_id)
            .cloned())
    }

    async fn host_role(
        &self,
        client: &Arc<ClientWrapper>,
        dialect: &Arc<dyn DatabaseDialect>,
    ) -> Result<HostRole, WrapperError> {
        let topology_dialect = dialect.topology().ok_or_else(|| {
            WrapperError::Internal(format!("Dialect '{}' is not topology-aware", dialect.code()))
        })?;
        topology_dialect.host_role(&client.client).await
    }

    fn cluster_id(&self) -> String {
        self.cluster_id.clone()
    }

    fn supports_topology(&self) -> bool {
        true
    }
}
