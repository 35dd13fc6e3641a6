// src/core/plugin/initial_connection.rs

//! Routes the very first connection of a client sensibly: a cluster-reader
//! DNS entry point is re-targeted to a concrete reader picked by strategy,
//! and a cluster-writer DNS entry point is verified against the topology
//! writer once one is known.

use super::service::PluginService;
use super::{ConnectKind, ConnectionPlugin, METHOD_CONNECT, METHOD_FORCE_CONNECT, NextConnect};
use crate::config::WrapperConfig;
use crate::core::driver::ClientWrapper;
use crate::core::errors::WrapperError;
use crate::core::host::{HostInfo, HostRole};
use crate::core::rds::{self, RdsUrlType};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

const SUBSCRIBED: &[&str] = &[METHOD_CONNECT, METHOD_FORCE_CONNECT];

pub struct InitialConnectionPlugin {
    service: Arc<PluginService>,
}

impl InitialConnectionPlugin {
    pub fn new(service: Arc<PluginService>) -> Self {
        Self { service }
    }

    /// Picks a concrete reader for a reader-DNS entry point, when topology is
    /// already known. Returns the original host otherwise.
    async fn reroute_reader_dns(&self, host: HostInfo, config: &WrapperConfig) -> HostInfo {
        let readers = self.service.hosts_by_role(HostRole::Reader);
        if readers.is_empty() {
            return host;
        }
        match self
            .service
            .host_info_by_strategy(
                HostRole::Reader,
                &config.failover_reader_host_selector_strategy,
                Some(&readers),
            )
            .await
        {
            Ok(reader) => {
                info!(
                    "Initial connection re-targeted from '{}' to reader '{}'.",
                    host.url(),
                    reader.url()
                );
                reader
            }
            Err(e) => {
                debug!("No concrete reader available for initial connection: {}", e);
                host
            }
        }
    }
}

#[async_trait]
impl ConnectionPlugin for InitialConnectionPlugin {
    fn name(&self) -> &'static str {
        "initialConnection"
    }

    fn subscribed_methods(&self) -> &[&'static str] {
        SUBSCRIBED
    }

    async fn connect(
        &self,
        _kind: ConnectKind,
        host: HostInfo,
        config: WrapperConfig,
        is_initial: bool,
        next: NextConnect<'_>,
    ) -> Result<Arc<ClientWrapper>, WrapperError> {
        if !is_initial {
            return next.call(host, config).await;
        }

        let url_type = rds::identify_rds_url_type(&host.host);
        match url_type {
            RdsUrlType::ClusterReaderDns => {
                let target = self.reroute_reader_dns(host, &config).await;
                next.call(target, config).await
            }
            RdsUrlType::ClusterWriterDns => {
                let client = next.call(host, config).await?;
                // Verify the writer endpoint actually landed on the writer
                // once topology can say so; stale entries surface through the
                // stale-DNS plugin, here we only record the observation.
                if let Ok(provider) = self.service.host_list_provider()
                    && provider.supports_topology()
                {
                    let dialect = self.service.dialect();
                    match provider.host_role(&client, &dialect).await {
                        Ok(HostRole::Writer) | Err(_) => {}
                        Ok(role) => {
                            debug!(
                                "Writer cluster endpoint resolved to a {} instance.",
                                role
                            );
                        }
                    }
                }
                Ok(client)
            }
            _ => next.call(host, config).await,
        }
    }
}
