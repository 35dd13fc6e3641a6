// src/core/plugin/stale_dns.rs

//! Stale-DNS recovery. After a failover the cluster-writer DNS entry keeps
//! pointing at the demoted writer until the CNAME catches up; connecting
//! through it would land on a reader. This plugin detects the mismatch and
//! reroutes to the verified writer's instance endpoint.

use super::service::PluginService;
use super::{
    ConnectKind, ConnectionPlugin, HostChangeMap, METHOD_CONNECT, METHOD_FORCE_CONNECT,
    METHOD_NOTIFY_HOST_LIST_CHANGED, NextConnect,
};
use crate::config::WrapperConfig;
use crate::core::driver::ClientWrapper;
use crate::core::errors::WrapperError;
use crate::core::host::{HostInfo, HostRole};
use crate::core::rds::{self, RdsUrlType};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

const SUBSCRIBED: &[&str] = &[
    METHOD_CONNECT,
    METHOD_FORCE_CONNECT,
    METHOD_NOTIFY_HOST_LIST_CHANGED,
];

pub struct StaleDnsPlugin {
    service: Arc<PluginService>,
    /// The instance endpoint of the writer as verified by role query.
    verified_writer: Mutex<Option<HostInfo>>,
}

impl StaleDnsPlugin {
    pub fn new(service: Arc<PluginService>) -> Self {
        Self {
            service,
            verified_writer: Mutex::new(None),
        }
    }

    /// Connects through the writer DNS and verifies the landing host's role.
    /// A reader landing means the DNS entry is stale; retry against the
    /// topology writer's instance endpoint.
    async fn connect_verified(
        &self,
        host: HostInfo,
        config: WrapperConfig,
        next: NextConnect<'_>,
    ) -> Result<Arc<ClientWrapper>, WrapperError> {
        let client = next.call(host.clone(), config.clone()).await?;

        let Ok(provider) = self.service.host_list_provider() else {
            return Ok(client);
        };
        if !provider.supports_topology() {
            return Ok(client);
        }

        let dialect = self.service.dialect();
        let role = match provider.host_role(&client, &dialect).await {
            Ok(role) => role,
            Err(e) => {
                debug!("Could not verify role behind writer DNS: {}", e);
                return Ok(client);
            }
        };

        if role == HostRole::Writer {
            if let Ok(Some(member)) = provider.identify_connection(&client, &dialect).await {
                *self.verified_writer.lock() = Some(member);
            }
            return Ok(client);
        }

        // Stale entry: the writer DNS still resolves to a demoted instance.
        self.service.refresh_host_list(Some(&client)).await.ok();
        let Some(writer) = self.service.writer_host() else {
            debug!("Writer DNS looks stale but no topology writer is known yet.");
            return Ok(client);
        };
        if writer.same_host(&client.host_info) {
            return Ok(client);
        }

        info!(
            "Stale DNS detected: '{}' resolves to a reader; rerouting to writer '{}'.",
            host.url(),
            writer.url()
        );
        self.service
            .dialect()
            .try_closing_target_client(&client.client)
            .await;
        let rerouted = self.service.connect(&writer, &config).await?;
        *self.verified_writer.lock() = Some(writer);
        Ok(rerouted)
    }
}

#[async_trait]
impl ConnectionPlugin for StaleDnsPlugin {
    fn name(&self) -> &'static str {
        "staleDns"
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
        next: NextConnect<'_>,
    ) -> Result<Arc<ClientWrapper>, WrapperError> {
        if rds::identify_rds_url_type(&host.host) != RdsUrlType::ClusterWriterDns {
            return next.call(host, config).await;
        }
        self.connect_verified(host, config, next).await
    }

    async fn notify_host_list_changed(&self, changes: &HostChangeMap) {
        // A new writer invalidates the verification.
        let verified = self.verified_writer.lock().clone();
        let Some(writer) = verified else {
            return;
        };
        for (url, set) in changes {
            if set.contains(&super::HostChange::PromotedToWriter) && *url != writer.url() {
                debug!("Writer changed to '{}'; clearing verified writer.", url);
                *self.verified_writer.lock() = None;
                return;
            }
        }
    }
}
