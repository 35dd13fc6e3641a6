// src/core/failover/writer.rs

//! Writer failover: refresh the topology, locate the proclaimed writer, open
//! and role-verify a connection to it, and install it as the current client.

use super::FailoverContext;
use crate::core::errors::WrapperError;
use crate::core::host::{HostAvailability, HostRole};
use tracing::{info, warn};

/// One writer-failover episode. The caller owns the deadline.
pub(crate) async fn failover_to_writer(ctx: &FailoverContext) -> Result<(), WrapperError> {
    let service = &ctx.service;

    service.force_refresh_host_list(None).await?;

    let topology = service.all_hosts();
    let writer = topology
        .iter()
        .find(|host| host.role == HostRole::Writer)
        .cloned()
        .ok_or_else(|| {
            WrapperError::FailoverFailed("Refreshed topology contains no writer".into())
        })?;

    if !service.is_host_allowed(&writer) {
        return Err(WrapperError::FailoverFailed(format!(
            "Proclaimed writer '{}' is not in the allowed host list",
            writer.url()
        )));
    }

    if writer.effective_availability() == HostAvailability::NotAvailable {
        return Err(WrapperError::FailoverFailed(format!(
            "Writer candidate '{}' is still marked unavailable",
            writer.url()
        )));
    }

    info!("Writer failover candidate: '{}'.", writer.url());
    let client = service.connect(&writer, service.config()).await?;

    // The topology may proclaim a writer that has since been demoted; trust
    // only the instance's own answer.
    let provider = service.host_list_provider()?;
    let dialect = service.dialect();
    let role = provider.host_role(&client, &dialect).await?;
    if role != HostRole::Writer {
        warn!(
            "Writer candidate '{}' reports role {}; aborting the candidate.",
            writer.url(),
            role
        );
        service.set_availability(&writer.all_aliases(), HostAvailability::NotAvailable);
        dialect.try_closing_target_client(&client.client).await;
        return Err(WrapperError::FailoverFailed(format!(
            "Candidate '{}' did not verify as a writer",
            writer.url()
        )));
    }

    let writer = service.fill_aliases(&client, writer).await;
    service.set_availability(&writer.all_aliases(), HostAvailability::Available);
    service.set_current_client(client, writer.clone()).await?;
    info!("Writer failover completed; current host is '{}'.", writer.url());
    Ok(())
}
