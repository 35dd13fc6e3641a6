// src/core/failover/reader.rs

//! Reader failover: cycle through reader candidates picked by strategy,
//! verify each one's role, and fall back to the original writer when the
//! readers are exhausted and the mode allows it.

use super::{FailoverContext, FailoverMode};
use crate::core::errors::WrapperError;
use crate::core::host::{HostAvailability, HostInfo, HostRole};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause between candidate rounds once the list is exhausted.
const ROUND_DELAY: Duration = Duration::from_millis(500);

/// One reader-failover episode. Loops until it installs a connection; the
/// caller's deadline converts an endless episode into a timeout error.
pub(crate) async fn failover_to_reader(ctx: &FailoverContext) -> Result<(), WrapperError> {
    let service = &ctx.service;
    let original_writer = service.writer_host();

    // Candidates dropped for this episode: failed connects, and hosts that
    // turned out to be writers under strict-reader mode. A dropped writer is
    // not recycled for a later writer-oriented attempt.
    let mut dropped: HashSet<String> = HashSet::new();
    let mut writer_confirmed_writer = false;

    loop {
        service.refresh_host_list(None).await.ok();

        let readers: Vec<HostInfo> = service
            .hosts_by_role(HostRole::Reader)
            .into_iter()
            .filter(|host| !dropped.contains(&host.url()))
            .filter(|host| service.is_host_allowed(host))
            .collect();

        if readers.is_empty() {
            if try_original_writer(ctx, &original_writer, &mut dropped, writer_confirmed_writer)
                .await?
            {
                return Ok(());
            }
            debug!("Reader candidates exhausted; refreshing topology and retrying.");
            tokio::time::sleep(ROUND_DELAY).await;
            service.force_refresh_host_list(None).await.ok();
            continue;
        }

        let candidate = match ctx.selector.select(&readers, HostRole::Reader) {
            Ok(candidate) => candidate,
            Err(_) => {
                // Every remaining reader is backed off; treat the round as
                // exhausted.
                for reader in &readers {
                    dropped.insert(reader.url());
                }
                continue;
            }
        };

        match try_candidate(ctx, &candidate).await {
            CandidateOutcome::Installed => return Ok(()),
            CandidateOutcome::IsWriter => {
                if ctx.mode == FailoverMode::StrictReader {
                    debug!(
                        "Candidate '{}' is a writer; dropped under strict-reader mode.",
                        candidate.url()
                    );
                    if let Some(writer) = &original_writer
                        && writer.same_host(&candidate)
                    {
                        writer_confirmed_writer = true;
                    }
                    dropped.insert(candidate.url());
                } else {
                    // Compatible role for reader-or-writer mode; the attempt
                    // installed the client already.
                    return Ok(());
                }
            }
            CandidateOutcome::Failed => {
                dropped.insert(candidate.url());
            }
        }
    }
}

enum CandidateOutcome {
    /// Connected, verified, installed as current client.
    Installed,
    /// Connected but the host answered WRITER. Under reader-or-writer mode
    /// the client is already installed.
    IsWriter,
    /// Connect or verification failed; the candidate is dropped.
    Failed,
}

async fn try_candidate(ctx: &FailoverContext, candidate: &HostInfo) -> CandidateOutcome {
    let service = &ctx.service;

    let client = match service.connect(candidate, service.config()).await {
        Ok(client) => client,
        Err(e) => {
            debug!("Reader candidate '{}' failed to connect: {}", candidate.url(), e);
            service.set_availability(&candidate.all_aliases(), HostAvailability::NotAvailable);
            return CandidateOutcome::Failed;
        }
    };

    let role = {
        let provider = match service.host_list_provider() {
            Ok(provider) => provider,
            Err(_) => return CandidateOutcome::Failed,
        };
        let dialect = service.dialect();
        match provider.host_role(&client, &dialect).await {
            Ok(role) => role,
            Err(e) => {
                debug!(
                    "Could not verify role of candidate '{}': {}",
                    candidate.url(),
                    e
                );
                dialect.try_closing_target_client(&client.client).await;
                service
                    .set_availability(&candidate.all_aliases(), HostAvailability::NotAvailable);
                return CandidateOutcome::Failed;
            }
        }
    };

    service.set_availability(&candidate.all_aliases(), HostAvailability::Available);

    match role {
        HostRole::Reader | HostRole::Unknown => {
            let mut installed = candidate.clone();
            installed.role = HostRole::Reader;
            let installed = service.fill_aliases(&client, installed).await;
            if install(service, client, installed).await {
                info!("Reader failover completed; current host is '{}'.", candidate.url());
                CandidateOutcome::Installed
            } else {
                CandidateOutcome::Failed
            }
        }
        HostRole::Writer => {
            if ctx.mode == FailoverMode::StrictReader {
                service.dialect().try_closing_target_client(&client.client).await;
                CandidateOutcome::IsWriter
            } else {
                let mut installed = candidate.clone();
                installed.role = HostRole::Writer;
                let installed = service.fill_aliases(&client, installed).await;
                if install(service, client, installed).await {
                    info!(
                        "Reader failover landed on the writer '{}' (reader-or-writer mode).",
                        candidate.url()
                    );
                    CandidateOutcome::IsWriter
                } else {
                    CandidateOutcome::Failed
                }
            }
        }
    }
}

/// Readers exhausted: the original writer may have been demoted and make a
/// fine reader now, unless strict-reader mode already proved it still holds
/// the writer role.
async fn try_original_writer(
    ctx: &FailoverContext,
    original_writer: &Option<HostInfo>,
    dropped: &mut HashSet<String>,
    writer_confirmed_writer: bool,
) -> Result<bool, WrapperError> {
    let Some(writer) = original_writer else {
        return Ok(false);
    };
    if dropped.contains(&writer.url()) || !ctx.service.is_host_allowed(writer) {
        return Ok(false);
    }
    if ctx.mode == FailoverMode::StrictReader && writer_confirmed_writer {
        return Ok(false);
    }

    debug!("Trying the original writer '{}' as a last resort.", writer.url());
    match try_candidate(ctx, writer).await {
        CandidateOutcome::Installed => Ok(true),
        CandidateOutcome::IsWriter if ctx.mode != FailoverMode::StrictReader => Ok(true),
        CandidateOutcome::IsWriter => {
            dropped.insert(writer.url());
            Ok(false)
        }
        CandidateOutcome::Failed => {
            dropped.insert(writer.url());
            Ok(false)
        }
    }
}

async fn install(
    service: &Arc<crate::core::plugin::service::PluginService>,
    client: Arc<crate::core::driver::ClientWrapper>,
    host: HostInfo,
) -> bool {
    match service.set_current_client(client, host).await {
        Ok(_) => true,
        Err(e) => {
            warn!("Could not install failover candidate: {}", e);
            false
        }
    }
}
