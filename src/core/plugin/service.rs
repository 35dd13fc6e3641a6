// src/core/plugin/service.rs

//! The plugin service: owns the current client, current host, topology
//! snapshot, dialect and session state for one logical connection, and
//! mediates between plugins and the host-list provider.

use super::manager::PluginManager;
use super::{ConnectKind, HostChange, HostChangeMap, OldConnectionSuggestion};
use crate::config::WrapperConfig;
use crate::core::dialect::{DatabaseDialect, DialectManager, TransactionBoundary};
use crate::core::driver::{
    ClientWrapper, ConnectionProvider, ErrorListenerHandle, ErrorListenerKind, query_with_timeout,
};
use crate::core::errors::WrapperError;
use crate::core::host::{HostAvailability, HostInfo, HostRole, NO_PORT};
use crate::core::session::SessionStateService;
use crate::core::storage::{ExpirationCache, StorageService};
use crate::core::topology::{
    ClusterTopologyHostListProvider, ConnectionStringHostListProvider, HostListProvider,
};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How long a recorded per-URL availability observation stays relevant.
const AVAILABILITY_CACHE_TTL: Duration = Duration::from_secs(300);

struct ServiceState {
    current_client: Option<Arc<ClientWrapper>>,
    current_host: Option<HostInfo>,
    /// Listener attached to the current client so idle-time network errors
    /// are captured between calls.
    error_listener: Option<ErrorListenerHandle>,
    hosts: Vec<HostInfo>,
    in_transaction: bool,
}

/// One instance per logical client. The plugin manager back-reference is
/// injected once by the service container.
pub struct PluginService {
    config: WrapperConfig,
    initial_host: HostInfo,
    storage: Arc<StorageService>,
    connection_provider: Arc<dyn ConnectionProvider>,
    dialect_manager: DialectManager,
    manager: OnceCell<Arc<PluginManager>>,
    session: SessionStateService,
    dialect: Mutex<Arc<dyn DatabaseDialect>>,
    host_list_provider: Mutex<Option<Arc<dyn HostListProvider>>>,
    state: Mutex<ServiceState>,
    availability_by_url: ExpirationCache<String, HostAvailability>,
    /// Optional allow-list of host names/URLs failover may route to.
    /// `None` places no restriction.
    allowed_hosts: Mutex<Option<HashSet<String>>>,
}

impl PluginService {
    pub fn new(
        config: WrapperConfig,
        storage: Arc<StorageService>,
        connection_provider: Arc<dyn ConnectionProvider>,
        dialect_manager: DialectManager,
    ) -> Result<Arc<Self>, WrapperError> {
        let initial_host = HostInfo::builder()
            .host(&config.host)
            .port(config.port.map(i32::from).unwrap_or(NO_PORT))
            .build()?;
        let dialect = dialect_manager.initial_dialect(&initial_host.host, &config)?;
        let session = SessionStateService::new(&config);

        Ok(Arc::new(Self {
            config,
            initial_host,
            storage,
            connection_provider,
            dialect_manager,
            manager: OnceCell::new(),
            session,
            dialect: Mutex::new(dialect),
            host_list_provider: Mutex::new(None),
            state: Mutex::new(ServiceState {
                current_client: None,
                current_host: None,
                error_listener: None,
                hosts: Vec::new(),
                in_transaction: false,
            }),
            availability_by_url: ExpirationCache::new(AVAILABILITY_CACHE_TTL, false),
            allowed_hosts: Mutex::new(None),
        }))
    }

    /// Injected exactly once by the service container.
    pub fn attach_manager(&self, manager: Arc<PluginManager>) {
        if self.manager.set(manager).is_err() {
            warn!("Plugin manager was already attached; ignoring replacement.");
        }
    }

    pub fn manager(&self) -> Arc<PluginManager> {
        self.manager
            .get()
            .expect("plugin manager attached at container construction")
            .clone()
    }

    // --- accessors ---

    pub fn config(&self) -> &WrapperConfig {
        &self.config
    }

    pub fn storage(&self) -> Arc<StorageService> {
        self.storage.clone()
    }

    pub fn connection_provider(&self) -> Arc<dyn ConnectionProvider> {
        self.connection_provider.clone()
    }

    pub fn session(&self) -> &SessionStateService {
        &self.session
    }

    pub fn dialect(&self) -> Arc<dyn DatabaseDialect> {
        self.dialect.lock().clone()
    }

    pub fn initial_host(&self) -> HostInfo {
        self.initial_host.clone()
    }

    pub fn current_client(&self) -> Option<Arc<ClientWrapper>> {
        self.state.lock().current_client.clone()
    }

    /// The explicitly set current host, falling back to the topology writer,
    /// falling back to the first known host.
    pub fn current_host_info(&self) -> Option<HostInfo> {
        let state = self.state.lock();
        state
            .current_host
            .clone()
            .or_else(|| {
                state
                    .hosts
                    .iter()
                    .find(|host| host.role == HostRole::Writer)
                    .cloned()
            })
            .or_else(|| state.hosts.first().cloned())
    }

    pub fn all_hosts(&self) -> Vec<HostInfo> {
        self.state.lock().hosts.clone()
    }

    pub fn hosts_by_role(&self, role: HostRole) -> Vec<HostInfo> {
        self.state
            .lock()
            .hosts
            .iter()
            .filter(|host| host.role == role)
            .cloned()
            .collect()
    }

    pub fn writer_host(&self) -> Option<HostInfo> {
        self.state
            .lock()
            .hosts
            .iter()
            .find(|host| host.role == HostRole::Writer)
            .cloned()
    }

    pub fn in_transaction(&self) -> bool {
        self.state.lock().in_transaction
    }

    pub fn set_in_transaction(&self, in_transaction: bool) {
        self.state.lock().in_transaction = in_transaction;
    }

    // --- host list provider ---

    pub fn set_host_list_provider(&self, provider: Arc<dyn HostListProvider>) {
        *self.host_list_provider.lock() = Some(provider);
    }

    pub fn host_list_provider(&self) -> Result<Arc<dyn HostListProvider>, WrapperError> {
        self.host_list_provider
            .lock()
            .clone()
            .ok_or_else(|| WrapperError::Internal("Host list provider is not initialized".into()))
    }

    pub fn has_host_list_provider(&self) -> bool {
        self.host_list_provider.lock().is_some()
    }

    /// Runs the initHostProvider pipeline, then installs the dialect-default
    /// provider when no plugin supplied one.
    pub async fn init_host_provider(&self) -> Result<(), WrapperError> {
        self.manager()
            .init_host_provider(self.initial_host(), self.config.clone())
            .await?;
        if !self.has_host_list_provider() {
            self.install_default_host_list_provider();
        }
        Ok(())
    }

    fn install_default_host_list_provider(&self) {
        let dialect = self.dialect();
        let provider: Arc<dyn HostListProvider> = if dialect.topology().is_some() {
            Arc::new(ClusterTopologyHostListProvider::new(
                self.config.clone(),
                self.initial_host(),
                dialect,
                self.storage.clone(),
                self.connection_provider.clone(),
            ))
        } else {
            Arc::new(ConnectionStringHostListProvider::new(
                vec![self.initial_host()],
                self.initial_host.url(),
            ))
        };
        self.set_host_list_provider(provider);
    }

    // --- topology refresh ---

    pub async fn refresh_host_list(
        &self,
        client: Option<&Arc<ClientWrapper>>,
    ) -> Result<(), WrapperError> {
        let provider = self.host_list_provider()?;
        let fresh = provider.refresh(client).await?;
        self.install_hosts(fresh).await;
        Ok(())
    }

    pub async fn force_refresh_host_list(
        &self,
        client: Option<&Arc<ClientWrapper>>,
    ) -> Result<(), WrapperError> {
        let provider = self.host_list_provider()?;
        let fresh = provider.force_refresh(client).await?;
        self.install_hosts(fresh).await;
        Ok(())
    }

    /// Installs a new topology snapshot and fans the per-host diff out to
    /// every subscribed plugin. An empty snapshot only clears state when the
    /// previous one was also empty; "no fresh topology" keeps the old view.
    async fn install_hosts(&self, fresh: Vec<HostInfo>) {
        if fresh.is_empty() {
            return;
        }
        let changes = {
            let mut state = self.state.lock();
            let changes = compute_host_list_changes(&state.hosts, &fresh);
            if !changes.is_empty() {
                state.hosts = fresh;
            }
            changes
        };
        if !changes.is_empty() {
            self.manager().notify_host_list_changed(&changes).await;
        }
    }

    // --- connect ---

    pub async fn connect(
        &self,
        host: &HostInfo,
        config: &WrapperConfig,
    ) -> Result<Arc<ClientWrapper>, WrapperError> {
        self.manager()
            .connect(ConnectKind::Normal, host.clone(), config.clone(), false)
            .await
    }

    pub async fn force_connect(
        &self,
        host: &HostInfo,
        config: &WrapperConfig,
    ) -> Result<Arc<ClientWrapper>, WrapperError> {
        self.manager()
            .connect(ConnectKind::Force, host.clone(), config.clone(), false)
            .await
    }

    // --- current client transfer ---

    /// Installs a new current client. The first installation emits
    /// `InitialConnection`; subsequent ones run the full transfer protocol:
    /// session-state hand-off, best-effort rollback of an in-flight
    /// transaction, change notification, and disposal of the previous client
    /// unless a plugin asks to preserve it.
    pub async fn set_current_client(
        &self,
        new_client: Arc<ClientWrapper>,
        host_info: HostInfo,
    ) -> Result<HashSet<HostChange>, WrapperError> {
        let previous = {
            let mut state = self.state.lock();
            match &state.current_client {
                None => {
                    state.error_listener = Some(
                        new_client
                            .client
                            .attach_error_listener(ErrorListenerKind::Track),
                    );
                    state.current_client = Some(new_client.clone());
                    state.current_host = Some(host_info.clone());
                    None
                }
                Some(existing) => Some(existing.clone()),
            }
        };

        let Some(old_client) = previous else {
            let changes = HashSet::from([HostChange::InitialConnection]);
            self.manager().notify_connection_changed(&changes, None).await;
            return Ok(changes);
        };

        let changes = connection_changes(&old_client.host_info, &host_info);

        self.session.begin()?;
        let result = self
            .transfer_current_client(&old_client, new_client, host_info, &changes)
            .await;
        // The transfer scope closes on every exit path.
        self.session.complete();
        result?;
        Ok(changes)
    }

    async fn transfer_current_client(
        &self,
        old_client: &Arc<ClientWrapper>,
        new_client: Arc<ClientWrapper>,
        host_info: HostInfo,
        changes: &HashSet<HostChange>,
    ) -> Result<(), WrapperError> {
        self.session
            .apply_current_session_state(&new_client.client)
            .await?;

        let was_in_transaction = {
            let mut state = self.state.lock();
            let was = state.in_transaction;
            if let Some(handle) = state.error_listener.take() {
                old_client.client.remove_error_listener(handle);
            }
            state.error_listener = Some(
                new_client
                    .client
                    .attach_error_listener(ErrorListenerKind::Track),
            );
            state.current_client = Some(new_client);
            state.current_host = Some(host_info);
            state.in_transaction = false;
            was
        };

        if was_in_transaction || self.config.rollback_on_switch {
            if let Err(e) = self.dialect().rollback(&old_client.client).await {
                debug!("Best-effort rollback of the previous client failed: {}", e);
            }
        }

        let suggestions = self
            .manager()
            .notify_connection_changed(changes, None)
            .await;

        let preserve = suggestions.contains(&OldConnectionSuggestion::Preserve);
        if !preserve && old_client.is_valid().await {
            if let Err(e) = self
                .session
                .apply_pristine_session_state(&old_client.client)
                .await
            {
                debug!("Could not restore pristine state on retired client: {}", e);
            }
            self.dialect()
                .try_closing_target_client(&old_client.client)
                .await;
        }
        Ok(())
    }

    // --- statement observation ---

    /// Classifies a statement via the dialect, updating the tracked session
    /// state and the transaction flag.
    pub fn update_state(&self, sql: &str) {
        let dialect = self.dialect();

        if let Some(auto_commit) = dialect.statement_sets_auto_commit(sql) {
            self.session.set_auto_commit(auto_commit);
        }
        if let Some(read_only) = dialect.statement_sets_read_only(sql) {
            self.session.set_read_only(read_only);
        }
        if let Some(catalog) = dialect.statement_sets_catalog(sql) {
            self.session.set_catalog(catalog);
        }
        if let Some(schema) = dialect.statement_sets_schema(sql) {
            self.session.set_schema(schema);
        }
        if let Some(level) = dialect.statement_sets_transaction_isolation(sql) {
            self.session.set_transaction_isolation(level);
        }

        match dialect.transaction_boundary(sql) {
            TransactionBoundary::Starts => self.set_in_transaction(true),
            TransactionBoundary::Commits | TransactionBoundary::RollsBack => {
                self.set_in_transaction(false)
            }
            TransactionBoundary::None => {}
        }
    }

    // --- dialect refinement ---

    /// Probes the current dialect's update candidates against a live client;
    /// a confirmed, more specific dialect replaces the current one and resets
    /// the host-list provider.
    pub async fn update_dialect(&self, client: &Arc<ClientWrapper>) -> Result<(), WrapperError> {
        let current = self.dialect();
        if current.update_candidates().is_empty() {
            return Ok(());
        }
        let updated = self
            .dialect_manager
            .dialect_for_update(
                &current,
                &client.client,
                &self.initial_host.host,
                &client.host_info.host,
            )
            .await;
        if updated.code() != current.code() {
            *self.dialect.lock() = updated;
            self.install_default_host_list_provider();
        }
        Ok(())
    }

    // --- allowed hosts ---

    /// Restricts (or, with `None`, unrestricts) the hosts failover may route
    /// to. Entries match a host's name, URL or any discovered alias.
    pub fn set_allowed_hosts(&self, hosts: Option<HashSet<String>>) {
        *self.allowed_hosts.lock() =
            hosts.map(|set| set.iter().map(|h| h.to_lowercase()).collect());
    }

    pub fn is_host_allowed(&self, host: &HostInfo) -> bool {
        let allowed = self.allowed_hosts.lock();
        let Some(allowed) = allowed.as_ref() else {
            return true;
        };
        if allowed.contains(&host.host.to_lowercase()) {
            return true;
        }
        host.all_aliases().iter().any(|alias| allowed.contains(alias))
    }

    // --- alias discovery ---

    /// Queries the dialect for the connected instance's additional names and
    /// records them on the given host and on the service's tracked copies of
    /// it. Discovery failures are logged and ignored.
    pub async fn fill_aliases(
        &self,
        client: &Arc<ClientWrapper>,
        mut host_info: HostInfo,
    ) -> HostInfo {
        let dialect = self.dialect();
        match dialect.host_aliases(&client.client).await {
            Ok(aliases) => {
                if aliases.is_empty() {
                    return host_info;
                }
                for alias in &aliases {
                    host_info.add_alias(alias);
                }
                let mut state = self.state.lock();
                for tracked in state.hosts.iter_mut() {
                    if tracked.same_host(&host_info) {
                        for alias in &aliases {
                            tracked.add_alias(alias);
                        }
                    }
                }
                if let Some(current) = state.current_host.as_mut()
                    && current.same_host(&host_info)
                {
                    for alias in &aliases {
                        current.add_alias(alias);
                    }
                }
            }
            Err(e) => {
                debug!("Alias discovery failed for '{}': {}", host_info.url(), e);
            }
        }
        host_info
    }

    // --- availability ---

    /// Records an availability observation for every known host matching one
    /// of the aliases, by URL.
    pub fn set_availability(&self, aliases: &HashSet<String>, availability: HostAvailability) {
        if aliases.is_empty() {
            return;
        }
        let lowered: HashSet<String> = aliases.iter().map(|a| a.to_lowercase()).collect();
        let mut state = self.state.lock();
        for host in state.hosts.iter_mut() {
            if host.all_aliases().intersection(&lowered).next().is_some() {
                host.set_availability(availability);
                self.availability_by_url.put(host.url(), availability);
            }
        }
        // Aliases that match no topology member are still remembered by URL.
        for alias in &lowered {
            if !state.hosts.iter().any(|h| h.all_aliases().contains(alias)) {
                self.availability_by_url.put(alias.clone(), availability);
            }
        }
    }

    pub fn availability_for_url(&self, url: &str) -> Option<HostAvailability> {
        self.availability_by_url.get(&url.to_lowercase())
    }

    // --- strategies ---

    pub fn accepts_strategy(&self, role: HostRole, strategy: &str) -> bool {
        self.manager().accepts_strategy(role, strategy)
    }

    pub async fn host_info_by_strategy(
        &self,
        role: HostRole,
        strategy: &str,
        hosts: Option<&[HostInfo]>,
    ) -> Result<HostInfo, WrapperError> {
        self.manager()
            .host_info_by_strategy(role, strategy, hosts)
            .await
    }

    // --- driver call helpers ---

    /// Runs a query on the current client under the configured query budget.
    pub async fn query_with_timeout(&self, sql: &str) -> Result<Vec<Value>, WrapperError> {
        let client = self
            .current_client()
            .ok_or_else(|| WrapperError::Internal("No current client".into()))?;
        query_with_timeout(&client.client, sql, self.config.wrapper_query_timeout_ms).await
    }

    /// Resolves which topology member the client is connected to.
    pub async fn identify_connection(
        &self,
        client: &Arc<ClientWrapper>,
    ) -> Result<Option<HostInfo>, WrapperError> {
        let provider = self.host_list_provider()?;
        let dialect = self.dialect();
        provider.identify_connection(client, &dialect).await
    }
}

/// The changes one connection switch implies, computed from the old and new
/// host identities.
fn connection_changes(old_host: &HostInfo, new_host: &HostInfo) -> HashSet<HostChange> {
    let mut changes = HashSet::from([HostChange::ConnectionObjectChanged]);
    if !old_host.host.eq_ignore_ascii_case(&new_host.host) || old_host.port != new_host.port {
        changes.insert(HostChange::HostnameChanged);
        changes.insert(HostChange::HostChanged);
    }
    if old_host.role != new_host.role {
        changes.insert(HostChange::HostChanged);
        match new_host.role {
            HostRole::Writer => {
                changes.insert(HostChange::PromotedToWriter);
            }
            HostRole::Reader => {
                changes.insert(HostChange::PromotedToReader);
            }
            HostRole::Unknown => {}
        }
    }
    changes
}

/// Per-host diff between two topology snapshots, keyed by host URL. Hosts are
/// matched by their stable host id so endpoint renames surface as
/// `HostnameChanged` rather than delete/add pairs.
pub fn compute_host_list_changes(old: &[HostInfo], new: &[HostInfo]) -> HostChangeMap {
    let mut changes: HostChangeMap = HashMap::new();
    let old_by_id: HashMap<&str, &HostInfo> =
        old.iter().map(|host| (host.host_id.as_str(), host)).collect();
    let new_by_id: HashMap<&str, &HostInfo> =
        new.iter().map(|host| (host.host_id.as_str(), host)).collect();

    for (id, old_host) in &old_by_id {
        if !new_by_id.contains_key(id) {
            changes
                .entry(old_host.url())
                .or_default()
                .insert(HostChange::HostDeleted);
        }
    }

    for (id, new_host) in &new_by_id {
        let entry = changes.entry(new_host.url()).or_default();
        match old_by_id.get(id) {
            None => {
                entry.insert(HostChange::HostAdded);
            }
            Some(old_host) => {
                if old_host.url() != new_host.url() {
                    entry.insert(HostChange::HostnameChanged);
                    entry.insert(HostChange::HostChanged);
                }
                if old_host.role != new_host.role {
                    entry.insert(HostChange::HostChanged);
                    match new_host.role {
                        HostRole::Writer => {
                            entry.insert(HostChange::PromotedToWriter);
                        }
                        HostRole::Reader => {
                            entry.insert(HostChange::PromotedToReader);
                        }
                        HostRole::Unknown => {}
                    }
                }
                if old_host.availability != new_host.availability {
                    entry.insert(HostChange::HostChanged);
                    match new_host.availability {
                        HostAvailability::Available => {
                            entry.insert(HostChange::WentUp);
                        }
                        HostAvailability::NotAvailable => {
                            entry.insert(HostChange::WentDown);
                        }
                    }
                }
            }
        }
    }

    changes.retain(|_, set| !set.is_empty());
    changes
}
