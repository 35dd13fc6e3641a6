// src/core/container.rs

//! The service container: single owner of the plugin service and plugin
//! manager pair, wiring their mutual references at construction.

use crate::config::{ConfigProps, WrapperConfig};
use crate::core::dialect::{DatabaseDialect, DatabaseType, DialectManager};
use crate::core::driver::ConnectionProvider;
use crate::core::errors::WrapperError;
use crate::core::plugin::manager::PluginManager;
use crate::core::plugin::registry;
use crate::core::plugin::service::PluginService;
use crate::core::storage::{DEFAULT_SWEEP_INTERVAL, StorageService};
use std::sync::Arc;
use std::time::Duration;

pub struct ServiceContainer {
    pub config: WrapperConfig,
    pub storage: Arc<StorageService>,
    pub service: Arc<PluginService>,
    pub manager: Arc<PluginManager>,
}

impl ServiceContainer {
    /// Builds the full wiring for one logical client. Must run inside a tokio
    /// runtime; the storage sweeper task starts here.
    pub fn build(
        props: &ConfigProps,
        db_type: DatabaseType,
        connection_provider: Arc<dyn ConnectionProvider>,
        custom_dialect: Option<Arc<dyn DatabaseDialect>>,
    ) -> Result<Arc<Self>, WrapperError> {
        let config = WrapperConfig::from_props(props)?;
        Self::build_with_config(config, db_type, connection_provider, custom_dialect)
    }

    pub fn build_with_config(
        config: WrapperConfig,
        db_type: DatabaseType,
        connection_provider: Arc<dyn ConnectionProvider>,
        custom_dialect: Option<Arc<dyn DatabaseDialect>>,
    ) -> Result<Arc<Self>, WrapperError> {
        let storage = StorageService::new(Duration::from_millis(
            config.cluster_topology_refresh_rate_ms,
        ));
        storage.start_sweeper(DEFAULT_SWEEP_INTERVAL);

        let dialect_manager = DialectManager::new(db_type, custom_dialect);
        let service = PluginService::new(
            config.clone(),
            storage.clone(),
            connection_provider,
            dialect_manager,
        )?;
        let chain = registry::create_plugin_chain(&service, &config)?;
        let manager = Arc::new(PluginManager::new(chain));
        service.attach_manager(manager.clone());

        Ok(Arc::new(Self {
            config,
            storage,
            service,
            manager,
        }))
    }
}
