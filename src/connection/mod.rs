// src/connection/mod.rs

//! The driver-facing client type: every call routes through the plugin
//! pipeline of its service container. One instance per logical connection.

use crate::config::ConfigProps;
use crate::core::container::ServiceContainer;
use crate::core::dialect::{DatabaseType, TransactionIsolationLevel};
use crate::core::driver::{ConnectionProvider, query_with_timeout};
use crate::core::errors::WrapperError;
use crate::core::plugin::service::PluginService;
use crate::core::plugin::{ConnectKind, ExecuteContext, TargetOperation};
use serde_json::{Value, json};
use std::str::FromStr;
use std::sync::Arc;

/// A cluster-aware wrapper client. Construct with [`WrapperClient::connect`]
/// (or the per-flavor helpers) and use it like a plain driver connection.
pub struct WrapperClient {
    container: Arc<ServiceContainer>,
}

impl WrapperClient {
    /// Opens the initial connection through the full pipeline and installs it
    /// as the current client.
    pub async fn connect(
        props: &ConfigProps,
        db_type: DatabaseType,
        connection_provider: Arc<dyn ConnectionProvider>,
    ) -> Result<Self, WrapperError> {
        let container = ServiceContainer::build(props, db_type, connection_provider, None)?;
        let service = &container.service;

        service.init_host_provider().await?;

        let initial_host = service.initial_host();
        let client = container
            .manager
            .connect(
                ConnectKind::Normal,
                initial_host.clone(),
                container.config.clone(),
                true,
            )
            .await?;

        service.update_dialect(&client).await?;
        if let Err(e) = service.refresh_host_list(Some(&client)).await {
            tracing::debug!("Initial topology refresh failed: {}", e);
        }

        let resolved = service
            .identify_connection(&client)
            .await
            .ok()
            .flatten()
            .unwrap_or(initial_host);
        let resolved = service.fill_aliases(&client, resolved).await;
        service.set_current_client(client, resolved).await?;

        Ok(Self { container })
    }

    pub async fn connect_postgres(
        props: &ConfigProps,
        connection_provider: Arc<dyn ConnectionProvider>,
    ) -> Result<Self, WrapperError> {
        Self::connect(props, DatabaseType::Postgres, connection_provider).await
    }

    pub async fn connect_mysql(
        props: &ConfigProps,
        connection_provider: Arc<dyn ConnectionProvider>,
    ) -> Result<Self, WrapperError> {
        Self::connect(props, DatabaseType::Mysql, connection_provider).await
    }

    fn service(&self) -> &Arc<PluginService> {
        &self.container.service
    }

    /// The terminal operation for a query: resolve the current client at
    /// invocation time so pipeline-driven switches take effect.
    fn query_target(&self, sql: String) -> TargetOperation {
        let service = self.service().clone();
        Arc::new(move || {
            let service = service.clone();
            let sql = sql.clone();
            Box::pin(async move {
                let client = service
                    .current_client()
                    .ok_or_else(|| WrapperError::Internal("No current client".into()))?;
                let rows = query_with_timeout(
                    &client.client,
                    &sql,
                    service.config().wrapper_query_timeout_ms,
                )
                .await?;
                Ok(Value::Array(rows))
            })
        })
    }

    /// Runs a statement through the execute pipeline.
    pub async fn query(&self, sql: &str) -> Result<Vec<Value>, WrapperError> {
        self.service().update_state(sql);
        let ctx = ExecuteContext::new("query", Some(sql.to_string()));
        let result = self
            .container
            .manager
            .execute(&ctx, self.query_target(sql.to_string()))
            .await?;
        match result {
            Value::Array(rows) => Ok(rows),
            other => Ok(vec![other]),
        }
    }

    pub async fn rollback(&self) -> Result<(), WrapperError> {
        let service = self.service().clone();
        let ctx = ExecuteContext::new("rollback", None);
        let target: TargetOperation = Arc::new(move || {
            let service = service.clone();
            Box::pin(async move {
                let client = service
                    .current_client()
                    .ok_or_else(|| WrapperError::Internal("No current client".into()))?;
                client.client.rollback().await?;
                Ok(Value::Null)
            })
        });
        self.container.manager.execute(&ctx, target).await?;
        self.service().set_in_transaction(false);
        Ok(())
    }

    pub async fn set_read_only(&self, read_only: bool) -> Result<(), WrapperError> {
        let session = self.service().session();
        session.setup_pristine_read_only(self.is_read_only());

        let service = self.service().clone();
        let ctx = ExecuteContext::with_args("setReadOnly", json!(read_only));
        let target: TargetOperation = Arc::new(move || {
            let service = service.clone();
            Box::pin(async move {
                let client = service
                    .current_client()
                    .ok_or_else(|| WrapperError::Internal("No current client".into()))?;
                client.client.set_read_only(read_only).await?;
                Ok(Value::Null)
            })
        });
        self.container.manager.execute(&ctx, target).await?;
        self.service().session().set_read_only(read_only);
        Ok(())
    }

    pub fn is_read_only(&self) -> bool {
        self.service()
            .session()
            .state()
            .read_only
            .value
            .unwrap_or(false)
    }

    pub async fn set_auto_commit(&self, auto_commit: bool) -> Result<(), WrapperError> {
        let session = self.service().session();
        session.setup_pristine_auto_commit(self.get_auto_commit());

        let service = self.service().clone();
        let ctx = ExecuteContext::with_args("setAutoCommit", json!(auto_commit));
        let target: TargetOperation = Arc::new(move || {
            let service = service.clone();
            Box::pin(async move {
                let client = service
                    .current_client()
                    .ok_or_else(|| WrapperError::Internal("No current client".into()))?;
                client.client.set_auto_commit(auto_commit).await?;
                Ok(Value::Null)
            })
        });
        self.container.manager.execute(&ctx, target).await?;
        self.service().session().set_auto_commit(auto_commit);
        Ok(())
    }

    pub fn get_auto_commit(&self) -> bool {
        self.service()
            .session()
            .state()
            .auto_commit
            .value
            .unwrap_or(true)
    }

    pub async fn set_catalog(&self, catalog: &str) -> Result<(), WrapperError> {
        let session = self.service().session();
        if let Some(current) = self.get_catalog() {
            session.setup_pristine_catalog(current);
        }

        let service = self.service().clone();
        let owned = catalog.to_string();
        let ctx = ExecuteContext::with_args("setCatalog", json!(catalog));
        let target: TargetOperation = Arc::new(move || {
            let service = service.clone();
            let catalog = owned.clone();
            Box::pin(async move {
                let client = service
                    .current_client()
                    .ok_or_else(|| WrapperError::Internal("No current client".into()))?;
                client.client.set_catalog(&catalog).await?;
                Ok(Value::Null)
            })
        });
        self.container.manager.execute(&ctx, target).await?;
        self.service().session().set_catalog(catalog.to_string());
        Ok(())
    }

    pub fn get_catalog(&self) -> Option<String> {
        self.service()
            .session()
            .state()
            .catalog
            .value
            .or_else(|| self.container.config.database.clone())
    }

    /// PostgreSQL only; MySQL drivers report the method as unsupported.
    pub async fn set_schema(&self, schema: &str) -> Result<(), WrapperError> {
        let session = self.service().session();
        if let Some(current) = self.get_schema() {
            session.setup_pristine_schema(current);
        }

        let service = self.service().clone();
        let owned = schema.to_string();
        let ctx = ExecuteContext::with_args("setSchema", json!(schema));
        let target: TargetOperation = Arc::new(move || {
            let service = service.clone();
            let schema = owned.clone();
            Box::pin(async move {
                let client = service
                    .current_client()
                    .ok_or_else(|| WrapperError::Internal("No current client".into()))?;
                client.client.set_schema(&schema).await?;
                Ok(Value::Null)
            })
        });
        self.container.manager.execute(&ctx, target).await?;
        self.service().session().set_schema(schema.to_string());
        Ok(())
    }

    pub fn get_schema(&self) -> Option<String> {
        self.service().session().state().schema.value
    }

    pub async fn set_transaction_isolation(&self, level: &str) -> Result<(), WrapperError> {
        let parsed = TransactionIsolationLevel::from_str(level).map_err(|_| {
            WrapperError::IllegalArgument(format!("Unknown transaction isolation level '{level}'"))
        })?;
        let service = self.service().clone();
        let ctx = ExecuteContext::with_args("setTransactionIsolation", json!(level));
        let target: TargetOperation = Arc::new(move || {
            let service = service.clone();
            Box::pin(async move {
                let client = service
                    .current_client()
                    .ok_or_else(|| WrapperError::Internal("No current client".into()))?;
                client.client.set_transaction_isolation(parsed).await?;
                Ok(Value::Null)
            })
        });
        self.container.manager.execute(&ctx, target).await?;
        self.service().session().set_transaction_isolation(parsed);
        Ok(())
    }

    pub fn get_transaction_isolation(&self) -> Option<TransactionIsolationLevel> {
        self.service().session().state().transaction_isolation.value
    }

    pub async fn is_valid(&self) -> bool {
        match self.service().current_client() {
            Some(client) => client.is_valid().await,
            None => false,
        }
    }

    /// Closes the connection: pristine session state is restored on the
    /// current client before the driver connection ends.
    pub async fn end(&self) -> Result<(), WrapperError> {
        if let Some(client) = self.service().current_client() {
            if let Err(e) = self
                .service()
                .session()
                .apply_pristine_session_state(&client.client)
                .await
            {
                tracing::debug!("Could not restore pristine state on close: {}", e);
            }
            client.end().await?;
        }
        self.container.storage.stop_sweeper().await;
        Ok(())
    }

    /// The service container, for advanced integrations and tests.
    pub fn container(&self) -> &Arc<ServiceContainer> {
        &self.container
    }
}
