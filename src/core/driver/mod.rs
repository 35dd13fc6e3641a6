// src/core/driver/mod.rs

//! The narrow contract the wrapper requires from an underlying driver, and the
//! wrapper-owned handle around one live connection.

use crate::config::WrapperConfig;
use crate::core::dialect::TransactionIsolationLevel;
use crate::core::errors::WrapperError;
use crate::core::host::HostInfo;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// The kinds of driver error listeners the wrapper can attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorListenerKind {
    /// Captures idle-time network errors for later inspection.
    Track,
    /// Swallows events without recording them.
    Noop,
}

/// Opaque handle for a previously attached error listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorListenerHandle(pub u64);

/// The operations the wrapper needs from a wire-level client. Rows cross this
/// seam as JSON objects keyed by column name; the driver adapter owns the
/// mapping from its native row type.
#[async_trait]
pub trait TargetClient: Send + Sync {
    async fn query(&self, sql: &str) -> Result<Vec<Value>, WrapperError>;

    async fn end(&self) -> Result<(), WrapperError>;

    async fn rollback(&self) -> Result<(), WrapperError>;

    async fn is_valid(&self) -> bool;

    async fn set_read_only(&self, _read_only: bool) -> Result<(), WrapperError> {
        Err(WrapperError::UnsupportedMethod("setReadOnly".into()))
    }

    async fn set_auto_commit(&self, _auto_commit: bool) -> Result<(), WrapperError> {
        Err(WrapperError::UnsupportedMethod("setAutoCommit".into()))
    }

    async fn set_catalog(&self, _catalog: &str) -> Result<(), WrapperError> {
        Err(WrapperError::UnsupportedMethod("setCatalog".into()))
    }

    async fn set_schema(&self, _schema: &str) -> Result<(), WrapperError> {
        Err(WrapperError::UnsupportedMethod("setSchema".into()))
    }

    async fn set_transaction_isolation(
        &self,
        _level: TransactionIsolationLevel,
    ) -> Result<(), WrapperError> {
        Err(WrapperError::UnsupportedMethod("setTransactionIsolation".into()))
    }

    /// Attaches a driver error listener. The wrapper never mutates driver
    /// listener arrays itself; this capability is the only channel.
    fn attach_error_listener(&self, _kind: ErrorListenerKind) -> ErrorListenerHandle {
        ErrorListenerHandle(0)
    }

    fn remove_error_listener(&self, _handle: ErrorListenerHandle) {}

    /// The most recent error delivered to a `Track` listener while the
    /// connection sat idle, if any.
    fn take_tracked_error(&self) -> Option<WrapperError> {
        None
    }
}

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// A live driver connection plus the host it resolved to and the properties it
/// was opened with. Owned exclusively by the plugin service once installed as
/// the current client.
pub struct ClientWrapper {
    pub client: Arc<dyn TargetClient>,
    pub host_info: HostInfo,
    pub config: WrapperConfig,
    id: u64,
}

impl ClientWrapper {
    pub fn new(client: Arc<dyn TargetClient>, host_info: HostInfo, config: WrapperConfig) -> Self {
        Self {
            client,
            host_info,
            config,
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Process-unique id; two wrappers around the same driver connection still
    /// compare different.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn is_valid(&self) -> bool {
        self.client.is_valid().await
    }

    /// Best-effort close. Errors are reported to the caller for logging only.
    pub async fn end(&self) -> Result<(), WrapperError> {
        self.client.end().await
    }
}

impl std::fmt::Debug for ClientWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientWrapper")
            .field("id", &self.id)
            .field("host", &self.host_info.url())
            .finish()
    }
}

/// Opens driver connections for a resolved host. Implemented by the
/// driver-specific adapter supplied at wrapper construction.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn connect(
        &self,
        host_info: &HostInfo,
        config: &WrapperConfig,
    ) -> Result<Arc<ClientWrapper>, WrapperError>;
}

/// Runs a driver call under the configured time budget. A budget of zero
/// disables the timer.
pub async fn query_with_timeout(
    client: &Arc<dyn TargetClient>,
    sql: &str,
    budget_ms: u64,
) -> Result<Vec<Value>, WrapperError> {
    if budget_ms == 0 {
        return client.query(sql).await;
    }
    match tokio::time::timeout(Duration::from_millis(budget_ms), client.query(sql)).await {
        Ok(result) => result,
        Err(_) => Err(WrapperError::InternalQueryTimeout),
    }
}
