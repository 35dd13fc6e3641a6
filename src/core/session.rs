// src/core/session.rs

//! Session-state capture and transfer: remembers the pristine value of each
//! tracked setting the first time the user changes it, copies the user's
//! current values onto a replacement client, and restores pristine values when
//! a client is retired.

use crate::config::WrapperConfig;
use crate::core::dialect::TransactionIsolationLevel;
use crate::core::driver::TargetClient;
use crate::core::errors::WrapperError;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// One tracked setting: the user's current intent and the value the client
/// had before the user's first change.
#[derive(Debug, Clone)]
pub struct SessionStateField<T: Clone> {
    pub value: Option<T>,
    pub pristine: Option<T>,
}

impl<T: Clone> Default for SessionStateField<T> {
    fn default() -> Self {
        Self {
            value: None,
            pristine: None,
        }
    }
}

impl<T: Clone + PartialEq> SessionStateField<T> {
    /// A pristine value can be restored when it was captured and the user has
    /// since moved the setting away from it.
    pub fn can_restore_pristine(&self) -> bool {
        match (&self.pristine, &self.value) {
            (Some(pristine), Some(value)) => pristine != value,
            (Some(_), None) => false,
            _ => false,
        }
    }
}

/// The five tracked settings.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub auto_commit: SessionStateField<bool>,
    pub read_only: SessionStateField<bool>,
    pub catalog: SessionStateField<String>,
    pub schema: SessionStateField<String>,
    pub transaction_isolation: SessionStateField<TransactionIsolationLevel>,
}

/// Owns the session state for one logical client and performs the
/// transfer/restore protocol around client switches.
pub struct SessionStateService {
    state: Mutex<SessionState>,
    /// Snapshot taken by `begin()`, dropped by `complete()`.
    snapshot: Mutex<Option<SessionState>>,
    transfer_on_switch: bool,
    reset_on_close: bool,
}

impl SessionStateService {
    pub fn new(config: &WrapperConfig) -> Self {
        Self {
            state: Mutex::new(SessionState::default()),
            snapshot: Mutex::new(None),
            transfer_on_switch: config.transfer_session_state_on_switch,
            reset_on_close: config.reset_session_state_on_close,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().clone()
    }

    /// Opens a transfer scope. A second `begin` without `complete` is a
    /// protocol violation.
    pub fn begin(&self) -> Result<(), WrapperError> {
        let mut snapshot = self.snapshot.lock();
        if snapshot.is_some() {
            return Err(WrapperError::Internal(
                "Session state transfer is already in progress".into(),
            ));
        }
        *snapshot = Some(self.state.lock().clone());
        Ok(())
    }

    /// Closes the transfer scope opened by `begin`. Always called, on every
    /// exit path of a client switch.
    pub fn complete(&self) {
        *self.snapshot.lock() = None;
    }

    /// Discards all tracked state; used when a fresh client lifetime starts.
    pub fn reset(&self) {
        *self.state.lock() = SessionState::default();
    }

    // --- pristine capture (idempotent per client lifetime) ---

    pub fn setup_pristine_auto_commit(&self, value: bool) {
        let mut state = self.state.lock();
        if state.auto_commit.pristine.is_none() {
            state.auto_commit.pristine = Some(value);
        }
    }

    pub fn setup_pristine_read_only(&self, value: bool) {
        let mut state = self.state.lock();
        if state.read_only.pristine.is_none() {
            state.read_only.pristine = Some(value);
        }
    }

    pub fn setup_pristine_catalog(&self, value: String) {
        let mut state = self.state.lock();
        if state.catalog.pristine.is_none() {
            state.catalog.pristine = Some(value);
        }
    }

    pub fn setup_pristine_schema(&self, value: String) {
        let mut state = self.state.lock();
        if state.schema.pristine.is_none() {
            state.schema.pristine = Some(value);
        }
    }

    pub fn setup_pristine_transaction_isolation(&self, value: TransactionIsolationLevel) {
        let mut state = self.state.lock();
        if state.transaction_isolation.pristine.is_none() {
            state.transaction_isolation.pristine = Some(value);
        }
    }

    // --- user intent ---

    pub fn set_auto_commit(&self, value: bool) {
        self.state.lock().auto_commit.value = Some(value);
    }

    pub fn set_read_only(&self, value: bool) {
        self.state.lock().read_only.value = Some(value);
    }

    pub fn set_catalog(&self, value: String) {
        self.state.lock().catalog.value = Some(value);
    }

    pub fn set_schema(&self, value: String) {
        self.state.lock().schema.value = Some(value);
    }

    pub fn set_transaction_isolation(&self, value: TransactionIsolationLevel) {
        self.state.lock().transaction_isolation.value = Some(value);
    }

    /// Applies the user's current values to a replacement client. Unsupported
    /// setters are skipped; other failures propagate.
    pub async fn apply_current_session_state(
        &self,
        client: &Arc<dyn TargetClient>,
    ) -> Result<(), WrapperError> {
        if !self.transfer_on_switch {
            return Ok(());
        }
        let state = self.state();

        if let Some(auto_commit) = state.auto_commit.value {
            tolerate_unsupported(client.set_auto_commit(auto_commit).await)?;
        }
        if let Some(read_only) = state.read_only.value {
            tolerate_unsupported(client.set_read_only(read_only).await)?;
        }
        if let Some(catalog) = &state.catalog.value {
            tolerate_unsupported(client.set_catalog(catalog).await)?;
        }
        if let Some(schema) = &state.schema.value {
            tolerate_unsupported(client.set_schema(schema).await)?;
        }
        if let Some(level) = state.transaction_isolation.value {
            tolerate_unsupported(client.set_transaction_isolation(level).await)?;
        }
        Ok(())
    }

    /// Restores the pristine values on a client being retired.
    pub async fn apply_pristine_session_state(
        &self,
        client: &Arc<dyn TargetClient>,
    ) -> Result<(), WrapperError> {
        if !self.reset_on_close {
            return Ok(());
        }
        let state = self.state();

        if state.auto_commit.can_restore_pristine()
            && let Some(pristine) = state.auto_commit.pristine
        {
            tolerate_unsupported(client.set_auto_commit(pristine).await)?;
        }
        if state.read_only.can_restore_pristine()
            && let Some(pristine) = state.read_only.pristine
        {
            tolerate_unsupported(client.set_read_only(pristine).await)?;
        }
        if state.catalog.can_restore_pristine()
            && let Some(pristine) = &state.catalog.pristine
        {
            tolerate_unsupported(client.set_catalog(pristine).await)?;
        }
        if state.schema.can_restore_pristine()
            && let Some(pristine) = &state.schema.pristine
        {
            tolerate_unsupported(client.set_schema(pristine).await)?;
        }
        if state.transaction_isolation.can_restore_pristine()
            && let Some(pristine) = state.transaction_isolation.pristine
        {
            tolerate_unsupported(client.set_transaction_isolation(pristine).await)?;
        }
        Ok(())
    }
}

fn tolerate_unsupported(result: Result<(), WrapperError>) -> Result<(), WrapperError> {
    match result {
        Err(WrapperError::UnsupportedMethod(method)) => {
            debug!("Driver does not support '{}'; skipping transfer.", method);
            Ok(())
        }
        other => other,
    }
}
