#![allow(dead_code)]

//! Shared mock driver fixtures for the integration tests.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{Value, json};
use shepherd::config::ConfigProps;
use shepherd::core::dialect::TransactionIsolationLevel;
use shepherd::core::driver::{ClientWrapper, ConnectionProvider, TargetClient};
use shepherd::core::errors::WrapperError;
use shepherd::core::host::HostInfo;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Scripted driver client. Queries are answered by the first registered rule
/// whose key is a substring of the statement.
pub struct MockTargetClient {
    pub name: String,
    responses: Mutex<Vec<(String, Result<Vec<Value>, WrapperError>)>>,
    pub query_log: Mutex<Vec<String>>,
    pub valid: AtomicBool,
    pub closed: AtomicBool,
    pub read_only: Mutex<Option<bool>>,
    pub auto_commit: Mutex<Option<bool>>,
    pub catalog: Mutex<Option<String>>,
    pub schema: Mutex<Option<String>>,
    pub isolation: Mutex<Option<TransactionIsolationLevel>>,
    pub unsupported: Mutex<HashSet<&'static str>>,
    pub tracked_error: Mutex<Option<WrapperError>>,
}

impl MockTargetClient {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            responses: Mutex::new(Vec::new()),
            query_log: Mutex::new(Vec::new()),
            valid: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            read_only: Mutex::new(None),
            auto_commit: Mutex::new(None),
            catalog: Mutex::new(None),
            schema: Mutex::new(None),
            isolation: Mutex::new(None),
            unsupported: Mutex::new(HashSet::new()),
            tracked_error: Mutex::new(None),
        })
    }

    /// Registers rows for statements containing `sql_part`. Earlier rules win.
    pub fn with_rows(&self, sql_part: &str, rows: Vec<Value>) {
        self.responses.lock().push((sql_part.to_string(), Ok(rows)));
    }

    pub fn with_error(&self, sql_part: &str, error: WrapperError) {
        self.responses
            .lock()
            .push((sql_part.to_string(), Err(error)));
    }

    /// Replaces the first rule matching `sql_part`, or prepends one.
    pub fn replace_rows(&self, sql_part: &str, rows: Vec<Value>) {
        self.replace_response(sql_part, Ok(rows));
    }

    /// Replaces the first rule matching `sql_part` with an error.
    pub fn replace_error(&self, sql_part: &str, error: WrapperError) {
        self.replace_response(sql_part, Err(error));
    }

    fn replace_response(&self, sql_part: &str, response: Result<Vec<Value>, WrapperError>) {
        let mut responses = self.responses.lock();
        if let Some(entry) = responses.iter_mut().find(|(key, _)| key == sql_part) {
            entry.1 = response;
        } else {
            responses.insert(0, (sql_part.to_string(), response));
        }
    }

    pub fn mark_unsupported(&self, method: &'static str) {
        self.unsupported.lock().insert(method);
    }

    pub fn queries_containing(&self, part: &str) -> usize {
        self.query_log
            .lock()
            .iter()
            .filter(|sql| sql.contains(part))
            .count()
    }
}

#[async_trait]
impl TargetClient for MockTargetClient {
    async fn query(&self, sql: &str) -> Result<Vec<Value>, WrapperError> {
        self.query_log.lock().push(sql.to_string());
        let responses = self.responses.lock();
        for (part, result) in responses.iter() {
            if sql.contains(part.as_str()) {
                return result.clone();
            }
        }
        Err(WrapperError::Database(format!(
            "[{}] unexpected query: {sql}",
            self.name
        )))
    }

    async fn end(&self) -> Result<(), WrapperError> {
        self.closed.store(true, Ordering::SeqCst);
        self.valid.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), WrapperError> {
        Ok(())
    }

    async fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    async fn set_read_only(&self, read_only: bool) -> Result<(), WrapperError> {
        if self.unsupported.lock().contains("setReadOnly") {
            return Err(WrapperError::UnsupportedMethod("setReadOnly".into()));
        }
        *self.read_only.lock() = Some(read_only);
        Ok(())
    }

    async fn set_auto_commit(&self, auto_commit: bool) -> Result<(), WrapperError> {
        if self.unsupported.lock().contains("setAutoCommit") {
            return Err(WrapperError::UnsupportedMethod("setAutoCommit".into()));
        }
        *self.auto_commit.lock() = Some(auto_commit);
        Ok(())
    }

    async fn set_catalog(&self, catalog: &str) -> Result<(), WrapperError> {
        if self.unsupported.lock().contains("setCatalog") {
            return Err(WrapperError::UnsupportedMethod("setCatalog".into()));
        }
        *self.catalog.lock() = Some(catalog.to_string());
        Ok(())
    }

    async fn set_schema(&self, schema: &str) -> Result<(), WrapperError> {
        if self.unsupported.lock().contains("setSchema") {
            return Err(WrapperError::UnsupportedMethod("setSchema".into()));
        }
        *self.schema.lock() = Some(schema.to_string());
        Ok(())
    }

    async fn set_transaction_isolation(
        &self,
        level: TransactionIsolationLevel,
    ) -> Result<(), WrapperError> {
        if self.unsupported.lock().contains("setTransactionIsolation") {
            return Err(WrapperError::UnsupportedMethod(
                "setTransactionIsolation".into(),
            ));
        }
        *self.isolation.lock() = Some(level);
        Ok(())
    }

    fn take_tracked_error(&self) -> Option<WrapperError> {
        self.tracked_error.lock().take()
    }
}

/// One connect attempt as seen by the mock provider.
#[derive(Debug, Clone)]
pub struct ConnectAttempt {
    pub host: String,
    pub url: String,
    pub iam_host: Option<String>,
}

/// Scripted connection provider keyed by lowercased host name.
pub struct MockConnectionProvider {
    clients: DashMap<String, Arc<MockTargetClient>>,
    failures: DashMap<String, WrapperError>,
    pub connect_log: Mutex<Vec<ConnectAttempt>>,
}

impl MockConnectionProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clients: DashMap::new(),
            failures: DashMap::new(),
            connect_log: Mutex::new(Vec::new()),
        })
    }

    pub fn register(&self, host: &str, client: Arc<MockTargetClient>) {
        self.clients.insert(host.to_lowercase(), client);
    }

    pub fn fail_host(&self, host: &str, error: WrapperError) {
        self.failures.insert(host.to_lowercase(), error);
    }

    pub fn clear_failure(&self, host: &str) {
        self.failures.remove(&host.to_lowercase());
    }

    pub fn connects_to(&self, host: &str) -> usize {
        self.connect_log
            .lock()
            .iter()
            .filter(|attempt| attempt.host == host.to_lowercase())
            .count()
    }
}

#[async_trait]
impl ConnectionProvider for MockConnectionProvider {
    async fn connect(
        &self,
        host_info: &HostInfo,
        config: &shepherd::config::WrapperConfig,
    ) -> Result<Arc<ClientWrapper>, WrapperError> {
        let key = host_info.host.to_lowercase();
        self.connect_log.lock().push(ConnectAttempt {
            host: key.clone(),
            url: host_info.url(),
            iam_host: config.iam_host.clone(),
        });
        if let Some(error) = self.failures.get(&key) {
            return Err(error.clone());
        }
        let client = self
            .clients
            .get(&key)
            .map(|entry| entry.clone())
            .unwrap_or_else(|| MockTargetClient::new(key.clone()));
        Ok(Arc::new(ClientWrapper::new(
            client,
            host_info.clone(),
            config.clone(),
        )))
    }
}

// --- row builders matching the Aurora PostgreSQL dialect queries ---

pub fn topology_rows(specs: &[(&str, bool, u64)]) -> Vec<Value> {
    specs
        .iter()
        .map(|(host_id, is_writer, last_update)| {
            json!({
                "host_id": host_id,
                "is_writer": is_writer,
                "weight": 1,
                "last_update_time": last_update,
            })
        })
        .collect()
}

pub fn role_rows(is_reader: bool) -> Vec<Value> {
    vec![json!({ "is_reader": is_reader })]
}

pub fn instance_id_rows(instance_id: &str) -> Vec<Value> {
    vec![json!({ "instance_id": instance_id })]
}

pub fn blue_green_status_rows(rows: &[(&str, &str, u16, &str, &str)]) -> Vec<Value> {
    rows.iter()
        .map(|(version, endpoint, port, role, status)| {
            json!({
                "version": version,
                "endpoint": endpoint,
                "port": port,
                "role": role,
                "status": status,
            })
        })
        .collect()
}

/// A base property map for one host.
pub fn props(host: &str) -> ConfigProps {
    let mut map = HashMap::new();
    map.insert("host".to_string(), host.to_string());
    map.insert("port".to_string(), "5432".to_string());
    map.insert("user".to_string(), "app".to_string());
    map
}

pub fn host(name: &str, port: i32) -> HostInfo {
    HostInfo::builder().host(name).port(port).build().unwrap()
}

/// An Aurora-flavored mock client: answers the topology, role, instance-id
/// and alias queries.
pub fn aurora_client(
    name: &str,
    topology: &[(&str, bool, u64)],
    is_reader: bool,
) -> Arc<MockTargetClient> {
    let client = MockTargetClient::new(name);
    client.with_rows(
        "FROM aurora_replica_status() WHERE session_id",
        match topology.iter().find(|(_, is_writer, _)| *is_writer) {
            Some((writer, _, _)) => vec![json!({ "writer_id": writer })],
            None => vec![],
        },
    );
    client.with_rows("FROM aurora_replica_status()", topology_rows(topology));
    client.with_rows("pg_is_in_recovery", role_rows(is_reader));
    client.with_rows("aurora_db_instance_identifier", instance_id_rows(name));
    client.with_rows("inet_server_addr", vec![]);
    client
}
