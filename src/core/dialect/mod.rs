// src/core/dialect/mod.rs

//! Database dialects: the capability objects encoding the SQL and semantics
//! differences among the supported engines and their managed-cluster variants,
//! plus the manager that picks and refines the dialect for a connection.

pub mod mysql;
pub mod postgres;

use crate::config::WrapperConfig;
use crate::core::driver::TargetClient;
use crate::core::errors::WrapperError;
use crate::core::host::HostRole;
use crate::core::rds::{self, RdsUrlType};
use crate::core::storage::ExpirationCache;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use strum_macros::{Display, EnumString};
use tracing::debug;

pub use mysql::{AuroraMysqlDialect, MysqlDialect, RdsMysqlDialect};
pub use postgres::{AuroraPgDialect, PgDialect, RdsPgDialect};

/// How long a host-to-dialect memoization stays valid.
const ENDPOINT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// The supported database flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum DatabaseType {
    Postgres,
    Mysql,
}

/// Identifies one concrete dialect implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum DialectCode {
    AuroraPg,
    RdsPg,
    Pg,
    AuroraMysql,
    RdsMysql,
    Mysql,
}

/// Standard transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionIsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Transaction-boundary classification of one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionBoundary {
    Starts,
    Commits,
    RollsBack,
    None,
}

/// One row of the dialect's topology query, normalized to canonical columns.
#[derive(Debug, Clone)]
pub struct TopologyRow {
    pub host_id: String,
    pub is_writer: bool,
    pub weight: i32,
    pub last_update_time: u128,
    pub port: Option<u16>,
    pub endpoint: Option<String>,
}

/// One row of the in-database Blue/Green status table.
#[derive(Debug, Clone)]
pub struct BlueGreenRow {
    pub version: String,
    pub endpoint: String,
    pub port: u16,
    pub role: String,
    pub status: String,
}

/// Cluster-topology capabilities, present on dialects that can observe the
/// cluster from within the database.
#[async_trait]
pub trait TopologyAwareDialect: Send + Sync {
    async fn query_for_topology(
        &self,
        client: &Arc<dyn TargetClient>,
    ) -> Result<Vec<TopologyRow>, WrapperError>;

    async fn host_role(&self, client: &Arc<dyn TargetClient>) -> Result<HostRole, WrapperError>;

    async fn writer_id(
        &self,
        client: &Arc<dyn TargetClient>,
    ) -> Result<Option<String>, WrapperError>;

    async fn instance_id(
        &self,
        client: &Arc<dyn TargetClient>,
    ) -> Result<Option<String>, WrapperError>;
}

/// Blue/Green status-table capabilities.
#[async_trait]
pub trait BlueGreenDialect: Send + Sync {
    async fn blue_green_status_available(&self, client: &Arc<dyn TargetClient>) -> bool;

    async fn blue_green_status(
        &self,
        client: &Arc<dyn TargetClient>,
    ) -> Result<Vec<BlueGreenRow>, WrapperError>;
}

/// The capability set every dialect provides.
#[async_trait]
pub trait DatabaseDialect: Send + Sync {
    fn code(&self) -> DialectCode;

    fn database_type(&self) -> DatabaseType;

    fn default_port(&self) -> u16;

    /// More specific dialects worth probing after a connection exists, most
    /// specific first.
    fn update_candidates(&self) -> &[DialectCode];

    /// Probes whether a live connection belongs to this dialect.
    async fn is_dialect(&self, client: &Arc<dyn TargetClient>) -> bool;

    async fn is_client_valid(&self, client: &Arc<dyn TargetClient>) -> bool {
        client.is_valid().await
    }

    /// Best-effort close of a client that is being abandoned.
    async fn try_closing_target_client(&self, client: &Arc<dyn TargetClient>) {
        if let Err(e) = client.end().await {
            debug!("Ignoring error while closing abandoned client: {}", e);
        }
    }

    async fn rollback(&self, client: &Arc<dyn TargetClient>) -> Result<(), WrapperError> {
        client.rollback().await
    }

    /// The query returning one row per alias with an `alias` column.
    fn host_alias_query(&self) -> &'static str;

    async fn host_aliases(
        &self,
        client: &Arc<dyn TargetClient>,
    ) -> Result<HashSet<String>, WrapperError> {
        let rows = client.query(self.host_alias_query()).await?;
        Ok(rows
            .iter()
            .filter_map(|row| value_as_str(row.get("alias")?))
            .map(|alias| alias.to_lowercase())
            .collect())
    }

    // --- statement classifiers ---

    fn statement_sets_auto_commit(&self, sql: &str) -> Option<bool> {
        let captures = AUTO_COMMIT_PATTERN.captures(sql)?;
        parse_bool_token(&captures[2])
    }

    fn statement_sets_read_only(&self, sql: &str) -> Option<bool> {
        if READ_ONLY_PATTERN.is_match(sql) {
            Some(true)
        } else if READ_WRITE_PATTERN.is_match(sql) {
            Some(false)
        } else {
            None
        }
    }

    fn statement_sets_catalog(&self, _sql: &str) -> Option<String> {
        None
    }

    fn statement_sets_schema(&self, _sql: &str) -> Option<String> {
        None
    }

    fn statement_sets_transaction_isolation(&self, sql: &str) -> Option<TransactionIsolationLevel> {
        let captures = ISOLATION_PATTERN.captures(sql)?;
        let level = captures[2].to_uppercase().split_whitespace().collect::<Vec<_>>().join("_");
        TransactionIsolationLevel::from_str(&level).ok()
    }

    fn transaction_boundary(&self, sql: &str) -> TransactionBoundary {
        if BEGIN_PATTERN.is_match(sql) {
            TransactionBoundary::Starts
        } else if COMMIT_PATTERN.is_match(sql) {
            TransactionBoundary::Commits
        } else if ROLLBACK_PATTERN.is_match(sql) {
            TransactionBoundary::RollsBack
        } else {
            TransactionBoundary::None
        }
    }

    // --- capability accessors ---

    fn topology(&self) -> Option<&dyn TopologyAwareDialect> {
        None
    }

    fn blue_green(&self) -> Option<&dyn BlueGreenDialect> {
        None
    }
}

static AUTO_COMMIT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*SET\s+(SESSION\s+)?AUTOCOMMIT\s*=\s*(\S+)").expect("valid pattern")
});
static READ_ONLY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*SET\s+(SESSION\s+)?(CHARACTERISTICS\s+AS\s+)?TRANSACTION\s+READ\s+ONLY")
        .expect("valid pattern")
});
static READ_WRITE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*SET\s+(SESSION\s+)?(CHARACTERISTICS\s+AS\s+)?TRANSACTION\s+READ\s+WRITE")
        .expect("valid pattern")
});
static ISOLATION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)SET\s+(SESSION\s+)?TRANSACTION\s+ISOLATION\s+LEVEL\s+(READ\s+UNCOMMITTED|READ\s+COMMITTED|REPEATABLE\s+READ|SERIALIZABLE)",
    )
    .expect("valid pattern")
});
static BEGIN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(BEGIN|START\s+TRANSACTION)\b").expect("valid pattern"));
static COMMIT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(COMMIT|END)\b").expect("valid pattern"));
static ROLLBACK_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(ROLLBACK|ABORT)\b").expect("valid pattern"));

fn parse_bool_token(token: &str) -> Option<bool> {
    match token.trim_end_matches(';').to_lowercase().as_str() {
        "1" | "true" | "on" => Some(true),
        "0" | "false" | "off" => Some(false),
        _ => None,
    }
}

// --- row value helpers shared by the concrete dialects ---

pub(crate) fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => Some(n.as_i64()? != 0),
        Value::String(s) => parse_bool_token(s),
        _ => None,
    }
}

pub(crate) fn value_as_str(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn value_as_u128(value: &Value) -> Option<u128> {
    match value {
        Value::Number(n) => Some(n.as_u64()? as u128),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub(crate) fn value_as_i32(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => Some(n.as_i64()? as i32),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Normalizes raw topology rows. Rows without a host id are skipped.
pub(crate) fn parse_topology_rows(rows: &[Value]) -> Vec<TopologyRow> {
    rows.iter()
        .filter_map(|row| {
            let host_id = value_as_str(row.get("host_id")?)?;
            Some(TopologyRow {
                host_id,
                is_writer: row.get("is_writer").and_then(value_as_bool).unwrap_or(false),
                weight: row
                    .get("weight")
                    .and_then(value_as_i32)
                    .unwrap_or(crate::core::host::DEFAULT_WEIGHT),
                last_update_time: row
                    .get("last_update_time")
                    .and_then(value_as_u128)
                    .unwrap_or_else(crate::core::host::now_nanos),
                port: row
                    .get("port")
                    .and_then(value_as_i32)
                    .and_then(|p| u16::try_from(p).ok()),
                endpoint: row.get("endpoint").and_then(value_as_str),
            })
        })
        .collect()
}

/// Normalizes raw Blue/Green status rows.
pub(crate) fn parse_blue_green_rows(rows: &[Value]) -> Vec<BlueGreenRow> {
    rows.iter()
        .filter_map(|row| {
            Some(BlueGreenRow {
                version: value_as_str(row.get("version")?)?,
                endpoint: value_as_str(row.get("endpoint")?)?.to_lowercase(),
                port: row
                    .get("port")
                    .and_then(value_as_i32)
                    .and_then(|p| u16::try_from(p).ok())?,
                role: value_as_str(row.get("role")?)?,
                status: value_as_str(row.get("status")?)?,
            })
        })
        .collect()
}

/// Builds the dialect object for a code.
pub fn dialect_for_code(code: DialectCode) -> Arc<dyn DatabaseDialect> {
    match code {
        DialectCode::AuroraPg => Arc::new(AuroraPgDialect::new()),
        DialectCode::RdsPg => Arc::new(RdsPgDialect::new()),
        DialectCode::Pg => Arc::new(PgDialect::new()),
        DialectCode::AuroraMysql => Arc::new(AuroraMysqlDialect::new()),
        DialectCode::RdsMysql => Arc::new(RdsMysqlDialect::new()),
        DialectCode::Mysql => Arc::new(MysqlDialect::new()),
    }
}

/// Picks the initial dialect for a URL and refines it once a live client is
/// available.
pub struct DialectManager {
    db_type: DatabaseType,
    custom: Option<Arc<dyn DatabaseDialect>>,
    /// host url -> confirmed dialect code, memoized for a day.
    endpoint_cache: ExpirationCache<String, DialectCode>,
}

impl DialectManager {
    pub fn new(db_type: DatabaseType, custom: Option<Arc<dyn DatabaseDialect>>) -> Self {
        Self {
            db_type,
            custom,
            endpoint_cache: ExpirationCache::new(ENDPOINT_CACHE_TTL, false),
        }
    }

    /// Initial decision, before any connection exists:
    /// custom dialect > user-named code > endpoint cache > URL shape.
    pub fn initial_dialect(
        &self,
        host: &str,
        config: &WrapperConfig,
    ) -> Result<Arc<dyn DatabaseDialect>, WrapperError> {
        if let Some(custom) = &self.custom {
            return Ok(custom.clone());
        }
        if let Some(named) = &config.dialect {
            let code = DialectCode::from_str(named).map_err(|_| {
                WrapperError::IllegalArgument(format!("Unknown dialect '{named}'"))
            })?;
            return Ok(dialect_for_code(code));
        }
        if let Some(code) = self.endpoint_cache.get(&host.to_lowercase()) {
            return Ok(dialect_for_code(code));
        }

        let url_type = rds::identify_rds_url_type(host);
        let code = match (self.db_type, url_type) {
            (DatabaseType::Postgres, t) if t.is_cluster_dns() => DialectCode::AuroraPg,
            (DatabaseType::Postgres, RdsUrlType::InstanceDns | RdsUrlType::ClusterCustomDns) => {
                DialectCode::RdsPg
            }
            (DatabaseType::Postgres, _) => DialectCode::Pg,
            (DatabaseType::Mysql, t) if t.is_cluster_dns() => DialectCode::AuroraMysql,
            (DatabaseType::Mysql, RdsUrlType::InstanceDns | RdsUrlType::ClusterCustomDns) => {
                DialectCode::RdsMysql
            }
            (DatabaseType::Mysql, _) => DialectCode::Mysql,
        };
        Ok(dialect_for_code(code))
    }

    /// Probes the current dialect's update candidates against a live client
    /// and memoizes the confirmed code under both host names.
    pub async fn dialect_for_update(
        &self,
        current: &Arc<dyn DatabaseDialect>,
        client: &Arc<dyn TargetClient>,
        old_host: &str,
        new_host: &str,
    ) -> Arc<dyn DatabaseDialect> {
        for code in current.update_candidates() {
            let candidate = dialect_for_code(*code);
            if candidate.is_dialect(client).await {
                debug!(
                    "Dialect refined from '{}' to '{}'.",
                    current.code(),
                    candidate.code()
                );
                self.endpoint_cache.put(old_host.to_lowercase(), *code);
                self.endpoint_cache.put(new_host.to_lowercase(), *code);
                return candidate;
            }
        }
        current.clone()
    }

    pub fn database_type(&self) -> DatabaseType {
        self.db_type
    }
}
