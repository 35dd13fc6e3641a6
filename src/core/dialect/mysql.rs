// src/core/dialect/mysql.rs

//! MySQL dialects: community, RDS and Aurora.

use super::{
    BlueGreenDialect, BlueGreenRow, DatabaseDialect, DatabaseType, DialectCode,
    TopologyAwareDialect, TopologyRow, parse_blue_green_rows, parse_topology_rows, value_as_bool,
    value_as_str,
};
use crate::core::driver::TargetClient;
use crate::core::errors::WrapperError;
use crate::core::host::HostRole;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

const MYSQL_DEFAULT_PORT: u16 = 3306;

const MYSQL_PROBE_QUERY: &str =
    "SELECT @@version_comment AS version_comment";

const RDS_MYSQL_PROBE_QUERY: &str =
    "SELECT @@version_comment AS version_comment, @@version AS version";

const AURORA_MYSQL_PROBE_QUERY: &str = "SELECT count(*) > 0 AS has_aurora \
     FROM information_schema.tables \
     WHERE table_schema = 'information_schema' AND table_name = 'replica_host_status'";

const MYSQL_HOST_ALIAS_QUERY: &str = "SELECT CONCAT(@@hostname, ':', @@port) AS alias";

const AURORA_MYSQL_TOPOLOGY_QUERY: &str = "SELECT server_id AS host_id, \
     IF(session_id = 'MASTER_SESSION_ID', true, false) AS is_writer, \
     LEAST(GREATEST(ROUND(coalesce(replica_lag_in_milliseconds, 0)), 1), 10) AS weight, \
     CAST(UNIX_TIMESTAMP(last_update_timestamp) * 1000000000 AS UNSIGNED) AS last_update_time \
     FROM information_schema.replica_host_status \
     WHERE time_to_sec(timediff(now(), last_update_timestamp)) <= 300 \
        OR session_id = 'MASTER_SESSION_ID'";

const MYSQL_HOST_ROLE_QUERY: &str = "SELECT @@innodb_read_only AS is_reader";

const AURORA_MYSQL_WRITER_ID_QUERY: &str = "SELECT server_id AS writer_id \
     FROM information_schema.replica_host_status WHERE session_id = 'MASTER_SESSION_ID'";

const AURORA_MYSQL_INSTANCE_ID_QUERY: &str = "SELECT @@aurora_server_id AS instance_id";

const MYSQL_BLUE_GREEN_AVAILABLE_QUERY: &str = "SELECT count(*) > 0 AS available \
     FROM information_schema.tables WHERE table_schema = 'mysql' AND table_name = 'rds_topology'";

const MYSQL_BLUE_GREEN_STATUS_QUERY: &str =
    "SELECT version, endpoint, port, role, status FROM mysql.rds_topology";

static USE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*USE\s+`?([^`;\s]+)").expect("valid pattern"));

/// Community MySQL.
pub struct MysqlDialect {
    update_candidates: Vec<DialectCode>,
}

impl MysqlDialect {
    pub fn new() -> Self {
        Self {
            update_candidates: vec![DialectCode::AuroraMysql, DialectCode::RdsMysql],
        }
    }
}

impl Default for MysqlDialect {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseDialect for MysqlDialect {
    fn code(&self) -> DialectCode {
        DialectCode::Mysql
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mysql
    }

    fn default_port(&self) -> u16 {
        MYSQL_DEFAULT_PORT
    }

    fn update_candidates(&self) -> &[DialectCode] {
        &self.update_candidates
    }

    async fn is_dialect(&self, client: &Arc<dyn TargetClient>) -> bool {
        let Ok(rows) = client.query(MYSQL_PROBE_QUERY).await else {
            return false;
        };
        rows.first()
            .and_then(|row| row.get("version_comment"))
            .and_then(value_as_str)
            .map(|comment| comment.to_lowercase().contains("mysql"))
            .unwrap_or(false)
    }

    fn host_alias_query(&self) -> &'static str {
        MYSQL_HOST_ALIAS_QUERY
    }

    fn statement_sets_catalog(&self, sql: &str) -> Option<String> {
        USE_PATTERN
            .captures(sql)
            .map(|captures| captures[1].to_string())
    }
}

/// RDS MySQL (non-Aurora).
pub struct RdsMysqlDialect {
    update_candidates: Vec<DialectCode>,
}

impl RdsMysqlDialect {
    pub fn new() -> Self {
        Self {
            update_candidates: vec![DialectCode::AuroraMysql],
        }
    }
}

impl Default for RdsMysqlDialect {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseDialect for RdsMysqlDialect {
    fn code(&self) -> DialectCode {
        DialectCode::RdsMysql
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mysql
    }

    fn default_port(&self) -> u16 {
        MYSQL_DEFAULT_PORT
    }

    fn update_candidates(&self) -> &[DialectCode] {
        &self.update_candidates
    }

    async fn is_dialect(&self, client: &Arc<dyn TargetClient>) -> bool {
        let Ok(rows) = client.query(RDS_MYSQL_PROBE_QUERY).await else {
            return false;
        };
        // RDS builds report "Source distribution" and carry no Aurora tables.
        rows.first()
            .and_then(|row| row.get("version_comment"))
            .and_then(value_as_str)
            .map(|comment| comment.to_lowercase().contains("source distribution"))
            .unwrap_or(false)
    }

    fn host_alias_query(&self) -> &'static str {
        MYSQL_HOST_ALIAS_QUERY
    }

    fn statement_sets_catalog(&self, sql: &str) -> Option<String> {
        USE_PATTERN
            .captures(sql)
            .map(|captures| captures[1].to_string())
    }
}

/// Aurora MySQL: topology-aware and Blue/Green capable.
pub struct AuroraMysqlDialect;

impl AuroraMysqlDialect {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AuroraMysqlDialect {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseDialect for AuroraMysqlDialect {
    fn code(&self) -> DialectCode {
        DialectCode::AuroraMysql
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mysql
    }

    fn default_port(&self) -> u16 {
        MYSQL_DEFAULT_PORT
    }

    fn update_candidates(&self) -> &[DialectCode] {
        &[]
    }

    async fn is_dialect(&self, client: &Arc<dyn TargetClient>) -> bool {
        let Ok(rows) = client.query(AURORA_MYSQL_PROBE_QUERY).await else {
            return false;
        };
        rows.first()
            .and_then(|row| row.get("has_aurora"))
            .and_then(value_as_bool)
            .unwrap_or(false)
    }

    fn host_alias_query(&self) -> &'static str {
        MYSQL_HOST_ALIAS_QUERY
    }

    fn statement_sets_catalog(&self, sql: &str) -> Option<String> {
        USE_PATTERN
            .captures(sql)
            .map(|captures| captures[1].to_string())
    }

    fn topology(&self) -> Option<&dyn TopologyAwareDialect> {
        Some(self)
    }

    fn blue_green(&self) -> Option<&dyn BlueGreenDialect> {
        Some(self)
    }
}

#[async_trait]
impl TopologyAwareDialect for AuroraMysqlDialect {
    async fn query_for_topology(
        &self,
        client: &Arc<dyn TargetClient>,
    ) -> Result<Vec<TopologyRow>, WrapperError> {
        let rows = client.query(AURORA_MYSQL_TOPOLOGY_QUERY).await?;
        Ok(parse_topology_rows(&rows))
    }

    async fn host_role(&self, client: &Arc<dyn TargetClient>) -> Result<HostRole, WrapperError> {
        let rows = client.query(MYSQL_HOST_ROLE_QUERY).await?;
        let is_reader = rows
            .first()
            .and_then(|row| row.get("is_reader"))
            .and_then(value_as_bool)
            .ok_or_else(|| {
                WrapperError::Internal("Host role query returned no usable row".into())
            })?;
        Ok(if is_reader {
            HostRole::Reader
        } else {
            HostRole::Writer
        })
    }

    async fn writer_id(
        &self,
        client: &Arc<dyn TargetClient>,
    ) -> Result<Option<String>, WrapperError> {
        let rows = client.query(AURORA_MYSQL_WRITER_ID_QUERY).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("writer_id"))
            .and_then(value_as_str))
    }

    async fn instance_id(
        &self,
        client: &Arc<dyn TargetClient>,
    ) -> Result<Option<String>, WrapperError> {
        let rows = client.query(AURORA_MYSQL_INSTANCE_ID_QUERY).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("instance_id"))
            .and_then(value_as_str))
    }
}

#[async_trait]
impl BlueGreenDialect for AuroraMysqlDialect {
    async fn blue_green_status_available(&self, client: &Arc<dyn TargetClient>) -> bool {
        let Ok(rows) = client.query(MYSQL_BLUE_GREEN_AVAILABLE_QUERY).await else {
            return false;
        };
        rows.first()
            .and_then(|row| row.get("available"))
            .and_then(value_as_bool)
            .unwrap_or(false)
    }

    async fn blue_green_status(
        &self,
        client: &Arc<dyn TargetClient>,
    ) -> Result<Vec<BlueGreenRow>, WrapperError> {
        let rows = client.query(MYSQL_BLUE_GREEN_STATUS_QUERY).await?;
        Ok(parse_blue_green_rows(&rows))
    }
}
