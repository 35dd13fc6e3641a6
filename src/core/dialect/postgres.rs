// src/core/dialect/postgres.rs

//! PostgreSQL dialects: community, RDS and Aurora.

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

const PG_DEFAULT_PORT: u16 = 5432;

const PG_PROBE_QUERY: &str = "SELECT 1 AS connected FROM pg_proc LIMIT 1";

const RDS_EXTENSIONS_QUERY: &str = "SELECT (setting LIKE '%rds_tools%') AS rds_tools, \
     (setting LIKE '%aurora_stat_utils%') AS aurora_stat_utils \
     FROM pg_settings WHERE name = 'rds.extensions'";

const AURORA_PROBE_QUERY: &str =
    "SELECT count(*) > 0 AS has_aurora FROM pg_proc WHERE proname = 'aurora_replica_status'";

const PG_HOST_ALIAS_QUERY: &str =
    "SELECT concat(inet_server_addr(), ':', inet_server_port()) AS alias";

const AURORA_PG_TOPOLOGY_QUERY: &str = "SELECT server_id AS host_id, \
     CASE WHEN session_id = 'MASTER_SESSION_ID' THEN true ELSE false END AS is_writer, \
     least(greatest(round(coalesce(replica_lag_in_msec, 0))::int, 1), 10) AS weight, \
     round(extract(epoch FROM last_update_timestamp) * 1000000000)::bigint AS last_update_time \
     FROM aurora_replica_status() \
     WHERE extract(epoch FROM (now() - last_update_timestamp)) <= 300 \
        OR session_id = 'MASTER_SESSION_ID'";

const PG_HOST_ROLE_QUERY: &str = "SELECT pg_is_in_recovery() AS is_reader";

const AURORA_PG_WRITER_ID_QUERY: &str = "SELECT server_id AS writer_id \
     FROM aurora_replica_status() WHERE session_id = 'MASTER_SESSION_ID'";

const AURORA_PG_INSTANCE_ID_QUERY: &str =
    "SELECT aurora_db_instance_identifier() AS instance_id";

const PG_BLUE_GREEN_AVAILABLE_QUERY: &str = "SELECT count(*) > 0 AS available \
     FROM pg_proc WHERE proname = 'get_blue_green_fast_switchover_metadata'";

const PG_BLUE_GREEN_STATUS_QUERY: &str = "SELECT version, endpoint, port, role, status \
     FROM rds_tools.get_blue_green_fast_switchover_metadata('shepherd')";

static SEARCH_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^\s*SET\s+(SESSION\s+)?SEARCH_PATH\s*(=|TO)\s*['"]?([^'";]+)"#)
        .expect("valid pattern")
});

/// Community PostgreSQL.
pub struct PgDialect {
    update_candidates: Vec<DialectCode>,
}

impl PgDialect {
    pub fn new() -> Self {
        Self {
            update_candidates: vec![DialectCode::AuroraPg, DialectCode::RdsPg],
        }
    }
}

impl Default for PgDialect {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseDialect for PgDialect {
    fn code(&self) -> DialectCode {
        DialectCode::Pg
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    fn default_port(&self) -> u16 {
        PG_DEFAULT_PORT
    }

    fn update_candidates(&self) -> &[DialectCode] {
        &self.update_candidates
    }

    async fn is_dialect(&self, client: &Arc<dyn TargetClient>) -> bool {
        client.query(PG_PROBE_QUERY).await.is_ok()
    }

    fn host_alias_query(&self) -> &'static str {
        PG_HOST_ALIAS_QUERY
    }

    fn statement_sets_schema(&self, sql: &str) -> Option<String> {
        SEARCH_PATH_PATTERN
            .captures(sql)
            .map(|captures| captures[3].trim().to_string())
    }
}

/// RDS PostgreSQL (non-Aurora).
pub struct RdsPgDialect {
    update_candidates: Vec<DialectCode>,
}

impl RdsPgDialect {
    pub fn new() -> Self {
        Self {
            update_candidates: vec![DialectCode::AuroraPg],
        }
    }
}

impl Default for RdsPgDialect {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseDialect for RdsPgDialect {
    fn code(&self) -> DialectCode {
        DialectCode::RdsPg
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    fn default_port(&self) -> u16 {
        PG_DEFAULT_PORT
    }

    fn update_candidates(&self) -> &[DialectCode] {
        &self.update_candidates
    }

    async fn is_dialect(&self, client: &Arc<dyn TargetClient>) -> bool {
        let Ok(rows) = client.query(RDS_EXTENSIONS_QUERY).await else {
            return false;
        };
        let Some(row) = rows.first() else {
            return false;
        };
        let rds_tools = row.get("rds_tools").and_then(value_as_bool).unwrap_or(false);
        let aurora = row
            .get("aurora_stat_utils")
            .and_then(value_as_bool)
            .unwrap_or(false);
        rds_tools && !aurora
    }

    fn host_alias_query(&self) -> &'static str {
        PG_HOST_ALIAS_QUERY
    }

    fn statement_sets_schema(&self, sql: &str) -> Option<String> {
        SEARCH_PATH_PATTERN
            .captures(sql)
            .map(|captures| captures[3].trim().to_string())
    }
}

/// Aurora PostgreSQL: topology-aware and Blue/Green capable.
pub struct AuroraPgDialect;

impl AuroraPgDialect {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AuroraPgDialect {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseDialect for AuroraPgDialect {
    fn code(&self) -> DialectCode {
        DialectCode::AuroraPg
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    fn default_port(&self) -> u16 {
        PG_DEFAULT_PORT
    }

    fn update_candidates(&self) -> &[DialectCode] {
        &[]
    }

    async fn is_dialect(&self, client: &Arc<dyn TargetClient>) -> bool {
        let Ok(rows) = client.query(AURORA_PROBE_QUERY).await else {
            return false;
        };
        rows.first()
            .and_then(|row| row.get("has_aurora"))
            .and_then(value_as_bool)
            .unwrap_or(false)
    }

    fn host_alias_query(&self) -> &'static str {
        PG_HOST_ALIAS_QUERY
    }

    fn statement_sets_schema(&self, sql: &str) -> Option<String> {
        SEARCH_PATH_PATTERN
            .captures(sql)
            .map(|captures| captures[3].trim().to_string())
    }

    fn topology(&self) -> Option<&dyn TopologyAwareDialect> {
        Some(self)
    }

    fn blue_green(&self) -> Option<&dyn BlueGreenDialect> {
        Some(self)
    }
}

#[async_trait]
impl TopologyAwareDialect for AuroraPgDialect {
    async fn query_for_topology(
        &self,
        client: &Arc<dyn TargetClient>,
    ) -> Result<Vec<TopologyRow>, WrapperError> {
        let rows = client.query(AURORA_PG_TOPOLOGY_QUERY).await?;
        Ok(parse_topology_rows(&rows))
    }

    async fn host_role(&self, client: &Arc<dyn TargetClient>) -> Result<HostRole, WrapperError> {
        let rows = client.query(PG_HOST_ROLE_QUERY).await?;
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
        let rows = client.query(AURORA_PG_WRITER_ID_QUERY).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("writer_id"))
            .and_then(value_as_str))
    }

    async fn instance_id(
        &self,
        client: &Arc<dyn TargetClient>,
    ) -> Result<Option<String>, WrapperError> {
        let rows = client.query(AURORA_PG_INSTANCE_ID_QUERY).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("instance_id"))
            .and_then(value_as_str))
    }
}

#[async_trait]
impl BlueGreenDialect for AuroraPgDialect {
    async fn blue_green_status_available(&self, client: &Arc<dyn TargetClient>) -> bool {
        let Ok(rows) = client.query(PG_BLUE_GREEN_AVAILABLE_QUERY).await else {
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
        let rows = client.query(PG_BLUE_GREEN_STATUS_QUERY).await?;
        Ok(parse_blue_green_rows(&rows))
    }
}
