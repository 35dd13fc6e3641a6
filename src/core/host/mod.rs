// src/core/host/mod.rs

//! The cluster-member model: host identity, role, availability and aliases.

pub mod availability;

use crate::core::errors::WrapperError;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use strum_macros::{Display, EnumString};

use self::availability::ExponentialBackoffAvailabilityStrategy;

/// The port value used when no port has been resolved for a host.
pub const NO_PORT: i32 = -1;

/// Default host weight. Topology rows may override it.
pub const DEFAULT_WEIGHT: i32 = 100;

/// The role a host currently plays inside its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum HostRole {
    Writer,
    Reader,
    Unknown,
}

/// The raw availability of a host as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum HostAvailability {
    Available,
    NotAvailable,
}

/// Identity of a cluster member.
///
/// Built by [`HostInfoBuilder`]; after `build()` only `role`, `availability`
/// and the alias set are expected to change, and only under the discipline of
/// the component that owns the topology snapshot.
#[derive(Debug, Clone)]
pub struct HostInfo {
    pub host: String,
    pub port: i32,
    pub role: HostRole,
    pub availability: HostAvailability,
    pub weight: i32,
    /// Nanoseconds since the epoch at which the topology row for this host was
    /// last updated. Used to tie-break duplicate writers.
    pub last_update_time: u128,
    /// Often identical to `host`; for RDS topologies this is the instance id.
    pub host_id: String,
    pub aliases: HashSet<String>,
    availability_strategy: Option<Arc<ExponentialBackoffAvailabilityStrategy>>,
}

impl HostInfo {
    pub fn builder() -> HostInfoBuilder {
        HostInfoBuilder::new()
    }

    /// `host:port`, or just `host` when no port is set. Lowercased so that it
    /// can serve as a cache key.
    pub fn url(&self) -> String {
        if self.port == NO_PORT {
            self.host.to_lowercase()
        } else {
            format!("{}:{}", self.host.to_lowercase(), self.port)
        }
    }

    /// The alias under which this host registers itself: its url.
    pub fn as_alias(&self) -> String {
        self.url()
    }

    /// All aliases including the host's own url.
    pub fn all_aliases(&self) -> HashSet<String> {
        let mut all = self.aliases.clone();
        all.insert(self.as_alias());
        all
    }

    pub fn add_alias(&mut self, alias: &str) {
        self.aliases.insert(alias.to_lowercase());
    }

    pub fn remove_alias(&mut self, alias: &str) {
        self.aliases.remove(&alias.to_lowercase());
    }

    /// Raw availability filtered through the host's backoff strategy, when one
    /// is attached.
    pub fn effective_availability(&self) -> HostAvailability {
        match &self.availability_strategy {
            Some(strategy) => strategy.host_availability(self.availability),
            None => self.availability,
        }
    }

    /// Records an availability observation on both the raw field and the
    /// attached strategy.
    pub fn set_availability(&mut self, availability: HostAvailability) {
        self.availability = availability;
        if let Some(strategy) = &self.availability_strategy {
            strategy.set_host_availability(availability);
        }
    }

    pub fn availability_strategy(&self) -> Option<&Arc<ExponentialBackoffAvailabilityStrategy>> {
        self.availability_strategy.as_ref()
    }

    /// Hosts compare equal on their lowercased name and port; role and
    /// availability are observations, not identity.
    pub fn same_host(&self, other: &HostInfo) -> bool {
        self.host.eq_ignore_ascii_case(&other.host) && self.port == other.port
    }
}

impl PartialEq for HostInfo {
    fn eq(&self, other: &Self) -> bool {
        self.same_host(other)
    }
}

impl Eq for HostInfo {}

impl std::hash::Hash for HostInfo {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.host.to_lowercase().hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for HostInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}, {}]", self.url(), self.role, self.availability)
    }
}

/// Builder for [`HostInfo`]. Aliases are not set here: they are discovered
/// after connecting and recorded through [`HostInfo::add_alias`] by the
/// component owning the host.
#[derive(Debug, Clone)]
pub struct HostInfoBuilder {
    host: String,
    port: i32,
    role: HostRole,
    availability: HostAvailability,
    weight: i32,
    last_update_time: u128,
    host_id: Option<String>,
    availability_strategy: Option<Arc<ExponentialBackoffAvailabilityStrategy>>,
}

impl Default for HostInfoBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HostInfoBuilder {
    pub fn new() -> Self {
        Self {
            host: String::new(),
            port: NO_PORT,
            role: HostRole::Unknown,
            availability: HostAvailability::Available,
            weight: DEFAULT_WEIGHT,
            last_update_time: now_nanos(),
            host_id: None,
            availability_strategy: None,
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: i32) -> Self {
        self.port = port;
        self
    }

    pub fn role(mut self, role: HostRole) -> Self {
        self.role = role;
        self
    }

    pub fn availability(mut self, availability: HostAvailability) -> Self {
        self.availability = availability;
        self
    }

    pub fn weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    pub fn last_update_time(mut self, nanos: u128) -> Self {
        self.last_update_time = nanos;
        self
    }

    pub fn host_id(mut self, host_id: impl Into<String>) -> Self {
        self.host_id = Some(host_id.into());
        self
    }

    pub fn availability_strategy(
        mut self,
        strategy: Arc<ExponentialBackoffAvailabilityStrategy>,
    ) -> Self {
        self.availability_strategy = Some(strategy);
        self
    }

    pub fn build(self) -> Result<HostInfo, WrapperError> {
        if self.host.is_empty() {
            return Err(WrapperError::IllegalArgument(
                "HostInfo requires a non-empty host name".into(),
            ));
        }
        let host_id = self.host_id.unwrap_or_else(|| self.host.clone());
        Ok(HostInfo {
            host: self.host,
            port: self.port,
            role: self.role,
            availability: self.availability,
            weight: self.weight,
            last_update_time: self.last_update_time,
            host_id,
            aliases: HashSet::new(),
            availability_strategy: self.availability_strategy,
        })
    }
}

/// Nanoseconds since the Unix epoch.
pub fn now_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}
