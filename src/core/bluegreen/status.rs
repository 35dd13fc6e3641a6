// src/core/bluegreen/status.rs

//! Blue/Green status model: phases, roles, per-role interim observations and
//! the summary status with its routing tables.

use crate::core::host::HostInfo;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use strum_macros::Display;
use tracing::warn;

/// Status-table versions this implementation understands. Unknown values fold
/// to the latest with a warning.
pub const KNOWN_VERSIONS: &[&str] = &["1.0"];

/// The switchover phases, totally ordered. Progression is strictly monotonic
/// per episode, except a one-shot rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BlueGreenPhase {
    NotCreated,
    Created,
    Preparation,
    InProgress,
    Post,
    Completed,
}

impl BlueGreenPhase {
    /// Maps a raw status-table value.
    pub fn from_status(status: &str) -> BlueGreenPhase {
        match status.to_uppercase().as_str() {
            "AVAILABLE" => BlueGreenPhase::Created,
            "SWITCHOVER_INITIATED" => BlueGreenPhase::Preparation,
            "SWITCHOVER_IN_PROGRESS" => BlueGreenPhase::InProgress,
            "SWITCHOVER_IN_POST_PROCESSING" => BlueGreenPhase::Post,
            "SWITCHOVER_COMPLETED" => BlueGreenPhase::Completed,
            other => {
                warn!("Unknown Blue/Green status '{}'; treating as NOT_CREATED.", other);
                BlueGreenPhase::NotCreated
            }
        }
    }

    pub fn is_active_switchover(&self) -> bool {
        matches!(
            self,
            BlueGreenPhase::Preparation | BlueGreenPhase::InProgress | BlueGreenPhase::Post
        )
    }
}

/// Which side of the deployment a host or monitor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BlueGreenRole {
    /// Blue: the cluster currently serving traffic.
    Source,
    /// Green: the staged replacement cluster.
    Target,
}

impl BlueGreenRole {
    pub fn from_status(role: &str) -> Option<BlueGreenRole> {
        match role.to_uppercase().as_str() {
            "BLUE_GREEN_DEPLOYMENT_SOURCE" => Some(BlueGreenRole::Source),
            "BLUE_GREEN_DEPLOYMENT_TARGET" => Some(BlueGreenRole::Target),
            _ => None,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            BlueGreenRole::Source => 0,
            BlueGreenRole::Target => 1,
        }
    }
}

/// Monitoring cadence, set by the provider according to the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalRate {
    Baseline,
    Increased,
    High,
}

/// Substitution payload: where to connect instead, and which IAM host names
/// to try in order when the target is a literal IP.
#[derive(Clone)]
pub struct SubstituteRoute {
    pub target: HostInfo,
    pub iam_candidates: Vec<HostInfo>,
    /// Invoked with the IAM host that authenticated successfully.
    pub on_iam_success: Option<Arc<dyn Fn(&HostInfo) + Send + Sync>>,
}

// The success callback is opaque; Debug shows the routing targets only.
impl fmt::Debug for SubstituteRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubstituteRoute")
            .field("target", &self.target.url())
            .field(
                "iam_candidates",
                &self
                    .iam_candidates
                    .iter()
                    .map(|host| host.url())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// What the pipeline does with a matching call.
#[derive(Debug, Clone)]
pub enum RoutingControl {
    PassThrough,
    Substitute(SubstituteRoute),
    Suspend,
    SuspendUntilCorrespondingHostFound,
    Reject,
}

/// One routing rule. `None` matchers are wildcards; rules are evaluated in
/// list order and the first match wins.
#[derive(Debug, Clone)]
pub struct RoutingEntry {
    pub host_and_port: Option<String>,
    pub role: Option<BlueGreenRole>,
    pub control: RoutingControl,
}

impl RoutingEntry {
    pub fn new(
        host_and_port: Option<String>,
        role: Option<BlueGreenRole>,
        control: RoutingControl,
    ) -> Self {
        Self {
            host_and_port: host_and_port.map(|h| h.to_lowercase()),
            role,
            control,
        }
    }

    pub fn matches(&self, host_and_port: &str, role: Option<BlueGreenRole>) -> bool {
        let host_matches = match &self.host_and_port {
            None => true,
            Some(matcher) => matcher.eq_ignore_ascii_case(host_and_port),
        };
        let role_matches = match (self.role, role) {
            (None, _) => true,
            (Some(want), Some(have)) => want == have,
            (Some(_), None) => false,
        };
        host_matches && role_matches
    }
}

/// The published summary of one deployment, a single immutable snapshot
/// replaced atomically by the provider.
#[derive(Debug, Clone)]
pub struct BlueGreenStatus {
    pub bgd_id: String,
    pub phase: BlueGreenPhase,
    pub connect_routing: Vec<RoutingEntry>,
    pub execute_routing: Vec<RoutingEntry>,
    /// host (lowercase, no port) -> deployment role.
    pub role_by_host: HashMap<String, BlueGreenRole>,
    /// blue host (lowercase) -> corresponding green host.
    pub corresponding_hosts: HashMap<String, HostInfo>,
    /// Distinguishes successive snapshots of the same phase.
    pub revision: u64,
}

impl BlueGreenStatus {
    pub fn idle(bgd_id: impl Into<String>) -> Self {
        Self {
            bgd_id: bgd_id.into(),
            phase: BlueGreenPhase::NotCreated,
            connect_routing: Vec::new(),
            execute_routing: Vec::new(),
            role_by_host: HashMap::new(),
            corresponding_hosts: HashMap::new(),
            revision: 0,
        }
    }

    pub fn role_of(&self, host: &str) -> Option<BlueGreenRole> {
        self.role_by_host.get(&host.to_lowercase()).copied()
    }

    /// First matching connect rule for a host, if any.
    pub fn connect_routing_for(
        &self,
        host_and_port: &str,
        role: Option<BlueGreenRole>,
    ) -> Option<&RoutingEntry> {
        self.connect_routing
            .iter()
            .find(|entry| entry.matches(host_and_port, role))
    }

    pub fn execute_routing_for(
        &self,
        host_and_port: &str,
        role: Option<BlueGreenRole>,
    ) -> Option<&RoutingEntry> {
        self.execute_routing
            .iter()
            .find(|entry| entry.matches(host_and_port, role))
    }
}

/// One role's observation snapshot, assembled by its monitor on every cycle.
#[derive(Debug, Clone, Default)]
pub struct BlueGreenInterimStatus {
    pub phase: Option<BlueGreenPhase>,
    pub version: String,
    pub port: u16,
    pub start_topology: Vec<HostInfo>,
    pub current_topology: Vec<HostInfo>,
    pub start_ip_by_host: HashMap<String, String>,
    pub current_ip_by_host: HashMap<String, String>,
    pub host_names: HashSet<String>,
    pub all_start_topology_ip_changed: bool,
    pub all_start_topology_endpoints_removed: bool,
    pub all_topology_changed: bool,
}

impl BlueGreenInterimStatus {
    /// Content hash for change detection between monitor cycles.
    pub fn context_hash(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.phase.hash(&mut hasher);
        self.version.hash(&mut hasher);
        self.port.hash(&mut hasher);
        hash_sorted(self.start_topology.iter().map(|h| h.url()), &mut hasher);
        hash_sorted(self.current_topology.iter().map(|h| h.url()), &mut hasher);
        hash_sorted(
            self.start_ip_by_host.iter().map(|(k, v)| format!("{k}={v}")),
            &mut hasher,
        );
        hash_sorted(
            self.current_ip_by_host
                .iter()
                .map(|(k, v)| format!("{k}={v}")),
            &mut hasher,
        );
        hash_sorted(self.host_names.iter().cloned(), &mut hasher);
        self.all_start_topology_ip_changed.hash(&mut hasher);
        self.all_start_topology_endpoints_removed.hash(&mut hasher);
        self.all_topology_changed.hash(&mut hasher);
        hasher.finish()
    }
}

fn hash_sorted<I: Iterator<Item = String>, H: Hasher>(items: I, hasher: &mut H) {
    let mut sorted: Vec<String> = items.collect();
    sorted.sort();
    sorted.hash(hasher);
}
