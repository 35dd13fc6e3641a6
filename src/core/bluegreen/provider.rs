// src/core/bluegreen/provider.rs

//! Aggregates the two per-role interim statuses into the summary
//! [`BlueGreenStatus`]: tracks phase progression (with one-shot rollback),
//! pairs blue hosts with their green counterparts, synthesizes the
//! phase-scoped routing tables, and arms the switchover deadline timer.

use super::monitor::{BlueGreenStatusMonitor, InterimStatusSink, MonitorControls};
use super::status::{
    BlueGreenInterimStatus, BlueGreenPhase, BlueGreenRole, BlueGreenStatus, IntervalRate,
    RoutingControl, RoutingEntry, SubstituteRoute,
};
use crate::config::WrapperConfig;
use crate::core::dialect::DatabaseDialect;
use crate::core::driver::ConnectionProvider;
use crate::core::host::{HostInfo, HostRole, NO_PORT};
use crate::core::rds::{self, RdsUrlType};
use crate::core::storage::StorageService;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct MonitorHandle {
    role: BlueGreenRole,
    controls: Arc<MonitorControls>,
    join: JoinHandle<()>,
}

struct PhaseTime {
    phase: BlueGreenPhase,
    at: SystemTime,
}

/// One provider per observed Blue/Green deployment, process-wide. Owns the
/// two role monitors and the published summary snapshot.
pub struct BlueGreenStatusProvider {
    config: WrapperConfig,
    bgd_id: String,
    summary: Mutex<Arc<BlueGreenStatus>>,
    interim: Mutex<[Option<BlueGreenInterimStatus>; 2]>,
    interim_hashes: Mutex<[u64; 2]>,
    latest_phase: Mutex<BlueGreenPhase>,
    rollback: AtomicBool,
    phase_times: Mutex<Vec<PhaseTime>>,
    /// Deadline revision; bumping it disarms outstanding timers.
    deadline_revision: AtomicU64,
    deadline_armed: AtomicBool,
    /// Green hosts that were observed authenticating under their blue name.
    iam_hosts_changed: Arc<DashMap<String, bool>>,
    monitors: Mutex<Vec<MonitorHandle>>,
    revision: AtomicU64,
    /// Set right after construction; lets the deadline task reach the
    /// provider without extending its lifetime.
    self_ref: once_cell::sync::OnceCell<std::sync::Weak<BlueGreenStatusProvider>>,
}

impl BlueGreenStatusProvider {
    /// Creates the provider and starts one monitor per role against the given
    /// entry point.
    pub fn start(
        bgd_id: impl Into<String>,
        config: WrapperConfig,
        initial_host: HostInfo,
        dialect: Arc<dyn DatabaseDialect>,
        connection_provider: Arc<dyn ConnectionProvider>,
        storage: Arc<StorageService>,
    ) -> Arc<Self> {
        let bgd_id = bgd_id.into();
        let provider = Arc::new(Self {
            config: config.clone(),
            bgd_id: bgd_id.clone(),
            summary: Mutex::new(Arc::new(BlueGreenStatus::idle(bgd_id))),
            interim: Mutex::new([None, None]),
            interim_hashes: Mutex::new([0, 0]),
            latest_phase: Mutex::new(BlueGreenPhase::NotCreated),
            rollback: AtomicBool::new(false),
            phase_times: Mutex::new(Vec::new()),
            deadline_revision: AtomicU64::new(0),
            deadline_armed: AtomicBool::new(false),
            iam_hosts_changed: Arc::new(DashMap::new()),
            monitors: Mutex::new(Vec::new()),
            revision: AtomicU64::new(0),
            self_ref: once_cell::sync::OnceCell::new(),
        });
        let _ = provider.self_ref.set(Arc::downgrade(&provider));

        let mut handles = Vec::new();
        for role in [BlueGreenRole::Source, BlueGreenRole::Target] {
            let controls = Arc::new(MonitorControls::new());
            let monitor = Arc::new(BlueGreenStatusMonitor::new(
                role,
                config.clone(),
                initial_host.clone(),
                dialect.clone(),
                connection_provider.clone(),
                storage.clone(),
                provider.clone(),
                controls.clone(),
            ));
            let join = tokio::spawn(monitor.run());
            handles.push(MonitorHandle {
                role,
                controls,
                join,
            });
        }
        *provider.monitors.lock() = handles;
        provider
    }

    /// The current published snapshot.
    pub fn status(&self) -> Arc<BlueGreenStatus> {
        self.summary.lock().clone()
    }

    pub fn bgd_id(&self) -> &str {
        &self.bgd_id
    }

    /// Stops both monitors and waits for them to finish.
    pub async fn stop(&self) {
        let handles: Vec<MonitorHandle> = std::mem::take(&mut *self.monitors.lock());
        for handle in &handles {
            handle.controls.request_stop();
        }
        for handle in handles {
            let _ = handle.join.await;
        }
    }

    fn stop_monitor(&self, role: BlueGreenRole) {
        let monitors = self.monitors.lock();
        for handle in monitors.iter() {
            if handle.role == role {
                handle.controls.request_stop();
            }
        }
    }

    fn apply_monitor_settings(
        &self,
        rate: IntervalRate,
        collect: bool,
        use_ip: bool,
    ) {
        let monitors = self.monitors.lock();
        for handle in monitors.iter() {
            handle.controls.set_interval_rate(rate);
            handle.controls.set_collect_topology(collect);
            handle.controls.set_collect_ip_addresses(collect);
            handle.controls.set_use_ip_address(use_ip);
        }
    }

    /// Applies a newly observed interim status and republishes the summary.
    fn ingest(&self, role: BlueGreenRole, interim: BlueGreenInterimStatus) {
        let index = role.index();
        let hash = interim.context_hash();
        {
            let mut hashes = self.interim_hashes.lock();
            if hashes[index] == hash {
                return;
            }
            hashes[index] = hash;
        }

        let observed_phase = interim.phase;
        {
            let mut interims = self.interim.lock();
            // Rollback: this role's phase moved backwards within an episode.
            if let (Some(new_phase), Some(previous)) = (
                observed_phase,
                interims[index].as_ref().and_then(|i| i.phase),
            ) && new_phase < previous
                && previous.is_active_switchover()
                && !self.rollback.load(Ordering::SeqCst)
            {
                info!(
                    "Blue/Green deployment '{}': rollback detected ({} -> {}).",
                    self.bgd_id, previous, new_phase
                );
                self.rollback.store(true, Ordering::SeqCst);
            }
            interims[index] = Some(interim);
        }

        self.advance_phase(observed_phase);
        self.publish_summary();
    }

    /// Moves the tracked phase: strictly monotonic, unless a rollback episode
    /// is in flight, in which case strictly decreasing.
    fn advance_phase(&self, observed: Option<BlueGreenPhase>) {
        let Some(observed) = observed else {
            return;
        };
        let mut latest = self.latest_phase.lock();
        let rollback = self.rollback.load(Ordering::SeqCst);
        let changed = if rollback {
            if observed < *latest {
                *latest = observed;
                true
            } else {
                false
            }
        } else if observed > *latest {
            *latest = observed;
            true
        } else {
            false
        };
        if changed {
            let phase = *latest;
            drop(latest);
            self.phase_times.lock().push(PhaseTime {
                phase,
                at: SystemTime::now(),
            });
            info!(
                "Blue/Green deployment '{}' entered phase {}{}.",
                self.bgd_id,
                phase,
                if rollback { " (rollback)" } else { "" }
            );
        }
    }

    /// Rebuilds and atomically publishes the summary snapshot for the current
    /// phase, then adjusts monitor cadence and timers.
    fn publish_summary(&self) {
        let phase = *self.latest_phase.lock();
        let (blue, green) = {
            let interims = self.interim.lock();
            (interims[0].clone(), interims[1].clone())
        };

        let role_by_host = role_by_host(blue.as_ref(), green.as_ref());
        let corresponding = corresponding_hosts(blue.as_ref(), green.as_ref());

        let blue_dns_updated = blue
            .as_ref()
            .map(|i| i.all_start_topology_ip_changed)
            .unwrap_or(false);
        let green_dns_removed = green
            .as_ref()
            .map(|i| i.all_start_topology_endpoints_removed)
            .unwrap_or(false);

        let (connect_routing, execute_routing) = self.build_routing(
            phase,
            blue.as_ref(),
            green.as_ref(),
            &role_by_host,
            &corresponding,
            blue_dns_updated,
            green_dns_removed,
        );

        let status = Arc::new(BlueGreenStatus {
            bgd_id: self.bgd_id.clone(),
            phase,
            connect_routing,
            execute_routing,
            role_by_host,
            corresponding_hosts: corresponding,
            revision: self.revision.fetch_add(1, Ordering::SeqCst) + 1,
        });
        *self.summary.lock() = status;

        match phase {
            BlueGreenPhase::NotCreated => {
                self.apply_monitor_settings(IntervalRate::Baseline, false, false);
            }
            BlueGreenPhase::Created => {
                self.apply_monitor_settings(IntervalRate::Increased, true, false);
                if self.rollback.load(Ordering::SeqCst) {
                    // The rollback episode ends here; collected data restarts.
                    self.finish_episode();
                }
            }
            BlueGreenPhase::Preparation => {
                self.apply_monitor_settings(IntervalRate::High, false, true);
                self.arm_switchover_deadline();
            }
            BlueGreenPhase::InProgress | BlueGreenPhase::Post => {
                self.apply_monitor_settings(IntervalRate::High, false, true);
            }
            BlueGreenPhase::Completed => {
                self.apply_monitor_settings(IntervalRate::Baseline, false, false);
                if !self.rollback.load(Ordering::SeqCst) {
                    info!(
                        "Blue/Green deployment '{}' switchover completed; stopping the source monitor.",
                        self.bgd_id
                    );
                    self.stop_monitor(BlueGreenRole::Source);
                }
                self.finish_episode();
            }
        }
    }

    /// Arms (once per episode) the timer that forces a terminal phase when
    /// the upstream service takes too long.
    fn arm_switchover_deadline(&self) {
        if self.deadline_armed.swap(true, Ordering::SeqCst) {
            return;
        }
        let revision = self.deadline_revision.fetch_add(1, Ordering::SeqCst) + 1;
        let timeout = Duration::from_millis(self.config.bg_switchover_timeout_ms);
        let Some(provider) = self.self_ref.get().cloned() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(provider) = provider.upgrade() else {
                return;
            };
            if provider.deadline_revision.load(Ordering::SeqCst) != revision {
                return;
            }
            let current = *provider.latest_phase.lock();
            if !current.is_active_switchover() {
                return;
            }
            let forced = if provider.rollback.load(Ordering::SeqCst) {
                BlueGreenPhase::Created
            } else {
                BlueGreenPhase::Completed
            };
            warn!(
                "Blue/Green deployment '{}': switchover deadline expired in phase {}; forcing {}.",
                provider.bgd_id, current, forced
            );
            *provider.latest_phase.lock() = forced;
            provider.phase_times.lock().push(PhaseTime {
                phase: forced,
                at: SystemTime::now(),
            });
            provider.publish_summary();
        });
    }

    /// Logs the episode timeline and resets per-episode state. The summary
    /// phase itself is left as published.
    fn finish_episode(&self) {
        let times = std::mem::take(&mut *self.phase_times.lock());
        if !times.is_empty() {
            let timeline: Vec<String> = times
                .iter()
                .map(|entry| {
                    format!(
                        "{} at {:?}",
                        entry.phase,
                        entry
                            .at
                            .duration_since(SystemTime::UNIX_EPOCH)
                            .unwrap_or_default()
                    )
                })
                .collect();
            info!(
                "Blue/Green deployment '{}' timeline: {}.",
                self.bgd_id,
                timeline.join(" -> ")
            );
        }
        self.rollback.store(false, Ordering::SeqCst);
        self.deadline_armed.store(false, Ordering::SeqCst);
        self.deadline_revision.fetch_add(1, Ordering::SeqCst);
    }

    #[allow(clippy::too_many_arguments)]
    fn build_routing(
        &self,
        phase: BlueGreenPhase,
        blue: Option<&BlueGreenInterimStatus>,
        green: Option<&BlueGreenInterimStatus>,
        role_by_host: &HashMap<String, BlueGreenRole>,
        corresponding: &HashMap<String, HostInfo>,
        blue_dns_updated: bool,
        green_dns_removed: bool,
    ) -> (Vec<RoutingEntry>, Vec<RoutingEntry>) {
        match phase {
            BlueGreenPhase::NotCreated | BlueGreenPhase::Created => (Vec::new(), Vec::new()),
            BlueGreenPhase::Preparation => {
                (self.substitute_blue_ip_entries(blue, role_by_host), Vec::new())
            }
            BlueGreenPhase::InProgress => {
                let mut connect = Vec::new();
                if self.config.bg_suspend_new_blue_connections_when_in_progress {
                    connect.push(RoutingEntry::new(
                        None,
                        Some(BlueGreenRole::Source),
                        RoutingControl::Suspend,
                    ));
                } else {
                    connect.extend(self.substitute_blue_ip_entries(blue, role_by_host));
                }
                connect.push(RoutingEntry::new(
                    None,
                    Some(BlueGreenRole::Target),
                    RoutingControl::Suspend,
                ));
                let ip_suspends = known_ip_suspend_entries(blue, green, role_by_host);
                connect.extend(ip_suspends.clone());

                let mut execute = vec![
                    RoutingEntry::new(None, Some(BlueGreenRole::Source), RoutingControl::Suspend),
                    RoutingEntry::new(None, Some(BlueGreenRole::Target), RoutingControl::Suspend),
                ];
                execute.extend(ip_suspends);
                (connect, execute)
            }
            BlueGreenPhase::Post => (
                self.post_routing(blue, green, role_by_host, corresponding, green_dns_removed),
                Vec::new(),
            ),
            BlueGreenPhase::Completed => {
                if blue_dns_updated && green_dns_removed {
                    (Vec::new(), Vec::new())
                } else {
                    (
                        self.post_routing(
                            blue,
                            green,
                            role_by_host,
                            corresponding,
                            green_dns_removed,
                        ),
                        Vec::new(),
                    )
                }
            }
        }
    }

    /// PREPARATION entries: every blue host routes to its own IP, with the
    /// DNS name kept as the IAM candidate. Two entries per host, with and
    /// without port.
    fn substitute_blue_ip_entries(
        &self,
        blue: Option<&BlueGreenInterimStatus>,
        role_by_host: &HashMap<String, BlueGreenRole>,
    ) -> Vec<RoutingEntry> {
        let Some(blue) = blue else {
            return Vec::new();
        };
        let port = effective_port(blue, &self.config);
        let mut entries = Vec::new();
        for (host, role) in role_by_host {
            if *role != BlueGreenRole::Source {
                continue;
            }
            let Some(ip) = blue
                .current_ip_by_host
                .get(host)
                .or_else(|| blue.start_ip_by_host.get(host))
            else {
                continue;
            };
            let Ok(target) = HostInfo::builder().host(ip).port(port).build() else {
                continue;
            };
            let Ok(iam_candidate) = HostInfo::builder().host(host).port(port).build() else {
                continue;
            };
            let substitute = SubstituteRoute {
                target,
                iam_candidates: vec![iam_candidate],
                on_iam_success: None,
            };
            entries.push(RoutingEntry::new(
                Some(format!("{host}:{port}")),
                Some(BlueGreenRole::Source),
                RoutingControl::Substitute(substitute.clone()),
            ));
            entries.push(RoutingEntry::new(
                Some(host.clone()),
                Some(BlueGreenRole::Source),
                RoutingControl::Substitute(substitute),
            ));
        }
        entries
    }

    /// POST entries: blue hosts route to their green counterparts (by name
    /// while the green DNS lives, by IP afterwards); unpaired blue hosts wait
    /// for their counterpart; green connects are rejected until the green DNS
    /// is gone.
    fn post_routing(
        &self,
        blue: Option<&BlueGreenInterimStatus>,
        green: Option<&BlueGreenInterimStatus>,
        role_by_host: &HashMap<String, BlueGreenRole>,
        corresponding: &HashMap<String, HostInfo>,
        green_dns_removed: bool,
    ) -> Vec<RoutingEntry> {
        let Some(blue) = blue else {
            return Vec::new();
        };
        let port = effective_port(blue, &self.config);
        let mut entries = Vec::new();

        for (host, role) in role_by_host {
            if *role != BlueGreenRole::Source {
                continue;
            }
            match corresponding.get(host) {
                Some(green_host) => {
                    let target = if green_dns_removed {
                        // The green name is gone; route to its last-known IP.
                        let ip = green
                            .and_then(|g| g.current_ip_by_host.get(&green_host.host))
                            .or_else(|| {
                                green.and_then(|g| g.start_ip_by_host.get(&green_host.host))
                            });
                        match ip {
                            Some(ip) => HostInfo::builder()
                                .host(ip)
                                .port(green_host.port)
                                .build()
                                .unwrap_or_else(|_| green_host.clone()),
                            None => green_host.clone(),
                        }
                    } else {
                        green_host.clone()
                    };

                    let Ok(blue_info) = HostInfo::builder().host(host).port(port).build() else {
                        continue;
                    };
                    let iam_changed = self
                        .iam_hosts_changed
                        .get(&green_host.host.to_lowercase())
                        .map(|entry| *entry.value())
                        .unwrap_or(false);
                    let iam_candidates = if iam_changed {
                        vec![blue_info.clone()]
                    } else {
                        vec![green_host.clone(), blue_info.clone()]
                    };

                    let changed_map = self.iam_hosts_changed.clone();
                    let green_name = green_host.host.to_lowercase();
                    let blue_name = host.clone();
                    let on_iam_success: Arc<dyn Fn(&HostInfo) + Send + Sync> =
                        Arc::new(move |iam_host| {
                            // Authenticating under the blue name proves the
                            // green instance was renamed.
                            if iam_host.host.eq_ignore_ascii_case(&blue_name) {
                                changed_map.insert(green_name.clone(), true);
                            }
                        });

                    let substitute = SubstituteRoute {
                        target,
                        iam_candidates,
                        on_iam_success: Some(on_iam_success),
                    };
                    entries.push(RoutingEntry::new(
                        Some(format!("{host}:{port}")),
                        Some(BlueGreenRole::Source),
                        RoutingControl::Substitute(substitute.clone()),
                    ));
                    entries.push(RoutingEntry::new(
                        Some(host.clone()),
                        Some(BlueGreenRole::Source),
                        RoutingControl::Substitute(substitute),
                    ));
                }
                None => {
                    entries.push(RoutingEntry::new(
                        Some(format!("{host}:{port}")),
                        Some(BlueGreenRole::Source),
                        RoutingControl::SuspendUntilCorrespondingHostFound,
                    ));
                    entries.push(RoutingEntry::new(
                        Some(host.clone()),
                        Some(BlueGreenRole::Source),
                        RoutingControl::SuspendUntilCorrespondingHostFound,
                    ));
                }
            }
        }

        if !green_dns_removed {
            entries.push(RoutingEntry::new(
                None,
                Some(BlueGreenRole::Target),
                RoutingControl::Reject,
            ));
        }
        entries
    }
}

#[async_trait]
impl InterimStatusSink for BlueGreenStatusProvider {
    async fn process_interim_status(&self, role: BlueGreenRole, status: BlueGreenInterimStatus) {
        debug!(
            "Interim status from {} monitor: phase {:?}, {} hosts.",
            role,
            status.phase,
            status.host_names.len()
        );
        self.ingest(role, status);
    }
}

/// host (no port) -> role, from both interims' host name sets and topologies.
fn role_by_host(
    blue: Option<&BlueGreenInterimStatus>,
    green: Option<&BlueGreenInterimStatus>,
) -> HashMap<String, BlueGreenRole> {
    let mut map = HashMap::new();
    for (interim, role) in [
        (blue, BlueGreenRole::Source),
        (green, BlueGreenRole::Target),
    ] {
        let Some(interim) = interim else {
            continue;
        };
        for name in &interim.host_names {
            map.insert(name.to_lowercase(), role);
        }
        for host in interim.start_topology.iter().chain(&interim.current_topology) {
            map.insert(host.host.to_lowercase(), role);
        }
    }
    map
}

/// Pairs blue hosts with green counterparts: writer with writer, readers
/// zipped in sorted order (wrapping over the shorter list), cluster DNS
/// entries by kind, and custom cluster DNS entries by green-stripped name.
fn corresponding_hosts(
    blue: Option<&BlueGreenInterimStatus>,
    green: Option<&BlueGreenInterimStatus>,
) -> HashMap<String, HostInfo> {
    let mut map = HashMap::new();
    let (Some(blue), Some(green)) = (blue, green) else {
        return map;
    };

    let blue_topology = pick_topology(blue);
    let green_topology = pick_topology(green);

    let blue_writer = blue_topology.iter().find(|h| h.role == HostRole::Writer);
    let green_writer = green_topology.iter().find(|h| h.role == HostRole::Writer);
    if let (Some(blue_writer), Some(green_writer)) = (blue_writer, green_writer) {
        map.insert(blue_writer.host.to_lowercase(), green_writer.clone());
    }

    let mut blue_readers: Vec<&HostInfo> = blue_topology
        .iter()
        .filter(|h| h.role == HostRole::Reader)
        .collect();
    let mut green_readers: Vec<&HostInfo> = green_topology
        .iter()
        .filter(|h| h.role == HostRole::Reader)
        .collect();
    blue_readers.sort_by_key(|h| h.host.to_lowercase());
    green_readers.sort_by_key(|h| h.host.to_lowercase());
    if !green_readers.is_empty() {
        for (index, blue_reader) in blue_readers.iter().enumerate() {
            let green_reader = green_readers[index % green_readers.len()];
            map.insert(blue_reader.host.to_lowercase(), green_reader.clone());
        }
    }

    for kind in [RdsUrlType::ClusterWriterDns, RdsUrlType::ClusterReaderDns] {
        let blue_dns = blue
            .host_names
            .iter()
            .find(|name| rds::identify_rds_url_type(name) == kind);
        let green_dns = green
            .host_names
            .iter()
            .find(|name| rds::identify_rds_url_type(name) == kind);
        if let (Some(blue_dns), Some(green_dns)) = (blue_dns, green_dns)
            && let Ok(green_host) = HostInfo::builder()
                .host(green_dns)
                .port(i32::from(effective_port_raw(green)))
                .build()
        {
            map.insert(blue_dns.to_lowercase(), green_host);
        }
    }

    // Custom cluster DNS: match by the green name with its suffix stripped.
    let blue_customs: HashSet<&String> = blue
        .host_names
        .iter()
        .filter(|name| rds::identify_rds_url_type(name) == RdsUrlType::ClusterCustomDns)
        .collect();
    for green_name in green
        .host_names
        .iter()
        .filter(|name| rds::identify_rds_url_type(name) == RdsUrlType::ClusterCustomDns)
    {
        let stripped = rds::strip_green_suffix(green_name);
        if let Some(blue_name) = blue_customs.iter().find(|b| ***b == stripped)
            && let Ok(green_host) = HostInfo::builder()
                .host(green_name)
                .port(i32::from(effective_port_raw(green)))
                .build()
        {
            map.insert(blue_name.to_lowercase(), green_host);
        }
    }

    map
}

fn pick_topology(interim: &BlueGreenInterimStatus) -> &[HostInfo] {
    if !interim.start_topology.is_empty() {
        &interim.start_topology
    } else {
        &interim.current_topology
    }
}

/// Per-IP suspension entries for IN_PROGRESS: every known IP of either side
/// suspends, with and without port.
fn known_ip_suspend_entries(
    blue: Option<&BlueGreenInterimStatus>,
    green: Option<&BlueGreenInterimStatus>,
    role_by_host: &HashMap<String, BlueGreenRole>,
) -> Vec<RoutingEntry> {
    let mut entries = Vec::new();
    for interim in [blue, green].into_iter().flatten() {
        for (host, ip) in &interim.current_ip_by_host {
            if !role_by_host.contains_key(&host.to_lowercase()) {
                continue;
            }
            entries.push(RoutingEntry::new(
                Some(ip.clone()),
                None,
                RoutingControl::Suspend,
            ));
            if interim.port != 0 {
                entries.push(RoutingEntry::new(
                    Some(format!("{}:{}", ip, interim.port)),
                    None,
                    RoutingControl::Suspend,
                ));
            }
        }
    }
    entries
}

fn effective_port(interim: &BlueGreenInterimStatus, config: &WrapperConfig) -> i32 {
    if interim.port != 0 {
        i32::from(interim.port)
    } else {
        config.port.map(i32::from).unwrap_or(NO_PORT)
    }
}

fn effective_port_raw(interim: &BlueGreenInterimStatus) -> u16 {
    interim.port
}
