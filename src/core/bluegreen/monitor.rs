// src/core/bluegreen/monitor.rs

//! One long-lived monitoring loop per deployment role. Each cycle opens or
//! reuses a connection to its role's cluster, reads the status table, refreshes
//! topology, resolves host IPs, and hands the assembled interim status to the
//! provider. The sleep between cycles is chunked so rate changes, stop
//! requests and panic mode take effect promptly.

use super::status::{BlueGreenInterimStatus, BlueGreenPhase, BlueGreenRole, IntervalRate};
use crate::config::WrapperConfig;
use crate::core::dialect::{BlueGreenRow, DatabaseDialect};
use crate::core::driver::{ClientWrapper, ConnectionProvider};
use crate::core::host::HostInfo;
use crate::core::rds::{self, RdsUrlType};
use crate::core::storage::StorageService;
use crate::core::topology::{ClusterTopologyHostListProvider, HostListProvider};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;
use tokio::net::lookup_host;
use tracing::{debug, info, warn};

/// Granularity of the abortable sleep.
const SLEEP_CHUNK: Duration = Duration::from_millis(50);

/// Receives each assembled interim status; implemented by the provider.
#[async_trait]
pub trait InterimStatusSink: Send + Sync {
    async fn process_interim_status(&self, role: BlueGreenRole, status: BlueGreenInterimStatus);
}

/// Control surface the provider uses to steer a running monitor.
pub struct MonitorControls {
    interval_rate: AtomicU8,
    stop: AtomicBool,
    panic: AtomicBool,
    use_ip_address: AtomicBool,
    collect_ip_addresses: AtomicBool,
    collect_topology: AtomicBool,
}

impl MonitorControls {
    pub fn new() -> Self {
        Self {
            interval_rate: AtomicU8::new(0),
            stop: AtomicBool::new(false),
            panic: AtomicBool::new(false),
            use_ip_address: AtomicBool::new(false),
            collect_ip_addresses: AtomicBool::new(true),
            collect_topology: AtomicBool::new(true),
        }
    }

    pub fn set_interval_rate(&self, rate: IntervalRate) {
        let encoded = match rate {
            IntervalRate::Baseline => 0,
            IntervalRate::Increased => 1,
            IntervalRate::High => 2,
        };
        self.interval_rate.store(encoded, Ordering::SeqCst);
    }

    pub fn interval_rate(&self) -> IntervalRate {
        match self.interval_rate.load(Ordering::SeqCst) {
            0 => IntervalRate::Baseline,
            1 => IntervalRate::Increased,
            _ => IntervalRate::High,
        }
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn set_use_ip_address(&self, value: bool) {
        self.use_ip_address.store(value, Ordering::SeqCst);
    }

    pub fn set_collect_ip_addresses(&self, value: bool) {
        self.collect_ip_addresses.store(value, Ordering::SeqCst);
    }

    pub fn set_collect_topology(&self, value: bool) {
        self.collect_topology.store(value, Ordering::SeqCst);
    }

    pub fn is_panicking(&self) -> bool {
        self.panic.load(Ordering::SeqCst)
    }
}

impl Default for MonitorControls {
    fn default() -> Self {
        Self::new()
    }
}

/// The per-role monitoring loop.
pub struct BlueGreenStatusMonitor {
    role: BlueGreenRole,
    config: WrapperConfig,
    initial_host: HostInfo,
    dialect: Arc<dyn DatabaseDialect>,
    connection_provider: Arc<dyn ConnectionProvider>,
    topology_provider: ClusterTopologyHostListProvider,
    sink: Arc<dyn InterimStatusSink>,
    controls: Arc<MonitorControls>,

    client: Mutex<Option<Arc<ClientWrapper>>>,
    /// The endpoint this monitor currently connects to; starts at the initial
    /// host, moves to the role's published endpoint once confirmed.
    connect_host: Mutex<HostInfo>,
    start_topology: Mutex<Vec<HostInfo>>,
    current_topology: Mutex<Vec<HostInfo>>,
    start_ip_by_host: Mutex<HashMap<String, String>>,
    current_ip_by_host: Mutex<HashMap<String, String>>,
    host_names: Mutex<HashSet<String>>,
}

impl BlueGreenStatusMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        role: BlueGreenRole,
        config: WrapperConfig,
        initial_host: HostInfo,
        dialect: Arc<dyn DatabaseDialect>,
        connection_provider: Arc<dyn ConnectionProvider>,
        storage: Arc<StorageService>,
        sink: Arc<dyn InterimStatusSink>,
        controls: Arc<MonitorControls>,
    ) -> Self {
        let topology_provider = ClusterTopologyHostListProvider::new(
            config.clone(),
            initial_host.clone(),
            dialect.clone(),
            storage,
            connection_provider.clone(),
        );
        Self {
            role,
            connect_host: Mutex::new(initial_host.clone()),
            config,
            initial_host,
            dialect,
            connection_provider,
            topology_provider,
            sink,
            controls,
            client: Mutex::new(None),
            start_topology: Mutex::new(Vec::new()),
            current_topology: Mutex::new(Vec::new()),
            start_ip_by_host: Mutex::new(HashMap::new()),
            current_ip_by_host: Mutex::new(HashMap::new()),
            host_names: Mutex::new(HashSet::new()),
        }
    }

    pub fn controls(&self) -> Arc<MonitorControls> {
        self.controls.clone()
    }

    /// The loop body, until asked to stop.
    pub async fn run(self: Arc<Self>) {
        info!("Blue/Green status monitor for role {} started.", self.role);
        while !self.controls.is_stopped() {
            match self.ensure_client().await {
                Some(client) => {
                    self.controls.panic.store(false, Ordering::SeqCst);
                    let interim = self.observe(&client).await;
                    self.sink.process_interim_status(self.role, interim).await;
                }
                None => {
                    self.controls.panic.store(true, Ordering::SeqCst);
                }
            }

            self.sleep_between_cycles().await;
        }
        let taken_client = self.client.lock().take();
        if let Some(client) = taken_client {
            self.dialect.try_closing_target_client(&client.client).await;
        }
        info!("Blue/Green status monitor for role {} stopped.", self.role);
    }

    /// Opens (or re-opens) the monitoring connection. When `use_ip_address`
    /// is on, the connect targets the last-known IP with the DNS name kept as
    /// the IAM host so authentication still signs for the name.
    async fn ensure_client(&self) -> Option<Arc<ClientWrapper>> {
        let existing_client = self.client.lock().clone();
        if let Some(existing) = existing_client {
            if existing.is_valid().await {
                return Some(existing);
            }
            *self.client.lock() = None;
        }

        let target = self.connect_host.lock().clone();
        let mut config = self.config.clone();
        let mut host = target.clone();

        if self.controls.use_ip_address.load(Ordering::SeqCst) {
            let known_ip = self.current_ip_by_host.lock().get(&target.host).cloned();
            if let Some(ip) = known_ip {
                config.iam_host = Some(target.host.clone());
                host = HostInfo::builder()
                    .host(ip)
                    .port(target.port)
                    .build()
                    .unwrap_or(target.clone());
            }
        }

        match self.connection_provider.connect(&host, &config).await {
            Ok(client) => {
                *self.client.lock() = Some(client.clone());
                Some(client)
            }
            Err(e) => {
                warn!(
                    "Blue/Green monitor ({}) could not connect to '{}': {}",
                    self.role,
                    host.url(),
                    e
                );
                // The published endpoint may be gone; fall back to the entry
                // point for the next attempt.
                *self.connect_host.lock() = self.initial_host.clone();
                None
            }
        }
    }

    /// One observation cycle: status table, topology, DNS.
    async fn observe(&self, client: &Arc<ClientWrapper>) -> BlueGreenInterimStatus {
        let status = self.collect_status(client).await;
        self.collect_topology(client).await;
        self.collect_host_ip_addresses().await;

        let start_topology = self.start_topology.lock().clone();
        let current_topology = self.current_topology.lock().clone();
        let start_ips = self.start_ip_by_host.lock().clone();
        let current_ips = self.current_ip_by_host.lock().clone();
        let host_names = self.host_names.lock().clone();

        let all_start_topology_ip_changed = !start_topology.is_empty()
            && start_topology.iter().all(|host| {
                match (start_ips.get(&host.host), current_ips.get(&host.host)) {
                    (Some(start), Some(current)) => start != current,
                    _ => false,
                }
            });
        let all_start_topology_endpoints_removed = !start_topology.is_empty()
            && start_topology.iter().all(|host| {
                start_ips.contains_key(&host.host) && !current_ips.contains_key(&host.host)
            });
        let all_topology_changed = !current_topology.is_empty()
            && !start_topology.is_empty()
            && current_topology.iter().all(|current| {
                !start_topology.iter().any(|start| start.same_host(current))
            });

        BlueGreenInterimStatus {
            phase: status.as_ref().map(|s| s.phase),
            version: status
                .as_ref()
                .map(|s| s.version.clone())
                .unwrap_or_default(),
            port: status.as_ref().map(|s| s.port).unwrap_or(0),
            start_topology,
            current_topology,
            start_ip_by_host: start_ips,
            current_ip_by_host: current_ips,
            host_names,
            all_start_topology_ip_changed,
            all_start_topology_endpoints_removed,
            all_topology_changed,
        }
    }

    async fn collect_status(&self, client: &Arc<ClientWrapper>) -> Option<CollectedStatus> {
        let blue_green = self.dialect.blue_green()?;

        if !blue_green.blue_green_status_available(&client.client).await {
            return Some(CollectedStatus {
                phase: BlueGreenPhase::NotCreated,
                version: String::new(),
                port: 0,
            });
        }

        let rows = match blue_green.blue_green_status(&client.client).await {
            Ok(rows) => rows,
            Err(e) => {
                debug!("Blue/Green status query failed ({}): {}", self.role, e);
                return None;
            }
        };

        let for_role: Vec<&BlueGreenRow> = rows
            .iter()
            .filter(|row| BlueGreenRole::from_status(&row.role) == Some(self.role))
            .collect();

        // Prefer the writer cluster endpoint entry, else the first instance
        // endpoint entry.
        let selected = for_role
            .iter()
            .find(|row| {
                rds::identify_rds_url_type(&row.endpoint) == RdsUrlType::ClusterWriterDns
            })
            .or_else(|| {
                for_role
                    .iter()
                    .find(|row| rds::identify_rds_url_type(&row.endpoint) == RdsUrlType::InstanceDns)
            })
            .copied();

        let row = selected?;
        let mut version = row.version.clone();
        if !super::status::KNOWN_VERSIONS.contains(&version.as_str()) {
            let latest = super::status::KNOWN_VERSIONS[super::status::KNOWN_VERSIONS.len() - 1];
            warn!(
                "Unknown Blue/Green status version '{}'; assuming '{}'.",
                version, latest
            );
            version = latest.to_string();
        }

        // Move the monitoring connection to the published endpoint.
        {
            let mut connect_host = self.connect_host.lock();
            if !connect_host.host.eq_ignore_ascii_case(&row.endpoint) {
                if let Ok(host) = HostInfo::builder()
                    .host(&row.endpoint)
                    .port(i32::from(row.port))
                    .build()
                {
                    *connect_host = host;
                }
            }
        }

        self.host_names.lock().insert(row.endpoint.to_lowercase());

        Some(CollectedStatus {
            phase: BlueGreenPhase::from_status(&row.status),
            version,
            port: row.port,
        })
    }

    async fn collect_topology(&self, client: &Arc<ClientWrapper>) {
        let Ok(topology) = self.topology_provider.force_refresh(Some(client)).await else {
            return;
        };
        *self.current_topology.lock() = topology.clone();

        if self.controls.collect_topology.load(Ordering::SeqCst) {
            // Still collecting: the start snapshot mirrors the current one
            // until the provider freezes it.
            *self.start_topology.lock() = topology.clone();
        }

        let mut names = self.host_names.lock();
        for host in &topology {
            names.insert(host.host.to_lowercase());
        }
    }

    async fn collect_host_ip_addresses(&self) {
        let names: Vec<String> = self.host_names.lock().iter().cloned().collect();
        let mut resolved: HashMap<String, String> = HashMap::new();
        for name in names {
            if let Some(ip) = resolve_host(&name).await {
                resolved.insert(name, ip);
            }
        }
        *self.current_ip_by_host.lock() = resolved.clone();
        if self.controls.collect_ip_addresses.load(Ordering::SeqCst) {
            *self.start_ip_by_host.lock() = resolved;
        }
    }

    /// Chunked, abortable sleep. Panic mode always uses the high rate.
    async fn sleep_between_cycles(&self) {
        let panicking = self.controls.is_panicking();
        let rate = if panicking {
            IntervalRate::High
        } else {
            self.controls.interval_rate()
        };
        let total = match rate {
            IntervalRate::Baseline => Duration::from_millis(self.config.bg_interval_baseline_ms),
            IntervalRate::Increased => Duration::from_millis(self.config.bg_interval_increased_ms),
            IntervalRate::High => Duration::from_millis(self.config.bg_interval_high_ms),
        };
        let started = tokio::time::Instant::now();
        let initial_rate = rate;
        while started.elapsed() < total {
            if self.controls.is_stopped() {
                return;
            }
            if self.controls.interval_rate() != initial_rate && !panicking {
                return;
            }
            tokio::time::sleep(SLEEP_CHUNK.min(total.saturating_sub(started.elapsed()))).await;
        }
    }
}

struct CollectedStatus {
    phase: BlueGreenPhase,
    version: String,
    port: u16,
}

async fn resolve_host(name: &str) -> Option<String> {
    if rds::is_ip_address(name) {
        return Some(name.to_string());
    }
    // Port is irrelevant for address resolution.
    match lookup_host((name, 5432_u16)).await {
        Ok(mut addrs) => addrs.next().map(|addr| addr.ip().to_string()),
        Err(_) => None,
    }
}
