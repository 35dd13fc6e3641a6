mod common;

use common::{MockConnectionProvider, host};
use shepherd::config::WrapperConfig;
use shepherd::core::bluegreen::monitor::InterimStatusSink;
use shepherd::core::bluegreen::provider::BlueGreenStatusProvider;
use shepherd::core::bluegreen::{
    BlueGreenInterimStatus, BlueGreenPhase, BlueGreenRole, RoutingControl,
};
use shepherd::core::dialect::{AuroraPgDialect, DatabaseDialect};
use shepherd::core::errors::WrapperError;
use shepherd::core::host::{HostInfo, HostRole};
use shepherd::core::storage::StorageService;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

const BLUE_DNS: &str = "app.cluster-abc123xyz.us-east-1.rds.amazonaws.com";
const BLUE_WRITER: &str = "bw1.abc123xyz.us-east-1.rds.amazonaws.com";
const GREEN_WRITER: &str = "bw1-green-1a2b3c.abc123xyz.us-east-1.rds.amazonaws.com";

/// A provider whose monitors can never connect, so only hand-fed interim
/// statuses drive it.
fn quiet_provider(bgd_id: &str, config: WrapperConfig) -> Arc<BlueGreenStatusProvider> {
    let connections = MockConnectionProvider::new();
    connections.fail_host(BLUE_DNS, WrapperError::Network("unreachable".into()));
    let dialect: Arc<dyn DatabaseDialect> = Arc::new(AuroraPgDialect::new());
    BlueGreenStatusProvider::start(
        bgd_id,
        config,
        host(BLUE_DNS, 5432),
        dialect,
        connections,
        StorageService::new(Duration::from_secs(5)),
    )
}

fn writer_host(name: &str) -> HostInfo {
    let mut info = host(name, 5432);
    info.role = HostRole::Writer;
    info
}

fn blue_interim(phase: BlueGreenPhase) -> BlueGreenInterimStatus {
    let mut host_names = HashSet::new();
    host_names.insert(BLUE_DNS.to_string());
    host_names.insert(BLUE_WRITER.to_string());
    let mut ips = HashMap::new();
    ips.insert(BLUE_DNS.to_string(), "1.2.3.4".to_string());
    ips.insert(BLUE_WRITER.to_string(), "1.2.3.5".to_string());
    BlueGreenInterimStatus {
        phase: Some(phase),
        version: "1.0".to_string(),
        port: 5432,
        start_topology: vec![writer_host(BLUE_WRITER)],
        current_topology: vec![writer_host(BLUE_WRITER)],
        start_ip_by_host: ips.clone(),
        current_ip_by_host: ips,
        host_names,
        ..BlueGreenInterimStatus::default()
    }
}

fn green_interim(phase: BlueGreenPhase) -> BlueGreenInterimStatus {
    let mut host_names = HashSet::new();
    host_names.insert(GREEN_WRITER.to_string());
    let mut ips = HashMap::new();
    ips.insert(GREEN_WRITER.to_string(), "5.6.7.8".to_string());
    BlueGreenInterimStatus {
        phase: Some(phase),
        version: "1.0".to_string(),
        port: 5432,
        start_topology: vec![writer_host(GREEN_WRITER)],
        current_topology: vec![writer_host(GREEN_WRITER)],
        start_ip_by_host: ips.clone(),
        current_ip_by_host: ips,
        host_names,
        ..BlueGreenInterimStatus::default()
    }
}

#[tokio::test]
async fn test_preparation_substitutes_blue_host_with_its_ip() {
    let provider = quiet_provider("bgd-prep", WrapperConfig::default());
    provider
        .process_interim_status(BlueGreenRole::Source, blue_interim(BlueGreenPhase::Preparation))
        .await;

    let status = provider.status();
    assert_eq!(status.phase, BlueGreenPhase::Preparation);
    assert_eq!(status.role_of(BLUE_DNS), Some(BlueGreenRole::Source));

    let rule = status
        .connect_routing_for(&format!("{BLUE_DNS}:5432"), Some(BlueGreenRole::Source))
        .expect("blue host should have a substitution rule");
    match &rule.control {
        RoutingControl::Substitute(route) => {
            assert_eq!(route.target.host, "1.2.3.4");
            assert_eq!(route.iam_candidates.len(), 1);
            assert_eq!(route.iam_candidates[0].host, BLUE_DNS);
        }
        other => panic!("expected substitution, got {other:?}"),
    }

    // The port-less matcher exists as well.
    assert!(status.connect_routing_for(BLUE_DNS, Some(BlueGreenRole::Source)).is_some());
    provider.stop().await;
}

#[tokio::test]
async fn test_in_progress_suspends_and_completed_clears() {
    let config = WrapperConfig {
        bg_suspend_new_blue_connections_when_in_progress: true,
        ..WrapperConfig::default()
    };
    let provider = quiet_provider("bgd-progress", config);

    provider
        .process_interim_status(BlueGreenRole::Source, blue_interim(BlueGreenPhase::InProgress))
        .await;
    provider
        .process_interim_status(BlueGreenRole::Target, green_interim(BlueGreenPhase::InProgress))
        .await;

    let status = provider.status();
    assert_eq!(status.phase, BlueGreenPhase::InProgress);
    let rule = status
        .connect_routing_for("anything", Some(BlueGreenRole::Source))
        .unwrap();
    assert!(matches!(rule.control, RoutingControl::Suspend));
    let execute_rule = status
        .execute_routing_for("anything", Some(BlueGreenRole::Target))
        .unwrap();
    assert!(matches!(execute_rule.control, RoutingControl::Suspend));

    // Completion with both DNS transitions observed empties the tables.
    let mut done_blue = blue_interim(BlueGreenPhase::Completed);
    done_blue.all_start_topology_ip_changed = true;
    let mut done_green = green_interim(BlueGreenPhase::Completed);
    done_green.all_start_topology_endpoints_removed = true;
    provider
        .process_interim_status(BlueGreenRole::Source, done_blue)
        .await;
    provider
        .process_interim_status(BlueGreenRole::Target, done_green)
        .await;

    let status = provider.status();
    assert_eq!(status.phase, BlueGreenPhase::Completed);
    assert!(status.connect_routing.is_empty());
    assert!(status.execute_routing.is_empty());
    provider.stop().await;
}

#[tokio::test]
async fn test_post_pairs_blue_with_green_and_rejects_green_connects() {
    let provider = quiet_provider("bgd-post", WrapperConfig::default());
    provider
        .process_interim_status(BlueGreenRole::Source, blue_interim(BlueGreenPhase::Post))
        .await;
    provider
        .process_interim_status(BlueGreenRole::Target, green_interim(BlueGreenPhase::Post))
        .await;

    let status = provider.status();
    assert_eq!(status.phase, BlueGreenPhase::Post);

    // Writer pairs with writer.
    let green = status
        .corresponding_hosts
        .get(&BLUE_WRITER.to_lowercase())
        .expect("blue writer should have a green counterpart");
    assert_eq!(green.host, GREEN_WRITER);

    let rule = status
        .connect_routing_for(&format!("{BLUE_WRITER}:5432"), Some(BlueGreenRole::Source))
        .unwrap();
    match &rule.control {
        RoutingControl::Substitute(route) => {
            assert_eq!(route.target.host, GREEN_WRITER);
            // Green first, blue second, until the rename is proven.
            assert_eq!(route.iam_candidates.len(), 2);
            assert_eq!(route.iam_candidates[0].host, GREEN_WRITER);
        }
        other => panic!("expected substitution, got {other:?}"),
    }

    // Green DNS still lives: new connects to the green side are rejected.
    let reject = status
        .connect_routing_for("whatever", Some(BlueGreenRole::Target))
        .unwrap();
    assert!(matches!(reject.control, RoutingControl::Reject));
    provider.stop().await;
}

#[tokio::test]
async fn test_phase_is_monotonic_and_rollback_decreases_once() {
    let provider = quiet_provider("bgd-rollback", WrapperConfig::default());

    provider
        .process_interim_status(BlueGreenRole::Source, blue_interim(BlueGreenPhase::Created))
        .await;
    assert_eq!(provider.status().phase, BlueGreenPhase::Created);

    provider
        .process_interim_status(BlueGreenRole::Source, blue_interim(BlueGreenPhase::InProgress))
        .await;
    assert_eq!(provider.status().phase, BlueGreenPhase::InProgress);

    // A stale lower phase without a rollback must not retard the summary…
    // (the summary phase is already InProgress, so an equal report is a no-op)
    provider
        .process_interim_status(BlueGreenRole::Target, green_interim(BlueGreenPhase::Created))
        .await;
    assert_eq!(provider.status().phase, BlueGreenPhase::InProgress);

    // …but the monitored role moving backwards is a rollback: the phase
    // decreases and the episode ends at CREATED.
    provider
        .process_interim_status(BlueGreenRole::Source, blue_interim(BlueGreenPhase::Preparation))
        .await;
    assert_eq!(provider.status().phase, BlueGreenPhase::Preparation);

    provider
        .process_interim_status(BlueGreenRole::Source, blue_interim(BlueGreenPhase::Created))
        .await;
    assert_eq!(provider.status().phase, BlueGreenPhase::Created);

    // After the rollback episode closes, forward progress works again.
    provider
        .process_interim_status(BlueGreenRole::Source, blue_interim(BlueGreenPhase::Preparation))
        .await;
    assert_eq!(provider.status().phase, BlueGreenPhase::Preparation);
    provider.stop().await;
}

#[tokio::test]
async fn test_unchanged_interim_is_ignored() {
    let provider = quiet_provider("bgd-hash", WrapperConfig::default());
    provider
        .process_interim_status(BlueGreenRole::Source, blue_interim(BlueGreenPhase::Preparation))
        .await;
    let first_revision = provider.status().revision;

    provider
        .process_interim_status(BlueGreenRole::Source, blue_interim(BlueGreenPhase::Preparation))
        .await;
    assert_eq!(provider.status().revision, first_revision);
    provider.stop().await;
}

#[tokio::test]
async fn test_switchover_deadline_forces_completion() {
    let config = WrapperConfig {
        bg_switchover_timeout_ms: 200,
        ..WrapperConfig::default()
    };
    let provider = quiet_provider("bgd-deadline", config);
    provider
        .process_interim_status(BlueGreenRole::Source, blue_interim(BlueGreenPhase::Preparation))
        .await;
    assert_eq!(provider.status().phase, BlueGreenPhase::Preparation);

    let started = Instant::now();
    loop {
        if provider.status().phase == BlueGreenPhase::Completed {
            break;
        }
        assert!(
            started.elapsed() < Duration::from_secs(3),
            "deadline timer never fired"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    provider.stop().await;
}
