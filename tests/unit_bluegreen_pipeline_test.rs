mod common;

use common::{MockConnectionProvider, host, props};
use shepherd::core::bluegreen::monitor::InterimStatusSink;
use shepherd::core::bluegreen::plugin::provider_for_deployment;
use shepherd::core::bluegreen::{BlueGreenInterimStatus, BlueGreenPhase, BlueGreenRole};
use shepherd::core::container::ServiceContainer;
use shepherd::core::dialect::DatabaseType;
use shepherd::core::errors::WrapperError;
use shepherd::core::host::{HostInfo, HostRole};
use shepherd::core::rds;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn blue_interim(cluster: &str, phase: BlueGreenPhase) -> BlueGreenInterimStatus {
    let mut host_names = HashSet::new();
    host_names.insert(cluster.to_string());
    let mut ips = HashMap::new();
    ips.insert(cluster.to_string(), "1.2.3.4".to_string());
    let mut writer = host(cluster, 5432);
    writer.role = HostRole::Writer;
    BlueGreenInterimStatus {
        phase: Some(phase),
        version: "1.0".to_string(),
        port: 5432,
        start_topology: vec![writer.clone()],
        current_topology: vec![writer],
        start_ip_by_host: ips.clone(),
        current_ip_by_host: ips,
        host_names,
        ..BlueGreenInterimStatus::default()
    }
}

async fn build(
    cluster: &str,
    extra: &[(&str, &str)],
    connections: &Arc<MockConnectionProvider>,
) -> Arc<ServiceContainer> {
    let mut properties = props(cluster);
    properties.insert("plugins".to_string(), "bluegreen".to_string());
    for (key, value) in extra {
        properties.insert(key.to_string(), value.to_string());
    }
    let container =
        ServiceContainer::build(&properties, DatabaseType::Postgres, connections.clone(), None)
            .unwrap();
    container.service.init_host_provider().await.unwrap();
    container
}

#[tokio::test]
async fn test_preparation_connect_substitutes_ip_and_keeps_iam_host() {
    let cluster = "bg1.cluster-ccc333ccc.us-east-1.rds.amazonaws.com";
    let connections = MockConnectionProvider::new();
    // The monitors cannot reach the cluster; routing is fed by hand.
    connections.fail_host(cluster, WrapperError::Network("unreachable".into()));

    let container = build(cluster, &[], &connections).await;
    let bgd_id = rds::cluster_id_of(cluster, 5432).unwrap();
    let provider =
        provider_for_deployment(&bgd_id, &container.service, &container.config);
    provider
        .process_interim_status(
            BlueGreenRole::Source,
            blue_interim(cluster, BlueGreenPhase::Preparation),
        )
        .await;

    let target: HostInfo = host(cluster, 5432);
    let client = container
        .service
        .connect(&target, container.service.config())
        .await
        .unwrap();

    assert_eq!(client.host_info.host, "1.2.3.4");
    let attempt = connections.connect_log.lock().last().cloned().unwrap();
    assert_eq!(attempt.host, "1.2.3.4");
    assert_eq!(attempt.iam_host.as_deref(), Some(cluster));
    provider.stop().await;
}

#[tokio::test]
async fn test_in_progress_connect_suspension_times_out() {
    let cluster = "bg2.cluster-ddd444ddd.us-east-1.rds.amazonaws.com";
    let connections = MockConnectionProvider::new();
    connections.fail_host(cluster, WrapperError::Network("unreachable".into()));

    let container = build(
        cluster,
        &[
            ("bgConnectTimeoutMs", "400"),
            ("bgSuspendNewBlueConnectionsWhenInProgress", "true"),
        ],
        &connections,
    )
    .await;
    let bgd_id = rds::cluster_id_of(cluster, 5432).unwrap();
    let provider =
        provider_for_deployment(&bgd_id, &container.service, &container.config);
    provider
        .process_interim_status(
            BlueGreenRole::Source,
            blue_interim(cluster, BlueGreenPhase::InProgress),
        )
        .await;

    let started = Instant::now();
    let err = container
        .service
        .connect(&host(cluster, 5432), container.service.config())
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, WrapperError::Internal(ref message) if message.contains("try later")));
    assert!(elapsed >= Duration::from_millis(380), "returned after {elapsed:?}");
    provider.stop().await;
}

#[tokio::test]
async fn test_suspension_lifts_when_phase_moves_on() {
    let cluster = "bg3.cluster-eee555eee.us-east-1.rds.amazonaws.com";
    let connections = MockConnectionProvider::new();
    connections.fail_host(cluster, WrapperError::Network("unreachable".into()));

    let container = build(
        cluster,
        &[
            ("bgConnectTimeoutMs", "5000"),
            ("bgSuspendNewBlueConnectionsWhenInProgress", "true"),
        ],
        &connections,
    )
    .await;
    let bgd_id = rds::cluster_id_of(cluster, 5432).unwrap();
    let provider =
        provider_for_deployment(&bgd_id, &container.service, &container.config);
    provider
        .process_interim_status(
            BlueGreenRole::Source,
            blue_interim(cluster, BlueGreenPhase::InProgress),
        )
        .await;

    // Release the suspension shortly after the connect starts waiting.
    let releaser = {
        let provider = provider.clone();
        let cluster = cluster.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            let mut done = blue_interim(&cluster, BlueGreenPhase::Completed);
            done.all_start_topology_ip_changed = true;
            provider
                .process_interim_status(BlueGreenRole::Source, done)
                .await;
        })
    };

    // Once the phase moves on, the pipeline resumes; the blue endpoint is
    // reachable again in this scenario.
    connections.clear_failure(cluster);
    let client = container
        .service
        .connect(&host(cluster, 5432), container.service.config())
        .await
        .unwrap();
    assert_eq!(client.host_info.host, cluster);
    releaser.await.unwrap();
    provider.stop().await;
}
