mod common;

use common::{MockConnectionProvider, aurora_client, host};
use shepherd::config::WrapperConfig;
use shepherd::core::dialect::{AuroraPgDialect, DatabaseDialect};
use shepherd::core::driver::ClientWrapper;
use shepherd::core::host::HostRole;
use shepherd::core::storage::StorageService;
use shepherd::core::topology::{ClusterTopologyHostListProvider, HostListProvider};
use std::sync::Arc;
use std::time::Duration;

const WRITER_DNS: &str = "tpl.cluster-abc123xyz.us-east-1.rds.amazonaws.com";

fn config_for(host_name: &str) -> WrapperConfig {
    WrapperConfig {
        host: host_name.to_string(),
        port: Some(5432),
        ..WrapperConfig::default()
    }
}

fn provider_with(
    storage: &Arc<StorageService>,
    connections: &Arc<MockConnectionProvider>,
    entry_host: &str,
) -> ClusterTopologyHostListProvider {
    let dialect: Arc<dyn DatabaseDialect> = Arc::new(AuroraPgDialect::new());
    ClusterTopologyHostListProvider::new(
        config_for(entry_host),
        host(entry_host, 5432),
        dialect,
        storage.clone(),
        connections.clone(),
    )
}

fn wrapper_for(client: Arc<common::MockTargetClient>, host_name: &str) -> Arc<ClientWrapper> {
    Arc::new(ClientWrapper::new(
        client,
        host(host_name, 5432),
        config_for(host_name),
    ))
}

#[tokio::test]
async fn test_topology_materializes_instance_endpoints() {
    let storage = StorageService::new(Duration::from_secs(5));
    let connections = MockConnectionProvider::new();
    let provider = provider_with(&storage, &connections, WRITER_DNS);

    let client = aurora_client("h1", &[("h1", true, 100), ("h2", false, 100)], false);
    let wrapper = wrapper_for(client, WRITER_DNS);

    let topology = provider.refresh(Some(&wrapper)).await.unwrap();
    assert_eq!(topology.len(), 2);
    assert_eq!(topology[0].role, HostRole::Writer);
    assert_eq!(
        topology[0].host,
        "h1.abc123xyz.us-east-1.rds.amazonaws.com"
    );
    assert_eq!(topology[0].port, 5432);
    assert_eq!(topology[1].host_id, "h2");
}

#[tokio::test]
async fn test_duplicate_writers_resolve_to_most_recent() {
    let storage = StorageService::new(Duration::from_secs(5));
    let connections = MockConnectionProvider::new();
    let provider = provider_with(
        &storage,
        &connections,
        "dup.cluster-abc123xyz.us-east-1.rds.amazonaws.com",
    );

    let client = aurora_client(
        "h2",
        &[("h1", true, 100), ("h2", true, 200), ("h3", false, 150)],
        false,
    );
    let wrapper = wrapper_for(client, "dup.cluster-abc123xyz.us-east-1.rds.amazonaws.com");

    let topology = provider.force_refresh(Some(&wrapper)).await.unwrap();
    let writers: Vec<_> = topology
        .iter()
        .filter(|h| h.role == HostRole::Writer)
        .collect();
    assert_eq!(writers.len(), 1);
    assert_eq!(writers[0].host_id, "h2");
    // The stale writer is discarded, not demoted.
    assert!(!topology.iter().any(|h| h.host_id == "h1"));
}

#[tokio::test]
async fn test_no_writer_means_no_fresh_topology() {
    let storage = StorageService::new(Duration::from_secs(5));
    let connections = MockConnectionProvider::new();
    let provider = provider_with(
        &storage,
        &connections,
        "nw.cluster-abc123xyz.us-east-1.rds.amazonaws.com",
    );

    let client = aurora_client("h1", &[("h1", false, 100), ("h2", false, 100)], true);
    let wrapper = wrapper_for(client, "nw.cluster-abc123xyz.us-east-1.rds.amazonaws.com");

    let topology = provider.force_refresh(Some(&wrapper)).await.unwrap();
    assert!(topology.is_empty());
}

#[tokio::test]
async fn test_topology_cache_shared_by_cluster_id() {
    let storage = StorageService::new(Duration::from_secs(5));
    let connections = MockConnectionProvider::new();
    let entry = "shared.cluster-abc123xyz.us-east-1.rds.amazonaws.com";

    let provider_one = provider_with(&storage, &connections, entry);
    let provider_two = provider_with(&storage, &connections, entry);
    assert_eq!(provider_one.cluster_id(), provider_two.cluster_id());

    let client = aurora_client("h1", &[("h1", true, 100), ("h2", false, 100)], false);
    let wrapper = wrapper_for(client.clone(), entry);

    let first = provider_one.refresh(Some(&wrapper)).await.unwrap();
    assert_eq!(client.queries_containing("FROM aurora_replica_status()"), 1);

    // Within the freshness window the second provider must not query again.
    let second = provider_two.refresh(Some(&wrapper)).await.unwrap();
    assert_eq!(client.queries_containing("FROM aurora_replica_status()"), 1);
    assert_eq!(first.len(), second.len());
}

#[tokio::test]
async fn test_identify_connection_matches_by_instance_id() {
    let storage = StorageService::new(Duration::from_secs(5));
    let connections = MockConnectionProvider::new();
    let entry = "idc.cluster-abc123xyz.us-east-1.rds.amazonaws.com";
    let provider = provider_with(&storage, &connections, entry);

    let client = aurora_client("h2", &[("h1", true, 100), ("h2", false, 100)], true);
    let wrapper = wrapper_for(client, entry);

    let dialect: Arc<dyn DatabaseDialect> = Arc::new(AuroraPgDialect::new());
    let found = provider
        .identify_connection(&wrapper, &dialect)
        .await
        .unwrap()
        .expect("connection should match a topology member");
    assert_eq!(found.host_id, "h2");
    assert_eq!(found.role, HostRole::Reader);
}
