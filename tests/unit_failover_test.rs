mod common;

use common::{MockConnectionProvider, aurora_client, props, topology_rows};
use serde_json::json;
use shepherd::connection::WrapperClient;
use shepherd::core::errors::WrapperError;
use shepherd::core::host::HostAvailability;
use std::sync::atomic::Ordering;

fn instance(name: &str, hash: &str) -> String {
    format!("{name}.{hash}.us-east-1.rds.amazonaws.com")
}

#[tokio::test]
async fn test_writer_failover_on_network_error() {
    let hash = "aaa111aaa";
    let cluster = format!("wf.cluster-{hash}.us-east-1.rds.amazonaws.com");
    let connections = MockConnectionProvider::new();

    // h1 is the writer at connect time.
    let client_a = aurora_client("h1", &[("h1", true, 100), ("h2", false, 100)], false);
    client_a.with_rows("SELECT 1", vec![json!({ "one": 1 })]);
    connections.register(&cluster, client_a.clone());
    connections.register(&instance("h1", hash), client_a.clone());

    let client_reader = aurora_client("h2", &[("h3", true, 300), ("h2", false, 100)], true);
    connections.register(&instance("h2", hash), client_reader);

    let client_new_writer = aurora_client("h3", &[("h3", true, 300), ("h2", false, 100)], false);
    client_new_writer.with_rows("SELECT 1", vec![json!({ "one": 1 })]);
    connections.register(&instance("h3", hash), client_new_writer);

    let wrapper = WrapperClient::connect_postgres(&props(&cluster), connections.clone())
        .await
        .unwrap();
    assert!(wrapper.query("SELECT 1").await.is_ok());
    let service = wrapper.container().service.clone();
    assert_eq!(
        service.current_host_info().unwrap().host,
        instance("h1", hash)
    );

    // The cluster fails over: h3 becomes the writer and h1 dies mid-call.
    client_a.replace_rows(
        "FROM aurora_replica_status()",
        topology_rows(&[("h3", true, 300), ("h2", false, 100)]),
    );
    client_a.replace_error(
        "SELECT 1",
        WrapperError::Network("connection reset by peer".into()),
    );
    client_a.valid.store(false, Ordering::SeqCst);

    let err = wrapper.query("SELECT 1").await.unwrap_err();
    assert!(matches!(err, WrapperError::FailoverSuccess));

    // The failed writer was recorded unavailable, the new writer installed.
    assert_eq!(
        service.availability_for_url(&format!("{}:5432", instance("h1", hash))),
        Some(HostAvailability::NotAvailable)
    );
    assert_eq!(
        service.current_host_info().unwrap().host,
        instance("h3", hash)
    );
    assert!(wrapper.query("SELECT 1").await.is_ok());
}

#[tokio::test]
async fn test_writer_failover_rejects_candidate_outside_allow_list() {
    let hash = "ccc888ccc";
    let cluster = format!("al.cluster-{hash}.us-east-1.rds.amazonaws.com");
    let connections = MockConnectionProvider::new();

    let client_a = aurora_client("h1", &[("h1", true, 100), ("h2", false, 100)], false);
    client_a.with_rows("SELECT 1", vec![json!({ "one": 1 })]);
    connections.register(&cluster, client_a.clone());
    connections.register(&instance("h1", hash), client_a.clone());
    connections.register(
        &instance("h3", hash),
        aurora_client("h3", &[("h3", true, 300), ("h2", false, 100)], false),
    );

    let wrapper = WrapperClient::connect_postgres(&props(&cluster), connections.clone())
        .await
        .unwrap();
    let service = wrapper.container().service.clone();

    // Only the original members are permitted failover targets.
    service.set_allowed_hosts(Some(std::collections::HashSet::from([
        instance("h1", hash),
        instance("h2", hash),
    ])));

    // The proclaimed writer moves to h3, which is outside the allow-list.
    client_a.replace_rows(
        "FROM aurora_replica_status()",
        topology_rows(&[("h3", true, 300), ("h2", false, 100)]),
    );
    client_a.replace_error("SELECT 1", WrapperError::Network("connection reset".into()));
    client_a.valid.store(false, Ordering::SeqCst);

    let err = wrapper.query("SELECT 1").await.unwrap_err();
    assert!(matches!(err, WrapperError::FailoverFailed(ref message)
        if message.contains("allowed host list")));
    assert_eq!(connections.connects_to(&instance("h3", hash)), 0);
}

#[tokio::test]
async fn test_reader_failover_in_strict_reader_mode() {
    let hash = "bbb222bbb";
    let cluster = format!("rf.cluster-{hash}.us-east-1.rds.amazonaws.com");
    let connections = MockConnectionProvider::new();

    let client_a = aurora_client(
        "h1",
        &[("h1", true, 100), ("h2", false, 100), ("h3", false, 100)],
        false,
    );
    client_a.with_rows("SELECT 1", vec![json!({ "one": 1 })]);
    connections.register(&cluster, client_a.clone());
    connections.register(&instance("h1", hash), client_a.clone());

    // h2 is unreachable, h3 is a healthy reader.
    connections.fail_host(
        &instance("h2", hash),
        WrapperError::Network("no route to host".into()),
    );
    let client_h3 = aurora_client(
        "h3",
        &[("h1", true, 100), ("h2", false, 100), ("h3", false, 100)],
        true,
    );
    connections.register(&instance("h3", hash), client_h3);

    let mut properties = props(&cluster);
    properties.insert("failoverMode".to_string(), "strict-reader".to_string());

    let wrapper = WrapperClient::connect_postgres(&properties, connections.clone())
        .await
        .unwrap();
    let service = wrapper.container().service.clone();

    client_a.replace_error("SELECT 1", WrapperError::Network("broken pipe".into()));
    client_a.valid.store(false, Ordering::SeqCst);

    let err = wrapper.query("SELECT 1").await.unwrap_err();
    assert!(matches!(err, WrapperError::FailoverSuccess));
    assert_eq!(
        service.current_host_info().unwrap().host,
        instance("h3", hash)
    );
}
