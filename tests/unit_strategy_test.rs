mod common;

use common::host;
use shepherd::core::host::{HostInfo, HostRole};
use shepherd::core::strategy::{
    HostSelector, RandomHostSelector, RoundRobinHostSelector, selector_for,
};

fn reader(name: &str) -> HostInfo {
    let mut info = host(name, 5432);
    info.role = HostRole::Reader;
    info
}

#[tokio::test]
async fn test_unknown_strategy_is_rejected() {
    assert!(selector_for("random").is_ok());
    assert!(selector_for("roundRobin").is_ok());
    assert!(selector_for("fastestResponse").is_err());
}

#[tokio::test]
async fn test_random_selects_a_matching_host() {
    let hosts = vec![reader("r1"), reader("r2"), {
        let mut writer = host("w1", 5432);
        writer.role = HostRole::Writer;
        writer
    }];
    for _ in 0..20 {
        let selected = RandomHostSelector.select(&hosts, HostRole::Reader).unwrap();
        assert_ne!(selected.host, "w1");
    }
}

#[tokio::test]
async fn test_random_fails_on_empty_pool() {
    assert!(RandomHostSelector.select(&[], HostRole::Reader).is_err());
}

#[tokio::test]
async fn test_round_robin_cycles_in_name_order() {
    let selector = RoundRobinHostSelector::new();
    let hosts = vec![reader("r2"), reader("r1"), reader("r3")];

    let first = selector.select(&hosts, HostRole::Reader).unwrap();
    let second = selector.select(&hosts, HostRole::Reader).unwrap();
    let third = selector.select(&hosts, HostRole::Reader).unwrap();
    let fourth = selector.select(&hosts, HostRole::Reader).unwrap();

    assert_eq!(first.host, "r1");
    assert_eq!(second.host, "r2");
    assert_eq!(third.host, "r3");
    assert_eq!(fourth.host, "r1");
}
