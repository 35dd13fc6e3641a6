use shepherd::core::bluegreen::{
    BlueGreenPhase, BlueGreenRole, BlueGreenStatus, RoutingControl, RoutingEntry,
};

fn entry(
    host_and_port: Option<&str>,
    role: Option<BlueGreenRole>,
    control: RoutingControl,
) -> RoutingEntry {
    RoutingEntry::new(host_and_port.map(|h| h.to_string()), role, control)
}

#[tokio::test]
async fn test_null_matchers_are_wildcards() {
    let wildcard = entry(None, None, RoutingControl::Suspend);
    assert!(wildcard.matches("any-host:5432", Some(BlueGreenRole::Source)));
    assert!(wildcard.matches("any-host:5432", None));

    let role_only = entry(None, Some(BlueGreenRole::Target), RoutingControl::Reject);
    assert!(role_only.matches("green-host", Some(BlueGreenRole::Target)));
    assert!(!role_only.matches("green-host", Some(BlueGreenRole::Source)));
    // A role matcher never matches a host of unknown role.
    assert!(!role_only.matches("green-host", None));
}

#[tokio::test]
async fn test_host_matcher_is_case_insensitive() {
    let rule = entry(
        Some("Blue.Cluster-XYZ.rds.amazonaws.com:5432"),
        None,
        RoutingControl::Suspend,
    );
    assert!(rule.matches("blue.cluster-xyz.rds.amazonaws.com:5432", None));
    assert!(!rule.matches("blue.cluster-xyz.rds.amazonaws.com", None));
}

#[tokio::test]
async fn test_first_matching_rule_wins() {
    let mut status = BlueGreenStatus::idle("bgd-1");
    status.phase = BlueGreenPhase::InProgress;
    status.connect_routing = vec![
        entry(Some("h1:5432"), None, RoutingControl::Reject),
        entry(None, Some(BlueGreenRole::Source), RoutingControl::Suspend),
        entry(None, None, RoutingControl::PassThrough),
    ];

    let first = status
        .connect_routing_for("h1:5432", Some(BlueGreenRole::Source))
        .unwrap();
    assert!(matches!(first.control, RoutingControl::Reject));

    let second = status
        .connect_routing_for("h2:5432", Some(BlueGreenRole::Source))
        .unwrap();
    assert!(matches!(second.control, RoutingControl::Suspend));

    let third = status
        .connect_routing_for("h2:5432", Some(BlueGreenRole::Target))
        .unwrap();
    assert!(matches!(third.control, RoutingControl::PassThrough));
}

#[tokio::test]
async fn test_no_rule_means_no_routing() {
    let status = BlueGreenStatus::idle("bgd-1");
    assert!(status.connect_routing_for("h1:5432", None).is_none());
    assert!(status.execute_routing_for("h1:5432", None).is_none());
}

#[tokio::test]
async fn test_phase_ordering_is_total() {
    use BlueGreenPhase::*;
    let order = [NotCreated, Created, Preparation, InProgress, Post, Completed];
    for window in order.windows(2) {
        assert!(window[0] < window[1]);
    }
    assert!(InProgress.is_active_switchover());
    assert!(!Completed.is_active_switchover());
    assert!(!NotCreated.is_active_switchover());
}

#[tokio::test]
async fn test_phase_parsing_from_status_table() {
    assert_eq!(BlueGreenPhase::from_status("AVAILABLE"), BlueGreenPhase::Created);
    assert_eq!(
        BlueGreenPhase::from_status("SWITCHOVER_IN_PROGRESS"),
        BlueGreenPhase::InProgress
    );
    assert_eq!(
        BlueGreenPhase::from_status("SWITCHOVER_COMPLETED"),
        BlueGreenPhase::Completed
    );
    assert_eq!(
        BlueGreenPhase::from_status("something-new"),
        BlueGreenPhase::NotCreated
    );

    assert_eq!(
        BlueGreenRole::from_status("BLUE_GREEN_DEPLOYMENT_SOURCE"),
        Some(BlueGreenRole::Source)
    );
    assert_eq!(BlueGreenRole::from_status("bystander"), None);
}
