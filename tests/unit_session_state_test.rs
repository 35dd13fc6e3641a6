mod common;

use common::MockTargetClient;
use shepherd::config::WrapperConfig;
use shepherd::core::driver::TargetClient;
use shepherd::core::session::SessionStateService;
use std::sync::Arc;

fn service() -> SessionStateService {
    SessionStateService::new(&WrapperConfig::default())
}

#[tokio::test]
async fn test_transfer_applies_current_values_to_new_client() {
    let session = service();
    session.setup_pristine_auto_commit(true);
    session.set_auto_commit(false);
    session.setup_pristine_read_only(false);
    session.set_read_only(true);

    let new_client = MockTargetClient::new("new");
    let target: Arc<dyn TargetClient> = new_client.clone();
    session.apply_current_session_state(&target).await.unwrap();

    assert_eq!(*new_client.auto_commit.lock(), Some(false));
    assert_eq!(*new_client.read_only.lock(), Some(true));
}

#[tokio::test]
async fn test_restore_returns_old_client_to_pristine() {
    let session = service();
    session.setup_pristine_auto_commit(true);
    session.set_auto_commit(false);
    session.setup_pristine_read_only(false);
    session.set_read_only(true);

    let old_client = MockTargetClient::new("old");
    let target: Arc<dyn TargetClient> = old_client.clone();
    session.apply_pristine_session_state(&target).await.unwrap();

    assert_eq!(*old_client.auto_commit.lock(), Some(true));
    assert_eq!(*old_client.read_only.lock(), Some(false));
}

#[tokio::test]
async fn test_round_trip_restores_observable_state() {
    let session = service();
    session.setup_pristine_catalog("app_db".to_string());
    session.set_catalog("reporting".to_string());

    let client = MockTargetClient::new("b");
    let target: Arc<dyn TargetClient> = client.clone();
    session.apply_current_session_state(&target).await.unwrap();
    assert_eq!(*client.catalog.lock(), Some("reporting".to_string()));

    session.apply_pristine_session_state(&target).await.unwrap();
    assert_eq!(*client.catalog.lock(), Some("app_db".to_string()));
}

#[tokio::test]
async fn test_pristine_capture_is_idempotent() {
    let session = service();
    session.setup_pristine_read_only(false);
    session.setup_pristine_read_only(true);
    session.set_read_only(true);

    let client = MockTargetClient::new("b");
    let target: Arc<dyn TargetClient> = client.clone();
    session.apply_pristine_session_state(&target).await.unwrap();
    // The first captured value wins.
    assert_eq!(*client.read_only.lock(), Some(false));
}

#[tokio::test]
async fn test_untouched_fields_are_not_restored() {
    let session = service();
    // Pristine equals current: nothing to restore.
    session.setup_pristine_auto_commit(true);
    session.set_auto_commit(true);

    let client = MockTargetClient::new("b");
    let target: Arc<dyn TargetClient> = client.clone();
    session.apply_pristine_session_state(&target).await.unwrap();
    assert_eq!(*client.auto_commit.lock(), None);
}

#[tokio::test]
async fn test_unsupported_setter_is_swallowed() {
    let session = service();
    session.setup_pristine_read_only(false);
    session.set_read_only(true);
    session.set_schema("analytics".to_string());

    let client = MockTargetClient::new("mysql-like");
    client.mark_unsupported("setSchema");
    let target: Arc<dyn TargetClient> = client.clone();

    session.apply_current_session_state(&target).await.unwrap();
    assert_eq!(*client.read_only.lock(), Some(true));
    assert_eq!(*client.schema.lock(), None);
}

#[tokio::test]
async fn test_double_begin_is_an_error() {
    let session = service();
    session.begin().unwrap();
    assert!(session.begin().is_err());
    session.complete();
    assert!(session.begin().is_ok());
}
